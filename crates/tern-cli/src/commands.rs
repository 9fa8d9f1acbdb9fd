//! `tern mcp` command implementations

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tern_mcp::{McpManager, RegistryStore, ServerDescriptor, ServerStatus, TransportKind};

use crate::settings::Settings;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

fn print_status(ok: bool, msg: &str) {
    let icon = if ok {
        format!("{}✓{}", GREEN, RESET)
    } else {
        format!("{}✗{}", RED, RESET)
    };
    println!("  {} {}", icon, msg);
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_color(status: &ServerStatus) -> &'static str {
    match status {
        ServerStatus::Connected => GREEN,
        ServerStatus::Connecting => YELLOW,
        ServerStatus::Error(_) => RED,
        ServerStatus::Disabled | ServerStatus::Disconnected => DIM,
    }
}

/// Build a manager from config.toml and the `--registry` override.
pub fn manager(registry: Option<PathBuf>) -> Result<McpManager> {
    let settings = Settings::load()?;
    let path = settings.registry_path(registry)?;
    tracing::debug!("Using MCP registry at {}", path.display());
    Ok(McpManager::with_options(
        RegistryStore::new(path),
        settings.client_options(),
    ))
}

/// Parse a `KEY=VALUE` pair
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse optional JSON arguments given on the command line.
fn parse_arguments(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(s).with_context(|| format!("Invalid JSON arguments: {}", s)))
        .transpose()
}

/// Options of `tern mcp add`
pub struct AddOptions {
    pub name: String,
    pub transport: TransportKind,
    pub url: Option<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub disabled: bool,
    pub command: Vec<String>,
}

impl AddOptions {
    fn into_descriptor(self) -> Result<ServerDescriptor> {
        let mut descriptor = match self.transport {
            TransportKind::Stdio => {
                let mut words = self.command.into_iter();
                let Some(program) = words.next() else {
                    bail!("A stdio server needs a command: tern mcp add NAME -- COMMAND [ARGS...]");
                };
                ServerDescriptor::stdio(self.name, program).with_args(words)
            }
            kind => {
                let Some(url) = self.url else {
                    bail!("A {} server needs --url", kind);
                };
                ServerDescriptor::remote(self.name, kind, url)
            }
        };

        descriptor.env = self.env.into_iter().collect::<HashMap<_, _>>();
        descriptor.cwd = self.cwd;
        Ok(descriptor.with_enabled(!self.disabled))
    }
}

pub async fn add(registry: Option<PathBuf>, options: AddOptions) -> Result<()> {
    let manager = manager(registry)?;
    manager.load().await?;

    let descriptor = options.into_descriptor()?;
    let name = descriptor.name.clone();
    let enabled = descriptor.enabled;
    let result = manager.add_server(descriptor).await;

    match result {
        Ok(()) if enabled => {
            let tools = manager.get_all_tools().len();
            print_status(true, &format!("Added {} ({} tools)", name, tools));
        }
        Ok(()) => print_status(true, &format!("Added {} (disabled)", name)),
        Err(tern_mcp::McpError::InvalidConfig(reason)) => bail!("{}", reason),
        Err(e) if manager.servers().iter().any(|d| d.name == name) => {
            print_status(false, &format!("Added {}, but it failed to connect: {}", name, e));
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to add MCP server {}", name)),
    }

    manager.shutdown().await;
    Ok(())
}

pub async fn remove(registry: Option<PathBuf>, name: &str) -> Result<()> {
    let manager = manager(registry)?;
    manager.load().await?;
    manager
        .remove_server(name)
        .await
        .with_context(|| format!("Failed to remove MCP server {}", name))?;
    print_status(true, &format!("Removed {}", name));
    Ok(())
}

pub async fn set_enabled(registry: Option<PathBuf>, name: &str, enabled: bool) -> Result<()> {
    let manager = manager(registry)?;
    manager.load().await?;

    if enabled {
        match manager.enable_server(name).await {
            Ok(()) => print_status(true, &format!("Enabled {}", name)),
            Err(e @ tern_mcp::McpError::ServerNotFound(_)) => return Err(e.into()),
            Err(e) => print_status(false, &format!("Enabled {}, but it failed to connect: {}", name, e)),
        }
    } else {
        manager
            .disable_server(name)
            .await
            .with_context(|| format!("Failed to disable MCP server {}", name))?;
        print_status(true, &format!("Disabled {}", name));
    }

    manager.shutdown().await;
    Ok(())
}

/// List configured servers without connecting
pub async fn list(registry: Option<PathBuf>, json: bool) -> Result<()> {
    let manager = manager(registry)?;
    manager.load().await?;
    let servers = manager.servers();

    if json {
        let entries: Vec<Value> = servers
            .iter()
            .map(|d| {
                let mut entry = serde_json::to_value(d).unwrap_or_default();
                entry["name"] = Value::String(d.name.clone());
                entry["enabled"] = Value::Bool(d.enabled);
                entry
            })
            .collect();
        return print_json(&entries);
    }

    println!("{}MCP Servers ({}){}", BOLD, servers.len(), RESET);
    println!("  {}Registry: {}{}", DIM, manager.store().path().display(), RESET);
    if servers.is_empty() {
        println!("  {}No servers configured{}", YELLOW, RESET);
        println!("  Run: tern mcp add NAME -- COMMAND [ARGS...]");
        return Ok(());
    }

    for d in servers {
        let target = match d.transport {
            TransportKind::Stdio => {
                let mut words = vec![d.command.clone().unwrap_or_default()];
                words.extend(d.args.iter().cloned());
                words.join(" ")
            }
            _ => d.url.clone().unwrap_or_default(),
        };
        let state = if d.enabled { "" } else { " (disabled)" };
        println!("  - {}{}{} [{}] {}{}", BOLD, d.name, RESET, d.transport, target, state);
    }
    Ok(())
}

/// Connect every enabled server and report its status
pub async fn status(registry: Option<PathBuf>, json: bool) -> Result<()> {
    let manager = manager(registry)?;
    manager.initialize().await?;
    let summary = manager.summary();
    manager.shutdown().await;

    if json {
        return print_json(&summary);
    }

    println!("{}MCP Server Status{}", BOLD, RESET);
    if summary.is_empty() {
        println!("  {}No servers configured{}", YELLOW, RESET);
        return Ok(());
    }
    for s in summary {
        println!(
            "  {}{}{}: {}{}{}",
            BOLD,
            s.name,
            RESET,
            status_color(&s.status),
            s.status,
            RESET
        );
        if s.status == ServerStatus::Connected {
            println!(
                "    {} tools, {} resources, {} prompts",
                s.tools, s.resources, s.prompts
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum Listing {
    Tools,
    Resources,
    Prompts,
}

/// Aggregate one capability list across every connected server
pub async fn capabilities(registry: Option<PathBuf>, listing: Listing, json: bool) -> Result<()> {
    let manager = manager(registry)?;
    let failed = manager.initialize().await?;
    for name in &failed {
        eprintln!("{}warning:{} MCP server {} failed to connect", YELLOW, RESET, name);
    }

    let rows: Vec<(String, String, Option<String>)> = match listing {
        Listing::Tools => {
            let tools = manager.get_all_tools();
            if json {
                manager.shutdown().await;
                return print_json(&tools);
            }
            tools.into_iter().map(|t| (t.server, t.name, t.description)).collect()
        }
        Listing::Resources => {
            let resources = manager.get_all_resources();
            if json {
                manager.shutdown().await;
                return print_json(&resources);
            }
            resources.into_iter().map(|r| (r.server, r.uri, r.description)).collect()
        }
        Listing::Prompts => {
            let prompts = manager.get_all_prompts();
            if json {
                manager.shutdown().await;
                return print_json(&prompts);
            }
            prompts.into_iter().map(|p| (p.server, p.name, p.description)).collect()
        }
    };
    manager.shutdown().await;

    if rows.is_empty() {
        println!("  {}Nothing found{}", YELLOW, RESET);
    }
    for (server, name, description) in rows {
        match description {
            Some(desc) => println!("  {}{}{}:{} {}- {}{}", DIM, server, RESET, name, DIM, desc, RESET),
            None => println!("  {}{}{}:{}", DIM, server, RESET, name),
        }
    }
    Ok(())
}

/// One routed request to a single server
pub enum Invocation {
    Tool { name: String, arguments: Option<String> },
    Resource { uri: String },
    Prompt { name: String, arguments: Option<String> },
}

pub async fn invoke(registry: Option<PathBuf>, server: &str, invocation: Invocation) -> Result<()> {
    let manager = manager(registry)?;
    manager.load().await?;
    manager
        .connect_server(server)
        .await
        .with_context(|| format!("Failed to connect MCP server {}", server))?;

    let result = match invocation {
        Invocation::Tool { name, arguments } => {
            let arguments = parse_arguments(arguments.as_deref())?
                .unwrap_or_else(|| Value::Object(Default::default()));
            manager.call_tool(server, &name, arguments).await
        }
        Invocation::Resource { uri } => manager.get_resource(server, &uri).await,
        Invocation::Prompt { name, arguments } => {
            let arguments = parse_arguments(arguments.as_deref())?;
            manager.get_prompt(server, &name, arguments).await
        }
    };
    manager.shutdown().await;

    print_json(&result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("TOKEN=abc=def").unwrap(),
            ("TOKEN".to_string(), "abc=def".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), None);
        assert_eq!(
            parse_arguments(Some(r#"{"text":"hi"}"#)).unwrap(),
            Some(serde_json::json!({ "text": "hi" }))
        );
        assert!(parse_arguments(Some("{not json")).is_err());
    }

    fn add_options(transport: TransportKind) -> AddOptions {
        AddOptions {
            name: "fs".to_string(),
            transport,
            url: None,
            env: vec![("ROOT".to_string(), "/tmp".to_string())],
            cwd: None,
            disabled: false,
            command: Vec::new(),
        }
    }

    #[test]
    fn test_stdio_descriptor_from_options() {
        let mut options = add_options(TransportKind::Stdio);
        options.command = vec!["npx".into(), "-y".into(), "server-fs".into()];
        options.disabled = true;

        let descriptor = options.into_descriptor().unwrap();
        assert_eq!(descriptor.command.as_deref(), Some("npx"));
        assert_eq!(descriptor.args, vec!["-y", "server-fs"]);
        assert_eq!(descriptor.env.get("ROOT").map(String::as_str), Some("/tmp"));
        assert!(!descriptor.enabled);
    }

    #[test]
    fn test_descriptor_requires_command_or_url() {
        assert!(add_options(TransportKind::Stdio).into_descriptor().is_err());
        assert!(add_options(TransportKind::Http).into_descriptor().is_err());

        let mut options = add_options(TransportKind::Sse);
        options.url = Some("https://example.com/mcp".to_string());
        let descriptor = options.into_descriptor().unwrap();
        assert_eq!(descriptor.transport, TransportKind::Sse);
        assert!(descriptor.command.is_none());
    }
}
