//! MCP server configuration and registry persistence
//!
//! The registry is a JSON document keyed by server name:
//!
//! ```json
//! {
//!   "github": {
//!     "command": "npx",
//!     "args": ["-y", "@modelcontextprotocol/server-github"],
//!     "env": { "GITHUB_TOKEN": "${GITHUB_TOKEN}" }
//!   },
//!   "remote": { "transport": "http", "url": "https://example.com/mcp", "enabled": false }
//! }
//! ```

use crate::error::{McpError, McpResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Byte channel used to reach a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "sse" => Ok(Self::Sse),
            other => Err(McpError::InvalidConfig(format!(
                "unknown transport '{}' (expected stdio, http or sse)",
                other
            ))),
        }
    }
}

/// Static configuration for one MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique name for this server (the registry key)
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Command to run the server (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables (supports ${VAR} expansion)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Working directory for the server process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Endpoint (http/sse)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_enabled", skip_serializing_if = "is_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn is_enabled(enabled: &bool) -> bool {
    *enabled
}

impl ServerDescriptor {
    /// Create a stdio server descriptor with just name and command
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            enabled: true,
        }
    }

    /// Create a remote server descriptor
    pub fn remote(name: impl Into<String>, kind: TransportKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: kind,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: Some(url.into()),
            enabled: true,
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the descriptor can be stored in a registry.
    ///
    /// A stdio command may still be blank here; that surfaces as a launch
    /// error when the server is connected.
    pub fn validate(&self) -> McpResult<()> {
        if self.name.trim().is_empty() {
            return Err(McpError::InvalidConfig("server name must not be empty".into()));
        }

        match self.transport {
            TransportKind::Stdio => {
                if self.command.is_none() {
                    return Err(McpError::InvalidConfig(format!(
                        "stdio server '{}' needs a command",
                        self.name
                    )));
                }
            }
            TransportKind::Http | TransportKind::Sse => {
                let raw = self.url.as_deref().ok_or_else(|| {
                    McpError::InvalidConfig(format!(
                        "{} server '{}' needs a url",
                        self.transport, self.name
                    ))
                })?;
                url::Url::parse(raw).map_err(|e| {
                    McpError::InvalidConfig(format!(
                        "server '{}' has an invalid url '{}': {}",
                        self.name, raw, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Expand `${VAR}` references in command, args and env values.
    pub fn expanded(&self) -> McpResult<Self> {
        let expand = |s: &str| {
            expand_env_string(s).map_err(|var| McpError::Launch {
                server: self.name.clone(),
                reason: format!("environment variable {} not set", var),
            })
        };

        let mut out = self.clone();
        if let Some(command) = &self.command {
            out.command = Some(expand(command)?);
        }
        out.args = self.args.iter().map(|a| expand(a)).collect::<McpResult<_>>()?;
        for value in out.env.values_mut() {
            *value = expand(value)?;
        }
        Ok(out)
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env pattern"))
}

/// Expand ${VAR} patterns in a string using environment variables.
///
/// On failure returns the name of the first unset variable.
/// Substituted values are copied through as is, never expanded again.
pub fn expand_env_string(s: &str) -> Result<String, String> {
    let mut result = String::with_capacity(s.len());
    let mut last = 0;

    for cap in env_pattern().captures_iter(s) {
        let (Some(whole), Some(var)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_value = std::env::var(var.as_str()).map_err(|_| var.as_str().to_string())?;
        result.push_str(&s[last..whole.start()]);
        result.push_str(&var_value);
        last = whole.end();
    }
    result.push_str(&s[last..]);

    Ok(result)
}

/// Default registry location: `<config_dir>/tern/mcp.json`.
pub fn default_registry_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tern").join("mcp.json"))
}

/// File-backed server registry
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load descriptors; a missing file is an empty registry.
    pub fn load(&self) -> McpResult<BTreeMap<String, ServerDescriptor>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| self.persist_err("read", e))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut servers: BTreeMap<String, ServerDescriptor> =
            serde_json::from_str(&content).map_err(|e| self.persist_err("parse", e))?;
        for (name, descriptor) in servers.iter_mut() {
            descriptor.name = name.clone();
        }

        Ok(servers)
    }

    /// Write descriptors, replacing the file atomically.
    pub fn save(&self, servers: &BTreeMap<String, ServerDescriptor>) -> McpResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.persist_err("create", e))?;
            }
        }

        let json = serde_json::to_string_pretty(servers).map_err(|e| self.persist_err("encode", e))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.persist_err("write", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.persist_err("write", e))?;

        tracing::debug!(path = %self.path.display(), count = servers.len(), "Saved MCP registry");
        Ok(())
    }

    fn persist_err(&self, action: &'static str, e: impl fmt::Display) -> McpError {
        McpError::Persist {
            action,
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}
