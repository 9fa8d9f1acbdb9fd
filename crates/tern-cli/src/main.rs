//! tern: terminal coding-assistant harness
//!
//! This binary manages the MCP servers tern connects to.

mod commands;
mod settings;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tern_mcp::TransportKind;
use tracing_subscriber::EnvFilter;

use commands::{AddOptions, Invocation, Listing};

#[derive(Debug, Parser)]
#[command(name = "tern")]
#[command(about = "Terminal coding-assistant harness", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// MCP registry file (overrides config.toml)
    #[arg(long, global = true, env = "TERN_MCP_REGISTRY")]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage MCP servers
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum McpAction {
    /// Register a server (and connect it unless --disabled)
    Add {
        /// Unique server name
        name: String,

        /// Transport: stdio, http or sse
        #[arg(short, long, default_value = "stdio")]
        transport: TransportKind,

        /// Endpoint for http/sse servers
        #[arg(long)]
        url: Option<String>,

        /// Environment variable for the server process (KEY=VALUE, repeatable)
        #[arg(short, long, value_parser = commands::parse_key_val)]
        env: Vec<(String, String)>,

        /// Working directory for the server process
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Register without enabling
        #[arg(long)]
        disabled: bool,

        /// Command and arguments (after --)
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Remove a server
    Remove {
        name: String,
    },
    /// Enable a server and connect it
    Enable {
        name: String,
    },
    /// Disable a server
    Disable {
        name: String,
    },
    /// List configured servers
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect enabled servers and show their status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List tools of every connected server
    Tools {
        #[arg(long)]
        json: bool,
    },
    /// List resources of every connected server
    Resources {
        #[arg(long)]
        json: bool,
    },
    /// List prompts of every connected server
    Prompts {
        #[arg(long)]
        json: bool,
    },
    /// Call a tool
    Call {
        server: String,
        tool: String,
        /// Tool arguments as a JSON object
        arguments: Option<String>,
    },
    /// Read a resource
    Read {
        server: String,
        uri: String,
    },
    /// Fetch a prompt
    Prompt {
        server: String,
        name: String,
        /// Prompt arguments as a JSON object
        arguments: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout stays clean for --json
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let registry = cli.registry;
    match cli.command {
        Commands::Mcp { action } => match action {
            McpAction::Add {
                name,
                transport,
                url,
                env,
                cwd,
                disabled,
                command,
            } => {
                let options = AddOptions {
                    name,
                    transport,
                    url,
                    env,
                    cwd,
                    disabled,
                    command,
                };
                commands::add(registry, options).await
            }
            McpAction::Remove { name } => commands::remove(registry, &name).await,
            McpAction::Enable { name } => commands::set_enabled(registry, &name, true).await,
            McpAction::Disable { name } => commands::set_enabled(registry, &name, false).await,
            McpAction::List { json } => commands::list(registry, json).await,
            McpAction::Status { json } => commands::status(registry, json).await,
            McpAction::Tools { json } => commands::capabilities(registry, Listing::Tools, json).await,
            McpAction::Resources { json } => {
                commands::capabilities(registry, Listing::Resources, json).await
            }
            McpAction::Prompts { json } => {
                commands::capabilities(registry, Listing::Prompts, json).await
            }
            McpAction::Call {
                server,
                tool,
                arguments,
            } => {
                let invocation = Invocation::Tool {
                    name: tool,
                    arguments,
                };
                commands::invoke(registry, &server, invocation).await
            }
            McpAction::Read { server, uri } => {
                commands::invoke(registry, &server, Invocation::Resource { uri }).await
            }
            McpAction::Prompt {
                server,
                name,
                arguments,
            } => {
                let invocation = Invocation::Prompt { name, arguments };
                commands::invoke(registry, &server, invocation).await
            }
        },
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "tern", &mut std::io::stdout());
            Ok(())
        }
    }
}
