//! MCP (Model Context Protocol) client support for tern
//!
//! This crate connects tern to external MCP servers: it launches them,
//! negotiates a session, discovers their tools, resources and prompts, and
//! routes calls to the right server by name.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     McpManager                          │
//! │  - Persists the server registry (mcp.json)              │
//! │  - Connects enabled servers, isolating failures         │
//! │  - Aggregates tools/resources/prompts, routes calls     │
//! └─────────────────┬───────────────────────────────────────┘
//!                   │            ServerEvent channel ◄───────┐
//!          ┌────────┴────────┐                               │
//!          ▼                 ▼                               │
//! ┌─────────────────┐ ┌─────────────────┐                    │
//! │  McpClient      │ │  McpClient      │ ───────────────────┘
//! │  (github)       │ │  (remote)       │
//! └────────┬────────┘ └────────┬────────┘
//!          │                   │
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  StdioTransport │ │  HttpTransport  │
//! └────────┬────────┘ └────────┬────────┘
//!          │                   │
//!          ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  MCP Server     │ │  MCP endpoint   │
//! │  (npx github)   │ │  (https://...)  │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tern_mcp::{McpManager, RegistryStore, ServerDescriptor};
//!
//! let manager = McpManager::new(RegistryStore::new("mcp.json"));
//! let failed = manager.initialize().await?;
//!
//! manager
//!     .add_server(
//!         ServerDescriptor::stdio("github", "npx")
//!             .with_args(["-y", "@modelcontextprotocol/server-github"])
//!             .with_env("GITHUB_TOKEN", "${GITHUB_TOKEN}"),
//!     )
//!     .await?;
//!
//! for tool in manager.get_all_tools() {
//!     println!("{}:{}", tool.server, tool.name);
//! }
//! let result = manager.call_tool("github", "search_repositories", json!({ "query": "tern" })).await?;
//!
//! manager.shutdown().await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports
pub use client::{CapabilitySnapshot, ClientOptions, McpClient, SessionState};
pub use config::{default_registry_path, RegistryStore, ServerDescriptor, TransportKind};
pub use error::{McpError, McpResult};
pub use events::{ServerEvent, SessionEvent};
pub use manager::{McpManager, ServerStatus, ServerSummary};
pub use protocol::{ClientInfo, Prompt, PromptArgument, Resource, Tool};
pub use transport::{HttpTransport, StdioTransport, Transport};
