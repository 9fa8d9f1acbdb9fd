//! MCP error types.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur with MCP operations.
#[derive(Error, Debug)]
pub enum McpError {
    /// The server process (or endpoint) could not be started.
    #[error("failed to launch MCP server '{server}': {reason}")]
    Launch { server: String, reason: String },

    /// The server answered with a JSON-RPC error object.
    #[error("MCP server '{server}' returned error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// No response arrived within the request timeout.
    #[error("request '{method}' to MCP server '{server}' timed out after {}s", .after.as_secs())]
    Timeout {
        server: String,
        method: String,
        after: Duration,
    },

    /// The session has not completed its handshake.
    #[error("MCP server '{0}' is not initialized")]
    NotInitialized(String),

    /// No live session exists for the server.
    #[error("MCP server '{0}' is not connected")]
    NotConnected(String),

    /// The session was torn down while the request was in flight.
    #[error("MCP server '{0}' disconnected")]
    Disconnected(String),

    /// A concurrent disconnect or reconnect superseded this connection attempt.
    #[error("connection to MCP server '{0}' was cancelled")]
    Cancelled(String),

    /// The tool is not in the server's advertised tool list.
    #[error("tool '{tool}' not found on MCP server '{server}'")]
    ToolNotFound { server: String, tool: String },

    /// The server is not present in the registry.
    #[error("MCP server '{0}' not found")]
    ServerNotFound(String),

    /// A server descriptor failed validation.
    #[error("invalid MCP server configuration: {0}")]
    InvalidConfig(String),

    /// The registry file could not be read or written.
    #[error("failed to {action} MCP registry at {}: {reason}", .path.display())]
    Persist {
        action: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// The byte channel to the server failed.
    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the request failed because the server never answered.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the request could not be routed to a live session.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(_) | Self::Disconnected(_) | Self::Cancelled(_)
        )
    }
}

pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::Timeout {
            server: "github".to_string(),
            method: "tools/call".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "request 'tools/call' to MCP server 'github' timed out after 30s"
        );
        assert!(err.is_timeout());

        let err = McpError::Rpc {
            server: "fs".to_string(),
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        };
        assert!(err.to_string().contains("Method not found"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_not_connected_predicate() {
        assert!(McpError::NotConnected("x".into()).is_not_connected());
        assert!(McpError::Disconnected("x".into()).is_not_connected());
        assert!(!McpError::ServerNotFound("x".into()).is_not_connected());
    }

    #[test]
    fn test_mcp_error_from_json() {
        let json_err = serde_json::from_str::<Value>("invalid json").unwrap_err();
        let err: McpError = json_err.into();
        assert!(matches!(err, McpError::Json(_)));
    }
}
