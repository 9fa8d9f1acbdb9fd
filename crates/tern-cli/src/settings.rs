//! Settings for config.toml

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tern_mcp::{ClientInfo, ClientOptions};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub mcp: McpSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// Registry file (defaults to `<config_dir>/tern/mcp.json`)
    pub registry: Option<PathBuf>,
    pub request_timeout_secs: u64,
    /// Name reported to servers in `initialize`
    pub client_name: Option<String>,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            registry: None,
            request_timeout_secs: 30,
            client_name: None,
        }
    }
}

impl Settings {
    /// Load `<config_dir>/tern/config.toml`, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tern").join("config.toml"))
    }

    /// Registry path: explicit override, then config.toml, then the default location.
    pub fn registry_path(&self, cli_override: Option<PathBuf>) -> Result<PathBuf> {
        cli_override
            .or_else(|| self.mcp.registry.clone())
            .or_else(tern_mcp::default_registry_path)
            .context("Could not determine a config directory for the MCP registry; pass --registry")
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions {
            request_timeout: Duration::from_secs(self.mcp.request_timeout_secs.max(1)),
            ..Default::default()
        };
        if let Some(name) = &self.mcp.client_name {
            options.client_info = ClientInfo {
                name: name.clone(),
                ..ClientInfo::default()
            };
        }
        options
    }
}
