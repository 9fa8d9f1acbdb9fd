//! Multi-server registry and session pool
//!
//! The manager owns the persisted set of [`ServerDescriptor`]s and at most
//! one live [`McpClient`] per server name. Every client is created with the
//! manager's event sender, so a single [`events`](McpManager::events)
//! receiver sees what happens to every server.
//!
//! A name has a client only while its descriptor is present and enabled.
//! Both maps are changed together under the registry lock; the displaced
//! client is disconnected right after.

use crate::client::{ClientOptions, McpClient, SessionState};
use crate::config::{RegistryStore, ServerDescriptor, TransportKind};
use crate::error::{McpError, McpResult};
use crate::events::{self, EventReceiver, EventSender};
use crate::protocol::{Prompt, Resource, Tool};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status of a configured server as reported to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ServerStatus {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl From<SessionState> for ServerStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Disconnected => ServerStatus::Disconnected,
            SessionState::Connecting | SessionState::Initializing => ServerStatus::Connecting,
            SessionState::Ready => ServerStatus::Connected,
            SessionState::Failed(reason) => ServerStatus::Error(reason),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Disabled => write!(f, "disabled"),
            ServerStatus::Disconnected => write!(f, "disconnected"),
            ServerStatus::Connecting => write!(f, "connecting"),
            ServerStatus::Connected => write!(f, "connected"),
            ServerStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Summary of a server's status
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub transport: TransportKind,
    pub status: ServerStatus,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Manager for MCP servers
pub struct McpManager {
    store: RegistryStore,
    options: ClientOptions,
    registry: RwLock<BTreeMap<String, ServerDescriptor>>,
    clients: RwLock<BTreeMap<String, Arc<McpClient>>>,
    /// Serializes registry writes so the file never goes back in time.
    persist: Mutex<()>,
    events_tx: EventSender,
    events_rx: EventReceiver,
}

impl McpManager {
    /// Create a manager over the registry file held by `store`.
    pub fn new(store: RegistryStore) -> Self {
        Self::with_options(store, ClientOptions::default())
    }

    /// Create a manager whose clients use `options`.
    pub fn with_options(store: RegistryStore, options: ClientOptions) -> Self {
        let (events_tx, events_rx) = events::channel();
        Self {
            store,
            options,
            registry: RwLock::new(BTreeMap::new()),
            clients: RwLock::new(BTreeMap::new()),
            persist: Mutex::new(()),
            events_tx,
            events_rx,
        }
    }

    /// Registry file backing this manager
    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Receiver for lifecycle events of every server.
    pub fn events(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    /// Load the persisted registry without connecting anything.
    ///
    /// Clients whose server disappeared or got disabled are disconnected.
    pub async fn load(&self) -> McpResult<()> {
        let servers = self.store.load()?;
        info!(path = %self.store.path().display(), count = servers.len(), "Loaded MCP registry");

        let stale: Vec<Arc<McpClient>> = {
            let mut registry = self.registry.write();
            let mut clients = self.clients.write();
            *registry = servers;
            let names: Vec<String> = clients
                .keys()
                .filter(|name| !registry.get(*name).is_some_and(|d| d.enabled))
                .cloned()
                .collect();
            names.iter().filter_map(|name| clients.remove(name)).collect()
        };

        join_all(stale.iter().map(|client| client.disconnect())).await;
        Ok(())
    }

    /// Load the registry and connect every enabled server concurrently.
    ///
    /// Returns the names of servers that failed to connect; those failures
    /// are logged and never stop the others.
    pub async fn initialize(&self) -> McpResult<Vec<String>> {
        self.load().await?;

        let names: Vec<String> = self
            .registry
            .read()
            .values()
            .filter(|d| d.enabled)
            .map(|d| d.name.clone())
            .collect();

        let results = join_all(names.iter().map(|name| self.connect_server(name))).await;

        let mut failed = Vec::new();
        for (name, result) in names.into_iter().zip(results) {
            if let Err(e) = result {
                warn!(server = %name, error = %e, "Failed to connect MCP server");
                failed.push(name);
            }
        }

        info!(
            connected = self.connected_count(),
            failed = failed.len(),
            "MCP servers initialized"
        );
        Ok(failed)
    }

    /// Insert or replace a server, persist, and connect it if enabled.
    ///
    /// The descriptor stays registered even if connecting fails.
    pub async fn add_server(&self, descriptor: ServerDescriptor) -> McpResult<()> {
        descriptor.validate()?;
        let name = descriptor.name.clone();
        let enabled = descriptor.enabled;

        let displaced = {
            let mut registry = self.registry.write();
            let displaced = self.clients.write().remove(&name);
            registry.insert(name.clone(), descriptor);
            displaced
        };
        if let Some(client) = displaced {
            client.disconnect().await;
        }

        self.save()?;
        info!(server = %name, "Added MCP server");

        if enabled {
            self.connect_server(&name).await?;
        }
        Ok(())
    }

    /// Disconnect and forget a server.
    pub async fn remove_server(&self, name: &str) -> McpResult<()> {
        let client = {
            let mut registry = self.registry.write();
            if registry.remove(name).is_none() {
                return Err(McpError::ServerNotFound(name.to_string()));
            }
            self.clients.write().remove(name)
        };

        if let Some(client) = client {
            client.disconnect().await;
        }

        self.save()?;
        info!(server = %name, "Removed MCP server");
        Ok(())
    }

    /// Enable a server, persist the change and connect it.
    pub async fn enable_server(&self, name: &str) -> McpResult<()> {
        {
            let mut registry = self.registry.write();
            let descriptor = registry
                .get_mut(name)
                .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
            descriptor.enabled = true;
        }
        self.save()?;
        info!(server = %name, "Enabled MCP server");

        self.connect_server(name).await
    }

    /// Disable a server, persist the change and disconnect it.
    pub async fn disable_server(&self, name: &str) -> McpResult<()> {
        let client = {
            let mut registry = self.registry.write();
            let descriptor = registry
                .get_mut(name)
                .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
            let client = self.clients.write().remove(name);
            descriptor.enabled = false;
            client
        };

        if let Some(client) = client {
            client.disconnect().await;
        }

        self.save()?;
        info!(server = %name, "Disabled MCP server");
        Ok(())
    }

    /// (Re)connect one server, replacing any client it already has.
    pub async fn connect_server(&self, name: &str) -> McpResult<()> {
        let (client, previous) = {
            let registry = self.registry.read();
            let descriptor = registry
                .get(name)
                .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
            if !descriptor.enabled {
                return Err(McpError::InvalidConfig(format!(
                    "MCP server '{}' is disabled",
                    name
                )));
            }

            let client = Arc::new(McpClient::new(
                descriptor.clone(),
                self.options.clone(),
                self.events_tx.clone(),
            ));
            let previous = self
                .clients
                .write()
                .insert(name.to_string(), Arc::clone(&client));
            (client, previous)
        };

        if let Some(previous) = previous {
            debug!(server = %name, "Replacing existing MCP client");
            previous.disconnect().await;
        }

        let result = client.connect().await;

        // removed, disabled or replaced while connecting
        let current = self
            .clients
            .read()
            .get(name)
            .is_some_and(|c| Arc::ptr_eq(c, &client));
        if !current {
            client.disconnect().await;
            return Err(McpError::Cancelled(name.to_string()));
        }
        result
    }

    fn save(&self) -> McpResult<()> {
        let _guard = self.persist.lock();
        let snapshot = self.registry.read().clone();
        self.store.save(&snapshot)
    }

    fn live_client(&self, server: &str) -> McpResult<Arc<McpClient>> {
        self.clients
            .read()
            .get(server)
            .filter(|c| c.is_ready())
            .cloned()
            .ok_or_else(|| McpError::NotConnected(server.to_string()))
    }

    fn clients(&self) -> Vec<Arc<McpClient>> {
        self.clients.read().values().cloned().collect()
    }

    /// Tools of every connected server; same-named tools stay distinct by `server`.
    pub fn get_all_tools(&self) -> Vec<Tool> {
        self.clients().iter().flat_map(|c| c.list_tools()).collect()
    }

    /// Resources of every connected server
    pub fn get_all_resources(&self) -> Vec<Resource> {
        self.clients().iter().flat_map(|c| c.list_resources()).collect()
    }

    /// Prompts of every connected server
    pub fn get_all_prompts(&self) -> Vec<Prompt> {
        self.clients().iter().flat_map(|c| c.list_prompts()).collect()
    }

    /// Call `tool` on `server`.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> McpResult<Value> {
        self.live_client(server)?.call_tool(tool, arguments).await
    }

    /// Read `uri` from `server`.
    pub async fn get_resource(&self, server: &str, uri: &str) -> McpResult<Value> {
        self.live_client(server)?.read_resource(uri).await
    }

    /// Fetch prompt `name` from `server`.
    pub async fn get_prompt(
        &self,
        server: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> McpResult<Value> {
        self.live_client(server)?.get_prompt(name, arguments).await
    }

    fn status_of(&self, descriptor: &ServerDescriptor) -> ServerStatus {
        if !descriptor.enabled {
            return ServerStatus::Disabled;
        }
        self.clients
            .read()
            .get(&descriptor.name)
            .map(|c| ServerStatus::from(c.state()))
            .unwrap_or(ServerStatus::Disconnected)
    }

    /// Status of every configured server.
    pub fn get_server_status(&self) -> BTreeMap<String, ServerStatus> {
        self.registry
            .read()
            .values()
            .map(|d| (d.name.clone(), self.status_of(d)))
            .collect()
    }

    /// One line of status per configured server, for display.
    pub fn summary(&self) -> Vec<ServerSummary> {
        self.registry
            .read()
            .values()
            .map(|descriptor| {
                let client = self.clients.read().get(&descriptor.name).cloned();
                ServerSummary {
                    name: descriptor.name.clone(),
                    transport: descriptor.transport,
                    status: self.status_of(descriptor),
                    tools: client.as_ref().map_or(0, |c| c.list_tools().len()),
                    resources: client.as_ref().map_or(0, |c| c.list_resources().len()),
                    prompts: client.as_ref().map_or(0, |c| c.list_prompts().len()),
                    connected_at: client.as_ref().and_then(|c| c.connected_at()),
                }
            })
            .collect()
    }

    /// Configured descriptors, ordered by name.
    pub fn servers(&self) -> Vec<ServerDescriptor> {
        self.registry.read().values().cloned().collect()
    }

    /// Names of servers with a session in `Ready`.
    pub fn connected_servers(&self) -> Vec<String> {
        self.clients
            .read()
            .iter()
            .filter(|(_, c)| c.is_ready())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Get connected server count
    pub fn connected_count(&self) -> usize {
        self.clients.read().values().filter(|c| c.is_ready()).count()
    }

    /// Disconnect every server concurrently.
    pub async fn shutdown(&self) {
        let clients = std::mem::take(&mut *self.clients.write());
        if clients.is_empty() {
            return;
        }
        info!(count = clients.len(), "Shutting down MCP servers");
        join_all(clients.values().map(|c| c.disconnect())).await;
    }
}

impl Drop for McpManager {
    fn drop(&mut self) {
        // no async cleanup here; child processes are killed on drop
        let live = self.clients.get_mut().len();
        if live > 0 {
            debug!("McpManager dropping with {} clients", live);
        }
    }
}
