//! MCP client implementation
//!
//! An [`McpClient`] owns exactly one session with one server and walks it
//! through `Disconnected -> Connecting -> Initializing -> Ready`, ending in
//! `Disconnected` or `Failed`.
//!
//! Requests are correlated by id. Each outbound request parks a oneshot
//! sender in the pending map before it is written; whoever removes the entry
//! (the response, the timeout, or a teardown sweep) is the only party that
//! settles it.

use crate::config::ServerDescriptor;
use crate::error::{McpError, McpResult};
use crate::events::{self, EventSender, SessionEvent};
use crate::protocol::{
    error_codes, initialize_params, parse_list_page, response_message, ClientInfo,
    IncomingMessage, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, Listed,
    Prompt, Resource, ServerCapabilities, ServerInfo, ServerNotification, Tool,
    MCP_PROTOCOL_VERSION,
};
use crate::transport::{self, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timeout applied to every correlated request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a server gets to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on the pages fetched for one capability list.
pub const MAX_LIST_PAGES: usize = 100;

/// Client tunables
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub client_info: ClientInfo,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            client_info: ClientInfo::default(),
        }
    }
}

/// State of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    Failed(String),
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Initializing | SessionState::Ready
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Ready => write!(f, "connected"),
            SessionState::Failed(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Capability lists last reported by the server.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySnapshot {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub prompts: Vec<Prompt>,
}

#[derive(Debug, Clone, Copy)]
enum Capability {
    Tools,
    Resources,
    Prompts,
}

impl Capability {
    fn index(self) -> usize {
        match self {
            Capability::Tools => 0,
            Capability::Resources => 1,
            Capability::Prompts => 2,
        }
    }
}

type Settlement = McpResult<Value>;

/// Runtime state shared between the client handle and its message pump.
struct Session {
    server: String,
    options: ClientOptions,
    state: RwLock<SessionState>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Settlement>>>,
    /// Bumped on every teardown; only changed while `transport` is write-locked.
    generation: AtomicU64,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    snapshot: RwLock<CapabilitySnapshot>,
    init: RwLock<Option<InitializeResult>>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    /// Last refresh ticket handed out, per capability.
    refresh_issued: [AtomicU64; 3],
    /// Ticket of the refresh whose list is currently in the snapshot.
    refresh_applied: Mutex<[u64; 3]>,
    events: EventSender,
}

/// What a teardown took away from the session.
struct Teardown {
    transport: Option<Arc<dyn Transport>>,
    previous: SessionState,
}

/// Removes an abandoned pending entry when the waiting future goes away.
struct PendingGuard<'a> {
    session: &'a Session,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.session.pending.lock().remove(&self.id);
    }
}

impl Session {
    fn emit(&self, event: SessionEvent) {
        events::emit(&self.events, &self.server, event);
    }

    fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a connection attempt, returning the generation it owns.
    fn begin_connect(&self) -> u64 {
        let _slot = self.transport.write();
        *self.state.write() = SessionState::Connecting;
        self.generation()
    }

    /// Install the transport unless the attempt has been superseded.
    fn install_transport(&self, generation: u64, transport: Arc<dyn Transport>) -> bool {
        let mut slot = self.transport.write();
        if self.generation() != generation {
            return false;
        }
        *slot = Some(transport);
        true
    }

    /// Publish the discovered lists and enter `Ready`, if still current.
    fn mark_ready(&self, generation: u64, snapshot: CapabilitySnapshot) -> bool {
        let _slot = self.transport.read();
        if self.generation() != generation {
            return false;
        }
        *self.snapshot.write() = snapshot;
        *self.connected_at.write() = Some(Utc::now());
        *self.state.write() = SessionState::Ready;
        true
    }

    /// The single teardown path: detach the transport, reject every pending
    /// request, clear the snapshot and set the final state.
    ///
    /// With `expected` set, only tears down if that generation is current.
    fn teardown(
        &self,
        expected: Option<u64>,
        state: SessionState,
        reject_with: impl Fn() -> McpError,
    ) -> Option<Teardown> {
        let transport = {
            let mut slot = self.transport.write();
            let current = self.generation();
            if expected.is_some_and(|g| g != current) {
                return None;
            }
            self.generation.store(current + 1, Ordering::SeqCst);
            slot.take()
        };

        let previous = std::mem::replace(&mut *self.state.write(), state);

        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(server = %self.server, count = drained.len(), "Rejecting pending MCP requests");
        }
        for (_, waiter) in drained {
            let _ = waiter.send(Err(reject_with()));
        }

        *self.snapshot.write() = CapabilitySnapshot::default();
        *self.connected_at.write() = None;

        Some(Teardown {
            transport,
            previous,
        })
    }

    /// Send a request and wait for its correlated response.
    async fn request(&self, method: &str, params: Option<Value>) -> Settlement {
        let transport = self
            .current_transport()
            .ok_or_else(|| McpError::NotConnected(self.server.clone()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard { session: self, id };

        let message = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        debug!(server = %self.server, id, method, "Sending MCP request");

        // one deadline covers the write and the wait for the response
        let deadline = tokio::time::Instant::now() + self.options.request_timeout;
        match tokio::time::timeout_at(deadline, transport.send(&message)).await {
            Ok(sent) => sent?,
            Err(_) => return self.expire(id, method, rx),
        }

        let waited = tokio::time::timeout_at(deadline, &mut rx).await;
        match waited {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(McpError::Disconnected(self.server.clone())),
            Err(_) => self.expire(id, method, rx),
        }
    }

    /// The deadline passed: claim the pending entry, or take the value that
    /// beat the timer to it.
    fn expire(&self, id: u64, method: &str, mut rx: oneshot::Receiver<Settlement>) -> Settlement {
        let claimed = self.pending.lock().remove(&id).is_some();
        if claimed {
            warn!(server = %self.server, id, method, "MCP request timed out");
            Err(McpError::Timeout {
                server: self.server.clone(),
                method: method.to_string(),
                after: self.options.request_timeout,
            })
        } else {
            rx.try_recv()
                .unwrap_or_else(|_| Err(McpError::Disconnected(self.server.clone())))
        }
    }

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let transport = self
            .current_transport()
            .ok_or_else(|| McpError::NotConnected(self.server.clone()))?;
        let notification = JsonRpcNotification::new(method, params);
        transport.send(&serde_json::to_value(&notification)?).await
    }

    /// Resolve or reject the pending entry for `id`, if there still is one.
    fn settle(&self, id: u64, outcome: Result<Value, JsonRpcError>) {
        let settlement = outcome.map_err(|e| McpError::Rpc {
            server: self.server.clone(),
            code: e.code,
            message: e.message,
            data: e.data,
        });

        // send while holding the lock so a racing timeout sees the value
        let mut pending = self.pending.lock();
        match pending.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(settlement);
            }
            None => debug!(server = %self.server, id, "Ignoring response with no pending request"),
        }
    }

    /// Fetch every page of one capability list.
    ///
    /// Stops early, keeping what was collected, when the server repeats a
    /// cursor or the list runs past [`MAX_LIST_PAGES`].
    async fn discover<T: Listed>(&self) -> McpResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        for page_number in 1..=MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request(T::METHOD, params).await?;
            let (page, next_cursor) = parse_list_page::<T>(result)?;
            items.extend(page);

            let Some(next) = next_cursor else {
                break;
            };
            if !seen.insert(next.clone()) {
                warn!(server = %self.server, method = T::METHOD, cursor = %next, "MCP server repeated a list cursor");
                break;
            }
            if page_number == MAX_LIST_PAGES {
                warn!(server = %self.server, method = T::METHOD, "MCP list exceeded {} pages", MAX_LIST_PAGES);
            }
            cursor = Some(next);
        }

        for item in items.iter_mut() {
            item.set_server(&self.server);
        }
        Ok(items)
    }

    async fn handle_message(self: &Arc<Self>, generation: u64, value: Value) {
        let Some(message) = IncomingMessage::classify(value) else {
            debug!(server = %self.server, "Ignoring non JSON-RPC message");
            return;
        };

        match message {
            IncomingMessage::Response { id, outcome } => self.settle(id, outcome),
            IncomingMessage::Notification(notification) => {
                self.handle_notification(generation, notification)
            }
            IncomingMessage::Request { id, method, .. } => {
                let outcome = match method.as_str() {
                    "ping" => Ok(json!({})),
                    _ => Err(JsonRpcError {
                        code: error_codes::METHOD_NOT_FOUND,
                        message: format!("method '{}' is not supported", method),
                        data: None,
                    }),
                };
                if let Some(transport) = self.current_transport() {
                    if let Err(e) = transport.send(&response_message(id, outcome)).await {
                        warn!(server = %self.server, error = %e, "Failed to answer server request");
                    }
                }
            }
        }
    }

    fn handle_notification(self: &Arc<Self>, generation: u64, notification: ServerNotification) {
        let capability = match notification {
            ServerNotification::ToolsListChanged => Capability::Tools,
            ServerNotification::ResourcesListChanged => Capability::Resources,
            ServerNotification::PromptsListChanged => Capability::Prompts,
            ServerNotification::Log { level, data } => {
                let data = match data {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                match level.as_str() {
                    "debug" => debug!(server = %self.server, "{}", data),
                    "info" | "notice" => info!(server = %self.server, "{}", data),
                    "warning" => warn!(server = %self.server, "{}", data),
                    _ => error!(server = %self.server, level = %level, "{}", data),
                }
                return;
            }
            ServerNotification::Unknown(method) => {
                debug!(server = %self.server, method = %method, "Ignoring unhandled notification");
                return;
            }
        };

        let ticket = self.refresh_issued[capability.index()].fetch_add(1, Ordering::SeqCst) + 1;
        // the pump must keep reading while the refresh waits for its response
        tokio::spawn(Arc::clone(self).refresh(generation, capability, ticket));
    }

    /// Re-discover one list after a `list_changed` notification.
    async fn refresh(self: Arc<Self>, generation: u64, capability: Capability, ticket: u64) {
        info!(server = %self.server, ?capability, "Refreshing MCP capability list");

        let event = match capability {
            Capability::Tools => self.discover::<Tool>().await.map(|list| {
                self.replace_list(generation, capability, ticket, |s| s.tools = list.clone())
                    .then(|| SessionEvent::ToolsUpdated(list))
            }),
            Capability::Resources => self.discover::<Resource>().await.map(|list| {
                self.replace_list(generation, capability, ticket, |s| s.resources = list.clone())
                    .then(|| SessionEvent::ResourcesUpdated(list))
            }),
            Capability::Prompts => self.discover::<Prompt>().await.map(|list| {
                self.replace_list(generation, capability, ticket, |s| s.prompts = list.clone())
                    .then(|| SessionEvent::PromptsUpdated(list))
            }),
        };

        match event {
            Ok(Some(event)) => self.emit(event),
            Ok(None) => debug!(server = %self.server, ?capability, "Discarding stale MCP list refresh"),
            Err(e) => warn!(server = %self.server, ?capability, error = %e, "Failed to refresh MCP capability list"),
        }
    }

    /// Swap in a refreshed list unless the session moved on or a newer
    /// refresh of the same list already landed.
    fn replace_list(
        &self,
        generation: u64,
        capability: Capability,
        ticket: u64,
        apply: impl FnOnce(&mut CapabilitySnapshot),
    ) -> bool {
        let _slot = self.transport.read();
        if self.generation() != generation || !self.state.read().is_ready() {
            return false;
        }

        let mut applied = self.refresh_applied.lock();
        let last = &mut applied[capability.index()];
        if ticket <= *last {
            return false;
        }
        *last = ticket;
        apply(&mut *self.snapshot.write());
        true
    }

    async fn on_exit(&self, generation: u64, code: Option<i32>) {
        let (state, event) = match code {
            Some(0) => (SessionState::Disconnected, SessionEvent::Disconnected),
            Some(code) => {
                let reason = format!("server exited with code {}", code);
                (SessionState::Failed(reason.clone()), SessionEvent::Error(reason))
            }
            None => {
                let reason = "server terminated by signal".to_string();
                (SessionState::Failed(reason.clone()), SessionEvent::Error(reason))
            }
        };
        self.close_with(generation, state, event).await;
    }

    async fn on_transport_error(&self, generation: u64, reason: String) {
        let reason = format!("transport error: {}", reason);
        let state = SessionState::Failed(reason.clone());
        self.close_with(generation, state, SessionEvent::Error(reason)).await;
    }

    /// Tear the session down from the server side and tell the owner.
    async fn close_with(&self, generation: u64, state: SessionState, event: SessionEvent) {
        let server = self.server.clone();
        let cause = format!("{}", state);
        let Some(teardown) = self.teardown(Some(generation), state, || {
            McpError::Transport(format!("MCP server '{}' went away ({})", server, cause))
        }) else {
            return;
        };

        if let Some(transport) = teardown.transport {
            transport.close().await;
        }
        match &event {
            SessionEvent::Error(reason) => error!(server = %self.server, "MCP session failed: {}", reason),
            _ => info!(server = %self.server, "MCP server disconnected"),
        }
        self.emit(event);
    }
}

/// Drain transport events into the session until the session moves on.
async fn pump(session: Arc<Session>, generation: u64, inbound: transport::EventReceiver) {
    while let Ok(event) = inbound.recv().await {
        if session.generation() != generation {
            break;
        }
        match event {
            TransportEvent::Message(value) => session.handle_message(generation, value).await,
            TransportEvent::Exited { code } => {
                session.on_exit(generation, code).await;
                break;
            }
            TransportEvent::Error(reason) => {
                warn!(server = %session.server, "MCP transport error: {}", reason);
                session.on_transport_error(generation, reason).await;
                break;
            }
        }
    }
}

/// MCP Client
pub struct McpClient {
    descriptor: ServerDescriptor,
    session: Arc<Session>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Create a client; lifecycle events are published on `events`.
    pub fn new(descriptor: ServerDescriptor, options: ClientOptions, events: EventSender) -> Self {
        let session = Session {
            server: descriptor.name.clone(),
            options,
            state: RwLock::new(SessionState::Disconnected),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            transport: RwLock::new(None),
            snapshot: RwLock::new(CapabilitySnapshot::default()),
            init: RwLock::new(None),
            connected_at: RwLock::new(None),
            refresh_issued: Default::default(),
            refresh_applied: Mutex::new([0; 3]),
            events,
        };

        Self {
            descriptor,
            session: Arc::new(session),
            pump: Mutex::new(None),
        }
    }

    /// Name of the server this client talks to
    pub fn server_name(&self) -> &str {
        &self.session.server
    }

    /// Descriptor the client was created from (unexpanded)
    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Check if the session finished its handshake
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// When the current session reached `Ready`.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.session.connected_at.read()
    }

    /// Server info from the last successful `initialize`
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.session.init.read().as_ref().map(|i| i.server_info.clone())
    }

    /// Capabilities the server declared in `initialize`
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.session.init.read().as_ref().map(|i| i.capabilities.clone())
    }

    /// Spawn the server described by the descriptor and run the handshake.
    ///
    /// Any previous session of this client is torn down first.
    pub async fn connect(&self) -> McpResult<()> {
        let descriptor = self.descriptor.clone();
        let grace = self.session.options.shutdown_grace;
        self.run_connect(async move {
            let descriptor = descriptor.expanded()?;
            transport::open(&descriptor, grace).await
        })
        .await
    }

    /// Run the handshake over an already opened transport.
    pub async fn connect_with_transport(
        &self,
        transport: Arc<dyn Transport>,
        inbound: transport::EventReceiver,
    ) -> McpResult<()> {
        self.run_connect(async move { Ok((transport, inbound)) })
            .await
    }

    async fn run_connect<F>(&self, open: F) -> McpResult<()>
    where
        F: Future<Output = McpResult<(Arc<dyn Transport>, transport::EventReceiver)>>,
    {
        self.disconnect().await;

        let generation = self.session.begin_connect();
        info!(server = %self.server_name(), transport = %self.descriptor.transport, "Connecting to MCP server");

        let result = async {
            let (transport, inbound) = open.await?;
            self.attach(generation, transport, inbound).await?;
            self.handshake(generation).await
        }
        .await;

        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let reason = err.to_string();
        let torn_down =
            self.session
                .teardown(Some(generation), SessionState::Failed(reason.clone()), || {
                    McpError::Disconnected(self.server_name().to_string())
                });

        match torn_down {
            Some(teardown) => {
                self.abort_pump();
                if let Some(transport) = teardown.transport {
                    transport.close().await;
                }
                error!(server = %self.server_name(), "Failed to connect MCP server: {}", reason);
                self.session.emit(SessionEvent::Error(reason));
                Err(err)
            }
            // someone else already tore this attempt down
            None => match err {
                McpError::Disconnected(server) => Err(McpError::Cancelled(server)),
                other => Err(other),
            },
        }
    }

    async fn attach(
        &self,
        generation: u64,
        transport: Arc<dyn Transport>,
        inbound: transport::EventReceiver,
    ) -> McpResult<()> {
        if !self.session.install_transport(generation, Arc::clone(&transport)) {
            transport.close().await;
            return Err(McpError::Cancelled(self.server_name().to_string()));
        }

        let handle = tokio::spawn(pump(Arc::clone(&self.session), generation, inbound));
        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn handshake(&self, generation: u64) -> McpResult<()> {
        let session = &self.session;
        *session.state.write() = SessionState::Initializing;

        let result = session
            .request("initialize", Some(initialize_params(&session.options.client_info)))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        if init.protocol_version != MCP_PROTOCOL_VERSION {
            warn!(
                server = %session.server,
                "MCP server uses protocol version '{}' (we speak '{}')",
                init.protocol_version,
                MCP_PROTOCOL_VERSION
            );
        }
        info!(
            server = %session.server,
            "MCP server initialized: {} v{}",
            init.server_info.name,
            init.server_info.version.as_deref().unwrap_or("unknown")
        );
        *session.init.write() = Some(init);

        session.notify("notifications/initialized", None).await?;

        let (tools, resources, prompts) = futures::join!(
            session.discover::<Tool>(),
            session.discover::<Resource>(),
            session.discover::<Prompt>(),
        );
        let snapshot = CapabilitySnapshot {
            tools: self.discovered("tools", tools),
            resources: self.discovered("resources", resources),
            prompts: self.discovered("prompts", prompts),
        };

        let updates = [
            SessionEvent::ToolsUpdated(snapshot.tools.clone()),
            SessionEvent::ResourcesUpdated(snapshot.resources.clone()),
            SessionEvent::PromptsUpdated(snapshot.prompts.clone()),
        ];

        if !session.mark_ready(generation, snapshot) {
            return Err(McpError::Disconnected(session.server.clone()));
        }

        info!(server = %session.server, "MCP server connected");
        session.emit(SessionEvent::Connected);
        for update in updates {
            session.emit(update);
        }
        Ok(())
    }

    fn discovered<T>(&self, what: &str, result: McpResult<Vec<T>>) -> Vec<T> {
        match result {
            Ok(items) => {
                debug!(server = %self.server_name(), count = items.len(), "Discovered MCP {}", what);
                items
            }
            Err(e) => {
                warn!(server = %self.server_name(), error = %e, "Failed to list MCP {}", what);
                Vec::new()
            }
        }
    }

    fn abort_pump(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    /// Tear the session down: terminate the server, reject every pending
    /// request and return to `Disconnected`. Safe to call at any time.
    pub async fn disconnect(&self) {
        let server = self.server_name().to_string();
        let Some(teardown) = self
            .session
            .teardown(None, SessionState::Disconnected, || McpError::Disconnected(server.clone()))
        else {
            return;
        };

        self.abort_pump();
        if let Some(transport) = teardown.transport {
            transport.close().await;
        }

        if teardown.previous.is_live() {
            info!(server = %self.server_name(), "Disconnected MCP server");
            self.session.emit(SessionEvent::Disconnected);
        }
    }

    fn ensure_ready(&self) -> McpResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(McpError::NotInitialized(self.server_name().to_string()))
        }
    }

    /// Call a tool advertised by this server and return the raw result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        self.ensure_ready()?;

        let known = self.session.snapshot.read().tools.iter().any(|t| t.name == name);
        if !known {
            return Err(McpError::ToolNotFound {
                server: self.server_name().to_string(),
                tool: name.to_string(),
            });
        }

        self.session
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    /// Read a resource by URI
    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.ensure_ready()?;
        self.session
            .request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    /// Fetch a prompt, optionally filling in its arguments
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        self.ensure_ready()?;
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.session.request("prompts/get", Some(params)).await
    }

    /// Tools from the latest discovery (empty unless connected)
    pub fn list_tools(&self) -> Vec<Tool> {
        self.session.snapshot.read().tools.clone()
    }

    /// Cached resources
    pub fn list_resources(&self) -> Vec<Resource> {
        self.session.snapshot.read().resources.clone()
    }

    /// Cached prompts
    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.session.snapshot.read().prompts.clone()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // the transport's kill_on_drop reaps the process; just stop the pump
        self.abort_pump();
    }
}
