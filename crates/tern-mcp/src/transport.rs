//! MCP transport layer
//!
//! A transport moves JSON-RPC messages between the client and one server.
//! Outbound messages go through [`Transport::send`]; everything the server
//! emits comes back as [`TransportEvent`]s on the channel returned when the
//! transport is opened.

use crate::config::{ServerDescriptor, TransportKind};
use crate::error::{McpError, McpResult};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Something the transport observed on the server side.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One parsed JSON value from the server.
    Message(Value),
    /// The server process exited on its own.
    Exited { code: Option<i32> },
    /// The byte channel failed.
    Error(String),
}

pub type EventSender = async_channel::Sender<TransportEvent>;
pub type EventReceiver = async_channel::Receiver<TransportEvent>;

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one message. Fails immediately when the channel is closed.
    async fn send(&self, message: &Value) -> McpResult<()>;

    /// Check if transport is still connected
    fn is_connected(&self) -> bool;

    /// Close the transport, terminating the server process if there is one.
    async fn close(&self);
}

/// Open the transport described by `descriptor`.
pub async fn open(
    descriptor: &ServerDescriptor,
    shutdown_grace: Duration,
) -> McpResult<(Arc<dyn Transport>, EventReceiver)> {
    match descriptor.transport {
        TransportKind::Stdio => {
            let (transport, events) = StdioTransport::start(descriptor, shutdown_grace)?;
            Ok((Arc::new(transport), events))
        }
        TransportKind::Http | TransportKind::Sse => {
            let url = descriptor.url.as_deref().ok_or_else(|| McpError::Launch {
                server: descriptor.name.clone(),
                reason: "no url specified".to_string(),
            })?;
            let (transport, events) = HttpTransport::new(descriptor.name.clone(), url);
            Ok((Arc::new(transport), events))
        }
    }
}

/// Splits an inbound byte stream into newline-delimited JSON values.
///
/// Blank lines are skipped. Lines that are not valid UTF-8 or not valid
/// JSON are dropped with a warning; they never affect later lines.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    pending: Vec<u8>,
    server: String,
}

impl InboundBuffer {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            pending: Vec::new(),
            server: server.into(),
        }
    }

    /// Append a chunk and return every complete message it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(value) = self.parse_line(&line[..line.len() - 1]) {
                messages.push(value);
            }
        }
        messages
    }

    /// Parse whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<Value> {
        let rest = std::mem::take(&mut self.pending);
        self.parse_line(&rest)
    }

    fn parse_line(&self, raw: &[u8]) -> Option<Value> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(server = %self.server, error = %e, "Dropping non UTF-8 line from MCP server");
                return None;
            }
        };

        if line.is_empty() {
            return None;
        }

        match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(server = %self.server, error = %e, line = %line, "Dropping malformed line from MCP server");
                None
            }
        }
    }
}

/// Stdio transport for MCP servers running as child processes
pub struct StdioTransport {
    server: String,
    stdin: Mutex<Option<ChildStdin>>,
    connected: Arc<AtomicBool>,
    shutdown: SyncMutex<Option<oneshot::Sender<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and start pumping its output.
    pub fn start(
        descriptor: &ServerDescriptor,
        shutdown_grace: Duration,
    ) -> McpResult<(Self, EventReceiver)> {
        let launch_err = |reason: String| McpError::Launch {
            server: descriptor.name.clone(),
            reason,
        };

        let command = descriptor
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| launch_err("no command specified".to_string()))?;

        let mut child = spawn(command, &descriptor.args, &descriptor.env, descriptor.cwd.as_deref())
            .map_err(|e| launch_err(format!("{}: {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_err("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_err("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| launch_err("failed to capture stderr".to_string()))?;

        let server = descriptor.name.clone();
        let (tx, rx) = async_channel::unbounded();
        let connected = Arc::new(AtomicBool::new(true));

        // stdout: protocol data
        let out_tx = tx.clone();
        let out_server = server.clone();
        let reader = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buffer = InboundBuffer::new(out_server.clone());
            let mut chunk = [0u8; 8192];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for message in buffer.push(&chunk[..n]) {
                            if out_tx.send(TransportEvent::Message(message)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = out_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            if let Some(message) = buffer.finish() {
                let _ = out_tx.send(TransportEvent::Message(message)).await;
            }
            debug!(server = %out_server, "MCP server closed stdout");
        });

        // stderr: diagnostics only
        let err_server = server.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    warn!(server = %err_server, "MCP server stderr: {}", line);
                }
            }
        });

        // supervisor: owns the child, reports exits, terminates on request
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let sup_connected = Arc::clone(&connected);
        let sup_server = server.clone();
        let supervisor = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    sup_connected.store(false, Ordering::SeqCst);
                    let code = status.ok().and_then(|s| s.code());
                    info!(server = %sup_server, ?code, "MCP server exited");
                    // let buffered output reach the client before the exit does
                    let _ = tokio::time::timeout(Duration::from_secs(1), reader).await;
                    let _ = tx.send(TransportEvent::Exited { code }).await;
                }
                _ = shutdown_rx => {
                    sup_connected.store(false, Ordering::SeqCst);
                    terminate(&mut child, shutdown_grace).await;
                    debug!(server = %sup_server, "MCP server terminated");
                }
            }
        });

        info!(server = %server, command = %command, "Spawned MCP server");

        Ok((
            Self {
                server,
                stdin: Mutex::new(Some(stdin)),
                connected,
                shutdown: SyncMutex::new(Some(shutdown_tx)),
                supervisor: Mutex::new(Some(supervisor)),
            },
            rx,
        ))
    }
}

fn spawn(
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    cwd: Option<&Path>,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    cmd.spawn()
}

/// Ask the child to stop, then force it after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &Value) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::Transport(format!(
                "MCP server '{}' is not running",
                self.server
            )));
        }

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            McpError::Transport(format!("stdin of MCP server '{}' is closed", self.server))
        })?;

        stdin
            .write_all(&line)
            .await
            .map_err(|e| McpError::Transport(format!("write to '{}' failed: {}", self.server, e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("write to '{}' failed: {}", self.server, e)))?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        // dropping stdin gives the server EOF before any signal
        self.stdin.lock().await.take();

        let shutdown = self.shutdown.lock().take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        let supervisor = self.supervisor.lock().await.take();
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// HTTP/SSE transport for remote MCP servers
pub struct HttpTransport {
    server: String,
    url: String,
    client: reqwest::Client,
    session_id: SyncMutex<Option<String>>,
    events: EventSender,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(server: impl Into<String>, url: impl Into<String>) -> (Self, EventReceiver) {
        let (tx, rx) = async_channel::unbounded();
        (
            Self {
                server: server.into(),
                url: url.into(),
                client: reqwest::Client::new(),
                session_id: SyncMutex::new(None),
                events: tx,
                connected: AtomicBool::new(true),
            },
            rx,
        )
    }

    async fn deliver(&self, value: Value) {
        // a batch response is delivered message by message
        let messages = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for message in messages {
            let _ = self.events.send(TransportEvent::Message(message)).await;
        }
    }
}

/// Extract the JSON payloads of an SSE body.
fn parse_sse_body(server: &str, body: &str) -> Vec<Value> {
    let mut buffer = InboundBuffer::new(server);
    let mut data = Vec::new();
    for line in body.lines() {
        if let Some(payload) = line.strip_prefix("data:") {
            data.extend_from_slice(payload.trim().as_bytes());
            data.push(b'\n');
        }
    }
    buffer.push(&data)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &Value) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::Transport(format!(
                "transport to MCP server '{}' is closed",
                self.server
            )));
        }

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        let session = self.session_id.lock().clone();
        if let Some(session) = session {
            request = request.header("Mcp-Session-Id", session);
        }

        let response = request.send().await.map_err(|e| {
            McpError::Transport(format!("HTTP request to '{}' failed: {}", self.server, e))
        })?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "MCP server '{}' returned HTTP status {}",
                self.server,
                response.status()
            )));
        }

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(session.to_string());
        }

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let body = response.text().await.map_err(|e| {
            McpError::Transport(format!("reading response from '{}' failed: {}", self.server, e))
        })?;

        if is_sse {
            for value in parse_sse_body(&self.server, &body) {
                self.deliver(value).await;
            }
        } else if !body.trim().is_empty() {
            match serde_json::from_str(&body) {
                Ok(value) => self.deliver(value).await,
                Err(e) => warn!(server = %self.server, error = %e, "Dropping malformed HTTP body from MCP server"),
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_buffer_splits_lines() {
        let mut buffer = InboundBuffer::new("test");
        let first = buffer.push(b"{\"id\":1}\n{\"id\"");
        assert_eq!(first, vec![json!({"id": 1})]);

        let second = buffer.push(b":2}\n\n");
        assert_eq!(second, vec![json!({"id": 2})]);
    }

    #[test]
    fn test_inbound_buffer_skips_malformed_line() {
        let mut buffer = InboundBuffer::new("test");
        let messages = buffer.push(b"debug: starting up\n{\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{}}\n");
        assert_eq!(messages, vec![json!({"jsonrpc": "2.0", "id": 4, "result": {}})]);
    }

    #[test]
    fn test_inbound_buffer_handles_split_utf8() {
        let mut buffer = InboundBuffer::new("test");
        let line = "{\"text\":\"héllo\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(buffer.push(&line[..split]).is_empty());
        assert_eq!(buffer.push(&line[split..]), vec![json!({"text": "héllo"})]);
    }

    #[test]
    fn test_inbound_buffer_finish() {
        let mut buffer = InboundBuffer::new("test");
        assert!(buffer.push(b"{\"id\":9}").is_empty());
        assert_eq!(buffer.finish(), Some(json!({"id": 9})));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_parse_sse_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let values = parse_sse_body("remote", body);
        assert_eq!(values, vec![json!({"jsonrpc": "2.0", "id": 1, "result": {}})]);
    }

    #[tokio::test]
    async fn test_start_without_command_is_launch_error() {
        let descriptor = ServerDescriptor::stdio("blank", "   ");
        let err = StdioTransport::start(&descriptor, Duration::from_millis(100))
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_start_missing_binary_is_launch_error() {
        let descriptor = ServerDescriptor::stdio("bad", "__nonexistent_mcp_server_binary_12345__");
        let err = StdioTransport::start(&descriptor, Duration::from_millis(100))
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Launch { .. }));
    }

    /// Minimal HTTP/1.1 endpoint: one request per connection, answered by
    /// JSON-RPC method. Returns the base URL and the request heads it saw.
    async fn serve_mcp_over_http() -> (String, Arc<SyncMutex<Vec<(String, String)>>>) {
        use tokio::net::{TcpListener, TcpStream};

        async fn read_request(stream: &mut TcpStream) -> Option<(String, Value)> {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let body_start = loop {
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..body_start]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < body_start + length {
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let body = serde_json::from_slice(&buf[body_start..body_start + length]).ok()?;
            Some((head, body))
        }

        fn reply(body: &Value, result: Value) -> String {
            json!({ "jsonrpc": "2.0", "id": body["id"], "result": result }).to_string()
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());
        let seen = Arc::new(SyncMutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let Some((head, body)) = read_request(&mut stream).await else {
                        return;
                    };
                    let method = body["method"].as_str().unwrap_or_default().to_string();
                    log.lock().push((method.clone(), head));

                    let (status, content_type, extra, payload) = match method.as_str() {
                        "initialize" => (
                            "200 OK",
                            "application/json",
                            "mcp-session-id: sess-1\r\n",
                            reply(&body, json!({
                                "protocolVersion": "2024-11-05",
                                "capabilities": { "tools": {} },
                                "serverInfo": { "name": "http-stub" }
                            })),
                        ),
                        "notifications/initialized" => ("202 Accepted", "application/json", "", String::new()),
                        "tools/list" => (
                            "200 OK",
                            "text/event-stream",
                            "",
                            format!(
                                "event: message\ndata: {}\n\n",
                                reply(&body, json!({ "tools": [{ "name": "echo" }] }))
                            ),
                        ),
                        "resources/list" => (
                            "200 OK",
                            "application/json",
                            "",
                            format!(
                                "[{},{}]",
                                reply(&body, json!({ "resources": [{ "uri": "stub://a", "name": "a" }] })),
                                json!({ "jsonrpc": "2.0", "method": "notifications/message", "params": { "level": "info", "data": "batched" } })
                            ),
                        ),
                        "tools/call" => (
                            "200 OK",
                            "text/event-stream",
                            "",
                            format!(
                                "data: {}\n\n",
                                reply(&body, json!({ "content": [{ "type": "text", "text": body["params"]["arguments"]["text"] }] }))
                            ),
                        ),
                        _ => ("200 OK", "application/json", "", reply(&body, json!({ "prompts": [] }))),
                    };

                    let response = format!(
                        "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n{}\r\n{}",
                        status,
                        content_type,
                        payload.len(),
                        extra,
                        payload
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        (url, seen)
    }

    #[tokio::test]
    async fn test_http_session_over_json_sse_and_batch_bodies() {
        use crate::client::{ClientOptions, McpClient};
        use crate::events;

        let (url, seen) = serve_mcp_over_http().await;
        let (transport, inbound) = HttpTransport::new("remote", url.clone());
        let (tx, _rx) = events::channel();
        let client = McpClient::new(
            ServerDescriptor::remote("remote", TransportKind::Http, url),
            ClientOptions::default(),
            tx,
        );

        client
            .connect_with_transport(Arc::new(transport), inbound)
            .await
            .unwrap();

        // initialize came back as JSON, tools/list as SSE, resources/list as a batch
        assert!(client.is_ready());
        assert_eq!(client.server_info().unwrap().name, "http-stub");
        assert_eq!(client.list_tools().len(), 1);
        assert_eq!(client.list_resources().len(), 1);

        let result = client.call_tool("echo", json!({ "text": "over http" })).await.unwrap();
        assert_eq!(result["content"][0]["text"], "over http");

        let seen = seen.lock().clone();
        let (first, head) = &seen[0];
        assert_eq!(first, "initialize");
        assert!(!head.contains("mcp-session-id"));
        assert!(seen.len() >= 5);
        for (method, head) in &seen[1..] {
            assert!(head.contains("mcp-session-id: sess-1"), "{} sent without session", method);
        }

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_http_send_after_close_fails() {
        let (transport, _rx) = HttpTransport::new("remote", "http://127.0.0.1:9/mcp");
        transport.close().await;
        let err = transport.send(&json!({"jsonrpc": "2.0"})).await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }
}
