//! In-memory transport that answers like a small MCP server.

use crate::error::{McpError, McpResult};
use crate::transport::{EventReceiver, EventSender, Transport, TransportEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How the scripted server behaves.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    /// Methods answered with a JSON-RPC error.
    pub fail_methods: Vec<String>,
    /// Methods that never get an answer.
    pub silent_methods: Vec<String>,
    /// Serve `tools/list` in two pages.
    pub paged_tools: bool,
    /// Every `tools/list` page points at the same next cursor.
    pub looping_cursor: bool,
    /// Every `tools/list` page points at a fresh next cursor.
    pub endless_pages: bool,
    /// Methods whose write never completes.
    pub stalled_methods: Vec<String>,
}

pub struct MockTransport {
    server: MockServer,
    tools: Mutex<Vec<Value>>,
    sent: Mutex<Vec<Value>>,
    inbound: EventSender,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new(server: MockServer) -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = async_channel::unbounded();
        let transport = Self {
            server,
            tools: Mutex::new(vec![json!({
                "name": "echo",
                "description": "Echo the text argument",
                "inputSchema": { "type": "object", "properties": { "text": { "type": "string" } } }
            })]),
            sent: Mutex::new(Vec::new()),
            inbound: tx,
            closed: AtomicBool::new(false),
        };
        (Arc::new(transport), rx)
    }

    /// Everything the client wrote, in order.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn last_id_for(&self, method: &str) -> Option<u64> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|m| m["method"] == method)
            .and_then(|m| m["id"].as_u64())
    }

    pub fn set_tools(&self, tools: Vec<Value>) {
        *self.tools.lock() = tools;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Push a raw message as if the server had written it.
    pub async fn inject(&self, message: Value) {
        let _ = self.inbound.send(TransportEvent::Message(message)).await;
    }

    /// Simulate the byte channel failing underneath the session.
    pub async fn fail(&self, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Error(reason.to_string())).await;
    }

    /// Simulate the server process exiting.
    pub async fn exit(&self, code: Option<i32>) {
        let _ = self.inbound.send(TransportEvent::Exited { code }).await;
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, Value> {
        if self.server.fail_methods.iter().any(|m| m == method) {
            return Err(json!({ "code": -32000, "message": format!("{} failed", method) }));
        }

        let result = match method {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": { "listChanged": true }, "resources": {}, "prompts": {} },
                "serverInfo": { "name": "mock-server", "version": "1.0.0" }
            }),
            "tools/list" if self.server.looping_cursor => {
                json!({ "tools": [{ "name": "echo" }], "nextCursor": "same" })
            }
            "tools/list" if self.server.endless_pages => {
                let page = params["cursor"].as_str().map_or(0, |c| c.len());
                json!({ "tools": [{ "name": "echo" }], "nextCursor": "x".repeat(page + 1) })
            }
            "tools/list" if self.server.paged_tools => match params.get("cursor") {
                None => json!({ "tools": [{ "name": "echo" }], "nextCursor": "page-2" }),
                Some(_) => json!({ "tools": [{ "name": "reverse" }] }),
            },
            "tools/list" => json!({ "tools": self.tools.lock().clone() }),
            "resources/list" => json!({
                "resources": [{ "uri": "file:///readme.md", "name": "readme", "mimeType": "text/markdown" }]
            }),
            "prompts/list" => json!({
                "prompts": [{ "name": "review", "arguments": [{ "name": "path", "required": true }] }]
            }),
            "tools/call" => {
                let text = params["arguments"]["text"].as_str().unwrap_or_default();
                json!({ "content": [{ "type": "text", "text": text }] })
            }
            "resources/read" => json!({
                "contents": [{ "uri": params["uri"], "text": "contents" }]
            }),
            "prompts/get" => json!({ "messages": [] }),
            "ping" => json!({}),
            other => return Err(json!({ "code": -32601, "message": format!("unknown method {}", other) })),
        };
        Ok(result)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: &Value) -> McpResult<()> {
        if self.is_closed() {
            return Err(McpError::Transport("mock transport closed".to_string()));
        }
        self.sent.lock().push(message.clone());

        let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str()) else {
            return Ok(());
        };
        if self.server.stalled_methods.iter().any(|m| m == method) {
            std::future::pending::<()>().await;
        }
        if self.server.silent_methods.iter().any(|m| m == method) {
            return Ok(());
        }

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let reply = match self.answer(method, &params) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        };
        let _ = self.inbound.send(TransportEvent::Message(reply)).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
