//! JSON-RPC 2.0 framing and MCP message types.
//!
//! Everything that crosses the wire lives here: outbound requests and
//! notifications, the classification of inbound lines, and the MCP payloads
//! exchanged during the handshake and discovery.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes used when answering server-initiated requests.
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Build the reply to a server-initiated request.
pub fn response_message(id: Value, outcome: Result<Value, JsonRpcError>) -> Value {
    match outcome {
        Ok(result) => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "result": result,
        }),
        Err(error) => serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": error,
        }),
    }
}

/// A notification the client knows how to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    ToolsListChanged,
    ResourcesListChanged,
    PromptsListChanged,
    /// `notifications/message`: a log line emitted by the server.
    Log { level: String, data: Value },
    Unknown(String),
}

impl ServerNotification {
    pub fn parse(method: &str, params: Option<&Value>) -> Self {
        match method {
            "notifications/tools/list_changed" => Self::ToolsListChanged,
            "notifications/resources/list_changed" => Self::ResourcesListChanged,
            "notifications/prompts/list_changed" => Self::PromptsListChanged,
            "notifications/message" => {
                let level = params
                    .and_then(|p| p.get("level"))
                    .and_then(Value::as_str)
                    .unwrap_or("info")
                    .to_string();
                let data = params
                    .and_then(|p| p.get("data"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Self::Log { level, data }
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// An incoming message from an MCP server, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// A reply to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, JsonRpcError>,
    },
    /// A request the server expects us to answer.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// A server-initiated notification (`method`, no `id`).
    Notification(ServerNotification),
}

impl IncomingMessage {
    /// Classify a parsed JSON value.
    ///
    /// Returns `None` for values that are not JSON-RPC messages we can act
    /// on, e.g. a response whose id we could never have issued.
    pub fn classify(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };

        let id = map.remove("id").filter(|id| !id.is_null());
        let method = map
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let params = map.remove("params");

        match (id, method) {
            (Some(id), Some(method)) => Some(Self::Request { id, method, params }),
            (None, Some(method)) => Some(Self::Notification(ServerNotification::parse(
                &method,
                params.as_ref(),
            ))),
            (Some(id), None) => {
                let id = parse_id(&id)?;
                let outcome = match map.remove("error") {
                    Some(error) if !error.is_null() => Err(serde_json::from_value(error)
                        .unwrap_or_else(|_| JsonRpcError {
                            code: -32603,
                            message: "malformed error object".to_string(),
                            data: None,
                        })),
                    _ => Ok(map.remove("result").unwrap_or(Value::Null)),
                };
                Some(Self::Response { id, outcome })
            }
            (None, None) => None,
        }
    }
}

/// Accept numeric ids as numbers or numeric strings.
fn parse_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Client info for initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "tern".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters of the `initialize` request.
pub fn initialize_params(client_info: &ClientInfo) -> Value {
    serde_json::json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "resources": { "subscribe": true },
            "prompts": {}
        },
        "clientInfo": client_info,
    })
}

/// Server capabilities returned during initialization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub list_changed: bool,
}

/// Server info returned during initialization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Initialize result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: ServerInfo,
}

/// A tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
    /// Owning server; stamped by the client after discovery.
    #[serde(default)]
    pub server: String,
}

/// A resource advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub server: String,
}

/// A prompt template advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
    #[serde(default)]
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Descriptor types that come back from a `*/list` call.
pub trait Listed: serde::de::DeserializeOwned + Clone + Send + Sync + 'static {
    /// Discovery method name.
    const METHOD: &'static str;
    /// Key of the array in the list result.
    const FIELD: &'static str;

    fn set_server(&mut self, server: &str);
}

impl Listed for Tool {
    const METHOD: &'static str = "tools/list";
    const FIELD: &'static str = "tools";

    fn set_server(&mut self, server: &str) {
        self.server = server.to_string();
    }
}

impl Listed for Resource {
    const METHOD: &'static str = "resources/list";
    const FIELD: &'static str = "resources";

    fn set_server(&mut self, server: &str) {
        self.server = server.to_string();
    }
}

impl Listed for Prompt {
    const METHOD: &'static str = "prompts/list";
    const FIELD: &'static str = "prompts";

    fn set_server(&mut self, server: &str) {
        self.server = server.to_string();
    }
}

/// One page of a `*/list` result.
pub fn parse_list_page<T: Listed>(result: Value) -> Result<(Vec<T>, Option<String>), serde_json::Error> {
    let next_cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(str::to_string);
    let items = match result.get(T::FIELD) {
        Some(items) => serde_json::from_value(items.clone())?,
        None => Vec::new(),
    };
    Ok((items, next_cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let request = JsonRpcRequest::new(1, "tools/list", None);

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_initialize_params_shape() {
        let params = initialize_params(&ClientInfo::default());
        assert_eq!(params["protocolVersion"], "2024-11-05");
        assert_eq!(params["capabilities"]["resources"]["subscribe"], true);
        assert_eq!(params["clientInfo"]["name"], "tern");
    }

    #[test]
    fn test_classify_response() {
        let msg = IncomingMessage::classify(json!({"jsonrpc": "2.0", "id": 7, "result": {"ok": true}}));
        assert_eq!(
            msg,
            Some(IncomingMessage::Response {
                id: 7,
                outcome: Ok(json!({"ok": true}))
            })
        );
    }

    #[test]
    fn test_classify_error_response_with_string_id() {
        let msg = IncomingMessage::classify(json!({
            "jsonrpc": "2.0",
            "id": "3",
            "error": {"code": -32602, "message": "bad params"}
        }));
        match msg {
            Some(IncomingMessage::Response { id, outcome: Err(e) }) => {
                assert_eq!(id, 3);
                assert_eq!(e.message, "bad params");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_notifications() {
        let msg = IncomingMessage::classify(json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/list_changed"
        }));
        assert_eq!(
            msg,
            Some(IncomingMessage::Notification(ServerNotification::ToolsListChanged))
        );

        let msg = IncomingMessage::classify(json!({"jsonrpc": "2.0", "method": "custom/thing"}));
        assert_eq!(
            msg,
            Some(IncomingMessage::Notification(ServerNotification::Unknown(
                "custom/thing".to_string()
            )))
        );
    }

    #[test]
    fn test_classify_server_request() {
        let msg = IncomingMessage::classify(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}));
        assert!(matches!(msg, Some(IncomingMessage::Request { ref method, .. }) if method == "ping"));
    }

    #[test]
    fn test_classify_rejects_non_messages() {
        assert_eq!(IncomingMessage::classify(json!([1, 2, 3])), None);
        assert_eq!(IncomingMessage::classify(json!({"jsonrpc": "2.0"})), None);
        assert_eq!(IncomingMessage::classify(json!({"id": "abc", "result": 1})), None);
    }

    #[test]
    fn test_parse_list_page() {
        let (tools, cursor): (Vec<Tool>, _) = parse_list_page(json!({
            "tools": [{"name": "echo", "inputSchema": {"type": "object"}}],
            "nextCursor": "page-2"
        }))
        .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(cursor.as_deref(), Some("page-2"));

        let (prompts, cursor): (Vec<Prompt>, _) = parse_list_page(json!({})).unwrap();
        assert!(prompts.is_empty());
        assert!(cursor.is_none());
    }
}
