//! MCP protocol types (JSON-RPC 2.0) shared by every transport, plus the
//! transport error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── JSON-RPC 2.0 ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: serde_json::Value::Number(id.into()),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// JSON-RPC code for a method the receiver does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

impl JsonRpcResponse {
    /// Answer a server-initiated request. `ping` gets the empty result the
    /// protocol requires; every other method is refused.
    pub fn reply_to_server(id: serde_json::Value, method: &str) -> Self {
        let (result, error) = if method == "ping" {
            (Some(serde_json::json!({})), None)
        } else {
            (None, Some(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("method not found: {method}"),
                data: None,
            }))
        };
        Self {
            jsonrpc: "2.0".into(),
            id,
            result,
            error,
        }
    }
}

/// An inbound JSON-RPC message sorted by shape.
#[derive(Debug)]
pub enum ServerMessage {
    Response(JsonRpcResponse),
    /// The server expects an answer keyed by `id`.
    Request {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
    },
}

impl ServerMessage {
    /// Classify one message. Anything naming a `method` is server-initiated;
    /// only method-less messages carrying `result` or `error` are responses.
    pub fn parse(text: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let object = value.as_object()?;

        if let Some(method) = object.get("method").and_then(|m| m.as_str()) {
            let method = method.to_string();
            return Some(match object.get("id") {
                Some(id) if !id.is_null() => Self::Request {
                    id: id.clone(),
                    method,
                },
                _ => Self::Notification { method },
            });
        }
        if object.contains_key("result") || object.contains_key("error") {
            return serde_json::from_value(value).ok().map(Self::Response);
        }
        None
    }
}

// ── MCP Protocol Types ──────────────────────────────────────────────

/// Client capabilities sent during initialize.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Result from the `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A tool exposed by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Parameters for `tools/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    pub tools: Vec<McpToolDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A content item returned from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: serde_json::Value },
}

/// Result from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
}

impl ToolsCallResult {
    /// Render the result as text for the model.
    ///
    /// Structured content wins when present, then the text blocks, then the
    /// raw content blocks as JSON.
    #[must_use]
    pub fn render(&self) -> String {
        if let Some(structured) = &self.structured_content {
            return structured.to_string();
        }
        let texts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
        serde_json::to_string(&self.content).unwrap_or_default()
    }
}

/// A tool as seen by the rest of the runtime: the server's definition plus
/// the name of the server that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn from_mcp(server: &str, def: McpToolDef) -> Self {
        Self {
            name: def.name,
            server: server.to_string(),
            description: def.description,
            input_schema: def.input_schema,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Coarse failure classification reported back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Auth,
    Timeout,
    Transport,
    Protocol,
    UnknownTool,
    ToolError,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection_error",
            Self::Auth => "auth_error",
            Self::Timeout => "timeout",
            Self::Transport => "transport_error",
            Self::Protocol => "protocol_error",
            Self::UnknownTool => "unknown_tool",
            Self::ToolError => "tool_error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Errors raised while talking to a single MCP server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum McpTransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("server returned 401 Unauthorized")]
    Unauthorized { www_authenticate: Option<String> },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("cancelled")]
    Cancelled,
}

impl McpTransportError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) => FailureKind::Connection,
            Self::Auth(_) | Self::Unauthorized { .. } => FailureKind::Auth,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Transport(_) => FailureKind::Transport,
            Self::Protocol(_) => FailureKind::Protocol,
            Self::Rpc { .. } => FailureKind::ToolError,
            Self::UnknownTool(_) => FailureKind::UnknownTool,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Channel-level failures that may succeed on a second attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Reclassify a failure that happened while establishing the channel.
    /// Authentication problems keep their kind.
    #[must_use]
    pub fn into_connection_error(self) -> Self {
        match self {
            Self::Connection(_) | Self::Auth(_) | Self::Unauthorized { .. } => self,
            other => Self::Connection(other.to_string()),
        }
    }
}

pub type TransportResult<T> = Result<T, McpTransportError>;

/// MCP protocol version we implement.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonrpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", Some(serde_json::json!({"key": "val"})));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_jsonrpc_response_with_result() {
        let json = r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_jsonrpc_response_with_error() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32600);
    }

    #[test]
    fn test_mcp_tool_def_deserialization() {
        let json = r#"{"name":"read_file","description":"Read a file","inputSchema":{"type":"object","properties":{"path":{"type":"string"}}}}"#;
        let tool: McpToolDef = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.description.as_deref(), Some("Read a file"));
    }

    #[test]
    fn test_tools_call_result_deserialization() {
        let json = r#"{"content":[{"type":"text","text":"hello"}],"isError":false}"#;
        let result: ToolsCallResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.content.len(), 1);
        assert!(!result.is_error);
        match &result.content[0] {
            ToolContent::Text { text } => assert_eq!(text, "hello"),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn test_initialize_params_serialization() {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "conduit".into(),
                version: "0.1.0".into(),
            },
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(json["clientInfo"]["name"], "conduit");
    }

    #[test]
    fn tools_list_result_carries_cursor() {
        let json = r#"{"tools":[],"nextCursor":"page-2"}"#;
        let result: ToolsListResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn render_prefers_structured_content() {
        let json = r#"{"content":[{"type":"text","text":"{\"x\": 1}"}],"structuredContent":{"x":1}}"#;
        let result: ToolsCallResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.render(), r#"{"x":1}"#);
    }

    #[test]
    fn render_joins_text_blocks() {
        let result = ToolsCallResult {
            content: vec![
                ToolContent::Text { text: "a".into() },
                ToolContent::Image {
                    data: "AAAA".into(),
                    mime_type: "image/png".into(),
                },
                ToolContent::Text { text: "b".into() },
            ],
            is_error: false,
            structured_content: None,
        };
        assert_eq!(result.render(), "a\nb");
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            McpTransportError::Unauthorized {
                www_authenticate: None
            }
            .kind(),
            FailureKind::Auth
        );
        assert_eq!(
            McpTransportError::Rpc {
                code: -32602,
                message: "bad".into()
            }
            .kind(),
            FailureKind::ToolError
        );
        assert!(McpTransportError::Timeout("30s".into()).is_retryable());
        assert!(!McpTransportError::Protocol("junk".into()).is_retryable());
        assert_eq!(FailureKind::UnknownTool.to_string(), "unknown_tool");
    }

    #[test]
    fn connect_failures_keep_auth_kind() {
        let err = McpTransportError::Auth("token endpoint returned 401".into());
        assert_eq!(err.clone().into_connection_error(), err);
        let err = McpTransportError::Transport("broken pipe".into()).into_connection_error();
        assert_eq!(err.kind(), FailureKind::Connection);
    }
}
