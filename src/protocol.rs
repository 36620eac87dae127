//! JSON-RPC 2.0 wire codec and MCP message types.
//!
//! The envelope is transport-independent: stdio carries one JSON value per
//! LF-terminated line, the HTTP transport one value per POST body or SSE
//! `data:` field. This module owns envelope validation and the typed bodies
//! of every MCP method this crate speaks.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// JSON-RPC version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision this crate speaks by default.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Method names, shared by the server dispatcher and the client.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const LOG_MESSAGE: &str = "notifications/message";
    pub const PROGRESS: &str = "notifications/progress";
}

/// Request identifier: string, integer, or null.
///
/// JSON-RPC allows fractional ids but MCP clients in the wild use strings and
/// integers; a float fails envelope validation here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// A JSON-RPC request: carries an id and expects exactly one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// A JSON-RPC response: same id as the request, exactly one of result/error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    // Standard JSON-RPC codes.
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(-32600, format!("Invalid Request: {}", detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {method}"))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    // Server-error band (-32000..-32099).
    pub fn not_initialized() -> Self {
        Self::new(-32000, "server not initialized")
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// A JSON-RPC notification: no id, never answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    /// The gate-opener the client sends after a successful initialize.
    pub fn initialized() -> Self {
        Self::new(methods::INITIALIZED)
    }

    /// Optional server → client hint that the tool manifest changed.
    pub fn tools_list_changed() -> Self {
        Self::new(methods::TOOLS_LIST_CHANGED)
    }

    /// Optional server → client structured log line.
    pub fn log_message(level: &str, text: &str) -> Self {
        Self::new(methods::LOG_MESSAGE).with_params(serde_json::json!({
            "level": level,
            "data": text,
        }))
    }

    /// Optional server → client progress update for a `progressToken`.
    pub fn progress(token: serde_json::Value, progress: u64, total: Option<u64>) -> Self {
        Self::new(methods::PROGRESS).with_params(serde_json::json!({
            "progressToken": token,
            "progress": progress,
            "total": total,
        }))
    }
}

/// Any decoded JSON-RPC message.
///
/// Variant order matters for untagged deserialization: a request has both id
/// and method, a response has an id but no method, a notification has a
/// method but no id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// Envelope-layer failures, mapped onto the two lowest JSON-RPC codes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    Parse(String),
    #[error("invalid JSON-RPC envelope: {0}")]
    InvalidEnvelope(String),
}

impl ProtocolError {
    /// The error object a server should answer with for this failure.
    pub fn to_error_object(&self) -> JsonRpcError {
        match self {
            ProtocolError::Parse(_) => JsonRpcError::parse_error(),
            ProtocolError::InvalidEnvelope(detail) => JsonRpcError::invalid_request(detail.clone()),
        }
    }
}

/// Decode one wire value into a validated message.
///
/// Unparseable input is a parse error; parseable-but-wrong input (bad
/// version, batch array, response with both result and error) is an invalid
/// envelope.
pub fn decode(raw: &str) -> Result<JsonRpcMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Parse(e.to_string()))?;

    if value.is_array() {
        return Err(ProtocolError::InvalidEnvelope(
            "batch requests are not supported".to_string(),
        ));
    }

    if value.get("jsonrpc").and_then(|v| v.as_str()) != Some(JSONRPC_VERSION) {
        return Err(ProtocolError::InvalidEnvelope(
            "missing or unsupported jsonrpc version".to_string(),
        ));
    }

    let message: JsonRpcMessage =
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;

    if let JsonRpcMessage::Response(resp) = &message {
        if resp.result.is_some() == resp.error.is_some() {
            return Err(ProtocolError::InvalidEnvelope(
                "response must carry exactly one of result or error".to_string(),
            ));
        }
    }

    Ok(message)
}

/// Encode a message as a single line for the stdio transport.
pub fn encode_line<T: Serialize>(message: &T) -> String {
    let mut line = serde_json::to_string(message).unwrap_or_else(|_| {
        // Serialization of our own types cannot fail; keep the wire alive anyway.
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#
            .to_string()
    });
    line.push('\n');
    line
}

// ── MCP method bodies ──────────────────────────────────────────────

/// `initialize` request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// `initialize` response result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// A declared tool: name, human description, JSON-Schema for its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// `tools/list` response result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<Tool>,
}

/// `tools/call` request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ToolCallMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<serde_json::Value>,
}

/// One typed part of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            Content::Image { .. } => None,
        }
    }
}

/// `tools/call` response result.
///
/// `is_error` flags a domain-level failure (non-zero exit, auth failure,
/// timeout); protocol-level failures travel in the JSON-RPC error channel
/// instead, and the two must never be conflated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: true,
        }
    }

    /// All text parts joined with newlines, for callers that surface the
    /// payload to an LLM or a terminal.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let req = JsonRpcRequest::new(1, methods::TOOLS_LIST);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("\"params\""));

        let decoded = decode(&json).unwrap();
        match decoded {
            JsonRpcMessage::Request(r) => {
                assert_eq!(r.id, RequestId::Number(1));
                assert_eq!(r.method, methods::TOOLS_LIST);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn integer_and_string_ids_both_decode() {
        let int_id = decode(r#"{"jsonrpc":"2.0","id":42,"method":"x"}"#).unwrap();
        let str_id = decode(r#"{"jsonrpc":"2.0","id":"req-42","method":"x"}"#).unwrap();

        match (int_id, str_id) {
            (JsonRpcMessage::Request(a), JsonRpcMessage::Request(b)) => {
                assert_eq!(a.id, RequestId::Number(42));
                assert_eq!(b.id, RequestId::String("req-42".to_string()));
            }
            other => panic!("expected two requests, got {other:?}"),
        }
    }

    #[test]
    fn notification_has_no_id_and_decodes_as_notification() {
        let notif = JsonRpcNotification::initialized();
        let json = serde_json::to_string(&notif).unwrap();
        assert!(!json.contains("\"id\""));

        match decode(&json).unwrap() {
            JsonRpcMessage::Notification(n) => assert_eq!(n.method, methods::INITIALIZED),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn response_success_and_error_decode() {
        let ok = JsonRpcResponse::success(RequestId::Number(7), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&ok).unwrap();
        match decode(&json).unwrap() {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id, RequestId::Number(7));
                assert!(r.result.is_some());
                assert!(!r.is_error());
            }
            other => panic!("expected response, got {other:?}"),
        }

        let err = JsonRpcResponse::error(
            RequestId::String("a".into()),
            JsonRpcError::method_not_found("nope"),
        );
        let json = serde_json::to_string(&err).unwrap();
        match decode(&json).unwrap() {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.error.as_ref().unwrap().code, -32601);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_json_is_parse_error() {
        let err = decode("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse(_)));
        assert_eq!(err.to_error_object().code, -32700);
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let err = decode(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
        assert_eq!(err.to_error_object().code, -32600);
    }

    #[test]
    fn missing_version_is_invalid_request() {
        let err = decode(r#"{"id":1,"method":"x"}"#).unwrap_err();
        assert_eq!(err.to_error_object().code, -32600);
    }

    #[test]
    fn batch_array_is_invalid_request() {
        let err = decode(r#"[{"jsonrpc":"2.0","id":1,"method":"x"}]"#).unwrap_err();
        assert_eq!(err.to_error_object().code, -32600);
    }

    #[test]
    fn response_with_result_and_error_is_invalid() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":-1,"message":"m"}}"#;
        let err = decode(raw).unwrap_err();
        assert_eq!(err.to_error_object().code, -32600);
    }

    #[test]
    fn response_with_neither_result_nor_error_is_invalid() {
        let err = decode(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.to_error_object().code, -32600);
    }

    #[test]
    fn float_id_is_invalid() {
        let err = decode(r#"{"jsonrpc":"2.0","id":1.5,"method":"x"}"#).unwrap_err();
        assert_eq!(err.to_error_object().code, -32600);
    }

    #[test]
    fn encode_decode_is_identity_on_valid_values() {
        let cases = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#,
            r#"{"jsonrpc":"2.0","id":"s","result":{"tools":[]}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        ];
        for raw in cases {
            let msg = decode(raw).unwrap();
            let encoded = serde_json::to_string(&msg).unwrap();
            let original: serde_json::Value = serde_json::from_str(raw).unwrap();
            let round_tripped: serde_json::Value = serde_json::from_str(&encoded).unwrap();
            assert_eq!(original, round_tripped);
        }
    }

    #[test]
    fn initialize_params_field_names() {
        let raw = r#"{
            "protocolVersion": "2025-03-26",
            "capabilities": {"sampling": {}},
            "clientInfo": {"name": "t", "version": "0.1"}
        }"#;
        let params: InitializeParams = serde_json::from_str(raw).unwrap();
        assert_eq!(params.protocol_version, "2025-03-26");
        assert_eq!(params.client_info.name, "t");
    }

    #[test]
    fn initialize_result_serializes_camel_case() {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
            },
            server_info: ServerInfo {
                name: "sshmcp".to_string(),
                version: "0.1.0".to_string(),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(json["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(json["serverInfo"]["name"], "sshmcp");
    }

    #[test]
    fn content_parts_are_type_tagged() {
        let text = Content::text("hello");
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");

        let image = Content::Image {
            data: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        };
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["mimeType"], "image/png");
    }

    #[test]
    fn tool_call_result_is_error_field_name() {
        let result = ToolCallResult::error_text("boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["content"][0]["text"], "boom");
    }

    #[test]
    fn tool_call_params_accept_progress_token() {
        let raw = r#"{"name":"ssh_execute","arguments":{"host":"h","command":"c"},"_meta":{"progressToken":"tok-1"}}"#;
        let params: ToolCallParams = serde_json::from_str(raw).unwrap();
        assert_eq!(params.name, "ssh_execute");
        assert_eq!(
            params.meta.unwrap().progress_token.unwrap(),
            serde_json::json!("tok-1")
        );
    }

    #[test]
    fn joined_text_skips_image_parts() {
        let result = ToolCallResult {
            content: vec![
                Content::text("a"),
                Content::Image {
                    data: String::new(),
                    mime_type: "image/png".to_string(),
                },
                Content::text("b"),
            ],
            is_error: false,
        };
        assert_eq!(result.joined_text(), "a\nb");
    }

    #[test]
    fn encode_line_appends_newline() {
        let notif = JsonRpcNotification::initialized();
        let line = encode_line(&notif);
        assert!(line.ends_with('\n'));
        assert!(!line[..line.len() - 1].contains('\n'));
    }

    #[test]
    fn late_response_to_unknown_id_still_decodes() {
        // The correlator discards these; the codec must not reject them.
        let msg = decode(r#"{"jsonrpc":"2.0","id":999,"result":{}}"#).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Response(_)));
    }
}
