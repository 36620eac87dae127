//! MCP server core: method dispatch and the initialization state machine.
//!
//! Both transports funnel through `McpServer::handle_raw`, so stdio and
//! HTTP/SSE sessions get identical semantics. A `ServerSession` holds the
//! per-connection lifecycle state; the server itself is shared and stateless
//! across connections apart from the SSH pool.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::Config;
use crate::protocol::{
    methods, InitializeParams, InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolsCapability,
};
use crate::ssh::SshExecutor;
use crate::tools::{self, ToolRegistry, ToolRequest};

/// Lifecycle of one MCP connection.
///
/// `initialize` moves `AwaitingInit` to `VersionNegotiated`; only the paired
/// `notifications/initialized` commits the session to `Initialized`. Closing
/// a session is terminal and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInit,
    VersionNegotiated,
    Initialized,
    Closed,
}

/// Per-connection state, shared between the reader and spawned handlers.
#[derive(Debug)]
pub struct ServerSession {
    state: SessionState,
    client_name: Option<String>,
    client_version: Option<String>,
    client_protocol_version: Option<String>,
}

impl ServerSession {
    fn new() -> Self {
        Self {
            state: SessionState::AwaitingInit,
            client_name: None,
            client_version: None,
            client_protocol_version: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn client_version(&self) -> Option<&str> {
        self.client_version.as_deref()
    }

    /// The protocol version the client proposed in its initialize request.
    pub fn client_protocol_version(&self) -> Option<&str> {
        self.client_protocol_version.as_deref()
    }
}

/// Shared handle to one connection's session state.
pub type SharedSession = Arc<Mutex<ServerSession>>;

/// The MCP server: tool registry, SSH substrate, and identity.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    name: String,
    version: String,
    protocol_version: String,
    registry: ToolRegistry,
    executor: SshExecutor,
}

impl McpServer {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                name: config.server.name.clone(),
                version: config.server.version.clone(),
                protocol_version: config.server.protocol_version.clone(),
                registry: ToolRegistry::new(config.ssh.clone()),
                executor: SshExecutor::new(config.ssh.clone()),
            }),
        }
    }

    /// Fresh lifecycle state for a new transport connection.
    pub fn new_session(&self) -> SharedSession {
        Arc::new(Mutex::new(ServerSession::new()))
    }

    /// Mark a session closed. Safe to call more than once.
    pub fn close_session(&self, session: &SharedSession) {
        let mut session = session.lock();
        if session.state != SessionState::Closed {
            tracing::debug!(client = ?session.client_name, "mcp session closed");
            session.state = SessionState::Closed;
        }
    }

    /// Close the SSH pool. Called once at server shutdown.
    pub fn shutdown(&self) {
        self.inner.executor.close();
    }

    /// Handle one wire value. Returns the response to write, or `None` for
    /// notifications and discarded input.
    pub async fn handle_raw(&self, session: &SharedSession, raw: &str) -> Option<JsonRpcResponse> {
        match crate::protocol::decode(raw) {
            Ok(JsonRpcMessage::Request(request)) => {
                Some(self.handle_request(session, request).await)
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(session, notification);
                None
            }
            Ok(JsonRpcMessage::Response(response)) => {
                // This server never issues requests, so any response is late
                // or misdirected.
                tracing::debug!(id = %response.id, "discarding unexpected response");
                None
            }
            Err(err) => {
                tracing::debug!(error = %err, "rejecting undecodable message");
                Some(JsonRpcResponse::error(
                    RequestId::Null,
                    err.to_error_object(),
                ))
            }
        }
    }

    async fn handle_request(
        &self,
        session: &SharedSession,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        let method = request.method.clone();
        match method.as_str() {
            methods::INITIALIZE => self.handle_initialize(session, request),
            methods::TOOLS_LIST => match self.check_initialized(session, &id) {
                Some(rejection) => rejection,
                None => JsonRpcResponse::success(
                    id,
                    serde_json::to_value(self.inner.registry.manifest())
                        .unwrap_or(serde_json::Value::Null),
                ),
            },
            methods::TOOLS_CALL => match self.check_initialized(session, &id) {
                Some(rejection) => rejection,
                None => self.handle_tools_call(request).await,
            },
            other => {
                if let Some(rejection) = self.check_initialized(session, &id) {
                    return rejection;
                }
                JsonRpcResponse::error(id, JsonRpcError::method_not_found(other))
            }
        }
    }

    fn handle_initialize(
        &self,
        session: &SharedSession,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        {
            let state = session.lock().state;
            if state != SessionState::AwaitingInit {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::invalid_request("initialize is only valid once per session"),
                );
            }
        }

        let params: InitializeParams =
            match serde_json::from_value(request.params.unwrap_or_default()) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::invalid_params(format!("invalid initialize params: {e}")),
                    )
                }
            };

        tracing::info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            proposed = %params.protocol_version,
            negotiated = %self.inner.protocol_version,
            "initialize",
        );

        {
            let mut session = session.lock();
            session.state = SessionState::VersionNegotiated;
            session.client_name = Some(params.client_info.name);
            session.client_version = Some(params.client_info.version);
            session.client_protocol_version = Some(params.protocol_version);
        }

        // The server answers with the version it speaks; clients adopt it.
        let result = InitializeResult {
            protocol_version: self.inner.protocol_version.clone(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
            },
            server_info: ServerInfo {
                name: self.inner.name.clone(),
                version: self.inner.version.clone(),
            },
        };
        JsonRpcResponse::success(
            request.id,
            serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        )
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        let params: ToolCallParams = match serde_json::from_value(request.params.unwrap_or_default())
        {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("invalid tools/call params: {e}")),
                )
            }
        };

        let validated = match self.inner.registry.validate(&params.name, &params.arguments) {
            Ok(v) => v,
            Err(err) => return JsonRpcResponse::error(id, err),
        };

        let result = match validated {
            ToolRequest::Execute(req) => {
                let host = req.target.host.clone();
                tracing::info!(target = %req.target, command = %req.command, "ssh_execute");
                match self
                    .inner
                    .executor
                    .execute(req.target, req.auth, req.command, req.timeout)
                    .await
                {
                    Ok(outcome) => tools::render_execute_result(&host, &outcome),
                    Err(err) => {
                        tracing::warn!(host = %host, error = %err, "ssh_execute failed");
                        tools::render_ssh_failure(&err)
                    }
                }
            }
            ToolRequest::Transfer(req) => {
                let host = req.target.host.clone();
                tracing::info!(
                    target = %req.target,
                    direction = %req.direction,
                    "ssh_file_transfer",
                );
                match self
                    .inner
                    .executor
                    .transfer(
                        req.target,
                        req.auth,
                        req.direction,
                        req.local_path,
                        req.remote_path,
                        req.timeout,
                    )
                    .await
                {
                    Ok(summary) => tools::render_transfer_summary(&host, &summary),
                    Err(err) => {
                        tracing::warn!(host = %host, error = %err, "ssh_file_transfer failed");
                        tools::render_ssh_failure(&err)
                    }
                }
            }
        };

        JsonRpcResponse::success(
            id,
            serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        )
    }

    fn handle_notification(&self, session: &SharedSession, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => {
                let mut session = session.lock();
                match session.state {
                    SessionState::VersionNegotiated => {
                        session.state = SessionState::Initialized;
                        tracing::debug!(client = ?session.client_name, "session initialized");
                    }
                    state => {
                        tracing::warn!(?state, "ignoring notifications/initialized");
                    }
                }
            }
            other => {
                tracing::debug!(method = other, "ignoring notification");
            }
        }
    }

    /// Initialization gate: everything but `initialize` is rejected until the
    /// client's `notifications/initialized` has been observed.
    fn check_initialized(
        &self,
        session: &SharedSession,
        id: &RequestId,
    ) -> Option<JsonRpcResponse> {
        let state = session.lock().state;
        match state {
            SessionState::Initialized => None,
            _ => Some(JsonRpcResponse::error(
                id.clone(),
                JsonRpcError::not_initialized(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_line;

    fn server() -> McpServer {
        McpServer::new(&Config::default())
    }

    fn init_request(id: i64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "0"}
            }
        })
        .to_string()
    }

    async fn initialized_session(server: &McpServer) -> SharedSession {
        let session = server.new_session();
        let response = server.handle_raw(&session, &init_request(1)).await.unwrap();
        assert!(!response.is_error());
        server
            .handle_raw(
                &session,
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            )
            .await;
        session
    }

    #[tokio::test]
    async fn initialize_happy_path() {
        let server = server();
        let session = server.new_session();

        let response = server.handle_raw(&session, &init_request(1)).await.unwrap();
        assert_eq!(response.id, RequestId::Number(1));
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(result["serverInfo"]["name"], "sshmcp");

        // State is only committed by the notification.
        assert_eq!(session.lock().state(), SessionState::VersionNegotiated);

        let none = server
            .handle_raw(
                &session,
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            )
            .await;
        assert!(none.is_none(), "notifications must not elicit a response");
        assert_eq!(session.lock().state(), SessionState::Initialized);
    }

    #[tokio::test]
    async fn server_answers_with_its_own_protocol_version() {
        let server = server();
        let session = server.new_session();
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "1999-01-01",
                "capabilities": {},
                "clientInfo": {"name": "old", "version": "0"}
            }
        })
        .to_string();

        let response = server.handle_raw(&session, &raw).await.unwrap();
        assert_eq!(response.result.unwrap()["protocolVersion"], "2025-03-26");
    }

    #[tokio::test]
    async fn method_before_init_is_rejected_with_server_error_band() {
        let server = server();
        let session = server.new_session();

        let response = server
            .handle_raw(&session, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert!(error.message.contains("not initialized"));
    }

    #[tokio::test]
    async fn method_after_initialize_but_before_notification_is_rejected() {
        let server = server();
        let session = server.new_session();
        server.handle_raw(&session, &init_request(1)).await;

        let response = server
            .handle_raw(&session, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32000);
    }

    #[tokio::test]
    async fn initialize_twice_is_invalid_request() {
        let server = server();
        let session = server.new_session();
        server.handle_raw(&session, &init_request(1)).await;

        let response = server.handle_raw(&session, &init_request(2)).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn tools_list_returns_manifest_and_is_idempotent() {
        let server = server();
        let session = initialized_session(&server).await;

        let first = server
            .handle_raw(&session, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        let second = server
            .handle_raw(&session, r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#)
            .await
            .unwrap();

        let tools = &first.result.as_ref().unwrap()["tools"];
        assert_eq!(tools[0]["name"], "ssh_execute");
        assert_eq!(tools[0]["inputSchema"]["required"][0], "host");
        assert_eq!(first.result, second.result);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let server = server();
        let session = initialized_session(&server).await;

        let response = server
            .handle_raw(&session, r#"{"jsonrpc":"2.0","id":4,"method":"resources/list"}"#)
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert!(error.message.contains("resources/list"));
    }

    #[tokio::test]
    async fn parse_error_yields_null_id_response() {
        let server = server();
        let session = server.new_session();

        let response = server.handle_raw(&session, "{broken").await.unwrap();
        assert_eq!(response.id, RequestId::Null);
        assert_eq!(response.error.unwrap().code, -32700);
    }

    #[tokio::test]
    async fn bad_envelope_yields_invalid_request() {
        let server = server();
        let session = server.new_session();

        let response = server
            .handle_raw(&session, r#"{"id":1,"method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn tools_call_with_bad_params_is_invalid_params() {
        let server = server();
        let session = initialized_session(&server).await;

        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "ssh_execute", "arguments": {"command": "uptime"}}
        })
        .to_string();
        let response = server.handle_raw(&session, &raw).await.unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert!(error.message.contains("host"));
    }

    #[tokio::test]
    async fn tools_call_connect_failure_is_tool_error_not_rpc_error() {
        let server = server();
        let session = initialized_session(&server).await;

        // Nothing listens on port 1; the substrate fails fast and the
        // failure must surface as isError, not on the error channel.
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "tools/call",
            "params": {
                "name": "ssh_execute",
                "arguments": {"host": "127.0.0.1", "port": 1, "command": "true", "timeout": 2}
            }
        })
        .to_string();
        let response = server.handle_raw(&session, &raw).await.unwrap();
        assert!(response.error.is_none(), "expected result, got {response:?}");
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("failed to connect"), "text: {text}");
    }

    #[tokio::test]
    async fn inbound_response_is_discarded() {
        let server = server();
        let session = server.new_session();

        let none = server
            .handle_raw(&session, r#"{"jsonrpc":"2.0","id":9,"result":{}}"#)
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn close_session_is_idempotent() {
        let server = server();
        let session = server.new_session();
        server.close_session(&session);
        assert_eq!(session.lock().state(), SessionState::Closed);
        server.close_session(&session);
        assert_eq!(session.lock().state(), SessionState::Closed);
    }

    #[test]
    fn responses_encode_as_single_lines() {
        let response = JsonRpcResponse::success(RequestId::Number(1), serde_json::json!({}));
        let line = encode_line(&response);
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
    }
}
