//! MCP client: request correlation, stdio and SSE transports, and
//! multi-server aggregation.
//!
//! One `McpServerHandle` per configured server, each with its own reader
//! task and pending-request table. The `McpService` stitches handles into a
//! flat tool namespace (`<server>.<tool>`) behind the `ToolCaller` trait,
//! which is all an orchestrator ever sees.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use crate::config::McpServerEntry;
use crate::error::{ClientError, TransportError};
use crate::protocol::{
    self, methods, ClientInfo, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, Tool, ToolCallResult,
    ToolsListResult, PROTOCOL_VERSION,
};

/// How long to wait for the `endpoint` event after opening an SSE stream.
const ENDPOINT_WAIT: Duration = Duration::from_secs(10);

/// How long to wait for a stdio child to exit after its stdin is closed.
const CHILD_REAP_WAIT: Duration = Duration::from_secs(5);

// ── Pending-request correlation ────────────────────────────────────

/// Client-side table of in-flight requests. Slots are single-shot: parked
/// before the request bytes are written, completed by the reader task, and
/// reaped either by completion or by the caller's deadline.
pub(crate) struct PendingRequests {
    slots: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Park a slot for `id`, returning the completion receiver.
    fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, tx);
        rx
    }

    /// Complete the slot for `response.id`. Returns false when no slot is
    /// parked, which the caller logs and discards.
    fn complete(&self, response: JsonRpcResponse) -> bool {
        let sender = self.slots.lock().remove(&response.id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Reap a slot whose deadline expired.
    fn remove(&self, id: &RequestId) {
        self.slots.lock().remove(id);
    }

    /// Fail every outstanding slot; their awaiters observe a closed channel.
    fn fail_all(&self) {
        self.slots.lock().clear();
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Route one inbound wire value from a server.
fn route_inbound(server: &str, pending: &PendingRequests, raw: &str) {
    match protocol::decode(raw) {
        Ok(JsonRpcMessage::Response(response)) => {
            let id = response.id.clone();
            if !pending.complete(response) {
                tracing::debug!(server, id = %id, "discarding response for unknown or reaped id");
            }
        }
        Ok(JsonRpcMessage::Notification(notification)) => {
            handle_server_notification(server, &notification);
        }
        Ok(JsonRpcMessage::Request(request)) => {
            tracing::debug!(server, method = %request.method, "dropping unsupported server-to-client request");
        }
        Err(e) => {
            tracing::warn!(server, error = %e, "undecodable message from server");
        }
    }
}

/// Inbound notifications a client may accept; all are optional and dropped
/// after logging.
fn handle_server_notification(server: &str, notification: &JsonRpcNotification) {
    match notification.method.as_str() {
        methods::LOG_MESSAGE => {
            tracing::info!(server, params = ?notification.params, "server log message");
        }
        methods::PROGRESS => {
            tracing::debug!(server, params = ?notification.params, "server progress");
        }
        methods::TOOLS_LIST_CHANGED => {
            tracing::info!(server, "server reports changed tool manifest");
        }
        other => {
            tracing::debug!(server, method = other, "ignoring server notification");
        }
    }
}

// ── SSE event decoding ─────────────────────────────────────────────

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder. Feed it raw chunks as they arrive; events come
/// out whole once their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: String,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(boundary) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..boundary + 2).collect();
            if let Some(event) = parse_event_block(&block) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim_start().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }

    if data_lines.is_empty() && event == "message" {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

// ── Stdio transport (child process) ────────────────────────────────

struct StdioConnection {
    name: String,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Child>,
    pending: Arc<PendingRequests>,
    next_id: AtomicI64,
    timeout: Duration,
}

impl StdioConnection {
    /// Spawn the server process and wire up reader tasks for stdout frames
    /// and stderr logs. stderr is drained continuously so the child never
    /// blocks on a full pipe.
    fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::Spawn {
                command: command.to_string(),
                source: e,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ClientError::Spawn {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdin handle"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ClientError::Spawn {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdout handle"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ClientError::Spawn {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stderr handle"),
        })?;

        let pending = Arc::new(PendingRequests::new());

        let reader_pending = Arc::clone(&pending);
        let reader_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                route_inbound(&reader_name, &reader_pending, &line);
            }
            tracing::debug!(server = %reader_name, "stdout closed");
            reader_pending.fail_all();
        });

        let stderr_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    tracing::debug!(server = %stderr_name, "{line}");
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicI64::new(1),
            timeout,
        })
    }

    async fn write_line(&self, line: String) -> Result<(), ClientError> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or(ClientError::Transport(TransportError::Closed))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(TransportError::Io)?;
        stdin.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        // Park the slot before any bytes hit the wire.
        let slot = self.pending.register(id.clone());
        if let Err(e) = self.write_line(protocol::encode_line(&request)).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, slot).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::TransportClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let mut notification = JsonRpcNotification::new(method);
        if let Some(params) = params {
            notification = notification.with_params(params);
        }
        self.write_line(protocol::encode_line(&notification)).await
    }

    /// Orderly shutdown: close stdin, wait for the child, escalate to kill,
    /// then fail whatever is still pending.
    async fn close(&self) {
        drop(self.stdin.lock().await.take());

        let mut child = self.child.lock().await;
        match tokio::time::timeout(CHILD_REAP_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, ?status, "server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.name, error = %e, "error waiting for server process");
            }
            Err(_) => {
                tracing::warn!(server = %self.name, "server process ignored stdin close, killing");
                let _ = child.kill().await;
            }
        }

        self.pending.fail_all();
    }
}

// ── HTTP/SSE transport ─────────────────────────────────────────────

struct SseConnection {
    name: String,
    http: reqwest::Client,
    endpoint: String,
    pending: Arc<PendingRequests>,
    next_id: AtomicI64,
    /// Set once initialize negotiates a version; forwarded on every POST.
    protocol_version: Mutex<Option<String>>,
    reader: tokio::task::JoinHandle<()>,
    timeout: Duration,
}

impl SseConnection {
    /// Connect with the observed compatibility dance: probe `POST /mcp/sse`
    /// (a conformant server answers 405), then run the two-leg flow. Open
    /// the SSE stream, wait for the `endpoint` event, and address all
    /// subsequent POSTs to the session endpoint it names.
    async fn connect(name: &str, base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        // No client-wide timeout: it would sever the long-lived SSE stream.
        // POSTs get per-request deadlines instead.
        let http = reqwest::Client::builder()
            .build()
            .map_err(TransportError::from)?;

        let base = base_url.trim_end_matches('/');
        let sse_url = format!("{base}/mcp/sse");

        let probe = http
            .post(&sse_url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .body(probe_initialize_body())
            .send()
            .await
            .map_err(TransportError::from)?;
        if probe.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            tracing::debug!(server = name, "POST probe got 405, using two-leg SSE flow");
        } else {
            tracing::debug!(
                server = name,
                status = %probe.status(),
                "POST probe not supported, using two-leg SSE flow",
            );
        }

        let response = http
            .get(&sse_url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(TransportError::from)?;
        if !response.status().is_success() {
            return Err(TransportError::Handshake(format!(
                "GET {sse_url} returned {}",
                response.status()
            ))
            .into());
        }

        let pending = Arc::new(PendingRequests::new());
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader_pending = Arc::clone(&pending);
        let reader_name = name.to_string();
        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut parser = SseEventParser::new();
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(server = %reader_name, error = %e, "sse stream error");
                        break;
                    }
                };
                for event in parser.push(&String::from_utf8_lossy(&chunk)) {
                    match event.event.as_str() {
                        "endpoint" => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(event.data);
                            }
                        }
                        "message" => route_inbound(&reader_name, &reader_pending, &event.data),
                        other => {
                            tracing::debug!(server = %reader_name, event = other, "ignoring sse event");
                        }
                    }
                }
            }
            tracing::debug!(server = %reader_name, "sse stream closed");
            reader_pending.fail_all();
        });

        let endpoint = match tokio::time::timeout(ENDPOINT_WAIT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(TransportError::Handshake(
                    "sse stream closed before the endpoint event".to_string(),
                )
                .into());
            }
            Err(_) => {
                reader.abort();
                return Err(TransportError::Handshake(
                    "timed out waiting for the endpoint event".to_string(),
                )
                .into());
            }
        };
        tracing::debug!(server = name, endpoint = %endpoint, "sse endpoint assigned");

        Ok(Self {
            name: name.to_string(),
            http,
            endpoint,
            pending,
            next_id: AtomicI64::new(1),
            protocol_version: Mutex::new(None),
            reader,
            timeout,
        })
    }

    fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.lock() = Some(version.to_string());
    }

    async fn post_message<T: serde::Serialize>(&self, message: &T) -> Result<(), ClientError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(message);
        if let Some(version) = self.protocol_version.lock().clone() {
            request = request.header("mcp-protocol-version", version);
        }

        let response = request.send().await.map_err(TransportError::from)?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "POST {} returned {}",
                self.endpoint,
                response.status()
            ))
            .into());
        }
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        let slot = self.pending.register(id.clone());
        if let Err(e) = self.post_message(&request).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, slot).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::TransportClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        let mut notification = JsonRpcNotification::new(method);
        if let Some(params) = params {
            notification = notification.with_params(params);
        }
        self.post_message(&notification).await
    }

    async fn close(&self) {
        self.reader.abort();
        self.pending.fail_all();
        tracing::debug!(server = %self.name, "sse connection closed");
    }
}

fn probe_initialize_body() -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "sshmcp", "version": env!("CARGO_PKG_VERSION")}
        }
    })
    .to_string()
}

// ── Per-server handle ──────────────────────────────────────────────

enum ServerConnection {
    Stdio(StdioConnection),
    Sse(SseConnection),
}

impl ServerConnection {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ClientError> {
        match self {
            ServerConnection::Stdio(c) => c.request(method, params).await,
            ServerConnection::Sse(c) => c.request(method, params).await,
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        match self {
            ServerConnection::Stdio(c) => c.notify(method, params).await,
            ServerConnection::Sse(c) => c.notify(method, params).await,
        }
    }

    async fn close(&self) {
        match self {
            ServerConnection::Stdio(c) => c.close().await,
            ServerConnection::Sse(c) => c.close().await,
        }
    }

    fn pending_count(&self) -> usize {
        match self {
            ServerConnection::Stdio(c) => c.pending.len(),
            ServerConnection::Sse(c) => c.pending.len(),
        }
    }
}

/// One connected, initialized MCP server with its cached manifest.
pub struct McpServerHandle {
    pub name: String,
    conn: ServerConnection,
    pub negotiated_version: String,
    pub server_name: String,
    pub tools: Vec<Tool>,
}

impl McpServerHandle {
    /// Connect, run the initialize handshake, and fetch the tool manifest.
    pub async fn connect(
        entry: &McpServerEntry,
        client_info: &ClientInfo,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let conn = match (&entry.command, &entry.url) {
            (Some(command), _) => ServerConnection::Stdio(StdioConnection::spawn(
                &entry.name,
                command,
                &entry.args,
                timeout,
            )?),
            (None, Some(url)) => {
                ServerConnection::Sse(SseConnection::connect(&entry.name, url, timeout).await?)
            }
            (None, None) => {
                return Err(ClientError::BadResponse(format!(
                    "server '{}' has neither command nor url",
                    entry.name
                )))
            }
        };

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: client_info.clone(),
        };
        let response = conn
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(params).unwrap_or_default()),
            )
            .await?;
        let init: InitializeResult = parse_result(response)?;

        // The server picked the session's protocol version; adopt it.
        if let ServerConnection::Sse(sse) = &conn {
            sse.set_protocol_version(&init.protocol_version);
        }
        conn.notify(methods::INITIALIZED, None).await?;

        let response = conn.request(methods::TOOLS_LIST, None).await?;
        let manifest: ToolsListResult = parse_result(response)?;

        tracing::info!(
            server = %entry.name,
            remote = %init.server_info.name,
            version = %init.protocol_version,
            tools = manifest.tools.len(),
            "connected to mcp server",
        );

        Ok(Self {
            name: entry.name.clone(),
            conn,
            negotiated_version: init.protocol_version,
            server_name: init.server_info.name,
            tools: manifest.tools,
        })
    }

    /// Invoke a tool by its bare (unqualified) name.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ClientError> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        let response = self.conn.request(methods::TOOLS_CALL, Some(params)).await?;
        parse_result(response)
    }

    pub async fn close(&self) {
        let in_flight = self.conn.pending_count();
        if in_flight > 0 {
            tracing::debug!(server = %self.name, in_flight, "closing with requests in flight");
        }
        self.conn.close().await;
    }
}

/// Unpack a response into `T`, mapping the error channel to `ClientError`.
fn parse_result<T: serde::de::DeserializeOwned>(
    response: JsonRpcResponse,
) -> Result<T, ClientError> {
    if let Some(error) = &response.error {
        return Err(ClientError::from_rpc(error));
    }
    let result = response
        .result
        .ok_or_else(|| ClientError::BadResponse("response carried no result".to_string()))?;
    serde_json::from_value(result).map_err(|e| ClientError::BadResponse(e.to_string()))
}

// ── Multi-server aggregation ───────────────────────────────────────

/// A tool as exposed to the orchestrator: qualified name plus descriptor.
#[derive(Debug, Clone)]
pub struct QualifiedTool {
    pub qualified_name: String,
    pub server: String,
    pub tool: Tool,
}

/// The surface an orchestrator programs against. Everything else about the
/// protocol stays hidden behind it.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    fn list_tools(&self) -> Vec<QualifiedTool>;
    async fn call_tool(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ClientError>;
}

/// Aggregates every configured server behind one namespace.
pub struct McpService {
    servers: HashMap<String, McpServerHandle>,
}

impl McpService {
    /// Connect all configured servers in parallel. Individual failures are
    /// logged and tolerated; only a clean sweep of failures is fatal.
    pub async fn connect_all(
        entries: &[McpServerEntry],
        client_info: ClientInfo,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let attempts = entries.iter().map(|entry| {
            let client_info = client_info.clone();
            async move {
                let result = McpServerHandle::connect(entry, &client_info, timeout).await;
                (entry.name.clone(), result)
            }
        });

        let mut servers = HashMap::new();
        for (name, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(handle) => {
                    servers.insert(name, handle);
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to connect mcp server");
                }
            }
        }

        if servers.is_empty() && !entries.is_empty() {
            return Err(ClientError::NoServers);
        }
        Ok(Self { servers })
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    /// Close every server: stdio children get their stdin closed and are
    /// reaped; pending slots are failed.
    pub async fn close_all(&self) {
        for handle in self.servers.values() {
            handle.close().await;
        }
    }
}

/// Split `server.tool` into its parts. The first dot is the separator; tool
/// names themselves may contain dots.
fn split_qualified(qualified_name: &str) -> Option<(&str, &str)> {
    match qualified_name.split_once('.') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Some((server, tool)),
        _ => None,
    }
}

#[async_trait]
impl ToolCaller for McpService {
    fn list_tools(&self) -> Vec<QualifiedTool> {
        let mut tools: Vec<QualifiedTool> = self
            .servers
            .values()
            .flat_map(|handle| {
                handle.tools.iter().map(|tool| QualifiedTool {
                    qualified_name: format!("{}.{}", handle.name, tool.name),
                    server: handle.name.clone(),
                    tool: tool.clone(),
                })
            })
            .collect();
        tools.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        tools
    }

    async fn call_tool(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ClientError> {
        let (server, tool) = split_qualified(qualified_name)
            .ok_or_else(|| ClientError::UnknownTool(qualified_name.to_string()))?;
        let handle = self
            .servers
            .get(server)
            .ok_or_else(|| ClientError::UnknownTool(qualified_name.to_string()))?;
        // The wire carries the bare tool name; qualification is local.
        handle.call_tool(tool, arguments).await
    }
}
