//! Shared helpers for the integration suites.
//!
//! Each test binary compiles its own copy, so not every helper is used
//! everywhere.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use sshmcp::client::{SseEvent, SseEventParser};
use sshmcp::config::Config;
use sshmcp::server::McpServer;
use sshmcp::transport;

/// Start an in-process HTTP/SSE MCP server on an ephemeral port.
pub async fn start_http_server() -> SocketAddr {
    let server = McpServer::new(&Config::default());
    let app = transport::http::router(server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

/// A live SSE stream with incremental event decoding.
pub struct SseStream {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    parser: SseEventParser,
    ready: VecDeque<SseEvent>,
}

impl SseStream {
    /// Open `GET {base}/mcp/sse` and wrap the body.
    pub async fn open(client: &reqwest::Client, addr: SocketAddr) -> Self {
        let response = client
            .get(format!("http://{addr}/mcp/sse"))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(
            content_type.starts_with("text/event-stream"),
            "unexpected content-type: {content_type}"
        );

        Self {
            bytes: Box::pin(response.bytes_stream()),
            parser: SseEventParser::new(),
            ready: VecDeque::new(),
        }
    }

    /// Next decoded event, or None if `within` elapses first.
    pub async fn next_event(&mut self, within: Duration) -> Option<SseEvent> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            let chunk = tokio::time::timeout_at(deadline, self.bytes.next())
                .await
                .ok()??
                .ok()?;
            self.ready
                .extend(self.parser.push(&String::from_utf8_lossy(&chunk)));
        }
    }

    /// Wait for the opening `endpoint` event and return its URL.
    pub async fn expect_endpoint(&mut self) -> String {
        let event = self
            .next_event(Duration::from_secs(5))
            .await
            .expect("no endpoint event before deadline");
        assert_eq!(event.event, "endpoint", "first event must be endpoint");
        assert!(event.data.contains("sessionId="), "data: {}", event.data);
        event.data
    }

    /// Wait for the next `message` event and parse its JSON-RPC payload.
    pub async fn expect_message(&mut self) -> serde_json::Value {
        loop {
            let event = self
                .next_event(Duration::from_secs(5))
                .await
                .expect("no message event before deadline");
            if event.event == "message" {
                return serde_json::from_str(&event.data).expect("message data must be JSON");
            }
        }
    }
}

/// POST one JSON-RPC payload to a session endpoint. Returns the HTTP status
/// and body.
pub async fn post_message(
    client: &reqwest::Client,
    endpoint: &str,
    payload: &serde_json::Value,
) -> (reqwest::StatusCode, String) {
    let response = client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .body(payload.to_string())
        .send()
        .await
        .unwrap();
    let status = response.status();
    let body = response.text().await.unwrap();
    (status, body)
}

pub fn initialize_payload(id: i64) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "integration-test", "version": "0.1"}
        }
    })
}

pub fn initialized_payload() -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized"
    })
}
