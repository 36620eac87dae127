//! HTTP/SSE transport.
//!
//! Two endpoints at one origin: `GET /mcp/sse` opens the event stream and
//! immediately announces the per-session message endpoint; `POST
//! /mcp/message?sessionId=<id>` carries requests and notifications in. All
//! JSON-RPC responses travel out over the SSE stream, never in a POST body.
//! `POST /mcp/sse` is answered with 405 so clients fall back to the two-leg
//! flow.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::protocol::JsonRpcResponse;
use crate::server::{McpServer, SharedSession};

/// Bound on the per-session outbound queue. On overflow the oldest pending
/// response is dropped and the session is terminated; a partially delivered
/// response stream would break the client's correlator.
const OUTBOUND_QUEUE_DEPTH: usize = 100;

type SessionMap = Arc<Mutex<HashMap<String, SseSessionHandle>>>;

/// What happened to a pushed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueue {
    Accepted,
    /// The queue was full: its head (the oldest response) was evicted to
    /// admit this one. The caller terminates the session.
    DroppedOldest,
}

/// Bounded outbound queue for one SSE session. Unlike a plain channel it
/// can evict its head, which is what the overflow policy calls for.
struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    responses: VecDeque<JsonRpcResponse>,
    closed: bool,
}

impl OutboundQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                responses: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        })
    }

    /// Queue a response for the flush task. At capacity, the oldest pending
    /// response is dropped to admit the new one.
    fn push(&self, response: JsonRpcResponse) -> Enqueue {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Enqueue::Accepted;
            }
            let outcome = if state.responses.len() >= OUTBOUND_QUEUE_DEPTH {
                state.responses.pop_front();
                Enqueue::DroppedOldest
            } else {
                Enqueue::Accepted
            };
            state.responses.push_back(response);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Next queued response; `None` once the queue is closed and drained.
    async fn pop(&self) -> Option<JsonRpcResponse> {
        loop {
            // Register for wakeups before checking state so a push or close
            // landing in between cannot be missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(response) = state.responses.pop_front() {
                    return Some(response);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// No further pushes are delivered; `pop` drains what is queued, then
    /// ends.
    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }
}

/// Routing info for one live SSE session.
#[derive(Clone)]
struct SseSessionHandle {
    queue: Arc<OutboundQueue>,
    mcp: SharedSession,
}

#[derive(Clone)]
pub struct HttpState {
    server: McpServer,
    sessions: SessionMap,
}

impl HttpState {
    fn remove_session(&self, id: &str) {
        if let Some(handle) = self.sessions.lock().remove(id) {
            handle.queue.close();
            self.server.close_session(&handle.mcp);
        }
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Build the transport router around a server core.
pub fn router(server: McpServer) -> Router {
    let state = HttpState {
        server,
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };
    router_with_state(state)
}

fn router_with_state(state: HttpState) -> Router {
    Router::new()
        .route("/mcp/sse", get(sse_stream))
        .route("/mcp/message", post(post_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the transport on `port` until `shutdown` fires.
pub async fn serve(server: McpServer, port: u16, shutdown: CancellationToken) -> std::io::Result<()> {
    let app = router(server);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP/SSE transport listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
}

/// Deregisters the session when its stream is dropped, however that happens.
struct SessionGuard {
    id: String,
    state: HttpState,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        tracing::info!(session_id = %self.id, "sse stream closed");
        self.state.remove_session(&self.id);
    }
}

/// `GET /mcp/sse`: register a session, emit the `endpoint` event, then relay
/// queued responses as `message` events until the client disconnects.
async fn sse_stream(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let session_id = Uuid::new_v4().to_string();
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let endpoint = format!("http://{host}/mcp/message?sessionId={session_id}");

    let queue = OutboundQueue::new();
    let mcp = state.server.new_session();
    state.sessions.lock().insert(
        session_id.clone(),
        SseSessionHandle {
            queue: Arc::clone(&queue),
            mcp,
        },
    );
    tracing::info!(session_id = %session_id, "sse session opened");

    let guard = SessionGuard {
        id: session_id,
        state,
    };

    let endpoint_event = Event::default().event("endpoint").data(endpoint);
    let messages = stream::unfold(queue, |queue| async move {
        let response = queue.pop().await?;
        let event = Event::default()
            .event("message")
            .data(serde_json::to_string(&response).unwrap_or_default());
        Some((event, queue))
    });
    let events = stream::once(futures::future::ready(endpoint_event))
        .chain(messages)
        .map(move |event| {
            let _session = &guard;
            Ok::<Event, Infallible>(event)
        });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// `POST /mcp/message?sessionId=<id>`: dispatch one request or notification.
/// The HTTP status reflects acceptance only; JSON-RPC responses are routed
/// out over the session's SSE stream.
async fn post_message(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id else {
        return (StatusCode::NOT_FOUND, "missing sessionId").into_response();
    };

    let handle = state.sessions.lock().get(&session_id).cloned();
    let Some(handle) = handle else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    match state.server.handle_raw(&handle.mcp, &body).await {
        None => StatusCode::OK.into_response(),
        Some(response) => match handle.queue.push(response) {
            Enqueue::Accepted => StatusCode::OK.into_response(),
            Enqueue::DroppedOldest => {
                tracing::warn!(
                    session_id = %session_id,
                    "outbound queue overflowed; dropped oldest response, terminating session",
                );
                state.remove_session(&session_id);
                (StatusCode::REQUEST_TIMEOUT, "session outbound queue overflowed")
                    .into_response()
            }
        },
    }
}
