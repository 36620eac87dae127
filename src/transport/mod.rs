//! Server-side transports.
//!
//! Both feed `McpServer::handle_raw`; they differ only in framing and
//! session plumbing. The stdio transport serves exactly one session over the
//! process's standard handles; the HTTP transport serves many, each bound to
//! one SSE stream.

pub mod http;
pub mod stdio;
