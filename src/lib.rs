//! sshmcp: an MCP server/client stack for remote SSH execution.
//!
//! The server side exposes `ssh_execute` and `ssh_file_transfer` tools over
//! JSON-RPC 2.0, reachable through a line-delimited stdio transport or an
//! HTTP/SSE transport. The client side spawns or connects to MCP servers,
//! correlates requests, and aggregates their tools into one namespace for
//! an orchestrator.

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod ssh;
pub mod tools;
pub mod transport;
