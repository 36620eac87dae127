//! Error taxonomy shared across subsystems.
//!
//! The split is strict: protocol-layer problems become JSON-RPC `error`
//! objects (see `protocol::JsonRpcError` and `protocol::ProtocolError`);
//! domain problems inside a tool call become a successful JSON-RPC response
//! whose result carries `isError: true`. `SshError` is the main feeder of the
//! second category.

use std::path::PathBuf;
use thiserror::Error;

/// Failures in the SSH substrate. All of these surface to MCP callers as
/// tool results with `isError = true`, never as JSON-RPC errors.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh handshake with {host}:{port} failed: {detail}")]
    Handshake {
        host: String,
        port: u16,
        detail: String,
    },

    #[error("authentication failed for {user}@{host}: {detail}")]
    Auth {
        user: String,
        host: String,
        detail: String,
    },

    #[error("no usable authentication method for {user}@{host}")]
    NoAuthMethod { user: String, host: String },

    #[error("host key verification failed for {host}: {detail}")]
    HostKey { host: String, detail: String },

    #[error("connection pool exhausted ({max} connections)")]
    PoolExhausted { max: usize },

    #[error("timeout after {secs}s")]
    Timeout { secs: u64 },

    #[error("local file error for {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh session error: {0}")]
    Session(String),
}

impl From<ssh2::Error> for SshError {
    fn from(e: ssh2::Error) -> Self {
        SshError::Session(e.message().to_string())
    }
}

impl SshError {
    /// True for failures where the pooled connection itself is suspect and
    /// should be evicted rather than reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            SshError::Timeout { .. } | SshError::Session(_) | SshError::Handshake { .. }
        )
    }
}

/// Failures at the transport layer, on either peer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("http error: {0}")]
    Http(String),

    #[error("sse handshake failed: {0}")]
    Handshake(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

/// Failures surfaced by the MCP client to its caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("request '{method}' timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("transport closed with requests in flight")]
    TransportClosed,

    #[error("server returned error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("no MCP servers could be reached")]
    NoServers,

    #[error("failed to spawn server process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

impl ClientError {
    pub fn from_rpc(error: &crate::protocol::JsonRpcError) -> Self {
        ClientError::Rpc {
            code: error.code,
            message: error.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_poisons_connection() {
        assert!(SshError::Timeout { secs: 5 }.poisons_connection());
        assert!(!SshError::NoAuthMethod {
            user: "u".into(),
            host: "h".into()
        }
        .poisons_connection());
        assert!(!SshError::PoolExhausted { max: 10 }.poisons_connection());
    }

    #[test]
    fn error_messages_name_the_peer() {
        let err = SshError::Auth {
            user: "deploy".into(),
            host: "db1".into(),
            detail: "all methods rejected".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("deploy@db1"));
    }
}
