//! SSH execution substrate: connection pool and command executor.
//!
//! The `ssh2` API is blocking; every call into it happens on the blocking
//! thread pool via `tokio::task::spawn_blocking`. Pooled sessions are shared
//! as `Arc<Mutex<ssh2::Session>>` because a libssh2 session is not thread
//! safe; commands against the same `(user, host, port)` serialize on that
//! mutex while different targets proceed in parallel.

mod exec;
mod pool;

pub use exec::{SshExecutor, TransferSummary};
pub use pool::SshPool;

use std::fmt;
use std::time::Duration;

/// Pool key: one live pooled client per `(user, host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Per-call authentication material, layered over the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct AuthMaterial {
    /// Explicit password from the tool arguments.
    pub password: Option<String>,
    /// Private key path from the tool arguments.
    pub key_file: Option<String>,
}

/// Outcome of one remote command execution.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl ExecuteResult {
    /// Domain-level failure flag: exactly `exit_code != 0`.
    pub fn is_error(&self) -> bool {
        self.exit_code != 0
    }
}

/// Direction of an `ssh_file_transfer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}
