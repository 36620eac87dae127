//! Remote command execution and SCP file transfer over pooled sessions.
//!
//! Deadlines are enforced twice: `Session::set_timeout` bounds every blocking
//! libssh2 call, and a `tokio::time::timeout` around the blocking task bounds
//! the whole operation so the caller gets a prompt answer even if the
//! blocking thread is wedged mid-syscall. A command that overruns its
//! deadline is actively torn down: the channel is EOF'd and closed so the
//! remote sshd kills the command, and the pooled session is evicted.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ssh2::{Channel, Session};

use crate::config::SshConfig;
use crate::error::SshError;

use super::{AuthMaterial, ExecuteResult, SshPool, SshTarget, TransferDirection};

/// Grace added on top of the command deadline before the async wrapper gives
/// up on the blocking task.
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

/// Bound on the close exchange used to tear down an overrun channel, so a
/// dead peer cannot stall the teardown a second time.
const TERMINATE_TIMEOUT_MS: u32 = 2_000;

/// Outcome of one SCP transfer.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bytes: u64,
    pub duration: Duration,
}

/// Executes commands and transfers against pooled SSH sessions.
#[derive(Clone)]
pub struct SshExecutor {
    pool: SshPool,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self {
            pool: SshPool::new(config),
        }
    }

    pub fn pool(&self) -> &SshPool {
        &self.pool
    }

    /// Close all pooled connections.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Run `command` on `target`, capturing stdout/stderr in full and the
    /// remote exit code. A non-zero exit is a successful call; only
    /// transport-level trouble returns `Err`.
    pub async fn execute(
        &self,
        target: SshTarget,
        auth: AuthMaterial,
        command: String,
        timeout: Duration,
    ) -> Result<ExecuteResult, SshError> {
        let session = self.pool.acquire(target.clone(), auth).await?;

        let cmd = command.clone();
        let mut task = tokio::task::spawn_blocking(move || run_command(&session, &cmd, timeout));

        let result = match tokio::time::timeout(timeout + DEADLINE_GRACE, &mut task).await {
            Ok(joined) => {
                joined.map_err(|e| SshError::Session(format!("executor task failed: {e}")))?
            }
            Err(_) => {
                self.reap_blocked_task(&mut task).await;
                Err(SshError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
        };

        if let Err(e) = &result {
            if e.poisons_connection() {
                self.pool.evict(&target);
            }
        }
        result
    }

    /// Copy one file between the local filesystem and `target` over SCP.
    pub async fn transfer(
        &self,
        target: SshTarget,
        auth: AuthMaterial,
        direction: TransferDirection,
        local_path: PathBuf,
        remote_path: String,
        timeout: Duration,
    ) -> Result<TransferSummary, SshError> {
        let session = self.pool.acquire(target.clone(), auth).await?;

        let local = local_path.clone();
        let remote = remote_path.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            run_transfer(&session, direction, &local, &remote, timeout)
        });

        let result = match tokio::time::timeout(timeout + DEADLINE_GRACE, &mut task).await {
            Ok(joined) => {
                joined.map_err(|e| SshError::Session(format!("transfer task failed: {e}")))?
            }
            Err(_) => {
                self.reap_blocked_task(&mut task).await;
                Err(SshError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
        };

        if let Err(e) = &result {
            if e.poisons_connection() {
                self.pool.evict(&target);
            }
        }
        result
    }

    /// Blocking work cannot be cancelled; the session-level deadline inside
    /// the task fires and runs the channel teardown. Wait for that cleanup,
    /// then abandon the task if it is still stuck.
    async fn reap_blocked_task<T>(&self, task: &mut tokio::task::JoinHandle<T>) {
        if tokio::time::timeout(DEADLINE_GRACE, &mut *task).await.is_err() {
            task.abort();
            tracing::warn!("ssh task still blocked past its deadline, abandoning");
        }
    }
}

/// Blocking body of `execute`. Runs on the blocking pool with the session
/// mutex held for the duration of the command.
fn run_command(
    session: &Arc<Mutex<Session>>,
    command: &str,
    timeout: Duration,
) -> Result<ExecuteResult, SshError> {
    let session = session.lock();
    session.set_timeout(timeout.as_millis() as u32);
    let started = Instant::now();

    let outcome = match session.channel_session() {
        Ok(mut channel) => {
            let outcome = drive_command(&mut channel, command);
            if outcome.is_err() {
                // The remote command may still be running; close the channel
                // so sshd tears it down.
                session.set_timeout(TERMINATE_TIMEOUT_MS);
                terminate_channel(&mut channel);
            }
            outcome.map(|(exit_code, stdout, stderr)| ExecuteResult {
                command: command.to_string(),
                exit_code,
                stdout,
                stderr,
                duration: started.elapsed(),
            })
        }
        Err(e) => Err(e.into()),
    };

    session.set_timeout(0);
    map_deadline(outcome, started, timeout)
}

/// Exec the command and drain both streams to completion.
fn drive_command(channel: &mut Channel, command: &str) -> Result<(i32, Vec<u8>, Vec<u8>), SshError> {
    channel.exec(command)?;

    // libssh2 buffers the companion stream while one is drained, so the
    // two full reads cannot deadlock each other.
    let mut stdout = Vec::new();
    channel
        .read_to_end(&mut stdout)
        .map_err(|e| SshError::Session(format!("reading stdout: {e}")))?;
    let mut stderr = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut stderr)
        .map_err(|e| SshError::Session(format!("reading stderr: {e}")))?;

    channel.wait_close()?;
    Ok((channel.exit_status()?, stdout, stderr))
}

/// Best-effort teardown of a channel whose command did not finish: EOF the
/// remote input, then send the channel close that makes sshd kill the
/// command's process group.
fn terminate_channel(channel: &mut Channel) {
    let _ = channel.send_eof();
    let _ = channel.close();
}

/// Blocking body of `transfer`.
fn run_transfer(
    session: &Arc<Mutex<Session>>,
    direction: TransferDirection,
    local_path: &Path,
    remote_path: &str,
    timeout: Duration,
) -> Result<TransferSummary, SshError> {
    let session = session.lock();
    session.set_timeout(timeout.as_millis() as u32);
    let started = Instant::now();

    let outcome = match direction {
        TransferDirection::Upload => upload_file(&session, local_path, remote_path),
        TransferDirection::Download => download_file(&session, local_path, remote_path),
    };

    session.set_timeout(0);
    map_deadline(
        outcome.map(|bytes| TransferSummary {
            direction,
            local_path: local_path.to_path_buf(),
            remote_path: remote_path.to_string(),
            bytes,
            duration: started.elapsed(),
        }),
        started,
        timeout,
    )
}

fn upload_file(session: &Session, local_path: &Path, remote_path: &str) -> Result<u64, SshError> {
    let data = std::fs::read(local_path).map_err(|e| SshError::LocalFile {
        path: local_path.to_path_buf(),
        source: e,
    })?;
    let mut channel = session.scp_send(Path::new(remote_path), 0o644, data.len() as u64, None)?;

    let result = (|| -> Result<(), SshError> {
        channel
            .write_all(&data)
            .map_err(|e| SshError::Session(format!("writing remote file: {e}")))?;
        channel.send_eof()?;
        channel.wait_eof()?;
        channel.wait_close()?;
        Ok(())
    })();

    match result {
        Ok(()) => Ok(data.len() as u64),
        Err(e) => {
            session.set_timeout(TERMINATE_TIMEOUT_MS);
            terminate_channel(&mut channel);
            Err(e)
        }
    }
}

fn download_file(session: &Session, local_path: &Path, remote_path: &str) -> Result<u64, SshError> {
    let (mut channel, stat) = session.scp_recv(Path::new(remote_path))?;

    let result = (|| -> Result<Vec<u8>, SshError> {
        let mut data = Vec::with_capacity(stat.size() as usize);
        channel
            .read_to_end(&mut data)
            .map_err(|e| SshError::Session(format!("reading remote file: {e}")))?;
        channel.send_eof()?;
        channel.wait_eof()?;
        channel.wait_close()?;
        Ok(data)
    })();

    match result {
        Ok(data) => {
            std::fs::write(local_path, &data).map_err(|e| SshError::LocalFile {
                path: local_path.to_path_buf(),
                source: e,
            })?;
            Ok(data.len() as u64)
        }
        Err(e) => {
            session.set_timeout(TERMINATE_TIMEOUT_MS);
            terminate_channel(&mut channel);
            Err(e)
        }
    }
}

/// Rewrite a session-layer failure as a timeout when the deadline had
/// already passed; libssh2 reports timeouts as generic session errors.
fn map_deadline<T>(
    result: Result<T, SshError>,
    started: Instant,
    timeout: Duration,
) -> Result<T, SshError> {
    match result {
        Err(SshError::Session(_)) if started.elapsed() >= timeout => Err(SshError::Timeout {
            secs: timeout.as_secs(),
        }),
        other => other,
    }
}
