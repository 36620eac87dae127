//! Keyed SSH connection pool.
//!
//! One pooled client per `(user, host, port)`, reused across tool calls.
//! Dead entries are evicted lazily when an acquire finds them unresponsive.
//! The pool map is guarded by a mutex; liveness probes and connection setup
//! run outside it so slow hosts never block unrelated acquires.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ssh2::{CheckResult, KnownHostFileKind, Session};

use crate::config::SshConfig;
use crate::error::SshError;

use super::{AuthMaterial, SshTarget};

/// A pooled client plus its bookkeeping.
struct PoolEntry {
    session: Arc<Mutex<Session>>,
    created_at: Instant,
    last_used: Instant,
}

/// Shared, clonable handle to the pool.
#[derive(Clone)]
pub struct SshPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: SshConfig,
    entries: Mutex<HashMap<SshTarget, PoolEntry>>,
}

impl SshPool {
    pub fn new(config: SshConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of live pooled clients.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Acquire a session for `target`, reusing a pooled client when its
    /// liveness probe passes, otherwise connecting anew under the
    /// `max_connections` ceiling.
    pub async fn acquire(
        &self,
        target: SshTarget,
        auth: AuthMaterial,
    ) -> Result<Arc<Mutex<Session>>, SshError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.acquire_blocking(target, auth))
            .await
            .map_err(|e| SshError::Session(format!("pool task failed: {e}")))?
    }

    /// Drop the pooled client for `target`, if any. Called by the executor
    /// after a failure that poisons the connection.
    pub fn evict(&self, target: &SshTarget) {
        if self.inner.entries.lock().remove(target).is_some() {
            tracing::debug!(target = %target, "evicted pooled ssh client");
        }
    }

    /// Close every pooled client and reset the pool.
    pub fn close(&self) {
        let mut entries = self.inner.entries.lock();
        let count = entries.len();
        entries.clear();
        if count > 0 {
            tracing::info!(count, "closed ssh connection pool");
        }
    }
}

impl PoolInner {
    fn acquire_blocking(
        &self,
        target: SshTarget,
        auth: AuthMaterial,
    ) -> Result<Arc<Mutex<Session>>, SshError> {
        // Fast path: reuse an existing entry whose probe passes.
        let existing = {
            let entries = self.entries.lock();
            entries.get(&target).map(|e| Arc::clone(&e.session))
        };

        if let Some(session) = existing {
            if probe_alive(&session) {
                let mut entries = self.entries.lock();
                if let Some(entry) = entries.get_mut(&target) {
                    entry.last_used = Instant::now();
                }
                return Ok(session);
            }
            let mut entries = self.entries.lock();
            // Only evict the entry we probed; a racing acquire may already
            // have replaced it with a fresh client.
            if let Some(entry) = entries.get(&target) {
                if Arc::ptr_eq(&entry.session, &session) {
                    let age = entry.created_at.elapsed();
                    entries.remove(&target);
                    tracing::debug!(target = %target, ?age, "evicted dead ssh client");
                }
            }
        }

        let session = self.connect(&target, &auth)?;
        let session = Arc::new(Mutex::new(session));

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&target) {
            // Lost a creation race: discard ours, return the winner's.
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.session));
        }
        if entries.len() >= self.config.max_connections {
            return Err(SshError::PoolExhausted {
                max: self.config.max_connections,
            });
        }
        let now = Instant::now();
        entries.insert(
            target.clone(),
            PoolEntry {
                session: Arc::clone(&session),
                created_at: now,
                last_used: now,
            },
        );
        tracing::info!(target = %target, pooled = entries.len(), "opened ssh connection");
        Ok(session)
    }

    fn connect(&self, target: &SshTarget, auth: &AuthMaterial) -> Result<Session, SshError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| SshError::Connect {
                host: target.host.clone(),
                port: target.port,
                source: e,
            })?
            .next()
            .ok_or_else(|| SshError::Connect {
                host: target.host.clone(),
                port: target.port,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "hostname did not resolve",
                ),
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| SshError::Connect {
            host: target.host.clone(),
            port: target.port,
            source: e,
        })?;

        let mut session = Session::new().map_err(SshError::from)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session.handshake().map_err(|e| SshError::Handshake {
            host: target.host.clone(),
            port: target.port,
            detail: e.message().to_string(),
        })?;

        self.verify_host_key(&session, target)?;
        self.authenticate(&session, target, auth)?;

        // Per-command deadlines are set by the executor.
        session.set_timeout(0);
        Ok(session)
    }

    fn verify_host_key(&self, session: &Session, target: &SshTarget) -> Result<(), SshError> {
        let Some(path) = self.config.known_hosts_file.as_deref() else {
            tracing::warn!(
                host = %target.host,
                "no known_hosts file configured; accepting any host key"
            );
            return Ok(());
        };

        let mut known_hosts = session.known_hosts().map_err(SshError::from)?;
        known_hosts
            .read_file(Path::new(path), KnownHostFileKind::OpenSSH)
            .map_err(|e| SshError::HostKey {
                host: target.host.clone(),
                detail: format!("failed to read {path}: {}", e.message()),
            })?;

        let (key, _key_type) = session.host_key().ok_or_else(|| SshError::HostKey {
            host: target.host.clone(),
            detail: "server presented no host key".to_string(),
        })?;

        match known_hosts.check_port(&target.host, target.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => Err(SshError::HostKey {
                host: target.host.clone(),
                detail: "host not present in known_hosts".to_string(),
            }),
            CheckResult::Mismatch => Err(SshError::HostKey {
                host: target.host.clone(),
                detail: "host key mismatch".to_string(),
            }),
            CheckResult::Failure => Err(SshError::HostKey {
                host: target.host.clone(),
                detail: "known_hosts check failed".to_string(),
            }),
        }
    }

    fn authenticate(
        &self,
        session: &Session,
        target: &SshTarget,
        auth: &AuthMaterial,
    ) -> Result<(), SshError> {
        let methods = available_auth_methods(auth, &self.config);
        if methods.is_empty() {
            return Err(SshError::NoAuthMethod {
                user: target.user.clone(),
                host: target.host.clone(),
            });
        }

        let mut last_failure = String::new();
        for method in methods {
            let attempt = match method {
                AuthMethod::Password => {
                    let password = auth.password.as_deref().unwrap_or_default();
                    session.userauth_password(&target.user, password)
                }
                AuthMethod::ArgumentKey => {
                    let key = auth.key_file.as_deref().unwrap_or_default();
                    session.userauth_pubkey_file(&target.user, None, Path::new(key), None)
                }
                AuthMethod::ConfiguredKey => {
                    let key = self.config.key_file.as_deref().unwrap_or_default();
                    session.userauth_pubkey_file(&target.user, None, Path::new(key), None)
                }
                AuthMethod::Agent => session.userauth_agent(&target.user),
            };

            match attempt {
                Ok(()) if session.authenticated() => {
                    tracing::debug!(target = %target, ?method, "ssh authentication succeeded");
                    return Ok(());
                }
                Ok(()) => last_failure = format!("{method:?} accepted but not authenticated"),
                Err(e) => {
                    tracing::debug!(target = %target, ?method, error = %e.message(), "auth method failed");
                    last_failure = format!("{method:?}: {}", e.message());
                }
            }
        }

        Err(SshError::Auth {
            user: target.user.clone(),
            host: target.host.clone(),
            detail: last_failure,
        })
    }
}

/// Authentication rungs, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthMethod {
    Password,
    ArgumentKey,
    ConfiguredKey,
    Agent,
}

/// The rungs usable for this call: explicit password, key from the
/// arguments, configured key (if the file exists), ssh-agent (if a socket is
/// advertised). Order is the fallback order.
pub(crate) fn available_auth_methods(auth: &AuthMaterial, config: &SshConfig) -> Vec<AuthMethod> {
    let mut methods = Vec::new();
    if auth.password.is_some() {
        methods.push(AuthMethod::Password);
    }
    if auth.key_file.is_some() {
        methods.push(AuthMethod::ArgumentKey);
    }
    if let Some(key) = config.key_file.as_deref() {
        if Path::new(key).exists() {
            methods.push(AuthMethod::ConfiguredKey);
        }
    }
    if std::env::var_os("SSH_AUTH_SOCK").is_some() {
        methods.push(AuthMethod::Agent);
    }
    methods
}

/// Liveness probe: open and immediately drop a no-op channel. Any failure
/// marks the entry dead.
fn probe_alive(session: &Arc<Mutex<Session>>) -> bool {
    let session = session.lock();
    match session.channel_session() {
        Ok(mut channel) => {
            let _ = channel.close();
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SshConfig {
        SshConfig {
            timeout_secs: 2,
            ..SshConfig::default()
        }
    }

    #[test]
    fn auth_ladder_orders_password_first() {
        let auth = AuthMaterial {
            password: Some("pw".to_string()),
            key_file: Some("/tmp/key".to_string()),
        };
        let methods = available_auth_methods(&auth, &test_config());
        assert_eq!(methods[0], AuthMethod::Password);
        assert_eq!(methods[1], AuthMethod::ArgumentKey);
    }

    #[test]
    fn auth_ladder_skips_missing_configured_key() {
        let config = SshConfig {
            key_file: Some("/definitely/not/a/real/key".to_string()),
            ..test_config()
        };
        let methods = available_auth_methods(&AuthMaterial::default(), &config);
        assert!(!methods.contains(&AuthMethod::ConfiguredKey));
    }

    #[test]
    fn auth_ladder_includes_existing_configured_key() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("id_test");
        std::fs::write(&key_path, "not a real key").unwrap();

        let config = SshConfig {
            key_file: Some(key_path.to_string_lossy().into_owned()),
            ..test_config()
        };
        let methods = available_auth_methods(&AuthMaterial::default(), &config);
        assert!(methods.contains(&AuthMethod::ConfiguredKey));
    }

    #[tokio::test]
    async fn acquire_connect_refused_does_not_pool() {
        let pool = SshPool::new(test_config());
        let target = SshTarget {
            user: "nobody".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1, // nothing listens here
        };

        let err = match pool.acquire(target, AuthMaterial::default()).await {
            Ok(_) => panic!("expected acquire to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, SshError::Connect { .. }), "got {err:?}");
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn failed_acquires_for_distinct_targets_leave_pool_empty() {
        let pool = SshPool::new(test_config());
        for port in [1u16, 2, 3] {
            let target = SshTarget {
                user: "nobody".to_string(),
                host: "127.0.0.1".to_string(),
                port,
            };
            let _ = pool.acquire(target, AuthMaterial::default()).await;
        }
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn close_resets_the_pool() {
        let pool = SshPool::new(test_config());
        pool.close();
        assert!(pool.is_empty());
    }
}
