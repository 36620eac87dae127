use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::PROTOCOL_VERSION;

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server identity and listen settings.
    pub server: ServerConfig,
    /// SSH defaults applied to tool calls that omit them.
    pub ssh: SshConfig,
    /// Client-side MCP server list.
    pub mcp: McpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ssh: SshConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

/// Server identity section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name advertised in the initialize response.
    pub name: String,
    /// Version advertised in the initialize response.
    pub version: String,
    /// MCP protocol revision the server answers with.
    pub protocol_version: String,
    /// HTTP listen port (HTTP/SSE transport only).
    pub port: u16,
    /// Default client-side request deadline, seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "sshmcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            port: 8000,
            request_timeout_secs: 30,
        }
    }
}

/// SSH connection defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Username used when a tool call omits `user`.
    pub default_user: String,
    /// Port used when a tool call omits `port`.
    pub default_port: u16,
    /// Command deadline used when a tool call omits `timeout`, seconds.
    pub timeout_secs: u64,
    /// Private key tried when neither password nor key argument is given.
    pub key_file: Option<String>,
    /// known_hosts file for strict host-key verification. Unset means
    /// accept-any with a logged warning; production deployments set this.
    pub known_hosts_file: Option<String>,
    /// Connection pool ceiling.
    pub max_connections: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_user: "root".to_string(),
            default_port: 22,
            timeout_secs: 30,
            key_file: None,
            known_hosts_file: None,
            max_connections: 10,
        }
    }
}

/// Client-side section: which MCP servers to connect to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub servers: Vec<McpServerEntry>,
}

/// One configured MCP server. Exactly one of `command` (stdio child) or
/// `url` (HTTP/SSE origin) must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerEntry {
    /// Name used to qualify this server's tools (`<name>.<tool>`).
    pub name: String,
    /// Executable to spawn for the stdio transport.
    pub command: Option<String>,
    /// Arguments for the spawned executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Origin for the HTTP/SSE transport, e.g. `http://host:8000`.
    pub url: Option<String>,
}

/// Errors that can occur when loading or validating config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load config from a TOML file. A missing file yields the defaults.
    ///
    /// Checks file permissions and warns if world-readable (the file may
    /// contain key paths and host lists).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let mut config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Expand `~` in the SSH key and known-hosts paths.
    fn expand_paths(&mut self) {
        if let Some(key_file) = &self.ssh.key_file {
            self.ssh.key_file = Some(expand_tilde(key_file));
        }
        if let Some(known_hosts) = &self.ssh.known_hosts_file {
            self.ssh.known_hosts_file = Some(expand_tilde(known_hosts));
        }
    }

    /// Validate field ranges and the server-entry shape.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.is_empty() {
            return Err(ConfigError::Invalid("server.name must not be empty".into()));
        }
        if self.server.protocol_version.is_empty() {
            return Err(ConfigError::Invalid(
                "server.protocol_version must not be empty".into(),
            ));
        }
        if self.ssh.default_port == 0 {
            return Err(ConfigError::Invalid("ssh.default_port must be nonzero".into()));
        }
        if self.ssh.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "ssh.max_connections must be greater than zero".into(),
            ));
        }
        for entry in &self.mcp.servers {
            if entry.name.is_empty() {
                return Err(ConfigError::Invalid(
                    "mcp server entries need a name".into(),
                ));
            }
            match (&entry.command, &entry.url) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "mcp server '{}' needs exactly one of command or url",
                        entry.name
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if path == "~" {
        return std::env::var("HOME").unwrap_or_else(|_| path.to_string());
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

/// Check file permissions on a config file and warn if world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if mode & 0o004 != 0 {
        tracing::warn!(
            "config file {} is world-readable (mode {:o}); consider restricting to 600",
            path.display(),
            mode & 0o7777,
        );
    }
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.name, "sshmcp");
        assert_eq!(config.server.protocol_version, PROTOCOL_VERSION);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.ssh.default_user, "root");
        assert_eq!(config.ssh.default_port, 22);
        assert_eq!(config.ssh.timeout_secs, 30);
        assert_eq!(config.ssh.max_connections, 10);
        assert!(config.mcp.servers.is_empty());
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [ssh]
            default_user = "deploy"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ssh.default_user, "deploy");
        // Untouched sections keep defaults.
        assert_eq!(config.ssh.default_port, 22);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [server]
            name = "lab-sshmcp"
            version = "2.0.0"
            protocol_version = "2025-03-26"
            port = 9001
            request_timeout_secs = 10

            [ssh]
            default_user = "ops"
            default_port = 2222
            timeout_secs = 5
            key_file = "/keys/id_ed25519"
            known_hosts_file = "/keys/known_hosts"
            max_connections = 4

            [[mcp.servers]]
            name = "local"
            command = "sshmcp"
            args = ["serve"]

            [[mcp.servers]]
            name = "lab"
            url = "http://10.0.0.7:8000"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.name, "lab-sshmcp");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.ssh.default_port, 2222);
        assert_eq!(config.ssh.max_connections, 4);
        assert_eq!(config.mcp.servers.len(), 2);
        assert_eq!(config.mcp.servers[0].args, vec!["serve"]);
        assert_eq!(
            config.mcp.servers[1].url.as_deref(),
            Some("http://10.0.0.7:8000")
        );
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.ssh.default_user, "root");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.name, "sshmcp");
    }

    #[test]
    fn load_expands_tilde_in_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [ssh]
                key_file = "~/.ssh/id_ed25519"
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let key_file = config.ssh.key_file.unwrap();
        assert!(!key_file.starts_with('~'), "expected expansion, got {key_file}");
        assert!(key_file.ends_with(".ssh/id_ed25519"));
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut config = Config::default();
        config.ssh.default_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_max_connections() {
        let mut config = Config::default();
        config.ssh.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_entry_with_both_command_and_url() {
        let mut config = Config::default();
        config.mcp.servers.push(McpServerEntry {
            name: "bad".to_string(),
            command: Some("sshmcp".to_string()),
            args: vec![],
            url: Some("http://x".to_string()),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_entry_with_neither_command_nor_url() {
        let mut config = Config::default();
        config.mcp.servers.push(McpServerEntry {
            name: "bad".to_string(),
            command: None,
            args: vec![],
            url: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn expand_tilde_variants() {
        std::env::set_var("HOME", "/home/test");
        assert_eq!(expand_tilde("~/x"), "/home/test/x");
        assert_eq!(expand_tilde("~"), "/home/test");
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[cfg(unix)]
    #[test]
    fn check_permissions_does_not_panic() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# test").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        check_config_permissions(&path);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        check_config_permissions(&path);
    }
}
