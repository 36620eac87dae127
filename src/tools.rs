//! Tool registry: declared tools, input schemas, and argument validation.
//!
//! Registration is static at server start and the manifest is immutable
//! afterwards. Incoming `tools/call` arguments are untyped JSON; this module
//! is the dispatch boundary that validates and coerces them into typed
//! request records, filling configured defaults, so downstream code never
//! re-parses raw JSON.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::SshConfig;
use crate::error::SshError;
use crate::protocol::{JsonRpcError, Tool, ToolCallResult, ToolsListResult};
use crate::ssh::{
    AuthMaterial, ExecuteResult, SshTarget, TransferDirection, TransferSummary,
};

pub const TOOL_SSH_EXECUTE: &str = "ssh_execute";
pub const TOOL_SSH_FILE_TRANSFER: &str = "ssh_file_transfer";

/// A validated `ssh_execute` call, defaults applied.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub target: SshTarget,
    pub auth: AuthMaterial,
    pub command: String,
    pub timeout: Duration,
}

/// A validated `ssh_file_transfer` call, defaults applied.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub target: SshTarget,
    pub auth: AuthMaterial,
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub timeout: Duration,
}

/// Any validated tool invocation.
#[derive(Debug, Clone)]
pub enum ToolRequest {
    Execute(ExecuteRequest),
    Transfer(TransferRequest),
}

/// The static tool manifest plus the defaults baked into it.
pub struct ToolRegistry {
    defaults: SshConfig,
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new(defaults: SshConfig) -> Self {
        let tools = vec![execute_tool(&defaults), transfer_tool(&defaults)];
        Self { defaults, tools }
    }

    /// The `tools/list` result. Identical for the lifetime of the server.
    pub fn manifest(&self) -> ToolsListResult {
        ToolsListResult {
            tools: self.tools.clone(),
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Validate `arguments` for `name` and coerce into a typed request.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<ToolRequest, JsonRpcError> {
        let args = arguments
            .as_object()
            .ok_or_else(|| JsonRpcError::invalid_params("arguments must be an object"))?;

        match name {
            TOOL_SSH_EXECUTE => {
                let host = required_str(args, "host")?;
                let command = required_str(args, "command")?;
                let user = optional_str(args, "user")?
                    .unwrap_or_else(|| self.defaults.default_user.clone());
                let port = optional_port(args, "port")?.unwrap_or(self.defaults.default_port);
                let timeout_secs =
                    optional_secs(args, "timeout")?.unwrap_or(self.defaults.timeout_secs);

                Ok(ToolRequest::Execute(ExecuteRequest {
                    target: SshTarget { user, host, port },
                    auth: AuthMaterial {
                        password: optional_str(args, "password")?,
                        key_file: optional_str(args, "keyFile")?,
                    },
                    command,
                    timeout: Duration::from_secs(timeout_secs),
                }))
            }

            TOOL_SSH_FILE_TRANSFER => {
                let host = required_str(args, "host")?;
                let local_path = required_str(args, "localPath")?;
                let remote_path = required_str(args, "remotePath")?;
                let direction = match required_str(args, "direction")?.as_str() {
                    "upload" => TransferDirection::Upload,
                    "download" => TransferDirection::Download,
                    other => {
                        return Err(JsonRpcError::invalid_params(format!(
                            "direction must be \"upload\" or \"download\", got \"{other}\""
                        )))
                    }
                };
                let user = optional_str(args, "user")?
                    .unwrap_or_else(|| self.defaults.default_user.clone());
                let port = optional_port(args, "port")?.unwrap_or(self.defaults.default_port);

                Ok(ToolRequest::Transfer(TransferRequest {
                    target: SshTarget { user, host, port },
                    auth: AuthMaterial {
                        password: optional_str(args, "password")?,
                        key_file: optional_str(args, "keyFile")?,
                    },
                    direction,
                    local_path: PathBuf::from(local_path),
                    remote_path,
                    timeout: Duration::from_secs(self.defaults.timeout_secs),
                }))
            }

            other => Err(JsonRpcError::invalid_params(format!("unknown tool: {other}"))),
        }
    }
}

// ── Argument extraction helpers ────────────────────────────────────

fn required_str(
    args: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, JsonRpcError> {
    match args.get(field) {
        None => Err(JsonRpcError::invalid_params(format!(
            "missing required argument: {field}"
        ))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(JsonRpcError::invalid_params(format!(
            "argument {field} must be a string"
        ))),
    }
}

fn optional_str(
    args: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<String>, JsonRpcError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(JsonRpcError::invalid_params(format!(
            "argument {field} must be a string"
        ))),
    }
}

fn optional_port(
    args: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<u16>, JsonRpcError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let n = value.as_u64().ok_or_else(|| {
                JsonRpcError::invalid_params(format!("argument {field} must be an integer"))
            })?;
            if n == 0 || n > u64::from(u16::MAX) {
                return Err(JsonRpcError::invalid_params(format!(
                    "argument {field} must be in 1..=65535"
                )));
            }
            Ok(Some(n as u16))
        }
    }
}

fn optional_secs(
    args: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<u64>, JsonRpcError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let n = value.as_u64().ok_or_else(|| {
                JsonRpcError::invalid_params(format!("argument {field} must be an integer"))
            })?;
            if n == 0 {
                return Err(JsonRpcError::invalid_params(format!(
                    "argument {field} must be positive"
                )));
            }
            Ok(Some(n))
        }
    }
}

// ── Schemas ────────────────────────────────────────────────────────

fn execute_tool(defaults: &SshConfig) -> Tool {
    Tool {
        name: TOOL_SSH_EXECUTE.to_string(),
        description: "Execute a shell command on a remote host over SSH".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "host": {
                    "type": "string",
                    "description": "Target host address"
                },
                "command": {
                    "type": "string",
                    "description": "Command to execute"
                },
                "user": {
                    "type": "string",
                    "description": "SSH username",
                    "default": defaults.default_user
                },
                "port": {
                    "type": "integer",
                    "description": "SSH port",
                    "default": defaults.default_port
                },
                "timeout": {
                    "type": "integer",
                    "description": "Command deadline in seconds",
                    "default": defaults.timeout_secs
                },
                "password": {
                    "type": "string",
                    "description": "SSH password (key auth is tried when omitted)"
                },
                "keyFile": {
                    "type": "string",
                    "description": "Path to a private key to authenticate with"
                }
            },
            "required": ["host", "command"]
        }),
    }
}

fn transfer_tool(defaults: &SshConfig) -> Tool {
    Tool {
        name: TOOL_SSH_FILE_TRANSFER.to_string(),
        description: "Transfer a file to or from a remote host over SSH".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "host": {
                    "type": "string",
                    "description": "Target host address"
                },
                "localPath": {
                    "type": "string",
                    "description": "Local file path"
                },
                "remotePath": {
                    "type": "string",
                    "description": "Remote file path"
                },
                "direction": {
                    "type": "string",
                    "description": "Transfer direction",
                    "enum": ["upload", "download"]
                },
                "user": {
                    "type": "string",
                    "description": "SSH username",
                    "default": defaults.default_user
                },
                "port": {
                    "type": "integer",
                    "description": "SSH port",
                    "default": defaults.default_port
                },
                "password": {
                    "type": "string",
                    "description": "SSH password (key auth is tried when omitted)"
                },
                "keyFile": {
                    "type": "string",
                    "description": "Path to a private key to authenticate with"
                }
            },
            "required": ["host", "localPath", "remotePath", "direction"]
        }),
    }
}

// ── Result rendering ───────────────────────────────────────────────

/// Render a finished execution as a tool result. `isError` tracks the remote
/// exit code and nothing else.
pub fn render_execute_result(host: &str, result: &ExecuteResult) -> ToolCallResult {
    let mut text = format!(
        "host: {host}\ncommand: {}\nexit code: {}\nduration: {:?}\n",
        result.command, result.exit_code, result.duration,
    );
    if !result.stdout.is_empty() {
        text.push_str(&format!(
            "stdout:\n{}\n",
            String::from_utf8_lossy(&result.stdout)
        ));
    }
    if !result.stderr.is_empty() {
        text.push_str(&format!(
            "stderr:\n{}\n",
            String::from_utf8_lossy(&result.stderr)
        ));
    }

    ToolCallResult {
        content: vec![crate::protocol::Content::text(text)],
        is_error: result.is_error(),
    }
}

/// Render a finished transfer as a tool result.
pub fn render_transfer_summary(host: &str, summary: &TransferSummary) -> ToolCallResult {
    ToolCallResult::text(format!(
        "file transfer complete\nhost: {host}\ndirection: {}\nlocal path: {}\nremote path: {}\nbytes: {}\nduration: {:?}",
        summary.direction,
        summary.local_path.display(),
        summary.remote_path,
        summary.bytes,
        summary.duration,
    ))
}

/// Render an SSH substrate failure as a domain error result. These never
/// travel on the JSON-RPC error channel.
pub fn render_ssh_failure(err: &SshError) -> ToolCallResult {
    ToolCallResult::error_text(err.to_string())
}
