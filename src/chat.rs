//! Chat orchestrator: binds discovered MCP tools into an LLM conversation.
//!
//! The LLM provider is opaque behind `ChatProvider`; the engine only cares
//! that a completion comes back as either assistant text or a batch of tool
//! invocations. Tool execution goes through the `ToolCaller` interface, so
//! the engine never touches protocol mechanics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ToolCaller;
use crate::error::ClientError;

/// Upper bound on provider → tools → provider round trips per user message.
const MAX_TOOL_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages to pair results with their invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool declaration as handed to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call the provider asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What a completion came back as.
#[derive(Debug, Clone)]
pub enum ChatTurn {
    Text(String),
    ToolCalls(Vec<ToolInvocation>),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Tools(#[from] ClientError),

    #[error("provider kept requesting tools after {0} rounds")]
    ToolRoundsExhausted(usize),
}

/// The opaque LLM API: messages and tool declarations in, one turn out.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDecl],
    ) -> Result<ChatTurn, ChatError>;
}

/// Drives the conversation loop: user message in, provider completion,
/// tool execution, final assistant text out.
pub struct ChatEngine<P, T> {
    provider: P,
    tools: T,
    decls: Vec<ToolDecl>,
    messages: Vec<ChatMessage>,
    max_history: usize,
}

impl<P: ChatProvider, T: ToolCaller> ChatEngine<P, T> {
    pub fn new(provider: P, tools: T, system_prompt: Option<&str>, max_history: usize) -> Self {
        let decls = tools
            .list_tools()
            .into_iter()
            .map(|qualified| ToolDecl {
                name: qualified.qualified_name,
                description: qualified.tool.description,
                parameters: qualified.tool.input_schema,
            })
            .collect();

        let mut messages = Vec::new();
        if let Some(prompt) = system_prompt {
            messages.push(ChatMessage::system(prompt));
        }

        Self {
            provider,
            tools,
            decls,
            messages,
            max_history,
        }
    }

    /// Names of the tools the provider can request.
    pub fn available_tools(&self) -> Vec<&str> {
        self.decls.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Drop everything but system messages.
    pub fn clear_history(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Process one user message to a final assistant reply, executing any
    /// tool calls the provider requests along the way.
    pub async fn send(&mut self, user_message: &str) -> Result<String, ChatError> {
        self.messages.push(ChatMessage::user(user_message));
        self.trim_history();

        for _ in 0..MAX_TOOL_ROUNDS {
            match self.provider.complete(&self.messages, &self.decls).await? {
                ChatTurn::Text(text) => {
                    self.messages.push(ChatMessage::assistant(&text));
                    return Ok(text);
                }
                ChatTurn::ToolCalls(calls) => {
                    tracing::debug!(count = calls.len(), "provider requested tool calls");
                    self.messages.push(ChatMessage::assistant(
                        serde_json::to_string(&calls).unwrap_or_default(),
                    ));

                    for call in calls {
                        let text = self.run_tool_call(&call).await;
                        self.messages.push(ChatMessage::tool(call.id, text));
                    }
                }
            }
        }

        Err(ChatError::ToolRoundsExhausted(MAX_TOOL_ROUNDS))
    }

    /// Execute one invocation, folding every failure mode into the text the
    /// provider will read back. A tool-level `isError` keeps its payload;
    /// client-level failures are summarized.
    async fn run_tool_call(&self, call: &ToolInvocation) -> String {
        match self.tools.call_tool(&call.name, call.arguments.clone()).await {
            Ok(result) if result.is_error => {
                tracing::warn!(tool = %call.name, "tool returned an error result");
                format!("tool error: {}", result.joined_text())
            }
            Ok(result) => result.joined_text(),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                format!("tool call failed: {e}")
            }
        }
    }

    /// Keep the history bounded, preserving system messages.
    fn trim_history(&mut self) {
        if self.messages.len() <= self.max_history {
            return;
        }
        let system: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let keep = self.max_history.saturating_sub(system.len());
        let rest: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        let rest = rest[rest.len().saturating_sub(keep)..].to_vec();

        self.messages = system;
        self.messages.extend(rest);
    }
}
