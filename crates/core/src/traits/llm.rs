//! Model client traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::types::{ToolCallRequest, ToolDefinition};

/// LLM client interface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a chat completion, offering the given tools.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<LlmResponse>;
}

/// Chat message for LLM interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (system, user, assistant, tool).
    pub role: String,
    /// Message content.
    pub content: String,
    /// Tool calls issued by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Call answered by a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a plain message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Response from an LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Generated content.
    pub content: String,
    /// Finish reason as reported by the provider.
    pub finish_reason: Option<String>,
    /// Token usage.
    pub usage: LlmUsage,
    /// Legacy single function call.
    pub function_call: Option<ToolCallRequest>,
    /// Batch of tool calls.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl LlmResponse {
    /// Create a text response that finished normally.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        }
    }

    /// Create a response carrying a batch of tool calls.
    pub fn with_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            finish_reason: Some("tool_calls".to_string()),
            tool_calls: calls,
            ..Default::default()
        }
    }
}

/// Token usage from LLM call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Total tokens.
    pub total_tokens: u64,
}
