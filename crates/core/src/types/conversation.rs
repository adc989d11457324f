use serde::{Deserialize, Serialize};

use super::tool::ToolInvocation;

// =============================================================================
// Conversation Types
// =============================================================================

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the model stopped producing a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the answer.
    Stop,
    /// Output token limit reached.
    Length,
    /// Output withheld by the provider's content filter.
    ContentFilter,
    /// The model is waiting for tool results.
    ToolCalls,
    /// Any other provider-specific reason.
    Other(String),
}

impl FinishReason {
    /// Parse a provider finish reason string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "content_filter" => Self::ContentFilter,
            "tool_calls" | "function_call" | "tool_use" => Self::ToolCalls,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this reason is an explicit signal that the conversation is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stop | Self::Length | Self::ContentFilter)
    }
}

/// Metadata attached to a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Tokens attributed to this turn.
    pub tokens: u64,
    /// Finish signal of a model turn.
    pub finish_reason: Option<FinishReason>,
    /// Tool invocations requested by a model turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<ToolInvocation>,
    /// Invocation answered by a tool turn.
    pub tool_call_id: Option<String>,
    /// Tool that produced a tool turn.
    pub tool_name: Option<String>,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
}

/// One immutable entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Author of the turn.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Turn metadata.
    pub metadata: TurnMetadata,
}

impl ConversationTurn {
    /// Create a turn with default metadata stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: TurnMetadata {
                timestamp: unix_timestamp(),
                ..Default::default()
            },
        }
    }

    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a model turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool result turn.
    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut turn = Self::new(Role::Tool, content);
        turn.metadata.tool_call_id = Some(tool_call_id.into());
        turn.metadata.tool_name = Some(tool_name.into());
        turn
    }

    /// Set the token count.
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.metadata.tokens = tokens;
        self
    }

    /// Set the finish reason.
    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.metadata.finish_reason = Some(reason);
        self
    }

    /// Attach the invocations requested by this turn.
    pub fn with_invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.metadata.invocations = invocations;
        self
    }
}

/// Lifecycle state of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// The loop is still going.
    Running,
    /// The loop halted through its stop policy.
    Completed,
    /// The loop aborted on an orchestration error.
    Failed,
}

/// Persisted snapshot of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Run id.
    pub run_id: String,
    /// Goal given to the agent.
    pub goal: String,
    /// Current status.
    pub status: RunStatus,
    /// Turn log at the time of saving.
    pub turns: Vec<ConversationTurn>,
    /// Last updated timestamp.
    pub updated_at: i64,
}

/// Get the current unix timestamp in seconds.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
