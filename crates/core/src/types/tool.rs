use serde::{Deserialize, Serialize};

// =============================================================================
// Tool Types
// =============================================================================

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool execution was successful.
    pub success: bool,

    /// Output content.
    pub content: String,

    /// Optional structured data.
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            data: None,
        }
    }

    /// Attach structured data to the output.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create a failed output.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: message.into(),
            data: None,
        }
    }
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// JSON Schema for tool arguments.
    pub parameters: serde_json::Value,
}

/// A raw tool call as returned by the model, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call id, when the provider supplied one.
    pub id: Option<String>,
    /// Tool name.
    pub name: String,
    /// JSON-encoded argument object (may be malformed).
    pub arguments: String,
}

impl ToolCallRequest {
    /// Create a call request without an id.
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Set the call id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// How the model expressed a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStyle {
    /// The single `function_call` field (or the ACTION/ARGS text format).
    LegacySingle,
    /// One entry of the `tool_calls` batch.
    BatchMulti,
}

/// A normalized tool invocation, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Invocation id, echoed back in the matching result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments_json: String,
    /// Origin of the invocation.
    pub style: InvocationStyle,
}

impl ToolInvocation {
    /// Decode the argument object.
    ///
    /// An empty argument string is read as `{}`.
    pub fn arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments_json.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments_json)
    }
}

/// Textual result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the invocation that produced this result.
    pub invocation_id: String,
    /// Result text fed back to the model.
    pub text: String,
}

impl ToolResult {
    /// Create a result for an invocation.
    pub fn new(invocation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            text: text.into(),
        }
    }
}
