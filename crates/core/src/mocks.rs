//! Mock implementations of core traits for testing.
//!
//! Used across the workspace for unit and integration tests that should not
//! reach a real model provider or remote tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

use crate::{
    traits::{ChatMessage, LlmClient, LlmResponse, LlmUsage, Tool},
    types::{ToolDefinition, ToolOutput},
    Error, Result,
};

// =============================================================================
// Mock LLM Client
// =============================================================================

/// Scripted mock LLM that returns predefined responses in order.
///
/// Once the script is exhausted it answers `FINAL ANSWER: Done`.
pub struct MockLlm {
    responses: Mutex<Vec<LlmResponse>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
    tokens_per_call: u64,
}

impl MockLlm {
    /// Create a new mock LLM with a queue of responses.
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            seen: Mutex::new(Vec::new()),
            tokens_per_call: 30,
        }
    }

    /// Create a mock that answers with the given texts.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| LlmResponse::text(*t)).collect())
    }

    /// Set the completion tokens reported per call.
    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// Get the number of calls made to this mock.
    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Messages received by the n-th call.
    pub fn messages_for_call(&self, n: usize) -> Option<Vec<ChatMessage>> {
        self.seen.lock().ok().and_then(|s| s.get(n).cloned())
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, messages: &[ChatMessage], _tools: &[ToolDefinition]) -> Result<LlmResponse> {
        self.seen
            .lock()
            .map_err(|_| Error::internal("mock llm lock poisoned"))?
            .push(messages.to_vec());

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| Error::internal("mock llm lock poisoned"))?;
        let mut response = if responses.is_empty() {
            LlmResponse::text("FINAL ANSWER: Done")
        } else {
            responses.remove(0)
        };

        if response.usage.total_tokens == 0 {
            response.usage = LlmUsage {
                prompt_tokens: 0,
                completion_tokens: self.tokens_per_call,
                total_tokens: self.tokens_per_call,
            };
        }
        Ok(response)
    }
}

// =============================================================================
// Mock Tool
// =============================================================================

/// Behaviour of a [`MockTool`] call.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Succeed with this text.
    Reply(String),
    /// Report a tool-level failure with this text.
    Fail(String),
    /// Return a harness error.
    Error(String),
    /// Panic inside the tool.
    Panic,
}

/// Configurable tool for dispatcher and agent tests.
pub struct MockTool {
    name: String,
    delay: Duration,
    behavior: MockBehavior,
}

impl MockTool {
    /// Create a tool that replies with `reply`.
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            behavior: MockBehavior::Reply(reply.into()),
        }
    }

    /// Delay every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the call behaviour.
    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool for tests"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            MockBehavior::Reply(text) => Ok(ToolOutput::text(text.clone())),
            MockBehavior::Fail(text) => Ok(ToolOutput::error(text.clone())),
            MockBehavior::Error(msg) => Err(Error::tool_execution(msg.clone())),
            MockBehavior::Panic => panic!("mock tool '{}' panicked", self.name),
        }
    }
}
