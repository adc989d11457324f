//! OpenAI-compatible chat completions client.
//!
//! Speaks the `/chat/completions` wire format, offers tools as function
//! schemas and surfaces native tool calls (batch `tool_calls` and the legacy
//! `function_call`) on [`LlmResponse`].

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use research_agent_core::config::ModelConfig;
use research_agent_core::{
    traits::{ChatMessage, LlmClient, LlmResponse, LlmUsage},
    Error, Result, ToolCallRequest, ToolDefinition,
};

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

// =============================================================================
// Client
// =============================================================================

/// Chat client for any endpoint implementing the OpenAI chat completions API.
pub struct OpenAiCompatClient {
    config: ModelConfig,
    api_key: Option<Secret<String>>,
    client: reqwest::Client,
    backoff_base: Duration,
}

impl OpenAiCompatClient {
    /// Create a client. The API key comes from the config, then `OPENAI_API_KEY`.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().map(Secret::new));
        if api_key.is_none() {
            tracing::warn!(base_url = %config.base_url, "No API key configured for the model endpoint");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::model_provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            api_key,
            client,
            backoff_base: DEFAULT_BACKOFF_BASE,
        })
    }

    /// Override the base delay of the exponential backoff.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request<'a>(&'a self, messages: &[ChatMessage], tools: &'a [ToolDefinition]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: messages.iter().map(to_wire_message).collect(),
            tools: tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunctionDef {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

fn to_wire_message(message: &ChatMessage) -> WireMessage {
    WireMessage {
        role: message.role.clone(),
        content: message.content.clone(),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                kind: function_kind(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn into_call(call: WireFunctionCall, id: Option<String>) -> ToolCallRequest {
    ToolCallRequest {
        id,
        name: call.name,
        arguments: call.arguments,
    }
}

fn decode_response(body: &str) -> Result<LlmResponse> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::model_provider(format!("invalid chat completion response: {}", e)))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::model_provider("chat completion response has no choices"))?;

    let usage = parsed
        .usage
        .map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: if u.total_tokens > 0 {
                u.total_tokens
            } else {
                u.prompt_tokens + u.completion_tokens
            },
        })
        .unwrap_or_default();

    let message = choice.message;
    Ok(LlmResponse {
        content: message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
        usage,
        function_call: message.function_call.map(|call| into_call(call, None)),
        tool_calls: message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| into_call(call.function, call.id))
            .collect(),
    })
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        let request = self.build_request(messages, tools);
        let endpoint = self.endpoint();
        let max_attempts = self.config.max_retries + 1;

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "Calling LLM"
        );

        for attempt in 1..=max_attempts {
            let mut builder = self.client.post(&endpoint).json(&request);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key.expose_secret());
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "LLM request failed");
                    if attempt == max_attempts {
                        return Err(Error::model_provider(format!(
                            "request failed after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Error::model_provider(format!("failed to read response: {}", e)))?;

            if status.is_success() {
                let decoded = decode_response(&body)?;
                tracing::debug!(
                    tokens = decoded.usage.total_tokens,
                    tool_calls = decoded.tool_calls.len(),
                    finish_reason = ?decoded.finish_reason,
                    "LLM response decoded"
                );
                return Ok(decoded);
            }

            let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < max_attempts {
                tracing::warn!(attempt, status = status.as_u16(), "LLM endpoint returned a retryable status");
                tokio::time::sleep(self.backoff(attempt)).await;
                continue;
            }

            return Err(Error::model_provider(format!("HTTP {}: {}", status, body)));
        }

        Err(Error::model_provider("exhausted all attempts"))
    }
}
