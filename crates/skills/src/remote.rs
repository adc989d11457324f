//! Remote tools reached over HTTP.
//!
//! A remote tool POSTs its JSON arguments to a configured endpoint and returns
//! the response body as text. Retries (429 and 5xx) and the minimum spacing
//! between calls belong to the tool itself; callers never retry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use research_agent_core::config::{RemoteToolConfig, ToolsConfig};
use research_agent_core::{traits::Tool, types::ToolOutput, Error, Result, ToolRegistry};

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Tool backed by an HTTP endpoint.
pub struct RemoteTool {
    config: RemoteToolConfig,
    client: reqwest::Client,
    backoff_base: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RemoteTool {
    pub fn new(config: RemoteToolConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            client,
            backoff_base: DEFAULT_BACKOFF_BASE,
            last_call: Mutex::new(None),
        }
    }

    /// Override the base delay of the exponential backoff.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn min_interval(&self) -> Duration {
        Duration::from_millis(self.config.min_interval_ms)
    }

    /// Wait until the minimum interval since the previous call has passed.
    ///
    /// The lock is held while waiting, so concurrent calls queue up.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            let interval = self.min_interval();
            if elapsed < interval {
                tracing::debug!(
                    tool = %self.config.name,
                    wait_ms = (interval - elapsed).as_millis() as u64,
                    "Rate limiting remote tool call"
                );
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "additionalProperties": true })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let max_attempts = self.config.max_retries + 1;

        for attempt in 1..=max_attempts {
            self.pace().await;

            let sent = self
                .client
                .post(&self.config.endpoint)
                .json(&args)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(tool = %self.config.name, attempt, error = %e, "Remote tool request failed");
                    if attempt == max_attempts {
                        return Err(Error::tool_execution(format!(
                            "request to {} failed after {} attempts: {}",
                            self.config.endpoint, attempt, e
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
                .map_err(|e| Error::tool_execution(format!("failed to read response: {}", e)))?;

            if status.is_success() {
                return Ok(ToolOutput::text(body).with_data(json!({
                    "status": status.as_u16(),
                    "attempts": attempt,
                })));
            }

            let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < max_attempts {
                tracing::warn!(
                    tool = %self.config.name,
                    attempt,
                    status = status.as_u16(),
                    "Remote tool returned a retryable status"
                );
                tokio::time::sleep(self.backoff(attempt)).await;
                continue;
            }

            return Ok(ToolOutput::error(format!("HTTP Error {}: {}", status, body)).with_data(json!({
                "status": status.as_u16(),
                "attempts": attempt,
            })));
        }

        Err(Error::tool_execution("exhausted all attempts"))
    }
}

/// Register one [`RemoteTool`] per configured endpoint.
pub async fn register_remote_tools(registry: &dyn ToolRegistry, config: &ToolsConfig) -> Result<usize> {
    for remote in &config.remote {
        registry.register(Box::new(RemoteTool::new(remote.clone()))).await?;
    }
    Ok(config.remote.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

    /// Serve `handler` on a random local port and return its URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/call", addr)
    }

    fn config(endpoint: String, max_retries: u32, min_interval_ms: u64) -> RemoteToolConfig {
        RemoteToolConfig {
            name: "paper_search".into(),
            description: "Search papers".into(),
            endpoint,
            max_retries,
            min_interval_ms,
        }
    }

    #[tokio::test]
    async fn test_posts_arguments_and_returns_body() {
        let router = Router::new().route(
            "/call",
            post(|Json(body): Json<Value>| async move { format!("query was {}", body["query"]) }),
        );
        let tool = RemoteTool::new(config(serve(router).await, 0, 0));

        let out = tool.execute(json!({"query": "attention"})).await.unwrap();
        assert!(out.success);
        assert_eq!(out.content, "query was \"attention\"");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/call",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy")
                    } else {
                        (StatusCode::OK, "ok")
                    }
                }),
            )
            .with_state(hits.clone());
        let tool = RemoteTool::new(config(serve(router).await, 2, 0))
            .with_backoff_base(Duration::from_millis(10));

        let out = tool.execute(json!({})).await.unwrap();
        assert!(out.success);
        assert_eq!(out.content, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/call",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::BAD_REQUEST, "missing query")
                }),
            )
            .with_state(hits.clone());
        let tool = RemoteTool::new(config(serve(router).await, 3, 0))
            .with_backoff_base(Duration::from_millis(10));

        let out = tool.execute(json!({})).await.unwrap();
        assert!(!out.success);
        assert!(out.content.contains("missing query"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_min_interval_spaces_calls() {
        let router = Router::new().route("/call", post(|| async { "ok" }));
        let tool = RemoteTool::new(config(serve(router).await, 0, 200));

        let started = Instant::now();
        tool.execute(json!({})).await.unwrap();
        tool.execute(json!({})).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let tool = RemoteTool::new(config("http://127.0.0.1:9/call".into(), 1, 0))
            .with_backoff_base(Duration::from_millis(10));
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
