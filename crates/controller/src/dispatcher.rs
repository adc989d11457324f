//! Tool-call dispatcher.
//!
//! Runs every invocation of one model turn as its own task, converts anything
//! that goes wrong inside a task into that invocation's result text, and hands
//! the results back in request order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use research_agent_core::config::AgentConfig;
use research_agent_core::{Result, ToolDefinition, ToolInvocation, ToolRegistry, ToolResult};
use research_agent_sandbox::{CodeRunner, ExecutionOutcome, EXECUTE_CODE_TOOL};

use crate::session::{BindingSession, RESET_SESSION_TOOL};

/// Dispatcher limits.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on invocations running at once. `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// Wall-clock limit for tools other than code execution.
    pub tool_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            tool_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&AgentConfig> for DispatcherConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.filter(|n| *n > 0),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs.max(1)),
        }
    }
}

/// What one task reports back for its slot.
struct SlotOutput {
    text: String,
    outcome: Option<ExecutionOutcome>,
}

impl SlotOutput {
    fn text(text: String) -> Self {
        Self { text, outcome: None }
    }
}

/// Routes invocations to the code runner, the session or the tool registry.
#[derive(Clone)]
pub struct ToolCallDispatcher {
    tools: Option<Arc<dyn ToolRegistry>>,
    code_runner: Option<Arc<CodeRunner>>,
    config: DispatcherConfig,
    limiter: Option<Arc<Semaphore>>,
}

impl ToolCallDispatcher {
    pub fn new(
        tools: Option<Arc<dyn ToolRegistry>>,
        code_runner: Option<Arc<CodeRunner>>,
        config: DispatcherConfig,
    ) -> Self {
        let limiter = config.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            tools,
            code_runner,
            config,
            limiter,
        }
    }

    /// Definitions of every tool this dispatcher can route to.
    pub async fn definitions(&self) -> Result<Vec<ToolDefinition>> {
        let mut defs = match &self.tools {
            Some(tools) => tools.list().await?,
            None => Vec::new(),
        };
        if let Some(runner) = &self.code_runner {
            defs.push(runner.definition());
            defs.push(ToolDefinition {
                name: RESET_SESSION_TOOL.to_string(),
                description: "Forget every variable kept between execute_code calls.".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            });
        }
        Ok(defs)
    }

    /// Run one turn's invocations concurrently.
    ///
    /// Always returns exactly one result per invocation, in request order.
    /// Harvested bindings are merged into `session` once every task is done.
    pub async fn dispatch(
        &self,
        invocations: &[ToolInvocation],
        session: &mut BindingSession,
    ) -> Vec<ToolResult> {
        if invocations.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();

        let mut slots: Vec<Option<SlotOutput>> = invocations.iter().map(|_| None).collect();
        let mut reset_requested = false;
        let mut tasks = JoinSet::new();

        for (index, invocation) in invocations.iter().enumerate() {
            let name = invocation.name.clone();
            tracing::info!(tool = %name, invocation_id = %invocation.id, index, "Dispatching tool call");

            if name == RESET_SESSION_TOOL && self.code_runner.is_some() {
                reset_requested = true;
                slots[index] = Some(SlotOutput::text(format!(
                    "Tool '{}' succeeded:\nSession bindings will be cleared after this turn.",
                    name
                )));
                continue;
            }

            let snapshot = (name == EXECUTE_CODE_TOOL && self.code_runner.is_some())
                .then(|| session.snapshot(&invocation.id));
            let this = self.clone();
            let invocation = invocation.clone();

            tasks.spawn(async move {
                let _permit = match &this.limiter {
                    Some(limiter) => limiter.clone().acquire_owned().await.ok(),
                    None => None,
                };
                let body = AssertUnwindSafe(this.run_one(&invocation, snapshot)).catch_unwind();
                let output = match body.await {
                    Ok(output) => output,
                    Err(panic) => {
                        let msg = panic_message(panic.as_ref());
                        tracing::error!(tool = %invocation.name, panic = %msg, "Tool call panicked");
                        SlotOutput::text(format!("Tool '{}' error: panicked: {}", invocation.name, msg))
                    }
                };
                (index, output)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, output)) => slots[index] = Some(output),
                Err(e) => tracing::error!(error = %e, "Tool call task lost"),
            }
        }

        let results: Vec<(ToolResult, Option<ExecutionOutcome>)> = invocations
            .iter()
            .zip(slots)
            .map(|(invocation, slot)| {
                let slot = slot.unwrap_or_else(|| {
                    SlotOutput::text(format!(
                        "Tool '{}' error: the call was cancelled before it produced a result",
                        invocation.name
                    ))
                });
                (ToolResult::new(invocation.id.clone(), slot.text), slot.outcome)
            })
            .collect();

        session.commit_turn(results.iter().filter_map(|(result, outcome)| {
            outcome
                .as_ref()
                .map(|outcome| (result.invocation_id.as_str(), outcome))
        }));
        if reset_requested {
            session.reset();
        }

        tracing::debug!(
            count = invocations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn dispatched"
        );
        results.into_iter().map(|(result, _)| result).collect()
    }

    async fn run_one(
        &self,
        invocation: &ToolInvocation,
        snapshot: Option<research_agent_sandbox::BindingSnapshot>,
    ) -> SlotOutput {
        let name = invocation.name.as_str();
        let args = match invocation.arguments() {
            Ok(args) => args,
            Err(e) => {
                return SlotOutput::text(format!("Tool '{}' error: invalid arguments: {}", name, e))
            }
        };

        if let (Some(runner), Some(bindings)) = (&self.code_runner, snapshot) {
            return match runner.run(&args, bindings).await {
                Ok(run) => {
                    tracing::info!(
                        invocation_id = %invocation.id,
                        status = run.outcome.status(),
                        "Code execution finished"
                    );
                    SlotOutput {
                        text: run.summary,
                        outcome: Some(run.outcome),
                    }
                }
                Err(e) => SlotOutput::text(format!("Tool '{}' error: {}", name, e)),
            };
        }

        let Some(tools) = &self.tools else {
            return SlotOutput::text(format!(
                "Tool '{}' error: unknown tool '{}' (no tools configured)",
                name, name
            ));
        };
        if !tools.contains(name).await {
            return SlotOutput::text(format!("Tool '{}' error: unknown tool '{}'", name, name));
        }

        let text = match tokio::time::timeout(self.config.tool_timeout, tools.execute(name, args)).await {
            Ok(Ok(output)) if output.success => format!("Tool '{}' succeeded:\n{}", name, output.content),
            Ok(Ok(output)) => format!("Tool '{}' failed:\n{}", name, output.content),
            Ok(Err(e)) => format!("Tool '{}' error: {}", name, e),
            Err(_) => format!(
                "Tool '{}' error: timed out after {}s",
                name,
                self.config.tool_timeout.as_secs_f64()
            ),
        };
        SlotOutput::text(text)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_agent_core::mocks::{MockBehavior, MockTool};
    use research_agent_core::InvocationStyle;
    use research_agent_sandbox::{CodeRunnerConfig, ThreadSandbox};
    use research_agent_skills::DefaultToolRegistry;

    fn invocation(id: &str, name: &str, args: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            arguments_json: args.to_string(),
            style: InvocationStyle::BatchMulti,
        }
    }

    async fn registry(tools: Vec<MockTool>) -> Arc<dyn ToolRegistry> {
        let registry = DefaultToolRegistry::new();
        for tool in tools {
            registry.register(Box::new(tool)).await.unwrap();
        }
        Arc::new(registry)
    }

    fn code_runner() -> Arc<CodeRunner> {
        Arc::new(CodeRunner::new(
            Arc::new(ThreadSandbox::new()),
            CodeRunnerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let tools = registry(vec![
            MockTool::new("slow", "A").with_delay(Duration::from_millis(300)),
            MockTool::new("fast", "B"),
            MockTool::new("medium", "C").with_delay(Duration::from_millis(100)),
        ])
        .await;
        let dispatcher = ToolCallDispatcher::new(Some(tools), None, DispatcherConfig::default());
        let mut session = BindingSession::new();

        let results = dispatcher
            .dispatch(
                &[
                    invocation("a", "slow", "{}"),
                    invocation("b", "fast", "{}"),
                    invocation("c", "medium", "{}"),
                ],
                &mut session,
            )
            .await;

        let ids: Vec<_> = results.iter().map(|r| r.invocation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(results[0].text, "Tool 'slow' succeeded:\nA");
        assert_eq!(results[1].text, "Tool 'fast' succeeded:\nB");
        assert_eq!(results[2].text, "Tool 'medium' succeeded:\nC");
    }

    #[tokio::test]
    async fn test_invocations_run_concurrently() {
        let tools = registry(vec![
            MockTool::new("one", "1").with_delay(Duration::from_millis(300)),
            MockTool::new("two", "2").with_delay(Duration::from_millis(300)),
            MockTool::new("three", "3").with_delay(Duration::from_millis(300)),
        ])
        .await;
        let dispatcher = ToolCallDispatcher::new(Some(tools), None, DispatcherConfig::default());

        let started = Instant::now();
        dispatcher
            .dispatch(
                &[
                    invocation("1", "one", "{}"),
                    invocation("2", "two", "{}"),
                    invocation("3", "three", "{}"),
                ],
                &mut BindingSession::new(),
            )
            .await;
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_panicking_invocation_is_isolated() {
        let tools = registry(vec![
            MockTool::new("a", "A").with_delay(Duration::from_millis(50)),
            MockTool::new("b", "B").with_behavior(MockBehavior::Panic),
            MockTool::new("c", "C"),
        ])
        .await;
        let dispatcher = ToolCallDispatcher::new(Some(tools), None, DispatcherConfig::default());

        let results = dispatcher
            .dispatch(
                &[
                    invocation("1", "a", "{}"),
                    invocation("2", "b", "{}"),
                    invocation("3", "c", "{}"),
                ],
                &mut BindingSession::new(),
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].text, "Tool 'a' succeeded:\nA");
        assert!(results[1].text.starts_with("Tool 'b' error: panicked"), "{}", results[1].text);
        assert_eq!(results[2].text, "Tool 'c' succeeded:\nC");
    }

    #[tokio::test]
    async fn test_error_texts() {
        let tools = registry(vec![
            MockTool::new("fails", "").with_behavior(MockBehavior::Fail("quota exceeded".into())),
            MockTool::new("errors", "").with_behavior(MockBehavior::Error("boom".into())),
            MockTool::new("ok", "fine"),
        ])
        .await;
        let dispatcher = ToolCallDispatcher::new(Some(tools), None, DispatcherConfig::default());

        let results = dispatcher
            .dispatch(
                &[
                    invocation("1", "fails", "{}"),
                    invocation("2", "errors", "{}"),
                    invocation("3", "missing", "{}"),
                    invocation("4", "ok", "{not json"),
                ],
                &mut BindingSession::new(),
            )
            .await;

        assert_eq!(results[0].text, "Tool 'fails' failed:\nquota exceeded");
        assert!(results[1].text.starts_with("Tool 'errors' error:"));
        assert!(results[1].text.contains("boom"));
        assert_eq!(results[2].text, "Tool 'missing' error: unknown tool 'missing'");
        assert!(results[3].text.starts_with("Tool 'ok' error: invalid arguments"));
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let tools = registry(vec![
            MockTool::new("stuck", "never").with_delay(Duration::from_secs(5))
        ])
        .await;
        let config = DispatcherConfig {
            tool_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let dispatcher = ToolCallDispatcher::new(Some(tools), None, config);

        let results = dispatcher
            .dispatch(&[invocation("1", "stuck", "{}")], &mut BindingSession::new())
            .await;
        assert!(results[0].text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_concurrency_limit_serializes() {
        let tools = registry(vec![
            MockTool::new("a", "A").with_delay(Duration::from_millis(150)),
            MockTool::new("b", "B").with_delay(Duration::from_millis(150)),
        ])
        .await;
        let config = DispatcherConfig {
            max_concurrency: Some(1),
            ..Default::default()
        };
        let dispatcher = ToolCallDispatcher::new(Some(tools), None, config);

        let started = Instant::now();
        let results = dispatcher
            .dispatch(
                &[invocation("1", "a", "{}"), invocation("2", "b", "{}")],
                &mut BindingSession::new(),
            )
            .await;
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_code_bindings_carry_to_next_turn() {
        let dispatcher = ToolCallDispatcher::new(None, Some(code_runner()), DispatcherConfig::default());
        let mut session = BindingSession::new();

        let first = dispatcher
            .dispatch(
                &[invocation("1", EXECUTE_CODE_TOOL, r#"{"code": "let x = 1;"}"#)],
                &mut session,
            )
            .await;
        assert!(first[0].text.contains("Execution succeeded"), "{}", first[0].text);

        let second = dispatcher
            .dispatch(
                &[invocation("2", EXECUTE_CODE_TOOL, r#"{"code": "print(x)"}"#)],
                &mut session,
            )
            .await;
        assert!(second[0].text.starts_with("1\n"), "{}", second[0].text);
        assert_eq!(session.issued_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_code_runs_do_not_see_each_other() {
        let dispatcher = ToolCallDispatcher::new(None, Some(code_runner()), DispatcherConfig::default());
        let mut session = BindingSession::new();

        let results = dispatcher
            .dispatch(
                &[
                    invocation("1", EXECUTE_CODE_TOOL, r#"{"code": "let y = 10;"}"#),
                    invocation("2", EXECUTE_CODE_TOOL, r#"{"code": "print(y)"}"#),
                ],
                &mut session,
            )
            .await;

        assert!(results[1].text.contains("VariableNotFound"), "{}", results[1].text);
        assert_eq!(
            session.current().get("y").and_then(|v| v.as_int().ok()),
            Some(10)
        );
    }

    #[tokio::test]
    async fn test_reset_session_clears_after_turn() {
        let dispatcher = ToolCallDispatcher::new(None, Some(code_runner()), DispatcherConfig::default());
        let mut session = BindingSession::new();

        dispatcher
            .dispatch(
                &[
                    invocation("1", EXECUTE_CODE_TOOL, r#"{"code": "let z = 3;"}"#),
                    invocation("2", RESET_SESSION_TOOL, ""),
                ],
                &mut session,
            )
            .await;
        assert!(session.current().is_empty());
    }

    #[tokio::test]
    async fn test_definitions_include_code_tools() {
        let tools = registry(vec![MockTool::new("echo", "x")]).await;
        let dispatcher = ToolCallDispatcher::new(Some(tools), Some(code_runner()), DispatcherConfig::default());
        let names: Vec<_> = dispatcher
            .definitions()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["echo", EXECUTE_CODE_TOOL, RESET_SESSION_TOOL]);
    }
}
