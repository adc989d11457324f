//! The `execute_code` tool.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use research_agent_core::config::SandboxSettings;
use research_agent_core::{Error, Result, ToolDefinition};

use crate::bindings::BindingSnapshot;
use crate::engine::{build_sandbox, ExecutionRequest, OutputSink, Sandbox, SandboxKind};
use crate::outcome::ExecutionOutcome;

/// Name under which code execution is advertised to the model.
pub const EXECUTE_CODE_TOOL: &str = "execute_code";

/// Limits applied to every code run.
#[derive(Debug, Clone)]
pub struct CodeRunnerConfig {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub max_output_chars: usize,
}

impl Default for CodeRunnerConfig {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

impl From<&SandboxSettings> for CodeRunnerConfig {
    fn from(settings: &SandboxSettings) -> Self {
        let secs = |v: f64, fallback: f64| {
            if v.is_finite() && v > 0.0 {
                Duration::from_secs_f64(v)
            } else {
                Duration::from_secs_f64(fallback)
            }
        };
        Self {
            default_timeout: secs(settings.default_timeout_secs, 30.0),
            max_timeout: secs(settings.max_timeout_secs, 300.0),
            max_output_chars: settings.max_output_chars,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodeArgs {
    code: String,
    #[serde(default)]
    timeout_secs: Option<f64>,
}

/// Outcome of one `execute_code` invocation plus the brief fed back to the model.
#[derive(Debug, Clone)]
pub struct CodeRun {
    pub outcome: ExecutionOutcome,
    pub summary: String,
}

/// Runs `execute_code` invocations on a sandbox.
#[derive(Clone)]
pub struct CodeRunner {
    sandbox: Arc<dyn Sandbox>,
    config: CodeRunnerConfig,
}

impl CodeRunner {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: CodeRunnerConfig) -> Self {
        Self { sandbox, config }
    }

    /// Build the sandbox and limits described by the settings.
    pub fn from_settings(settings: &SandboxSettings) -> Result<Self> {
        Ok(Self::new(build_sandbox(settings)?, CodeRunnerConfig::from(settings)))
    }

    pub fn sandbox_kind(&self) -> SandboxKind {
        self.sandbox.kind()
    }

    pub fn config(&self) -> &CodeRunnerConfig {
        &self.config
    }

    /// Tool definition advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: EXECUTE_CODE_TOOL.to_string(),
            description: format!(
                "Run a Rhai script in an isolated {} sandbox. Variables defined at top level \
                 persist into later calls. Use print() for output.",
                self.sandbox.kind()
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Script to run"
                    },
                    "timeout_secs": {
                        "type": "number",
                        "description": format!(
                            "Wall-clock limit in seconds (default {}, max {})",
                            self.config.default_timeout.as_secs_f64(),
                            self.config.max_timeout.as_secs_f64()
                        )
                    }
                },
                "required": ["code"]
            }),
        }
    }

    /// Validate tool arguments and build the request.
    pub fn prepare(&self, args: &Value, bindings: BindingSnapshot) -> Result<ExecutionRequest> {
        let args: CodeArgs = serde_json::from_value(args.clone())
            .map_err(|e| Error::invalid_request(format!("invalid execute_code arguments: {}", e)))?;
        let timeout_secs = args
            .timeout_secs
            .unwrap_or_else(|| self.config.default_timeout.as_secs_f64());
        Ok(ExecutionRequest::new(args.code, bindings, timeout_secs)?.clamped(self.config.max_timeout))
    }

    /// Run one invocation.
    pub async fn run(&self, args: &Value, bindings: BindingSnapshot) -> Result<CodeRun> {
        self.run_streaming(args, bindings, None).await
    }

    /// Run one invocation, streaming output to `sink` while it runs.
    pub async fn run_streaming(
        &self,
        args: &Value,
        bindings: BindingSnapshot,
        sink: Option<OutputSink>,
    ) -> Result<CodeRun> {
        let request = self.prepare(args, bindings)?;
        let outcome = self.sandbox.execute_streaming(request, sink).await?;
        let summary = outcome.summary_text(self.config.max_output_chars);
        Ok(CodeRun { outcome, summary })
    }
}
