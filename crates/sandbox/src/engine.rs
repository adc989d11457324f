//! Sandbox trait and shared plumbing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use research_agent_core::config::{SandboxMode, SandboxSettings};
use research_agent_core::{Error, Result};

use crate::bindings::BindingSnapshot;
use crate::outcome::ExecutionOutcome;
use crate::process::ProcessSandbox;
use crate::thread::ThreadSandbox;

/// Receives stdout chunks while a snippet is still running.
pub type OutputSink = mpsc::UnboundedSender<String>;

/// Which isolation backend a sandbox uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    Process,
    Thread,
}

impl SandboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Thread => "thread",
        }
    }
}

impl std::fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One snippet to run, consumed by a single `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub snippet: String,
    pub prior_bindings: BindingSnapshot,
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Build a request. The timeout must be a positive, finite number of seconds.
    pub fn new(
        snippet: impl Into<String>,
        prior_bindings: BindingSnapshot,
        timeout_secs: f64,
    ) -> Result<Self> {
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(Error::invalid_request(format!(
                "timeout must be a positive number of seconds, got {}",
                timeout_secs
            )));
        }
        Ok(Self {
            snippet: snippet.into(),
            prior_bindings,
            timeout: Duration::from_secs_f64(timeout_secs),
        })
    }

    /// Cap the timeout at `max`.
    pub fn clamped(mut self, max: Duration) -> Self {
        if self.timeout > max {
            tracing::debug!(
                requested_secs = self.timeout.as_secs_f64(),
                max_secs = max.as_secs_f64(),
                "Clamping sandbox timeout"
            );
            self.timeout = max;
        }
        self
    }
}

/// Isolated executor for untrusted snippets.
///
/// `Err` is reserved for harness faults such as a missing worker binary;
/// anything the snippet itself does ends up in the returned outcome.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Isolation backend.
    fn kind(&self) -> SandboxKind;

    /// Run a snippet and wait for its outcome.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        self.execute_streaming(request, None).await
    }

    /// Run a snippet, forwarding output chunks to `sink` as they are produced.
    async fn execute_streaming(
        &self,
        request: ExecutionRequest,
        sink: Option<OutputSink>,
    ) -> Result<ExecutionOutcome>;
}

/// Build the sandbox selected by the settings.
pub fn build_sandbox(settings: &SandboxSettings) -> Result<Arc<dyn Sandbox>> {
    match settings.mode {
        SandboxMode::Process => {
            let sandbox = ProcessSandbox::locate(settings.worker_path.as_deref())?;
            tracing::info!(worker = %sandbox.worker_path().display(), "Using process sandbox");
            Ok(Arc::new(sandbox))
        }
        SandboxMode::Thread => {
            tracing::info!("Using thread sandbox");
            Ok(Arc::new(ThreadSandbox::new()))
        }
    }
}

/// Collects output for the final outcome and mirrors it to an optional sink.
#[derive(Clone, Default)]
pub(crate) struct OutputBuffer {
    text: Arc<Mutex<String>>,
    sink: Option<OutputSink>,
}

impl OutputBuffer {
    pub(crate) fn new(sink: Option<OutputSink>) -> Self {
        Self {
            text: Arc::new(Mutex::new(String::new())),
            sink,
        }
    }

    pub(crate) fn push(&self, chunk: &str) {
        self.text
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_str(chunk);
        if let Some(sink) = &self.sink {
            // A closed receiver only means nobody is watching live.
            let _ = sink.send(chunk.to_string());
        }
    }

    pub(crate) fn snapshot(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_rejects_non_positive_timeout() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = ExecutionRequest::new("1", BindingSnapshot::new(), bad).unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(_)));
        }
    }

    #[test]
    fn test_request_clamps_timeout() {
        let req = ExecutionRequest::new("1", BindingSnapshot::new(), 900.0)
            .unwrap()
            .clamped(Duration::from_secs(300));
        assert_eq!(req.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_output_buffer_mirrors_to_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let buffer = OutputBuffer::new(Some(tx));
        buffer.push("a\n");
        buffer.push("b\n");

        assert_eq!(buffer.snapshot(), "a\nb\n");
        assert_eq!(rx.try_recv().unwrap(), "a\n");
        assert_eq!(rx.try_recv().unwrap(), "b\n");
    }

    #[test]
    fn test_build_thread_sandbox() {
        let settings = SandboxSettings {
            mode: SandboxMode::Thread,
            ..Default::default()
        };
        assert_eq!(build_sandbox(&settings).unwrap().kind(), SandboxKind::Thread);
    }

    #[test]
    fn test_build_process_sandbox_with_missing_worker() {
        let settings = SandboxSettings {
            mode: SandboxMode::Process,
            worker_path: Some("/nonexistent/sandbox-worker".into()),
            ..Default::default()
        };
        let err = build_sandbox(&settings).err().unwrap();
        assert!(matches!(err, Error::WorkerUnavailable(_)));
    }
}
