//! Thread sandbox: runs snippets on a dedicated OS thread inside this process.
//!
//! There is no memory isolation and a running thread cannot be stopped. On
//! timeout the caller gets its `Timeout` outcome back while the thread is
//! abandoned and keeps running until the snippet ends on its own. Snippets
//! change directory only inside their own run, so the host's working
//! directory stays put whatever threads are still alive.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::oneshot;

use research_agent_core::{Error, Result};

use crate::engine::{ExecutionRequest, OutputBuffer, OutputSink, Sandbox, SandboxKind};
use crate::host::ScriptHost;
use crate::outcome::{classify, ExecutionOutcome, ExitObservation, RunObservation};

const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

/// In-process sandbox backed by one OS thread per snippet.
#[derive(Debug, Clone)]
pub struct ThreadSandbox {
    stack_size: usize,
}

impl Default for ThreadSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSandbox {
    pub fn new() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Stack size for worker threads. Deeply recursive snippets need more.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }
}

#[async_trait]
impl Sandbox for ThreadSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Thread
    }

    async fn execute_streaming(
        &self,
        request: ExecutionRequest,
        sink: Option<OutputSink>,
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let buffer = OutputBuffer::new(sink);
        let (tx, rx) = oneshot::channel();

        let output = buffer.clone();
        let ExecutionRequest {
            snippet,
            prior_bindings,
            timeout,
        } = request;

        std::thread::Builder::new()
            .name("sandbox-snippet".into())
            .stack_size(self.stack_size)
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    ScriptHost::new(SandboxKind::Thread).run(&snippet, &prior_bindings, move |chunk| {
                        output.push(chunk)
                    })
                }));
                // The receiver is gone once the caller has timed out.
                let _ = tx.send(result.map_err(panic_message));
            })
            .map_err(|e| Error::sandbox(format!("failed to spawn sandbox thread: {}", e)))?;

        let waited = tokio::time::timeout(timeout, rx).await;
        let mut observation = RunObservation::new(String::new(), started.elapsed());
        match waited {
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Sandbox thread timed out and was abandoned"
                );
                observation.timed_out = true;
            }
            Ok(Ok(Ok(result))) => observation.result = Some(result),
            Ok(Ok(Err(message))) => observation.exit = Some(ExitObservation::Panicked(message)),
            Ok(Err(_)) => {
                observation.exit = Some(ExitObservation::Panicked(
                    "worker thread ended without reporting".to_string(),
                ))
            }
        }
        observation.stdout = buffer.snapshot();

        let outcome = classify(observation);
        tracing::info!(
            status = outcome.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox run finished"
        );
        Ok(outcome)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
