//! Process sandbox: one `sandbox-worker` child per snippet.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Command;

use research_agent_core::{Error, Result};

use crate::engine::{ExecutionRequest, OutputBuffer, OutputSink, Sandbox, SandboxKind};
use crate::outcome::{classify, ExecutionOutcome, ExitObservation, RunObservation, WorkerResult};
use crate::protocol::{read_frame_async, write_frame_async, Frame, WorkerRequest};

/// Environment variable naming the worker binary.
pub const WORKER_ENV: &str = "RESEARCH_AGENT_WORKER";

/// File name of the worker binary.
pub const WORKER_BINARY: &str = "sandbox-worker";

const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs each snippet in a fresh worker process that is killed on timeout.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    worker_path: PathBuf,
    drain_grace: Duration,
}

impl ProcessSandbox {
    /// Use the given worker executable as-is.
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self {
            worker_path: worker_path.into(),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Find the worker: explicit path, then `RESEARCH_AGENT_WORKER`, then next to
    /// the current executable.
    pub fn locate(explicit: Option<&str>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::existing(PathBuf::from(path), "configured worker path");
        }
        if let Ok(path) = std::env::var(WORKER_ENV) {
            return Self::existing(PathBuf::from(path), WORKER_ENV);
        }

        let exe = std::env::current_exe()?;
        let file_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);
        let mut candidates = Vec::new();
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(&file_name));
            // Test binaries live one level down, in target/<profile>/deps.
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join(&file_name));
            }
        }

        candidates
            .into_iter()
            .find(|path| path.is_file())
            .map(Self::new)
            .ok_or_else(|| {
                Error::WorkerUnavailable(format!(
                    "{} not found next to {}; set {} or sandbox.worker_path",
                    file_name,
                    exe.display(),
                    WORKER_ENV
                ))
            })
    }

    fn existing(path: PathBuf, source: &str) -> Result<Self> {
        if path.is_file() {
            Ok(Self::new(path))
        } else {
            Err(Error::WorkerUnavailable(format!(
                "{} points at {}, which does not exist",
                source,
                path.display()
            )))
        }
    }

    /// How long to keep draining frames once the worker has exited.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Process
    }

    async fn execute_streaming(
        &self,
        request: ExecutionRequest,
        sink: Option<OutputSink>,
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let mut child = Command::new(&self.worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::WorkerUnavailable(format!(
                    "failed to spawn {}: {}",
                    self.worker_path.display(),
                    e
                ))
            })?;
        let pid = child.id();
        tracing::debug!(?pid, timeout_secs = request.timeout.as_secs_f64(), "Sandbox worker spawned");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::sandbox("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::sandbox("worker stdout was not captured"))?;

        // Read concurrently with the wait so a full pipe never stalls the worker.
        let buffer = OutputBuffer::new(sink);
        let mut reader = tokio::spawn(read_worker_frames(stdout, buffer.clone()));

        let frame = Frame::Request(WorkerRequest {
            snippet: request.snippet,
            bindings: request.prior_bindings,
        });
        let worker = &mut child;
        let waited = tokio::time::timeout(request.timeout, async move {
            if let Err(e) = write_frame_async(&mut stdin, &frame).await {
                tracing::warn!(?pid, error = %e, "Failed to hand request to sandbox worker");
            }
            drop(stdin);
            worker.wait().await
        })
        .await;

        let mut observation = RunObservation::new(String::new(), started.elapsed());
        match waited {
            Ok(Ok(status)) => {
                observation.exit = Some(exit_observation(status));
            }
            Ok(Err(e)) => {
                reader.abort();
                return Err(Error::sandbox(format!("failed to wait for worker: {}", e)));
            }
            Err(_) => {
                observation.timed_out = true;
                tracing::warn!(?pid, elapsed_secs = observation.elapsed.as_secs_f64(), "Sandbox worker timed out, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(?pid, error = %e, "Failed to kill sandbox worker");
                }
                if let Ok(status) = child.wait().await {
                    observation.exit = Some(exit_observation(status));
                }
            }
        }

        match tokio::time::timeout(self.drain_grace, &mut reader).await {
            Ok(Ok(harvest)) => {
                observation.result = harvest.result;
                observation.protocol_error = harvest.protocol_error;
            }
            Ok(Err(join_err)) => {
                observation.protocol_error = Some(format!("frame reader failed: {}", join_err));
            }
            Err(_) => {
                tracing::warn!(?pid, "Worker output not drained within grace period");
                reader.abort();
            }
        }
        observation.stdout = buffer.snapshot();

        let outcome = classify(observation);
        tracing::info!(
            ?pid,
            status = outcome.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox run finished"
        );
        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct FrameHarvest {
    result: Option<WorkerResult>,
    protocol_error: Option<String>,
}

async fn read_worker_frames<R: AsyncRead + Unpin>(mut stdout: R, buffer: OutputBuffer) -> FrameHarvest {
    let mut harvest = FrameHarvest::default();
    loop {
        match read_frame_async(&mut stdout).await {
            Ok(Some(Frame::Stdout(chunk))) => buffer.push(&chunk),
            Ok(Some(Frame::Result(result))) => {
                if harvest.result.is_some() {
                    tracing::warn!("Worker sent more than one result frame, keeping the first");
                } else {
                    harvest.result = Some(result);
                }
            }
            Ok(Some(Frame::Request(_))) => {
                harvest.protocol_error = Some("worker sent a request frame".to_string());
                break;
            }
            Ok(None) => break,
            Err(e) => {
                harvest.protocol_error = Some(e.to_string());
                break;
            }
        }
    }
    harvest
}

#[cfg(unix)]
fn exit_observation(status: ExitStatus) -> ExitObservation {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitObservation::Code(code),
        (None, Some(sig)) => ExitObservation::Signal(sig),
        (None, None) => ExitObservation::Code(-1),
    }
}

#[cfg(not(unix))]
fn exit_observation(status: ExitStatus) -> ExitObservation {
    ExitObservation::Code(status.code().unwrap_or(-1))
}
