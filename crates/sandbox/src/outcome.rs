//! Execution outcome model and classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bindings::BindingSnapshot;

// =============================================================================
// Outcome
// =============================================================================

/// How one sandboxed run ended. Exactly one variant is ever produced per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The snippet completed without raising.
    Success {
        stdout: String,
        bindings_after: BindingSnapshot,
    },
    /// The snippet raised an error.
    Failure {
        stdout: String,
        exception_type: String,
        exception_value: String,
        trace_text: String,
    },
    /// The wait budget elapsed before the worker finished.
    Timeout { stdout: String, elapsed_seconds: f64 },
    /// The worker ended without ever reporting a result.
    Crashed {
        stdout: String,
        exit_code: Option<i32>,
        cause: CrashCause,
    },
}

/// Why a worker ended without reporting a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CrashCause {
    /// Terminated by a signal.
    Signal(i32),
    /// Exited with a non-zero code.
    ExitCode(i32),
    /// Exited cleanly, but the result frame never arrived.
    ResultLost,
    /// The worker thread panicked.
    Panicked(String),
    /// The worker wrote a malformed frame stream.
    ProtocolViolation(String),
}

impl std::fmt::Display for CrashCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal(sig) => write!(f, "killed by signal {}", sig),
            Self::ExitCode(code) => write!(f, "exited with code {}", code),
            Self::ResultLost => write!(f, "exited cleanly but its result was lost"),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl ExecutionOutcome {
    /// Everything the snippet printed.
    pub fn stdout(&self) -> &str {
        match self {
            Self::Success { stdout, .. }
            | Self::Failure { stdout, .. }
            | Self::Timeout { stdout, .. }
            | Self::Crashed { stdout, .. } => stdout,
        }
    }

    /// Short status tag.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Timeout { .. } => "timeout",
            Self::Crashed { .. } => "crashed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Bindings harvested by a successful run.
    pub fn bindings_after(&self) -> Option<&BindingSnapshot> {
        match self {
            Self::Success { bindings_after, .. } => Some(bindings_after),
            _ => None,
        }
    }

    /// Render the brief handed back to the calling agent.
    ///
    /// Output longer than `max_chars` characters keeps its tail, since the end
    /// of a long run is usually where the interesting lines are.
    pub fn summary_text(&self, max_chars: usize) -> String {
        let mut text = String::new();
        let stdout = self.stdout();
        if stdout.is_empty() {
            text.push_str("[no output]\n");
        } else {
            text.push_str(&truncate_front(stdout, max_chars));
            if !text.ends_with('\n') {
                text.push('\n');
            }
        }

        match self {
            Self::Success { bindings_after, .. } => {
                if bindings_after.is_empty() {
                    text.push_str("Execution succeeded.");
                } else {
                    text.push_str(&format!(
                        "Execution succeeded. Session bindings: {}.",
                        bindings_after.names().join(", ")
                    ));
                }
            }
            Self::Failure {
                exception_type,
                exception_value,
                trace_text,
                ..
            } => {
                text.push_str(&format!(
                    "Execution failed with {}: {}\n{}",
                    exception_type, exception_value, trace_text
                ));
            }
            Self::Timeout {
                elapsed_seconds, ..
            } => {
                text.push_str(&format!(
                    "Execution timed out after {:.1}s. The run was abandoned and no bindings were kept; \
                     retry with a larger timeout or a smaller snippet.",
                    elapsed_seconds
                ));
            }
            Self::Crashed { cause, .. } => {
                text.push_str(&format!(
                    "Execution crashed: the worker {} before reporting a result.",
                    cause
                ));
            }
        }
        text
    }
}

fn truncate_front(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let skipped = total - max_chars;
    let tail: String = text.chars().skip(skipped).collect();
    format!("[... {} earlier characters truncated ...]\n{}", skipped, tail)
}

// =============================================================================
// Worker side
// =============================================================================

/// Structured result a worker reports for a run it completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResult {
    Success {
        bindings: BindingSnapshot,
    },
    Failure {
        exception_type: String,
        exception_value: String,
        trace_text: String,
    },
}

// =============================================================================
// Classification
// =============================================================================

/// How the worker itself ended, as seen by the orchestrating side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitObservation {
    /// Process exit code.
    Code(i32),
    /// Terminating signal.
    Signal(i32),
    /// Worker thread panic message.
    Panicked(String),
}

/// Everything the orchestrating side knows once its bounded wait is over.
#[derive(Debug, Clone)]
pub struct RunObservation {
    /// Output collected so far.
    pub stdout: String,
    /// Whether the wait budget elapsed while the worker was still running.
    pub timed_out: bool,
    /// Wall-clock time spent waiting.
    pub elapsed: Duration,
    /// Result frame, if one was received.
    pub result: Option<WorkerResult>,
    /// Malformed frame stream, if any.
    pub protocol_error: Option<String>,
    /// Worker exit, if it ended.
    pub exit: Option<ExitObservation>,
}

impl RunObservation {
    /// Observation with nothing recorded yet.
    pub fn new(stdout: String, elapsed: Duration) -> Self {
        Self {
            stdout,
            timed_out: false,
            elapsed,
            result: None,
            protocol_error: None,
            exit: None,
        }
    }
}

/// Turn an observation into exactly one outcome.
///
/// Order matters: a timeout wins over a late result, and only a worker that
/// ended without any result is considered crashed.
pub fn classify(observation: RunObservation) -> ExecutionOutcome {
    let RunObservation {
        stdout,
        timed_out,
        elapsed,
        result,
        protocol_error,
        exit,
    } = observation;

    if timed_out {
        return ExecutionOutcome::Timeout {
            stdout,
            elapsed_seconds: elapsed.as_secs_f64(),
        };
    }

    match result {
        Some(WorkerResult::Success { bindings }) => {
            // Re-filter on this side of the boundary too; the worker is untrusted.
            let (bindings_after, _) = bindings.refilter();
            ExecutionOutcome::Success {
                stdout,
                bindings_after,
            }
        }
        Some(WorkerResult::Failure {
            exception_type,
            exception_value,
            trace_text,
        }) => ExecutionOutcome::Failure {
            stdout,
            exception_type,
            exception_value,
            trace_text,
        },
        None => {
            let exit_code = match exit {
                Some(ExitObservation::Code(code)) => Some(code),
                _ => None,
            };
            let cause = match (protocol_error, exit) {
                (Some(msg), _) => CrashCause::ProtocolViolation(msg),
                (None, Some(ExitObservation::Code(0))) => CrashCause::ResultLost,
                (None, Some(ExitObservation::Code(code))) => CrashCause::ExitCode(code),
                (None, Some(ExitObservation::Signal(sig))) => CrashCause::Signal(sig),
                (None, Some(ExitObservation::Panicked(msg))) => CrashCause::Panicked(msg),
                (None, None) => CrashCause::ResultLost,
            };
            ExecutionOutcome::Crashed {
                stdout,
                exit_code,
                cause,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(result: Option<WorkerResult>) -> RunObservation {
        let mut obs = RunObservation::new("partial\n".into(), Duration::from_millis(1500));
        obs.result = result;
        obs.exit = Some(ExitObservation::Code(0));
        obs
    }

    fn failure() -> WorkerResult {
        WorkerResult::Failure {
            exception_type: "DivisionByZero".into(),
            exception_value: "Division by zero: 1 / 0".into(),
            trace_text: "DivisionByZero: Division by zero: 1 / 0".into(),
        }
    }

    #[test]
    fn test_timeout_wins_over_late_result() {
        let mut obs = observed(Some(WorkerResult::Success {
            bindings: BindingSnapshot::new(),
        }));
        obs.timed_out = true;

        match classify(obs) {
            ExecutionOutcome::Timeout {
                stdout,
                elapsed_seconds,
            } => {
                assert_eq!(stdout, "partial\n");
                assert!((elapsed_seconds - 1.5).abs() < 1e-9);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_result_tag_is_used() {
        assert!(classify(observed(Some(WorkerResult::Success {
            bindings: BindingSnapshot::new()
        })))
        .is_success());

        match classify(observed(Some(failure()))) {
            ExecutionOutcome::Failure { exception_type, .. } => {
                assert_eq!(exception_type, "DivisionByZero")
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_result_wins_over_nonzero_exit() {
        let mut obs = observed(Some(failure()));
        obs.exit = Some(ExitObservation::Code(3));
        assert_eq!(classify(obs).status(), "failure");
    }

    #[test]
    fn test_crash_causes() {
        let cases = vec![
            (Some(ExitObservation::Code(0)), None, CrashCause::ResultLost, Some(0)),
            (Some(ExitObservation::Code(2)), None, CrashCause::ExitCode(2), Some(2)),
            (Some(ExitObservation::Signal(9)), None, CrashCause::Signal(9), None),
            (
                Some(ExitObservation::Panicked("boom".into())),
                None,
                CrashCause::Panicked("boom".into()),
                None,
            ),
            (
                Some(ExitObservation::Code(0)),
                Some("unknown frame tag 0x09".to_string()),
                CrashCause::ProtocolViolation("unknown frame tag 0x09".into()),
                Some(0),
            ),
        ];

        for (exit, protocol_error, expected_cause, expected_code) in cases {
            let mut obs = observed(None);
            obs.exit = exit;
            obs.protocol_error = protocol_error;
            match classify(obs) {
                ExecutionOutcome::Crashed {
                    cause, exit_code, ..
                } => {
                    assert_eq!(cause, expected_cause);
                    assert_eq!(exit_code, expected_code);
                }
                other => panic!("expected crash, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_summary_mentions_status() {
        let timeout = ExecutionOutcome::Timeout {
            stdout: String::new(),
            elapsed_seconds: 1.0,
        };
        let summary = timeout.summary_text(100);
        assert!(summary.starts_with("[no output]"));
        assert!(summary.contains("timed out after 1.0s"));

        let crash = ExecutionOutcome::Crashed {
            stdout: "half".into(),
            exit_code: Some(139),
            cause: CrashCause::ExitCode(139),
        };
        assert!(crash.summary_text(100).contains("exited with code 139"));
    }

    #[test]
    fn test_summary_truncates_from_front() {
        let outcome = ExecutionOutcome::Success {
            stdout: "abcdefghij".into(),
            bindings_after: BindingSnapshot::new(),
        };
        let summary = outcome.summary_text(4);
        assert!(summary.starts_with("[... 6 earlier characters truncated ...]\nghij\n"));
        assert!(summary.ends_with("Execution succeeded."));
    }

    #[test]
    fn test_worker_result_wire_format() {
        let json = serde_json::to_value(failure()).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["exception_type"], "DivisionByZero");

        let success: WorkerResult =
            serde_json::from_str(r#"{"status":"success","bindings":{"x":1}}"#).unwrap();
        match success {
            WorkerResult::Success { bindings } => assert_eq!(bindings.names(), vec!["x"]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
