//! Sandboxed code execution for the research agent.
//!
//! Snippets written by the model run in an isolated Rhai host, either in a
//! separate `sandbox-worker` process or on a dedicated thread. Each run ends in
//! exactly one [`ExecutionOutcome`], and successful runs hand back a filtered
//! [`BindingSnapshot`] that seeds the next snippet, so consecutive calls behave
//! like statements typed into one session.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Controller (dispatcher)               │
//! │    ↓ execute_code                      │
//! ├────────────────────────────────────────┤
//! │  CodeRunner                            │
//! │    ↓ ExecutionRequest                  │
//! ├───────────────────┬────────────────────┤
//! │  ProcessSandbox   │  ThreadSandbox     │
//! │   framed pipes    │   oneshot channel  │
//! │   kill on timeout │   abandon on       │
//! │                   │   timeout          │
//! ├───────────────────┴────────────────────┤
//! │  ScriptHost (Rhai engine + scope)      │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use research_agent_sandbox::{BindingSnapshot, ExecutionRequest, Sandbox, ThreadSandbox};
//!
//! let sandbox = ThreadSandbox::new();
//! let request = ExecutionRequest::new("let x = 1; print(x);", BindingSnapshot::new(), 5.0)?;
//! let outcome = sandbox.execute(request).await?;
//! println!("{}", outcome.summary_text(20_000));
//! ```

pub mod bindings;
pub mod engine;
pub mod host;
pub mod outcome;
pub mod process;
pub mod protocol;
pub mod thread;
pub mod tools;

pub use bindings::{BindingSnapshot, DropReason, FilterReport, BUILTINS_BINDING};
pub use engine::{build_sandbox, ExecutionRequest, OutputSink, Sandbox, SandboxKind};
pub use host::ScriptHost;
pub use outcome::{classify, CrashCause, ExecutionOutcome, ExitObservation, RunObservation, WorkerResult};
pub use process::{ProcessSandbox, WORKER_BINARY, WORKER_ENV};
pub use thread::ThreadSandbox;
pub use tools::{CodeRun, CodeRunner, CodeRunnerConfig, EXECUTE_CODE_TOOL};
