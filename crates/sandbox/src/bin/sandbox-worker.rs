//! Sandbox worker process.
//!
//! Reads one request frame from stdin, runs the snippet and answers on stdout
//! with stdout frames followed by a single result frame. Logs go to stderr;
//! stdout carries frames only.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use research_agent_core::{Error, Result};
use research_agent_sandbox::protocol::{read_frame, write_frame, Frame};
use research_agent_sandbox::{SandboxKind, ScriptHost};

/// `EX_SOFTWARE`: the worker itself failed, as opposed to the snippet.
const EXIT_INTERNAL: u8 = 70;

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RESEARCH_AGENT_WORKER_LOG").unwrap_or_else(|_| "warn".into()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Sandbox worker failed");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

fn serve() -> Result<()> {
    let request = match read_frame(&mut io::stdin().lock())? {
        Some(Frame::Request(request)) => request,
        Some(_) => return Err(Error::protocol("expected a request frame")),
        None => return Err(Error::protocol("stdin closed before a request arrived")),
    };
    tracing::debug!(
        snippet_len = request.snippet.len(),
        bindings = request.bindings.len(),
        "Request received"
    );

    let stdout = Arc::new(Mutex::new(io::stdout()));
    let out = stdout.clone();
    let result = ScriptHost::new(SandboxKind::Process).run(
        &request.snippet,
        &request.bindings,
        move |chunk| {
            let mut handle = out.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(e) = write_frame(&mut *handle, &Frame::Stdout(chunk.to_string())) {
                tracing::warn!(error = %e, "Failed to forward output");
            }
        },
    );

    let mut handle = stdout.lock().unwrap_or_else(|p| p.into_inner());
    write_frame(&mut *handle, &Frame::Result(result))?;
    handle.flush()?;
    Ok(())
}
