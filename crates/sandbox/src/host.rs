//! Embedded script host.
//!
//! Builds a fresh Rhai engine per run, seeds its scope from a binding snapshot,
//! routes `print`/`debug` into a caller-supplied output callback and turns the
//! run into a [`WorkerResult`]. `cwd()`/`chdir()` work on a directory private
//! to the run, so concurrent or abandoned runs never move the host process.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope, FLOAT, INT};

use crate::bindings::{BindingSnapshot, BUILTINS_BINDING};
use crate::engine::SandboxKind;
use crate::outcome::WorkerResult;

type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Runs one snippet against a binding environment.
#[derive(Debug, Clone, Copy)]
pub struct ScriptHost {
    kind: SandboxKind,
}

impl ScriptHost {
    pub fn new(kind: SandboxKind) -> Self {
        Self { kind }
    }

    /// Evaluate `snippet` with `bindings` in scope.
    ///
    /// Every printed line is handed to `on_output` as soon as it is produced.
    /// Blocks the calling thread for the whole run.
    pub fn run<F>(&self, snippet: &str, bindings: &BindingSnapshot, on_output: F) -> WorkerResult
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let output: OutputFn = Arc::new(on_output);
        let engine = self.build_engine(output);

        let mut scope = Scope::new();
        scope.push_constant_dynamic(BUILTINS_BINDING, self.builtins());
        for (name, value) in bindings.iter() {
            scope.push_dynamic(name.to_string(), value.clone());
        }

        let status = engine.run_with_scope(&mut scope, snippet);
        match status {
            Ok(()) => harvest(&scope),
            Err(err) => match *err {
                EvalAltResult::Exit(..) => harvest(&scope),
                err => describe_error(&err),
            },
        }
    }

    fn build_engine(&self, output: OutputFn) -> Engine {
        let mut engine = Engine::new();

        let out = output.clone();
        engine.on_print(move |text| out(&format!("{}\n", text)));
        let out = output;
        engine.on_debug(move |text, _source, _pos| out(&format!("{}\n", text)));

        engine.register_fn("sleep", |secs: INT| {
            std::thread::sleep(Duration::from_secs(secs.max(0) as u64))
        });
        engine.register_fn("sleep", |secs: FLOAT| {
            if secs > 0.0 {
                // NaN fails the comparison; oversized values saturate.
                std::thread::sleep(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
            }
        });

        // Each run has its own working directory; the process-wide one is never touched.
        let workdir = Arc::new(Mutex::new(
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        ));
        let dir = workdir.clone();
        engine.register_fn("cwd", move || -> String {
            lock(&dir).display().to_string()
        });
        let dir = workdir;
        engine.register_fn("chdir", move |path: &str| -> Result<(), Box<EvalAltResult>> {
            let mut current = lock(&dir);
            let target = current
                .join(path)
                .canonicalize()
                .map_err(|e| format!("chdir {}: {}", path, e))?;
            if !target.is_dir() {
                return Err(format!("chdir {}: not a directory", path).into());
            }
            *current = target;
            Ok(())
        });
        engine.register_fn("env", |name: &str| -> Dynamic {
            std::env::var(name).map(Dynamic::from).unwrap_or(Dynamic::UNIT)
        });

        let started = Instant::now();
        engine.register_fn("elapsed", move || -> FLOAT { started.elapsed().as_secs_f64() as FLOAT });

        engine
    }

    fn builtins(&self) -> Dynamic {
        let mut map = Map::new();
        map.insert("sandbox".into(), Dynamic::from(self.kind.as_str().to_string()));
        map.insert("host".into(), Dynamic::from("rhai".to_string()));
        map.insert(
            "version".into(),
            Dynamic::from(env!("CARGO_PKG_VERSION").to_string()),
        );
        Dynamic::from_map(map)
    }
}

fn lock(dir: &Mutex<PathBuf>) -> MutexGuard<'_, PathBuf> {
    dir.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn harvest(scope: &Scope) -> WorkerResult {
    let (bindings, _) = BindingSnapshot::filter(
        scope
            .iter()
            .map(|(name, _is_constant, value)| (name.to_string(), value)),
    );
    WorkerResult::Success { bindings }
}

// =============================================================================
// Error classification
// =============================================================================

fn describe_error(err: &EvalAltResult) -> WorkerResult {
    let mut chain = Vec::new();
    let mut cause = err;
    loop {
        match cause {
            EvalAltResult::ErrorInFunctionCall(name, _source, inner, pos) => {
                chain.push(format!("in call to function '{}'{}", name, at(*pos)));
                cause = &**inner;
            }
            EvalAltResult::ErrorInModule(path, inner, pos) => {
                chain.push(format!("in module '{}'{}", path, at(*pos)));
                cause = &**inner;
            }
            _ => break,
        }
    }

    let (exception_type, exception_value) = exception_of(cause);

    let mut trace_text = String::from("Traceback (outermost first):\n");
    for frame in &chain {
        trace_text.push_str("  ");
        trace_text.push_str(frame);
        trace_text.push('\n');
    }
    trace_text.push_str(&format!(
        "{}: {}{}",
        exception_type,
        exception_value,
        at(cause.position())
    ));

    WorkerResult::Failure {
        exception_type,
        exception_value,
        trace_text,
    }
}

fn exception_of(cause: &EvalAltResult) -> (String, String) {
    let name = match cause {
        EvalAltResult::ErrorArithmetic(msg, _) => {
            if msg.to_lowercase().contains("division by zero") {
                "DivisionByZero"
            } else {
                "ArithmeticError"
            }
        }
        EvalAltResult::ErrorParsing(..) => "SyntaxError",
        EvalAltResult::ErrorVariableNotFound(..) => "VariableNotFound",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorPropertyNotFound(..) => "PropertyNotFound",
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => "IndexError",
        EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..)
        | EvalAltResult::ErrorIndexingType(..)
        | EvalAltResult::ErrorFor(..) => "TypeMismatch",
        EvalAltResult::ErrorTooManyOperations(..)
        | EvalAltResult::ErrorTooManyModules(..)
        | EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorDataTooLarge(..) => "ResourceLimit",
        EvalAltResult::ErrorAssignmentToConstant(..) => "AssignmentToConstant",
        EvalAltResult::ErrorRuntime(value, _) => return thrown(value),
        _ => "ScriptError",
    };
    (name.to_string(), message_of(cause))
}

/// A thrown map may name its own error type: `throw #{type: "NotFound", message: "..."}`.
fn thrown(value: &Dynamic) -> (String, String) {
    if let Some(map) = value.clone().try_cast::<Map>() {
        let field = |key: &str| {
            map.get(key)
                .and_then(|v| v.clone().into_string().ok())
                .filter(|s| !s.is_empty())
        };
        if let Some(name) = field("type") {
            let message = field("message").unwrap_or_else(|| value.to_string());
            return (name, message);
        }
    }
    ("RuntimeError".to_string(), value.to_string())
}

/// Error message without its trailing position.
fn message_of(cause: &EvalAltResult) -> String {
    let full = cause.to_string();
    let suffix = at(cause.position());
    match full.strip_suffix(&suffix) {
        Some(stripped) if !suffix.is_empty() => stripped.to_string(),
        _ => full,
    }
}

fn at(pos: Position) -> String {
    if pos.is_none() {
        String::new()
    } else {
        format!(" ({})", pos)
    }
}
