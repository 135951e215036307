//! Core execution engine for the snippet sandbox.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value as Json};
use tracing::Instrument;

use crate::error::Result;
use crate::interp::{Interpreter, PyException, PyResult, Unwind, Value};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::deadline::DeadlineGuard;
use crate::sandbox::io::SandboxIo;
use crate::sandbox::namespace::build_namespace;
use crate::sandbox::normalize::normalize;
use crate::sandbox::outcome::{ExecutionOutcome, ExecutionRequest};

/// Globals checked for the snippet's result, in priority order.
pub const RESULT_NAMES: &[&str] = &["result", "answer", "output", "final"];

/// A trailing line starting with one of these is never evaluated as the
/// result expression.
pub const STATEMENT_PREFIXES: &[&str] = &[
    "print", "import", "from", "def", "class", "if", "for", "while", "try", "with",
];

/// A sandboxed snippet execution environment.
///
/// Cheap to clone; every execution builds its own interpreter and namespace,
/// so one sandbox can serve any number of concurrent calls.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    config: Arc<SandboxConfig>,
}

impl PythonSandbox {
    /// Create a new sandbox with the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute a snippet on the calling thread's behalf and wait for it.
    ///
    /// Never fails: every problem with the snippet is reported as
    /// [`ExecutionOutcome::Failure`].
    pub fn execute_blocking(&self, code: &str, inputs: &Map<String, Json>) -> ExecutionOutcome {
        let span = tracing::info_span!("execute", code_len = code.len(), inputs = inputs.len());
        let _entered = span.enter();
        let guard = DeadlineGuard::arm(self.config.deadline_scope, self.config.timeout);
        self.run_with_deadline(code, inputs, guard.expires_at())
    }

    /// Execute a snippet on the tokio blocking pool.
    ///
    /// The deadline is decided by the calling context, before the work
    /// moves to the pool.
    pub async fn execute(&self, code: impl Into<String>, inputs: Map<String, Json>) -> ExecutionOutcome {
        let code = code.into();
        let span = tracing::info_span!("execute", code_len = code.len(), inputs = inputs.len());
        let guard = DeadlineGuard::arm(self.config.deadline_scope, self.config.timeout);
        let expires_at = guard.expires_at();
        let sandbox = self.clone();
        let blocking_span = span.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _entered = blocking_span.enter();
            sandbox.run_with_deadline(&code, &inputs, expires_at)
        });
        let outcome = match handle.instrument(span).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "execution task failed");
                ExecutionOutcome::failure(format!("InternalError: task failed: {}", e), None)
            }
        };
        drop(guard);
        outcome
    }

    /// Execute a parsed request.
    pub async fn run(&self, request: ExecutionRequest) -> ExecutionOutcome {
        self.execute(request.code, request.inputs).await
    }

    fn run_with_deadline(
        &self,
        code: &str,
        inputs: &Map<String, Json>,
        deadline: Option<Instant>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let config = &*self.config;
        let span = tracing::Span::current();
        let outcome = std::thread::scope(|scope| {
            let spawned = std::thread::Builder::new()
                .name("snippet".to_string())
                .stack_size(config.stack_size)
                .spawn_scoped(scope, || {
                    let _entered = span.enter();
                    run_snippet(config, code, inputs, deadline)
                });
            match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(%message, "interpreter panicked");
                    ExecutionOutcome::failure(format!("InternalError: {}", message), None)
                }),
                Err(e) => {
                    tracing::error!(error = %e, "could not start interpreter thread");
                    ExecutionOutcome::failure(
                        format!("InternalError: could not start interpreter thread: {}", e),
                        None,
                    )
                }
            }
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            ExecutionOutcome::Success { .. } => {
                tracing::info!(ok = true, elapsed_ms, deadline = deadline.is_some(), "execution finished")
            }
            ExecutionOutcome::Failure { error, .. } => {
                tracing::info!(ok = false, elapsed_ms, %error, "execution failed")
            }
        }
        outcome
    }
}

/// Run one snippet to completion on the current thread.
fn run_snippet(
    config: &SandboxConfig,
    code: &str,
    inputs: &Map<String, Json>,
    deadline: Option<Instant>,
) -> ExecutionOutcome {
    let namespace = match build_namespace(inputs) {
        Ok(ns) => ns,
        Err(unwind) => return failure(unwind, code, config.timeout),
    };
    let io = SandboxIo::new(config.max_output_bytes);
    let (stdout, stderr) = io.writers();
    let mut interp =
        Interpreter::new(config.interpreter_limits(), namespace).with_output(stdout, stderr);
    interp.set_deadline(deadline);

    let result = interp
        .run(code)
        .and_then(|()| extract_result(&mut interp, code))
        .and_then(|value| normalize(&value));
    interp.teardown();

    match result {
        Ok(result) => ExecutionOutcome::success(result, io.stdout_str(), io.stderr_str()),
        Err(unwind) => failure(unwind, code, config.timeout),
    }
}

/// Pick the snippet's result out of the post-run namespace.
///
/// The first bound name of [`RESULT_NAMES`] wins. When there is none, or it
/// is `None`, the last source line is tried as an expression; any exception
/// there leaves the result `None`.
fn extract_result(interp: &mut Interpreter, code: &str) -> PyResult<Value> {
    let bound = RESULT_NAMES.iter().find_map(|name| interp.global(name));
    if let Some(value) = bound.filter(|v| !v.is_none()) {
        return Ok(value);
    }
    let Some(line) = trailing_expression(code) else {
        return Ok(Value::None);
    };
    match interp.eval_expression(line) {
        Ok(value) => Ok(value),
        Err(Unwind::Deadline) => Err(Unwind::Deadline),
        Err(Unwind::Raise(exc)) => {
            tracing::debug!(error = %exc, "trailing line is not a result expression");
            Ok(Value::None)
        }
    }
}

/// The last line of the trimmed source, unless it is empty or starts like a
/// statement.
pub fn trailing_expression(code: &str) -> Option<&str> {
    let line = code.trim().lines().last()?.trim();
    if line.is_empty() || STATEMENT_PREFIXES.iter().any(|p| line.starts_with(p)) {
        None
    } else {
        Some(line)
    }
}

fn failure(unwind: Unwind, code: &str, timeout: Duration) -> ExecutionOutcome {
    match unwind {
        Unwind::Deadline => ExecutionOutcome::failure(timeout_message(timeout), None),
        Unwind::Raise(exc) => exception_failure(&exc, code),
    }
}

fn exception_failure(exc: &PyException, code: &str) -> ExecutionOutcome {
    ExecutionOutcome::failure(exc.summary(), Some(exc.format_traceback(code)))
}

/// `"Execution timeout (5 seconds)"`, following the configured budget.
pub fn timeout_message(timeout: Duration) -> String {
    format!("Execution timeout ({} seconds)", timeout.as_secs_f64())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "interpreter panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox() -> PythonSandbox {
        PythonSandbox::new(SandboxConfig::default()).unwrap()
    }

    fn run(code: &str) -> ExecutionOutcome {
        sandbox().execute_blocking(code, &Map::new())
    }

    #[test]
    fn test_trailing_expression() {
        assert_eq!(trailing_expression("x = 1\nx + 1\n\n"), Some("x + 1"));
        assert_eq!(trailing_expression("print(1)"), None);
        assert_eq!(trailing_expression("for i in range(3):\n    i"), Some("i"));
        assert_eq!(trailing_expression("   "), None);
        assert_eq!(trailing_expression("format_x"), None);
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(timeout_message(Duration::from_secs(5)), "Execution timeout (5 seconds)");
        assert_eq!(
            timeout_message(Duration::from_millis(250)),
            "Execution timeout (0.25 seconds)"
        );
    }

    #[test]
    fn test_result_name_priority() {
        let outcome = run("final = 3\noutput = 2\nanswer = 1");
        assert_eq!(outcome.result(), Some(&json!(1)));
    }

    #[test]
    fn test_none_result_falls_back_to_last_line() {
        let outcome = run("result = None\nx = 4\nx * 2");
        assert_eq!(outcome.result(), Some(&json!(8)));
    }

    #[test]
    fn test_failed_fallback_is_null() {
        let outcome = run("x = 1\nundefined_name");
        assert!(outcome.is_success());
        assert_eq!(outcome.result(), Some(&json!(null)));
    }

    #[test]
    fn test_runtime_error_has_traceback() {
        let outcome = run("x = 1\ny = x / 0");
        assert_eq!(outcome.error(), Some("ZeroDivisionError: division by zero"));
        let traceback = outcome.traceback().unwrap();
        assert!(traceback.contains("line 2"));
    }

    #[test]
    fn test_run_request_on_current_thread_runtime() {
        let request = ExecutionRequest::new("result = n + 1").input("n", 1);
        let outcome = tokio_test::block_on(sandbox().run(request));
        assert_eq!(outcome.result(), Some(&json!(2)));
    }

    #[test]
    fn test_timeout_has_no_traceback() {
        let sandbox = PythonSandbox::new(
            SandboxConfig::builder()
                .timeout(Duration::from_millis(100))
                .build(),
        )
        .unwrap();
        let outcome = sandbox.execute_blocking("while True:\n    pass", &Map::new());
        assert_eq!(outcome.error(), Some("Execution timeout (0.1 seconds)"));
        assert!(outcome.traceback().is_none());
    }
}
