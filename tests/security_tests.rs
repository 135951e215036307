//! Security tests to verify sandbox isolation.
//!
//! These tests attempt various escape techniques to verify the sandbox
//! properly restricts access to the host system.

use std::time::Duration;

use serde_json::Map;
use snippet_sandbox::prelude::*;
use snippet_sandbox::sandbox::io::TRUNCATION_MARKER;

/// Helper to create a test sandbox config.
fn test_config() -> SandboxConfig {
    SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .build()
}

async fn run(code: &str) -> ExecutionOutcome {
    let sandbox = PythonSandbox::new(test_config()).unwrap();
    sandbox.execute(code, Map::new()).await
}

fn error_of(outcome: &ExecutionOutcome) -> &str {
    outcome
        .error()
        .unwrap_or_else(|| panic!("expected a failure, got {:?}", outcome))
}

/// Test that infinite loops are properly terminated.
#[tokio::test]
async fn test_infinite_loop_timeout() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(500))
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let started = std::time::Instant::now();
    let outcome = sandbox.execute("while True: pass", Map::new()).await;

    assert_eq!(error_of(&outcome), "Execution timeout (0.5 seconds)");
    assert!(outcome.traceback().is_none());
    assert!(started.elapsed() < Duration::from_secs(3));
}

/// Test that a bare `except:` cannot swallow the deadline.
#[tokio::test]
async fn test_deadline_not_catchable() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(300))
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let code = "try:\n    while True:\n        pass\nexcept:\n    result = 'caught'\n";
    let outcome = sandbox.execute(code, Map::new()).await;

    assert!(error_of(&outcome).starts_with("Execution timeout"));
}

/// Test that filesystem access is blocked.
#[tokio::test]
async fn test_filesystem_access_blocked() {
    let outcome = run("data = open('/etc/passwd').read()").await;
    assert_eq!(error_of(&outcome), "NameError: name 'open' is not defined");

    // `with` is not part of the language subset at all.
    let outcome = run("with open('/etc/passwd') as f:\n    print(f.read())").await;
    assert!(error_of(&outcome).starts_with("SyntaxError"));
}

/// Test that imports of any module are refused.
#[tokio::test]
async fn test_imports_blocked() {
    for code in ["import os", "import subprocess", "from socket import socket", "import math"] {
        let outcome = run(code).await;
        assert_eq!(error_of(&outcome), "ImportError: __import__ not found", "{}", code);
    }
}

/// Test that a failed import can be observed but not worked around.
#[tokio::test]
async fn test_import_failure_is_catchable() {
    let code = "try:\n    import subprocess\n    status = 'SECURITY_BREACH'\nexcept:\n    status = 'BLOCKED'\nresult = status\n";
    let outcome = run(code).await;
    assert_eq!(outcome.result(), Some(&serde_json::json!("BLOCKED")));
}

/// Test that the usual escape primitives are not in the namespace.
#[tokio::test]
async fn test_escape_primitives_absent() {
    for name in ["__import__", "eval", "exec", "compile", "getattr", "globals", "vars", "open"] {
        let outcome = run(&format!("x = {}", name)).await;
        assert_eq!(
            error_of(&outcome),
            format!("NameError: name '{}' is not defined", name)
        );
    }
}

/// Test that dunder attribute walks do not reach interpreter internals.
#[tokio::test]
async fn test_dunder_attributes_blocked() {
    for code in [
        "x = ().__class__",
        "x = [].__class__.__bases__",
        "x = len.__globals__",
        "x = math.__dict__",
    ] {
        let outcome = run(code).await;
        assert!(
            error_of(&outcome).starts_with("AttributeError"),
            "{} -> {:?}",
            code,
            outcome
        );
    }
}

/// Test that exception classes cannot be named to catch things.
#[tokio::test]
async fn test_exception_classes_not_exposed() {
    let outcome = run("try:\n    1 / 0\nexcept ZeroDivisionError:\n    pass\n").await;
    assert_eq!(
        error_of(&outcome),
        "NameError: name 'ZeroDivisionError' is not defined"
    );
}

/// Test memory exhaustion protection.
#[tokio::test]
async fn test_memory_exhaustion_protection() {
    for code in ["x = [0] * (10 ** 9)", "x = 'a' * (10 ** 9)", "x = list(range(10 ** 9))"] {
        let outcome = run(code).await;
        assert!(
            error_of(&outcome).starts_with("MemoryError"),
            "{} -> {:?}",
            code,
            outcome
        );
    }
}

/// Re-run one test of this binary in a child process with `CHILD_ENV` set.
#[cfg(target_os = "linux")]
fn run_in_child(test_name: &str) -> std::process::ExitStatus {
    std::process::Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test_name, "--test-threads=1", "--nocapture"])
        .env(CHILD_ENV, "1")
        .status()
        .unwrap()
}

#[cfg(target_os = "linux")]
const CHILD_ENV: &str = "SNIPPET_SANDBOX_LIMITED_CHILD";

/// Test that the collection guards hold under the default address-space
/// ceiling: oversized allocations become `MemoryError` and the process
/// keeps serving.
#[cfg(target_os = "linux")]
#[test]
fn test_memory_guards_under_process_limits() {
    if std::env::var_os(CHILD_ENV).is_none() {
        let status = run_in_child("test_memory_guards_under_process_limits");
        assert!(status.success(), "limited child failed: {:?}", status);
        return;
    }

    use snippet_sandbox::{install_limits, ResourceLimits};
    install_limits(&ResourceLimits {
        cpu_seconds: None,
        ..ResourceLimits::default()
    })
    .unwrap();

    let sandbox = PythonSandbox::new(test_config()).unwrap();
    let cap = sandbox.config().max_collection_len;

    let at_cap = sandbox.execute_blocking(&format!("result = len([0] * {})", cap), &Map::new());
    assert_eq!(at_cap.result(), Some(&serde_json::json!(cap)));

    for code in [
        format!("x = [0] * {}", cap + 1),
        format!("x = [[0] * {} for i in range(40)]", cap),
        format!("x = [np.zeros({}) for i in range(400)]", cap),
        "x = 'a' * (10 ** 9)".to_string(),
    ] {
        let outcome = sandbox.execute_blocking(&code, &Map::new());
        assert!(
            error_of(&outcome).starts_with("MemoryError"),
            "{} -> {:?}",
            code,
            outcome
        );
    }

    let after = sandbox.execute_blocking("result = 1", &Map::new());
    assert_eq!(after.result(), Some(&serde_json::json!(1)));
}

/// Test that huge integers are refused before they are computed.
#[tokio::test]
async fn test_integer_bomb() {
    let outcome = run("x = 2 ** (10 ** 9)").await;
    assert_eq!(error_of(&outcome), "OverflowError: integer result too large");

    let outcome = run("x = str(10 ** 5000)").await;
    assert!(error_of(&outcome).starts_with("ValueError: Exceeds the limit"));
}

/// Test that runaway recursion fails cleanly.
#[tokio::test]
async fn test_recursion_limit() {
    let outcome = run("def f(n):\n    return f(n + 1)\nf(0)\n").await;
    assert_eq!(
        error_of(&outcome),
        "RecursionError: maximum recursion depth exceeded"
    );
    assert!(outcome.traceback().unwrap().contains("in f"));
}

/// Test that output flooding is capped.
#[tokio::test]
async fn test_output_flood_truncated() {
    let config = SandboxConfig::builder().max_output_bytes(1024).build();
    let sandbox = PythonSandbox::new(config).unwrap();

    let outcome = sandbox
        .execute("for i in range(5000):\n    print('x' * 100)\nresult = 1", Map::new())
        .await;

    let stdout = outcome.stdout().unwrap();
    assert!(stdout.ends_with(TRUNCATION_MARKER));
    assert!(stdout.len() <= 1024 + TRUNCATION_MARKER.len());
    assert_eq!(outcome.result(), Some(&serde_json::json!(1)));
}

/// Test that executions share no state.
#[tokio::test]
async fn test_no_state_between_runs() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();
    let first = sandbox.execute("leak = 42\nresult = leak", Map::new()).await;
    assert_eq!(first.result(), Some(&serde_json::json!(42)));

    let second = sandbox.execute("result = leak", Map::new()).await;
    assert_eq!(error_of(&second), "NameError: name 'leak' is not defined");
}

/// Test that snippets cannot rebind modules for later runs.
#[tokio::test]
async fn test_module_mutation_does_not_persist() {
    let sandbox = PythonSandbox::new(test_config()).unwrap();
    let first = sandbox.execute("math.pi = 3\nresult = math.pi", Map::new()).await;
    assert!(!first.is_success() || first.result() == Some(&serde_json::json!(3)));

    let second = sandbox.execute("result = math.pi", Map::new()).await;
    assert_eq!(second.result(), Some(&serde_json::json!(std::f64::consts::PI)));
}
