//! Example demonstrating how failures are reported.
//!
//! Snippet problems never surface as Rust errors: they come back as
//! `ExecutionOutcome::Failure`. Only configuration and limit installation
//! return `SandboxError`.
//!
//! Run with: cargo run --example error_handling

use std::time::Duration;

use serde_json::Map;
use snippet_sandbox::prelude::*;

fn report(label: &str, outcome: &ExecutionOutcome) {
    println!("--- {} ---", label);
    match outcome {
        ExecutionOutcome::Success { result, .. } => println!("Succeeded with {}", result),
        ExecutionOutcome::Failure { error, traceback } => {
            println!("Failed: {}", error);
            match traceback {
                Some(tb) => println!("Traceback has {} lines", tb.lines().count()),
                None => println!("No traceback"),
            }
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Error Handling Example ===\n");

    let sandbox = PythonSandbox::new(
        SandboxConfig::builder()
            .timeout(Duration::from_secs(1))
            .build(),
    )?;

    let cases = [
        ("ValueError", "int('not a number')"),
        ("NameError", "print(undefined_variable)"),
        ("ZeroDivisionError", "result = 1 / 0"),
        ("SyntaxError", "def broken(:\n    pass"),
        ("Refused import", "import os"),
        ("Timeout", "while True:\n    pass"),
        ("Circular result", "a = {}\na['self'] = a\nresult = a"),
    ];

    for (label, code) in cases {
        let outcome = sandbox.execute(code, Map::new()).await;
        report(label, &outcome);
    }

    println!("--- Caught inside the snippet ---");
    let code = r#"
try:
    value = int('abc')
except:
    value = -1
result = value
"#;
    let outcome = sandbox.execute(code, Map::new()).await;
    println!("result: {:?}\n", outcome.result());

    println!("--- Configuration errors ---");
    let bad = SandboxConfig::builder().timeout(Duration::ZERO).build();
    match PythonSandbox::new(bad) {
        Ok(_) => println!("Unexpectedly accepted a zero timeout"),
        Err(e) => println!("Rejected: {}", e),
    }

    match "sometimes".parse::<DeadlineScope>() {
        Ok(scope) => println!("Parsed scope {}", scope),
        Err(e) => println!("Rejected: {}", e),
    }

    Ok(())
}
