//! Example demonstrating the deadline and the process-wide limits.
//!
//! Run with: cargo run --example resource_limits

use std::time::{Duration, Instant};

use serde_json::Map;
use snippet_sandbox::prelude::*;
use snippet_sandbox::sandbox::deadline::designate_primary_thread;
use snippet_sandbox::{install_limits, installed_limits, ResourceLimits};

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Resource Limits Example ===\n");

    println!("--- Test 1: Process limits ---");
    {
        println!("Current limits: {:?}", ResourceLimits::current()?);
        // The CPU ceiling covers the whole process, so keep it generous here.
        let limits = ResourceLimits {
            cpu_seconds: Some(60),
            ..ResourceLimits::default()
        };
        match install_limits(&limits) {
            Ok(()) => println!("Installed: {:?}", installed_limits()),
            Err(e) => println!("Could not install limits: {}", e),
        }
        if let Err(e) = install_limits(&limits) {
            println!("Second install refused: {}", e);
        }
    }
    println!();

    println!("--- Test 2: Timeout protection ---");
    {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_millis(500))
            .build();
        let sandbox = PythonSandbox::new(config)?;

        println!("Executing infinite loop with 500ms timeout...");
        let start = Instant::now();
        let outcome = sandbox.execute("while True: pass", Map::new()).await;
        println!("{:?} after {:?}", outcome.error(), start.elapsed());
    }
    println!();

    println!("--- Test 3: Interpreter ceilings ---");
    {
        let config = SandboxConfig::builder()
            .max_collection_len(10_000)
            .recursion_limit(50)
            .build();
        let sandbox = PythonSandbox::new(config)?;

        for code in [
            "x = [0] * 100000",
            "def f(n):\n    return f(n + 1)\nf(0)",
            "x = 2 ** (10 ** 9)",
        ] {
            let outcome = sandbox.execute(code, Map::new()).await;
            println!("{:<40} -> {:?}", code.replace('\n', "; "), outcome.error());
        }
    }
    println!();

    println!("--- Test 4: Primary-thread deadline scope ---");
    {
        designate_primary_thread();
        let config = SandboxConfig::builder()
            .timeout(Duration::from_millis(50))
            .deadline_scope(DeadlineScope::PrimaryThread)
            .build();
        let sandbox = PythonSandbox::new(config)?;
        let code = "while True: pass";

        let outcome = sandbox.execute_blocking(code, &Map::new());
        println!("On the primary thread: {:?}", outcome.error());

        let short = "total = 0\nfor i in range(100000):\n    total += i\nresult = total";
        let worker = std::thread::spawn(move || sandbox.execute_blocking(short, &Map::new()));
        if let Ok(outcome) = worker.join() {
            println!("Off the primary thread (no deadline): {:?}", outcome.result());
        }
    }

    Ok(())
}
