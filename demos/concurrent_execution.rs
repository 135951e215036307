//! Example of running many snippets concurrently from one sandbox.
//!
//! Every execution builds its own interpreter, so a single cloned
//! `PythonSandbox` can serve any number of tasks.
//!
//! Run with: cargo run --example concurrent_execution

use std::time::{Duration, Instant};

use snippet_sandbox::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Concurrent Execution Example ===\n");

    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(10))
        .build();
    let sandbox = PythonSandbox::new(config)?;

    let tasks = vec![
        ("Task 1", "result = sum([i**2 for i in range(100)])", "Sum of squares"),
        (
            "Task 2",
            "result = len([x for x in range(1000) if x % 3 == 0])",
            "Count divisible by 3",
        ),
        (
            "Task 3",
            "result = ''.join([chr(65 + i % 26) for i in range(50)])",
            "Generate letters",
        ),
        (
            "Task 4",
            "result = max([i * (100 - i) for i in range(101)])",
            "Maximum product",
        ),
        ("Task 5", "result = np.linalg.inv(np.array([[4.0, 7.0], [2.0, 6.0]]))", "Matrix inverse"),
        ("Task 6", "result = sympy.primerange(1, 60)", "Primes below 60"),
    ];

    println!("Starting {} concurrent tasks...\n", tasks.len());
    let start = Instant::now();

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|(name, code, description)| {
            let sandbox = sandbox.clone();
            tokio::spawn(async move {
                let task_start = Instant::now();
                let outcome = sandbox.run(ExecutionRequest::new(code)).await;
                (name, description, outcome, task_start.elapsed())
            })
        })
        .collect();

    for handle in handles {
        match handle.await {
            Ok((name, description, outcome, elapsed)) => match outcome.result() {
                Some(result) => println!("{} ({}): {} [{:?}]", name, description, result, elapsed),
                None => println!("{} ({}) failed: {:?}", name, description, outcome.error()),
            },
            Err(e) => eprintln!("Task panicked: {}", e),
        }
    }

    println!("\nAll tasks completed in {:?}", start.elapsed());

    println!("\n=== Parameterized batch ===\n");
    let start = Instant::now();
    let handles: Vec<_> = (1..=10u64)
        .map(|n| {
            let sandbox = sandbox.clone();
            tokio::spawn(async move {
                let request = ExecutionRequest::new("result = math.factorial(n)").input("n", n);
                (n, sandbox.run(request).await)
            })
        })
        .collect();

    for handle in handles {
        if let Ok((n, outcome)) = handle.await {
            println!("{}! = {}", n, outcome.result().cloned().unwrap_or_default());
        }
    }
    println!("\nBatch completed in {:?}", start.elapsed());

    Ok(())
}
