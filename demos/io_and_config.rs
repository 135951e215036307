//! Example demonstrating inputs, captured streams, and configuration.
//!
//! Run with: cargo run --example io_and_config

use std::time::Duration;

use serde_json::{json, Map};
use snippet_sandbox::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== I/O and Configuration Example ===\n");

    let sandbox = PythonSandbox::new(SandboxConfig::default())?;

    println!("--- Test 1: Inputs ---");
    {
        let request = ExecutionRequest::new(
            "print(f'Hello {name}! You are {age} years old.')\nresult = {'next_age': age + 1}",
        )
        .input("name", "Alice")
        .input("age", 25);

        let outcome = sandbox.run(request).await;
        println!("stdout: {}", outcome.stdout().unwrap_or_default().trim());
        println!("result: {:?}", outcome.result());
    }
    println!();

    println!("--- Test 2: Structured inputs ---");
    {
        let mut inputs = Map::new();
        inputs.insert(
            "orders".to_string(),
            json!([{"qty": 2, "price": 9.5}, {"qty": 1, "price": 20}]),
        );
        let code = "total = sum([o['qty'] * o['price'] for o in orders])\ntotal";
        let outcome = sandbox.execute(code, inputs).await;
        println!("result: {:?}", outcome.result());
    }
    println!();

    println!("--- Test 3: Requests from JSON ---");
    {
        let request: ExecutionRequest = serde_json::from_value(json!({
            "code": "answer = np.dot(a, b)",
            "inputs": {"a": [1, 2, 3], "b": [4, 5, 6]}
        }))?;
        let outcome = sandbox.run(request).await;
        println!("{}", serde_json::to_string(&outcome)?);
    }
    println!();

    println!("--- Test 4: Warnings are captured on stderr ---");
    {
        let outcome = sandbox.execute("result = np.mean(np.array([]))", Map::new()).await;
        println!("result: {:?}", outcome.result());
        println!("stderr: {:?}", outcome.stderr());
    }
    println!();

    println!("--- Test 5: Output cap ---");
    {
        let config = SandboxConfig::builder()
            .max_output_bytes(256)
            .timeout(Duration::from_secs(2))
            .build();
        let sandbox = PythonSandbox::new(config)?;
        let outcome = sandbox
            .execute("for i in range(100):\n    print('line', i)", Map::new())
            .await;
        let stdout = outcome.stdout().unwrap_or_default();
        println!("captured {} bytes, ends with: {:?}", stdout.len(), &stdout[stdout.len().saturating_sub(25)..]);
    }

    Ok(())
}
