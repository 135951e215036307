//! Basic example of executing a snippet in the sandbox.
//!
//! Run with: cargo run --example basic_execution

use std::time::Duration;

use serde_json::Map;
use snippet_sandbox::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .build();

    println!("Creating sandbox with config: {:?}", config);
    let sandbox = PythonSandbox::new(config)?;

    println!("\n=== Test 1: Simple arithmetic ===");
    let outcome = sandbox.execute("print(1 + 1)\nresult = 2 ** 10", Map::new()).await;
    println!("result: {:?}", outcome.result());
    println!("stdout: {:?}", outcome.stdout());
    println!("stderr: {:?}", outcome.stderr());

    println!("\n=== Test 2: Loop with trailing expression ===");
    let code = r#"
squares = []
for i in range(5):
    print(f"Count: {i}")
    squares.append(i * i)
squares
"#;
    let outcome = sandbox.execute(code, Map::new()).await;
    println!("stdout:\n{}", outcome.stdout().unwrap_or_default());
    println!("result: {:?}", outcome.result());

    println!("\n=== Test 3: Snippet error ===");
    let outcome = sandbox.execute("raise ValueError('test error')", Map::new()).await;
    println!("error: {:?}", outcome.error());
    if let Some(traceback) = outcome.traceback() {
        println!("traceback:\n{}", traceback);
    }

    println!("\n=== Test 4: Wire format ===");
    let outcome = sandbox.execute("answer = {'mean': statistics.mean([1, 2, 3])}", Map::new()).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
