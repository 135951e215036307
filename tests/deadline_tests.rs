//! The deadline is disarmed on every exit path.
//!
//! Kept to a single test so the process-wide armed count is not disturbed
//! by other executions running in parallel.

use std::time::Duration;

use serde_json::Map;
use snippet_sandbox::prelude::*;
use snippet_sandbox::sandbox::deadline::armed_deadlines;

#[tokio::test]
async fn test_deadline_disarmed_after_every_outcome() {
    let sandbox = PythonSandbox::new(
        SandboxConfig::builder()
            .timeout(Duration::from_millis(200))
            .build(),
    )
    .unwrap();

    let snippets = [
        "result = 1",
        "x = undefined",
        "result = (",
        "while True:\n    pass",
        "a = []\na.append(a)\nresult = a",
    ];

    for code in snippets {
        let outcome = sandbox.execute_blocking(code, &Map::new());
        assert_eq!(armed_deadlines(), 0, "after blocking {:?}: {:?}", code, outcome);

        let outcome = sandbox.execute(code, Map::new()).await;
        assert_eq!(armed_deadlines(), 0, "after async {:?}: {:?}", code, outcome);
    }

    let pending = sandbox.execute("while True:\n    pass", Map::new());
    let cancelled = tokio::time::timeout(Duration::from_millis(20), pending).await;
    assert!(cancelled.is_err());
    assert_eq!(armed_deadlines(), 0, "after a cancelled call");
}
