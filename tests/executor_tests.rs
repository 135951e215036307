//! End-to-end behavior of the executor: result extraction, normalization,
//! captured streams, and failure packaging.

use std::time::Duration;

use serde_json::{json, Map, Value as Json};
use snippet_sandbox::prelude::*;
use snippet_sandbox::sandbox::deadline::designate_primary_thread;

fn sandbox() -> PythonSandbox {
    PythonSandbox::new(SandboxConfig::default()).unwrap()
}

fn run(code: &str) -> ExecutionOutcome {
    sandbox().execute_blocking(code, &Map::new())
}

fn run_with(code: &str, inputs: Json) -> ExecutionOutcome {
    let Json::Object(inputs) = inputs else {
        panic!("inputs must be an object");
    };
    sandbox().execute_blocking(code, &inputs)
}

fn result_of(code: &str) -> Json {
    let outcome = run(code);
    match outcome.result() {
        Some(result) => result.clone(),
        None => panic!("{} failed: {:?}", code, outcome),
    }
}

#[test]
fn test_result_variable() {
    assert_eq!(result_of("result = 42"), json!(42));
}

#[test]
fn test_trailing_expression_fallback() {
    assert_eq!(result_of("x = 1\nx + 1"), json!(2));
}

#[test]
fn test_no_result_is_null() {
    let outcome = run("x = 1\nprint(x)");
    assert_eq!(outcome.result(), Some(&Json::Null));
    assert_eq!(outcome.stdout(), Some("1\n"));
}

#[test]
fn test_repeated_runs_are_identical() {
    let code = "import_count = 0\nvalues = sorted({3, 1, 2})\nresult = [v * 1.5 for v in values]";
    assert_eq!(run(code), run(code));
}

#[test]
fn test_inputs_are_visible() {
    let outcome = run_with(
        "result = a + sum(b) + data['k'][1]",
        json!({"a": 2, "b": [1, 2], "data": {"k": [0, 10]}}),
    );
    assert_eq!(outcome.result(), Some(&json!(15)));
}

#[test]
fn test_inputs_shadow_builtins() {
    let outcome = run_with("result = max", json!({"max": "shadowed"}));
    assert_eq!(outcome.result(), Some(&json!("shadowed")));
}

#[test]
fn test_captured_streams() {
    let outcome = run("print('hello', 'world')\nprint(1, 2, sep='-')\nresult = None");
    assert_eq!(outcome.stdout(), Some("hello world\n1-2\n"));
    assert!(outcome.stderr().is_none());
    let serialized = serde_json::to_value(&outcome).unwrap();
    assert_eq!(serialized["stderr"], Json::Null);
}

#[test]
fn test_warnings_go_to_stderr() {
    let outcome = run("result = np.mean(np.array([]))");
    assert_eq!(outcome.result(), Some(&json!("nan")));
    assert!(outcome.stderr().unwrap().contains("RuntimeWarning: Mean of empty slice."));
}

#[test]
fn test_numpy_results() {
    assert_eq!(result_of("result = np.array([1, 2, 3])"), json!([1, 2, 3]));
    assert_eq!(
        result_of("result = numpy.eye(2)"),
        json!([[1.0, 0.0], [0.0, 1.0]])
    );
    assert_eq!(result_of("result = np.sum(np.arange(5))"), json!(10));
    assert_eq!(result_of("result = np.linalg.det(np.array([[2, 0], [0, 3]]))"), json!(6.0));
}

#[test]
fn test_exact_numerics() {
    assert_eq!(result_of("result = Fraction(1, 4) + Fraction(1, 4)"), json!(0.5));
    assert_eq!(result_of("result = 2 ** 100"), json!("1267650600228229401496703205376"));
    assert_eq!(result_of("result = statistics.mean([1, 2, 3, 4])"), json!(2.5));
    assert_eq!(result_of("result = math.comb(10, 3)"), json!(120));
}

#[test]
fn test_sympy_subset() {
    assert_eq!(result_of("result = sympy.isprime(97)"), json!(true));
    assert_eq!(
        result_of("result = sympy.factorint(360)"),
        json!({"2": 3, "3": 2, "5": 1})
    );
}

#[test]
fn test_itertools_and_containers() {
    assert_eq!(
        result_of("result = list(itertools.combinations([1, 2, 3], 2))"),
        json!([[1, 2], [1, 3], [2, 3]])
    );
    assert_eq!(result_of("result = {1: 'a', (2, 3): {4}}"), json!({"1": "a", "(2, 3)": [4]}));
    assert_eq!(result_of("result = range(3)"), json!([0, 1, 2]));
}

#[test]
fn test_callables_become_repr() {
    let result = result_of("def f():\n    return 1\nresult = f");
    assert!(result.as_str().unwrap().starts_with("<function f"));
}

#[test]
fn test_runtime_error_packaging() {
    let outcome = run("values = [1, 2]\nx = values[5]");
    assert_eq!(outcome.error(), Some("IndexError: list index out of range"));
    let traceback = outcome.traceback().unwrap();
    assert!(traceback.starts_with("Traceback (most recent call last):"));
    assert!(traceback.contains("File \"<string>\", line 2, in <module>"));
    assert!(traceback.trim_end().ends_with("IndexError: list index out of range"));
}

#[test]
fn test_syntax_error_packaging() {
    let outcome = run("result = (1 +");
    assert!(outcome.error().unwrap().starts_with("SyntaxError"));
    assert!(outcome.traceback().is_some());
}

#[test]
fn test_circular_result_is_a_failure() {
    let outcome = run("a = []\na.append(a)\nresult = a");
    assert_eq!(outcome.error(), Some("ValueError: Circular reference detected"));
}

#[test]
fn test_deeply_nested_result_is_a_failure() {
    for wrap in ["x = [x]", "x = {'a': x}", "x = (x,)"] {
        let code = format!("x = []\nfor i in range(100000):\n    {}\nresult = x", wrap);
        let outcome = run(&code);
        assert!(
            outcome.error().map_or(false, |e| e.starts_with("RecursionError")),
            "{} -> {:?}",
            wrap,
            outcome.error()
        );
    }
}

#[test]
fn test_deeply_nested_value_cannot_be_printed() {
    let outcome = run("x = []\nfor i in range(100000):\n    x = [x]\nresult = len(str(x))");
    assert!(outcome.error().unwrap().starts_with("RecursionError"));

    let outcome = run("a = [1]\na.append(a)\nprint(a)\nresult = 0");
    assert_eq!(outcome.stdout(), Some("[1, [...]]\n"));
}

#[test]
fn test_primary_thread_scope() {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_millis(1))
        .deadline_scope(DeadlineScope::PrimaryThread)
        .build();
    let sandbox = PythonSandbox::new(config).unwrap();
    let code = "total = 0\nfor i in range(50000):\n    total += i\nresult = total";

    let off_primary = {
        let sandbox = sandbox.clone();
        std::thread::spawn(move || sandbox.execute_blocking(code, &Map::new()))
            .join()
            .unwrap()
    };
    assert_eq!(off_primary.result(), Some(&json!(1249975000)));

    let on_primary = std::thread::spawn(move || {
        designate_primary_thread();
        sandbox.execute_blocking(code, &Map::new())
    })
    .join()
    .unwrap();
    assert_eq!(on_primary.error(), Some("Execution timeout (0.001 seconds)"));
}

#[tokio::test]
async fn test_async_execute_matches_blocking() {
    let sandbox = sandbox();
    let request = ExecutionRequest::new("result = n * 2").input("n", 21);
    let outcome = sandbox.run(request).await;
    assert_eq!(outcome, sandbox.execute_blocking("result = n * 2", &{
        let mut inputs = Map::new();
        inputs.insert("n".to_string(), json!(21));
        inputs
    }));
    assert_eq!(outcome.result(), Some(&json!(42)));
}

#[tokio::test]
async fn test_concurrent_executions_are_independent() {
    let sandbox = sandbox();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let sandbox = sandbox.clone();
            tokio::spawn(async move {
                sandbox
                    .run(ExecutionRequest::new("result = i * i").input("i", i))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.result(), Some(&json!(i * i)));
    }
}
