//! Benchmarks for snippet execution.
//!
//! Run with: cargo bench
//!
//! Results are saved in target/criterion/

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Map, Value as Json};
use snippet_sandbox::prelude::*;
use snippet_sandbox::sandbox::namespace::build_namespace;
use snippet_sandbox::sandbox::normalize::normalize;
use tokio::runtime::Runtime;

fn bench_sandbox() -> PythonSandbox {
    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(30))
        .build();
    PythonSandbox::new(config).unwrap()
}

/// Benchmark the cost of a call that does almost nothing.
fn bench_cold_start(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("cold_start");

    group.bench_function("new_sandbox_and_execute", |b| {
        b.iter(|| {
            let sandbox = bench_sandbox();
            black_box(rt.block_on(sandbox.execute("result = 1", Map::new())))
        });
    });

    group.bench_function("blocking_execute", |b| {
        let sandbox = bench_sandbox();
        b.iter(|| black_box(sandbox.execute_blocking("result = 1", &Map::new())));
    });

    group.finish();
}

/// Benchmark execution of typical snippets.
fn bench_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sandbox = bench_sandbox();

    let mut group = c.benchmark_group("execution");

    let snippets = [
        ("simple_print", "print(1 + 1)"),
        ("loop_1000", "total = 0\nfor i in range(1000):\n    total += i\nresult = total"),
        ("string_ops", "s = 'hello' * 100\nresult = len(s.upper().split('L'))"),
        ("comprehension", "result = sum([i * i for i in range(1000) if i % 3 == 0])"),
        ("numpy", "a = np.arange(100).reshape(10, 10)\nresult = np.sum(a @ a.T)"),
        ("fractions", "result = sum([Fraction(1, n) for n in range(1, 50)])"),
        ("sympy_factor", "result = sympy.factorint(2 ** 20 * 3 ** 5 * 7)"),
    ];

    for (name, code) in snippets {
        group.bench_function(name, |b| {
            b.iter(|| black_box(rt.block_on(sandbox.execute(code, Map::new()))));
        });
    }

    group.finish();
}

/// Benchmark concurrent execution throughput.
fn bench_concurrent_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sandbox = bench_sandbox();

    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    for concurrency in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("executions", concurrency),
            concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut handles = Vec::new();

                        for i in 0..concurrency {
                            let sandbox = sandbox.clone();
                            let request = ExecutionRequest::new(
                                "total = 0\nfor k in range(2000):\n    total += k * i\nresult = total",
                            )
                            .input("i", i);
                            handles.push(tokio::spawn(async move { sandbox.run(request).await }));
                        }

                        for handle in handles {
                            black_box(handle.await.unwrap());
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the per-call deadline and scope choices.
fn bench_deadline_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("deadline_scope");
    let code = "for i in range(1000):\n    pass";

    for scope in [DeadlineScope::Everywhere, DeadlineScope::PrimaryThread] {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(30))
            .deadline_scope(scope)
            .build();
        let sandbox = PythonSandbox::new(config).unwrap();

        group.bench_function(scope.to_string(), |b| {
            b.iter(|| black_box(sandbox.execute_blocking(code, &Map::new())));
        });
    }

    group.finish();
}

/// Benchmark the conversions at either end of an execution.
fn bench_conversions(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversions");

    for size in [10usize, 100, 1000].iter() {
        let inputs: Map<String, Json> = (0..*size)
            .map(|i| (format!("v{}", i), json!({"id": i, "tags": ["a", "b"], "score": i as f64 / 3.0})))
            .collect();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("build_namespace", size), &inputs, |b, inputs| {
            b.iter(|| black_box(build_namespace(inputs).unwrap()));
        });

        let namespace = build_namespace(&inputs).unwrap();
        let values: Vec<_> = inputs.keys().filter_map(|k| namespace.get(k)).collect();
        group.bench_with_input(BenchmarkId::new("normalize", size), &values, |b, values| {
            b.iter(|| {
                for value in values.iter() {
                    black_box(normalize(value).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark output capture under heavy printing.
fn bench_output_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_capture");
    group.sample_size(10);

    for cap_kib in [1usize, 64, 1024].iter() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(30))
            .max_output_bytes(cap_kib * 1024)
            .build();
        let sandbox = PythonSandbox::new(config).unwrap();

        group.bench_with_input(
            BenchmarkId::new("print_flood", format!("{}KiB", cap_kib)),
            cap_kib,
            |b, _| {
                b.iter(|| {
                    black_box(
                        sandbox.execute_blocking("for i in range(2000):\n    print('x' * 64, i)", &Map::new()),
                    )
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cold_start,
    bench_execution,
    bench_concurrent_execution,
    bench_deadline_scope,
    bench_conversions,
    bench_output_capture,
);

criterion_main!(benches);
