//! Integration tests for the HTTP front end.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use snippet_sandbox::prelude::*;
use snippet_sandbox::server::{build_router, AppState};
use tower::ServiceExt;

fn test_app() -> axum::Router {
    let sandbox = PythonSandbox::new(SandboxConfig::default()).unwrap();
    build_router(AppState::new(sandbox))
}

async fn post(app: axum::Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let response = test_app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_both_paths_execute() {
    for uri in ["/", "/api/py/exec"] {
        let (status, json) = post(
            test_app(),
            uri,
            r#"{"code": "print('hi')\nresult = n + 1", "inputs": {"n": 41}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            json!({"ok": true, "result": 42, "stdout": "hi\n", "stderr": null})
        );
    }
}

#[tokio::test]
async fn test_missing_code_is_bad_request() {
    for body in [r#"{}"#, r#"{"code": ""}"#, "not json at all", ""] {
        let (status, json) = post(test_app(), "/api/py/exec", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(json, json!({"ok": false, "error": "No code provided"}));
    }
}

#[tokio::test]
async fn test_non_object_inputs_is_bad_request() {
    let (status, json) = post(test_app(), "/", r#"{"code": "result = 1", "inputs": [1, 2]}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({"ok": false, "error": "inputs must be an object"}));
}

#[tokio::test]
async fn test_snippet_failure_is_ok_status() {
    let (status, json) = post(test_app(), "/", r#"{"code": "result = 1 / 0"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"], "ZeroDivisionError: division by zero");
    assert!(json["traceback"]
        .as_str()
        .unwrap()
        .starts_with("Traceback (most recent call last):"));
}

#[tokio::test]
async fn test_timeout_over_http() {
    let sandbox = PythonSandbox::new(
        SandboxConfig::builder()
            .timeout(std::time::Duration::from_millis(200))
            .build(),
    )
    .unwrap();
    let app = build_router(AppState::new(sandbox));

    let (status, json) = post(app, "/", r#"{"code": "while True:\n    pass"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"ok": false, "error": "Execution timeout (0.2 seconds)"}));
}

#[tokio::test]
async fn test_body_limit() {
    let sandbox = PythonSandbox::new(SandboxConfig::default()).unwrap();
    let app = build_router(AppState::new(sandbox).with_body_limit(64));
    let code = format!(r#"{{"code": "result = '{}'"}}"#, "x".repeat(200));

    let (status, _) = post(app, "/", code).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_unknown_route() {
    let response = test_app()
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
