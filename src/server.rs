//! HTTP front end for the sandbox.
//!
//! `POST /` and `POST /api/py/exec` take `{"code": str, "inputs": object}`
//! and answer with the serialized [`ExecutionOutcome`]. Snippet failures are
//! still `200`; only malformed requests get `400`.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value as JsonValue};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::sandbox::executor::PythonSandbox;
use crate::sandbox::outcome::{ExecutionOutcome, ExecutionRequest};

/// Default request body cap (1 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Application state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub sandbox: PythonSandbox,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(sandbox: PythonSandbox) -> Self {
        Self {
            sandbox,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/health", get(health_check))
        .route("/", post(execute_code))
        .route("/api/py/exec", post(execute_code))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Why a body was rejected before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    NoCode,
    InputsNotObject,
}

impl RequestError {
    pub fn message(self) -> &'static str {
        match self {
            RequestError::NoCode => "No code provided",
            RequestError::InputsNotObject => "inputs must be an object",
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let body = ExecutionOutcome::failure(self.message(), None);
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// Validate a raw body. Anything that is not a JSON object with a non-empty
/// string `code` counts as having no code; `inputs` may be absent or null.
pub fn parse_request(body: &[u8]) -> Result<ExecutionRequest, RequestError> {
    let Ok(JsonValue::Object(mut fields)) = serde_json::from_slice::<JsonValue>(body) else {
        return Err(RequestError::NoCode);
    };
    let code = match fields.remove("code") {
        Some(JsonValue::String(code)) if !code.is_empty() => code,
        _ => return Err(RequestError::NoCode),
    };
    let inputs = match fields.remove("inputs") {
        None | Some(JsonValue::Null) => Map::new(),
        Some(JsonValue::Object(inputs)) => inputs,
        Some(_) => return Err(RequestError::InputsNotObject),
    };
    Ok(ExecutionRequest { code, inputs })
}

async fn execute_code(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(reason = e.message(), "rejected request");
            return e.into_response();
        }
    };
    let outcome = state.sandbox.run(request).await;
    (StatusCode::OK, Json(outcome)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_accepts_code_and_inputs() {
        let request = parse_request(br#"{"code": "result = n", "inputs": {"n": 2}}"#).unwrap();
        assert_eq!(request.code, "result = n");
        assert_eq!(request.inputs["n"], json!(2));
    }

    #[test]
    fn test_parse_request_rejections() {
        assert_eq!(parse_request(b"not json"), Err(RequestError::NoCode));
        assert_eq!(parse_request(b"[1, 2]"), Err(RequestError::NoCode));
        assert_eq!(parse_request(br#"{"code": ""}"#), Err(RequestError::NoCode));
        assert_eq!(parse_request(br#"{"code": 5}"#), Err(RequestError::NoCode));
        assert_eq!(
            parse_request(br#"{"code": "x", "inputs": [1]}"#),
            Err(RequestError::InputsNotObject)
        );
        assert!(parse_request(br#"{"code": "x", "inputs": null}"#).is_ok());
    }
}
