//! Request and outcome types exchanged with callers.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value as Json};

/// One snippet to run, with named JSON inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default)]
    pub inputs: Map<String, Json>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            inputs: Map::new(),
        }
    }

    /// Add one named input.
    pub fn input(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }
}

/// The result of one execution. Serialized with an `ok` discriminator:
/// `{"ok":true,"result":..,"stdout":..,"stderr":..}` or
/// `{"ok":false,"error":..,"traceback":..}`, with `traceback` left out when
/// there is none.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success {
        result: Json,
        stdout: String,
        stderr: Option<String>,
    },
    Failure {
        error: String,
        traceback: Option<String>,
    },
}

impl Serialize for ExecutionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExecutionOutcome::Success {
                result,
                stdout,
                stderr,
            } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("result", result)?;
                map.serialize_entry("stdout", stdout)?;
                map.serialize_entry("stderr", stderr)?;
                map.end()
            }
            ExecutionOutcome::Failure { error, traceback } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", error)?;
                if let Some(traceback) = traceback {
                    map.serialize_entry("traceback", traceback)?;
                }
                map.end()
            }
        }
    }
}

impl ExecutionOutcome {
    pub fn success(result: Json, stdout: String, stderr: Option<String>) -> Self {
        ExecutionOutcome::Success {
            result,
            stdout,
            stderr,
        }
    }

    pub fn failure(error: impl Into<String>, traceback: Option<String>) -> Self {
        ExecutionOutcome::Failure {
            error: error.into(),
            traceback,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// The normalized result of a successful run.
    pub fn result(&self) -> Option<&Json> {
        match self {
            ExecutionOutcome::Success { result, .. } => Some(result),
            ExecutionOutcome::Failure { .. } => None,
        }
    }

    pub fn stdout(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { stdout, .. } => Some(stdout),
            ExecutionOutcome::Failure { .. } => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { stderr, .. } => stderr.as_deref(),
            ExecutionOutcome::Failure { .. } => None,
        }
    }

    /// The `"Kind: message"` text of a failed run.
    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Failure { error, .. } => Some(error),
            ExecutionOutcome::Success { .. } => None,
        }
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Failure { traceback, .. } => traceback.as_deref(),
            ExecutionOutcome::Success { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let outcome = ExecutionOutcome::success(json!(42), "hi\n".to_string(), None);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"ok": true, "result": 42, "stdout": "hi\n", "stderr": null})
        );
    }

    #[test]
    fn test_failure_shape_omits_missing_traceback() {
        let timeout = ExecutionOutcome::failure("Execution timeout (5 seconds)", None);
        assert_eq!(
            serde_json::to_value(&timeout).unwrap(),
            json!({"ok": false, "error": "Execution timeout (5 seconds)"})
        );

        let raised = ExecutionOutcome::failure("ValueError: bad", Some("Traceback ...".to_string()));
        assert_eq!(serde_json::to_value(&raised).unwrap()["traceback"], json!("Traceback ..."));
    }

    #[test]
    fn test_accessors() {
        let outcome = ExecutionOutcome::success(json!([1, 2]), String::new(), Some("w".to_string()));
        assert!(outcome.is_success());
        assert_eq!(outcome.result(), Some(&json!([1, 2])));
        assert_eq!(outcome.stderr(), Some("w"));
        assert!(outcome.error().is_none());

        let failed = ExecutionOutcome::failure("NameError: x", None);
        assert_eq!(failed.error(), Some("NameError: x"));
        assert!(failed.traceback().is_none());
        assert!(failed.stdout().is_none());
    }

    #[test]
    fn test_request_inputs_default_to_empty() {
        let request: ExecutionRequest = serde_json::from_value(json!({"code": "result = 1"})).unwrap();
        assert!(request.inputs.is_empty());
        let built = ExecutionRequest::new("x").input("n", 3);
        assert_eq!(built.inputs["n"], json!(3));
    }
}
