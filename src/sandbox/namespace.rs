//! The per-call snippet namespace: the allow-list with caller inputs on top.

use std::collections::HashMap;

use num_bigint::BigInt;
use serde_json::{Map, Value as Json};

use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::value::Dict;
use crate::interp::{builtin_namespace, Value, MAX_VALUE_DEPTH};

/// Build a fresh namespace for one execution. Inputs shadow allow-listed
/// names of the same spelling.
pub fn build_namespace(inputs: &Map<String, Json>) -> PyResult<HashMap<String, Value>> {
    let mut ns = builtin_namespace();
    for (name, json) in inputs {
        ns.insert(name.clone(), json_to_value(json)?);
    }
    Ok(ns)
}

/// Convert a JSON document to the snippet value it stands for.
///
/// Objects become dicts with string keys, arrays become lists, and
/// integral numbers become ints.
pub fn json_to_value(json: &Json) -> PyResult<Value> {
    convert(json, 0)
}

fn convert(json: &Json, depth: usize) -> PyResult<Value> {
    if depth > MAX_VALUE_DEPTH {
        return raise(ExcKind::ValueError, "input nested too deeply");
    }
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Int(BigInt::from(u))
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::str(s),
        Json::Array(items) => Value::list(
            items
                .iter()
                .map(|item| convert(item, depth + 1))
                .collect::<PyResult<_>>()?,
        ),
        Json::Object(fields) => {
            let mut dict = Dict::new();
            for (key, value) in fields {
                dict.insert(Value::str(key), convert(value, depth + 1)?)?;
            }
            Value::dict(dict)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Json) -> Map<String, Json> {
        match value {
            Json::Object(map) => map,
            _ => panic!("inputs must be an object"),
        }
    }

    #[test]
    fn test_inputs_are_overlaid() {
        let ns = build_namespace(&inputs(json!({"n": 10, "name": "x"}))).unwrap();
        assert!(matches!(&ns["n"], Value::Int(i) if *i == BigInt::from(10)));
        assert!(matches!(&ns["name"], Value::Str(s) if &**s == "x"));
        assert!(ns.contains_key("sorted"));
        assert!(ns.contains_key("np"));
    }

    #[test]
    fn test_inputs_may_shadow_allow_list() {
        let ns = build_namespace(&inputs(json!({"sum": 3}))).unwrap();
        assert!(matches!(&ns["sum"], Value::Int(_)));
    }

    #[test]
    fn test_json_shapes() {
        let value = json_to_value(&json!({"a": [1, 2.5, null, true], "b": {"c": "d"}})).unwrap();
        let Value::Dict(d) = value else {
            panic!("expected dict");
        };
        let d = d.borrow();
        let a = d.get(&Value::str("a")).unwrap().unwrap();
        assert_eq!(a.repr(), "[1, 2.5, None, True]");
        let b = d.get(&Value::str("b")).unwrap().unwrap();
        assert_eq!(b.repr(), "{'c': 'd'}");
    }

    #[test]
    fn test_large_unsigned_stays_exact() {
        let value = json_to_value(&json!(u64::MAX)).unwrap();
        assert_eq!(value.repr(), u64::MAX.to_string());
    }
}
