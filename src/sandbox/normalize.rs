//! Conversion of snippet results to JSON.
//!
//! Rules, first match wins: a 0-d array becomes its scalar, an n-d array
//! becomes nested lists, a `Fraction` becomes a float (its `n/d` text when
//! the float would not be finite), and everything else maps structurally.
//! Values JSON cannot hold exactly are rendered as strings: ints outside the
//! `i64` range, non-finite floats, and callables or modules (their repr).

use num_traits::ToPrimitive;
use serde_json::{Map, Number, Value as Json};

use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::value::ratio_to_f64;
use crate::interp::{Value, MAX_VALUE_DEPTH};

/// Nodes visited before a result is declared too large.
const MAX_RESULT_NODES: usize = 10_000_000;

/// Convert a snippet value to a JSON document.
///
/// Fails with `ValueError` on self-referencing containers and on results
/// with an unreasonable number of nodes, and with `RecursionError` on
/// results nested deeper than [`MAX_VALUE_DEPTH`].
pub fn normalize(value: &Value) -> PyResult<Json> {
    Normalizer {
        active: Vec::new(),
        budget: MAX_RESULT_NODES,
        depth: 0,
    }
    .convert(value)
}

struct Normalizer {
    /// Containers on the path from the root to the current node.
    active: Vec<usize>,
    budget: usize,
    depth: usize,
}

impl Normalizer {
    fn convert(&mut self, value: &Value) -> PyResult<Json> {
        if self.budget == 0 {
            return raise(ExcKind::ValueError, "result too large to serialize");
        }
        if self.depth > MAX_VALUE_DEPTH {
            return raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while serializing the result",
            );
        }
        self.budget -= 1;
        self.depth += 1;
        let out = self.convert_node(value);
        self.depth -= 1;
        out
    }

    fn convert_node(&mut self, value: &Value) -> PyResult<Json> {
        Ok(match value {
            Value::Array(a) => {
                let plain = a.borrow().to_list();
                self.convert(&plain)?
            }
            Value::Fraction(r) => {
                let f = ratio_to_f64(r);
                if f.is_finite() {
                    float(f)
                } else {
                    Json::String(value.to_str())
                }
            }
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => match i.to_i64() {
                Some(n) => Json::from(n),
                None => Json::String(i.to_string()),
            },
            Value::Float(f) => float(*f),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) => {
                let id = std::rc::Rc::as_ptr(items) as *const () as usize;
                self.enter(id)?;
                let out = self.sequence(&items.borrow());
                self.active.pop();
                out?
            }
            Value::Tuple(items) => self.sequence(items)?,
            Value::Set(set) => {
                let id = std::rc::Rc::as_ptr(set) as *const () as usize;
                self.enter(id)?;
                let items = set.borrow().to_vec();
                let out = self.sequence(&items);
                self.active.pop();
                out?
            }
            Value::Range(r) => Json::Array((0..r.len()).map(|i| Json::from(r.get(i))).collect()),
            Value::Dict(d) => {
                let id = std::rc::Rc::as_ptr(d) as *const () as usize;
                self.enter(id)?;
                let out = self.object(&d.borrow());
                self.active.pop();
                out?
            }
            Value::Function(_)
            | Value::Builtin(_)
            | Value::Method(_)
            | Value::Module(_)
            | Value::Type(_) => Json::String(value.repr()),
        })
    }

    fn enter(&mut self, id: usize) -> PyResult<()> {
        if self.active.contains(&id) {
            return raise(ExcKind::ValueError, "Circular reference detected");
        }
        self.active.push(id);
        Ok(())
    }

    fn sequence(&mut self, items: &[Value]) -> PyResult<Json> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.convert(item)?);
        }
        Ok(Json::Array(out))
    }

    fn object(&mut self, dict: &crate::interp::value::Dict) -> PyResult<Json> {
        let mut out = Map::new();
        for (key, value) in dict.iter() {
            out.insert(key_text(key), self.convert(value)?);
        }
        Ok(Json::Object(out))
    }
}

fn float(f: f64) -> Json {
    match Number::from_f64(f) {
        Some(n) => Json::Number(n),
        None => Json::String(Value::Float(f).repr()),
    }
}

/// JSON object keys are strings; scalars are spelled the way JSON would.
fn key_text(key: &Value) -> String {
    match key {
        Value::Str(s) => s.to_string(),
        Value::None => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ndarray::{DType, NdArray};
    use crate::interp::value::Dict;
    use num_bigint::BigInt;
    use num_rational::BigRational;
    use serde_json::json;

    #[test]
    fn test_arrays() {
        let scalar = Value::array(NdArray::scalar_of(3.0, DType::Int));
        assert_eq!(normalize(&scalar).unwrap(), json!(3));

        let matrix = Value::array(NdArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.5], DType::Float));
        assert_eq!(normalize(&matrix).unwrap(), json!([[1.0, 2.0], [3.0, 4.5]]));
    }

    #[test]
    fn test_fraction_becomes_float() {
        let half = Value::fraction(BigRational::new(BigInt::from(1), BigInt::from(2)));
        assert_eq!(normalize(&half).unwrap(), json!(0.5));
    }

    #[test]
    fn test_unrepresentable_scalars_become_strings() {
        let big = Value::Int(BigInt::from(2).pow(70u32));
        assert_eq!(normalize(&big).unwrap(), json!("1180591620717411303424"));
        assert_eq!(normalize(&Value::Float(f64::NAN)).unwrap(), json!("nan"));
        assert_eq!(normalize(&Value::Float(f64::NEG_INFINITY)).unwrap(), json!("-inf"));
    }

    #[test]
    fn test_containers_recurse() {
        let mut d = Dict::new();
        d.insert(Value::int(1), Value::tuple(vec![Value::Bool(true), Value::None]))
            .unwrap();
        d.insert(Value::str("k"), Value::list(vec![Value::Float(1.5)])).unwrap();
        assert_eq!(
            normalize(&Value::dict(d)).unwrap(),
            json!({"1": [true, null], "k": [1.5]})
        );
    }

    #[test]
    fn test_shared_children_are_not_cycles() {
        let inner = Value::list(vec![Value::int(1)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        assert_eq!(normalize(&outer).unwrap(), json!([[1], [1]]));
    }

    #[test]
    fn test_cycle_is_an_error() {
        let list = Value::list(Vec::new());
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(normalize(&list).is_err());
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let mut nested = Value::list(Vec::new());
        for _ in 0..MAX_VALUE_DEPTH + 10 {
            nested = Value::list(vec![nested]);
        }
        let err = normalize(&nested).unwrap_err();
        assert!(matches!(err, crate::interp::Unwind::Raise(ref exc) if exc.kind == ExcKind::RecursionError));

        let mut shallow = Value::int(1);
        for _ in 0..MAX_VALUE_DEPTH - 1 {
            shallow = Value::tuple(vec![shallow]);
        }
        assert!(normalize(&shallow).is_ok());
    }
}
