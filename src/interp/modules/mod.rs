//! The allow-listed modules and the initial snippet namespace.

pub(crate) mod fraction;
mod itertools;
mod math;
pub(crate) mod numpy;
mod statistics;
mod sympy;

use std::collections::HashMap;

use num_bigint::BigInt;

use super::builtins;
use super::exception::{raise, ExcKind, PyResult};
use super::value::{TypeKind, Value};

/// Builtin names a snippet can reach.
pub const BUILTIN_NAMES: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "filter", "float", "int", "len", "list",
    "map", "max", "min", "pow", "range", "round", "set", "sorted", "str", "sum", "tuple", "type",
    "zip", "print",
];

/// Modules bound in the namespace. `np` and `numpy` are the same module.
pub const MODULE_NAMES: &[&str] = &[
    "sympy", "np", "numpy", "Fraction", "math", "itertools", "statistics",
];

/// A fresh namespace holding every allow-listed builtin and module.
pub fn builtin_namespace() -> HashMap<String, Value> {
    let mut ns = HashMap::with_capacity(BUILTIN_NAMES.len() + MODULE_NAMES.len());
    for (name, func) in builtins::FUNCTIONS {
        ns.insert(name.to_string(), builtins::builtin_value(name, *func));
    }
    for (name, kind) in builtins::TYPES {
        ns.insert(name.to_string(), Value::Type(*kind));
    }
    let np = numpy::module();
    ns.insert("np".to_string(), np.clone());
    ns.insert("numpy".to_string(), np);
    ns.insert("Fraction".to_string(), Value::Type(TypeKind::Fraction));
    ns.insert("math".to_string(), math::module());
    ns.insert("itertools".to_string(), itertools::module());
    ns.insert("statistics".to_string(), statistics::module());
    ns.insert("sympy".to_string(), sympy::module());
    ns
}

/// An exact integer argument; floats are refused the way Python refuses them.
pub(crate) fn int_arg(v: &Value) -> PyResult<BigInt> {
    match v.as_bigint_exact() {
        Some(i) => Ok(i),
        None => raise(
            ExcKind::TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                v.type_name()
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_is_exactly_the_allow_list() {
        let ns = builtin_namespace();
        assert_eq!(ns.len(), BUILTIN_NAMES.len() + MODULE_NAMES.len());
        for name in BUILTIN_NAMES.iter().chain(MODULE_NAMES) {
            assert!(ns.contains_key(*name), "missing {}", name);
        }
        for name in ["open", "__import__", "eval", "exec", "os", "getattr"] {
            assert!(!ns.contains_key(name));
        }
    }

    #[test]
    fn test_np_and_numpy_are_one_module() {
        let ns = builtin_namespace();
        match (&ns["np"], &ns["numpy"]) {
            (Value::Module(a), Value::Module(b)) => assert!(std::rc::Rc::ptr_eq(a, b)),
            _ => panic!("numpy is not a module"),
        }
    }
}
