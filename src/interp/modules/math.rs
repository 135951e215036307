//! The `math` module.

use std::f64::consts;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::int_arg;
use crate::interp::ast::BinOp;
use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::ops;
use crate::interp::value::{float_to_bigint, CallArgs, Module, Value};
use crate::interp::Interpreter;

pub(super) fn module() -> Value {
    Module::new("math")
        .constant("pi", Value::Float(consts::PI))
        .constant("e", Value::Float(consts::E))
        .constant("tau", Value::Float(consts::TAU))
        .constant("inf", Value::Float(f64::INFINITY))
        .constant("nan", Value::Float(f64::NAN))
        .function("sqrt", sqrt)
        .function("isqrt", isqrt)
        .function("floor", floor)
        .function("ceil", ceil)
        .function("trunc", trunc)
        .function("fabs", fabs)
        .function("gcd", gcd)
        .function("lcm", lcm)
        .function("factorial", factorial)
        .function("comb", comb)
        .function("perm", perm)
        .function("exp", exp)
        .function("log", log)
        .function("log2", log2)
        .function("log10", log10)
        .function("pow", pow)
        .function("sin", sin)
        .function("cos", cos)
        .function("tan", tan)
        .function("asin", asin)
        .function("acos", acos)
        .function("atan", atan)
        .function("atan2", atan2)
        .function("sinh", sinh)
        .function("cosh", cosh)
        .function("tanh", tanh)
        .function("hypot", hypot)
        .function("degrees", degrees)
        .function("radians", radians)
        .function("isclose", isclose)
        .function("isfinite", isfinite)
        .function("isinf", isinf)
        .function("isnan", isnan)
        .function("prod", prod)
        .function("fsum", fsum)
        .function("copysign", copysign)
        .into_value()
}

fn domain_error<T>() -> PyResult<T> {
    raise(ExcKind::ValueError, "math domain error")
}

fn range_error<T>() -> PyResult<T> {
    raise(ExcKind::OverflowError, "math range error")
}

fn one_float(args: CallArgs, name: &str) -> PyResult<f64> {
    let a = args.positional(name, 1, 1)?;
    a[0].as_f64()
}

/// Apply a real function, mapping NaN-from-finite to a domain error and
/// infinity-from-finite to a range error.
fn real_fn(args: CallArgs, name: &str, f: fn(f64) -> f64) -> PyResult<Value> {
    let x = one_float(args, name)?;
    let y = f(x);
    if y.is_nan() && !x.is_nan() {
        return domain_error();
    }
    if y.is_infinite() && x.is_finite() {
        return range_error();
    }
    Ok(Value::Float(y))
}

fn sqrt(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "sqrt", f64::sqrt)
}

fn isqrt(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("isqrt", 1, 1)?;
    let n = int_arg(&a[0])?;
    if n.is_negative() {
        return raise(ExcKind::ValueError, "isqrt() argument must be nonnegative");
    }
    Ok(Value::Int(n.sqrt()))
}

enum Rounding {
    Floor,
    Ceil,
    Trunc,
}

fn integral(args: CallArgs, name: &str, mode: Rounding) -> PyResult<Value> {
    let a = args.positional(name, 1, 1)?;
    match &a[0] {
        Value::Int(_) => Ok(a[0].clone()),
        Value::Bool(b) => Ok(Value::int(*b as i64)),
        Value::Fraction(r) => Ok(Value::Int(match mode {
            Rounding::Floor => r.floor().to_integer(),
            Rounding::Ceil => r.ceil().to_integer(),
            Rounding::Trunc => r.trunc().to_integer(),
        })),
        other => {
            let x = other.as_f64()?;
            let y = match mode {
                Rounding::Floor => x.floor(),
                Rounding::Ceil => x.ceil(),
                Rounding::Trunc => x.trunc(),
            };
            Ok(Value::Int(float_to_bigint(y)?))
        }
    }
}

fn floor(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    integral(args, "floor", Rounding::Floor)
}

fn ceil(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    integral(args, "ceil", Rounding::Ceil)
}

fn trunc(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    integral(args, "trunc", Rounding::Trunc)
}

fn fabs(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(Value::Float(one_float(args, "fabs")?.abs()))
}

fn gcd(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("gcd", 0, usize::MAX)?;
    let mut acc = BigInt::zero();
    for v in &a {
        acc = acc.gcd(&int_arg(v)?);
    }
    Ok(Value::Int(acc))
}

fn lcm(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("lcm", 0, usize::MAX)?;
    let mut acc = BigInt::one();
    for v in &a {
        let n = int_arg(v)?;
        if n.is_zero() {
            return Ok(Value::int(0));
        }
        acc = acc.lcm(&n);
        ops::check_int_size(interp, acc.bits())?;
    }
    Ok(Value::Int(acc))
}

/// Product of `lo..=hi`, checked against the integer size cap.
pub(crate) fn range_product(interp: &mut Interpreter, lo: &BigInt, hi: &BigInt) -> PyResult<BigInt> {
    let mut acc = BigInt::one();
    let mut i = lo.clone();
    while &i <= hi {
        interp.tick()?;
        acc *= &i;
        ops::check_int_size(interp, acc.bits())?;
        i += 1;
    }
    Ok(acc)
}

pub(crate) fn factorial_of(interp: &mut Interpreter, v: &Value) -> PyResult<BigInt> {
    let n = int_arg(v)?;
    if n.is_negative() {
        return raise(
            ExcKind::ValueError,
            "factorial() not defined for negative values",
        );
    }
    range_product(interp, &BigInt::from(2), &n)
}

fn factorial(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("factorial", 1, 1)?;
    Ok(Value::Int(factorial_of(interp, &a[0])?))
}

fn non_negative(v: &Value, label: &str) -> PyResult<BigInt> {
    let n = int_arg(v)?;
    if n.is_negative() {
        return raise(
            ExcKind::ValueError,
            format!("{} must be a non-negative integer", label),
        );
    }
    Ok(n)
}

pub(crate) fn binomial(interp: &mut Interpreter, n: &BigInt, k: &BigInt) -> PyResult<BigInt> {
    if k > n {
        return Ok(BigInt::zero());
    }
    let k = std::cmp::min(k.clone(), n - k);
    let mut acc = BigInt::one();
    let mut i = BigInt::zero();
    while i < k {
        interp.tick()?;
        acc = acc * (n - &i) / (&i + 1);
        ops::check_int_size(interp, acc.bits())?;
        i += 1;
    }
    Ok(acc)
}

fn comb(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("comb", 2, 2)?;
    let n = non_negative(&a[0], "n")?;
    let k = non_negative(&a[1], "k")?;
    Ok(Value::Int(binomial(interp, &n, &k)?))
}

fn perm(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("perm", 1, 2)?;
    let n = non_negative(&a[0], "n")?;
    let k = match a.get(1) {
        None | Some(Value::None) => n.clone(),
        Some(v) => non_negative(v, "k")?,
    };
    if k > n {
        return Ok(Value::int(0));
    }
    let lo = &n - &k + 1;
    Ok(Value::Int(range_product(interp, &lo, &n)?))
}

fn exp(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "exp", f64::exp)
}

/// Natural log of any positive real, including ints too large for a float.
fn ln_of(v: &Value) -> PyResult<f64> {
    if let Value::Int(i) = v {
        if !i.is_positive() {
            return domain_error();
        }
        if i.to_f64().map_or(true, f64::is_infinite) {
            let shift = i.bits() - 64;
            let top = (i >> shift as usize).to_f64().unwrap_or(f64::MAX);
            return Ok(top.ln() + shift as f64 * consts::LN_2);
        }
    }
    let x = v.as_f64()?;
    if x <= 0.0 || x.is_nan() {
        if x.is_nan() {
            return Ok(x);
        }
        return domain_error();
    }
    Ok(x.ln())
}

fn log(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("log", 1, 2)?;
    let num = ln_of(&a[0])?;
    match a.get(1) {
        None => Ok(Value::Float(num)),
        Some(base) => {
            let den = ln_of(base)?;
            if den == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float division by zero");
            }
            Ok(Value::Float(num / den))
        }
    }
}

fn log2(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("log2", 1, 1)?;
    if let Value::Int(i) = &a[0] {
        if i.is_positive() && i.to_f64().map_or(true, f64::is_infinite) {
            return Ok(Value::Float(ln_of(&a[0])? / consts::LN_2));
        }
    }
    ln_of(&a[0])?;
    Ok(Value::Float(a[0].as_f64()?.log2()))
}

fn log10(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("log10", 1, 1)?;
    if let Value::Int(i) = &a[0] {
        if i.is_positive() && i.to_f64().map_or(true, f64::is_infinite) {
            return Ok(Value::Float(ln_of(&a[0])? / consts::LN_10));
        }
    }
    ln_of(&a[0])?;
    Ok(Value::Float(a[0].as_f64()?.log10()))
}

fn pow(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("pow", 2, 2)?;
    let x = a[0].as_f64()?;
    let y = a[1].as_f64()?;
    if x == 0.0 && y < 0.0 {
        return domain_error();
    }
    if x < 0.0 && x.is_finite() && y.is_finite() && y.fract() != 0.0 {
        return domain_error();
    }
    let r = x.powf(y);
    if r.is_infinite() && x.is_finite() && y.is_finite() {
        return range_error();
    }
    Ok(Value::Float(r))
}

fn sin(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "sin", f64::sin)
}

fn cos(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "cos", f64::cos)
}

fn tan(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "tan", f64::tan)
}

fn asin(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "asin", f64::asin)
}

fn acos(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "acos", f64::acos)
}

fn atan(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "atan", f64::atan)
}

fn atan2(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("atan2", 2, 2)?;
    Ok(Value::Float(a[0].as_f64()?.atan2(a[1].as_f64()?)))
}

fn sinh(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "sinh", f64::sinh)
}

fn cosh(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "cosh", f64::cosh)
}

fn tanh(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    real_fn(args, "tanh", f64::tanh)
}

fn hypot(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("hypot", 0, usize::MAX)?;
    let mut acc = 0.0f64;
    for v in &a {
        acc = acc.hypot(v.as_f64()?);
    }
    Ok(Value::Float(acc))
}

fn degrees(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(Value::Float(one_float(args, "degrees")?.to_degrees()))
}

fn radians(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(Value::Float(one_float(args, "radians")?.to_radians()))
}

pub(crate) fn close(a: f64, b: f64, rel_tol: f64, abs_tol: f64) -> bool {
    if a == b {
        return true;
    }
    if a.is_infinite() || b.is_infinite() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= (rel_tol * b).abs() || diff <= (rel_tol * a).abs() || diff <= abs_tol
}

fn isclose(_: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let rel_tol = match args.take_keyword("rel_tol") {
        Some(v) => v.as_f64()?,
        None => 1e-9,
    };
    let abs_tol = match args.take_keyword("abs_tol") {
        Some(v) => v.as_f64()?,
        None => 0.0,
    };
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return raise(ExcKind::ValueError, "tolerances must be non-negative");
    }
    let a = args.positional("isclose", 2, 2)?;
    Ok(Value::Bool(close(a[0].as_f64()?, a[1].as_f64()?, rel_tol, abs_tol)))
}

fn isfinite(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(Value::Bool(one_float(args, "isfinite")?.is_finite()))
}

fn isinf(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(Value::Bool(one_float(args, "isinf")?.is_infinite()))
}

fn isnan(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(Value::Bool(one_float(args, "isnan")?.is_nan()))
}

fn prod(interp: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let start = args.take_keyword("start").unwrap_or_else(|| Value::int(1));
    let a = args.positional("prod", 1, 1)?;
    let mut acc = start;
    for item in interp.iterate(&a[0])? {
        interp.tick()?;
        acc = ops::binary_op(interp, BinOp::Mul, &acc, &item)?;
    }
    Ok(acc)
}

/// Exactly rounded float sum using Shewchuk's partials.
pub(crate) fn exact_sum(values: impl IntoIterator<Item = f64>) -> PyResult<f64> {
    let mut partials: Vec<f64> = Vec::new();
    let mut special = 0.0f64;
    let mut inf_sum = 0.0f64;
    for mut x in values {
        if !x.is_finite() {
            if x.is_infinite() {
                inf_sum += x;
            }
            special += x;
            continue;
        }
        let mut kept = 0;
        for i in 0..partials.len() {
            let mut y = partials[i];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                partials[kept] = lo;
                kept += 1;
            }
            x = hi;
        }
        partials.truncate(kept);
        if x.is_infinite() {
            return raise(ExcKind::OverflowError, "intermediate overflow in fsum");
        }
        partials.push(x);
    }
    if special != 0.0 || special.is_nan() {
        if inf_sum.is_nan() {
            return raise(ExcKind::ValueError, "-inf + inf in fsum");
        }
        return Ok(special);
    }
    let mut hi = match partials.pop() {
        Some(x) => x,
        None => return Ok(0.0),
    };
    let mut lo = 0.0;
    while let Some(y) = partials.pop() {
        let x = hi;
        hi = x + y;
        lo = y - (hi - x);
        if lo != 0.0 {
            break;
        }
    }
    if let Some(next) = partials.last() {
        if (lo < 0.0 && *next < 0.0) || (lo > 0.0 && *next > 0.0) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
    }
    Ok(hi)
}

fn fsum(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("fsum", 1, 1)?;
    let items = interp.collect(&a[0])?;
    let values: Vec<f64> = items.iter().map(Value::as_f64).collect::<PyResult<_>>()?;
    Ok(Value::Float(exact_sum(values)?))
}

fn copysign(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("copysign", 2, 2)?;
    Ok(Value::Float(a[0].as_f64()?.copysign(a[1].as_f64()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_sum_beats_naive_addition() {
        let values = vec![0.1; 10];
        assert_eq!(exact_sum(values).unwrap(), 1.0);
        assert_eq!(exact_sum(vec![1e100, 1.0, -1e100]).unwrap(), 1.0);
        assert!(exact_sum(vec![f64::INFINITY, 1.0]).unwrap().is_infinite());
    }

    #[test]
    fn test_close() {
        assert!(close(1.0, 1.0 + 1e-10, 1e-9, 0.0));
        assert!(!close(1.0, 1.1, 1e-9, 0.0));
        assert!(close(0.0, 1e-12, 1e-9, 1e-10));
        assert!(!close(f64::INFINITY, 1e308, 1e-9, 0.0));
    }

    #[test]
    fn test_ln_of_huge_int() {
        let big = Value::Int(BigInt::from(10).pow(400u32));
        let ln = ln_of(&big).unwrap();
        assert!((ln - 400.0 * consts::LN_10).abs() < 1e-9);
        assert!(ln_of(&Value::int(0)).is_err());
    }
}
