//! Operators, comparisons and subscripting.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::exception::{raise, ExcKind, PyResult};
use super::ndarray;
use super::value::{bigint_to_f64, float_to_ratio, ratio_to_f64, Dict, Set, Value};
use super::{format, Interpreter, MAX_VALUE_DEPTH};

/// Bounds of a `start:stop:step` subscript, before clamping.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    /// Clamp against a sequence length, returning `(start, stop, step)`.
    pub fn indices(&self, len: usize) -> PyResult<(i64, i64, i64)> {
        let len = len as i64;
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return raise(ExcKind::ValueError, "slice step cannot be zero");
        }
        let clamp = |bound: Option<i64>, default: i64, low: i64, high: i64| match bound {
            None => default,
            Some(b) if b < 0 => (b + len).max(low),
            Some(b) => b.min(high),
        };
        let (start, stop) = if step > 0 {
            (clamp(self.start, 0, 0, len), clamp(self.stop, len, 0, len))
        } else {
            (
                clamp(self.start, len - 1, -1, len - 1),
                clamp(self.stop, -1, -1, len - 1),
            )
        };
        Ok((start, stop, step))
    }

    /// The element positions this slice selects.
    pub fn positions(&self, len: usize) -> PyResult<Vec<usize>> {
        let (start, stop, step) = self.indices(len)?;
        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            i += step;
        }
        Ok(out)
    }
}

/// An evaluated subscript.
#[derive(Debug, Clone)]
pub(crate) enum Index {
    Value(Value),
    Slice(SliceSpec),
    /// A tuple subscript containing at least one slice, as in `a[:, 0]`.
    Multi(Vec<Index>),
}

enum Num {
    Int(BigInt),
    Frac(BigRational),
    Float(f64),
}

fn to_num(v: &Value) -> Option<Num> {
    Some(match v {
        Value::Bool(b) => Num::Int(BigInt::from(*b as i64)),
        Value::Int(i) => Num::Int(i.clone()),
        Value::Float(f) => Num::Float(*f),
        Value::Fraction(r) => Num::Frac((**r).clone()),
        _ => return None,
    })
}

fn is_numeric(v: &Value) -> bool {
    matches!(
        v,
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Fraction(_)
    )
}

fn unsupported<T>(op: &str, l: &Value, r: &Value) -> PyResult<T> {
    raise(
        ExcKind::TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            l.type_name(),
            r.type_name()
        ),
    )
}

fn op_label(op: BinOp) -> &'static str {
    match op {
        BinOp::Pow => "** or pow()",
        other => other.symbol(),
    }
}

// ----- binary operators ---------------------------------------------------

pub(crate) fn binary_op(interp: &mut Interpreter, op: BinOp, l: &Value, r: &Value) -> PyResult<Value> {
    if matches!(l, Value::Array(_)) || matches!(r, Value::Array(_)) {
        return ndarray::binary(interp, op, l, r);
    }
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        return int_op(interp, op, a, b);
    }
    if is_numeric(l) && is_numeric(r) {
        return numeric_op(interp, op, l, r);
    }
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            interp.check_str_len(a.len() + b.len())?;
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::string(s))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            interp.check_len(items.len())?;
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            interp.check_len(a.len() + b.len())?;
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Add, Value::Str(_), other) => raise(
            ExcKind::TypeError,
            format!("can only concatenate str (not \"{}\") to str", other.type_name()),
        ),
        (BinOp::Add, Value::List(_), other) => raise(
            ExcKind::TypeError,
            format!("can only concatenate list (not \"{}\") to list", other.type_name()),
        ),
        (BinOp::Add, Value::Tuple(_), other) => raise(
            ExcKind::TypeError,
            format!("can only concatenate tuple (not \"{}\") to tuple", other.type_name()),
        ),
        (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
            if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_))
                && matches!(n, Value::Int(_) | Value::Bool(_)) =>
        {
            repeat(interp, seq, n)
        }
        (BinOp::Mul, seq, n) if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) => {
            raise(
                ExcKind::TypeError,
                format!(
                    "can't multiply sequence by non-int of type '{}'",
                    n.type_name()
                ),
            )
        }
        (BinOp::Mod, Value::Str(fmt), args) => {
            interp.check_printable(args)?;
            let out = format::percent_format(fmt, args)?;
            interp.check_str_len(out.len())?;
            Ok(Value::string(out))
        }
        (_, Value::Set(a), Value::Set(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            let out = match op {
                BinOp::BitOr => {
                    let mut out = a.clone();
                    for v in b.iter() {
                        out.add(v.clone())?;
                    }
                    out
                }
                BinOp::BitAnd => filter_set(&a, |v| b.contains(v))?,
                BinOp::Sub => filter_set(&a, |v| Ok(!b.contains(v)?))?,
                BinOp::BitXor => {
                    let mut out = filter_set(&a, |v| Ok(!b.contains(v)?))?;
                    for v in b.iter() {
                        if !a.contains(v)? {
                            out.add(v.clone())?;
                        }
                    }
                    out
                }
                _ => return unsupported(op_label(op), l, r),
            };
            Ok(Value::set(out))
        }
        (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut out = a.borrow().clone();
            for (k, v) in b.borrow().iter() {
                out.insert(k.clone(), v.clone())?;
            }
            Ok(Value::dict(out))
        }
        _ => unsupported(op_label(op), l, r),
    }
}

fn filter_set(set: &Set, mut keep: impl FnMut(&Value) -> PyResult<bool>) -> PyResult<Set> {
    let mut out = Set::new();
    for v in set.iter() {
        if keep(v)? {
            out.add(v.clone())?;
        }
    }
    Ok(out)
}

fn repeat(interp: &mut Interpreter, seq: &Value, n: &Value) -> PyResult<Value> {
    let count = match n.as_bigint_exact().and_then(|i| i.to_i64()) {
        Some(c) => c.max(0) as usize,
        None if n.as_bigint_exact().map_or(false, |i| i.is_negative()) => 0,
        None => {
            return raise(
                ExcKind::OverflowError,
                "cannot fit 'int' into an index-sized integer",
            )
        }
    };
    match seq {
        Value::Str(s) => {
            let total = s.len().checked_mul(count).unwrap_or(usize::MAX);
            let mut out = interp.alloc_string(total)?;
            for _ in 0..count {
                out.push_str(s);
            }
            Ok(Value::string(out))
        }
        Value::List(items) => {
            let items = items.borrow();
            let total = items.len().checked_mul(count).unwrap_or(usize::MAX);
            let mut out = interp.alloc_vec(total)?;
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        Value::Tuple(items) => {
            let total = items.len().checked_mul(count).unwrap_or(usize::MAX);
            let mut out = interp.alloc_vec(total)?;
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::tuple(out))
        }
        _ => unsupported("*", seq, n),
    }
}

pub(crate) fn check_int_size(interp: &Interpreter, bits: u64) -> PyResult<()> {
    if bits > interp.limits().max_int_bits {
        return raise(ExcKind::OverflowError, "integer result too large");
    }
    Ok(())
}

fn int_op(interp: &mut Interpreter, op: BinOp, a: &BigInt, b: &BigInt) -> PyResult<Value> {
    Ok(match op {
        BinOp::Add => Value::Int(a + b),
        BinOp::Sub => Value::Int(a - b),
        BinOp::Mul => {
            check_int_size(interp, a.bits() + b.bits())?;
            Value::Int(a * b)
        }
        BinOp::Div => {
            if b.is_zero() {
                return raise(ExcKind::ZeroDivisionError, "division by zero");
            }
            Value::Float(int_true_div(a, b)?)
        }
        BinOp::FloorDiv => {
            if b.is_zero() {
                return raise(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                );
            }
            Value::Int(a.div_floor(b))
        }
        BinOp::Mod => {
            if b.is_zero() {
                return raise(ExcKind::ZeroDivisionError, "integer modulo by zero");
            }
            Value::Int(a.mod_floor(b))
        }
        BinOp::Pow => return int_pow(interp, a, b),
        BinOp::LShift => {
            if b.is_negative() {
                return raise(ExcKind::ValueError, "negative shift count");
            }
            if a.is_zero() {
                return Ok(Value::int(0));
            }
            let shift = match b.to_u64() {
                Some(s) => s,
                None => return raise(ExcKind::OverflowError, "integer result too large"),
            };
            check_int_size(interp, a.bits().saturating_add(shift))?;
            Value::Int(a << shift as usize)
        }
        BinOp::RShift => {
            if b.is_negative() {
                return raise(ExcKind::ValueError, "negative shift count");
            }
            match b.to_u64() {
                Some(s) if s < a.bits() + 1 => Value::Int(a >> s as usize),
                _ => Value::int(if a.is_negative() { -1 } else { 0 }),
            }
        }
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitOr => Value::Int(a | b),
        BinOp::BitXor => Value::Int(a ^ b),
        BinOp::MatMul => return unsupported("@", &Value::Int(a.clone()), &Value::Int(b.clone())),
    })
}

fn int_true_div(a: &BigInt, b: &BigInt) -> PyResult<f64> {
    if a.bits() <= 53 && b.bits() <= 53 {
        if let (Some(x), Some(y)) = (a.to_f64(), b.to_f64()) {
            return Ok(x / y);
        }
    }
    let q = ratio_to_f64(&BigRational::new(a.clone(), b.clone()));
    if q.is_infinite() {
        return raise(
            ExcKind::OverflowError,
            "integer division result too large for a float",
        );
    }
    Ok(q)
}

fn int_pow(interp: &mut Interpreter, a: &BigInt, b: &BigInt) -> PyResult<Value> {
    if b.is_negative() {
        if a.is_zero() {
            return raise(
                ExcKind::ZeroDivisionError,
                "0.0 cannot be raised to a negative power",
            );
        }
        return float_pow(bigint_to_f64(a)?, bigint_to_f64(b)?);
    }
    if a.is_zero() || a.is_one() {
        return Ok(Value::Int(if b.is_zero() { BigInt::one() } else { a.clone() }));
    }
    if *a == BigInt::from(-1) {
        return Ok(Value::int(if b.is_even() { 1 } else { -1 }));
    }
    let exp = match b.to_u32() {
        Some(e) => e,
        None => return raise(ExcKind::OverflowError, "integer result too large"),
    };
    let estimate = (a.bits().saturating_sub(1)).saturating_mul(exp as u64);
    check_int_size(interp, estimate)?;
    Ok(Value::Int(a.pow(exp)))
}

fn float_pow(x: f64, y: f64) -> PyResult<Value> {
    if x == 0.0 && y < 0.0 {
        return raise(
            ExcKind::ZeroDivisionError,
            "0.0 cannot be raised to a negative power",
        );
    }
    if x < 0.0 && x.is_finite() && y.is_finite() && y.fract() != 0.0 {
        return raise(
            ExcKind::ValueError,
            "negative number cannot be raised to a fractional power",
        );
    }
    let out = x.powf(y);
    if out.is_infinite() && x.is_finite() && y.is_finite() {
        return raise(ExcKind::OverflowError, "(34, 'Numerical result out of range')");
    }
    Ok(Value::Float(out))
}

/// Python's floor division and modulo for floats.
pub(crate) fn float_divmod(x: f64, y: f64) -> (f64, f64) {
    let mut rem = x % y;
    let mut div = (x - rem) / y;
    if rem != 0.0 {
        if (y < 0.0) != (rem < 0.0) {
            rem += y;
            div -= 1.0;
        }
    } else {
        rem = 0.0f64.copysign(y);
    }
    let floordiv = if div != 0.0 {
        let f = div.floor();
        if div - f > 0.5 {
            f + 1.0
        } else {
            f
        }
    } else {
        0.0f64.copysign(x / y)
    };
    (floordiv, rem)
}

fn numeric_op(interp: &mut Interpreter, op: BinOp, l: &Value, r: &Value) -> PyResult<Value> {
    if let (Value::Bool(a), Value::Bool(b)) = (l, r) {
        match op {
            BinOp::BitAnd => return Ok(Value::Bool(*a & *b)),
            BinOp::BitOr => return Ok(Value::Bool(*a | *b)),
            BinOp::BitXor => return Ok(Value::Bool(*a ^ *b)),
            _ => {}
        }
    }
    let (a, b) = match (to_num(l), to_num(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => return unsupported(op_label(op), l, r),
    };
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_op(interp, op, &a, &b),
        (a, b) if matches!(a, Num::Float(_)) || matches!(b, Num::Float(_)) => {
            let x = num_to_f64(&a)?;
            let y = num_to_f64(&b)?;
            float_op(op, x, y, l, r)
        }
        (a, b) => {
            let x = num_to_ratio(a);
            let y = num_to_ratio(b);
            fraction_op(op, x, y, l, r)
        }
    }
}

fn num_to_f64(n: &Num) -> PyResult<f64> {
    match n {
        Num::Int(i) => bigint_to_f64(i),
        Num::Frac(r) => Ok(ratio_to_f64(r)),
        Num::Float(f) => Ok(*f),
    }
}

fn num_to_ratio(n: Num) -> BigRational {
    match n {
        Num::Int(i) => BigRational::from_integer(i),
        Num::Frac(r) => r,
        Num::Float(_) => BigRational::zero(),
    }
}

pub(crate) fn float_op(op: BinOp, x: f64, y: f64, l: &Value, r: &Value) -> PyResult<Value> {
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float division by zero");
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float floor division by zero");
            }
            float_divmod(x, y).0
        }
        BinOp::Mod => {
            if y == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float modulo by zero");
            }
            float_divmod(x, y).1
        }
        BinOp::Pow => return float_pow(x, y),
        _ => return unsupported(op_label(op), l, r),
    }))
}

fn fraction_op(op: BinOp, x: BigRational, y: BigRational, l: &Value, r: &Value) -> PyResult<Value> {
    let zero_message = format!("Fraction({}, 0)", x.numer() * y.denom());
    let zero_div = || raise(ExcKind::ZeroDivisionError, zero_message.clone());
    Ok(match op {
        BinOp::Add => Value::fraction(x + y),
        BinOp::Sub => Value::fraction(x - y),
        BinOp::Mul => Value::fraction(x * y),
        BinOp::Div => {
            if y.is_zero() {
                return zero_div();
            }
            Value::fraction(x / y)
        }
        BinOp::FloorDiv => {
            if y.is_zero() {
                return zero_div();
            }
            Value::Int((x / y).floor().to_integer())
        }
        BinOp::Mod => {
            if y.is_zero() {
                return zero_div();
            }
            let q = (&x / &y).floor();
            Value::fraction(x - y * q)
        }
        BinOp::Pow => {
            if y.is_integer() {
                let exp = match y.to_integer().to_i32() {
                    Some(e) => e,
                    None => return raise(ExcKind::OverflowError, "integer result too large"),
                };
                if x.is_zero() && exp < 0 {
                    return zero_div();
                }
                let bits = x.numer().bits().max(x.denom().bits());
                if bits.saturating_mul(exp.unsigned_abs() as u64) > 1_000_000 {
                    return raise(ExcKind::OverflowError, "integer result too large");
                }
                Value::fraction(x.pow(exp))
            } else {
                return float_pow(ratio_to_f64(&x), ratio_to_f64(&y));
            }
        }
        _ => return unsupported(op_label(op), l, r),
    })
}

/// `a op= b`, mutating mutable containers in place.
pub(crate) fn inplace_op(interp: &mut Interpreter, op: BinOp, cur: &Value, rhs: &Value) -> PyResult<Value> {
    match (op, cur) {
        (BinOp::Add, Value::List(items)) => {
            let extra = interp.collect(rhs)?;
            let new_len = items.borrow().len() + extra.len();
            interp.check_len(new_len)?;
            items.borrow_mut().extend(extra);
            Ok(cur.clone())
        }
        (BinOp::Mul, Value::List(items)) if matches!(rhs, Value::Int(_) | Value::Bool(_)) => {
            let repeated = repeat(interp, cur, rhs)?;
            if let Value::List(new_items) = repeated {
                let new_items = new_items.borrow().clone();
                *items.borrow_mut() = new_items;
            }
            Ok(cur.clone())
        }
        (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(set))
            if matches!(rhs, Value::Set(_)) =>
        {
            if let Value::Set(result) = binary_op(interp, op, cur, rhs)? {
                let result = result.borrow().clone();
                *set.borrow_mut() = result;
            }
            Ok(cur.clone())
        }
        (BinOp::BitOr, Value::Dict(d)) if matches!(rhs, Value::Dict(_)) => {
            if let Value::Dict(other) = rhs {
                let entries: Vec<(Value, Value)> = other
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut d = d.borrow_mut();
                for (k, v) in entries {
                    d.insert(k, v)?;
                }
            }
            Ok(cur.clone())
        }
        (_, Value::Array(arr)) => {
            if let Value::Array(result) = binary_op(interp, op, cur, rhs)? {
                let result = result.borrow().clone();
                *arr.borrow_mut() = result;
            }
            Ok(cur.clone())
        }
        _ => binary_op(interp, op, cur, rhs),
    }
}

pub(crate) fn unary_op(interp: &mut Interpreter, op: UnaryOp, v: &Value) -> PyResult<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!v.truthy()?));
    }
    if let Value::Array(a) = v {
        return ndarray::unary(interp, op, &a.borrow());
    }
    let bad = |symbol: &str| {
        raise(
            ExcKind::TypeError,
            format!("bad operand type for unary {}: '{}'", symbol, v.type_name()),
        )
    };
    match (op, v) {
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::int(-(*b as i64))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::Fraction(r)) => Ok(Value::fraction(-(**r).clone())),
        (UnaryOp::Neg, _) => bad("-"),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::int(*b as i64)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_) | Value::Fraction(_)) => Ok(v.clone()),
        (UnaryOp::Pos, _) => bad("+"),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(-i - BigInt::one())),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::int(-(*b as i64) - 1)),
        (UnaryOp::Invert, _) => bad("~"),
        (UnaryOp::Not, _) => Ok(Value::Bool(!v.truthy()?)),
    }
}

// ----- comparison ----------------------------------------------------------

pub(crate) fn compare(interp: &mut Interpreter, op: CmpOp, l: &Value, r: &Value) -> PyResult<Value> {
    let _ = interp;
    match op {
        CmpOp::In => return Ok(Value::Bool(contains(r, l)?)),
        CmpOp::NotIn => return Ok(Value::Bool(!contains(r, l)?)),
        CmpOp::Is => return Ok(Value::Bool(identical(l, r))),
        CmpOp::IsNot => return Ok(Value::Bool(!identical(l, r))),
        _ => {}
    }
    if matches!(l, Value::Array(_)) || matches!(r, Value::Array(_)) {
        return ndarray::compare(op, l, r);
    }
    Ok(Value::Bool(match op {
        CmpOp::Eq => equals(l, r)?,
        CmpOp::NotEq => !equals(l, r)?,
        _ => ordered(op, l, r)?,
    }))
}

/// `a is b`.
pub(crate) fn identical(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => {
            a == b && *a >= BigInt::from(-5) && *a <= BigInt::from(256)
        }
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || (a.len() <= 1 && a == b),
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
        (Value::Fraction(a), Value::Fraction(b)) => Rc::ptr_eq(a, b),
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
        (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
        (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
        (Value::Type(a), Value::Type(b)) => a == b,
        (Value::Range(a), Value::Range(b)) => a == b,
        _ => false,
    }
}

/// `a == b` for non-array values.
pub(crate) fn equals(l: &Value, r: &Value) -> PyResult<bool> {
    equals_at(l, r, 0)
}

fn equals_at(l: &Value, r: &Value, depth: usize) -> PyResult<bool> {
    if depth > MAX_VALUE_DEPTH {
        return raise(
            ExcKind::RecursionError,
            "maximum recursion depth exceeded in comparison",
        );
    }
    if is_numeric(l) && is_numeric(r) {
        return Ok(cmp_numbers(l, r)? == Some(Ordering::Equal));
    }
    let element_eq = |a: &Value, b: &Value| -> PyResult<bool> {
        Ok(identical(a, b) || equals_at(a, b, depth + 1)?)
    };
    Ok(match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(true);
            }
            let a = a.borrow().clone();
            let b = b.borrow().clone();
            seq_equal(&a, &b, element_eq)?
        }
        (Value::Tuple(a), Value::Tuple(b)) => seq_equal(a, b, element_eq)?,
        (Value::Dict(a), Value::Dict(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(true);
            }
            let a = a.borrow();
            let b = b.borrow();
            if a.len() != b.len() {
                return Ok(false);
            }
            for (k, v) in a.iter() {
                match b.get(k)? {
                    Some(other) if element_eq(v, &other)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(a), Value::Set(b)) => {
            let a = a.borrow();
            let b = b.borrow();
            if a.len() != b.len() {
                return Ok(false);
            }
            for v in a.iter() {
                if !b.contains(v)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Range(a), Value::Range(b)) => {
            let (la, lb) = (a.len(), b.len());
            la == lb && (la == 0 || (a.start == b.start && (la == 1 || a.step == b.step)))
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => {
            ndarray::compare(CmpOp::Eq, l, r)?.truthy()?
        }
        _ => identical(l, r),
    })
}

fn seq_equal(
    a: &[Value],
    b: &[Value],
    eq: impl Fn(&Value, &Value) -> PyResult<bool>,
) -> PyResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !eq(x, y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Exact comparison across the numeric tower. `None` when either side is NaN.
pub(crate) fn cmp_numbers(l: &Value, r: &Value) -> PyResult<Option<Ordering>> {
    let (a, b) = match (to_num(l), to_num(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => return unsupported("<", l, r),
    };
    Ok(match (a, b) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (Num::Float(x), Num::Float(y)) => x.partial_cmp(&y),
        (Num::Float(x), other) => cmp_float_exact(x, other).map(Ordering::reverse),
        (other, Num::Float(y)) => cmp_float_exact(y, other),
        (a, b) => Some(num_to_ratio(a).cmp(&num_to_ratio(b))),
    })
}

/// Compare an exact number against a float, `other <=> x`.
fn cmp_float_exact(x: f64, other: Num) -> Option<Ordering> {
    if x.is_nan() {
        return None;
    }
    if x.is_infinite() {
        return Some(if x > 0.0 { Ordering::Less } else { Ordering::Greater });
    }
    let exact = float_to_ratio(x).ok()?;
    Some(num_to_ratio(other).cmp(&exact))
}

fn ordered(op: CmpOp, l: &Value, r: &Value) -> PyResult<bool> {
    if let (Value::Set(a), Value::Set(b)) = (l, r) {
        let a = a.borrow();
        let b = b.borrow();
        let subset = |x: &Set, y: &Set| -> PyResult<bool> {
            for v in x.iter() {
                if !y.contains(v)? {
                    return Ok(false);
                }
            }
            Ok(true)
        };
        return Ok(match op {
            CmpOp::LtE => subset(&a, &b)?,
            CmpOp::Lt => a.len() < b.len() && subset(&a, &b)?,
            CmpOp::GtE => subset(&b, &a)?,
            _ => a.len() > b.len() && subset(&b, &a)?,
        });
    }
    let ord = match compare_order(l, r, op.symbol(), 0)? {
        Some(o) => o,
        None => return Ok(false),
    };
    Ok(match op {
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::LtE => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    })
}

/// Ordering used by `<` and sorting. `None` means unordered (NaN).
fn compare_order(l: &Value, r: &Value, symbol: &str, depth: usize) -> PyResult<Option<Ordering>> {
    if depth > MAX_VALUE_DEPTH {
        return raise(
            ExcKind::RecursionError,
            "maximum recursion depth exceeded in comparison",
        );
    }
    if is_numeric(l) && is_numeric(r) {
        return cmp_numbers(l, r);
    }
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.as_ref().cmp(b.as_ref()))),
        (Value::List(a), Value::List(b)) => {
            let a = a.borrow().clone();
            let b = b.borrow().clone();
            seq_order(&a, &b, symbol, depth)
        }
        (Value::Tuple(a), Value::Tuple(b)) => seq_order(a, b, symbol, depth),
        (Value::Array(a), other) | (other, Value::Array(a)) if a.borrow().ndim() == 0 => {
            let scalar = a.borrow().scalar_value();
            if matches!(l, Value::Array(_)) {
                compare_order(&scalar, other, symbol, depth + 1)
            } else {
                compare_order(other, &scalar, symbol, depth + 1)
            }
        }
        _ => raise(
            ExcKind::TypeError,
            format!(
                "'{}' not supported between instances of '{}' and '{}'",
                symbol,
                l.type_name(),
                r.type_name()
            ),
        ),
    }
}

fn seq_order(a: &[Value], b: &[Value], symbol: &str, depth: usize) -> PyResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if identical(x, y) || equals_at(x, y, depth + 1)? {
            continue;
        }
        return compare_order(x, y, symbol, depth + 1);
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// `a < b` as used by `sorted`, `min` and `max`.
pub(crate) fn less_than(a: &Value, b: &Value) -> PyResult<bool> {
    Ok(compare_order(a, b, "<", 0)? == Some(Ordering::Less))
}

/// Stable merge sort with a fallible comparator. Iterative, so it never
/// recurses and never relies on the comparator being a total order.
pub(crate) fn merge_sort<T: Clone>(
    interp: &mut Interpreter,
    items: Vec<T>,
    less: &mut dyn FnMut(&T, &T) -> PyResult<bool>,
) -> PyResult<Vec<T>> {
    let n = items.len();
    let mut src = items;
    let mut width = 1;
    while width < n {
        let mut dst = Vec::with_capacity(n);
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                interp.tick()?;
                if less(&src[j], &src[i])? {
                    dst.push(src[j].clone());
                    j += 1;
                } else {
                    dst.push(src[i].clone());
                    i += 1;
                }
            }
            dst.extend_from_slice(&src[i..mid]);
            dst.extend_from_slice(&src[j..end]);
            start = end;
        }
        src = dst;
        width *= 2;
    }
    Ok(src)
}

/// Sort values, optionally through a key function, the way `sorted` does.
pub(crate) fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> PyResult<Vec<Value>> {
    let keyed: Vec<(Value, Value)> = match key {
        Some(f) if !f.is_none() => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let k = interp.call1(f, item.clone())?;
                out.push((k, item));
            }
            out
        }
        _ => items.into_iter().map(|v| (v.clone(), v)).collect(),
    };
    let sorted = merge_sort(interp, keyed, &mut |a: &(Value, Value), b: &(Value, Value)| {
        if reverse {
            less_than(&b.0, &a.0)
        } else {
            less_than(&a.0, &b.0)
        }
    })?;
    Ok(sorted.into_iter().map(|(_, v)| v).collect())
}

/// `item in container`.
pub(crate) fn contains(container: &Value, item: &Value) -> PyResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => raise(
                ExcKind::TypeError,
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            ),
        },
        Value::List(items) => {
            let items = items.borrow().clone();
            any_equal(&items, item)
        }
        Value::Tuple(items) => any_equal(items, item),
        Value::Dict(d) => d.borrow().contains(item),
        Value::Set(s) => s.borrow().contains(item),
        Value::Range(r) => {
            let n = match item {
                Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e18 => *f as i64,
                Value::Int(_) | Value::Bool(_) => {
                    match item.as_bigint_exact().and_then(|i| i.to_i64()) {
                        Some(n) => n,
                        None => return Ok(false),
                    }
                }
                _ => return Ok(false),
            };
            let len = r.len() as i128;
            if len == 0 {
                return Ok(false);
            }
            let offset = n as i128 - r.start as i128;
            let step = r.step as i128;
            Ok(offset % step == 0 && (0..len).contains(&(offset / step)))
        }
        Value::Array(a) => ndarray::contains(&a.borrow(), item),
        other => raise(
            ExcKind::TypeError,
            format!("argument of type '{}' is not iterable", other.type_name()),
        ),
    }
}

fn any_equal(items: &[Value], item: &Value) -> PyResult<bool> {
    for v in items {
        if identical(v, item) || equals(v, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ----- subscripting ---------------------------------------------------------

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    if (0..len).contains(&i) {
        Some(i as usize)
    } else {
        None
    }
}

fn sequence_index(container: &Value, key: &Value, len: usize) -> PyResult<usize> {
    let what = container.type_name();
    let i = match key {
        Value::Int(_) | Value::Bool(_) => key.as_index()?,
        Value::Array(a) if a.borrow().scalar_int().is_some() => key.as_index()?,
        other => {
            return raise(
                ExcKind::TypeError,
                if what == "str" {
                    format!("string indices must be integers, not '{}'", other.type_name())
                } else {
                    format!(
                        "{} indices must be integers or slices, not {}",
                        what,
                        other.type_name()
                    )
                },
            )
        }
    };
    match normalize_index(i, len) {
        Some(i) => Ok(i),
        None => raise(
            ExcKind::IndexError,
            match what {
                "str" => "string index out of range".to_string(),
                "range" => "range object index out of range".to_string(),
                other => format!("{} index out of range", other),
            },
        ),
    }
}

fn not_subscriptable<T>(v: &Value) -> PyResult<T> {
    raise(
        ExcKind::TypeError,
        format!("'{}' object is not subscriptable", v.type_name()),
    )
}

pub(crate) fn get_item(interp: &mut Interpreter, container: &Value, index: Index) -> PyResult<Value> {
    if let Value::Array(a) = container {
        return ndarray::get_item(interp, a, index);
    }
    match index {
        Index::Value(key) => match container {
            Value::List(items) => {
                let items = items.borrow();
                let i = sequence_index(container, &key, items.len())?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = sequence_index(container, &key, items.len())?;
                Ok(items[i].clone())
            }
            Value::Str(s) if s.is_ascii() => {
                let i = sequence_index(container, &key, s.len())?;
                Ok(Value::str(&s[i..i + 1]))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = sequence_index(container, &key, chars.len())?;
                Ok(Value::string(chars[i].to_string()))
            }
            Value::Range(r) => {
                let i = sequence_index(container, &key, r.len())?;
                Ok(Value::int(r.get(i)))
            }
            Value::Dict(d) => match d.borrow().get(&key)? {
                Some(v) => Ok(v),
                None => raise(ExcKind::KeyError, interp.repr_of(&key)?),
            },
            other => not_subscriptable(other),
        },
        Index::Slice(spec) => match container {
            Value::List(items) => {
                let items = items.borrow();
                let picked = spec.positions(items.len())?;
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let picked = spec.positions(items.len())?;
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = spec.positions(chars.len())?;
                Ok(Value::string(picked.into_iter().map(|i| chars[i]).collect()))
            }
            Value::Range(r) => {
                let (start, _, step) = spec.indices(r.len())?;
                let picked = spec.positions(r.len())?;
                let new_start = r.start + r.step * start;
                let new_step = r.step * step;
                let new_stop = new_start + new_step * picked.len() as i64;
                Ok(Value::Range(super::value::RangeValue {
                    start: new_start,
                    stop: new_stop,
                    step: new_step,
                }))
            }
            Value::Dict(_) => raise(ExcKind::TypeError, "unhashable type: 'slice'"),
            other => not_subscriptable(other),
        },
        Index::Multi(_) => match container {
            Value::List(_) | Value::Tuple(_) => raise(
                ExcKind::TypeError,
                format!(
                    "{} indices must be integers or slices, not tuple",
                    container.type_name()
                ),
            ),
            Value::Dict(_) => raise(ExcKind::TypeError, "unhashable type: 'slice'"),
            other => not_subscriptable(other),
        },
    }
}

pub(crate) fn set_item(interp: &mut Interpreter, container: &Value, index: Index, value: Value) -> PyResult<()> {
    match (container, index) {
        (Value::Array(a), index) => ndarray::set_item(interp, a, index, value),
        (Value::List(items), Index::Value(key)) => {
            let len = items.borrow().len();
            let i = sequence_index(container, &key, len)?;
            items.borrow_mut()[i] = value;
            Ok(())
        }
        (Value::List(items), Index::Slice(spec)) => {
            let new_items = interp.collect(&value)?;
            let len = items.borrow().len();
            let step = spec.step.unwrap_or(1);
            if step == 1 {
                let (start, stop, _) = spec.indices(len)?;
                let start = start as usize;
                let stop = (stop as usize).max(start);
                interp.check_len(len - (stop - start) + new_items.len())?;
                items.borrow_mut().splice(start..stop, new_items);
                return Ok(());
            }
            let positions = spec.positions(len)?;
            if positions.len() != new_items.len() {
                return raise(
                    ExcKind::ValueError,
                    format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        new_items.len(),
                        positions.len()
                    ),
                );
            }
            let mut items = items.borrow_mut();
            for (pos, v) in positions.into_iter().zip(new_items) {
                items[pos] = v;
            }
            Ok(())
        }
        (Value::Dict(d), Index::Value(key)) => {
            let len = d.borrow().len();
            interp.check_len(len + 1)?;
            d.borrow_mut().insert(key, value)
        }
        (Value::Dict(_), _) => raise(ExcKind::TypeError, "unhashable type: 'slice'"),
        (Value::List(_), Index::Multi(_)) => raise(
            ExcKind::TypeError,
            "list indices must be integers or slices, not tuple",
        ),
        (other, _) => raise(
            ExcKind::TypeError,
            format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ),
        ),
    }
}

pub(crate) fn del_item(interp: &mut Interpreter, container: &Value, index: Index) -> PyResult<()> {
    match (container, index) {
        (Value::List(items), Index::Value(key)) => {
            let len = items.borrow().len();
            let i = sequence_index(container, &key, len)?;
            items.borrow_mut().remove(i);
            Ok(())
        }
        (Value::List(items), Index::Slice(spec)) => {
            let len = items.borrow().len();
            let positions = spec.positions(len)?;
            let mut drop = vec![false; len];
            for p in positions {
                drop[p] = true;
            }
            let kept: Vec<Value> = items
                .borrow()
                .iter()
                .zip(drop)
                .filter(|(_, d)| !d)
                .map(|(v, _)| v.clone())
                .collect();
            *items.borrow_mut() = kept;
            Ok(())
        }
        (Value::Dict(d), Index::Value(key)) => {
            let removed = d.borrow_mut().remove(&key)?;
            match removed {
                Some(_) => Ok(()),
                None => raise(ExcKind::KeyError, interp.repr_of(&key)?),
            }
        }
        (other, _) => raise(
            ExcKind::TypeError,
            format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ),
        ),
    }
}

/// Build a dict from `(key, value)` pairs or another mapping.
pub(crate) fn dict_from(interp: &mut Interpreter, source: &Value) -> PyResult<Dict> {
    if let Value::Dict(d) = source {
        return Ok(d.borrow().clone());
    }
    let mut out = Dict::new();
    for (n, pair) in interp.collect(source)?.into_iter().enumerate() {
        let kv = match &pair {
            Value::Str(_) | Value::List(_) | Value::Tuple(_) => interp.collect(&pair)?,
            _ => {
                return raise(
                    ExcKind::TypeError,
                    format!(
                        "cannot convert dictionary update sequence element #{} to a sequence",
                        n
                    ),
                )
            }
        };
        if kv.len() != 2 {
            return raise(
                ExcKind::ValueError,
                format!(
                    "dictionary update sequence element #{} has length {}; 2 is required",
                    n,
                    kv.len()
                ),
            );
        }
        let mut kv = kv.into_iter();
        if let (Some(k), Some(v)) = (kv.next(), kv.next()) {
            out.insert(k, v)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_indices() {
        let s = SliceSpec {
            start: None,
            stop: None,
            step: Some(-1),
        };
        assert_eq!(s.positions(4).unwrap(), vec![3, 2, 1, 0]);
        let s = SliceSpec {
            start: Some(-2),
            stop: Some(100),
            step: None,
        };
        assert_eq!(s.positions(5).unwrap(), vec![3, 4]);
        let s = SliceSpec {
            start: None,
            stop: None,
            step: Some(0),
        };
        assert!(s.positions(3).is_err());
    }

    #[test]
    fn test_float_divmod_matches_python() {
        assert_eq!(float_divmod(7.0, 2.0), (3.0, 1.0));
        assert_eq!(float_divmod(-7.0, 2.0), (-4.0, 1.0));
        assert_eq!(float_divmod(7.0, -2.0), (-4.0, -1.0));
    }

    #[test]
    fn test_cross_type_equality() {
        assert!(equals(&Value::int(1), &Value::Float(1.0)).unwrap());
        assert!(equals(&Value::Bool(true), &Value::int(1)).unwrap());
        assert!(!equals(&Value::Float(f64::NAN), &Value::Float(f64::NAN)).unwrap());
        assert!(!equals(&Value::str("1"), &Value::int(1)).unwrap());
        let big = BigInt::from(2).pow(60u32) + 1;
        assert!(!equals(&Value::Int(big), &Value::Float(2f64.powi(60))).unwrap());
    }

    #[test]
    fn test_ordering_errors_on_mixed_types() {
        assert!(less_than(&Value::int(1), &Value::int(2)).unwrap());
        assert!(less_than(&Value::str("a"), &Value::int(1)).is_err());
        let a = Value::tuple(vec![Value::int(1), Value::str("b")]);
        let b = Value::tuple(vec![Value::int(1), Value::str("c")]);
        assert!(less_than(&a, &b).unwrap());
    }

    #[test]
    fn test_range_membership() {
        let r = Value::Range(super::super::value::RangeValue {
            start: 0,
            stop: 10,
            step: 3,
        });
        assert!(contains(&r, &Value::int(9)).unwrap());
        assert!(!contains(&r, &Value::int(10)).unwrap());
        assert!(contains(&r, &Value::Float(6.0)).unwrap());
    }
}
