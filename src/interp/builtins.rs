//! The allow-listed builtin functions and type constructors.

use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use super::ast::BinOp;
use super::exception::{raise, ExcKind, PyResult};
use super::modules::fraction;
use super::ndarray::{DType, NdArray};
use super::ops;
use super::value::{
    float_to_bigint, str_repr, Builtin, CallArgs, Dict, NativeFn, RangeValue, Set, TypeKind, Value,
};
use super::Interpreter;

/// Builtins that are plain functions; the type constructors are bound
/// separately as [`Value::Type`].
pub(crate) const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("abs", builtin_abs),
    ("all", builtin_all),
    ("any", builtin_any),
    ("enumerate", builtin_enumerate),
    ("filter", builtin_filter),
    ("len", builtin_len),
    ("map", builtin_map),
    ("max", builtin_max),
    ("min", builtin_min),
    ("pow", builtin_pow),
    ("print", builtin_print),
    ("round", builtin_round),
    ("sorted", builtin_sorted),
    ("sum", builtin_sum),
    ("zip", builtin_zip),
];

pub(crate) const TYPES: &[(&str, TypeKind)] = &[
    ("bool", TypeKind::Bool),
    ("dict", TypeKind::Dict),
    ("float", TypeKind::Float),
    ("int", TypeKind::Int),
    ("list", TypeKind::List),
    ("range", TypeKind::Range),
    ("set", TypeKind::Set),
    ("str", TypeKind::Str),
    ("tuple", TypeKind::Tuple),
    ("type", TypeKind::Type),
];

pub(crate) fn builtin_value(name: &'static str, func: NativeFn) -> Value {
    Value::Builtin(Rc::new(Builtin { name, func }))
}

/// Calling a type object.
pub(crate) fn construct(interp: &mut Interpreter, kind: TypeKind, args: CallArgs) -> PyResult<Value> {
    match kind {
        TypeKind::Bool => {
            let args = args.positional("bool", 0, 1)?;
            match args.first() {
                Some(v) => Ok(Value::Bool(v.truthy()?)),
                None => Ok(Value::Bool(false)),
            }
        }
        TypeKind::Int => construct_int(interp, args),
        TypeKind::Float => {
            let args = args.positional("float", 0, 1)?;
            match args.first() {
                Some(v) => to_float(v).map(Value::Float),
                None => Ok(Value::Float(0.0)),
            }
        }
        TypeKind::Str => {
            let args = args.positional("str", 0, 1)?;
            match args.first() {
                Some(v) => Ok(Value::string(interp.str_of(v)?)),
                None => Ok(Value::str("")),
            }
        }
        TypeKind::List => {
            let args = args.positional("list", 0, 1)?;
            match args.first() {
                Some(v) => Ok(Value::list(interp.collect(v)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        TypeKind::Tuple => {
            let args = args.positional("tuple", 0, 1)?;
            match args.first() {
                Some(Value::Tuple(t)) => Ok(Value::Tuple(t.clone())),
                Some(v) => Ok(Value::tuple(interp.collect(v)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        TypeKind::Set => {
            let args = args.positional("set", 0, 1)?;
            match args.first() {
                Some(v) => {
                    let items = interp.collect(v)?;
                    Ok(Value::set(Set::from_values(items)?))
                }
                None => Ok(Value::set(Set::new())),
            }
        }
        TypeKind::Dict => {
            let mut args = args;
            let keywords = std::mem::take(&mut args.keywords);
            let positional = args.positional("dict", 0, 1)?;
            let mut dict = match positional.first() {
                Some(source) => ops::dict_from(interp, source)?,
                None => Dict::new(),
            };
            for (k, v) in keywords {
                dict.insert(Value::string(k), v)?;
            }
            Ok(Value::dict(dict))
        }
        TypeKind::Range => construct_range(args),
        TypeKind::Fraction => fraction::construct(interp, args),
        TypeKind::Type => {
            let args = args.positional("type", 1, 1)?;
            Ok(Value::Type(args[0].type_kind()))
        }
        other => raise(
            ExcKind::TypeError,
            format!("cannot create '{}' instances", other.name()),
        ),
    }
}

// ----- numeric conversions ------------------------------------------------

pub(crate) fn to_float(v: &Value) -> PyResult<f64> {
    match v {
        Value::Str(s) => parse_float(s).map_or_else(
            || {
                raise(
                    ExcKind::ValueError,
                    format!("could not convert string to float: {}", str_repr(s)),
                )
            },
            Ok,
        ),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Fraction(_) | Value::Array(_) => {
            v.as_f64()
        }
        other => raise(
            ExcKind::TypeError,
            format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ),
        ),
    }
}

/// Strip underscores that sit between two digits; reject any other use.
fn strip_digit_separators(text: &str) -> Option<String> {
    if !text.contains('_') {
        return Some(text.to_string());
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, c) in chars.iter().enumerate() {
        if *c == '_' {
            let before = i > 0 && chars[i - 1].is_ascii_alphanumeric();
            let after = chars.get(i + 1).map_or(false, |n| n.is_ascii_alphanumeric());
            if !before || !after {
                return None;
            }
        } else {
            out.push(*c);
        }
    }
    Some(out)
}

pub(crate) fn parse_float(text: &str) -> Option<f64> {
    let t = text.trim();
    let (sign, body) = match t.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, t.strip_prefix('+').unwrap_or(t)),
    };
    let lower = body.to_ascii_lowercase();
    match lower.as_str() {
        "inf" | "infinity" => return Some(sign * f64::INFINITY),
        "nan" => return Some(f64::NAN),
        _ => {}
    }
    if body.is_empty()
        || !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-' | '_'))
    {
        return None;
    }
    let cleaned = strip_digit_separators(body)?;
    cleaned.parse::<f64>().ok().map(|f| sign * f)
}

/// Parse integer text the way `int(text, base)` does.
pub(crate) fn parse_int(text: &str, base: u32) -> Option<BigInt> {
    let t = text.trim();
    let (negative, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let lower = body.to_ascii_lowercase();
    let prefixed = |p: &str| lower.starts_with(p);
    let (base, digits) = match base {
        0 if prefixed("0x") => (16, &body[2..]),
        0 if prefixed("0o") => (8, &body[2..]),
        0 if prefixed("0b") => (2, &body[2..]),
        0 => {
            if body.len() > 1 && body.starts_with('0') && body.chars().any(|c| c != '0' && c != '_') {
                return None;
            }
            (10, body)
        }
        16 if prefixed("0x") => (16, &body[2..]),
        8 if prefixed("0o") => (8, &body[2..]),
        2 if prefixed("0b") => (2, &body[2..]),
        b => (b, body),
    };
    let had_prefix = digits.len() != body.len();
    let digits = match digits.strip_prefix('_') {
        Some(rest) if had_prefix => rest,
        _ => digits,
    };
    if digits.is_empty() {
        return None;
    }
    let cleaned = strip_digit_separators(digits)?;
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_digit(base)) {
        return None;
    }
    let value = BigInt::parse_bytes(cleaned.as_bytes(), base)?;
    Some(if negative { -value } else { value })
}

fn construct_int(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("int", &["x", "base"], 0)?;
    let mut slots = slots.into_iter();
    let x = slots.next().flatten();
    let base = slots.next().flatten();
    let x = match x {
        Some(x) => x,
        None if base.is_some() => return raise(ExcKind::TypeError, "int() missing string argument"),
        None => return Ok(Value::int(0)),
    };
    if let Some(base) = base {
        let b = base.as_index()?;
        if b != 0 && !(2..=36).contains(&b) {
            return raise(ExcKind::ValueError, "int() base must be >= 2 and <= 36, or 0");
        }
        return match &x {
            Value::Str(s) => int_from_str(interp, s, b as u32),
            _ => raise(
                ExcKind::TypeError,
                "int() can't convert non-string with explicit base",
            ),
        };
    }
    match &x {
        Value::Int(_) => Ok(x.clone()),
        Value::Bool(b) => Ok(Value::int(*b as i64)),
        Value::Float(f) => Ok(Value::Int(float_to_bigint(*f)?)),
        Value::Fraction(r) => Ok(Value::Int(r.to_integer())),
        Value::Str(s) => int_from_str(interp, s, 10),
        Value::Array(a) => {
            let a = a.borrow();
            match a.scalar() {
                Some(v) if a.dtype == DType::Float => Ok(Value::Int(float_to_bigint(v)?)),
                Some(v) => Ok(Value::int(v as i64)),
                None => raise(
                    ExcKind::TypeError,
                    "only length-1 arrays can be converted to Python scalars",
                ),
            }
        }
        other => raise(
            ExcKind::TypeError,
            format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                other.type_name()
            ),
        ),
    }
}

fn int_from_str(interp: &Interpreter, s: &str, base: u32) -> PyResult<Value> {
    let limit = interp.limits().max_str_digits;
    let digits = s.trim().chars().filter(|c| c.is_ascii_alphanumeric()).count();
    if base == 10 && digits > limit {
        return raise(
            ExcKind::ValueError,
            format!(
                "Exceeds the limit ({} digits) for integer string conversion: value has {} \
                 digits; use sys.set_int_max_str_digits() to increase the limit",
                limit, digits
            ),
        );
    }
    match parse_int(s, base) {
        Some(i) => Ok(Value::Int(i)),
        None => raise(
            ExcKind::ValueError,
            format!(
                "invalid literal for int() with base {}: {}",
                base,
                str_repr(s)
            ),
        ),
    }
}

fn construct_range(args: CallArgs) -> PyResult<Value> {
    let args = args.positional("range", 1, 3)?;
    let ints: Vec<i64> = args.iter().map(Value::as_index).collect::<PyResult<_>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => (0, 0, 1),
    };
    if step == 0 {
        return raise(ExcKind::ValueError, "range() arg 3 must not be zero");
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

// ----- functions ----------------------------------------------------------

fn builtin_abs(_interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let args = args.positional("abs", 1, 1)?;
    match &args[0] {
        Value::Bool(b) => Ok(Value::int(*b as i64)),
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Fraction(r) => Ok(Value::fraction(r.abs())),
        Value::Array(a) => {
            let a = a.borrow();
            let data = a.data.iter().map(|x| x.abs()).collect();
            Ok(NdArray::new(a.shape.clone(), data, a.dtype).into_value())
        }
        other => raise(
            ExcKind::TypeError,
            format!("bad operand type for abs(): '{}'", other.type_name()),
        ),
    }
}

fn builtin_all(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let args = args.positional("all", 1, 1)?;
    for item in interp.iterate(&args[0])? {
        interp.tick()?;
        if !item.truthy()? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn builtin_any(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let args = args.positional("any", 1, 1)?;
    for item in interp.iterate(&args[0])? {
        interp.tick()?;
        if item.truthy()? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn builtin_enumerate(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("enumerate", &["iterable", "start"], 1)?;
    let iterable = slots[0].clone().unwrap_or(Value::None);
    let mut n = match &slots[1] {
        Some(v) => v.as_bigint_exact().ok_or_else(|| {
            super::PyException::new(
                ExcKind::TypeError,
                format!("'{}' object cannot be interpreted as an integer", v.type_name()),
            )
        })?,
        None => BigInt::zero(),
    };
    let items = interp.collect(&iterable)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(Value::tuple(vec![Value::Int(n.clone()), item]));
        n += 1;
    }
    Ok(Value::list(out))
}

fn builtin_filter(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let args = args.positional("filter", 2, 2)?;
    let mut out = Vec::new();
    for item in interp.iterate(&args[1])? {
        let keep = if args[0].is_none() {
            item.truthy()?
        } else {
            interp.call1(&args[0], item.clone())?.truthy()?
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

pub(crate) fn length(v: &Value) -> PyResult<usize> {
    Ok(match v {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        Value::Dict(d) => d.borrow().len(),
        Value::Set(s) => s.borrow().len(),
        Value::Range(r) => r.len(),
        Value::Array(a) => a.borrow().len()?,
        other => {
            return raise(
                ExcKind::TypeError,
                format!("object of type '{}' has no len()", other.type_name()),
            )
        }
    })
}

fn builtin_len(_interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let args = args.positional("len", 1, 1)?;
    Ok(Value::int(length(&args[0])? as i64))
}

fn builtin_map(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let args = args.positional("map", 2, usize::MAX)?;
    let func = &args[0];
    let columns: Vec<Vec<Value>> = args[1..]
        .iter()
        .map(|it| interp.collect(it))
        .collect::<PyResult<_>>()?;
    let n = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let call_args = columns.iter().map(|c| c[i].clone()).collect();
        out.push(interp.call(func, CallArgs::new(call_args))?);
    }
    Ok(Value::list(out))
}

fn extreme(interp: &mut Interpreter, mut args: CallArgs, name: &str, greatest: bool) -> PyResult<Value> {
    let key = args.take_keyword("key").filter(|k| !k.is_none());
    let default = args.take_keyword("default");
    if let Some((k, _)) = args.keywords.first() {
        return raise(
            ExcKind::TypeError,
            format!("{}() got an unexpected keyword argument '{}'", name, k),
        );
    }
    let items = match args.positional.len() {
        0 => {
            return raise(
                ExcKind::TypeError,
                format!("{} expected at least 1 argument, got 0", name),
            )
        }
        1 => interp.collect(&args.positional[0])?,
        _ if default.is_some() => {
            return raise(
                ExcKind::TypeError,
                format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                ),
            )
        }
        _ => args.positional,
    };
    let mut items = items.into_iter();
    let mut best = match items.next() {
        Some(v) => v,
        None => {
            return match default {
                Some(d) => Ok(d),
                None => raise(
                    ExcKind::ValueError,
                    format!("{}() iterable argument is empty", name),
                ),
            }
        }
    };
    let mut best_key = match &key {
        Some(f) => interp.call1(f, best.clone())?,
        None => best.clone(),
    };
    for item in items {
        interp.tick()?;
        let k = match &key {
            Some(f) => interp.call1(f, item.clone())?,
            None => item.clone(),
        };
        let better = if greatest {
            ops::less_than(&best_key, &k)?
        } else {
            ops::less_than(&k, &best_key)?
        };
        if better {
            best = item;
            best_key = k;
        }
    }
    Ok(best)
}

fn builtin_max(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    extreme(interp, args, "max", true)
}

fn builtin_min(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    extreme(interp, args, "min", false)
}

fn builtin_pow(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("pow", &["base", "exp", "mod"], 2)?;
    let base = slots[0].clone().unwrap_or(Value::None);
    let exp = slots[1].clone().unwrap_or(Value::None);
    match &slots[2] {
        None | Some(Value::None) => ops::binary_op(interp, BinOp::Pow, &base, &exp),
        Some(modulus) => {
            let (b, e, m) = match (
                base.as_bigint_exact(),
                exp.as_bigint_exact(),
                modulus.as_bigint_exact(),
            ) {
                (Some(b), Some(e), Some(m)) => (b, e, m),
                _ => {
                    return raise(
                        ExcKind::TypeError,
                        "pow() 3rd argument not allowed unless all arguments are integers",
                    )
                }
            };
            Ok(Value::Int(mod_pow(&b, &e, &m)?))
        }
    }
}

/// `pow(b, e, m)`, including modular inverses for negative exponents.
pub(crate) fn mod_pow(b: &BigInt, e: &BigInt, m: &BigInt) -> PyResult<BigInt> {
    if m.is_zero() {
        return raise(ExcKind::ValueError, "pow() 3rd argument cannot be 0");
    }
    if m.abs().is_one() {
        return Ok(BigInt::zero());
    }
    if e.is_negative() {
        let inverse = mod_inverse(b, m)?;
        return Ok(inverse.modpow(&-e, m));
    }
    Ok(b.modpow(e, m))
}

pub(crate) fn mod_inverse(b: &BigInt, m: &BigInt) -> PyResult<BigInt> {
    let modulus = m.abs();
    let reduced = b.mod_floor(&modulus);
    let egcd = reduced.extended_gcd(&modulus);
    if !egcd.gcd.is_one() {
        return raise(
            ExcKind::ValueError,
            "base is not invertible for the given modulus",
        );
    }
    Ok(egcd.x.mod_floor(&modulus))
}

fn builtin_print(interp: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let text_option = |v: Option<Value>, name: &str, default: &str| -> PyResult<String> {
        match v {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => raise(
                ExcKind::TypeError,
                format!("{} must be None or a string, not {}", name, other.type_name()),
            ),
        }
    };
    let sep = text_option(args.take_keyword("sep"), "sep", " ")?;
    let end = text_option(args.take_keyword("end"), "end", "\n")?;
    args.take_keyword("flush");
    let parts = args.positional("print", 0, usize::MAX)?;
    let mut line = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(&interp.str_of(part)?);
    }
    line.push_str(&end);
    interp.write_stdout(&line)?;
    Ok(Value::None)
}

/// Round to `ndigits` decimals with ties going to the even neighbour.
pub(crate) fn round_half_even(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() || x == 0.0 {
        return x;
    }
    if ndigits >= 0 {
        if ndigits > 308 {
            return x;
        }
        // Decimal formatting rounds the exact binary value correctly.
        format!("{:.*}", ndigits as usize, x).parse().unwrap_or(x)
    } else {
        let scale = 10f64.powi((-ndigits).min(400) as i32);
        if !scale.is_finite() {
            return 0.0f64.copysign(x);
        }
        (x / scale).round_ties_even() * scale
    }
}

fn builtin_round(_interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("round", &["number", "ndigits"], 1)?;
    let number = slots[0].clone().unwrap_or(Value::None);
    let ndigits = match &slots[1] {
        None | Some(Value::None) => None,
        Some(v) => Some(v.as_index()?),
    };
    match (&number, ndigits) {
        (Value::Bool(b), _) => Ok(Value::int(*b as i64)),
        (Value::Int(_), None) => Ok(number.clone()),
        (Value::Int(i), Some(n)) => {
            if n >= 0 {
                return Ok(number.clone());
            }
            let scale = BigInt::from(10).pow((-n).min(10_000) as u32);
            let (q, r) = i.div_mod_floor(&scale);
            let twice = &r * 2;
            let q = if twice > scale || (twice == scale && q.is_odd()) {
                q + 1
            } else {
                q
            };
            Ok(Value::Int(q * scale))
        }
        (Value::Float(f), None) => Ok(Value::Int(float_to_bigint(f.round_ties_even())?)),
        (Value::Float(f), Some(n)) => Ok(Value::Float(round_half_even(*f, n))),
        (Value::Fraction(r), None) => Ok(Value::Int(round_ratio(r))),
        (Value::Fraction(r), Some(n)) => {
            let scale = num_rational::BigRational::from_integer(BigInt::from(10).pow(n.unsigned_abs().min(10_000) as u32));
            let scaled = if n >= 0 { &**r * &scale } else { &**r / &scale };
            let rounded = num_rational::BigRational::from_integer(round_ratio(&scaled));
            Ok(Value::fraction(if n >= 0 { rounded / scale } else { rounded * scale }))
        }
        (Value::Array(a), n) => {
            let a = a.borrow();
            let n = n.unwrap_or(0);
            let data = a.data.iter().map(|x| round_half_even(*x, n)).collect();
            Ok(NdArray::new(a.shape.clone(), data, a.dtype).into_value())
        }
        (other, _) => raise(
            ExcKind::TypeError,
            format!(
                "type {} doesn't define __round__ method",
                other.type_name()
            ),
        ),
    }
}

pub(crate) fn round_ratio(r: &num_rational::BigRational) -> BigInt {
    let floor = r.floor().to_integer();
    let rem = r - num_rational::BigRational::from_integer(floor.clone());
    let half = num_rational::BigRational::new(BigInt::one(), BigInt::from(2));
    if rem > half || (rem == half && floor.is_odd()) {
        floor + 1
    } else {
        floor
    }
}

fn builtin_sorted(interp: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let key = args.take_keyword("key");
    let reverse = match args.take_keyword("reverse") {
        Some(v) => v.truthy()?,
        None => false,
    };
    let args = args.positional("sorted", 1, 1)?;
    let items = interp.collect(&args[0])?;
    let sorted = ops::sort_values(interp, items, key.as_ref(), reverse)?;
    Ok(Value::list(sorted))
}

fn builtin_sum(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("sum", &["iterable", "start"], 1)?;
    let iterable = slots[0].clone().unwrap_or(Value::None);
    let start = slots[1].clone().unwrap_or_else(|| Value::int(0));
    if matches!(start, Value::Str(_)) {
        return raise(
            ExcKind::TypeError,
            "sum() can't sum strings [use ''.join(seq) instead]",
        );
    }
    let mut total = start;
    for item in interp.iterate(&iterable)? {
        interp.tick()?;
        total = match (&total, &item) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
            (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
            _ => ops::binary_op(interp, BinOp::Add, &total, &item)?,
        };
    }
    Ok(total)
}

fn builtin_zip(interp: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let strict = match args.take_keyword("strict") {
        Some(v) => v.truthy()?,
        None => false,
    };
    let args = args.positional("zip", 0, usize::MAX)?;
    let columns: Vec<Vec<Value>> = args
        .iter()
        .map(|it| interp.collect(it))
        .collect::<PyResult<_>>()?;
    let n = columns.iter().map(Vec::len).min().unwrap_or(0);
    if strict {
        if let Some(i) = columns.iter().position(|c| c.len() != n) {
            let relation = if columns[i].len() > n { "longer" } else { "shorter" };
            return raise(
                ExcKind::ValueError,
                format!("zip() argument {} is {} than argument 1", i + 1, relation),
            );
        }
    }
    let out = (0..n)
        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
        .collect();
    Ok(Value::list(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_prefixes_and_separators() {
        assert_eq!(parse_int("  42 ", 10), Some(BigInt::from(42)));
        assert_eq!(parse_int("-1_000", 10), Some(BigInt::from(-1000)));
        assert_eq!(parse_int("0x1f", 0), Some(BigInt::from(31)));
        assert_eq!(parse_int("ff", 16), Some(BigInt::from(255)));
        assert_eq!(parse_int("1__0", 10), None);
        assert_eq!(parse_int("012", 0), None);
        assert_eq!(parse_int("", 10), None);
    }

    #[test]
    fn test_parse_float_forms() {
        assert_eq!(parse_float(" 1.5 "), Some(1.5));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("NaN").unwrap().is_nan());
        assert_eq!(parse_float("1e3"), Some(1000.0));
        assert_eq!(parse_float("abc"), None);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.675, 2), 2.67);
        assert_eq!(round_half_even(1234.5, -2), 1200.0);
        assert_eq!(2.5f64.round_ties_even(), 2.0);
    }

    #[test]
    fn test_mod_pow_with_inverse() {
        let r = mod_pow(&BigInt::from(3), &BigInt::from(-1), &BigInt::from(7)).unwrap();
        assert_eq!(r, BigInt::from(5));
        let r = mod_pow(&BigInt::from(3), &BigInt::from(2), &BigInt::from(-5)).unwrap();
        assert_eq!(r, BigInt::from(-1));
        assert!(mod_pow(&BigInt::from(2), &BigInt::from(-1), &BigInt::from(4)).is_err());
    }

    #[test]
    fn test_round_ratio_ties_to_even() {
        use num_rational::BigRational;
        let half = |n: i64| BigRational::new(BigInt::from(n), BigInt::from(2));
        assert_eq!(round_ratio(&half(5)), BigInt::from(2));
        assert_eq!(round_ratio(&half(7)), BigInt::from(4));
        assert_eq!(round_ratio(&half(-5)), BigInt::from(-2));
    }
}
