//! `Fraction`: exact rationals backed by `BigRational`.

use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};

use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::value::{float_to_ratio, CallArgs, Value};
use crate::interp::Interpreter;

const MAX_EXPONENT: i64 = 10_000;

pub(crate) const METHODS: &[&str] = &[
    "limit_denominator",
    "as_integer_ratio",
    "is_integer",
    "conjugate",
];

pub(crate) fn attribute(value: &Value, attr: &str) -> Option<Value> {
    let Value::Fraction(r) = value else {
        return None;
    };
    match attr {
        "numerator" => Some(Value::Int(r.numer().clone())),
        "denominator" => Some(Value::Int(r.denom().clone())),
        "real" => Some(value.clone()),
        "imag" => Some(Value::int(0)),
        _ => None,
    }
}

pub(crate) fn call_method(
    interp: &mut Interpreter,
    r: &Rc<BigRational>,
    name: &str,
    args: CallArgs,
) -> PyResult<Value> {
    match name {
        "limit_denominator" => {
            let slots = args.bind("limit_denominator", &["max_denominator"], 0)?;
            let max = match &slots[0] {
                Some(v) => super::int_arg(v)?,
                None => BigInt::from(1_000_000),
            };
            if max < BigInt::one() {
                return raise(ExcKind::ValueError, "max_denominator should be at least 1");
            }
            Ok(Value::fraction(limit_denominator(interp, r, &max)?))
        }
        "as_integer_ratio" => {
            args.positional("as_integer_ratio", 0, 0)?;
            Ok(Value::tuple(vec![
                Value::Int(r.numer().clone()),
                Value::Int(r.denom().clone()),
            ]))
        }
        "is_integer" => {
            args.positional("is_integer", 0, 0)?;
            Ok(Value::Bool(r.is_integer()))
        }
        "conjugate" => {
            args.positional("conjugate", 0, 0)?;
            Ok(Value::Fraction(r.clone()))
        }
        _ => raise(
            ExcKind::AttributeError,
            format!("'Fraction' object has no attribute '{}'", name),
        ),
    }
}

/// Closest fraction with a denominator at most `max`, via continued fractions.
fn limit_denominator(
    interp: &mut Interpreter,
    r: &BigRational,
    max: &BigInt,
) -> PyResult<BigRational> {
    if r.denom() <= max {
        return Ok(r.clone());
    }
    let (mut p0, mut q0, mut p1, mut q1) =
        (BigInt::zero(), BigInt::one(), BigInt::one(), BigInt::zero());
    let (mut n, mut d) = (r.numer().clone(), r.denom().clone());
    loop {
        interp.tick()?;
        let a = n.div_floor(&d);
        let q2 = &q0 + &a * &q1;
        if &q2 > max {
            break;
        }
        let p2 = &p0 + &a * &p1;
        p0 = std::mem::replace(&mut p1, p2);
        q0 = std::mem::replace(&mut q1, q2);
        let rem = &n - &a * &d;
        n = std::mem::replace(&mut d, rem);
    }
    let k = (max - &q0).div_floor(&q1);
    let bound1 = BigRational::new(&p0 + &k * &p1, &q0 + &k * &q1);
    let bound2 = BigRational::new(p1, q1);
    if (&bound2 - r).abs() <= (&bound1 - r).abs() {
        Ok(bound2)
    } else {
        Ok(bound1)
    }
}

pub(crate) fn construct(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("Fraction", &["numerator", "denominator"], 0)?;
    let numerator = slots[0].clone().unwrap_or_else(|| Value::int(0));
    let Some(denominator) = slots[1].clone() else {
        return Ok(Value::fraction(single(interp, &numerator)?));
    };
    match (rational_of(&numerator), rational_of(&denominator)) {
        (Some(n), Some(d)) => {
            if d.is_zero() {
                return raise(
                    ExcKind::ZeroDivisionError,
                    format!("Fraction({}, 0)", interp.str_of(&numerator)?),
                );
            }
            Ok(Value::fraction(n / d))
        }
        _ => raise(
            ExcKind::TypeError,
            "both arguments should be Rational instances",
        ),
    }
}

fn rational_of(v: &Value) -> Option<BigRational> {
    match v {
        Value::Fraction(r) => Some((**r).clone()),
        Value::Int(_) | Value::Bool(_) => v.as_bigint_exact().map(BigRational::from_integer),
        _ => None,
    }
}

fn single(interp: &mut Interpreter, v: &Value) -> PyResult<BigRational> {
    if let Some(r) = rational_of(v) {
        return Ok(r);
    }
    match v {
        Value::Float(f) => float_to_ratio(*f),
        Value::Str(s) => match parse(s) {
            Some(r) => Ok(r),
            None => raise(
                ExcKind::ValueError,
                format!("Invalid literal for Fraction: {}", interp.repr_of(v)?),
            ),
        },
        _ => raise(
            ExcKind::TypeError,
            "argument should be a string or a Rational instance",
        ),
    }
}

fn digits(text: &str) -> Option<BigInt> {
    if text.is_empty()
        || text.starts_with('_')
        || text.ends_with('_')
        || text.contains("__")
        || !text.chars().all(|c| c.is_ascii_digit() || c == '_')
    {
        return None;
    }
    text.replace('_', "").parse().ok()
}

/// Parses `"[sign]int/int"` or a decimal literal with optional exponent.
fn parse(text: &str) -> Option<BigRational> {
    let text = text.trim();
    let (negative, body) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let value = if let Some((num, den)) = body.split_once('/') {
        let den = digits(den)?;
        if den.is_zero() {
            return None;
        }
        BigRational::new(digits(num)?, den)
    } else {
        let lower = body.to_ascii_lowercase();
        let (mantissa, exponent) = match lower.split_once('e') {
            Some((m, e)) => {
                let (sign, e) = match e.as_bytes().first()? {
                    b'-' => (-1i64, &e[1..]),
                    b'+' => (1, &e[1..]),
                    _ => (1, e),
                };
                let e: i64 = digits(e)?.try_into().ok()?;
                if e > MAX_EXPONENT {
                    return None;
                }
                (m.to_string(), sign * e)
            }
            None => (lower, 0),
        };
        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (mantissa, String::new()),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        let whole = if int_part.is_empty() { BigInt::zero() } else { digits(&int_part)? };
        let (frac, scale) = if frac_part.is_empty() {
            (BigInt::zero(), 0usize)
        } else {
            let cleaned = frac_part.replace('_', "");
            (digits(&frac_part)?, cleaned.len())
        };
        let ten = BigInt::from(10);
        let denom = num_traits::pow(ten.clone(), scale);
        let mut r = BigRational::new(whole * &denom + frac, denom);
        let shift = num_traits::pow(ten, exponent.unsigned_abs().try_into().ok()?);
        if exponent >= 0 {
            r *= BigRational::from_integer(shift);
        } else {
            r /= BigRational::from_integer(shift);
        }
        r
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse("3/4"), Some(ratio(3, 4)));
        assert_eq!(parse(" -6/8 "), Some(ratio(-3, 4)));
        assert_eq!(parse("0.75"), Some(ratio(3, 4)));
        assert_eq!(parse("1e-3"), Some(ratio(1, 1000)));
        assert_eq!(parse("2.5E2"), Some(ratio(250, 1)));
        assert_eq!(parse(".5"), Some(ratio(1, 2)));
        assert_eq!(parse("1_000"), Some(ratio(1000, 1)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "abc", "1/0", "1/", "/2", "1..2", "1e", "--1", "1__0"] {
            assert_eq!(parse(bad), None, "{}", bad);
        }
    }

    #[test]
    fn test_limit_denominator_pi() {
        let mut interp = Interpreter::new(Default::default(), Default::default());
        let pi = float_to_ratio(std::f64::consts::PI).unwrap_or_else(|_| ratio(0, 1));
        let approx = limit_denominator(&mut interp, &pi, &BigInt::from(1000)).ok();
        assert_eq!(approx, Some(ratio(355, 113)));
        let approx = limit_denominator(&mut interp, &pi, &BigInt::from(10)).ok();
        assert_eq!(approx, Some(ratio(22, 7)));
    }
}
