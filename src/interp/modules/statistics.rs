//! The `statistics` module. Int and Fraction data use exact arithmetic.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;

use crate::interp::ast::BinOp;
use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::ops;
use crate::interp::value::{float_to_ratio, ratio_to_f64, CallArgs, Dict, Module, Value};
use crate::interp::Interpreter;

pub(super) fn module() -> Value {
    Module::new("statistics")
        .function("mean", mean)
        .function("fmean", fmean)
        .function("median", median)
        .function("median_low", median_low)
        .function("median_high", median_high)
        .function("mode", mode)
        .function("multimode", multimode)
        .function("variance", variance)
        .function("pvariance", pvariance)
        .function("stdev", stdev)
        .function("pstdev", pstdev)
        .into_value()
}

fn stats_error<T>(message: &str) -> PyResult<T> {
    raise(ExcKind::StatisticsError, message)
}

/// The numeric type results are converted back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Int,
    Fraction,
    Float,
}

struct Exact {
    values: Vec<BigRational>,
    kind: Kind,
}

fn exact_data(interp: &mut Interpreter, data: &Value) -> PyResult<Exact> {
    let items = interp.collect(data)?;
    let mut values = Vec::with_capacity(items.len());
    let mut kind = Kind::Int;
    for item in &items {
        interp.tick()?;
        let (v, k) = match item {
            Value::Fraction(r) => ((**r).clone(), Kind::Fraction),
            Value::Float(f) => {
                if !f.is_finite() {
                    return raise(
                        ExcKind::ValueError,
                        "statistics of non-finite floats are not supported",
                    );
                }
                (float_to_ratio(*f)?, Kind::Float)
            }
            other => match other.as_bigint_exact() {
                Some(i) => (BigRational::from_integer(i), Kind::Int),
                None => {
                    let f = other.as_f64().or_else(|_| {
                        raise(
                            ExcKind::TypeError,
                            format!(
                                "can't convert type '{}' to numerator/denominator",
                                other.type_name()
                            ),
                        )
                    })?;
                    (float_to_ratio(f)?, Kind::Float)
                }
            },
        };
        values.push(v);
        kind = kind.max(k);
    }
    Ok(Exact { values, kind })
}

fn convert(r: BigRational, kind: Kind) -> Value {
    match kind {
        Kind::Int if r.is_integer() => Value::Int(r.to_integer()),
        Kind::Fraction => Value::fraction(r),
        _ => Value::Float(ratio_to_f64(&r)),
    }
}

fn exact_mean(values: &[BigRational]) -> BigRational {
    let total = values.iter().fold(BigRational::zero(), |acc, v| acc + v);
    total / BigRational::from_integer(BigInt::from(values.len()))
}

fn mean(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("mean", 1, 1)?;
    let data = exact_data(interp, &a[0])?;
    if data.values.is_empty() {
        return stats_error("mean requires at least one data point");
    }
    Ok(convert(exact_mean(&data.values), data.kind))
}

fn fmean(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("fmean", &["data", "weights"], 1)?;
    let items = interp.collect(slots[0].as_ref().unwrap_or(&Value::None))?;
    let xs: Vec<f64> = items.iter().map(Value::as_f64).collect::<PyResult<_>>()?;
    match slots[1].as_ref().filter(|w| !w.is_none()) {
        None => {
            if xs.is_empty() {
                return stats_error("fmean requires at least one data point");
            }
            Ok(Value::Float(super::math::exact_sum(xs.iter().copied())? / xs.len() as f64))
        }
        Some(w) => {
            let weights = interp.collect(w)?;
            let ws: Vec<f64> = weights.iter().map(Value::as_f64).collect::<PyResult<_>>()?;
            if ws.len() != xs.len() {
                return stats_error("data and weights must be the same length");
            }
            let total = super::math::exact_sum(ws.iter().copied())?;
            if total <= 0.0 {
                return stats_error("sum of weights must be positive");
            }
            let weighted = super::math::exact_sum(xs.iter().zip(&ws).map(|(x, w)| x * w))?;
            Ok(Value::Float(weighted / total))
        }
    }
}

fn sorted_data(interp: &mut Interpreter, data: &Value) -> PyResult<Vec<Value>> {
    let items = interp.collect(data)?;
    ops::sort_values(interp, items, None, false)
}

fn median(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("median", 1, 1)?;
    let data = sorted_data(interp, &a[0])?;
    let n = data.len();
    if n == 0 {
        return stats_error("no median for empty data");
    }
    if n % 2 == 1 {
        return Ok(data[n / 2].clone());
    }
    let sum = ops::binary_op(interp, BinOp::Add, &data[n / 2 - 1], &data[n / 2])?;
    ops::binary_op(interp, BinOp::Div, &sum, &Value::int(2))
}

fn median_low(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("median_low", 1, 1)?;
    let data = sorted_data(interp, &a[0])?;
    let n = data.len();
    if n == 0 {
        return stats_error("no median for empty data");
    }
    Ok(if n % 2 == 1 { data[n / 2].clone() } else { data[n / 2 - 1].clone() })
}

fn median_high(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("median_high", 1, 1)?;
    let data = sorted_data(interp, &a[0])?;
    if data.is_empty() {
        return stats_error("no median for empty data");
    }
    Ok(data[data.len() / 2].clone())
}

/// Occurrence counts in first-seen order.
fn counts(interp: &mut Interpreter, data: &Value) -> PyResult<Vec<(Value, usize)>> {
    let items = interp.collect(data)?;
    let mut index = Dict::new();
    let mut out: Vec<(Value, usize)> = Vec::new();
    for item in items {
        interp.tick()?;
        match index.get(&item)? {
            Some(slot) => out[slot.as_usize()?].1 += 1,
            None => {
                index.insert(item.clone(), Value::int(out.len() as i64))?;
                out.push((item, 1));
            }
        }
    }
    Ok(out)
}

fn mode(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("mode", 1, 1)?;
    let counted = counts(interp, &a[0])?;
    let best = counted.iter().map(|(_, c)| *c).max();
    match best {
        Some(best) => Ok(counted
            .into_iter()
            .find(|(_, c)| *c == best)
            .map_or(Value::None, |(v, _)| v)),
        None => stats_error("no mode for empty data"),
    }
}

fn multimode(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("multimode", 1, 1)?;
    let counted = counts(interp, &a[0])?;
    let best = counted.iter().map(|(_, c)| *c).max().unwrap_or(0);
    Ok(Value::list(
        counted
            .into_iter()
            .filter(|(_, c)| *c == best)
            .map(|(v, _)| v)
            .collect(),
    ))
}

/// Sum of squared deviations and the data's result kind.
fn squared_deviations(
    interp: &mut Interpreter,
    args: CallArgs,
    name: &str,
    minimum: usize,
) -> PyResult<(BigRational, usize, Kind)> {
    let slots = args.bind(name, &["data", "xbar"], 1)?;
    let data = exact_data(interp, slots[0].as_ref().unwrap_or(&Value::None))?;
    let n = data.values.len();
    if n < minimum {
        let message = if minimum == 2 {
            format!("{} requires at least two data points", name)
        } else {
            format!("{} requires at least one data point", name)
        };
        return stats_error(&message);
    }
    let centre = match slots[1].as_ref().filter(|v| !v.is_none()) {
        Some(Value::Fraction(r)) => (**r).clone(),
        Some(v) => match v.as_bigint_exact() {
            Some(i) => BigRational::from_integer(i),
            None => float_to_ratio(v.as_f64()?)?,
        },
        None => exact_mean(&data.values),
    };
    let mut ss = BigRational::zero();
    for v in &data.values {
        interp.tick()?;
        let d = v - &centre;
        ss += &d * &d;
    }
    Ok((ss, n, data.kind))
}

fn variance_of(
    interp: &mut Interpreter,
    args: CallArgs,
    name: &str,
    sample: bool,
) -> PyResult<(BigRational, Kind)> {
    let (ss, n, kind) = squared_deviations(interp, args, name, if sample { 2 } else { 1 })?;
    let divisor = if sample { n - 1 } else { n };
    let var = ss / BigRational::from_integer(BigInt::from(divisor));
    Ok((var, kind))
}

fn variance(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let (var, kind) = variance_of(interp, args, "variance", true)?;
    Ok(convert(var, kind))
}

fn pvariance(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let (var, kind) = variance_of(interp, args, "pvariance", false)?;
    Ok(convert(var, kind))
}

fn sqrt_ratio(r: &BigRational) -> f64 {
    if r.is_zero() {
        return 0.0;
    }
    ratio_to_f64(r).sqrt()
}

fn stdev(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let (var, _) = variance_of(interp, args, "stdev", true)?;
    Ok(Value::Float(sqrt_ratio(&var)))
}

fn pstdev(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let (var, _) = variance_of(interp, args, "pstdev", false)?;
    Ok(Value::Float(sqrt_ratio(&var)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_convert_keeps_int_results_integral() {
        assert!(matches!(convert(ratio(4, 2), Kind::Int), Value::Int(_)));
        assert!(matches!(convert(ratio(3, 2), Kind::Int), Value::Float(f) if f == 1.5));
        assert!(matches!(convert(ratio(3, 2), Kind::Fraction), Value::Fraction(_)));
    }

    #[test]
    fn test_exact_mean() {
        let values = vec![ratio(1, 1), ratio(2, 1), ratio(4, 1)];
        assert_eq!(exact_mean(&values), ratio(7, 3));
    }
}
