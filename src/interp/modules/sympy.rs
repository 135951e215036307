//! The numeric corner of `sympy`: primes, factorization and exact helpers.
//! Results are plain ints, Fractions and floats; there are no symbols.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::{fraction, int_arg, math};
use crate::interp::builtins;
use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::ops;
use crate::interp::value::{
    bigint_to_f64, float_to_bigint, ratio_to_f64, CallArgs, Dict, Module, Value,
};
use crate::interp::Interpreter;

pub(super) fn module() -> Value {
    Module::new("sympy")
        .function("isprime", isprime)
        .function("nextprime", nextprime)
        .function("prevprime", prevprime)
        .function("prime", prime)
        .function("primepi", primepi)
        .function("primerange", primerange)
        .function("factorint", factorint)
        .function("primefactors", primefactors)
        .function("divisors", divisors)
        .function("divisor_count", divisor_count)
        .function("totient", totient)
        .function("gcd", gcd)
        .function("lcm", lcm)
        .function("factorial", factorial)
        .function("binomial", binomial)
        .function("fibonacci", fibonacci)
        .function("mod_inverse", mod_inverse)
        .function("integer_nthroot", integer_nthroot)
        .function("sqrt", sqrt)
        .function("Rational", rational)
        .function("Integer", integer)
        .function("Abs", abs)
        .function("floor", floor)
        .function("ceiling", ceiling)
        .function("N", numeric)
        .constant("pi", Value::Float(std::f64::consts::PI))
        .constant("E", Value::Float(std::f64::consts::E))
        .constant("oo", Value::Float(f64::INFINITY))
        .into_value()
}

const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1 % m;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

/// Deterministic Miller-Rabin for every 64-bit input.
fn is_prime_u64(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;
    'witness: for a in WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Miller-Rabin over big integers: exact below 3.3e24, probabilistic above.
fn is_prime(n: &BigInt) -> bool {
    if let Some(small) = n.to_u64() {
        return is_prime_u64(small);
    }
    if n.is_negative() {
        return false;
    }
    for p in WITNESSES {
        if (n % p).is_zero() {
            return false;
        }
    }
    let one = BigInt::one();
    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    'witness: for a in WITNESSES {
        let mut x = BigInt::from(a).modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&BigInt::from(2), n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// A nontrivial factor of an odd composite, by Pollard's rho.
fn pollard_rho(interp: &mut Interpreter, n: &BigInt) -> PyResult<BigInt> {
    let mut c = BigInt::one();
    loop {
        let step = |x: &BigInt| (x * x + &c) % n;
        let mut x = BigInt::from(2);
        let mut y = BigInt::from(2);
        let mut d = BigInt::one();
        while d.is_one() {
            interp.tick()?;
            x = step(&x);
            y = step(&step(&y));
            d = (&x - &y).abs().gcd(n);
        }
        if &d != n {
            return Ok(d);
        }
        c += 1;
    }
}

/// Prime factorization of `|n|`, for `|n| >= 1`.
fn factorize(interp: &mut Interpreter, n: &BigInt) -> PyResult<BTreeMap<BigInt, u32>> {
    let mut factors = BTreeMap::new();
    let mut rest = n.abs();
    let mut p = 2u32;
    while p < 1000 && !rest.is_one() {
        interp.tick()?;
        while (&rest % p).is_zero() {
            rest /= p;
            *factors.entry(BigInt::from(p)).or_insert(0) += 1;
        }
        p += if p == 2 { 1 } else { 2 };
    }
    let mut pending = vec![rest];
    while let Some(m) = pending.pop() {
        if m.is_one() {
            continue;
        }
        if is_prime(&m) {
            *factors.entry(m).or_insert(0) += 1;
            continue;
        }
        let d = pollard_rho(interp, &m)?;
        pending.push(&m / &d);
        pending.push(d);
    }
    Ok(factors)
}

/// `[True]*(limit+1)` style sieve.
fn sieve(interp: &mut Interpreter, limit: usize) -> PyResult<Vec<bool>> {
    interp.check_len(limit.saturating_add(1))?;
    let mut is_prime = vec![true; limit + 1];
    is_prime[0] = false;
    if limit >= 1 {
        is_prime[1] = false;
    }
    let mut i = 2;
    while i * i <= limit {
        interp.tick()?;
        if is_prime[i] {
            let mut j = i * i;
            while j <= limit {
                is_prime[j] = false;
                j += i;
            }
        }
        i += 1;
    }
    Ok(is_prime)
}

fn one_int(args: CallArgs, name: &str) -> PyResult<BigInt> {
    let a = args.positional(name, 1, 1)?;
    int_arg(&a[0])
}

fn isprime(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("isprime", 1, 1)?;
    Ok(Value::Bool(match a[0].as_bigint_exact() {
        Some(n) => is_prime(&n),
        None => false,
    }))
}

fn nextprime(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut n = one_int(args, "nextprime")?;
    if n < BigInt::from(2) {
        return Ok(Value::int(2));
    }
    loop {
        interp.tick()?;
        n += 1;
        if is_prime(&n) {
            return Ok(Value::Int(n));
        }
    }
}

fn prevprime(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut n = one_int(args, "prevprime")?;
    if n < BigInt::from(3) {
        return raise(ExcKind::ValueError, "no preceding primes");
    }
    loop {
        interp.tick()?;
        n -= 1;
        if is_prime(&n) {
            return Ok(Value::Int(n));
        }
    }
}

fn prime(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "prime")?;
    let Some(n) = n.to_usize().filter(|n| *n >= 1) else {
        return raise(
            ExcKind::ValueError,
            "nth must be a positive integer; prime(1) == 2",
        );
    };
    let limit = if n < 6 {
        15
    } else {
        let x = n as f64;
        (x * (x.ln() + x.ln().ln())).ceil() as usize
    };
    let table = sieve(interp, limit)?;
    let found = table
        .iter()
        .enumerate()
        .filter(|(_, p)| **p)
        .nth(n - 1)
        .map(|(i, _)| i);
    match found {
        Some(p) => Ok(Value::int(p as i64)),
        None => raise(ExcKind::RuntimeError, "prime sieve bound was too small"),
    }
}

fn primepi(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "primepi")?;
    if n < BigInt::from(2) {
        return Ok(Value::int(0));
    }
    let limit = n.to_usize().unwrap_or(usize::MAX);
    let table = sieve(interp, limit)?;
    Ok(Value::int(table.iter().filter(|p| **p).count() as i64))
}

fn primerange(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("primerange", 1, 2)?;
    let (lo, hi) = if a.len() == 2 {
        (int_arg(&a[0])?, int_arg(&a[1])?)
    } else {
        (BigInt::from(2), int_arg(&a[0])?)
    };
    let mut out = Vec::new();
    let mut n = lo.max(BigInt::from(2));
    while n < hi {
        interp.tick()?;
        if is_prime(&n) {
            out.push(Value::Int(n.clone()));
            interp.check_len(out.len())?;
        }
        n += 1;
    }
    Ok(Value::list(out))
}

fn factorint(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "factorint")?;
    let mut out = Dict::new();
    if n.is_zero() {
        out.insert(Value::int(0), Value::int(1))?;
        return Ok(Value::dict(out));
    }
    if n.is_negative() {
        out.insert(Value::int(-1), Value::int(1))?;
    }
    for (p, k) in factorize(interp, &n)? {
        out.insert(Value::Int(p), Value::int(k as i64))?;
    }
    Ok(Value::dict(out))
}

fn primefactors(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "primefactors")?;
    if n.abs() < BigInt::from(2) {
        return Ok(Value::list(Vec::new()));
    }
    let factors = factorize(interp, &n)?;
    Ok(Value::list(factors.into_keys().map(Value::Int).collect()))
}

fn divisor_list(interp: &mut Interpreter, n: &BigInt) -> PyResult<Vec<BigInt>> {
    if n.is_zero() {
        return Ok(Vec::new());
    }
    let mut out = vec![BigInt::one()];
    for (p, k) in factorize(interp, n)? {
        let mut next = Vec::with_capacity(out.len() * (k as usize + 1));
        for d in &out {
            let mut power = d.clone();
            next.push(power.clone());
            for _ in 0..k {
                power *= &p;
                next.push(power.clone());
            }
        }
        interp.check_len(next.len())?;
        out = next;
    }
    out.sort();
    Ok(out)
}

fn divisors(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "divisors")?;
    let list = divisor_list(interp, &n)?;
    Ok(Value::list(list.into_iter().map(Value::Int).collect()))
}

fn divisor_count(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "divisor_count")?;
    if n.is_zero() {
        return Ok(Value::int(0));
    }
    let count = factorize(interp, &n)?
        .values()
        .fold(BigInt::one(), |acc, k| acc * (k + 1));
    Ok(Value::Int(count))
}

fn totient(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "totient")?;
    if !n.is_positive() {
        return raise(ExcKind::ValueError, "n must be a positive integer");
    }
    let mut phi = BigInt::one();
    for (p, k) in factorize(interp, &n)? {
        phi *= num_traits::pow(p.clone(), k as usize - 1) * (&p - 1);
    }
    Ok(Value::Int(phi))
}

fn int_list(interp: &mut Interpreter, args: CallArgs, name: &str) -> PyResult<Vec<BigInt>> {
    let a = args.positional(name, 1, usize::MAX)?;
    let values = if a.len() == 1 && matches!(a[0], Value::List(_) | Value::Tuple(_)) {
        interp.collect(&a[0])?
    } else {
        a
    };
    values.iter().map(int_arg).collect()
}

fn gcd(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let values = int_list(interp, args, "gcd")?;
    Ok(Value::Int(
        values.iter().fold(BigInt::zero(), |acc, v| acc.gcd(v)),
    ))
}

fn lcm(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let values = int_list(interp, args, "lcm")?;
    let mut acc = BigInt::one();
    for v in &values {
        if v.is_zero() {
            return Ok(Value::int(0));
        }
        acc = acc.lcm(v);
        ops::check_int_size(interp, acc.bits())?;
    }
    Ok(Value::Int(acc))
}

fn factorial(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("factorial", 1, 1)?;
    Ok(Value::Int(math::factorial_of(interp, &a[0])?))
}

fn binomial(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("binomial", 2, 2)?;
    let n = int_arg(&a[0])?;
    let k = int_arg(&a[1])?;
    if k.is_negative() || n.is_negative() {
        return Ok(Value::int(0));
    }
    Ok(Value::Int(math::binomial(interp, &n, &k)?))
}

fn fibonacci(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let n = one_int(args, "fibonacci")?;
    let Some(m) = n.abs().to_u64() else {
        return raise(ExcKind::OverflowError, "integer result too large");
    };
    // F(n) has about 0.7 * n bits.
    ops::check_int_size(interp, m.saturating_mul(7) / 10)?;
    let (mut a, mut b) = (BigInt::zero(), BigInt::one());
    for _ in 0..m {
        interp.tick()?;
        let next = &a + &b;
        a = std::mem::replace(&mut b, next);
    }
    if n.is_negative() && m % 2 == 0 {
        a = -a;
    }
    Ok(Value::Int(a))
}

fn mod_inverse(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("mod_inverse", 2, 2)?;
    let x = int_arg(&a[0])?;
    let m = int_arg(&a[1])?;
    if m.is_zero() {
        return raise(ExcKind::ValueError, "m cannot be zero");
    }
    match builtins::mod_inverse(&x, &m) {
        Ok(inverse) => Ok(Value::Int(inverse)),
        Err(_) => raise(
            ExcKind::ValueError,
            format!("inverse of {} (mod {}) does not exist", x, m),
        ),
    }
}

fn integer_nthroot(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("integer_nthroot", 2, 2)?;
    let y = int_arg(&a[0])?;
    let n = int_arg(&a[1])?;
    if y.is_negative() {
        return raise(ExcKind::ValueError, "y must be nonnegative");
    }
    let Some(n) = n.to_u32().filter(|n| *n >= 1) else {
        return raise(ExcKind::ValueError, "n must be positive");
    };
    let root = y.nth_root(n);
    let exact = num_traits::pow(root.clone(), n as usize) == y;
    Ok(Value::tuple(vec![Value::Int(root), Value::Bool(exact)]))
}

fn exact_sqrt(n: &BigInt) -> Option<BigInt> {
    let r = n.sqrt();
    (&r * &r == *n).then_some(r)
}

fn sqrt(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("sqrt", 1, 1)?;
    let negative = || raise(ExcKind::ValueError, "square root of a negative number is not real");
    match &a[0] {
        Value::Fraction(r) => {
            if r.is_negative() {
                return negative();
            }
            match (exact_sqrt(r.numer()), exact_sqrt(r.denom())) {
                (Some(n), Some(d)) => Ok(Value::fraction(BigRational::new(n, d))),
                _ => Ok(Value::Float(ratio_to_f64(r).sqrt())),
            }
        }
        other => match other.as_bigint_exact() {
            Some(n) if n.is_negative() => negative(),
            Some(n) => match exact_sqrt(&n) {
                Some(r) => Ok(Value::Int(r)),
                None => Ok(Value::Float(bigint_to_f64(&n)?.sqrt())),
            },
            None => {
                let x = other.as_f64()?;
                if x < 0.0 {
                    return negative();
                }
                Ok(Value::Float(x.sqrt()))
            }
        },
    }
}

/// Fractions with a unit denominator collapse to ints.
fn simplify(value: Value) -> Value {
    match &value {
        Value::Fraction(r) if r.is_integer() => Value::Int(r.to_integer()),
        _ => value,
    }
}

fn rational(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(simplify(fraction::construct(interp, args)?))
}

fn integer(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("Integer", 1, 1)?;
    match &a[0] {
        Value::Float(f) => Ok(Value::Int(float_to_bigint(*f)?)),
        Value::Fraction(r) => Ok(Value::Int(r.to_integer())),
        Value::Str(s) => match builtins::parse_int(s, 10) {
            Some(n) => Ok(Value::Int(n)),
            None => raise(
                ExcKind::ValueError,
                format!("invalid literal for Integer: {}", a[0].repr()),
            ),
        },
        other => Ok(Value::Int(int_arg(other)?)),
    }
}

fn abs(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("Abs", 1, 1)?;
    match &a[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Fraction(r) => Ok(Value::fraction(r.abs())),
        other => Ok(Value::Int(int_arg(other)?.abs())),
    }
}

fn rounded(args: CallArgs, name: &str, up: bool) -> PyResult<Value> {
    let a = args.positional(name, 1, 1)?;
    match &a[0] {
        Value::Float(f) => {
            let f = if up { f.ceil() } else { f.floor() };
            Ok(Value::Int(float_to_bigint(f)?))
        }
        Value::Fraction(r) => Ok(Value::Int(if up {
            r.ceil().to_integer()
        } else {
            r.floor().to_integer()
        })),
        other => Ok(Value::Int(int_arg(other)?)),
    }
}

fn floor(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    rounded(args, "floor", false)
}

fn ceiling(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    rounded(args, "ceiling", true)
}

/// Round to `digits` significant digits.
fn significant(x: f64, digits: usize) -> f64 {
    if !x.is_finite() || x == 0.0 {
        return x;
    }
    format!("{:.*e}", digits.saturating_sub(1), x)
        .parse()
        .unwrap_or(x)
}

fn numeric(_: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("N", &["expr", "n"], 1)?;
    let x = match &slots[0] {
        Some(Value::Fraction(r)) => ratio_to_f64(r),
        Some(v) => v.as_f64()?,
        None => f64::NAN,
    };
    let digits = match &slots[1] {
        Some(v) => v.as_usize()?.clamp(1, 17),
        None => 15,
    };
    Ok(Value::Float(significant(x, digits)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_primes() {
        let primes: Vec<u64> = (0..40).filter(|n| is_prime_u64(*n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37]);
    }

    #[test]
    fn test_large_primes_and_composites() {
        assert!(is_prime_u64(18_446_744_073_709_551_557));
        assert!(!is_prime_u64(3_215_031_751));
        let mersenne = (BigInt::one() << 89usize) - 1;
        assert!(is_prime(&mersenne));
        assert!(!is_prime(&(&mersenne * 3)));
    }

    #[test]
    fn test_factorize_mixes_trial_division_and_rho() {
        let mut interp = Interpreter::new(Default::default(), Default::default());
        let n = BigInt::from(2u64 * 2 * 3 * 1_000_003 * 1_000_033);
        let factors = factorize(&mut interp, &n).ok();
        let expected: BTreeMap<BigInt, u32> = [(2, 2), (3, 1), (1_000_003, 1), (1_000_033, 1)]
            .into_iter()
            .map(|(p, k)| (BigInt::from(p), k))
            .collect();
        assert_eq!(factors, Some(expected));
    }

    #[test]
    fn test_divisors_are_sorted() {
        let mut interp = Interpreter::new(Default::default(), Default::default());
        let list = divisor_list(&mut interp, &BigInt::from(12)).ok();
        let expected: Vec<BigInt> = [1, 2, 3, 4, 6, 12].into_iter().map(BigInt::from).collect();
        assert_eq!(list, Some(expected));
    }

    #[test]
    fn test_significant_digits() {
        assert_eq!(significant(std::f64::consts::PI, 15), 3.14159265358979);
        assert_eq!(significant(2.0f64.sqrt(), 3), 1.41);
    }
}
