//! Number formatting: `repr` of floats, the format-spec mini-language used
//! by f-strings and `str.format`, and `%`-style interpolation.

use num_bigint::BigInt;
use num_traits::Signed;

use super::exception::{raise, ExcKind, PyResult};
use super::value::{bigint_to_f64, ratio_to_f64, Value};

/// Shortest round-tripping text for a float, switching to exponent notation
/// outside `1e-4 <= |f| < 1e16`.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let (digits, exp) = shortest_digits(f.abs());
    let sign = if f < 0.0 { "-" } else { "" };
    let body = if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                format!("{}{}.0", digits, "0".repeat(int_len - digits.len()))
            } else {
                format!("{}.{}", &digits[..int_len], &digits[int_len..])
            }
        } else {
            format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
        }
    } else {
        let mut mantissa = digits[..1].to_string();
        if digits.len() > 1 {
            mantissa.push('.');
            mantissa.push_str(&digits[1..]);
        }
        format!("{}{}", mantissa, exponent_suffix(exp))
    };
    format!("{}{}", sign, body)
}

/// Significant digits and decimal exponent of a positive finite float.
fn shortest_digits(f: f64) -> (String, i32) {
    split_scientific(&format!("{:e}", f))
}

fn split_scientific(sci: &str) -> (String, i32) {
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci, "0"));
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits, exp.parse().unwrap_or(0))
}

fn exponent_suffix(exp: i32) -> String {
    format!("e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.abs())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: char,
    pub alternate: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

impl FormatSpec {
    pub fn parse(spec: &str) -> PyResult<FormatSpec> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && is_align(chars[0]) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
            out.sign = chars[i];
            i += 1;
        }
        if i < chars.len() && chars[i] == '#' {
            out.alternate = true;
            i += 1;
        }
        if i < chars.len() && chars[i] == '0' {
            if out.align.is_none() {
                out.fill = '0';
                out.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            out.width = parse_count(&chars[start..i])?;
        }
        if i < chars.len() && matches!(chars[i], ',' | '_') {
            out.grouping = Some(chars[i]);
            i += 1;
        }
        if i < chars.len() && chars[i] == '.' {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i == start {
                return raise(ExcKind::ValueError, "Format specifier missing precision");
            }
            out.precision = Some(parse_count(&chars[start..i])?);
        }
        if i < chars.len() {
            out.ty = Some(chars[i]);
            i += 1;
        }
        if i != chars.len() {
            return raise(ExcKind::ValueError, "Invalid format specifier");
        }
        Ok(out)
    }
}

fn parse_count(digits: &[char]) -> PyResult<usize> {
    let text: String = digits.iter().collect();
    match text.parse::<usize>() {
        Ok(n) if n <= 10_000 => Ok(n),
        _ => raise(ExcKind::ValueError, "Too many decimal digits in format string"),
    }
}

/// Apply a format spec to a value, as `format(value, spec)` would.
pub fn format_value(value: &Value, spec: &str) -> PyResult<String> {
    let spec = FormatSpec::parse(spec)?;
    match value {
        Value::Bool(b) if spec.ty.is_none() => Ok(pad(
            if *b { "True" } else { "False" }.to_string(),
            &spec,
            false,
        )),
        Value::Int(_) | Value::Bool(_) => {
            let i = value.as_bigint_exact().unwrap_or_default();
            format_int(&i, &spec)
        }
        Value::Float(f) => format_float(*f, &spec),
        Value::Fraction(r) => match spec.ty {
            Some(_) => format_float(ratio_to_f64(r), &spec),
            None => Ok(pad(value.to_str(), &spec, false)),
        },
        Value::Array(a) if a.borrow().ndim() == 0 => {
            let scalar = a.borrow().scalar_value();
            format_value(&scalar, &spec_to_string(&spec))
        }
        Value::Str(s) => format_str(s, &spec),
        other => {
            if spec.ty.is_some() || spec.precision.is_some() {
                return raise(
                    ExcKind::TypeError,
                    format!(
                        "unsupported format string passed to {}.__format__",
                        other.type_name()
                    ),
                );
            }
            Ok(pad(other.to_str(), &spec, false))
        }
    }
}

fn spec_to_string(spec: &FormatSpec) -> String {
    let mut out = String::new();
    if let Some(align) = spec.align {
        out.push(spec.fill);
        out.push(align);
    }
    if spec.sign != '-' {
        out.push(spec.sign);
    }
    if spec.alternate {
        out.push('#');
    }
    if spec.width > 0 {
        out.push_str(&spec.width.to_string());
    }
    if let Some(g) = spec.grouping {
        out.push(g);
    }
    if let Some(p) = spec.precision {
        out.push('.');
        out.push_str(&p.to_string());
    }
    if let Some(t) = spec.ty {
        out.push(t);
    }
    out
}

fn format_str(s: &str, spec: &FormatSpec) -> PyResult<String> {
    match spec.ty {
        None | Some('s') => {}
        Some(t) => {
            return raise(
                ExcKind::ValueError,
                format!("Unknown format code '{}' for object of type 'str'", t),
            )
        }
    }
    if spec.align == Some('=') {
        return raise(
            ExcKind::ValueError,
            "'=' alignment not allowed in string format specifier",
        );
    }
    let text = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad(text, spec, false))
}

fn format_int(i: &BigInt, spec: &FormatSpec) -> PyResult<String> {
    let ty = spec.ty.unwrap_or('d');
    if matches!(ty, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(bigint_to_f64(i)?, spec);
    }
    if spec.precision.is_some() {
        return raise(
            ExcKind::ValueError,
            "Precision not allowed in integer format specifier",
        );
    }
    let magnitude = i.abs();
    let (digits, prefix) = match ty {
        'd' | 'n' => (magnitude.to_str_radix(10), ""),
        'x' => (magnitude.to_str_radix(16), "0x"),
        'X' => (magnitude.to_str_radix(16).to_uppercase(), "0X"),
        'o' => (magnitude.to_str_radix(8), "0o"),
        'b' => (magnitude.to_str_radix(2), "0b"),
        'c' => {
            let code = i.to_string().parse::<u32>().ok().and_then(char::from_u32);
            return match code {
                Some(c) => Ok(pad(c.to_string(), spec, false)),
                None => raise(ExcKind::OverflowError, "%c arg not in range(0x110000)"),
            };
        }
        other => {
            return raise(
                ExcKind::ValueError,
                format!("Unknown format code '{}' for object of type 'int'", other),
            )
        }
    };
    let digits = match spec.grouping {
        Some(sep) if ty == 'd' || ty == 'n' => group_digits(&digits, sep, 3),
        Some(sep) => group_digits(&digits, sep, 4),
        None => digits,
    };
    let prefix = if spec.alternate { prefix } else { "" };
    Ok(assemble_number(i.is_negative(), prefix, digits, spec))
}

fn format_float(f: f64, spec: &FormatSpec) -> PyResult<String> {
    let negative = f.is_sign_negative() && !f.is_nan();
    let x = f.abs();
    let upper = matches!(spec.ty, Some('E') | Some('F') | Some('G'));
    let body = if !x.is_finite() {
        let text = if x.is_nan() { "nan" } else { "inf" };
        let text = if upper {
            text.to_uppercase()
        } else {
            text.to_string()
        };
        if spec.ty == Some('%') {
            format!("{}%", text)
        } else {
            text
        }
    } else {
        match spec.ty {
            Some('f') | Some('F') => {
                fixed(x, spec.precision.unwrap_or(6), spec.alternate, spec.grouping)
            }
            Some('e') | Some('E') => {
                let s = scientific(x, spec.precision.unwrap_or(6), spec.alternate);
                if upper {
                    s.to_uppercase()
                } else {
                    s
                }
            }
            Some('g') | Some('G') | Some('n') => {
                let s = general(x, spec.precision.unwrap_or(6), spec.alternate, false, spec.grouping);
                if upper {
                    s.to_uppercase()
                } else {
                    s
                }
            }
            Some('%') => format!(
                "{}%",
                fixed(x * 100.0, spec.precision.unwrap_or(6), spec.alternate, spec.grouping)
            ),
            None => match spec.precision {
                Some(p) => general(x, p, spec.alternate, true, spec.grouping),
                None => {
                    let text = float_repr(x);
                    match spec.grouping {
                        Some(sep) => group_float_text(&text, sep),
                        None => text,
                    }
                }
            },
            Some(other) => {
                return raise(
                    ExcKind::ValueError,
                    format!("Unknown format code '{}' for object of type 'float'", other),
                )
            }
        }
    };
    Ok(assemble_number(negative, "", body, spec))
}

fn fixed(x: f64, precision: usize, alternate: bool, grouping: Option<char>) -> String {
    let mut text = format!("{:.*}", precision, x);
    if alternate && precision == 0 {
        text.push('.');
    }
    match grouping {
        Some(sep) => group_float_text(&text, sep),
        None => text,
    }
}

fn scientific(x: f64, precision: usize, alternate: bool) -> String {
    let text = format!("{:.*e}", precision, x);
    let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let mut mantissa = mantissa.to_string();
    if alternate && precision == 0 {
        mantissa.push('.');
    }
    format!("{}{}", mantissa, exponent_suffix(exp))
}

/// The `g` presentation type. With `repr_like`, fixed-point output keeps at
/// least one digit after the point, as an empty presentation type does.
fn general(x: f64, precision: usize, alternate: bool, repr_like: bool, grouping: Option<char>) -> String {
    let p = precision.max(1);
    let exp = if x == 0.0 {
        0
    } else {
        let rounded = format!("{:.*e}", p - 1, x);
        split_scientific(&rounded).1
    };
    if -4 <= exp && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let mut text = format!("{:.*}", decimals, x);
        if !alternate {
            text = strip_fraction_zeros(&text);
        }
        if repr_like && !text.contains('.') {
            text.push_str(".0");
        }
        match grouping {
            Some(sep) => group_float_text(&text, sep),
            None => text,
        }
    } else {
        let text = format!("{:.*e}", p - 1, x);
        let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let mantissa = if alternate {
            mantissa.to_string()
        } else {
            strip_fraction_zeros(mantissa)
        };
        format!("{}{}", mantissa, exponent_suffix(exp))
    }
}

fn strip_fraction_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn group_float_text(text: &str, sep: char) -> String {
    let (int_part, rest) = match text.find(|c: char| c == '.' || c == 'e') {
        Some(pos) => text.split_at(pos),
        None => (text, ""),
    };
    format!("{}{}", group_digits(int_part, sep, 3), rest)
}

fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn assemble_number(negative: bool, prefix: &str, body: String, spec: &FormatSpec) -> String {
    let sign = if negative {
        "-"
    } else {
        match spec.sign {
            '+' => "+",
            ' ' => " ",
            _ => "",
        }
    };
    if spec.align == Some('=') {
        let head = format!("{}{}", sign, prefix);
        let len = head.chars().count() + body.chars().count();
        let fill: String = std::iter::repeat(spec.fill)
            .take(spec.width.saturating_sub(len))
            .collect();
        return format!("{}{}{}", head, fill, body);
    }
    pad(format!("{}{}{}", sign, prefix, body), spec, true)
}

fn pad(text: String, spec: &FormatSpec, numeric: bool) -> String {
    let len = text.chars().count();
    if len >= spec.width {
        return text;
    }
    let missing = spec.width - len;
    let align = spec.align.unwrap_or(if numeric { '>' } else { '<' });
    let fill = |n: usize| -> String { std::iter::repeat(spec.fill).take(n).collect() };
    match align {
        '>' | '=' => format!("{}{}", fill(missing), text),
        '^' => format!("{}{}{}", fill(missing / 2), text, fill(missing - missing / 2)),
        _ => format!("{}{}", text, fill(missing)),
    }
}

/// `fmt % args` for strings.
pub fn percent_format(fmt: &str, args: &Value) -> PyResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(d) => Some(d.clone()),
        _ => None,
    };
    let chars: Vec<char> = fmt.chars().collect();
    let mut out = String::new();
    let mut next = 0usize;
    let mut i = 0usize;

    let take_arg = |next: &mut usize| -> PyResult<Value> {
        match positional.get(*next) {
            Some(v) => {
                *next += 1;
                Ok(v.clone())
            }
            None => raise(ExcKind::TypeError, "not enough arguments for format string"),
        }
    };

    while i < chars.len() {
        let c = chars[i];
        if c != '%' {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        if i >= chars.len() {
            return raise(ExcKind::ValueError, "incomplete format");
        }
        if chars[i] == '%' {
            out.push('%');
            i += 1;
            continue;
        }

        let mut keyed: Option<Value> = None;
        if chars[i] == '(' {
            let close = match chars[i..].iter().position(|&c| c == ')') {
                Some(p) => i + p,
                None => return raise(ExcKind::ValueError, "incomplete format key"),
            };
            let key: String = chars[i + 1..close].iter().collect();
            let value = match &mapping {
                Some(d) => d.borrow().get(&Value::string(key.clone()))?,
                None => return raise(ExcKind::TypeError, "format requires a mapping"),
            };
            match value {
                Some(v) => keyed = Some(v),
                None => return raise(ExcKind::KeyError, super::value::str_repr(&key)),
            }
            i = close + 1;
        }

        let mut spec = FormatSpec::default();
        while i < chars.len() && matches!(chars[i], '-' | '+' | ' ' | '0' | '#') {
            match chars[i] {
                '-' => spec.align = Some('<'),
                '+' => spec.sign = '+',
                ' ' => {
                    if spec.sign != '+' {
                        spec.sign = ' '
                    }
                }
                '0' => {
                    if spec.align.is_none() {
                        spec.fill = '0';
                        spec.align = Some('=');
                    }
                }
                _ => spec.alternate = true,
            }
            i += 1;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > start {
            spec.width = parse_count(&chars[start..i])?;
        }
        if i < chars.len() && chars[i] == '.' {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            spec.precision = Some(if i > start {
                parse_count(&chars[start..i])?
            } else {
                0
            });
        }
        if i >= chars.len() {
            return raise(ExcKind::ValueError, "incomplete format");
        }
        let conv = chars[i];
        i += 1;
        let arg = match keyed.take() {
            Some(v) => v,
            None => take_arg(&mut next)?,
        };
        let piece = match conv {
            's' | 'r' | 'a' => {
                let text = if conv == 's' { arg.to_str() } else { arg.repr() };
                if spec.align == Some('=') {
                    spec.align = None;
                    spec.fill = ' ';
                }
                format_str(&text, &spec)?
            }
            'd' | 'i' | 'u' => {
                let int = match arg.as_bigint_exact() {
                    Some(i) => i,
                    None => match &arg {
                        Value::Float(f) => super::value::float_to_bigint(*f)?,
                        Value::Fraction(r) => r.to_integer(),
                        other => {
                            return raise(
                                ExcKind::TypeError,
                                format!("%d format: a real number is required, not {}", other.type_name()),
                            )
                        }
                    },
                };
                spec.precision = None;
                spec.ty = Some('d');
                format_int(&int, &spec)?
            }
            'x' | 'X' | 'o' | 'c' => match arg.as_bigint_exact() {
                Some(int) => {
                    spec.ty = Some(conv);
                    spec.precision = None;
                    format_int(&int, &spec)?
                }
                None => {
                    return raise(
                        ExcKind::TypeError,
                        format!("%{} format: an integer is required, not {}", conv, arg.type_name()),
                    )
                }
            },
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                spec.ty = Some(conv);
                format_float(arg.as_f64()?, &spec)?
            }
            other => {
                return raise(
                    ExcKind::ValueError,
                    format!("unsupported format character '{}'", other),
                )
            }
        };
        out.push_str(&piece);
    }
    if mapping.is_none() && next < positional.len() {
        return raise(
            ExcKind::TypeError,
            "not all arguments converted during string formatting",
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(2.5), "2.5");
        assert_eq!(float_repr(100.0), "100.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(-3.25), "-3.25");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_format_spec_presentation_types() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Float(1234.5), ",.1f").unwrap(), "1,234.5");
        assert_eq!(format_value(&Value::Float(0.25), ".0%").unwrap(), "25%");
        assert_eq!(format_value(&Value::Float(12345.678), ".3e").unwrap(), "1.235e+04");
        assert_eq!(format_value(&Value::Float(0.0001234), "g").unwrap(), "0.0001234");
        assert_eq!(format_value(&Value::Float(1.0), ".3").unwrap(), "1.0");
        assert_eq!(format_value(&Value::int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::int(-42), "+6d").unwrap(), "   -42");
        assert_eq!(format_value(&Value::int(255), "#x").unwrap(), "0xff");
        assert_eq!(format_value(&Value::int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::str("ab"), "^6").unwrap(), "  ab  ");
        assert_eq!(format_value(&Value::str("abc"), "*>5").unwrap(), "**abc");
    }

    #[test]
    fn test_format_rejects_bad_codes() {
        assert!(format_value(&Value::str("x"), "d").is_err());
        assert!(format_value(&Value::int(1), ".2d").is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("pi"), Value::Float(3.14159), Value::int(7)]);
        assert_eq!(
            percent_format("%s=%.3f (%03d) 100%%", &args).unwrap(),
            "pi=3.142 (007) 100%"
        );
        assert!(percent_format("%d %d", &Value::int(1)).is_err());
        assert!(percent_format("%d", &Value::tuple(vec![Value::int(1), Value::int(2)])).is_err());
    }
}
