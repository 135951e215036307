//! Methods and attributes of the built-in value types.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use super::exception::{raise, ExcKind, PyException, PyResult};
use super::modules::{fraction, numpy};
use super::ops;
use super::value::{float_to_ratio, str_repr, CallArgs, Set, Value};
use super::Interpreter;

const STR_METHODS: &[&str] = &[
    "capitalize", "casefold", "center", "count", "endswith", "find", "format", "index",
    "isalnum", "isalpha", "isdecimal", "isdigit", "islower", "isnumeric", "isspace", "istitle",
    "isupper", "join", "ljust", "lower", "lstrip", "partition", "removeprefix", "removesuffix",
    "replace", "rfind", "rindex", "rjust", "rpartition", "rsplit", "rstrip", "split",
    "splitlines", "startswith", "strip", "swapcase", "title", "upper", "zfill",
];
const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];
const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "difference_update", "discard", "intersection",
    "intersection_update", "isdisjoint", "issubset", "issuperset", "pop", "remove",
    "symmetric_difference", "union", "update",
];
const INT_METHODS: &[&str] = &["as_integer_ratio", "bit_count", "bit_length", "conjugate", "is_integer"];
const FLOAT_METHODS: &[&str] = &["as_integer_ratio", "conjugate", "is_integer"];
const RANGE_METHODS: &[&str] = &["count", "index"];

pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Int(_) | Value::Bool(_) => INT_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        Value::Range(_) => RANGE_METHODS,
        Value::Fraction(_) => fraction::METHODS,
        Value::Array(_) => numpy::ARRAY_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

/// Data attributes, as opposed to methods.
pub(crate) fn attribute(_interp: &mut Interpreter, value: &Value, attr: &str) -> PyResult<Option<Value>> {
    Ok(match (value, attr) {
        (Value::Int(_), "real" | "numerator") => Some(value.clone()),
        (Value::Bool(b), "real" | "numerator") => Some(Value::int(*b as i64)),
        (Value::Int(_) | Value::Bool(_), "imag") => Some(Value::int(0)),
        (Value::Int(_) | Value::Bool(_), "denominator") => Some(Value::int(1)),
        (Value::Float(_), "real") => Some(value.clone()),
        (Value::Float(_), "imag") => Some(Value::Float(0.0)),
        (Value::Fraction(_), _) => fraction::attribute(value, attr),
        (Value::Range(r), "start") => Some(Value::int(r.start)),
        (Value::Range(r), "stop") => Some(Value::int(r.stop)),
        (Value::Range(r), "step") => Some(Value::int(r.step)),
        (Value::Array(a), _) => numpy::array_attribute(a, attr)?,
        (Value::Function(f), "__name__") => Some(Value::str(&f.def.name)),
        (Value::Builtin(b), "__name__") => Some(Value::str(b.name)),
        (Value::Type(k), "__name__") => Some(Value::str(k.name())),
        (Value::Module(m), "__name__") => Some(Value::str(m.name)),
        _ => None,
    })
}

pub(crate) fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> PyResult<Value> {
    interp.tick()?;
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Tuple(items) => sequence_method(interp, items, "tuple", name, args),
        Value::Dict(_) => dict_method(interp, receiver, name, args),
        Value::Set(_) => set_method(interp, receiver, name, args),
        Value::Int(_) | Value::Bool(_) => int_method(receiver, name, args),
        Value::Float(f) => float_method(*f, name, args),
        Value::Range(_) => {
            let items = interp.collect(receiver)?;
            sequence_method(interp, &items, "range", name, args)
        }
        Value::Fraction(r) => fraction::call_method(interp, r, name, args),
        Value::Array(a) => numpy::call_array_method(interp, a, name, args),
        other => raise(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        ),
    }
}

fn str_arg<'a>(v: &'a Value, method: &str) -> PyResult<&'a str> {
    match v {
        Value::Str(s) => Ok(s),
        other => raise(
            ExcKind::TypeError,
            format!(
                "{}() argument must be str, not {}",
                method,
                other.type_name()
            ),
        ),
    }
}

fn opt_str_arg<'a>(v: Option<&'a Value>, method: &str) -> PyResult<Option<&'a str>> {
    match v {
        None | Some(Value::None) => Ok(None),
        Some(v) => str_arg(v, method).map(Some),
    }
}

/// Resolve optional `start`/`end` arguments against a char length.
fn char_bounds(args: &[Value], len: usize) -> PyResult<(usize, usize)> {
    let bound = |v: Option<&Value>, default: usize| -> PyResult<usize> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = v.as_index()?;
                let n = len as i64;
                Ok(if i < 0 { (i + n).max(0) } else { i.min(n) } as usize)
            }
        }
    };
    Ok((bound(args.first(), 0)?, bound(args.get(1), len)?))
}

fn char_find(hay: &[char], needle: &[char], start: usize, end: usize, from_right: bool) -> Option<usize> {
    if end < start || needle.len() > end - start {
        return None;
    }
    let last = end - needle.len();
    let matches = |i: &usize| hay[*i..*i + needle.len()] == *needle;
    if from_right {
        (start..=last).rev().find(matches)
    } else {
        (start..=last).find(matches)
    }
}

fn str_method(interp: &mut Interpreter, s: &Rc<str>, name: &str, args: CallArgs) -> PyResult<Value> {
    let text: &str = s;
    let result = match name {
        "upper" => {
            args.positional("upper", 0, 0)?;
            Value::string(text.to_uppercase())
        }
        "lower" => {
            args.positional("lower", 0, 0)?;
            Value::string(text.to_lowercase())
        }
        "casefold" => {
            args.positional("casefold", 0, 0)?;
            Value::string(text.to_lowercase())
        }
        "swapcase" => {
            args.positional("swapcase", 0, 0)?;
            Value::string(
                text.chars()
                    .flat_map(|c| {
                        if c.is_uppercase() {
                            c.to_lowercase().collect::<Vec<_>>()
                        } else {
                            c.to_uppercase().collect::<Vec<_>>()
                        }
                    })
                    .collect(),
            )
        }
        "capitalize" => {
            args.positional("capitalize", 0, 0)?;
            let mut chars = text.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            };
            Value::string(out)
        }
        "title" => {
            args.positional("title", 0, 0)?;
            let mut out = String::with_capacity(text.len());
            let mut previous_cased = false;
            for c in text.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Value::string(out)
        }
        "strip" | "lstrip" | "rstrip" => {
            let a = args.positional(name, 0, 1)?;
            let chars = opt_str_arg(a.first(), name)?;
            let pred = |c: char| match chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => text.trim_matches(pred),
                "lstrip" => text.trim_start_matches(pred),
                _ => text.trim_end_matches(pred),
            };
            Value::str(out)
        }
        "split" | "rsplit" => {
            let slots = args.bind(name, &["sep", "maxsplit"], 0)?;
            let sep = opt_str_arg(slots[0].as_ref(), name)?;
            let maxsplit = match &slots[1] {
                Some(v) => v.as_index()?,
                None => -1,
            };
            let parts = split(text, sep, maxsplit, name == "rsplit")?;
            interp.check_len(parts.len())?;
            Value::list(parts.into_iter().map(Value::string).collect())
        }
        "splitlines" => {
            let slots = args.bind("splitlines", &["keepends"], 0)?;
            let keep = match &slots[0] {
                Some(v) => v.truthy()?,
                None => false,
            };
            let mut out = Vec::new();
            let mut current = String::new();
            let mut chars = text.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\n' || c == '\r' {
                    let mut ending = c.to_string();
                    if c == '\r' && chars.peek() == Some(&'\n') {
                        chars.next();
                        ending.push('\n');
                    }
                    if keep {
                        current.push_str(&ending);
                    }
                    out.push(Value::string(std::mem::take(&mut current)));
                } else {
                    current.push(c);
                }
            }
            if !current.is_empty() {
                out.push(Value::string(current));
            }
            Value::list(out)
        }
        "join" => {
            let a = args.positional("join", 1, 1)?;
            let items = interp.collect(&a[0])?;
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(text);
                }
                match item {
                    Value::Str(part) => out.push_str(part),
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "sequence item {}: expected str instance, {} found",
                                i,
                                other.type_name()
                            ),
                        )
                    }
                }
                interp.check_str_len(out.len())?;
            }
            Value::string(out)
        }
        "replace" => {
            let a = args.positional("replace", 2, 3)?;
            let old = str_arg(&a[0], "replace")?;
            let new = str_arg(&a[1], "replace")?;
            let count = match a.get(2) {
                Some(v) => v.as_index()?,
                None => -1,
            };
            let occurrences = if old.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(old).count()
            };
            let replaced = if count < 0 { occurrences } else { occurrences.min(count as usize) };
            let grown = text.len() + replaced.saturating_mul(new.len());
            interp.check_str_len(grown)?;
            let out = if count < 0 {
                text.replace(old, new)
            } else if old.is_empty() {
                let mut out = String::new();
                let mut left = count as usize;
                for c in text.chars() {
                    if left > 0 {
                        out.push_str(new);
                        left -= 1;
                    }
                    out.push(c);
                }
                if left > 0 {
                    out.push_str(new);
                }
                out
            } else {
                text.replacen(old, new, count as usize)
            };
            Value::string(out)
        }
        "find" | "rfind" | "index" | "rindex" | "count" => {
            let a = args.positional(name, 1, 3)?;
            let needle: Vec<char> = str_arg(&a[0], name)?.chars().collect();
            let hay: Vec<char> = text.chars().collect();
            let (start, end) = char_bounds(&a[1..], hay.len())?;
            if name == "count" {
                let mut n = 0;
                let mut i = start;
                if needle.is_empty() {
                    n = if end >= start { end - start + 1 } else { 0 };
                } else {
                    while let Some(at) = char_find(&hay, &needle, i, end, false) {
                        n += 1;
                        i = at + needle.len();
                    }
                }
                Value::int(n as i64)
            } else {
                let from_right = name.starts_with('r');
                match char_find(&hay, &needle, start, end, from_right) {
                    Some(i) => Value::int(i as i64),
                    None if name.ends_with("find") => Value::int(-1),
                    None => return raise(ExcKind::ValueError, "substring not found"),
                }
            }
        }
        "startswith" | "endswith" => {
            let a = args.positional(name, 1, 3)?;
            let chars: Vec<char> = text.chars().collect();
            let (start, end) = char_bounds(&a[1..], chars.len())?;
            let window: String = if start <= end { chars[start..end].iter().collect() } else { String::new() };
            let candidates: Vec<Value> = match &a[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for c in &candidates {
                let c = match c {
                    Value::Str(c) => c,
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "{} first arg must be str or a tuple of str, not {}",
                                name,
                                other.type_name()
                            ),
                        )
                    }
                };
                if (name == "startswith" && window.starts_with(c.as_ref()))
                    || (name == "endswith" && window.ends_with(c.as_ref()))
                {
                    hit = true;
                    break;
                }
            }
            Value::Bool(hit)
        }
        "removeprefix" => {
            let a = args.positional(name, 1, 1)?;
            let p = str_arg(&a[0], name)?;
            Value::str(text.strip_prefix(p).unwrap_or(text))
        }
        "removesuffix" => {
            let a = args.positional(name, 1, 1)?;
            let p = str_arg(&a[0], name)?;
            Value::str(text.strip_suffix(p).unwrap_or(text))
        }
        "partition" | "rpartition" => {
            let a = args.positional(name, 1, 1)?;
            let sep = str_arg(&a[0], name)?;
            if sep.is_empty() {
                return raise(ExcKind::ValueError, "empty separator");
            }
            let found = if name == "partition" { text.find(sep) } else { text.rfind(sep) };
            let parts = match found {
                Some(i) => [&text[..i], sep, &text[i + sep.len()..]],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Value::tuple(parts.iter().map(|p| Value::str(p)).collect())
        }
        "center" | "ljust" | "rjust" => {
            let a = args.positional(name, 1, 2)?;
            let width = a[0].as_index()?;
            let fill = match a.get(1) {
                Some(Value::Str(f)) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
                Some(_) => {
                    return raise(
                        ExcKind::TypeError,
                        "The fill character must be exactly one character long",
                    )
                }
                None => ' ',
            };
            let len = text.chars().count() as i64;
            if width <= len {
                Value::Str(s.clone())
            } else {
                let pad = (width - len) as usize;
                interp.check_str_len(text.len() + pad * fill.len_utf8())?;
                let (left, right) = match name {
                    "ljust" => (0, pad),
                    "rjust" => (pad, 0),
                    _ => {
                        let left = pad / 2 + (pad & width as usize & 1);
                        (left, pad - left)
                    }
                };
                let mut out = String::new();
                out.extend(std::iter::repeat(fill).take(left));
                out.push_str(text);
                out.extend(std::iter::repeat(fill).take(right));
                Value::string(out)
            }
        }
        "zfill" => {
            let a = args.positional("zfill", 1, 1)?;
            let width = a[0].as_index()?;
            let len = text.chars().count() as i64;
            if width <= len {
                Value::Str(s.clone())
            } else {
                let pad = (width - len) as usize;
                interp.check_str_len(text.len() + pad)?;
                let (sign, rest) = match text.chars().next() {
                    Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                    _ => (String::new(), text),
                };
                Value::string(format!("{}{}{}", sign, "0".repeat(pad), rest))
            }
        }
        "format" => Value::string(str_format(interp, text, args)?),
        "isdigit" | "isdecimal" | "isnumeric" => {
            args.positional(name, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_numeric()))
        }
        "isalpha" => {
            args.positional(name, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))
        }
        "isalnum" => {
            args.positional(name, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric))
        }
        "isspace" => {
            args.positional(name, 0, 0)?;
            Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace))
        }
        "isupper" | "islower" => {
            args.positional(name, 0, 0)?;
            let cased: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
            let ok = if name == "isupper" {
                cased.iter().any(|c| c.is_uppercase()) && !cased.iter().any(|c| c.is_lowercase())
            } else {
                cased.iter().any(|c| c.is_lowercase()) && !cased.iter().any(|c| c.is_uppercase())
            };
            Value::Bool(ok)
        }
        "istitle" => {
            args.positional(name, 0, 0)?;
            let mut previous_cased = false;
            let mut any = false;
            let mut ok = true;
            for c in text.chars() {
                if c.is_uppercase() {
                    ok &= !previous_cased;
                    previous_cased = true;
                    any = true;
                } else if c.is_lowercase() {
                    ok &= previous_cased;
                    previous_cased = true;
                    any = true;
                } else {
                    previous_cased = false;
                }
            }
            Value::Bool(ok && any)
        }
        _ => return no_attribute("str", name),
    };
    Ok(result)
}

fn no_attribute<T>(type_name: &str, name: &str) -> PyResult<T> {
    raise(
        ExcKind::AttributeError,
        format!("'{}' object has no attribute '{}'", type_name, name),
    )
}

fn split(text: &str, sep: Option<&str>, maxsplit: i64, from_right: bool) -> PyResult<Vec<String>> {
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize };
    match sep {
        Some("") => raise(ExcKind::ValueError, "empty separator"),
        Some(sep) => Ok(if limit == usize::MAX {
            text.split(sep).map(str::to_string).collect()
        } else if from_right {
            let mut parts: Vec<String> = text.rsplitn(limit + 1, sep).map(str::to_string).collect();
            parts.reverse();
            parts
        } else {
            text.splitn(limit + 1, sep).map(str::to_string).collect()
        }),
        None => {
            if limit == usize::MAX {
                return Ok(text.split_whitespace().map(str::to_string).collect());
            }
            let mut parts = Vec::new();
            if from_right {
                let mut rest = text.trim_end();
                while !rest.is_empty() {
                    if parts.len() == limit {
                        parts.push(rest.to_string());
                        break;
                    }
                    match rest.rfind(char::is_whitespace) {
                        Some(i) => {
                            let ws = rest[i..].chars().next().map_or(1, char::len_utf8);
                            parts.push(rest[i + ws..].to_string());
                            rest = rest[..i].trim_end();
                        }
                        None => {
                            parts.push(rest.to_string());
                            break;
                        }
                    }
                }
                parts.reverse();
            } else {
                let mut rest = text.trim_start();
                while !rest.is_empty() {
                    if parts.len() == limit {
                        parts.push(rest.to_string());
                        break;
                    }
                    match rest.find(char::is_whitespace) {
                        Some(i) => {
                            parts.push(rest[..i].to_string());
                            rest = rest[i..].trim_start();
                        }
                        None => {
                            parts.push(rest.to_string());
                            break;
                        }
                    }
                }
            }
            Ok(parts)
        }
    }
}

// ----- str.format ---------------------------------------------------------

struct FormatArgs {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
    next_auto: usize,
    manual: bool,
}

fn str_format(interp: &mut Interpreter, template: &str, args: CallArgs) -> PyResult<String> {
    let mut state = FormatArgs {
        positional: args.positional,
        keywords: args.keywords,
        next_auto: 0,
        manual: false,
    };
    render_template(interp, template, &mut state, 0)
}

fn render_template(
    interp: &mut Interpreter,
    template: &str,
    state: &mut FormatArgs,
    depth: usize,
) -> PyResult<String> {
    if depth > 1 {
        return raise(ExcKind::ValueError, "Max string recursion exceeded");
    }
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' {
            if chars.get(i + 1) == Some(&'{') {
                out.push('{');
                i += 2;
                continue;
            }
            let mut level = 1;
            let mut j = i + 1;
            while j < chars.len() {
                match chars[j] {
                    '{' => level += 1,
                    '}' => {
                        level -= 1;
                        if level == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
            if j >= chars.len() {
                return raise(ExcKind::ValueError, "expected '}' before end of string");
            }
            let field: String = chars[i + 1..j].iter().collect();
            out.push_str(&render_field(interp, &field, state, depth)?);
            interp.check_str_len(out.len())?;
            i = j + 1;
        } else if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return raise(ExcKind::ValueError, "Single '}' encountered in format string");
        } else {
            out.push(c);
            i += 1;
        }
    }
    Ok(out)
}

fn render_field(
    interp: &mut Interpreter,
    field: &str,
    state: &mut FormatArgs,
    depth: usize,
) -> PyResult<String> {
    let mut bracket = 0;
    let mut split_at = field.len();
    for (i, c) in field.char_indices() {
        match c {
            '[' => bracket += 1,
            ']' => bracket -= 1,
            '!' | ':' if bracket == 0 => {
                split_at = i;
                break;
            }
            _ => {}
        }
    }
    let (name, rest) = field.split_at(split_at);
    let (conversion, spec) = if let Some(r) = rest.strip_prefix('!') {
        let mut chars = r.chars();
        let conv = chars.next();
        let after = chars.as_str();
        match after.strip_prefix(':') {
            Some(spec) => (conv, spec),
            None if after.is_empty() => (conv, ""),
            None => return raise(ExcKind::ValueError, "expected ':' after conversion specifier"),
        }
    } else {
        (None, rest.strip_prefix(':').unwrap_or(""))
    };

    let value = lookup_field(interp, name, state)?;
    let value = match conversion {
        None => value,
        Some('r') | Some('a') => Value::string(interp.repr_of(&value)?),
        Some('s') => Value::string(interp.str_of(&value)?),
        Some(other) => {
            return raise(
                ExcKind::ValueError,
                format!("Unknown conversion specifier {}", other),
            )
        }
    };
    let spec = if spec.contains('{') {
        render_template(interp, spec, state, depth + 1)?
    } else {
        spec.to_string()
    };
    interp.format_value(&value, &spec)
}

fn lookup_field(interp: &mut Interpreter, name: &str, state: &mut FormatArgs) -> PyResult<Value> {
    let end = name.find(|c| c == '.' || c == '[').unwrap_or(name.len());
    let (head, mut tail) = name.split_at(end);
    let mut value = if head.is_empty() {
        if state.manual {
            return raise(
                ExcKind::ValueError,
                "cannot switch from manual field specification to automatic field numbering",
            );
        }
        let i = state.next_auto;
        state.next_auto += 1;
        positional_field(state, i)?
    } else if let Ok(i) = head.parse::<usize>() {
        if state.next_auto > 0 {
            return raise(
                ExcKind::ValueError,
                "cannot switch from automatic field numbering to manual field specification",
            );
        }
        state.manual = true;
        positional_field(state, i)?
    } else {
        match state.keywords.iter().find(|(k, _)| k == head) {
            Some((_, v)) => v.clone(),
            None => return raise(ExcKind::KeyError, str_repr(head)),
        }
    };
    while !tail.is_empty() {
        if let Some(rest) = tail.strip_prefix('.') {
            let end = rest.find(|c| c == '.' || c == '[').unwrap_or(rest.len());
            value = interp.get_attribute(&value, &rest[..end])?;
            tail = &rest[end..];
        } else if let Some(rest) = tail.strip_prefix('[') {
            let close = match rest.find(']') {
                Some(c) => c,
                None => return raise(ExcKind::ValueError, "Missing ']' in format string"),
            };
            let key = &rest[..close];
            let key = match key.parse::<i64>() {
                Ok(n) => Value::int(n),
                Err(_) => Value::str(key),
            };
            value = ops::get_item(interp, &value, ops::Index::Value(key))?;
            tail = &rest[close + 1..];
        } else {
            return raise(
                ExcKind::ValueError,
                "Only '.' or '[' may follow ']' in format field specifier",
            );
        }
    }
    Ok(value)
}

fn positional_field(state: &FormatArgs, i: usize) -> PyResult<Value> {
    match state.positional.get(i) {
        Some(v) => Ok(v.clone()),
        None => raise(
            ExcKind::IndexError,
            format!(
                "Replacement index {} out of range for positional args tuple",
                i
            ),
        ),
    }
}

// ----- sequences ----------------------------------------------------------

fn sequence_method(
    interp: &mut Interpreter,
    items: &[Value],
    type_name: &str,
    name: &str,
    args: CallArgs,
) -> PyResult<Value> {
    match name {
        "count" => {
            let a = args.positional("count", 1, 1)?;
            let mut n = 0;
            for item in items {
                interp.tick()?;
                if ops::identical(item, &a[0]) || ops::equals(item, &a[0])? {
                    n += 1;
                }
            }
            Ok(Value::int(n))
        }
        "index" => {
            let a = args.positional("index", 1, 3)?;
            let (start, end) = char_bounds(&a[1..], items.len())?;
            for (i, item) in items.iter().enumerate().take(end).skip(start) {
                interp.tick()?;
                if ops::identical(item, &a[0]) || ops::equals(item, &a[0])? {
                    return Ok(Value::int(i as i64));
                }
            }
            let message = match type_name {
                "list" => format!("{} is not in list", interp.repr_of(&a[0])?),
                "range" => format!("{} is not in range", interp.repr_of(&a[0])?),
                _ => "tuple.index(x): x not in tuple".to_string(),
            };
            raise(ExcKind::ValueError, message)
        }
        _ => no_attribute(type_name, name),
    }
}

fn list_method(interp: &mut Interpreter, receiver: &Value, name: &str, mut args: CallArgs) -> PyResult<Value> {
    let list = match receiver {
        Value::List(l) => l.clone(),
        _ => return no_attribute(receiver.type_name(), name),
    };
    match name {
        "append" => {
            let a = args.positional("append", 1, 1)?;
            let len = list.borrow().len();
            interp.check_len(len + 1)?;
            list.borrow_mut().extend(a);
            Ok(Value::None)
        }
        "extend" => {
            let a = args.positional("extend", 1, 1)?;
            let extra = interp.collect(&a[0])?;
            let len = list.borrow().len();
            interp.check_len(len + extra.len())?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let a = args.positional("insert", 2, 2)?;
            let i = a[0].as_index()?;
            let mut items = list.borrow_mut();
            let n = items.len() as i64;
            let at = if i < 0 { (i + n).max(0) } else { i.min(n) } as usize;
            items.insert(at, a[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            let a = args.positional("pop", 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return raise(ExcKind::IndexError, "pop from empty list");
            }
            let n = items.len() as i64;
            let i = match a.first() {
                Some(v) => v.as_index()?,
                None => -1,
            };
            let at = if i < 0 { i + n } else { i };
            if !(0..n).contains(&at) {
                return raise(ExcKind::IndexError, "pop index out of range");
            }
            Ok(items.remove(at as usize))
        }
        "remove" => {
            let a = args.positional("remove", 1, 1)?;
            let snapshot = list.borrow().clone();
            for (i, item) in snapshot.iter().enumerate() {
                if ops::identical(item, &a[0]) || ops::equals(item, &a[0])? {
                    list.borrow_mut().remove(i);
                    return Ok(Value::None);
                }
            }
            raise(ExcKind::ValueError, "list.remove(x): x not in list")
        }
        "clear" => {
            args.positional("clear", 0, 0)?;
            let drained: Vec<Value> = list.borrow_mut().drain(..).collect();
            drop(drained);
            Ok(Value::None)
        }
        "copy" => {
            args.positional("copy", 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "reverse" => {
            args.positional("reverse", 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "sort" => {
            let key = args.take_keyword("key");
            let reverse = match args.take_keyword("reverse") {
                Some(v) => v.truthy()?,
                None => false,
            };
            args.positional("sort", 0, 0)?;
            let items = std::mem::take(&mut *list.borrow_mut());
            let sorted = ops::sort_values(interp, items.clone(), key.as_ref(), reverse);
            match sorted {
                Ok(sorted) => {
                    *list.borrow_mut() = sorted;
                    Ok(Value::None)
                }
                Err(e) => {
                    *list.borrow_mut() = items;
                    Err(e)
                }
            }
        }
        "count" | "index" => {
            let items = list.borrow().clone();
            sequence_method(interp, &items, "list", name, args)
        }
        _ => no_attribute("list", name),
    }
}

fn key_error(interp: &Interpreter, key: &Value) -> PyException {
    let text = interp.repr_of(key).unwrap_or_else(|_| key.type_name().to_string());
    PyException::new(ExcKind::KeyError, text)
}

fn dict_method(interp: &mut Interpreter, receiver: &Value, name: &str, mut args: CallArgs) -> PyResult<Value> {
    let dict = match receiver {
        Value::Dict(d) => d.clone(),
        _ => return no_attribute(receiver.type_name(), name),
    };
    match name {
        "get" => {
            let a = args.positional("get", 1, 2)?;
            let found = dict.borrow().get(&a[0])?;
            Ok(found.unwrap_or_else(|| a.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            args.positional("keys", 0, 0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            args.positional("values", 0, 0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            args.positional("items", 0, 0)?;
            Ok(Value::list(dict.borrow().items()))
        }
        "pop" => {
            let a = args.positional("pop", 1, 2)?;
            let removed = dict.borrow_mut().remove(&a[0])?;
            match (removed, a.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(interp, &a[0]).into()),
            }
        }
        "popitem" => {
            args.positional("popitem", 0, 0)?;
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((k, v)) => Ok(Value::tuple(vec![k, v])),
                None => raise(ExcKind::KeyError, "'popitem(): dictionary is empty'"),
            }
        }
        "setdefault" => {
            let a = args.positional("setdefault", 1, 2)?;
            let existing = dict.borrow().get(&a[0])?;
            match existing {
                Some(v) => Ok(v),
                None => {
                    let default = a.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(a[0].clone(), default.clone())?;
                    Ok(default)
                }
            }
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            let a = args.positional("update", 0, 1)?;
            if let Some(source) = a.first() {
                let other = ops::dict_from(interp, source)?;
                let mut target = dict.borrow_mut();
                for (k, v) in other.iter() {
                    target.insert(k.clone(), v.clone())?;
                }
            }
            let mut target = dict.borrow_mut();
            for (k, v) in keywords {
                target.insert(Value::string(k), v)?;
            }
            Ok(Value::None)
        }
        "copy" => {
            args.positional("copy", 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "clear" => {
            args.positional("clear", 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => no_attribute("dict", name),
    }
}

fn set_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: CallArgs) -> PyResult<Value> {
    let set = match receiver {
        Value::Set(s) => s.clone(),
        _ => return no_attribute(receiver.type_name(), name),
    };
    match name {
        "add" => {
            let a = args.positional("add", 1, 1)?;
            let len = set.borrow().len();
            interp.check_len(len + 1)?;
            set.borrow_mut().add(a[0].clone())?;
            Ok(Value::None)
        }
        "remove" => {
            let a = args.positional("remove", 1, 1)?;
            let removed = set.borrow_mut().remove(&a[0])?;
            if removed {
                Ok(Value::None)
            } else {
                Err(key_error(interp, &a[0]).into())
            }
        }
        "discard" => {
            let a = args.positional("discard", 1, 1)?;
            set.borrow_mut().remove(&a[0])?;
            Ok(Value::None)
        }
        "pop" => {
            args.positional("pop", 0, 0)?;
            let popped = set.borrow_mut().pop();
            match popped {
                Some(v) => Ok(v),
                None => raise(ExcKind::KeyError, "'pop from an empty set'"),
            }
        }
        "clear" => {
            args.positional("clear", 0, 0)?;
            set.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.positional("copy", 0, 0)?;
            Ok(Value::set(set.borrow().clone()))
        }
        "union" | "update" => {
            let others = args.positional(name, 0, usize::MAX)?;
            let mut out = set.borrow().clone();
            for other in &others {
                for item in interp.collect(other)? {
                    out.add(item)?;
                }
                interp.check_len(out.len())?;
            }
            if name == "update" {
                *set.borrow_mut() = out;
                Ok(Value::None)
            } else {
                Ok(Value::set(out))
            }
        }
        "intersection" | "intersection_update" | "difference" | "difference_update" => {
            let others = args.positional(name, 0, usize::MAX)?;
            let keep_common = name.starts_with("intersection");
            let mut current = set.borrow().to_vec();
            for other in &others {
                let other = Set::from_values(interp.collect(other)?)?;
                let mut next = Vec::with_capacity(current.len());
                for item in current {
                    if other.contains(&item)? == keep_common {
                        next.push(item);
                    }
                }
                current = next;
            }
            let out = Set::from_values(current)?;
            if name.ends_with("_update") {
                *set.borrow_mut() = out;
                Ok(Value::None)
            } else {
                Ok(Value::set(out))
            }
        }
        "symmetric_difference" => {
            let a = args.positional(name, 1, 1)?;
            let other = Set::from_values(interp.collect(&a[0])?)?;
            let mine = set.borrow().clone();
            let mut out = Set::new();
            for item in mine.iter() {
                if !other.contains(item)? {
                    out.add(item.clone())?;
                }
            }
            for item in other.iter() {
                if !mine.contains(item)? {
                    out.add(item.clone())?;
                }
            }
            Ok(Value::set(out))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            let a = args.positional(name, 1, 1)?;
            let other = Set::from_values(interp.collect(&a[0])?)?;
            let mine = set.borrow().clone();
            let result = match name {
                "issubset" => all_in(&mine, &other)?,
                "issuperset" => all_in(&other, &mine)?,
                _ => {
                    let mut disjoint = true;
                    for item in mine.iter() {
                        if other.contains(item)? {
                            disjoint = false;
                            break;
                        }
                    }
                    disjoint
                }
            };
            Ok(Value::Bool(result))
        }
        _ => no_attribute("set", name),
    }
}

fn all_in(a: &Set, b: &Set) -> PyResult<bool> {
    for item in a.iter() {
        if !b.contains(item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

// ----- numbers ------------------------------------------------------------

fn int_method(receiver: &Value, name: &str, args: CallArgs) -> PyResult<Value> {
    let i = receiver.as_bigint_exact().unwrap_or_else(BigInt::zero);
    args.positional(name, 0, 0)?;
    match name {
        "bit_length" => Ok(Value::int(i.bits() as i64)),
        "bit_count" => Ok(Value::int(
            i.abs().to_u64_digits().1.iter().map(|d| d.count_ones() as i64).sum(),
        )),
        "conjugate" => Ok(Value::Int(i)),
        "as_integer_ratio" => Ok(Value::tuple(vec![Value::Int(i), Value::int(1)])),
        "is_integer" => Ok(Value::Bool(true)),
        _ => no_attribute(receiver.type_name(), name),
    }
}

fn float_method(f: f64, name: &str, args: CallArgs) -> PyResult<Value> {
    args.positional(name, 0, 0)?;
    match name {
        "is_integer" => Ok(Value::Bool(f.is_finite() && f.fract() == 0.0)),
        "conjugate" => Ok(Value::Float(f)),
        "as_integer_ratio" => {
            let r = float_to_ratio(f)?;
            Ok(Value::tuple(vec![
                Value::Int(r.numer().clone()),
                Value::Int(r.denom().clone()),
            ]))
        }
        _ => no_attribute("float", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_whitespace_with_limit() {
        assert_eq!(split("  a b  c ", None, 1, false).unwrap(), vec!["a", "b  c "]);
        assert_eq!(split("  a b  c ", None, 1, true).unwrap(), vec!["  a b", "c"]);
        assert_eq!(split("a,b,,c", Some(","), -1, false).unwrap(), vec!["a", "b", "", "c"]);
        assert_eq!(split("a,b,c", Some(","), 1, true).unwrap(), vec!["a,b", "c"]);
        assert!(split("abc", Some(""), -1, false).is_err());
    }

    #[test]
    fn test_char_find() {
        let hay: Vec<char> = "héllo héllo".chars().collect();
        let needle: Vec<char> = "llo".chars().collect();
        assert_eq!(char_find(&hay, &needle, 0, hay.len(), false), Some(2));
        assert_eq!(char_find(&hay, &needle, 0, hay.len(), true), Some(8));
        assert_eq!(char_find(&hay, &needle, 3, 5, false), None);
    }

    #[test]
    fn test_method_tables() {
        assert!(has_method(&Value::str("x"), "upper"));
        assert!(has_method(&Value::list(vec![]), "append"));
        assert!(!has_method(&Value::list(vec![]), "upper"));
        assert!(!has_method(&Value::None, "anything"));
    }
}
