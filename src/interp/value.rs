//! Runtime values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{FromPrimitive, ToPrimitive, Zero};

use super::ast::FunctionDef;
use super::exception::{raise, ExcKind, PyResult};
use super::format::float_repr;
use super::ndarray::NdArray;
use super::scope::Scope;
use super::Interpreter;

/// Signature shared by every natively implemented callable.
pub type NativeFn = fn(&mut Interpreter, CallArgs) -> PyResult<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Fraction,
    NdArray,
    Function,
    BuiltinFunction,
    Method,
    Module,
    Type,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Range => "range",
            TypeKind::Fraction => "Fraction",
            TypeKind::NdArray => "numpy.ndarray",
            TypeKind::Function => "function",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Method => "method",
            TypeKind::Module => "module",
            TypeKind::Type => "type",
        }
    }

    fn qualified_name(self) -> &'static str {
        match self {
            TypeKind::Fraction => "fractions.Fraction",
            other => other.name(),
        }
    }
}

/// A `def` or `lambda` closed over its defining scope.
#[derive(Debug)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// One slot per parameter, filled where a default was given.
    pub defaults: Vec<Option<Value>>,
    pub closure: Option<Rc<Scope>>,
}

pub struct Builtin {
    pub name: &'static str,
    pub func: NativeFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

/// `receiver.name` resolved to a native method, called later.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug)]
pub struct Module {
    pub name: &'static str,
    pub attrs: HashMap<&'static str, Value>,
}

impl Module {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attrs: HashMap::new(),
        }
    }

    pub fn function(mut self, name: &'static str, func: NativeFn) -> Self {
        self.attrs
            .insert(name, Value::Builtin(Rc::new(Builtin { name, func })));
        self
    }

    pub fn constant(mut self, name: &'static str, value: Value) -> Self {
        self.attrs.insert(name, value);
        self
    }

    pub fn into_value(self) -> Value {
        Value::Module(Rc::new(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / (-step)
        } else {
            0
        };
        n.min(usize::MAX as i128) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> i64 {
        self.start + self.step * index as i64
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Range(RangeValue),
    Fraction(Rc<BigRational>),
    Array(Rc<RefCell<NdArray>>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    Method(Rc<BoundMethod>),
    Module(Rc<Module>),
    Type(TypeKind),
}

impl Value {
    pub fn int(n: i64) -> Value {
        Value::Int(BigInt::from(n))
    }

    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn string(s: String) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn fraction(r: BigRational) -> Value {
        Value::Fraction(Rc::new(r))
    }

    pub fn array(a: NdArray) -> Value {
        Value::Array(Rc::new(RefCell::new(a)))
    }

    pub fn dict(d: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(d)))
    }

    pub fn set(s: Set) -> Value {
        Value::Set(Rc::new(RefCell::new(s)))
    }

    pub fn type_kind(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::NoneType,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Str(_) => TypeKind::Str,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::Range(_) => TypeKind::Range,
            Value::Fraction(_) => TypeKind::Fraction,
            Value::Array(_) => TypeKind::NdArray,
            Value::Function(_) => TypeKind::Function,
            Value::Builtin(_) => TypeKind::BuiltinFunction,
            Value::Method(_) => TypeKind::Method,
            Value::Module(_) => TypeKind::Module,
            Value::Type(_) => TypeKind::Type,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_kind().name()
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::Type(_)
        )
    }

    pub fn truthy(&self) -> PyResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => !i.is_zero(),
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => d.borrow().len() > 0,
            Value::Set(s) => s.borrow().len() > 0,
            Value::Range(r) => !r.is_empty(),
            Value::Fraction(f) => !f.is_zero(),
            Value::Array(a) => a.borrow().truthy()?,
            _ => true,
        })
    }

    /// Integer view used for indexing, `range` bounds and counts.
    pub fn as_index(&self) -> PyResult<i64> {
        match self.as_bigint_exact() {
            Some(i) => match i.to_i64() {
                Some(n) => Ok(n),
                None => raise(
                    ExcKind::OverflowError,
                    "Python int too large to convert to C ssize_t",
                ),
            },
            None => raise(
                ExcKind::TypeError,
                format!(
                    "'{}' object cannot be interpreted as an integer",
                    self.type_name()
                ),
            ),
        }
    }

    /// The integer value of ints, bools and integer-typed 0-d arrays.
    pub fn as_bigint_exact(&self) -> Option<BigInt> {
        match self {
            Value::Bool(b) => Some(BigInt::from(*b as i64)),
            Value::Int(i) => Some(i.clone()),
            Value::Array(a) => a.borrow().scalar_int().map(BigInt::from),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> PyResult<usize> {
        let n = self.as_index()?;
        if n < 0 {
            return raise(ExcKind::ValueError, format!("expected a non-negative integer, got {}", n));
        }
        Ok(n as usize)
    }

    /// Real-number view; accepts every numeric kind.
    pub fn as_f64(&self) -> PyResult<f64> {
        match self {
            Value::Bool(b) => Ok(*b as i64 as f64),
            Value::Int(i) => bigint_to_f64(i),
            Value::Float(f) => Ok(*f),
            Value::Fraction(r) => Ok(ratio_to_f64(r)),
            Value::Array(a) => match a.borrow().scalar() {
                Some(v) => Ok(v),
                None => raise(
                    ExcKind::TypeError,
                    "only length-1 arrays can be converted to Python scalars",
                ),
            },
            other => raise(
                ExcKind::TypeError,
                format!("must be real number, not {}", other.type_name()),
            ),
        }
    }

    pub fn is_number(&self) -> bool {
        match self {
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Fraction(_) => true,
            Value::Array(a) => a.borrow().ndim() == 0,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(self, &mut out, 0, &mut Vec::new());
        out
    }

    /// `str()` of a value: strings are unquoted, everything else is `repr`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Fraction(r) => {
                if r.denom() == &BigInt::from(1) {
                    r.numer().to_string()
                } else {
                    format!("{}/{}", r.numer(), r.denom())
                }
            }
            Value::Array(a) => a.borrow().to_display(),
            other => other.repr(),
        }
    }
}

pub fn bigint_to_f64(i: &BigInt) -> PyResult<f64> {
    match i.to_f64() {
        Some(f) if f.is_finite() => Ok(f),
        _ => raise(ExcKind::OverflowError, "int too large to convert to float"),
    }
}

pub fn ratio_to_f64(r: &BigRational) -> f64 {
    if let (Some(n), Some(d)) = (r.numer().to_f64(), r.denom().to_f64()) {
        if n.is_finite() && d.is_finite() {
            return n / d;
        }
    }
    // Scale both sides down so the quotient survives the conversion.
    let shift = r.numer().bits().max(r.denom().bits()).saturating_sub(1000);
    let n = r.numer() >> shift as usize;
    let d = r.denom() >> shift as usize;
    match (n.to_f64(), d.to_f64()) {
        (Some(n), Some(d)) if d != 0.0 => n / d,
        _ => 0.0,
    }
}

pub fn float_to_ratio(f: f64) -> PyResult<BigRational> {
    match BigRational::from_float(f) {
        Some(r) => Ok(r),
        None if f.is_nan() => raise(ExcKind::ValueError, "cannot convert NaN to integer ratio"),
        None => raise(
            ExcKind::OverflowError,
            "cannot convert Infinity to integer ratio",
        ),
    }
}

pub fn float_to_bigint(f: f64) -> PyResult<BigInt> {
    if f.is_nan() {
        return raise(ExcKind::ValueError, "cannot convert float NaN to integer");
    }
    match BigInt::from_f64(f.trunc()) {
        Some(i) => Ok(i),
        None => raise(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ),
    }
}

/// `active` holds the containers on the path from the root; meeting one
/// again prints `[...]` or `{...}`. Past [`MAX_VALUE_DEPTH`] the rest is
/// elided; user-visible conversions reject such values beforehand.
fn write_repr(value: &Value, out: &mut String, depth: usize, active: &mut Vec<usize>) {
    if depth > super::MAX_VALUE_DEPTH {
        out.push_str("...");
        return;
    }
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => out.push_str(&str_repr(s)),
        Value::List(items) => {
            let id = Rc::as_ptr(items) as *const () as usize;
            if active.contains(&id) {
                out.push_str("[...]");
                return;
            }
            active.push(id);
            out.push('[');
            write_items(&items.borrow(), out, depth, active);
            out.push(']');
            active.pop();
        }
        Value::Tuple(items) => {
            out.push('(');
            write_items(items, out, depth, active);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Dict(d) => {
            let id = Rc::as_ptr(d) as *const () as usize;
            if active.contains(&id) {
                out.push_str("{...}");
                return;
            }
            active.push(id);
            out.push('{');
            for (i, (k, v)) in d.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(k, out, depth + 1, active);
                out.push_str(": ");
                write_repr(v, out, depth + 1, active);
            }
            out.push('}');
            active.pop();
        }
        Value::Set(s) => {
            let s = s.borrow();
            if s.len() == 0 {
                out.push_str("set()");
            } else {
                out.push('{');
                let items: Vec<Value> = s.iter().cloned().collect();
                write_items(&items, out, depth, active);
                out.push('}');
            }
        }
        Value::Range(r) => {
            if r.step == 1 {
                out.push_str(&format!("range({}, {})", r.start, r.stop));
            } else {
                out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
            }
        }
        Value::Fraction(r) => {
            out.push_str(&format!("Fraction({}, {})", r.numer(), r.denom()));
        }
        Value::Array(a) => out.push_str(&a.borrow().to_repr()),
        Value::Function(f) => {
            out.push_str(&format!("<function {}>", f.def.name));
        }
        Value::Builtin(b) => {
            out.push_str(&format!("<built-in function {}>", b.name));
        }
        Value::Method(m) => {
            out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            ));
        }
        Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
        Value::Type(k) => out.push_str(&format!("<class '{}'>", k.qualified_name())),
    }
}

fn write_items(items: &[Value], out: &mut String, depth: usize, active: &mut Vec<usize>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out, depth + 1, active);
    }
}

/// Quote a string the way `repr` does, preferring single quotes.
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Hashable projection of a value, consistent with numeric equality
/// (`1 == 1.0 == True == Fraction(1)` all share a key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(BigInt),
    Ratio(BigRational),
    FloatBits(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Type(TypeKind),
    Callable(usize),
}

impl HashKey {
    pub fn of(value: &Value) -> PyResult<HashKey> {
        HashKey::of_at(value, 0)
    }

    fn of_at(value: &Value, depth: usize) -> PyResult<HashKey> {
        if depth > super::MAX_VALUE_DEPTH {
            return raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while hashing",
            );
        }
        Ok(match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(BigInt::from(*b as i64)),
            Value::Int(i) => HashKey::Int(i.clone()),
            Value::Float(f) => float_key(*f),
            Value::Fraction(r) => {
                if r.is_integer() {
                    HashKey::Int(r.to_integer())
                } else {
                    HashKey::Ratio((**r).clone())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items.iter() {
                    keys.push(HashKey::of_at(item, depth + 1)?);
                }
                HashKey::Tuple(keys)
            }
            Value::Range(r) => HashKey::Tuple(vec![
                HashKey::Str(Rc::from("range")),
                HashKey::Int(BigInt::from(r.start)),
                HashKey::Int(BigInt::from(r.stop)),
                HashKey::Int(BigInt::from(r.step)),
            ]),
            Value::Type(k) => HashKey::Type(*k),
            Value::Function(f) => HashKey::Callable(Rc::as_ptr(f) as *const () as usize),
            Value::Builtin(b) => HashKey::Callable(Rc::as_ptr(b) as *const () as usize),
            Value::Module(m) => HashKey::Callable(Rc::as_ptr(m) as *const () as usize),
            Value::Array(a) => {
                let a = a.borrow();
                match (a.ndim(), a.scalar()) {
                    (0, Some(v)) => float_key(v),
                    _ => return raise(ExcKind::TypeError, "unhashable type: 'numpy.ndarray'"),
                }
            }
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!("unhashable type: '{}'", other.type_name()),
                )
            }
        })
    }
}

fn float_key(f: f64) -> HashKey {
    if !f.is_finite() {
        return HashKey::FloatBits(f.to_bits());
    }
    if f.fract() == 0.0 {
        if let Some(i) = BigInt::from_f64(f) {
            return HashKey::Int(i);
        }
    }
    match BigRational::from_float(f) {
        Some(r) => HashKey::Ratio(r),
        None => HashKey::FloatBits(f.to_bits()),
    }
}

/// Insertion-ordered hash map keyed by [`HashKey`].
#[derive(Debug, Clone, Default)]
pub struct Dict {
    index: HashMap<HashKey, usize>,
    entries: Vec<Option<(Value, Value)>>,
    live: usize,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, key: &Value) -> PyResult<Option<Value>> {
        let hk = HashKey::of(key)?;
        Ok(self
            .index
            .get(&hk)
            .and_then(|&i| self.entries[i].as_ref())
            .map(|(_, v)| v.clone()))
    }

    pub fn contains(&self, key: &Value) -> PyResult<bool> {
        Ok(self.index.contains_key(&HashKey::of(key)?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> PyResult<()> {
        let hk = HashKey::of(&key)?;
        match self.index.get(&hk) {
            Some(&i) => {
                if let Some(entry) = self.entries[i].as_mut() {
                    entry.1 = value;
                }
            }
            None => {
                self.index.insert(hk, self.entries.len());
                self.entries.push(Some((key, value)));
                self.live += 1;
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> PyResult<Option<Value>> {
        let hk = HashKey::of(key)?;
        let removed = match self.index.remove(&hk) {
            Some(i) => self.entries[i].take().map(|(_, v)| v),
            None => None,
        };
        if removed.is_some() {
            self.live -= 1;
            self.compact();
        }
        Ok(removed)
    }

    /// Remove and return the most recently inserted entry.
    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        while let Some(slot) = self.entries.pop() {
            if let Some((k, v)) = slot {
                if let Ok(hk) = HashKey::of(&k) {
                    self.index.remove(&hk);
                }
                self.live -= 1;
                return Some((k, v));
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.live = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref().map(|(k, v)| (k, v)))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    fn compact(&mut self) {
        if self.entries.len() <= 2 * self.live + 8 {
            return;
        }
        let entries: Vec<_> = self.entries.drain(..).flatten().collect();
        self.index.clear();
        for (k, v) in entries {
            if let Ok(hk) = HashKey::of(&k) {
                self.index.insert(hk, self.entries.len());
                self.entries.push(Some((k, v)));
            }
        }
    }
}

/// Insertion-ordered set; a [`Dict`] whose values are unused.
#[derive(Debug, Clone, Default)]
pub struct Set {
    inner: Dict,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<Value>) -> PyResult<Self> {
        let mut set = Set::new();
        for v in values {
            set.add(v)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn add(&mut self, value: Value) -> PyResult<()> {
        if !self.inner.contains(&value)? {
            self.inner.insert(value, Value::None)?;
        }
        Ok(())
    }

    pub fn contains(&self, value: &Value) -> PyResult<bool> {
        self.inner.contains(value)
    }

    pub fn remove(&mut self, value: &Value) -> PyResult<bool> {
        Ok(self.inner.remove(value)?.is_some())
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.inner.pop_last().map(|(k, _)| k)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.inner.iter().map(|(k, _)| k)
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.keys()
    }
}

/// Arguments of one call, as evaluated at the call site.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a keyword argument by name.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let pos = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(pos).1)
    }

    /// Positional-only call with between `min` and `max` arguments.
    pub fn positional(self, fname: &str, min: usize, max: usize) -> PyResult<Vec<Value>> {
        if let Some((k, _)) = self.keywords.first() {
            return raise(
                ExcKind::TypeError,
                format!("{}() got an unexpected keyword argument '{}'", fname, k),
            );
        }
        let n = self.positional.len();
        if n < min || n > max {
            let (qualifier, count) = if min == max {
                ("exactly", min)
            } else if n < min {
                ("at least", min)
            } else {
                ("at most", max)
            };
            return raise(
                ExcKind::TypeError,
                format!(
                    "{}() takes {} {} argument{} ({} given)",
                    fname,
                    qualifier,
                    count,
                    if count == 1 { "" } else { "s" },
                    n
                ),
            );
        }
        Ok(self.positional)
    }

    /// Bind positional-or-keyword parameters by name. The first `required`
    /// names must be supplied.
    pub fn bind(self, fname: &str, names: &[&str], required: usize) -> PyResult<Vec<Option<Value>>> {
        let mut slots: Vec<Option<Value>> = vec![None; names.len()];
        if self.positional.len() > names.len() {
            return raise(
                ExcKind::TypeError,
                format!(
                    "{}() takes at most {} arguments ({} given)",
                    fname,
                    names.len(),
                    self.positional.len()
                ),
            );
        }
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (key, value) in self.keywords {
            match names.iter().position(|n| *n == key) {
                Some(i) if slots[i].is_none() => slots[i] = Some(value),
                Some(_) => {
                    return raise(
                        ExcKind::TypeError,
                        format!("{}() got multiple values for argument '{}'", fname, key),
                    )
                }
                None => {
                    return raise(
                        ExcKind::TypeError,
                        format!("{}() got an unexpected keyword argument '{}'", fname, key),
                    )
                }
            }
        }
        for (i, name) in names.iter().enumerate().take(required) {
            if slots[i].is_none() {
                return raise(
                    ExcKind::TypeError,
                    format!("{}() missing required argument '{}' (pos {})", fname, name, i + 1),
                );
            }
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_collapse() {
        let one = HashKey::of(&Value::int(1)).unwrap();
        assert_eq!(one, HashKey::of(&Value::Float(1.0)).unwrap());
        assert_eq!(one, HashKey::of(&Value::Bool(true)).unwrap());
        let half = HashKey::of(&Value::Float(0.5)).unwrap();
        let frac = BigRational::new(BigInt::from(1), BigInt::from(2));
        assert_eq!(half, HashKey::of(&Value::fraction(frac)).unwrap());
    }

    #[test]
    fn test_unhashable_list() {
        assert!(HashKey::of(&Value::list(vec![])).is_err());
    }

    #[test]
    fn test_dict_keeps_insertion_order_across_removal() {
        let mut d = Dict::new();
        for i in 0..20 {
            d.insert(Value::int(i), Value::int(i * i)).unwrap();
        }
        for i in 0..15 {
            d.remove(&Value::int(i)).unwrap();
        }
        d.insert(Value::str("x"), Value::None).unwrap();
        let keys: Vec<String> = d.keys().iter().map(Value::repr).collect();
        assert_eq!(keys, vec!["15", "16", "17", "18", "19", "'x'"]);
        assert_eq!(d.get(&Value::Float(17.0)).unwrap().unwrap().repr(), "289");
    }

    #[test]
    fn test_repr_of_containers() {
        let t = Value::tuple(vec![Value::int(1)]);
        assert_eq!(t.repr(), "(1,)");
        let l = Value::list(vec![Value::str("a"), Value::None, Value::Bool(true)]);
        assert_eq!(l.repr(), "['a', None, True]");
        assert_eq!(Value::set(Set::new()).repr(), "set()");
        assert_eq!(str_repr("it's"), "\"it's\"");
    }

    #[test]
    fn test_self_referential_list_repr_terminates() {
        let inner = Rc::new(RefCell::new(Vec::new()));
        let list = Value::List(inner.clone());
        inner.borrow_mut().push(list.clone());
        assert_eq!(list.repr(), "[[...]]");
        inner.borrow_mut().clear();
    }

    #[test]
    fn test_range_len() {
        let r = RangeValue { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        let r = RangeValue { start: 10, stop: 0, step: -2 };
        assert_eq!(r.len(), 5);
        let r = RangeValue { start: 5, stop: 5, step: 1 };
        assert!(r.is_empty());
    }

    #[test]
    fn test_bind_reports_unknown_keyword() {
        let mut args = CallArgs::new(vec![Value::int(1)]);
        args.keywords.push(("nope".to_string(), Value::None));
        let err = args.bind("f", &["a", "b"], 1).unwrap_err();
        match err {
            super::super::exception::Unwind::Raise(e) => {
                assert!(e.message.contains("unexpected keyword argument 'nope'"))
            }
            _ => panic!("expected exception"),
        }
    }
}
