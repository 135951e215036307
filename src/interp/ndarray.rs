//! N-dimensional numeric arrays backing the `numpy` module.
//!
//! Elements are stored as `f64` in row-major order; the dtype decides how
//! they are interpreted, printed and converted back to Python values.
//! Indexing returns copies rather than views.

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::exception::{raise, ExcKind, PyResult};
use super::format::float_repr;
use super::ops::{self, Index, SliceSpec};
use super::value::{ratio_to_f64, Value};
use super::Interpreter;

/// Highest dimension count an array may have.
pub const MAX_NDIM: usize = 32;

/// Arrays larger than this print only their edges.
const SUMMARY_THRESHOLD: usize = 1000;
const EDGE_ITEMS: usize = 3;
const LINE_WIDTH: usize = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DType {
    Bool,
    Int,
    Float,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int => "int64",
            DType::Float => "float64",
        }
    }

    /// Bring a raw element into this dtype's domain.
    pub fn cast(self, x: f64) -> f64 {
        match self {
            DType::Bool => (x != 0.0) as u8 as f64,
            DType::Int if x.is_finite() => x.trunc(),
            DType::Int => i64::MIN as f64,
            DType::Float => x,
        }
    }

    pub fn parse(name: &str) -> PyResult<DType> {
        match name {
            "bool" | "bool_" | "?" => Ok(DType::Bool),
            "int" | "int64" | "int32" | "i8" | "i4" | "long" => Ok(DType::Int),
            "float" | "float64" | "float32" | "f8" | "f4" | "double" => Ok(DType::Float),
            other => raise(
                ExcKind::TypeError,
                format!("data type '{}' not understood", other),
            ),
        }
    }
}

/// Convert a stored element to the Python value it stands for.
pub fn element_value(dtype: DType, x: f64) -> Value {
    match dtype {
        DType::Bool => Value::Bool(x != 0.0),
        DType::Int => Value::Int(BigInt::from(x as i64)),
        DType::Float => Value::Float(x),
    }
}

#[derive(Debug, Clone)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    pub dtype: DType,
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>, dtype: DType) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data, dtype }
    }

    pub fn scalar_of(x: f64, dtype: DType) -> Self {
        Self::new(Vec::new(), vec![x], dtype)
    }

    pub fn vector(data: Vec<f64>, dtype: DType) -> Self {
        Self::new(vec![data.len()], data, dtype)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn strides(&self) -> Vec<usize> {
        strides_of(&self.shape)
    }

    pub fn element(&self, x: f64) -> Value {
        element_value(self.dtype, x)
    }

    /// The single element of a size-1 array.
    pub fn scalar(&self) -> Option<f64> {
        if self.size() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// The value of a 0-d integer or boolean array.
    pub fn scalar_int(&self) -> Option<i64> {
        if self.ndim() == 0 && self.dtype != DType::Float {
            Some(self.data[0] as i64)
        } else {
            None
        }
    }

    pub fn scalar_value(&self) -> Value {
        self.data
            .first()
            .map_or(Value::None, |x| element_value(self.dtype, *x))
    }

    pub fn truthy(&self) -> PyResult<bool> {
        match self.size() {
            0 => Ok(false),
            1 => Ok(self.data[0] != 0.0),
            _ => raise(
                ExcKind::ValueError,
                "The truth value of an array with more than one element is ambiguous. \
                 Use a.any() or a.all()",
            ),
        }
    }

    pub fn len(&self) -> PyResult<usize> {
        match self.shape.first() {
            Some(n) => Ok(*n),
            None => raise(ExcKind::TypeError, "len() of unsized object"),
        }
    }

    /// Row `i` along the first axis.
    pub fn sub_array(&self, i: usize) -> NdArray {
        let inner: Vec<usize> = self.shape[1..].to_vec();
        let block: usize = inner.iter().product();
        NdArray::new(
            inner,
            self.data[i * block..(i + 1) * block].to_vec(),
            self.dtype,
        )
    }

    pub fn iter_first_axis(&self) -> PyResult<Vec<Value>> {
        match self.ndim() {
            0 => raise(ExcKind::TypeError, "iteration over a 0-d array"),
            1 => Ok(self.data.iter().map(|x| self.element(*x)).collect()),
            _ => Ok((0..self.shape[0])
                .map(|i| Value::array(self.sub_array(i)))
                .collect()),
        }
    }

    /// Nested Python lists, as `tolist()` returns.
    pub fn to_list(&self) -> Value {
        if self.ndim() == 0 {
            return self.scalar_value();
        }
        self.list_at(0, 0)
    }

    fn list_at(&self, axis: usize, offset: usize) -> Value {
        let strides = self.strides();
        let n = self.shape[axis];
        let items = (0..n)
            .map(|i| {
                let at = offset + i * strides[axis];
                if axis + 1 == self.ndim() {
                    self.element(self.data[at])
                } else {
                    self.list_at(axis + 1, at)
                }
            })
            .collect();
        Value::list(items)
    }

    pub fn astype(&self, dtype: DType) -> NdArray {
        NdArray::new(
            self.shape.clone(),
            self.data.iter().map(|x| dtype.cast(*x)).collect(),
            dtype,
        )
    }

    /// 0-d results become plain scalars.
    pub fn into_value(self) -> Value {
        if self.ndim() == 0 {
            self.scalar_value()
        } else {
            Value::array(self)
        }
    }

    pub fn to_repr(&self) -> String {
        if self.ndim() == 0 {
            let cells = format_cells(self.dtype, &self.data);
            return format!("array({})", cells[0].trim_start());
        }
        if self.size() == 0 {
            return if self.ndim() == 1 {
                format!("array([], dtype={})", self.dtype.name())
            } else {
                format!(
                    "array([], shape={}, dtype={})",
                    shape_repr(&self.shape),
                    self.dtype.name()
                )
            };
        }
        format!("array({})", self.layout(", ", "       ", LINE_WIDTH - 1))
    }

    pub fn to_display(&self) -> String {
        if self.ndim() == 0 {
            return match self.dtype {
                DType::Float => float_repr(self.data[0]),
                _ => self.scalar_value().repr(),
            };
        }
        if self.size() == 0 {
            return "[]".to_string();
        }
        self.layout(" ", " ", LINE_WIDTH)
    }

    fn layout(&self, separator: &str, hanging: &str, width: usize) -> String {
        let summarize = self.size() > SUMMARY_THRESHOLD;
        let strides = self.strides();
        let mut shown = Vec::new();
        collect_shown(&self.shape, &strides, 0, 0, summarize, &mut shown);
        let values: Vec<f64> = shown.iter().map(|&i| self.data[i]).collect();
        let cells = format_cells(self.dtype, &values);
        let layout = Layout {
            shape: &self.shape,
            strides: &strides,
            shown: &shown,
            cells: &cells,
            separator,
            summarize,
        };
        layout.recurse(0, 0, hanging, width)
    }
}

pub fn strides_of(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

pub fn shape_repr(shape: &[usize]) -> String {
    match shape.len() {
        1 => format!("({},)", shape[0]),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn axis_positions(len: usize, summarize: bool) -> Vec<Option<usize>> {
    if summarize && len > 2 * EDGE_ITEMS {
        let mut out: Vec<Option<usize>> = (0..EDGE_ITEMS).map(Some).collect();
        out.push(None);
        out.extend((len - EDGE_ITEMS..len).map(Some));
        out
    } else {
        (0..len).map(Some).collect()
    }
}

fn collect_shown(
    shape: &[usize],
    strides: &[usize],
    axis: usize,
    offset: usize,
    summarize: bool,
    out: &mut Vec<usize>,
) {
    if axis == shape.len() {
        out.push(offset);
        return;
    }
    for i in axis_positions(shape[axis], summarize).into_iter().flatten() {
        collect_shown(shape, strides, axis + 1, offset + i * strides[axis], summarize, out);
    }
}

struct Layout<'a> {
    shape: &'a [usize],
    strides: &'a [usize],
    shown: &'a [usize],
    cells: &'a [String],
    separator: &'a str,
    summarize: bool,
}

impl Layout<'_> {
    fn cell(&self, offset: usize) -> &str {
        match self.shown.binary_search(&offset) {
            Ok(i) => &self.cells[i],
            Err(_) => "?",
        }
    }

    fn recurse(&self, axis: usize, offset: usize, hanging: &str, width: usize) -> String {
        let axes_left = self.shape.len() - axis;
        if axes_left == 0 {
            return self.cell(offset).to_string();
        }
        let next_hanging = format!("{} ", hanging);
        let next_width = width.saturating_sub(1);
        let positions = axis_positions(self.shape[axis], self.summarize);
        let last = positions.len().saturating_sub(1);
        let mut s = String::new();
        if axes_left == 1 {
            let elem_width = width.saturating_sub(1);
            let mut line = hanging.to_string();
            for (k, pos) in positions.iter().enumerate() {
                let word = match pos {
                    Some(i) => self.recurse(
                        axis + 1,
                        offset + i * self.strides[axis],
                        &next_hanging,
                        next_width,
                    ),
                    None => "...".to_string(),
                };
                if line.len() + word.len() > elem_width {
                    s.push_str(line.trim_end());
                    s.push('\n');
                    line = hanging.to_string();
                }
                line.push_str(&word);
                if k < last {
                    line.push_str(self.separator);
                }
            }
            s.push_str(&line);
        } else {
            let line_sep = format!(
                "{}{}",
                self.separator.trim_end(),
                "\n".repeat(axes_left - 1)
            );
            for (k, pos) in positions.iter().enumerate() {
                let nested = match pos {
                    Some(i) => self.recurse(
                        axis + 1,
                        offset + i * self.strides[axis],
                        &next_hanging,
                        next_width,
                    ),
                    None => "...".to_string(),
                };
                s.push_str(hanging);
                s.push_str(&nested);
                if k < last {
                    s.push_str(&line_sep);
                }
            }
        }
        format!("[{}]", &s[hanging.len().min(s.len())..])
    }
}

/// Format elements to a common width the way numpy prints them.
fn format_cells(dtype: DType, values: &[f64]) -> Vec<String> {
    match dtype {
        DType::Bool => values
            .iter()
            .map(|x| if *x != 0.0 { " True" } else { "False" }.to_string())
            .collect(),
        DType::Int => {
            let texts: Vec<String> = values.iter().map(|x| (*x as i64).to_string()).collect();
            let width = texts.iter().map(String::len).max().unwrap_or(0);
            texts
                .into_iter()
                .map(|t| format!("{:>width$}", t, width = width))
                .collect()
        }
        DType::Float => format_floats(values),
    }
}

/// Shortest digits of `|x|` split into integer and fraction parts, with at
/// most eight fraction digits.
fn positional_parts(x: f64) -> (String, String) {
    let text = format!("{}", x.abs());
    let text = match text.find('.') {
        Some(p) if text.len() - p - 1 > 8 => format!("{:.8}", x.abs()),
        _ => text,
    };
    let (int, frac) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), f.trim_end_matches('0').to_string()),
        None => (text, String::new()),
    };
    let sign = if x.is_sign_negative() { "-" } else { "" };
    (format!("{}{}", sign, int), frac)
}

/// Shortest scientific digits of `|x|`: integer digit, fraction, exponent.
fn scientific_parts(x: f64) -> (String, String, i32) {
    let text = format!("{:e}", x.abs());
    let text = match text.split_once('e') {
        Some((m, _)) if m.split_once('.').map_or(0, |(_, f)| f.len()) > 8 => {
            format!("{:.8e}", x.abs())
        }
        _ => text,
    };
    let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (int, frac) = match mantissa.split_once('.') {
        Some((i, f)) => (i.to_string(), f.trim_end_matches('0').to_string()),
        None => (mantissa.to_string(), String::new()),
    };
    let sign = if x.is_sign_negative() { "-" } else { "" };
    (format!("{}{}", sign, int), frac, exp)
}

fn format_floats(values: &[f64]) -> Vec<String> {
    let finite: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    let nonzero: Vec<f64> = finite.iter().map(|x| x.abs()).filter(|x| *x != 0.0).collect();
    let exp_format = if nonzero.is_empty() {
        false
    } else {
        let max = nonzero.iter().cloned().fold(f64::MIN, f64::max);
        let min = nonzero.iter().cloned().fold(f64::MAX, f64::min);
        max >= 1e8 || min < 1e-4 || max / min > 1e3
    };

    let mut pad_left;
    let pad_right;
    let mut cells: Vec<Option<String>> = Vec::with_capacity(values.len());
    if exp_format {
        let parts: Vec<(String, String, i32)> = finite.iter().map(|x| scientific_parts(*x)).collect();
        let precision = parts.iter().map(|p| p.1.len()).max().unwrap_or(0);
        let exp_size = parts
            .iter()
            .map(|p| p.2.unsigned_abs().to_string().len())
            .max()
            .unwrap_or(2)
            .max(2);
        pad_left = parts.iter().map(|p| p.0.len()).max().unwrap_or(0);
        pad_right = exp_size + 2 + precision;
        let mut it = parts.into_iter();
        for x in values {
            if !x.is_finite() {
                cells.push(None);
                continue;
            }
            let (int, frac, exp) = match it.next() {
                Some(p) => p,
                None => break,
            };
            let frac = format!("{:0<width$}", frac, width = precision);
            let sign = if exp < 0 { '-' } else { '+' };
            cells.push(Some(format!(
                "{}.{}e{}{:0>width$}",
                int,
                frac,
                sign,
                exp.unsigned_abs(),
                width = exp_size
            )));
        }
    } else {
        let parts: Vec<(String, String)> = finite.iter().map(|x| positional_parts(*x)).collect();
        pad_left = parts.iter().map(|p| p.0.len()).max().unwrap_or(0);
        pad_right = parts.iter().map(|p| p.1.len()).max().unwrap_or(0);
        let mut it = parts.into_iter();
        for x in values {
            if !x.is_finite() {
                cells.push(None);
                continue;
            }
            let (int, frac) = match it.next() {
                Some(p) => p,
                None => break,
            };
            cells.push(Some(format!("{}.{:<width$}", int, frac, width = pad_right)));
        }
    }
    if finite.len() != values.len() {
        let neg_inf = values.iter().any(|x| x.is_infinite() && *x < 0.0);
        let offset = pad_right + 1;
        pad_left = pad_left
            .max(3usize.saturating_sub(offset))
            .max((3 + neg_inf as usize).saturating_sub(offset));
    }
    let width = pad_left + pad_right + 1;
    values
        .iter()
        .zip(cells)
        .map(|(x, cell)| {
            let text = match cell {
                Some(t) => t,
                None if x.is_nan() => "nan".to_string(),
                None if *x > 0.0 => "inf".to_string(),
                None => "-inf".to_string(),
            };
            let int_len = text.find('.').unwrap_or(text.len());
            if x.is_finite() {
                format!("{}{}", " ".repeat(pad_left.saturating_sub(int_len)), text)
            } else {
                format!("{:>width$}", text, width = width)
            }
        })
        .collect()
}

// ----- construction -------------------------------------------------------

/// Build an array from a scalar, a nested list/tuple, a range or an array.
pub fn from_value(interp: &mut Interpreter, value: &Value) -> PyResult<NdArray> {
    if let Value::Array(a) = value {
        return Ok(a.borrow().clone());
    }
    let mut shape = Vec::new();
    detect_shape(value, &mut shape)?;
    let total = shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
    interp.check_len(total.unwrap_or(usize::MAX))?;
    let mut data = Vec::new();
    let mut dtype = None;
    fill(interp, value, &shape, 0, &mut data, &mut dtype)?;
    Ok(NdArray::new(shape, data, dtype.unwrap_or(DType::Float)))
}

fn detect_shape(value: &Value, shape: &mut Vec<usize>) -> PyResult<()> {
    let mut current = value.clone();
    loop {
        if shape.len() > MAX_NDIM {
            return raise(
                ExcKind::ValueError,
                format!("maximum supported dimension for an ndarray is {}", MAX_NDIM),
            );
        }
        let next = match &current {
            Value::List(items) => {
                let items = items.borrow();
                shape.push(items.len());
                items.first().cloned()
            }
            Value::Tuple(items) => {
                shape.push(items.len());
                items.first().cloned()
            }
            Value::Range(r) => {
                shape.push(r.len());
                None
            }
            Value::Array(a) => {
                shape.extend(a.borrow().shape.iter().copied());
                None
            }
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Ok(()),
        }
    }
}

fn inhomogeneous<T>(shape: &[usize], depth: usize) -> PyResult<T> {
    let detected: Vec<String> = shape[..depth].iter().map(|d| d.to_string()).collect();
    let detected = if depth == 1 {
        format!("({},)", detected[0])
    } else {
        format!("({})", detected.join(", "))
    };
    raise(
        ExcKind::ValueError,
        format!(
            "setting an array element with a sequence. The requested array has an \
             inhomogeneous shape after {} dimensions. The detected shape was {} + \
             inhomogeneous part.",
            depth, detected
        ),
    )
}

fn fill(
    interp: &mut Interpreter,
    value: &Value,
    shape: &[usize],
    depth: usize,
    data: &mut Vec<f64>,
    dtype: &mut Option<DType>,
) -> PyResult<()> {
    interp.tick()?;
    if depth == shape.len() {
        let (x, kind) = scalar_element(value)?;
        *dtype = Some(dtype.map_or(kind, |d| d.max(kind)));
        data.push(x);
        return Ok(());
    }
    if let Value::Array(a) = value {
        let a = a.borrow();
        if a.shape[..] != shape[depth..] {
            return inhomogeneous(shape, depth);
        }
        *dtype = Some(dtype.map_or(a.dtype, |d| d.max(a.dtype)));
        data.extend_from_slice(&a.data);
        return Ok(());
    }
    let items = match value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Range(r) => (0..r.len()).map(|i| Value::int(r.get(i))).collect(),
        _ => return inhomogeneous(shape, depth),
    };
    if items.len() != shape[depth] {
        return inhomogeneous(shape, depth);
    }
    for item in &items {
        fill(interp, item, shape, depth + 1, data, dtype)?;
    }
    if items.is_empty() && dtype.is_none() {
        *dtype = Some(DType::Float);
    }
    Ok(())
}

/// A Python scalar as an element and its natural dtype.
pub fn scalar_element(value: &Value) -> PyResult<(f64, DType)> {
    match value {
        Value::Bool(b) => Ok((*b as u8 as f64, DType::Bool)),
        Value::Int(i) => match num_traits::ToPrimitive::to_i64(i) {
            Some(n) => Ok((n as f64, DType::Int)),
            None => raise(
                ExcKind::OverflowError,
                "Python int too large to convert to C long",
            ),
        },
        Value::Float(f) => Ok((*f, DType::Float)),
        Value::Fraction(r) => Ok((ratio_to_f64(r), DType::Float)),
        Value::Array(a) if a.borrow().ndim() == 0 => {
            let a = a.borrow();
            Ok((a.data[0], a.dtype))
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

/// Any operand of an array operation, as an array.
fn operand(interp: &mut Interpreter, value: &Value) -> PyResult<NdArray> {
    match value {
        Value::Array(a) => Ok(a.borrow().clone()),
        Value::List(_) | Value::Tuple(_) | Value::Range(_) => from_value(interp, value),
        other => {
            let (x, dtype) = scalar_element(other)?;
            Ok(NdArray::scalar_of(x, dtype))
        }
    }
}

// ----- broadcasting -------------------------------------------------------

pub fn broadcast_shape(a: &[usize], b: &[usize]) -> PyResult<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut out = vec![0; n];
    for i in 0..n {
        let da = if i + a.len() >= n { a[i + a.len() - n] } else { 1 };
        let db = if i + b.len() >= n { b[i + b.len() - n] } else { 1 };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return raise(
                    ExcKind::ValueError,
                    format!(
                        "operands could not be broadcast together with shapes {} {} ",
                        shape_repr(a),
                        shape_repr(b)
                    ),
                )
            }
        };
    }
    Ok(out)
}

/// The elements of `a` repeated out to `shape`.
pub fn broadcast_to(a: &NdArray, shape: &[usize]) -> PyResult<Vec<f64>> {
    if a.shape == shape {
        return Ok(a.data.clone());
    }
    let target = broadcast_shape(&a.shape, shape)?;
    if target != shape {
        return raise(
            ExcKind::ValueError,
            format!(
                "could not broadcast input array from shape {} into shape {}",
                shape_repr(&a.shape),
                shape_repr(shape)
            ),
        );
    }
    let n = shape.len();
    let pad = n - a.ndim();
    let src_strides = a.strides();
    let strides: Vec<usize> = (0..n)
        .map(|d| {
            if d < pad || a.shape[d - pad] == 1 {
                0
            } else {
                src_strides[d - pad]
            }
        })
        .collect();
    let total: usize = shape.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut counter = vec![0usize; n];
    let mut offset = 0usize;
    for _ in 0..total {
        out.push(a.data[offset]);
        for d in (0..n).rev() {
            counter[d] += 1;
            offset += strides[d];
            if counter[d] < shape[d] {
                break;
            }
            offset -= strides[d] * counter[d];
            counter[d] = 0;
        }
    }
    Ok(out)
}

// ----- arithmetic ---------------------------------------------------------

#[derive(Default)]
struct FpFlags {
    divide: bool,
    invalid: bool,
}

pub(crate) fn binary(interp: &mut Interpreter, op: BinOp, l: &Value, r: &Value) -> PyResult<Value> {
    let a = match operand(interp, l) {
        Ok(a) => a,
        Err(_) => return unsupported(op, l, r),
    };
    let b = match operand(interp, r) {
        Ok(b) => b,
        Err(_) => return unsupported(op, l, r),
    };
    if op == BinOp::MatMul {
        return matmul(interp, &a, &b);
    }
    Ok(elementwise(interp, op, &a, &b)?.into_value())
}

fn unsupported<T>(op: BinOp, l: &Value, r: &Value) -> PyResult<T> {
    raise(
        ExcKind::TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ),
    )
}

fn ufunc_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "subtract",
        BinOp::Mul => "multiply",
        BinOp::Div => "divide",
        BinOp::FloorDiv => "floor_divide",
        BinOp::Mod => "remainder",
        BinOp::Pow => "power",
        BinOp::MatMul => "matmul",
        BinOp::LShift => "left_shift",
        BinOp::RShift => "right_shift",
        BinOp::BitAnd => "bitwise_and",
        BinOp::BitOr => "bitwise_or",
        BinOp::BitXor => "bitwise_xor",
    }
}

pub(crate) fn elementwise(interp: &mut Interpreter, op: BinOp, a: &NdArray, b: &NdArray) -> PyResult<NdArray> {
    let shape = broadcast_shape(&a.shape, &b.shape)?;
    let total = shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
    interp.check_len(total.unwrap_or(usize::MAX))?;
    let xs = broadcast_to(a, &shape)?;
    let ys = broadcast_to(b, &shape)?;
    let joined = a.dtype.max(b.dtype);
    let dtype = match op {
        BinOp::Div => DType::Float,
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => joined,
        _ => joined.max(DType::Int),
    };
    let integral = dtype != DType::Float;
    match op {
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift
            if dtype == DType::Float =>
        {
            return raise(
                ExcKind::TypeError,
                format!(
                    "ufunc '{}' not supported for the input types, and the inputs could not be \
                     safely coerced to any supported types according to the casting rule ''safe''",
                    ufunc_name(op)
                ),
            );
        }
        BinOp::Pow if integral && ys.iter().any(|y| *y < 0.0) => {
            return raise(
                ExcKind::ValueError,
                "Integers to negative integer powers are not allowed.",
            );
        }
        _ => {}
    }
    let mut flags = FpFlags::default();
    let mut out = Vec::with_capacity(xs.len());
    for (x, y) in xs.into_iter().zip(ys) {
        interp.tick()?;
        out.push(apply(op, x, y, integral, &mut flags));
    }
    let name = ufunc_name(op);
    if flags.divide {
        interp.warn(
            "RuntimeWarning",
            &format!("divide by zero encountered in {}", name),
        )?;
    }
    if flags.invalid {
        interp.warn(
            "RuntimeWarning",
            &format!("invalid value encountered in {}", name),
        )?;
    }
    Ok(NdArray::new(shape, out, dtype))
}

fn apply(op: BinOp, x: f64, y: f64, integral: bool, flags: &mut FpFlags) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                if x == 0.0 || x.is_nan() {
                    flags.invalid = true;
                } else {
                    flags.divide = true;
                }
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                flags.divide = true;
                if integral {
                    return 0.0;
                }
                return x / y;
            }
            if integral {
                Integer::div_floor(&(x as i64), &(y as i64)) as f64
            } else {
                ops::float_divmod(x, y).0
            }
        }
        BinOp::Mod => {
            if y == 0.0 {
                if integral {
                    flags.divide = true;
                    return 0.0;
                }
                flags.invalid = true;
                return f64::NAN;
            }
            if integral {
                (x as i64).mod_floor(&(y as i64)) as f64
            } else {
                ops::float_divmod(x, y).1
            }
        }
        BinOp::Pow => {
            if integral {
                match (x as i64).checked_pow(y as u32) {
                    Some(v) => v as f64,
                    None => x.powf(y),
                }
            } else {
                x.powf(y)
            }
        }
        BinOp::LShift => ((x as i64).wrapping_shl(y as u32)) as f64,
        BinOp::RShift => ((x as i64).wrapping_shr(y as u32)) as f64,
        BinOp::BitAnd => ((x as i64) & (y as i64)) as f64,
        BinOp::BitOr => ((x as i64) | (y as i64)) as f64,
        BinOp::BitXor => ((x as i64) ^ (y as i64)) as f64,
        BinOp::MatMul => f64::NAN,
    }
}

pub(crate) fn matmul(interp: &mut Interpreter, a: &NdArray, b: &NdArray) -> PyResult<Value> {
    if a.ndim() == 0 || b.ndim() == 0 {
        let which = if a.ndim() == 0 { 0 } else { 1 };
        return raise(
            ExcKind::ValueError,
            format!(
                "matmul: Input operand {} does not have enough dimensions (has 0, gufunc core \
                 with signature (n?,k),(k,m?)->(n?,m?) requires 1)",
                which
            ),
        );
    }
    if a.ndim() > 2 || b.ndim() > 2 {
        return raise(
            ExcKind::NotImplementedError,
            "matmul is only supported for 1-d and 2-d arrays",
        );
    }
    let (n, k) = if a.ndim() == 1 { (1, a.shape[0]) } else { (a.shape[0], a.shape[1]) };
    let (k2, m) = if b.ndim() == 1 { (b.shape[0], 1) } else { (b.shape[0], b.shape[1]) };
    if k != k2 {
        return raise(
            ExcKind::ValueError,
            format!(
                "matmul: Input operand 1 has a mismatch in its core dimension 0, with gufunc \
                 signature (n?,k),(k,m?)->(n?,m?) (size {} is different from {})",
                k2, k
            ),
        );
    }
    interp.check_len(n.saturating_mul(m))?;
    let mut out = vec![0.0; n * m];
    for i in 0..n {
        for j in 0..m {
            let mut acc = 0.0;
            for t in 0..k {
                interp.tick()?;
                acc += a.data[i * k + t] * b.data[t * m + j];
            }
            out[i * m + j] = acc;
        }
    }
    let dtype = a.dtype.max(b.dtype).max(DType::Int);
    let shape = match (a.ndim(), b.ndim()) {
        (1, 1) => vec![],
        (1, _) => vec![m],
        (_, 1) => vec![n],
        _ => vec![n, m],
    };
    Ok(NdArray::new(shape, out, dtype).into_value())
}

pub(crate) fn unary(interp: &mut Interpreter, op: UnaryOp, a: &NdArray) -> PyResult<Value> {
    interp.check_deadline()?;
    let out = match (op, a.dtype) {
        (UnaryOp::Neg, DType::Bool) => {
            return raise(
                ExcKind::TypeError,
                "The numpy boolean negative, the `-` operator, is not supported, use the `~` \
                 operator or the logical_not function instead.",
            )
        }
        (UnaryOp::Neg, _) => a.data.iter().map(|x| -x).collect(),
        (UnaryOp::Pos, _) => a.data.clone(),
        (UnaryOp::Invert, DType::Bool) => a.data.iter().map(|x| (*x == 0.0) as u8 as f64).collect(),
        (UnaryOp::Invert, DType::Int) => a.data.iter().map(|x| -x - 1.0).collect(),
        (UnaryOp::Invert, DType::Float) => {
            return raise(
                ExcKind::TypeError,
                "ufunc 'invert' not supported for the input types, and the inputs could not be \
                 safely coerced to any supported types according to the casting rule ''safe''",
            )
        }
        (UnaryOp::Not, _) => return Ok(Value::Bool(!a.truthy()?)),
    };
    Ok(NdArray::new(a.shape.clone(), out, a.dtype).into_value())
}

/// Element-wise comparison yielding a boolean array (or scalar).
pub(crate) fn compare(op: CmpOp, l: &Value, r: &Value) -> PyResult<Value> {
    let convert = |v: &Value| -> Option<NdArray> {
        match v {
            Value::Array(a) => Some(a.borrow().clone()),
            Value::List(_) | Value::Tuple(_) => None,
            other => scalar_element(other)
                .ok()
                .map(|(x, d)| NdArray::scalar_of(x, d)),
        }
    };
    let (a, b) = match (convert(l), convert(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => match (l, r) {
            (Value::List(_) | Value::Tuple(_), _) | (_, Value::List(_) | Value::Tuple(_)) => {
                let as_array = |v: &Value| -> PyResult<NdArray> {
                    match v {
                        Value::Array(a) => Ok(a.borrow().clone()),
                        other => nested_without_interp(other),
                    }
                };
                (as_array(l)?, as_array(r)?)
            }
            _ => {
                return match op {
                    CmpOp::Eq => Ok(Value::Bool(false)),
                    CmpOp::NotEq => Ok(Value::Bool(true)),
                    _ => raise(
                        ExcKind::TypeError,
                        format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            op.symbol(),
                            l.type_name(),
                            r.type_name()
                        ),
                    ),
                }
            }
        },
    };
    let shape = broadcast_shape(&a.shape, &b.shape)?;
    let xs = broadcast_to(&a, &shape)?;
    let ys = broadcast_to(&b, &shape)?;
    let out = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| {
            let hit = match op {
                CmpOp::Eq => x == y,
                CmpOp::NotEq => x != y,
                CmpOp::Lt => x < y,
                CmpOp::LtE => x <= y,
                CmpOp::Gt => x > y,
                _ => x >= y,
            };
            hit as u8 as f64
        })
        .collect();
    Ok(NdArray::new(shape, out, DType::Bool).into_value())
}

/// Nested list conversion for contexts without an interpreter at hand.
fn nested_without_interp(value: &Value) -> PyResult<NdArray> {
    let mut shape = Vec::new();
    detect_shape(value, &mut shape)?;
    let mut data = Vec::new();
    let mut dtype = None;
    fill_plain(value, &shape, 0, &mut data, &mut dtype)?;
    Ok(NdArray::new(shape, data, dtype.unwrap_or(DType::Float)))
}

fn fill_plain(
    value: &Value,
    shape: &[usize],
    depth: usize,
    data: &mut Vec<f64>,
    dtype: &mut Option<DType>,
) -> PyResult<()> {
    if depth == shape.len() {
        let (x, kind) = scalar_element(value)?;
        *dtype = Some(dtype.map_or(kind, |d| d.max(kind)));
        data.push(x);
        return Ok(());
    }
    let items = match value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        _ => return inhomogeneous(shape, depth),
    };
    if items.len() != shape[depth] {
        return inhomogeneous(shape, depth);
    }
    for item in &items {
        fill_plain(item, shape, depth + 1, data, dtype)?;
    }
    Ok(())
}

pub(crate) fn contains(a: &NdArray, item: &Value) -> PyResult<bool> {
    match scalar_element(item) {
        Ok((x, _)) => Ok(a.data.iter().any(|v| *v == x)),
        Err(_) => Ok(false),
    }
}

// ----- indexing -----------------------------------------------------------

enum AxisSel {
    At(i64),
    Range(SliceSpec),
}

enum Plan {
    Basic(Vec<AxisSel>),
    Mask(NdArray),
    Fancy(Vec<i64>),
}

fn invalid_index<T>() -> PyResult<T> {
    raise(
        ExcKind::IndexError,
        "only integers, slices (`:`), ellipsis (`...`), numpy.newaxis (`None`) and integer or \
         boolean arrays are valid indices",
    )
}

fn int_index(v: &Value) -> PyResult<i64> {
    match v {
        Value::Int(_) | Value::Bool(_) => v.as_index(),
        Value::Array(a) => match a.borrow().scalar_int() {
            Some(n) => Ok(n),
            None => invalid_index(),
        },
        _ => invalid_index(),
    }
}

fn plan(index: Index) -> PyResult<Plan> {
    Ok(match index {
        Index::Slice(s) => Plan::Basic(vec![AxisSel::Range(s)]),
        Index::Multi(parts) => {
            let mut sels = Vec::with_capacity(parts.len());
            for part in parts {
                sels.push(match part {
                    Index::Value(v) => AxisSel::At(int_index(&v)?),
                    Index::Slice(s) => AxisSel::Range(s),
                    Index::Multi(_) => return invalid_index(),
                });
            }
            Plan::Basic(sels)
        }
        Index::Value(v) => match &v {
            Value::Tuple(items) => {
                let mut sels = Vec::with_capacity(items.len());
                for item in items.iter() {
                    sels.push(AxisSel::At(int_index(item)?));
                }
                Plan::Basic(sels)
            }
            Value::Array(a) if a.borrow().ndim() > 0 => {
                let a = a.borrow();
                match a.dtype {
                    DType::Bool => Plan::Mask(a.clone()),
                    DType::Int => Plan::Fancy(a.data.iter().map(|x| *x as i64).collect()),
                    DType::Float => return invalid_index(),
                }
            }
            Value::List(_) => {
                let a = nested_without_interp(&v)?;
                match a.dtype {
                    DType::Bool => Plan::Mask(a),
                    DType::Int => Plan::Fancy(a.data.iter().map(|x| *x as i64).collect()),
                    DType::Float if a.size() == 0 => Plan::Fancy(Vec::new()),
                    DType::Float => return invalid_index(),
                }
            }
            other => Plan::Basic(vec![AxisSel::At(int_index(other)?)]),
        },
    })
}

fn bounded(i: i64, axis: usize, size: usize) -> PyResult<usize> {
    let n = size as i64;
    let j = if i < 0 { i + n } else { i };
    if (0..n).contains(&j) {
        Ok(j as usize)
    } else {
        raise(
            ExcKind::IndexError,
            format!(
                "index {} is out of bounds for axis {} with size {}",
                i, axis, size
            ),
        )
    }
}

/// Resolve an index into the selected flat offsets and the result shape.
fn select(a: &NdArray, index: Index) -> PyResult<(Vec<usize>, Vec<usize>)> {
    let strides = a.strides();
    match plan(index)? {
        Plan::Basic(sels) => {
            if sels.len() > a.ndim() {
                return raise(
                    ExcKind::IndexError,
                    format!(
                        "too many indices for array: array is {}-dimensional, but {} were indexed",
                        a.ndim(),
                        sels.len()
                    ),
                );
            }
            let mut shape = Vec::new();
            let mut offsets = vec![0usize];
            for axis in 0..a.ndim() {
                let positions: Vec<usize> = match sels.get(axis) {
                    Some(AxisSel::At(i)) => vec![bounded(*i, axis, a.shape[axis])?],
                    Some(AxisSel::Range(s)) => {
                        let p = s.positions(a.shape[axis])?;
                        shape.push(p.len());
                        p
                    }
                    None => {
                        shape.push(a.shape[axis]);
                        (0..a.shape[axis]).collect()
                    }
                };
                let mut next = Vec::with_capacity(offsets.len() * positions.len());
                for base in &offsets {
                    for p in &positions {
                        next.push(base + p * strides[axis]);
                    }
                }
                offsets = next;
            }
            Ok((offsets, shape))
        }
        Plan::Mask(mask) => {
            let m = mask.ndim();
            if m > a.ndim() || mask.shape[..] != a.shape[..m] {
                let axis = mask
                    .shape
                    .iter()
                    .zip(&a.shape)
                    .position(|(x, y)| x != y)
                    .unwrap_or(0);
                return raise(
                    ExcKind::IndexError,
                    format!(
                        "boolean index did not match indexed array along axis {}; size of axis \
                         is {} but size of corresponding boolean axis is {}",
                        axis,
                        a.shape.get(axis).copied().unwrap_or(0),
                        mask.shape.get(axis).copied().unwrap_or(0)
                    ),
                );
            }
            let block: usize = a.shape[m..].iter().product();
            let mut offsets = Vec::new();
            let mut count = 0;
            for (i, flag) in mask.data.iter().enumerate() {
                if *flag != 0.0 {
                    count += 1;
                    offsets.extend(i * block..(i + 1) * block);
                }
            }
            let mut shape = vec![count];
            shape.extend_from_slice(&a.shape[m..]);
            Ok((offsets, shape))
        }
        Plan::Fancy(indices) => {
            if a.ndim() == 0 {
                return invalid_index();
            }
            let block: usize = a.shape[1..].iter().product();
            let mut offsets = Vec::with_capacity(indices.len() * block);
            for i in &indices {
                let row = bounded(*i, 0, a.shape[0])?;
                offsets.extend(row * block..(row + 1) * block);
            }
            let mut shape = vec![indices.len()];
            shape.extend_from_slice(&a.shape[1..]);
            Ok((offsets, shape))
        }
    }
}

pub(crate) fn get_item(interp: &mut Interpreter, arr: &Rc<RefCell<NdArray>>, index: Index) -> PyResult<Value> {
    let a = arr.borrow();
    let (offsets, shape) = select(&a, index)?;
    interp.check_len(offsets.len())?;
    let data = offsets.iter().map(|o| a.data[*o]).collect();
    Ok(NdArray::new(shape, data, a.dtype).into_value())
}

pub(crate) fn set_item(
    interp: &mut Interpreter,
    arr: &Rc<RefCell<NdArray>>,
    index: Index,
    value: Value,
) -> PyResult<()> {
    let source = operand(interp, &value)?;
    let (offsets, shape) = select(&arr.borrow(), index)?;
    let values = broadcast_to(&source, &shape)?;
    let mut a = arr.borrow_mut();
    let dtype = a.dtype;
    for (o, v) in offsets.into_iter().zip(values) {
        a.data[o] = dtype.cast(v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(data: &[f64]) -> NdArray {
        NdArray::vector(data.to_vec(), DType::Float)
    }

    #[test]
    fn test_float_repr_aligns_decimal_points() {
        assert_eq!(floats(&[1.0, 2.5]).to_repr(), "array([1. , 2.5])");
        assert_eq!(floats(&[1.0, 2.0, 3.0]).to_repr(), "array([1., 2., 3.])");
        assert_eq!(floats(&[0.1, -0.25]).to_repr(), "array([ 0.1 , -0.25])");
    }

    #[test]
    fn test_float_repr_switches_to_scientific() {
        assert_eq!(floats(&[1e10, 1.0]).to_repr(), "array([1.e+10, 1.e+00])");
        assert_eq!(floats(&[1.5e-5]).to_repr(), "array([1.5e-05])");
    }

    #[test]
    fn test_non_finite_cells() {
        assert_eq!(floats(&[f64::NAN, 1.0]).to_repr(), "array([nan,  1.])");
        assert_eq!(floats(&[f64::INFINITY]).to_display(), "[inf]");
    }

    #[test]
    fn test_int_and_bool_display() {
        let ints = NdArray::vector(vec![1.0, -20.0, 3.0], DType::Int);
        assert_eq!(ints.to_repr(), "array([  1, -20,   3])");
        assert_eq!(ints.to_display(), "[  1 -20   3]");
        let bools = NdArray::vector(vec![1.0, 0.0], DType::Bool);
        assert_eq!(bools.to_repr(), "array([ True, False])");
    }

    #[test]
    fn test_two_dimensional_layout() {
        let m = NdArray::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0], DType::Int);
        assert_eq!(m.to_repr(), "array([[1, 2],\n       [3, 4]])");
        assert_eq!(m.to_display(), "[[1 2]\n [3 4]]");
    }

    #[test]
    fn test_empty_and_zero_d() {
        assert_eq!(floats(&[]).to_repr(), "array([], dtype=float64)");
        assert_eq!(NdArray::scalar_of(1.5, DType::Float).to_repr(), "array(1.5)");
        assert_eq!(NdArray::scalar_of(2.0, DType::Int).to_display(), "2");
    }

    #[test]
    fn test_long_vectors_wrap_and_summarize() {
        let long = NdArray::vector((0..30).map(|i| i as f64).collect(), DType::Int);
        assert!(long.to_repr().contains('\n'));
        let huge = NdArray::vector((0..2000).map(|i| i as f64).collect(), DType::Int);
        let text = huge.to_display();
        assert!(text.contains("..."));
        assert!(text.starts_with("[   0    1    2 ..."));
    }

    #[test]
    fn test_broadcasting() {
        let a = NdArray::new(vec![2, 1], vec![1.0, 2.0], DType::Int);
        assert_eq!(broadcast_shape(&a.shape, &[3]).unwrap(), vec![2, 3]);
        assert_eq!(
            broadcast_to(&a, &[2, 3]).unwrap(),
            vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]
        );
        assert!(broadcast_shape(&[2], &[3]).is_err());
    }

    #[test]
    fn test_integer_floor_division_rounds_down() {
        let mut flags = FpFlags::default();
        assert_eq!(apply(BinOp::FloorDiv, -7.0, 2.0, true, &mut flags), -4.0);
        assert_eq!(apply(BinOp::FloorDiv, 7.0, -2.0, true, &mut flags), -4.0);
        assert_eq!(apply(BinOp::FloorDiv, 7.0, 2.0, true, &mut flags), 3.0);
        assert!(!flags.divide);
        assert_eq!(apply(BinOp::FloorDiv, 7.0, 0.0, true, &mut flags), 0.0);
        assert!(flags.divide);
    }

    #[test]
    fn test_select_basic_and_mask() {
        let m = NdArray::new(vec![2, 3], (0..6).map(|i| i as f64).collect(), DType::Int);
        let (offsets, shape) = select(
            &m,
            Index::Multi(vec![
                Index::Slice(SliceSpec::default()),
                Index::Value(Value::int(1)),
            ]),
        )
        .unwrap();
        assert_eq!(offsets, vec![1, 4]);
        assert_eq!(shape, vec![2]);

        let mask = NdArray::new(vec![2, 3], vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0], DType::Bool);
        let (offsets, shape) = select(&m, Index::Value(Value::array(mask))).unwrap();
        assert_eq!(offsets, vec![0, 2, 5]);
        assert_eq!(shape, vec![3]);
    }

    #[test]
    fn test_out_of_bounds_index() {
        let v = floats(&[1.0, 2.0]);
        assert!(select(&v, Index::Value(Value::int(2))).is_err());
        assert!(select(&v, Index::Value(Value::int(-2))).is_ok());
    }
}
