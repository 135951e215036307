//! `numpy` (also bound as `np`): array construction, reductions, element-wise
//! functions and a small `linalg`.

use std::cell::RefCell;
use std::f64::consts;
use std::rc::Rc;

use crate::interp::ast::BinOp;
use crate::interp::builtins;
use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::ndarray::{self, DType, NdArray, MAX_NDIM};
use crate::interp::value::{CallArgs, Module, TypeKind, Value};
use crate::interp::Interpreter;

pub(super) fn module() -> Value {
    Module::new("numpy")
        .function("array", array)
        .function("asarray", array)
        .function("arange", arange)
        .function("linspace", linspace)
        .function("zeros", zeros)
        .function("ones", ones)
        .function("full", full)
        .function("eye", eye)
        .function("identity", identity)
        .function("sum", np_sum)
        .function("prod", np_prod)
        .function("mean", np_mean)
        .function("std", np_std)
        .function("var", np_var)
        .function("min", np_min)
        .function("max", np_max)
        .function("argmin", np_argmin)
        .function("argmax", np_argmax)
        .function("median", np_median)
        .function("any", np_any)
        .function("all", np_all)
        .function("cumsum", np_cumsum)
        .function("abs", np_abs)
        .function("absolute", np_abs)
        .function("sqrt", np_sqrt)
        .function("exp", np_exp)
        .function("log", np_log)
        .function("log2", np_log2)
        .function("log10", np_log10)
        .function("sin", np_sin)
        .function("cos", np_cos)
        .function("tan", np_tan)
        .function("floor", np_floor)
        .function("ceil", np_ceil)
        .function("round", np_round)
        .function("around", np_round)
        .function("dot", dot)
        .function("matmul", matmul)
        .function("transpose", transpose)
        .function("reshape", reshape)
        .function("concatenate", concatenate)
        .function("sort", sort)
        .function("unique", unique)
        .function("where", np_where)
        .function("isclose", isclose)
        .function("allclose", allclose)
        .function("float64", float64)
        .function("int64", int64)
        .function("bool_", bool_)
        .constant("pi", Value::Float(consts::PI))
        .constant("e", Value::Float(consts::E))
        .constant("inf", Value::Float(f64::INFINITY))
        .constant("nan", Value::Float(f64::NAN))
        .constant("linalg", linalg_module())
        .into_value()
}

fn linalg_module() -> Value {
    Module::new("numpy.linalg")
        .function("det", det)
        .function("inv", inv)
        .function("solve", solve)
        .function("norm", norm)
        .into_value()
}

// ----- argument helpers ---------------------------------------------------

/// Take an optional slot, treating an explicit `None` as absent.
fn slot(slots: &mut [Option<Value>], i: usize) -> Option<Value> {
    slots.get_mut(i)?.take().filter(|v| !v.is_none())
}

fn to_array(interp: &mut Interpreter, v: &Value) -> PyResult<NdArray> {
    ndarray::from_value(interp, v)
}

fn first_array(interp: &mut Interpreter, slots: &mut [Option<Value>]) -> PyResult<NdArray> {
    let v = slots[0].take().unwrap_or(Value::None);
    to_array(interp, &v)
}

fn dtype_arg(v: Option<Value>) -> PyResult<Option<DType>> {
    match v {
        None => Ok(None),
        Some(Value::Str(s)) => DType::parse(&s).map(Some),
        Some(Value::Type(TypeKind::Float)) => Ok(Some(DType::Float)),
        Some(Value::Type(TypeKind::Int)) => Ok(Some(DType::Int)),
        Some(Value::Type(TypeKind::Bool)) => Ok(Some(DType::Bool)),
        Some(Value::Builtin(b)) => DType::parse(b.name).map(Some),
        Some(other) => raise(
            ExcKind::TypeError,
            format!("Cannot interpret '{}' as a data type", other.repr()),
        ),
    }
}

fn normalize_axis(axis: i64, ndim: usize) -> PyResult<usize> {
    let n = ndim as i64;
    if axis < -n || axis >= n {
        return raise(
            ExcKind::ValueError,
            format!(
                "axis {} is out of bounds for array of dimension {}",
                axis, ndim
            ),
        );
    }
    Ok(if axis < 0 { (axis + n) as usize } else { axis as usize })
}

fn axis_arg(v: Option<Value>, ndim: usize) -> PyResult<Option<usize>> {
    match v {
        None => Ok(None),
        Some(v) => normalize_axis(v.as_index()?, ndim).map(Some),
    }
}

fn shape_arg(interp: &Interpreter, v: &Value) -> PyResult<Vec<usize>> {
    let dims: Vec<i64> = match v {
        Value::Tuple(items) => items.iter().map(Value::as_index).collect::<PyResult<_>>()?,
        Value::List(items) => items
            .borrow()
            .iter()
            .map(Value::as_index)
            .collect::<PyResult<_>>()?,
        other => vec![other.as_index()?],
    };
    if dims.len() > MAX_NDIM {
        return raise(
            ExcKind::ValueError,
            format!("maximum supported dimension for an ndarray is {}", MAX_NDIM),
        );
    }
    if dims.iter().any(|d| *d < 0) {
        return raise(ExcKind::ValueError, "negative dimensions are not allowed");
    }
    let shape: Vec<usize> = dims.into_iter().map(|d| d as usize).collect();
    let total = shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
    interp.check_len(total.unwrap_or(usize::MAX))?;
    Ok(shape)
}

/// Integers from either `f(2, 3)` or `f((2, 3))`.
fn dims_from_args(values: Vec<Value>) -> PyResult<Vec<i64>> {
    if let [single] = values.as_slice() {
        match single {
            Value::Tuple(items) => return items.iter().map(Value::as_index).collect(),
            Value::List(items) => return items.borrow().iter().map(Value::as_index).collect(),
            _ => {}
        }
    }
    values.iter().map(Value::as_index).collect()
}

// ----- constructors -------------------------------------------------------

fn array(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("array", &["object", "dtype"], 1)?;
    let a = first_array(interp, &mut slots)?;
    Ok(Value::array(match dtype_arg(slot(&mut slots, 1))? {
        Some(dtype) => a.astype(dtype),
        None => a,
    }))
}

fn arange(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("arange", &["start", "stop", "step", "dtype"], 1)?;
    let first = slots[0].take().unwrap_or(Value::None);
    let (start, stop) = match slot(&mut slots, 1) {
        Some(stop) => (first, stop),
        None => (Value::int(0), first),
    };
    let step = slot(&mut slots, 2).unwrap_or_else(|| Value::int(1));
    let (x0, d0) = ndarray::scalar_element(&start)?;
    let (x1, d1) = ndarray::scalar_element(&stop)?;
    let (dx, d2) = ndarray::scalar_element(&step)?;
    if dx == 0.0 {
        return raise(ExcKind::ZeroDivisionError, "division by zero");
    }
    let span = ((x1 - x0) / dx).ceil();
    if span.is_nan() {
        return raise(ExcKind::ValueError, "arange: cannot compute length");
    }
    let len = if span > 0.0 { span as usize } else { 0 };
    let mut data = interp.alloc_vec(len)?;
    let natural = d0.max(d1).max(d2).max(DType::Int);
    data.extend((0..len).map(|i| x0 + i as f64 * dx));
    let a = NdArray::vector(data, natural);
    Ok(Value::array(match dtype_arg(slot(&mut slots, 3))? {
        Some(dtype) => a.astype(dtype),
        None => a,
    }))
}

fn linspace(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind(
        "linspace",
        &["start", "stop", "num", "endpoint", "dtype"],
        2,
    )?;
    let start = slots[0].take().unwrap_or(Value::None).as_f64()?;
    let stop = slots[1].take().unwrap_or(Value::None).as_f64()?;
    let num = match slot(&mut slots, 2) {
        Some(v) => v.as_index()?,
        None => 50,
    };
    if num < 0 {
        return raise(
            ExcKind::ValueError,
            format!("Number of samples, {}, must be non-negative.", num),
        );
    }
    let num = num as usize;
    let mut data: Vec<f64> = interp.alloc_vec(num)?;
    let endpoint = match slot(&mut slots, 3) {
        Some(v) => v.truthy()?,
        None => true,
    };
    let div = if endpoint { num.saturating_sub(1) } else { num };
    let delta = stop - start;
    if div > 0 {
        let step = delta / div as f64;
        data.extend((0..num).map(|i| i as f64 * step + start));
    } else {
        data.extend((0..num).map(|i| i as f64 * delta + start));
    }
    if endpoint && num > 1 {
        if let Some(last) = data.last_mut() {
            *last = stop;
        }
    }
    let a = NdArray::vector(data, DType::Float);
    Ok(Value::array(match dtype_arg(slot(&mut slots, 4))? {
        Some(dtype) => a.astype(dtype),
        None => a,
    }))
}

fn filled(interp: &mut Interpreter, args: CallArgs, name: &str, value: f64) -> PyResult<Value> {
    let mut slots = args.bind(name, &["shape", "dtype"], 1)?;
    let shape = shape_arg(interp, &slots[0].take().unwrap_or(Value::None))?;
    let dtype = dtype_arg(slot(&mut slots, 1))?.unwrap_or(DType::Float);
    let total = shape.iter().product();
    let mut data = interp.alloc_vec(total)?;
    data.resize(total, value);
    Ok(Value::array(NdArray::new(shape, data, dtype)))
}

fn zeros(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    filled(interp, args, "zeros", 0.0)
}

fn ones(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    filled(interp, args, "ones", 1.0)
}

fn full(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("full", &["shape", "fill_value", "dtype"], 2)?;
    let shape = shape_arg(interp, &slots[0].take().unwrap_or(Value::None))?;
    let (x, natural) = ndarray::scalar_element(&slots[1].take().unwrap_or(Value::None))?;
    let dtype = dtype_arg(slot(&mut slots, 2))?.unwrap_or(natural);
    let total = shape.iter().product();
    let mut data = interp.alloc_vec(total)?;
    data.resize(total, dtype.cast(x));
    Ok(Value::array(NdArray::new(shape, data, dtype)))
}

fn eye(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("eye", &["N", "M", "k", "dtype"], 1)?;
    let n = slots[0].take().unwrap_or(Value::None).as_usize()?;
    let m = match slot(&mut slots, 1) {
        Some(v) => v.as_usize()?,
        None => n,
    };
    let k = match slot(&mut slots, 2) {
        Some(v) => v.as_index()?,
        None => 0,
    };
    let dtype = dtype_arg(slot(&mut slots, 3))?.unwrap_or(DType::Float);
    let mut data = interp.alloc_vec(n.saturating_mul(m))?;
    data.resize(n * m, 0.0);
    for i in 0..n {
        let j = i as i64 + k;
        if j >= 0 && (j as usize) < m {
            data[i * m + j as usize] = 1.0;
        }
    }
    Ok(Value::array(NdArray::new(vec![n, m], data, dtype)))
}

fn identity(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("identity", &["n", "dtype"], 1)?;
    let n = slots[0].take().unwrap_or(Value::None);
    let mut call = CallArgs::new(vec![n]);
    if let Some(dtype) = slot(&mut slots, 1) {
        call.keywords.push(("dtype".to_string(), dtype));
    }
    eye(interp, call)
}

fn float64(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    builtins::construct(interp, TypeKind::Float, args)
}

fn int64(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    builtins::construct(interp, TypeKind::Int, args)
}

fn bool_(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    builtins::construct(interp, TypeKind::Bool, args)
}

// ----- reductions ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reduction {
    Sum,
    Prod,
    Mean,
    Std,
    Var,
    Min,
    Max,
    ArgMin,
    ArgMax,
    Median,
    Any,
    All,
}

impl Reduction {
    /// Reductions also offered as array methods.
    fn method(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Reduction::Sum,
            "prod" => Reduction::Prod,
            "mean" => Reduction::Mean,
            "std" => Reduction::Std,
            "var" => Reduction::Var,
            "min" => Reduction::Min,
            "max" => Reduction::Max,
            "argmin" => Reduction::ArgMin,
            "argmax" => Reduction::ArgMax,
            "any" => Reduction::Any,
            "all" => Reduction::All,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Prod => "prod",
            Reduction::Mean => "mean",
            Reduction::Std => "std",
            Reduction::Var => "var",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::ArgMin => "argmin",
            Reduction::ArgMax => "argmax",
            Reduction::Median => "median",
            Reduction::Any => "any",
            Reduction::All => "all",
        }
    }

    fn dtype(self, input: DType) -> DType {
        match self {
            Reduction::Sum | Reduction::Prod => input.max(DType::Int),
            Reduction::Mean | Reduction::Std | Reduction::Var | Reduction::Median => DType::Float,
            Reduction::Min | Reduction::Max => input,
            Reduction::ArgMin | Reduction::ArgMax => DType::Int,
            Reduction::Any | Reduction::All => DType::Bool,
        }
    }

    fn takes_ddof(self) -> bool {
        matches!(self, Reduction::Std | Reduction::Var)
    }
}

/// Summation in the blocked pairwise order numpy uses for contiguous data.
fn pairwise_sum(a: &[f64]) -> f64 {
    let n = a.len();
    if n < 8 {
        a.iter().fold(0.0, |acc, x| acc + x)
    } else if n <= 128 {
        let mut r = [0.0; 8];
        r.copy_from_slice(&a[..8]);
        let blocked = n - n % 8;
        let mut i = 8;
        while i < blocked {
            for (k, slot) in r.iter_mut().enumerate() {
                *slot += a[i + k];
            }
            i += 8;
        }
        let mut res = ((r[0] + r[1]) + (r[2] + r[3])) + ((r[4] + r[5]) + (r[6] + r[7]));
        for x in &a[blocked..] {
            res += x;
        }
        res
    } else {
        let mut half = n / 2;
        half -= half % 8;
        pairwise_sum(&a[..half]) + pairwise_sum(&a[half..])
    }
}

/// Positions of a reduction axis: `outer` blocks of `n` lanes each `inner` wide.
struct Lanes {
    outer: usize,
    n: usize,
    inner: usize,
}

impl Lanes {
    fn new(shape: &[usize], axis: usize) -> Self {
        Self {
            outer: shape[..axis].iter().product(),
            n: shape[axis],
            inner: shape[axis + 1..].iter().product(),
        }
    }

    fn at(&self, o: usize, j: usize, i: usize) -> usize {
        (o * self.n + j) * self.inner + i
    }

    fn lane(&self, data: &[f64], o: usize, i: usize) -> Vec<f64> {
        (0..self.n).map(|j| data[self.at(o, j, i)]).collect()
    }
}

fn lane_sum(lane: &[f64], contiguous: bool) -> f64 {
    if contiguous {
        pairwise_sum(lane)
    } else {
        lane.iter().fold(0.0, |acc, x| acc + x)
    }
}

fn empty_reduction<T>(r: Reduction) -> PyResult<T> {
    let message = match r {
        Reduction::ArgMin | Reduction::ArgMax => {
            format!("attempt to get {} of an empty sequence", r.name())
        }
        _ => format!(
            "zero-size array to reduction operation {} which has no identity",
            if r == Reduction::Min { "minimum" } else { "maximum" }
        ),
    };
    raise(ExcKind::ValueError, message)
}

fn reduce_lane(
    interp: &mut Interpreter,
    r: Reduction,
    lane: &[f64],
    contiguous: bool,
    ddof: f64,
) -> PyResult<f64> {
    let n = lane.len();
    Ok(match r {
        Reduction::Sum => lane_sum(lane, contiguous),
        Reduction::Prod => lane.iter().fold(1.0, |acc, x| acc * x),
        Reduction::Any => lane.iter().any(|x| *x != 0.0) as u8 as f64,
        Reduction::All => lane.iter().all(|x| *x != 0.0) as u8 as f64,
        Reduction::Mean => {
            if n == 0 {
                interp.warn("RuntimeWarning", "Mean of empty slice.")?;
                return Ok(f64::NAN);
            }
            lane_sum(lane, contiguous) / n as f64
        }
        Reduction::Std | Reduction::Var => {
            let dof = n as f64 - ddof;
            if dof <= 0.0 {
                interp.warn("RuntimeWarning", "Degrees of freedom <= 0 for slice")?;
                return Ok(f64::NAN);
            }
            let mean = lane_sum(lane, contiguous) / n as f64;
            let squares: Vec<f64> = lane.iter().map(|x| (x - mean) * (x - mean)).collect();
            let var = lane_sum(&squares, contiguous) / dof;
            if r == Reduction::Std {
                var.sqrt()
            } else {
                var
            }
        }
        Reduction::Min | Reduction::Max => {
            if n == 0 {
                return empty_reduction(r);
            }
            if lane.iter().any(|x| x.is_nan()) {
                return Ok(f64::NAN);
            }
            let pick = if r == Reduction::Min { f64::min } else { f64::max };
            lane[1..].iter().fold(lane[0], |acc, x| pick(acc, *x))
        }
        Reduction::ArgMin | Reduction::ArgMax => {
            if n == 0 {
                return empty_reduction(r);
            }
            if let Some(i) = lane.iter().position(|x| x.is_nan()) {
                return Ok(i as f64);
            }
            let mut best = 0;
            for (i, x) in lane.iter().enumerate().skip(1) {
                let better = if r == Reduction::ArgMin {
                    *x < lane[best]
                } else {
                    *x > lane[best]
                };
                if better {
                    best = i;
                }
            }
            best as f64
        }
        Reduction::Median => {
            if n == 0 {
                interp.warn("RuntimeWarning", "Mean of empty slice.")?;
                return Ok(f64::NAN);
            }
            if lane.iter().any(|x| x.is_nan()) {
                return Ok(f64::NAN);
            }
            let mut sorted = lane.to_vec();
            sort_floats(&mut sorted);
            if n % 2 == 1 {
                sorted[n / 2]
            } else {
                (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
            }
        }
    })
}

fn reduce(
    interp: &mut Interpreter,
    r: Reduction,
    a: &NdArray,
    axis: Option<usize>,
    ddof: f64,
) -> PyResult<Value> {
    interp.check_deadline()?;
    let dtype = r.dtype(a.dtype);
    let Some(axis) = axis else {
        let x = reduce_lane(interp, r, &a.data, true, ddof)?;
        return Ok(ndarray::element_value(dtype, dtype.cast(x)));
    };
    let lanes = Lanes::new(&a.shape, axis);
    let mut out = Vec::with_capacity(lanes.outer * lanes.inner);
    for o in 0..lanes.outer {
        for i in 0..lanes.inner {
            interp.tick()?;
            let lane = lanes.lane(&a.data, o, i);
            let x = reduce_lane(interp, r, &lane, lanes.inner == 1, ddof)?;
            out.push(dtype.cast(x));
        }
    }
    let mut shape = a.shape.clone();
    shape.remove(axis);
    Ok(NdArray::new(shape, out, dtype).into_value())
}

fn reduce_call(interp: &mut Interpreter, args: CallArgs, r: Reduction) -> PyResult<Value> {
    let names: &[&str] = if r.takes_ddof() {
        &["a", "axis", "ddof"]
    } else {
        &["a", "axis"]
    };
    let mut slots = args.bind(r.name(), names, 1)?;
    let a = first_array(interp, &mut slots)?;
    let axis = axis_arg(slot(&mut slots, 1), a.ndim())?;
    let ddof = match slot(&mut slots, 2) {
        Some(v) => v.as_f64()?,
        None => 0.0,
    };
    reduce(interp, r, &a, axis, ddof)
}

fn method_reduce(
    interp: &mut Interpreter,
    a: &NdArray,
    r: Reduction,
    args: CallArgs,
) -> PyResult<Value> {
    let names: &[&str] = if r.takes_ddof() { &["axis", "ddof"] } else { &["axis"] };
    let mut slots = args.bind(r.name(), names, 0)?;
    let axis = axis_arg(slot(&mut slots, 0), a.ndim())?;
    let ddof = match slot(&mut slots, 1) {
        Some(v) => v.as_f64()?,
        None => 0.0,
    };
    reduce(interp, r, a, axis, ddof)
}

fn np_sum(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Sum)
}

fn np_prod(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Prod)
}

fn np_mean(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Mean)
}

fn np_std(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Std)
}

fn np_var(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Var)
}

fn np_min(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Min)
}

fn np_max(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Max)
}

fn np_argmin(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::ArgMin)
}

fn np_argmax(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::ArgMax)
}

fn np_median(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Median)
}

fn np_any(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::Any)
}

fn np_all(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    reduce_call(interp, args, Reduction::All)
}

fn cumsum_of(interp: &mut Interpreter, a: &NdArray, axis: Option<usize>) -> PyResult<NdArray> {
    let dtype = a.dtype.max(DType::Int);
    let Some(axis) = axis else {
        let mut acc = 0.0;
        let mut out = Vec::with_capacity(a.size());
        for x in &a.data {
            interp.tick()?;
            acc += x;
            out.push(acc);
        }
        return Ok(NdArray::vector(out, dtype));
    };
    let lanes = Lanes::new(&a.shape, axis);
    let mut out = a.data.clone();
    for o in 0..lanes.outer {
        for i in 0..lanes.inner {
            interp.tick()?;
            let mut acc = 0.0;
            for j in 0..lanes.n {
                let at = lanes.at(o, j, i);
                acc += a.data[at];
                out[at] = acc;
            }
        }
    }
    Ok(NdArray::new(a.shape.clone(), out, dtype))
}

fn np_cumsum(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("cumsum", &["a", "axis"], 1)?;
    let a = first_array(interp, &mut slots)?;
    let axis = axis_arg(slot(&mut slots, 1), a.ndim())?;
    Ok(Value::array(cumsum_of(interp, &a, axis)?))
}

// ----- element-wise functions ---------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ufunc {
    Abs,
    Sqrt,
    Exp,
    Log,
    Log2,
    Log10,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
}

impl Ufunc {
    fn name(self) -> &'static str {
        match self {
            Ufunc::Abs => "absolute",
            Ufunc::Sqrt => "sqrt",
            Ufunc::Exp => "exp",
            Ufunc::Log => "log",
            Ufunc::Log2 => "log2",
            Ufunc::Log10 => "log10",
            Ufunc::Sin => "sin",
            Ufunc::Cos => "cos",
            Ufunc::Tan => "tan",
            Ufunc::Floor => "floor",
            Ufunc::Ceil => "ceil",
        }
    }

    fn eval(self, x: f64) -> f64 {
        match self {
            Ufunc::Abs => x.abs(),
            Ufunc::Sqrt => x.sqrt(),
            Ufunc::Exp => x.exp(),
            Ufunc::Log => x.ln(),
            Ufunc::Log2 => x.log2(),
            Ufunc::Log10 => x.log10(),
            Ufunc::Sin => x.sin(),
            Ufunc::Cos => x.cos(),
            Ufunc::Tan => x.tan(),
            Ufunc::Floor => x.floor(),
            Ufunc::Ceil => x.ceil(),
        }
    }

    fn is_log(self) -> bool {
        matches!(self, Ufunc::Log | Ufunc::Log2 | Ufunc::Log10)
    }
}

fn apply_ufunc(interp: &mut Interpreter, f: Ufunc, a: &NdArray) -> PyResult<NdArray> {
    let (mut invalid, mut divide, mut overflow) = (false, false, false);
    let mut out = Vec::with_capacity(a.size());
    for &x in &a.data {
        interp.tick()?;
        let y = f.eval(x);
        if y.is_nan() && !x.is_nan() {
            invalid = true;
        } else if f.is_log() && x == 0.0 {
            divide = true;
        } else if y.is_infinite() && x.is_finite() {
            overflow = true;
        }
        out.push(y);
    }
    for (hit, what) in [
        (divide, "divide by zero"),
        (overflow, "overflow"),
        (invalid, "invalid value"),
    ] {
        if hit {
            interp.warn(
                "RuntimeWarning",
                &format!("{} encountered in {}", what, f.name()),
            )?;
        }
    }
    let dtype = if f == Ufunc::Abs { a.dtype } else { DType::Float };
    Ok(NdArray::new(a.shape.clone(), out, dtype))
}

fn ufunc_call(interp: &mut Interpreter, args: CallArgs, f: Ufunc) -> PyResult<Value> {
    let a = args.positional(f.name(), 1, 1)?;
    let arr = to_array(interp, &a[0])?;
    Ok(apply_ufunc(interp, f, &arr)?.into_value())
}

fn np_abs(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Abs)
}

fn np_sqrt(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Sqrt)
}

fn np_exp(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Exp)
}

fn np_log(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Log)
}

fn np_log2(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Log2)
}

fn np_log10(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Log10)
}

fn np_sin(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Sin)
}

fn np_cos(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Cos)
}

fn np_tan(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Tan)
}

fn np_floor(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Floor)
}

fn np_ceil(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    ufunc_call(interp, args, Ufunc::Ceil)
}

/// Scale, round half to even, unscale.
fn round_to(x: f64, decimals: i64) -> f64 {
    let exponent = decimals.unsigned_abs().min(400) as i32;
    let scale = 10f64.powi(exponent);
    if decimals >= 0 {
        (x * scale).round_ties_even() / scale
    } else {
        (x / scale).round_ties_even() * scale
    }
}

fn round_array(a: &NdArray, decimals: i64) -> NdArray {
    if a.dtype != DType::Float && decimals >= 0 {
        return a.clone();
    }
    let data = a
        .data
        .iter()
        .map(|x| if x.is_finite() { round_to(*x, decimals) } else { *x })
        .collect();
    NdArray::new(a.shape.clone(), data, a.dtype.max(DType::Int))
}

fn np_round(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("round", &["a", "decimals"], 1)?;
    let a = first_array(interp, &mut slots)?;
    let decimals = match slot(&mut slots, 1) {
        Some(v) => v.as_index()?,
        None => 0,
    };
    Ok(round_array(&a, decimals).into_value())
}

// ----- shape manipulation -------------------------------------------------

fn dot(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("dot", 2, 2)?;
    let x = to_array(interp, &a[0])?;
    let y = to_array(interp, &a[1])?;
    if x.ndim() == 0 || y.ndim() == 0 {
        return Ok(ndarray::elementwise(interp, BinOp::Mul, &x, &y)?.into_value());
    }
    ndarray::matmul(interp, &x, &y)
}

fn matmul(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("matmul", 2, 2)?;
    let x = to_array(interp, &a[0])?;
    let y = to_array(interp, &a[1])?;
    ndarray::matmul(interp, &x, &y)
}

/// Reorder axes; `axes[k]` names the source axis of output axis `k`.
fn permute(a: &NdArray, axes: &[usize]) -> NdArray {
    let src_strides = a.strides();
    let shape: Vec<usize> = axes.iter().map(|&d| a.shape[d]).collect();
    let strides: Vec<usize> = axes.iter().map(|&d| src_strides[d]).collect();
    let n = shape.len();
    let total = a.size();
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
    NdArray::new(shape, out, a.dtype)
}

fn transpose_of(a: &NdArray, axes: Option<Vec<i64>>) -> PyResult<NdArray> {
    let n = a.ndim();
    let order: Vec<usize> = match axes {
        None => (0..n).rev().collect(),
        Some(axes) => {
            if axes.len() != n {
                return raise(ExcKind::ValueError, "axes don't match array");
            }
            let order = axes
                .into_iter()
                .map(|ax| normalize_axis(ax, n))
                .collect::<PyResult<Vec<_>>>()?;
            let mut seen = vec![false; n];
            for &ax in &order {
                if std::mem::replace(&mut seen[ax], true) {
                    return raise(ExcKind::ValueError, "repeated axis in transpose");
                }
            }
            order
        }
    };
    Ok(permute(a, &order))
}

fn transpose(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("transpose", &["a", "axes"], 1)?;
    let a = first_array(interp, &mut slots)?;
    let axes = match slot(&mut slots, 1) {
        Some(v) => Some(dims_from_args(vec![v])?),
        None => None,
    };
    Ok(Value::array(transpose_of(&a, axes)?))
}

fn reshape_to(a: &NdArray, dims: &[i64]) -> PyResult<NdArray> {
    let size = a.size();
    let requested = || {
        let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
        if parts.len() == 1 {
            format!("({},)", parts[0])
        } else {
            format!("({})", parts.join(", "))
        }
    };
    if dims.len() > MAX_NDIM {
        return raise(
            ExcKind::ValueError,
            format!("maximum supported dimension for an ndarray is {}", MAX_NDIM),
        );
    }
    let unknown: Vec<usize> = (0..dims.len()).filter(|&i| dims[i] == -1).collect();
    if unknown.len() > 1 {
        return raise(ExcKind::ValueError, "can only specify one unknown dimension");
    }
    if dims.iter().any(|d| *d < -1) {
        return raise(ExcKind::ValueError, "negative dimensions not allowed");
    }
    let known: usize = dims
        .iter()
        .filter(|d| **d >= 0)
        .try_fold(1usize, |acc, d| acc.checked_mul(*d as usize))
        .unwrap_or(usize::MAX);
    let mut shape: Vec<usize> = dims.iter().map(|d| (*d).max(0) as usize).collect();
    if let Some(&slot) = unknown.first() {
        if known == 0 || size % known != 0 {
            return raise(
                ExcKind::ValueError,
                format!("cannot reshape array of size {} into shape {}", size, requested()),
            );
        }
        shape[slot] = size / known;
    } else if known != size {
        return raise(
            ExcKind::ValueError,
            format!("cannot reshape array of size {} into shape {}", size, requested()),
        );
    }
    Ok(NdArray::new(shape, a.data.clone(), a.dtype))
}

fn reshape(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("reshape", &["a", "newshape"], 2)?;
    let a = first_array(interp, &mut slots)?;
    let dims = dims_from_args(vec![slots[1].take().unwrap_or(Value::None)])?;
    Ok(Value::array(reshape_to(&a, &dims)?))
}

fn concatenate(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("concatenate", &["arrays", "axis"], 1)?;
    let seq = slots[0].take().unwrap_or(Value::None);
    let flatten = matches!(slots[1], Some(Value::None));
    let axis_value = slot(&mut slots, 1);
    let mut arrays = Vec::new();
    for item in interp.collect(&seq)? {
        arrays.push(to_array(interp, &item)?);
    }
    let Some(first) = arrays.first() else {
        return raise(ExcKind::ValueError, "need at least one array to concatenate");
    };
    let dtype = arrays.iter().map(|a| a.dtype).max().unwrap_or(DType::Float);
    if flatten {
        let data: Vec<f64> = arrays.iter().flat_map(|a| a.data.iter().copied()).collect();
        interp.check_len(data.len())?;
        return Ok(Value::array(NdArray::vector(data, dtype)));
    }
    let ndim = first.ndim();
    if ndim == 0 {
        return raise(ExcKind::ValueError, "zero-dimensional arrays cannot be concatenated");
    }
    let axis = normalize_axis(axis_value.map_or(Ok(0), |v| v.as_index())?, ndim)?;
    let mut shape = first.shape.clone();
    for (k, a) in arrays.iter().enumerate().skip(1) {
        if a.ndim() != ndim {
            return raise(
                ExcKind::ValueError,
                format!(
                    "all the input arrays must have same number of dimensions, but the array \
                     at index 0 has {} dimension(s) and the array at index {} has {} \
                     dimension(s)",
                    ndim,
                    k,
                    a.ndim()
                ),
            );
        }
        for d in 0..ndim {
            if d != axis && a.shape[d] != first.shape[d] {
                return raise(
                    ExcKind::ValueError,
                    format!(
                        "all the input array dimensions except for the concatenation axis \
                         must match exactly, but along dimension {}, the array at index 0 has \
                         size {} and the array at index {} has size {}",
                        d, first.shape[d], k, a.shape[d]
                    ),
                );
            }
        }
        shape[axis] += a.shape[axis];
    }
    let total = shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
    interp.check_len(total.unwrap_or(usize::MAX))?;
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();
    let mut data = Vec::with_capacity(total.unwrap_or(0));
    for o in 0..outer {
        for a in &arrays {
            let chunk = a.shape[axis] * inner;
            data.extend_from_slice(&a.data[o * chunk..(o + 1) * chunk]);
        }
    }
    Ok(Value::array(NdArray::new(shape, data, dtype)))
}

/// Ascending with NaN last, as numpy sorts.
fn sort_floats(values: &mut [f64]) {
    values.sort_by(|a, b| {
        a.partial_cmp(b)
            .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
    });
}

fn sort_along(interp: &mut Interpreter, a: &NdArray, axis: Option<usize>) -> PyResult<NdArray> {
    interp.check_deadline()?;
    let Some(axis) = axis else {
        let mut data = a.data.clone();
        sort_floats(&mut data);
        return Ok(NdArray::vector(data, a.dtype));
    };
    let lanes = Lanes::new(&a.shape, axis);
    let mut out = a.data.clone();
    for o in 0..lanes.outer {
        for i in 0..lanes.inner {
            interp.tick()?;
            let mut lane = lanes.lane(&a.data, o, i);
            sort_floats(&mut lane);
            for (j, x) in lane.into_iter().enumerate() {
                out[lanes.at(o, j, i)] = x;
            }
        }
    }
    Ok(NdArray::new(a.shape.clone(), out, a.dtype))
}

/// The `axis` argument of a sort: absent means the last axis.
fn sort_axis(slots: &mut [Option<Value>], i: usize, ndim: usize) -> PyResult<Option<usize>> {
    match slots.get_mut(i).and_then(Option::take) {
        None => normalize_axis(-1, ndim).map(Some),
        Some(Value::None) => Ok(None),
        Some(v) => normalize_axis(v.as_index()?, ndim).map(Some),
    }
}

fn sort(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("sort", &["a", "axis"], 1)?;
    let a = first_array(interp, &mut slots)?;
    let axis = sort_axis(&mut slots, 1, a.ndim())?;
    Ok(Value::array(sort_along(interp, &a, axis)?))
}

fn unique(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("unique", 1, 1)?;
    let arr = to_array(interp, &a[0])?;
    let mut data = arr.data;
    sort_floats(&mut data);
    data.dedup_by(|x, y| x == y || (x.is_nan() && y.is_nan()));
    Ok(Value::array(NdArray::vector(data, arr.dtype)))
}

fn np_where(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("where", &["condition", "x", "y"], 1)?;
    let cond = first_array(interp, &mut slots)?;
    match (slot(&mut slots, 1), slot(&mut slots, 2)) {
        (None, None) => {
            let ndim = cond.ndim().max(1);
            let shape = if cond.ndim() == 0 { vec![1] } else { cond.shape.clone() };
            let strides = ndarray::strides_of(&shape);
            let mut coords: Vec<Vec<f64>> = vec![Vec::new(); ndim];
            for (flat, x) in cond.data.iter().enumerate() {
                if *x != 0.0 {
                    for d in 0..ndim {
                        coords[d].push(((flat / strides[d]) % shape[d]) as f64);
                    }
                }
            }
            Ok(Value::tuple(
                coords
                    .into_iter()
                    .map(|c| Value::array(NdArray::vector(c, DType::Int)))
                    .collect(),
            ))
        }
        (Some(x), Some(y)) => {
            let x = to_array(interp, &x)?;
            let y = to_array(interp, &y)?;
            let shape = ndarray::broadcast_shape(&cond.shape, &x.shape)?;
            let shape = ndarray::broadcast_shape(&shape, &y.shape)?;
            let total = shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
            interp.check_len(total.unwrap_or(usize::MAX))?;
            let cs = ndarray::broadcast_to(&cond, &shape)?;
            let xs = ndarray::broadcast_to(&x, &shape)?;
            let ys = ndarray::broadcast_to(&y, &shape)?;
            let dtype = x.dtype.max(y.dtype);
            let data = cs
                .iter()
                .zip(xs.iter().zip(&ys))
                .map(|(c, (x, y))| if *c != 0.0 { *x } else { *y })
                .collect();
            Ok(NdArray::new(shape, data, dtype).into_value())
        }
        _ => raise(
            ExcKind::ValueError,
            "either both or neither of x and y should be given",
        ),
    }
}

fn close_elements(
    interp: &mut Interpreter,
    args: CallArgs,
    name: &str,
) -> PyResult<NdArray> {
    let mut slots = args.bind(name, &["a", "b", "rtol", "atol", "equal_nan"], 2)?;
    let a = first_array(interp, &mut slots)?;
    let b = to_array(interp, &slots[1].take().unwrap_or(Value::None))?;
    let rtol = slot(&mut slots, 2).map_or(Ok(1e-05), |v| v.as_f64())?;
    let atol = slot(&mut slots, 3).map_or(Ok(1e-08), |v| v.as_f64())?;
    let equal_nan = match slot(&mut slots, 4) {
        Some(v) => v.truthy()?,
        None => false,
    };
    let shape = ndarray::broadcast_shape(&a.shape, &b.shape)?;
    let xs = ndarray::broadcast_to(&a, &shape)?;
    let ys = ndarray::broadcast_to(&b, &shape)?;
    let data = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| {
            let hit = if x == y {
                true
            } else if !x.is_finite() || !y.is_finite() {
                equal_nan && x.is_nan() && y.is_nan()
            } else {
                (x - y).abs() <= atol + rtol * y.abs()
            };
            hit as u8 as f64
        })
        .collect();
    Ok(NdArray::new(shape, data, DType::Bool))
}

fn isclose(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    Ok(close_elements(interp, args, "isclose")?.into_value())
}

fn allclose(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let hits = close_elements(interp, args, "allclose")?;
    Ok(Value::Bool(hits.data.iter().all(|x| *x != 0.0)))
}

// ----- linalg -------------------------------------------------------------

fn linalg_error<T>(message: &str) -> PyResult<T> {
    raise(ExcKind::LinAlgError, message)
}

/// A square matrix argument as its order and row-major elements.
fn square(interp: &mut Interpreter, v: &Value) -> PyResult<(usize, Vec<f64>)> {
    let a = to_array(interp, v)?;
    if a.ndim() != 2 {
        return linalg_error(&format!(
            "{}-dimensional array given. Array must be two-dimensional",
            a.ndim()
        ));
    }
    if a.shape[0] != a.shape[1] {
        return linalg_error("Last 2 dimensions of the array must be square");
    }
    Ok((a.shape[0], a.data))
}

/// LU factorization with partial pivoting, stored in place.
struct Lu {
    n: usize,
    m: Vec<f64>,
    perm: Vec<usize>,
    sign: f64,
    singular: bool,
}

impl Lu {
    fn factor(interp: &mut Interpreter, n: usize, mut m: Vec<f64>) -> PyResult<Self> {
        let mut perm: Vec<usize> = (0..n).collect();
        let mut sign = 1.0;
        let mut singular = false;
        for k in 0..n {
            interp.tick()?;
            let mut pivot = k;
            for i in k + 1..n {
                if m[i * n + k].abs() > m[pivot * n + k].abs() {
                    pivot = i;
                }
            }
            if m[pivot * n + k] == 0.0 {
                singular = true;
                continue;
            }
            if pivot != k {
                for j in 0..n {
                    m.swap(k * n + j, pivot * n + j);
                }
                perm.swap(k, pivot);
                sign = -sign;
            }
            for i in k + 1..n {
                let f = m[i * n + k] / m[k * n + k];
                m[i * n + k] = f;
                for j in k + 1..n {
                    m[i * n + j] -= f * m[k * n + j];
                }
            }
        }
        Ok(Self {
            n,
            m,
            perm,
            sign,
            singular,
        })
    }

    fn det(&self) -> f64 {
        (0..self.n).fold(self.sign, |acc, i| acc * self.m[i * self.n + i])
    }

    fn solve(&self, b: &[f64]) -> PyResult<Vec<f64>> {
        if self.singular {
            return linalg_error("Singular matrix");
        }
        let n = self.n;
        let mut x: Vec<f64> = self.perm.iter().map(|&p| b[p]).collect();
        for i in 0..n {
            for j in 0..i {
                x[i] -= self.m[i * n + j] * x[j];
            }
        }
        for i in (0..n).rev() {
            for j in i + 1..n {
                x[i] -= self.m[i * n + j] * x[j];
            }
            x[i] /= self.m[i * n + i];
        }
        Ok(x)
    }
}

fn det(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("det", 1, 1)?;
    let (n, m) = square(interp, &a[0])?;
    let lu = Lu::factor(interp, n, m)?;
    Ok(Value::Float(lu.det()))
}

fn inv(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("inv", 1, 1)?;
    let (n, m) = square(interp, &a[0])?;
    let lu = Lu::factor(interp, n, m)?;
    let mut out = vec![0.0; n * n];
    for j in 0..n {
        let mut e = vec![0.0; n];
        e[j] = 1.0;
        for (i, x) in lu.solve(&e)?.into_iter().enumerate() {
            out[i * n + j] = x;
        }
    }
    Ok(Value::array(NdArray::new(vec![n, n], out, DType::Float)))
}

fn solve(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("solve", 2, 2)?;
    let (n, m) = square(interp, &a[0])?;
    let b = to_array(interp, &a[1])?;
    if b.ndim() == 0 || b.ndim() > 2 || b.shape[0] != n {
        return raise(
            ExcKind::ValueError,
            format!(
                "solve: Input operand 1 has a mismatch in its core dimension 0, with gufunc \
                 signature (m,m),(m,n)->(m,n) (size {} is different from {})",
                b.shape.first().copied().unwrap_or(0),
                n
            ),
        );
    }
    let lu = Lu::factor(interp, n, m)?;
    if b.ndim() == 1 {
        let x = lu.solve(&b.data)?;
        return Ok(Value::array(NdArray::vector(x, DType::Float)));
    }
    let k = b.shape[1];
    let mut out = vec![0.0; n * k];
    for c in 0..k {
        let column: Vec<f64> = (0..n).map(|r| b.data[r * k + c]).collect();
        for (r, x) in lu.solve(&column)?.into_iter().enumerate() {
            out[r * k + c] = x;
        }
    }
    Ok(Value::array(NdArray::new(vec![n, k], out, DType::Float)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NormOrd {
    Default,
    Fro,
    Nuc,
    P(f64),
}

fn vector_norm(xs: &[f64], ord: NormOrd) -> PyResult<f64> {
    let abs = xs.iter().map(|x| x.abs());
    Ok(match ord {
        NormOrd::Default => pairwise_sum(&xs.iter().map(|x| x * x).collect::<Vec<_>>()).sqrt(),
        NormOrd::P(p) if p == f64::INFINITY => abs.fold(0.0, f64::max),
        NormOrd::P(p) if p == f64::NEG_INFINITY => abs.fold(f64::INFINITY, f64::min),
        NormOrd::P(p) if p == 0.0 => xs.iter().filter(|x| **x != 0.0).count() as f64,
        NormOrd::P(p) if p == 1.0 => abs.sum(),
        NormOrd::P(p) if p == 2.0 => {
            pairwise_sum(&xs.iter().map(|x| x * x).collect::<Vec<_>>()).sqrt()
        }
        NormOrd::P(p) => abs.map(|x| x.powf(p)).sum::<f64>().powf(1.0 / p),
        NormOrd::Fro | NormOrd::Nuc => {
            return raise(ExcKind::ValueError, "Invalid norm order for vectors.")
        }
    })
}

fn matrix_norm(a: &NdArray, ord: NormOrd) -> PyResult<f64> {
    let (rows, cols) = (a.shape[0], a.shape[1]);
    let at = |r: usize, c: usize| a.data[r * cols + c].abs();
    let col_sums = || (0..cols).map(move |c| (0..rows).map(|r| at(r, c)).sum::<f64>());
    let row_sums = || (0..rows).map(move |r| (0..cols).map(|c| at(r, c)).sum::<f64>());
    Ok(match ord {
        NormOrd::Default | NormOrd::Fro => {
            pairwise_sum(&a.data.iter().map(|x| x * x).collect::<Vec<_>>()).sqrt()
        }
        NormOrd::P(p) if p == 1.0 => col_sums().fold(0.0, f64::max),
        NormOrd::P(p) if p == -1.0 => col_sums().fold(f64::INFINITY, f64::min),
        NormOrd::P(p) if p == f64::INFINITY => row_sums().fold(0.0, f64::max),
        NormOrd::P(p) if p == f64::NEG_INFINITY => row_sums().fold(f64::INFINITY, f64::min),
        NormOrd::P(p) if p == 2.0 || p == -2.0 => {
            return raise(
                ExcKind::NotImplementedError,
                "matrix 2-norms need singular values, which are not available",
            )
        }
        NormOrd::Nuc => {
            return raise(
                ExcKind::NotImplementedError,
                "nuclear norms need singular values, which are not available",
            )
        }
        NormOrd::P(_) => return raise(ExcKind::ValueError, "Invalid norm order for matrices."),
    })
}

fn norm(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let mut slots = args.bind("norm", &["x", "ord", "axis"], 1)?;
    let a = first_array(interp, &mut slots)?;
    let ord = match slot(&mut slots, 1) {
        None => NormOrd::Default,
        Some(Value::Str(s)) if &*s == "fro" => NormOrd::Fro,
        Some(Value::Str(s)) if &*s == "nuc" => NormOrd::Nuc,
        Some(v) => NormOrd::P(v.as_f64()?),
    };
    if slot(&mut slots, 2).is_some() {
        return raise(
            ExcKind::NotImplementedError,
            "norm along an axis is not supported",
        );
    }
    let value = match (a.ndim(), ord) {
        (_, NormOrd::Default) => vector_norm(&a.data, ord)?,
        (1, _) => vector_norm(&a.data, ord)?,
        (2, _) => matrix_norm(&a, ord)?,
        _ => return raise(ExcKind::ValueError, "Improper number of dimensions to norm."),
    };
    Ok(Value::Float(value))
}

// ----- ndarray attributes and methods -------------------------------------

pub(crate) const ARRAY_METHODS: &[&str] = &[
    "tolist", "sum", "prod", "mean", "std", "var", "min", "max", "argmin", "argmax", "any",
    "all", "cumsum", "reshape", "flatten", "ravel", "copy", "astype", "transpose", "round",
    "sort", "item", "dot",
];

pub(crate) fn array_attribute(a: &Rc<RefCell<NdArray>>, attr: &str) -> PyResult<Option<Value>> {
    let a = a.borrow();
    Ok(match attr {
        "shape" => Some(Value::tuple(
            a.shape.iter().map(|d| Value::int(*d as i64)).collect(),
        )),
        "ndim" => Some(Value::int(a.ndim() as i64)),
        "size" => Some(Value::int(a.size() as i64)),
        "dtype" => Some(Value::str(a.dtype.name())),
        "T" => Some(Value::array(transpose_of(&a, None)?)),
        _ => None,
    })
}

pub(crate) fn call_array_method(
    interp: &mut Interpreter,
    a: &Rc<RefCell<NdArray>>,
    name: &str,
    args: CallArgs,
) -> PyResult<Value> {
    let arr = a.borrow().clone();
    if let Some(r) = Reduction::method(name) {
        return method_reduce(interp, &arr, r, args);
    }
    match name {
        "tolist" => {
            args.positional("tolist", 0, 0)?;
            Ok(arr.to_list())
        }
        "cumsum" => {
            let mut slots = args.bind("cumsum", &["axis"], 0)?;
            let axis = axis_arg(slot(&mut slots, 0), arr.ndim())?;
            Ok(Value::array(cumsum_of(interp, &arr, axis)?))
        }
        "reshape" => {
            let dims = dims_from_args(args.positional("reshape", 1, MAX_NDIM)?)?;
            Ok(Value::array(reshape_to(&arr, &dims)?))
        }
        "flatten" | "ravel" => {
            args.positional(name, 0, 0)?;
            Ok(Value::array(NdArray::vector(arr.data, arr.dtype)))
        }
        "copy" => {
            args.positional("copy", 0, 0)?;
            Ok(Value::array(arr))
        }
        "astype" => {
            let mut slots = args.bind("astype", &["dtype"], 1)?;
            match dtype_arg(slot(&mut slots, 0))? {
                Some(dtype) => Ok(Value::array(arr.astype(dtype))),
                None => Ok(Value::array(arr.astype(DType::Float))),
            }
        }
        "transpose" => {
            let values = args.positional("transpose", 0, MAX_NDIM)?;
            let axes = if values.is_empty() || (values.len() == 1 && values[0].is_none()) {
                None
            } else {
                Some(dims_from_args(values)?)
            };
            Ok(Value::array(transpose_of(&arr, axes)?))
        }
        "round" => {
            let mut slots = args.bind("round", &["decimals"], 0)?;
            let decimals = match slot(&mut slots, 0) {
                Some(v) => v.as_index()?,
                None => 0,
            };
            Ok(Value::array(round_array(&arr, decimals)))
        }
        "sort" => {
            let mut slots = args.bind("sort", &["axis"], 0)?;
            let axis = match sort_axis(&mut slots, 0, arr.ndim())? {
                Some(axis) => Some(axis),
                None => return raise(ExcKind::ValueError, "sort() axis must be an integer"),
            };
            let sorted = sort_along(interp, &arr, axis)?;
            *a.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "item" => {
            let values = args.positional("item", 0, 1)?;
            match values.first() {
                None => match arr.size() {
                    1 => Ok(arr.scalar_value()),
                    _ => raise(
                        ExcKind::ValueError,
                        "can only convert an array of size 1 to a Python scalar",
                    ),
                },
                Some(i) => {
                    let size = arr.size() as i64;
                    let raw = i.as_index()?;
                    let at = if raw < 0 { raw + size } else { raw };
                    if at < 0 || at >= size {
                        return raise(
                            ExcKind::IndexError,
                            format!("index {} is out of bounds for size {}", raw, size),
                        );
                    }
                    Ok(arr.element(arr.data[at as usize]))
                }
            }
        }
        "dot" => {
            let values = args.positional("dot", 1, 1)?;
            let other = to_array(interp, &values[0])?;
            if other.ndim() == 0 || arr.ndim() == 0 {
                return Ok(ndarray::elementwise(interp, BinOp::Mul, &arr, &other)?.into_value());
            }
            ndarray::matmul(interp, &arr, &other)
        }
        _ => raise(
            ExcKind::AttributeError,
            format!("'numpy.ndarray' object has no attribute '{}'", name),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, cols: usize, data: &[f64]) -> NdArray {
        NdArray::new(vec![rows, cols], data.to_vec(), DType::Float)
    }

    #[test]
    fn test_pairwise_sum_matches_blocked_order() {
        let values = vec![0.1; 16];
        let pair = 0.1 + 0.1;
        let blocked = ((pair + pair) + (pair + pair)) + ((pair + pair) + (pair + pair));
        assert_eq!(pairwise_sum(&values), blocked);
        assert_eq!(pairwise_sum(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(pairwise_sum(&[]), 0.0);
    }

    #[test]
    fn test_reshape_infers_unknown_dimension() {
        let a = NdArray::vector((0..6).map(f64::from).collect(), DType::Int);
        let b = reshape_to(&a, &[2, -1]).ok().map(|b| b.shape);
        assert_eq!(b, Some(vec![2, 3]));
        assert!(reshape_to(&a, &[4, -1]).is_err());
        assert!(reshape_to(&a, &[-1, -1]).is_err());
    }

    #[test]
    fn test_transpose_reverses_axes() {
        let a = matrix(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = transpose_of(&a, None).ok();
        let t = t.map(|t| (t.shape, t.data));
        assert_eq!(
            t,
            Some((vec![3, 2], vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]))
        );
    }

    #[test]
    fn test_lu_determinant_and_solve() {
        let mut interp = Interpreter::new(Default::default(), Default::default());
        let lu = Lu::factor(&mut interp, 2, vec![1.0, 2.0, 3.0, 4.0]).ok();
        let det = lu.as_ref().map(Lu::det);
        assert!(det.map_or(false, |d| (d + 2.0).abs() < 1e-12), "{:?}", det);
        let x = lu.and_then(|lu| lu.solve(&[5.0, 11.0]).ok());
        let x = x.map(|x| x.iter().map(|v| v.round()).collect::<Vec<_>>());
        assert_eq!(x, Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_singular_matrix_is_reported() {
        let mut interp = Interpreter::new(Default::default(), Default::default());
        let lu = Lu::factor(&mut interp, 2, vec![1.0, 2.0, 2.0, 4.0]).ok();
        assert!(lu.map_or(false, |lu| lu.solve(&[1.0, 1.0]).is_err()));
    }

    #[test]
    fn test_round_to_uses_half_even() {
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(1250.0, -2), 1200.0);
    }

    #[test]
    fn test_sort_places_nan_last() {
        let mut values = vec![3.0, f64::NAN, 1.0, 2.0];
        sort_floats(&mut values);
        assert_eq!(&values[..3], &[1.0, 2.0, 3.0]);
        assert!(values[3].is_nan());
    }
}
