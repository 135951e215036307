//! The `itertools` module. Every function is eager and returns a list.

use crate::interp::ast::BinOp;
use crate::interp::exception::{raise, ExcKind, PyResult};
use crate::interp::ops;
use crate::interp::value::{CallArgs, Module, Value};
use crate::interp::Interpreter;

pub(super) fn module() -> Value {
    Module::new("itertools")
        .function("permutations", permutations)
        .function("combinations", combinations)
        .function("combinations_with_replacement", combinations_with_replacement)
        .function("product", product)
        .function("accumulate", accumulate)
        .function("chain", chain)
        .function("islice", islice)
        .function("starmap", starmap)
        .function("zip_longest", zip_longest)
        .function("pairwise", pairwise)
        .function("compress", compress)
        .function("takewhile", takewhile)
        .function("dropwhile", dropwhile)
        .function("groupby", groupby)
        .function("repeat", repeat)
        .into_value()
}

/// Collects output tuples, enforcing the length cap as it grows.
struct Output<'a> {
    interp: &'a mut Interpreter,
    items: Vec<Value>,
}

impl<'a> Output<'a> {
    fn new(interp: &'a mut Interpreter) -> Self {
        Self {
            interp,
            items: Vec::new(),
        }
    }

    fn push(&mut self, v: Value) -> PyResult<()> {
        self.interp.tick()?;
        self.items.push(v);
        self.interp.check_len(self.items.len())
    }

    fn pick(&mut self, pool: &[Value], indices: &[usize]) -> PyResult<()> {
        self.push(Value::tuple(indices.iter().map(|i| pool[*i].clone()).collect()))
    }

    fn finish(self) -> Value {
        Value::list(self.items)
    }
}

fn r_arg(v: Option<&Value>, default: usize) -> PyResult<usize> {
    match v {
        None | Some(Value::None) => Ok(default),
        Some(v) => {
            let r = v.as_index()?;
            if r < 0 {
                return raise(ExcKind::ValueError, "r must be non-negative");
            }
            Ok(r as usize)
        }
    }
}

fn permutations(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("permutations", &["iterable", "r"], 1)?;
    let pool = interp.collect(slots[0].as_ref().unwrap_or(&Value::None))?;
    let n = pool.len();
    let r = r_arg(slots[1].as_ref(), n)?;
    let mut out = Output::new(interp);
    if r > n {
        return Ok(out.finish());
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut cycles: Vec<usize> = (n - r + 1..=n).rev().collect();
    out.pick(&pool, &indices[..r])?;
    'outer: loop {
        for i in (0..r).rev() {
            cycles[i] -= 1;
            if cycles[i] == 0 {
                let moved = indices.remove(i);
                indices.push(moved);
                cycles[i] = n - i;
            } else {
                let j = n - cycles[i];
                indices.swap(i, j);
                out.pick(&pool, &indices[..r])?;
                continue 'outer;
            }
        }
        return Ok(out.finish());
    }
}

fn combinations(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("combinations", &["iterable", "r"], 2)?;
    let pool = interp.collect(slots[0].as_ref().unwrap_or(&Value::None))?;
    let n = pool.len();
    let r = r_arg(slots[1].as_ref(), 0)?;
    let mut out = Output::new(interp);
    if r > n {
        return Ok(out.finish());
    }
    let mut indices: Vec<usize> = (0..r).collect();
    out.pick(&pool, &indices)?;
    loop {
        let i = match (0..r).rev().find(|&i| indices[i] != i + n - r) {
            Some(i) => i,
            None => return Ok(out.finish()),
        };
        indices[i] += 1;
        for j in i + 1..r {
            indices[j] = indices[j - 1] + 1;
        }
        out.pick(&pool, &indices)?;
    }
}

fn combinations_with_replacement(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("combinations_with_replacement", &["iterable", "r"], 2)?;
    let pool = interp.collect(slots[0].as_ref().unwrap_or(&Value::None))?;
    let n = pool.len();
    let r = r_arg(slots[1].as_ref(), 0)?;
    let mut out = Output::new(interp);
    if n == 0 && r > 0 {
        return Ok(out.finish());
    }
    let mut indices = vec![0usize; r];
    out.pick(&pool, &indices)?;
    loop {
        let i = match (0..r).rev().find(|&i| indices[i] != n - 1) {
            Some(i) => i,
            None => return Ok(out.finish()),
        };
        let next = indices[i] + 1;
        for slot in &mut indices[i..] {
            *slot = next;
        }
        out.pick(&pool, &indices)?;
    }
}

fn product(interp: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let repeat = match args.take_keyword("repeat") {
        Some(v) => r_arg(Some(&v), 1)?,
        None => 1,
    };
    let iterables = args.positional("product", 0, usize::MAX)?;
    let mut pools = Vec::new();
    for it in &iterables {
        pools.push(interp.collect(it)?);
    }
    let pools: Vec<Vec<Value>> = std::iter::repeat(pools).take(repeat).flatten().collect();
    let mut out = Output::new(interp);
    if pools.iter().any(Vec::is_empty) {
        return Ok(out.finish());
    }
    let mut indices = vec![0usize; pools.len()];
    loop {
        out.push(Value::tuple(
            indices.iter().zip(&pools).map(|(i, p)| p[*i].clone()).collect(),
        ))?;
        let mut k = pools.len();
        loop {
            if k == 0 {
                return Ok(out.finish());
            }
            k -= 1;
            indices[k] += 1;
            if indices[k] < pools[k].len() {
                break;
            }
            indices[k] = 0;
        }
    }
}

fn accumulate(interp: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let initial = args.take_keyword("initial").filter(|v| !v.is_none());
    let slots = args.bind("accumulate", &["iterable", "func"], 1)?;
    let items = interp.collect(slots[0].as_ref().unwrap_or(&Value::None))?;
    let func = slots[1].clone().filter(|f| !f.is_none());
    let mut out = Vec::with_capacity(items.len() + 1);
    let mut total = initial;
    if let Some(t) = &total {
        out.push(t.clone());
    }
    for item in items {
        interp.tick()?;
        let next = match (&total, &func) {
            (None, _) => item,
            (Some(t), Some(f)) => interp.call(f, CallArgs::new(vec![t.clone(), item]))?,
            (Some(t), None) => ops::binary_op(interp, BinOp::Add, t, &item)?,
        };
        out.push(next.clone());
        total = Some(next);
    }
    Ok(Value::list(out))
}

fn chain(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let iterables = args.positional("chain", 0, usize::MAX)?;
    let mut out = Vec::new();
    for it in &iterables {
        out.extend(interp.collect(it)?);
        interp.check_len(out.len())?;
    }
    Ok(Value::list(out))
}

fn islice(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("islice", 2, 4)?;
    let bound = |v: &Value, what: &str| -> PyResult<Option<usize>> {
        if v.is_none() {
            return Ok(None);
        }
        match v.as_index() {
            Ok(n) if n >= 0 => Ok(Some(n as usize)),
            _ => raise(
                ExcKind::ValueError,
                format!(
                    "{} argument for islice() must be None or an integer: 0 <= x <= sys.maxsize.",
                    what
                ),
            ),
        }
    };
    let (start, stop, step) = match a.len() {
        2 => (0, bound(&a[1], "Stop")?, 1),
        _ => {
            let start = bound(&a[1], "Indices")?.unwrap_or(0);
            let stop = bound(&a[2], "Stop")?;
            let step = match a.get(3) {
                Some(v) if !v.is_none() => match v.as_index() {
                    Ok(s) if s > 0 => s as usize,
                    _ => {
                        return raise(
                            ExcKind::ValueError,
                            "Step for islice() must be a positive integer or None.",
                        )
                    }
                },
                _ => 1,
            };
            (start, stop, step)
        }
    };
    let items = interp.collect(&a[0])?;
    let end = stop.map_or(items.len(), |s| s.min(items.len()));
    let out = items
        .into_iter()
        .take(end)
        .skip(start)
        .step_by(step)
        .collect();
    Ok(Value::list(out))
}

fn starmap(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("starmap", 2, 2)?;
    let mut out = Vec::new();
    for item in interp.collect(&a[1])? {
        let call_args = interp.collect(&item)?;
        out.push(interp.call(&a[0], CallArgs::new(call_args))?);
    }
    Ok(Value::list(out))
}

fn zip_longest(interp: &mut Interpreter, mut args: CallArgs) -> PyResult<Value> {
    let fill = args.take_keyword("fillvalue").unwrap_or(Value::None);
    let iterables = args.positional("zip_longest", 0, usize::MAX)?;
    let columns: Vec<Vec<Value>> = iterables
        .iter()
        .map(|it| interp.collect(it))
        .collect::<PyResult<_>>()?;
    let n = columns.iter().map(Vec::len).max().unwrap_or(0);
    let out = (0..n)
        .map(|i| {
            Value::tuple(
                columns
                    .iter()
                    .map(|c| c.get(i).cloned().unwrap_or_else(|| fill.clone()))
                    .collect(),
            )
        })
        .collect();
    Ok(Value::list(out))
}

fn pairwise(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("pairwise", 1, 1)?;
    let items = interp.collect(&a[0])?;
    let out = items
        .windows(2)
        .map(|w| Value::tuple(w.to_vec()))
        .collect();
    Ok(Value::list(out))
}

fn compress(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("compress", &["data", "selectors"], 2)?;
    let data = interp.collect(slots[0].as_ref().unwrap_or(&Value::None))?;
    let selectors = interp.collect(slots[1].as_ref().unwrap_or(&Value::None))?;
    let mut out = Vec::new();
    for (d, s) in data.into_iter().zip(selectors) {
        if s.truthy()? {
            out.push(d);
        }
    }
    Ok(Value::list(out))
}

fn takewhile(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("takewhile", 2, 2)?;
    let mut out = Vec::new();
    for item in interp.collect(&a[1])? {
        if !interp.call1(&a[0], item.clone())?.truthy()? {
            break;
        }
        out.push(item);
    }
    Ok(Value::list(out))
}

fn dropwhile(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let a = args.positional("dropwhile", 2, 2)?;
    let items = interp.collect(&a[1])?;
    let mut start = items.len();
    for (i, item) in items.iter().enumerate() {
        if !interp.call1(&a[0], item.clone())?.truthy()? {
            start = i;
            break;
        }
    }
    Ok(Value::list(items[start..].to_vec()))
}

/// Runs of equal keys as `(key, [items])` pairs.
fn groupby(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("groupby", &["iterable", "key"], 1)?;
    let items = interp.collect(slots[0].as_ref().unwrap_or(&Value::None))?;
    let key = slots[1].clone().filter(|k| !k.is_none());
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for item in items {
        interp.tick()?;
        let k = match &key {
            Some(f) => interp.call1(f, item.clone())?,
            None => item.clone(),
        };
        match groups.last_mut() {
            Some((last, members)) if ops::identical(last, &k) || ops::equals(last, &k)? => {
                members.push(item)
            }
            _ => groups.push((k, vec![item])),
        }
    }
    let out = groups
        .into_iter()
        .map(|(k, members)| Value::tuple(vec![k, Value::list(members)]))
        .collect();
    Ok(Value::list(out))
}

fn repeat(interp: &mut Interpreter, args: CallArgs) -> PyResult<Value> {
    let slots = args.bind("repeat", &["object", "times"], 1)?;
    let object = slots[0].clone().unwrap_or(Value::None);
    let times = match &slots[1] {
        Some(v) => v.as_index()?.max(0) as usize,
        None => {
            return raise(
                ExcKind::ValueError,
                "repeat() needs an explicit times argument here",
            )
        }
    };
    interp.check_len(times)?;
    Ok(Value::list(vec![object; times]))
}
