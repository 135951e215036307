//! Embedded interpreter for the Python subset snippets are written in.
//!
//! An [`Interpreter`] owns one module namespace. It runs a program with
//! [`Interpreter::run`], then the caller inspects the namespace with
//! [`Interpreter::global`] and [`Interpreter::eval_expression`]. Values are
//! reference counted and single-threaded; an interpreter never leaves the
//! thread that created it.

pub mod ast;
mod builtins;
mod eval;
pub mod exception;
mod format;
mod lexer;
mod methods;
mod modules;
pub mod ndarray;
mod ops;
mod parser;
mod scope;
pub mod value;

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::rc::{Rc, Weak};
use std::time::Instant;

use num_bigint::BigInt;
use num_traits::Signed;

pub use exception::{ExcKind, PyException, PyResult, TraceFrame, Unwind};
pub use modules::{builtin_namespace, BUILTIN_NAMES, MODULE_NAMES};
pub use value::Value;

use scope::Scope;

/// Check the deadline once per this many ticks.
const TICK_INTERVAL: u32 = 1024;

/// Nesting depth past which recursive walks over values give up.
pub const MAX_VALUE_DEPTH: usize = 256;

/// Guards that keep a snippet from exhausting the host.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum depth of nested snippet function calls.
    pub recursion_limit: usize,
    /// Maximum element count of any list, tuple, dict, set or array.
    pub max_collection_len: usize,
    /// Maximum length of any string, in bytes.
    pub max_string_len: usize,
    /// Maximum size of an integer produced by `**` or `<<`.
    pub max_int_bits: u64,
    /// Maximum decimal digits when converting between `int` and `str`.
    pub max_str_digits: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            recursion_limit: 200,
            max_collection_len: 1_000_000,
            max_string_len: 10_000_000,
            max_int_bits: 1_000_000,
            max_str_digits: 4300,
        }
    }
}

/// Path and node count of a [`Interpreter::check_printable`] walk.
#[derive(Default)]
struct PrintWalk {
    active: Vec<usize>,
    nodes: usize,
}

impl PrintWalk {
    /// Push a container; false when it is already on the path.
    fn enter(&mut self, id: usize) -> bool {
        if self.active.contains(&id) {
            return false;
        }
        self.active.push(id);
        true
    }
}

#[derive(Debug)]
struct Frame {
    function: String,
    line: usize,
}

pub struct Interpreter {
    limits: Limits,
    globals: Rc<Scope>,
    stdout: Box<dyn Write>,
    stderr: Box<dyn Write>,
    deadline: Option<Instant>,
    ticks: u32,
    frames: Vec<Frame>,
    /// Exceptions currently being handled, innermost last; a bare `raise`
    /// re-raises the last one.
    handling: Vec<PyException>,
    warned: HashSet<(usize, String)>,
    /// Function scopes captured by closures, cleared on teardown.
    closures: Vec<Weak<Scope>>,
}

impl Interpreter {
    pub fn new(limits: Limits, namespace: HashMap<String, Value>) -> Self {
        Self {
            limits,
            globals: Scope::module(namespace),
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
            deadline: None,
            ticks: 0,
            frames: Vec::new(),
            handling: Vec::new(),
            warned: HashSet::new(),
            closures: Vec::new(),
        }
    }

    /// Route `print` and runtime warnings to the given writers.
    pub fn with_output(mut self, stdout: Box<dyn Write>, stderr: Box<dyn Write>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// Abort evaluation with [`Unwind::Deadline`] once `deadline` passes.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Execute a whole program in the module namespace.
    pub fn run(&mut self, source: &str) -> PyResult<()> {
        let program = parser::parse_module(source)?;
        let globals = self.globals.clone();
        self.frames.clear();
        self.push_frame("<module>", 1);
        let result = self.exec_block(&program, &globals);
        let frame = self.frames.pop();
        self.frames.clear();
        match result {
            Ok(_) => Ok(()),
            Err(Unwind::Raise(mut exc)) => {
                if let Some(frame) = frame {
                    exc.traceback.insert(
                        0,
                        TraceFrame {
                            line: frame.line,
                            function: frame.function,
                        },
                    );
                }
                Err(Unwind::Raise(exc))
            }
            Err(other) => Err(other),
        }
    }

    /// Evaluate one expression against the module namespace.
    pub fn eval_expression(&mut self, source: &str) -> PyResult<Value> {
        let expr = parser::parse_expression(source)?;
        let globals = self.globals.clone();
        self.frames.clear();
        self.push_frame("<module>", 1);
        let result = self.eval(&expr, &globals);
        self.frames.clear();
        result
    }

    /// A module-level binding, if present.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    /// Count one unit of work and check the deadline periodically.
    #[inline]
    pub fn tick(&mut self) -> PyResult<()> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % TICK_INTERVAL == 0 {
            self.check_deadline()?;
        }
        Ok(())
    }

    pub fn check_deadline(&self) -> PyResult<()> {
        match self.deadline {
            Some(at) if Instant::now() >= at => Err(Unwind::Deadline),
            _ => Ok(()),
        }
    }

    pub fn write_stdout(&mut self, text: &str) -> PyResult<()> {
        self.stdout.write_all(text.as_bytes()).map_err(|e| {
            PyException::new(ExcKind::RuntimeError, format!("lost output: {}", e)).into()
        })
    }

    /// Emit a warning on the error stream, once per line and message.
    pub fn warn(&mut self, category: &str, message: &str) -> PyResult<()> {
        let line = self.current_line();
        if !self.warned.insert((line, message.to_string())) {
            return Ok(());
        }
        let text = format!("<string>:{}: {}: {}\n", line, category, message);
        self.stderr.write_all(text.as_bytes()).map_err(|e| {
            PyException::new(ExcKind::RuntimeError, format!("lost output: {}", e)).into()
        })
    }

    pub fn check_len(&self, len: usize) -> PyResult<()> {
        if len > self.limits.max_collection_len {
            return exception::raise(
                ExcKind::MemoryError,
                format!(
                    "collection of {} items exceeds the limit of {}",
                    len, self.limits.max_collection_len
                ),
            );
        }
        Ok(())
    }

    /// An empty vector with room for `len` elements. Fails with
    /// `MemoryError` past the collection cap or when the allocator refuses.
    pub fn alloc_vec<T>(&self, len: usize) -> PyResult<Vec<T>> {
        self.check_len(len)?;
        let mut out = Vec::new();
        if out.try_reserve_exact(len).is_err() {
            return exception::raise(
                ExcKind::MemoryError,
                format!("cannot allocate {} items", len),
            );
        }
        Ok(out)
    }

    /// A string buffer with room for `len` bytes; see [`Interpreter::alloc_vec`].
    pub fn alloc_string(&self, len: usize) -> PyResult<String> {
        self.check_str_len(len)?;
        let mut out = String::new();
        if out.try_reserve_exact(len).is_err() {
            return exception::raise(
                ExcKind::MemoryError,
                format!("cannot allocate a string of {} bytes", len),
            );
        }
        Ok(out)
    }

    pub fn check_str_len(&self, len: usize) -> PyResult<()> {
        if len > self.limits.max_string_len {
            return exception::raise(
                ExcKind::MemoryError,
                format!(
                    "string of {} bytes exceeds the limit of {}",
                    len, self.limits.max_string_len
                ),
            );
        }
        Ok(())
    }

    /// Decimal text of an integer, refusing overly long conversions.
    pub fn int_to_string(&self, i: &BigInt) -> PyResult<String> {
        let limit = self.limits.max_str_digits;
        let bits = i.bits();
        let upper = (bits as f64 * std::f64::consts::LOG10_2).floor() as usize + 1;
        if upper <= limit {
            return Ok(i.to_string());
        }
        let lower = (bits.saturating_sub(1) as f64 * std::f64::consts::LOG10_2).floor() as usize + 1;
        if lower > limit {
            return Self::digit_limit_error(limit);
        }
        let text = i.to_string();
        let digits = if i.is_negative() { text.len() - 1 } else { text.len() };
        if digits > limit {
            return Self::digit_limit_error(limit);
        }
        Ok(text)
    }

    fn digit_limit_error<T>(limit: usize) -> PyResult<T> {
        exception::raise(
            ExcKind::ValueError,
            format!(
                "Exceeds the limit ({} digits) for integer string conversion; \
                 use sys.set_int_max_str_digits() to increase the limit",
                limit
            ),
        )
    }

    /// Fail if `value` cannot be turned into text: an integer inside it is
    /// too long, it nests deeper than [`MAX_VALUE_DEPTH`], or its text would
    /// exceed the string limit. A container already on the path prints as
    /// `[...]` and is not walked again.
    pub fn check_printable(&self, value: &Value) -> PyResult<()> {
        let mut walk = PrintWalk::default();
        self.check_printable_at(value, 0, &mut walk)
    }

    fn check_printable_at(&self, value: &Value, depth: usize, walk: &mut PrintWalk) -> PyResult<()> {
        if depth > MAX_VALUE_DEPTH {
            return exception::raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while getting the repr of an object",
            );
        }
        // Every node prints as at least one byte.
        walk.nodes += 1;
        if walk.nodes > self.limits.max_string_len {
            return exception::raise(
                ExcKind::MemoryError,
                format!(
                    "repr of more than {} bytes exceeds the limit",
                    self.limits.max_string_len
                ),
            );
        }
        match value {
            Value::Int(i) => self.check_int_text(i)?,
            Value::Fraction(r) => {
                self.check_int_text(r.numer())?;
                self.check_int_text(r.denom())?;
            }
            Value::List(items) => {
                let id = Rc::as_ptr(items) as *const () as usize;
                if walk.enter(id) {
                    let out = items
                        .borrow()
                        .iter()
                        .try_for_each(|item| self.check_printable_at(item, depth + 1, walk));
                    walk.active.pop();
                    out?;
                }
            }
            Value::Tuple(items) => {
                for item in items.iter() {
                    self.check_printable_at(item, depth + 1, walk)?;
                }
            }
            Value::Dict(d) => {
                let id = Rc::as_ptr(d) as *const () as usize;
                if walk.enter(id) {
                    let out = d.borrow().iter().try_for_each(|(k, v)| {
                        self.check_printable_at(k, depth + 1, walk)?;
                        self.check_printable_at(v, depth + 1, walk)
                    });
                    walk.active.pop();
                    out?;
                }
            }
            Value::Set(s) => {
                for item in s.borrow().iter() {
                    self.check_printable_at(item, depth + 1, walk)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_int_text(&self, i: &BigInt) -> PyResult<()> {
        // Cheap pre-check; small ints never need the full conversion.
        if i.bits() > 14_000 {
            self.int_to_string(i)?;
        }
        Ok(())
    }

    /// `str(value)`, refusing values that cannot be printed.
    pub fn str_of(&self, value: &Value) -> PyResult<String> {
        self.check_printable(value)?;
        Ok(value.to_str())
    }

    /// `repr(value)`, refusing values that cannot be printed.
    pub fn repr_of(&self, value: &Value) -> PyResult<String> {
        self.check_printable(value)?;
        Ok(value.repr())
    }

    fn push_frame(&mut self, function: &str, line: usize) {
        self.frames.push(Frame {
            function: function.to_string(),
            line,
        });
    }

    fn set_line(&mut self, line: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    fn current_line(&self) -> usize {
        self.frames.last().map_or(0, |f| f.line)
    }

    fn register_closure(&mut self, scope: &Rc<Scope>) {
        if scope.kind == scope::ScopeKind::Module {
            return;
        }
        if self.closures.len() >= 1024 && self.closures.len().is_power_of_two() {
            self.closures.retain(|w| w.strong_count() > 0);
        }
        self.closures.push(Rc::downgrade(scope));
    }

    /// Break reference cycles between scopes, closures and containers so
    /// everything the run allocated is freed. Works iteratively, so deeply
    /// nested containers do not recurse on drop.
    pub fn teardown(&mut self) {
        let mut pending: Vec<Value> = self.globals.vars.borrow_mut().drain().map(|(_, v)| v).collect();
        for weak in self.closures.drain(..) {
            if let Some(scope) = weak.upgrade() {
                pending.extend(scope.vars.borrow_mut().drain().map(|(_, v)| v));
            }
        }
        self.handling.clear();
        while let Some(value) = pending.pop() {
            match value {
                Value::List(items) => {
                    let drained: Vec<Value> = match items.try_borrow_mut() {
                        Ok(mut items) => items.drain(..).collect(),
                        Err(_) => Vec::new(),
                    };
                    pending.extend(drained);
                }
                Value::Tuple(items) => {
                    if let Ok(items) = Rc::try_unwrap(items) {
                        pending.extend(items);
                    }
                }
                Value::Dict(d) => {
                    if let Ok(mut d) = d.try_borrow_mut() {
                        for (k, v) in d.iter() {
                            pending.push(k.clone());
                            pending.push(v.clone());
                        }
                        d.clear();
                    }
                }
                Value::Set(s) => {
                    if let Ok(mut s) = s.try_borrow_mut() {
                        pending.extend(s.to_vec());
                        s.clear();
                    }
                }
                Value::Function(f) => {
                    if let Ok(f) = Rc::try_unwrap(f) {
                        pending.extend(f.defaults.into_iter().flatten());
                        if let Some(scope) = f.closure {
                            pending.extend(scope.vars.borrow_mut().drain().map(|(_, v)| v));
                        }
                    }
                }
                Value::Method(m) => {
                    if let Ok(m) = Rc::try_unwrap(m) {
                        pending.push(m.receiver);
                    }
                }
                _ => {}
            }
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> Interpreter {
        Interpreter::new(Limits::default(), builtin_namespace())
    }

    fn run_and_get(src: &str, name: &str) -> Value {
        let mut it = interp();
        it.run(src).unwrap_or_else(|e| match e {
            Unwind::Raise(exc) => panic!("{}", exc.format_traceback(src)),
            Unwind::Deadline => panic!("deadline"),
        });
        it.global(name).expect("name bound")
    }

    fn run_err(src: &str) -> PyException {
        match interp().run(src) {
            Err(Unwind::Raise(exc)) => *exc,
            Err(Unwind::Deadline) => panic!("unexpected deadline"),
            Ok(()) => panic!("expected an exception"),
        }
    }

    #[test]
    fn test_arithmetic_and_assignment() {
        assert_eq!(run_and_get("x = 2 ** 10 + 7 // 2", "x").repr(), "1027");
        assert_eq!(run_and_get("x = 7 / 2", "x").repr(), "3.5");
        assert_eq!(run_and_get("x = -7 % 3", "x").repr(), "2");
    }

    #[test]
    fn test_big_integers() {
        let v = run_and_get("x = 2 ** 100", "x");
        assert_eq!(v.repr(), "1267650600228229401496703205376");
    }

    #[test]
    fn test_functions_closures_and_defaults() {
        let src = "\
def make_counter(start=0):
    count = start
    def inc(step=1):
        nonlocal count
        count += step
        return count
    return inc

c = make_counter(10)
c()
x = c(5)
";
        assert_eq!(run_and_get(src, "x").repr(), "16");
    }

    #[test]
    fn test_recursion_and_limit() {
        let src = "def fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\nx = fib(15)\n";
        assert_eq!(run_and_get(src, "x").repr(), "610");
        let err = run_err("def f(n):\n    return f(n + 1)\nf(0)\n");
        assert_eq!(err.kind, ExcKind::RecursionError);
    }

    #[test]
    fn test_comprehensions_and_unpacking() {
        let src = "a, *b = [i * i for i in range(5) if i != 2]\nd = {k: v for k, v in zip('ab', (1, 2))}\n";
        assert_eq!(run_and_get(src, "a").repr(), "0");
        assert_eq!(run_and_get(src, "b").repr(), "[1, 9, 16]");
        assert_eq!(run_and_get(src, "d").repr(), "{'a': 1, 'b': 2}");
    }

    #[test]
    fn test_try_except_finally() {
        let src = "\
log = []
try:
    1 / 0
except:
    log.append('caught')
finally:
    log.append('done')
";
        assert_eq!(run_and_get(src, "log").repr(), "['caught', 'done']");
    }

    #[test]
    fn test_named_exception_class_is_not_available() {
        let err = run_err("try:\n    1 / 0\nexcept ZeroDivisionError:\n    pass\n");
        assert_eq!(err.kind, ExcKind::NameError);
    }

    #[test]
    fn test_import_is_refused() {
        let err = run_err("import os\n");
        assert_eq!(err.kind, ExcKind::ImportError);
        assert_eq!(err.message, "__import__ not found");
    }

    #[test]
    fn test_unknown_name_and_traceback_frames() {
        let src = "def f():\n    return missing\n\nf()\n";
        let err = run_err(src);
        assert_eq!(err.kind, ExcKind::NameError);
        assert_eq!(err.message, "name 'missing' is not defined");
        let functions: Vec<&str> = err.traceback.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(functions, vec!["<module>", "f"]);
        assert_eq!(err.traceback[0].line, 4);
        assert_eq!(err.traceback[1].line, 2);
    }

    #[test]
    fn test_unbound_local() {
        let err = run_err("x = 1\ndef f():\n    y = x\n    x = 2\nf()\n");
        assert_eq!(err.kind, ExcKind::UnboundLocalError);
    }

    #[test]
    fn test_fstrings_and_format() {
        let src = "n = 3.14159\ns = f'{n:.2f} {n!r} {\"x\":>3}'\nt = '{} and {name}'.format(1, name='two')\n";
        assert_eq!(run_and_get(src, "s").to_str(), "3.14 3.14159   x");
        assert_eq!(run_and_get(src, "t").to_str(), "1 and two");
    }

    #[test]
    fn test_eval_expression_against_namespace() {
        let mut it = interp();
        it.run("x = 1\n").unwrap();
        assert_eq!(it.eval_expression("x + 1").unwrap().repr(), "2");
        assert!(it.eval_expression("x = 2").is_err());
    }

    #[test]
    fn test_deadline_interrupts_loop() {
        let mut it = interp();
        it.set_deadline(Some(Instant::now()));
        match it.run("while True:\n    pass\n") {
            Err(Unwind::Deadline) => {}
            other => panic!("expected deadline, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_deadline_is_not_catchable() {
        let mut it = interp();
        it.set_deadline(Some(Instant::now()));
        let src = "while True:\n    try:\n        pass\n    except:\n        pass\n";
        assert!(matches!(it.run(src), Err(Unwind::Deadline)));
    }

    #[test]
    fn test_int_digit_limit() {
        let err = run_err("s = str(10 ** 5000)\n");
        assert_eq!(err.kind, ExcKind::ValueError);
        assert!(err.message.contains("4300"));
    }

    #[test]
    fn test_deeply_nested_value_does_not_print() {
        let src = "x = []\nfor i in range(5000):\n    x = [x]\n";
        for tail in ["s = str(x)\n", "s = f'{x}'\n", "s = '%s' % (x,)\n", "print(x)\n"] {
            let err = run_err(&format!("{}{}", src, tail));
            assert_eq!(err.kind, ExcKind::RecursionError, "{}", tail);
        }
        let shallow = run_and_get("x = []\nfor i in range(50):\n    x = [x]\ns = str(x)\n", "s");
        assert_eq!(shallow.to_str().len(), 102);
    }

    #[test]
    fn test_self_reference_prints_ellipsis() {
        let s = run_and_get("a = [1]\na.append(a)\nd = {}\nd['me'] = d\ns = str(a) + ' ' + f'{d}'\n", "s");
        assert_eq!(s.to_str(), "[1, [...]] {'me': {...}}");
    }

    #[test]
    fn test_shared_structure_print_is_bounded() {
        let mut limits = Limits::default();
        limits.max_string_len = 10_000;
        let mut it = Interpreter::new(limits, builtin_namespace());
        match it.run("x = [0]\nfor i in range(60):\n    x = [x, x]\ns = str(x)\n") {
            Err(Unwind::Raise(exc)) => assert_eq!(exc.kind, ExcKind::MemoryError),
            _ => panic!("expected MemoryError"),
        }
    }

    #[test]
    fn test_collection_cap() {
        let mut limits = Limits::default();
        limits.max_collection_len = 1000;
        let mut it = Interpreter::new(limits, builtin_namespace());
        match it.run("x = [0] * 5000\n") {
            Err(Unwind::Raise(exc)) => assert_eq!(exc.kind, ExcKind::MemoryError),
            _ => panic!("expected MemoryError"),
        }
    }

    #[test]
    fn test_teardown_breaks_cycles() {
        let mut it = interp();
        it.run("a = []\na.append(a)\ndef f():\n    return f\n").unwrap();
        let a = match it.global("a") {
            Some(Value::List(l)) => Rc::downgrade(&l),
            _ => panic!("expected list"),
        };
        it.teardown();
        assert!(a.upgrade().is_none());
    }
}
