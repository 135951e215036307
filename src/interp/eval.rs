//! Statement execution and expression evaluation.

use std::cell::RefCell;
use std::rc::Rc;

use super::ast::{
    Arg, BinOp, BoolOpKind, Comprehension, ExceptHandler, Expr, FStrPart, FunctionBody,
    FunctionDef, ParamKind, Stmt, StmtKind,
};
use super::exception::{raise, ExcKind, PyException, PyResult, TraceFrame, Unwind};
use super::ops::{self, Index, SliceSpec};
use super::scope::{Scope, ScopeKind};
use super::value::{BoundMethod, CallArgs, Dict, Function, RangeValue, Set, Value};
use super::{builtins, format, methods, Interpreter};

/// How a block finished.
pub(crate) enum Flow {
    Next,
    Break,
    Continue,
    Return(Value),
}

/// Iteration over any iterable value. Lists are read live, so appending
/// while iterating behaves as it does in Python.
pub(crate) enum ValueIter {
    Range { range: RangeValue, index: usize, len: usize },
    List { items: Rc<RefCell<Vec<Value>>>, index: usize },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range { range, index, len } => {
                if *index >= *len {
                    return None;
                }
                let v = range.get(*index);
                *index += 1;
                Some(Value::int(v))
            }
            ValueIter::List { items, index } => {
                let v = items.borrow().get(*index).cloned();
                *index += 1;
                v
            }
            ValueIter::Items(it) => it.next(),
        }
    }
}

impl Interpreter {
    // ----- iteration -----------------------------------------------------

    pub(crate) fn iterate(&mut self, value: &Value) -> PyResult<ValueIter> {
        Ok(match value {
            Value::Range(r) => ValueIter::Range {
                range: *r,
                index: 0,
                len: r.len(),
            },
            Value::List(items) => ValueIter::List {
                items: items.clone(),
                index: 0,
            },
            Value::Tuple(items) => ValueIter::Items(items.to_vec().into_iter()),
            Value::Str(s) => ValueIter::Items(
                s.chars()
                    .map(|c| Value::string(c.to_string()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::Dict(d) => ValueIter::Items(d.borrow().keys().into_iter()),
            Value::Set(s) => ValueIter::Items(s.borrow().to_vec().into_iter()),
            Value::Array(a) => ValueIter::Items(a.borrow().iter_first_axis()?.into_iter()),
            other => {
                return raise(
                    ExcKind::TypeError,
                    format!("'{}' object is not iterable", other.type_name()),
                )
            }
        })
    }

    /// Materialize an iterable into a vector, subject to the length cap.
    pub(crate) fn collect(&mut self, value: &Value) -> PyResult<Vec<Value>> {
        let mut out = match value {
            Value::List(items) => return Ok(items.borrow().clone()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            Value::Range(r) => self.alloc_vec(r.len())?,
            _ => Vec::new(),
        };
        for item in self.iterate(value)? {
            self.tick()?;
            out.push(item);
        }
        self.check_len(out.len())?;
        Ok(out)
    }

    // ----- statements ----------------------------------------------------

    pub(crate) fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> PyResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, scope)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> PyResult<Flow> {
        self.set_line(stmt.line);
        self.tick()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let v = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, v.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.exec_aug_assign(target, *op, value, scope)?
            }
            StmtKind::AnnAssign { target, value } => {
                if let Some(value) = value {
                    let v = self.eval(value, scope)?;
                    self.assign(target, v, scope)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, scope)?.truthy()? {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch, scope);
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    self.tick()?;
                    if !self.eval(test, scope)?.truthy()? {
                        return self.exec_block(orelse, scope);
                    }
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                let items = self.iterate(&iterable)?;
                for item in items {
                    self.tick()?;
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Next),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::FunctionDef(def) => {
                let f = self.make_function(def, scope)?;
                self.store_name(scope, &def.name, f)?;
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, scope),
            StmtKind::Raise { exc, cause } => return self.exec_raise(exc.as_ref(), cause.as_ref(), scope),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, scope)?.truthy()? {
                    let message = match msg {
                        Some(m) => {
                            let v = self.eval(m, scope)?;
                            self.str_of(&v)?
                        }
                        None => String::new(),
                    };
                    return raise(ExcKind::AssertionError, message);
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Global(names) => {
                if scope.kind == ScopeKind::Function {
                    let mut declared = scope.globals_declared.borrow_mut();
                    for name in names {
                        declared.insert(name.clone());
                    }
                }
            }
            StmtKind::Nonlocal(names) => {
                for name in names {
                    if scope.find_enclosing_binding(name).is_none() {
                        return raise(
                            ExcKind::SyntaxError,
                            format!("no binding for nonlocal '{}' found", name),
                        );
                    }
                    scope.nonlocals_declared.borrow_mut().insert(name.clone());
                }
            }
            StmtKind::Import(_) => return raise(ExcKind::ImportError, "__import__ not found"),
        }
        Ok(Flow::Next)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Rc<Scope>,
    ) -> PyResult<Flow> {
        let outcome = match self.exec_block(body, scope) {
            Err(Unwind::Raise(exc)) if !handlers.is_empty() => {
                self.handle_exception(*exc, handlers, scope)
            }
            Ok(Flow::Next) => self.exec_block(orelse, scope),
            other => other,
        };
        if finalbody.is_empty() || matches!(outcome, Err(Unwind::Deadline)) {
            return outcome;
        }
        match self.exec_block(finalbody, scope)? {
            Flow::Next => outcome,
            flow => Ok(flow),
        }
    }

    fn handle_exception(
        &mut self,
        exc: PyException,
        handlers: &[ExceptHandler],
        scope: &Rc<Scope>,
    ) -> PyResult<Flow> {
        let handler = match handlers.first() {
            Some(h) => h,
            None => return Err(exc.into()),
        };
        self.set_line(handler.line);
        if let Some(kind) = &handler.kind {
            // Exception classes are not part of the namespace, so the clause
            // either fails to resolve or names something that is not one.
            let named = self.eval(kind, scope)?;
            return raise(
                ExcKind::TypeError,
                format!(
                    "catching classes that do not inherit from BaseException is not allowed (got '{}')",
                    named.type_name()
                ),
            );
        }
        self.handling.push(exc);
        let result = self.exec_block(&handler.body, scope);
        self.handling.pop();
        result
    }

    fn exec_raise(
        &mut self,
        exc: Option<&Expr>,
        cause: Option<&Expr>,
        scope: &Rc<Scope>,
    ) -> PyResult<Flow> {
        let exc = match exc {
            Some(e) => e,
            None => {
                return match self.handling.last() {
                    Some(active) => {
                        let mut again = active.clone();
                        again.traceback.clear();
                        Err(again.into())
                    }
                    None => raise(ExcKind::RuntimeError, "No active exception to reraise"),
                }
            }
        };
        self.eval(exc, scope)?;
        if let Some(cause) = cause {
            self.eval(cause, scope)?;
        }
        raise(ExcKind::TypeError, "exceptions must derive from BaseException")
    }

    fn exec_aug_assign(
        &mut self,
        target: &Expr,
        op: BinOp,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> PyResult<()> {
        match target {
            Expr::Name(name) => {
                let current = self.load_name(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = ops::inplace_op(self, op, &current, &rhs)?;
                self.store_name(scope, name, updated)
            }
            Expr::Subscript { value: obj, index } => {
                let container = self.eval(obj, scope)?;
                let index = self.eval_index(index, scope)?;
                let current = ops::get_item(self, &container, index.clone())?;
                let rhs = self.eval(value, scope)?;
                let updated = ops::inplace_op(self, op, &current, &rhs)?;
                ops::set_item(self, &container, index, updated)
            }
            Expr::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, scope)?;
                read_only_attribute(&obj, attr)
            }
            _ => raise(
                ExcKind::SyntaxError,
                "illegal expression for augmented assignment",
            ),
        }
    }

    fn delete(&mut self, target: &Expr, scope: &Rc<Scope>) -> PyResult<()> {
        match target {
            Expr::Name(name) => {
                let global = scope.kind == ScopeKind::Module
                    || scope.globals_declared.borrow().contains(name);
                let removed = if global {
                    self.globals.remove(name)
                } else {
                    scope.remove(name)
                };
                match removed {
                    Some(_) => Ok(()),
                    None => raise(
                        ExcKind::NameError,
                        format!("name '{}' is not defined", name),
                    ),
                }
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value, scope)?;
                let index = self.eval_index(index, scope)?;
                ops::del_item(self, &container, index)
            }
            Expr::Attribute { value, attr } => {
                let obj = self.eval(value, scope)?;
                read_only_attribute(&obj, attr)
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete(item, scope)?;
                }
                Ok(())
            }
            _ => raise(ExcKind::SyntaxError, "cannot delete expression"),
        }
    }

    // ----- names ---------------------------------------------------------

    pub(crate) fn load_name(&mut self, name: &str, scope: &Rc<Scope>) -> PyResult<Value> {
        let mut current = Some(scope);
        let mut innermost_function = true;
        while let Some(s) = current {
            match s.kind {
                ScopeKind::Module => break,
                ScopeKind::Comprehension => {
                    if let Some(v) = s.get(name) {
                        return Ok(v);
                    }
                }
                ScopeKind::Function => {
                    if s.globals_declared.borrow().contains(name) {
                        break;
                    }
                    if let Some(v) = s.get(name) {
                        return Ok(v);
                    }
                    if innermost_function
                        && s.is_static_local(name)
                        && !s.nonlocals_declared.borrow().contains(name)
                    {
                        return raise(
                            ExcKind::UnboundLocalError,
                            format!(
                                "cannot access local variable '{}' where it is not associated with a value",
                                name
                            ),
                        );
                    }
                    innermost_function = false;
                }
            }
            current = s.parent.as_ref();
        }
        match self.globals.get(name) {
            Some(v) => Ok(v),
            None => raise(
                ExcKind::NameError,
                format!("name '{}' is not defined", name),
            ),
        }
    }

    pub(crate) fn store_name(&mut self, scope: &Rc<Scope>, name: &str, value: Value) -> PyResult<()> {
        if scope.kind == ScopeKind::Function {
            if scope.globals_declared.borrow().contains(name) {
                self.globals.set(name, value);
                return Ok(());
            }
            if scope.nonlocals_declared.borrow().contains(name) {
                if let Some(target) = scope.find_enclosing_binding(name) {
                    target.set(name, value);
                    return Ok(());
                }
            }
        }
        scope.set(name, value);
        Ok(())
    }

    /// `:=` binds in the nearest enclosing scope that is not a comprehension.
    fn store_walrus(&mut self, scope: &Rc<Scope>, name: &str, value: Value) -> PyResult<()> {
        let mut target = scope.clone();
        while target.kind == ScopeKind::Comprehension {
            target = match &target.parent {
                Some(parent) => parent.clone(),
                None => self.globals.clone(),
            };
        }
        self.store_name(&target, name, value)
    }

    pub(crate) fn assign(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> PyResult<()> {
        match target {
            Expr::Name(name) => self.store_name(scope, name, value),
            Expr::Subscript { value: obj, index } => {
                let container = self.eval(obj, scope)?;
                let index = self.eval_index(index, scope)?;
                ops::set_item(self, &container, index, value)
            }
            Expr::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, scope)?;
                read_only_attribute(&obj, attr)
            }
            Expr::Tuple(items) | Expr::List(items) => self.unpack(items, value, scope),
            _ => raise(ExcKind::SyntaxError, "cannot assign to expression"),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value, scope: &Rc<Scope>) -> PyResult<()> {
        let mut values = self.collect(&value)?;
        let star = targets.iter().position(|t| matches!(t, Expr::Starred(_)));
        match star {
            None => {
                if values.len() < targets.len() {
                    return raise(
                        ExcKind::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            values.len()
                        ),
                    );
                }
                if values.len() > targets.len() {
                    return raise(
                        ExcKind::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    );
                }
                for (target, v) in targets.iter().zip(values) {
                    self.assign(target, v, scope)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if values.len() < targets.len() - 1 {
                    return raise(
                        ExcKind::ValueError,
                        format!(
                            "not enough values to unpack (expected at least {}, got {})",
                            targets.len() - 1,
                            values.len()
                        ),
                    );
                }
                let tail = values.split_off(values.len() - after);
                let middle = values.split_off(star);
                for (target, v) in targets[..star].iter().zip(values) {
                    self.assign(target, v, scope)?;
                }
                if let Expr::Starred(inner) = &targets[star] {
                    self.assign(inner, Value::list(middle), scope)?;
                }
                for (target, v) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, v, scope)?;
                }
            }
        }
        Ok(())
    }

    // ----- expressions ---------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> PyResult<Value> {
        match expr {
            Expr::Name(name) => self.load_name(name, scope),
            Expr::Constant(v) => Ok(v.clone()),
            Expr::FString(parts) => Ok(Value::string(self.eval_fstring(parts, scope)?)),
            Expr::List(items) => Ok(Value::list(self.eval_items(items, scope)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_items(items, scope)?)),
            Expr::Set(items) => {
                let values = self.eval_items(items, scope)?;
                Ok(Value::set(Set::from_values(values)?))
            }
            Expr::Dict(entries) => self.eval_dict(entries, scope),
            Expr::Starred(_) => raise(
                ExcKind::SyntaxError,
                "can't use starred expression here",
            ),
            Expr::BinOp { left, op, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                ops::binary_op(self, *op, &l, &r)
            }
            Expr::UnaryOp { op, operand } => {
                let v = self.eval(operand, scope)?;
                ops::unary_op(self, *op, &v)
            }
            Expr::BoolOp { op, values } => {
                let mut last = Value::None;
                for e in values {
                    last = self.eval(e, scope)?;
                    let truth = last.truthy()?;
                    match op {
                        BoolOpKind::And if !truth => return Ok(last),
                        BoolOpKind::Or if truth => return Ok(last),
                        _ => {}
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops: cmp_ops,
                comparators,
            } => {
                let mut l = self.eval(left, scope)?;
                let mut result = Value::Bool(true);
                let chained = cmp_ops.len() > 1;
                for (op, c) in cmp_ops.iter().zip(comparators) {
                    let r = self.eval(c, scope)?;
                    result = ops::compare(self, *op, &l, &r)?;
                    if chained && !result.truthy()? {
                        return Ok(result);
                    }
                    l = r;
                }
                Ok(result)
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test, scope)?.truthy()? {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Call { func, args } => {
                let callee = self.eval(func, scope)?;
                let args = self.eval_args(args, scope)?;
                self.call(&callee, args)
            }
            Expr::Attribute { value, attr } => {
                let v = self.eval(value, scope)?;
                self.get_attribute(&v, attr)
            }
            Expr::Subscript { value, index } => {
                let v = self.eval(value, scope)?;
                let index = self.eval_index(index, scope)?;
                ops::get_item(self, &v, index)
            }
            Expr::Slice { .. } => raise(ExcKind::SyntaxError, "slice outside of a subscript"),
            Expr::Lambda(def) => self.make_function(def, scope),
            Expr::ListComp { elt, generators } | Expr::GeneratorExp { elt, generators } => {
                let comp = Scope::new(ScopeKind::Comprehension, Some(scope.clone()));
                let mut out = Vec::new();
                self.run_comprehension(generators, 0, &comp, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    let v = interp.eval(elt, s)?;
                    out.push(v);
                    interp.check_len(out.len())
                })?;
                Ok(Value::list(out))
            }
            Expr::SetComp { elt, generators } => {
                let comp = Scope::new(ScopeKind::Comprehension, Some(scope.clone()));
                let mut out = Set::new();
                self.run_comprehension(generators, 0, &comp, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    let v = interp.eval(elt, s)?;
                    out.add(v)?;
                    interp.check_len(out.len())
                })?;
                Ok(Value::set(out))
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let comp = Scope::new(ScopeKind::Comprehension, Some(scope.clone()));
                let mut out = Dict::new();
                self.run_comprehension(generators, 0, &comp, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
                    let k = interp.eval(key, s)?;
                    let v = interp.eval(value, s)?;
                    out.insert(k, v)?;
                    interp.check_len(out.len())
                })?;
                Ok(Value::dict(out))
            }
            Expr::NamedExpr { name, value } => {
                let v = self.eval(value, scope)?;
                self.store_walrus(scope, name, v.clone())?;
                Ok(v)
            }
        }
    }

    fn run_comprehension(
        &mut self,
        generators: &[Comprehension],
        level: usize,
        scope: &Rc<Scope>,
        emit: &mut dyn FnMut(&mut Interpreter, &Rc<Scope>) -> PyResult<()>,
    ) -> PyResult<()> {
        let generator = match generators.get(level) {
            Some(g) => g,
            None => return emit(self, scope),
        };
        let iterable = self.eval(&generator.iter, scope)?;
        let items = self.iterate(&iterable)?;
        'items: for item in items {
            self.tick()?;
            self.assign(&generator.target, item, scope)?;
            for cond in &generator.ifs {
                if !self.eval(cond, scope)?.truthy()? {
                    continue 'items;
                }
            }
            self.run_comprehension(generators, level + 1, scope, emit)?;
        }
        Ok(())
    }

    fn eval_items(&mut self, items: &[Expr], scope: &Rc<Scope>) -> PyResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Expr::Starred(inner) = item {
                let v = self.eval(inner, scope)?;
                out.extend(self.collect(&v)?);
            } else {
                out.push(self.eval(item, scope)?);
            }
        }
        self.check_len(out.len())?;
        Ok(out)
    }

    fn eval_dict(&mut self, entries: &[(Option<Expr>, Expr)], scope: &Rc<Scope>) -> PyResult<Value> {
        let mut out = Dict::new();
        for (key, value) in entries {
            match key {
                Some(key) => {
                    let k = self.eval(key, scope)?;
                    let v = self.eval(value, scope)?;
                    out.insert(k, v)?;
                }
                None => match self.eval(value, scope)? {
                    Value::Dict(d) => {
                        for (k, v) in d.borrow().iter() {
                            out.insert(k.clone(), v.clone())?;
                        }
                    }
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!("'{}' object is not a mapping", other.type_name()),
                        )
                    }
                },
            }
        }
        Ok(Value::dict(out))
    }

    fn eval_fstring(&mut self, parts: &[FStrPart], scope: &Rc<Scope>) -> PyResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStrPart::Lit(text) => out.push_str(text),
                FStrPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let v = self.eval(expr, scope)?;
                    let v = match conversion {
                        Some('r') | Some('a') => Value::string(self.repr_of(&v)?),
                        Some('s') => Value::string(self.str_of(&v)?),
                        _ => v,
                    };
                    let spec = self.eval_fstring(spec, scope)?;
                    let text = self.format_value(&v, &spec)?;
                    out.push_str(&text);
                }
            }
            self.check_str_len(out.len())?;
        }
        Ok(out)
    }

    /// `format(value, spec)`.
    pub(crate) fn format_value(&mut self, value: &Value, spec: &str) -> PyResult<String> {
        if spec.is_empty() {
            return self.str_of(value);
        }
        self.check_printable(value)?;
        format::format_value(value, spec)
    }

    fn eval_args(&mut self, args: &[Arg], scope: &Rc<Scope>) -> PyResult<CallArgs> {
        let mut out = CallArgs::default();
        for arg in args {
            match arg {
                Arg::Positional(e) => {
                    let v = self.eval(e, scope)?;
                    out.positional.push(v);
                }
                Arg::Starred(e) => {
                    let v = self.eval(e, scope)?;
                    let items = self.collect(&v)?;
                    out.positional.extend(items);
                }
                Arg::Keyword(name, e) => {
                    if out.keywords.iter().any(|(k, _)| k == name) {
                        return raise(
                            ExcKind::SyntaxError,
                            format!("keyword argument repeated: {}", name),
                        );
                    }
                    let v = self.eval(e, scope)?;
                    out.keywords.push((name.clone(), v));
                }
                Arg::DoubleStarred(e) => match self.eval(e, scope)? {
                    Value::Dict(d) => {
                        for (k, v) in d.borrow().iter() {
                            let key = match k.as_str() {
                                Some(s) => s.to_string(),
                                None => {
                                    return raise(ExcKind::TypeError, "keywords must be strings")
                                }
                            };
                            if out.keywords.iter().any(|(existing, _)| *existing == key) {
                                return raise(
                                    ExcKind::TypeError,
                                    format!("got multiple values for keyword argument '{}'", key),
                                );
                            }
                            out.keywords.push((key, v.clone()));
                        }
                    }
                    other => {
                        return raise(
                            ExcKind::TypeError,
                            format!(
                                "argument after ** must be a mapping, not {}",
                                other.type_name()
                            ),
                        )
                    }
                },
            }
        }
        Ok(out)
    }

    fn eval_index(&mut self, index: &Expr, scope: &Rc<Scope>) -> PyResult<Index> {
        match index {
            Expr::Slice { lower, upper, step } => Ok(Index::Slice(SliceSpec {
                start: self.eval_bound(lower.as_deref(), scope)?,
                stop: self.eval_bound(upper.as_deref(), scope)?,
                step: self.eval_bound(step.as_deref(), scope)?,
            })),
            Expr::Tuple(items) if items.iter().any(|i| matches!(i, Expr::Slice { .. })) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(self.eval_index(item, scope)?);
                }
                Ok(Index::Multi(parts))
            }
            other => Ok(Index::Value(self.eval(other, scope)?)),
        }
    }

    fn eval_bound(&mut self, bound: Option<&Expr>, scope: &Rc<Scope>) -> PyResult<Option<i64>> {
        let expr = match bound {
            Some(e) => e,
            None => return Ok(None),
        };
        match self.eval(expr, scope)? {
            Value::None => Ok(None),
            v => match v.as_index() {
                Ok(n) => Ok(Some(n)),
                Err(Unwind::Raise(exc)) if exc.kind == ExcKind::TypeError => raise(
                    ExcKind::TypeError,
                    "slice indices must be integers or None",
                ),
                Err(other) => Err(other),
            },
        }
    }

    // ----- calls ---------------------------------------------------------

    /// Call any callable value.
    pub(crate) fn call(&mut self, callee: &Value, args: CallArgs) -> PyResult<Value> {
        self.tick()?;
        match callee {
            Value::Builtin(b) => (b.func)(self, args),
            Value::Function(f) => {
                let f = f.clone();
                self.call_function(&f, args)
            }
            Value::Method(m) => {
                let m = m.clone();
                methods::call_method(self, &m.receiver, &m.name, args)
            }
            Value::Type(kind) => builtins::construct(self, *kind, args),
            other => raise(
                ExcKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            ),
        }
    }

    pub(crate) fn call1(&mut self, callee: &Value, arg: Value) -> PyResult<Value> {
        self.call(callee, CallArgs::new(vec![arg]))
    }

    fn call_function(&mut self, func: &Rc<Function>, args: CallArgs) -> PyResult<Value> {
        if self.frames.len() > self.limits.recursion_limit {
            return raise(ExcKind::RecursionError, "maximum recursion depth exceeded");
        }
        let def = func.def.clone();
        let local = Scope::function(def.clone(), func.closure.clone());
        self.bind_arguments(func, args, &local)?;
        self.push_frame(&def.name, def.line);
        let result = match &def.body {
            FunctionBody::Block(body) => self.exec_block(body, &local).map(|flow| match flow {
                Flow::Return(v) => v,
                _ => Value::None,
            }),
            FunctionBody::Lambda(expr) => self.eval(expr, &local),
        };
        let frame = self.frames.pop();
        match result {
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
            other => other,
        }
    }

    fn bind_arguments(&mut self, func: &Function, args: CallArgs, local: &Rc<Scope>) -> PyResult<()> {
        let def = &func.def;
        let name = &def.name;
        let CallArgs {
            positional,
            keywords,
        } = args;
        let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
        let positional_slots: Vec<usize> = def
            .params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == ParamKind::Positional)
            .map(|(i, _)| i)
            .collect();
        let has_varargs = def.params.iter().any(|p| p.kind == ParamKind::VarArgs);
        let has_varkw = def.params.iter().any(|p| p.kind == ParamKind::VarKeywords);

        let mut extra = Vec::new();
        for (i, v) in positional.into_iter().enumerate() {
            match positional_slots.get(i) {
                Some(&slot) => slots[slot] = Some(v),
                None => extra.push(v),
            }
        }
        if !extra.is_empty() && !has_varargs {
            let takes = positional_slots.len();
            let given = takes + extra.len();
            return raise(
                ExcKind::TypeError,
                format!(
                    "{}() takes {} positional argument{} but {} {} given",
                    name,
                    takes,
                    if takes == 1 { "" } else { "s" },
                    given,
                    if given == 1 { "was" } else { "were" }
                ),
            );
        }

        let mut kwargs = Dict::new();
        for (key, v) in keywords {
            let slot = def.params.iter().position(|p| {
                p.name == key && matches!(p.kind, ParamKind::Positional | ParamKind::KeywordOnly)
            });
            match slot {
                Some(i) if slots[i].is_some() => {
                    return raise(
                        ExcKind::TypeError,
                        format!("{}() got multiple values for argument '{}'", name, key),
                    )
                }
                Some(i) => slots[i] = Some(v),
                None if has_varkw => kwargs.insert(Value::string(key), v)?,
                None => {
                    return raise(
                        ExcKind::TypeError,
                        format!("{}() got an unexpected keyword argument '{}'", name, key),
                    )
                }
            }
        }

        let mut missing_positional = Vec::new();
        let mut missing_keyword = Vec::new();
        for (i, param) in def.params.iter().enumerate() {
            match param.kind {
                ParamKind::VarArgs => slots[i] = Some(Value::tuple(std::mem::take(&mut extra))),
                ParamKind::VarKeywords => slots[i] = Some(Value::dict(std::mem::take(&mut kwargs))),
                ParamKind::Positional | ParamKind::KeywordOnly if slots[i].is_none() => {
                    match &func.defaults[i] {
                        Some(default) => slots[i] = Some(default.clone()),
                        None if param.kind == ParamKind::Positional => {
                            missing_positional.push(param.name.as_str())
                        }
                        None => missing_keyword.push(param.name.as_str()),
                    }
                }
                _ => {}
            }
        }
        for (missing, what) in [
            (&missing_positional, "positional"),
            (&missing_keyword, "keyword-only"),
        ] {
            if !missing.is_empty() {
                return raise(
                    ExcKind::TypeError,
                    format!(
                        "{}() missing {} required {} argument{}: {}",
                        name,
                        missing.len(),
                        what,
                        if missing.len() == 1 { "" } else { "s" },
                        join_names(missing)
                    ),
                );
            }
        }

        for (param, value) in def.params.iter().zip(slots) {
            local.set(&param.name, value.unwrap_or(Value::None));
        }
        Ok(())
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> PyResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(e) => Some(self.eval(e, scope)?),
                None => None,
            });
        }
        self.register_closure(scope);
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            closure: Some(scope.clone()),
        })))
    }

    pub(crate) fn get_attribute(&mut self, value: &Value, attr: &str) -> PyResult<Value> {
        if let Value::Module(m) = value {
            return match m.attrs.get(attr) {
                Some(v) => Ok(v.clone()),
                None => raise(
                    ExcKind::AttributeError,
                    format!("module '{}' has no attribute '{}'", m.name, attr),
                ),
            };
        }
        if let Some(v) = methods::attribute(self, value, attr)? {
            return Ok(v);
        }
        if methods::has_method(value, attr) {
            return Ok(Value::Method(Rc::new(BoundMethod {
                receiver: value.clone(),
                name: attr.to_string(),
            })));
        }
        raise(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{}'", value.type_name(), attr),
        )
    }
}

fn read_only_attribute(obj: &Value, attr: &str) -> PyResult<()> {
    raise(
        ExcKind::AttributeError,
        format!(
            "'{}' object attribute '{}' is read-only",
            obj.type_name(),
            attr
        ),
    )
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`.
fn join_names(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    match quoted.len() {
        0 => String::new(),
        1 => quoted[0].clone(),
        2 => format!("{} and {}", quoted[0], quoted[1]),
        n => format!("{}, and {}", quoted[..n - 1].join(", "), quoted[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_names() {
        assert_eq!(join_names(&["a"]), "'a'");
        assert_eq!(join_names(&["a", "b"]), "'a' and 'b'");
        assert_eq!(join_names(&["a", "b", "c"]), "'a', 'b', and 'c'");
    }

    #[test]
    fn test_range_iteration() {
        let r = RangeValue {
            start: 10,
            stop: 0,
            step: -3,
        };
        let it = ValueIter::Range {
            range: r,
            index: 0,
            len: r.len(),
        };
        let got: Vec<String> = it.map(|v| v.repr()).collect();
        assert_eq!(got, vec!["10", "7", "4", "1"]);
    }
}
