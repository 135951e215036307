//! Lexical scopes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::ast::FunctionDef;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Comprehension,
}

/// Variable bindings of one module, call, or comprehension.
#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub vars: RefCell<HashMap<String, Value>>,
    pub parent: Option<Rc<Scope>>,
    /// The function whose call created this scope.
    pub def: Option<Rc<FunctionDef>>,
    pub globals_declared: RefCell<HashSet<String>>,
    pub nonlocals_declared: RefCell<HashSet<String>>,
}

impl Scope {
    pub fn new(kind: ScopeKind, parent: Option<Rc<Scope>>) -> Rc<Scope> {
        Rc::new(Scope {
            kind,
            vars: RefCell::new(HashMap::new()),
            parent,
            def: None,
            globals_declared: RefCell::new(HashSet::new()),
            nonlocals_declared: RefCell::new(HashSet::new()),
        })
    }

    pub fn function(def: Rc<FunctionDef>, parent: Option<Rc<Scope>>) -> Rc<Scope> {
        Rc::new(Scope {
            kind: ScopeKind::Function,
            vars: RefCell::new(HashMap::new()),
            parent,
            def: Some(def),
            globals_declared: RefCell::new(HashSet::new()),
            nonlocals_declared: RefCell::new(HashSet::new()),
        })
    }

    /// True when `name` is assigned somewhere in this function's body.
    pub fn is_static_local(&self, name: &str) -> bool {
        self.def.as_ref().map_or(false, |d| d.locals.contains(name))
    }

    pub fn module(vars: HashMap<String, Value>) -> Rc<Scope> {
        let scope = Scope::new(ScopeKind::Module, None);
        *scope.vars.borrow_mut() = vars;
        scope
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    /// Search this scope and its enclosing scopes, innermost first.
    pub fn lookup_chain(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.get(name) {
            return Some(v);
        }
        let mut next = self.parent.as_ref();
        while let Some(scope) = next {
            if let Some(v) = scope.get(name) {
                return Some(v);
            }
            next = scope.parent.as_ref();
        }
        None
    }

    /// Nearest enclosing function scope that binds `name`, for `nonlocal`.
    pub fn find_enclosing_binding(&self, name: &str) -> Option<Rc<Scope>> {
        let mut next = self.parent.as_ref();
        while let Some(scope) = next {
            if scope.kind != ScopeKind::Module && scope.contains(name) {
                return Some(scope.clone());
            }
            next = scope.parent.as_ref();
        }
        None
    }

    /// Drop every binding. Closures capture their scope, so a scope that
    /// holds a function referring back to it forms a cycle; clearing at the
    /// end of a run breaks those cycles.
    pub fn clear(&self) {
        let drained: Vec<Value> = self.vars.borrow_mut().drain().map(|(_, v)| v).collect();
        drop(drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_parents() {
        let outer = Scope::new(ScopeKind::Function, None);
        outer.set("x", Value::int(1));
        let inner = Scope::new(ScopeKind::Function, Some(outer.clone()));
        inner.set("y", Value::int(2));
        assert!(inner.lookup_chain("x").is_some());
        assert!(inner.lookup_chain("y").is_some());
        assert!(outer.lookup_chain("y").is_none());
        assert!(Rc::ptr_eq(&inner.find_enclosing_binding("x").unwrap(), &outer));
    }
}
