use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::runtime::value::Value;

/// A lexical scope. Scopes form a parent chain; closures keep their defining
/// scope alive through the `Rc`.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<FxHashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn global() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(FxHashMap::default()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Walks the chain outward and clones the first binding found.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Binds in this scope only, shadowing any outer binding.
    pub fn set_local(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_reads_through_to_parent() {
        let global = Scope::global();
        global.set_local("x", Value::Number(1.0));
        let inner = Scope::child(&global);
        assert!(inner.get("x").is_some());
        assert!(inner.get("y").is_none());
    }

    #[test]
    fn local_write_shadows_without_touching_parent() {
        let global = Scope::global();
        global.set_local("x", Value::Number(1.0));
        let inner = Scope::child(&global);
        inner.set_local("x", Value::Number(2.0));
        assert!(inner
            .get("x")
            .is_some_and(|v| v.value_eq(&Value::Number(2.0))));
        assert!(global
            .get("x")
            .is_some_and(|v| v.value_eq(&Value::Number(1.0))));
    }
}
