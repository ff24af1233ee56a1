use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{Block, ExprRef};
use crate::runtime::registry::Builtin;
use crate::runtime::scope::Scope;

/// The closed set of runtime values. Lists and dicts are shared mutable
/// cells; assigning one to another variable aliases the same storage.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    Builtin(Rc<Builtin>),
    Function(Rc<Function>),
    Lambda(Rc<Lambda>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    BoundMethod {
        receiver: Rc<Instance>,
        method: Rc<Function>,
    },
}

/// Insertion-ordered map keyed by value equality. Linear probing keeps the
/// key type unrestricted; dict programs in this language stay small.
#[derive(Debug, Default)]
pub struct Dict {
    pub entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.value_eq(key))
            .map(|(_, v)| v.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.iter().any(|(k, _)| k.value_eq(key))
    }

    /// Replaces in place when the key exists, preserving insertion order.
    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k.value_eq(&key)) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A named function carrying the scope it was defined in.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    pub closure: Rc<Scope>,
}

/// A single-expression anonymous function.
#[derive(Debug)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: ExprRef,
    pub closure: Rc<Scope>,
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub methods: FxHashMap<String, Rc<Function>>,
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<FxHashMap<String, Value>>,
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "none",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Builtin(_) => "builtin",
            Value::Function(_) => "function",
            Value::Lambda(_) => "lambda",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::BoundMethod { .. } => "bound method",
        }
    }

    /// Falsy: None, False, 0, empty string, empty list, empty dict.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            _ => true,
        }
    }

    /// Structural equality. Values of different types are unequal rather
    /// than an error; callables compare by identity.
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.value_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.entries
                        .iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| bv.value_eq(v)))
            }
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (
                Value::BoundMethod {
                    receiver: ra,
                    method: ma,
                },
                Value::BoundMethod {
                    receiver: rb,
                    method: mb,
                },
            ) => Rc::ptr_eq(ra, rb) && Rc::ptr_eq(ma, mb),
            _ => false,
        }
    }

    /// Identity for reference types, value equality for primitives.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => self.value_eq(other),
        }
    }

    /// Ordering for `<` and friends. `None` means the pair is not
    /// comparable and the caller should raise.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        unequal => return Some(unequal),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Plain rendering, as `print` and `str` show it.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::List(items) => {
                let parts: Vec<String> =
                    items.borrow().iter().map(|v| v.to_repr()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(dict) => {
                let parts: Vec<String> = dict
                    .borrow()
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_repr(), v.to_repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Builtin(builtin) => format!("<builtin {}>", builtin.name),
            Value::Function(function) => format!("<function {}>", function.name),
            Value::Lambda(_) => "<lambda>".to_string(),
            Value::Class(class) => format!("<class {}>", class.name),
            Value::Instance(instance) => format!("<{} instance>", instance.class.name),
            Value::BoundMethod { method, .. } => {
                format!("<bound method {}>", method.name)
            }
        }
    }

    /// Rendering inside containers: strings keep their quotes.
    pub fn to_repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{s}'"),
            _ => self.to_display(),
        }
    }
}

/// Whole numbers print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_of_each_type() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(!Value::list(Vec::new()).is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::list(vec![Value::Null]).is_truthy());
    }

    #[test]
    fn cross_type_equality_is_false_not_an_error() {
        assert!(!Value::Number(0.0).value_eq(&Value::Bool(false)));
        assert!(!Value::string("1").value_eq(&Value::Number(1.0)));
        assert!(!Value::Null.value_eq(&Value::Bool(false)));
    }

    #[test]
    fn lists_compare_elementwise() {
        let a = Value::list(vec![Value::Number(1.0), Value::Number(2.0)]);
        let b = Value::list(vec![Value::Number(1.0), Value::Number(2.0)]);
        let c = Value::list(vec![Value::Number(1.0), Value::Number(3.0)]);
        assert!(a.value_eq(&b));
        assert_eq!(a.compare(&c), Some(Ordering::Less));
        assert!(!a.is_same(&b));
        assert!(a.is_same(&a.clone()));
    }

    #[test]
    fn dict_insert_replaces_in_place() {
        let mut dict = Dict::new();
        dict.insert(Value::string("a"), Value::Number(1.0));
        dict.insert(Value::string("b"), Value::Number(2.0));
        dict.insert(Value::string("a"), Value::Number(3.0));
        assert_eq!(dict.len(), 2);
        assert!(dict
            .get(&Value::string("a"))
            .is_some_and(|v| v.value_eq(&Value::Number(3.0))));
        assert!(dict.keys()[0].value_eq(&Value::string("a")));
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(Value::Number(3.0).to_display(), "3");
        assert_eq!(Value::Number(-0.5).to_display(), "-0.5");
        assert_eq!(Value::Number(2.5).to_display(), "2.5");
    }

    #[test]
    fn containers_render_python_style() {
        let list = Value::list(vec![Value::string("a"), Value::Number(1.0), Value::Null]);
        assert_eq!(list.to_display(), "['a', 1, None]");
        let mut dict = Dict::new();
        dict.insert(Value::string("k"), Value::Bool(true));
        let dict = Value::Dict(Rc::new(RefCell::new(dict)));
        assert_eq!(dict.to_display(), "{'k': True}");
    }
}
