use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::runtime::value::{Dict, Value};

/// Receives each line `print` emits. The host owns the sink; the core never
/// buffers or formats a console itself.
pub type OutputSink = Rc<RefCell<dyn FnMut(String)>>;

/// What the host must wait for before resuming a suspended execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Wait {
    /// Resume after this many seconds of host time.
    Time(f64),
    /// Resume when the named external action completes.
    Action(String),
}

/// Result of a native builtin call: either a plain value, or a suspension
/// carrying the value the call site receives once the wait is honored.
pub enum Outcome {
    Value(Value),
    Wait { wait: Wait, result: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Between(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn check(self, found: usize) -> bool {
        match self {
            Arity::Exact(n) => found == n,
            Arity::Between(lo, hi) => found >= lo && found <= hi,
            Arity::AtLeast(n) => found >= n,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Arity::Exact(n) => n.to_string(),
            Arity::Between(lo, hi) => format!("between {lo} and {hi}"),
            Arity::AtLeast(n) => format!("at least {n}"),
        }
    }
}

pub type NativeFn = Box<dyn Fn(&[Value]) -> Result<Outcome, String>>;

/// Implementation of a builtin. `sorted` is special: its optional key
/// callable may be user code, so the evaluator drives it step by step
/// instead of calling back into a native function.
pub enum BuiltinImpl {
    Native(NativeFn),
    Sort,
}

pub struct Builtin {
    pub name: String,
    pub arity: Arity,
    /// Whether a call may return `Outcome::Wait`. Purely descriptive; the
    /// evaluator reacts to the outcome, never to this flag.
    pub suspends: bool,
    pub imp: BuiltinImpl,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("suspends", &self.suspends)
            .finish_non_exhaustive()
    }
}

/// Name→callable table the host supplies before execution, plus importable
/// enum-style namespaces.
#[derive(Default)]
pub struct Registry {
    builtins: FxHashMap<String, Rc<Builtin>>,
    namespaces: FxHashMap<String, Value>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the language's core builtins, printing
    /// through the given sink.
    pub fn with_core(sink: OutputSink) -> Self {
        let mut registry = Self::new();
        registry.install_core(sink);
        registry
    }

    pub fn register(&mut self, builtin: Builtin) {
        self.builtins
            .insert(builtin.name.clone(), Rc::new(builtin));
    }

    pub fn register_native(
        &mut self,
        name: &str,
        arity: Arity,
        suspends: bool,
        imp: impl Fn(&[Value]) -> Result<Outcome, String> + 'static,
    ) {
        self.register(Builtin {
            name: name.to_string(),
            arity,
            suspends,
            imp: BuiltinImpl::Native(Box::new(imp)),
        });
    }

    /// Registers a value importable via `import Name`. Enum-style namespaces
    /// are string-keyed dicts.
    pub fn register_namespace(&mut self, name: &str, value: Value) {
        self.namespaces.insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<Builtin>> {
        self.builtins.get(name).cloned()
    }

    pub fn namespace(&self, name: &str) -> Option<Value> {
        self.namespaces.get(name).cloned()
    }

    fn install_core(&mut self, sink: OutputSink) {
        self.register_native("print", Arity::AtLeast(0), false, move |args| {
            let line = args
                .iter()
                .map(Value::to_display)
                .collect::<Vec<_>>()
                .join(" ");
            (sink.borrow_mut())(line);
            Ok(Outcome::Value(Value::Null))
        });

        self.register_native("len", Arity::Exact(1), false, |args| {
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Dict(dict) => dict.borrow().len(),
                other => {
                    return Err(format!("cannot take the length of {}", other.type_name()));
                }
            };
            Ok(Outcome::Value(Value::Number(len as f64)))
        });

        self.register_native("range", Arity::Between(1, 3), false, |args| {
            let (start, stop, step) = match args.len() {
                1 => (0.0, number_arg("range", args, 0)?, 1.0),
                2 => (
                    number_arg("range", args, 0)?,
                    number_arg("range", args, 1)?,
                    1.0,
                ),
                _ => (
                    number_arg("range", args, 0)?,
                    number_arg("range", args, 1)?,
                    number_arg("range", args, 2)?,
                ),
            };
            if step == 0.0 {
                return Err("step must not be zero".to_string());
            }
            let mut items = Vec::new();
            let mut current = start;
            while (step > 0.0 && current < stop) || (step < 0.0 && current > stop) {
                items.push(Value::Number(current));
                current += step;
            }
            Ok(Outcome::Value(Value::list(items)))
        });

        self.register_native("str", Arity::Exact(1), false, |args| {
            Ok(Outcome::Value(Value::string(args[0].to_display())))
        });

        self.register_native("num", Arity::Exact(1), false, |args| match &args[0] {
            Value::Number(n) => Ok(Outcome::Value(Value::Number(*n))),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(|n| Outcome::Value(Value::Number(n)))
                .map_err(|_| format!("cannot convert '{s}' to a number")),
            other => Err(format!("cannot convert {} to a number", other.type_name())),
        });

        self.register_native("abs", Arity::Exact(1), false, |args| {
            let n = number_arg("abs", args, 0)?;
            Ok(Outcome::Value(Value::Number(n.abs())))
        });

        self.register_native("min", Arity::AtLeast(1), false, |args| {
            extreme("min", args, std::cmp::Ordering::Less)
        });

        self.register_native("max", Arity::AtLeast(1), false, |args| {
            extreme("max", args, std::cmp::Ordering::Greater)
        });

        self.register_native("append", Arity::Exact(2), false, |args| {
            let Value::List(items) = &args[0] else {
                return Err(format!("cannot append to {}", args[0].type_name()));
            };
            items.borrow_mut().push(args[1].clone());
            Ok(Outcome::Value(Value::Null))
        });

        self.register_native("pop", Arity::Between(1, 2), false, |args| {
            let Value::List(items) = &args[0] else {
                return Err(format!("cannot pop from {}", args[0].type_name()));
            };
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let index = if args.len() == 2 {
                number_arg("pop", args, 1)?.trunc() as i64
            } else {
                -1
            };
            let resolved = if index < 0 { len + index } else { index };
            if resolved < 0 || resolved >= len {
                return Err(format!("pop index {index} out of range"));
            }
            Ok(Outcome::Value(items.remove(resolved as usize)))
        });

        self.register_native("keys", Arity::Exact(1), false, |args| {
            let Value::Dict(dict) = &args[0] else {
                return Err(format!("cannot list keys of {}", args[0].type_name()));
            };
            Ok(Outcome::Value(Value::list(dict.borrow().keys())))
        });

        self.register(Builtin {
            name: "sorted".to_string(),
            arity: Arity::Between(1, 3),
            suspends: false,
            imp: BuiltinImpl::Sort,
        });
    }
}

fn number_arg(name: &str, args: &[Value], index: usize) -> Result<f64, String> {
    match &args[index] {
        Value::Number(n) => Ok(*n),
        other => Err(format!(
            "{name}() expected a number, got {}",
            other.type_name()
        )),
    }
}

fn extreme(name: &str, args: &[Value], keep: std::cmp::Ordering) -> Result<Outcome, String> {
    let candidates: Vec<Value> = if args.len() == 1 {
        match &args[0] {
            Value::List(items) => items.borrow().clone(),
            other => {
                return Err(format!(
                    "{name}() expected a list or several values, got {}",
                    other.type_name()
                ));
            }
        }
    } else {
        args.to_vec()
    };
    let mut best: Option<Value> = None;
    for candidate in candidates {
        match &best {
            None => best = Some(candidate),
            Some(current) => {
                let order = candidate.compare(current).ok_or_else(|| {
                    format!(
                        "cannot compare {} with {}",
                        candidate.type_name(),
                        current.type_name()
                    )
                })?;
                if order == keep {
                    best = Some(candidate);
                }
            }
        }
    }
    best.map(Outcome::Value)
        .ok_or_else(|| format!("{name}() of an empty list"))
}

/// Builds an enum-style namespace value from name/value pairs, preserving
/// the given order.
pub fn namespace_dict(entries: &[(&str, Value)]) -> Value {
    let mut dict = Dict::new();
    for (key, value) in entries {
        dict.insert(Value::string(*key), value.clone());
    }
    Value::Dict(Rc::new(RefCell::new(dict)))
}
