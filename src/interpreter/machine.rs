//! The resumable evaluator. Execution state is an explicit control stack of
//! frames plus a value stack, so any point between two steps is a valid
//! pause point: budget pauses and builtin-initiated waits compose through
//! arbitrary nesting of loops, calls, and comprehensions without help from
//! the host's call stack.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{
    AssignOp, BinaryOp, Block, ExprKind, ExprRef, LogicalOp, Program, Statement, StmtKind, UnaryOp,
};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::interpreter::ops;
use crate::runtime::registry::{BuiltinImpl, Outcome, Registry, Wait};
use crate::runtime::scope::Scope;
use crate::runtime::value::{Class, Function, Instance, Lambda, Value};

/// Steps granted per `resume` call before a budget pause.
pub const STEP_BUDGET: u32 = 100;

/// What a `resume` call reports back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// The step budget ran out; call `resume` again next tick.
    Running,
    /// A builtin requested a wait; resume once the host has honored it.
    Paused(Wait),
    Completed,
    Failed(RuntimeError),
}

enum StepOutcome {
    Continue,
    Pause(Wait),
}

/// One activation: the current scope plus the names forced to the global
/// scope by `global` statements in this activation.
struct Context {
    scope: Rc<Scope>,
    globals: FxHashSet<String>,
}

impl Context {
    fn new(scope: Rc<Scope>) -> Self {
        Self {
            scope,
            globals: FxHashSet::default(),
        }
    }
}

/// A unit of pending work. Statement and expression frames push their
/// continuation frames before their sub-work, so popping always resumes in
/// the right order.
enum Frame {
    Block { body: Block, index: usize },
    Eval(ExprRef),
    Discard,
    StoreVar { name: String, op: AssignOp, line: usize },
    StoreIndex { line: usize },
    StoreMember { name: String, line: usize },
    Branch { then_body: Block, else_body: Block },
    WhileTest { condition: ExprRef, body: Block },
    WhileDecide { condition: ExprRef, body: Block },
    ForInit { var: String, body: Block, line: usize },
    ForStep { var: String, items: Vec<Value>, index: usize, body: Block },
    LogicDecide { op: LogicalOp, right: ExprRef },
    ApplyBinary { op: BinaryOp, line: usize },
    ApplyUnary { op: UnaryOp, line: usize },
    DoIndex { line: usize },
    DoSlice { has_start: bool, has_stop: bool, has_step: bool, line: usize },
    DoMember { name: String, line: usize },
    MakeList { count: usize },
    MakeDict { count: usize },
    DoCall { argc: usize, line: usize },
    DoReturn { line: usize },
    /// Call boundary for a function or method body; yields null when the
    /// body falls off the end.
    CallReturn,
    /// Call boundary for `__init__`; always yields the instance.
    InitReturn { instance: Rc<Instance> },
    /// Call boundary for a lambda body; the body's value is already on the
    /// value stack.
    LambdaReturn,
    CompInit { element: ExprRef, var: String, filter: Option<ExprRef>, line: usize },
    Comp(CompFrame),
    Sort(SortFrame),
}

struct CompFrame {
    element: ExprRef,
    var: String,
    filter: Option<ExprRef>,
    items: Vec<Value>,
    index: usize,
    acc: Vec<Value>,
    /// Scope enclosing the comprehension; each iteration gets a fresh child.
    saved_scope: Rc<Scope>,
    stage: CompStage,
}

enum CompStage {
    Next,
    Filter,
    Element,
}

/// In-flight `sorted` with a key callable: keys are computed one at a time
/// through the machine so user-defined keys can pause like any other call.
struct SortFrame {
    items: Vec<Value>,
    keys: Vec<Value>,
    index: usize,
    key: Value,
    reverse: bool,
    line: usize,
    stage: SortStage,
}

enum SortStage {
    NextKey,
    AwaitKey,
}

pub struct Machine {
    registry: Registry,
    control: Vec<Frame>,
    values: Vec<Value>,
    contexts: Vec<Context>,
    global_scope: Rc<Scope>,
    steps: u32,
    /// Value a suspended builtin call yields once resumed.
    pending: Option<Value>,
    terminal: Option<Status>,
}

impl Machine {
    pub fn new(program: Program, registry: Registry) -> Self {
        let global_scope = Scope::global();
        Self {
            registry,
            control: vec![Frame::Block {
                body: program.statements,
                index: 0,
            }],
            values: Vec::new(),
            contexts: vec![Context::new(Rc::clone(&global_scope))],
            global_scope,
            steps: 0,
            pending: None,
            terminal: None,
        }
    }

    /// Drives execution until the step budget runs out, a builtin requests
    /// a wait, or the program finishes. Terminal states are sticky.
    pub fn resume(&mut self) -> Status {
        if let Some(status) = &self.terminal {
            return status.clone();
        }
        if let Some(value) = self.pending.take() {
            self.values.push(value);
        }
        self.steps = 0;
        loop {
            if self.steps >= STEP_BUDGET {
                return Status::Running;
            }
            let Some(frame) = self.control.pop() else {
                self.terminal = Some(Status::Completed);
                return Status::Completed;
            };
            match self.step(frame) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Pause(wait)) => return Status::Paused(wait),
                Err(error) => {
                    let status = Status::Failed(error);
                    self.terminal = Some(status.clone());
                    return status;
                }
            }
        }
    }

    fn step(&mut self, frame: Frame) -> Result<StepOutcome, RuntimeError> {
        match frame {
            Frame::Block { body, index } => {
                if index < body.len() {
                    self.control.push(Frame::Block {
                        body: body.clone(),
                        index: index + 1,
                    });
                    self.dispatch_statement(&body[index])
                } else {
                    Ok(StepOutcome::Continue)
                }
            }
            Frame::Eval(expr) => self.dispatch_expression(&expr),
            Frame::Discard => {
                self.pop_value();
                Ok(StepOutcome::Continue)
            }
            Frame::StoreVar { name, op, line } => {
                let value = self.pop_value();
                let new_value = match op {
                    AssignOp::Set => value,
                    AssignOp::Add => self.compound(&name, BinaryOp::Add, value, line)?,
                    AssignOp::Sub => self.compound(&name, BinaryOp::Sub, value, line)?,
                    AssignOp::Mul => self.compound(&name, BinaryOp::Mul, value, line)?,
                    AssignOp::Div => self.compound(&name, BinaryOp::Div, value, line)?,
                };
                self.assign_var(&name, new_value);
                Ok(StepOutcome::Continue)
            }
            Frame::StoreIndex { line } => {
                let value = self.pop_value();
                let index = self.pop_value();
                let object = self.pop_value();
                ops::set_index(&object, &index, value)
                    .map_err(|kind| RuntimeError::new(line, kind))?;
                Ok(StepOutcome::Continue)
            }
            Frame::StoreMember { name, line } => {
                let value = self.pop_value();
                let object = self.pop_value();
                match &object {
                    Value::Instance(instance) => {
                        instance.fields.borrow_mut().insert(name, value);
                    }
                    Value::Dict(dict) => {
                        dict.borrow_mut().insert(Value::string(name), value);
                    }
                    other => {
                        return Err(RuntimeError::new(
                            line,
                            RuntimeErrorKind::UnknownMember {
                                name,
                                type_name: other.type_name().to_string(),
                            },
                        ));
                    }
                }
                Ok(StepOutcome::Continue)
            }
            Frame::Branch {
                then_body,
                else_body,
            } => {
                let chosen = if self.pop_value().is_truthy() {
                    then_body
                } else {
                    else_body
                };
                if !chosen.is_empty() {
                    self.control.push(Frame::Block {
                        body: chosen,
                        index: 0,
                    });
                }
                Ok(StepOutcome::Continue)
            }
            Frame::WhileTest { condition, body } => {
                self.control.push(Frame::WhileDecide {
                    condition: condition.clone(),
                    body,
                });
                self.control.push(Frame::Eval(condition));
                Ok(StepOutcome::Continue)
            }
            Frame::WhileDecide { condition, body } => {
                if self.pop_value().is_truthy() {
                    self.control.push(Frame::WhileTest {
                        condition,
                        body: body.clone(),
                    });
                    self.control.push(Frame::Block { body, index: 0 });
                }
                Ok(StepOutcome::Continue)
            }
            Frame::ForInit { var, body, line } => {
                let iterable = self.pop_value();
                let items = ops::iterable_items(&iterable)
                    .map_err(|kind| RuntimeError::new(line, kind))?;
                self.control.push(Frame::ForStep {
                    var,
                    items,
                    index: 0,
                    body,
                });
                Ok(StepOutcome::Continue)
            }
            Frame::ForStep {
                var,
                items,
                index,
                body,
            } => {
                if index < items.len() {
                    self.assign_var(&var, items[index].clone());
                    self.control.push(Frame::ForStep {
                        var,
                        items,
                        index: index + 1,
                        body: body.clone(),
                    });
                    self.control.push(Frame::Block { body, index: 0 });
                }
                Ok(StepOutcome::Continue)
            }
            Frame::LogicDecide { op, right } => {
                let left = self.pop_value();
                let take_right = match op {
                    LogicalOp::And => left.is_truthy(),
                    LogicalOp::Or => !left.is_truthy(),
                };
                if take_right {
                    self.control.push(Frame::Eval(right));
                } else {
                    self.values.push(left);
                }
                Ok(StepOutcome::Continue)
            }
            Frame::ApplyBinary { op, line } => {
                let right = self.pop_value();
                let left = self.pop_value();
                let result = ops::binary(op, left, right)
                    .map_err(|kind| RuntimeError::new(line, kind))?;
                self.values.push(result);
                Ok(StepOutcome::Continue)
            }
            Frame::ApplyUnary { op, line } => {
                let operand = self.pop_value();
                let result =
                    ops::unary(op, operand).map_err(|kind| RuntimeError::new(line, kind))?;
                self.values.push(result);
                Ok(StepOutcome::Continue)
            }
            Frame::DoIndex { line } => {
                let index = self.pop_value();
                let object = self.pop_value();
                let result = ops::index_value(&object, &index)
                    .map_err(|kind| RuntimeError::new(line, kind))?;
                self.values.push(result);
                Ok(StepOutcome::Continue)
            }
            Frame::DoSlice {
                has_start,
                has_stop,
                has_step,
                line,
            } => {
                let step = has_step.then(|| self.pop_value());
                let stop = has_stop.then(|| self.pop_value());
                let start = has_start.then(|| self.pop_value());
                let object = self.pop_value();
                let result =
                    ops::slice_value(&object, start.as_ref(), stop.as_ref(), step.as_ref())
                        .map_err(|kind| RuntimeError::new(line, kind))?;
                self.values.push(result);
                Ok(StepOutcome::Continue)
            }
            Frame::DoMember { name, line } => {
                let object = self.pop_value();
                let result = self.member_value(&object, &name, line)?;
                self.values.push(result);
                Ok(StepOutcome::Continue)
            }
            Frame::MakeList { count } => {
                let items = self.values.split_off(self.values.len() - count);
                self.values.push(Value::list(items));
                Ok(StepOutcome::Continue)
            }
            Frame::MakeDict { count } => {
                let flat = self.values.split_off(self.values.len() - 2 * count);
                let mut dict = crate::runtime::value::Dict::new();
                let mut entries = flat.into_iter();
                while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
                    dict.insert(key, value);
                }
                self.values.push(Value::Dict(Rc::new(RefCell::new(dict))));
                Ok(StepOutcome::Continue)
            }
            Frame::DoCall { argc, line } => {
                let args = self.values.split_off(self.values.len() - argc);
                let callee = self.pop_value();
                self.call_value(callee, args, line)
            }
            Frame::DoReturn { line } => {
                let value = self.pop_value();
                self.unwind_return(value, line)
            }
            Frame::CallReturn => {
                self.pop_context();
                self.values.push(Value::Null);
                Ok(StepOutcome::Continue)
            }
            Frame::InitReturn { instance } => {
                self.pop_context();
                self.values.push(Value::Instance(instance));
                Ok(StepOutcome::Continue)
            }
            Frame::LambdaReturn => {
                self.pop_context();
                Ok(StepOutcome::Continue)
            }
            Frame::CompInit {
                element,
                var,
                filter,
                line,
            } => {
                let iterable = self.pop_value();
                let items = ops::iterable_items(&iterable)
                    .map_err(|kind| RuntimeError::new(line, kind))?;
                let saved_scope = Rc::clone(&self.context().scope);
                self.control.push(Frame::Comp(CompFrame {
                    element,
                    var,
                    filter,
                    items,
                    index: 0,
                    acc: Vec::new(),
                    saved_scope,
                    stage: CompStage::Next,
                }));
                Ok(StepOutcome::Continue)
            }
            Frame::Comp(comp) => self.step_comprehension(comp),
            Frame::Sort(sort) => self.step_sort(sort),
        }
    }

    fn dispatch_statement(&mut self, statement: &Statement) -> Result<StepOutcome, RuntimeError> {
        self.steps += 1;
        let line = statement.line;
        match &statement.kind {
            StmtKind::Expr(expr) => {
                self.control.push(Frame::Discard);
                self.control.push(Frame::Eval(expr.clone()));
            }
            StmtKind::Assign { name, op, value } => {
                self.control.push(Frame::StoreVar {
                    name: name.clone(),
                    op: *op,
                    line,
                });
                self.control.push(Frame::Eval(value.clone()));
            }
            StmtKind::SetIndex {
                object,
                index,
                value,
            } => {
                self.control.push(Frame::StoreIndex { line });
                self.control.push(Frame::Eval(value.clone()));
                self.control.push(Frame::Eval(index.clone()));
                self.control.push(Frame::Eval(object.clone()));
            }
            StmtKind::SetMember {
                object,
                name,
                value,
            } => {
                self.control.push(Frame::StoreMember {
                    name: name.clone(),
                    line,
                });
                self.control.push(Frame::Eval(value.clone()));
                self.control.push(Frame::Eval(object.clone()));
            }
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                self.control.push(Frame::Branch {
                    then_body: then_body.clone(),
                    else_body: else_body.clone(),
                });
                self.control.push(Frame::Eval(condition.clone()));
            }
            StmtKind::While { condition, body } => {
                self.control.push(Frame::WhileTest {
                    condition: condition.clone(),
                    body: body.clone(),
                });
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                self.control.push(Frame::ForInit {
                    var: var.clone(),
                    body: body.clone(),
                    line,
                });
                self.control.push(Frame::Eval(iterable.clone()));
            }
            StmtKind::FunctionDef { name, params, body } => {
                let function = Value::Function(Rc::new(Function {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                    closure: Rc::clone(&self.context().scope),
                }));
                self.assign_var(name, function);
            }
            StmtKind::ClassDef { name, body } => {
                let mut methods = FxHashMap::default();
                for member in body.iter() {
                    if let StmtKind::FunctionDef {
                        name: method_name,
                        params,
                        body: method_body,
                    } = &member.kind
                    {
                        methods.insert(
                            method_name.clone(),
                            Rc::new(Function {
                                name: method_name.clone(),
                                params: params.clone(),
                                body: method_body.clone(),
                                closure: Rc::clone(&self.context().scope),
                            }),
                        );
                    }
                }
                let class = Value::Class(Rc::new(Class {
                    name: name.clone(),
                    methods,
                }));
                self.assign_var(name, class);
            }
            StmtKind::Return(value) => {
                self.control.push(Frame::DoReturn { line });
                match value {
                    Some(expr) => self.control.push(Frame::Eval(expr.clone())),
                    None => self.values.push(Value::Null),
                }
            }
            StmtKind::Break => return self.unwind_loop("break", line),
            StmtKind::Continue => return self.unwind_loop("continue", line),
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                self.context_mut().globals.extend(names.iter().cloned());
            }
            StmtKind::Import { name, member } => {
                if let Some(namespace) = self.registry.namespace(name) {
                    match member {
                        None => self.assign_var(name, namespace),
                        Some(member_name) => {
                            let value = ops::index_value(
                                &namespace,
                                &Value::string(member_name.clone()),
                            )
                            .map_err(|_| {
                                RuntimeError::new(
                                    line,
                                    RuntimeErrorKind::UnknownMember {
                                        name: member_name.clone(),
                                        type_name: name.clone(),
                                    },
                                )
                            })?;
                            self.assign_var(member_name, value);
                        }
                    }
                }
            }
        }
        Ok(StepOutcome::Continue)
    }

    fn dispatch_expression(&mut self, expr: &ExprRef) -> Result<StepOutcome, RuntimeError> {
        self.steps += 1;
        let line = expr.line;
        match &expr.kind {
            ExprKind::Null => self.values.push(Value::Null),
            ExprKind::Bool(b) => self.values.push(Value::Bool(*b)),
            ExprKind::Number(n) => self.values.push(Value::Number(*n)),
            ExprKind::Str(s) => self.values.push(Value::string(s.clone())),
            ExprKind::Variable(name) => {
                let value = self.load_var(name, line)?;
                self.values.push(value);
            }
            ExprKind::Unary { op, operand } => {
                self.control.push(Frame::ApplyUnary { op: *op, line });
                self.control.push(Frame::Eval(operand.clone()));
            }
            ExprKind::Binary { left, op, right } => {
                self.control.push(Frame::ApplyBinary { op: *op, line });
                self.control.push(Frame::Eval(right.clone()));
                self.control.push(Frame::Eval(left.clone()));
            }
            ExprKind::Logical { left, op, right } => {
                self.control.push(Frame::LogicDecide {
                    op: *op,
                    right: right.clone(),
                });
                self.control.push(Frame::Eval(left.clone()));
            }
            ExprKind::Call { callee, args } => {
                self.control.push(Frame::DoCall {
                    argc: args.len(),
                    line,
                });
                for arg in args.iter().rev() {
                    self.control.push(Frame::Eval(arg.clone()));
                }
                self.control.push(Frame::Eval(callee.clone()));
            }
            ExprKind::Index { object, index } => {
                self.control.push(Frame::DoIndex { line });
                self.control.push(Frame::Eval(index.clone()));
                self.control.push(Frame::Eval(object.clone()));
            }
            ExprKind::Slice {
                object,
                start,
                stop,
                step,
            } => {
                self.control.push(Frame::DoSlice {
                    has_start: start.is_some(),
                    has_stop: stop.is_some(),
                    has_step: step.is_some(),
                    line,
                });
                if let Some(step) = step {
                    self.control.push(Frame::Eval(step.clone()));
                }
                if let Some(stop) = stop {
                    self.control.push(Frame::Eval(stop.clone()));
                }
                if let Some(start) = start {
                    self.control.push(Frame::Eval(start.clone()));
                }
                self.control.push(Frame::Eval(object.clone()));
            }
            ExprKind::Member { object, name } => {
                self.control.push(Frame::DoMember {
                    name: name.clone(),
                    line,
                });
                self.control.push(Frame::Eval(object.clone()));
            }
            ExprKind::List(items) => {
                self.control.push(Frame::MakeList { count: items.len() });
                for item in items.iter().rev() {
                    self.control.push(Frame::Eval(item.clone()));
                }
            }
            ExprKind::Dict(entries) => {
                self.control.push(Frame::MakeDict {
                    count: entries.len(),
                });
                for (key, value) in entries.iter().rev() {
                    self.control.push(Frame::Eval(value.clone()));
                    self.control.push(Frame::Eval(key.clone()));
                }
            }
            ExprKind::Lambda { params, body } => {
                self.values.push(Value::Lambda(Rc::new(Lambda {
                    params: params.clone(),
                    body: body.clone(),
                    closure: Rc::clone(&self.context().scope),
                })));
            }
            ExprKind::ListComp {
                element,
                var,
                iterable,
                filter,
            } => {
                self.control.push(Frame::CompInit {
                    element: element.clone(),
                    var: var.clone(),
                    filter: filter.clone(),
                    line,
                });
                self.control.push(Frame::Eval(iterable.clone()));
            }
        }
        Ok(StepOutcome::Continue)
    }

    /// Sorting is driven one key call at a time; the actual reorder happens
    /// once every key is in, stably, reversing the comparator if asked.
    fn step_sort(&mut self, mut sort: SortFrame) -> Result<StepOutcome, RuntimeError> {
        match sort.stage {
            SortStage::NextKey => {
                if sort.index >= sort.items.len() {
                    let sorted = stable_sorted(sort.items, sort.keys, sort.reverse)
                        .map_err(|kind| RuntimeError::new(sort.line, kind))?;
                    self.values.push(Value::list(sorted));
                    Ok(StepOutcome::Continue)
                } else {
                    let item = sort.items[sort.index].clone();
                    let key = sort.key.clone();
                    let line = sort.line;
                    sort.stage = SortStage::AwaitKey;
                    self.control.push(Frame::Sort(sort));
                    self.call_value(key, vec![item], line)
                }
            }
            SortStage::AwaitKey => {
                let key_value = self.pop_value();
                sort.keys.push(key_value);
                sort.index += 1;
                sort.stage = SortStage::NextKey;
                self.control.push(Frame::Sort(sort));
                Ok(StepOutcome::Continue)
            }
        }
    }

    fn step_comprehension(&mut self, mut comp: CompFrame) -> Result<StepOutcome, RuntimeError> {
        match comp.stage {
            CompStage::Next => {
                if comp.index >= comp.items.len() {
                    let saved = Rc::clone(&comp.saved_scope);
                    self.set_scope(saved);
                    self.values.push(Value::list(comp.acc));
                    return Ok(StepOutcome::Continue);
                }
                let item = comp.items[comp.index].clone();
                let iter_scope = Scope::child(&comp.saved_scope);
                iter_scope.set_local(&comp.var, item);
                self.set_scope(iter_scope);
                if let Some(filter) = comp.filter.clone() {
                    comp.stage = CompStage::Filter;
                    self.control.push(Frame::Comp(comp));
                    self.control.push(Frame::Eval(filter));
                } else {
                    comp.stage = CompStage::Element;
                    let element = comp.element.clone();
                    self.control.push(Frame::Comp(comp));
                    self.control.push(Frame::Eval(element));
                }
                Ok(StepOutcome::Continue)
            }
            CompStage::Filter => {
                if self.pop_value().is_truthy() {
                    comp.stage = CompStage::Element;
                    let element = comp.element.clone();
                    self.control.push(Frame::Comp(comp));
                    self.control.push(Frame::Eval(element));
                } else {
                    comp.index += 1;
                    comp.stage = CompStage::Next;
                    self.control.push(Frame::Comp(comp));
                }
                Ok(StepOutcome::Continue)
            }
            CompStage::Element => {
                let value = self.pop_value();
                comp.acc.push(value);
                comp.index += 1;
                comp.stage = CompStage::Next;
                self.control.push(Frame::Comp(comp));
                Ok(StepOutcome::Continue)
            }
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        line: usize,
    ) -> Result<StepOutcome, RuntimeError> {
        match callee {
            Value::Builtin(builtin) => {
                if !builtin.arity.check(args.len()) {
                    return Err(RuntimeError::new(
                        line,
                        RuntimeErrorKind::ArityMismatch {
                            name: builtin.name.clone(),
                            expected: builtin.arity.describe(),
                            found: args.len(),
                        },
                    ));
                }
                match &builtin.imp {
                    BuiltinImpl::Native(imp) => match imp(&args) {
                        Ok(Outcome::Value(value)) => {
                            self.values.push(value);
                            Ok(StepOutcome::Continue)
                        }
                        Ok(Outcome::Wait { wait, result }) => {
                            self.pending = Some(result);
                            Ok(StepOutcome::Pause(wait))
                        }
                        Err(message) => Err(RuntimeError::new(
                            line,
                            RuntimeErrorKind::Builtin {
                                name: builtin.name.clone(),
                                message,
                            },
                        )),
                    },
                    BuiltinImpl::Sort => self.begin_sort(&builtin.name, args, line),
                }
            }
            Value::Function(function) => {
                if args.len() != function.params.len() {
                    return Err(RuntimeError::new(
                        line,
                        RuntimeErrorKind::ArityMismatch {
                            name: function.name.clone(),
                            expected: function.params.len().to_string(),
                            found: args.len(),
                        },
                    ));
                }
                let scope = Scope::child(&function.closure);
                for (param, arg) in function.params.iter().zip(args) {
                    scope.set_local(param, arg);
                }
                self.contexts.push(Context::new(scope));
                self.control.push(Frame::CallReturn);
                self.control.push(Frame::Block {
                    body: function.body.clone(),
                    index: 0,
                });
                Ok(StepOutcome::Continue)
            }
            Value::Lambda(lambda) => {
                if args.len() != lambda.params.len() {
                    return Err(RuntimeError::new(
                        line,
                        RuntimeErrorKind::ArityMismatch {
                            name: "<lambda>".to_string(),
                            expected: lambda.params.len().to_string(),
                            found: args.len(),
                        },
                    ));
                }
                let scope = Scope::child(&lambda.closure);
                for (param, arg) in lambda.params.iter().zip(args) {
                    scope.set_local(param, arg);
                }
                self.contexts.push(Context::new(scope));
                self.control.push(Frame::LambdaReturn);
                self.control.push(Frame::Eval(lambda.body.clone()));
                Ok(StepOutcome::Continue)
            }
            Value::BoundMethod { receiver, method } => {
                self.call_method(method, receiver, args, line)
            }
            Value::Class(class) => {
                let instance = Rc::new(Instance {
                    class: Rc::clone(&class),
                    fields: RefCell::new(FxHashMap::default()),
                });
                if let Some(init) = class.methods.get("__init__").cloned() {
                    return self.call_init(&class.name, init, instance, args, line);
                }
                if !args.is_empty() {
                    return Err(RuntimeError::new(
                        line,
                        RuntimeErrorKind::ArityMismatch {
                            name: class.name.clone(),
                            expected: "0".to_string(),
                            found: args.len(),
                        },
                    ));
                }
                self.values.push(Value::Instance(instance));
                Ok(StepOutcome::Continue)
            }
            other => Err(RuntimeError::new(
                line,
                RuntimeErrorKind::NotCallable {
                    type_name: other.type_name().to_string(),
                },
            )),
        }
    }

    fn call_method(
        &mut self,
        method: Rc<Function>,
        receiver: Rc<Instance>,
        args: Vec<Value>,
        line: usize,
    ) -> Result<StepOutcome, RuntimeError> {
        let expected = method.params.len().saturating_sub(1);
        if args.len() != expected {
            return Err(RuntimeError::new(
                line,
                RuntimeErrorKind::ArityMismatch {
                    name: method.name.clone(),
                    expected: expected.to_string(),
                    found: args.len(),
                },
            ));
        }
        let scope = Scope::child(&method.closure);
        let mut params = method.params.iter();
        if let Some(self_name) = params.next() {
            scope.set_local(self_name, Value::Instance(receiver));
        }
        for (param, arg) in params.zip(args) {
            scope.set_local(param, arg);
        }
        self.contexts.push(Context::new(scope));
        self.control.push(Frame::CallReturn);
        self.control.push(Frame::Block {
            body: method.body.clone(),
            index: 0,
        });
        Ok(StepOutcome::Continue)
    }

    /// Constructor call with an `__init__`: exact arity against the declared
    /// parameters minus `self`; the return value is the instance regardless
    /// of what the body returns.
    fn call_init(
        &mut self,
        class_name: &str,
        init: Rc<Function>,
        instance: Rc<Instance>,
        args: Vec<Value>,
        line: usize,
    ) -> Result<StepOutcome, RuntimeError> {
        let expected = init.params.len().saturating_sub(1);
        if args.len() != expected {
            return Err(RuntimeError::new(
                line,
                RuntimeErrorKind::ArityMismatch {
                    name: class_name.to_string(),
                    expected: expected.to_string(),
                    found: args.len(),
                },
            ));
        }
        let scope = Scope::child(&init.closure);
        let mut params = init.params.iter();
        if let Some(self_name) = params.next() {
            scope.set_local(self_name, Value::Instance(Rc::clone(&instance)));
        }
        for (param, arg) in params.zip(args) {
            scope.set_local(param, arg);
        }
        self.contexts.push(Context::new(scope));
        self.control.push(Frame::InitReturn { instance });
        self.control.push(Frame::Block {
            body: init.body.clone(),
            index: 0,
        });
        Ok(StepOutcome::Continue)
    }

    fn begin_sort(
        &mut self,
        name: &str,
        args: Vec<Value>,
        line: usize,
    ) -> Result<StepOutcome, RuntimeError> {
        let builtin_error = |message: String| {
            RuntimeError::new(
                line,
                RuntimeErrorKind::Builtin {
                    name: name.to_string(),
                    message,
                },
            )
        };
        let Value::List(items) = &args[0] else {
            return Err(builtin_error(format!(
                "expected a list, got {}",
                args[0].type_name()
            )));
        };
        let items = items.borrow().clone();
        let key = args.get(1).cloned().unwrap_or(Value::Null);
        let reverse = args.get(2).map(Value::is_truthy).unwrap_or(false);

        if matches!(key, Value::Null) {
            let keys = items.clone();
            let sorted = stable_sorted(items, keys, reverse)
                .map_err(|kind| RuntimeError::new(line, kind))?;
            self.values.push(Value::list(sorted));
            return Ok(StepOutcome::Continue);
        }
        self.control.push(Frame::Sort(SortFrame {
            items,
            keys: Vec::new(),
            index: 0,
            key,
            reverse,
            line,
            stage: SortStage::NextKey,
        }));
        Ok(StepOutcome::Continue)
    }

    /// `break` / `continue`: unwind to the innermost enclosing loop frame.
    /// Crossing a call boundary means there is no such loop.
    fn unwind_loop(
        &mut self,
        keyword: &'static str,
        line: usize,
    ) -> Result<StepOutcome, RuntimeError> {
        while let Some(frame) = self.control.pop() {
            match frame {
                Frame::WhileTest { .. } | Frame::ForStep { .. } => {
                    if keyword == "continue" {
                        self.control.push(frame);
                    }
                    return Ok(StepOutcome::Continue);
                }
                Frame::CallReturn | Frame::InitReturn { .. } | Frame::LambdaReturn => break,
                _ => {}
            }
        }
        Err(RuntimeError::new(
            line,
            RuntimeErrorKind::LoopControlOutsideLoop { keyword },
        ))
    }

    /// `return`: unwind to the innermost call boundary and yield the value
    /// (or the instance, for `__init__`).
    fn unwind_return(&mut self, value: Value, line: usize) -> Result<StepOutcome, RuntimeError> {
        while let Some(frame) = self.control.pop() {
            match frame {
                Frame::CallReturn => {
                    self.pop_context();
                    self.values.push(value);
                    return Ok(StepOutcome::Continue);
                }
                Frame::InitReturn { instance } => {
                    self.pop_context();
                    self.values.push(Value::Instance(instance));
                    return Ok(StepOutcome::Continue);
                }
                _ => {}
            }
        }
        Err(RuntimeError::new(
            line,
            RuntimeErrorKind::ReturnOutsideFunction,
        ))
    }

    fn member_value(
        &self,
        object: &Value,
        name: &str,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let missing = || {
            RuntimeError::new(
                line,
                RuntimeErrorKind::UnknownMember {
                    name: name.to_string(),
                    type_name: object.type_name().to_string(),
                },
            )
        };
        match object {
            // Enum-style namespaces are string-keyed dicts.
            Value::Dict(dict) => dict
                .borrow()
                .get(&Value::string(name.to_string()))
                .ok_or_else(missing),
            Value::Instance(instance) => {
                if let Some(field) = instance.fields.borrow().get(name) {
                    return Ok(field.clone());
                }
                if let Some(method) = instance.class.methods.get(name) {
                    return Ok(Value::BoundMethod {
                        receiver: Rc::clone(instance),
                        method: Rc::clone(method),
                    });
                }
                Err(missing())
            }
            _ => Err(missing()),
        }
    }

    fn compound(
        &mut self,
        name: &str,
        op: BinaryOp,
        value: Value,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let current = self.load_var(name, line)?;
        ops::binary(op, current, value).map_err(|kind| RuntimeError::new(line, kind))
    }

    fn load_var(&self, name: &str, line: usize) -> Result<Value, RuntimeError> {
        let context = self.context();
        let found = if context.globals.contains(name) {
            self.global_scope.get(name)
        } else {
            context.scope.get(name)
        };
        if let Some(value) = found {
            return Ok(value);
        }
        if let Some(builtin) = self.registry.lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(RuntimeError::new(
            line,
            RuntimeErrorKind::UndefinedVariable {
                name: name.to_string(),
            },
        ))
    }

    /// Writes bind in the innermost scope unless the name was forced global.
    fn assign_var(&mut self, name: &str, value: Value) {
        if self.context().globals.contains(name) {
            self.global_scope.set_local(name, value);
        } else {
            self.context().scope.set_local(name, value);
        }
    }

    fn context(&self) -> &Context {
        self.contexts.last().expect("an active context always exists")
    }

    fn context_mut(&mut self) -> &mut Context {
        self.contexts
            .last_mut()
            .expect("an active context always exists")
    }

    fn pop_context(&mut self) {
        self.contexts.pop();
        debug_assert!(!self.contexts.is_empty());
    }

    fn set_scope(&mut self, scope: Rc<Scope>) {
        self.context_mut().scope = scope;
    }

    fn pop_value(&mut self) -> Value {
        self.values.pop().expect("value stack never underflows")
    }
}

/// Stable sort of `items` by parallel `keys`; comparator order: numeric,
/// lexical string, element-wise list.
fn stable_sorted(
    items: Vec<Value>,
    keys: Vec<Value>,
    reverse: bool,
) -> Result<Vec<Value>, RuntimeErrorKind> {
    let mut pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    let mut error: Option<RuntimeErrorKind> = None;
    pairs.sort_by(|(a, _), (b, _)| match a.compare(b) {
        Some(order) => {
            if reverse {
                order.reverse()
            } else {
                order
            }
        }
        None => {
            error.get_or_insert_with(|| RuntimeErrorKind::NotComparable {
                left: a.type_name().to_string(),
                right: b.type_name().to_string(),
            });
            Ordering::Equal
        }
    });
    if let Some(kind) = error {
        return Err(kind);
    }
    Ok(pairs.into_iter().map(|(_, item)| item).collect())
}
