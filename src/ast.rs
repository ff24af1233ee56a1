use std::rc::Rc;

/// Shared expression node. Subtrees are reference-counted so the evaluator's
/// frame stack can hold onto them without cloning.
pub type ExprRef = Rc<Expression>;

/// Shared statement sequence forming a suite body.
pub type Block = Rc<[Statement]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExprKind,
    pub line: usize,
}

impl Expression {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: ExprRef,
    },
    Binary {
        left: ExprRef,
        op: BinaryOp,
        right: ExprRef,
    },
    /// Short-circuit `and` / `or`; yields the deciding operand itself.
    Logical {
        left: ExprRef,
        op: LogicalOp,
        right: ExprRef,
    },
    Call {
        callee: ExprRef,
        args: Vec<ExprRef>,
    },
    Index {
        object: ExprRef,
        index: ExprRef,
    },
    Slice {
        object: ExprRef,
        start: Option<ExprRef>,
        stop: Option<ExprRef>,
        step: Option<ExprRef>,
    },
    Member {
        object: ExprRef,
        name: String,
    },
    /// List and tuple literals share one representation.
    List(Vec<ExprRef>),
    Dict(Vec<(ExprRef, ExprRef)>),
    Lambda {
        params: Vec<String>,
        body: ExprRef,
    },
    ListComp {
        element: ExprRef,
        var: String,
        iterable: ExprRef,
        filter: Option<ExprRef>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    Is,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Is => "is",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StmtKind,
    pub line: usize,
}

impl Statement {
    pub fn new(kind: StmtKind, line: usize) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(ExprRef),
    Assign {
        name: String,
        op: AssignOp,
        value: ExprRef,
    },
    SetIndex {
        object: ExprRef,
        index: ExprRef,
        value: ExprRef,
    },
    SetMember {
        object: ExprRef,
        name: String,
        value: ExprRef,
    },
    If {
        condition: ExprRef,
        then_body: Block,
        else_body: Block,
    },
    While {
        condition: ExprRef,
        body: Block,
    },
    For {
        var: String,
        iterable: ExprRef,
        body: Block,
    },
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Block,
    },
    ClassDef {
        name: String,
        body: Block,
    },
    Return(Option<ExprRef>),
    Break,
    Continue,
    Pass,
    Global(Vec<String>),
    Import {
        name: String,
        member: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Block,
}
