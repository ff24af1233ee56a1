use thiserror::Error;

/// Tokenization failure: invalid character, bad indentation, unterminated
/// string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("[line {line}] {message}")]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

impl LexError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Syntax failure: unexpected token, malformed suite or signature.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("[line {line}] {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Typed failures raised during evaluation. Control-flow signals and
/// suspensions are not errors and never travel through this type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("Object of type {type_name} is not callable")]
    NotCallable { type_name: String },
    #[error("'{name}' expected {expected} arguments, got {found}")]
    ArityMismatch {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("Unsupported operand types for '{op}': {left} and {right}")]
    UnsupportedBinary {
        op: &'static str,
        left: String,
        right: String,
    },
    #[error("Unsupported operand type for '{op}': {type_name}")]
    UnsupportedUnary {
        op: &'static str,
        type_name: String,
    },
    #[error("Cannot compare {left} with {right}")]
    NotComparable { left: String, right: String },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("Index must be a number, got {type_name}")]
    InvalidIndex { type_name: String },
    #[error("Key {key} not found")]
    KeyNotFound { key: String },
    #[error("Type {type_name} does not support indexing")]
    NotIndexable { type_name: String },
    #[error("Type {type_name} does not support slicing")]
    NotSliceable { type_name: String },
    #[error("Type {type_name} is not iterable")]
    NotIterable { type_name: String },
    #[error("Unknown member '{name}' for type {type_name}")]
    UnknownMember { name: String, type_name: String },
    #[error("Cannot test membership in type {type_name}")]
    NotAContainer { type_name: String },
    #[error("'return' outside of function")]
    ReturnOutsideFunction,
    #[error("'{keyword}' outside of loop")]
    LoopControlOutsideLoop { keyword: &'static str },
    #[error("{name}: {message}")]
    Builtin { name: String, message: String },
}

/// A fatal evaluation failure attributed to a source line. Aborts the whole
/// program run; nothing is caught and retried internally.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("[line {line}] {kind}")]
pub struct RuntimeError {
    pub line: usize,
    pub kind: RuntimeErrorKind,
}

impl RuntimeError {
    pub fn new(line: usize, kind: RuntimeErrorKind) -> Self {
        Self { line, kind }
    }
}

/// Union of the three failure kinds a program run can surface.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProgramError {
    #[error("{0}")]
    Lex(#[from] LexError),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

impl ProgramError {
    pub fn line(&self) -> usize {
        match self {
            ProgramError::Lex(e) => e.line,
            ProgramError::Parse(e) => e.line,
            ProgramError::Runtime(e) => e.line,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ProgramError::Lex(_) => "lex",
            ProgramError::Parse(_) => "parse",
            ProgramError::Runtime(_) => "runtime",
        }
    }
}
