//! Error taxonomy for the interpreter pipeline.
//!
//! Every kind carries an optional [`SourceLoc`] and renders with the
//! standardized `Lexer Error:` / `Compiler Error:` / `Runtime Error:` prefix
//! followed by `[<context> line N]`, per the error handling design.

use std::fmt::{self, Display};

/// A 1-based source line, the only location granularity the lexer tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub line: usize,
}

impl SourceLoc {
    pub fn new(line: usize) -> Self {
        Self { line }
    }
}

impl Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.line)
    }
}

fn with_location(context: &str, message: &str, location: Option<SourceLoc>) -> String {
    match location {
        Some(loc) => format!("{message} [{context} {loc}]"),
        None => message.to_owned(),
    }
}

/// Failure while tokenizing source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub location: Option<SourceLoc>,
}

impl LexError {
    pub fn new(message: impl Into<String>, location: SourceLoc) -> Self {
        Self {
            message: message.into(),
            location: Some(location),
        }
    }
}

impl Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lexer Error: {}",
            with_location("line", &self.message, self.location)
        )
    }
}

impl std::error::Error for LexError {}

/// Failure detected while parsing/compiling source into TAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub location: Option<SourceLoc>,
}

impl CompileError {
    pub fn new(message: impl Into<String>, location: SourceLoc) -> Self {
        Self {
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn without_location(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compiler Error: {}",
            with_location("line", &self.message, self.location)
        )
    }
}

impl std::error::Error for CompileError {}

/// The sub-kind of a [`RuntimeError`], distinguishing the taxonomy from §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Index,
    Key,
    Type,
    UndefinedIdentifier,
    UndefinedLocal,
    TooManyArguments,
    LimitExceeded,
    Other,
}

/// Failure raised by the VM while stepping TAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub location: Option<SourceLoc>,
    /// The name of the context the error surfaced in (function name or
    /// `"global"`), used only for the `[<context> line N]` suffix.
    pub context_name: String,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>, context_name: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            context_name: context_name.into(),
        }
    }

    pub fn with_location(mut self, location: SourceLoc) -> Self {
        self.location = Some(location);
        self
    }

    pub fn index(message: impl Into<String>, context_name: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Index, message, context_name)
    }

    pub fn key(message: impl Into<String>, context_name: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Key, message, context_name)
    }

    pub fn type_error(message: impl Into<String>, context_name: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Type, message, context_name)
    }

    pub fn undefined_identifier(name: &str, context_name: impl Into<String>) -> Self {
        Self::new(
            RuntimeErrorKind::UndefinedIdentifier,
            format!("Undefined identifier '{name}'"),
            context_name,
        )
    }

    pub fn undefined_local(name: &str, context_name: impl Into<String>) -> Self {
        Self::new(
            RuntimeErrorKind::UndefinedLocal,
            format!("Undefined local identifier '{name}'"),
            context_name,
        )
    }

    pub fn too_many_arguments(message: impl Into<String>, context_name: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::TooManyArguments, message, context_name)
    }

    pub fn limit_exceeded(message: impl Into<String>, context_name: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::LimitExceeded, message, context_name)
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "Runtime Error: {} [{} {}]",
                self.message, self.context_name, loc
            ),
            None => write!(f, "Runtime Error: {}", self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Unifying error type for the host-facing [`crate::Interpreter`] API.
#[derive(Debug, Clone)]
pub enum MiniscriptError {
    Lex(LexError),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl Display for MiniscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiniscriptError::Lex(e) => write!(f, "{e}"),
            MiniscriptError::Compile(e) => write!(f, "{e}"),
            MiniscriptError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for MiniscriptError {}

impl From<LexError> for MiniscriptError {
    fn from(value: LexError) -> Self {
        MiniscriptError::Lex(value)
    }
}

impl From<CompileError> for MiniscriptError {
    fn from(value: CompileError) -> Self {
        MiniscriptError::Compile(value)
    }
}

impl From<RuntimeError> for MiniscriptError {
    fn from(value: RuntimeError) -> Self {
        MiniscriptError::Runtime(value)
    }
}
