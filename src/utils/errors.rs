//! Error types for the pipeline compiler.
//!
//! Errors are grouped into three tiers by when they can be detected:
//! - compile errors, raised while defining Funcs or lowering a pipeline
//! - internal errors, raised when an invariant of the embedding layer breaks
//! - runtime errors, raised only by executing compiled code

use thiserror::Error;
use std::fmt;

/// Top-level error type for the compiler and its runtime.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Error in the definition graph or schedule
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Broken invariant inside the embedding layer
    #[error("Internal error: {0}")]
    Internal(#[from] InternalError),

    /// Error raised while running compiled code
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The tier an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Compile,
    Internal,
    Runtime,
    Io,
}

impl FlowError {
    /// The tier of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Compile(_) => ErrorKind::Compile,
            FlowError::Internal(_) => ErrorKind::Internal,
            FlowError::Runtime(_) => ErrorKind::Runtime,
            FlowError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_compile(&self) -> bool {
        self.kind() == ErrorKind::Compile
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    pub fn is_runtime(&self) -> bool {
        self.kind() == ErrorKind::Runtime
    }

    /// The compile error payload, if this is one.
    pub fn as_compile(&self) -> Option<&CompileError> {
        match self {
            FlowError::Compile(e) => Some(e),
            _ => None,
        }
    }

    /// The runtime error payload, if this is one.
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            FlowError::Runtime(e) => Some(e),
            _ => None,
        }
    }

    /// Name the Func or buffer at fault, unless one is already named.
    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        match self {
            FlowError::Compile(e) if e.subject.is_none() => FlowError::Compile(e.with_subject(subject)),
            FlowError::Runtime(e) if e.subject.is_none() => FlowError::Runtime(e.with_subject(subject)),
            other => other,
        }
    }
}

/// Error in a definition, a schedule, or the graph as a whole.
#[derive(Error, Debug, Clone)]
pub struct CompileError {
    /// The error message
    pub message: String,
    /// The kind of compile error
    pub kind: CompileErrorKind,
    /// The Func or parameter the error is about
    pub subject: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            subject: None,
        }
    }

    /// Attach the name of the Func or parameter at fault.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subject {
            Some(ref subject) => write!(f, "In {}: {}", subject, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Pure definition argument is not a Var
    NonVarArgument,
    /// Argument of an update is not an integer
    BadArgumentType,
    /// Wrong number of arguments
    ArityMismatch,
    /// Right-hand side has the wrong type or tuple size
    TypeMismatch,
    /// An undefined Expr reached a definition
    UndefinedExpr,
    /// Tuple element read on a Func that is not a Tuple (or index out of range)
    BadTupleIndex,
    /// Call to a Func that has no definition
    UndefinedFunc,
    /// Var used without being bound by the definition
    UnboundVar,
    /// Reduction variables from more than one domain
    MultipleDomains,
    /// External parameter without a value
    UnboundParameter,
    /// Reduction domain bounds could not be resolved
    BadReductionDomain,
    /// Schedule directive could not be applied
    InvalidSchedule,
    /// Region of a materialized Func could not be bounded
    UnboundedAccess,
    /// Funcs depend on each other cyclically
    CyclicDependency,
    /// Two distinct objects in one pipeline share a name
    DuplicateName,
    /// Second pure definition for the same Func
    Redefinition,
    /// Target not supported by this backend
    UnsupportedTarget,
}

/// Broken invariant inside the embedding layer.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct InternalError {
    /// The error message
    pub message: String,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Error detected while executing a compiled pipeline.
#[derive(Error, Debug, Clone)]
pub struct RuntimeError {
    /// The error message
    pub message: String,
    /// The kind of runtime error
    pub kind: RuntimeErrorKind,
    /// The buffer or parameter at fault
    pub subject: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subject {
            Some(ref subject) => write!(f, "{} ({})", self.message, subject),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Access outside the extents of a buffer
    OutOfBounds,
    /// Parameter value outside its configured range
    ParamOutOfRange,
    /// Failed assertion in generated code
    AssertionFailed,
    /// Buffer passed in has the wrong type or shape
    BadBuffer,
    /// Argument list does not match the pipeline
    BadArguments,
}

/// Result type using FlowError.
pub type FlowResult<T> = Result<T, FlowError>;

/// Shorthand for building a compile error wrapped in `FlowError`.
pub(crate) fn compile_error(kind: CompileErrorKind, message: impl Into<String>) -> FlowError {
    FlowError::Compile(CompileError::new(kind, message))
}

/// Shorthand for building an internal error wrapped in `FlowError`.
pub(crate) fn internal_error(message: impl Into<String>) -> FlowError {
    FlowError::Internal(InternalError::new(message))
}
