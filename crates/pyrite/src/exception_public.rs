use std::fmt;

use serde::Serialize;

use crate::{
    exception_private::{FailureKind, RawStackFrame},
    value::Value,
};

/// One frame of a resolved traceback, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub function: String,
    pub op_index: usize,
}

impl From<&RawStackFrame> for StackFrame {
    fn from(frame: &RawStackFrame) -> Self {
        Self {
            function: frame.function.as_str().to_owned(),
            op_index: frame.op_index,
        }
    }
}

/// The exception an `except` clause is handling: `sys.exc_info()`'s type, value, and traceback.
///
/// Returned by [`Runtime::current_exception`](crate::Runtime::current_exception). The type and
/// value stay on the runtime's heap; the traceback is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcInfo {
    pub exc_type: Value,
    pub value: Value,
    pub traceback: Vec<StackFrame>,
}

/// A Python exception resolved into owned data, detached from the runtime's heap.
///
/// Produced by [`Runtime::execute`](crate::Runtime::execute) and
/// [`Runtime::describe_error`](crate::Runtime::describe_error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exception {
    exc_type: String,
    kind: FailureKind,
    message: Option<String>,
    traceback: Vec<StackFrame>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: impl Into<String>, kind: FailureKind, message: Option<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            kind,
            message,
            traceback: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn with_traceback(mut self, traceback: Vec<StackFrame>) -> Self {
        self.traceback = traceback;
        self
    }

    /// Name of the exception class, e.g. `"AttributeError"` or a user class name.
    #[must_use]
    pub fn exc_type(&self) -> &str {
        &self.exc_type
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) if !message.is_empty() => write!(f, "{}: {message}", self.exc_type),
            _ => f.write_str(&self.exc_type),
        }
    }
}

impl std::error::Error for Exception {}
