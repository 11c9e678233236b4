use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::{heap::HeapId, intern::StringId, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Builtin exception classes, following the Python 2.7 hierarchy.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
/// Each variant is bootstrapped into a real class object so user code can subclass and catch it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    EnumIter,
    EnumCount,
    Serialize,
    Deserialize,
)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    GeneratorExit,
    Exception,
    StopIteration,
    StandardError,
    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    AssertionError,
    AttributeError,
    // --- LookupError hierarchy ---
    LookupError,
    IndexError,
    KeyError,
    NameError,
    // --- RuntimeError hierarchy ---
    RuntimeError,
    NotImplementedError,
    TypeError,
    ValueError,
    MemoryError,
}

impl ExcType {
    /// Direct base class, `None` only for `BaseException`.
    #[must_use]
    pub fn base(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::SystemExit | Self::KeyboardInterrupt | Self::GeneratorExit | Self::Exception => {
                Some(Self::BaseException)
            }
            Self::StopIteration | Self::StandardError => Some(Self::Exception),
            Self::ArithmeticError
            | Self::AssertionError
            | Self::AttributeError
            | Self::LookupError
            | Self::NameError
            | Self::RuntimeError
            | Self::TypeError
            | Self::ValueError
            | Self::MemoryError => Some(Self::StandardError),
            Self::ZeroDivisionError | Self::OverflowError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::NotImplementedError => Some(Self::RuntimeError),
        }
    }

    /// Whether `self` is `other` or derives from it.
    #[must_use]
    pub fn is_subclass_of(self, other: Self) -> bool {
        let mut current = Some(self);
        while let Some(t) = current {
            if t == other {
                return true;
            }
            current = t.base();
        }
        false
    }

    /// Failure category reported for an exception of this class.
    #[must_use]
    pub fn failure_kind(self) -> FailureKind {
        if self.is_subclass_of(Self::AttributeError) {
            FailureKind::AttributeLookup
        } else if self.is_subclass_of(Self::TypeError) {
            FailureKind::TypeMismatch
        } else if self == Self::MemoryError {
            FailureKind::ResourceExhausted
        } else {
            FailureKind::Raised
        }
    }

    #[must_use]
    pub(crate) fn error(self, message: impl Into<String>) -> RunError {
        self.error_with_kind(message, self.failure_kind())
    }

    #[must_use]
    pub(crate) fn error_with_kind(self, message: impl Into<String>, kind: FailureKind) -> RunError {
        RunError::Exc(Box::new(ExceptionRaise::simple(self, Some(message.into()), kind)))
    }

    #[must_use]
    pub(crate) fn bare(self) -> RunError {
        RunError::Exc(Box::new(ExceptionRaise::simple(self, None, self.failure_kind())))
    }

    #[must_use]
    pub(crate) fn uncatchable(self, message: impl Into<String>, kind: FailureKind) -> RunError {
        RunError::UncatchableExc(Box::new(ExceptionRaise::simple(self, Some(message.into()), kind)))
    }

    /// `AttributeError` for a missing attribute on an instance.
    #[must_use]
    pub(crate) fn attribute_error(type_name: &str, attr: StringId) -> RunError {
        Self::AttributeError.error(format!("'{type_name}' object has no attribute '{attr}'"))
    }

    /// `AttributeError` for a missing attribute on a class.
    #[must_use]
    pub(crate) fn class_attribute_error(type_name: &str, attr: StringId) -> RunError {
        Self::AttributeError.error(format!("type object '{type_name}' has no attribute '{attr}'"))
    }

    #[must_use]
    pub(crate) fn type_error(message: impl Into<String>) -> RunError {
        Self::TypeError.error(message)
    }

    /// `TypeError` for a class structure that cannot exist: bad bases, MRO conflicts, cycles.
    #[must_use]
    pub(crate) fn structural_error(message: impl Into<String>) -> RunError {
        Self::TypeError.error_with_kind(message, FailureKind::StructuralInvalidity)
    }

    /// `TypeError` raised while constructing an instance.
    #[must_use]
    pub(crate) fn construction_error(message: impl Into<String>) -> RunError {
        Self::TypeError.error_with_kind(message, FailureKind::Construction)
    }

    #[must_use]
    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    #[must_use]
    pub(crate) fn unsupported_binary(op: &str, left: &str, right: &str) -> RunError {
        Self::type_error(format!("unsupported operand type(s) for {op}: '{left}' and '{right}'"))
    }

    /// Python 2 arity message, e.g. `f() takes exactly 2 arguments (3 given)`.
    #[must_use]
    pub(crate) fn arity_error(func: &str, expected: usize, min: usize, given: usize, kind: FailureKind) -> RunError {
        let (qualifier, count) = if min == expected {
            ("exactly", expected)
        } else if given < min {
            ("at least", min)
        } else {
            ("at most", expected)
        };
        let plural = if count == 1 { "argument" } else { "arguments" };
        Self::TypeError.error_with_kind(
            format!("{func}() takes {qualifier} {count} {plural} ({given} given)"),
            kind,
        )
    }
}

/// Coarse category of a failure, independent of the exception class raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum FailureKind {
    /// Attribute lookup found nothing (the receiver has no such attribute).
    AttributeLookup,
    /// An operation was applied to operands of an unsupported type.
    TypeMismatch,
    /// A class structure is invalid: MRO conflict, inheritance cycle, bad `__bases__`.
    StructuralInvalidity,
    /// Instance construction failed: bad `__new__`/`__init__` arguments or return value.
    Construction,
    /// User code raised an exception (or a builtin raised a non-type error).
    Raised,
    /// A resource limit was hit.
    ResourceExhausted,
    /// A bug in the runtime rather than in user code.
    Internal,
}

/// One frame of a traceback as recorded while an error unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStackFrame {
    /// Name of the code object executing in this frame.
    pub function: StringId,
    /// Index of the op that was executing.
    pub op_index: usize,
}

/// The exception carried by a [`RunError`].
///
/// Builtin errors raised by the runtime stay unmaterialized (`Simple`) until an `except`
/// clause needs the exception object; user-raised exceptions are already objects.
#[derive(Debug, Clone)]
pub(crate) enum PendingException {
    Simple { exc_type: ExcType, message: Option<String> },
    Object { type_id: HeapId, value: Value },
}

/// A raised exception with its failure category and traceback.
#[derive(Debug, Clone)]
pub struct ExceptionRaise {
    pub(crate) exc: PendingException,
    pub(crate) kind: FailureKind,
    pub(crate) traceback: Vec<RawStackFrame>,
}

impl ExceptionRaise {
    pub(crate) fn simple(exc_type: ExcType, message: Option<String>, kind: FailureKind) -> Self {
        Self {
            exc: PendingException::Simple { exc_type, message },
            kind,
            traceback: Vec::new(),
        }
    }

    pub(crate) fn object(type_id: HeapId, value: Value, kind: FailureKind, traceback: Vec<RawStackFrame>) -> Self {
        Self {
            exc: PendingException::Object { type_id, value },
            kind,
            traceback,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The builtin class of an unmaterialized exception.
    #[must_use]
    pub fn builtin_type(&self) -> Option<ExcType> {
        match &self.exc {
            PendingException::Simple { exc_type, .. } => Some(*exc_type),
            PendingException::Object { .. } => None,
        }
    }

    /// Message of an unmaterialized exception.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match &self.exc {
            PendingException::Simple { message, .. } => message.as_deref(),
            PendingException::Object { .. } => None,
        }
    }

    #[must_use]
    pub fn traceback(&self) -> &[RawStackFrame] {
        &self.traceback
    }
}

/// Error produced by any fallible runtime operation.
#[derive(Debug)]
pub enum RunError {
    /// Internal runtime error: a bug in the runtime, not in user code.
    Internal(Cow<'static, str>),
    /// Catchable Python exception.
    Exc(Box<ExceptionRaise>),
    /// Exception from a resource limit that `except` clauses cannot intercept.
    UncatchableExc(Box<ExceptionRaise>),
}

impl RunError {
    pub(crate) fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Internal(_) => FailureKind::Internal,
            Self::Exc(exc) | Self::UncatchableExc(exc) => exc.kind,
        }
    }

    /// The raised exception, if this is not an internal error.
    #[must_use]
    pub fn exception(&self) -> Option<&ExceptionRaise> {
        match self {
            Self::Internal(_) => None,
            Self::Exc(exc) | Self::UncatchableExc(exc) => Some(exc),
        }
    }

    /// Builtin class of an unmaterialized exception; `None` for exception objects.
    #[must_use]
    pub fn builtin_type(&self) -> Option<ExcType> {
        self.exception().and_then(ExceptionRaise::builtin_type)
    }

    /// Whether this is an unmaterialized exception of `exc_type` or one of its subclasses.
    ///
    /// Exception objects need the heap to answer; use
    /// [`Runtime::error_matches`](crate::Runtime::error_matches) for those.
    #[must_use]
    pub fn is_builtin(&self, exc_type: ExcType) -> bool {
        matches!(self, Self::Exc(_)) && self.builtin_type().is_some_and(|t| t.is_subclass_of(exc_type))
    }

    /// Appends a traceback frame as the error leaves a frame.
    pub(crate) fn add_frame(&mut self, frame: RawStackFrame) {
        if let Self::Exc(exc) | Self::UncatchableExc(exc) = self {
            exc.traceback.push(frame);
        }
    }
}

impl From<ExceptionRaise> for RunError {
    fn from(exc: ExceptionRaise) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Exc(exc) | Self::UncatchableExc(exc) => match &exc.exc {
                PendingException::Simple {
                    exc_type,
                    message: Some(message),
                } => write!(f, "{exc_type}: {message}"),
                PendingException::Simple { exc_type, message: None } => write!(f, "{exc_type}"),
                PendingException::Object { type_id, .. } => write!(f, "exception object of class {type_id:?}"),
            },
        }
    }
}

impl std::error::Error for RunError {}
