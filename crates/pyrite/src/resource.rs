use std::fmt;

use crate::{
    cache::DEFAULT_POLYMORPHIC_LIMIT,
    exception_private::{ExcType, FailureKind, RunError},
};

/// Default maximum recursion depth for nested calls.
///
/// Matches the default of `sys.getrecursionlimit()`.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Maximum depth of an inheritance chain accepted by class creation and `__bases__` assignment.
pub const MAX_INHERITANCE_DEPTH: usize = 256;

/// Maximum length of a computed method resolution order.
pub const MAX_MRO_LENGTH: usize = 1024;

/// Error returned when a resource limit is exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of live heap objects exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum call depth exceeded.
    Recursion { limit: usize, depth: usize },
    /// A single string, list, or tuple result would be longer than allowed.
    ResultLength { limit: usize, requested: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Recursion { .. } => {
                write!(f, "maximum recursion depth exceeded")
            }
            Self::ResultLength { limit, requested } => {
                write!(f, "result length limit exceeded: {requested} > {limit}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        // recursion overflow is catchable like any RuntimeError, running out of heap is not
        match err {
            ResourceError::Recursion { .. } => {
                ExcType::RuntimeError.error_with_kind(err.to_string(), FailureKind::ResourceExhausted)
            }
            ResourceError::Allocation { .. } | ResourceError::ResultLength { .. } => {
                ExcType::MemoryError.uncatchable(err.to_string(), FailureKind::ResourceExhausted)
            }
        }
    }
}

/// Limits enforced by a [`Runtime`](crate::Runtime).
///
/// `None` means unlimited, except for recursion depth which always has a ceiling so deep
/// recursion raises instead of overflowing the native stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of live heap objects, checked on every allocation.
    pub max_allocations: Option<usize>,
    /// Maximum nesting of Python-level calls.
    pub max_recursion_depth: usize,
    /// Maximum length of one string, list, or tuple built by repetition.
    pub max_result_length: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_allocations: None,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_result_length: None,
        }
    }
}

impl ResourceLimits {
    /// Creates limits with unlimited allocations and the default recursion depth.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    #[must_use]
    pub fn max_result_length(mut self, limit: usize) -> Self {
        self.max_result_length = Some(limit);
        self
    }

    /// Checks whether one more call frame may be pushed at `depth`.
    pub(crate) fn check_recursion(&self, depth: usize) -> Result<(), ResourceError> {
        if depth >= self.max_recursion_depth {
            Err(ResourceError::Recursion {
                limit: self.max_recursion_depth,
                depth,
            })
        } else {
            Ok(())
        }
    }
}

/// Construction-time configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of distinct receiver shapes an inline cache site keeps before it gives up
    /// and goes megamorphic. Values below 1 are treated as 1.
    pub polymorphic_limit: usize,
    pub limits: ResourceLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            polymorphic_limit: DEFAULT_POLYMORPHIC_LIMIT,
            limits: ResourceLimits::default(),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_polymorphic_limit(mut self, limit: usize) -> Self {
        self.polymorphic_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}
