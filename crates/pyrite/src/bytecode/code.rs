//! Code objects: the executable representation consumed by the evaluator.

use std::sync::Arc;

use crate::{
    cache::{AttributeSite, BinarySite, CacheState, CallSite, SiteStats, StoreSite},
    intern::StringId,
};

use super::op::Op;

/// A constant pool entry.
#[derive(Debug, Clone)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// An interned string.
    Str(StringId),
    /// Nested code, referenced by `MakeFunction`.
    Code(Arc<Code>),
}

/// An inline-cache site owned by a code object.
#[derive(Debug)]
pub enum Site {
    Attr(AttributeSite),
    Store(StoreSite),
    Call(CallSite),
    Binary(BinarySite),
}

impl Site {
    #[must_use]
    pub fn state(&self) -> CacheState {
        match self {
            Self::Attr(s) => s.state(),
            Self::Store(s) => s.state(),
            Self::Call(s) => s.state(),
            Self::Binary(s) => s.state(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> SiteStats {
        match self {
            Self::Attr(s) => s.stats(),
            Self::Store(s) => s.stats(),
            Self::Call(s) => s.stats(),
            Self::Binary(s) => s.stats(),
        }
    }
}

/// A compiled function body or module.
///
/// Immutable once built except for its inline-cache sites, which synchronize internally.
/// `Code` is `Send + Sync`, so one `Arc<Code>` may be executed by runtimes on several
/// threads at once; they share (and jointly warm) its caches.
#[derive(Debug)]
pub struct Code {
    pub(crate) name: StringId,
    /// Number of positional parameters; they occupy the first local slots.
    pub(crate) arg_count: usize,
    pub(crate) local_names: Vec<StringId>,
    pub(crate) consts: Vec<Const>,
    pub(crate) ops: Vec<Op>,
    pub(crate) sites: Box<[Site]>,
    /// Contains a `Yield`: calling the function creates a generator.
    pub(crate) is_generator: bool,
}

impl Code {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name.as_str()
    }

    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    #[must_use]
    pub fn local_count(&self) -> usize {
        self.local_names.len()
    }

    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.is_generator
    }

    /// Inline-cache sites, indexed by the `site` operand of the ops that use them.
    #[must_use]
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    #[must_use]
    pub fn site(&self, index: usize) -> Option<&Site> {
        self.sites.get(index)
    }

    /// Finds a nested code object by name, searching the constant pools depth first.
    #[must_use]
    pub fn nested(&self, name: &str) -> Option<&Arc<Code>> {
        self.consts.iter().find_map(|c| match c {
            Const::Code(code) if code.name() == name => Some(code),
            Const::Code(code) => code.nested(name),
            _ => None,
        })
    }
}
