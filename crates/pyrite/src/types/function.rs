use std::sync::Arc;

use crate::{bytecode::Code, heap::HeapId, intern::StringId, value::Value};

/// A Python function: code plus default argument values.
#[derive(Debug)]
pub(crate) struct Function {
    pub name: StringId,
    pub code: Arc<Code>,
    /// Defaults for the trailing parameters, in parameter order.
    pub defaults: Vec<Value>,
}

/// An `instancemethod`: a callable bound to a receiver, or unbound when accessed on a class.
///
/// Unbound methods (`receiver == None`) check that their first argument is an instance of
/// `class`, as Python 2 does.
#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub func: Value,
    pub receiver: Option<Value>,
    pub class: Option<HeapId>,
}

/// A `property` data descriptor. Missing accessors are `Value::None`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Property {
    pub fget: Value,
    pub fset: Value,
    pub fdel: Value,
}

/// A `super(this_class, obj)` proxy.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SuperProxy {
    pub this_class: HeapId,
    /// The receiver: an instance, or a class for `super(C, cls)` in classmethods.
    pub obj: Value,
    /// The type whose MRO is searched: `type(obj)`, or `obj` itself when it is a subclass of `this_class`.
    pub obj_type: HeapId,
}
