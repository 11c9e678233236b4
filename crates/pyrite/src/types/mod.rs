//! Type objects and the heap payloads of builtin types.

mod bootstrap;
pub(crate) mod class;
mod function;
mod generator;
mod iter;
pub(crate) mod mro;

pub(crate) use bootstrap::BuiltinTypes;
pub(crate) use class::{
    AttrTable, Instance, Layout, SubclassEntry, TypeObject, all_subclasses, compute_flags, is_subtype, mro_lookup,
    new_attr_table, type_obj, type_obj_mut,
};
pub use class::TypeFlags;
pub(crate) use function::{BoundMethod, Function, Property, SuperProxy};
pub(crate) use generator::{Generator, GeneratorState};
pub(crate) use iter::{IterSource, SeqIter};
