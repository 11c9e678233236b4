use std::{
    ops::BitOr,
    sync::atomic::{AtomicU64, Ordering},
};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    builtins::{Builtin, BuiltinMethod},
    heap::{Heap, HeapData, HeapId},
    intern::{StaticStrings, StringId},
    value::Value,
};

/// String-keyed attribute table preserving insertion order, used for type dicts and
/// instance `__dict__`s.
pub(crate) type AttrTable = IndexMap<StringId, Value, ahash::RandomState>;

pub(crate) fn new_attr_table() -> AttrTable {
    AttrTable::with_hasher(ahash::RandomState::new())
}

static NEXT_TYPE_UID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique type uid. Uids are never reused, even after the type is collected,
/// so a uid seen by an inline cache can only ever identify one type.
pub(crate) fn next_type_uid() -> u64 {
    NEXT_TYPE_UID.fetch_add(1, Ordering::Relaxed)
}

/// Bit set describing a type's structure and which special methods its MRO provides.
///
/// The protocol bits are derived state, recomputed whenever the type's dict or MRO (or an
/// ancestor's) changes, so hot paths can skip dictionary lookups for hooks a type lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeFlags(u32);

impl TypeFlags {
    /// Created by a class statement or `type(name, bases, dict)`; mutable.
    pub const HEAPTYPE: Self = Self(1 << 0);
    /// May be used as a base class.
    pub const BASETYPE: Self = Self(1 << 1);
    /// Defines `__getattribute__` other than the generic one.
    pub const HAS_GETATTRIBUTE: Self = Self(1 << 2);
    pub const HAS_GETATTR: Self = Self(1 << 3);
    /// Defines `__setattr__` other than the generic one.
    pub const HAS_SETATTR: Self = Self(1 << 4);
    /// Defines `__delattr__` other than the generic one.
    pub const HAS_DELATTR: Self = Self(1 << 5);
    pub const HAS_GET: Self = Self(1 << 6);
    pub const HAS_SET: Self = Self(1 << 7);
    pub const HAS_DELETE: Self = Self(1 << 8);
    pub const HAS_CALL: Self = Self(1 << 9);
    pub const HAS_ITER: Self = Self(1 << 10);
    pub const HAS_GETITEM: Self = Self(1 << 11);
    pub const HAS_LEN: Self = Self(1 << 12);
    pub const HAS_NONZERO: Self = Self(1 << 13);
    pub const HAS_CONTAINS: Self = Self(1 << 14);

    const STRUCTURAL: Self = Self(Self::HEAPTYPE.0 | Self::BASETYPE.0);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for TypeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Special methods that set a protocol flag when present anywhere in the MRO.
const PROTOCOL_FLAGS: [(StaticStrings, TypeFlags); 13] = [
    (StaticStrings::DunderGetattribute, TypeFlags::HAS_GETATTRIBUTE),
    (StaticStrings::DunderGetattr, TypeFlags::HAS_GETATTR),
    (StaticStrings::DunderSetattr, TypeFlags::HAS_SETATTR),
    (StaticStrings::DunderDelattr, TypeFlags::HAS_DELATTR),
    (StaticStrings::DunderGet, TypeFlags::HAS_GET),
    (StaticStrings::DunderSet, TypeFlags::HAS_SET),
    (StaticStrings::DunderDelete, TypeFlags::HAS_DELETE),
    (StaticStrings::DunderCall, TypeFlags::HAS_CALL),
    (StaticStrings::DunderIter, TypeFlags::HAS_ITER),
    (StaticStrings::DunderGetitem, TypeFlags::HAS_GETITEM),
    (StaticStrings::DunderLen, TypeFlags::HAS_LEN),
    (StaticStrings::DunderNonzero, TypeFlags::HAS_NONZERO),
    (StaticStrings::DunderContains, TypeFlags::HAS_CONTAINS),
];

/// Whether `value` is one of the generic attribute hooks every type inherits from
/// `object` or `type`. Such hooks do not count as an override.
fn is_generic_hook(value: Value) -> bool {
    matches!(
        value,
        Value::Builtin(Builtin::Method(
            BuiltinMethod::ObjectGetattribute
                | BuiltinMethod::ObjectSetattr
                | BuiltinMethod::ObjectDelattr
                | BuiltinMethod::TypeGetattribute
                | BuiltinMethod::TypeSetattr
                | BuiltinMethod::TypeDelattr
        ))
    )
}

/// Memory layout of a type's instances, which decides what `object.__new__` allocates and
/// which `__class__`/`__bases__` assignments are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    /// Instances are `HeapData::Instance`.
    Object,
    /// Instances are themselves types (metaclasses).
    Type,
    /// Instances are builtin payloads (ints, lists, functions...) created by the type's own constructor.
    Native,
}

/// Weak entry in a class's subclass registry.
///
/// `class_uid` detects a stale entry whose heap slot was collected and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubclassEntry {
    pub class_id: HeapId,
    pub class_uid: u64,
}

/// A class object: builtin or user-defined.
#[derive(Debug)]
pub(crate) struct TypeObject {
    pub name: StringId,
    pub uid: u64,
    pub metatype: HeapId,
    pub bases: SmallVec<[HeapId; 2]>,
    /// Method resolution order, starting with this type.
    pub mro: Vec<HeapId>,
    pub dict: AttrTable,
    pub flags: TypeFlags,
    pub layout: Layout,
    /// Whether instances carry a `__dict__`.
    pub instance_dict: bool,
    pub subclasses: Vec<SubclassEntry>,
}

impl TypeObject {
    pub fn new(name: StringId, metatype: HeapId, bases: &[HeapId], layout: Layout) -> Self {
        Self {
            name,
            uid: next_type_uid(),
            metatype,
            bases: bases.iter().copied().collect(),
            mro: Vec::new(),
            dict: new_attr_table(),
            flags: TypeFlags::empty(),
            layout,
            instance_dict: false,
            subclasses: Vec::new(),
        }
    }

    pub fn is_heap_type(&self) -> bool {
        self.flags.contains(TypeFlags::HEAPTYPE)
    }
}

/// An instance of a class with `Layout::Object`.
#[derive(Debug)]
pub(crate) struct Instance {
    pub class_id: HeapId,
    /// The `__dict__`, allocated on first attribute store.
    pub dict: Option<HeapId>,
}

/// Borrows the type object at `id`.
///
/// Panics if `id` is not a type; callers only pass ids they obtained as types.
pub(crate) fn type_obj(heap: &Heap, id: HeapId) -> &TypeObject {
    match heap.get(id) {
        HeapData::Type(t) => t,
        other => panic!("expected a type object, found {}", <&'static str>::from(other)),
    }
}

pub(crate) fn type_obj_mut(heap: &mut Heap, id: HeapId) -> &mut TypeObject {
    match heap.get_mut(id) {
        HeapData::Type(t) => t,
        other => panic!("expected a type object, found {}", <&'static str>::from(&*other)),
    }
}

/// Looks `name` up along the MRO of `type_id`, returning the defining class and the value.
pub(crate) fn mro_lookup(heap: &Heap, type_id: HeapId, name: StringId) -> Option<(HeapId, Value)> {
    type_obj(heap, type_id)
        .mro
        .iter()
        .find_map(|&cls| type_obj(heap, cls).dict.get(&name).map(|v| (cls, *v)))
}

/// Whether `sub` has `sup` in its MRO.
pub(crate) fn is_subtype(heap: &Heap, sub: HeapId, sup: HeapId) -> bool {
    sub == sup || type_obj(heap, sub).mro.contains(&sup)
}

/// Recomputes the protocol bits of a type from its current MRO, keeping structural bits.
pub(crate) fn compute_flags(heap: &Heap, type_id: HeapId) -> TypeFlags {
    let current = type_obj(heap, type_id).flags;
    let mut flags = TypeFlags(current.0 & TypeFlags::STRUCTURAL.0);
    for (name, flag) in PROTOCOL_FLAGS {
        if let Some((_, value)) = mro_lookup(heap, type_id, name.into())
            && !is_generic_hook(value)
        {
            flags.insert(flag);
        }
    }
    flags
}

/// Live subclasses of `type_id`, all generations, parents before children.
pub(crate) fn all_subclasses(heap: &Heap, type_id: HeapId) -> Vec<HeapId> {
    let mut out: Vec<HeapId> = Vec::new();
    let mut index = 0;
    let mut frontier = vec![type_id];
    while index < frontier.len() {
        let current = frontier[index];
        index += 1;
        for entry in &type_obj(heap, current).subclasses {
            let live = matches!(heap.try_get(entry.class_id), Some(HeapData::Type(t)) if t.uid == entry.class_uid);
            if live && !out.contains(&entry.class_id) {
                out.push(entry.class_id);
                frontier.push(entry.class_id);
            }
        }
    }
    // a class reachable through two parents must come after both of them
    out.sort_by_key(|&id| type_obj(heap, id).mro.len());
    out
}
