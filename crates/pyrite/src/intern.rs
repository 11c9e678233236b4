//! Process-wide string interning for attribute names and identifiers.
//!
//! Every attribute name the runtime sees is interned into a [`StringId`]. Interning is
//! global rather than per-runtime so that a compiled [`Code`](crate::bytecode::Code) object,
//! which refers to names by id, can be shared between runtimes and threads.
//!
//! StringIds are laid out as follows:
//! * 0 to count(StaticStrings) - the [`StaticStrings`] in declaration order
//! * everything after - strings interned on demand
//!
//! Interned strings are leaked to obtain a `'static` lifetime. The set of attribute names a
//! program uses is small and bounded by its source, so the leak is bounded as well.

use std::{fmt, sync::LazyLock};

use ahash::AHashMap;
use parking_lot::RwLock;
use strum::{EnumCount, IntoEnumIterator, IntoStaticStr};

/// Index into the global string interner.
///
/// Uses `u32` to save space; this limits the process to ~4 billion unique names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the interned text.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        INTERNER.read().strings[self.index()]
    }
}

impl fmt::Debug for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringId({}, {:?})", self.0, self.as_str())
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names the runtime itself needs to look up, known at compile time.
///
/// Discriminants double as [`StringId`] values: the interner is seeded with these strings in
/// declaration order before any other string is interned.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumCount, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum StaticStrings {
    #[strum(serialize = "")]
    EmptyString,
    #[strum(serialize = "<module>")]
    Module,

    // ==========================
    // attribute protocol
    #[strum(serialize = "__getattribute__")]
    DunderGetattribute,
    #[strum(serialize = "__getattr__")]
    DunderGetattr,
    #[strum(serialize = "__setattr__")]
    DunderSetattr,
    #[strum(serialize = "__delattr__")]
    DunderDelattr,
    #[strum(serialize = "__get__")]
    DunderGet,
    #[strum(serialize = "__set__")]
    DunderSet,
    #[strum(serialize = "__delete__")]
    DunderDelete,

    // ==========================
    // construction and calls
    #[strum(serialize = "__new__")]
    DunderNew,
    #[strum(serialize = "__init__")]
    DunderInit,
    #[strum(serialize = "__call__")]
    DunderCall,
    #[strum(serialize = "__metaclass__")]
    DunderMetaclass,
    #[strum(serialize = "__instancecheck__")]
    DunderInstancecheck,
    #[strum(serialize = "__subclasscheck__")]
    DunderSubclasscheck,

    // ==========================
    // object and type attributes
    #[strum(serialize = "__class__")]
    DunderClass,
    #[strum(serialize = "__dict__")]
    DunderDict,
    #[strum(serialize = "__name__")]
    DunderName,
    #[strum(serialize = "__bases__")]
    DunderBases,
    #[strum(serialize = "__base__")]
    DunderBase,
    #[strum(serialize = "__mro__")]
    DunderMro,
    #[strum(serialize = "__doc__")]
    DunderDoc,
    Mro,
    #[strum(serialize = "__func__")]
    DunderFunc,
    #[strum(serialize = "__self__")]
    DunderSelf,
    #[strum(serialize = "__thisclass__")]
    DunderThisclass,
    ImSelf,
    ImFunc,
    ImClass,
    #[strum(serialize = "func_name")]
    FuncName,

    // ==========================
    // containers and iteration
    #[strum(serialize = "__iter__")]
    DunderIter,
    Next,
    Send,
    #[strum(serialize = "__getitem__")]
    DunderGetitem,
    #[strum(serialize = "__setitem__")]
    DunderSetitem,
    #[strum(serialize = "__delitem__")]
    DunderDelitem,
    #[strum(serialize = "__contains__")]
    DunderContains,
    #[strum(serialize = "__len__")]
    DunderLen,
    Append,
    Keys,
    Get,

    // ==========================
    // truthiness and representation
    #[strum(serialize = "__nonzero__")]
    DunderNonzero,
    #[strum(serialize = "__bool__")]
    DunderBool,
    #[strum(serialize = "__str__")]
    DunderStr,
    #[strum(serialize = "__repr__")]
    DunderRepr,

    // ==========================
    // rich comparison
    #[strum(serialize = "__eq__")]
    DunderEq,
    #[strum(serialize = "__ne__")]
    DunderNe,
    #[strum(serialize = "__lt__")]
    DunderLt,
    #[strum(serialize = "__le__")]
    DunderLe,
    #[strum(serialize = "__gt__")]
    DunderGt,
    #[strum(serialize = "__ge__")]
    DunderGe,

    // ==========================
    // binary operators, forward then reflected
    #[strum(serialize = "__add__")]
    DunderAdd,
    #[strum(serialize = "__radd__")]
    DunderRadd,
    #[strum(serialize = "__sub__")]
    DunderSub,
    #[strum(serialize = "__rsub__")]
    DunderRsub,
    #[strum(serialize = "__mul__")]
    DunderMul,
    #[strum(serialize = "__rmul__")]
    DunderRmul,
    #[strum(serialize = "__div__")]
    DunderDiv,
    #[strum(serialize = "__rdiv__")]
    DunderRdiv,
    #[strum(serialize = "__floordiv__")]
    DunderFloordiv,
    #[strum(serialize = "__rfloordiv__")]
    DunderRfloordiv,
    #[strum(serialize = "__mod__")]
    DunderMod,
    #[strum(serialize = "__rmod__")]
    DunderRmod,
    #[strum(serialize = "__and__")]
    DunderAnd,
    #[strum(serialize = "__rand__")]
    DunderRand,
    #[strum(serialize = "__or__")]
    DunderOr,
    #[strum(serialize = "__ror__")]
    DunderRor,
    #[strum(serialize = "__xor__")]
    DunderXor,
    #[strum(serialize = "__rxor__")]
    DunderRxor,

    // ==========================
    // property and exception attributes
    Fget,
    Fset,
    Fdel,
    Getter,
    Setter,
    Deleter,
    Args,
    Message,
}

impl StaticStrings {
    /// Returns the text of this static string.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl From<StaticStrings> for StringId {
    #[inline]
    fn from(value: StaticStrings) -> Self {
        Self(value as u32)
    }
}

impl PartialEq<StaticStrings> for StringId {
    fn eq(&self, other: &StaticStrings) -> bool {
        self.0 == *other as u32
    }
}

/// Interner storage. Ids index into `strings`; `lookup` is the reverse map.
struct Interner {
    strings: Vec<&'static str>,
    lookup: AHashMap<&'static str, StringId>,
}

impl Interner {
    fn seeded() -> Self {
        let mut interner = Self {
            strings: Vec::with_capacity(StaticStrings::COUNT * 2),
            lookup: AHashMap::with_capacity(StaticStrings::COUNT * 2),
        };
        for s in StaticStrings::iter() {
            let id = interner.push(s.as_str());
            debug_assert_eq!(id, StringId::from(s));
        }
        interner
    }

    fn push(&mut self, s: &'static str) -> StringId {
        let id = StringId(u32::try_from(self.strings.len()).expect("string interner overflow"));
        self.strings.push(s);
        self.lookup.insert(s, id);
        id
    }
}

static INTERNER: LazyLock<RwLock<Interner>> = LazyLock::new(|| RwLock::new(Interner::seeded()));

/// Interns `s`, returning the id shared by every occurrence of the same text.
pub fn intern(s: &str) -> StringId {
    if let Some(&id) = INTERNER.read().lookup.get(s) {
        return id;
    }
    let mut interner = INTERNER.write();
    // another thread may have interned it between the two locks
    if let Some(&id) = interner.lookup.get(s) {
        return id;
    }
    let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
    interner.push(leaked)
}

/// Returns the id for `s` if it has already been interned.
#[must_use]
pub fn lookup(s: &str) -> Option<StringId> {
    INTERNER.read().lookup.get(s).copied()
}
