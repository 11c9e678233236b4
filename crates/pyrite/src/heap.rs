use std::collections::BTreeMap;

use ahash::AHashMap;
use num_bigint::BigInt;
use serde::Serialize;

use crate::{
    exception_private::{RunError, RunResult},
    resource::ResourceError,
    types::{AttrTable, BoundMethod, Function, Generator, Instance, Property, SeqIter, SuperProxy, TypeObject},
    value::Value,
};

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration order,
/// making snapshots suitable for display and comparison without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Number of objects currently pinned by the host.
    pub pinned_objects: usize,
    /// Breakdown of live objects by `HeapData` variant name ("Instance", "Type", "List", ...).
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// Difference between two heap snapshots, computed by [`HeapStats::diff`].
///
/// Positive deltas mean growth, negative means shrinkage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapDiff {
    pub live_objects_delta: isize,
    pub free_slots_delta: isize,
    pub total_slots_delta: isize,
    pub pinned_objects_delta: isize,
    /// Per-type deltas for every type present in either snapshot.
    pub objects_by_type_delta: BTreeMap<&'static str, isize>,
}

impl HeapStats {
    /// Computes the difference between `self` ("before") and `other` ("after").
    ///
    /// # Example
    ///
    /// ```
    /// # use std::collections::BTreeMap;
    /// # use pyrite::HeapStats;
    /// let before = HeapStats {
    ///     live_objects: 2, free_slots: 0, total_slots: 2, pinned_objects: 0,
    ///     objects_by_type: BTreeMap::new(),
    /// };
    /// let after = HeapStats {
    ///     live_objects: 5, free_slots: 1, total_slots: 6, pinned_objects: 1,
    ///     objects_by_type: BTreeMap::new(),
    /// };
    /// let diff = before.diff(&after);
    /// assert_eq!(diff.live_objects_delta, 3);
    /// ```
    #[must_use]
    pub fn diff(&self, other: &Self) -> HeapDiff {
        let mut objects_by_type_delta = BTreeMap::new();
        for (&name, &count) in &self.objects_by_type {
            let after = other.objects_by_type.get(name).copied().unwrap_or(0);
            objects_by_type_delta.insert(name, isize_delta(count, after));
        }
        for (&name, &count) in &other.objects_by_type {
            objects_by_type_delta.entry(name).or_insert_with(|| isize_delta(0, count));
        }
        HeapDiff {
            live_objects_delta: isize_delta(self.live_objects, other.live_objects),
            free_slots_delta: isize_delta(self.free_slots, other.free_slots),
            total_slots_delta: isize_delta(self.total_slots, other.total_slots),
            pinned_objects_delta: isize_delta(self.pinned_objects, other.pinned_objects),
            objects_by_type_delta,
        }
    }
}

impl HeapDiff {
    /// Returns `true` when nothing changed between the two snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_objects_delta == 0
            && self.free_slots_delta == 0
            && self.total_slots_delta == 0
            && self.pinned_objects_delta == 0
            && self.objects_by_type_delta.values().all(|&v| v == 0)
    }
}

impl std::fmt::Display for HeapDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "HeapDiff: no changes");
        }
        write!(
            f,
            "HeapDiff: {:+} live objects, {:+} slots",
            self.live_objects_delta, self.total_slots_delta
        )?;
        for (&type_name, &delta) in &self.objects_by_type_delta {
            if delta != 0 {
                write!(f, "\n  {type_name}: {delta:+}")?;
            }
        }
        Ok(())
    }
}

fn isize_delta(before: usize, after: usize) -> isize {
    (after as isize).wrapping_sub(before as isize)
}

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

/// Host callback invoked once for each object reclaimed by [`Heap::collect`], with the
/// object's id and its `HeapData` variant name.
pub type Finalizer = Box<dyn FnMut(HeapId, &'static str) + Send>;

/// Payload of a heap-allocated object.
#[derive(Debug, strum::IntoStaticStr)]
pub(crate) enum HeapData {
    Type(TypeObject),
    Instance(Instance),
    Str(String),
    Long(BigInt),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    /// String-keyed attribute table; also backs instance `__dict__`s.
    Dict(AttrTable),
    /// Read-only live view of a class namespace, holding the class id.
    DictProxy(HeapId),
    Function(Function),
    BoundMethod(BoundMethod),
    Property(Property),
    ClassMethod(Value),
    StaticMethod(Value),
    Super(SuperProxy),
    Iter(SeqIter),
    Generator(Generator),
}

impl HeapData {
    /// Pushes every heap object directly referenced by this one.
    fn children(&self, out: &mut Vec<HeapId>) {
        let mut push = |v: &Value| {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        };
        match self {
            Self::Type(t) => {
                t.dict.values().for_each(&mut push);
                let ids = t.bases.iter().chain(&t.mro).copied().chain([t.metatype]);
                ids.for_each(|id| push(&Value::Ref(id)));
            }
            Self::Instance(i) => {
                push(&Value::Ref(i.class_id));
                if let Some(dict) = i.dict {
                    push(&Value::Ref(dict));
                }
            }
            Self::Str(_) | Self::Long(_) => {}
            Self::Tuple(items) | Self::List(items) => items.iter().for_each(push),
            Self::Dict(table) => table.values().for_each(push),
            Self::DictProxy(class_id) => push(&Value::Ref(*class_id)),
            Self::Function(f) => f.defaults.iter().for_each(push),
            Self::BoundMethod(m) => {
                push(&m.func);
                if let Some(receiver) = &m.receiver {
                    push(receiver);
                }
                if let Some(class) = m.class {
                    push(&Value::Ref(class));
                }
            }
            Self::Property(p) => [p.fget, p.fset, p.fdel].iter().for_each(push),
            Self::ClassMethod(func) | Self::StaticMethod(func) => push(func),
            Self::Super(s) => {
                push(&s.obj);
                push(&Value::Ref(s.this_class));
                push(&Value::Ref(s.obj_type));
            }
            Self::Iter(it) => it.values().for_each(|v| push(&v)),
            Self::Generator(g) => g.values().for_each(|v| push(&v)),
        }
    }
}

/// Arena of heap objects with a free list, host pins, and a mark-sweep collector.
///
/// Objects are never freed implicitly. They are reclaimed only by [`Heap::collect`], which
/// keeps everything reachable from pins and the roots the caller supplies.
pub(crate) struct Heap {
    entries: Vec<Option<HeapData>>,
    free_list: Vec<HeapId>,
    live: usize,
    pins: AHashMap<HeapId, usize>,
    max_allocations: Option<usize>,
    max_result_length: Option<usize>,
    finalizer: Option<Finalizer>,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live)
            .field("slots", &self.entries.len())
            .field("pins", &self.pins.len())
            .finish_non_exhaustive()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            pins: AHashMap::new(),
            max_allocations: None,
            max_result_length: None,
            finalizer: None,
        }
    }

    pub fn set_max_allocations(&mut self, limit: Option<usize>) {
        self.max_allocations = limit;
    }

    pub fn set_max_result_length(&mut self, limit: Option<usize>) {
        self.max_result_length = limit;
    }

    /// Rejects a string, list, or tuple result of `len` elements before it is built.
    pub fn check_result_length(&self, len: usize) -> Result<(), ResourceError> {
        match self.max_result_length {
            Some(limit) if len > limit => Err(ResourceError::ResultLength { limit, requested: len }),
            _ => Ok(()),
        }
    }

    pub fn set_finalizer(&mut self, finalizer: Option<Finalizer>) {
        self.finalizer = finalizer;
    }

    /// Allocates `data`, reusing a freed slot when one is available.
    pub fn allocate(&mut self, data: HeapData) -> RunResult<HeapId> {
        if let Some(limit) = self.max_allocations
            && self.live >= limit
        {
            return Err(RunError::from(ResourceError::Allocation {
                limit,
                count: self.live + 1,
            }));
        }
        self.live += 1;
        if let Some(id) = self.free_list.pop() {
            self.entries[id.0] = Some(data);
            Ok(id)
        } else {
            self.entries.push(Some(data));
            Ok(HeapId(self.entries.len() - 1))
        }
    }

    /// Releases a slot allocated moments ago that was never published, e.g. a class whose
    /// MRO turned out to be inconsistent.
    pub fn discard(&mut self, id: HeapId) {
        if self.entries.get_mut(id.0).and_then(Option::take).is_some() {
            self.live -= 1;
            self.free_list.push(id);
        }
    }

    #[inline]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries[id.0].as_ref().expect("Heap::get: object already freed")
    }

    #[inline]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries[id.0].as_mut().expect("Heap::get_mut: object already freed")
    }

    /// The string-keyed table behind a dict, or behind a dictproxy's class.
    pub fn mapping(&self, id: HeapId) -> Option<&AttrTable> {
        match self.get(id) {
            HeapData::Dict(table) => Some(table),
            HeapData::DictProxy(class_id) => match self.get(*class_id) {
                HeapData::Type(t) => Some(&t.dict),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn try_get(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Pins `id` as a collection root. Pins nest: each `retain` needs a matching `release`.
    pub fn retain(&mut self, id: HeapId) {
        *self.pins.entry(id).or_insert(0) += 1;
    }

    /// Drops one pin on `id`, returning whether the object is still pinned.
    pub fn release(&mut self, id: HeapId) -> bool {
        match self.pins.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.pins.remove(&id);
                false
            }
            None => false,
        }
    }

    /// Frees every object not reachable from the pins or `roots`, returning how many were freed.
    ///
    /// The finalizer, if set, runs once per freed object after marking completes, so it never
    /// observes a half-swept heap.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = HeapId>) -> usize {
        let mut marked = vec![false; self.entries.len()];
        let mut work: Vec<HeapId> = self.pins.keys().copied().chain(roots).collect();
        while let Some(id) = work.pop() {
            let Some(slot) = marked.get_mut(id.0) else { continue };
            if *slot {
                continue;
            }
            *slot = true;
            if let Some(data) = &self.entries[id.0] {
                data.children(&mut work);
            }
        }

        let mut freed = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if !marked[index]
                && let Some(data) = entry.take()
            {
                freed.push((HeapId(index), <&'static str>::from(&data)));
            }
        }
        self.live -= freed.len();
        self.free_list.extend(freed.iter().map(|(id, _)| *id));
        if let Some(finalizer) = &mut self.finalizer {
            for &(id, kind) in &freed {
                finalizer(id, kind);
            }
        }
        freed.len()
    }

    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        for data in self.entries.iter().flatten() {
            *objects_by_type.entry(<&'static str>::from(data)).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.live,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            pinned_objects: self.pins.len(),
            objects_by_type,
        }
    }
}
