use crate::{heap::HeapId, value::Value};

/// Iterator over a builtin sequence, or over any object through legacy `__getitem__`.
#[derive(Debug)]
pub(crate) struct SeqIter {
    pub source: IterSource,
    pub index: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum IterSource {
    /// A list, tuple, str, or dict (iterating its keys).
    Native(HeapId),
    /// An interned string, iterated by character.
    InternStr(Value),
    /// An object without `__iter__`: call `obj[0]`, `obj[1]`, ... until `IndexError`.
    GetItem(Value),
    /// Already returned the end of iteration.
    Exhausted,
}

impl SeqIter {
    pub fn new(source: IterSource) -> Self {
        Self { source, index: 0 }
    }

    pub fn values(&self) -> impl Iterator<Item = Value> {
        let value = match self.source {
            IterSource::Native(id) => Some(Value::Ref(id)),
            IterSource::InternStr(v) | IterSource::GetItem(v) => Some(v),
            IterSource::Exhausted => None,
        };
        value.into_iter()
    }
}
