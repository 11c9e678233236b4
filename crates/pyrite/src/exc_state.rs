//! Currently-handled exception state.
//!
//! Entering an `except` clause pushes the caught exception; leaving the clause, normally or
//! by propagating a new error, pops it. The state is kept per call frame so that a frame
//! which returns or raises out of the middle of a handler discards exactly its own entries,
//! while a function called from inside a handler still sees the caller's exception through
//! [`ExceptionStateStack::current`] (this is what makes a bare `raise` in a helper work).
//!
//! Generators own their handler entries across suspension: [`ExceptionStateStack::leave_frame`]
//! hands back the frame's entries and [`ExceptionStateStack::enter_frame_with`] restores
//! them on resume, so a `yield` inside an `except` block neither leaks the generator's
//! exception to its consumer nor loses it when the generator resumes.

use crate::{exception_private::RawStackFrame, heap::HeapId, value::Value};

/// An exception being handled by an `except` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct HandledException {
    /// The exception's class.
    pub exc_type: HeapId,
    /// The exception instance.
    pub value: Value,
    pub traceback: Vec<RawStackFrame>,
}

#[derive(Debug, Default)]
pub(crate) struct ExceptionStateStack {
    frames: Vec<Vec<HandledException>>,
}

impl ExceptionStateStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a frame that already has handled exceptions, i.e. a resumed generator.
    pub fn enter_frame_with(&mut self, saved: Vec<HandledException>) {
        self.frames.push(saved);
    }

    /// Leaves the innermost frame, returning whatever it was still handling.
    pub fn leave_frame(&mut self) -> Vec<HandledException> {
        self.frames.pop().unwrap_or_default()
    }

    /// Pushes an exception entering a handler in the innermost frame, returning the new depth.
    pub fn push(&mut self, handled: HandledException) -> usize {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.push(handled);
                frame.len()
            }
            None => {
                self.frames.push(vec![handled]);
                1
            }
        }
    }

    /// Pops the innermost frame's most recent handled exception.
    pub fn pop(&mut self) -> Option<HandledException> {
        self.frames.last_mut().and_then(Vec::pop)
    }

    /// Number of entries in the innermost frame.
    pub fn frame_len(&self) -> usize {
        self.frames.last().map_or(0, Vec::len)
    }

    /// Drops the innermost frame's entries above `len`; used when unwinding to a handler.
    pub fn truncate_frame(&mut self, len: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.truncate(len);
        }
    }

    /// The exception a bare `raise` would re-raise: the most recent entry of the nearest
    /// frame that is handling anything.
    pub fn current(&self) -> Option<&HandledException> {
        self.frames.iter().rev().find_map(|frame| frame.last())
    }

    /// Total entries across all frames.
    pub fn depth(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }

    /// Every value held by the stack, for use as collection roots.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.frames.iter().flatten().map(|h| h.value)
    }

    /// Every class held by the stack, for use as collection roots.
    pub fn types(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.frames.iter().flatten().map(|h| h.exc_type)
    }
}
