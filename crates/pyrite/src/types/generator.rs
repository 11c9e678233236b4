//! Generator objects.
//!
//! Calling a generator function binds its arguments into a fresh frame and wraps it in a
//! Generator instead of running it. Each `next()`/`send()` resumes the frame until the next
//! `yield` or until the body returns.

use crate::{bytecode::vm::Frame, exc_state::HandledException, value::Value};

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GeneratorState {
    /// Created but not yet started.
    New,
    /// Currently executing; re-entering it is an error.
    Running,
    /// Suspended at a `yield`.
    Suspended,
    /// Returned or raised; every further resume reports exhaustion.
    Finished,
}

#[derive(Debug)]
pub(crate) struct Generator {
    /// The suspended frame. Taken out while the generator runs.
    pub frame: Option<Box<Frame>>,
    pub state: GeneratorState,
    /// Handled exceptions of the generator's own `except` blocks, saved while suspended.
    pub saved_exc: Vec<HandledException>,
}

impl Generator {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame: Some(Box::new(frame)),
            state: GeneratorState::New,
            saved_exc: Vec::new(),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        let frame_values = self.frame.iter().flat_map(|f| f.values());
        let saved = self.saved_exc.iter().flat_map(|h| [h.value, Value::Ref(h.exc_type)]);
        frame_values.chain(saved)
    }
}
