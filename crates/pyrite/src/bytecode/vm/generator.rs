//! Generator resumption.

use crate::{
    dispatch::IterStep,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    runtime::Runtime,
    tracer::DispatchTracer,
    types::GeneratorState,
    value::Value,
};

use super::FrameExit;

/// What a resumption sends into the generator.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResumeValue {
    /// `next()`: the paused `yield` evaluates to `None`.
    Next,
    Send(Value),
}

impl<Tr: DispatchTracer> Runtime<Tr> {
    /// Runs a generator until its next `yield` (`IterStep::Value`) or until it finishes.
    ///
    /// The generator's handled exceptions are restored for the duration of the resumption, so
    /// a bare `raise` inside one of its `except` blocks sees its own exception even when the
    /// block spans a `yield`.
    pub(crate) fn resume_generator(&mut self, id: HeapId, resume: ResumeValue) -> RunResult<IterStep> {
        let HeapData::Generator(generator) = self.heap.get_mut(id) else {
            return Err(RunError::internal("resume_generator on a non-generator"));
        };
        let started = match generator.state {
            GeneratorState::Running => return Err(ExcType::ValueError.error("generator already executing")),
            GeneratorState::Finished => return Ok(IterStep::End),
            GeneratorState::New => {
                if let ResumeValue::Send(value) = resume
                    && !value.is_none()
                {
                    return Err(ExcType::type_error("can't send non-None value to a just-started generator"));
                }
                false
            }
            GeneratorState::Suspended => true,
        };
        let Some(mut frame) = generator.frame.take() else {
            return Err(RunError::internal("suspended generator without a frame"));
        };
        generator.state = GeneratorState::Running;
        let saved_exc = std::mem::take(&mut generator.saved_exc);

        if started {
            frame.stack.push(match resume {
                ResumeValue::Next => Value::None,
                ResumeValue::Send(value) => value,
            });
        }
        let (result, saved_exc) = self.run_call_frame(&mut frame, saved_exc);

        let HeapData::Generator(generator) = self.heap.get_mut(id) else {
            return Err(RunError::internal("generator slot reused while running"));
        };
        match result {
            Ok(FrameExit::Yield(value)) => {
                generator.frame = Some(frame);
                generator.saved_exc = saved_exc;
                generator.state = GeneratorState::Suspended;
                Ok(IterStep::Value(value))
            }
            Ok(FrameExit::Return(_)) => {
                generator.state = GeneratorState::Finished;
                Ok(IterStep::End)
            }
            Err(err) => {
                generator.state = GeneratorState::Finished;
                Err(err)
            }
        }
    }
}
