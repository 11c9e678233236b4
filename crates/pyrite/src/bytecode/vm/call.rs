//! Calling: functions, bound and unbound methods, classes, and `__call__` instances.

use std::sync::Arc;

use crate::{
    builtins::{Builtin, BuiltinMethod},
    bytecode::Code,
    exc_state::HandledException,
    exception_private::{ExcType, FailureKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    runtime::Runtime,
    tracer::DispatchTracer,
    types::{BoundMethod, Generator},
    value::Value,
};

use super::{Frame, FrameExit};

impl<Tr: DispatchTracer> Runtime<Tr> {
    /// Calls any callable with positional arguments.
    pub fn call_object(&mut self, callable: Value, args: &[Value]) -> RunResult<Value> {
        let Value::Ref(id) = callable else {
            return match callable {
                Value::Builtin(builtin) => self.call_builtin(builtin, args),
                _ => self.call_dunder_call(callable, args),
            };
        };
        match self.heap.get(id) {
            HeapData::Function(_) => self.call_function(id, args.to_vec()),
            &HeapData::BoundMethod(BoundMethod { func, receiver, class }) => match receiver {
                Some(receiver) => self.call_with_self(func, receiver, args),
                None => {
                    self.check_unbound_receiver(func, class, args)?;
                    self.call_object(func, args)
                }
            },
            HeapData::Type(_) => {
                let meta = self.type_of(callable);
                match self.lookup(meta, StaticStrings::DunderCall.into()) {
                    Some(Value::Builtin(Builtin::Method(BuiltinMethod::TypeCall))) => self.new_instance(id, args),
                    Some(hook) => self.call_special_value(hook, callable, args),
                    None => Err(ExcType::not_callable(self.type_name(meta))),
                }
            }
            _ => self.call_dunder_call(callable, args),
        }
    }

    fn call_dunder_call(&mut self, callable: Value, args: &[Value]) -> RunResult<Value> {
        match self.lookup_special(callable, StaticStrings::DunderCall) {
            Some(hook) => self.call_special_value(hook, callable, args),
            None => Err(ExcType::not_callable(self.value_type_name(callable))),
        }
    }

    /// Python 2 unbound methods require an instance of their class as the first argument.
    fn check_unbound_receiver(&self, func: Value, class: Option<HeapId>, args: &[Value]) -> RunResult<()> {
        let Some(class) = class else { return Ok(()) };
        if let Some(&first) = args.first()
            && self.is_subtype(self.type_of(first), class)
        {
            return Ok(());
        }
        let got = match args.first() {
            Some(&first) => format!("{} instance", self.value_type_name(first)),
            None => "nothing".to_owned(),
        };
        Err(ExcType::type_error(format!(
            "unbound method {}() must be called with {} instance as first argument (got {got} instead)",
            self.callable_name(func),
            self.type_name(class),
        )))
    }

    /// Calls `func` with `obj` prepended, binding through the descriptor protocol unless
    /// `func` is a plain function or builtin method.
    pub(crate) fn call_with_self(&mut self, func: Value, obj: Value, args: &[Value]) -> RunResult<Value> {
        match func {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Function(_)) => {
                self.call_function(id, with_receiver(obj, args))
            }
            Value::Builtin(builtin @ Builtin::Method(_)) => self.call_builtin(builtin, &with_receiver(obj, args)),
            _ => {
                let owner = self.type_of(obj);
                let bound = self.descriptor_get(func, Some(obj), owner)?;
                self.call_object(bound, args)
            }
        }
    }

    /// Calls a Python function. Generator functions return a fresh generator instead of running.
    pub(crate) fn call_function(&mut self, func_id: HeapId, args: Vec<Value>) -> RunResult<Value> {
        let HeapData::Function(func) = self.heap.get(func_id) else {
            return Err(RunError::internal("call_function on a non-function"));
        };
        let code = Arc::clone(&func.code);
        let locals = bind_arguments(&code, &func.defaults, args)?;
        let mut frame = Frame::new(code, locals);
        if frame.code.is_generator {
            return self.alloc(HeapData::Generator(Generator::new(frame)));
        }
        let (result, _) = self.run_call_frame(&mut frame, Vec::new());
        match result? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(RunError::internal("yield from a non-generator frame")),
        }
    }

    /// Runs a frame one call level deeper, with its own handled-exception entries.
    ///
    /// Returns the frame's handled-exception entries as they stood when it stopped, so a
    /// suspended generator can restore them on resumption.
    pub(crate) fn run_call_frame(
        &mut self,
        frame: &mut Frame,
        saved_exc: Vec<HandledException>,
    ) -> (RunResult<FrameExit>, Vec<HandledException>) {
        if let Err(err) = self.config.limits.check_recursion(self.depth) {
            return (Err(err.into()), saved_exc);
        }
        self.depth += 1;
        self.tracer.on_call(frame.code.name(), self.depth);
        self.exc_state.enter_frame_with(saved_exc);
        let result = self.run_frame(frame);
        let saved_exc = self.exc_state.leave_frame();
        self.depth -= 1;
        self.tracer.on_return(self.depth);
        (result, saved_exc)
    }
}

fn with_receiver(obj: Value, args: &[Value]) -> Vec<Value> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(obj);
    full.extend_from_slice(args);
    full
}

/// Binds positional arguments to parameter slots, filling trailing parameters from defaults.
fn bind_arguments(code: &Code, defaults: &[Value], mut args: Vec<Value>) -> RunResult<Vec<Value>> {
    let expected = code.arg_count();
    let given = args.len();
    let min = expected.saturating_sub(defaults.len());
    if given > expected || given < min {
        return Err(ExcType::arity_error(
            code.name(),
            expected,
            min,
            given,
            FailureKind::TypeMismatch,
        ));
    }
    let first_default = expected - defaults.len().min(expected);
    let skip = defaults.len().saturating_sub(expected);
    for slot in given..expected {
        args.push(defaults[skip + slot - first_default]);
    }
    Ok(args)
}
