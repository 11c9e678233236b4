//! Frame evaluator.
//!
//! Each Python call runs [`Runtime::run_frame`] on its own frame, recursively: attribute
//! hooks, descriptors, and special methods re-enter the evaluator through
//! [`Runtime::call_object`]. Exception handling follows the block model: `SetupExcept`
//! records the handler and the stack depth to unwind to.

mod call;
pub(crate) mod generator;

use std::sync::Arc;

use crate::{
    dispatch::IterStep,
    exc_state::HandledException,
    exception_private::{ExcType, ExceptionRaise, FailureKind, PendingException, RawStackFrame, RunError, RunResult},
    exception_public::Exception,
    heap::{HeapData, HeapId},
    runtime::Runtime,
    tracer::DispatchTracer,
    types::{AttrTable, new_attr_table},
    value::Value,
};

use super::{
    code::{Code, Const, Site},
    op::Op,
};

/// A handler pushed by `SetupExcept`.
#[derive(Debug, Clone, Copy)]
struct HandlerBlock {
    handler: usize,
    stack_len: usize,
    /// Handled-exception entries of this frame when the block was set up.
    exc_len: usize,
}

/// Execution state of one Python call.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) code: Arc<Code>,
    pub(crate) ip: usize,
    /// Unbound locals are `None`.
    pub(crate) locals: Vec<Option<Value>>,
    pub(crate) stack: Vec<Value>,
    blocks: Vec<HandlerBlock>,
}

impl Frame {
    /// A frame with `args` bound to the first local slots.
    pub(crate) fn new(code: Arc<Code>, args: Vec<Value>) -> Self {
        let mut locals: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        locals.resize(code.local_count().max(locals.len()), None);
        Self {
            code,
            ip: 0,
            locals,
            stack: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Every value the frame references, for tracing through suspended generators.
    pub(crate) fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.locals.iter().flatten().copied().chain(self.stack.iter().copied())
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::internal("value stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let len = self.stack.len();
        if n > len {
            return Err(RunError::internal("value stack underflow"));
        }
        Ok(self.stack.split_off(len - n))
    }

    fn top(&self) -> RunResult<Value> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| RunError::internal("value stack underflow"))
    }

    fn jump(&mut self, target: u32) {
        self.ip = target as usize;
    }
}

/// How a frame stopped running.
#[derive(Debug)]
pub(crate) enum FrameExit {
    Return(Value),
    /// A generator frame suspended with this value.
    Yield(Value),
}

impl<Tr: DispatchTracer> Runtime<Tr> {
    /// Runs top-level code against the runtime's global namespace.
    ///
    /// Returns the value of the code's `Return`, or `None` if it runs off the end.
    pub fn execute(&mut self, code: &Arc<Code>) -> Result<Value, Exception> {
        let mut frame = Frame::new(Arc::clone(code), Vec::new());
        let (result, _) = self.run_call_frame(&mut frame, Vec::new());
        match result {
            Ok(FrameExit::Return(value)) => Ok(value),
            Ok(FrameExit::Yield(_)) => Err(self.describe_error(RunError::internal("'yield' outside function"))),
            Err(err) => Err(self.describe_error(err)),
        }
    }

    /// Evaluates `frame` until it returns, yields, or raises an uncaught error.
    pub(crate) fn run_frame(&mut self, frame: &mut Frame) -> RunResult<FrameExit> {
        let code = Arc::clone(&frame.code);
        loop {
            let Some(&op) = code.ops.get(frame.ip) else {
                return Ok(FrameExit::Return(Value::None));
            };
            let op_index = frame.ip;
            self.tracer.on_instruction(op_index, op.name(), frame.stack.len(), self.depth);
            frame.ip += 1;
            match self.exec_op(frame, &code, op) {
                Ok(None) => {}
                Ok(Some(exit)) => return Ok(exit),
                Err(mut err) => {
                    err.add_frame(RawStackFrame {
                        function: code.name,
                        op_index,
                    });
                    self.unwind(frame, err)?;
                }
            }
        }
    }

    /// Transfers control to the innermost handler block, or returns the error when the
    /// frame has none. Uncatchable and internal errors skip handlers.
    fn unwind(&mut self, frame: &mut Frame, err: RunError) -> RunResult<()> {
        let RunError::Exc(raise) = err else { return Err(err) };
        let Some(block) = frame.blocks.pop() else {
            return Err(RunError::Exc(raise));
        };
        frame.stack.truncate(block.stack_len);
        self.exc_state.truncate_frame(block.exc_len);
        let handled = self.materialize(*raise)?;
        frame.stack.push(handled.value);
        let depth = self.exc_state.push(handled);
        self.tracer.on_exception_push(depth);
        frame.ip = block.handler;
        Ok(())
    }

    /// Turns a pending exception into the exception object a handler sees.
    fn materialize(&mut self, raise: ExceptionRaise) -> RunResult<HandledException> {
        let (exc_type, value) = match raise.exc {
            PendingException::Object { type_id, value } => (type_id, value),
            PendingException::Simple { exc_type, message } => {
                let cls = self.types.exception(exc_type);
                let args = match message {
                    Some(message) => vec![self.new_str(message)?],
                    None => Vec::new(),
                };
                (cls, self.new_instance(cls, &args)?)
            }
        };
        Ok(HandledException {
            exc_type,
            value,
            traceback: raise.traceback,
        })
    }

    /// Failure kind of an exception class: that of its nearest builtin ancestor.
    fn raised_kind(&self, cls: HeapId) -> FailureKind {
        self.mro_ids(cls)
            .into_iter()
            .find_map(|id| self.types.exc_type_of(id))
            .map_or(FailureKind::Raised, ExcType::failure_kind)
    }

    fn mro_ids(&self, cls: HeapId) -> Vec<HeapId> {
        crate::types::type_obj(&self.heap, cls).mro.clone()
    }

    /// `raise value`: classes are instantiated without arguments.
    fn raise_value(&mut self, value: Value) -> RunError {
        let base = self.types.exception(ExcType::BaseException);
        let instance = match self.as_type(value) {
            Some(cls) if self.is_subtype(cls, base) => match self.new_instance(cls, &[]) {
                Ok(instance) => instance,
                Err(err) => return err,
            },
            _ if self.is_subtype(self.type_of(value), base) => value,
            _ => {
                return ExcType::type_error(format!(
                    "exceptions must be old-style classes or derived from BaseException, not {}",
                    self.value_type_name(value)
                ));
            }
        };
        let type_id = self.type_of(instance);
        RunError::Exc(Box::new(ExceptionRaise::object(
            type_id,
            instance,
            self.raised_kind(type_id),
            Vec::new(),
        )))
    }

    /// Bare `raise`: the exception currently being handled, with its original traceback.
    fn reraise(&self) -> RunError {
        match self.exc_state.current() {
            Some(current) => RunError::Exc(Box::new(ExceptionRaise::object(
                current.exc_type,
                current.value,
                self.raised_kind(current.exc_type),
                current.traceback.clone(),
            ))),
            None => ExcType::type_error(
                "exceptions must be old-style classes or derived from BaseException, not NoneType",
            ),
        }
    }

    /// Whether an exception object matches an `except` clause's class or tuple of classes.
    fn exception_matches(&self, exc: Value, clause: Value) -> bool {
        if let Some(items) = self.tuple_items(clause) {
            return items.into_iter().any(|item| self.exception_matches(exc, item));
        }
        self.as_type(clause)
            .is_some_and(|cls| self.is_subtype(self.type_of(exc), cls))
    }

    fn const_value(code: &Code, index: u16) -> RunResult<Value> {
        match code.consts.get(usize::from(index)) {
            Some(Const::None) => Ok(Value::None),
            Some(&Const::Bool(b)) => Ok(Value::Bool(b)),
            Some(&Const::Int(i)) => Ok(Value::Int(i)),
            Some(&Const::Float(f)) => Ok(Value::Float(f)),
            Some(&Const::Str(s)) => Ok(Value::InternStr(s)),
            Some(Const::Code(_)) => Err(RunError::internal("code constant loaded as a value")),
            None => Err(RunError::internal("constant index out of range")),
        }
    }

    /// Runs a class body function and returns its locals as the class namespace.
    fn run_class_body(&mut self, body: Value) -> RunResult<AttrTable> {
        let code = match body.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Function(f)) => Arc::clone(&f.code),
            _ => return Err(RunError::internal("class body is not a function")),
        };
        let mut frame = Frame::new(code, Vec::new());
        let (result, _) = self.run_call_frame(&mut frame, Vec::new());
        result?;
        let mut namespace = new_attr_table();
        for (&name, value) in frame.code.local_names.iter().zip(&frame.locals) {
            if let Some(value) = value {
                namespace.insert(name, *value);
            }
        }
        Ok(namespace)
    }

    fn exec_op(&mut self, frame: &mut Frame, code: &Code, op: Op) -> RunResult<Option<FrameExit>> {
        match op {
            Op::LoadConst(index) => frame.stack.push(Self::const_value(code, index)?),
            Op::LoadFast(slot) => {
                let value = frame.locals.get(usize::from(slot)).copied().flatten();
                let value = value.ok_or_else(|| {
                    let name = code.local_names.get(usize::from(slot)).map_or("?", |n| n.as_str());
                    ExcType::NameError.error(format!("local variable '{name}' referenced before assignment"))
                })?;
                frame.stack.push(value);
            }
            Op::StoreFast(slot) => {
                let value = frame.pop()?;
                let slot = usize::from(slot);
                if slot >= frame.locals.len() {
                    frame.locals.resize(slot + 1, None);
                }
                frame.locals[slot] = Some(value);
            }
            Op::LoadGlobal(name) => {
                let value = self
                    .globals
                    .get(&name)
                    .or_else(|| self.builtins.get(&name))
                    .copied()
                    .ok_or_else(|| ExcType::NameError.error(format!("global name '{name}' is not defined")))?;
                frame.stack.push(value);
            }
            Op::StoreGlobal(name) => {
                let value = frame.pop()?;
                self.globals.insert(name, value);
            }
            Op::LoadAttr { name, site } => {
                let obj = frame.pop()?;
                let Some(Site::Attr(site)) = code.sites.get(usize::from(site)) else {
                    return Err(RunError::internal("LoadAttr without an attribute site"));
                };
                let value = self.load_attr_cached(site, obj, name)?;
                frame.stack.push(value);
            }
            Op::StoreAttr { name, site } => {
                let obj = frame.pop()?;
                let value = frame.pop()?;
                let Some(Site::Store(site)) = code.sites.get(usize::from(site)) else {
                    return Err(RunError::internal("StoreAttr without a store site"));
                };
                self.store_attr_cached(site, obj, name, value)?;
            }
            Op::DeleteAttr(name) => {
                let obj = frame.pop()?;
                self.delete_attribute(obj, name)?;
            }
            Op::CallMethod { name, argc, site } => {
                let args = frame.pop_n(usize::from(argc))?;
                let obj = frame.pop()?;
                let Some(Site::Call(site)) = code.sites.get(usize::from(site)) else {
                    return Err(RunError::internal("CallMethod without a call site"));
                };
                let value = self.call_method_cached(site, obj, name, &args)?;
                frame.stack.push(value);
            }
            Op::Call { argc } => {
                let args = frame.pop_n(usize::from(argc))?;
                let callable = frame.pop()?;
                let value = self.call_object(callable, &args)?;
                frame.stack.push(value);
            }
            Op::BinaryOp { op, site } => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let Some(Site::Binary(site)) = code.sites.get(usize::from(site)) else {
                    return Err(RunError::internal("BinaryOp without a binary site"));
                };
                let value = self.binary_op_cached(site, op, left, right)?;
                frame.stack.push(value);
            }
            Op::Compare { op } => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let value = self.compare(op, left, right)?;
                frame.stack.push(value);
            }
            Op::Contains => {
                let container = frame.pop()?;
                let item = frame.pop()?;
                let found = self.contains(container, item)?;
                frame.stack.push(Value::Bool(found));
            }
            Op::UnaryNot => {
                let value = frame.pop()?;
                let truth = self.is_true(value)?;
                frame.stack.push(Value::Bool(!truth));
            }
            Op::Subscript => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                let value = self.get_item(obj, key)?;
                frame.stack.push(value);
            }
            Op::StoreSubscript => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                let value = frame.pop()?;
                self.set_item(obj, key, value)?;
            }
            Op::BuildTuple(n) => {
                let items = frame.pop_n(usize::from(n))?;
                let tuple = self.new_tuple(items)?;
                frame.stack.push(tuple);
            }
            Op::BuildList(n) => {
                let items = frame.pop_n(usize::from(n))?;
                let list = self.new_list(items)?;
                frame.stack.push(list);
            }
            Op::GetIter => {
                let iterable = frame.pop()?;
                let iter = self.get_iter(iterable)?;
                frame.stack.push(iter);
            }
            Op::ForIter(target) => {
                let iter = frame.top()?;
                match self.iter_next(iter)? {
                    IterStep::Value(value) => frame.stack.push(value),
                    IterStep::End => {
                        frame.pop()?;
                        frame.jump(target);
                    }
                }
            }
            Op::Jump(target) => frame.jump(target),
            Op::PopJumpIfFalse(target) => {
                let value = frame.pop()?;
                if !self.is_true(value)? {
                    frame.jump(target);
                }
            }
            Op::PopJumpIfTrue(target) => {
                let value = frame.pop()?;
                if self.is_true(value)? {
                    frame.jump(target);
                }
            }
            Op::JumpIfFalseOrPop(target) => {
                let value = frame.top()?;
                if self.is_true(value)? {
                    frame.pop()?;
                } else {
                    frame.jump(target);
                }
            }
            Op::JumpIfTrueOrPop(target) => {
                let value = frame.top()?;
                if self.is_true(value)? {
                    frame.jump(target);
                } else {
                    frame.pop()?;
                }
            }
            Op::Pop => {
                frame.pop()?;
            }
            Op::Dup => {
                let value = frame.top()?;
                frame.stack.push(value);
            }
            Op::Rot2 => {
                let len = frame.stack.len();
                if len < 2 {
                    return Err(RunError::internal("value stack underflow"));
                }
                frame.stack.swap(len - 1, len - 2);
            }
            Op::SetupExcept(target) => frame.blocks.push(HandlerBlock {
                handler: target as usize,
                stack_len: frame.stack.len(),
                exc_len: self.exc_state.frame_len(),
            }),
            Op::PopBlock => {
                frame.blocks.pop();
            }
            Op::ExceptMatch => {
                let clause = frame.pop()?;
                let exc = frame.pop()?;
                frame.stack.push(Value::Bool(self.exception_matches(exc, clause)));
            }
            Op::PopExcept => {
                if self.exc_state.pop().is_some() {
                    self.tracer.on_exception_pop(self.exc_state.depth());
                }
            }
            Op::Raise => {
                let value = frame.pop()?;
                return Err(self.raise_value(value));
            }
            Op::Reraise => return Err(self.reraise()),
            Op::MakeFunction { code: index, defaults } => {
                let defaults = frame.pop_n(usize::from(defaults))?;
                let Some(Const::Code(body)) = code.consts.get(usize::from(index)) else {
                    return Err(RunError::internal("MakeFunction without a code constant"));
                };
                let func = self.make_function(body, defaults)?;
                frame.stack.push(func);
            }
            Op::BuildClass { name, nbases } => {
                let body = frame.pop()?;
                let bases = frame.pop_n(usize::from(nbases))?;
                let namespace = self.run_class_body(body)?;
                let cls = self.build_class(name, &bases, namespace)?;
                frame.stack.push(cls);
            }
            Op::LoadSuper => {
                let obj = frame.pop()?;
                let cls = frame.pop()?;
                let proxy = self.call_object(Value::Ref(self.types.super_), &[cls, obj])?;
                frame.stack.push(proxy);
            }
            Op::Yield => {
                let value = frame.pop()?;
                return Ok(Some(FrameExit::Yield(value)));
            }
            Op::Return => {
                let value = frame.pop()?;
                return Ok(Some(FrameExit::Return(value)));
            }
        }
        Ok(None)
    }
}
