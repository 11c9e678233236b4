//! The runtime: heap, builtin types, namespaces, exception state, and the structural epoch.

use std::sync::Arc;

use strum::IntoEnumIterator;

use crate::{
    builtins::{Builtin, BuiltinFunction, BuiltinMethod, NativeType},
    bytecode::Code,
    cache::{CacheState, Epoch, InlineCache, Probe, Shape, SiteKind},
    exc_state::ExceptionStateStack,
    exception_private::{ExcType, PendingException, RunError, RunResult},
    exception_public::{ExcInfo, Exception, StackFrame},
    heap::{Finalizer, Heap, HeapData, HeapId, HeapStats},
    intern::{StringId, intern},
    resource::RuntimeConfig,
    tracer::{DispatchTracer, NoopTracer},
    types::{AttrTable, BuiltinTypes, Function, TypeFlags, is_subtype, mro_lookup, new_attr_table, type_obj},
    value::{Value, str_content},
};

/// Outcome of probing an inline cache through the runtime.
pub(crate) enum CacheProbe<T> {
    Hit(T),
    /// Resolve generically. `epoch` is the epoch read before resolution; `install` is false once
    /// the site is megamorphic.
    Miss { epoch: u64, install: bool },
}

/// A Python 2 object-model runtime.
///
/// Owns every object it creates. Independent runtimes may run on different threads and share
/// compiled [`Code`] (and therefore its inline-cache sites).
#[derive(Debug)]
pub struct Runtime<Tr: DispatchTracer = NoopTracer> {
    pub(crate) heap: Heap,
    pub(crate) types: BuiltinTypes,
    pub(crate) builtins: AttrTable,
    pub(crate) globals: AttrTable,
    pub(crate) exc_state: ExceptionStateStack,
    pub(crate) epoch: Epoch,
    pub(crate) config: RuntimeConfig,
    pub(crate) tracer: Tr,
    /// Python call depth.
    pub(crate) depth: usize,
    /// Containers whose repr is in progress, for `[...]` on self-reference.
    pub(crate) repr_guard: Vec<HeapId>,
}

impl Runtime<NoopTracer> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_tracer(config, NoopTracer)
    }
}

impl Default for Runtime<NoopTracer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tr: DispatchTracer> Runtime<Tr> {
    #[must_use]
    pub fn with_tracer(config: RuntimeConfig, tracer: Tr) -> Self {
        let mut heap = Heap::new();
        let types = BuiltinTypes::bootstrap(&mut heap).expect("bootstrap runs before any allocation limit is set");
        heap.set_max_allocations(config.limits.max_allocations.map(|n| n + heap.live()));
        heap.set_max_result_length(config.limits.max_result_length);

        let mut builtins = new_attr_table();
        for f in BuiltinFunction::iter() {
            let name: &'static str = f.into();
            builtins.insert(intern(name), Value::Builtin(Builtin::Function(f)));
        }
        for (name, id) in [
            ("object", types.object),
            ("type", types.type_),
            ("int", types.int),
            ("bool", types.bool_),
            ("long", types.long),
            ("float", types.float),
            ("str", types.str_),
            ("tuple", types.tuple),
            ("list", types.list),
            ("dict", types.dict),
            ("property", types.property),
            ("classmethod", types.classmethod),
            ("staticmethod", types.staticmethod),
            ("super", types.super_),
        ] {
            builtins.insert(intern(name), Value::Ref(id));
        }
        for exc in ExcType::iter() {
            let name: &'static str = exc.into();
            builtins.insert(intern(name), Value::Ref(types.exception(exc)));
        }
        builtins.insert(intern("None"), Value::None);
        builtins.insert(intern("True"), Value::Bool(true));
        builtins.insert(intern("False"), Value::Bool(false));
        builtins.insert(intern("NotImplemented"), Value::NotImplemented);

        Self {
            heap,
            types,
            builtins,
            globals: new_attr_table(),
            exc_state: ExceptionStateStack::new(),
            epoch: Epoch::new(),
            config,
            tracer,
            depth: 0,
            repr_guard: Vec::new(),
        }
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current structural epoch. Advances on every mutation that can change attribute
    /// resolution: class dict writes, `__bases__` and `__class__` assignment.
    #[must_use]
    pub fn epoch_value(&self) -> u64 {
        self.epoch.current()
    }

    pub(crate) fn bump_epoch(&mut self) {
        let epoch = self.epoch.bump();
        self.tracer.on_epoch_bump(epoch);
    }

    // ========================================================================
    // Types
    // ========================================================================

    /// Id of the type of `value`.
    pub(crate) fn type_of(&self, value: Value) -> HeapId {
        let t = &self.types;
        match value {
            Value::None => t.none,
            Value::NotImplemented => t.not_implemented,
            Value::Bool(_) => t.bool_,
            Value::Int(_) => t.int,
            Value::Float(_) => t.float,
            Value::InternStr(_) => t.str_,
            Value::Builtin(Builtin::Function(_)) => t.builtin_function,
            Value::Builtin(Builtin::Method(m)) if m.is_static() => t.builtin_function,
            Value::Builtin(Builtin::Method(_)) => t.method_descriptor,
            Value::Builtin(Builtin::GetSet(_)) => t.getset_descriptor,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Type(ty) => ty.metatype,
                HeapData::Instance(inst) => inst.class_id,
                HeapData::Str(_) => t.str_,
                HeapData::Long(_) => t.long,
                HeapData::Tuple(_) => t.tuple,
                HeapData::List(_) => t.list,
                HeapData::Dict(_) => t.dict,
                HeapData::DictProxy(_) => t.dictproxy,
                HeapData::Function(_) => t.function,
                HeapData::BoundMethod(_) => t.method,
                HeapData::Property(_) => t.property,
                HeapData::ClassMethod(_) => t.classmethod,
                HeapData::StaticMethod(_) => t.staticmethod,
                HeapData::Super(_) => t.super_,
                HeapData::Iter(_) => t.iterator,
                HeapData::Generator(_) => t.generator,
            },
        }
    }

    /// `type(value)`.
    #[must_use]
    pub fn get_type(&self, value: Value) -> Value {
        Value::Ref(self.type_of(value))
    }

    pub(crate) fn type_name(&self, type_id: HeapId) -> &'static str {
        type_obj(&self.heap, type_id).name.as_str()
    }

    /// Name of the type of `value`, as used in error messages.
    #[must_use]
    pub fn value_type_name(&self, value: Value) -> &'static str {
        self.type_name(self.type_of(value))
    }

    /// The type id if `value` is a class object.
    pub(crate) fn as_type(&self, value: Value) -> Option<HeapId> {
        match value {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Type(_)) => Some(id),
            _ => None,
        }
    }

    pub(crate) fn lookup(&self, type_id: HeapId, name: StringId) -> Option<Value> {
        mro_lookup(&self.heap, type_id, name).map(|(_, v)| v)
    }

    pub(crate) fn flags(&self, type_id: HeapId) -> TypeFlags {
        type_obj(&self.heap, type_id).flags
    }

    pub(crate) fn has_flag(&self, type_id: HeapId, flag: TypeFlags) -> bool {
        self.flags(type_id).contains(flag)
    }

    pub(crate) fn is_heap_type(&self, type_id: HeapId) -> bool {
        self.has_flag(type_id, TypeFlags::HEAPTYPE)
    }

    pub(crate) fn is_subtype(&self, sub: HeapId, sup: HeapId) -> bool {
        is_subtype(&self.heap, sub, sup)
    }

    pub(crate) fn native_type_id(&self, kind: NativeType) -> HeapId {
        self.types.native(kind)
    }

    #[must_use]
    pub fn object_type(&self) -> Value {
        Value::Ref(self.types.object)
    }

    #[must_use]
    pub fn type_type(&self) -> Value {
        Value::Ref(self.types.type_)
    }

    /// The class object of a builtin exception.
    #[must_use]
    pub fn exception_class(&self, exc: ExcType) -> Value {
        Value::Ref(self.types.exception(exc))
    }

    /// Looks a name up in the builtins namespace.
    #[must_use]
    pub fn builtin(&self, name: &str) -> Option<Value> {
        crate::intern::lookup(name).and_then(|id| self.builtins.get(&id).copied())
    }

    /// The current `__mro__` of a class.
    pub fn mro(&self, cls: Value) -> RunResult<Vec<Value>> {
        let id = self.expect_type(cls)?;
        Ok(type_obj(&self.heap, id).mro.iter().map(|&c| Value::Ref(c)).collect())
    }

    /// The `__bases__` of a class.
    pub fn bases(&self, cls: Value) -> RunResult<Vec<Value>> {
        let id = self.expect_type(cls)?;
        Ok(type_obj(&self.heap, id).bases.iter().map(|&c| Value::Ref(c)).collect())
    }

    /// Name of a class.
    pub fn class_name(&self, cls: Value) -> RunResult<&'static str> {
        self.expect_type(cls).map(|id| self.type_name(id))
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub(crate) fn alloc(&mut self, data: HeapData) -> RunResult<Value> {
        self.heap.allocate(data).map(Value::Ref)
    }

    /// Allocates a str.
    pub fn new_str(&mut self, text: impl Into<String>) -> RunResult<Value> {
        self.alloc(HeapData::Str(text.into()))
    }

    /// The text of a str value.
    #[must_use]
    pub fn str_value(&self, value: Value) -> Option<&str> {
        str_content(&self.heap, value)
    }

    pub fn new_tuple(&mut self, items: Vec<Value>) -> RunResult<Value> {
        self.alloc(HeapData::Tuple(items))
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> RunResult<Value> {
        self.alloc(HeapData::List(items))
    }

    pub fn new_dict(&mut self) -> RunResult<Value> {
        self.alloc(HeapData::Dict(new_attr_table()))
    }

    /// Items of a tuple or list.
    #[must_use]
    pub fn sequence_items(&self, value: Value) -> Option<Vec<Value>> {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(items) | HeapData::List(items)) => Some(items.clone()),
            _ => None,
        }
    }

    /// Creates a function object from compiled code and defaults for its trailing parameters.
    pub fn make_function(&mut self, code: &Arc<Code>, defaults: Vec<Value>) -> RunResult<Value> {
        self.alloc(HeapData::Function(Function {
            name: code.name,
            code: Arc::clone(code),
            defaults,
        }))
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(intern(name), value);
    }

    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        crate::intern::lookup(name).and_then(|id| self.globals.get(&id).copied())
    }

    // ========================================================================
    // Inline caches
    // ========================================================================

    /// Receiver shape for attribute sites: classes are keyed by their own uid.
    pub(crate) fn shape_of(&self, value: Value) -> Shape {
        if let Value::Ref(id) = value
            && let HeapData::Type(t) = self.heap.get(id)
        {
            return Shape::Class(t.uid);
        }
        Shape::Instance(self.type_uid(self.type_of(value)))
    }

    pub(crate) fn probe_site<T: Clone>(&mut self, cache: &InlineCache<T>, kind: SiteKind, shape: Shape) -> CacheProbe<T> {
        let epoch = self.epoch.current();
        let state = cache.state();
        match cache.probe(shape, epoch) {
            Probe::Hit(target) => {
                self.tracer.on_cache_hit(kind, state);
                CacheProbe::Hit(target)
            }
            Probe::Miss => {
                self.tracer.on_cache_miss(kind, state);
                CacheProbe::Miss { epoch, install: true }
            }
            Probe::Megamorphic => {
                self.tracer.on_cache_miss(kind, CacheState::Megamorphic);
                CacheProbe::Miss { epoch, install: false }
            }
        }
    }

    pub(crate) fn install_site<T: Clone>(
        &mut self,
        cache: &InlineCache<T>,
        kind: SiteKind,
        shape: Shape,
        epoch: u64,
        target: T,
    ) {
        if let Some((from, to)) = cache.install(shape, epoch, target, self.config.polymorphic_limit) {
            self.tracer.on_cache_transition(kind, from, to);
        }
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// Pins a heap value so collections keep it alive. Pins nest.
    pub fn retain(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            self.heap.retain(id);
        }
    }

    /// Drops one pin; returns whether the value is still pinned.
    pub fn release(&mut self, value: Value) -> bool {
        match value {
            Value::Ref(id) => self.heap.release(id),
            _ => false,
        }
    }

    /// Collects every heap object unreachable from pins, globals, builtins, and handled
    /// exceptions. A no-op while Python code is running, since live frames are not roots.
    pub fn collect(&mut self) -> usize {
        if self.depth > 0 {
            return 0;
        }
        let mut roots: Vec<HeapId> = self.types.all().collect();
        roots.extend(self.builtins.values().filter_map(|v| v.ref_id()));
        roots.extend(self.globals.values().filter_map(|v| v.ref_id()));
        roots.extend(self.exc_state.values().filter_map(Value::ref_id));
        roots.extend(self.exc_state.types());
        let freed = self.heap.collect(roots);
        self.tracer.on_collect(freed);
        freed
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Installs a callback invoked once for every object a collection frees.
    pub fn set_finalizer(&mut self, finalizer: Option<Finalizer>) {
        self.heap.set_finalizer(finalizer);
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Whether `err` is a catchable exception of class `exc` or a subclass.
    #[must_use]
    pub fn error_matches(&self, err: &RunError, exc: ExcType) -> bool {
        let RunError::Exc(raise) = err else { return false };
        match &raise.exc {
            PendingException::Simple { exc_type, .. } => exc_type.is_subclass_of(exc),
            PendingException::Object { type_id, .. } => self.is_subtype(*type_id, self.types.exception(exc)),
        }
    }

    /// Converts an internal error into the public exception description.
    pub fn describe_error(&mut self, err: RunError) -> Exception {
        let raise = match err {
            RunError::Internal(message) => {
                return Exception::new("InternalError", crate::FailureKind::Internal, Some(message.into_owned()));
            }
            RunError::Exc(raise) | RunError::UncatchableExc(raise) => raise,
        };
        let (exc_type, message) = match &raise.exc {
            PendingException::Simple { exc_type, message } => (exc_type.to_string(), message.clone()),
            PendingException::Object { type_id, value } => {
                let name = self.type_name(*type_id).to_owned();
                let message = self.to_str(*value).ok().filter(|m| !m.is_empty());
                (name, message)
            }
        };
        let traceback = raise.traceback.iter().map(StackFrame::from).collect();
        Exception::new(exc_type, raise.kind, message).with_traceback(traceback)
    }

    /// The exception currently being handled, Python 2's `sys.exc_info()`.
    ///
    /// Visible from the handler body, from functions it calls, and from a resumed generator's
    /// own handler; `None` anywhere else.
    #[must_use]
    pub fn current_exception(&self) -> Option<ExcInfo> {
        self.exc_state.current().map(|h| ExcInfo {
            exc_type: Value::Ref(h.exc_type),
            value: h.value,
            traceback: h.traceback.iter().map(StackFrame::from).collect(),
        })
    }

    /// Whether `value` is the builtin method implementing `object.__init__`.
    pub(crate) fn is_object_init(value: Option<Value>) -> bool {
        matches!(value, Some(Value::Builtin(Builtin::Method(BuiltinMethod::ObjectInit))))
    }
}
