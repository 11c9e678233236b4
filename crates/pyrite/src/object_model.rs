//! Instance construction, class creation, and structural mutation of classes.
//!
//! Every mutation that can change the outcome of an attribute resolution (a class dict write,
//! `__bases__` or `__class__` assignment) bumps the runtime's epoch once the mutation has
//! fully committed, so inline caches never observe a half-applied change.

use ahash::AHashMap;

use crate::{
    builtins::{Builtin, BuiltinMethod, GetSet},
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId, intern},
    runtime::Runtime,
    tracer::DispatchTracer,
    types::{
        AttrTable, Instance, Layout, SubclassEntry, TypeFlags, TypeObject, all_subclasses, compute_flags,
        mro::{MroError, compute_c3_mro},
        type_obj, type_obj_mut,
    },
    value::{Value, str_content},
};

impl<Tr: DispatchTracer> Runtime<Tr> {
    // ========================================================================
    // Construction
    // ========================================================================

    /// `cls(*args)`: runs `__new__`, then `__init__` only when `__new__` returned an instance
    /// of `cls` or a subclass.
    pub(crate) fn new_instance(&mut self, cls: HeapId, args: &[Value]) -> RunResult<Value> {
        let Some(new) = self.lookup(cls, StaticStrings::DunderNew.into()) else {
            return Err(ExcType::construction_error(format!(
                "cannot create '{}' instances",
                self.type_name(cls)
            )));
        };
        let new = match new.ref_id().map(|id| self.heap.get(id)) {
            Some(&HeapData::StaticMethod(func)) => func,
            _ => new,
        };
        let mut new_args = Vec::with_capacity(args.len() + 1);
        new_args.push(Value::Ref(cls));
        new_args.extend_from_slice(args);
        let obj = self.call_object(new, &new_args)?;

        // type(x) answers the type without initializing it
        if cls == self.types.type_ && args.len() == 1 {
            return Ok(obj);
        }
        let obj_type = self.type_of(obj);
        if !self.is_subtype(obj_type, cls) {
            return Ok(obj);
        }
        if let Some(init) = self.lookup(obj_type, StaticStrings::DunderInit.into()) {
            let result = self.call_special_value(init, obj, args)?;
            if !result.is_none() {
                return Err(ExcType::construction_error(format!(
                    "__init__() should return None, not '{}'",
                    self.value_type_name(result)
                )));
            }
        }
        Ok(obj)
    }

    fn overrides_init(&self, cls: HeapId) -> bool {
        !Self::is_object_init(self.lookup(cls, StaticStrings::DunderInit.into()))
    }

    fn overrides_new(&self, cls: HeapId) -> bool {
        !matches!(
            self.lookup(cls, StaticStrings::DunderNew.into()),
            Some(Value::Builtin(Builtin::Method(BuiltinMethod::ObjectNew)))
        )
    }

    /// `object.__new__(cls, *args)`.
    pub(crate) fn object_new(&mut self, cls: Value, args: &[Value]) -> RunResult<Value> {
        let cls_id = self.expect_type(cls).map_err(|_| {
            ExcType::construction_error(format!(
                "object.__new__(X): X is not a type object ({})",
                self.value_type_name(cls)
            ))
        })?;
        // extra arguments are an error unless exactly one of __new__/__init__ is overridden
        if !args.is_empty() && (self.overrides_new(cls_id) || !self.overrides_init(cls_id)) {
            return Err(ExcType::construction_error("object() takes no parameters"));
        }
        let name = self.type_name(cls_id);
        match type_obj(&self.heap, cls_id).layout {
            Layout::Object => self.alloc(HeapData::Instance(Instance {
                class_id: cls_id,
                dict: None,
            })),
            Layout::Type => Err(ExcType::construction_error(format!(
                "object.__new__({name}) is not safe, use type.__new__()"
            ))),
            Layout::Native => Err(ExcType::construction_error(format!("cannot create '{name}' instances"))),
        }
    }

    /// `object.__init__(self, *args)`.
    pub(crate) fn object_init(&mut self, obj: Value, args: &[Value]) -> RunResult<()> {
        let cls = self.type_of(obj);
        if !args.is_empty() && (self.overrides_init(cls) || !self.overrides_new(cls)) {
            return Err(ExcType::construction_error("object.__init__() takes no parameters"));
        }
        Ok(())
    }

    // ========================================================================
    // Class creation
    // ========================================================================

    /// `type.__new__(mcs, ...)`: `type(x)` or `type(name, bases, dict)`.
    pub(crate) fn type_new_call(&mut self, mcs: Value, args: &[Value]) -> RunResult<Value> {
        let mcs = self.expect_type(mcs)?;
        if mcs == self.types.type_ && args.len() == 1 {
            return Ok(self.get_type(args[0]));
        }
        let [name, bases, dict] = args else {
            return Err(ExcType::construction_error("type() takes 1 or 3 arguments"));
        };
        let name = match str_content(&self.heap, *name) {
            Some(s) => intern(s),
            None => {
                return Err(ExcType::construction_error(format!(
                    "type() argument 1 must be string, not {}",
                    self.value_type_name(*name)
                )));
            }
        };
        let Some(base_values) = self.tuple_items(*bases) else {
            return Err(ExcType::construction_error(format!(
                "type() argument 2 must be tuple, not {}",
                self.value_type_name(*bases)
            )));
        };
        let namespace = match dict.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Dict(table)) => table.clone(),
            _ => {
                return Err(ExcType::construction_error(format!(
                    "type() argument 3 must be dict, not {}",
                    self.value_type_name(*dict)
                )));
            }
        };
        let base_ids = self.base_ids(&base_values)?;
        let winner = self.calculate_metatype(mcs, &base_ids)?;
        if winner != mcs {
            // the most derived metatype builds the class if it brings its own __new__
            if let Some(new) = self.lookup(winner, StaticStrings::DunderNew.into())
                && !matches!(new, Value::Builtin(Builtin::Method(BuiltinMethod::TypeNew)))
            {
                let new = match new.ref_id().map(|id| self.heap.get(id)) {
                    Some(&HeapData::StaticMethod(func)) => func,
                    _ => new,
                };
                return self.call_object(new, &[Value::Ref(winner), args[0], args[1], args[2]]);
            }
        }
        self.type_new(winner, name, &base_ids, namespace)
    }

    fn base_ids(&self, bases: &[Value]) -> RunResult<Vec<HeapId>> {
        bases
            .iter()
            .map(|&b| {
                self.as_type(b).ok_or_else(|| {
                    ExcType::structural_error(format!(
                        "bases must be types, not '{}'",
                        self.value_type_name(b)
                    ))
                })
            })
            .collect()
    }

    pub(crate) fn tuple_items(&self, value: Value) -> Option<Vec<Value>> {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(items)) => Some(items.clone()),
            _ => None,
        }
    }

    /// The most derived metatype among `mcs` and the metatypes of `bases`.
    pub(crate) fn calculate_metatype(&self, mcs: HeapId, bases: &[HeapId]) -> RunResult<HeapId> {
        let mut winner = mcs;
        for &base in bases {
            let candidate = self.type_of(Value::Ref(base));
            if self.is_subtype(winner, candidate) {
                continue;
            }
            if self.is_subtype(candidate, winner) {
                winner = candidate;
                continue;
            }
            return Err(ExcType::structural_error(
                "metaclass conflict: the metaclass of a derived class must be a (non-strict) subclass of the metaclasses of all its bases",
            ));
        }
        Ok(winner)
    }

    /// The builtin type whose instance layout instances of `cls` share.
    fn layout_root(&self, cls: HeapId) -> HeapId {
        let base_exception = self.types.exception(ExcType::BaseException);
        match type_obj(&self.heap, cls).layout {
            Layout::Type => self.types.type_,
            Layout::Object if self.is_subtype(cls, base_exception) => base_exception,
            Layout::Object => self.types.object,
            Layout::Native => type_obj(&self.heap, cls)
                .mro
                .iter()
                .copied()
                .find(|&t| !self.is_heap_type(t))
                .unwrap_or(cls),
        }
    }

    /// The layout root a class with these bases inherits. All roots must lie on one line.
    fn best_layout_root(&self, bases: &[HeapId]) -> RunResult<HeapId> {
        let mut best = self.types.object;
        for &base in bases {
            let root = self.layout_root(base);
            if self.is_subtype(best, root) {
                continue;
            }
            if self.is_subtype(root, best) {
                best = root;
                continue;
            }
            return Err(ExcType::structural_error("multiple bases have instance lay-out conflict"));
        }
        Ok(best)
    }

    /// Allocates a heap class. `metatype` must already be the most derived metatype.
    pub(crate) fn type_new(
        &mut self,
        metatype: HeapId,
        name: StringId,
        bases: &[HeapId],
        mut namespace: AttrTable,
    ) -> RunResult<Value> {
        let bases: Vec<HeapId> = if bases.is_empty() {
            vec![self.types.object]
        } else {
            bases.to_vec()
        };
        for &base in &bases {
            if !self.has_flag(base, TypeFlags::BASETYPE) {
                return Err(ExcType::structural_error(format!(
                    "type '{}' is not an acceptable base type",
                    self.type_name(base)
                )));
            }
        }
        let root = self.best_layout_root(&bases)?;
        let layout = type_obj(&self.heap, root).layout;
        let instance_dict = layout == Layout::Object;
        let inherits_dict = bases.iter().any(|&b| type_obj(&self.heap, b).instance_dict);
        if instance_dict && !inherits_dict {
            namespace
                .entry(StaticStrings::DunderDict.into())
                .or_insert(Value::Builtin(Builtin::GetSet(GetSet::InstanceDict)));
        }
        let new_key: StringId = StaticStrings::DunderNew.into();
        if let Some(&new) = namespace.get(&new_key)
            && new.ref_id().is_some_and(|id| matches!(self.heap.get(id), HeapData::Function(_)))
        {
            let wrapped = self.alloc(HeapData::StaticMethod(new))?;
            namespace.insert(new_key, wrapped);
        }

        let mut ty = TypeObject::new(name, metatype, &bases, layout);
        ty.dict = namespace;
        ty.instance_dict = instance_dict;
        ty.flags = TypeFlags::HEAPTYPE | TypeFlags::BASETYPE;
        let id = self.heap.allocate(HeapData::Type(ty))?;

        let mro = match self.linearize(id, &bases) {
            Ok(mro) => mro,
            Err(err) => {
                self.heap.discard(id);
                return Err(err);
            }
        };
        let uid = {
            let t = type_obj_mut(&mut self.heap, id);
            t.mro = mro;
            t.uid
        };
        for &base in &bases {
            type_obj_mut(&mut self.heap, base).subclasses.push(SubclassEntry {
                class_id: id,
                class_uid: uid,
            });
        }
        let flags = compute_flags(&self.heap, id);
        type_obj_mut(&mut self.heap, id).flags = flags;
        Ok(Value::Ref(id))
    }

    /// MRO of a freshly allocated class: C3, or the metatype's own `mro()` override.
    fn linearize(&mut self, id: HeapId, bases: &[HeapId]) -> RunResult<Vec<HeapId>> {
        let metatype = type_obj(&self.heap, id).metatype;
        match self.lookup(metatype, StaticStrings::Mro.into()) {
            Some(Value::Builtin(Builtin::Method(BuiltinMethod::TypeMro))) | None => {
                let heap = &self.heap;
                compute_c3_mro(id, bases, |b| type_obj(heap, b).mro.clone()).map_err(|e| self.mro_error(&e))
            }
            Some(custom) => {
                let result = self.call_special_value(custom, Value::Ref(id), &[])?;
                let items = self.collect_iterable(result)?;
                items
                    .into_iter()
                    .map(|item| {
                        self.as_type(item).ok_or_else(|| {
                            ExcType::structural_error(format!(
                                "mro() returned a non-class ('{}')",
                                self.value_type_name(item)
                            ))
                        })
                    })
                    .collect()
            }
        }
    }

    /// The C3 linearization of `cls` from its current bases.
    pub(crate) fn compute_mro(&self, cls: HeapId) -> RunResult<Vec<HeapId>> {
        let heap = &self.heap;
        let bases = type_obj(heap, cls).bases.clone();
        compute_c3_mro(cls, &bases, |b| type_obj(heap, b).mro.clone()).map_err(|e| self.mro_error(&e))
    }

    pub(crate) fn mro_error(&self, err: &MroError) -> RunError {
        let message = match err {
            MroError::Cycle => "a __bases__ item causes an inheritance cycle".to_owned(),
            MroError::DuplicateBase(base) => format!("duplicate base class {}", self.type_name(*base)),
            MroError::Inconsistent(bases) => {
                let names: Vec<&str> = bases.iter().map(|&b| self.type_name(b)).collect();
                format!(
                    "Cannot create a consistent method resolution\norder (MRO) for bases {}",
                    names.join(", ")
                )
            }
            MroError::TooDeep => "inheritance hierarchy too deep".to_owned(),
            MroError::TooLong => "method resolution order too long".to_owned(),
        };
        ExcType::structural_error(message)
    }

    /// Executes a class statement: picks the metaclass and calls it with
    /// `(name, bases, namespace)`.
    pub(crate) fn build_class(&mut self, name: StringId, bases: &[Value], namespace: AttrTable) -> RunResult<Value> {
        let metaclass = match namespace.get(&StringId::from(StaticStrings::DunderMetaclass)) {
            Some(&meta) => meta,
            None => match bases.first() {
                Some(&base) => self.getattr_or_type(base),
                None => self
                    .globals
                    .get(&StringId::from(StaticStrings::DunderMetaclass))
                    .copied()
                    .unwrap_or(Value::Ref(self.types.type_)),
            },
        };
        let bases = self.new_tuple(bases.to_vec())?;
        let dict = self.alloc(HeapData::Dict(namespace))?;
        self.call_object(metaclass, &[Value::InternStr(name), bases, dict])
    }

    /// `base.__class__`, falling back to `type(base)`.
    fn getattr_or_type(&mut self, base: Value) -> Value {
        self.get_attribute(base, StaticStrings::DunderClass.into())
            .unwrap_or_else(|_| self.get_type(base))
    }

    /// Creates a class from the host, as a `class` statement would.
    pub fn create_class(&mut self, name: &str, bases: &[Value], namespace: &[(&str, Value)]) -> RunResult<Value> {
        let mut table = crate::types::new_attr_table();
        for &(key, value) in namespace {
            table.insert(intern(key), value);
        }
        self.build_class(intern(name), bases, table)
    }

    // ========================================================================
    // Structural mutation
    // ========================================================================

    /// Recomputes protocol flags for `cls` and everything below it.
    fn refresh_flags(&mut self, cls: HeapId) {
        let mut affected = vec![cls];
        affected.extend(all_subclasses(&self.heap, cls));
        for id in affected {
            let flags = compute_flags(&self.heap, id);
            type_obj_mut(&mut self.heap, id).flags = flags;
        }
    }

    fn check_heap_type_attr(&self, cls: HeapId, attr: StaticStrings) -> RunResult<()> {
        if self.is_heap_type(cls) {
            Ok(())
        } else {
            Err(ExcType::type_error(format!(
                "can't set {}.{}",
                self.type_name(cls),
                attr.as_str()
            )))
        }
    }

    /// `cls.__bases__ = bases`. Transactional: either `cls` and every subclass get a new
    /// MRO, or nothing changes.
    pub(crate) fn set_bases(&mut self, cls: HeapId, bases: &[Value]) -> RunResult<()> {
        self.check_heap_type_attr(cls, StaticStrings::DunderBases)?;
        if bases.is_empty() {
            return Err(ExcType::type_error(format!(
                "can only assign non-empty tuple to {}.__bases__, not ()",
                self.type_name(cls)
            )));
        }
        let mut new_bases = Vec::with_capacity(bases.len());
        for &b in bases {
            let Some(base) = self.as_type(b) else {
                return Err(ExcType::type_error(format!(
                    "{}.__bases__ must be tuple of old- or new-style classes, not '{}'",
                    self.type_name(cls),
                    self.value_type_name(b)
                )));
            };
            if self.is_subtype(base, cls) {
                return Err(ExcType::structural_error("a __bases__ item causes an inheritance cycle"));
            }
            if !self.has_flag(base, TypeFlags::BASETYPE) {
                return Err(ExcType::structural_error(format!(
                    "type '{}' is not an acceptable base type",
                    self.type_name(base)
                )));
            }
            new_bases.push(base);
        }
        let new_root = self.best_layout_root(&new_bases)?;
        let old_root = self.layout_root(cls);
        if new_root != old_root {
            return Err(ExcType::structural_error(format!(
                "__bases__ assignment: '{}' object layout differs from '{}'",
                self.type_name(new_root),
                self.type_name(old_root)
            )));
        }

        // compute every new MRO against a scratch view before touching any class
        let mut scratch: AHashMap<HeapId, Vec<HeapId>> = AHashMap::new();
        let subclasses = all_subclasses(&self.heap, cls);
        {
            let heap = &self.heap;
            let mro_for = |scratch: &AHashMap<HeapId, Vec<HeapId>>, id: HeapId| {
                scratch.get(&id).cloned().unwrap_or_else(|| type_obj(heap, id).mro.clone())
            };
            let mro = compute_c3_mro(cls, &new_bases, |b| mro_for(&scratch, b)).map_err(|e| self.mro_error(&e))?;
            scratch.insert(cls, mro);
            for &sub in &subclasses {
                let sub_bases = type_obj(heap, sub).bases.clone();
                let mro =
                    compute_c3_mro(sub, &sub_bases, |b| mro_for(&scratch, b)).map_err(|e| self.mro_error(&e))?;
                scratch.insert(sub, mro);
            }
        }

        let old_bases = type_obj(&self.heap, cls).bases.clone();
        let uid = type_obj(&self.heap, cls).uid;
        for base in old_bases {
            type_obj_mut(&mut self.heap, base).subclasses.retain(|e| e.class_id != cls);
        }
        for &base in &new_bases {
            type_obj_mut(&mut self.heap, base).subclasses.push(SubclassEntry {
                class_id: cls,
                class_uid: uid,
            });
        }
        type_obj_mut(&mut self.heap, cls).bases = new_bases.into_iter().collect();
        for (id, mro) in scratch {
            type_obj_mut(&mut self.heap, id).mro = mro;
        }
        self.refresh_flags(cls);
        self.bump_epoch();
        Ok(())
    }

    /// `obj.__class__ = cls`, allowed between heap classes sharing an instance layout.
    pub(crate) fn set_class(&mut self, obj: Value, cls: HeapId) -> RunResult<()> {
        let old = self.type_of(obj);
        let is_instance = obj
            .ref_id()
            .is_some_and(|id| matches!(self.heap.get(id), HeapData::Instance(_)));
        if !is_instance || !self.is_heap_type(cls) || !self.is_heap_type(old) {
            return Err(ExcType::type_error("__class__ assignment: only for heap types"));
        }
        if self.layout_root(cls) != self.layout_root(old)
            || type_obj(&self.heap, cls).instance_dict != type_obj(&self.heap, old).instance_dict
        {
            return Err(ExcType::type_error(format!(
                "__class__ assignment: '{}' object layout differs from '{}'",
                self.type_name(cls),
                self.type_name(old)
            )));
        }
        if let Some(id) = obj.ref_id()
            && let HeapData::Instance(inst) = self.heap.get_mut(id)
        {
            inst.class_id = cls;
        }
        self.bump_epoch();
        Ok(())
    }

    /// `cls.__name__ = value`.
    pub(crate) fn rename_type(&mut self, cls: HeapId, value: Value) -> RunResult<()> {
        self.check_heap_type_attr(cls, StaticStrings::DunderName)?;
        let Some(text) = str_content(&self.heap, value) else {
            return Err(ExcType::type_error(format!(
                "can only assign string to {}.__name__, not '{}'",
                self.type_name(cls),
                self.value_type_name(value)
            )));
        };
        if text.contains('\0') {
            return Err(ExcType::ValueError.error("__name__ must not contain null bytes"));
        }
        let name = intern(text);
        type_obj_mut(&mut self.heap, cls).name = name;
        Ok(())
    }

    fn builtin_type_setattr_error(&self, cls: HeapId) -> RunError {
        ExcType::type_error(format!(
            "can't set attributes of built-in/extension type '{}'",
            self.type_name(cls)
        ))
    }

    /// `type.__setattr__(cls, name, value)`.
    pub(crate) fn type_setattr(&mut self, cls: HeapId, name: StringId, value: Value) -> RunResult<()> {
        if !self.is_heap_type(cls) {
            return Err(self.builtin_type_setattr_error(cls));
        }
        let meta = self.type_of(Value::Ref(cls));
        if let Some(d) = self.lookup(meta, name)
            && self.is_data_descriptor(d)
        {
            return self.descriptor_set(d, Value::Ref(cls), Some(value));
        }
        type_obj_mut(&mut self.heap, cls).dict.insert(name, value);
        self.refresh_flags(cls);
        self.bump_epoch();
        Ok(())
    }

    /// `type.__delattr__(cls, name)`.
    pub(crate) fn type_delattr(&mut self, cls: HeapId, name: StringId) -> RunResult<()> {
        if !self.is_heap_type(cls) {
            return Err(self.builtin_type_setattr_error(cls));
        }
        let meta = self.type_of(Value::Ref(cls));
        if let Some(d) = self.lookup(meta, name)
            && self.is_data_descriptor(d)
        {
            return self.descriptor_set(d, Value::Ref(cls), None);
        }
        if type_obj_mut(&mut self.heap, cls).dict.shift_remove(&name).is_none() {
            return Err(ExcType::class_attribute_error(self.type_name(cls), name));
        }
        self.refresh_flags(cls);
        self.bump_epoch();
        Ok(())
    }

    // ========================================================================
    // isinstance / issubclass
    // ========================================================================

    /// `isinstance(obj, cls)`, honoring tuples and metatype `__instancecheck__`.
    pub fn is_instance(&mut self, obj: Value, cls: Value) -> RunResult<bool> {
        if let Some(items) = self.tuple_items(cls) {
            for item in items {
                if self.is_instance(obj, item)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        let Some(cls_id) = self.as_type(cls) else {
            return Err(ExcType::type_error(
                "isinstance() arg 2 must be a class, type, or tuple of classes and types",
            ));
        };
        let obj_type = self.type_of(obj);
        if self.is_subtype(obj_type, cls_id) {
            return Ok(true);
        }
        let meta = self.type_of(cls);
        match self.lookup(meta, StaticStrings::DunderInstancecheck.into()) {
            Some(Value::Builtin(Builtin::Method(BuiltinMethod::TypeInstancecheck))) | None => {}
            Some(hook) => {
                let result = self.call_special_value(hook, cls, &[obj])?;
                return self.is_true(result);
            }
        }
        // proxies may report a different __class__
        match self.get_attribute(obj, StaticStrings::DunderClass.into()) {
            Ok(reported) => Ok(self
                .as_type(reported)
                .is_some_and(|t| t != obj_type && self.is_subtype(t, cls_id))),
            Err(err) if self.error_matches(&err, ExcType::AttributeError) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// `issubclass(sub, cls)`, honoring tuples and metatype `__subclasscheck__`.
    pub fn is_subclass(&mut self, sub: Value, cls: Value) -> RunResult<bool> {
        if let Some(items) = self.tuple_items(cls) {
            for item in items {
                if self.is_subclass(sub, item)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        let Some(cls_id) = self.as_type(cls) else {
            return Err(ExcType::type_error("issubclass() arg 2 must be a class or tuple of classes"));
        };
        let meta = self.type_of(cls);
        match self.lookup(meta, StaticStrings::DunderSubclasscheck.into()) {
            Some(Value::Builtin(Builtin::Method(BuiltinMethod::TypeSubclasscheck))) | None => {}
            Some(hook) => {
                let result = self.call_special_value(hook, cls, &[sub])?;
                return self.is_true(result);
            }
        }
        let Some(sub_id) = self.as_type(sub) else {
            return Err(ExcType::type_error("issubclass() arg 1 must be a class"));
        };
        Ok(self.is_subtype(sub_id, cls_id))
    }
}
