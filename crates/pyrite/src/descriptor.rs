//! Attribute access and the descriptor protocol.
//!
//! Instance lookup order: a data descriptor on the type, then the instance `__dict__`, then a
//! non-data descriptor or plain attribute on the type. Class lookup order: a data descriptor
//! on the metatype, then the class's own MRO (binding with `__get__(None, cls)`), then any
//! metatype attribute. A custom `__getattribute__` replaces the whole algorithm, and
//! `__getattr__` runs when it (or the generic lookup) raises `AttributeError`.
//!
//! The generic lookups first resolve a *target* from the receiver's type alone and then apply
//! it to the receiver. Targets depend only on the receiver shape and the class structure, which
//! is what lets the cached entry points memoize them per shape and epoch.

use crate::{
    builtins::{Builtin, GetSet},
    cache::{AttributeSite, CallSite, StoreSite, SiteKind},
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    runtime::{CacheProbe, Runtime},
    tracer::DispatchTracer,
    types::{BoundMethod, TypeFlags, new_attr_table, type_obj},
    value::Value,
};

/// Where an attribute lives for a given receiver shape.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttrTarget {
    /// Data descriptor on the instance's type.
    DataDescriptor(Value),
    /// Only the instance `__dict__` can hold it.
    InstanceDict,
    /// Type attribute, shadowed by an instance `__dict__` entry of the same name.
    TypeAttr { value: Value, bind: bool },
    /// Data descriptor on a class receiver's metatype.
    MetaDataDescriptor(Value),
    /// Attribute found on a class receiver's own MRO.
    ClassAttr { value: Value, bind: bool },
    /// Non-data attribute found on a class receiver's metatype.
    MetaAttr { value: Value, bind: bool },
}

/// Where an attribute store goes for an instance shape.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StoreTarget {
    DataDescriptor(Value),
    InstanceDict,
}

impl<Tr: DispatchTracer> Runtime<Tr> {
    // ========================================================================
    // Descriptor protocol
    // ========================================================================

    fn descriptor_flags(&self, value: Value) -> TypeFlags {
        self.flags(self.type_of(value))
    }

    /// Whether `value` is a data descriptor: its type defines `__set__` or `__delete__`.
    pub(crate) fn is_data_descriptor(&self, value: Value) -> bool {
        self.descriptor_flags(value)
            .intersects(TypeFlags::HAS_SET | TypeFlags::HAS_DELETE)
    }

    pub(crate) fn has_get(&self, value: Value) -> bool {
        self.descriptor_flags(value).contains(TypeFlags::HAS_GET)
    }

    /// `descr.__get__(obj, owner)`; `obj` is `None` for access through the class.
    pub(crate) fn descriptor_get(&mut self, descr: Value, obj: Option<Value>, owner: HeapId) -> RunResult<Value> {
        match descr {
            Value::Builtin(Builtin::Method(m)) if !m.is_static() => match obj {
                Some(obj) => self.alloc(HeapData::BoundMethod(BoundMethod {
                    func: descr,
                    receiver: Some(obj),
                    class: Some(owner),
                })),
                None => Ok(descr),
            },
            Value::Builtin(Builtin::GetSet(g)) => match obj {
                Some(obj) => self.getset_get(g, obj),
                None => Ok(descr),
            },
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(_) => self.bind_function(descr, obj, owner),
                HeapData::Property(_) => self.property_get(descr, obj),
                &HeapData::ClassMethod(func) => {
                    let cls = match obj {
                        Some(obj) if self.as_type(obj).is_none() => self.type_of(obj),
                        _ => owner,
                    };
                    let meta = self.type_of(Value::Ref(cls));
                    self.alloc(HeapData::BoundMethod(BoundMethod {
                        func,
                        receiver: Some(Value::Ref(cls)),
                        class: Some(meta),
                    }))
                }
                &HeapData::StaticMethod(func) => Ok(func),
                _ => self.user_get(descr, obj, owner),
            },
            _ => Ok(descr),
        }
    }

    fn user_get(&mut self, descr: Value, obj: Option<Value>, owner: HeapId) -> RunResult<Value> {
        let descr_type = self.type_of(descr);
        if !self.has_flag(descr_type, TypeFlags::HAS_GET) {
            return Ok(descr);
        }
        let Some(getter) = self.lookup(descr_type, StaticStrings::DunderGet.into()) else {
            return Ok(descr);
        };
        self.call_special_value(getter, descr, &[obj.unwrap_or(Value::None), Value::Ref(owner)])
    }

    /// `descr.__set__(obj, value)`, or `descr.__delete__(obj)` when `value` is `None`.
    pub(crate) fn descriptor_set(&mut self, descr: Value, obj: Value, value: Option<Value>) -> RunResult<()> {
        match descr {
            Value::Builtin(Builtin::GetSet(g)) => return self.getset_set(g, obj, value),
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Property(_)) => {
                return self.property_set(descr, obj, value);
            }
            _ => {}
        }
        let name = if value.is_some() {
            StaticStrings::DunderSet
        } else {
            StaticStrings::DunderDelete
        };
        let Some(method) = self.lookup_special(descr, name) else {
            return Err(ExcType::AttributeError.error(name.as_str()));
        };
        match value {
            Some(value) => self.call_special_value(method, descr, &[obj, value])?,
            None => self.call_special_value(method, descr, &[obj])?,
        };
        Ok(())
    }

    /// Binds a Python function: an unbound method through the class, a bound method through
    /// an instance.
    pub(crate) fn bind_function(&mut self, func: Value, obj: Option<Value>, owner: HeapId) -> RunResult<Value> {
        self.alloc(HeapData::BoundMethod(BoundMethod {
            func,
            receiver: obj,
            class: Some(owner),
        }))
    }

    /// `property.__get__`: the property itself through the class, `fget(obj)` through an instance.
    pub(crate) fn property_get(&mut self, property: Value, obj: Option<Value>) -> RunResult<Value> {
        let Some(obj) = obj else { return Ok(property) };
        let fget = match property.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Property(p)) => p.fget,
            _ => return Err(ExcType::type_error("descriptor '__get__' requires a 'property' object")),
        };
        if fget.is_none() {
            return Err(ExcType::AttributeError.error("unreadable attribute"));
        }
        self.call_object(fget, &[obj])
    }

    /// `property.__set__` when `value` is given, `property.__delete__` otherwise.
    pub(crate) fn property_set(&mut self, property: Value, obj: Value, value: Option<Value>) -> RunResult<()> {
        let p = match property.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Property(p)) => *p,
            _ => return Err(ExcType::type_error("descriptor '__set__' requires a 'property' object")),
        };
        match value {
            Some(value) if !p.fset.is_none() => self.call_object(p.fset, &[obj, value]).map(|_| ()),
            Some(_) => Err(ExcType::AttributeError.error("can't set attribute")),
            None if !p.fdel.is_none() => self.call_object(p.fdel, &[obj]).map(|_| ()),
            None => Err(ExcType::AttributeError.error("can't delete attribute")),
        }
    }

    fn getset_mismatch(&self, getset: GetSet, owner: &str, obj: Value) -> RunError {
        ExcType::type_error(format!(
            "descriptor '{}' for '{owner}' objects doesn't apply to '{}' object",
            getset.name().as_str(),
            self.value_type_name(obj)
        ))
    }

    /// Reads a native data descriptor from an instance.
    pub(crate) fn getset_get(&mut self, getset: GetSet, obj: Value) -> RunResult<Value> {
        match getset {
            GetSet::ObjectClass => Ok(Value::Ref(self.type_of(obj))),
            GetSet::InstanceDict => match self.instance_dict(obj, true)? {
                Some(dict) => Ok(Value::Ref(dict)),
                None => Err(ExcType::attribute_error(self.value_type_name(obj), StaticStrings::DunderDict.into())),
            },
            GetSet::TypeName | GetSet::TypeBases | GetSet::TypeBase | GetSet::TypeMro | GetSet::TypeDict => {
                let Some(cls) = self.as_type(obj) else {
                    return Err(self.getset_mismatch(getset, "type", obj));
                };
                let t = type_obj(&self.heap, cls);
                match getset {
                    GetSet::TypeName => Ok(Value::InternStr(t.name)),
                    GetSet::TypeBase => Ok(t.bases.first().map_or(Value::None, |&b| Value::Ref(b))),
                    GetSet::TypeBases => {
                        let items = t.bases.iter().map(|&b| Value::Ref(b)).collect();
                        self.new_tuple(items)
                    }
                    GetSet::TypeMro => {
                        let items = t.mro.iter().map(|&b| Value::Ref(b)).collect();
                        self.new_tuple(items)
                    }
                    // read-only: writes must go through setattr so the epoch advances
                    _ => self.alloc(HeapData::DictProxy(cls)),
                }
            }
            GetSet::FunctionName => match obj.ref_id().map(|id| self.heap.get(id)) {
                Some(HeapData::Function(f)) => Ok(Value::InternStr(f.name)),
                _ => Err(self.getset_mismatch(getset, "function", obj)),
            },
            GetSet::MethodSelf | GetSet::MethodFunc | GetSet::MethodClass => {
                match obj.ref_id().map(|id| self.heap.get(id)) {
                    Some(HeapData::BoundMethod(m)) => Ok(match getset {
                        GetSet::MethodSelf => m.receiver.unwrap_or(Value::None),
                        GetSet::MethodFunc => m.func,
                        _ => m.class.map_or(Value::None, Value::Ref),
                    }),
                    _ => Err(self.getset_mismatch(getset, "instancemethod", obj)),
                }
            }
            GetSet::PropertyFget | GetSet::PropertyFset | GetSet::PropertyFdel => {
                match obj.ref_id().map(|id| self.heap.get(id)) {
                    Some(HeapData::Property(p)) => Ok(match getset {
                        GetSet::PropertyFget => p.fget,
                        GetSet::PropertyFset => p.fset,
                        _ => p.fdel,
                    }),
                    _ => Err(self.getset_mismatch(getset, "property", obj)),
                }
            }
        }
    }

    /// Writes (or deletes, for `None`) a native data descriptor on an instance.
    pub(crate) fn getset_set(&mut self, getset: GetSet, obj: Value, value: Option<Value>) -> RunResult<()> {
        match (getset, value) {
            (GetSet::ObjectClass, Some(value)) => {
                let cls = self
                    .as_type(value)
                    .ok_or_else(|| {
                        ExcType::type_error(format!(
                            "__class__ must be set to new-style class, not '{}' object",
                            self.value_type_name(value)
                        ))
                    })?;
                self.set_class(obj, cls)
            }
            (GetSet::ObjectClass, None) => Err(ExcType::type_error("can't delete __class__ attribute")),
            (GetSet::InstanceDict, Some(value)) => {
                let is_dict = value
                    .ref_id()
                    .is_some_and(|id| matches!(self.heap.get(id), HeapData::Dict(_)));
                if !is_dict {
                    return Err(ExcType::type_error(format!(
                        "__dict__ must be set to a dictionary, not a '{}'",
                        self.value_type_name(value)
                    )));
                }
                if let Some(id) = obj.ref_id()
                    && let HeapData::Instance(inst) = self.heap.get_mut(id)
                {
                    inst.dict = value.ref_id();
                    return Ok(());
                }
                Err(ExcType::attribute_error(self.value_type_name(obj), StaticStrings::DunderDict.into()))
            }
            (GetSet::InstanceDict, None) => Err(ExcType::type_error("cannot delete __dict__")),
            (GetSet::TypeName, Some(value)) => {
                let cls = self.as_type(obj).ok_or_else(|| self.getset_mismatch(getset, "type", obj))?;
                self.rename_type(cls, value)
            }
            (GetSet::TypeBases, Some(value)) => {
                let cls = self.as_type(obj).ok_or_else(|| self.getset_mismatch(getset, "type", obj))?;
                let Some(items) = value.ref_id().and_then(|id| match self.heap.get(id) {
                    HeapData::Tuple(items) => Some(items.clone()),
                    _ => None,
                }) else {
                    return Err(ExcType::type_error(format!(
                        "can only assign tuple to {}.__bases__, not {}",
                        self.type_name(cls),
                        self.value_type_name(value)
                    )));
                };
                self.set_bases(cls, &items)
            }
            (GetSet::TypeName | GetSet::TypeBases, None) => {
                let owner = self.as_type(obj).map_or("?", |cls| self.type_name(cls));
                Err(ExcType::type_error(format!(
                    "can't delete {owner}.{}",
                    getset.name().as_str()
                )))
            }
            _ => Err(ExcType::AttributeError.error(format!(
                "attribute '{}' of '{}' objects is not writable",
                getset.name().as_str(),
                self.value_type_name(obj)
            ))),
        }
    }

    // ========================================================================
    // Instance dicts
    // ========================================================================

    /// The instance `__dict__` of `obj`, allocating it on demand when `create` is set.
    ///
    /// `None` when instances of the type carry no dict.
    pub(crate) fn instance_dict(&mut self, obj: Value, create: bool) -> RunResult<Option<HeapId>> {
        let Some(id) = obj.ref_id() else { return Ok(None) };
        let (class_id, dict) = match self.heap.get(id) {
            HeapData::Instance(inst) => (inst.class_id, inst.dict),
            _ => return Ok(None),
        };
        if dict.is_some() || !create {
            return Ok(dict);
        }
        if !type_obj(&self.heap, class_id).instance_dict {
            return Ok(None);
        }
        let dict = self.heap.allocate(HeapData::Dict(new_attr_table()))?;
        if let HeapData::Instance(inst) = self.heap.get_mut(id) {
            inst.dict = Some(dict);
        }
        Ok(Some(dict))
    }

    fn instance_dict_get(&self, obj: Value, name: StringId) -> Option<Value> {
        let HeapData::Instance(inst) = self.heap.get(obj.ref_id()?) else {
            return None;
        };
        match self.heap.get(inst.dict?) {
            HeapData::Dict(table) => table.get(&name).copied(),
            _ => None,
        }
    }

    // ========================================================================
    // Attribute loads
    // ========================================================================

    /// Resolves where `name` lives for receivers shaped like `obj`. Performs no calls.
    pub(crate) fn resolve_attr(&self, obj: Value, name: StringId) -> Option<AttrTarget> {
        if let Some(cls) = self.as_type(obj) {
            let meta = self.type_of(obj);
            let meta_found = self.lookup(meta, name);
            if let Some(d) = meta_found
                && self.is_data_descriptor(d)
            {
                return Some(AttrTarget::MetaDataDescriptor(d));
            }
            if let Some(value) = self.lookup(cls, name) {
                return Some(AttrTarget::ClassAttr {
                    value,
                    bind: self.has_get(value),
                });
            }
            return meta_found.map(|value| AttrTarget::MetaAttr {
                value,
                bind: self.has_get(value),
            });
        }
        let type_id = self.type_of(obj);
        match self.lookup(type_id, name) {
            Some(d) if self.is_data_descriptor(d) => Some(AttrTarget::DataDescriptor(d)),
            Some(value) => Some(AttrTarget::TypeAttr {
                value,
                bind: self.has_get(value),
            }),
            None if type_obj(&self.heap, type_id).instance_dict => Some(AttrTarget::InstanceDict),
            None => None,
        }
    }

    /// Applies a resolved target to a receiver. `Ok(None)` means the attribute is missing.
    pub(crate) fn apply_attr_target(&mut self, target: &AttrTarget, obj: Value, name: StringId) -> RunResult<Option<Value>> {
        match *target {
            AttrTarget::DataDescriptor(d) => {
                let owner = self.type_of(obj);
                self.descriptor_get(d, Some(obj), owner).map(Some)
            }
            AttrTarget::InstanceDict => Ok(self.instance_dict_get(obj, name)),
            AttrTarget::TypeAttr { value, bind } => {
                if let Some(v) = self.instance_dict_get(obj, name) {
                    return Ok(Some(v));
                }
                if bind {
                    let owner = self.type_of(obj);
                    self.descriptor_get(value, Some(obj), owner).map(Some)
                } else {
                    Ok(Some(value))
                }
            }
            AttrTarget::MetaDataDescriptor(d) => {
                let meta = self.type_of(obj);
                self.descriptor_get(d, Some(obj), meta).map(Some)
            }
            AttrTarget::ClassAttr { value, bind } => {
                if !bind {
                    return Ok(Some(value));
                }
                let cls = self
                    .as_type(obj)
                    .ok_or_else(|| RunError::internal("class target applied to a non-class receiver"))?;
                self.descriptor_get(value, None, cls).map(Some)
            }
            AttrTarget::MetaAttr { value, bind } => {
                if !bind {
                    return Ok(Some(value));
                }
                let meta = self.type_of(obj);
                self.descriptor_get(value, Some(obj), meta).map(Some)
            }
        }
    }

    /// `getattr(obj, name)` with the full Python 2 protocol.
    pub fn get_attribute(&mut self, obj: Value, name: StringId) -> RunResult<Value> {
        let type_id = self.type_of(obj);
        if self.has_flag(type_id, TypeFlags::HAS_GETATTRIBUTE) {
            return self.call_getattribute_hook(type_id, obj, name);
        }
        let target = self.resolve_attr(obj, name);
        self.finish_load(target.as_ref(), obj, name)
    }

    /// Convenience for hosts: `getattr(obj, "name")`.
    pub fn getattr_str(&mut self, obj: Value, name: &str) -> RunResult<Value> {
        self.get_attribute(obj, crate::intern::intern(name))
    }

    fn finish_load(&mut self, target: Option<&AttrTarget>, obj: Value, name: StringId) -> RunResult<Value> {
        let result = match target {
            Some(target) => self.apply_attr_target(target, obj, name),
            None => Ok(None),
        };
        match result {
            Ok(Some(value)) => Ok(value),
            Ok(None) => self.missing_attribute(obj, name, None),
            Err(err) if self.error_matches(&err, ExcType::AttributeError) => self.missing_attribute(obj, name, Some(err)),
            Err(err) => Err(err),
        }
    }

    fn call_getattribute_hook(&mut self, type_id: HeapId, obj: Value, name: StringId) -> RunResult<Value> {
        let Some(hook) = self.lookup(type_id, StaticStrings::DunderGetattribute.into()) else {
            return Err(RunError::internal("HAS_GETATTRIBUTE set without a __getattribute__"));
        };
        let result = match hook {
            Value::Builtin(Builtin::Method(crate::builtins::BuiltinMethod::SuperGetattribute)) => {
                self.super_getattr(obj, name)
            }
            _ => self.call_special_value(hook, obj, &[Value::InternStr(name)]),
        };
        match result {
            Err(err) if self.error_matches(&err, ExcType::AttributeError) => self.missing_attribute(obj, name, Some(err)),
            other => other,
        }
    }

    /// Falls back to `__getattr__`, or raises `AttributeError`.
    fn missing_attribute(&mut self, obj: Value, name: StringId, err: Option<RunError>) -> RunResult<Value> {
        let type_id = self.type_of(obj);
        if self.has_flag(type_id, TypeFlags::HAS_GETATTR)
            && let Some(hook) = self.lookup(type_id, StaticStrings::DunderGetattr.into())
        {
            return self.call_special_value(hook, obj, &[Value::InternStr(name)]);
        }
        if let Some(err) = err {
            return Err(err);
        }
        Err(match self.as_type(obj) {
            Some(cls) => ExcType::class_attribute_error(self.type_name(cls), name),
            None => ExcType::attribute_error(self.type_name(type_id), name),
        })
    }

    /// `object.__getattribute__`: the generic lookup without hooks.
    pub(crate) fn generic_getattr_or_error(&mut self, obj: Value, name: StringId) -> RunResult<Value> {
        let target = self.resolve_attr(obj, name);
        let found = match target {
            Some(target) => self.apply_attr_target(&target, obj, name)?,
            None => None,
        };
        found.ok_or_else(|| match self.as_type(obj) {
            Some(cls) => ExcType::class_attribute_error(self.type_name(cls), name),
            None => ExcType::attribute_error(self.value_type_name(obj), name),
        })
    }

    /// `type.__getattribute__`.
    pub(crate) fn type_getattr_or_error(&mut self, cls: HeapId, name: StringId) -> RunResult<Value> {
        self.generic_getattr_or_error(Value::Ref(cls), name)
    }

    /// `super(C, obj).name`: searches the MRO of `type(obj)` after `C`.
    pub(crate) fn super_getattr(&mut self, proxy: Value, name: StringId) -> RunResult<Value> {
        let sup = match proxy.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Super(sup)) => *sup,
            _ => return self.generic_getattr_or_error(proxy, name),
        };
        if name == StaticStrings::DunderClass {
            return self.generic_getattr_or_error(proxy, name);
        }
        let mro = type_obj(&self.heap, sup.obj_type).mro.clone();
        let start = mro.iter().position(|&c| c == sup.this_class).map_or(mro.len(), |i| i + 1);
        for &cls in &mro[start..] {
            let Some(value) = type_obj(&self.heap, cls).dict.get(&name).copied() else {
                continue;
            };
            if !self.has_get(value) {
                return Ok(value);
            }
            // super(C, cls) from a classmethod binds like class access
            let obj = if sup.obj == Value::Ref(sup.obj_type) { None } else { Some(sup.obj) };
            return self.descriptor_get(value, obj, sup.obj_type);
        }
        self.generic_getattr_or_error(proxy, name)
    }

    /// Attribute load at a cached site.
    pub fn load_attr_cached(&mut self, site: &AttributeSite, obj: Value, name: StringId) -> RunResult<Value> {
        let type_id = self.type_of(obj);
        if self.has_flag(type_id, TypeFlags::HAS_GETATTRIBUTE) {
            return self.call_getattribute_hook(type_id, obj, name);
        }
        let shape = self.shape_of(obj);
        let target = match self.probe_site(&site.0, SiteKind::LoadAttr, shape) {
            CacheProbe::Hit(target) => Some(target),
            CacheProbe::Miss { epoch, install } => {
                let target = self.resolve_attr(obj, name);
                if install && let Some(target) = &target {
                    self.install_site(&site.0, SiteKind::LoadAttr, shape, epoch, target.clone());
                }
                target
            }
        };
        self.finish_load(target.as_ref(), obj, name)
    }

    /// Method call at a cached site: `obj.name(*args)` without allocating a bound method when
    /// the target is a plain function or method descriptor.
    pub fn call_method_cached(&mut self, site: &CallSite, obj: Value, name: StringId, args: &[Value]) -> RunResult<Value> {
        let type_id = self.type_of(obj);
        if self.has_flag(type_id, TypeFlags::HAS_GETATTRIBUTE) {
            let method = self.call_getattribute_hook(type_id, obj, name)?;
            return self.call_object(method, args);
        }
        let shape = self.shape_of(obj);
        let target = match self.probe_site(&site.0, SiteKind::CallMethod, shape) {
            CacheProbe::Hit(target) => Some(target),
            CacheProbe::Miss { epoch, install } => {
                let target = self.resolve_attr(obj, name);
                if install && let Some(target) = &target {
                    self.install_site(&site.0, SiteKind::CallMethod, shape, epoch, target.clone());
                }
                target
            }
        };
        if let Some(AttrTarget::TypeAttr { value, bind: true }) = target
            && self.is_plain_method(value)
            && self.instance_dict_get(obj, name).is_none()
        {
            return self.call_with_self(value, obj, args);
        }
        let method = self.finish_load(target.as_ref(), obj, name)?;
        self.call_object(method, args)
    }

    // ========================================================================
    // Attribute stores and deletes
    // ========================================================================

    fn resolve_store(&self, obj: Value, name: StringId) -> RunResult<StoreTarget> {
        let type_id = self.type_of(obj);
        match self.lookup(type_id, name) {
            Some(d) if self.is_data_descriptor(d) => Ok(StoreTarget::DataDescriptor(d)),
            _ if type_obj(&self.heap, type_id).instance_dict && matches!(obj, Value::Ref(_)) => {
                Ok(StoreTarget::InstanceDict)
            }
            Some(_) => Err(ExcType::AttributeError.error(format!(
                "'{}' object attribute '{name}' is read-only",
                self.type_name(type_id)
            ))),
            None => Err(ExcType::attribute_error(self.type_name(type_id), name)),
        }
    }

    fn apply_store(&mut self, target: &StoreTarget, obj: Value, name: StringId, value: Option<Value>) -> RunResult<()> {
        match *target {
            StoreTarget::DataDescriptor(d) => self.descriptor_set(d, obj, value),
            StoreTarget::InstanceDict => {
                let Some(dict) = self.instance_dict(obj, value.is_some())? else {
                    return match value {
                        Some(_) => Err(ExcType::attribute_error(self.value_type_name(obj), name)),
                        None => Err(ExcType::AttributeError.error(name.as_str())),
                    };
                };
                let HeapData::Dict(table) = self.heap.get_mut(dict) else {
                    return Err(RunError::internal("instance __dict__ is not a dict"));
                };
                match value {
                    Some(value) => {
                        table.insert(name, value);
                        Ok(())
                    }
                    None => match table.shift_remove(&name) {
                        Some(_) => Ok(()),
                        None => Err(ExcType::AttributeError.error(name.as_str())),
                    },
                }
            }
        }
    }

    /// `setattr(obj, name, value)`.
    pub fn set_attribute(&mut self, obj: Value, name: StringId, value: Value) -> RunResult<()> {
        let type_id = self.type_of(obj);
        if self.has_flag(type_id, TypeFlags::HAS_SETATTR)
            && let Some(hook) = self.lookup(type_id, StaticStrings::DunderSetattr.into())
        {
            return self
                .call_special_value(hook, obj, &[Value::InternStr(name), value])
                .map(|_| ());
        }
        self.generic_setattr(obj, name, value).map(|_| ())
    }

    /// Convenience for hosts: `setattr(obj, "name", value)`.
    pub fn setattr_str(&mut self, obj: Value, name: &str, value: Value) -> RunResult<()> {
        self.set_attribute(obj, crate::intern::intern(name), value)
    }

    /// `object.__setattr__`. Returns the store target when it may be cached.
    pub(crate) fn generic_setattr(&mut self, obj: Value, name: StringId, value: Value) -> RunResult<Option<StoreTarget>> {
        if let Some(cls) = self.as_type(obj) {
            self.type_setattr(cls, name, value)?;
            return Ok(None);
        }
        let target = self.resolve_store(obj, name)?;
        self.apply_store(&target, obj, name, Some(value))?;
        Ok(Some(target))
    }

    /// `delattr(obj, name)`.
    pub fn delete_attribute(&mut self, obj: Value, name: StringId) -> RunResult<()> {
        let type_id = self.type_of(obj);
        if self.has_flag(type_id, TypeFlags::HAS_DELATTR)
            && let Some(hook) = self.lookup(type_id, StaticStrings::DunderDelattr.into())
        {
            return self
                .call_special_value(hook, obj, &[Value::InternStr(name)])
                .map(|_| ());
        }
        self.generic_delattr(obj, name)
    }

    /// `object.__delattr__`.
    pub(crate) fn generic_delattr(&mut self, obj: Value, name: StringId) -> RunResult<()> {
        if let Some(cls) = self.as_type(obj) {
            return self.type_delattr(cls, name);
        }
        let target = self.resolve_store(obj, name)?;
        self.apply_store(&target, obj, name, None)
    }

    /// Attribute store at a cached site.
    pub fn store_attr_cached(&mut self, site: &StoreSite, obj: Value, name: StringId, value: Value) -> RunResult<()> {
        let type_id = self.type_of(obj);
        if self.has_flag(type_id, TypeFlags::HAS_SETATTR) || self.as_type(obj).is_some() {
            return self.set_attribute(obj, name, value);
        }
        let shape = self.shape_of(obj);
        match self.probe_site(&site.0, SiteKind::StoreAttr, shape) {
            CacheProbe::Hit(target) => self.apply_store(&target, obj, name, Some(value)),
            CacheProbe::Miss { epoch, install } => {
                let target = self.resolve_store(obj, name)?;
                if install {
                    self.install_site(&site.0, SiteKind::StoreAttr, shape, epoch, target.clone());
                }
                self.apply_store(&target, obj, name, Some(value))
            }
        }
    }
}
