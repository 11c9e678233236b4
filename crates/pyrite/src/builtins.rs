//! Builtin functions and the native methods installed in builtin type dicts.
//!
//! Builtins are immediate [`Value::Builtin`] values, so type dicts can hold them like any other
//! attribute and the descriptor engine treats them uniformly: a [`BuiltinMethod`] is a
//! `method_descriptor` that binds its receiver, a [`GetSet`] is a data descriptor, and a
//! [`BuiltinFunction`] is a plain callable.
//!
//! All native methods receive their receiver as `args[0]`.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use strum::IntoStaticStr;

use crate::{
    bytecode::vm::generator::ResumeValue,
    dispatch::{BinaryOp, CompareOp, IterStep},
    exception_private::{ExcType, FailureKind, RunError, RunResult},
    heap::HeapData,
    intern::{StaticStrings, StringId, intern},
    runtime::Runtime,
    tracer::DispatchTracer,
    types::{IterSource, Property, SeqIter, SuperProxy, new_attr_table},
    value::{Value, number, str_content},
};

/// A builtin callable or descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Function(BuiltinFunction),
    Method(BuiltinMethod),
    GetSet(GetSet),
}

impl Builtin {
    /// Name used in error messages and reprs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Function(f) => f.into(),
            Self::Method(m) => m.name(),
            Self::GetSet(g) => g.name().as_str(),
        }
    }
}

/// Functions in the builtins namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinFunction {
    Len,
    Iter,
    Next,
    Isinstance,
    Issubclass,
    Getattr,
    Setattr,
    Hasattr,
    Delattr,
    Callable,
    Id,
    Repr,
    #[strum(serialize = "exc_info")]
    ExcInfo,
}

/// Builtin types whose instances are native payloads created by the type's own constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Bool,
    Int,
    Long,
    Float,
    Str,
    Tuple,
    List,
    Dict,
    Property,
    ClassMethod,
    StaticMethod,
    Super,
}

/// Native methods of builtin types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMethod {
    ObjectNew,
    ObjectInit,
    ObjectGetattribute,
    ObjectSetattr,
    ObjectDelattr,
    ObjectRepr,
    ObjectStr,
    TypeNew,
    TypeInit,
    TypeCall,
    TypeGetattribute,
    TypeSetattr,
    TypeDelattr,
    TypeMro,
    TypeInstancecheck,
    TypeSubclasscheck,
    /// `__new__` of a builtin type with native instances.
    New(NativeType),
    FunctionGet,
    MethodDescriptorGet,
    PropertyGet,
    PropertySet,
    PropertyDelete,
    PropertyGetter,
    PropertySetter,
    PropertyDeleter,
    ClassMethodGet,
    StaticMethodGet,
    GetSetGet,
    GetSetSet,
    GetSetDelete,
    SuperGetattribute,
    Binary { op: BinaryOp, reflected: bool },
    Compare(CompareOp),
    Len,
    GetItem,
    SetItem,
    Contains,
    Iter,
    IterSelf,
    IterNext,
    ListAppend,
    DictKeys,
    DictGet,
    ExceptionInit,
    ExceptionStr,
    GeneratorNext,
    GeneratorSend,
}

impl BuiltinMethod {
    /// `__new__` implementations are static: accessed through a class they are not bound.
    #[must_use]
    pub fn is_static(self) -> bool {
        matches!(self, Self::ObjectNew | Self::TypeNew | Self::New(_))
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ObjectNew | Self::TypeNew | Self::New(_) => "__new__",
            Self::ObjectInit | Self::TypeInit | Self::ExceptionInit => "__init__",
            Self::ObjectGetattribute | Self::TypeGetattribute | Self::SuperGetattribute => "__getattribute__",
            Self::ObjectSetattr | Self::TypeSetattr => "__setattr__",
            Self::ObjectDelattr | Self::TypeDelattr => "__delattr__",
            Self::ObjectRepr => "__repr__",
            Self::ObjectStr | Self::ExceptionStr => "__str__",
            Self::TypeCall => "__call__",
            Self::TypeMro => "mro",
            Self::TypeInstancecheck => "__instancecheck__",
            Self::TypeSubclasscheck => "__subclasscheck__",
            Self::FunctionGet
            | Self::MethodDescriptorGet
            | Self::PropertyGet
            | Self::ClassMethodGet
            | Self::StaticMethodGet
            | Self::GetSetGet => "__get__",
            Self::PropertySet | Self::GetSetSet => "__set__",
            Self::PropertyDelete | Self::GetSetDelete => "__delete__",
            Self::PropertyGetter => "getter",
            Self::PropertySetter => "setter",
            Self::PropertyDeleter => "deleter",
            Self::Binary { op, reflected } => op.dunder(reflected).as_str(),
            Self::Compare(op) => op.dunder().map_or("__cmp__", StaticStrings::as_str),
            Self::Len => "__len__",
            Self::GetItem => "__getitem__",
            Self::SetItem => "__setitem__",
            Self::Contains => "__contains__",
            Self::Iter | Self::IterSelf => "__iter__",
            Self::IterNext | Self::GeneratorNext => "next",
            Self::ListAppend => "append",
            Self::DictKeys => "keys",
            Self::DictGet => "get",
            Self::GeneratorSend => "send",
        }
    }
}

/// Native data descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GetSet {
    ObjectClass,
    InstanceDict,
    TypeName,
    TypeBases,
    TypeBase,
    TypeMro,
    TypeDict,
    FunctionName,
    MethodSelf,
    MethodFunc,
    MethodClass,
    PropertyFget,
    PropertyFset,
    PropertyFdel,
}

impl GetSet {
    #[must_use]
    pub fn name(self) -> StaticStrings {
        match self {
            Self::ObjectClass => StaticStrings::DunderClass,
            Self::InstanceDict | Self::TypeDict => StaticStrings::DunderDict,
            Self::TypeName | Self::FunctionName => StaticStrings::DunderName,
            Self::TypeBases => StaticStrings::DunderBases,
            Self::TypeBase => StaticStrings::DunderBase,
            Self::TypeMro => StaticStrings::DunderMro,
            Self::MethodSelf => StaticStrings::ImSelf,
            Self::MethodFunc => StaticStrings::ImFunc,
            Self::MethodClass => StaticStrings::ImClass,
            Self::PropertyFget => StaticStrings::Fget,
            Self::PropertyFset => StaticStrings::Fset,
            Self::PropertyFdel => StaticStrings::Fdel,
        }
    }
}

/// Checks a builtin's positional argument count, Python 2 style.
fn check_args(name: &str, args: &[Value], min: usize, max: usize) -> RunResult<()> {
    if args.len() < min || args.len() > max {
        return Err(ExcType::arity_error(name, max, min, args.len(), FailureKind::TypeMismatch));
    }
    Ok(())
}

impl<Tr: DispatchTracer> Runtime<Tr> {
    pub(crate) fn call_builtin(&mut self, builtin: Builtin, args: &[Value]) -> RunResult<Value> {
        match builtin {
            Builtin::Function(f) => self.call_builtin_function(f, args),
            Builtin::Method(m) => self.call_builtin_method(m, args),
            Builtin::GetSet(_) => Err(ExcType::not_callable("getset_descriptor")),
        }
    }

    /// Interns a str argument used as an attribute name.
    pub(crate) fn name_arg(&self, value: Value) -> RunResult<StringId> {
        match value {
            Value::InternStr(id) => Ok(id),
            other => match str_content(&self.heap, other) {
                Some(s) => Ok(intern(s)),
                None => Err(ExcType::type_error(format!(
                    "attribute name must be string, not '{}'",
                    self.value_type_name(other)
                ))),
            },
        }
    }

    fn call_builtin_function(&mut self, function: BuiltinFunction, args: &[Value]) -> RunResult<Value> {
        let name: &'static str = function.into();
        match function {
            BuiltinFunction::Len => {
                check_args(name, args, 1, 1)?;
                let len = self.len(args[0])?;
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            BuiltinFunction::Iter => {
                check_args(name, args, 1, 1)?;
                self.get_iter(args[0])
            }
            BuiltinFunction::Next => {
                check_args(name, args, 1, 2)?;
                match self.iter_next(args[0])? {
                    IterStep::Value(v) => Ok(v),
                    IterStep::End => match args.get(1) {
                        Some(default) => Ok(*default),
                        None => Err(ExcType::StopIteration.bare()),
                    },
                }
            }
            BuiltinFunction::Isinstance => {
                check_args(name, args, 2, 2)?;
                self.is_instance(args[0], args[1]).map(Value::Bool)
            }
            BuiltinFunction::Issubclass => {
                check_args(name, args, 2, 2)?;
                self.is_subclass(args[0], args[1]).map(Value::Bool)
            }
            BuiltinFunction::Getattr => {
                check_args(name, args, 2, 3)?;
                let attr = self.name_arg(args[1])?;
                match self.get_attribute(args[0], attr) {
                    Err(err) if args.len() == 3 && self.error_matches(&err, ExcType::AttributeError) => Ok(args[2]),
                    other => other,
                }
            }
            BuiltinFunction::Setattr => {
                check_args(name, args, 3, 3)?;
                let attr = self.name_arg(args[1])?;
                self.set_attribute(args[0], attr, args[2])?;
                Ok(Value::None)
            }
            BuiltinFunction::Hasattr => {
                check_args(name, args, 2, 2)?;
                let attr = self.name_arg(args[1])?;
                // Python 2 hasattr swallows any catchable exception
                match self.get_attribute(args[0], attr) {
                    Ok(_) => Ok(Value::Bool(true)),
                    Err(RunError::Exc(_)) => Ok(Value::Bool(false)),
                    Err(err) => Err(err),
                }
            }
            BuiltinFunction::Delattr => {
                check_args(name, args, 2, 2)?;
                let attr = self.name_arg(args[1])?;
                self.delete_attribute(args[0], attr)?;
                Ok(Value::None)
            }
            BuiltinFunction::Callable => {
                check_args(name, args, 1, 1)?;
                Ok(Value::Bool(self.is_callable(args[0])))
            }
            BuiltinFunction::Id => {
                check_args(name, args, 1, 1)?;
                Ok(Value::Int(self.identity(args[0])))
            }
            BuiltinFunction::Repr => {
                check_args(name, args, 1, 1)?;
                let repr = self.repr(args[0])?;
                self.new_str(repr)
            }
            BuiltinFunction::ExcInfo => {
                check_args(name, args, 0, 0)?;
                self.exc_info_tuple()
            }
        }
    }

    /// Integer identity of a value, stable for the value's lifetime.
    pub(crate) fn identity(&self, value: Value) -> i64 {
        match value {
            Value::Ref(id) => i64::try_from(id.index()).unwrap_or(i64::MAX).wrapping_mul(16) + 0x1000,
            Value::Int(i) => i.wrapping_mul(2) | 1,
            Value::InternStr(id) => -i64::try_from(id.index()).unwrap_or(0) - 16,
            Value::None => 0,
            Value::NotImplemented => 2,
            Value::Bool(b) => 4 + i64::from(b) * 2,
            Value::Float(f) => f.to_bits().cast_signed(),
            Value::Builtin(b) => {
                use std::hash::{Hash, Hasher};
                let mut hasher = ahash::AHasher::default();
                b.hash(&mut hasher);
                hasher.finish().cast_signed()
            }
        }
    }

    pub(crate) fn is_callable(&self, value: Value) -> bool {
        match value {
            Value::Builtin(Builtin::Function(_) | Builtin::Method(_)) => true,
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(_) | HeapData::BoundMethod(_) | HeapData::Type(_) => true,
                _ => self.has_flag(self.type_of(value), crate::types::TypeFlags::HAS_CALL),
            },
            _ => false,
        }
    }

    fn call_builtin_method(&mut self, method: BuiltinMethod, args: &[Value]) -> RunResult<Value> {
        let Some((&this, rest)) = args.split_first() else {
            return Err(ExcType::type_error(format!(
                "descriptor '{}' needs an argument",
                method.name()
            )));
        };
        let name = method.name();
        match method {
            BuiltinMethod::ObjectNew => self.object_new(this, rest),
            BuiltinMethod::ObjectInit => self.object_init(this, rest).map(|()| Value::None),
            BuiltinMethod::ObjectGetattribute => {
                check_args(name, rest, 1, 1)?;
                let attr = self.name_arg(rest[0])?;
                self.generic_getattr_or_error(this, attr)
            }
            BuiltinMethod::ObjectSetattr => {
                check_args(name, rest, 2, 2)?;
                let attr = self.name_arg(rest[0])?;
                self.generic_setattr(this, attr, rest[1]).map(|_| Value::None)
            }
            BuiltinMethod::ObjectDelattr => {
                check_args(name, rest, 1, 1)?;
                let attr = self.name_arg(rest[0])?;
                self.generic_delattr(this, attr).map(|()| Value::None)
            }
            BuiltinMethod::ObjectRepr => {
                let repr = self.default_repr(this);
                self.new_str(repr)
            }
            BuiltinMethod::ObjectStr => {
                let repr = self.repr(this)?;
                self.new_str(repr)
            }
            BuiltinMethod::TypeNew => self.type_new_call(this, rest),
            BuiltinMethod::TypeInit => {
                if rest.len() != 1 && rest.len() != 3 {
                    return Err(ExcType::type_error("type.__init__() takes 1 or 3 arguments"));
                }
                Ok(Value::None)
            }
            BuiltinMethod::TypeCall => {
                let cls = self.expect_type(this)?;
                self.new_instance(cls, rest)
            }
            BuiltinMethod::TypeGetattribute => {
                check_args(name, rest, 1, 1)?;
                let attr = self.name_arg(rest[0])?;
                let cls = self.expect_type(this)?;
                self.type_getattr_or_error(cls, attr)
            }
            BuiltinMethod::TypeSetattr => {
                check_args(name, rest, 2, 2)?;
                let attr = self.name_arg(rest[0])?;
                let cls = self.expect_type(this)?;
                self.type_setattr(cls, attr, rest[1]).map(|()| Value::None)
            }
            BuiltinMethod::TypeDelattr => {
                check_args(name, rest, 1, 1)?;
                let attr = self.name_arg(rest[0])?;
                let cls = self.expect_type(this)?;
                self.type_delattr(cls, attr).map(|()| Value::None)
            }
            BuiltinMethod::TypeMro => {
                let cls = self.expect_type(this)?;
                let mro = self.compute_mro(cls)?;
                self.new_list(mro.into_iter().map(Value::Ref).collect())
            }
            BuiltinMethod::TypeInstancecheck => {
                check_args(name, rest, 1, 1)?;
                let cls = self.expect_type(this)?;
                let obj_type = self.type_of(rest[0]);
                Ok(Value::Bool(self.is_subtype(obj_type, cls)))
            }
            BuiltinMethod::TypeSubclasscheck => {
                check_args(name, rest, 1, 1)?;
                let cls = self.expect_type(this)?;
                let sub = self.expect_type(rest[0])?;
                Ok(Value::Bool(self.is_subtype(sub, cls)))
            }
            BuiltinMethod::New(kind) => self.native_new(kind, this, rest),
            BuiltinMethod::FunctionGet
            | BuiltinMethod::MethodDescriptorGet
            | BuiltinMethod::PropertyGet
            | BuiltinMethod::ClassMethodGet
            | BuiltinMethod::StaticMethodGet
            | BuiltinMethod::GetSetGet => {
                check_args(name, rest, 1, 2)?;
                self.explicit_get(this, rest)
            }
            BuiltinMethod::PropertySet => {
                check_args(name, rest, 2, 2)?;
                self.property_set(this, rest[0], Some(rest[1])).map(|()| Value::None)
            }
            BuiltinMethod::PropertyDelete => {
                check_args(name, rest, 1, 1)?;
                self.property_set(this, rest[0], None).map(|()| Value::None)
            }
            BuiltinMethod::PropertyGetter | BuiltinMethod::PropertySetter | BuiltinMethod::PropertyDeleter => {
                check_args(name, rest, 1, 1)?;
                let mut property = self.expect_property(this)?;
                match method {
                    BuiltinMethod::PropertyGetter => property.fget = rest[0],
                    BuiltinMethod::PropertySetter => property.fset = rest[0],
                    _ => property.fdel = rest[0],
                }
                self.alloc(HeapData::Property(property))
            }
            BuiltinMethod::GetSetSet | BuiltinMethod::GetSetDelete => self.getset_method_call(method, this, rest),
            BuiltinMethod::SuperGetattribute => {
                check_args(name, rest, 1, 1)?;
                let attr = self.name_arg(rest[0])?;
                self.super_getattr(this, attr)
            }
            BuiltinMethod::Binary { op, reflected } => {
                check_args(name, rest, 1, 1)?;
                let (left, right) = if reflected { (rest[0], this) } else { (this, rest[0]) };
                Ok(crate::value::native_binary(&mut self.heap, op, left, right)?.unwrap_or(Value::NotImplemented))
            }
            BuiltinMethod::Compare(op) => {
                check_args(name, rest, 1, 1)?;
                Ok(self.native_compare(op, this, rest[0])?.map_or(Value::NotImplemented, Value::Bool))
            }
            BuiltinMethod::Len => {
                let len = self.native_len(this).ok_or_else(|| self.no_len_error(this))?;
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            BuiltinMethod::GetItem => {
                check_args(name, rest, 1, 1)?;
                self.get_item(this, rest[0])
            }
            BuiltinMethod::SetItem => {
                check_args(name, rest, 2, 2)?;
                self.set_item(this, rest[0], rest[1]).map(|()| Value::None)
            }
            BuiltinMethod::Contains => {
                check_args(name, rest, 1, 1)?;
                self.contains(this, rest[0]).map(Value::Bool)
            }
            BuiltinMethod::Iter => self.get_iter(this),
            BuiltinMethod::IterSelf => Ok(this),
            BuiltinMethod::IterNext | BuiltinMethod::GeneratorNext => match self.iter_next(this)? {
                IterStep::Value(v) => Ok(v),
                IterStep::End => Err(ExcType::StopIteration.bare()),
            },
            BuiltinMethod::GeneratorSend => {
                check_args(name, rest, 1, 1)?;
                let Some(id) = this.ref_id() else {
                    return Err(ExcType::type_error("send() requires a generator"));
                };
                match self.resume_generator(id, ResumeValue::Send(rest[0]))? {
                    IterStep::Value(v) => Ok(v),
                    IterStep::End => Err(ExcType::StopIteration.bare()),
                }
            }
            BuiltinMethod::ListAppend => {
                check_args(name, rest, 1, 1)?;
                match this.ref_id().map(|id| self.heap.get_mut(id)) {
                    Some(HeapData::List(items)) => {
                        items.push(rest[0]);
                        Ok(Value::None)
                    }
                    _ => Err(ExcType::type_error("descriptor 'append' requires a 'list' object")),
                }
            }
            BuiltinMethod::DictKeys => {
                let keys: Vec<Value> = match this.ref_id().and_then(|id| self.heap.mapping(id)) {
                    Some(table) => table.keys().map(|k| Value::InternStr(*k)).collect(),
                    None => return Err(ExcType::type_error("descriptor 'keys' requires a 'dict' object")),
                };
                self.new_list(keys)
            }
            BuiltinMethod::DictGet => {
                check_args(name, rest, 1, 2)?;
                let key = self.name_arg(rest[0])?;
                match this.ref_id().and_then(|id| self.heap.mapping(id)) {
                    Some(table) => {
                        Ok(table.get(&key).copied().unwrap_or(rest.get(1).copied().unwrap_or(Value::None)))
                    }
                    None => Err(ExcType::type_error("descriptor 'get' requires a 'dict' object")),
                }
            }
            BuiltinMethod::ExceptionInit => self.exception_init(this, rest).map(|()| Value::None),
            BuiltinMethod::ExceptionStr => {
                let text = self.exception_str(this)?;
                self.new_str(text)
            }
        }
    }

    /// `descr.__get__(obj[, owner])` called explicitly. A `None` owner defaults to `type(obj)`.
    fn explicit_get(&mut self, this: Value, rest: &[Value]) -> RunResult<Value> {
        let obj = (!rest[0].is_none()).then_some(rest[0]);
        let owner = match (rest.get(1).and_then(|&o| self.as_type(o)), obj) {
            (Some(owner), _) => owner,
            (None, Some(obj)) => self.type_of(obj),
            (None, None) => return Err(ExcType::type_error("__get__(None, None) is invalid")),
        };
        self.descriptor_get(this, obj, owner)
    }

    /// `__set__`/`__delete__` of getset descriptors called explicitly.
    fn getset_method_call(&mut self, method: BuiltinMethod, this: Value, rest: &[Value]) -> RunResult<Value> {
        let name = method.name();
        let Value::Builtin(Builtin::GetSet(getset)) = this else {
            return Err(ExcType::type_error(format!(
                "descriptor '{name}' requires a 'getset_descriptor'"
            )));
        };
        if method == BuiltinMethod::GetSetSet {
            check_args(name, rest, 2, 2)?;
            self.getset_set(getset, rest[0], Some(rest[1]))?;
        } else {
            check_args(name, rest, 1, 1)?;
            self.getset_set(getset, rest[0], None)?;
        }
        Ok(Value::None)
    }

    pub(crate) fn expect_type(&self, value: Value) -> RunResult<crate::heap::HeapId> {
        match value {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Type(_)) => Ok(id),
            other => Err(ExcType::type_error(format!(
                "expected a type object, not '{}'",
                self.value_type_name(other)
            ))),
        }
    }

    fn expect_property(&self, value: Value) -> RunResult<Property> {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Property(p)) => Ok(*p),
            _ => Err(ExcType::type_error("descriptor requires a 'property' object")),
        }
    }

    /// Constructors of builtin types with native instances.
    fn native_new(&mut self, kind: NativeType, cls: Value, args: &[Value]) -> RunResult<Value> {
        let cls_id = self.expect_type(cls)?;
        let type_name = self.type_name(cls_id);
        let expected = self.native_type_id(kind);
        if cls_id != expected {
            return Err(ExcType::type_error(format!(
                "{}.__new__({type_name}): {type_name} is not a subtype of {}",
                self.type_name(expected),
                self.type_name(expected)
            )));
        }
        match kind {
            NativeType::Bool => {
                check_args("bool", args, 0, 1)?;
                match args.first() {
                    Some(v) => self.is_true(*v).map(Value::Bool),
                    None => Ok(Value::Bool(false)),
                }
            }
            NativeType::Int | NativeType::Long => {
                check_args(type_name, args, 0, 1)?;
                let Some(&arg) = args.first() else {
                    return if kind == NativeType::Long {
                        self.alloc(HeapData::Long(BigInt::from(0)))
                    } else {
                        Ok(Value::Int(0))
                    };
                };
                let big = self.integer_from(arg, type_name)?;
                match (kind, big.to_i64()) {
                    (NativeType::Int, Some(i)) => Ok(Value::Int(i)),
                    _ => self.alloc(HeapData::Long(big)),
                }
            }
            NativeType::Float => {
                check_args("float", args, 0, 1)?;
                let Some(&arg) = args.first() else { return Ok(Value::Float(0.0)) };
                if let Some(n) = number(&self.heap, arg) {
                    return Ok(Value::Float(match n {
                        crate::value::Number::Int(i) => i as f64,
                        crate::value::Number::Long(b) => b.to_f64().unwrap_or(f64::INFINITY),
                        crate::value::Number::Float(f) => f,
                    }));
                }
                match str_content(&self.heap, arg) {
                    Some(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                        ExcType::ValueError.error(format!("could not convert string to float: {s}"))
                    }),
                    None => Err(ExcType::type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        self.value_type_name(arg)
                    ))),
                }
            }
            NativeType::Str => {
                check_args("str", args, 0, 1)?;
                match args.first() {
                    Some(&arg) if str_content(&self.heap, arg).is_some() => Ok(arg),
                    Some(&arg) => {
                        let text = self.to_str(arg)?;
                        self.new_str(text)
                    }
                    None => Ok(Value::InternStr(StaticStrings::EmptyString.into())),
                }
            }
            NativeType::Tuple | NativeType::List => {
                check_args(type_name, args, 0, 1)?;
                let items = match args.first() {
                    Some(&arg) => self.collect_iterable(arg)?,
                    None => Vec::new(),
                };
                if kind == NativeType::Tuple {
                    self.new_tuple(items)
                } else {
                    self.new_list(items)
                }
            }
            NativeType::Dict => {
                check_args("dict", args, 0, 1)?;
                let table = match args.first().and_then(|v| v.ref_id()) {
                    None => new_attr_table(),
                    Some(id) => match self.heap.mapping(id) {
                        Some(source) => source.clone(),
                        None => return Err(ExcType::type_error("dict() argument must be a dict")),
                    },
                };
                self.alloc(HeapData::Dict(table))
            }
            NativeType::Property => {
                check_args("property", args, 0, 3)?;
                let get = |i: usize| args.get(i).copied().unwrap_or(Value::None);
                self.alloc(HeapData::Property(Property {
                    fget: get(0),
                    fset: get(1),
                    fdel: get(2),
                }))
            }
            NativeType::ClassMethod => {
                check_args("classmethod", args, 1, 1)?;
                self.alloc(HeapData::ClassMethod(args[0]))
            }
            NativeType::StaticMethod => {
                check_args("staticmethod", args, 1, 1)?;
                self.alloc(HeapData::StaticMethod(args[0]))
            }
            NativeType::Super => {
                check_args("super", args, 2, 2)?;
                self.new_super(args[0], args[1])
            }
        }
    }

    /// `(type, value, traceback)` with the traceback as `(function, op_index)` pairs, innermost
    /// first; `(None, None, None)` outside a handler.
    fn exc_info_tuple(&mut self) -> RunResult<Value> {
        let Some(info) = self.current_exception() else {
            return self.new_tuple(vec![Value::None; 3]);
        };
        let mut frames = Vec::with_capacity(info.traceback.len());
        for frame in info.traceback {
            let function = self.new_str(frame.function)?;
            let op_index = Value::Int(i64::try_from(frame.op_index).unwrap_or(i64::MAX));
            frames.push(self.new_tuple(vec![function, op_index])?);
        }
        let traceback = self.new_tuple(frames)?;
        self.new_tuple(vec![info.exc_type, info.value, traceback])
    }

    fn integer_from(&self, arg: Value, type_name: &str) -> RunResult<BigInt> {
        if let Some(n) = number(&self.heap, arg) {
            return match n {
                crate::value::Number::Int(i) => Ok(BigInt::from(i)),
                crate::value::Number::Long(b) => Ok(b.clone()),
                crate::value::Number::Float(f) if f.is_nan() => {
                    Err(ExcType::ValueError.error("cannot convert float NaN to integer"))
                }
                // exact for every finite float, however large
                crate::value::Number::Float(f) => BigInt::from_f64(f.trunc())
                    .ok_or_else(|| ExcType::OverflowError.error("cannot convert float infinity to integer")),
            };
        }
        match str_content(&self.heap, arg) {
            Some(s) => s.trim().parse::<BigInt>().map_err(|_| {
                ExcType::ValueError.error(format!(
                    "invalid literal for {type_name}() with base 10: {}",
                    crate::value::string_repr(s)
                ))
            }),
            None => Err(ExcType::type_error(format!(
                "{type_name}() argument must be a string or a number, not '{}'",
                self.value_type_name(arg)
            ))),
        }
    }

    /// `super(type, obj)`.
    fn new_super(&mut self, this_class: Value, obj: Value) -> RunResult<Value> {
        let this_class = self.expect_type(this_class).map_err(|_| {
            ExcType::type_error("super() argument 1 must be type")
        })?;
        let obj_type = match obj {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Type(_)) && self.is_subtype(id, this_class) => id,
            _ => {
                let t = self.type_of(obj);
                if !self.is_subtype(t, this_class) {
                    return Err(ExcType::type_error(
                        "super(type, obj): obj must be an instance or subtype of type",
                    ));
                }
                t
            }
        };
        self.alloc(HeapData::Super(SuperProxy {
            this_class,
            obj,
            obj_type,
        }))
    }

    /// `BaseException.__init__`: records `args` and Python 2's `message`.
    pub(crate) fn exception_init(&mut self, this: Value, args: &[Value]) -> RunResult<()> {
        let tuple = self.new_tuple(args.to_vec())?;
        let message = if args.len() == 1 {
            args[0]
        } else {
            Value::InternStr(StaticStrings::EmptyString.into())
        };
        let dict = self
            .instance_dict(this, true)?
            .ok_or_else(|| RunError::internal("exception instance without __dict__"))?;
        if let HeapData::Dict(table) = self.heap.get_mut(dict) {
            table.insert(StaticStrings::Args.into(), tuple);
            table.insert(StaticStrings::Message.into(), message);
        }
        Ok(())
    }

    /// `BaseException.__str__`: empty for no args, `str(arg)` for one, the tuple repr otherwise.
    pub(crate) fn exception_str(&mut self, this: Value) -> RunResult<String> {
        let args = self
            .instance_dict(this, false)?
            .and_then(|dict| match self.heap.get(dict) {
                HeapData::Dict(table) => table.get(&StringId::from(StaticStrings::Args)).copied(),
                _ => None,
            });
        let Some(args) = args else { return Ok(String::new()) };
        let items = match args.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(items)) => items.clone(),
            _ => return self.to_str(args),
        };
        match items.as_slice() {
            [] => Ok(String::new()),
            [single] => self.to_str(*single),
            _ => self.repr(args),
        }
    }

    /// Default `<A object at 0x...>` repr.
    pub(crate) fn default_repr(&self, value: Value) -> String {
        let type_id = self.type_of(value);
        format!("<{} object at {:#x}>", self.type_name(type_id), self.identity(value))
    }

    /// Iterator object over a builtin sequence.
    pub(crate) fn native_iter_source(&self, value: Value) -> Option<IterSource> {
        match value {
            Value::InternStr(_) => Some(IterSource::InternStr(value)),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::List(_)
                | HeapData::Tuple(_)
                | HeapData::Str(_)
                | HeapData::Dict(_)
                | HeapData::DictProxy(_) => Some(IterSource::Native(id)),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn new_seq_iter(&mut self, source: IterSource) -> RunResult<Value> {
        self.alloc(HeapData::Iter(SeqIter::new(source)))
    }
}
