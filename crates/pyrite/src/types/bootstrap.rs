//! Creation of the builtin type objects.
//!
//! `object` and `type` are allocated first with a placeholder metatype and patched once both
//! exist. Every other builtin type is a single-inheritance chain below `object`, so its MRO is
//! its base's MRO with itself in front and no C3 merge is needed.

use strum::IntoEnumIterator;

use crate::{
    builtins::{Builtin, BuiltinMethod, GetSet, NativeType},
    dispatch::{BinaryOp, CompareOp},
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{StaticStrings, intern},
    value::Value,
};

use super::class::{Layout, TypeFlags, TypeObject, compute_flags, type_obj, type_obj_mut};

/// Ids of the builtin type objects of one runtime.
#[derive(Debug, Clone)]
pub(crate) struct BuiltinTypes {
    pub object: HeapId,
    pub type_: HeapId,
    pub none: HeapId,
    pub not_implemented: HeapId,
    pub int: HeapId,
    pub bool_: HeapId,
    pub long: HeapId,
    pub float: HeapId,
    pub str_: HeapId,
    pub tuple: HeapId,
    pub list: HeapId,
    pub dict: HeapId,
    pub dictproxy: HeapId,
    pub function: HeapId,
    pub method: HeapId,
    pub builtin_function: HeapId,
    pub method_descriptor: HeapId,
    pub getset_descriptor: HeapId,
    pub property: HeapId,
    pub classmethod: HeapId,
    pub staticmethod: HeapId,
    pub super_: HeapId,
    pub iterator: HeapId,
    pub generator: HeapId,
    /// Indexed by `ExcType as usize`.
    pub exceptions: Vec<HeapId>,
}

type Methods = Vec<(StaticStrings, Value)>;

fn method(name: StaticStrings, m: BuiltinMethod) -> (StaticStrings, Value) {
    (name, Value::Builtin(Builtin::Method(m)))
}

fn getset(g: GetSet) -> (StaticStrings, Value) {
    (g.name(), Value::Builtin(Builtin::GetSet(g)))
}

fn rich_compare(ops: &[CompareOp]) -> Methods {
    ops.iter()
        .filter_map(|&op| op.dunder().map(|name| method(name, BuiltinMethod::Compare(op))))
        .collect()
}

fn arithmetic(include_bitwise: bool) -> Methods {
    let mut methods = Vec::new();
    for op in BinaryOp::iter() {
        if !include_bitwise && op.is_bitwise() {
            continue;
        }
        methods.push(method(op.dunder(false), BuiltinMethod::Binary { op, reflected: false }));
        methods.push(method(op.dunder(true), BuiltinMethod::Binary { op, reflected: true }));
    }
    methods
}

fn sequence(extra: &[(StaticStrings, BuiltinMethod)]) -> Methods {
    let mut methods = vec![
        method(StaticStrings::DunderAdd, BuiltinMethod::Binary { op: BinaryOp::Add, reflected: false }),
        method(StaticStrings::DunderMul, BuiltinMethod::Binary { op: BinaryOp::Mul, reflected: false }),
        method(StaticStrings::DunderRmul, BuiltinMethod::Binary { op: BinaryOp::Mul, reflected: true }),
        method(StaticStrings::DunderLen, BuiltinMethod::Len),
        method(StaticStrings::DunderGetitem, BuiltinMethod::GetItem),
        method(StaticStrings::DunderContains, BuiltinMethod::Contains),
    ];
    methods.extend(rich_compare(&CompareOp::RICH));
    methods.extend(extra.iter().map(|&(name, m)| method(name, m)));
    methods
}

struct Builder<'h> {
    heap: &'h mut Heap,
    type_: HeapId,
}

impl Builder<'_> {
    fn add(&mut self, name: &str, base: HeapId, layout: Layout, methods: Methods) -> RunResult<HeapId> {
        let mut ty = TypeObject::new(intern(name), self.type_, &[base], layout);
        ty.instance_dict = type_obj(self.heap, base).instance_dict;
        for (key, value) in methods {
            ty.dict.insert(key.into(), value);
        }
        let id = self.heap.allocate(HeapData::Type(ty))?;
        let mut mro = vec![id];
        mro.extend_from_slice(&type_obj(self.heap, base).mro);
        type_obj_mut(self.heap, id).mro = mro;
        Ok(id)
    }
}

impl BuiltinTypes {
    pub fn bootstrap(heap: &mut Heap) -> RunResult<Self> {
        let placeholder = HeapId::from_index(0);
        let object = heap.allocate(HeapData::Type(TypeObject::new(
            intern("object"),
            placeholder,
            &[],
            Layout::Object,
        )))?;
        let type_ = heap.allocate(HeapData::Type(TypeObject::new(
            intern("type"),
            placeholder,
            &[object],
            Layout::Type,
        )))?;
        {
            let obj = type_obj_mut(heap, object);
            obj.metatype = type_;
            obj.mro = vec![object];
            obj.flags = TypeFlags::BASETYPE;
            for (name, value) in [
                method(StaticStrings::DunderNew, BuiltinMethod::ObjectNew),
                method(StaticStrings::DunderInit, BuiltinMethod::ObjectInit),
                method(StaticStrings::DunderGetattribute, BuiltinMethod::ObjectGetattribute),
                method(StaticStrings::DunderSetattr, BuiltinMethod::ObjectSetattr),
                method(StaticStrings::DunderDelattr, BuiltinMethod::ObjectDelattr),
                method(StaticStrings::DunderRepr, BuiltinMethod::ObjectRepr),
                method(StaticStrings::DunderStr, BuiltinMethod::ObjectStr),
                getset(GetSet::ObjectClass),
            ] {
                obj.dict.insert(name.into(), value);
            }
        }
        {
            let ty = type_obj_mut(heap, type_);
            ty.metatype = type_;
            ty.mro = vec![type_, object];
            ty.flags = TypeFlags::BASETYPE;
            for (name, value) in [
                method(StaticStrings::DunderNew, BuiltinMethod::TypeNew),
                method(StaticStrings::DunderInit, BuiltinMethod::TypeInit),
                method(StaticStrings::DunderCall, BuiltinMethod::TypeCall),
                method(StaticStrings::DunderGetattribute, BuiltinMethod::TypeGetattribute),
                method(StaticStrings::DunderSetattr, BuiltinMethod::TypeSetattr),
                method(StaticStrings::DunderDelattr, BuiltinMethod::TypeDelattr),
                method(StaticStrings::Mro, BuiltinMethod::TypeMro),
                method(StaticStrings::DunderInstancecheck, BuiltinMethod::TypeInstancecheck),
                method(StaticStrings::DunderSubclasscheck, BuiltinMethod::TypeSubclasscheck),
                getset(GetSet::TypeName),
                getset(GetSet::TypeBases),
                getset(GetSet::TypeBase),
                getset(GetSet::TypeMro),
                getset(GetSet::TypeDict),
            ] {
                ty.dict.insert(name.into(), value);
            }
        }

        let mut b = Builder { heap, type_ };
        let native_new = |kind| method(StaticStrings::DunderNew, BuiltinMethod::New(kind));

        let none = b.add("NoneType", object, Layout::Native, Vec::new())?;
        let not_implemented = b.add("NotImplementedType", object, Layout::Native, Vec::new())?;

        let mut int_methods = arithmetic(true);
        int_methods.extend(rich_compare(&CompareOp::RICH));
        int_methods.push(native_new(NativeType::Int));
        let int = b.add("int", object, Layout::Native, int_methods)?;
        let bool_ = b.add("bool", int, Layout::Native, vec![native_new(NativeType::Bool)])?;
        let mut long_methods = arithmetic(true);
        long_methods.extend(rich_compare(&CompareOp::RICH));
        long_methods.push(native_new(NativeType::Long));
        let long = b.add("long", object, Layout::Native, long_methods)?;
        let mut float_methods = arithmetic(false);
        float_methods.extend(rich_compare(&CompareOp::RICH));
        float_methods.push(native_new(NativeType::Float));
        let float = b.add("float", object, Layout::Native, float_methods)?;

        let mut str_methods = sequence(&[]);
        str_methods.push(native_new(NativeType::Str));
        let str_ = b.add("str", object, Layout::Native, str_methods)?;
        let mut tuple_methods = sequence(&[(StaticStrings::DunderIter, BuiltinMethod::Iter)]);
        tuple_methods.push(native_new(NativeType::Tuple));
        let tuple = b.add("tuple", object, Layout::Native, tuple_methods)?;
        let mut list_methods = sequence(&[
            (StaticStrings::DunderIter, BuiltinMethod::Iter),
            (StaticStrings::DunderSetitem, BuiltinMethod::SetItem),
            (StaticStrings::Append, BuiltinMethod::ListAppend),
        ]);
        list_methods.push(native_new(NativeType::List));
        let list = b.add("list", object, Layout::Native, list_methods)?;
        let mut dict_methods = vec![
            method(StaticStrings::DunderLen, BuiltinMethod::Len),
            method(StaticStrings::DunderGetitem, BuiltinMethod::GetItem),
            method(StaticStrings::DunderSetitem, BuiltinMethod::SetItem),
            method(StaticStrings::DunderContains, BuiltinMethod::Contains),
            method(StaticStrings::DunderIter, BuiltinMethod::Iter),
            method(StaticStrings::Keys, BuiltinMethod::DictKeys),
            method(StaticStrings::Get, BuiltinMethod::DictGet),
            native_new(NativeType::Dict),
        ];
        dict_methods.extend(rich_compare(&[CompareOp::Eq, CompareOp::Ne]));
        let dict = b.add("dict", object, Layout::Native, dict_methods)?;
        // no __setitem__: class namespaces change only through setattr
        let dictproxy = b.add(
            "dictproxy",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderLen, BuiltinMethod::Len),
                method(StaticStrings::DunderGetitem, BuiltinMethod::GetItem),
                method(StaticStrings::DunderContains, BuiltinMethod::Contains),
                method(StaticStrings::DunderIter, BuiltinMethod::Iter),
                method(StaticStrings::Keys, BuiltinMethod::DictKeys),
                method(StaticStrings::Get, BuiltinMethod::DictGet),
            ],
        )?;

        let function = b.add(
            "function",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderGet, BuiltinMethod::FunctionGet),
                getset(GetSet::FunctionName),
                (StaticStrings::FuncName, Value::Builtin(Builtin::GetSet(GetSet::FunctionName))),
            ],
        )?;
        let method_type = b.add(
            "instancemethod",
            object,
            Layout::Native,
            vec![
                getset(GetSet::MethodSelf),
                getset(GetSet::MethodFunc),
                getset(GetSet::MethodClass),
                (StaticStrings::DunderSelf, Value::Builtin(Builtin::GetSet(GetSet::MethodSelf))),
                (StaticStrings::DunderFunc, Value::Builtin(Builtin::GetSet(GetSet::MethodFunc))),
            ],
        )?;
        let builtin_function = b.add("builtin_function_or_method", object, Layout::Native, Vec::new())?;
        let method_descriptor = b.add(
            "method_descriptor",
            object,
            Layout::Native,
            vec![method(StaticStrings::DunderGet, BuiltinMethod::MethodDescriptorGet)],
        )?;
        let getset_descriptor = b.add(
            "getset_descriptor",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderGet, BuiltinMethod::GetSetGet),
                method(StaticStrings::DunderSet, BuiltinMethod::GetSetSet),
                method(StaticStrings::DunderDelete, BuiltinMethod::GetSetDelete),
            ],
        )?;
        let property = b.add(
            "property",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderGet, BuiltinMethod::PropertyGet),
                method(StaticStrings::DunderSet, BuiltinMethod::PropertySet),
                method(StaticStrings::DunderDelete, BuiltinMethod::PropertyDelete),
                method(StaticStrings::Getter, BuiltinMethod::PropertyGetter),
                method(StaticStrings::Setter, BuiltinMethod::PropertySetter),
                method(StaticStrings::Deleter, BuiltinMethod::PropertyDeleter),
                getset(GetSet::PropertyFget),
                getset(GetSet::PropertyFset),
                getset(GetSet::PropertyFdel),
                native_new(NativeType::Property),
            ],
        )?;
        let classmethod = b.add(
            "classmethod",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderGet, BuiltinMethod::ClassMethodGet),
                native_new(NativeType::ClassMethod),
            ],
        )?;
        let staticmethod = b.add(
            "staticmethod",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderGet, BuiltinMethod::StaticMethodGet),
                native_new(NativeType::StaticMethod),
            ],
        )?;
        let super_ = b.add(
            "super",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderGetattribute, BuiltinMethod::SuperGetattribute),
                native_new(NativeType::Super),
            ],
        )?;
        let iterator = b.add(
            "iterator",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderIter, BuiltinMethod::IterSelf),
                method(StaticStrings::Next, BuiltinMethod::IterNext),
            ],
        )?;
        let generator = b.add(
            "generator",
            object,
            Layout::Native,
            vec![
                method(StaticStrings::DunderIter, BuiltinMethod::IterSelf),
                method(StaticStrings::Next, BuiltinMethod::GeneratorNext),
                method(StaticStrings::Send, BuiltinMethod::GeneratorSend),
            ],
        )?;

        let mut exceptions: Vec<HeapId> = Vec::new();
        for exc in ExcType::iter() {
            let (base, methods) = match exc.base() {
                Some(parent) => (exceptions[parent as usize], Vec::new()),
                None => (
                    object,
                    vec![
                        method(StaticStrings::DunderInit, BuiltinMethod::ExceptionInit),
                        method(StaticStrings::DunderStr, BuiltinMethod::ExceptionStr),
                        getset(GetSet::InstanceDict),
                    ],
                ),
            };
            let name: &'static str = exc.into();
            let id = b.add(name, base, Layout::Object, methods)?;
            let ty = type_obj_mut(b.heap, id);
            ty.instance_dict = true;
            ty.flags.insert(TypeFlags::BASETYPE);
            exceptions.push(id);
        }

        let types = Self {
            object,
            type_,
            none,
            not_implemented,
            int,
            bool_,
            long,
            float,
            str_,
            tuple,
            list,
            dict,
            dictproxy,
            function,
            method: method_type,
            builtin_function,
            method_descriptor,
            getset_descriptor,
            property,
            classmethod,
            staticmethod,
            super_,
            iterator,
            generator,
            exceptions,
        };
        for id in types.all() {
            let flags = compute_flags(heap, id);
            type_obj_mut(heap, id).flags = flags;
        }
        Ok(types)
    }

    /// Every builtin type id, `object` first.
    pub fn all(&self) -> impl Iterator<Item = HeapId> + '_ {
        [
            self.object,
            self.type_,
            self.none,
            self.not_implemented,
            self.int,
            self.bool_,
            self.long,
            self.float,
            self.str_,
            self.tuple,
            self.list,
            self.dict,
            self.dictproxy,
            self.function,
            self.method,
            self.builtin_function,
            self.method_descriptor,
            self.getset_descriptor,
            self.property,
            self.classmethod,
            self.staticmethod,
            self.super_,
            self.iterator,
            self.generator,
        ]
        .into_iter()
        .chain(self.exceptions.iter().copied())
    }

    pub fn exception(&self, exc: ExcType) -> HeapId {
        self.exceptions[exc as usize]
    }

    /// Maps a builtin exception class id back to its [`ExcType`].
    pub fn exc_type_of(&self, id: HeapId) -> Option<ExcType> {
        let index = self.exceptions.iter().position(|&e| e == id)?;
        ExcType::iter().nth(index)
    }

    pub fn native(&self, kind: NativeType) -> HeapId {
        match kind {
            NativeType::Bool => self.bool_,
            NativeType::Int => self.int,
            NativeType::Long => self.long,
            NativeType::Float => self.float,
            NativeType::Str => self.str_,
            NativeType::Tuple => self.tuple,
            NativeType::List => self.list,
            NativeType::Dict => self.dict,
            NativeType::Property => self.property,
            NativeType::ClassMethod => self.classmethod,
            NativeType::StaticMethod => self.staticmethod,
            NativeType::Super => self.super_,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mro_lookup;

    #[test]
    fn object_and_type_are_mutually_linked() {
        let mut heap = Heap::new();
        let types = BuiltinTypes::bootstrap(&mut heap).unwrap();
        assert_eq!(type_obj(&heap, types.object).metatype, types.type_);
        assert_eq!(type_obj(&heap, types.type_).metatype, types.type_);
        assert_eq!(type_obj(&heap, types.type_).mro, vec![types.type_, types.object]);
        assert_eq!(type_obj(&heap, types.bool_).mro, vec![types.bool_, types.int, types.object]);
    }

    #[test]
    fn exceptions_follow_their_hierarchy() {
        let mut heap = Heap::new();
        let types = BuiltinTypes::bootstrap(&mut heap).unwrap();
        let zero = types.exception(ExcType::ZeroDivisionError);
        let mro: Vec<&str> = type_obj(&heap, zero)
            .mro
            .iter()
            .map(|&id| type_obj(&heap, id).name.as_str())
            .collect();
        assert_eq!(
            mro,
            ["ZeroDivisionError", "ArithmeticError", "StandardError", "Exception", "BaseException", "object"]
        );
        assert_eq!(types.exc_type_of(zero), Some(ExcType::ZeroDivisionError));
    }

    #[test]
    fn protocol_flags_are_computed() {
        let mut heap = Heap::new();
        let types = BuiltinTypes::bootstrap(&mut heap).unwrap();
        assert!(type_obj(&heap, types.function).flags.contains(TypeFlags::HAS_GET));
        assert!(type_obj(&heap, types.property).flags.contains(TypeFlags::HAS_GET | TypeFlags::HAS_SET));
        assert!(type_obj(&heap, types.super_).flags.contains(TypeFlags::HAS_GETATTRIBUTE));
        // the generic hooks inherited from object are not overrides
        assert!(!type_obj(&heap, types.int).flags.contains(TypeFlags::HAS_GETATTRIBUTE));
        assert!(mro_lookup(&heap, types.bool_, StaticStrings::DunderAdd.into()).is_some());
    }
}
