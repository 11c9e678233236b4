//! Special-method dispatch: operators, truth testing, containers, iteration, and text.
//!
//! Builtin operand types are handled natively; anything else goes through the special methods
//! found on the operand's type (never the instance dict), in Python 2 order: forward then
//! reflected, with the reflected method first when the right operand's type is a proper
//! subclass of the left's that overrides it.

use std::cmp::Ordering;

use serde::Serialize;
use strum::{EnumIter, IntoStaticStr};

use crate::{
    builtins::{Builtin, BuiltinMethod},
    bytecode::vm::generator::ResumeValue,
    cache::{BinarySite, Shape, SiteKind},
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId, intern},
    runtime::{CacheProbe, Runtime},
    tracer::DispatchTracer,
    types::{AttrTable, IterSource, TypeFlags, type_obj},
    value::{Value, native_binary, native_ordering, number, str_content, string_repr},
};

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Python 2 `/`: floor division for integers, true division for floats.
    Div,
    FloorDiv,
    Mod,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }

    /// The special method name, or its reflected form.
    #[must_use]
    pub fn dunder(self, reflected: bool) -> StaticStrings {
        use StaticStrings as S;
        match (self, reflected) {
            (Self::Add, false) => S::DunderAdd,
            (Self::Add, true) => S::DunderRadd,
            (Self::Sub, false) => S::DunderSub,
            (Self::Sub, true) => S::DunderRsub,
            (Self::Mul, false) => S::DunderMul,
            (Self::Mul, true) => S::DunderRmul,
            (Self::Div, false) => S::DunderDiv,
            (Self::Div, true) => S::DunderRdiv,
            (Self::FloorDiv, false) => S::DunderFloordiv,
            (Self::FloorDiv, true) => S::DunderRfloordiv,
            (Self::Mod, false) => S::DunderMod,
            (Self::Mod, true) => S::DunderRmod,
            (Self::And, false) => S::DunderAnd,
            (Self::And, true) => S::DunderRand,
            (Self::Or, false) => S::DunderOr,
            (Self::Or, true) => S::DunderRor,
            (Self::Xor, false) => S::DunderXor,
            (Self::Xor, true) => S::DunderRxor,
        }
    }

    #[must_use]
    pub fn is_bitwise(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor)
    }
}

/// Comparison operators, including membership and identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, Serialize)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CompareOp {
    /// The six operators with rich-comparison special methods.
    pub const RICH: [Self; 6] = [Self::Lt, Self::Le, Self::Eq, Self::Ne, Self::Gt, Self::Ge];

    #[must_use]
    pub fn dunder(self) -> Option<StaticStrings> {
        match self {
            Self::Lt => Some(StaticStrings::DunderLt),
            Self::Le => Some(StaticStrings::DunderLe),
            Self::Eq => Some(StaticStrings::DunderEq),
            Self::Ne => Some(StaticStrings::DunderNe),
            Self::Gt => Some(StaticStrings::DunderGt),
            Self::Ge => Some(StaticStrings::DunderGe),
            Self::In | Self::NotIn | Self::Is | Self::IsNot => None,
        }
    }

    /// The operator tried on the right operand: `a < b` reflects to `b > a`.
    #[must_use]
    pub fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::In | Self::NotIn | Self::Is | Self::IsNot => false,
        }
    }
}

/// Resolved strategy for a binary operator on one pair of operand types.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BinaryPlan {
    /// Both operand types are builtin and immutable: compute natively.
    Native,
    /// Call special methods found on the operand types.
    Dunder {
        forward: Option<Value>,
        reflected: Option<Value>,
        reflected_first: bool,
    },
}

/// One step of iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterStep {
    Value(Value),
    End,
}

impl<Tr: DispatchTracer> Runtime<Tr> {
    /// Looks up a special method on the type of `obj`, skipping the instance dict.
    pub(crate) fn lookup_special(&self, obj: Value, name: impl Into<StringId>) -> Option<Value> {
        self.lookup(self.type_of(obj), name.into())
    }

    /// Calls a special method found on the type with `obj` as receiver.
    ///
    /// Functions and method descriptors get `obj` prepended directly; other attributes go
    /// through their `__get__` first.
    pub(crate) fn call_special_value(&mut self, method: Value, obj: Value, args: &[Value]) -> RunResult<Value> {
        if self.is_plain_method(method) {
            return self.call_with_self(method, obj, args);
        }
        let owner = self.type_of(obj);
        let bound = self.descriptor_get(method, Some(obj), owner)?;
        self.call_object(bound, args)
    }

    /// Calls `obj.<name>(*args)` resolved on the type; `None` when the type lacks the method.
    pub(crate) fn call_special(
        &mut self,
        obj: Value,
        name: impl Into<StringId>,
        args: &[Value],
    ) -> RunResult<Option<Value>> {
        match self.lookup_special(obj, name) {
            Some(method) => self.call_special_value(method, obj, args).map(Some),
            None => Ok(None),
        }
    }

    /// Functions and non-static method descriptors, which bind by prepending the receiver.
    pub(crate) fn is_plain_method(&self, value: Value) -> bool {
        match value {
            Value::Builtin(Builtin::Method(m)) => !m.is_static(),
            Value::Ref(id) => matches!(self.heap.get(id), HeapData::Function(_)),
            _ => false,
        }
    }

    // ========================================================================
    // Binary operators
    // ========================================================================

    /// Applies a binary operator with full special-method dispatch.
    pub fn binary_op(&mut self, op: BinaryOp, left: Value, right: Value) -> RunResult<Value> {
        let plan = self.resolve_binary(op, left, right);
        self.run_binary_plan(op, &plan, left, right)
    }

    /// Like [`Runtime::binary_op`], memoizing the plan per operand type pair at `site`.
    pub fn binary_op_cached(&mut self, site: &BinarySite, op: BinaryOp, left: Value, right: Value) -> RunResult<Value> {
        let shape = Shape::Pair(self.type_uid(self.type_of(left)), self.type_uid(self.type_of(right)));
        let plan = match self.probe_site(&site.0, SiteKind::BinaryOp, shape) {
            CacheProbe::Hit(plan) => plan,
            CacheProbe::Miss { epoch, install } => {
                let plan = self.resolve_binary(op, left, right);
                if install {
                    self.install_site(&site.0, SiteKind::BinaryOp, shape, epoch, plan.clone());
                }
                plan
            }
        };
        self.run_binary_plan(op, &plan, left, right)
    }

    pub(crate) fn resolve_binary(&self, op: BinaryOp, left: Value, right: Value) -> BinaryPlan {
        let lt = self.type_of(left);
        let rt = self.type_of(right);
        if !self.is_heap_type(lt) && !self.is_heap_type(rt) {
            return BinaryPlan::Native;
        }
        let forward = self.lookup(lt, op.dunder(false).into());
        let reflected = if lt == rt {
            None
        } else {
            self.lookup(rt, op.dunder(true).into())
        };
        let reflected_first = match reflected {
            Some(r) if lt != rt && self.is_subtype(rt, lt) => {
                let inherited = self.lookup(lt, op.dunder(true).into());
                !inherited.is_some_and(|i| i.is_same(&r))
            }
            _ => false,
        };
        BinaryPlan::Dunder {
            forward,
            reflected,
            reflected_first,
        }
    }

    fn run_binary_plan(&mut self, op: BinaryOp, plan: &BinaryPlan, left: Value, right: Value) -> RunResult<Value> {
        match plan {
            BinaryPlan::Native => {
                if let Some(result) = native_binary(&mut self.heap, op, left, right)? {
                    return Ok(result);
                }
            }
            &BinaryPlan::Dunder {
                forward,
                reflected,
                reflected_first,
            } => {
                let forward = forward.map(|m| (m, left, right));
                let reflected = reflected.map(|m| (m, right, left));
                let order = if reflected_first {
                    [reflected, forward]
                } else {
                    [forward, reflected]
                };
                for (method, receiver, other) in order.into_iter().flatten() {
                    let result = self.call_special_value(method, receiver, &[other])?;
                    if !matches!(result, Value::NotImplemented) {
                        return Ok(result);
                    }
                }
            }
        }
        Err(ExcType::unsupported_binary(
            op.symbol(),
            self.value_type_name(left),
            self.value_type_name(right),
        ))
    }

    // ========================================================================
    // Comparisons
    // ========================================================================

    /// Evaluates a comparison, returning the (possibly non-bool) result of the special method.
    pub fn compare(&mut self, op: CompareOp, left: Value, right: Value) -> RunResult<Value> {
        match op {
            CompareOp::Is => return Ok(Value::Bool(left.is_same(&right))),
            CompareOp::IsNot => return Ok(Value::Bool(!left.is_same(&right))),
            CompareOp::In => return self.contains(right, left).map(Value::Bool),
            CompareOp::NotIn => return self.contains(right, left).map(|b| Value::Bool(!b)),
            _ => {}
        }
        let lt = self.type_of(left);
        let rt = self.type_of(right);
        if !self.is_heap_type(lt) && !self.is_heap_type(rt) {
            if let Some(result) = self.native_compare(op, left, right)? {
                return Ok(Value::Bool(result));
            }
            return Ok(Value::Bool(self.default_compare(op, left, right)));
        }
        let Some(name) = op.dunder() else {
            return Err(RunError::internal("compare called with a non-rich operator"));
        };
        let Some(swapped) = op.swapped().dunder() else {
            return Err(RunError::internal("compare called with a non-rich operator"));
        };
        let forward = self.lookup(lt, name.into()).map(|m| (m, left, right));
        let reflected = self.lookup(rt, swapped.into()).map(|m| (m, right, left));
        let reflected_first = lt != rt && self.is_subtype(rt, lt) && {
            let inherited = self.lookup(lt, swapped.into());
            reflected.is_some_and(|(r, ..)| !inherited.is_some_and(|i| i.is_same(&r)))
        };
        let order = if reflected_first {
            [reflected, forward]
        } else {
            [forward, reflected]
        };
        for (method, receiver, other) in order.into_iter().flatten() {
            let result = self.call_special_value(method, receiver, &[other])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        Ok(Value::Bool(self.default_compare(op, left, right)))
    }

    /// `left == right` as a bool.
    pub(crate) fn equals(&mut self, left: Value, right: Value) -> RunResult<bool> {
        if left.is_same(&right) {
            return Ok(true);
        }
        let result = self.compare(CompareOp::Eq, left, right)?;
        self.is_true(result)
    }

    /// Compares builtin values natively; `None` when the pair has no native comparison.
    pub(crate) fn native_compare(&mut self, op: CompareOp, left: Value, right: Value) -> RunResult<Option<bool>> {
        let both_numbers = number(&self.heap, left).is_some() && number(&self.heap, right).is_some();
        if let Some(ordering) = native_ordering(&self.heap, left, right) {
            return Ok(Some(op.holds(ordering)));
        }
        if both_numbers {
            // NaN: every ordering is false and only `!=` holds
            return Ok(Some(op == CompareOp::Ne));
        }
        let (Some(a), Some(b)) = (left.ref_id(), right.ref_id()) else {
            return Ok(None);
        };
        let (x, y) = match (self.heap.get(a), self.heap.get(b)) {
            (HeapData::List(x), HeapData::List(y)) | (HeapData::Tuple(x), HeapData::Tuple(y)) => (x.clone(), y.clone()),
            (HeapData::Dict(x), HeapData::Dict(y)) => {
                if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    return Ok(None);
                }
                let pairs: Option<Vec<(Value, Value)>> =
                    x.iter().map(|(k, v)| y.get(k).map(|w| (*v, *w))).collect();
                let same_keys = x.len() == y.len();
                let mut equal = same_keys && pairs.is_some();
                if equal {
                    for (v, w) in pairs.unwrap_or_default() {
                        if !self.equals(v, w)? {
                            equal = false;
                            break;
                        }
                    }
                }
                return Ok(Some(equal == (op == CompareOp::Eq)));
            }
            _ => return Ok(None),
        };
        for (a, b) in x.iter().zip(&y) {
            if !self.equals(*a, *b)? {
                return match op {
                    CompareOp::Eq => Ok(Some(false)),
                    CompareOp::Ne => Ok(Some(true)),
                    _ => {
                        let result = self.compare(op, *a, *b)?;
                        self.is_true(result).map(Some)
                    }
                };
            }
        }
        Ok(Some(op.holds(x.len().cmp(&y.len()))))
    }

    /// Python 2's fallback when neither operand defines the comparison: identity for equality,
    /// otherwise `None` first, numbers before other types, then by type name and identity.
    fn default_compare(&self, op: CompareOp, left: Value, right: Value) -> bool {
        if left.is_same(&right) {
            return op.holds(Ordering::Equal);
        }
        if matches!(op, CompareOp::Eq | CompareOp::Ne) {
            return op == CompareOp::Ne;
        }
        let rank = |v: Value| match v {
            Value::None => 0,
            _ if number(&self.heap, v).is_some() => 1,
            _ => 2,
        };
        let ordering = rank(left)
            .cmp(&rank(right))
            .then_with(|| self.value_type_name(left).cmp(self.value_type_name(right)))
            .then_with(|| self.identity(left).cmp(&self.identity(right)));
        op.holds(ordering)
    }

    // ========================================================================
    // Truth, length, containers
    // ========================================================================

    /// Python 2 truth testing: `__nonzero__`, then `__len__`, then true.
    pub fn is_true(&mut self, value: Value) -> RunResult<bool> {
        match value {
            Value::None => return Ok(false),
            Value::Bool(b) => return Ok(b),
            Value::Int(i) => return Ok(i != 0),
            Value::Float(f) => return Ok(f != 0.0),
            Value::InternStr(id) => return Ok(!id.as_str().is_empty()),
            Value::NotImplemented | Value::Builtin(_) => return Ok(true),
            Value::Ref(_) => {}
        }
        if let Some(len) = self.native_len(value) {
            return Ok(len != 0);
        }
        if let Some(n) = number(&self.heap, value) {
            return Ok(match n {
                crate::value::Number::Long(b) => !num_traits::Zero::is_zero(b),
                crate::value::Number::Int(i) => i != 0,
                crate::value::Number::Float(f) => f != 0.0,
            });
        }
        let type_id = self.type_of(value);
        let flags = self.flags(type_id);
        if flags.contains(TypeFlags::HAS_NONZERO) {
            let result = self
                .call_special(value, StaticStrings::DunderNonzero, &[])?
                .unwrap_or(Value::Bool(true));
            return match result {
                Value::Bool(b) => Ok(b),
                Value::Int(i) => Ok(i != 0),
                other => Err(ExcType::type_error(format!(
                    "__nonzero__ should return bool or int, returned {}",
                    self.value_type_name(other)
                ))),
            };
        }
        if flags.contains(TypeFlags::HAS_LEN) {
            return self.len(value).map(|n| n != 0);
        }
        Ok(true)
    }

    pub(crate) fn native_len(&self, value: Value) -> Option<usize> {
        match value {
            Value::InternStr(id) => Some(id.as_str().chars().count()),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => Some(s.chars().count()),
                HeapData::List(items) | HeapData::Tuple(items) => Some(items.len()),
                HeapData::Dict(_) | HeapData::DictProxy(_) => self.heap.mapping(id).map(AttrTable::len),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn no_len_error(&self, value: Value) -> RunError {
        ExcType::type_error(format!("object of type '{}' has no len()", self.value_type_name(value)))
    }

    /// `len(value)`.
    pub fn len(&mut self, value: Value) -> RunResult<usize> {
        if let Some(len) = self.native_len(value) {
            return Ok(len);
        }
        if !self.is_heap_type(self.type_of(value)) {
            return Err(self.no_len_error(value));
        }
        match self.call_special(value, StaticStrings::DunderLen, &[])? {
            Some(Value::Int(n)) if n >= 0 => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
            Some(Value::Bool(b)) => Ok(usize::from(b)),
            Some(Value::Int(_)) => Err(ExcType::ValueError.error("__len__() should return >= 0")),
            Some(_) => Err(ExcType::type_error("an integer is required")),
            None => Err(self.no_len_error(value)),
        }
    }

    fn sequence_index(&self, len: usize, key: Value, what: &str) -> RunResult<Option<usize>> {
        let Some(index) = key.as_int() else {
            return Err(ExcType::type_error(format!(
                "{what} indices must be integers, not {}",
                self.value_type_name(key)
            )));
        };
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let index = if index < 0 { index + len } else { index };
        if (0..len).contains(&index) {
            Ok(usize::try_from(index).ok())
        } else {
            Ok(None)
        }
    }

    fn dict_key(&self, key: Value) -> RunResult<StringId> {
        match key {
            Value::InternStr(id) => Ok(id),
            other => match str_content(&self.heap, other) {
                Some(s) => Ok(intern(s)),
                None => Err(ExcType::type_error(format!(
                    "dict keys must be str, not '{}'",
                    self.value_type_name(other)
                ))),
            },
        }
    }

    /// `obj[key]`.
    pub fn get_item(&mut self, obj: Value, key: Value) -> RunResult<Value> {
        if let Some(text) = str_content(&self.heap, obj) {
            let chars: Vec<char> = text.chars().collect();
            return match self.sequence_index(chars.len(), key, "string")? {
                Some(i) => self.new_str(chars[i].to_string()),
                None => Err(ExcType::IndexError.error("string index out of range")),
            };
        }
        if let Some(id) = obj.ref_id() {
            match self.heap.get(id) {
                HeapData::List(items) | HeapData::Tuple(items) => {
                    let what = if matches!(self.heap.get(id), HeapData::List(_)) { "list" } else { "tuple" };
                    let len = items.len();
                    return match self.sequence_index(len, key, what)? {
                        Some(i) => match self.heap.get(id) {
                            HeapData::List(items) | HeapData::Tuple(items) => Ok(items[i]),
                            _ => Err(RunError::internal("sequence changed type")),
                        },
                        None => Err(ExcType::IndexError.error(format!("{what} index out of range"))),
                    };
                }
                HeapData::Dict(_) | HeapData::DictProxy(_) => {
                    let name = self.dict_key(key)?;
                    return match self.heap.mapping(id) {
                        Some(table) => table
                            .get(&name)
                            .copied()
                            .ok_or_else(|| ExcType::KeyError.error(string_repr(name.as_str()))),
                        None => Err(RunError::internal("dict changed type")),
                    };
                }
                _ => {}
            }
        }
        if self.is_heap_type(self.type_of(obj))
            && let Some(result) = self.call_special(obj, StaticStrings::DunderGetitem, &[key])?
        {
            return Ok(result);
        }
        Err(ExcType::type_error(format!(
            "'{}' object has no attribute '__getitem__'",
            self.value_type_name(obj)
        )))
    }

    /// `obj[key] = value`.
    pub fn set_item(&mut self, obj: Value, key: Value, value: Value) -> RunResult<()> {
        if let Some(id) = obj.ref_id() {
            match self.heap.get(id) {
                HeapData::List(items) => {
                    let len = items.len();
                    let Some(i) = self.sequence_index(len, key, "list")? else {
                        return Err(ExcType::IndexError.error("list assignment index out of range"));
                    };
                    if let HeapData::List(items) = self.heap.get_mut(id) {
                        items[i] = value;
                    }
                    return Ok(());
                }
                HeapData::Dict(_) => {
                    let name = self.dict_key(key)?;
                    if let HeapData::Dict(table) = self.heap.get_mut(id) {
                        table.insert(name, value);
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
        if self.is_heap_type(self.type_of(obj))
            && self
                .call_special(obj, StaticStrings::DunderSetitem, &[key, value])?
                .is_some()
        {
            return Ok(());
        }
        Err(ExcType::type_error(format!(
            "'{}' object does not support item assignment",
            self.value_type_name(obj)
        )))
    }

    /// `item in container`: `__contains__`, else iteration with `==`.
    pub fn contains(&mut self, container: Value, item: Value) -> RunResult<bool> {
        if let Some(text) = str_content(&self.heap, container) {
            return match str_content(&self.heap, item) {
                Some(needle) => Ok(text.contains(needle)),
                None => Err(ExcType::type_error("'in <string>' requires string as left operand")),
            };
        }
        if let Some(id) = container.ref_id() {
            match self.heap.get(id) {
                HeapData::List(items) | HeapData::Tuple(items) => {
                    for candidate in items.clone() {
                        if self.equals(candidate, item)? {
                            return Ok(true);
                        }
                    }
                    return Ok(false);
                }
                HeapData::Dict(_) | HeapData::DictProxy(_) => {
                    let table = self.heap.mapping(id);
                    let found = match (str_content(&self.heap, item), table) {
                        (Some(s), Some(table)) => crate::intern::lookup(s).is_some_and(|k| table.contains_key(&k)),
                        _ => false,
                    };
                    return Ok(found);
                }
                _ => {}
            }
        }
        let type_id = self.type_of(container);
        let flags = self.flags(type_id);
        if flags.contains(TypeFlags::HAS_CONTAINS) {
            let result = self
                .call_special(container, StaticStrings::DunderContains, &[item])?
                .unwrap_or(Value::Bool(false));
            return self.is_true(result);
        }
        if flags.intersects(TypeFlags::HAS_ITER | TypeFlags::HAS_GETITEM) || self.is_iterator_object(container) {
            let iter = self.get_iter(container)?;
            while let IterStep::Value(candidate) = self.iter_next(iter)? {
                if self.equals(candidate, item)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        Err(ExcType::type_error(format!(
            "argument of type '{}' is not iterable",
            self.value_type_name(container)
        )))
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    fn is_iterator_object(&self, value: Value) -> bool {
        value
            .ref_id()
            .is_some_and(|id| matches!(self.heap.get(id), HeapData::Iter(_) | HeapData::Generator(_)))
    }

    /// `iter(value)`.
    pub fn get_iter(&mut self, value: Value) -> RunResult<Value> {
        if let Some(source) = self.native_iter_source(value) {
            return self.new_seq_iter(source);
        }
        if self.is_iterator_object(value) {
            return Ok(value);
        }
        let type_id = self.type_of(value);
        let flags = self.flags(type_id);
        if flags.contains(TypeFlags::HAS_ITER) {
            let iter = self
                .call_special(value, StaticStrings::DunderIter, &[])?
                .unwrap_or(Value::None);
            if !self.is_iterator_object(iter) && self.lookup_special(iter, StaticStrings::Next).is_none() {
                return Err(ExcType::type_error(format!(
                    "iter() returned non-iterator of type '{}'",
                    self.value_type_name(iter)
                )));
            }
            return Ok(iter);
        }
        if flags.contains(TypeFlags::HAS_GETITEM) {
            return self.new_seq_iter(IterSource::GetItem(value));
        }
        Err(ExcType::type_error(format!(
            "'{}' object is not iterable",
            self.value_type_name(value)
        )))
    }

    /// Advances an iterator; `StopIteration` from user code becomes [`IterStep::End`].
    pub fn iter_next(&mut self, iter: Value) -> RunResult<IterStep> {
        if let Some(id) = iter.ref_id() {
            match self.heap.get(id) {
                HeapData::Iter(_) => return self.seq_iter_next(id),
                HeapData::Generator(_) => return self.resume_generator(id, ResumeValue::Next),
                _ => {}
            }
        }
        let Some(next) = self.lookup_special(iter, StaticStrings::Next) else {
            return Err(ExcType::type_error(format!(
                "{} object is not an iterator",
                self.value_type_name(iter)
            )));
        };
        match self.call_special_value(next, iter, &[]) {
            Ok(value) => Ok(IterStep::Value(value)),
            Err(err) if self.error_matches(&err, ExcType::StopIteration) => Ok(IterStep::End),
            Err(err) => Err(err),
        }
    }

    fn seq_iter_next(&mut self, id: HeapId) -> RunResult<IterStep> {
        let HeapData::Iter(it) = self.heap.get(id) else {
            return Err(RunError::internal("expected an iterator"));
        };
        let (source, index) = (it.source, it.index);
        let next = match source {
            IterSource::Exhausted => None,
            IterSource::Native(seq) => match self.heap.get(seq) {
                HeapData::List(items) | HeapData::Tuple(items) => items.get(index).copied(),
                HeapData::Dict(_) | HeapData::DictProxy(_) => {
                    let table = self.heap.mapping(seq);
                    table.and_then(|t| t.get_index(index)).map(|(k, _)| Value::InternStr(*k))
                }
                HeapData::Str(s) => match s.chars().nth(index) {
                    Some(c) => Some(self.new_str(c.to_string())?),
                    None => None,
                },
                _ => None,
            },
            IterSource::InternStr(v) => {
                let c = str_content(&self.heap, v).and_then(|s| s.chars().nth(index));
                match c {
                    Some(c) => Some(self.new_str(c.to_string())?),
                    None => None,
                }
            }
            IterSource::GetItem(obj) => {
                let key = Value::Int(i64::try_from(index).unwrap_or(i64::MAX));
                match self.get_item(obj, key) {
                    Ok(v) => Some(v),
                    Err(err)
                        if self.error_matches(&err, ExcType::IndexError)
                            || self.error_matches(&err, ExcType::StopIteration) =>
                    {
                        None
                    }
                    Err(err) => return Err(err),
                }
            }
        };
        if let HeapData::Iter(it) = self.heap.get_mut(id) {
            match next {
                Some(_) => it.index += 1,
                None => it.source = IterSource::Exhausted,
            }
        }
        Ok(next.map_or(IterStep::End, IterStep::Value))
    }

    /// Drains an iterable into a vector.
    pub(crate) fn collect_iterable(&mut self, value: Value) -> RunResult<Vec<Value>> {
        if let Some(id) = value.ref_id()
            && let HeapData::List(items) | HeapData::Tuple(items) = self.heap.get(id)
        {
            return Ok(items.clone());
        }
        let iter = self.get_iter(value)?;
        let mut out = Vec::new();
        while let IterStep::Value(v) = self.iter_next(iter)? {
            out.push(v);
        }
        Ok(out)
    }

    // ========================================================================
    // repr and str
    // ========================================================================

    /// `repr(value)`.
    pub fn repr(&mut self, value: Value) -> RunResult<String> {
        if let Some(text) = value.immediate_repr() {
            return Ok(text);
        }
        let id = match value {
            Value::Builtin(b) => {
                return Ok(match b {
                    Builtin::Function(_) => format!("<built-in function {}>", b.name()),
                    Builtin::Method(m) if m.is_static() => format!("<built-in method {}>", b.name()),
                    Builtin::Method(_) => format!("<method '{}'>", b.name()),
                    Builtin::GetSet(_) => format!("<attribute '{}'>", b.name()),
                });
            }
            Value::Ref(id) => id,
            _ => return Ok(self.default_repr(value)),
        };
        let type_id = self.type_of(value);
        if self.is_heap_type(type_id) {
            return self.text_via(value, StaticStrings::DunderRepr, BuiltinMethod::ObjectRepr);
        }
        if self.repr_guard.contains(&id) {
            return Ok(match self.heap.get(id) {
                HeapData::Dict(_) => "{...}".to_owned(),
                _ => "[...]".to_owned(),
            });
        }
        let items = match self.heap.get(id) {
            HeapData::Str(s) => return Ok(string_repr(s)),
            HeapData::Long(b) => return Ok(format!("{b}L")),
            HeapData::Type(t) => {
                let name = t.name.as_str();
                return Ok(if t.is_heap_type() {
                    format!("<class '__main__.{name}'>")
                } else {
                    format!("<type '{name}'>")
                });
            }
            HeapData::Function(f) => return Ok(format!("<function {} at {:#x}>", f.name, self.identity(value))),
            HeapData::BoundMethod(m) => {
                let (func, receiver, class) = (m.func, m.receiver, m.class);
                let func_name = self.callable_name(func);
                let class_name = class.map_or("?", |c| self.type_name(c));
                return match receiver {
                    Some(receiver) => {
                        let receiver = self.repr(receiver)?;
                        Ok(format!("<bound method {class_name}.{func_name} of {receiver}>"))
                    }
                    None => Ok(format!("<unbound method {class_name}.{func_name}>")),
                };
            }
            HeapData::List(items) => ('[', ']', items.clone(), None),
            HeapData::Tuple(items) => ('(', ')', items.clone(), None),
            HeapData::Dict(table) => (
                '{',
                '}',
                table.values().copied().collect(),
                Some(table.keys().copied().collect::<Vec<_>>()),
            ),
            HeapData::DictProxy(_) => {
                let (values, keys): (Vec<Value>, Vec<StringId>) = match self.heap.mapping(id) {
                    Some(table) => (table.values().copied().collect(), table.keys().copied().collect()),
                    None => (Vec::new(), Vec::new()),
                };
                self.repr_guard.push(id);
                let result = self.join_reprs(&values, Some(keys.as_slice()));
                self.repr_guard.pop();
                return Ok(format!("dict_proxy({{{}}})", result?));
            }
            _ => return self.text_via(value, StaticStrings::DunderRepr, BuiltinMethod::ObjectRepr),
        };
        let (open, close, values, keys) = items;
        self.repr_guard.push(id);
        let result = self.join_reprs(&values, keys.as_deref());
        self.repr_guard.pop();
        let mut body = result?;
        if open == '(' && values.len() == 1 {
            body.push(',');
        }
        Ok(format!("{open}{body}{close}"))
    }

    fn join_reprs(&mut self, values: &[Value], keys: Option<&[StringId]>) -> RunResult<String> {
        let mut parts = Vec::with_capacity(values.len());
        for (i, v) in values.iter().enumerate() {
            let repr = self.repr(*v)?;
            parts.push(match keys {
                Some(keys) => format!("{}: {repr}", string_repr(keys[i].as_str())),
                None => repr,
            });
        }
        Ok(parts.join(", "))
    }

    /// `str(value)`.
    pub fn to_str(&mut self, value: Value) -> RunResult<String> {
        if let Some(text) = str_content(&self.heap, value) {
            return Ok(text.to_owned());
        }
        let type_id = self.type_of(value);
        let exception_str = matches!(
            self.lookup(type_id, StaticStrings::DunderStr.into()),
            Some(Value::Builtin(Builtin::Method(BuiltinMethod::ExceptionStr)))
        );
        if self.is_heap_type(type_id) || exception_str {
            return self.text_via(value, StaticStrings::DunderStr, BuiltinMethod::ObjectStr);
        }
        self.repr(value)
    }

    /// Calls `__repr__`/`__str__` unless it is the generic default, checking the result is a str.
    fn text_via(&mut self, value: Value, name: StaticStrings, default: BuiltinMethod) -> RunResult<String> {
        match self.lookup_special(value, name) {
            Some(Value::Builtin(Builtin::Method(m))) if m == default => {
                if default == BuiltinMethod::ObjectStr {
                    self.repr(value)
                } else {
                    Ok(self.default_repr(value))
                }
            }
            Some(method) => {
                let result = self.call_special_value(method, value, &[])?;
                match str_content(&self.heap, result) {
                    Some(text) => Ok(text.to_owned()),
                    None => Err(ExcType::type_error(format!(
                        "{}() returned non-string (type {})",
                        name.as_str(),
                        self.value_type_name(result)
                    ))),
                }
            }
            None => Ok(self.default_repr(value)),
        }
    }

    /// Name of a function-like value for messages.
    pub(crate) fn callable_name(&self, value: Value) -> &'static str {
        match value {
            Value::Builtin(b) => b.name(),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Function(f) => f.name.as_str(),
                HeapData::Type(t) => t.name.as_str(),
                HeapData::BoundMethod(m) => self.callable_name(m.func),
                _ => "?",
            },
            _ => "?",
        }
    }

    pub(crate) fn type_uid(&self, type_id: HeapId) -> u64 {
        type_obj(&self.heap, type_id).uid
    }
}
