//! Special-method dispatch: operators, comparisons, truth, containers and iteration.

use num_bigint::BigInt;
use num_traits::FromPrimitive;
use pretty_assertions::assert_eq;
use pyrite::{BinaryOp, CodeBuilder, CompareOp, ExcType, IterStep, Op, Runtime, Value};

fn func(rt: &mut Runtime, name: &str, params: &[&str], body: impl FnOnce(&mut CodeBuilder)) -> Value {
    let mut b = CodeBuilder::function(name, params);
    body(&mut b);
    rt.make_function(&b.build(), Vec::new()).unwrap()
}

/// A method that ignores its arguments and returns `value`.
fn returning(rt: &mut Runtime, name: &str, params: &[&str], value: i64) -> Value {
    func(rt, name, params, |b| {
        b.load_int(value).return_value();
    })
}

fn class(rt: &mut Runtime, name: &str, bases: &[Value], namespace: &[(&str, Value)]) -> Value {
    let bases: Vec<Value> = if bases.is_empty() { vec![rt.object_type()] } else { bases.to_vec() };
    rt.create_class(name, &bases, namespace).unwrap()
}

fn message(rt: &mut Runtime, err: pyrite::RunError) -> String {
    rt.describe_error(err).message().unwrap_or_default().to_owned()
}

// =============================================================================
// 1. Native arithmetic
// =============================================================================

#[test]
fn integer_arithmetic_follows_python_2() {
    let mut rt = Runtime::new();
    let cases = [
        (BinaryOp::Add, 2, 3, 5),
        (BinaryOp::Sub, 2, 3, -1),
        (BinaryOp::Mul, -4, 3, -12),
        // `/` floors for integers
        (BinaryOp::Div, -7, 2, -4),
        (BinaryOp::FloorDiv, 7, 2, 3),
        (BinaryOp::Mod, -7, 2, 1),
        (BinaryOp::Mod, 7, -2, -1),
        (BinaryOp::And, 6, 3, 2),
        (BinaryOp::Or, 6, 3, 7),
        (BinaryOp::Xor, 6, 3, 5),
    ];
    for (op, a, b, expected) in cases {
        let result = rt.binary_op(op, Value::Int(a), Value::Int(b)).unwrap();
        assert_eq!(result, Value::Int(expected), "{a} {} {b}", op.symbol());
    }
}

#[test]
fn float_division_is_true_division() {
    let mut rt = Runtime::new();
    let result = rt.binary_op(BinaryOp::Div, Value::Float(7.0), Value::Int(2)).unwrap();
    assert_eq!(result, Value::Float(3.5));
}

#[test]
fn integer_overflow_promotes_to_long() {
    let mut rt = Runtime::new();
    let result = rt.binary_op(BinaryOp::Add, Value::Int(i64::MAX), Value::Int(1)).unwrap();
    assert_eq!(rt.value_type_name(result), "long");
    assert_eq!(rt.repr(result).unwrap(), "9223372036854775808L");
}

#[test]
fn division_by_zero() {
    let mut rt = Runtime::new();
    let err = rt.binary_op(BinaryOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::ZeroDivisionError));
    assert_eq!(message(&mut rt, err), "integer division or modulo by zero");
}

#[test]
fn sequence_concatenation_and_repetition() {
    let mut rt = Runtime::new();
    let a = rt.new_str("ab").unwrap();
    let b = rt.new_str("cd").unwrap();
    let joined = rt.binary_op(BinaryOp::Add, a, b).unwrap();
    assert_eq!(rt.str_value(joined), Some("abcd"));

    let list = rt.new_list(vec![Value::Int(1), Value::Int(2)]).unwrap();
    let repeated = rt.binary_op(BinaryOp::Mul, list, Value::Int(2)).unwrap();
    assert_eq!(
        rt.sequence_items(repeated).unwrap(),
        [Value::Int(1), Value::Int(2), Value::Int(1), Value::Int(2)]
    );
}

#[test]
fn huge_repetition_raises_instead_of_aborting() {
    let mut rt = Runtime::new();
    // "ab" * sys.maxint
    let s = rt.new_str("ab").unwrap();
    let err = rt.binary_op(BinaryOp::Mul, s, Value::Int(i64::MAX)).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::OverflowError));
    assert_eq!(message(&mut rt, err), "repeated string is too long");

    let list = rt.new_list(vec![Value::Int(1), Value::Int(2)]).unwrap();
    let err = rt.binary_op(BinaryOp::Mul, list, Value::Int(i64::MAX)).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::MemoryError));

    let tuple = rt.new_tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
    let err = rt.binary_op(BinaryOp::Mul, tuple, Value::Int(i64::MAX)).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::MemoryError));

    // nothing to repeat
    let empty = rt.new_str("").unwrap();
    let result = rt.binary_op(BinaryOp::Mul, empty, Value::Int(i64::MAX)).unwrap();
    assert_eq!(rt.str_value(result), Some(""));
    let empty = rt.new_list(Vec::new()).unwrap();
    let result = rt.binary_op(BinaryOp::Mul, empty, Value::Int(i64::MAX)).unwrap();
    assert!(rt.sequence_items(result).unwrap().is_empty());
}

#[test]
fn result_length_limit_caps_repetition() {
    let limits = pyrite::ResourceLimits::new().max_result_length(10);
    let mut rt = Runtime::with_config(pyrite::RuntimeConfig::new().with_limits(limits));
    let s = rt.new_str("ab").unwrap();
    let ok = rt.binary_op(BinaryOp::Mul, s, Value::Int(5)).unwrap();
    assert_eq!(rt.str_value(ok), Some("ababababab"));

    let err = rt.binary_op(BinaryOp::Mul, s, Value::Int(6)).unwrap_err();
    let exc = rt.describe_error(err);
    assert_eq!(exc.exc_type(), "MemoryError");
    assert_eq!(exc.kind(), pyrite::FailureKind::ResourceExhausted);

    let list = rt.new_list(vec![Value::None; 4]).unwrap();
    let err = rt.binary_op(BinaryOp::Mul, list, Value::Int(3)).unwrap_err();
    assert_eq!(rt.describe_error(err).exc_type(), "MemoryError");
}

#[test]
fn int_of_a_huge_float_is_exact() {
    let mut rt = Runtime::new();
    let int = rt.builtin("int").unwrap();
    let big = rt.call_object(int, &[Value::Float(1e300)]).unwrap();
    assert_eq!(rt.value_type_name(big), "long");
    let expected = format!("{}L", BigInt::from_f64(1e300).unwrap());
    assert_eq!(rt.repr(big).unwrap(), expected);
    assert_eq!(expected.len(), 302);

    let small = rt.call_object(int, &[Value::Float(-2.9)]).unwrap();
    assert_eq!(small, Value::Int(-2));

    let err = rt.call_object(int, &[Value::Float(f64::INFINITY)]).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::OverflowError));
    let err = rt.call_object(int, &[Value::Float(f64::NAN)]).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::ValueError));
}

#[test]
fn unsupported_operand_types() {
    let mut rt = Runtime::new();
    let s = rt.new_str("x").unwrap();
    let err = rt.binary_op(BinaryOp::Add, Value::Int(1), s).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::TypeError));
    assert_eq!(message(&mut rt, err), "unsupported operand type(s) for +: 'int' and 'str'");
}

// =============================================================================
// 2. Special methods on user classes
// =============================================================================

#[test]
fn forward_special_method() {
    let mut rt = Runtime::new();
    let add = returning(&mut rt, "__add__", &["self", "other"], 42);
    let v = class(&mut rt, "V", &[], &[("__add__", add)]);
    let obj = rt.call_object(v, &[]).unwrap();
    assert_eq!(rt.binary_op(BinaryOp::Add, obj, Value::Int(1)).unwrap(), Value::Int(42));
}

#[test]
fn reflected_special_method_when_left_operand_declines() {
    let mut rt = Runtime::new();
    // def __radd__(self, other): return other * 10
    let radd = func(&mut rt, "__radd__", &["self", "other"], |b| {
        b.load_fast("other").load_int(10).binary(BinaryOp::Mul).return_value();
    });
    let v = class(&mut rt, "V", &[], &[("__radd__", radd)]);
    let obj = rt.call_object(v, &[]).unwrap();
    assert_eq!(rt.binary_op(BinaryOp::Add, Value::Int(5), obj).unwrap(), Value::Int(50));
}

#[test]
fn not_implemented_falls_through_to_the_reflected_method() {
    let mut rt = Runtime::new();
    let add = func(&mut rt, "__add__", &["self", "other"], |b| {
        b.load_global("NotImplemented").return_value();
    });
    let a = class(&mut rt, "A", &[], &[("__add__", add)]);
    let radd = returning(&mut rt, "__radd__", &["self", "other"], 7);
    let b = class(&mut rt, "B", &[], &[("__radd__", radd)]);
    let x = rt.call_object(a, &[]).unwrap();
    let y = rt.call_object(b, &[]).unwrap();
    assert_eq!(rt.binary_op(BinaryOp::Add, x, y).unwrap(), Value::Int(7));

    // with nobody left to ask, the operator fails naming both types
    let err = rt.binary_op(BinaryOp::Add, x, x).unwrap_err();
    assert_eq!(message(&mut rt, err), "unsupported operand type(s) for +: 'A' and 'A'");
}

#[test]
fn subclass_override_of_reflected_method_goes_first() {
    let mut rt = Runtime::new();
    let add = returning(&mut rt, "__add__", &["self", "other"], 1);
    let radd = returning(&mut rt, "__radd__", &["self", "other"], 2);
    let base = class(&mut rt, "Base", &[], &[("__add__", add), ("__radd__", radd)]);
    let sub_radd = returning(&mut rt, "__radd__", &["self", "other"], 3);
    let overriding = class(&mut rt, "Overriding", &[base], &[("__radd__", sub_radd)]);
    let inheriting = class(&mut rt, "Inheriting", &[base], &[]);

    let b = rt.call_object(base, &[]).unwrap();
    let o = rt.call_object(overriding, &[]).unwrap();
    let i = rt.call_object(inheriting, &[]).unwrap();
    assert_eq!(rt.binary_op(BinaryOp::Add, b, o).unwrap(), Value::Int(3));
    // an inherited __radd__ is not an override, so the left operand wins
    assert_eq!(rt.binary_op(BinaryOp::Add, b, i).unwrap(), Value::Int(1));
}

#[test]
fn special_methods_ignore_the_instance_dict() {
    let mut rt = Runtime::new();
    let v = class(&mut rt, "V", &[], &[]);
    let obj = rt.call_object(v, &[]).unwrap();
    let add = returning(&mut rt, "__add__", &["other"], 1);
    rt.setattr_str(obj, "__add__", add).unwrap();
    let err = rt.binary_op(BinaryOp::Add, obj, Value::Int(1)).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::TypeError));
}

// =============================================================================
// 3. Comparisons
// =============================================================================

#[test]
fn native_comparisons() {
    let mut rt = Runtime::new();
    assert_eq!(rt.compare(CompareOp::Lt, Value::Int(1), Value::Int(2)).unwrap(), Value::Bool(true));
    assert_eq!(rt.compare(CompareOp::Eq, Value::Int(1), Value::Float(1.0)).unwrap(), Value::Bool(true));
    assert_eq!(
        rt.compare(CompareOp::Ne, Value::Float(f64::NAN), Value::Float(f64::NAN)).unwrap(),
        Value::Bool(true)
    );
    let a = rt.new_list(vec![Value::Int(1), Value::Int(2)]).unwrap();
    let b = rt.new_list(vec![Value::Int(1), Value::Int(3)]).unwrap();
    assert_eq!(rt.compare(CompareOp::Lt, a, b).unwrap(), Value::Bool(true));
    // None orders before everything
    assert_eq!(rt.compare(CompareOp::Lt, Value::None, Value::Int(-5)).unwrap(), Value::Bool(true));
}

#[test]
fn rich_comparison_result_is_returned_as_is() {
    let mut rt = Runtime::new();
    let eq = returning(&mut rt, "__eq__", &["self", "other"], 42);
    let c = class(&mut rt, "C", &[], &[("__eq__", eq)]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.compare(CompareOp::Eq, obj, Value::Int(0)).unwrap(), Value::Int(42));
}

#[test]
fn comparison_reflects_to_the_swapped_operator() {
    let mut rt = Runtime::new();
    let gt = func(&mut rt, "__gt__", &["self", "other"], |b| {
        b.load_bool(true).return_value();
    });
    let c = class(&mut rt, "C", &[], &[("__gt__", gt)]);
    let obj = rt.call_object(c, &[]).unwrap();
    // 1 < obj asks obj.__gt__(1)
    assert_eq!(rt.compare(CompareOp::Lt, Value::Int(1), obj).unwrap(), Value::Bool(true));
}

#[test]
fn default_equality_is_identity() {
    let mut rt = Runtime::new();
    let c = class(&mut rt, "C", &[], &[]);
    let a = rt.call_object(c, &[]).unwrap();
    let b = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.compare(CompareOp::Eq, a, a).unwrap(), Value::Bool(true));
    assert_eq!(rt.compare(CompareOp::Eq, a, b).unwrap(), Value::Bool(false));
    assert_eq!(rt.compare(CompareOp::Is, a, b).unwrap(), Value::Bool(false));
    assert_eq!(rt.compare(CompareOp::IsNot, a, b).unwrap(), Value::Bool(true));
}

// =============================================================================
// 4. Truth and length
// =============================================================================

#[test]
fn truth_of_builtin_values() {
    let mut rt = Runtime::new();
    let empty = rt.new_list(Vec::new()).unwrap();
    let full = rt.new_tuple(vec![Value::None]).unwrap();
    let blank = rt.new_str("").unwrap();
    assert!(!rt.is_true(Value::None).unwrap());
    assert!(!rt.is_true(Value::Int(0)).unwrap());
    assert!(rt.is_true(Value::Float(0.5)).unwrap());
    assert!(!rt.is_true(empty).unwrap());
    assert!(rt.is_true(full).unwrap());
    assert!(!rt.is_true(blank).unwrap());
}

#[test]
fn nonzero_then_len_then_true() {
    let mut rt = Runtime::new();
    let nonzero = func(&mut rt, "__nonzero__", &["self"], |b| {
        b.load_bool(false).return_value();
    });
    let len_zero = returning(&mut rt, "__len__", &["self"], 0);
    let len_two = returning(&mut rt, "__len__", &["self"], 2);
    let with_nonzero = class(&mut rt, "A", &[], &[("__nonzero__", nonzero), ("__len__", len_two)]);
    let with_len = class(&mut rt, "B", &[], &[("__len__", len_zero)]);
    let plain = class(&mut rt, "C", &[], &[]);

    let a = rt.call_object(with_nonzero, &[]).unwrap();
    let b = rt.call_object(with_len, &[]).unwrap();
    let c = rt.call_object(plain, &[]).unwrap();
    assert!(!rt.is_true(a).unwrap());
    assert!(!rt.is_true(b).unwrap());
    assert!(rt.is_true(c).unwrap());
    assert_eq!(rt.len(a).unwrap(), 2);
}

#[test]
fn nonzero_must_return_bool_or_int() {
    let mut rt = Runtime::new();
    let nonzero = func(&mut rt, "__nonzero__", &["self"], |b| {
        b.load_str("yes").return_value();
    });
    let c = class(&mut rt, "C", &[], &[("__nonzero__", nonzero)]);
    let obj = rt.call_object(c, &[]).unwrap();
    let err = rt.is_true(obj).unwrap_err();
    assert_eq!(message(&mut rt, err), "__nonzero__ should return bool or int, returned str");
}

#[test]
fn len_errors() {
    let mut rt = Runtime::new();
    let negative = returning(&mut rt, "__len__", &["self"], -1);
    let c = class(&mut rt, "C", &[], &[("__len__", negative)]);
    let d = class(&mut rt, "D", &[], &[]);
    let c = rt.call_object(c, &[]).unwrap();
    let d = rt.call_object(d, &[]).unwrap();

    let err = rt.len(c).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::ValueError));
    assert_eq!(message(&mut rt, err), "__len__() should return >= 0");
    let err = rt.len(d).unwrap_err();
    assert_eq!(message(&mut rt, err), "object of type 'D' has no len()");
    let err = rt.len(Value::Int(3)).unwrap_err();
    assert_eq!(message(&mut rt, err), "object of type 'int' has no len()");
}

/// `return a and side()` (or `or`), where `side()` records that it ran.
fn short_circuit(rt: &mut Runtime, op: fn(pyrite::JumpTarget) -> Op, a: Value) -> (Value, bool) {
    let side = func(rt, "side", &[], |b| {
        b.load_bool(true).store_global("ran").load_str("side").return_value();
    });
    rt.set_global("side", side);
    rt.set_global("ran", Value::Bool(false));
    rt.set_global("a", a);
    let mut m = CodeBuilder::module();
    m.load_global("a");
    let end = m.emit_jump(op(0));
    m.load_global("side").call(0);
    m.patch_jump(end);
    m.return_value();
    let result = rt.execute(&m.build()).unwrap();
    (result, rt.get_global("ran") == Some(Value::Bool(true)))
}

#[test]
fn and_or_return_an_operand_and_skip_the_second() {
    let mut rt = Runtime::new();
    let empty = rt.new_list(Vec::new()).unwrap();

    assert_eq!(short_circuit(&mut rt, Op::JumpIfFalseOrPop, empty), (empty, false));
    assert_eq!(short_circuit(&mut rt, Op::JumpIfTrueOrPop, Value::Int(7)), (Value::Int(7), false));

    let (result, ran) = short_circuit(&mut rt, Op::JumpIfFalseOrPop, Value::Int(7));
    assert!(ran);
    assert_eq!(rt.str_value(result), Some("side"));
    let (result, ran) = short_circuit(&mut rt, Op::JumpIfTrueOrPop, empty);
    assert!(ran);
    assert_eq!(rt.str_value(result), Some("side"));
}

// =============================================================================
// 5. Subscripts and containment
// =============================================================================

#[test]
fn list_and_dict_subscripts() {
    let mut rt = Runtime::new();
    let list = rt.new_list(vec![Value::Int(10), Value::Int(20)]).unwrap();
    assert_eq!(rt.get_item(list, Value::Int(-1)).unwrap(), Value::Int(20));
    rt.set_item(list, Value::Int(0), Value::Int(11)).unwrap();
    assert_eq!(rt.get_item(list, Value::Int(0)).unwrap(), Value::Int(11));
    let err = rt.get_item(list, Value::Int(2)).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::IndexError));
    assert_eq!(message(&mut rt, err), "list index out of range");

    let dict = rt.new_dict().unwrap();
    let key = rt.new_str("k").unwrap();
    rt.set_item(dict, key, Value::Int(1)).unwrap();
    assert_eq!(rt.get_item(dict, key).unwrap(), Value::Int(1));
    let missing = rt.new_str("missing").unwrap();
    let err = rt.get_item(dict, missing).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::KeyError));
    assert_eq!(message(&mut rt, err), "'missing'");
}

#[test]
fn user_getitem_and_setitem() {
    let mut rt = Runtime::new();
    // def __getitem__(self, key): return key * 2
    let getitem = func(&mut rt, "__getitem__", &["self", "key"], |b| {
        b.load_fast("key").load_int(2).binary(BinaryOp::Mul).return_value();
    });
    // def __setitem__(self, key, value): self.last = value
    let setitem = func(&mut rt, "__setitem__", &["self", "key", "value"], |b| {
        b.load_fast("value").load_fast("self").store_attr("last").load_none().return_value();
    });
    let c = class(&mut rt, "C", &[], &[("__getitem__", getitem), ("__setitem__", setitem)]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.get_item(obj, Value::Int(21)).unwrap(), Value::Int(42));
    rt.set_item(obj, Value::Int(0), Value::Int(9)).unwrap();
    assert_eq!(rt.getattr_str(obj, "last").unwrap(), Value::Int(9));

    let err = rt.set_item(Value::Int(1), Value::Int(0), Value::Int(0)).unwrap_err();
    assert_eq!(message(&mut rt, err), "'int' object does not support item assignment");
}

#[test]
fn containment() {
    let mut rt = Runtime::new();
    let list = rt.new_list(vec![Value::Int(1), Value::Float(2.0)]).unwrap();
    assert!(rt.contains(list, Value::Int(2)).unwrap());
    assert!(!rt.contains(list, Value::Int(3)).unwrap());

    let haystack = rt.new_str("haystack").unwrap();
    let needle = rt.new_str("st").unwrap();
    assert!(rt.contains(haystack, needle).unwrap());
    let err = rt.contains(haystack, Value::Int(1)).unwrap_err();
    assert_eq!(message(&mut rt, err), "'in <string>' requires string as left operand");

    let contains = func(&mut rt, "__contains__", &["self", "item"], |b| {
        b.load_fast("item").load_int(7).compare(CompareOp::Eq).return_value();
    });
    let c = class(&mut rt, "C", &[], &[("__contains__", contains)]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert!(rt.contains(obj, Value::Int(7)).unwrap());
    assert_eq!(rt.compare(CompareOp::NotIn, Value::Int(8), obj).unwrap(), Value::Bool(true));

    let err = rt.contains(Value::Int(1), Value::Int(1)).unwrap_err();
    assert_eq!(message(&mut rt, err), "argument of type 'int' is not iterable");
}

// =============================================================================
// 6. Iteration
// =============================================================================

/// class Counter(object):
///     i = 0
///     def __iter__(self): return self
///     def next(self):
///         if self.i >= 3: raise StopIteration
///         self.i = self.i + 1
///         return self.i
fn counter_class(rt: &mut Runtime) -> Value {
    let iter = func(rt, "__iter__", &["self"], |b| {
        b.load_fast("self").return_value();
    });
    let next = func(rt, "next", &["self"], |b| {
        b.load_fast("self").load_attr("i").load_int(3).compare(CompareOp::Ge);
        let skip = b.emit_jump(Op::PopJumpIfFalse(0));
        b.load_global("StopIteration").emit(Op::Raise);
        b.patch_jump(skip);
        b.load_fast("self").load_attr("i").load_int(1).add();
        b.emit(Op::Dup);
        b.load_fast("self").store_attr("i").return_value();
    });
    class(rt, "Counter", &[], &[("i", Value::Int(0)), ("__iter__", iter), ("next", next)])
}

fn drain(rt: &mut Runtime, iterable: Value) -> Vec<Value> {
    let iter = rt.get_iter(iterable).unwrap();
    let mut out = Vec::new();
    while let IterStep::Value(v) = rt.iter_next(iter).unwrap() {
        out.push(v);
    }
    out
}

#[test]
fn iterator_protocol_with_stop_iteration() {
    let mut rt = Runtime::new();
    let counter = counter_class(&mut rt);
    let obj = rt.call_object(counter, &[]).unwrap();
    assert_eq!(drain(&mut rt, obj), [Value::Int(1), Value::Int(2), Value::Int(3)]);
    // exhausted for good
    assert_eq!(rt.iter_next(obj).unwrap(), IterStep::End);
}

#[test]
fn containment_falls_back_to_iteration() {
    let mut rt = Runtime::new();
    let counter = counter_class(&mut rt);
    let obj = rt.call_object(counter, &[]).unwrap();
    assert!(rt.contains(obj, Value::Int(2)).unwrap());
}

#[test]
fn getitem_sequence_protocol_stops_at_index_error() {
    let mut rt = Runtime::new();
    // def __getitem__(self, i): return (10, 20, 30)[i]
    let getitem = func(&mut rt, "__getitem__", &["self", "i"], |b| {
        b.load_int(10).load_int(20).load_int(30).emit(Op::BuildTuple(3));
        b.load_fast("i").emit(Op::Subscript).return_value();
    });
    let c = class(&mut rt, "Seq", &[], &[("__getitem__", getitem)]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(drain(&mut rt, obj), [Value::Int(10), Value::Int(20), Value::Int(30)]);
}

#[test]
fn native_iteration_and_non_iterables() {
    let mut rt = Runtime::new();
    let tuple = rt.new_tuple(vec![Value::Int(1), Value::None]).unwrap();
    assert_eq!(drain(&mut rt, tuple), [Value::Int(1), Value::None]);

    let err = rt.get_iter(Value::Int(3)).unwrap_err();
    assert_eq!(message(&mut rt, err), "'int' object is not iterable");

    let bad_iter = returning(&mut rt, "__iter__", &["self"], 1);
    let c = class(&mut rt, "C", &[], &[("__iter__", bad_iter)]);
    let obj = rt.call_object(c, &[]).unwrap();
    let err = rt.get_iter(obj).unwrap_err();
    assert_eq!(message(&mut rt, err), "iter() returned non-iterator of type 'int'");
}

#[test]
fn for_loop_sums_a_list() {
    // total = 0
    // for x in [1, 2, 3, 4]: total = total + x
    // return total
    let mut module = CodeBuilder::function("sum_list", &[]);
    module.load_int(0).store_fast("total");
    module.load_int(1).load_int(2).load_int(3).load_int(4).emit(Op::BuildList(4));
    module.emit(Op::GetIter);
    let top = module.position();
    let exit = module.emit_jump(Op::ForIter(0));
    module.store_fast("x").load_fast("total").load_fast("x").add().store_fast("total");
    module.emit(Op::Jump(top));
    module.patch_jump(exit);
    module.load_fast("total").return_value();

    let mut rt = Runtime::new();
    assert_eq!(rt.execute(&module.build()).unwrap(), Value::Int(10));
}

// =============================================================================
// 7. Text
// =============================================================================

#[test]
fn repr_of_builtin_values() {
    let mut rt = Runtime::new();
    let one = rt.new_tuple(vec![Value::Int(1)]).unwrap();
    let s = rt.new_str("it's").unwrap();
    let list = rt.new_list(vec![Value::Int(1), s, Value::None]).unwrap();
    assert_eq!(rt.repr(one).unwrap(), "(1,)");
    assert_eq!(rt.repr(list).unwrap(), "[1, \"it's\", None]");
    assert_eq!(rt.repr(Value::Bool(true)).unwrap(), "True");
    let int_type = rt.builtin("int").unwrap();
    assert_eq!(rt.repr(int_type).unwrap(), "<type 'int'>");
}

#[test]
fn repr_and_str_hooks() {
    let mut rt = Runtime::new();
    let repr = func(&mut rt, "__repr__", &["self"], |b| {
        b.load_str("<P>").return_value();
    });
    let p = class(&mut rt, "P", &[], &[("__repr__", repr)]);
    let obj = rt.call_object(p, &[]).unwrap();
    assert_eq!(rt.repr(obj).unwrap(), "<P>");
    // str() falls back to __repr__
    assert_eq!(rt.to_str(obj).unwrap(), "<P>");
    assert_eq!(rt.repr(p).unwrap(), "<class '__main__.P'>");

    let bad = returning(&mut rt, "__repr__", &["self"], 1);
    let q = class(&mut rt, "Q", &[], &[("__repr__", bad)]);
    let obj = rt.call_object(q, &[]).unwrap();
    let err = rt.repr(obj).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::TypeError));
}
