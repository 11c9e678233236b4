//! Generator functions: suspension, `send`, re-entrancy, and exception state across `yield`.

use pretty_assertions::assert_eq;
use pyrite::{CodeBuilder, CompareOp, ExcType, IterStep, Op, Runtime, Value};

/// def count(n):
///     i = 0
///     while i < n:
///         yield i
///         i = i + 1
fn count(rt: &mut Runtime) -> Value {
    let mut b = CodeBuilder::function("count", &["n"]);
    b.load_int(0).store_fast("i");
    let top = b.position();
    b.load_fast("i").load_fast("n").compare(CompareOp::Lt);
    let exit = b.emit_jump(Op::PopJumpIfFalse(0));
    b.load_fast("i").yield_value().emit(Op::Pop);
    b.load_fast("i").load_int(1).add().store_fast("i");
    b.emit(Op::Jump(top));
    b.patch_jump(exit);
    b.load_none().return_value();
    let code = b.build();
    assert!(code.is_generator());
    rt.make_function(&code, Vec::new()).unwrap()
}

/// def accumulate():
///     total = 0
///     while True:
///         x = yield total
///         total = total + x
fn accumulate(rt: &mut Runtime) -> Value {
    let mut b = CodeBuilder::function("accumulate", &[]);
    b.load_int(0).store_fast("total");
    let top = b.position();
    b.load_fast("total").yield_value().store_fast("x");
    b.load_fast("total").load_fast("x").add().store_fast("total");
    b.emit(Op::Jump(top));
    rt.make_function(&b.build(), Vec::new()).unwrap()
}

fn message(rt: &mut Runtime, err: pyrite::RunError) -> Option<String> {
    rt.describe_error(err).message().map(str::to_owned)
}

#[test]
fn calling_a_generator_function_does_not_run_it() {
    let mut rt = Runtime::new();
    let count = count(&mut rt);
    // a negative count would still be accepted: nothing runs until the first next()
    let g = rt.call_object(count, &[Value::Int(-1)]).unwrap();
    assert_eq!(rt.value_type_name(g), "generator");
    assert_eq!(rt.iter_next(g).unwrap(), IterStep::End);
}

#[test]
fn iteration_yields_each_value_then_ends() {
    let mut rt = Runtime::new();
    let count = count(&mut rt);
    let g = rt.call_object(count, &[Value::Int(3)]).unwrap();
    assert_eq!(rt.get_iter(g).unwrap(), g);
    let mut seen = Vec::new();
    while let IterStep::Value(v) = rt.iter_next(g).unwrap() {
        seen.push(v);
    }
    assert_eq!(seen, [Value::Int(0), Value::Int(1), Value::Int(2)]);
    // finished generators stay finished
    assert_eq!(rt.iter_next(g).unwrap(), IterStep::End);
}

#[test]
fn next_method_and_builtin_raise_stop_iteration() {
    let mut rt = Runtime::new();
    let count = count(&mut rt);
    let g = rt.call_object(count, &[Value::Int(1)]).unwrap();
    let next = rt.getattr_str(g, "next").unwrap();
    assert_eq!(rt.call_object(next, &[]).unwrap(), Value::Int(0));
    let err = rt.call_object(next, &[]).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::StopIteration));
    assert_eq!(message(&mut rt, err), None);

    let builtin_next = rt.builtin("next").unwrap();
    assert_eq!(rt.call_object(builtin_next, &[g, Value::Int(-1)]).unwrap(), Value::Int(-1));
}

#[test]
fn send_resumes_with_a_value() {
    let mut rt = Runtime::new();
    let accumulate = accumulate(&mut rt);
    let g = rt.call_object(accumulate, &[]).unwrap();
    let send = rt.getattr_str(g, "send").unwrap();
    // send(None) starts a fresh generator like next()
    assert_eq!(rt.call_object(send, &[Value::None]).unwrap(), Value::Int(0));
    assert_eq!(rt.call_object(send, &[Value::Int(5)]).unwrap(), Value::Int(5));
    assert_eq!(rt.call_object(send, &[Value::Int(10)]).unwrap(), Value::Int(15));
}

#[test]
fn sending_a_value_to_a_new_generator_fails() {
    let mut rt = Runtime::new();
    let accumulate = accumulate(&mut rt);
    let g = rt.call_object(accumulate, &[]).unwrap();
    let send = rt.getattr_str(g, "send").unwrap();
    let err = rt.call_object(send, &[Value::Int(1)]).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::TypeError));
    assert_eq!(
        message(&mut rt, err).as_deref(),
        Some("can't send non-None value to a just-started generator")
    );
    // the failed send did not start it
    assert_eq!(rt.call_object(send, &[Value::None]).unwrap(), Value::Int(0));
}

#[test]
fn resuming_a_running_generator_fails() {
    let mut rt = Runtime::new();
    // def reenter(): yield me.next()
    let mut b = CodeBuilder::function("reenter", &[]);
    b.load_global("me").call_method("next", 0).yield_value().return_value();
    let reenter = rt.make_function(&b.build(), Vec::new()).unwrap();
    let g = rt.call_object(reenter, &[]).unwrap();
    rt.set_global("me", g);

    let err = rt.iter_next(g).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::ValueError));
    assert_eq!(message(&mut rt, err).as_deref(), Some("generator already executing"));
    // the error finished the generator
    assert_eq!(rt.iter_next(g).unwrap(), IterStep::End);
}

#[test]
fn handled_exception_survives_a_yield() {
    let mut rt = Runtime::new();
    // def g():
    //     try: raise KeyError
    //     except KeyError:
    //         yield 1
    //         raise
    let mut b = CodeBuilder::function("g", &[]);
    let setup = b.emit_jump(Op::SetupExcept(0));
    b.load_global("KeyError").emit(Op::Raise);
    b.patch_jump(setup);
    b.emit(Op::Pop);
    b.load_int(1).yield_value().emit(Op::Pop);
    b.emit(Op::Reraise);
    let g = rt.make_function(&b.build(), Vec::new()).unwrap();
    let g = rt.call_object(g, &[]).unwrap();

    assert_eq!(rt.iter_next(g).unwrap(), IterStep::Value(Value::Int(1)));
    // while suspended, the consumer is not handling anything
    assert_eq!(rt.current_exception(), None);
    let err = rt.iter_next(g).unwrap_err();
    assert!(rt.error_matches(&err, ExcType::KeyError));
}

#[test]
fn for_loop_over_a_generator() {
    let mut rt = Runtime::new();
    let count = count(&mut rt);
    rt.set_global("count", count);

    // total = 0
    // for x in count(4): total = total + x
    let mut m = CodeBuilder::module();
    m.load_int(0).store_fast("total");
    m.load_global("count").load_int(4).call(1).emit(Op::GetIter);
    let top = m.position();
    let exit = m.emit_jump(Op::ForIter(0));
    m.store_fast("x").load_fast("total").load_fast("x").add().store_fast("total");
    m.emit(Op::Jump(top));
    m.patch_jump(exit);
    m.load_fast("total").return_value();
    assert_eq!(rt.execute(&m.build()).unwrap(), Value::Int(6));
}

#[test]
fn arguments_are_checked_when_the_generator_is_created() {
    let mut rt = Runtime::new();
    let count = count(&mut rt);
    let err = rt.call_object(count, &[]).unwrap_err();
    assert_eq!(
        message(&mut rt, err).as_deref(),
        Some("count() takes exactly 1 argument (0 given)")
    );
}
