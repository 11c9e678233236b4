// Use codspeed-criterion-compat when running on CodSpeed (CI), real criterion otherwise
#[cfg(codspeed)]
use codspeed_criterion_compat::{Bencher, Criterion, black_box, criterion_group, criterion_main};
#[cfg(not(codspeed))]
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use pyrite::{Code, CodeBuilder, Op, Runtime, RuntimeConfig, Value};

const RECEIVERS: usize = 1000;

/// total = 0
/// for o in objs: total = total + o.x
/// total
fn sum_attr() -> std::sync::Arc<Code> {
    let mut m = CodeBuilder::module();
    m.load_int(0).store_fast("total");
    m.load_global("objs").emit(Op::GetIter);
    let top = m.position();
    let exit = m.emit_jump(Op::ForIter(0));
    m.store_fast("o").load_fast("total").load_fast("o").load_attr("x").add().store_fast("total");
    m.emit(Op::Jump(top));
    m.patch_jump(exit);
    m.load_fast("total").return_value();
    m.build()
}

/// Same loop as [`sum_attr`], but through a method call: `total = total + o.get()`.
fn sum_method() -> std::sync::Arc<Code> {
    let mut m = CodeBuilder::module();
    m.load_int(0).store_fast("total");
    m.load_global("objs").emit(Op::GetIter);
    let top = m.position();
    let exit = m.emit_jump(Op::ForIter(0));
    m.store_fast("o").load_fast("total").load_fast("o").call_method("get", 0).add().store_fast("total");
    m.emit(Op::Jump(top));
    m.patch_jump(exit);
    m.load_fast("total").return_value();
    m.build()
}

/// Fills `objs` with instances spread round-robin over `classes` distinct classes, each
/// with `x = 1` and `def get(self): return 1`.
fn setup(classes: usize) -> Runtime {
    let mut rt = Runtime::with_config(RuntimeConfig::new());
    let mut get = CodeBuilder::function("get", &["self"]);
    get.load_int(1).return_value();
    let get = rt.make_function(&get.build(), Vec::new()).unwrap();
    let object = rt.object_type();
    let classes: Vec<Value> = (0..classes)
        .map(|i| {
            let name = format!("C{i}");
            rt.create_class(&name, &[object], &[("x", Value::Int(1)), ("get", get)]).unwrap()
        })
        .collect();
    let objs = classes
        .iter()
        .cycle()
        .take(RECEIVERS)
        .map(|&cls| rt.call_object(cls, &[]).unwrap())
        .collect();
    let objs = rt.new_list(objs).unwrap();
    rt.set_global("objs", objs);
    rt
}

fn run(bench: &mut Bencher, classes: usize, code: &std::sync::Arc<Code>) {
    let mut rt = setup(classes);
    let expected = i64::try_from(RECEIVERS).unwrap();
    assert_eq!(rt.execute(code).unwrap(), Value::Int(expected));
    bench.iter(|| black_box(rt.execute(code).unwrap()));
}

/// Configures the attribute and method dispatch benchmark group.
fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("load_attr__monomorphic", |b| run(b, 1, &sum_attr()));
    c.bench_function("load_attr__polymorphic", |b| run(b, 3, &sum_attr()));
    c.bench_function("load_attr__megamorphic", |b| run(b, 8, &sum_attr()));

    c.bench_function("call_method__monomorphic", |b| run(b, 1, &sum_method()));
    c.bench_function("call_method__megamorphic", |b| run(b, 8, &sum_method()));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
