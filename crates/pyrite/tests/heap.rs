//! Collection roots, host pins, finalizers, and heap statistics.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use pyrite::{CodeBuilder, HeapId, IterStep, ResourceLimits, Runtime, RuntimeConfig, Value};

fn count_of(rt: &Runtime, variant: &str) -> usize {
    rt.heap_stats().objects_by_type.get(variant).copied().unwrap_or(0)
}

#[test]
fn unreachable_objects_are_collected() {
    let mut rt = Runtime::new();
    rt.collect();
    let before = rt.heap_stats();

    let inner = rt.new_str("inner").unwrap();
    rt.new_list(vec![inner]).unwrap();
    assert_eq!(rt.heap_stats().live_objects, before.live_objects + 2);

    assert_eq!(rt.collect(), 2);
    let after = rt.heap_stats();
    assert_eq!(after.live_objects, before.live_objects);
    assert_eq!(before.diff(&after).live_objects_delta, 0);
    assert_eq!(after.objects_by_type.get("List"), before.objects_by_type.get("List"));
}

#[test]
fn globals_and_pins_are_roots() {
    let mut rt = Runtime::new();
    rt.collect();
    let global = rt.new_list(Vec::new()).unwrap();
    rt.set_global("kept", global);
    let pinned = rt.new_str("pinned").unwrap();
    rt.retain(pinned);
    rt.retain(pinned);

    assert_eq!(rt.collect(), 0);
    assert_eq!(rt.heap_stats().pinned_objects, 1);
    assert_eq!(rt.str_value(pinned), Some("pinned"));

    // pins nest
    assert!(rt.release(pinned));
    assert_eq!(rt.collect(), 0);
    assert!(!rt.release(pinned));
    assert_eq!(rt.collect(), 1);
    assert_eq!(rt.heap_stats().pinned_objects, 0);
    assert_eq!(rt.get_global("kept"), Some(global));
}

#[test]
fn instances_keep_their_class_alive() {
    let mut rt = Runtime::new();
    let object = rt.object_type();
    let cls = rt.create_class("Kept", &[object], &[("x", Value::Int(1))]).unwrap();
    let obj = rt.call_object(cls, &[]).unwrap();
    rt.retain(obj);
    rt.collect();

    assert_eq!(rt.getattr_str(obj, "x").unwrap(), Value::Int(1));
    assert_eq!(rt.class_name(rt.get_type(obj)).unwrap(), "Kept");
}

#[test]
fn collected_subclasses_drop_out_of_structural_updates() {
    let mut rt = Runtime::new();
    let object = rt.object_type();
    let base = rt.create_class("Base", &[object], &[]).unwrap();
    rt.set_global("Base", base);
    rt.create_class("Gone", &[base], &[]).unwrap();
    let types_before = count_of(&rt, "Type");

    rt.collect();
    assert_eq!(count_of(&rt, "Type"), types_before - 1);

    // reuse the freed slot, then mutate the base: the stale subclass entry must be ignored
    let other = rt.create_class("Other", &[object], &[]).unwrap();
    rt.set_global("Other", other);
    rt.setattr_str(base, "x", Value::Int(2)).unwrap();
    let bases = rt.new_tuple(vec![other]).unwrap();
    rt.setattr_str(base, "__bases__", bases).unwrap();
    let mro: Vec<&str> = rt
        .mro(base)
        .unwrap()
        .into_iter()
        .map(|c| rt.class_name(c).unwrap())
        .collect();
    assert_eq!(mro, ["Base", "Other", "object"]);
}

#[test]
fn finalizer_sees_every_freed_object() {
    let mut rt = Runtime::new();
    rt.collect();
    let freed: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let sink = Arc::clone(&freed);
    rt.set_finalizer(Some(Box::new(move |_id: HeapId, kind: &'static str| sink.lock().push(kind))));

    let s = rt.new_str("a").unwrap();
    rt.new_tuple(vec![s, Value::Int(1)]).unwrap();
    assert_eq!(rt.collect(), 2);

    let mut kinds = freed.lock().clone();
    kinds.sort_unstable();
    assert_eq!(kinds, ["Str", "Tuple"]);

    rt.set_finalizer(None);
    rt.new_str("b").unwrap();
    rt.collect();
    assert_eq!(freed.lock().len(), 2);
}

#[test]
fn suspended_generators_keep_their_locals_alive() {
    let mut rt = Runtime::new();
    // def g():
    //     items = [1, 2]
    //     yield None
    //     yield items
    let mut b = CodeBuilder::function("g", &[]);
    b.load_int(1).load_int(2).emit(pyrite::Op::BuildList(2)).store_fast("items");
    b.load_none().yield_value().emit(pyrite::Op::Pop);
    b.load_fast("items").yield_value().return_value();
    let g = rt.make_function(&b.build(), Vec::new()).unwrap();
    let gen_obj = rt.call_object(g, &[]).unwrap();
    rt.retain(gen_obj);
    assert_eq!(rt.iter_next(gen_obj).unwrap(), IterStep::Value(Value::None));

    rt.collect();
    let IterStep::Value(items) = rt.iter_next(gen_obj).unwrap() else {
        panic!("generator ended early");
    };
    assert_eq!(rt.sequence_items(items).unwrap(), [Value::Int(1), Value::Int(2)]);
}

#[test]
fn allocation_limit_counts_live_objects() {
    let config = RuntimeConfig::new().with_limits(ResourceLimits::new().max_allocations(3));
    let mut rt = Runtime::with_config(config);
    for _ in 0..3 {
        rt.new_list(Vec::new()).unwrap();
    }
    let err = rt.new_list(Vec::new()).unwrap_err();
    let exc = rt.describe_error(err);
    assert_eq!(exc.exc_type(), "MemoryError");
    assert_eq!(exc.kind(), pyrite::FailureKind::ResourceExhausted);

    // freeing garbage makes room again
    assert!(rt.collect() >= 3);
    rt.new_list(Vec::new()).unwrap();
}

#[test]
fn heap_stats_serialize_to_json() {
    let mut rt = Runtime::new();
    rt.collect();
    let before = rt.heap_stats();
    let list = rt.new_list(Vec::new()).unwrap();
    rt.retain(list);
    let after = rt.heap_stats();

    let json = serde_json::to_value(&after).unwrap();
    assert_eq!(json["live_objects"], after.live_objects);
    assert_eq!(json["pinned_objects"], 1);
    assert!(json["objects_by_type"]["Type"].as_u64().unwrap() > 0);

    let diff = before.diff(&after);
    assert_eq!(diff.live_objects_delta, 1);
    assert_eq!(diff.objects_by_type_delta["List"], 1);
    let text = diff.to_string();
    assert!(text.starts_with("HeapDiff: +1 live objects"), "{text}");
    assert!(text.ends_with("\n  List: +1"), "{text}");
    assert!(before.diff(&before).is_empty());
    assert_eq!(before.diff(&before).to_string(), "HeapDiff: no changes");
}
