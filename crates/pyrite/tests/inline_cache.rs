//! Inline-cache sites: state transitions, guard checks, and epoch invalidation.
//!
//! Each test compiles a tiny function, calls it with different receivers, and then inspects
//! the cache sites of its code object directly.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use pyrite::{
    BinaryOp, CacheState, Code, CodeBuilder, Op, RecordingTracer, Runtime, RuntimeConfig, SiteKind, TraceEvent,
    Value,
};

fn func(rt: &mut Runtime, name: &str, params: &[&str], body: impl FnOnce(&mut CodeBuilder)) -> Value {
    let mut b = CodeBuilder::function(name, params);
    body(&mut b);
    rt.make_function(&b.build(), Vec::new()).unwrap()
}

fn class(rt: &mut Runtime, name: &str, bases: &[Value], namespace: &[(&str, Value)]) -> Value {
    let bases: Vec<Value> = if bases.is_empty() { vec![rt.object_type()] } else { bases.to_vec() };
    rt.create_class(name, &bases, namespace).unwrap()
}

/// `def get_x(o): return o.x`, returning the code so its site can be inspected.
fn get_x() -> Arc<Code> {
    let mut b = CodeBuilder::function("get_x", &["o"]);
    b.load_fast("o").load_attr("x").return_value();
    b.build()
}

fn site_state(code: &Code) -> CacheState {
    code.site(0).unwrap().state()
}

// =============================================================================
// 1. State machine
// =============================================================================

#[test]
fn one_receiver_type_stays_monomorphic() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let c = class(&mut rt, "C", &[], &[("x", Value::Int(1))]);
    assert_eq!(site_state(&code), CacheState::Uninitialized);

    for _ in 0..5 {
        let obj = rt.call_object(c, &[]).unwrap();
        assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));
    }
    let stats = code.site(0).unwrap().stats();
    assert_eq!(stats.state, CacheState::Monomorphic);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);
}

#[test]
fn several_receiver_types_go_polymorphic() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let a = class(&mut rt, "A", &[], &[("x", Value::Int(1))]);
    let b = class(&mut rt, "B", &[], &[("x", Value::Int(2))]);
    let a = rt.call_object(a, &[]).unwrap();
    let b = rt.call_object(b, &[]).unwrap();

    for _ in 0..3 {
        assert_eq!(rt.call_object(f, &[a]).unwrap(), Value::Int(1));
        assert_eq!(rt.call_object(f, &[b]).unwrap(), Value::Int(2));
    }
    let stats = code.site(0).unwrap().stats();
    assert_eq!(stats.state, CacheState::Polymorphic);
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.misses, 2);
}

#[test]
fn a_class_and_its_instances_are_different_shapes() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let c = class(&mut rt, "C", &[], &[("x", Value::Int(1))]);
    let obj = rt.call_object(c, &[]).unwrap();
    rt.setattr_str(obj, "x", Value::Int(2)).unwrap();

    assert_eq!(rt.call_object(f, &[c]).unwrap(), Value::Int(1));
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(2));
    assert_eq!(rt.call_object(f, &[c]).unwrap(), Value::Int(1));
    assert_eq!(code.site(0).unwrap().stats().entries, 2);
}

#[test]
fn too_many_shapes_go_megamorphic_for_good() {
    let config = RuntimeConfig::new().with_polymorphic_limit(2);
    let mut rt = Runtime::with_config(config);
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let mut objects = Vec::new();
    for (i, name) in ["A", "B", "C"].into_iter().enumerate() {
        let cls = class(&mut rt, name, &[], &[("x", Value::Int(i as i64))]);
        objects.push(rt.call_object(cls, &[]).unwrap());
    }

    for (i, &obj) in objects.iter().enumerate() {
        assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(i as i64));
    }
    let stats = code.site(0).unwrap().stats();
    assert_eq!(stats.state, CacheState::Megamorphic);
    assert_eq!(stats.entries, 0);

    // the generic path still answers correctly, and nothing is cached again
    for (i, &obj) in objects.iter().enumerate() {
        assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(i as i64));
    }
    let stats = code.site(0).unwrap().stats();
    assert_eq!(stats.state, CacheState::Megamorphic);
    assert_eq!(stats.hits, 0);
}

#[test]
fn transitions_are_reported_to_the_tracer() {
    let config = RuntimeConfig::new().with_polymorphic_limit(2);
    let mut rt = Runtime::with_tracer(config, RecordingTracer::new());
    let mut b = CodeBuilder::function("get_x", &["o"]);
    b.load_fast("o").load_attr("x").return_value();
    let code = b.build();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let object = rt.object_type();
    let mut objects = Vec::new();
    for name in ["A", "B", "C"] {
        let cls = rt.create_class(name, &[object], &[("x", Value::None)]).unwrap();
        objects.push(rt.call_object(cls, &[]).unwrap());
    }
    rt.tracer_mut().clear();

    for &obj in &objects {
        rt.call_object(f, &[obj]).unwrap();
    }
    let transitions: Vec<(CacheState, CacheState)> = rt
        .tracer()
        .events()
        .iter()
        .filter_map(|e| match *e {
            TraceEvent::CacheTransition {
                kind: SiteKind::LoadAttr,
                from,
                to,
            } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        [
            (CacheState::Uninitialized, CacheState::Monomorphic),
            (CacheState::Monomorphic, CacheState::Polymorphic),
            (CacheState::Polymorphic, CacheState::Megamorphic),
        ]
    );
}

// =============================================================================
// 2. Invalidation
// =============================================================================

#[test]
fn class_attribute_change_is_seen_by_a_warm_site() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let c = class(&mut rt, "C", &[], &[("x", Value::Int(1))]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));

    let epoch = rt.epoch_value();
    rt.setattr_str(c, "x", Value::Int(2)).unwrap();
    assert!(rt.epoch_value() > epoch);
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(2));

    // the stale entry was refreshed in place
    let stats = code.site(0).unwrap().stats();
    assert_eq!(stats.state, CacheState::Monomorphic);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 2);
}

#[test]
fn instance_attribute_changes_do_not_bump_the_epoch() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let c = class(&mut rt, "C", &[], &[("x", Value::Int(1))]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));

    let epoch = rt.epoch_value();
    rt.setattr_str(obj, "x", Value::Int(5)).unwrap();
    assert_eq!(rt.epoch_value(), epoch);
    // the cached class attribute is still checked against the instance dict
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(5));
    assert_eq!(code.site(0).unwrap().stats().hits, 1);
}

#[test]
fn adding_a_data_descriptor_overrides_a_cached_instance_dict_read() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let c = class(&mut rt, "C", &[], &[]);
    let obj = rt.call_object(c, &[]).unwrap();
    rt.setattr_str(obj, "x", Value::Int(1)).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));

    let getter = func(&mut rt, "x", &["self"], |b| {
        b.load_int(99).return_value();
    });
    let property = rt.builtin("property").unwrap();
    let prop = rt.call_object(property, &[getter]).unwrap();
    rt.setattr_str(c, "x", prop).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(99));
}

#[test]
fn bases_assignment_invalidates_inherited_lookups() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let a = class(&mut rt, "A", &[], &[("x", Value::Int(1))]);
    let b = class(&mut rt, "B", &[], &[("x", Value::Int(2))]);
    let c = class(&mut rt, "C", &[a], &[]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));

    let bases = rt.new_tuple(vec![b]).unwrap();
    rt.setattr_str(c, "__bases__", bases).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(2));
}

#[test]
fn mutating_a_base_class_reaches_subclass_receivers() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let base = class(&mut rt, "Base", &[], &[("x", Value::Int(1))]);
    let derived = class(&mut rt, "Derived", &[base], &[]);
    let obj = rt.call_object(derived, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));

    rt.setattr_str(base, "x", Value::Int(3)).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(3));
}

#[test]
fn class_assignment_changes_the_shape() {
    let mut rt = Runtime::new();
    let code = get_x();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let a = class(&mut rt, "A", &[], &[("x", Value::Int(1))]);
    let b = class(&mut rt, "B", &[], &[("x", Value::Int(2))]);
    let obj = rt.call_object(a, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));

    rt.setattr_str(obj, "__class__", b).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(2));
}

// =============================================================================
// 3. Call, store and binary-operator sites
// =============================================================================

#[test]
fn method_call_site_follows_redefinition() {
    let mut rt = Runtime::new();
    let mut b = CodeBuilder::function("call_m", &["o"]);
    b.load_fast("o").call_method("m", 0).return_value();
    let code = b.build();
    let f = rt.make_function(&code, Vec::new()).unwrap();

    let m1 = func(&mut rt, "m", &["self"], |b| {
        b.load_int(1).return_value();
    });
    let c = class(&mut rt, "C", &[], &[("m", m1)]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));
    assert_eq!(code.site(0).unwrap().state(), CacheState::Monomorphic);

    let m2 = func(&mut rt, "m", &["self"], |b| {
        b.load_int(2).return_value();
    });
    rt.setattr_str(c, "m", m2).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(2));
}

#[test]
fn method_call_site_respects_instance_dict_shadowing() {
    let mut rt = Runtime::new();
    let mut b = CodeBuilder::function("call_m", &["o"]);
    b.load_fast("o").call_method("m", 0).return_value();
    let code = b.build();
    let f = rt.make_function(&code, Vec::new()).unwrap();

    let m = func(&mut rt, "m", &["self"], |b| {
        b.load_int(1).return_value();
    });
    let c = class(&mut rt, "C", &[], &[("m", m)]);
    let obj = rt.call_object(c, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(1));

    let shadow = func(&mut rt, "shadow", &[], |b| {
        b.load_int(7).return_value();
    });
    rt.setattr_str(obj, "m", shadow).unwrap();
    assert_eq!(rt.call_object(f, &[obj]).unwrap(), Value::Int(7));
}

#[test]
fn store_site_switches_to_a_new_property_setter() {
    let mut rt = Runtime::new();
    let mut b = CodeBuilder::function("set_y", &["o", "v"]);
    b.load_fast("v").load_fast("o").store_attr("y").load_none().return_value();
    let code = b.build();
    let f = rt.make_function(&code, Vec::new()).unwrap();

    let c = class(&mut rt, "C", &[], &[]);
    let obj = rt.call_object(c, &[]).unwrap();
    rt.call_object(f, &[obj, Value::Int(1)]).unwrap();
    assert_eq!(rt.getattr_str(obj, "y").unwrap(), Value::Int(1));
    assert_eq!(code.site(0).unwrap().state(), CacheState::Monomorphic);

    // y = property(lambda self: self._y, lambda self, v: setattr(self, '_y', v * 2))
    let getter = func(&mut rt, "y", &["self"], |b| {
        b.load_fast("self").load_attr("_y").return_value();
    });
    let setter = func(&mut rt, "y", &["self", "value"], |b| {
        b.load_fast("value").load_int(2).binary(BinaryOp::Mul);
        b.load_fast("self").store_attr("_y").load_none().return_value();
    });
    let property = rt.builtin("property").unwrap();
    let prop = rt.call_object(property, &[getter, setter]).unwrap();
    rt.setattr_str(c, "y", prop).unwrap();

    rt.call_object(f, &[obj, Value::Int(4)]).unwrap();
    assert_eq!(rt.getattr_str(obj, "_y").unwrap(), Value::Int(8));
    assert_eq!(rt.getattr_str(obj, "y").unwrap(), Value::Int(8));
}

#[test]
fn binary_site_caches_per_operand_type_pair() {
    let mut rt = Runtime::new();
    let mut b = CodeBuilder::function("plus", &["a", "b"]);
    b.load_fast("a").load_fast("b").add().return_value();
    let code = b.build();
    let f = rt.make_function(&code, Vec::new()).unwrap();

    assert_eq!(rt.call_object(f, &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
    assert_eq!(rt.call_object(f, &[Value::Int(3), Value::Int(4)]).unwrap(), Value::Int(7));
    assert_eq!(code.site(0).unwrap().state(), CacheState::Monomorphic);
    assert_eq!(
        rt.call_object(f, &[Value::Float(0.5), Value::Int(1)]).unwrap(),
        Value::Float(1.5)
    );
    let stats = code.site(0).unwrap().stats();
    assert_eq!(stats.state, CacheState::Polymorphic);
    assert_eq!(stats.hits, 1);
}

#[test]
fn binary_site_sees_a_redefined_special_method() {
    let mut rt = Runtime::new();
    let mut b = CodeBuilder::function("plus", &["a", "b"]);
    b.load_fast("a").load_fast("b").add().return_value();
    let code = b.build();
    let f = rt.make_function(&code, Vec::new()).unwrap();

    let add1 = func(&mut rt, "__add__", &["self", "other"], |b| {
        b.load_int(1).return_value();
    });
    let v = class(&mut rt, "V", &[], &[("__add__", add1)]);
    let obj = rt.call_object(v, &[]).unwrap();
    assert_eq!(rt.call_object(f, &[obj, Value::None]).unwrap(), Value::Int(1));

    let add2 = func(&mut rt, "__add__", &["self", "other"], |b| {
        b.load_int(2).return_value();
    });
    rt.setattr_str(v, "__add__", add2).unwrap();
    assert_eq!(rt.call_object(f, &[obj, Value::None]).unwrap(), Value::Int(2));
}

#[test]
fn sites_persist_across_executions_of_a_loop() {
    // for _ in [None] * 4: total = total + o.x
    let mut rt = Runtime::new();
    let c = class(&mut rt, "C", &[], &[("x", Value::Int(2))]);
    let obj = rt.call_object(c, &[]).unwrap();
    rt.set_global("o", obj);

    let mut module = CodeBuilder::function("loop", &[]);
    module.load_int(0).store_fast("total");
    for _ in 0..4 {
        module.load_none();
    }
    module.emit(Op::BuildList(4)).emit(Op::GetIter);
    let top = module.position();
    let exit = module.emit_jump(Op::ForIter(0));
    module.emit(Op::Pop);
    module.load_fast("total").load_global("o").load_attr("x").add().store_fast("total");
    module.emit(Op::Jump(top));
    module.patch_jump(exit);
    module.load_fast("total").return_value();
    let code = module.build();

    assert_eq!(rt.execute(&code).unwrap(), Value::Int(8));
    // site 0 is the attribute load, site 1 the addition
    let attr = code.site(0).unwrap().stats();
    assert_eq!(attr.misses, 1);
    assert_eq!(attr.hits, 3);
    assert_eq!(rt.execute(&code).unwrap(), Value::Int(8));
    assert_eq!(code.site(0).unwrap().stats().hits, 7);
}

// =============================================================================
// 5. Cached answers match generic resolution
// =============================================================================

#[test]
fn rotating_receivers_match_uncached_lookup() {
    for n in 1..=10_i64 {
        let mut rt = Runtime::new();
        let code = get_x();
        let f = rt.make_function(&code, Vec::new()).unwrap();
        let objects: Vec<Value> = (0..n)
            .map(|i| {
                let cls = class(&mut rt, &format!("C{i}"), &[], &[("x", Value::Int(i))]);
                rt.call_object(cls, &[]).unwrap()
            })
            .collect();

        for round in 0..3 {
            for &obj in &objects {
                let cached = rt.call_object(f, &[obj]).unwrap();
                let generic = rt.getattr_str(obj, "x").unwrap();
                assert_eq!(cached, generic, "{n} shapes, round {round}");
            }
        }
        let expected = match n {
            1 => CacheState::Monomorphic,
            2..=4 => CacheState::Polymorphic,
            _ => CacheState::Megamorphic,
        };
        assert_eq!(site_state(&code), expected, "{n} shapes");
    }
}

#[test]
fn one_site_sees_int_then_float_then_a_custom_type() {
    // def kind(v): return v.__class__
    let config = RuntimeConfig::new().with_polymorphic_limit(2);
    let mut rt = Runtime::with_config(config);
    let mut b = CodeBuilder::function("kind", &["v"]);
    b.load_fast("v").load_attr("__class__").return_value();
    let code = b.build();
    let f = rt.make_function(&code, Vec::new()).unwrap();
    let custom = class(&mut rt, "Custom", &[], &[]);
    let custom = rt.call_object(custom, &[]).unwrap();

    for v in [Value::Int(3), Value::Float(1.5), custom] {
        for _ in 0..1000 {
            let cached = rt.call_object(f, &[v]).unwrap();
            assert_eq!(cached, rt.get_type(v));
        }
    }
    let stats = code.site(0).unwrap().stats();
    assert_eq!(stats.state, CacheState::Megamorphic);
    assert_eq!(stats.hits + stats.misses, 3000);
}
