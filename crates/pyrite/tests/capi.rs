//! The C-ABI surface driven the way a native extension shim would drive it.

use std::ptr;

use pretty_assertions::assert_eq;
use pyrite::{
    Value,
    capi::{
        PyriteHandle, PyriteRuntime, pyrite_as_int, pyrite_call_object, pyrite_error_clear, pyrite_error_occurred,
        pyrite_from_int, pyrite_get_attr, pyrite_get_type, pyrite_lookup_name, pyrite_release_handle,
        pyrite_runtime_free, pyrite_runtime_new, pyrite_set_attr,
    },
};

/// Owns a runtime pointer for the length of a test.
struct Guard(*mut PyriteRuntime);

impl Guard {
    fn new() -> Self {
        let rt = pyrite_runtime_new();
        assert!(!rt.is_null());
        Self(rt)
    }

    fn rt(&mut self) -> &mut PyriteRuntime {
        // SAFETY: the pointer is live until `drop` and only borrowed through `&mut self`.
        unsafe { &mut *self.0 }
    }

    fn as_int(&self, handle: PyriteHandle) -> Option<i64> {
        let mut out = 0;
        // SAFETY: live runtime; `out` is a valid local.
        (unsafe { pyrite_as_int(self.0, handle, &raw mut out) } == 0).then_some(out)
    }

    fn error_type(&mut self) -> Option<String> {
        self.rt().last_error().map(|e| e.exc_type().to_owned())
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        // SAFETY: allocated by `pyrite_runtime_new` and freed exactly once here.
        unsafe { pyrite_runtime_free(self.0) };
    }
}

/// Defines `class Point(object): dims = 2` as a global.
fn define_point(g: &mut Guard) -> Value {
    let rt = g.rt().runtime_mut();
    let object = rt.object_type();
    let point = rt.create_class("Point", &[object], &[("dims", Value::Int(2))]).unwrap();
    rt.set_global("Point", point);
    point
}

#[test]
fn call_a_class_and_read_an_attribute() {
    let mut g = Guard::new();
    let point = define_point(&mut g);

    // SAFETY: live runtime and NUL-terminated literals throughout.
    unsafe {
        let cls = pyrite_lookup_name(g.0, c"Point".as_ptr());
        assert_eq!(g.rt().value(cls), Some(point));

        let obj = pyrite_call_object(g.0, cls, ptr::null(), 0);
        assert_ne!(obj, 0);
        let dims = pyrite_get_attr(g.0, obj, c"dims".as_ptr());
        assert_eq!(g.as_int(dims), Some(2));

        let ty = pyrite_get_type(g.0, obj);
        assert_eq!(g.rt().value(ty), Some(point));
        assert_eq!(pyrite_error_occurred(g.0), 0);
    }
}

#[test]
fn set_attr_then_get_attr() {
    let mut g = Guard::new();
    define_point(&mut g);

    // SAFETY: live runtime and NUL-terminated literals throughout.
    unsafe {
        let cls = pyrite_lookup_name(g.0, c"Point".as_ptr());
        let obj = pyrite_call_object(g.0, cls, ptr::null(), 0);
        let seven = pyrite_from_int(g.0, 7);
        assert_eq!(pyrite_set_attr(g.0, obj, c"x".as_ptr(), seven), 0);
        let x = pyrite_get_attr(g.0, obj, c"x".as_ptr());
        assert_eq!(g.as_int(x), Some(7));
    }
}

#[test]
fn builtins_are_callable_with_arguments() {
    let mut g = Guard::new();
    // SAFETY: live runtime; `args` points to two handles.
    unsafe {
        let isinstance = pyrite_lookup_name(g.0, c"isinstance".as_ptr());
        let int = pyrite_lookup_name(g.0, c"int".as_ptr());
        let args = [pyrite_from_int(g.0, 3), int];
        let result = pyrite_call_object(g.0, isinstance, args.as_ptr(), args.len());
        assert_eq!(g.as_int(result), Some(1));

        let true_ = pyrite_lookup_name(g.0, c"True".as_ptr());
        assert_eq!(g.as_int(true_), Some(1));
    }
}

#[test]
fn failures_record_an_error_until_cleared() {
    let mut g = Guard::new();
    define_point(&mut g);

    // SAFETY: live runtime and NUL-terminated literals throughout.
    unsafe {
        let cls = pyrite_lookup_name(g.0, c"Point".as_ptr());
        assert_eq!(pyrite_get_attr(g.0, cls, c"missing".as_ptr()), 0);
        assert_eq!(pyrite_error_occurred(g.0), 1);
        assert_eq!(g.error_type().as_deref(), Some("AttributeError"));
        pyrite_error_clear(g.0);
        assert_eq!(pyrite_error_occurred(g.0), 0);

        assert_eq!(pyrite_lookup_name(g.0, c"nowhere".as_ptr()), 0);
        assert_eq!(g.error_type().as_deref(), Some("NameError"));
        pyrite_error_clear(g.0);

        // calling an int
        let one = pyrite_from_int(g.0, 1);
        assert_eq!(pyrite_call_object(g.0, one, ptr::null(), 0), 0);
        assert_eq!(g.error_type().as_deref(), Some("TypeError"));
    }
}

#[test]
fn released_and_null_handles_are_rejected() {
    let mut g = Guard::new();
    // SAFETY: live runtime; null name is part of the tested contract.
    unsafe {
        let one = pyrite_from_int(g.0, 1);
        assert_eq!(pyrite_release_handle(g.0, one), 1);
        assert_eq!(pyrite_release_handle(g.0, one), 0);
        assert_eq!(g.as_int(one), None);

        assert_eq!(pyrite_get_type(g.0, 0), 0);
        assert_eq!(g.error_type().as_deref(), Some("SystemError"));
        pyrite_error_clear(g.0);

        let object = pyrite_lookup_name(g.0, c"object".as_ptr());
        assert_eq!(pyrite_get_attr(g.0, object, ptr::null()), 0);
        assert_eq!(pyrite_error_occurred(g.0), 1);
    }
}

#[test]
fn handles_pin_their_objects_across_collections() {
    let mut g = Guard::new();
    let list = g.rt().runtime_mut().new_list(vec![Value::Int(4)]).unwrap();
    let handle = g.rt().handle(list);
    let lists = |g: &mut Guard| g.rt().runtime().heap_stats().objects_by_type.get("List").copied();

    g.rt().runtime_mut().collect();
    assert_eq!(g.rt().runtime().sequence_items(list), Some(vec![Value::Int(4)]));
    assert_eq!(lists(&mut g), Some(1));

    assert!(g.rt().release_handle(handle));
    g.rt().runtime_mut().collect();
    assert_eq!(lists(&mut g), None);
}
