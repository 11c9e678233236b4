//! The narrow surface a native-interop layer binds against.
//!
//! [`ObjectProtocol`] is the safe Rust form: the four operations an extension-compatibility
//! layer needs (`PyObject_GetAttr`, `PyObject_SetAttr`, `PyObject_CallObject`,
//! `PyObject_Type`). The `pyrite_*` functions expose the same operations with a C ABI over an
//! opaque [`PyriteRuntime`]. Objects cross the boundary as [`PyriteHandle`]s: small integers
//! indexing a handle table whose entries are pinned so collections cannot reclaim them.
//! Handle `0` is the null handle; a function returning it has recorded an error, which
//! [`pyrite_error_occurred`] reports and [`pyrite_error_clear`] discards.

use std::ffi::{CStr, c_char, c_int};

use crate::{
    exception_private::RunResult, exception_public::Exception, runtime::Runtime, tracer::DispatchTracer,
    value::Value,
};

/// Object operations exposed to native-interop layers.
pub trait ObjectProtocol {
    /// `getattr(obj, name)`.
    fn get_attr(&mut self, obj: Value, name: &str) -> RunResult<Value>;
    /// `setattr(obj, name, value)`.
    fn set_attr(&mut self, obj: Value, name: &str, value: Value) -> RunResult<()>;
    /// `callable(*args)`.
    fn call_object(&mut self, callable: Value, args: &[Value]) -> RunResult<Value>;
    /// `type(obj)`.
    fn get_type(&self, obj: Value) -> Value;
}

impl<Tr: DispatchTracer> ObjectProtocol for Runtime<Tr> {
    fn get_attr(&mut self, obj: Value, name: &str) -> RunResult<Value> {
        self.getattr_str(obj, name)
    }

    fn set_attr(&mut self, obj: Value, name: &str, value: Value) -> RunResult<()> {
        self.setattr_str(obj, name, value)
    }

    fn call_object(&mut self, callable: Value, args: &[Value]) -> RunResult<Value> {
        Self::call_object(self, callable, args)
    }

    fn get_type(&self, obj: Value) -> Value {
        Self::get_type(self, obj)
    }
}

/// An object reference handed across the C boundary. `0` is null.
pub type PyriteHandle = u64;

/// A runtime plus its handle table, owned by the native side.
#[derive(Debug, Default)]
pub struct PyriteRuntime {
    runtime: Runtime,
    /// `handles[h - 1]` is the value of handle `h`; released slots are `None`.
    handles: Vec<Option<Value>>,
    free: Vec<usize>,
    last_error: Option<Exception>,
}

impl PyriteRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    /// Issues a handle for `value`, pinning it until [`PyriteRuntime::release_handle`].
    pub fn handle(&mut self, value: Value) -> PyriteHandle {
        self.runtime.retain(value);
        let index = match self.free.pop() {
            Some(index) => {
                self.handles[index] = Some(value);
                index
            }
            None => {
                self.handles.push(Some(value));
                self.handles.len() - 1
            }
        };
        index as PyriteHandle + 1
    }

    /// The value behind a live handle.
    #[must_use]
    pub fn value(&self, handle: PyriteHandle) -> Option<Value> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.handles.get(index).copied().flatten()
    }

    /// Invalidates a handle and drops its pin. Returns whether the handle was live.
    pub fn release_handle(&mut self, handle: PyriteHandle) -> bool {
        let Some(value) = self.value(handle) else { return false };
        let index = (handle - 1) as usize;
        self.handles[index] = None;
        self.free.push(index);
        self.runtime.release(value);
        true
    }

    /// The error recorded by the last failing call, if not yet cleared.
    #[must_use]
    pub fn last_error(&self) -> Option<&Exception> {
        self.last_error.as_ref()
    }

    /// Records the outcome of an operation, mapping success to a fresh handle.
    fn finish(&mut self, result: RunResult<Value>) -> PyriteHandle {
        match result {
            Ok(value) => self.handle(value),
            Err(err) => {
                self.last_error = Some(self.runtime.describe_error(err));
                0
            }
        }
    }

    fn missing_handle(&mut self) -> PyriteHandle {
        self.last_error = Some(Exception::new(
            "SystemError",
            crate::FailureKind::Internal,
            Some("bad handle passed to native interface".to_owned()),
        ));
        0
    }

    fn get_attr(&mut self, obj: PyriteHandle, name: &str) -> PyriteHandle {
        let Some(obj) = self.value(obj) else { return self.missing_handle() };
        let result = ObjectProtocol::get_attr(&mut self.runtime, obj, name);
        self.finish(result)
    }

    fn set_attr(&mut self, obj: PyriteHandle, name: &str, value: PyriteHandle) -> c_int {
        let (Some(obj), Some(value)) = (self.value(obj), self.value(value)) else {
            self.missing_handle();
            return -1;
        };
        match ObjectProtocol::set_attr(&mut self.runtime, obj, name, value) {
            Ok(()) => 0,
            Err(err) => {
                self.last_error = Some(self.runtime.describe_error(err));
                -1
            }
        }
    }

    fn call(&mut self, callable: PyriteHandle, args: &[PyriteHandle]) -> PyriteHandle {
        let Some(callable) = self.value(callable) else { return self.missing_handle() };
        let Some(args) = args.iter().map(|&h| self.value(h)).collect::<Option<Vec<_>>>() else {
            return self.missing_handle();
        };
        let result = ObjectProtocol::call_object(&mut self.runtime, callable, &args);
        self.finish(result)
    }

    fn get_type(&mut self, obj: PyriteHandle) -> PyriteHandle {
        let Some(obj) = self.value(obj) else { return self.missing_handle() };
        let ty = ObjectProtocol::get_type(&self.runtime, obj);
        self.handle(ty)
    }
}

/// Converts a C string argument, recording an error for null or non-UTF-8 input.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the duration of the call.
unsafe fn c_str<'a>(rt: &mut PyriteRuntime, ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        rt.missing_handle();
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let s = unsafe { CStr::from_ptr(ptr) }.to_str().ok();
    if s.is_none() {
        rt.last_error = Some(Exception::new(
            "UnicodeDecodeError",
            crate::FailureKind::TypeMismatch,
            Some("attribute name is not valid UTF-8".to_owned()),
        ));
    }
    s
}

/// Creates a runtime. Free it with [`pyrite_runtime_free`].
#[unsafe(no_mangle)]
pub extern "C" fn pyrite_runtime_new() -> *mut PyriteRuntime {
    Box::into_raw(Box::new(PyriteRuntime::new()))
}

/// # Safety
/// `rt` must be null or a pointer returned by [`pyrite_runtime_new`] not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_runtime_free(rt: *mut PyriteRuntime) {
    if !rt.is_null() {
        // SAFETY: the pointer came from `Box::into_raw` and is freed once.
        drop(unsafe { Box::from_raw(rt) });
    }
}

/// `getattr(obj, name)`; returns a new handle, or `0` with the error recorded.
///
/// # Safety
/// `rt` must be a live runtime pointer and `name` a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_get_attr(rt: *mut PyriteRuntime, obj: PyriteHandle, name: *const c_char) -> PyriteHandle {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    // SAFETY: forwarded caller contract.
    let Some(name) = (unsafe { c_str(rt, name) }) else { return 0 };
    rt.get_attr(obj, name)
}

/// `setattr(obj, name, value)`; returns `0` on success and `-1` with the error recorded.
///
/// # Safety
/// `rt` must be a live runtime pointer and `name` a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_set_attr(
    rt: *mut PyriteRuntime,
    obj: PyriteHandle,
    name: *const c_char,
    value: PyriteHandle,
) -> c_int {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    // SAFETY: forwarded caller contract.
    let Some(name) = (unsafe { c_str(rt, name) }) else { return -1 };
    rt.set_attr(obj, name, value)
}

/// `callable(*args)`; returns a new handle, or `0` with the error recorded.
///
/// # Safety
/// `rt` must be a live runtime pointer; `args` must point to `nargs` handles (or be null
/// when `nargs` is `0`).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_call_object(
    rt: *mut PyriteRuntime,
    callable: PyriteHandle,
    args: *const PyriteHandle,
    nargs: usize,
) -> PyriteHandle {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    let args = if nargs == 0 {
        &[][..]
    } else {
        // SAFETY: `args` points to `nargs` initialized handles per the caller contract.
        unsafe { std::slice::from_raw_parts(args, nargs) }
    };
    rt.call(callable, args)
}

/// `type(obj)`; returns a new handle, or `0` for a bad handle.
///
/// # Safety
/// `rt` must be a live runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_get_type(rt: *mut PyriteRuntime, obj: PyriteHandle) -> PyriteHandle {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    rt.get_type(obj)
}

/// Looks up a global, falling back to builtins; `0` with a `NameError` recorded if neither has it.
///
/// # Safety
/// `rt` must be a live runtime pointer and `name` a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_lookup_name(rt: *mut PyriteRuntime, name: *const c_char) -> PyriteHandle {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    // SAFETY: forwarded caller contract.
    let Some(name) = (unsafe { c_str(rt, name) }) else { return 0 };
    let found = rt.runtime.get_global(name).or_else(|| rt.runtime.builtin(name));
    match found {
        Some(value) => rt.handle(value),
        None => {
            rt.last_error = Some(Exception::new(
                "NameError",
                crate::FailureKind::Raised,
                Some(format!("name '{name}' is not defined")),
            ));
            0
        }
    }
}

/// A handle to an `int`.
///
/// # Safety
/// `rt` must be a live runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_from_int(rt: *mut PyriteRuntime, value: i64) -> PyriteHandle {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    rt.handle(Value::Int(value))
}

/// Reads an `int` (or `bool`) handle into `out`; returns `0` on success, `-1` otherwise.
///
/// # Safety
/// `rt` must be a live runtime pointer and `out` valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_as_int(rt: *mut PyriteRuntime, handle: PyriteHandle, out: *mut i64) -> c_int {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    match rt.value(handle).and_then(Value::as_int) {
        Some(i) => {
            // SAFETY: `out` is valid for a write per the caller contract.
            unsafe { out.write(i) };
            0
        }
        None => -1,
    }
}

/// Invalidates a handle. Returns `1` if it was live, `0` otherwise.
///
/// # Safety
/// `rt` must be a live runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_release_handle(rt: *mut PyriteRuntime, handle: PyriteHandle) -> c_int {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    c_int::from(rt.release_handle(handle))
}

/// `1` if a call recorded an error that has not been cleared.
///
/// # Safety
/// `rt` must be a live runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_error_occurred(rt: *const PyriteRuntime) -> c_int {
    // SAFETY: the caller passes a live runtime.
    let rt = unsafe { &*rt };
    c_int::from(rt.last_error.is_some())
}

/// Discards the recorded error.
///
/// # Safety
/// `rt` must be a live runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pyrite_error_clear(rt: *mut PyriteRuntime) {
    // SAFETY: the caller passes a live, exclusively borrowed runtime.
    let rt = unsafe { &mut *rt };
    rt.last_error = None;
}
