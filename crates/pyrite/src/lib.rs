#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "handle and slot widths are checked")]
// first: every other module allocates through it
mod heap;

mod builtins;
mod bytecode;
pub mod capi;
mod cache;
mod descriptor;
mod dispatch;
mod exc_state;
mod exception_private;
mod exception_public;
mod intern;
mod object_model;
mod resource;
mod runtime;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    builtins::{Builtin, BuiltinFunction, BuiltinMethod, GetSet},
    bytecode::{Code, CodeBuilder, Const, JumpLabel, JumpTarget, Op, Site},
    cache::{AttributeSite, BinarySite, CacheState, CallSite, DEFAULT_POLYMORPHIC_LIMIT, SiteKind, SiteStats, StoreSite},
    dispatch::{BinaryOp, CompareOp, IterStep},
    exception_private::{ExcType, FailureKind, RunError, RunResult},
    exception_public::{ExcInfo, Exception, StackFrame},
    heap::{Finalizer, HeapDiff, HeapId, HeapStats},
    intern::{StringId, intern},
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, MAX_INHERITANCE_DEPTH, MAX_MRO_LENGTH, ResourceError, ResourceLimits,
        RuntimeConfig,
    },
    runtime::Runtime,
    tracer::{DispatchTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent},
    types::TypeFlags,
    value::Value,
};
