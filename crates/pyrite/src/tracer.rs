//! Dispatch tracing infrastructure.
//!
//! The runtime is parameterized over a [`DispatchTracer`] and calls its hooks at the events that
//! matter for the object model: instruction dispatch, calls, inline-cache hits, misses and state
//! transitions, epoch bumps, handled-exception pushes and pops, and collections. With
//! [`NoopTracer`] every hook monomorphizes away.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable event log to stderr |
//! | [`ProfilingTracer`] | Counters: opcodes, cache hit rates, transitions, max depth |
//! | [`RecordingTracer`] | Full event recording for tests and post-mortem analysis |
//!
//! ```ignore
//! let mut runtime = Runtime::with_tracer(RuntimeConfig::default(), ProfilingTracer::new());
//! runtime.execute(&code)?;
//! println!("{}", runtime.tracer().report());
//! ```

use std::collections::HashMap;

use serde::Serialize;

use crate::cache::{CacheState, SiteKind};

/// Event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TraceEvent {
    Instruction {
        ip: usize,
        op: &'static str,
        stack_depth: usize,
    },
    Call {
        func_name: String,
        depth: usize,
    },
    Return {
        depth: usize,
    },
    CacheHit {
        kind: SiteKind,
        state: CacheState,
    },
    CacheMiss {
        kind: SiteKind,
        state: CacheState,
    },
    CacheTransition {
        kind: SiteKind,
        from: CacheState,
        to: CacheState,
    },
    /// A structural mutation advanced the epoch to this value.
    EpochBump {
        epoch: u64,
    },
    ExceptionPush {
        depth: usize,
    },
    ExceptionPop {
        depth: usize,
    },
    Collect {
        freed: usize,
    },
}

/// Hooks called by the runtime at dispatch events.
///
/// All methods default to no-ops; implementations override what they need.
pub trait DispatchTracer: std::fmt::Debug {
    /// Called before each instruction in the interpreter loop. This is the hottest hook.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _op: &'static str, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a Python function frame is entered.
    #[inline(always)]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// Called when a Python function frame is left, normally or by an exception.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// A cache site answered from a valid entry.
    #[inline(always)]
    fn on_cache_hit(&mut self, _kind: SiteKind, _state: CacheState) {}

    /// A cache site fell back to generic resolution. `state` is the state before any install.
    #[inline(always)]
    fn on_cache_miss(&mut self, _kind: SiteKind, _state: CacheState) {}

    #[inline(always)]
    fn on_cache_transition(&mut self, _kind: SiteKind, _from: CacheState, _to: CacheState) {}

    #[inline(always)]
    fn on_epoch_bump(&mut self, _epoch: u64) {}

    /// # Arguments
    /// * `depth` - Handled-exception stack depth after the push
    #[inline(always)]
    fn on_exception_push(&mut self, _depth: usize) {}

    /// # Arguments
    /// * `depth` - Handled-exception stack depth after the pop
    #[inline(always)]
    fn on_exception_pop(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_collect(&mut self, _freed: usize) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl DispatchTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints a human-readable event log to stderr.
///
/// ```text
/// [    0] LoadAttr          stack=1  frames=1
///   ... MISS LoadAttr (Uninitialized)
///   ~~~ LoadAttr Uninitialized -> Monomorphic
///   >>> CALL area                 depth=2
///   <<< RETURN              depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Stop after this many events. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops printing after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if self.stopped {
            return;
        }
        eprintln!("{line}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} events) ---");
            self.stopped = true;
        }
    }
}

impl DispatchTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, op: &'static str, stack_depth: usize, frame_depth: usize) {
        self.emit(format_args!("[{ip:>5}] {op:<17} stack={stack_depth}  frames={frame_depth}"));
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        self.emit(format_args!("  >>> CALL {func_name:<20} depth={depth}"));
    }

    fn on_return(&mut self, depth: usize) {
        self.emit(format_args!("  <<< RETURN              depth={depth}"));
    }

    fn on_cache_miss(&mut self, kind: SiteKind, state: CacheState) {
        self.emit(format_args!("  ... MISS {kind:?} ({state:?})"));
    }

    fn on_cache_transition(&mut self, kind: SiteKind, from: CacheState, to: CacheState) {
        self.emit(format_args!("  ~~~ {kind:?} {from:?} -> {to:?}"));
    }

    fn on_epoch_bump(&mut self, epoch: u64) {
        self.emit(format_args!("  !!! EPOCH {epoch}"));
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Tracer that collects counters for profiling.
///
/// Retrieve results via [`ProfilingTracer::report`] after execution.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    op_counts: HashMap<&'static str, u64>,
    total_instructions: u64,
    total_calls: u64,
    max_depth: usize,
    hits: HashMap<SiteKind, u64>,
    misses: HashMap<SiteKind, u64>,
    transitions: HashMap<(SiteKind, CacheState), u64>,
    epoch_bumps: u64,
    collections: u64,
    freed_objects: u64,
}

/// Summary report from a profiling trace.
#[derive(Debug, Clone, Serialize)]
pub struct ProfilingReport {
    /// Per-op counts, most executed first.
    pub op_counts: Vec<(&'static str, u64)>,
    pub total_instructions: u64,
    pub total_calls: u64,
    pub max_depth: usize,
    /// `(kind, hits, misses)` per site kind that saw traffic.
    pub cache_traffic: Vec<(SiteKind, u64, u64)>,
    /// How many sites entered each state.
    pub transitions: Vec<(SiteKind, CacheState, u64)>,
    pub epoch_bumps: u64,
    pub collections: u64,
    pub freed_objects: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut op_counts: Vec<_> = self.op_counts.iter().map(|(&k, &v)| (k, v)).collect();
        op_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let mut kinds: Vec<SiteKind> = self.hits.keys().chain(self.misses.keys()).copied().collect();
        kinds.sort();
        kinds.dedup();
        let cache_traffic = kinds
            .into_iter()
            .map(|k| {
                (
                    k,
                    self.hits.get(&k).copied().unwrap_or(0),
                    self.misses.get(&k).copied().unwrap_or(0),
                )
            })
            .collect();
        let mut transitions: Vec<_> = self.transitions.iter().map(|(&(k, s), &n)| (k, s, n)).collect();
        transitions.sort();
        ProfilingReport {
            op_counts,
            total_instructions: self.total_instructions,
            total_calls: self.total_calls,
            max_depth: self.max_depth,
            cache_traffic,
            transitions,
            epoch_bumps: self.epoch_bumps,
            collections: self.collections,
            freed_objects: self.freed_objects,
        }
    }
}

impl DispatchTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, op: &'static str, _stack_depth: usize, _frame_depth: usize) {
        *self.op_counts.entry(op).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    #[inline]
    fn on_call(&mut self, _func_name: &str, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    #[inline]
    fn on_cache_hit(&mut self, kind: SiteKind, _state: CacheState) {
        *self.hits.entry(kind).or_insert(0) += 1;
    }

    fn on_cache_miss(&mut self, kind: SiteKind, _state: CacheState) {
        *self.misses.entry(kind).or_insert(0) += 1;
    }

    fn on_cache_transition(&mut self, kind: SiteKind, _from: CacheState, to: CacheState) {
        *self.transitions.entry((kind, to)).or_insert(0) += 1;
    }

    fn on_epoch_bump(&mut self, _epoch: u64) {
        self.epoch_bumps += 1;
    }

    fn on_collect(&mut self, freed: usize) {
        self.collections += 1;
        self.freed_objects += freed as u64;
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f, "Epoch bumps:        {}", self.epoch_bumps)?;
        writeln!(f, "Collections:        {} ({} freed)", self.collections, self.freed_objects)?;
        writeln!(f)?;
        writeln!(f, "--- Inline Caches ---")?;
        for (kind, hits, misses) in &self.cache_traffic {
            let total = hits + misses;
            let rate = if total == 0 { 0.0 } else { *hits as f64 / total as f64 * 100.0 };
            writeln!(f, "  {kind:<12?} hits={hits:>8} misses={misses:>8}  ({rate:>5.1}% hit)")?;
        }
        for (kind, state, count) in &self.transitions {
            writeln!(f, "  {kind:<12?} -> {state:<14?} {count:>6}")?;
        }
        writeln!(f)?;
        writeln!(f, "--- Op Frequency ---")?;
        for (op, count) in &self.op_counts {
            let pct = (*count as f64 / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {op:<20} {count:>10}  ({pct:>5.1}%)")?;
        }
        Ok(())
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event except instruction dispatch, which is opt-in.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
    instructions: bool,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
            instructions: false,
        }
    }

    /// Also records one event per executed instruction.
    #[must_use]
    pub fn with_instructions(mut self) -> Self {
        self.instructions = true;
        self
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl DispatchTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: usize, op: &'static str, stack_depth: usize, _frame_depth: usize) {
        if self.instructions {
            self.record(TraceEvent::Instruction { ip, op, stack_depth });
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            func_name: func_name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_cache_hit(&mut self, kind: SiteKind, state: CacheState) {
        self.record(TraceEvent::CacheHit { kind, state });
    }

    fn on_cache_miss(&mut self, kind: SiteKind, state: CacheState) {
        self.record(TraceEvent::CacheMiss { kind, state });
    }

    fn on_cache_transition(&mut self, kind: SiteKind, from: CacheState, to: CacheState) {
        self.record(TraceEvent::CacheTransition { kind, from, to });
    }

    fn on_epoch_bump(&mut self, epoch: u64) {
        self.record(TraceEvent::EpochBump { epoch });
    }

    fn on_exception_push(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPush { depth });
    }

    fn on_exception_pop(&mut self, depth: usize) {
        self.record(TraceEvent::ExceptionPop { depth });
    }

    fn on_collect(&mut self, freed: usize) {
        self.record(TraceEvent::Collect { freed });
    }
}
