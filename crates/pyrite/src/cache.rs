//! Inline caches for attribute, call, and binary-operator sites.
//!
//! Each site owns an [`InlineCache`] mapping receiver *shapes* to a resolved target. A site
//! moves through `Uninitialized -> Monomorphic -> Polymorphic -> Megamorphic`, strictly
//! forward; once megamorphic it stops caching for good and every execution takes the
//! generic path.
//!
//! Correctness rests on two guards checked on every probe:
//! * the shape: the receiver's type uid (type uids are process-unique and never reused)
//! * the epoch: every entry records the runtime-wide [`Epoch`] observed before its target
//!   was resolved, and any structural change to a type (type dict mutation, `__bases__`
//!   or `__class__` assignment) bumps the epoch, so older entries simply stop matching.
//!
//! Entries are published as an immutable snapshot behind an `RwLock<Arc<_>>`. A reader
//! clones the `Arc` and never observes a half-written entry, so a site can be shared by
//! several threads executing the same code object.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use serde::Serialize;
use smallvec::SmallVec;

use crate::{
    descriptor::{AttrTarget, StoreTarget},
    dispatch::BinaryPlan,
};

/// Default number of distinct shapes a site caches before going megamorphic.
pub const DEFAULT_POLYMORPHIC_LIMIT: usize = 4;

/// Lifecycle state of an inline cache site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CacheState {
    Uninitialized,
    Monomorphic,
    Polymorphic,
    Megamorphic,
}

/// Which kind of operation a site caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SiteKind {
    LoadAttr,
    StoreAttr,
    CallMethod,
    BinaryOp,
}

/// Guard key identifying the receiver "shape" a cached target is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// An ordinary receiver, keyed by the uid of its type.
    Instance(u64),
    /// A class used as a receiver, keyed by the class's own uid.
    Class(u64),
    /// Operand pair of a binary operator, keyed by both type uids.
    Pair(u64, u64),
}

/// Runtime-wide structural version counter.
///
/// Monotonic: a value once observed is never observed again after a bump.
#[derive(Debug, Default)]
pub struct Epoch(AtomicU64);

impl Epoch {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advances the epoch, returning the new value.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Counters and state for one site, as reported to hosts and tracers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SiteStats {
    pub state: CacheState,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
struct GuardEntry<T> {
    shape: Shape,
    epoch: u64,
    target: T,
}

#[derive(Debug)]
struct Snapshot<T> {
    state: CacheState,
    /// Most recently hit first.
    entries: SmallVec<[GuardEntry<T>; DEFAULT_POLYMORPHIC_LIMIT]>,
}

/// Result of probing a site.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Shape and epoch matched; the target is valid.
    Hit(T),
    /// No valid entry; resolve generically and consider installing.
    Miss,
    /// The site has given up; resolve generically and do not install.
    Megamorphic,
}

/// A shape-guarded, epoch-guarded cache of resolved targets.
#[derive(Debug)]
pub struct InlineCache<T> {
    published: RwLock<Arc<Snapshot<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> Default for InlineCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> InlineCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            published: RwLock::new(Arc::new(Snapshot {
                state: CacheState::Uninitialized,
                entries: SmallVec::new(),
            })),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Arc<Snapshot<T>> {
        Arc::clone(&self.published.read())
    }

    #[must_use]
    pub fn state(&self) -> CacheState {
        self.snapshot().state
    }

    #[must_use]
    pub fn stats(&self) -> SiteStats {
        let snapshot = self.snapshot();
        SiteStats {
            state: snapshot.state,
            entries: snapshot.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Looks up `shape` at `epoch`.
    ///
    /// An entry for the right shape but an older epoch is stale and reported as a miss;
    /// [`install`](Self::install) will refresh it in place.
    pub fn probe(&self, shape: Shape, epoch: u64) -> Probe<T> {
        let snapshot = self.snapshot();
        if snapshot.state == CacheState::Megamorphic {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Probe::Megamorphic;
        }
        if let Some(index) = snapshot.entries.iter().position(|e| e.shape == shape) {
            let entry = &snapshot.entries[index];
            if entry.epoch == epoch {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let target = entry.target.clone();
                if index > 0 {
                    self.promote(shape, epoch);
                }
                return Probe::Hit(target);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Probe::Miss
    }

    /// Moves the entry for `shape` to the front so the hottest shape is checked first.
    fn promote(&self, shape: Shape, epoch: u64) {
        let mut published = self.published.write();
        let Some(index) = published.entries.iter().position(|e| e.shape == shape && e.epoch == epoch) else {
            return;
        };
        if index == 0 {
            return;
        }
        let mut entries = published.entries.clone();
        let entry = entries.remove(index);
        entries.insert(0, entry);
        *published = Arc::new(Snapshot {
            state: published.state,
            entries,
        });
    }

    /// Records `target` for `shape`, resolved while the runtime was at `epoch`.
    ///
    /// A new distinct shape beyond `limit` sends the site megamorphic and drops every entry.
    /// Returns `Some((from, to))` when the site changed state.
    pub fn install(&self, shape: Shape, epoch: u64, target: T, limit: usize) -> Option<(CacheState, CacheState)> {
        let mut published = self.published.write();
        let from = published.state;
        if from == CacheState::Megamorphic {
            return None;
        }
        let mut entries = published.entries.clone();
        if let Some(index) = entries.iter().position(|e| e.shape == shape) {
            entries.remove(index);
        } else if entries.len() >= limit.max(1) {
            *published = Arc::new(Snapshot {
                state: CacheState::Megamorphic,
                entries: SmallVec::new(),
            });
            return Some((from, CacheState::Megamorphic));
        }
        entries.insert(0, GuardEntry { shape, epoch, target });
        let to = if entries.len() == 1 {
            // a polymorphic site never goes back to monomorphic
            if from == CacheState::Polymorphic {
                CacheState::Polymorphic
            } else {
                CacheState::Monomorphic
            }
        } else {
            CacheState::Polymorphic
        };
        *published = Arc::new(Snapshot { state: to, entries });
        (from != to).then_some((from, to))
    }
}

/// Cache for an attribute load site (`obj.name`).
#[derive(Debug, Default)]
pub struct AttributeSite(pub(crate) InlineCache<AttrTarget>);

/// Cache for an attribute store site (`obj.name = value`).
#[derive(Debug, Default)]
pub struct StoreSite(pub(crate) InlineCache<StoreTarget>);

/// Cache for a method call site (`obj.name(args)`).
#[derive(Debug, Default)]
pub struct CallSite(pub(crate) InlineCache<AttrTarget>);

/// Cache for a binary operator site (`a + b`).
#[derive(Debug, Default)]
pub struct BinarySite(pub(crate) InlineCache<BinaryPlan>);

macro_rules! site_accessors {
    ($($site:ident),*) => {
        $(
            impl $site {
                #[must_use]
                pub fn new() -> Self {
                    Self(InlineCache::new())
                }

                #[must_use]
                pub fn state(&self) -> CacheState {
                    self.0.state()
                }

                #[must_use]
                pub fn stats(&self) -> SiteStats {
                    self.0.stats()
                }
            }
        )*
    };
}

site_accessors!(AttributeSite, StoreSite, CallSite, BinarySite);

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> InlineCache<u32> {
        InlineCache::new()
    }

    #[test]
    fn starts_uninitialized_and_misses() {
        let c = cache();
        assert_eq!(c.state(), CacheState::Uninitialized);
        assert_eq!(c.probe(Shape::Instance(1), 0), Probe::Miss);
    }

    #[test]
    fn walks_states_forward_to_megamorphic() {
        let c = cache();
        assert_eq!(
            c.install(Shape::Instance(1), 0, 10, 2),
            Some((CacheState::Uninitialized, CacheState::Monomorphic))
        );
        assert_eq!(
            c.install(Shape::Instance(2), 0, 20, 2),
            Some((CacheState::Monomorphic, CacheState::Polymorphic))
        );
        assert_eq!(
            c.install(Shape::Instance(3), 0, 30, 2),
            Some((CacheState::Polymorphic, CacheState::Megamorphic))
        );
        assert_eq!(c.probe(Shape::Instance(1), 0), Probe::Megamorphic);
        assert_eq!(c.install(Shape::Instance(1), 0, 10, 2), None);
        assert_eq!(c.state(), CacheState::Megamorphic);
        assert_eq!(c.stats().entries, 0);
    }

    #[test]
    fn limit_one_skips_polymorphic() {
        let c = cache();
        c.install(Shape::Instance(1), 0, 1, 1);
        assert_eq!(
            c.install(Shape::Instance(2), 0, 2, 1),
            Some((CacheState::Monomorphic, CacheState::Megamorphic))
        );
    }

    #[test]
    fn stale_epoch_misses_and_refreshes_in_place() {
        let c = cache();
        c.install(Shape::Instance(7), 3, 1, 4);
        assert_eq!(c.probe(Shape::Instance(7), 3), Probe::Hit(1));
        assert_eq!(c.probe(Shape::Instance(7), 4), Probe::Miss);
        // refreshing the same shape is not a new shape and causes no transition
        assert_eq!(c.install(Shape::Instance(7), 4, 2, 4), None);
        assert_eq!(c.probe(Shape::Instance(7), 4), Probe::Hit(2));
        assert_eq!(c.stats().entries, 1);
    }

    #[test]
    fn repeated_hits_do_not_change_state() {
        let c = cache();
        c.install(Shape::Class(5), 0, 9, 4);
        for _ in 0..100 {
            assert_eq!(c.probe(Shape::Class(5), 0), Probe::Hit(9));
        }
        let stats = c.stats();
        assert_eq!(stats.state, CacheState::Monomorphic);
        assert_eq!(stats.hits, 100);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn hot_shape_moves_to_front() {
        let c = cache();
        c.install(Shape::Instance(1), 0, 1, 4);
        c.install(Shape::Instance(2), 0, 2, 4);
        // entry 1 is now second; hitting it promotes it
        assert_eq!(c.probe(Shape::Instance(1), 0), Probe::Hit(1));
        let snapshot = c.snapshot();
        assert_eq!(snapshot.entries[0].shape, Shape::Instance(1));
        assert_eq!(snapshot.state, CacheState::Polymorphic);
    }

    #[test]
    fn shapes_are_distinguished_by_kind() {
        let c = cache();
        c.install(Shape::Instance(1), 0, 1, 4);
        assert_eq!(c.probe(Shape::Class(1), 0), Probe::Miss);
        assert_eq!(c.probe(Shape::Pair(1, 1), 0), Probe::Miss);
    }

    #[test]
    fn epoch_is_monotonic() {
        let epoch = Epoch::new();
        assert_eq!(epoch.current(), 0);
        assert_eq!(epoch.bump(), 1);
        assert_eq!(epoch.bump(), 2);
        assert_eq!(epoch.current(), 2);
    }
}
