//! Per-tree telemetry counters.
//!
//! Plain atomics bumped on the hot paths and surfaced both through
//! [`TreeCounters::snapshot`] and as `tracing` debug events from the
//! garbage collector.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one tree.
#[derive(Debug, Default)]
pub struct TreeCounters {
    /// Chains read (lookups and scan steps reaching a primary).
    pub read_chains: AtomicU64,
    /// Versions visited while reconstructing, including the primary.
    pub read_versions_visited: AtomicU64,
    /// Chained updates performed.
    pub update_chains: AtomicU64,
    /// Secondary versions created by updates and removes.
    pub versions_created: AtomicU64,
    /// Slots reclaimed by page-wise garbage collection.
    pub gc_freed_slots: AtomicU64,
    /// Tombstones excised by point garbage collection.
    pub todo_removed: AtomicU64,
}

/// A point-in-time copy of [`TreeCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Chains read.
    pub read_chains: u64,
    /// Versions visited while reconstructing.
    pub read_versions_visited: u64,
    /// Chained updates performed.
    pub update_chains: u64,
    /// Secondary versions created.
    pub versions_created: u64,
    /// Slots reclaimed by page-wise GC.
    pub gc_freed_slots: u64,
    /// Tombstones excised by point GC.
    pub todo_removed: u64,
}

impl TreeCounters {
    #[inline]
    pub(crate) fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Takes a consistent-enough copy for telemetry.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            read_chains: self.read_chains.load(Ordering::Relaxed),
            read_versions_visited: self.read_versions_visited.load(Ordering::Relaxed),
            update_chains: self.update_chains.load(Ordering::Relaxed),
            versions_created: self.versions_created.load(Ordering::Relaxed),
            gc_freed_slots: self.gc_freed_slots.load(Ordering::Relaxed),
            todo_removed: self.todo_removed.load(Ordering::Relaxed),
        }
    }
}
