//! Global transaction clock, visibility horizons, and the snapshot LWM.
//!
//! Workers run one logical transaction at a time. Each worker publishes a
//! monotonically increasing *visibility horizon*: while a transaction is
//! active the horizon equals its timestamp, after it finishes the horizon
//! moves one past it. Every transaction of a worker with an id strictly
//! below that worker's horizon has finished, so visibility checks reduce
//! to a single comparison against either a live horizon (read committed,
//! write intents) or a horizon captured at transaction start (snapshot
//! isolation).
//!
//! Bit 63 of the published word doubles as the read-committed-safety flag:
//! it is set while the worker is idle or running under read committed, and
//! update-version elision requires it on every worker.
//!
//! The global snapshot low-water mark is derived from the *snapshot
//! floors* of active transactions: a snapshot-isolated reader's floor is
//! the smallest horizon it captured, so every transaction at or below
//! `floor - 1` is visible to it. The mark is the minimum floor minus one
//! (or the clock when nothing pins a snapshot) and never moves backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use chain_common::{TxnId, WorkerId};

/// High bit of a published horizon word: the worker currently cannot need
/// any historical version (idle or read committed).
pub const RC_SAFE_BIT: u64 = 1 << 63;

const HORIZON_MASK: u64 = RC_SAFE_BIT - 1;

/// Sentinel for "no pinned snapshot" in the per-worker floor table.
const NO_SNAPSHOT: u64 = u64::MAX;

/// Shared commit/snapshot tracking state.
#[derive(Debug)]
pub struct GlobalState {
    /// Last issued transaction timestamp.
    tx_clock: AtomicU64,
    /// Per-worker visibility horizon, with [`RC_SAFE_BIT`] mixed in.
    horizons: Vec<AtomicU64>,
    /// Per-worker snapshot floor of the active transaction (`NO_SNAPSHOT`
    /// when idle or read committed); feeds the low-water mark.
    snapshot_floors: Vec<AtomicU64>,
    /// Global snapshot low-water mark: the newest transaction id whose
    /// effects every still-active transaction can observe. Monotonic.
    snapshot_lwm: AtomicU64,
}

impl GlobalState {
    /// Creates tracking state for `workers` workers.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            tx_clock: AtomicU64::new(0),
            horizons: (0..workers)
                .map(|_| AtomicU64::new(1 | RC_SAFE_BIT))
                .collect(),
            snapshot_floors: (0..workers).map(|_| AtomicU64::new(NO_SNAPSHOT)).collect(),
            snapshot_lwm: AtomicU64::new(0),
        }
    }

    /// Returns the number of tracked workers.
    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.horizons.len()
    }

    /// Issues the next transaction timestamp.
    #[must_use]
    pub fn next_tts(&self) -> TxnId {
        TxnId::new(self.tx_clock.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns the last issued transaction timestamp.
    #[must_use]
    pub fn current_clock(&self) -> TxnId {
        TxnId::new(self.tx_clock.load(Ordering::SeqCst))
    }

    /// Returns a worker's live visibility horizon (safety bit masked off).
    #[inline]
    #[must_use]
    pub fn live_horizon(&self, worker: WorkerId) -> u64 {
        self.horizons[worker.index()].load(Ordering::Acquire) & HORIZON_MASK
    }

    /// Returns true if every worker currently signals read-committed
    /// safety.
    #[must_use]
    pub fn rc_safe_everywhere(&self) -> bool {
        self.horizons
            .iter()
            .all(|h| h.load(Ordering::Acquire) & RC_SAFE_BIT != 0)
    }

    /// Publishes the start of a transaction on `worker`.
    pub fn publish_active(&self, worker: WorkerId, tts: TxnId, rc_safe: bool) {
        let word = tts.as_u64() | if rc_safe { RC_SAFE_BIT } else { 0 };
        self.horizons[worker.index()].store(word, Ordering::Release);
    }

    /// Pins the snapshot floor of the active transaction on `worker`.
    ///
    /// Called after the transaction captured its snapshot; `floor` is the
    /// smallest captured horizon.
    pub fn pin_snapshot(&self, worker: WorkerId, floor: u64) {
        self.snapshot_floors[worker.index()].store(floor, Ordering::Release);
        self.recompute_lwm();
    }

    /// Publishes the end (commit or rollback) of a transaction on `worker`.
    pub fn publish_finished(&self, worker: WorkerId, tts: TxnId) {
        let word = (tts.as_u64() + 1) | RC_SAFE_BIT;
        self.horizons[worker.index()].store(word, Ordering::Release);
        self.snapshot_floors[worker.index()].store(NO_SNAPSHOT, Ordering::Release);
        self.recompute_lwm();
    }

    /// Captures the per-worker horizons for a snapshot-isolated reader.
    #[must_use]
    pub fn capture_snapshot(&self) -> Vec<u64> {
        self.horizons
            .iter()
            .map(|h| h.load(Ordering::Acquire) & HORIZON_MASK)
            .collect()
    }

    /// Returns the global snapshot low-water mark.
    #[inline]
    #[must_use]
    pub fn snapshot_lwm(&self) -> TxnId {
        TxnId::new(self.snapshot_lwm.load(Ordering::Acquire))
    }

    /// Recomputes the low-water mark from the pinned snapshot floors.
    ///
    /// With no pinned snapshot the mark advances to the current clock: any
    /// finished transaction's garbage is then collectable.
    pub fn recompute_lwm(&self) {
        let mut floor = u64::MAX;
        for pinned in &self.snapshot_floors {
            floor = floor.min(pinned.load(Ordering::Acquire));
        }
        let candidate = if floor == NO_SNAPSHOT {
            self.tx_clock.load(Ordering::SeqCst)
        } else {
            // Transactions strictly below the floor are visible to every
            // pinned snapshot.
            floor.saturating_sub(1)
        };
        self.snapshot_lwm.fetch_max(candidate, Ordering::AcqRel);
    }
}
