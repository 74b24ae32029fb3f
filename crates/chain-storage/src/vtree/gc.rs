//! Garbage collection.
//!
//! Two paths reclaim tombstones and stale version slots:
//!
//! - **Precise page-wise GC** scans every slot of a leaf. Primaries
//!   (chain sequence 0) that are tombstoned and whose writer fell at or
//!   below the global snapshot low-water mark are excised; in-leaf
//!   secondary version slots go once their `gc_trigger` passes the mark.
//!   The scan records the page's garbage estimate, bumps the page
//!   sequence number when it changed anything, and reports whether every
//!   primary head is invisible to the caller (the pager uses that to
//!   evict or merge aggressively).
//! - **Point GC** runs post-commit from staged remove TODOs. The staged
//!   dangling pointer (frame, expected latch version, slot) allows
//!   excising the tombstone without a descent; on any mismatch it falls
//!   back to a keyed seek.

use std::sync::Weak;

use tracing::debug;

use chain_common::{OpResult, PageId, TxnId, WorkerId};
use chain_mvcc::{SpaceCheckResult, Worker};

use crate::buffer::{BufferFrame, ExclusiveGuard};

use super::operator::{chain_key, split_chain_key, VersionedTree};
use super::tuple::{TupleFormat, TupleRef, VersionRef};

/// Optimistic locator for a tombstone staged for point GC.
#[derive(Debug, Clone)]
pub(crate) struct DanglingPointer {
    /// Frame the tombstone lived on when staged.
    pub frame: Weak<BufferFrame>,
    /// Latch version the frame must still carry.
    pub expected_version: u64,
    /// Slot index of the tombstone.
    pub slot: usize,
}

impl VersionedTree {
    /// Returns true if the leaf's recorded garbage exceeds the configured
    /// trigger ratio.
    fn trigger_page_wise_gc(&self, gc_space_used: u32) -> bool {
        let threshold = self.config().gc_garbage_ratio * self.config().page_size as f64;
        f64::from(gc_space_used) >= threshold
    }

    /// Space-utilization callback: runs page-wise GC on `page` when the
    /// trigger fires.
    pub(crate) fn check_space(&self, worker: &Worker, page: PageId) -> SpaceCheckResult {
        let Some(frame) = self.pool().get(page) else {
            return SpaceCheckResult::Nothing;
        };
        if !self.trigger_page_wise_gc(frame.node().read().gc_space_used()) {
            return SpaceCheckResult::Nothing;
        }
        let mut guard = ExclusiveGuard::acquire(&frame);
        let (all_heads_invisible, freed_slots) = self.precise_page_wise_gc(worker, &mut guard);
        if all_heads_invisible {
            SpaceCheckResult::PickAnotherPage
        } else if freed_slots > 0 {
            SpaceCheckResult::RetrySamePage
        } else {
            SpaceCheckResult::Nothing
        }
    }

    /// Scans every slot of the latched leaf, removing collectable
    /// tombstones and version slots. Returns the "all primary heads are
    /// invisible" verdict and the number of freed slots.
    pub(crate) fn precise_page_wise_gc(
        &self,
        worker: &Worker,
        guard: &mut ExclusiveGuard,
    ) -> (bool, usize) {
        let lwm = worker.global().snapshot_lwm();
        let mut all_heads_invisible = true;
        let mut garbage_seen_in_bytes: u32 = 0;
        let mut freed_bytes: u32 = 0;
        let mut freed_slots = 0usize;

        let mut slot = 0;
        while slot < guard.leaf().slot_count() {
            let (_, sn) = split_chain_key(guard.leaf().key_at(slot));
            if sn.is_primary() {
                let tuple = TupleRef::new(guard.leaf().payload_at(slot));
                let (writer, tx_id) = (tuple.worker_id(), tuple.tx_id());
                match tuple.format() {
                    TupleFormat::Chained if tuple.is_removed() => {
                        all_heads_invisible &= worker.is_visible(writer, tx_id, false);
                        let size = guard.leaf().kv_consumed_space(slot) as u32;
                        garbage_seen_in_bytes += size;
                        if tx_id <= lwm {
                            guard.leaf_mut().remove_slot(slot);
                            freed_bytes += size;
                            freed_slots += 1;
                        } else {
                            slot += 1;
                        }
                    }
                    TupleFormat::Chained => {
                        all_heads_invisible &= !worker.is_visible(writer, tx_id, false);
                        slot += 1;
                    }
                    TupleFormat::Fat => {
                        // Stale in-place versions are not reclaimed yet.
                        all_heads_invisible &= !worker.is_visible(writer, tx_id, false);
                        slot += 1;
                    }
                }
            } else {
                let version = VersionRef::new(guard.leaf().payload_at(slot));
                let size = guard.leaf().kv_consumed_space(slot) as u32;
                if version.gc_trigger() <= lwm {
                    guard.leaf_mut().remove_slot(slot);
                    freed_bytes += size;
                    freed_slots += 1;
                } else {
                    garbage_seen_in_bytes += size;
                    slot += 1;
                }
            }
        }

        guard.leaf_mut().set_gc_space_used(garbage_seen_in_bytes);
        let modified = freed_bytes > 0 || all_heads_invisible;
        if modified {
            guard.leaf_mut().bump_page_seq();
            guard.mark_modified();
        }
        if freed_slots > 0 {
            self.counters()
                .add(&self.counters().gc_freed_slots, freed_slots as u64);
            debug!(
                tree = %self.id(),
                freed_bytes,
                garbage_seen_in_bytes,
                "page-wise gc"
            );
        }
        (all_heads_invisible, freed_slots)
    }

    /// Executes a staged point-GC entry: `[token u64][user key]`.
    pub(crate) fn point_todo(
        &self,
        entry: &[u8],
        version_worker: WorkerId,
        version_tts: TxnId,
    ) {
        debug_assert!(entry.len() >= 8);
        let token = u64::from_le_bytes(entry[..8].try_into().expect("token prefix"));
        let key = &entry[8..];
        let pointer = self.dangling.remove(&token).map(|(_, pointer)| pointer);

        if self.config().dangling_pointer {
            if let Some(pointer) = pointer {
                if self.try_point_gc_fast(&pointer, version_worker, version_tts) {
                    return;
                }
            }
        }
        self.point_gc_keyed(key, version_worker, version_tts);
    }

    /// Optimistic fast path: latch the recorded frame only if its version
    /// still matches, then excise the tombstone at the recorded slot.
    fn try_point_gc_fast(
        &self,
        pointer: &DanglingPointer,
        version_worker: WorkerId,
        version_tts: TxnId,
    ) -> bool {
        let Some(frame) = pointer.frame.upgrade() else {
            return false;
        };
        let Ok(mut guard) = ExclusiveGuard::acquire_if_version(&frame, pointer.expected_version)
        else {
            return false;
        };
        // The matching version pins the page contents: the slot still
        // holds the staged tombstone.
        if pointer.slot >= guard.leaf().slot_count() {
            return false;
        }
        let head = TupleRef::new(guard.leaf().payload_at(pointer.slot));
        debug_assert_eq!(head.format(), TupleFormat::Chained);
        debug_assert!(!head.is_write_locked());
        if head.worker_id() != version_worker || head.tx_id() != version_tts {
            return false;
        }
        if head.is_removed() {
            let size = guard.leaf().kv_consumed_space(pointer.slot) as u32;
            guard.leaf_mut().sub_gc_space_used(size);
            guard.leaf_mut().remove_slot(pointer.slot);
            self.counters().add(&self.counters().todo_removed, 1);
        }
        guard.mark_modified();
        true
    }

    /// Keyed fallback: seek the tombstone and excise it if it still
    /// carries the staging transaction's identity.
    fn point_gc_keyed(&self, key: &[u8], version_worker: WorkerId, version_tts: TxnId) {
        let stored_key = chain_key(key);
        let mut iter = self.exclusive_for(&stored_key);
        if iter.seek_exact(&stored_key) != OpResult::Ok {
            // Already collected; a legitimate outcome.
            return;
        }
        let head = TupleRef::new(iter.value());
        if head.format() == TupleFormat::Fat {
            return;
        }
        if head.is_write_locked() {
            return;
        }
        if head.worker_id() == version_worker && head.tx_id() == version_tts && head.is_removed() {
            let size = iter.leaf().kv_consumed_space(iter.slot()) as u32;
            iter.leaf_mut().sub_gc_space_used(size);
            iter.remove_current();
            iter.mark_dirty();
            self.counters().add(&self.counters().todo_removed, 1);
            drop(iter);
            self.merge_for_key(&stored_key);
        }
    }

    /// Releases the worker's 2PL read-lock bit on `key`.
    pub(crate) fn release_read_lock(&self, worker: &Worker, key: &[u8]) {
        let stored_key = chain_key(key);
        let mut iter = self.exclusive_for(&stored_key);
        if iter.seek_exact(&stored_key) != OpResult::Ok {
            return;
        }
        let word = TupleRef::new(iter.value()).read_word();
        let cleared = word & !worker.worker_id().lock_bit();
        if cleared != word {
            super::tuple::TupleMut::new(iter.value_mut()).set_read_word(cleared);
            iter.mark_dirty();
        }
    }

    /// Runs page-wise GC across the whole tree (maintenance sweep) and
    /// purges this tree's versions-store records whose `gc_trigger` fell
    /// at or below the low-water mark. Returns the total number of freed
    /// leaf slots.
    pub fn collect_garbage(&self, worker: &Worker) -> usize {
        let mut frames = Vec::new();
        self.structure()
            .read()
            .for_each_leaf(&mut |frame| frames.push(std::sync::Arc::clone(frame)));
        let mut freed = 0;
        for frame in frames {
            let mut guard = ExclusiveGuard::acquire(&frame);
            let (_, slots) = self.precise_page_wise_gc(worker, &mut guard);
            freed += slots;
        }

        let lwm = worker.global().snapshot_lwm();
        let purged = worker.versions().retain(|key, bytes| {
            key.tree_id != self.id() || VersionRef::new(bytes).gc_trigger() > lwm
        });
        if purged > 0 {
            debug!(tree = %self.id(), purged, "versions-store gc");
        }
        freed
    }
}
