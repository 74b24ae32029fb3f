//! Leaf iterators.
//!
//! Thin positioned wrappers over a latched leaf, mirroring the seek /
//! mutate surface the leaf operator drives: exact and insertion seeks,
//! payload access, resize, and slot removal. Structural operations
//! (splits, merges) are tree-level and require the iterator to be
//! dropped first; the operator's restart loops re-seek afterwards.

use std::sync::Arc;

use chain_common::OpResult;

use crate::buffer::{BufferFrame, ExclusiveGuard, SharedGuard};
use crate::page::LeafPage;

/// Exclusive (mutating) leaf iterator.
pub(crate) struct ExclusiveIterator {
    guard: ExclusiveGuard,
    slot: Option<usize>,
    insert_pos: usize,
}

impl ExclusiveIterator {
    pub fn new(guard: ExclusiveGuard) -> Self {
        Self {
            guard,
            slot: None,
            insert_pos: 0,
        }
    }

    pub fn leaf(&self) -> &LeafPage {
        self.guard.leaf()
    }

    pub fn leaf_mut(&mut self) -> &mut LeafPage {
        self.guard.leaf_mut()
    }

    pub fn frame(&self) -> &Arc<BufferFrame> {
        self.guard.frame()
    }

    /// Slot the iterator is positioned on.
    ///
    /// # Panics
    ///
    /// Panics if no seek succeeded.
    pub fn slot(&self) -> usize {
        self.slot.expect("iterator is not positioned")
    }

    /// Positions on `key` exactly.
    pub fn seek_exact(&mut self, key: &[u8]) -> OpResult {
        match self.guard.leaf().lower_bound(key) {
            Ok(slot) => {
                self.slot = Some(slot);
                OpResult::Ok
            }
            Err(_) => {
                self.slot = None;
                OpResult::NotFound
            }
        }
    }

    /// Positions for inserting `key`: `Duplicate` (positioned on the
    /// existing record) or `Ok` (insertion point remembered).
    pub fn seek_to_insert(&mut self, key: &[u8]) -> OpResult {
        match self.guard.leaf().lower_bound(key) {
            Ok(slot) => {
                self.slot = Some(slot);
                OpResult::Duplicate
            }
            Err(pos) => {
                self.slot = None;
                self.insert_pos = pos;
                OpResult::Ok
            }
        }
    }

    /// Checks whether the current leaf can fit a record.
    pub fn enough_space(&self, key: &[u8], payload_len: usize) -> OpResult {
        if self.guard.leaf().can_fit(key.len(), payload_len) {
            OpResult::Ok
        } else {
            OpResult::NotEnoughSpace
        }
    }

    /// Inserts at the remembered insertion point and positions on the new
    /// slot, returning the zeroed payload area.
    ///
    /// # Panics
    ///
    /// Panics if the leaf cannot fit the record (checked beforehand via
    /// [`Self::enough_space`]).
    pub fn insert_in_current(&mut self, key: &[u8], payload_len: usize) -> &mut [u8] {
        let pos = self.insert_pos;
        self.slot = Some(pos);
        self.guard
            .leaf_mut()
            .insert(pos, key, payload_len)
            .expect("space was checked before inserting")
    }

    /// Returns the current record's payload.
    pub fn value(&self) -> &[u8] {
        self.guard.leaf().payload_at(self.slot())
    }

    /// Returns the current record's payload mutably.
    pub fn value_mut(&mut self) -> &mut [u8] {
        let slot = self.slot();
        self.guard.leaf_mut().payload_mut_at(slot)
    }

    /// Shrinks the current record's payload.
    pub fn shorten(&mut self, new_len: usize) {
        let slot = self.slot();
        self.guard.leaf_mut().shorten_payload(slot, new_len);
    }

    /// Grows the current record's payload; false if the leaf is full.
    pub fn extend(&mut self, new_len: usize) -> bool {
        let slot = self.slot();
        self.guard.leaf_mut().extend_payload(slot, new_len)
    }

    /// Removes the current record.
    pub fn remove_current(&mut self) -> OpResult {
        let slot = self.slot();
        self.guard.leaf_mut().remove_slot(slot);
        self.slot = None;
        OpResult::Ok
    }

    /// Marks the page dirty and bumps the frame version (once).
    pub fn mark_dirty(&mut self) {
        self.guard.mark_modified();
    }
}

/// Shared (read-only) leaf iterator.
pub(crate) struct SharedIterator {
    guard: SharedGuard,
    slot: Option<usize>,
}

impl SharedIterator {
    pub fn new(guard: SharedGuard) -> Self {
        Self { guard, slot: None }
    }

    /// Positions on `key` exactly.
    pub fn seek_exact(&mut self, key: &[u8]) -> OpResult {
        match self.guard.leaf().lower_bound(key) {
            Ok(slot) => {
                self.slot = Some(slot);
                OpResult::Ok
            }
            Err(_) => {
                self.slot = None;
                OpResult::NotFound
            }
        }
    }

    /// Returns the current record's payload.
    pub fn value(&self) -> &[u8] {
        self.guard
            .leaf()
            .payload_at(self.slot.expect("iterator is not positioned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_common::PageId;

    fn latched_leaf() -> Arc<BufferFrame> {
        Arc::new(BufferFrame::new(PageId::new(1), LeafPage::new(1024)))
    }

    #[test]
    fn test_seek_insert_and_read() {
        let frame = latched_leaf();
        let mut iter = ExclusiveIterator::new(ExclusiveGuard::acquire(&frame));

        assert_eq!(iter.seek_to_insert(b"k"), OpResult::Ok);
        assert_eq!(iter.enough_space(b"k", 4), OpResult::Ok);
        iter.insert_in_current(b"k", 4).copy_from_slice(b"vvvv");
        iter.mark_dirty();
        assert_eq!(iter.value(), b"vvvv");

        assert_eq!(iter.seek_to_insert(b"k"), OpResult::Duplicate);
        assert_eq!(iter.seek_exact(b"k"), OpResult::Ok);
        assert_eq!(iter.seek_exact(b"missing"), OpResult::NotFound);
    }

    #[test]
    fn test_resize_and_remove() {
        let frame = latched_leaf();
        let mut iter = ExclusiveIterator::new(ExclusiveGuard::acquire(&frame));
        iter.seek_to_insert(b"k");
        iter.insert_in_current(b"k", 8).copy_from_slice(&[9u8; 8]);

        iter.shorten(2);
        assert_eq!(iter.value(), &[9u8, 9]);
        assert!(iter.extend(4));
        assert_eq!(iter.value(), &[9, 9, 0, 0]);

        assert_eq!(iter.remove_current(), OpResult::Ok);
        assert_eq!(iter.seek_exact(b"k"), OpResult::NotFound);
    }
}
