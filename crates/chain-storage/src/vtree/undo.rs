//! Runtime rollback: WAL record inverses.
//!
//! Rollback walks the worker's private WAL stream in reverse and applies
//! the inverse of each record:
//!
//! - insert → excise the slot (assuming no insert-after-remove within a
//!   transaction), merging underflow away;
//! - update → pop a fat tuple's newest in-place version, or restore the
//!   chained pre-image by rewriting the `before` writer identity and
//!   XOR-ing the logged diff into the post-image payload;
//! - remove → resize the tombstone back to header plus value, rebuild
//!   the chained header from the `before` identity, and restore the
//!   payload.
//!
//! Recovery-time replay is out of scope; this path only serves live
//! transactions rolling back.

use chain_common::OpResult;
use chain_wal::{WalKind, WalRecordRef};

use super::descriptor::{apply_xor_diff, UpdateDescriptor};
use super::fat;
use super::operator::{chain_key, VersionedTree};
use super::tuple::{init_chained, TupleFormat, TupleMut, TupleRef, TUPLE_HEADER_SIZE};

impl VersionedTree {
    /// Applies the inverse of one WAL record.
    pub(crate) fn undo_record(&self, record_bytes: &[u8]) {
        let record = WalRecordRef::parse(record_bytes).expect("worker-written records are valid");
        match record.kind() {
            WalKind::Insert => self.undo_insert(&record),
            WalKind::Update => self.undo_update(&record),
            WalKind::Remove => self.undo_remove(&record),
            WalKind::Commit | WalKind::Abort => {}
        }
    }

    fn undo_insert(&self, record: &WalRecordRef<'_>) {
        let stored_key = chain_key(record.key());
        let mut iter = self.exclusive_for(&stored_key);
        let found = iter.seek_exact(&stored_key);
        debug_assert_eq!(found, OpResult::Ok, "undo of an insert that left no slot");
        if found != OpResult::Ok {
            return;
        }
        iter.remove_current();
        iter.mark_dirty();
        drop(iter);
        self.merge_for_key(&stored_key);
    }

    fn undo_update(&self, record: &WalRecordRef<'_>) {
        let stored_key = chain_key(record.key());
        let mut iter = self.exclusive_for(&stored_key);
        let found = iter.seek_exact(&stored_key);
        debug_assert_eq!(found, OpResult::Ok, "undo of an update that left no slot");
        if found != OpResult::Ok {
            return;
        }

        match TupleRef::new(iter.value()).format() {
            TupleFormat::Fat => {
                let new_length = fat::undo_last_update(iter.value_mut());
                iter.shorten(new_length);
            }
            TupleFormat::Chained => {
                let aux = record.aux();
                let (descriptor, consumed) =
                    UpdateDescriptor::read_from(aux).expect("logged descriptors are well-formed");
                let mut tuple = TupleMut::new(iter.value_mut());
                debug_assert!(!tuple.as_ref().is_write_locked());
                tuple.set_writer(record.before());
                apply_xor_diff(&descriptor, tuple.chained_value_mut(), &aux[consumed..]);
            }
        }
        iter.mark_dirty();
    }

    fn undo_remove(&self, record: &WalRecordRef<'_>) {
        let stored_key = chain_key(record.key());
        let value = record.aux();
        let target_length = TUPLE_HEADER_SIZE + value.len();

        loop {
            let mut iter = self.exclusive_for(&stored_key);
            let found = iter.seek_exact(&stored_key);
            debug_assert_eq!(found, OpResult::Ok, "undo of a remove that left no slot");
            if found != OpResult::Ok {
                return;
            }

            let current_length = iter.value().len();
            if current_length < target_length {
                if !iter.extend(target_length) {
                    drop(iter);
                    self.split_for_key(&stored_key);
                    continue;
                }
            } else if current_length > target_length {
                iter.shorten(target_length);
            }

            let before = record.before();
            let payload = iter.value_mut();
            init_chained(payload, before.worker_id, before.tx_id);
            payload[TUPLE_HEADER_SIZE..].copy_from_slice(value);
            let mut tuple = TupleMut::new(payload);
            tuple.set_writer(before);
            // The restored head may still have a chain behind it.
            tuple.clear_final();
            debug_assert!(!tuple.as_ref().is_removed());
            iter.mark_dirty();
            return;
        }
    }
}
