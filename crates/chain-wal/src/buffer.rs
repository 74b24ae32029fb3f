//! Per-worker WAL buffer.
//!
//! Each worker owns one [`WalBuffer`] holding the private, totally ordered
//! record stream of its active transaction. Records are written with the
//! reserve → fill → submit protocol; rollback drains them in reverse.

use chain_common::TreeId;

use crate::record::{
    write_u16, write_u32, write_u64, WalKind, WalRecordRef, WriterIdentity, WAL_HEADER_SIZE,
};

/// A writable view into a freshly reserved WAL record.
///
/// The slot starts zeroed apart from its kind and tree id; the caller
/// fills header fields and payload bytes in place and then calls
/// [`WalSlot::submit`]. Dropping the slot without submitting leaves the
/// zeroed fields in the stream, which is harmless for rollback but
/// indicates a bug in the mutation path.
#[derive(Debug)]
pub struct WalSlot<'a> {
    bytes: &'a mut Vec<u8>,
}

impl WalSlot<'_> {
    /// Sets the key length header field.
    #[inline]
    pub fn set_key_length(&mut self, len: usize) {
        write_u16(self.bytes, 6, len as u16);
    }

    /// Sets the auxiliary length header field.
    #[inline]
    pub fn set_aux_length(&mut self, len: usize) {
        write_u16(self.bytes, 8, len as u16);
    }

    /// Sets the pre-image writer identity.
    pub fn set_before(&mut self, identity: WriterIdentity) {
        write_u16(self.bytes, 10, identity.worker_id.as_u16());
        write_u32(self.bytes, 12, identity.command_id.as_u32());
        write_u64(self.bytes, 16, identity.tx_id.as_u64());
    }

    /// Sets the post-image writer identity.
    pub fn set_after(&mut self, identity: WriterIdentity) {
        write_u16(self.bytes, 24, identity.worker_id.as_u16());
        write_u32(self.bytes, 26, identity.command_id.as_u32());
        write_u64(self.bytes, 32, identity.tx_id.as_u64());
    }

    /// Returns the mutable payload area (everything past the header).
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[WAL_HEADER_SIZE..]
    }

    /// Finalizes the record.
    #[inline]
    pub fn submit(self) {}
}

/// The private WAL stream of one worker's active transaction.
#[derive(Debug, Default)]
pub struct WalBuffer {
    records: Vec<Vec<u8>>,
    reserved_bytes: usize,
}

impl WalBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes that the caller is about to log up to `bytes` of records.
    ///
    /// Mirrors the space reservation a ring-buffer WAL would perform; the
    /// in-memory buffer only tracks the high-water mark.
    #[inline]
    pub fn ensure_capacity(&mut self, bytes: usize) {
        self.reserved_bytes = self.reserved_bytes.max(bytes);
    }

    /// Returns the reserved-capacity high-water mark.
    #[inline]
    #[must_use]
    pub fn reserved_capacity(&self) -> usize {
        self.reserved_bytes
    }

    /// Reserves a record of `payload_len` payload bytes and returns the
    /// writable slot.
    pub fn reserve(&mut self, kind: WalKind, tree_id: TreeId, payload_len: usize) -> WalSlot<'_> {
        let mut bytes = vec![0u8; WAL_HEADER_SIZE + payload_len];
        bytes[0] = kind.as_u8();
        write_u32(&mut bytes, 2, tree_id.as_u32());
        self.records.push(bytes);
        WalSlot {
            bytes: self.records.last_mut().expect("just pushed"),
        }
    }

    /// Appends a payload-less marker record (commit / abort).
    pub fn append_marker(&mut self, kind: WalKind, tree_id: TreeId) {
        self.reserve(kind, tree_id, 0).submit();
    }

    /// Returns the number of records in the stream.
    #[inline]
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the stream is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates the stream in log order.
    pub fn records(&self) -> impl DoubleEndedIterator<Item = WalRecordRef<'_>> {
        self.records
            .iter()
            .map(|bytes| WalRecordRef::parse(bytes).expect("records are well-formed"))
    }

    /// Takes the raw records out of the buffer, leaving it empty.
    ///
    /// Rollback uses this so it can mutate trees while walking the stream.
    #[must_use]
    pub fn take_records(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.records)
    }

    /// Discards all records (commit path).
    pub fn clear(&mut self) {
        self.records.clear();
        self.reserved_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_common::{CommandId, TxnId, WorkerId};

    #[test]
    fn test_reserve_fill_submit() {
        let mut wal = WalBuffer::new();
        let mut slot = wal.reserve(WalKind::Insert, TreeId::new(1), 8);
        slot.set_key_length(3);
        slot.set_aux_length(5);
        slot.payload_mut()[..3].copy_from_slice(b"abc");
        slot.payload_mut()[3..].copy_from_slice(b"xyzzy");
        slot.submit();

        assert_eq!(wal.record_count(), 1);
        let record = wal.records().next().unwrap();
        assert_eq!(record.kind(), WalKind::Insert);
        assert_eq!(record.key(), b"abc");
        assert_eq!(record.aux(), b"xyzzy");
    }

    #[test]
    fn test_reverse_iteration() {
        let mut wal = WalBuffer::new();
        for i in 0..3u8 {
            let mut slot = wal.reserve(WalKind::Update, TreeId::new(1), 1);
            slot.set_key_length(1);
            slot.payload_mut()[0] = i;
            slot.submit();
        }
        let keys: Vec<u8> = wal.records().rev().map(|r| r.key()[0]).collect();
        assert_eq!(keys, vec![2, 1, 0]);
    }

    #[test]
    fn test_identity_fields() {
        let mut wal = WalBuffer::new();
        let before = WriterIdentity::new(WorkerId::new(1), TxnId::new(10), CommandId::new(0));
        let after = WriterIdentity::new(WorkerId::new(2), TxnId::new(20), CommandId::new(7));
        let mut slot = wal.reserve(WalKind::Remove, TreeId::new(4), 0);
        slot.set_before(before);
        slot.set_after(after);
        slot.submit();

        let record = wal.records().next().unwrap();
        assert_eq!(record.before(), before);
        assert_eq!(record.after(), after);
        assert_eq!(record.tree_id(), TreeId::new(4));
    }

    #[test]
    fn test_take_and_clear() {
        let mut wal = WalBuffer::new();
        wal.append_marker(WalKind::Commit, TreeId::new(1));
        let taken = wal.take_records();
        assert_eq!(taken.len(), 1);
        assert!(wal.is_empty());
    }
}
