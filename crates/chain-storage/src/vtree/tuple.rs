//! On-page tuple and version record codec.
//!
//! Primary tuples and secondary version records are placed directly into
//! page buffers with fixed field offsets, accessed through checked views
//! rather than pointer casts. Fields are host-fixed little-endian.
//!
//! Primary tuple header (shared by chained and fat formats):
//!
//! ```text
//! offset  size  field
//! 0       1     format       0 = chained, 1 = fat
//! 1       1     flags        WRITE_LOCKED | IS_REMOVED | IS_FINAL
//! 2       2     worker_id
//! 4       4     command_id
//! 8       8     tx_id
//! 16      8     read_word    read_ts, or the 2PL read-lock bitmap
//! 24      ...   payload      (chained: the value bytes)
//! ```
//!
//! Secondary version record header:
//!
//! ```text
//! offset  size  field
//! 0       1     flags        IS_DELTA | IS_REMOVED
//! 1       1     reserved
//! 2       2     worker_id
//! 4       4     command_id
//! 8       8     tx_id
//! 16      8     committed_before_txid
//! 24      8     gc_trigger
//! 32      ...   payload      descriptor || diff, or the full value
//! ```

use bitflags::bitflags;

use chain_common::{CommandId, TxnId, WorkerId};
use chain_wal::WriterIdentity;

/// Primary tuple header size.
pub const TUPLE_HEADER_SIZE: usize = 24;

/// Secondary version record header size.
pub const VERSION_HEADER_SIZE: usize = 32;

/// Tuple storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TupleFormat {
    /// Single current value; history chained through the versions store.
    Chained = 0,
    /// Multiple in-place versions behind the current value.
    Fat = 1,
}

impl TupleFormat {
    /// Classifies an on-page tuple payload.
    ///
    /// # Panics
    ///
    /// Panics on an unknown format byte (page corruption).
    #[must_use]
    pub fn classify(payload: &[u8]) -> Self {
        match payload[0] {
            0 => Self::Chained,
            1 => Self::Fat,
            other => panic!("unknown tuple format byte: {other}"),
        }
    }
}

bitflags! {
    /// Primary tuple flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TupleFlags: u8 {
        /// An uncommitted writer holds the tuple.
        const WRITE_LOCKED = 0b0000_0001;
        /// The tuple is a tombstone (chained only).
        const IS_REMOVED = 0b0000_0010;
        /// No prior version exists in the versions store.
        const IS_FINAL = 0b0000_0100;
    }
}

bitflags! {
    /// Secondary version record flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VersionFlags: u8 {
        /// Payload is `descriptor || forward diff` rather than a full value.
        const IS_DELTA = 0b0000_0001;
        /// The preserved state was itself a tombstone.
        const IS_REMOVED = 0b0000_0010;
    }
}

#[inline]
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

#[inline]
fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

// =============================================================================
// Primary tuple views
// =============================================================================

/// Read-only view over an on-page primary tuple.
#[derive(Debug, Clone, Copy)]
pub struct TupleRef<'a> {
    bytes: &'a [u8],
}

impl<'a> TupleRef<'a> {
    /// Creates a view. `bytes` must span the whole tuple payload.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than the header.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        assert!(bytes.len() >= TUPLE_HEADER_SIZE, "tuple too short");
        Self { bytes }
    }

    /// Returns the tuple format.
    #[inline]
    #[must_use]
    pub fn format(&self) -> TupleFormat {
        TupleFormat::classify(self.bytes)
    }

    /// Returns the flag bits.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> TupleFlags {
        TupleFlags::from_bits_truncate(self.bytes[1])
    }

    /// Returns true if an uncommitted writer holds the tuple.
    #[inline]
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.flags().contains(TupleFlags::WRITE_LOCKED)
    }

    /// Returns true if the tuple is a tombstone.
    #[inline]
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.flags().contains(TupleFlags::IS_REMOVED)
    }

    /// Returns true if no prior version exists.
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.flags().contains(TupleFlags::IS_FINAL)
    }

    /// Returns the last writer's worker id.
    #[inline]
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        WorkerId::new(read_u16(self.bytes, 2))
    }

    /// Returns the last writer's command id.
    #[inline]
    #[must_use]
    pub fn command_id(&self) -> CommandId {
        CommandId::new(read_u32(self.bytes, 4))
    }

    /// Returns the last writer's transaction id.
    #[inline]
    #[must_use]
    pub fn tx_id(&self) -> TxnId {
        TxnId::new(read_u64(self.bytes, 8))
    }

    /// Returns the last writer's full identity.
    #[inline]
    #[must_use]
    pub fn writer(&self) -> WriterIdentity {
        WriterIdentity::new(self.worker_id(), self.tx_id(), self.command_id())
    }

    /// Returns the SSI read word: the latest reader's transaction id, or
    /// the 2PL read-lock bitmap.
    #[inline]
    #[must_use]
    pub fn read_word(&self) -> u64 {
        read_u64(self.bytes, 16)
    }

    /// Returns the value bytes of a chained tuple.
    #[inline]
    #[must_use]
    pub fn chained_value(&self) -> &'a [u8] {
        debug_assert_eq!(self.format(), TupleFormat::Chained);
        &self.bytes[TUPLE_HEADER_SIZE..]
    }
}

/// Mutable view over an on-page primary tuple.
#[derive(Debug)]
pub struct TupleMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> TupleMut<'a> {
    /// Creates a mutable view.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than the header.
    #[must_use]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        assert!(bytes.len() >= TUPLE_HEADER_SIZE, "tuple too short");
        Self { bytes }
    }

    /// Returns a read-only view of the same bytes.
    #[inline]
    #[must_use]
    pub fn as_ref(&self) -> TupleRef<'_> {
        TupleRef { bytes: self.bytes }
    }

    fn set_flags(&mut self, flags: TupleFlags) {
        self.bytes[1] = flags.bits();
    }

    fn update_flags(&mut self, f: impl FnOnce(TupleFlags) -> TupleFlags) {
        let flags = f(self.as_ref().flags());
        self.set_flags(flags);
    }

    /// Sets the write-lock bit.
    pub fn write_lock(&mut self) {
        debug_assert!(!self.as_ref().is_write_locked());
        self.update_flags(|f| f | TupleFlags::WRITE_LOCKED);
    }

    /// Clears the write-lock bit.
    pub fn unlock(&mut self) {
        self.update_flags(|f| f - TupleFlags::WRITE_LOCKED);
    }

    /// Sets the tombstone bit.
    pub fn set_removed(&mut self) {
        self.update_flags(|f| f | TupleFlags::IS_REMOVED);
    }

    /// Clears the final bit (a version now exists).
    pub fn clear_final(&mut self) {
        self.update_flags(|f| f - TupleFlags::IS_FINAL);
    }

    /// Rewrites the writer identity.
    pub fn set_writer(&mut self, identity: WriterIdentity) {
        write_u16(self.bytes, 2, identity.worker_id.as_u16());
        write_u32(self.bytes, 4, identity.command_id.as_u32());
        write_u64(self.bytes, 8, identity.tx_id.as_u64());
    }

    /// Sets the SSI read word.
    pub fn set_read_word(&mut self, word: u64) {
        write_u64(self.bytes, 16, word);
    }

    /// Returns the mutable value bytes of a chained tuple.
    #[inline]
    #[must_use]
    pub fn chained_value_mut(&mut self) -> &mut [u8] {
        debug_assert_eq!(self.as_ref().format(), TupleFormat::Chained);
        &mut self.bytes[TUPLE_HEADER_SIZE..]
    }

    /// Returns the raw tuple bytes.
    #[inline]
    #[must_use]
    pub fn raw_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

/// Initializes a fresh chained primary in `bytes`: the given writer, the
/// first command id, no prior version, read word cleared. The value area
/// past the header is left untouched.
pub fn init_chained(bytes: &mut [u8], worker_id: WorkerId, tx_id: TxnId) {
    assert!(bytes.len() >= TUPLE_HEADER_SIZE, "tuple too short");
    bytes[0] = TupleFormat::Chained as u8;
    bytes[1] = TupleFlags::IS_FINAL.bits();
    write_u16(bytes, 2, worker_id.as_u16());
    write_u32(bytes, 4, CommandId::FIRST.as_u32());
    write_u64(bytes, 8, tx_id.as_u64());
    write_u64(bytes, 16, 0);
}

// =============================================================================
// Secondary version record views
// =============================================================================

/// Read-only view over a secondary version record.
#[derive(Debug, Clone, Copy)]
pub struct VersionRef<'a> {
    bytes: &'a [u8],
}

impl<'a> VersionRef<'a> {
    /// Creates a view.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than the header.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        assert!(bytes.len() >= VERSION_HEADER_SIZE, "version record too short");
        Self { bytes }
    }

    /// Returns the flag bits.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> VersionFlags {
        VersionFlags::from_bits_truncate(self.bytes[0])
    }

    /// Returns true if the payload is a delta.
    #[inline]
    #[must_use]
    pub fn is_delta(&self) -> bool {
        self.flags().contains(VersionFlags::IS_DELTA)
    }

    /// Returns true if the preserved state was a tombstone.
    #[inline]
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.flags().contains(VersionFlags::IS_REMOVED)
    }

    /// Returns the superseded writer's identity.
    #[inline]
    #[must_use]
    pub fn writer(&self) -> WriterIdentity {
        WriterIdentity::new(
            WorkerId::new(read_u16(self.bytes, 2)),
            TxnId::new(read_u64(self.bytes, 8)),
            CommandId::new(read_u32(self.bytes, 4)),
        )
    }

    /// Returns the snapshot upper bound at which the preserved state was
    /// still authoritative (`TxnId::MAX` for same-transaction overwrites).
    #[inline]
    #[must_use]
    pub fn committed_before_txid(&self) -> TxnId {
        TxnId::new(read_u64(self.bytes, 16))
    }

    /// Returns the transaction id at which the record becomes eligible
    /// for garbage collection.
    #[inline]
    #[must_use]
    pub fn gc_trigger(&self) -> TxnId {
        TxnId::new(read_u64(self.bytes, 24))
    }

    /// Returns the record payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[VERSION_HEADER_SIZE..]
    }
}

/// Initializes a secondary version record header in `bytes`. The payload
/// area past the header is left untouched.
pub fn init_version(
    bytes: &mut [u8],
    writer: WriterIdentity,
    flags: VersionFlags,
    committed_before_txid: TxnId,
    gc_trigger: TxnId,
) {
    assert!(bytes.len() >= VERSION_HEADER_SIZE, "version record too short");
    bytes[0] = flags.bits();
    bytes[1] = 0;
    write_u16(bytes, 2, writer.worker_id.as_u16());
    write_u32(bytes, 4, writer.command_id.as_u32());
    write_u64(bytes, 8, writer.tx_id.as_u64());
    write_u64(bytes, 16, committed_before_txid.as_u64());
    write_u64(bytes, 24, gc_trigger.as_u64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_chained() {
        let mut bytes = vec![0u8; TUPLE_HEADER_SIZE + 4];
        init_chained(&mut bytes, WorkerId::new(3), TxnId::new(17));
        let tuple = TupleRef::new(&bytes);
        assert_eq!(tuple.format(), TupleFormat::Chained);
        assert!(tuple.is_final());
        assert!(!tuple.is_write_locked());
        assert!(!tuple.is_removed());
        assert_eq!(tuple.worker_id(), WorkerId::new(3));
        assert_eq!(tuple.tx_id(), TxnId::new(17));
        assert_eq!(tuple.command_id(), CommandId::FIRST);
        assert_eq!(tuple.chained_value().len(), 4);
    }

    #[test]
    fn test_lock_cycle() {
        let mut bytes = vec![0u8; TUPLE_HEADER_SIZE];
        init_chained(&mut bytes, WorkerId::new(0), TxnId::new(1));
        let mut tuple = TupleMut::new(&mut bytes);
        tuple.write_lock();
        assert!(tuple.as_ref().is_write_locked());
        tuple.unlock();
        assert!(!tuple.as_ref().is_write_locked());
        // Lock bit does not disturb the final bit.
        assert!(tuple.as_ref().is_final());
    }

    #[test]
    fn test_writer_rewrite() {
        let mut bytes = vec![0u8; TUPLE_HEADER_SIZE];
        init_chained(&mut bytes, WorkerId::new(0), TxnId::new(1));
        let identity = WriterIdentity::new(WorkerId::new(2), TxnId::new(9), CommandId::new(4));
        {
            let mut tuple = TupleMut::new(&mut bytes);
            tuple.set_writer(identity);
            tuple.clear_final();
            tuple.set_read_word(42);
        }
        let tuple = TupleRef::new(&bytes);
        assert_eq!(tuple.writer(), identity);
        assert!(!tuple.is_final());
        assert_eq!(tuple.read_word(), 42);
    }

    #[test]
    fn test_version_record_roundtrip() {
        let mut bytes = vec![0u8; VERSION_HEADER_SIZE + 2];
        let writer = WriterIdentity::new(WorkerId::new(1), TxnId::new(5), CommandId::new(2));
        init_version(
            &mut bytes,
            writer,
            VersionFlags::IS_DELTA,
            TxnId::MAX,
            TxnId::new(6),
        );
        bytes[VERSION_HEADER_SIZE..].copy_from_slice(&[0xAB, 0xCD]);

        let version = VersionRef::new(&bytes);
        assert!(version.is_delta());
        assert!(!version.is_removed());
        assert_eq!(version.writer(), writer);
        assert_eq!(version.committed_before_txid(), TxnId::MAX);
        assert_eq!(version.gc_trigger(), TxnId::new(6));
        assert_eq!(version.payload(), &[0xAB, 0xCD]);
    }

    #[test]
    fn test_classify() {
        let mut bytes = vec![0u8; TUPLE_HEADER_SIZE];
        init_chained(&mut bytes, WorkerId::new(0), TxnId::new(1));
        assert_eq!(TupleFormat::classify(&bytes), TupleFormat::Chained);
        bytes[0] = 1;
        assert_eq!(TupleFormat::classify(&bytes), TupleFormat::Fat);
    }
}
