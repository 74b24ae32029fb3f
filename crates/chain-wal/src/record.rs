//! WAL record layout.
//!
//! Every record shares one fixed 40-byte header followed by a
//! kind-specific payload. The byte layout is stable across undo but makes
//! no portability promises (host-fixed little-endian fields).
//!
//! ```text
//! offset  size  field
//! 0       1     kind
//! 1       1     reserved
//! 2       4     tree_id
//! 6       2     key_length
//! 8       2     aux_length       value_length (insert/remove) or
//!                                descriptor+diff length (update)
//! 10      2     before_worker
//! 12      4     before_command
//! 16      8     before_tx
//! 24      2     after_worker
//! 26      4     after_command
//! 30      2     reserved
//! 32      8     after_tx
//! 40      ...   payload
//! ```
//!
//! Payloads:
//! - insert: `key || value`
//! - update: `key || descriptor || xor_diff`
//! - remove: `key || value` (full pre-image)
//! - commit / abort: empty

use chain_common::{CommandId, TreeId, TxnId, WorkerId};

use crate::error::{WalError, WalResult};

/// Fixed record header size in bytes.
pub const WAL_HEADER_SIZE: usize = 40;

/// Record kind identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalKind {
    /// A fresh primary tuple was installed.
    Insert = 1,
    /// A chained or fat primary was updated in place.
    Update = 2,
    /// A primary was tombstoned.
    Remove = 3,
    /// Transaction commit marker.
    Commit = 4,
    /// Transaction abort marker.
    Abort = 5,
}

impl WalKind {
    /// Converts the kind to its wire byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a kind from its wire byte.
    pub fn from_u8(value: u8) -> WalResult<Self> {
        match value {
            1 => Ok(Self::Insert),
            2 => Ok(Self::Update),
            3 => Ok(Self::Remove),
            4 => Ok(Self::Commit),
            5 => Ok(Self::Abort),
            other => Err(WalError::UnknownKind(other)),
        }
    }

    /// Returns true if records of this kind carry undo information.
    #[inline]
    #[must_use]
    pub const fn is_undoable(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Remove)
    }
}

/// The (worker, transaction, command) identity of a tuple writer, as it
/// appears in `before_*` / `after_*` header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterIdentity {
    /// Worker that performed the write.
    pub worker_id: WorkerId,
    /// Transaction that performed the write.
    pub tx_id: TxnId,
    /// Command stamp of the write.
    pub command_id: CommandId,
}

impl WriterIdentity {
    /// Creates a new writer identity.
    #[inline]
    #[must_use]
    pub const fn new(worker_id: WorkerId, tx_id: TxnId, command_id: CommandId) -> Self {
        Self {
            worker_id,
            tx_id,
            command_id,
        }
    }
}

// Header field offsets.
const OFF_KIND: usize = 0;
const OFF_TREE: usize = 2;
const OFF_KEY_LEN: usize = 6;
const OFF_AUX_LEN: usize = 8;
const OFF_BEFORE_WORKER: usize = 10;
const OFF_BEFORE_COMMAND: usize = 12;
const OFF_BEFORE_TX: usize = 16;
const OFF_AFTER_WORKER: usize = 24;
const OFF_AFTER_COMMAND: usize = 26;
const OFF_AFTER_TX: usize = 32;

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
pub(crate) fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// A checked read-only view over an encoded WAL record.
#[derive(Debug, Clone, Copy)]
pub struct WalRecordRef<'a> {
    bytes: &'a [u8],
}

impl<'a> WalRecordRef<'a> {
    /// Parses a record, validating the header and payload lengths.
    pub fn parse(bytes: &'a [u8]) -> WalResult<Self> {
        if bytes.len() < WAL_HEADER_SIZE {
            return Err(WalError::TruncatedRecord {
                actual: bytes.len(),
                expected: WAL_HEADER_SIZE,
            });
        }
        let record = Self { bytes };
        WalKind::from_u8(bytes[OFF_KIND])?;
        let needed = WAL_HEADER_SIZE + record.key_length() + record.aux_length();
        if bytes.len() < needed {
            return Err(WalError::TruncatedPayload {
                actual: bytes.len(),
                expected: needed,
            });
        }
        Ok(record)
    }

    /// Returns the record kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> WalKind {
        WalKind::from_u8(self.bytes[OFF_KIND]).expect("validated at parse")
    }

    /// Returns the tree the record belongs to.
    #[inline]
    #[must_use]
    pub fn tree_id(&self) -> TreeId {
        TreeId::new(read_u32(self.bytes, OFF_TREE))
    }

    /// Returns the key length.
    #[inline]
    #[must_use]
    pub fn key_length(&self) -> usize {
        read_u16(self.bytes, OFF_KEY_LEN) as usize
    }

    /// Returns the auxiliary length: the value length for insert/remove,
    /// the descriptor+diff length for update.
    #[inline]
    #[must_use]
    pub fn aux_length(&self) -> usize {
        read_u16(self.bytes, OFF_AUX_LEN) as usize
    }

    /// Returns the pre-image writer identity.
    #[inline]
    #[must_use]
    pub fn before(&self) -> WriterIdentity {
        WriterIdentity {
            worker_id: WorkerId::new(read_u16(self.bytes, OFF_BEFORE_WORKER)),
            tx_id: TxnId::new(read_u64(self.bytes, OFF_BEFORE_TX)),
            command_id: CommandId::new(read_u32(self.bytes, OFF_BEFORE_COMMAND)),
        }
    }

    /// Returns the post-image writer identity.
    #[inline]
    #[must_use]
    pub fn after(&self) -> WriterIdentity {
        WriterIdentity {
            worker_id: WorkerId::new(read_u16(self.bytes, OFF_AFTER_WORKER)),
            tx_id: TxnId::new(read_u64(self.bytes, OFF_AFTER_TX)),
            command_id: CommandId::new(read_u32(self.bytes, OFF_AFTER_COMMAND)),
        }
    }

    /// Returns the key bytes.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &'a [u8] {
        &self.bytes[WAL_HEADER_SIZE..WAL_HEADER_SIZE + self.key_length()]
    }

    /// Returns the bytes following the key: the value for insert/remove,
    /// `descriptor || xor_diff` for update.
    #[inline]
    #[must_use]
    pub fn aux(&self) -> &'a [u8] {
        let start = WAL_HEADER_SIZE + self.key_length();
        &self.bytes[start..start + self.aux_length()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(kind: WalKind, key: &[u8], aux: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; WAL_HEADER_SIZE + key.len() + aux.len()];
        bytes[OFF_KIND] = kind.as_u8();
        write_u32(&mut bytes, OFF_TREE, 9);
        write_u16(&mut bytes, OFF_KEY_LEN, key.len() as u16);
        write_u16(&mut bytes, OFF_AUX_LEN, aux.len() as u16);
        write_u16(&mut bytes, OFF_BEFORE_WORKER, 1);
        write_u32(&mut bytes, OFF_BEFORE_COMMAND, 5);
        write_u64(&mut bytes, OFF_BEFORE_TX, 100);
        write_u16(&mut bytes, OFF_AFTER_WORKER, 2);
        write_u32(&mut bytes, OFF_AFTER_COMMAND, 6);
        write_u64(&mut bytes, OFF_AFTER_TX, 200);
        bytes[WAL_HEADER_SIZE..WAL_HEADER_SIZE + key.len()].copy_from_slice(key);
        bytes[WAL_HEADER_SIZE + key.len()..].copy_from_slice(aux);
        bytes
    }

    #[test]
    fn test_record_roundtrip() {
        let bytes = encoded(WalKind::Remove, b"key", b"old-value");
        let record = WalRecordRef::parse(&bytes).unwrap();
        assert_eq!(record.kind(), WalKind::Remove);
        assert_eq!(record.tree_id(), TreeId::new(9));
        assert_eq!(record.key(), b"key");
        assert_eq!(record.aux(), b"old-value");
        assert_eq!(record.before().tx_id, TxnId::new(100));
        assert_eq!(record.after().command_id, CommandId::new(6));
    }

    #[test]
    fn test_truncated_header() {
        let err = WalRecordRef::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, WalError::TruncatedRecord { .. }));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = encoded(WalKind::Insert, b"key", b"value");
        bytes.truncate(WAL_HEADER_SIZE + 2);
        let err = WalRecordRef::parse(&bytes).unwrap_err();
        assert!(matches!(err, WalError::TruncatedPayload { .. }));
    }

    #[test]
    fn test_unknown_kind() {
        let mut bytes = encoded(WalKind::Insert, b"", b"");
        bytes[OFF_KIND] = 99;
        assert!(matches!(
            WalRecordRef::parse(&bytes).unwrap_err(),
            WalError::UnknownKind(99)
        ));
    }
}
