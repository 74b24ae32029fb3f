//! Fat tuples: in-place multi-version primaries.
//!
//! A fat tuple keeps its whole history on the leaf: the current value is
//! followed by a stack of delta entries, each preserving the byte ranges
//! an update touched together with the superseded writer identity. No
//! secondary versions are created for fat updates, and rollback pops the
//! newest entry instead of XOR-patching from the WAL.
//!
//! Layout (on top of the shared 24-byte tuple header):
//!
//! ```text
//! offset  size  field
//! 24      2     value_len
//! 26      2     version_count
//! 28      4     reserved
//! 32      ...   current value (value_len bytes)
//! then    ...   delta entries, oldest first:
//!   0     2     entry_len (including this field)
//!   2     2     worker_id
//!   4     4     command_id
//!   8     8     tx_id
//!   16    ...   descriptor || forward diff
//! ```
//!
//! Conversion from chained form and fat-tuple removal are not supported;
//! fat tuples created by other means (tests, restores) are honored by
//! lookup, update, reconstruction, undo, and garbage collection.

use chain_common::{CommandId, OpResult, TxnId, WorkerId};
use chain_mvcc::Worker;
use chain_wal::WriterIdentity;

use super::descriptor::{apply_diff, generate_diff, UpdateDescriptor};
use super::tuple::{TupleFormat, TupleMut, TupleRef, TUPLE_HEADER_SIZE};

/// Fat tuple header size (shared tuple header included).
pub const FAT_HEADER_SIZE: usize = TUPLE_HEADER_SIZE + 8;

/// Fixed bytes of one delta entry before descriptor and diff.
pub const ENTRY_HEADER_SIZE: usize = 16;

#[inline]
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Returns the current value length.
#[inline]
#[must_use]
pub fn value_len(payload: &[u8]) -> usize {
    read_u16(payload, TUPLE_HEADER_SIZE) as usize
}

/// Returns the number of in-place versions.
#[inline]
#[must_use]
pub fn version_count(payload: &[u8]) -> usize {
    read_u16(payload, TUPLE_HEADER_SIZE + 2) as usize
}

/// Returns the current value bytes.
#[inline]
#[must_use]
pub fn value(payload: &[u8]) -> &[u8] {
    &payload[FAT_HEADER_SIZE..FAT_HEADER_SIZE + value_len(payload)]
}

/// Returns the bytes one update appends: entry header, descriptor, diff.
#[inline]
#[must_use]
pub fn entry_size(descriptor: &UpdateDescriptor) -> usize {
    ENTRY_HEADER_SIZE + descriptor.size_bytes() + descriptor.diff_length()
}

/// Initializes a fat tuple with no history in `bytes`
/// (`FAT_HEADER_SIZE + value.len()` bytes).
pub fn init_fat(bytes: &mut [u8], worker_id: WorkerId, tx_id: TxnId, value: &[u8]) {
    assert_eq!(bytes.len(), FAT_HEADER_SIZE + value.len());
    bytes[0] = TupleFormat::Fat as u8;
    bytes[1] = 0;
    bytes[2..4].copy_from_slice(&worker_id.as_u16().to_le_bytes());
    bytes[4..8].copy_from_slice(&CommandId::FIRST.as_u32().to_le_bytes());
    bytes[8..16].copy_from_slice(&tx_id.as_u64().to_le_bytes());
    bytes[16..24].fill(0);
    write_u16(bytes, TUPLE_HEADER_SIZE, value.len() as u16);
    write_u16(bytes, TUPLE_HEADER_SIZE + 2, 0);
    bytes[TUPLE_HEADER_SIZE + 4..FAT_HEADER_SIZE].fill(0);
    bytes[FAT_HEADER_SIZE..].copy_from_slice(value);
}

/// Collects the start offsets of all delta entries.
fn entry_offsets(payload: &[u8]) -> Vec<usize> {
    let count = version_count(payload);
    let mut offsets = Vec::with_capacity(count);
    let mut at = FAT_HEADER_SIZE + value_len(payload);
    for _ in 0..count {
        offsets.push(at);
        at += read_u16(payload, at) as usize;
    }
    debug_assert!(at <= payload.len());
    offsets
}

fn entry_identity(payload: &[u8], at: usize) -> WriterIdentity {
    WriterIdentity::new(
        WorkerId::new(read_u16(payload, at + 2)),
        TxnId::new(u64::from_le_bytes(
            payload[at + 8..at + 16].try_into().unwrap(),
        )),
        CommandId::new(u32::from_le_bytes(
            payload[at + 4..at + 8].try_into().unwrap(),
        )),
    )
}

/// Performs an in-place fat update on `payload`, which the caller already
/// extended by [`entry_size`] bytes past `entry_start` (the previous
/// total length).
///
/// Appends a delta entry preserving the superseded writer identity and
/// the touched byte ranges, runs the user `mutator` on the current value,
/// and installs `after` as the new writer.
pub fn apply_update(
    payload: &mut [u8],
    entry_start: usize,
    after: WriterIdentity,
    descriptor: &UpdateDescriptor,
    mutator: &mut dyn FnMut(&mut [u8]),
) {
    let before = TupleRef::new(payload).writer();
    let vl = value_len(payload);
    let entry_len = entry_size(descriptor);
    debug_assert_eq!(payload.len(), entry_start + entry_len);

    let (head, entry) = payload.split_at_mut(entry_start);
    write_u16(entry, 0, entry_len as u16);
    write_u16(entry, 2, before.worker_id.as_u16());
    entry[4..8].copy_from_slice(&before.command_id.as_u32().to_le_bytes());
    entry[8..16].copy_from_slice(&before.tx_id.as_u64().to_le_bytes());
    let desc_len = descriptor.size_bytes();
    descriptor.write_to(&mut entry[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + desc_len]);
    generate_diff(
        descriptor,
        &mut entry[ENTRY_HEADER_SIZE + desc_len..],
        &head[FAT_HEADER_SIZE..FAT_HEADER_SIZE + vl],
    );

    mutator(&mut head[FAT_HEADER_SIZE..FAT_HEADER_SIZE + vl]);

    let count = version_count(payload);
    {
        let mut tuple = TupleMut::new(payload);
        tuple.set_writer(after);
    }
    write_u16(payload, TUPLE_HEADER_SIZE + 2, (count + 1) as u16);
}

/// Pops the newest in-place version: restores the touched bytes and the
/// superseded writer identity. Returns the tuple's new total length for
/// the caller to shorten the leaf slot to.
///
/// # Panics
///
/// Panics if the tuple has no in-place versions.
pub fn undo_last_update(payload: &mut [u8]) -> usize {
    let offsets = entry_offsets(payload);
    let last = *offsets.last().expect("fat tuple has no version to pop");
    let vl = value_len(payload);

    let identity = entry_identity(payload, last);
    let (head, entry) = payload.split_at_mut(last);
    let (descriptor, consumed) = UpdateDescriptor::read_from(&entry[ENTRY_HEADER_SIZE..])
        .expect("fat entries are well-formed");
    apply_diff(
        &descriptor,
        &mut head[FAT_HEADER_SIZE..FAT_HEADER_SIZE + vl],
        &entry[ENTRY_HEADER_SIZE + consumed..ENTRY_HEADER_SIZE + consumed + descriptor.diff_length()],
    );

    let count = version_count(payload);
    {
        let mut tuple = TupleMut::new(payload);
        tuple.set_writer(identity);
    }
    write_u16(payload, TUPLE_HEADER_SIZE + 2, (count - 1) as u16);
    last
}

/// Reconstructs the value a reader should observe from a fat tuple whose
/// head may be invisible. Returns the outcome and the number of versions
/// walked.
pub fn reconstruct(
    worker: &Worker,
    payload: &[u8],
    max_chain_length: u16,
    callback: &mut dyn FnMut(&[u8]),
) -> (OpResult, u16) {
    let head = TupleRef::new(payload);
    if worker.is_visible(head.worker_id(), head.tx_id(), false) {
        callback(value(payload));
        return (OpResult::Ok, 1);
    }

    let mut scratch = value(payload).to_vec();
    let mut chain_length: u16 = 1;
    for &at in entry_offsets(payload).iter().rev() {
        let (descriptor, consumed) = UpdateDescriptor::read_from(&payload[at + ENTRY_HEADER_SIZE..])
            .expect("fat entries are well-formed");
        let diff_start = at + ENTRY_HEADER_SIZE + consumed;
        apply_diff(
            &descriptor,
            &mut scratch,
            &payload[diff_start..diff_start + descriptor.diff_length()],
        );
        let identity = entry_identity(payload, at);
        if worker.is_visible(identity.worker_id, identity.tx_id, false) {
            callback(&scratch);
            return (OpResult::Ok, chain_length);
        }
        chain_length += 1;
        assert!(
            chain_length <= max_chain_length,
            "fat tuple version walk exceeded maximum chain length"
        );
    }
    (OpResult::NotFound, chain_length)
}
