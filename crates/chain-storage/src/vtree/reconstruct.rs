//! Version-chain reconstruction.
//!
//! Given a primary tuple whose head may not be visible to the reader,
//! walk backwards through the versions store applying deltas (or adopting
//! full pre-images) until a visible ancestor or the end of the chain, and
//! hand the materialized value to the caller. Returns the outcome
//! together with the number of versions walked, for telemetry and for the
//! hard chain-length cap.

use chain_common::{OpResult, TreeId};
use chain_mvcc::Worker;

use super::descriptor::{apply_diff, UpdateDescriptor};
use super::fat;
use super::tuple::{TupleFormat, TupleRef, VersionRef};

/// Reconstructs the value of a primary tuple for the current reader.
pub(crate) fn reconstruct_tuple(
    worker: &Worker,
    tree_id: TreeId,
    max_chain_length: u16,
    primary: &[u8],
    callback: &mut dyn FnMut(&[u8]),
) -> (OpResult, u16) {
    match TupleFormat::classify(primary) {
        TupleFormat::Chained => reconstruct_chained(worker, tree_id, max_chain_length, primary, callback),
        TupleFormat::Fat => fat::reconstruct(worker, primary, max_chain_length, callback),
    }
}

fn reconstruct_chained(
    worker: &Worker,
    tree_id: TreeId,
    max_chain_length: u16,
    primary: &[u8],
    callback: &mut dyn FnMut(&[u8]),
) -> (OpResult, u16) {
    let head = TupleRef::new(primary);
    if worker.is_visible(head.worker_id(), head.tx_id(), false) {
        if head.is_removed() {
            return (OpResult::NotFound, 1);
        }
        callback(head.chained_value());
        return (OpResult::Ok, 1);
    }

    // Head is not visible.
    if head.is_final() {
        return (OpResult::NotFound, 1);
    }

    let mut materialized = head.chained_value().to_vec();
    let mut next = head.writer();
    let mut chain_length: u16 = 1;

    loop {
        let mut adopted = None;
        let mut removed = false;
        let found = worker.versions().retrieve_version(
            next.tx_id,
            tree_id,
            next.command_id,
            |bytes| {
                let version = VersionRef::new(bytes);
                if version.is_delta() {
                    let (descriptor, consumed) = UpdateDescriptor::read_from(version.payload())
                        .expect("stored deltas are well-formed");
                    apply_diff(&descriptor, &mut materialized, &version.payload()[consumed..]);
                } else {
                    materialized = version.payload().to_vec();
                }
                removed = version.is_removed();
                adopted = Some(version.writer());
            },
        );
        if !found {
            return (OpResult::NotFound, chain_length);
        }
        let identity = adopted.expect("callback ran");
        if worker.is_visible(identity.worker_id, identity.tx_id, false) {
            if removed {
                return (OpResult::NotFound, chain_length);
            }
            callback(&materialized);
            return (OpResult::Ok, chain_length);
        }
        next = identity;
        chain_length += 1;
        assert!(
            chain_length <= max_chain_length,
            "version chain exceeded maximum length"
        );
    }
}
