//! The versions store.
//!
//! Secondary versions are keyed by (transaction, tree, command) and hold
//! the encoded version record bytes. Records are constructed in place via
//! the reserve-and-fill pattern: `insert_version` allocates exactly the
//! requested size and hands the caller a writable view whose lifetime ends
//! when the call returns.
//!
//! Each entry is written once, by the worker that owns the superseding
//! transaction, and read by any worker walking a chain during
//! reconstruction. The map is sharded internally, so writer/reader
//! interleavings on different keys do not contend.

use dashmap::DashMap;

use chain_common::{CommandId, TreeId, TxnId};

/// Composite key of a secondary version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionKey {
    /// Transaction that superseded the versioned state.
    pub tx_id: TxnId,
    /// Tree the version belongs to.
    pub tree_id: TreeId,
    /// Command stamp of the superseding write.
    pub command_id: CommandId,
}

/// Shared store of secondary version records.
#[derive(Debug, Default)]
pub struct VersionsSpace {
    entries: DashMap<VersionKey, Box<[u8]>>,
}

impl VersionsSpace {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a version of exactly `size` bytes, constructed in place by
    /// `fill`.
    pub fn insert_version<F>(
        &self,
        tx_id: TxnId,
        tree_id: TreeId,
        command_id: CommandId,
        size: usize,
        fill: F,
    ) where
        F: FnOnce(&mut [u8]),
    {
        let mut payload = vec![0u8; size].into_boxed_slice();
        fill(&mut payload);
        self.entries.insert(
            VersionKey {
                tx_id,
                tree_id,
                command_id,
            },
            payload,
        );
    }

    /// Invokes `read` on the stored bytes if the version exists.
    pub fn retrieve_version<F>(
        &self,
        tx_id: TxnId,
        tree_id: TreeId,
        command_id: CommandId,
        read: F,
    ) -> bool
    where
        F: FnOnce(&[u8]),
    {
        match self.entries.get(&VersionKey {
            tx_id,
            tree_id,
            command_id,
        }) {
            Some(entry) => {
                read(entry.value());
                true
            }
            None => false,
        }
    }

    /// Removes a single version. Returns true if it existed.
    pub fn remove_version(&self, tx_id: TxnId, tree_id: TreeId, command_id: CommandId) -> bool {
        self.entries
            .remove(&VersionKey {
                tx_id,
                tree_id,
                command_id,
            })
            .is_some()
    }

    /// Retains only the versions for which `keep` returns true; returns
    /// the number of dropped entries. Garbage collection drives this with
    /// a predicate over the decoded `gc_trigger`.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&VersionKey, &[u8]) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, bytes| keep(key, bytes));
        before - self.entries.len()
    }

    /// Returns the number of stored versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
