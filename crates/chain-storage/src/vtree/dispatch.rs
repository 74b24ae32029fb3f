//! Dispatch-table implementation.
//!
//! The tree's capability table for the pager and the transaction layer:
//! child iteration and parent lookup over the routing structure,
//! space-utilization checks (page-wise GC), leaf checkpointing, WAL undo,
//! point-GC TODOs, 2PL read-lock release, and metadata
//! serialize/restore. Registered in the `DispatchRegistry` under the
//! tree's id.

use chain_common::{ChainError, ChainResult, PageId, TreeId, TxnId, WorkerId};
use chain_mvcc::{SpaceCheckResult, TreeDispatch, Worker};

use crate::page::LeafPage;

use super::operator::VersionedTree;

const METADATA_MAGIC: [u8; 4] = *b"CTRE";

impl TreeDispatch for VersionedTree {
    fn tree_id(&self) -> TreeId {
        self.id()
    }

    fn iterate_children(&self, page: PageId, visit: &mut dyn FnMut(PageId)) {
        let structure = self.structure().read();
        if let Some(children) = structure.children_of(page) {
            for child in children {
                visit(child);
            }
        }
    }

    fn find_parent(&self, page: PageId) -> Option<PageId> {
        self.structure().read().parent_of(page)
    }

    fn check_space_utilization(&self, worker: &Worker, page: PageId) -> SpaceCheckResult {
        self.check_space(worker, page)
    }

    fn checkpoint(&self, page: PageId, dest: &mut Vec<u8>) -> bool {
        let Some(frame) = self.pool().get(page) else {
            return false;
        };
        let node = frame.node().read();
        dest.clear();
        dest.extend_from_slice(node.as_bytes());
        true
    }

    fn undo(&self, _worker: &Worker, wal_record: &[u8]) {
        self.undo_record(wal_record);
    }

    fn todo(&self, _worker: &Worker, entry: &[u8], version_worker: WorkerId, version_tts: TxnId) {
        self.point_todo(entry, version_worker, version_tts);
    }

    fn unlock(&self, worker: &Worker, entry: &[u8]) {
        self.release_read_lock(worker, entry);
    }

    fn serialize(&self) -> Vec<u8> {
        let mut leaves: Vec<Vec<u8>> = Vec::new();
        let structure = self.structure().read();
        structure.for_each_leaf(&mut |frame| {
            leaves.push(frame.node().read().as_bytes().to_vec());
        });
        drop(structure);

        let mut out = Vec::new();
        out.extend_from_slice(&METADATA_MAGIC);
        out.extend_from_slice(&self.id().as_u32().to_le_bytes());
        out.extend_from_slice(&(self.config().page_size as u32).to_le_bytes());
        out.extend_from_slice(&(leaves.len() as u32).to_le_bytes());
        for leaf in leaves {
            out.extend_from_slice(&(leaf.len() as u32).to_le_bytes());
            out.extend_from_slice(&leaf);
        }
        out
    }

    fn deserialize(&self, bytes: &[u8]) -> ChainResult<()> {
        let corrupt = |what: &str| ChainError::MetadataCorrupted(what.to_string());
        let read_u32 = |at: usize| -> ChainResult<u32> {
            bytes
                .get(at..at + 4)
                .map(|b| u32::from_le_bytes(b.try_into().expect("sliced four bytes")))
                .ok_or_else(|| corrupt("truncated header"))
        };

        if bytes.get(..4) != Some(&METADATA_MAGIC[..]) {
            return Err(corrupt("bad magic"));
        }
        if read_u32(4)? != self.id().as_u32() {
            return Err(corrupt("tree id mismatch"));
        }
        if read_u32(8)? as usize != self.config().page_size {
            return Err(corrupt("page size mismatch"));
        }
        let leaf_count = read_u32(12)? as usize;

        let mut leaves = Vec::with_capacity(leaf_count);
        let mut at = 16;
        for _ in 0..leaf_count {
            let len = read_u32(at)? as usize;
            at += 4;
            let data = bytes
                .get(at..at + len)
                .ok_or_else(|| corrupt("truncated leaf"))?;
            at += len;
            leaves.push(LeafPage::from_bytes(data.to_vec()));
        }

        self.structure()
            .write()
            .rebuild_from_leaves(self.pool(), leaves);
        Ok(())
    }
}
