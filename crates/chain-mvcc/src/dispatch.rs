//! The tree dispatch table.
//!
//! Every tree registers one [`TreeDispatch`] implementation: a table of
//! function-valued capabilities the pager and the transaction layer invoke
//! without knowing the tree's concrete type. Rollback routes WAL records
//! through `undo`, post-commit garbage collection through `todo`, 2PL read
//! lock release through `unlock`, and the pager consults
//! `check_space_utilization`, `iterate_children`, `find_parent`,
//! `checkpoint`, and `serialize`/`deserialize`.

use std::sync::Arc;

use dashmap::DashMap;

use chain_common::{ChainResult, PageId, TreeId, TxnId, WorkerId};

use crate::worker::Worker;

/// Verdict of a space-utilization check on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceCheckResult {
    /// Nothing to do.
    Nothing,
    /// The page is exhausted for now; the pager should pick another one.
    PickAnotherPage,
    /// The check freed space; re-examine the same page.
    RetrySamePage,
}

/// Capabilities a tree exposes to the pager and the transaction layer.
pub trait TreeDispatch: Send + Sync {
    /// Returns the tree's registry id.
    fn tree_id(&self) -> TreeId;

    /// Visits the child pages of `page`.
    fn iterate_children(&self, page: PageId, visit: &mut dyn FnMut(PageId));

    /// Returns the parent of `page`, or `None` for the root.
    fn find_parent(&self, page: PageId) -> Option<PageId>;

    /// Examines `page` for reclaimable garbage, collecting it when the
    /// configured trigger fires.
    fn check_space_utilization(&self, worker: &Worker, page: PageId) -> SpaceCheckResult;

    /// Serializes the current contents of `page` into `dest`. Returns
    /// false if the page does not belong to this tree.
    fn checkpoint(&self, page: PageId, dest: &mut Vec<u8>) -> bool;

    /// Applies the inverse of one WAL record (runtime rollback).
    fn undo(&self, worker: &Worker, wal_record: &[u8]);

    /// Executes a staged point-GC entry.
    fn todo(&self, worker: &Worker, entry: &[u8], version_worker: WorkerId, version_tts: TxnId);

    /// Releases the worker's 2PL read-lock bit on the key in `entry`.
    fn unlock(&self, worker: &Worker, entry: &[u8]);

    /// Serializes the tree's metadata.
    fn serialize(&self) -> Vec<u8>;

    /// Restores tree metadata serialized by [`TreeDispatch::serialize`].
    fn deserialize(&self, bytes: &[u8]) -> ChainResult<()>;
}

/// Registry mapping tree ids to their dispatch tables.
#[derive(Default)]
pub struct DispatchRegistry {
    trees: DashMap<TreeId, Arc<dyn TreeDispatch>>,
}

impl DispatchRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tree, replacing any previous registration.
    pub fn register(&self, tree: Arc<dyn TreeDispatch>) {
        self.trees.insert(tree.tree_id(), tree);
    }

    /// Removes a tree's registration.
    pub fn deregister(&self, tree_id: TreeId) {
        self.trees.remove(&tree_id);
    }

    /// Looks up a tree's dispatch table.
    #[must_use]
    pub fn get(&self, tree_id: TreeId) -> Option<Arc<dyn TreeDispatch>> {
        self.trees.get(&tree_id).map(|entry| Arc::clone(&entry))
    }

    /// Returns the number of registered trees.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Returns true if no tree is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("trees", &self.trees.len())
            .finish()
    }
}
