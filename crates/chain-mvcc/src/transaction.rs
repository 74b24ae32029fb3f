//! Transactions.
//!
//! A transaction is the unit of isolation: it carries its timestamp, its
//! isolation level, the snapshot captured at start (for SI and above), and
//! the bookkeeping that must be drained at commit or rollback (2PL read
//! locks, staged garbage-collection TODOs).

use chain_common::{TreeId, TxnId, WorkerId};

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed: every read observes the latest committed state.
    ReadCommitted,
    /// Snapshot isolation: reads observe the state as of transaction start.
    #[default]
    SnapshotIsolation,
    /// Serializable snapshot isolation: SI plus read tracking on primaries
    /// (read timestamps, or read-lock bitmaps under 2PL).
    Serializable,
}

/// Statement mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// The transaction spans exactly one operation and auto-commits.
    #[default]
    SingleStatement,
    /// The transaction spans multiple operations and commits explicitly.
    MultiStatement,
}

/// A point-GC work item staged by a remove, executed after the staging
/// transaction's effects fall below the global snapshot low-water mark.
#[derive(Debug, Clone)]
pub struct StagedTodo {
    /// Tree the tombstone lives in.
    pub tree_id: TreeId,
    /// Opaque entry bytes interpreted by the tree's `todo` capability
    /// (key plus an optional dangling pointer).
    pub entry: Vec<u8>,
    /// Worker identity the tombstone is expected to carry.
    pub version_worker: WorkerId,
    /// Transaction identity the tombstone is expected to carry.
    pub version_tts: TxnId,
}

/// An active transaction.
#[derive(Debug)]
pub struct Transaction {
    tts: TxnId,
    isolation: IsolationLevel,
    mode: TxMode,
    read_only: bool,
    /// Captured per-worker horizons (empty under read committed).
    snapshot: Vec<u64>,
    /// Keys whose 2PL read-lock bit this transaction holds.
    read_locks: Vec<(TreeId, Vec<u8>)>,
    /// Point-GC entries staged by removes.
    staged_todos: Vec<StagedTodo>,
}

impl Transaction {
    /// Creates a transaction. `snapshot` must be empty for read committed
    /// and the captured horizon table otherwise.
    #[must_use]
    pub fn new(
        tts: TxnId,
        isolation: IsolationLevel,
        mode: TxMode,
        read_only: bool,
        snapshot: Vec<u64>,
    ) -> Self {
        Self {
            tts,
            isolation,
            mode,
            read_only,
            snapshot,
            read_locks: Vec::new(),
            staged_todos: Vec::new(),
        }
    }

    /// Returns the transaction timestamp.
    #[inline]
    #[must_use]
    pub fn tts(&self) -> TxnId {
        self.tts
    }

    /// Returns the isolation level.
    #[inline]
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns true under serializable isolation.
    #[inline]
    #[must_use]
    pub fn is_serializable(&self) -> bool {
        self.isolation == IsolationLevel::Serializable
    }

    /// Returns true under snapshot isolation or stronger.
    #[inline]
    #[must_use]
    pub fn at_least_si(&self) -> bool {
        !matches!(self.isolation, IsolationLevel::ReadCommitted)
    }

    /// Returns true for single-statement (auto-commit) transactions.
    #[inline]
    #[must_use]
    pub fn is_single_statement(&self) -> bool {
        self.mode == TxMode::SingleStatement
    }

    /// Returns true for read-only transactions.
    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the captured horizon for `worker`'s transactions.
    ///
    /// # Panics
    ///
    /// Panics if the transaction runs under read committed (no snapshot).
    #[inline]
    #[must_use]
    pub fn snapshot_horizon(&self, worker: WorkerId) -> u64 {
        self.snapshot[worker.index()]
    }

    /// Returns the snapshot floor: the smallest captured horizon.
    #[must_use]
    pub fn snapshot_floor(&self) -> Option<u64> {
        self.snapshot.iter().copied().min()
    }

    /// Records a held 2PL read lock for release at transaction end.
    pub fn record_read_lock(&mut self, tree_id: TreeId, key: Vec<u8>) {
        self.read_locks.push((tree_id, key));
    }

    /// Drains the held 2PL read locks.
    #[must_use]
    pub fn take_read_locks(&mut self) -> Vec<(TreeId, Vec<u8>)> {
        std::mem::take(&mut self.read_locks)
    }

    /// Stages a point-GC TODO.
    pub fn stage_todo(&mut self, todo: StagedTodo) {
        self.staged_todos.push(todo);
    }

    /// Drains the staged point-GC TODOs.
    #[must_use]
    pub fn take_staged_todos(&mut self) -> Vec<StagedTodo> {
        std::mem::take(&mut self.staged_todos)
    }
}
