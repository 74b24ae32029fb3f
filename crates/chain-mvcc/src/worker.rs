//! Workers: the per-thread execution context.
//!
//! A worker owns at most one logical transaction at a time. It carries the
//! per-worker command-id counter, the private WAL buffer, handles to the
//! shared global state, versions store, and dispatch registry, and it
//! answers every visibility question the tree asks.
//!
//! Workers are deliberately not `Sync`: each lives on its own thread. All
//! cross-worker communication happens through the shared structures.

use std::cell::{Cell, RefCell, RefMut};
use std::sync::Arc;

use tracing::debug;

use chain_common::{CommandId, EngineConfig, TreeId, TxnId, WorkerId};
use chain_wal::{WalBuffer, WalKind, WalRecordRef};

use crate::dispatch::DispatchRegistry;
use crate::global::GlobalState;
use crate::transaction::{IsolationLevel, StagedTodo, Transaction, TxMode};
use crate::versions::VersionsSpace;

/// Tree id used for transaction markers in the WAL stream.
const MARKER_TREE: TreeId = TreeId::new(0);

/// Per-thread execution context.
pub struct Worker {
    worker_id: WorkerId,
    config: Arc<EngineConfig>,
    global: Arc<GlobalState>,
    versions: Arc<VersionsSpace>,
    registry: Arc<DispatchRegistry>,
    /// Monotonic across transactions; never reset.
    command_id: Cell<u32>,
    wal: RefCell<WalBuffer>,
    active: RefCell<Option<Transaction>>,
    /// Point-GC entries from committed transactions, awaiting the LWM.
    pending_todos: RefCell<Vec<StagedTodo>>,
}

impl Worker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        worker_id: WorkerId,
        config: Arc<EngineConfig>,
        global: Arc<GlobalState>,
        versions: Arc<VersionsSpace>,
        registry: Arc<DispatchRegistry>,
    ) -> Self {
        Self {
            worker_id,
            config,
            global,
            versions,
            registry,
            command_id: Cell::new(0),
            wal: RefCell::new(WalBuffer::new()),
            active: RefCell::new(None),
            pending_todos: RefCell::new(Vec::new()),
        }
    }

    /// Returns the worker id.
    #[inline]
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Returns the engine configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the global tracking state.
    #[inline]
    #[must_use]
    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    /// Returns the versions store.
    #[inline]
    #[must_use]
    pub fn versions(&self) -> &VersionsSpace {
        &self.versions
    }

    /// Returns the dispatch registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    /// Allocates the next command id.
    #[must_use]
    pub fn next_command_id(&self) -> CommandId {
        let next = self.command_id.get();
        self.command_id.set(next + 1);
        CommandId::new(next)
    }

    /// Returns a mutable borrow of the WAL buffer.
    pub fn wal_mut(&self) -> RefMut<'_, WalBuffer> {
        self.wal.borrow_mut()
    }

    // =========================================================================
    // Transaction lifecycle
    // =========================================================================

    /// Begins a read-write transaction.
    pub fn begin(&self, isolation: IsolationLevel, mode: TxMode) {
        self.begin_with(isolation, mode, false);
    }

    /// Begins a transaction, optionally read-only.
    ///
    /// # Panics
    ///
    /// Panics if a transaction is already active on this worker.
    pub fn begin_with(&self, isolation: IsolationLevel, mode: TxMode, read_only: bool) {
        let mut active = self.active.borrow_mut();
        assert!(active.is_none(), "worker already has an active transaction");

        let tts = self.global.next_tts();
        let rc_safe = isolation == IsolationLevel::ReadCommitted;
        self.global.publish_active(self.worker_id, tts, rc_safe);

        let snapshot = if isolation == IsolationLevel::ReadCommitted {
            Vec::new()
        } else {
            self.global.capture_snapshot()
        };
        let tx = Transaction::new(tts, isolation, mode, read_only, snapshot);
        if let Some(floor) = tx.snapshot_floor() {
            self.global.pin_snapshot(self.worker_id, floor);
        }
        debug!(worker = %self.worker_id, tts = %tts, ?isolation, "begin");
        *active = Some(tx);
    }

    /// Returns true if a transaction is active.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.active.borrow().is_some()
    }

    /// Returns the active transaction's timestamp.
    ///
    /// # Panics
    ///
    /// Panics if no transaction is active.
    #[must_use]
    pub fn active_tts(&self) -> TxnId {
        self.with_tx(Transaction::tts)
    }

    /// Returns true if the active transaction is serializable.
    #[must_use]
    pub fn tx_is_serializable(&self) -> bool {
        self.with_tx(Transaction::is_serializable)
    }

    /// Returns true if the active transaction is at least snapshot
    /// isolated.
    #[must_use]
    pub fn tx_at_least_si(&self) -> bool {
        self.with_tx(Transaction::at_least_si)
    }

    /// Returns true if the active transaction auto-commits per statement.
    #[must_use]
    pub fn tx_is_single_statement(&self) -> bool {
        self.with_tx(Transaction::is_single_statement)
    }

    /// Returns true if the active transaction is read-only.
    #[must_use]
    pub fn tx_is_read_only(&self) -> bool {
        self.with_tx(Transaction::is_read_only)
    }

    fn with_tx<R>(&self, f: impl FnOnce(&Transaction) -> R) -> R {
        let active = self.active.borrow();
        f(active.as_ref().expect("no active transaction"))
    }

    /// Records a held 2PL read lock on the active transaction.
    pub fn record_read_lock(&self, tree_id: TreeId, key: Vec<u8>) {
        let mut active = self.active.borrow_mut();
        active
            .as_mut()
            .expect("no active transaction")
            .record_read_lock(tree_id, key);
    }

    /// Stages a point-GC TODO on the active transaction.
    pub fn stage_todo(&self, todo: StagedTodo) {
        let mut active = self.active.borrow_mut();
        active
            .as_mut()
            .expect("no active transaction")
            .stage_todo(todo);
    }

    /// Commits the active transaction.
    ///
    /// Releases 2PL read locks, moves staged point-GC entries into the
    /// pending queue, publishes the commit, and clears the WAL stream.
    ///
    /// # Panics
    ///
    /// Panics if no transaction is active.
    pub fn commit(&self) {
        let mut tx = self
            .active
            .borrow_mut()
            .take()
            .expect("no active transaction");
        self.wal.borrow_mut().append_marker(WalKind::Commit, MARKER_TREE);

        self.release_read_locks(&mut tx);
        self.pending_todos
            .borrow_mut()
            .extend(tx.take_staged_todos());

        self.global.publish_finished(self.worker_id, tx.tts());
        self.wal.borrow_mut().clear();
        debug!(worker = %self.worker_id, tts = %tx.tts(), "commit");
    }

    /// Rolls back the active transaction.
    ///
    /// Replays the WAL stream in reverse through the registered trees'
    /// `undo` capabilities, drops staged TODOs, releases 2PL read locks,
    /// and publishes the transaction as finished.
    ///
    /// # Panics
    ///
    /// Panics if no transaction is active.
    pub fn rollback(&self) {
        let mut tx = self
            .active
            .borrow_mut()
            .take()
            .expect("no active transaction");

        let records = self.wal.borrow_mut().take_records();
        for bytes in records.iter().rev() {
            let record = WalRecordRef::parse(bytes).expect("worker-written records are valid");
            if !record.kind().is_undoable() {
                continue;
            }
            let tree = self
                .registry
                .get(record.tree_id())
                .expect("undo against an unregistered tree");
            tree.undo(self, bytes);
        }

        self.release_read_locks(&mut tx);
        drop(tx.take_staged_todos());

        self.wal.borrow_mut().append_marker(WalKind::Abort, MARKER_TREE);
        self.global.publish_finished(self.worker_id, tx.tts());
        self.wal.borrow_mut().clear();
        debug!(worker = %self.worker_id, tts = %tx.tts(), "rollback");
    }

    fn release_read_locks(&self, tx: &mut Transaction) {
        if !(self.config.two_pl && tx.is_serializable()) {
            return;
        }
        for (tree_id, key) in tx.take_read_locks() {
            if let Some(tree) = self.registry.get(tree_id) {
                tree.unlock(self, &key);
            }
        }
    }

    /// Executes pending point-GC entries whose staging transaction has
    /// fallen at or below the global snapshot low-water mark.
    pub fn execute_ready_todos(&self) {
        let lwm = self.global.snapshot_lwm();
        let mut pending = self.pending_todos.borrow_mut();
        let mut remaining = Vec::with_capacity(pending.len());
        for todo in pending.drain(..) {
            if todo.version_tts <= lwm {
                if let Some(tree) = self.registry.get(todo.tree_id) {
                    tree.todo(self, &todo.entry, todo.version_worker, todo.version_tts);
                }
            } else {
                remaining.push(todo);
            }
        }
        *pending = remaining;
    }

    /// Returns the number of pending point-GC entries.
    #[must_use]
    pub fn pending_todo_count(&self) -> usize {
        self.pending_todos.borrow().len()
    }

    // =========================================================================
    // Visibility oracle
    // =========================================================================

    /// Answers whether a record written by (`writer`, `tx_id`) is visible
    /// to this worker's current transaction.
    ///
    /// - A worker's own writes are always visible to it.
    /// - With `writing = true` the answer is against the *live* horizons:
    ///   mutators must not see (and must abort on) in-flight foreign
    ///   writes regardless of isolation level.
    /// - Read committed reads the live horizons; snapshot isolation and
    ///   above read the horizons captured at transaction start.
    ///
    /// Without an active transaction (pager-driven GC) the live horizons
    /// decide: everything finished is visible.
    #[must_use]
    pub fn is_visible(&self, writer: WorkerId, tx_id: TxnId, writing: bool) -> bool {
        let active = self.active.borrow();
        let Some(tx) = active.as_ref() else {
            return tx_id.as_u64() < self.global.live_horizon(writer);
        };

        if writer == self.worker_id && tx_id == tx.tts() {
            return true;
        }
        if writing {
            return tx_id.as_u64() < self.global.live_horizon(writer);
        }
        match tx.isolation() {
            IsolationLevel::ReadCommitted => tx_id.as_u64() < self.global.live_horizon(writer),
            _ => tx_id.as_u64() < tx.snapshot_horizon(writer),
        }
    }

    /// Returns true if skipping version creation is currently safe under
    /// the elision policy: the active transaction is single-statement and
    /// every worker signals read-committed safety.
    #[must_use]
    pub fn version_elision_safe(&self) -> bool {
        self.tx_is_single_statement() && self.global.rc_safe_everywhere()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .field("active", &self.active.borrow().is_some())
            .finish()
    }
}
