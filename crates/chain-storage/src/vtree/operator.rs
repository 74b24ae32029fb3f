//! The transactional leaf operator.
//!
//! `VersionedTree` owns the seek / insert / update / remove logic and its
//! interaction with tuple write locks, the versions store, WAL emission,
//! and SSI read tracking. Reads try the optimistic latch path first and
//! fall back to the pessimistic path for reconstruction; serializable
//! transactions always take the pessimistic path because a successful
//! read must also stamp the primary.
//!
//! Locking discipline (see `structure`): descent holds the structure lock
//! shared while latching the target leaf; structural fixes (splits,
//! merges) run with no leaf latched and the operation re-enters its
//! restartable region afterwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use chain_common::constants::{CHAIN_SN_BYTES, MAX_KEY_SIZE};
use chain_common::{ChainSn, EngineConfig, OpResult, TreeId, TxnId};
use chain_mvcc::{StagedTodo, Worker};
use chain_wal::{WalKind, WriterIdentity};

use crate::buffer::{restart_loop, ExclusiveGuard, OptimisticGuard, PagePool, SharedGuard};
use crate::buffer::BufferFrame;

use super::counters::TreeCounters;
use super::descriptor::{generate_diff, generate_xor_diff, UpdateDescriptor};
use super::fat;
use super::gc::DanglingPointer;
use super::iterator::{ExclusiveIterator, SharedIterator};
use super::reconstruct::reconstruct_tuple;
use super::structure::TreeStructure;
use super::tuple::{
    init_chained, init_version, TupleFormat, TupleMut, TupleRef, VersionFlags, TUPLE_HEADER_SIZE,
    VERSION_HEADER_SIZE,
};

/// Composes the stored key: `user_key || chain_sn(0)`.
pub(crate) fn chain_key(user_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + CHAIN_SN_BYTES);
    key.extend_from_slice(user_key);
    key.extend_from_slice(&ChainSn::PRIMARY.to_be_bytes());
    key
}

/// Splits a stored key into the user key and its chain sequence number.
pub(crate) fn split_chain_key(stored: &[u8]) -> (&[u8], ChainSn) {
    let at = stored.len() - CHAIN_SN_BYTES;
    let sn = ChainSn::from_be_bytes(stored[at..].try_into().expect("suffix length"));
    (&stored[..at], sn)
}

/// A multi-version, version-indexed key/value tree.
pub struct VersionedTree {
    tree_id: TreeId,
    config: Arc<EngineConfig>,
    pool: Arc<PagePool>,
    structure: RwLock<TreeStructure>,
    counters: TreeCounters,
    /// Dangling pointers staged by removes, consumed by point GC.
    pub(crate) dangling: DashMap<u64, DanglingPointer>,
    dangling_token: AtomicU64,
}

impl VersionedTree {
    /// Creates an empty tree.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn new(tree_id: TreeId, config: Arc<EngineConfig>) -> Self {
        if let Err(problem) = config.validate() {
            panic!("invalid engine configuration: {problem}");
        }
        let pool = Arc::new(PagePool::new(config.page_size));
        let structure = TreeStructure::new(&pool);
        Self {
            tree_id,
            config,
            pool,
            structure: RwLock::new(structure),
            counters: TreeCounters::default(),
            dangling: DashMap::new(),
            dangling_token: AtomicU64::new(1),
        }
    }

    /// Returns the tree id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TreeId {
        self.tree_id
    }

    /// Returns the engine configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the telemetry counters.
    #[inline]
    #[must_use]
    pub fn counters(&self) -> &TreeCounters {
        &self.counters
    }

    /// Returns the root's page id.
    #[must_use]
    pub fn root_page_id(&self) -> chain_common::PageId {
        self.structure.read().root_page_id()
    }

    pub(crate) fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    pub(crate) fn structure(&self) -> &RwLock<TreeStructure> {
        &self.structure
    }

    // =========================================================================
    // Latching helpers
    // =========================================================================

    pub(crate) fn exclusive_for(&self, stored_key: &[u8]) -> ExclusiveIterator {
        let structure = self.structure.read();
        let frame = Arc::clone(structure.leaf_for(stored_key));
        let guard = ExclusiveGuard::acquire(&frame);
        drop(structure);
        ExclusiveIterator::new(guard)
    }

    fn shared_for(&self, stored_key: &[u8]) -> SharedIterator {
        let structure = self.structure.read();
        let frame = Arc::clone(structure.leaf_for(stored_key));
        let guard = SharedGuard::acquire(&frame);
        drop(structure);
        SharedIterator::new(guard)
    }

    fn acquire_shared(
        &self,
        locate: impl for<'a> FnOnce(&'a TreeStructure) -> Option<&'a Arc<BufferFrame>>,
    ) -> Option<SharedGuard> {
        let structure = self.structure.read();
        let frame = Arc::clone(locate(&structure)?);
        Some(SharedGuard::acquire(&frame))
    }

    pub(crate) fn split_for_key(&self, stored_key: &[u8]) {
        self.structure.write().split_for_key(&self.pool, stored_key);
    }

    pub(crate) fn merge_for_key(&self, stored_key: &[u8]) {
        self.structure.write().merge_for_key(&self.pool, stored_key);
    }

    fn maybe_contention_split(&self, frame: &Arc<BufferFrame>, stored_key: &[u8]) {
        if frame.contention() < self.config.contention_split_threshold {
            return;
        }
        frame.reset_contention();
        let worth_it = frame.node().read().slot_count() >= 4;
        if worth_it {
            trace!(tree = %self.tree_id, "contention split");
            self.split_for_key(stored_key);
        }
    }

    // =========================================================================
    // lookup
    // =========================================================================

    /// Looks up `key`, invoking `callback` with the visible value.
    pub fn lookup(&self, worker: &Worker, key: &[u8], mut callback: impl FnMut(&[u8])) -> OpResult {
        debug_assert!(key.len() <= MAX_KEY_SIZE);
        if worker.tx_is_serializable() {
            return self.lookup_pessimistic(worker, key, &mut callback);
        }
        match self.lookup_optimistic(worker, key, &mut callback) {
            Some(result) => result,
            None => self.lookup_pessimistic(worker, key, &mut callback),
        }
    }

    /// Optimistic fast path: visible heads are served in place under a
    /// validated guard. Returns `None` when the head is not visible and
    /// reconstruction is required.
    fn lookup_optimistic(
        &self,
        worker: &Worker,
        key: &[u8],
        callback: &mut dyn FnMut(&[u8]),
    ) -> Option<OpResult> {
        let stored_key = chain_key(key);
        restart_loop(|| {
            let structure = self.structure.read();
            let frame = Arc::clone(structure.leaf_for(&stored_key));
            let guard = OptimisticGuard::acquire(&frame)?;
            drop(structure);

            let leaf = guard.leaf();
            match leaf.lower_bound(&stored_key) {
                Ok(slot) => {
                    let payload = leaf.payload_at(slot);
                    let tuple = TupleRef::new(payload);
                    if !worker.is_visible(tuple.worker_id(), tuple.tx_id(), false) {
                        return Ok(None);
                    }
                    if tuple.format() == TupleFormat::Chained && tuple.is_removed() {
                        guard.recheck()?;
                        return Ok(Some(OpResult::NotFound));
                    }
                    let value = match tuple.format() {
                        TupleFormat::Chained => tuple.chained_value(),
                        TupleFormat::Fat => fat::value(payload),
                    };
                    callback(value);
                    guard.recheck()?;
                    self.counters.add(&self.counters.read_chains, 1);
                    self.counters.add(&self.counters.read_versions_visited, 1);
                    Ok(Some(OpResult::Ok))
                }
                Err(_) => {
                    // Key absent: validate and report cleanly.
                    guard.recheck()?;
                    Ok(Some(OpResult::NotFound))
                }
            }
        })
    }

    fn lookup_pessimistic(
        &self,
        worker: &Worker,
        key: &[u8],
        callback: &mut dyn FnMut(&[u8]),
    ) -> OpResult {
        let stored_key = chain_key(key);
        let track_reads = worker.tx_is_serializable() && !worker.tx_is_read_only();

        let (result, chain_length) = if track_reads {
            // A successful serializable read stamps the primary, so the
            // leaf is taken exclusively.
            let mut iter = self.exclusive_for(&stored_key);
            if iter.seek_exact(&stored_key) != OpResult::Ok {
                return OpResult::NotFound;
            }
            let outcome = reconstruct_tuple(
                worker,
                self.tree_id,
                self.config.max_chain_length,
                iter.value(),
                callback,
            );
            if outcome.0 == OpResult::Ok {
                self.stamp_read(worker, &mut iter, key);
            }
            outcome
        } else {
            let mut iter = self.shared_for(&stored_key);
            if iter.seek_exact(&stored_key) != OpResult::Ok {
                return OpResult::NotFound;
            }
            reconstruct_tuple(
                worker,
                self.tree_id,
                self.config.max_chain_length,
                iter.value(),
                callback,
            )
        };

        self.counters.add(&self.counters.read_chains, 1);
        self.counters
            .add(&self.counters.read_versions_visited, u64::from(chain_length));
        debug_assert!(matches!(
            result,
            OpResult::Ok | OpResult::NotFound | OpResult::AbortTx
        ));
        result
    }

    /// Records a serializable read on the primary: bumps `read_ts`, or
    /// sets the worker's bit in the 2PL read-lock bitmap (and remembers
    /// the key for release at transaction end).
    fn stamp_read(&self, worker: &Worker, iter: &mut ExclusiveIterator, key: &[u8]) {
        let tts = worker.active_tts();
        let mut tuple = TupleMut::new(iter.value_mut());
        if self.config.two_pl {
            let word = tuple.as_ref().read_word();
            let bit = worker.worker_id().lock_bit();
            if word & bit == 0 {
                tuple.set_read_word(word | bit);
                worker.record_read_lock(self.tree_id, key.to_vec());
            }
        } else if tuple.as_ref().read_word() < tts.as_u64() {
            tuple.set_read_word(tts.as_u64());
        }
        iter.mark_dirty();
    }

    // =========================================================================
    // scans
    // =========================================================================

    /// Iterates keys at or after `start_key` in ascending order, invoking
    /// `callback(key, value)` until it returns false or keys run out.
    pub fn scan_asc(
        &self,
        worker: &Worker,
        start_key: &[u8],
        mut callback: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> OpResult {
        let mut cursor = chain_key(start_key);
        let mut guard = self
            .acquire_shared(|s| Some(s.leaf_for(&cursor)))
            .expect("a covering leaf always exists");
        loop {
            let leaf = guard.leaf();
            let start = leaf.lower_bound(&cursor).unwrap_or_else(|pos| pos);
            for slot in start..leaf.slot_count() {
                let (user_key, sn) = split_chain_key(leaf.key_at(slot));
                if !sn.is_primary() {
                    continue;
                }
                match self.visible_value(worker, leaf.payload_at(slot)) {
                    Some(value) => {
                        if !callback(user_key, &value) {
                            return OpResult::Ok;
                        }
                    }
                    None => continue,
                }
            }
            let boundary = if leaf.slot_count() > 0 {
                leaf.key_at(leaf.slot_count() - 1).to_vec()
            } else {
                cursor.clone()
            };
            drop(guard);
            cursor = boundary.clone();
            cursor.push(0x00);
            match self.acquire_shared(|s| s.leaf_after(&boundary)) {
                Some(next) => guard = next,
                None => return OpResult::Ok,
            }
        }
    }

    /// Iterates keys at or before `start_key` in descending order,
    /// invoking `callback(key, value)` until it returns false or keys run
    /// out.
    pub fn scan_desc(
        &self,
        worker: &Worker,
        start_key: &[u8],
        mut callback: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> OpResult {
        let mut cursor = chain_key(start_key);
        let mut guard = self
            .acquire_shared(|s| Some(s.leaf_for(&cursor)))
            .expect("a covering leaf always exists");
        loop {
            let leaf = guard.leaf();
            let end = match leaf.lower_bound(&cursor) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            };
            for slot in (0..end).rev() {
                let (user_key, sn) = split_chain_key(leaf.key_at(slot));
                if !sn.is_primary() {
                    continue;
                }
                match self.visible_value(worker, leaf.payload_at(slot)) {
                    Some(value) => {
                        if !callback(user_key, &value) {
                            return OpResult::Ok;
                        }
                    }
                    None => continue,
                }
            }
            let boundary = if leaf.slot_count() > 0 {
                leaf.key_at(0).to_vec()
            } else {
                cursor.clone()
            };
            drop(guard);
            cursor = boundary.clone();
            match self.acquire_shared(|s| s.leaf_before(&boundary)) {
                Some(prev) => guard = prev,
                None => return OpResult::Ok,
            }
        }
    }

    fn visible_value(&self, worker: &Worker, primary: &[u8]) -> Option<Vec<u8>> {
        let mut value = None;
        let (result, chain_length) = reconstruct_tuple(
            worker,
            self.tree_id,
            self.config.max_chain_length,
            primary,
            &mut |bytes| value = Some(bytes.to_vec()),
        );
        self.counters.add(&self.counters.read_chains, 1);
        self.counters
            .add(&self.counters.read_versions_visited, u64::from(chain_length));
        if result == OpResult::Ok {
            value
        } else {
            None
        }
    }

    // =========================================================================
    // insert
    // =========================================================================

    /// Inserts `key` → `value`. Re-insertion of a present key aborts the
    /// transaction.
    pub fn insert(&self, worker: &Worker, key: &[u8], value: &[u8]) -> OpResult {
        debug_assert!(worker.has_active() && !worker.tx_is_read_only());
        debug_assert!(key.len() <= MAX_KEY_SIZE);
        worker.wal_mut().ensure_capacity(self.config.page_size);

        let stored_key = chain_key(key);
        let payload_length = TUPLE_HEADER_SIZE + value.len();
        if !crate::page::LeafPage::fits_empty(self.config.page_size, stored_key.len(), payload_length)
        {
            debug_assert!(false, "record can never fit a page");
            return OpResult::Other;
        }

        loop {
            let mut iter = self.exclusive_for(&stored_key);
            if iter.seek_to_insert(&stored_key) == OpResult::Duplicate {
                let tuple = TupleRef::new(iter.value());
                if tuple.is_write_locked()
                    || !worker.is_visible(tuple.worker_id(), tuple.tx_id(), true)
                {
                    return OpResult::AbortTx;
                }
                // A visible duplicate, possibly a tombstone awaiting GC:
                // reactivation is unsupported.
                debug_assert!(tuple.is_removed(), "insert of an existing key");
                return OpResult::AbortTx;
            }
            if iter.enough_space(&stored_key, payload_length) == OpResult::NotEnoughSpace {
                drop(iter);
                self.split_for_key(&stored_key);
                continue;
            }

            {
                let mut wal = worker.wal_mut();
                let mut slot = wal.reserve(WalKind::Insert, self.tree_id, key.len() + value.len());
                slot.set_key_length(key.len());
                slot.set_aux_length(value.len());
                slot.set_after(WriterIdentity::new(
                    worker.worker_id(),
                    worker.active_tts(),
                    chain_common::CommandId::FIRST,
                ));
                let payload = slot.payload_mut();
                payload[..key.len()].copy_from_slice(key);
                payload[key.len()..].copy_from_slice(value);
                slot.submit();
            }

            let dst = iter.insert_in_current(&stored_key, payload_length);
            init_chained(dst, worker.worker_id(), worker.active_tts());
            dst[TUPLE_HEADER_SIZE..].copy_from_slice(value);
            iter.mark_dirty();
            drop(iter);

            if worker.tx_is_single_statement() {
                worker.commit();
            }
            return OpResult::Ok;
        }
    }

    // =========================================================================
    // update
    // =========================================================================

    /// Updates `key` in place. The descriptor enumerates the byte ranges
    /// `callback` modifies; sizes never change.
    pub fn update_same_size_in_place(
        &self,
        worker: &Worker,
        key: &[u8],
        mut callback: impl FnMut(&mut [u8]),
        descriptor: &UpdateDescriptor,
    ) -> OpResult {
        debug_assert!(worker.has_active() && !worker.tx_is_read_only());
        worker.wal_mut().ensure_capacity(self.config.page_size);
        let stored_key = chain_key(key);

        loop {
            let mut iter = self.exclusive_for(&stored_key);
            if iter.seek_exact(&stored_key) != OpResult::Ok {
                debug_assert!(false, "update of a missing key");
                return OpResult::NotFound;
            }

            if let Some(conflict) = self.check_write_preconditions(worker, &iter) {
                return conflict;
            }
            TupleMut::new(iter.value_mut()).write_lock();
            self.counters.add(&self.counters.update_chains, 1);

            if TupleRef::new(iter.value()).format() == TupleFormat::Fat {
                match self.update_fat(worker, &mut iter, &mut callback, descriptor) {
                    OpResult::NotEnoughSpace => {
                        TupleMut::new(iter.value_mut()).unlock();
                        drop(iter);
                        self.split_for_key(&stored_key);
                        continue;
                    }
                    result => {
                        debug_assert_eq!(result, OpResult::Ok);
                        let frame = Arc::clone(iter.frame());
                        drop(iter);
                        self.maybe_contention_split(&frame, &stored_key);
                        if worker.tx_is_single_statement() {
                            worker.commit();
                        }
                        return OpResult::Ok;
                    }
                }
            }

            self.update_chained(worker, &mut iter, key, &mut callback, descriptor);
            let frame = Arc::clone(iter.frame());
            drop(iter);
            self.maybe_contention_split(&frame, &stored_key);
            if worker.tx_is_single_statement() {
                worker.commit();
            }
            return OpResult::Ok;
        }
    }

    /// Write-write and serializability checks shared by update and
    /// remove. Returns the abort verdict, if any.
    fn check_write_preconditions(
        &self,
        worker: &Worker,
        iter: &ExclusiveIterator,
    ) -> Option<OpResult> {
        let tuple = TupleRef::new(iter.value());
        if tuple.is_write_locked() || !worker.is_visible(tuple.worker_id(), tuple.tx_id(), true) {
            return Some(OpResult::AbortTx);
        }
        if worker.tx_is_serializable() {
            if self.config.two_pl {
                let counter = tuple.read_word();
                if counter != 0 && counter != worker.worker_id().lock_bit() {
                    return Some(OpResult::AbortTx);
                }
            } else if tuple.read_word() > worker.active_tts().as_u64() {
                return Some(OpResult::AbortTx);
            }
        }
        None
    }

    fn update_fat(
        &self,
        worker: &Worker,
        iter: &mut ExclusiveIterator,
        callback: &mut dyn FnMut(&mut [u8]),
        descriptor: &UpdateDescriptor,
    ) -> OpResult {
        let entry_start = iter.value().len();
        if !iter.extend(entry_start + fat::entry_size(descriptor)) {
            return OpResult::NotEnoughSpace;
        }
        let after = WriterIdentity::new(
            worker.worker_id(),
            worker.active_tts(),
            worker.next_command_id(),
        );
        fat::apply_update(iter.value_mut(), entry_start, after, descriptor, callback);
        {
            let mut tuple = TupleMut::new(iter.value_mut());
            if worker.tx_is_serializable() {
                if self.config.two_pl {
                    tuple.set_read_word(worker.worker_id().lock_bit());
                } else {
                    tuple.set_read_word(after.tx_id.as_u64());
                }
            }
            tuple.unlock();
        }
        iter.mark_dirty();
        OpResult::Ok
    }

    fn update_chained(
        &self,
        worker: &Worker,
        iter: &mut ExclusiveIterator,
        key: &[u8],
        callback: &mut dyn FnMut(&mut [u8]),
        descriptor: &UpdateDescriptor,
    ) {
        let config = &self.config;
        let mut update_without_versioning =
            config.update_version_elision || !config.mv || config.fupdate_chained;
        if update_without_versioning && !config.fupdate_chained && config.update_version_elision {
            // Elision must not lose state a concurrent multi-statement
            // reader could still need.
            update_without_versioning = worker.version_elision_safe();
        }

        let before = TupleRef::new(iter.value()).writer();
        let tts = worker.active_tts();
        let me = worker.worker_id();
        let delta_length = descriptor.size_bytes() + descriptor.diff_length();
        let command_id = worker.next_command_id();

        if !update_without_versioning {
            let secondary_length = VERSION_HEADER_SIZE + delta_length;
            let committed_before = if before.worker_id == me && before.tx_id == tts {
                TxnId::MAX
            } else {
                tts
            };
            let old_value = TupleRef::new(iter.value()).chained_value();
            worker.versions().insert_version(
                tts,
                self.tree_id,
                command_id,
                secondary_length,
                |buf| {
                    init_version(buf, before, VersionFlags::IS_DELTA, committed_before, tts);
                    let descriptor_len = descriptor.size_bytes();
                    descriptor
                        .write_to(&mut buf[VERSION_HEADER_SIZE..VERSION_HEADER_SIZE + descriptor_len]);
                    generate_diff(
                        descriptor,
                        &mut buf[VERSION_HEADER_SIZE + descriptor_len..],
                        old_value,
                    );
                },
            );
            self.counters.add(&self.counters.versions_created, 1);
        }
        iter.mark_dirty();

        // WAL: forward diff first, then the user mutation, then overwrite
        // the diff bytes with XOR(new, old) so undo can recover the
        // pre-image from the post-image.
        {
            let mut wal = worker.wal_mut();
            let mut slot = wal.reserve(WalKind::Update, self.tree_id, key.len() + delta_length);
            slot.set_key_length(key.len());
            slot.set_aux_length(delta_length);
            slot.set_before(before);
            slot.set_after(WriterIdentity::new(me, tts, command_id));
            let descriptor_len = descriptor.size_bytes();
            {
                let payload = slot.payload_mut();
                payload[..key.len()].copy_from_slice(key);
                descriptor.write_to(&mut payload[key.len()..key.len() + descriptor_len]);
            }
            generate_diff(
                descriptor,
                &mut slot.payload_mut()[key.len() + descriptor_len..],
                TupleRef::new(iter.value()).chained_value(),
            );
            {
                let mut tuple = TupleMut::new(iter.value_mut());
                callback(tuple.chained_value_mut());
            }
            generate_xor_diff(
                descriptor,
                &mut slot.payload_mut()[key.len() + descriptor_len..],
                TupleRef::new(iter.value()).chained_value(),
            );
            slot.submit();
        }

        let mut tuple = TupleMut::new(iter.value_mut());
        tuple.set_writer(WriterIdentity::new(me, tts, command_id));
        if !update_without_versioning {
            tuple.clear_final();
        }
        if worker.tx_is_serializable() {
            if config.two_pl {
                tuple.set_read_word(me.lock_bit());
            } else {
                tuple.set_read_word(tts.as_u64());
            }
        }
        tuple.unlock();
    }

    // =========================================================================
    // remove
    // =========================================================================

    /// Removes `key`, leaving a tombstoned primary for garbage collection
    /// (or deleting the slot outright with fast-remove).
    pub fn remove(&self, worker: &Worker, key: &[u8]) -> OpResult {
        debug_assert!(worker.has_active() && !worker.tx_is_read_only());
        worker.wal_mut().ensure_capacity(self.config.page_size);
        let stored_key = chain_key(key);

        let mut iter = self.exclusive_for(&stored_key);
        if iter.seek_exact(&stored_key) != OpResult::Ok {
            debug_assert!(
                !worker.tx_at_least_si(),
                "remove of a missing key under snapshot isolation"
            );
            return OpResult::NotFound;
        }

        if self.config.fremove {
            iter.remove_current();
            iter.mark_dirty();
            drop(iter);
            self.merge_for_key(&stored_key);
            if worker.tx_is_single_statement() {
                worker.commit();
            }
            return OpResult::Ok;
        }

        let command_id = worker.next_command_id();

        if TupleRef::new(iter.value()).format() != TupleFormat::Chained {
            // Fat-tuple removal is unsupported.
            debug_assert!(false, "remove of a fat tuple");
            return OpResult::Other;
        }
        if let Some(conflict) = self.check_write_preconditions(worker, &iter) {
            return conflict;
        }
        if TupleRef::new(iter.value()).is_removed() {
            debug_assert!(
                !worker.tx_at_least_si(),
                "tombstone visible to a snapshot-isolated remover"
            );
            return OpResult::NotFound;
        }

        TupleMut::new(iter.value_mut()).write_lock();

        let tts = worker.active_tts();
        let me = worker.worker_id();
        let before = TupleRef::new(iter.value()).writer();
        let value_length = iter.value().len() - TUPLE_HEADER_SIZE;
        let secondary_length = VERSION_HEADER_SIZE + value_length;
        let committed_before = if before.worker_id == me && before.tx_id == tts {
            TxnId::MAX
        } else {
            tts
        };
        {
            let old_value = TupleRef::new(iter.value()).chained_value();
            worker.versions().insert_version(
                tts,
                self.tree_id,
                command_id,
                secondary_length,
                |buf| {
                    // Full pre-image, not a delta: removes preserve the
                    // whole value.
                    init_version(buf, before, VersionFlags::empty(), committed_before, tts);
                    buf[VERSION_HEADER_SIZE..].copy_from_slice(old_value);
                },
            );
        }
        self.counters.add(&self.counters.versions_created, 1);
        iter.mark_dirty();

        {
            let mut wal = worker.wal_mut();
            let mut slot = wal.reserve(WalKind::Remove, self.tree_id, key.len() + value_length);
            slot.set_key_length(key.len());
            slot.set_aux_length(value_length);
            slot.set_before(before);
            slot.set_after(WriterIdentity::new(me, tts, command_id));
            let payload = slot.payload_mut();
            payload[..key.len()].copy_from_slice(key);
            payload[key.len()..].copy_from_slice(TupleRef::new(iter.value()).chained_value());
            slot.submit();
        }

        if value_length > 0 {
            iter.shorten(TUPLE_HEADER_SIZE);
        }
        let tombstone_size = iter.leaf().kv_consumed_space(iter.slot());
        {
            let mut tuple = TupleMut::new(iter.value_mut());
            tuple.set_removed();
            tuple.clear_final();
            tuple.set_writer(WriterIdentity::new(me, tts, command_id));
            if worker.tx_is_serializable() {
                if self.config.two_pl {
                    tuple.set_read_word(me.lock_bit());
                } else {
                    tuple.set_read_word(tts.as_u64());
                }
            }
        }
        iter.leaf_mut().add_gc_space_used(tombstone_size as u32);

        if self.config.rtodo {
            let token = self.dangling_token.fetch_add(1, Ordering::SeqCst);
            self.dangling.insert(
                token,
                DanglingPointer {
                    frame: Arc::downgrade(iter.frame()),
                    expected_version: iter.frame().version(),
                    slot: iter.slot(),
                },
            );
            let mut entry = Vec::with_capacity(8 + key.len());
            entry.extend_from_slice(&token.to_le_bytes());
            entry.extend_from_slice(key);
            worker.stage_todo(StagedTodo {
                tree_id: self.tree_id,
                entry,
                version_worker: me,
                version_tts: tts,
            });
        }

        TupleMut::new(iter.value_mut()).unlock();
        drop(iter);

        if worker.tx_is_single_statement() {
            worker.commit();
        }
        OpResult::Ok
    }
}
