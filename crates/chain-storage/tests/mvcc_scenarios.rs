//! End-to-end MVCC scenarios: transactional CRUD against a registered
//! tree, with visibility, conflicts, rollback, and garbage collection
//! exercised through the same worker plumbing the engine uses.

use std::sync::Arc;

use chain_common::{EngineConfig, Key, OpResult, TreeId, Value, WorkerId};
use chain_mvcc::{
    DispatchRegistry, GlobalState, IsolationLevel, TxMode, VersionsSpace, Worker,
};
use chain_storage::vtree::descriptor::UpdateDescriptor;
use chain_storage::VersionedTree;

struct Harness {
    config: Arc<EngineConfig>,
    global: Arc<GlobalState>,
    versions: Arc<VersionsSpace>,
    registry: Arc<DispatchRegistry>,
    tree: Arc<VersionedTree>,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let global = Arc::new(GlobalState::new(config.workers));
        let versions = Arc::new(VersionsSpace::new());
        let registry = Arc::new(DispatchRegistry::new());
        let tree = Arc::new(VersionedTree::new(TreeId::new(1), Arc::clone(&config)));
        registry.register(Arc::clone(&tree) as Arc<dyn chain_mvcc::TreeDispatch>);
        Self {
            config,
            global,
            versions,
            registry,
            tree,
        }
    }

    fn default() -> Self {
        Self::new(EngineConfig::with_workers(4))
    }

    fn worker(&self, id: u16) -> Worker {
        Worker::new(
            WorkerId::new(id),
            Arc::clone(&self.config),
            Arc::clone(&self.global),
            Arc::clone(&self.versions),
            Arc::clone(&self.registry),
        )
    }
}

fn get(tree: &VersionedTree, worker: &Worker, key: &[u8]) -> Option<Vec<u8>> {
    let mut out = None;
    match tree.lookup(worker, key, |value| out = Some(value.to_vec())) {
        OpResult::Ok => out,
        _ => None,
    }
}

/// Runs `f` inside a fresh single-statement SI transaction (auto-commit
/// is exercised by the operation itself).
fn single<R>(worker: &Worker, f: impl FnOnce() -> R) -> R {
    worker.begin(IsolationLevel::SnapshotIsolation, TxMode::SingleStatement);
    f()
}

#[test]
fn insert_then_lookup_roundtrip() {
    let h = Harness::default();
    let w = h.worker(0);
    let key = Key::from_bytes(b"alpha");
    let value = Value::from_bytes(b"payload-bytes");

    assert_eq!(
        single(&w, || h.tree.insert(&w, key.as_bytes(), value.as_bytes())),
        OpResult::Ok
    );
    assert!(!w.has_active(), "single-statement inserts auto-commit");

    w.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &w, key.as_bytes()), Some(value.as_bytes().to_vec()));
    assert_eq!(get(&h.tree, &w, b"missing"), None);
    w.commit();
}

#[test]
fn insert_duplicate_aborts() {
    let h = Harness::default();
    let w = h.worker(0);
    assert_eq!(single(&w, || h.tree.insert(&w, b"dup", b"v1")), OpResult::Ok);

    // A concurrent writer's in-flight insert is invisible to the second
    // writer's intent and aborts it.
    let other = h.worker(1);
    other.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    let w2 = h.worker(2);
    w2.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(h.tree.insert(&w2, b"fresh", b"x"), OpResult::Ok);
    assert_eq!(h.tree.insert(&other, b"fresh", b"y"), OpResult::AbortTx);
    other.rollback();
    w2.commit();
}

/// Scenario: a snapshot reader keeps observing the pre-update value
/// while a later writer commits a new one.
#[test]
fn snapshot_reader_sees_pre_update_value() {
    let h = Harness::default();
    let writer = h.worker(0);
    assert_eq!(
        single(&writer, || h.tree.insert(&writer, b"a", &[0x01, 0x02])),
        OpResult::Ok
    );

    let reader = h.worker(1);
    reader.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);

    let updater = h.worker(2);
    updater.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    let descriptor = UpdateDescriptor::single(1, 1);
    assert_eq!(
        h.tree
            .update_same_size_in_place(&updater, b"a", |value| value[1] = 0x09, &descriptor),
        OpResult::Ok
    );

    // Before the updater commits.
    assert_eq!(get(&h.tree, &reader, b"a"), Some(vec![0x01, 0x02]));
    updater.commit();

    // A fresh transaction sees the new value; the old reader does not.
    let fresh = h.worker(3);
    fresh.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &fresh, b"a"), Some(vec![0x01, 0x09]));
    assert_eq!(get(&h.tree, &reader, b"a"), Some(vec![0x01, 0x02]));
    fresh.commit();
    reader.commit();
}

/// Scenario: an SSI reader's read timestamp aborts an older writer.
#[test]
fn ssi_read_timestamp_aborts_older_writer() {
    let h = Harness::default();
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"k", &[0xAA])),
        OpResult::Ok
    );

    // The writer begins first, so its timestamp is older than the
    // reader's.
    let old_writer = h.worker(1);
    old_writer.begin(IsolationLevel::Serializable, TxMode::MultiStatement);
    let reader = h.worker(2);
    reader.begin(IsolationLevel::Serializable, TxMode::MultiStatement);

    assert_eq!(get(&h.tree, &reader, b"k"), Some(vec![0xAA]));

    let descriptor = UpdateDescriptor::single(0, 1);
    assert_eq!(
        h.tree
            .update_same_size_in_place(&old_writer, b"k", |value| value[0] = 0, &descriptor),
        OpResult::AbortTx
    );
    old_writer.rollback();
    reader.commit();
}

/// Scenario: rolling back a transaction undoes its insert and update,
/// leaving no trace of the key.
#[test]
fn rollback_undoes_insert_and_update() {
    let h = Harness::default();
    let w = h.worker(0);
    w.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(h.tree.insert(&w, b"gone", &[9, 9, 9, 9]), OpResult::Ok);
    let descriptor = UpdateDescriptor::single(0, 4);
    assert_eq!(
        h.tree.update_same_size_in_place(
            &w,
            b"gone",
            |value| value.copy_from_slice(&[1, 2, 3, 4]),
            &descriptor
        ),
        OpResult::Ok
    );
    assert_eq!(get(&h.tree, &w, b"gone"), Some(vec![1, 2, 3, 4]));
    w.rollback();

    let check = h.worker(1);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"gone"), None);
    check.commit();
}

/// Update → rollback restores the exact pre-image through the XOR diff.
#[test]
fn rollback_restores_pre_image_of_update() {
    let h = Harness::default();
    let loader = h.worker(0);
    let original = vec![7u8; 32];
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"key", &original)),
        OpResult::Ok
    );

    let w = h.worker(1);
    w.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    let descriptor = UpdateDescriptor::single(8, 8);
    assert_eq!(
        h.tree.update_same_size_in_place(
            &w,
            b"key",
            |value| value[8..16].copy_from_slice(&[0xFF; 8]),
            &descriptor
        ),
        OpResult::Ok
    );
    w.rollback();

    let check = h.worker(2);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"key"), Some(original));
    check.commit();
}

/// The WAL update record's diff bytes XOR'd into the post-image recover
/// the pre-image on the modified ranges.
#[test]
fn wal_update_diff_is_xor_of_old_and_new() {
    let h = Harness::default();
    let loader = h.worker(0);
    let old = vec![0x10u8, 0x20, 0x30, 0x40];
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"x", &old)),
        OpResult::Ok
    );

    let w = h.worker(1);
    w.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    let descriptor = UpdateDescriptor::single(1, 2);
    assert_eq!(
        h.tree.update_same_size_in_place(
            &w,
            b"x",
            |value| {
                value[1] = 0xAB;
                value[2] = 0xCD;
            },
            &descriptor
        ),
        OpResult::Ok
    );

    let mut new_value = get(&h.tree, &w, b"x").unwrap();
    assert_eq!(new_value, vec![0x10, 0xAB, 0xCD, 0x40]);

    // Pull the logged diff out of the worker's WAL stream and apply it.
    {
        let wal = w.wal_mut();
        let record = wal
            .records()
            .find(|r| r.kind() == chain_wal::WalKind::Update)
            .expect("update was logged");
        let aux = record.aux();
        let (logged_descriptor, consumed) = UpdateDescriptor::read_from(aux).unwrap();
        chain_storage::vtree::descriptor::apply_xor_diff(
            &logged_descriptor,
            &mut new_value,
            &aux[consumed..],
        );
    }
    assert_eq!(new_value, old);
    w.commit();
}

/// Zero-length descriptors still produce a valid update.
#[test]
fn empty_descriptor_update_is_valid() {
    let h = Harness::default();
    let w = h.worker(0);
    assert_eq!(
        single(&w, || h.tree.insert(&w, b"zero", &[5, 6])),
        OpResult::Ok
    );

    let u = h.worker(1);
    u.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    let descriptor = UpdateDescriptor::new(Vec::new());
    assert_eq!(
        h.tree
            .update_same_size_in_place(&u, b"zero", |_| {}, &descriptor),
        OpResult::Ok
    );
    u.commit();

    let check = h.worker(2);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"zero"), Some(vec![5, 6]));
    check.commit();
}

/// Scenario: remove then rollback restores the full pre-image.
#[test]
fn rollback_restores_removed_value() {
    let h = Harness::default();
    let loader = h.worker(0);
    let value = (0u8..64).collect::<Vec<_>>();
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"r", &value)),
        OpResult::Ok
    );

    let w = h.worker(1);
    w.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(h.tree.remove(&w, b"r"), OpResult::Ok);
    assert_eq!(get(&h.tree, &w, b"r"), None);
    w.rollback();

    let check = h.worker(2);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"r"), Some(value));
    check.commit();
}

/// A snapshot reader older than the remover still sees the value; a
/// fresh reader does not.
#[test]
fn remove_respects_snapshots() {
    let h = Harness::default();
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"d", &[1, 2, 3])),
        OpResult::Ok
    );

    let old_reader = h.worker(1);
    old_reader.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);

    let remover = h.worker(2);
    assert_eq!(single(&remover, || h.tree.remove(&remover, b"d")), OpResult::Ok);

    assert_eq!(get(&h.tree, &old_reader, b"d"), Some(vec![1, 2, 3]));
    old_reader.commit();

    let fresh = h.worker(3);
    fresh.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &fresh, b"d"), None);
    fresh.commit();
}

/// Scenario: after the low-water mark passes the remover, page-wise GC
/// physically reclaims the tombstone.
#[test]
fn page_wise_gc_reclaims_tombstone() {
    let mut config = EngineConfig::with_workers(4);
    config.rtodo = false;
    let h = Harness::new(config);

    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"x", &[0u8; 100])),
        OpResult::Ok
    );
    let remover = h.worker(1);
    assert_eq!(single(&remover, || h.tree.remove(&remover, b"x")), OpResult::Ok);

    // Nothing is active: the mark has caught up with the clock.
    let janitor = h.worker(2);
    let freed = h.tree.collect_garbage(&janitor);
    assert!(freed >= 1, "tombstone should be reclaimed");
    assert!(
        h.versions.is_empty(),
        "stale versions-store records are purged with the tombstone"
    );

    let check = h.worker(3);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"x"), None);
    let mut seen = 0;
    h.tree.scan_asc(&check, b"", |_, _| {
        seen += 1;
        true
    });
    assert_eq!(seen, 0, "no slot may remain for the removed key");
    check.commit();
}

/// GC must not reclaim a tombstone a pinned snapshot still needs to look
/// past.
#[test]
fn gc_respects_pinned_snapshots() {
    let mut config = EngineConfig::with_workers(4);
    config.rtodo = false;
    let h = Harness::new(config);

    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"pin", &[7, 7])),
        OpResult::Ok
    );

    let old_reader = h.worker(1);
    old_reader.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);

    let remover = h.worker(2);
    assert_eq!(single(&remover, || h.tree.remove(&remover, b"pin")), OpResult::Ok);

    let janitor = h.worker(3);
    h.tree.collect_garbage(&janitor);

    // The old snapshot still reconstructs the value through the chain.
    assert_eq!(get(&h.tree, &old_reader, b"pin"), Some(vec![7, 7]));
    old_reader.commit();

    // Once the snapshot is gone, the tombstone goes too.
    let freed = h.tree.collect_garbage(&janitor);
    assert!(freed >= 1);
}

/// Point GC: the staged dangling pointer excises the tombstone after
/// commit, without a keyed descent.
#[test]
fn point_gc_consumes_staged_todo() {
    let h = Harness::default();
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"todo", &[1u8; 16])),
        OpResult::Ok
    );

    let remover = h.worker(1);
    assert_eq!(
        single(&remover, || h.tree.remove(&remover, b"todo")),
        OpResult::Ok
    );
    assert_eq!(remover.pending_todo_count(), 1);

    remover.execute_ready_todos();
    assert_eq!(remover.pending_todo_count(), 0);
    assert_eq!(h.tree.counters().snapshot().todo_removed, 1);

    let check = h.worker(2);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"todo"), None);
    check.commit();
}

/// Removing an already-tombstoned key reports NOT_FOUND without touching
/// the page.
#[test]
fn double_remove_reports_not_found() {
    let h = Harness::default();
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"twice", &[3])),
        OpResult::Ok
    );
    let remover = h.worker(1);
    assert_eq!(
        single(&remover, || h.tree.remove(&remover, b"twice")),
        OpResult::Ok
    );

    let again = h.worker(2);
    again.begin(IsolationLevel::ReadCommitted, TxMode::MultiStatement);
    assert_eq!(h.tree.remove(&again, b"twice"), OpResult::NotFound);
    again.commit();
}

/// Scenario: an early snapshot reconstructs the initial value through
/// the whole chain of updates.
#[test]
fn reconstruction_walks_whole_chain() {
    let h = Harness::default();
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"chain", &[0u8, 0])),
        OpResult::Ok
    );

    let early = h.worker(1);
    early.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);

    let writer = h.worker(2);
    let descriptor = UpdateDescriptor::single(0, 1);
    for round in 1..=5u8 {
        assert_eq!(
            single(&writer, || h.tree.update_same_size_in_place(
                &writer,
                b"chain",
                |value| value[0] = round,
                &descriptor
            )),
            OpResult::Ok
        );
    }

    let before = h.tree.counters().snapshot().read_versions_visited;
    assert_eq!(get(&h.tree, &early, b"chain"), Some(vec![0, 0]));
    let walked = h.tree.counters().snapshot().read_versions_visited - before;
    assert_eq!(walked, 5, "one version per update must be visited");
    early.commit();

    let fresh = h.worker(3);
    fresh.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &fresh, b"chain"), Some(vec![5, 0]));
    fresh.commit();
}

/// Walking past the configured chain cap is a fatal invariant violation.
#[test]
#[should_panic(expected = "version chain exceeded maximum length")]
fn chain_length_cap_is_fatal() {
    let config = EngineConfig::with_workers(4).with_max_chain_length(3);
    let h = Harness::new(config);
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"deep", &[0u8])),
        OpResult::Ok
    );

    let early = h.worker(1);
    early.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);

    let writer = h.worker(2);
    let descriptor = UpdateDescriptor::single(0, 1);
    for round in 1..=5u8 {
        assert_eq!(
            single(&writer, || h.tree.update_same_size_in_place(
                &writer,
                b"deep",
                |value| value[0] = round,
                &descriptor
            )),
            OpResult::Ok
        );
    }
    let _ = get(&h.tree, &early, b"deep");
}

/// Scenario: 2PL read bitmaps - a foreign read bit aborts the writer,
/// and the unlock callback releases it at commit.
#[test]
fn two_pl_read_locks_block_and_release() {
    let config = EngineConfig::with_workers(4).with_two_pl(true);
    let h = Harness::new(config);
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"k", &[0xAA])),
        OpResult::Ok
    );

    let reader = h.worker(1);
    reader.begin(IsolationLevel::Serializable, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &reader, b"k"), Some(vec![0xAA]));

    let writer = h.worker(2);
    writer.begin(IsolationLevel::Serializable, TxMode::MultiStatement);
    let descriptor = UpdateDescriptor::single(0, 1);
    assert_eq!(
        h.tree
            .update_same_size_in_place(&writer, b"k", |value| value[0] = 0, &descriptor),
        OpResult::AbortTx
    );
    writer.rollback();

    // Commit releases the read bit through the unlock capability.
    reader.commit();

    let retry = h.worker(3);
    retry.begin(IsolationLevel::Serializable, TxMode::MultiStatement);
    assert_eq!(
        h.tree
            .update_same_size_in_place(&retry, b"k", |value| value[0] = 0x55, &descriptor),
        OpResult::Ok
    );
    retry.commit();

    let check = h.worker(0);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"k"), Some(vec![0x55]));
    check.commit();
}

/// Splits keep every key reachable and in order.
#[test]
fn splits_preserve_order_and_content() {
    let config = EngineConfig::with_workers(2).with_page_size(1024);
    let h = Harness::new(config);
    let w = h.worker(0);

    for i in 0..100u32 {
        let key = format!("key{i:04}");
        let value = vec![(i % 251) as u8; 100];
        assert_eq!(
            single(&w, || h.tree.insert(&w, key.as_bytes(), &value)),
            OpResult::Ok
        );
    }

    let reader = h.worker(1);
    reader.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    for i in 0..100u32 {
        let key = format!("key{i:04}");
        assert_eq!(
            get(&h.tree, &reader, key.as_bytes()),
            Some(vec![(i % 251) as u8; 100]),
            "missing {key}"
        );
    }

    let mut seen = Vec::new();
    h.tree.scan_asc(&reader, b"", |key, _| {
        seen.push(key.to_vec());
        true
    });
    assert_eq!(seen.len(), 100);
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "ascending order");
    reader.commit();
}

#[test]
fn scans_ascend_descend_and_stop_early() {
    let h = Harness::default();
    let w = h.worker(0);
    for key in [b"a".as_slice(), b"b", b"c", b"d"] {
        assert_eq!(single(&w, || h.tree.insert(&w, key, key)), OpResult::Ok);
    }
    let remover = h.worker(1);
    assert_eq!(single(&remover, || h.tree.remove(&remover, b"b")), OpResult::Ok);

    let reader = h.worker(2);
    reader.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);

    let mut ascending = Vec::new();
    h.tree.scan_asc(&reader, b"", |key, value| {
        assert_eq!(key, value);
        ascending.push(key.to_vec());
        true
    });
    assert_eq!(ascending, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);

    let mut descending = Vec::new();
    h.tree.scan_desc(&reader, b"z", |key, _| {
        descending.push(key.to_vec());
        true
    });
    assert_eq!(descending, vec![b"d".to_vec(), b"c".to_vec(), b"a".to_vec()]);

    let mut first_only = Vec::new();
    h.tree.scan_asc(&reader, b"", |key, _| {
        first_only.push(key.to_vec());
        false
    });
    assert_eq!(first_only.len(), 1);
    reader.commit();
}

/// Fast paths: version creation elided, removes delete physically.
#[test]
fn fast_update_and_fast_remove_skip_versioning() {
    let mut config = EngineConfig::with_workers(2);
    config.fupdate_chained = true;
    config.fremove = true;
    config.rtodo = false;
    let h = Harness::new(config);

    let w = h.worker(0);
    assert_eq!(single(&w, || h.tree.insert(&w, b"f", &[1])), OpResult::Ok);

    let descriptor = UpdateDescriptor::single(0, 1);
    assert_eq!(
        single(&w, || h.tree.update_same_size_in_place(
            &w,
            b"f",
            |value| value[0] = 2,
            &descriptor
        )),
        OpResult::Ok
    );
    assert!(h.versions.is_empty(), "fast update must not create versions");

    assert_eq!(single(&w, || h.tree.remove(&w, b"f")), OpResult::Ok);
    assert!(h.versions.is_empty(), "fast remove must not create versions");

    let check = h.worker(1);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"f"), None);
    check.commit();
}

/// Update conflicts: an in-flight writer aborts a second writer on the
/// same key.
#[test]
fn write_write_conflict_aborts() {
    let h = Harness::default();
    let loader = h.worker(0);
    assert_eq!(
        single(&loader, || h.tree.insert(&loader, b"ww", &[0])),
        OpResult::Ok
    );

    let first = h.worker(1);
    first.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    let descriptor = UpdateDescriptor::single(0, 1);
    assert_eq!(
        h.tree
            .update_same_size_in_place(&first, b"ww", |value| value[0] = 1, &descriptor),
        OpResult::Ok
    );

    let second = h.worker(2);
    second.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(
        h.tree
            .update_same_size_in_place(&second, b"ww", |value| value[0] = 2, &descriptor),
        OpResult::AbortTx
    );
    second.rollback();
    first.commit();

    let check = h.worker(3);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"ww"), Some(vec![1]));
    check.commit();
}

/// The pager-facing space check triggers page-wise GC once the garbage
/// estimate crosses the configured ratio.
#[test]
fn space_check_runs_page_wise_gc() {
    use chain_mvcc::{SpaceCheckResult, TreeDispatch};

    let mut config = EngineConfig::with_workers(3);
    config.gc_garbage_ratio = 0.0;
    config.rtodo = false;
    let h = Harness::new(config);

    let w = h.worker(0);
    assert_eq!(single(&w, || h.tree.insert(&w, b"gc", &[1u8; 32])), OpResult::Ok);
    assert_eq!(single(&w, || h.tree.insert(&w, b"keep", &[2u8; 32])), OpResult::Ok);
    let remover = h.worker(1);
    assert_eq!(single(&remover, || h.tree.remove(&remover, b"gc")), OpResult::Ok);

    let janitor = h.worker(2);
    let verdict = h
        .tree
        .check_space_utilization(&janitor, h.tree.root_page_id());
    assert_ne!(verdict, SpaceCheckResult::Nothing);
    assert!(h.tree.counters().snapshot().gc_freed_slots >= 1);

    let check = h.worker(0);
    check.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    assert_eq!(get(&h.tree, &check, b"gc"), None);
    assert_eq!(get(&h.tree, &check, b"keep"), Some(vec![2u8; 32]));
    check.commit();
}

/// Random workloads stay consistent across splits.
#[test]
fn randomized_inserts_stay_consistent() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let config = EngineConfig::with_workers(2).with_page_size(1024);
    let h = Harness::new(config);
    let w = h.worker(0);
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut expected = std::collections::BTreeMap::new();
    while expected.len() < 200 {
        let key: [u8; 6] = rng.gen();
        let value = vec![rng.gen::<u8>(); 1 + rng.gen_range(0..64)];
        if expected.contains_key(key.as_slice()) {
            continue;
        }
        assert_eq!(
            single(&w, || h.tree.insert(&w, &key, &value)),
            OpResult::Ok
        );
        expected.insert(key.to_vec(), value);
    }

    let reader = h.worker(1);
    reader.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    for (key, value) in &expected {
        assert_eq!(get(&h.tree, &reader, key), Some(value.clone()));
    }
    let mut scanned = Vec::new();
    h.tree.scan_asc(&reader, b"", |key, _| {
        scanned.push(key.to_vec());
        true
    });
    assert_eq!(scanned, expected.keys().cloned().collect::<Vec<_>>());
    reader.commit();
}

/// Checkpoint and restore through the dispatch capabilities round-trips
/// the tree's contents.
#[test]
fn serialize_restore_roundtrip() {
    use chain_mvcc::TreeDispatch;

    let h = Harness::default();
    let w = h.worker(0);
    for i in 0..10u8 {
        assert_eq!(
            single(&w, || h.tree.insert(&w, &[b'k', i], &[i; 8])),
            OpResult::Ok
        );
    }

    let snapshot = h.tree.as_ref().serialize();

    // A second tree instance restores from the snapshot.
    let restored = Arc::new(VersionedTree::new(TreeId::new(1), Arc::clone(&h.config)));
    restored.deserialize(&snapshot).unwrap();
    h.registry.register(Arc::clone(&restored) as Arc<dyn chain_mvcc::TreeDispatch>);

    let reader = h.worker(1);
    reader.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    for i in 0..10u8 {
        assert_eq!(get(&restored, &reader, &[b'k', i]), Some(vec![i; 8]));
    }
    reader.commit();
}
