//! Microbenchmarks for the hot tree operations.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chain_common::{EngineConfig, TreeId, WorkerId};
use chain_mvcc::{DispatchRegistry, GlobalState, IsolationLevel, TxMode, VersionsSpace, Worker};
use chain_storage::vtree::descriptor::UpdateDescriptor;
use chain_storage::VersionedTree;

fn setup() -> (Arc<VersionedTree>, Worker) {
    let config = Arc::new(EngineConfig::with_workers(1));
    let global = Arc::new(GlobalState::new(config.workers));
    let versions = Arc::new(VersionsSpace::new());
    let registry = Arc::new(DispatchRegistry::new());
    let tree = Arc::new(VersionedTree::new(TreeId::new(1), Arc::clone(&config)));
    registry.register(Arc::clone(&tree));
    let worker = Worker::new(WorkerId::new(0), config, global, versions, registry);
    (tree, worker)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_single_statement", |b| {
        let (tree, worker) = setup();
        let mut i: u64 = 0;
        b.iter(|| {
            i += 1;
            worker.begin(IsolationLevel::SnapshotIsolation, TxMode::SingleStatement);
            tree.insert(&worker, &i.to_be_bytes(), black_box(&[0u8; 64]));
        });
    });
}

fn bench_lookup(c: &mut Criterion) {
    let (tree, worker) = setup();
    for i in 0u64..10_000 {
        worker.begin(IsolationLevel::SnapshotIsolation, TxMode::SingleStatement);
        tree.insert(&worker, &i.to_be_bytes(), &[0u8; 64]);
    }
    worker.begin(IsolationLevel::SnapshotIsolation, TxMode::MultiStatement);
    c.bench_function("lookup_optimistic_hit", |b| {
        let mut i: u64 = 0;
        b.iter(|| {
            i = (i + 1) % 10_000;
            tree.lookup(&worker, &i.to_be_bytes(), |value| {
                black_box(value);
            });
        });
    });
    worker.commit();
}

fn bench_update(c: &mut Criterion) {
    let (tree, worker) = setup();
    worker.begin(IsolationLevel::SnapshotIsolation, TxMode::SingleStatement);
    tree.insert(&worker, b"hot", &[0u8; 64]);
    let descriptor = UpdateDescriptor::single(0, 8);
    c.bench_function("update_same_size_in_place", |b| {
        b.iter(|| {
            worker.begin(IsolationLevel::SnapshotIsolation, TxMode::SingleStatement);
            tree.update_same_size_in_place(
                &worker,
                b"hot",
                |value| value[0] = value[0].wrapping_add(1),
                black_box(&descriptor),
            );
        });
    });
}

criterion_group!(benches, bench_insert, bench_lookup, bench_update);
criterion_main!(benches);
