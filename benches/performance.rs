//! Performance benchmarks for divergence counting and sync sweeps.

use branchsync::{
    BranchRelation, CreateOptions, EngineConfig, MemoryRepository, Orchestrator, RepositoryAdapter,
    SyncStrategy, Topology,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

/// An endpoint with `count` unpublished feature branches, each one commit
/// ahead of main.
fn populated(count: usize) -> (Topology, MemoryRepository, Orchestrator) {
    let topology = Topology::new("main").unwrap();
    let local = topology.local().unwrap();
    let orchestrator = Orchestrator::new(EngineConfig::default()).unwrap();

    for i in 0..count {
        let options = CreateOptions::feature(format!("feature-{}", i))
            .with_relation(BranchRelation::Ahead)
            .with_publish(false);
        orchestrator.create_with(&local, options).unwrap();
    }
    (topology, local, orchestrator)
}

/// Benchmark out-of-sync counting as the branch count grows
fn bench_out_of_sync_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("out_of_sync_count");

    for count in [10, 50, 200] {
        group.bench_with_input(BenchmarkId::new("branches", count), &count, |b, &count| {
            let (_topology, local, orchestrator) = populated(count);
            b.iter(|| black_box(orchestrator.out_of_sync_count(&local).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark a full sync sweep, merge and rebase strategies
fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    group.sample_size(20);

    for strategy in [SyncStrategy::Merge, SyncStrategy::Rebase] {
        for count in [10, 50] {
            let id = BenchmarkId::new(format!("{:?}", strategy), count);
            group.bench_with_input(id, &count, |b, &count| {
                b.iter_batched(
                    || {
                        let (topology, local, _) = populated(count);
                        let orchestrator = Orchestrator::new(
                            EngineConfig::default().with_strategy(strategy),
                        )
                        .unwrap();
                        (topology, local, orchestrator)
                    },
                    |(_topology, local, orchestrator)| {
                        black_box(orchestrator.sync(&local).unwrap());
                    },
                    BatchSize::SmallInput,
                );
            });
        }
    }

    group.finish();
}

/// Benchmark ancestry queries on a long linear history
fn bench_ahead_behind(c: &mut Criterion) {
    let mut group = c.benchmark_group("ahead_behind");

    for depth in [100, 1000] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let topology = Topology::new("main").unwrap();
            let local = topology.local().unwrap();
            local.create_branch("feature", "main").unwrap();
            for i in 0..depth {
                local.commit("feature", &format!("commit {}", i)).unwrap();
            }
            b.iter(|| black_box(local.ahead_behind("feature", "main").unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_out_of_sync_count, bench_sync, bench_ahead_behind);
criterion_main!(benches);
