//! Performance benchmarks for lineage queries and number allocation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use schemabranch::migrations::next_number;
use schemabranch::{
    BranchRegistry, ConnectionDescriptor, MemoryStateStore, Migration, MigrationNumber,
    MigrationStatus, SqliteEngine, Timestamp, MAIN_BRANCH,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Registry holding a single chain `main <- c0 <- c1 <- ... <- c{depth-1}`.
fn chain_registry(dir: &TempDir, depth: usize) -> BranchRegistry {
    let engine =
        Arc::new(SqliteEngine::new(dir.path().join("data"), Duration::from_secs(1)).unwrap());
    let registry = BranchRegistry::open(
        Arc::new(MemoryStateStore::new()),
        engine,
        ConnectionDescriptor::default(),
    )
    .unwrap();

    let mut parent = MAIN_BRANCH.to_string();
    for i in 0..depth {
        let name = format!("c{i}");
        registry.create(&name, Some(&parent)).unwrap();
        parent = name;
    }
    registry
}

/// Benchmark lineage walks with varying chain depths
fn bench_lineage(c: &mut Criterion) {
    let mut group = c.benchmark_group("lineage");

    for depth in [1, 10, 50] {
        let dir = TempDir::new().unwrap();
        let registry = chain_registry(&dir, depth);
        let leaf = format!("c{}", depth - 1);

        group.bench_with_input(BenchmarkId::new("depth", depth), &leaf, |b, leaf| {
            b.iter(|| black_box(registry.lineage(leaf).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark common-ancestor lookups between the chain leaf and a sibling of
/// `main`'s first child
fn bench_common_ancestor(c: &mut Criterion) {
    let mut group = c.benchmark_group("common_ancestor");

    for depth in [10, 50] {
        let dir = TempDir::new().unwrap();
        let registry = chain_registry(&dir, depth);
        registry.create("sibling", Some(MAIN_BRANCH)).unwrap();
        let leaf = format!("c{}", depth - 1);

        group.bench_with_input(BenchmarkId::new("depth", depth), &leaf, |b, leaf| {
            b.iter(|| black_box(registry.common_ancestor(leaf, "sibling").unwrap()));
        });
    }

    group.finish();
}

/// Benchmark next-number allocation over ledgers of varying size
fn bench_next_number(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_number");

    for size in [10, 1000, 10000] {
        let ledger: Vec<Migration> = (0..size)
            .map(|i| Migration {
                number: MigrationNumber(i),
                name: format!("m{i}"),
                description: None,
                branch: MAIN_BRANCH.to_string(),
                status: MigrationStatus::Applied,
                created_at: Timestamp(0),
                applied_at: None,
                error_message: None,
                parent_branch: None,
                parent_migration_number: None,
                checksum: None,
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("ledger_size", size), &ledger, |b, ledger| {
            b.iter(|| black_box(next_number(ledger)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lineage, bench_common_ancestor, bench_next_number);
criterion_main!(benches);
