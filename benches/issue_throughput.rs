//! Benchmarks for docnum allocation.
//!
//! Run with: cargo bench
//! View results in: target/criterion/report/index.html

use std::sync::Arc;

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use docnum::config::{AllocatorConfig, NumberingScope};
use docnum::contracts::{DocumentStore, SequenceRegistry};
use docnum::numbering::{format, normalize, Allocator, DocumentTypeCatalog, FixedClock};
use docnum::storage::{MemoryStore, RocksDbStore};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn allocator<S>(store: Arc<S>) -> Arc<Allocator<S, S, FixedClock>>
where
    S: SequenceRegistry + DocumentStore,
{
    Arc::new(
        Allocator::new(
            Arc::clone(&store),
            store,
            Arc::new(DocumentTypeCatalog::default()),
            AllocatorConfig {
                max_attempts: 5,
                scope: NumberingScope::PerType,
            },
        )
        .with_clock(FixedClock(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap())),
    )
}

// =============================================================================
// Pure helpers
// =============================================================================

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    for label in [
        "Oficio",
        "Carta Precatória Expedida",
        "Verificação de Procedência de Informação - VPI",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(label), label, |b, label| {
            b.iter(|| normalize(black_box(label)))
        });
    }
    group.finish();
}

fn bench_format(c: &mut Criterion) {
    c.bench_function("format_number", |b| {
        b.iter(|| format(black_box(42), black_box(2025)).unwrap())
    });
}

// =============================================================================
// Issuance
// =============================================================================

fn bench_issue_sequential(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("issue_sequential");
    group.throughput(Throughput::Elements(1));

    let memory = allocator(Arc::new(MemoryStore::new()));
    group.bench_function("memory", |b| {
        b.iter(|| {
            rt.block_on(memory.issue_and_save("Oficio", black_box("Forum"), None))
                .unwrap()
        })
    });

    let dir = TempDir::new().unwrap();
    let rocks = allocator(Arc::new(RocksDbStore::open(dir.path()).unwrap()));
    group.bench_function("rocksdb", |b| {
        b.iter(|| {
            rt.block_on(rocks.issue_and_save("Oficio", black_box("Forum"), None))
                .unwrap()
        })
    });

    group.finish();
}

fn bench_issue_concurrent(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("issue_concurrent");

    for tasks in [4usize, 16] {
        let dir = TempDir::new().unwrap();
        let rocks = allocator(Arc::new(RocksDbStore::open(dir.path()).unwrap()));

        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::new("rocksdb", tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                rt.block_on(async {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let rocks = Arc::clone(&rocks);
                            tokio::spawn(async move {
                                rocks.issue_and_save("Protocolo", "Forum", None).await
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap().unwrap();
                    }
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_normalize,
    bench_format,
    bench_issue_sequential,
    bench_issue_concurrent
);
criterion_main!(benches);
