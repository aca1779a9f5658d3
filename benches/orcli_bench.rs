//! Performance benchmarks for orcli
//!
//! Tracks the cost of a guarded mutation plus its undo, raw backup capture
//! and restore at several file sizes, and history appends.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use orcli::backup::BackupStore;
use orcli::compression::CompressionStrategy;
use orcli::history::HistoryLog;
use orcli::types::{OperationDraft, OperationKind, StorageConfig};
use orcli::{SafetyNet, SafetyNetBuilder};
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Mildly compressible content of the given size
fn sample_content(size: usize) -> Vec<u8> {
    let line = b"let value = compute(input, 42); // benchmark payload\n";
    line.iter().cycle().take(size).copied().collect()
}

fn storage_config(work: &TempDir, storage: &TempDir, strategy: &CompressionStrategy) -> StorageConfig {
    StorageConfig {
        root_path: work.path().to_path_buf(),
        storage_path: storage.path().to_path_buf(),
        max_history: 100,
        compression_strategy: strategy.name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Write followed by undo, the full round trip a user pays for
fn bench_write_and_undo(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_and_undo");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(20);

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let work = TempDir::new().unwrap();
            let net = SafetyNet::open_or_init(
                work.path().to_path_buf(),
                SafetyNet::default_storage_path(work.path()),
            )
            .unwrap();
            fs::write(work.path().join("target.rs"), sample_content(size)).unwrap();
            let replacement = sample_content(size / 2);

            b.iter(|| {
                let result = net.write("target.rs", &replacement).unwrap();
                black_box(result);
                black_box(net.undo().unwrap());
            });
        });
    }

    group.finish();
}

/// Capture and restore directly against the backup store
fn bench_capture_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture_restore");
    group.measurement_time(Duration::from_secs(2));
    group.sample_size(30);

    let strategies = [
        ("none", CompressionStrategy::None),
        ("fast", CompressionStrategy::Fast),
    ];
    for (name, strategy) in strategies {
        for size in [512usize, 256 * 1024] {
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(name, size),
                &size,
                |b, &size| {
                    let work = TempDir::new().unwrap();
                    let storage = TempDir::new().unwrap();
                    let store = BackupStore::init(
                        storage.path().join("store"),
                        storage_config(&work, &storage, &strategy),
                    )
                    .unwrap();
                    let path: PathBuf = work.path().join("data.txt");
                    fs::write(&path, sample_content(size)).unwrap();

                    b.iter(|| {
                        let record = store.capture(&path).unwrap().unwrap();
                        let content = store.restore(&record).unwrap();
                        black_box(content);
                    });
                },
            );
        }
    }

    group.finish();
}

/// In-memory appends at and beyond capacity
fn bench_history_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_append");
    group.measurement_time(Duration::from_secs(2));

    for capacity in [10usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let mut log = HistoryLog::new(capacity);
                b.iter(|| {
                    let record = log.append(OperationDraft::succeeded(
                        OperationKind::Write,
                        PathBuf::from("/work/a.txt"),
                        Some("backup".to_string()),
                    ));
                    black_box(record.id);
                });
            },
        );
    }

    group.finish();
}

/// Loading and saving the persisted log
fn bench_history_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_persistence");
    group.sample_size(30);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.json");
    let mut log = HistoryLog::new(100);
    for i in 0..100 {
        log.append(OperationDraft::succeeded(
            OperationKind::Modify,
            PathBuf::from(format!("/work/file_{}.txt", i)),
            Some(format!("backup-{}", i)),
        ));
    }
    log.save(&path).unwrap();

    group.bench_function("load_100", |b| {
        b.iter(|| black_box(HistoryLog::load(&path, 100).unwrap()))
    });
    group.bench_function("save_100", |b| b.iter(|| log.save(&path).unwrap()));

    group.finish();
}

/// Builder with a small capacity, where eviction discards backups
fn bench_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");
    group.sample_size(20);

    group.bench_function("write_at_capacity", |b| {
        let work = TempDir::new().unwrap();
        let net = SafetyNetBuilder::new()
            .max_history(5)
            .build(
                work.path().to_path_buf(),
                SafetyNet::default_storage_path(work.path()),
            )
            .unwrap();
        let mut counter = 0u64;

        b.iter(|| {
            counter += 1;
            let content = format!("revision {}", counter);
            black_box(net.write("rolling.txt", content.as_bytes()).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_write_and_undo,
    bench_capture_restore,
    bench_history_append,
    bench_history_persistence,
    bench_eviction
);
criterion_main!(benches);
