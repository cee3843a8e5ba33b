//! Commit point benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use segmerge_bench::{ledger_with_sizes, random_sizes_mb};
use segmerge_core::codec::{Segmerge10SegmentInfoFormat, SegmentInfoFormat};
use segmerge_core::{CodecRegistry, SegmentInfos};
use segmerge_storage::{Directory, FsDirectory, RamDirectory};
use tempfile::TempDir;

/// Build a ledger of `count` segments and write their descriptors.
fn ledger_in(dir: &dyn Directory, count: usize) -> SegmentInfos {
    let infos = ledger_with_sizes(&random_sizes_mb(count), 10.0);
    for sci in &infos {
        Segmerge10SegmentInfoFormat.write(dir, sci.info()).unwrap();
    }
    infos
}

/// Benchmark committing a ledger to a RamDirectory.
fn bench_commit_ram(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_ram");

    for count in [1, 50, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let dir = RamDirectory::new();
            let mut infos = ledger_in(&dir, count);
            b.iter(|| {
                let name = infos.commit(&dir).unwrap();
                dir.delete_file(&name).unwrap();
                black_box(name);
            });
        });
    }

    group.finish();
}

/// Benchmark committing a ledger to an FsDirectory, including fsyncs.
fn bench_commit_fs(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_fs");

    // Use smaller sample size for fsync-bound operations
    group.sample_size(20);

    for count in [1, 50].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let temp_dir = TempDir::new().unwrap();
            let dir = FsDirectory::open(temp_dir.path()).unwrap();
            let mut infos = ledger_in(&dir, count);
            b.iter(|| {
                let name = infos.commit(&dir).unwrap();
                dir.delete_file(&name).unwrap();
                black_box(name);
            });
        });
    }

    group.finish();
}

/// Benchmark locating and reading the newest commit.
fn bench_read_latest_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_latest_commit");
    let codecs = CodecRegistry::new();

    for count in [1, 50, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let dir = RamDirectory::new();
            let mut infos = ledger_in(&dir, count);
            infos.commit(&dir).unwrap();
            b.iter(|| {
                let read = SegmentInfos::read_latest_commit(black_box(&dir), &codecs).unwrap();
                black_box(read);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_commit_ram, bench_commit_fs, bench_read_latest_commit);
criterion_main!(benches);
