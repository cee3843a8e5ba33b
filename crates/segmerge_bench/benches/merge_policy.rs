//! Merge selection benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use segmerge_bench::{ledger_with_sizes, random_sizes_mb};
use segmerge_core::merge::{MergePolicy, MergeTrigger, SimpleMergeContext};
use segmerge_core::TieredMergePolicy;
use std::collections::{HashMap, HashSet};

/// Benchmark natural merge selection over ledgers of growing size.
fn bench_find_merges(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_find_merges");
    let policy = TieredMergePolicy::default();
    let ctx = SimpleMergeContext::new(HashSet::new());

    for count in [10, 100, 1000].iter() {
        let infos = ledger_with_sizes(&random_sizes_mb(*count), 5.0);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let spec = policy
                    .find_merges(MergeTrigger::SegmentFlush, black_box(&infos), &ctx)
                    .unwrap();
                black_box(spec);
            });
        });
    }

    group.finish();
}

/// Benchmark forced merge selection down to a single segment.
fn bench_find_forced_merges(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_find_forced_merges");
    let policy = TieredMergePolicy::default();
    let ctx = SimpleMergeContext::new(HashSet::new());

    for count in [10, 100, 1000].iter() {
        let infos = ledger_with_sizes(&random_sizes_mb(*count), 0.0);
        let to_merge: HashMap<String, bool> = infos.iter().map(|s| (s.name().to_string(), true)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let spec = policy
                    .find_forced_merges(black_box(&infos), 1, &to_merge, &ctx)
                    .unwrap();
                black_box(spec);
            });
        });
    }

    group.finish();
}

/// Benchmark forced-deletes selection with heavily deleted segments.
fn bench_find_forced_deletes_merges(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_find_forced_deletes_merges");
    let policy = TieredMergePolicy::default();
    let ctx = SimpleMergeContext::new(HashSet::new());

    for count in [100, 1000].iter() {
        let infos = ledger_with_sizes(&random_sizes_mb(*count), 30.0);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let spec = policy.find_forced_deletes_merges(black_box(&infos), &ctx).unwrap();
                black_box(spec);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_find_merges,
    bench_find_forced_merges,
    bench_find_forced_deletes_merges
);
criterion_main!(benches);
