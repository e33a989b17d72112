//! Composite key benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sidx_bench::random_keys;
use sidx_core::{key, CompositeKey};

/// Benchmark sorting keys with mixed null and integer slots.
fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_sort");

    for count in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let keys = random_keys(count);
            b.iter(|| {
                let mut sorted = keys.clone();
                sorted.sort();
                black_box(sorted);
            });
        });
    }
    group.finish();
}

/// Benchmark prefix tests used by partial-key scans.
fn bench_prefix(c: &mut Criterion) {
    let keys = random_keys(1_000);
    let prefix: CompositeKey = key![500];

    c.bench_function("key_starts_with", |b| {
        b.iter(|| {
            let matching = keys.iter().filter(|k| k.starts_with(&prefix)).count();
            black_box(matching);
        });
    });
}

criterion_group!(benches, bench_sort, bench_prefix);
criterion_main!(benches);
