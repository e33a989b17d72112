//! Index maintenance and lookup benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sidx_bench::{bench_database, define_schema, populate, random_document, CLASS};
use sidx_core::{key, Config, Database, Direction, FetchFromIndex, KeyCondition, Operator};
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};

/// Benchmark autocommit inserts maintaining a unique and a multikey index.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for tags in [0usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(tags), tags, |b, &tags| {
            let db = bench_database();
            let next = AtomicI64::new(0);
            b.iter(|| {
                let x = next.fetch_add(1, Ordering::Relaxed);
                db.insert(black_box(random_document(x, tags))).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark batch commits.
fn bench_batch_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_commit");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let db = bench_database();
                let mut base = 0i64;
                b.iter(|| {
                    db.transaction(|txn| {
                        for i in 0..batch_size as i64 {
                            db.save(txn, random_document((base + i), 4))?;
                        }
                        Ok(())
                    })
                    .unwrap();
                    base += batch_size as i64;
                });
            },
        );
    }
    group.finish();
}

/// Benchmark point lookups on a populated index.
fn bench_point_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_lookup");

    for size in [1_000usize, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = bench_database();
            populate(&db, size, 4);
            let index = db.index("Bench.x").unwrap();
            let mut x = 0i64;
            b.iter(|| {
                x = (x + 7919) % size as i64;
                let hits = index.engine().get(&key![x]).unwrap().count();
                black_box(hits);
            });
        });
    }
    group.finish();
}

/// Benchmark range scans of increasing width.
fn bench_range_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_scan");
    let db = bench_database();
    populate(&db, 10_000, 4);
    let index = db.index("Bench.x_tags").unwrap();

    for width in [10i64, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, &width| {
            b.iter(|| {
                let entries = index
                    .engine()
                    .range(
                        Bound::Included(key![500]),
                        Bound::Excluded(key![500 + width]),
                        Direction::Ascending,
                    )
                    .unwrap()
                    .count();
                black_box(entries);
            });
        });
    }
    group.finish();
}

/// Benchmark planner selection plus fetch.
fn bench_select_and_fetch(c: &mut Criterion) {
    let db = bench_database();
    populate(&db, 10_000, 4);

    c.bench_function("select_and_fetch", |b| {
        let mut x = 0i64;
        b.iter(|| {
            x = (x + 31) % 10_000;
            let plan = db.select_index(CLASS, &["x"], Operator::Eq).unwrap().unwrap();
            let rids = db
                .fetch(&FetchFromIndex::new(plan, KeyCondition::Eq(key![x])))
                .unwrap();
            black_box(rids);
        });
    });
}

/// Benchmark full rebuilds.
fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    group.sample_size(10);

    for size in [1_000usize, 10_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let db = bench_database();
            populate(&db, size, 4);
            b.iter(|| black_box(db.rebuild_index("Bench.x_tags").unwrap()));
        });
    }
    group.finish();
}

/// Benchmark checkpoint and reopen of an index directory.
fn bench_checkpoint_reopen(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    group.sample_size(10);
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("db");
    let config = Config::default().sync_on_write(false);
    {
        let db = Database::open(&path, config.clone()).unwrap();
        define_schema(&db);
        populate(&db, 5_000, 4);
        db.close().unwrap();
    }

    group.bench_function("checkpoint", |b| {
        let db = Database::open(&path, config.clone()).unwrap();
        b.iter(|| db.checkpoint().unwrap());
    });
    group.bench_function("reopen", |b| {
        b.iter(|| {
            let db = Database::open(&path, config.clone()).unwrap();
            black_box(db.record_count());
            db.abandon();
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_batch_commit,
    bench_point_lookup,
    bench_range_scan,
    bench_select_and_fetch,
    bench_rebuild,
    bench_checkpoint_reopen,
);

criterion_main!(benches);
