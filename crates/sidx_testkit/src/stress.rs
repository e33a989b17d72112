//! Stress tests for concurrent commits and snapshot reads.
//!
//! These drive several threads against one database and count outcomes;
//! callers assert on the counts.

use crate::fixtures::scenarios::{item, ITEM};
use sidx_core::{Database, Document, RecordId, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Rounds (or writes per writer thread).
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Tags carried by every record in the torn-read test.
    pub tags_per_record: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            tags_per_record: 3,
        }
    }
}

/// Races `threads` writers inserting the same unique `x` in every round.
///
/// Every writer stages its insert before any of them commits. The result
/// counts commits: a correct engine yields exactly one success per round.
/// The database must have `Item` with a unique index over `x`.
pub fn stress_unique_races(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let threads = config.threads.max(2);
    let rounds = config.operations;
    let staged = Arc::new(Barrier::new(threads));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let db = Arc::clone(&db);
            let staged = Arc::clone(&staged);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            thread::spawn(move || {
                for round in 0..rounds {
                    let mut txn = db.begin().expect("begin");
                    db.save(&mut txn, item(round as i64, &[])).expect("stage");
                    staged.wait();
                    match db.commit(&mut txn) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            assert!(e.is_constraint_violation(), "unexpected error: {e}");
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Rewrites every tag of a record set while readers stream the tag index.
///
/// Each commit replaces all `tags_per_record` tags of one record at once,
/// so every committed state holds exactly that many entries per record. A
/// reader that ever sees another count observed a torn update and counts
/// as a failure; every clean scan counts as a success.
///
/// The database must have `Item` with a non-unique index named `index`
/// over `tags`.
pub fn stress_snapshot_reads(
    db: Arc<Database>,
    index: &str,
    config: &StressConfig,
) -> StressTestResult {
    let per_record = config.tags_per_record.max(1) as i64;
    let records: Vec<RecordId> = (0..8)
        .map(|i| {
            let tags: Vec<i64> = (0..per_record).map(|t| i * 1000 + t).collect();
            db.insert(item(i, &tags)).expect("seed insert")
        })
        .collect();
    let records = Arc::new(records);
    let handle = db.index(index).expect("index exists");

    let done = Arc::new(AtomicBool::new(false));
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let writer = {
        let db = Arc::clone(&db);
        let records = Arc::clone(&records);
        let done = Arc::clone(&done);
        let writes = config.operations;
        thread::spawn(move || {
            for n in 0..writes {
                let rid = records[n % records.len()];
                let base = (n as i64 + 1) * 100;
                let tags: Vec<i64> = (0..per_record).map(|t| base + t).collect();
                let doc = Document::new(ITEM)
                    .with("x", (n % records.len()) as i64)
                    .with("tags", Value::list(tags));
                db.update(rid, doc).expect("update");
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..config.threads.max(1))
        .map(|_| {
            let handle = Arc::clone(&handle);
            let done = Arc::clone(&done);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            thread::spawn(move || loop {
                let finished = done.load(Ordering::Acquire);
                let mut counts: HashMap<RecordId, i64> = HashMap::new();
                for (_, rid) in handle.engine().stream_ascending().expect("stream") {
                    *counts.entry(rid).or_default() += 1;
                }
                if counts.len() == 8 && counts.values().all(|c| *c == per_record) {
                    successful.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                if finished {
                    break;
                }
            })
        })
        .collect();

    writer.join().expect("Writer panicked");
    for reader in readers {
        reader.join().expect("Reader panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
