//! Index engine statistics.
//!
//! All counters are atomic and monotonically increasing; they can be read
//! while operations are in progress.
//!
//! ```rust,ignore
//! let db = Database::open_in_memory(Config::default())?;
//! // ... queries and commits ...
//! let stats = db.stats().snapshot();
//! println!("lookups: {}, conflicts: {}", stats.point_lookups, stats.conflicts);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every index of a database.
#[derive(Debug, Default)]
pub struct IndexStats {
    point_lookups: AtomicU64,
    scans: AtomicU64,
    entries_put: AtomicU64,
    entries_removed: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    unique_violations: AtomicU64,
    conflicts: AtomicU64,
    rebuilds: AtomicU64,
    rebuild_failures: AtomicU64,
}

impl IndexStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_point_lookup(&self) {
        self.point_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_changes(&self, put: u64, removed: u64) {
        self.entries_put.fetch_add(put, Ordering::Relaxed);
        self.entries_removed.fetch_add(removed, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unique_violation(&self) {
        self.unique_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rebuild(&self, ok: bool) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.rebuild_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the number of point lookups (`get`).
    pub fn point_lookups(&self) -> u64 {
        self.point_lookups.load(Ordering::Relaxed)
    }

    /// Returns the number of streams, range and prefix scans opened.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Returns the number of committed commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back transactions, failed commits included.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Returns the number of unique constraint violations.
    pub fn unique_violations(&self) -> u64 {
        self.unique_violations.load(Ordering::Relaxed)
    }

    /// Returns the number of write conflicts.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            point_lookups: self.point_lookups(),
            scans: self.scans(),
            entries_put: self.entries_put.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            commits: self.commits(),
            rollbacks: self.rollbacks(),
            unique_violations: self.unique_violations(),
            conflicts: self.conflicts(),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            rebuild_failures: self.rebuild_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`IndexStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Point lookups.
    pub point_lookups: u64,
    /// Streams and scans opened.
    pub scans: u64,
    /// Index entries added by commits and rebuilds.
    pub entries_put: u64,
    /// Index entries removed by commits.
    pub entries_removed: u64,
    /// Successful commits.
    pub commits: u64,
    /// Rolled back or failed transactions.
    pub rollbacks: u64,
    /// Unique constraint violations.
    pub unique_violations: u64,
    /// Write conflicts.
    pub conflicts: u64,
    /// Rebuilds attempted.
    pub rebuilds: u64,
    /// Rebuilds that failed.
    pub rebuild_failures: u64,
}
