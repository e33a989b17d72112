//! Index engine: one ordered or hashed key to record-id store.
//!
//! The committed state of an engine is an immutable [`EngineSnapshot`]
//! behind an `Arc`. Readers clone the `Arc` (the lock is held only for the
//! clone) and then read without locks. Writers hold the write lock, copy the
//! snapshot if a reader still holds it, and mutate the copy in place.
//!
//! # Invariants
//!
//! - `size()` counts `(key, rid)` entries, not distinct keys
//! - A key disappears when its last record is removed
//! - A unique engine never holds two records under one key, except
//!   null-bearing keys under [`UniqueNullPolicy::Shared`]

use crate::config::UniqueNullPolicy;
use crate::error::{CoreError, CoreResult};
use crate::index::cursor::{Direction, EntryCursor, KeyCursor, RecordIds};
use crate::index::{CompositeKey, EngineSnapshot, IndexType};
use crate::record::RecordId;
use crate::stats::IndexStats;
use crate::types::SequenceNumber;
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexState {
    /// Registered; initial population in progress.
    Creating,
    /// Serving reads and writes.
    Active,
    /// Full rescan in progress, or a failed rebuild awaiting repair.
    Rebuilding,
    /// Dropped; every further use fails with `NotFound`.
    Dropped,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Rebuilding => "REBUILDING",
            Self::Dropped => "DROPPED",
        };
        f.write_str(s)
    }
}

/// A single index's storage and its point, range and stream operations.
pub struct IndexEngine {
    name: String,
    ordered: bool,
    unique: bool,
    nulls_shared: bool,
    state: RwLock<IndexState>,
    committed: RwLock<Arc<EngineSnapshot>>,
    stats: Arc<IndexStats>,
}

impl IndexEngine {
    /// Creates an empty engine in the `Creating` state.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        index_type: IndexType,
        null_policy: UniqueNullPolicy,
        stats: Arc<IndexStats>,
    ) -> Self {
        let ordered = !index_type.is_hashed();
        Self {
            name: name.into(),
            ordered,
            unique: index_type.is_unique(),
            nulls_shared: null_policy == UniqueNullPolicy::Shared,
            state: RwLock::new(IndexState::Creating),
            committed: RwLock::new(Arc::new(EngineSnapshot::empty(
                ordered,
                SequenceNumber::default(),
            ))),
            stats,
        }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: IndexState) {
        *self.state.write() = state;
    }

    /// Returns true for BTree-backed engines.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Returns true if the engine enforces uniqueness.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns true if `holders` records may share `key`.
    #[must_use]
    pub fn admits(&self, key: &CompositeKey, holders: usize) -> bool {
        !self.unique || holders <= 1 || (self.nulls_shared && key.has_null())
    }

    fn ensure_ready(&self) -> CoreResult<()> {
        match self.state() {
            IndexState::Active => Ok(()),
            IndexState::Dropped => Err(CoreError::not_found(format!(
                "index '{}' has been dropped",
                self.name
            ))),
            state => Err(CoreError::IndexNotReady {
                index: self.name.clone(),
                state: state.to_string(),
            }),
        }
    }

    fn ensure_ordered(&self, op: &str) -> CoreResult<()> {
        if self.ordered {
            Ok(())
        } else {
            Err(CoreError::unsupported(format!(
                "{op} is not supported by hash index '{}'",
                self.name
            )))
        }
    }

    /// Returns the committed snapshot without a state check.
    pub(crate) fn committed(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.committed.read())
    }

    /// Returns the committed snapshot for reading.
    pub fn snapshot(&self) -> CoreResult<Arc<EngineSnapshot>> {
        self.ensure_ready()?;
        Ok(self.committed())
    }

    pub(crate) fn duplicate(
        &self,
        key: &CompositeKey,
        existing: RecordId,
        rejected: RecordId,
    ) -> CoreError {
        self.stats.record_unique_violation();
        CoreError::DuplicateKey {
            index: self.name.clone(),
            key: key.to_string(),
            existing: existing.to_string(),
            rejected: rejected.to_string(),
        }
    }

    /// Stores `(key, rid)` directly in the committed state.
    ///
    /// Transactions go through the transaction buffer instead; this is the
    /// single-operation path.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateKey`] if the engine is unique and another
    /// record already owns a non-exempt key.
    pub fn put(&self, key: CompositeKey, rid: RecordId) -> CoreResult<()> {
        self.ensure_ready()?;
        let mut guard = self.committed.write();
        if let Some(bucket) = guard.bucket(&key) {
            if !bucket.contains(rid) && !self.admits(&key, bucket.len() + 1) {
                let existing = bucket.rids().iter().next().copied().unwrap_or(rid);
                return Err(self.duplicate(&key, existing, rid));
            }
        }
        let seq = guard.seq();
        if Arc::make_mut(&mut *guard).store_mut().insert(key, rid, seq) {
            self.stats.record_changes(1, 0);
        }
        Ok(())
    }

    /// Removes `(key, rid)`; returns true if it was present.
    pub fn remove(&self, key: &CompositeKey, rid: RecordId) -> CoreResult<bool> {
        self.ensure_ready()?;
        let mut guard = self.committed.write();
        if !guard.bucket(key).is_some_and(|b| b.contains(rid)) {
            return Ok(false);
        }
        let seq = guard.seq();
        let removed = Arc::make_mut(&mut *guard).store_mut().remove(key, rid, seq);
        self.stats.record_changes(0, u64::from(removed));
        Ok(removed)
    }

    /// Looks up the records stored under an exact key.
    pub fn get(&self, key: &CompositeKey) -> CoreResult<RecordIds> {
        let snapshot = self.snapshot()?;
        self.stats.record_point_lookup();
        Ok(RecordIds::new(snapshot, key.clone()))
    }

    /// Returns true if any record is stored under `key`.
    pub fn contains_key(&self, key: &CompositeKey) -> CoreResult<bool> {
        Ok(self.snapshot()?.bucket(key).is_some())
    }

    /// Returns the number of `(key, rid)` entries.
    pub fn size(&self) -> CoreResult<usize> {
        Ok(self.snapshot()?.len())
    }

    /// Returns the number of distinct keys.
    pub fn key_count(&self) -> CoreResult<usize> {
        Ok(self.snapshot()?.store().key_count())
    }

    /// Streams every entry in ascending key order.
    pub fn stream_ascending(&self) -> CoreResult<EntryCursor> {
        self.range(Bound::Unbounded, Bound::Unbounded, Direction::Ascending)
    }

    /// Streams every entry in descending key order.
    pub fn stream_descending(&self) -> CoreResult<EntryCursor> {
        self.range(Bound::Unbounded, Bound::Unbounded, Direction::Descending)
    }

    /// Streams the distinct keys in ascending order.
    pub fn key_stream(&self) -> CoreResult<KeyCursor> {
        self.ensure_ordered("key stream")?;
        let snapshot = self.snapshot()?;
        self.stats.record_scan();
        Ok(KeyCursor::new(snapshot))
    }

    /// Streams entries between two bounds.
    ///
    /// Bounds may be partial keys; see [`EntryCursor`] for how prefixes are
    /// treated.
    pub fn range(
        &self,
        lower: Bound<CompositeKey>,
        upper: Bound<CompositeKey>,
        direction: Direction,
    ) -> CoreResult<EntryCursor> {
        self.ensure_ordered("range scan")?;
        let snapshot = self.snapshot()?;
        self.stats.record_scan();
        Ok(EntryCursor::new(snapshot, lower, upper, direction))
    }

    /// Streams every entry whose key starts with `prefix`.
    pub fn prefix(&self, prefix: &CompositeKey, direction: Direction) -> CoreResult<EntryCursor> {
        self.range(
            Bound::Included(prefix.clone()),
            Bound::Included(prefix.clone()),
            direction,
        )
    }

    /// Returns the smallest key.
    pub fn first_key(&self) -> CoreResult<Option<CompositeKey>> {
        self.ensure_ordered("first key")?;
        let snapshot = self.snapshot()?;
        Ok(snapshot.ordered().and_then(|s| s.first_key().cloned()))
    }

    /// Returns the largest key.
    pub fn last_key(&self) -> CoreResult<Option<CompositeKey>> {
        self.ensure_ordered("last key")?;
        let snapshot = self.snapshot()?;
        Ok(snapshot.ordered().and_then(|s| s.last_key().cloned()))
    }

    /// Removes every entry.
    pub fn clear(&self) -> CoreResult<()> {
        self.ensure_ready()?;
        let mut guard = self.committed.write();
        let seq = guard.seq();
        *guard = Arc::new(EngineSnapshot::empty(self.ordered, seq));
        Ok(())
    }

    /// Builds a complete snapshot from scratch, enforcing uniqueness.
    pub(crate) fn build_snapshot(
        &self,
        entries: impl IntoIterator<Item = (CompositeKey, RecordId)>,
        seq: SequenceNumber,
    ) -> CoreResult<EngineSnapshot> {
        let mut snapshot = EngineSnapshot::empty(self.ordered, seq);
        let mut added = 0u64;
        for (key, rid) in entries {
            if let Some(bucket) = snapshot.bucket(&key) {
                if !bucket.contains(rid) && !self.admits(&key, bucket.len() + 1) {
                    let existing = bucket.rids().iter().next().copied().unwrap_or(rid);
                    return Err(self.duplicate(&key, existing, rid));
                }
            }
            if snapshot.store_mut().insert(key, rid, seq) {
                added += 1;
            }
        }
        self.stats.record_changes(added, 0);
        Ok(snapshot)
    }

    /// Replaces the committed state.
    pub(crate) fn install(&self, snapshot: EngineSnapshot) {
        *self.committed.write() = Arc::new(snapshot);
    }

    /// Marks the engine dropped and releases its entries.
    pub(crate) fn release(&self) {
        let mut guard = self.committed.write();
        let seq = guard.seq();
        *guard = Arc::new(EngineSnapshot::empty(self.ordered, seq));
        self.set_state(IndexState::Dropped);
    }

    /// Takes the write lock for a commit.
    pub(crate) fn lock_for_commit(&self) -> RwLockWriteGuard<'_, Arc<EngineSnapshot>> {
        self.committed.write()
    }

    pub(crate) fn stats(&self) -> &IndexStats {
        &self.stats
    }
}

impl fmt::Debug for IndexEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexEngine")
            .field("name", &self.name)
            .field("ordered", &self.ordered)
            .field("unique", &self.unique)
            .field("state", &self.state())
            .field("entries", &self.committed().len())
            .finish_non_exhaustive()
    }
}
