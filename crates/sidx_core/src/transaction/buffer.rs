//! Per-transaction index mutations.
//!
//! A transaction never touches a committed engine. Every index change it
//! makes is staged here, keyed by `(index, key, rid)`; a later operation on
//! the same triple replaces the earlier one. Reads through the transaction
//! merge the committed snapshot with the staged operations. At commit the
//! buffer is validated against the committed state and then applied to a
//! private copy of each touched snapshot.

use crate::error::{CoreError, CoreResult};
use crate::index::{CompositeKey, Direction, EngineSnapshot, EntryCursor, IndexDelta, IndexEngine};
use crate::record::RecordId;
use crate::types::{IndexId, SequenceNumber};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

/// A staged operation on one `(key, rid)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    /// The entry must exist after commit.
    Put,
    /// The entry must not exist after commit.
    Remove,
}

/// Staged operations of one index, by key then record.
pub type KeyOps = BTreeMap<CompositeKey, BTreeMap<RecordId, PendingOp>>;

/// Staged index operations of one transaction.
#[derive(Debug, Clone, Default)]
pub struct IndexBuffer {
    indexes: BTreeMap<IndexId, KeyOps>,
}

impl IndexBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a delta: its removals, then its additions.
    pub fn stage(&mut self, index: IndexId, delta: &IndexDelta) {
        let rid = delta.rid;
        if delta.is_empty() {
            return;
        }
        let ops = self.indexes.entry(index).or_default();
        for key in &delta.to_remove {
            ops.entry(key.clone())
                .or_default()
                .insert(rid, PendingOp::Remove);
        }
        for key in &delta.to_add {
            ops.entry(key.clone()).or_default().insert(rid, PendingOp::Put);
        }
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Returns the number of staged operations across all indexes.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.indexes
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns the touched indexes in ascending id order.
    pub fn touched(&self) -> impl Iterator<Item = IndexId> + '_ {
        self.indexes.keys().copied()
    }

    /// Returns the staged operations of one index.
    #[must_use]
    pub fn ops(&self, index: IndexId) -> Option<&KeyOps> {
        self.indexes.get(&index)
    }

    /// Discards everything staged.
    pub fn clear(&mut self) {
        self.indexes.clear();
    }

    fn merged_bucket(
        snapshot: &EngineSnapshot,
        key: &CompositeKey,
        pending: Option<&BTreeMap<RecordId, PendingOp>>,
    ) -> BTreeSet<RecordId> {
        let mut rids: BTreeSet<RecordId> = snapshot
            .bucket(key)
            .map(|b| b.rids().clone())
            .unwrap_or_default();
        for (rid, op) in pending.into_iter().flatten() {
            match op {
                PendingOp::Put => rids.insert(*rid),
                PendingOp::Remove => rids.remove(rid),
            };
        }
        rids
    }

    /// Returns the records under `key` as this transaction sees them.
    #[must_use]
    pub fn merged_get(
        &self,
        index: IndexId,
        snapshot: &EngineSnapshot,
        key: &CompositeKey,
    ) -> BTreeSet<RecordId> {
        let pending = self.indexes.get(&index).and_then(|ops| ops.get(key));
        Self::merged_bucket(snapshot, key, pending)
    }

    /// Returns the entry count as this transaction sees it.
    #[must_use]
    pub fn merged_size(&self, index: IndexId, snapshot: &EngineSnapshot) -> usize {
        let Some(ops) = self.indexes.get(&index) else {
            return snapshot.len();
        };
        let mut size = snapshot.len();
        for (key, pending) in ops {
            let committed = snapshot.bucket(key);
            for (rid, op) in pending {
                let present = committed.is_some_and(|b| b.contains(*rid));
                match (op, present) {
                    (PendingOp::Put, false) => size += 1,
                    (PendingOp::Remove, true) => size -= 1,
                    _ => {}
                }
            }
        }
        size
    }

    /// Returns every entry as this transaction sees it, sorted.
    #[must_use]
    pub fn merged_entries(
        &self,
        index: IndexId,
        snapshot: &EngineSnapshot,
    ) -> Vec<(CompositeKey, RecordId)> {
        let mut entries: BTreeSet<(CompositeKey, RecordId)> =
            snapshot.entries().into_iter().collect();
        for (key, pending) in self.indexes.get(&index).into_iter().flatten() {
            for (rid, op) in pending {
                match op {
                    PendingOp::Put => entries.insert((key.clone(), *rid)),
                    PendingOp::Remove => entries.remove(&(key.clone(), *rid)),
                };
            }
        }
        entries.into_iter().collect()
    }

    /// Returns the entries between two bounds as this transaction sees
    /// them, in `direction` order.
    ///
    /// Only committed entries inside the bounds are read. `snapshot` must
    /// belong to an ordered engine.
    #[must_use]
    pub fn merged_range(
        &self,
        index: IndexId,
        snapshot: &Arc<EngineSnapshot>,
        lower: Bound<CompositeKey>,
        upper: Bound<CompositeKey>,
        direction: Direction,
    ) -> Vec<(CompositeKey, RecordId)> {
        let in_bounds = |k: &CompositeKey| k.satisfies_lower(&lower) && k.satisfies_upper(&upper);
        let staged: Vec<(&CompositeKey, &BTreeMap<RecordId, PendingOp>)> = self
            .indexes
            .get(&index)
            .into_iter()
            .flatten()
            .filter(|(k, _)| in_bounds(k))
            .collect();

        let cursor = EntryCursor::new(
            Arc::clone(snapshot),
            lower.clone(),
            upper.clone(),
            Direction::Ascending,
        );
        let mut entries: BTreeSet<(CompositeKey, RecordId)> = cursor.collect();
        for (key, pending) in staged {
            for (rid, op) in pending {
                match op {
                    PendingOp::Put => entries.insert((key.clone(), *rid)),
                    PendingOp::Remove => entries.remove(&(key.clone(), *rid)),
                };
            }
        }
        let mut out: Vec<_> = entries.into_iter().collect();
        if direction == Direction::Descending {
            out.reverse();
        }
        out
    }

    /// Checks the staged puts of one index against its committed state.
    ///
    /// # Errors
    ///
    /// [`CoreError::Conflict`] if a key the transaction wants was free in
    /// its snapshot but was taken by a commit after `snapshot_seq`.
    /// [`CoreError::DuplicateKey`] for any other uniqueness violation,
    /// including two puts of one key inside the transaction itself.
    pub fn validate(
        &self,
        index: IndexId,
        engine: &IndexEngine,
        snapshot: &EngineSnapshot,
        snapshot_seq: SequenceNumber,
    ) -> CoreResult<()> {
        if !engine.is_unique() {
            return Ok(());
        }
        let Some(ops) = self.indexes.get(&index) else {
            return Ok(());
        };
        for (key, pending) in ops {
            if !pending.values().any(|op| *op == PendingOp::Put) {
                continue;
            }
            let merged = Self::merged_bucket(snapshot, key, Some(pending));
            if engine.admits(key, merged.len()) {
                continue;
            }
            let committed = snapshot.bucket(key);
            let is_committed = |rid: &RecordId| committed.is_some_and(|b| b.contains(*rid));
            let puts = pending
                .iter()
                .filter(|(_, op)| **op == PendingOp::Put)
                .map(|(rid, _)| *rid);
            let Some(rejected) = puts
                .clone()
                .find(|r| !is_committed(r))
                .or_else(|| puts.clone().next())
            else {
                continue;
            };
            let others: Vec<RecordId> = merged.into_iter().filter(|r| *r != rejected).collect();
            let existing = others
                .iter()
                .find(|r| is_committed(r))
                .or_else(|| others.first())
                .copied()
                .unwrap_or(rejected);

            let raced = committed.is_some_and(|b| b.modified_at() > snapshot_seq);
            if is_committed(&existing) && raced {
                engine.stats().record_conflict();
                return Err(CoreError::Conflict {
                    target: engine.name().to_string(),
                    key: key.to_string(),
                });
            }
            return Err(engine.duplicate(key, existing, rejected));
        }
        Ok(())
    }

    /// Applies the staged operations of one index to `snapshot`.
    ///
    /// Returns the number of entries added and removed.
    pub(crate) fn apply(
        &self,
        index: IndexId,
        snapshot: &mut EngineSnapshot,
        seq: SequenceNumber,
    ) -> (u64, u64) {
        let Some(ops) = self.indexes.get(&index) else {
            return (0, 0);
        };
        let (mut added, mut removed) = (0u64, 0u64);
        for (key, pending) in ops {
            for (rid, op) in pending {
                if *op == PendingOp::Remove && snapshot.store_mut().remove(key, *rid, seq) {
                    removed += 1;
                }
            }
        }
        for (key, pending) in ops {
            for (rid, op) in pending {
                if *op == PendingOp::Put && snapshot.store_mut().insert(key.clone(), *rid, seq) {
                    added += 1;
                }
            }
        }
        (added, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UniqueNullPolicy;
    use crate::index::{IndexState, IndexType};
    use crate::key;
    use crate::stats::IndexStats;
    use crate::value::Value;
    use std::sync::Arc;

    const IDX: IndexId = IndexId(1);

    fn engine(index_type: IndexType) -> IndexEngine {
        let e = IndexEngine::new(
            "C.x",
            index_type,
            UniqueNullPolicy::Shared,
            Arc::new(IndexStats::new()),
        );
        e.set_state(IndexState::Active);
        e
    }

    fn delta(rid: RecordId, remove: &[CompositeKey], add: &[CompositeKey]) -> IndexDelta {
        IndexDelta {
            rid,
            to_remove: remove.iter().cloned().collect(),
            to_add: add.iter().cloned().collect(),
        }
    }

    #[test]
    fn later_op_overrides_earlier() {
        let rid = RecordId::new();
        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(rid, &[], &[key![1]]));
        buf.stage(IDX, &delta(rid, &[key![1]], &[key![2]]));
        let ops = buf.ops(IDX).unwrap();
        assert_eq!(ops[&key![1]][&rid], PendingOp::Remove);
        assert_eq!(ops[&key![2]][&rid], PendingOp::Put);
        assert_eq!(buf.op_count(), 2);
    }

    #[test]
    fn ops_are_keyed_by_the_delta_record() {
        let (a, b) = (RecordId::new(), RecordId::new());
        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(a, &[], &[key![1]]));
        buf.stage(IDX, &delta(b, &[key![1]], &[]));
        buf.stage(IDX, &delta(b, &[], &[]));
        let ops = buf.ops(IDX).unwrap();
        assert_eq!(ops[&key![1]][&a], PendingOp::Put);
        assert_eq!(ops[&key![1]][&b], PendingOp::Remove);
        assert_eq!(buf.op_count(), 2);
    }

    #[test]
    fn merged_reads_see_own_writes() {
        let e = engine(IndexType::NotUnique);
        let committed = RecordId::new();
        e.put(key![1], committed).unwrap();
        let snap = e.committed();

        let mine = RecordId::new();
        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(mine, &[], &[key![1]]));
        buf.stage(IDX, &delta(committed, &[key![1]], &[]));

        assert_eq!(buf.merged_get(IDX, &snap, &key![1]), [mine].into());
        assert_eq!(buf.merged_size(IDX, &snap), 1);
        assert_eq!(buf.merged_entries(IDX, &snap), vec![(key![1], mine)]);
        assert_eq!(e.size().unwrap(), 1);
    }

    #[test]
    fn merged_range_reads_only_the_bounds() {
        let e = engine(IndexType::NotUnique);
        let (a, b, c) = (RecordId::new(), RecordId::new(), RecordId::new());
        e.put(key![1, 1], a).unwrap();
        e.put(key![2, 1], b).unwrap();
        e.put(key![3, 1], c).unwrap();
        let snap = e.committed();

        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(b, &[key![2, 1]], &[key![2, 5]]));
        buf.stage(IDX, &delta(c, &[], &[key![9, 9]]));

        let asc = buf.merged_range(
            IDX,
            &snap,
            Bound::Included(key![2]),
            Bound::Included(key![3]),
            Direction::Ascending,
        );
        assert_eq!(asc, vec![(key![2, 5], b), (key![3, 1], c)]);

        let desc = buf.merged_range(
            IDX,
            &snap,
            Bound::Unbounded,
            Bound::Excluded(key![3]),
            Direction::Descending,
        );
        assert_eq!(desc, vec![(key![2, 5], b), (key![1, 1], a)]);
    }

    #[test]
    fn two_pending_puts_of_one_key_are_a_duplicate() {
        let e = engine(IndexType::Unique);
        let snap = e.committed();
        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(RecordId::new(), &[], &[key![7]]));
        buf.stage(IDX, &delta(RecordId::new(), &[], &[key![7]]));
        let err = buf.validate(IDX, &e, &snap, SequenceNumber::new(0)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
    }

    #[test]
    fn moving_a_key_between_records_is_allowed() {
        let e = engine(IndexType::Unique);
        let (a, b) = (RecordId::new(), RecordId::new());
        e.put(key![7], a).unwrap();
        let snap = e.committed();

        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(a, &[key![7]], &[key![8]]));
        buf.stage(IDX, &delta(b, &[], &[key![7]]));
        buf.validate(IDX, &e, &snap, SequenceNumber::new(0)).unwrap();

        let mut next = (*snap).clone();
        let (added, removed) = buf.apply(IDX, &mut next, SequenceNumber::new(1));
        assert_eq!((added, removed), (2, 1));
        assert_eq!(next.entries().len(), 2);
        assert!(next.bucket(&key![7]).unwrap().contains(b));
    }

    #[test]
    fn collision_with_later_commit_is_a_conflict() {
        let e = engine(IndexType::Unique);
        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(RecordId::new(), &[], &[key!["k"]]));

        // Another transaction commits the same key at seq 1.
        let mut snap = (*e.committed()).clone();
        snap.store_mut()
            .insert(key!["k"], RecordId::new(), SequenceNumber::new(1));

        let err = buf.validate(IDX, &e, &snap, SequenceNumber::new(0)).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        let err = buf.validate(IDX, &e, &snap, SequenceNumber::new(1)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
    }

    #[test]
    fn null_keys_pass_validation_when_shared() {
        let e = engine(IndexType::Unique);
        let snap = e.committed();
        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(RecordId::new(), &[], &[key![Value::Null]]));
        buf.stage(IDX, &delta(RecordId::new(), &[], &[key![Value::Null]]));
        buf.validate(IDX, &e, &snap, SequenceNumber::new(0)).unwrap();
    }

    #[test]
    fn not_unique_never_fails_validation() {
        let e = engine(IndexType::NotUnique);
        let snap = e.committed();
        let mut buf = IndexBuffer::new();
        buf.stage(IDX, &delta(RecordId::new(), &[], &[key![1]]));
        buf.stage(IDX, &delta(RecordId::new(), &[], &[key![1]]));
        buf.validate(IDX, &e, &snap, SequenceNumber::new(0)).unwrap();
    }
}
