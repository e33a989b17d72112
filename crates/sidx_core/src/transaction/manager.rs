//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::index::{CompositeKey, IndexHandle, IndexManager, IndexState};
use crate::record::{Document, MemoryRecordStore, RecordId, RecordSource, RecordWrite};
use crate::transaction::state::Transaction;
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Runs transactions over the record store and the index registry.
///
/// The transaction manager provides:
/// - Buffered record writes with their index deltas staged per transaction
/// - Lost-update detection on records at commit
/// - Unique validation and atomic application of every touched index
/// - Commit ordering via sequence numbers
///
/// ## Commit Protocol
///
/// A commit holds the registry write lock for its whole duration, then
/// locks the touched engines in index-id order. Validation sees the latest
/// committed state; either every touched index and every record write is
/// applied under one new sequence, or nothing is.
pub struct TransactionManager {
    indexes: Arc<IndexManager>,
    records: Arc<MemoryRecordStore>,
    next_txid: AtomicU64,
    active_txns: RwLock<Vec<TransactionId>>,
}

impl TransactionManager {
    /// Creates a transaction manager.
    pub fn new(indexes: Arc<IndexManager>, records: Arc<MemoryRecordStore>) -> Self {
        Self {
            indexes,
            records,
            next_txid: AtomicU64::new(1),
            active_txns: RwLock::new(Vec::new()),
        }
    }

    /// Begins a new transaction.
    ///
    /// Index reads through the transaction see the committed state plus the
    /// transaction's own staged operations.
    pub fn begin(&self) -> Transaction {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let snapshot_seq = self.indexes.committed_seq();
        self.active_txns.write().push(txid);
        Transaction::new(txid, snapshot_seq, self.indexes.generation())
    }

    /// Buffers a record write and stages the index deltas it implies.
    ///
    /// The delta is computed against the record as this transaction sees
    /// it: its own pending write if any, otherwise the committed record.
    ///
    /// # Errors
    ///
    /// [`CoreError::TransactionState`] if the transaction is finished;
    /// key derivation errors leave the transaction unchanged.
    pub fn write(&self, txn: &mut Transaction, rid: RecordId, write: RecordWrite) -> CoreResult<()> {
        txn.ensure_active()?;
        // Before image and observed version come from one read of the store.
        let (before, observed) = match txn.pending_write(rid) {
            Some(RecordWrite::Save(doc)) => (Some(doc.clone()), None),
            Some(RecordWrite::Delete) => (None, None),
            None => match self.records.get_versioned(rid) {
                Some((doc, version)) => (Some(doc), Some(version)),
                None => (None, None),
            },
        };
        let after = match &write {
            RecordWrite::Save(doc) => Some(doc),
            RecordWrite::Delete => None,
        };
        let deltas = self.indexes.on_record_change(rid, before.as_ref(), after)?;
        for (id, delta) in &deltas {
            txn.buffer_mut().stage(*id, delta);
        }
        txn.record_write(rid, write, observed)
    }

    /// Reads a record: the transaction's own write, else the committed one.
    pub fn get(&self, txn: &Transaction, rid: RecordId) -> CoreResult<Option<Document>> {
        txn.ensure_active()?;
        Ok(match txn.pending_write(rid) {
            Some(RecordWrite::Save(doc)) => Some(doc.clone()),
            Some(RecordWrite::Delete) => None,
            None => self.records.get(rid),
        })
    }

    /// Returns the records under `key` in `index` as the transaction sees them.
    pub fn index_get(
        &self,
        txn: &Transaction,
        index: &IndexHandle,
        key: &CompositeKey,
    ) -> CoreResult<BTreeSet<RecordId>> {
        txn.ensure_active()?;
        let snapshot = index.engine().snapshot()?;
        Ok(txn.index_buffer().merged_get(index.id(), &snapshot, key))
    }

    /// Returns the entry count of `index` as the transaction sees it.
    pub fn index_size(&self, txn: &Transaction, index: &IndexHandle) -> CoreResult<usize> {
        txn.ensure_active()?;
        let snapshot = index.engine().snapshot()?;
        Ok(txn.index_buffer().merged_size(index.id(), &snapshot))
    }

    /// Commits a transaction.
    ///
    /// Returns the commit sequence. A transaction without writes commits
    /// without consuming a sequence.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TransactionState`] if the transaction is finished
    /// - [`CoreError::Conflict`] if a written record or a claimed unique key
    ///   was changed by a commit after this transaction began
    /// - [`CoreError::DuplicateKey`] for any other unique violation
    ///
    /// On error the transaction is rolled back and nothing is applied.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<SequenceNumber> {
        let _write_guard = self.indexes.lock_writes();
        txn.ensure_active()?;
        match self.commit_inner(txn) {
            Ok(seq) => {
                self.finish(txn.id());
                txn.mark_committed();
                self.indexes.stats().record_commit();
                debug!(target: "sidx::txn", txn = %txn.id(), seq = %seq, "transaction committed");
                Ok(seq)
            }
            Err(e) => {
                self.finish(txn.id());
                txn.mark_rolled_back();
                self.indexes.stats().record_rollback();
                debug!(target: "sidx::txn", txn = %txn.id(), error = %e, "commit failed, rolled back");
                Err(e)
            }
        }
    }

    fn commit_inner(&self, txn: &mut Transaction) -> CoreResult<SequenceNumber> {
        if txn.write_count() == 0 {
            return Ok(self.indexes.committed_seq());
        }

        for (rid, observed) in txn.observed() {
            if self.records.version(*rid) != *observed {
                self.indexes.stats().record_conflict();
                return Err(CoreError::Conflict {
                    target: "record".to_string(),
                    key: rid.to_string(),
                });
            }
        }

        let generation = self.indexes.generation();
        if txn.generation() != generation {
            let buffer = self.indexes.stage_writes(txn.pending_writes())?;
            txn.replace_buffer(buffer, generation);
        }

        let handles: Vec<Arc<IndexHandle>> = txn
            .index_buffer()
            .touched()
            .filter_map(|id| self.indexes.get_by_id(id))
            .filter(|h| h.state() == IndexState::Active)
            .collect();
        let mut guards: Vec<_> = handles
            .iter()
            .map(|h| (h, h.engine().lock_for_commit()))
            .collect();

        let buffer = txn.index_buffer();
        for (handle, guard) in &guards {
            buffer.validate(handle.id(), handle.engine(), guard, txn.snapshot_seq())?;
        }

        let seq = self.indexes.committed_seq().next();
        for (handle, guard) in &mut guards {
            let snapshot = Arc::make_mut(&mut **guard);
            let (added, removed) = buffer.apply(handle.id(), snapshot, seq);
            snapshot.set_seq(seq);
            self.indexes.stats().record_changes(added, removed);
        }
        self.records.apply(txn.pending_writes(), seq);
        self.indexes.set_committed_seq(seq);
        drop(guards);
        Ok(seq)
    }

    /// Rolls back a transaction, discarding its writes.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        self.finish(txn.id());
        txn.mark_rolled_back();
        self.indexes.stats().record_rollback();
        debug!(target: "sidx::txn", txn = %txn.id(), "transaction rolled back");
        Ok(())
    }

    fn finish(&self, txid: TransactionId) {
        self.active_txns.write().retain(|&id| id != txid);
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.indexes.committed_seq()
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::index::{IndexMetadata, IndexType};
    use crate::key;
    use crate::schema::{Property, PropertyType, Schema};
    use crate::stats::IndexStats;
    use crate::transaction::TransactionState;

    struct Fixture {
        records: Arc<MemoryRecordStore>,
        indexes: Arc<IndexManager>,
        tm: TransactionManager,
    }

    fn fixture() -> Fixture {
        let schema = Arc::new(Schema::new());
        schema.create_class("User", &[]).unwrap();
        schema
            .create_property("User", Property::new("email", PropertyType::String))
            .unwrap();
        schema
            .create_property(
                "User",
                Property::new("tags", PropertyType::EmbeddedList)
                    .with_linked_type(PropertyType::String),
            )
            .unwrap();
        let records = Arc::new(MemoryRecordStore::new());
        let indexes = Arc::new(IndexManager::new(
            schema,
            records.clone(),
            Config::default(),
            Arc::new(IndexStats::new()),
        ));
        indexes
            .create_property_index("User", "email", IndexType::Unique, IndexMetadata::new())
            .unwrap();
        indexes
            .create_property_index("User", "tags", IndexType::NotUnique, IndexMetadata::new())
            .unwrap();
        let tm = TransactionManager::new(indexes.clone(), records.clone());
        Fixture { records, indexes, tm }
    }

    fn user(email: &str) -> RecordWrite {
        RecordWrite::Save(Document::new("User").with("email", email))
    }

    fn insert(f: &Fixture, email: &str) -> RecordId {
        let rid = RecordId::new();
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, rid, user(email)).unwrap();
        f.tm.commit(&mut txn).unwrap();
        rid
    }

    fn owners(f: &Fixture, index: &str, key: &CompositeKey) -> Vec<RecordId> {
        f.indexes
            .index(index)
            .unwrap()
            .engine()
            .get(key)
            .unwrap()
            .collect()
    }

    #[test]
    fn begin_tracks_active_transactions() {
        let f = fixture();
        let mut txn = f.tm.begin();
        assert!(txn.is_active());
        assert_eq!(f.tm.active_count(), 1);
        f.tm.rollback(&mut txn).unwrap();
        assert_eq!(f.tm.active_count(), 0);
        assert_eq!(txn.state(), TransactionState::RolledBack);
    }

    #[test]
    fn write_observes_the_version_of_its_before_image() {
        let f = fixture();
        let rid = insert(&f, "a@x");
        let written = f.records.version(rid);

        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, rid, user("b@x")).unwrap();
        f.tm.write(&mut txn, rid, user("c@x")).unwrap();
        let observed: Vec<_> = txn.observed().map(|(r, v)| (*r, *v)).collect();
        assert_eq!(observed, vec![(rid, written)]);

        let fresh = RecordId::new();
        f.tm.write(&mut txn, fresh, user("d@x")).unwrap();
        assert_eq!(txn.observed().count(), 2);
        f.tm.commit(&mut txn).unwrap();
        assert_eq!(owners(&f, "User.email", &key!["c@x"]), vec![rid]);
        assert!(owners(&f, "User.email", &key!["a@x"]).is_empty());
    }

    #[test]
    fn empty_commit_keeps_sequence() {
        let f = fixture();
        let mut txn = f.tm.begin();
        assert_eq!(f.tm.commit(&mut txn).unwrap(), SequenceNumber::new(0));
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[test]
    fn staged_entries_are_invisible_until_commit() {
        let f = fixture();
        let rid = RecordId::new();
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, rid, user("a@x")).unwrap();

        let index = f.indexes.index("User.email").unwrap();
        assert!(owners(&f, "User.email", &key!["a@x"]).is_empty());
        assert_eq!(
            f.tm.index_get(&txn, &index, &key!["a@x"]).unwrap(),
            BTreeSet::from([rid])
        );
        assert_eq!(f.tm.index_size(&txn, &index).unwrap(), 1);

        let seq = f.tm.commit(&mut txn).unwrap();
        assert_eq!(seq, SequenceNumber::new(1));
        assert_eq!(owners(&f, "User.email", &key!["a@x"]), vec![rid]);
        assert_eq!(f.records.version(rid), Some(seq));
    }

    #[test]
    fn rollback_discards_entries() {
        let f = fixture();
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, RecordId::new(), user("a@x")).unwrap();
        f.tm.rollback(&mut txn).unwrap();
        assert!(owners(&f, "User.email", &key!["a@x"]).is_empty());
        assert!(f.records.is_empty());
        assert!(f.tm.commit(&mut txn).is_err());
    }

    #[test]
    fn duplicate_after_commit_is_duplicate_key() {
        let f = fixture();
        let first = insert(&f, "a@x");
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, RecordId::new(), user("a@x")).unwrap();
        let err = f.tm.commit(&mut txn).unwrap_err();
        match err {
            CoreError::DuplicateKey { existing, .. } => assert_eq!(existing, first.to_string()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert_eq!(owners(&f, "User.email", &key!["a@x"]), vec![first]);
    }

    #[test]
    fn racing_unique_insert_is_conflict() {
        let f = fixture();
        let mut t1 = f.tm.begin();
        let mut t2 = f.tm.begin();
        let (r1, r2) = (RecordId::new(), RecordId::new());
        f.tm.write(&mut t1, r1, user("a@x")).unwrap();
        f.tm.write(&mut t2, r2, user("a@x")).unwrap();

        f.tm.commit(&mut t1).unwrap();
        let err = f.tm.commit(&mut t2).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }), "{err:?}");
        assert_eq!(owners(&f, "User.email", &key!["a@x"]), vec![r1]);
        assert!(f.records.get(r2).is_none());
        assert_eq!(f.indexes.stats().conflicts(), 1);
    }

    #[test]
    fn failed_commit_applies_nothing() {
        let f = fixture();
        insert(&f, "taken@x");
        let mut txn = f.tm.begin();
        let fresh = RecordId::new();
        f.tm.write(
            &mut txn,
            fresh,
            RecordWrite::Save(
                Document::new("User")
                    .with("email", "free@x")
                    .with("tags", crate::value::Value::list(["t"])),
            ),
        )
        .unwrap();
        f.tm.write(&mut txn, RecordId::new(), user("taken@x")).unwrap();
        assert!(f.tm.commit(&mut txn).is_err());
        assert!(owners(&f, "User.email", &key!["free@x"]).is_empty());
        assert!(owners(&f, "User.tags", &key!["t"]).is_empty());
        assert!(f.records.get(fresh).is_none());
    }

    #[test]
    fn swapping_unique_values_in_one_transaction() {
        let f = fixture();
        let a = insert(&f, "a@x");
        let b = insert(&f, "b@x");
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, a, user("b@x")).unwrap();
        f.tm.write(&mut txn, b, user("a@x")).unwrap();
        f.tm.commit(&mut txn).unwrap();
        assert_eq!(owners(&f, "User.email", &key!["a@x"]), vec![b]);
        assert_eq!(owners(&f, "User.email", &key!["b@x"]), vec![a]);
    }

    #[test]
    fn concurrent_update_of_same_record_conflicts() {
        let f = fixture();
        let rid = insert(&f, "a@x");
        let mut t1 = f.tm.begin();
        let mut t2 = f.tm.begin();
        f.tm.write(&mut t1, rid, user("b@x")).unwrap();
        f.tm.write(&mut t2, rid, user("c@x")).unwrap();
        f.tm.commit(&mut t1).unwrap();
        let err = f.tm.commit(&mut t2).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { ref target, .. } if target == "record"));
        assert_eq!(owners(&f, "User.email", &key!["b@x"]), vec![rid]);
        assert!(owners(&f, "User.email", &key!["c@x"]).is_empty());
    }

    #[test]
    fn repeated_writes_to_one_record_net_out() {
        let f = fixture();
        let rid = insert(&f, "a@x");
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, rid, user("b@x")).unwrap();
        f.tm.write(&mut txn, rid, user("a@x")).unwrap();
        f.tm.commit(&mut txn).unwrap();
        assert_eq!(owners(&f, "User.email", &key!["a@x"]), vec![rid]);
        assert!(owners(&f, "User.email", &key!["b@x"]).is_empty());
    }

    #[test]
    fn delete_removes_entries() {
        let f = fixture();
        let rid = insert(&f, "a@x");
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, rid, RecordWrite::Delete).unwrap();
        assert!(f.tm.get(&txn, rid).unwrap().is_none());
        f.tm.commit(&mut txn).unwrap();
        assert!(owners(&f, "User.email", &key!["a@x"]).is_empty());
        assert!(f.records.get(rid).is_none());
    }

    #[test]
    fn index_created_mid_transaction_is_maintained() {
        let f = fixture();
        f.indexes
            .schema()
            .create_property("User", Property::new("name", PropertyType::String))
            .unwrap();
        let rid = RecordId::new();
        let mut txn = f.tm.begin();
        f.tm.write(
            &mut txn,
            rid,
            RecordWrite::Save(Document::new("User").with("email", "n@x").with("name", "n")),
        )
        .unwrap();
        f.indexes
            .create_property_index("User", "name", IndexType::NotUnique, IndexMetadata::new())
            .unwrap();
        f.tm.commit(&mut txn).unwrap();
        assert_eq!(owners(&f, "User.name", &key!["n"]), vec![rid]);
    }

    #[test]
    fn index_dropped_mid_transaction_is_skipped() {
        let f = fixture();
        let mut txn = f.tm.begin();
        f.tm.write(&mut txn, RecordId::new(), user("a@x")).unwrap();
        f.indexes.drop_index("User.email").unwrap();
        f.tm.commit(&mut txn).unwrap();
        assert_eq!(f.records.len(), 1);
    }
}
