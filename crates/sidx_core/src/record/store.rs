//! Record source trait and the in-memory record arena.

use crate::record::{Document, RecordId};
use crate::types::SequenceNumber;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read access to stored records.
///
/// This is the storage-layer contract the index engine depends on: full
/// scans for rebuilds and point reads for class post-filtering.
pub trait RecordSource: Send + Sync {
    /// Returns the committed state of a record.
    fn get(&self, rid: RecordId) -> Option<Document>;

    /// Returns every committed record whose class is exactly `class`
    /// (case-insensitive), ordered by record id.
    fn scan_class(&self, class: &str) -> Vec<(RecordId, Document)>;
}

/// A buffered record mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordWrite {
    /// Insert or replace a record.
    Save(Document),
    /// Delete a record.
    Delete,
}

/// Persisted form of one stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub(crate) rid: RecordId,
    pub(crate) document: Document,
    pub(crate) version: SequenceNumber,
}

/// In-memory record arena keyed by [`RecordId`].
///
/// Each record remembers the sequence of the commit that last wrote it;
/// transactions use it to detect lost updates.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordId, (Document, SequenceNumber)>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns the commit sequence that last wrote `rid`.
    #[must_use]
    pub fn version(&self, rid: RecordId) -> Option<SequenceNumber> {
        self.records.read().get(&rid).map(|(_, v)| *v)
    }

    /// Returns a record together with the commit sequence that wrote it.
    ///
    /// Both are read under one lock, so the version always describes the
    /// returned document.
    #[must_use]
    pub fn get_versioned(&self, rid: RecordId) -> Option<(Document, SequenceNumber)> {
        self.records.read().get(&rid).cloned()
    }

    /// Applies committed writes under a single lock acquisition.
    pub(crate) fn apply<'a>(
        &self,
        writes: impl IntoIterator<Item = (&'a RecordId, &'a RecordWrite)>,
        seq: SequenceNumber,
    ) {
        let mut records = self.records.write();
        for (rid, write) in writes {
            match write {
                RecordWrite::Save(doc) => {
                    records.insert(*rid, (doc.clone(), seq));
                }
                RecordWrite::Delete => {
                    records.remove(rid);
                }
            }
        }
    }

    /// Returns every record in id order, for persistence.
    pub(crate) fn exported(&self) -> Vec<StoredRecord> {
        let records = self.records.read();
        let mut out: Vec<StoredRecord> = records
            .iter()
            .map(|(rid, (document, version))| StoredRecord {
                rid: *rid,
                document: document.clone(),
                version: *version,
            })
            .collect();
        out.sort_by_key(|r| r.rid);
        out
    }

    pub(crate) fn load(&self, stored: Vec<StoredRecord>) {
        let mut records = self.records.write();
        records.clear();
        for r in stored {
            records.insert(r.rid, (r.document, r.version));
        }
    }
}

impl RecordSource for MemoryRecordStore {
    fn get(&self, rid: RecordId) -> Option<Document> {
        self.records.read().get(&rid).map(|(doc, _)| doc.clone())
    }

    fn scan_class(&self, class: &str) -> Vec<(RecordId, Document)> {
        let records = self.records.read();
        let mut out: Vec<(RecordId, Document)> = records
            .iter()
            .filter(|(_, (doc, _))| doc.class().eq_ignore_ascii_case(class))
            .map(|(rid, (doc, _))| (*rid, doc.clone()))
            .collect();
        out.sort_by_key(|(rid, _)| *rid);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_tracks_versions() {
        let store = MemoryRecordStore::new();
        let rid = RecordId::new();
        let doc = Document::new("C").with("x", 1);

        store.apply([(&rid, &RecordWrite::Save(doc.clone()))], SequenceNumber::new(3));
        assert_eq!(store.version(rid), Some(SequenceNumber::new(3)));
        assert_eq!(store.get(rid), Some(doc.clone()));

        assert_eq!(
            store.get_versioned(rid),
            Some((doc.clone(), SequenceNumber::new(3)))
        );

        store.apply([(&rid, &RecordWrite::Delete)], SequenceNumber::new(4));
        assert_eq!(store.version(rid), None);
        assert_eq!(store.get_versioned(rid), None);
        assert!(store.is_empty());
    }

    #[test]
    fn scan_matches_class_case_insensitively() {
        let store = MemoryRecordStore::new();
        let a = RecordId::new();
        let b = RecordId::new();
        let seq = SequenceNumber::new(1);
        store.apply(
            [
                (&a, &RecordWrite::Save(Document::new("Person"))),
                (&b, &RecordWrite::Save(Document::new("Animal"))),
            ],
            seq,
        );

        let people = store.scan_class("person");
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].0, a);
    }

    #[test]
    fn export_and_load() {
        let store = MemoryRecordStore::new();
        let rid = RecordId::new();
        store.apply(
            [(&rid, &RecordWrite::Save(Document::new("C")))],
            SequenceNumber::new(9),
        );

        let other = MemoryRecordStore::new();
        other.load(store.exported());
        assert_eq!(other.version(rid), Some(SequenceNumber::new(9)));
    }
}
