//! Index store trait.

use crate::index::CompositeKey;
use crate::record::RecordId;
use crate::types::SequenceNumber;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The records stored under one key.
///
/// A bucket remembers the commit that last changed it; commit-time
/// validation uses this to tell a stale duplicate from a lost race.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    rids: BTreeSet<RecordId>,
    modified_at: SequenceNumber,
}

impl Bucket {
    /// Returns the record ids in id order.
    #[must_use]
    pub fn rids(&self) -> &BTreeSet<RecordId> {
        &self.rids
    }

    /// Returns the sequence of the last commit that changed this bucket.
    #[must_use]
    pub fn modified_at(&self) -> SequenceNumber {
        self.modified_at
    }

    /// Returns the number of records under the key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rids.len()
    }

    /// Returns true if no record is stored under the key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rids.is_empty()
    }

    /// Returns true if `rid` is stored under the key.
    #[must_use]
    pub fn contains(&self, rid: RecordId) -> bool {
        self.rids.contains(&rid)
    }

    pub(crate) fn insert(&mut self, rid: RecordId, seq: SequenceNumber) -> bool {
        let added = self.rids.insert(rid);
        if added {
            self.modified_at = seq;
        }
        added
    }

    pub(crate) fn remove(&mut self, rid: RecordId, seq: SequenceNumber) -> bool {
        let removed = self.rids.remove(&rid);
        if removed {
            self.modified_at = seq;
        }
        removed
    }
}

/// Core store trait shared by the ordered and hashed backings.
///
/// Stores are plain single-threaded maps; concurrency is handled by the
/// engine, which swaps whole snapshots.
pub trait IndexStore: Send + Sync + fmt::Debug {
    /// Returns the bucket for an exact key.
    fn bucket(&self, key: &CompositeKey) -> Option<&Bucket>;

    /// Adds `(key, rid)`; returns true if the entry was new.
    fn insert(&mut self, key: CompositeKey, rid: RecordId, seq: SequenceNumber) -> bool;

    /// Removes `(key, rid)`, dropping the key once its bucket is empty.
    /// Returns true if the entry existed.
    fn remove(&mut self, key: &CompositeKey, rid: RecordId, seq: SequenceNumber) -> bool;

    /// Iterates over buckets; ordered stores yield them in key order.
    fn buckets(&self) -> Box<dyn Iterator<Item = (&CompositeKey, &Bucket)> + '_>;

    /// Returns the number of distinct keys.
    fn key_count(&self) -> usize;

    /// Returns the number of `(key, rid)` entries.
    fn len(&self) -> usize;

    /// Returns true if the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    fn clear(&mut self);

    /// Returns true if the store can serve ordered scans.
    fn is_ordered(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_tracks_last_change() {
        let mut bucket = Bucket::default();
        let rid = RecordId::new();

        assert!(bucket.insert(rid, SequenceNumber::new(2)));
        assert!(!bucket.insert(rid, SequenceNumber::new(3)));
        assert_eq!(bucket.modified_at(), SequenceNumber::new(2));

        assert!(bucket.remove(rid, SequenceNumber::new(5)));
        assert!(bucket.is_empty());
        assert_eq!(bucket.modified_at(), SequenceNumber::new(5));
    }
}
