//! Ordered index store.

use crate::index::traits::{Bucket, IndexStore};
use crate::index::CompositeKey;
use crate::record::RecordId;
use crate::types::SequenceNumber;
use std::collections::BTreeMap;

/// BTree-backed store for ordered traversal and range queries.
///
/// Supports everything [`HashStore`](crate::index::HashStore) does plus
/// first/last key, prefix and range scans, and ascending or descending
/// streams.
#[derive(Debug, Clone, Default)]
pub struct BTreeStore {
    /// Ordered key to bucket mapping.
    entries: BTreeMap<CompositeKey, Bucket>,
    /// Total `(key, rid)` count.
    count: usize,
}

impl BTreeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the underlying ordered map.
    #[must_use]
    pub fn map(&self) -> &BTreeMap<CompositeKey, Bucket> {
        &self.entries
    }

    /// Returns the smallest key.
    #[must_use]
    pub fn first_key(&self) -> Option<&CompositeKey> {
        self.entries.keys().next()
    }

    /// Returns the largest key.
    #[must_use]
    pub fn last_key(&self) -> Option<&CompositeKey> {
        self.entries.keys().next_back()
    }
}

impl IndexStore for BTreeStore {
    fn bucket(&self, key: &CompositeKey) -> Option<&Bucket> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: CompositeKey, rid: RecordId, seq: SequenceNumber) -> bool {
        let added = self.entries.entry(key).or_default().insert(rid, seq);
        if added {
            self.count += 1;
        }
        added
    }

    fn remove(&mut self, key: &CompositeKey, rid: RecordId, seq: SequenceNumber) -> bool {
        let Some(bucket) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = bucket.remove(rid, seq);
        if removed {
            self.count -= 1;
            if bucket.is_empty() {
                self.entries.remove(key);
            }
        }
        removed
    }

    fn buckets(&self) -> Box<dyn Iterator<Item = (&CompositeKey, &Bucket)> + '_> {
        Box::new(self.entries.iter())
    }

    fn key_count(&self) -> usize {
        self.entries.len()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
    }

    fn is_ordered(&self) -> bool {
        true
    }
}
