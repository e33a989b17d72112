//! Hashed index store.

use crate::index::traits::{Bucket, IndexStore};
use crate::index::CompositeKey;
use crate::record::RecordId;
use crate::types::SequenceNumber;
use std::collections::HashMap;

/// Hash-backed store for O(1) equality lookups.
///
/// Has no key order: first/last, prefix and range scans and ordered
/// streams are rejected by the engine for hashed indexes.
#[derive(Debug, Clone, Default)]
pub struct HashStore {
    /// Key to bucket mapping.
    entries: HashMap<CompositeKey, Bucket>,
    /// Total `(key, rid)` count.
    count: usize,
}

impl HashStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStore for HashStore {
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
        false
    }
}
