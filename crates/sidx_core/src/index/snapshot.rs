//! Immutable point-in-time index state.

use crate::index::traits::{Bucket, IndexStore};
use crate::index::{BTreeStore, CompositeKey, HashStore};
use crate::record::RecordId;
use crate::types::SequenceNumber;

#[derive(Debug, Clone)]
enum Backing {
    Ordered(BTreeStore),
    Hashed(HashStore),
}

/// The committed contents of one index as of one commit.
///
/// Readers hold an `Arc` to a snapshot for as long as they iterate; commits
/// never mutate a snapshot a reader can see (they copy it first), so scans
/// are never torn by concurrent writers.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    backing: Backing,
    seq: SequenceNumber,
}

impl EngineSnapshot {
    pub(crate) fn empty(ordered: bool, seq: SequenceNumber) -> Self {
        let backing = if ordered {
            Backing::Ordered(BTreeStore::new())
        } else {
            Backing::Hashed(HashStore::new())
        };
        Self { backing, seq }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &dyn IndexStore {
        match &self.backing {
            Backing::Ordered(s) => s,
            Backing::Hashed(s) => s,
        }
    }

    pub(crate) fn store_mut(&mut self) -> &mut dyn IndexStore {
        match &mut self.backing {
            Backing::Ordered(s) => s,
            Backing::Hashed(s) => s,
        }
    }

    /// Returns the ordered store, `None` for hashed indexes.
    #[must_use]
    pub fn ordered(&self) -> Option<&BTreeStore> {
        match &self.backing {
            Backing::Ordered(s) => Some(s),
            Backing::Hashed(_) => None,
        }
    }

    /// Returns the sequence of the last commit applied.
    #[must_use]
    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    pub(crate) fn set_seq(&mut self, seq: SequenceNumber) {
        self.seq = seq;
    }

    /// Returns the bucket for an exact key.
    #[must_use]
    pub fn bucket(&self, key: &CompositeKey) -> Option<&Bucket> {
        self.store().bucket(key)
    }

    /// Returns the number of `(key, rid)` entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store().len()
    }

    /// Returns true if the snapshot holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    /// Returns every entry sorted by key then record id.
    ///
    /// Works for hashed snapshots too; used by persistence and verification.
    #[must_use]
    pub fn entries(&self) -> Vec<(CompositeKey, RecordId)> {
        let mut out: Vec<(CompositeKey, RecordId)> = self
            .store()
            .buckets()
            .flat_map(|(k, b)| b.rids().iter().map(move |r| (k.clone(), *r)))
            .collect();
        if self.ordered().is_none() {
            out.sort();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    #[test]
    fn entries_are_sorted_for_both_backings() {
        for ordered in [true, false] {
            let mut snap = EngineSnapshot::empty(ordered, SequenceNumber::new(0));
            let seq = SequenceNumber::new(1);
            for i in [3, 1, 2] {
                snap.store_mut().insert(key![i], RecordId::new(), seq);
            }
            let keys: Vec<_> = snap.entries().into_iter().map(|(k, _)| k).collect();
            assert_eq!(keys, vec![key![1], key![2], key![3]]);
            assert_eq!(snap.len(), 3);
            assert_eq!(snap.ordered().is_some(), ordered);
        }
    }
}
