//! Incremental maintenance of index entries.
//!
//! The entries a record must contribute are always re-derivable from its
//! current properties ([`IndexDefinition::derive_keys`]). Maintenance is the
//! set difference between the entries derived from the before and after
//! snapshots, so untouched elements of a collection are never removed and
//! re-added, and no full index scan is ever needed.

use crate::error::CoreResult;
use crate::index::{CompositeKey, IndexDefinition};
use crate::record::{Document, RecordId};
use std::collections::BTreeSet;

/// Entries one record must drop and gain in one index.
///
/// `to_remove` and `to_add` are disjoint. Applying the removals first and
/// then the additions leaves the index consistent with the after snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDelta {
    /// The record the entries belong to.
    pub rid: RecordId,
    /// Keys whose `(key, rid)` entry must be removed.
    pub to_remove: BTreeSet<CompositeKey>,
    /// Keys whose `(key, rid)` entry must be added.
    pub to_add: BTreeSet<CompositeKey>,
}

impl IndexDelta {
    /// Returns true if nothing changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }

    /// Returns the net change in entry count.
    #[must_use]
    pub fn net(&self) -> isize {
        self.to_add.len() as isize - self.to_remove.len() as isize
    }
}

/// Computes [`IndexDelta`]s for record mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultikeyMaintainer;

impl MultikeyMaintainer {
    /// Diffs the entries of `before` against those of `after`.
    ///
    /// `None` on the before side is an insert, `None` on the after side a
    /// delete. A property removed from the record behaves like an emptied
    /// collection: one null placeholder under `IncludeNulls`, nothing under
    /// `IgnoreNulls`.
    pub fn diff(
        definition: &IndexDefinition,
        rid: RecordId,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> CoreResult<IndexDelta> {
        let old = match before {
            Some(doc) => definition.derive_keys(doc)?,
            None => BTreeSet::new(),
        };
        let new = match after {
            Some(doc) => definition.derive_keys(doc)?,
            None => BTreeSet::new(),
        };
        Ok(IndexDelta {
            rid,
            to_remove: old.difference(&new).cloned().collect(),
            to_add: new.difference(&old).cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexType, NullPolicy};
    use crate::key;
    use crate::schema::{Property, PropertyType, Schema};
    use crate::types::IndexId;
    use crate::value::Value;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn definition(policy: NullPolicy) -> IndexDefinition {
        let schema = Schema::new();
        schema.create_class("C", &[]).unwrap();
        schema
            .create_property("C", Property::new("x", PropertyType::Integer))
            .unwrap();
        schema
            .create_property(
                "C",
                Property::new("tags", PropertyType::EmbeddedList)
                    .with_linked_type(PropertyType::Integer),
            )
            .unwrap();
        IndexDefinition::bind(
            &schema,
            IndexId::new(1),
            "C.x_tags",
            "C",
            IndexType::Unique,
            &["x", "tags"],
            policy,
        )
        .unwrap()
    }

    fn doc(x: i32, tags: &[i32]) -> Document {
        Document::new("C")
            .with("x", x)
            .with("tags", Value::list(tags.iter().copied()))
    }

    #[test]
    fn removing_one_element_removes_one_key() {
        let def = definition(NullPolicy::IncludeNulls);
        let rid = RecordId::new();
        let delta =
            MultikeyMaintainer::diff(&def, rid, Some(&doc(1, &[10, 20])), Some(&doc(1, &[10])))
                .unwrap();
        assert_eq!(delta.to_remove, [key![1, 20]].into());
        assert!(delta.to_add.is_empty());
        assert_eq!(delta.net(), -1);
    }

    #[test]
    fn emptied_collection_swaps_in_placeholder() {
        let def = definition(NullPolicy::IncludeNulls);
        let rid = RecordId::new();
        let delta =
            MultikeyMaintainer::diff(&def, rid, Some(&doc(1, &[10])), Some(&doc(1, &[]))).unwrap();
        assert_eq!(delta.to_remove, [key![1, 10]].into());
        assert_eq!(delta.to_add, [key![1, Value::Null]].into());
    }

    #[test]
    fn emptied_collection_unindexes_under_ignore_nulls() {
        let def = definition(NullPolicy::IgnoreNulls);
        let rid = RecordId::new();
        let delta =
            MultikeyMaintainer::diff(&def, rid, Some(&doc(1, &[10])), Some(&doc(1, &[]))).unwrap();
        assert_eq!(delta.to_remove, [key![1, 10]].into());
        assert!(delta.to_add.is_empty());
    }

    #[test]
    fn removed_property_equals_empty_collection() {
        let def = definition(NullPolicy::IncludeNulls);
        let rid = RecordId::new();
        let mut without = doc(1, &[10]);
        without.remove("tags");
        let a = MultikeyMaintainer::diff(&def, rid, Some(&doc(1, &[10])), Some(&without)).unwrap();
        let b = MultikeyMaintainer::diff(&def, rid, Some(&doc(1, &[10])), Some(&doc(1, &[])))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn scalar_change_moves_every_key() {
        let def = definition(NullPolicy::IncludeNulls);
        let rid = RecordId::new();
        let delta =
            MultikeyMaintainer::diff(&def, rid, Some(&doc(1, &[10, 20])), Some(&doc(2, &[10])))
                .unwrap();
        assert_eq!(delta.to_remove, [key![1, 10], key![1, 20]].into());
        assert_eq!(delta.to_add, [key![2, 10]].into());
    }

    #[test]
    fn insert_and_delete() {
        let def = definition(NullPolicy::IncludeNulls);
        let rid = RecordId::new();
        let ins = MultikeyMaintainer::diff(&def, rid, None, Some(&doc(1, &[5]))).unwrap();
        assert_eq!(ins.to_add, [key![1, 5]].into());
        let del = MultikeyMaintainer::diff(&def, rid, Some(&doc(1, &[5])), None).unwrap();
        assert_eq!(del.to_remove, [key![1, 5]].into());
        assert_eq!(del.rid, rid);
    }

    fn apply(entries: &mut BTreeSet<CompositeKey>, delta: &IndexDelta) {
        for k in &delta.to_remove {
            assert!(entries.remove(k), "removing absent entry {k}");
        }
        for k in &delta.to_add {
            assert!(entries.insert(k.clone()), "adding present entry {k}");
        }
    }

    proptest! {
        #[test]
        fn incremental_matches_rederivation(
            steps in proptest::collection::vec(
                (0i32..3, proptest::collection::vec(0i32..6, 0..5)),
                1..12,
            ),
            ignore in any::<bool>(),
        ) {
            let def = definition(NullPolicy::from_ignore_nulls(ignore));
            let rid = RecordId::new();
            let mut entries = BTreeSet::new();
            let mut current: Option<Document> = None;
            for (x, tags) in steps {
                let next = doc(x, &tags);
                let delta = MultikeyMaintainer::diff(&def, rid, current.as_ref(), Some(&next)).unwrap();
                prop_assert!(delta.to_remove.is_disjoint(&delta.to_add));
                apply(&mut entries, &delta);
                prop_assert_eq!(&entries, &def.derive_keys(&next).unwrap());
                current = Some(next);
            }
        }

        #[test]
        fn remove_all_then_readd_round_trips(
            tags in proptest::collection::btree_set(0i32..50, 1..8),
            ignore in any::<bool>(),
        ) {
            let def = definition(NullPolicy::from_ignore_nulls(ignore));
            let rid = RecordId::new();
            let tags: Vec<i32> = tags.into_iter().collect();
            let full = doc(7, &tags);
            let empty = doc(7, &[]);

            let mut entries = BTreeSet::new();
            apply(&mut entries, &MultikeyMaintainer::diff(&def, rid, None, Some(&full)).unwrap());
            let original = entries.clone();

            let drain = MultikeyMaintainer::diff(&def, rid, Some(&full), Some(&empty)).unwrap();
            apply(&mut entries, &drain);
            let placeholder_added = drain.to_add.contains(&key![7, Value::Null]);
            prop_assert_eq!(placeholder_added, !ignore);

            let refill = MultikeyMaintainer::diff(&def, rid, Some(&empty), Some(&full)).unwrap();
            prop_assert_eq!(refill.to_remove.contains(&key![7, Value::Null]), !ignore);
            apply(&mut entries, &refill);
            prop_assert_eq!(entries, original);
        }
    }
}
