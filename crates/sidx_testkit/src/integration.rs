//! Model-checking helpers.
//!
//! [`ItemHarness`] drives a database and a plain in-memory model through
//! the same operations; index contents are then compared against entries
//! derived from the model from scratch.

use crate::fixtures::scenarios::{self, ITEM};
use crate::generators::ItemOperation;
use sidx_core::{
    CompositeKey, CoreResult, Database, Document, IndexDefinition, IndexHandle, RecordId,
    Transaction, Value,
};
use std::collections::{BTreeMap, BTreeSet};

/// A set of `(key, record)` index entries.
pub type EntrySet = BTreeSet<(CompositeKey, RecordId)>;

/// Returns the committed entries of an index.
pub fn entry_set(handle: &IndexHandle) -> EntrySet {
    handle
        .engine()
        .snapshot()
        .expect("index is not active")
        .entries()
        .into_iter()
        .collect()
}

/// Derives the entries `definition` should hold for `records`.
pub fn expected_entries<'a>(
    definition: &IndexDefinition,
    records: impl IntoIterator<Item = (&'a RecordId, &'a Document)>,
) -> EntrySet {
    let mut entries = EntrySet::new();
    for (rid, doc) in records {
        let keys = definition.derive_keys(doc).expect("derivable keys");
        entries.extend(keys.into_iter().map(|k| (k, *rid)));
    }
    entries
}

/// Renders entries as JSON for assertion messages.
pub fn dump_entries(entries: &EntrySet) -> String {
    let rows: Vec<serde_json::Value> = entries
        .iter()
        .map(|(key, rid)| serde_json::json!({ "key": key.to_string(), "rid": rid.to_string() }))
        .collect();
    serde_json::to_string_pretty(&rows).unwrap_or_default()
}

/// Drives `Item` records through a database and a model side by side.
pub struct ItemHarness<'a> {
    db: &'a Database,
    slots: Vec<RecordId>,
    model: BTreeMap<RecordId, Document>,
}

impl<'a> ItemHarness<'a> {
    /// Creates a harness over `slots` fixed record ids.
    ///
    /// The database must already have the `Item` class.
    pub fn new(db: &'a Database, slots: usize) -> Self {
        Self {
            db,
            slots: (0..slots).map(|_| RecordId::new()).collect(),
            model: BTreeMap::new(),
        }
    }

    /// Returns the committed model.
    pub fn model(&self) -> &BTreeMap<RecordId, Document> {
        &self.model
    }

    /// Returns the record id of a slot.
    pub fn rid(&self, slot: usize) -> RecordId {
        self.slots[slot % self.slots.len()]
    }

    /// Runs one batch in a single transaction.
    ///
    /// The model only advances if the commit succeeds.
    pub fn run_batch(&mut self, ops: &[ItemOperation]) -> CoreResult<()> {
        let mut staged = self.model.clone();
        let mut txn = self.db.begin()?;
        let result = self.stage(&mut txn, &mut staged, ops);
        match result.and_then(|()| self.db.commit(&mut txn).map(|_| ())) {
            Ok(()) => {
                self.model = staged;
                Ok(())
            }
            Err(e) => {
                if txn.is_active() {
                    self.db.rollback(&mut txn)?;
                }
                Err(e)
            }
        }
    }

    fn stage(
        &self,
        txn: &mut Transaction,
        staged: &mut BTreeMap<RecordId, Document>,
        ops: &[ItemOperation],
    ) -> CoreResult<()> {
        for op in ops {
            match op {
                ItemOperation::Save { slot, x, tags } => {
                    let rid = self.rid(*slot);
                    let mut doc = Document::new(ITEM);
                    if let Some(x) = x {
                        doc.set("x", *x);
                    }
                    if let Some(tags) = tags {
                        doc.set("tags", Value::list(tags.iter().copied()));
                    }
                    self.db.save_with_id(txn, rid, doc.clone())?;
                    staged.insert(rid, doc);
                }
                ItemOperation::AddTag { slot, tag } => {
                    let rid = self.rid(*slot);
                    let Some(mut doc) = staged.get(&rid).cloned() else {
                        continue;
                    };
                    let mut tags = tags_of(&doc);
                    tags.push(Value::Integer(*tag));
                    doc.set("tags", Value::List(tags));
                    self.db.save_with_id(txn, rid, doc.clone())?;
                    staged.insert(rid, doc);
                }
                ItemOperation::RemoveTag { slot, tag } => {
                    let rid = self.rid(*slot);
                    let Some(mut doc) = staged.get(&rid).cloned() else {
                        continue;
                    };
                    let mut tags = tags_of(&doc);
                    tags.retain(|v| *v != Value::Integer(*tag));
                    doc.set("tags", Value::List(tags));
                    self.db.save_with_id(txn, rid, doc.clone())?;
                    staged.insert(rid, doc);
                }
                ItemOperation::Delete { slot } => {
                    let rid = self.rid(*slot);
                    if staged.remove(&rid).is_some() {
                        self.db.delete(txn, rid)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Asserts that `index` holds exactly the entries derived from the model.
    pub fn verify_index(&self, index: &str) {
        let handle = self.db.index(index).expect("index exists");
        let actual = entry_set(&handle);
        let expected = expected_entries(&handle.definition(), &self.model);
        assert_eq!(
            actual,
            expected,
            "index '{index}' diverged from the model\nactual: {}\nexpected: {}",
            dump_entries(&actual),
            dump_entries(&expected)
        );
    }

    /// Asserts that rebuilding `index` does not change its entries.
    pub fn verify_against_rebuild(&self, index: &str) {
        let handle = self.db.index(index).expect("index exists");
        let incremental = entry_set(&handle);
        self.db.rebuild_index(index).expect("rebuild succeeds");
        let rebuilt = entry_set(&handle);
        assert_eq!(
            incremental,
            rebuilt,
            "incremental maintenance of '{index}' differs from a rebuild\nincremental: {}\nrebuilt: {}",
            dump_entries(&incremental),
            dump_entries(&rebuilt)
        );
    }
}

fn tags_of(doc: &Document) -> Vec<Value> {
    match doc.get("tags") {
        Some(Value::List(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Declares `Item` and returns a harness over it.
pub fn item_harness(db: &Database, slots: usize) -> ItemHarness<'_> {
    scenarios::define_items(db);
    ItemHarness::new(db, slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;
    use sidx_core::{IndexMetadata, IndexType};

    #[test]
    fn harness_tracks_committed_batches() {
        let db = TestDatabase::memory();
        let mut harness = item_harness(&db, 2);
        db.create_index(
            ITEM,
            "Item.tags",
            IndexType::NotUnique,
            &["tags"],
            IndexMetadata::new(),
        )
        .unwrap();

        harness
            .run_batch(&[ItemOperation::Save {
                slot: 0,
                x: Some(1),
                tags: Some(vec![1, 2]),
            }])
            .unwrap();
        harness
            .run_batch(&[ItemOperation::RemoveTag { slot: 0, tag: 1 }])
            .unwrap();

        assert_eq!(harness.model().len(), 1);
        harness.verify_index("Item.tags");
        harness.verify_against_rebuild("Item.tags");
    }

    #[test]
    fn failed_batch_leaves_model_unchanged() {
        let db = TestDatabase::memory();
        let mut harness = item_harness(&db, 2);
        db.create_property_index(ITEM, "x", IndexType::Unique, IndexMetadata::new())
            .unwrap();

        let save = |slot| ItemOperation::Save {
            slot,
            x: Some(5),
            tags: None,
        };
        assert!(harness.run_batch(&[save(0), save(1)]).is_err());
        assert!(harness.model().is_empty());
        harness.verify_index("Item.x");
    }
}
