//! Incremental maintenance checked against from-scratch derivation.

use proptest::prelude::*;
use sidx_core::{IndexMetadata, IndexType};
use sidx_testkit::prelude::*;
use sidx_testkit::scenarios::{item, ITEM};

const INDEXES: [&str; 4] = ["Item.tags", "Item.x_tags", "Item.x_tags_sparse", "Item.tags_x"];

fn indexed_harness(db: &TestDatabase) -> ItemHarness<'_> {
    let harness = item_harness(db, 4);
    db.create_index(ITEM, "Item.tags", IndexType::NotUnique, &["tags"], IndexMetadata::new())
        .unwrap();
    db.create_index(ITEM, "Item.x_tags", IndexType::NotUnique, &["x", "tags"], IndexMetadata::new())
        .unwrap();
    db.create_index(
        ITEM,
        "Item.x_tags_sparse",
        IndexType::NotUnique,
        &["x", "tags"],
        IndexMetadata::new().ignore_null_values(true),
    )
    .unwrap();
    db.create_index(ITEM, "Item.tags_x", IndexType::NotUniqueHash, &["tags", "x"], IndexMetadata::new())
        .unwrap();
    harness
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn incremental_entries_match_derivation(batches in transaction_batches_strategy(4, 12)) {
        let db = TestDatabase::memory();
        let mut harness = indexed_harness(&db);
        for batch in &batches {
            harness.run_batch(batch).unwrap();
        }
        for index in INDEXES {
            harness.verify_index(index);
        }
    }

    #[test]
    fn incremental_entries_match_rebuild(batches in transaction_batches_strategy(4, 12)) {
        let db = TestDatabase::memory();
        let mut harness = indexed_harness(&db);
        for batch in &batches {
            harness.run_batch(batch).unwrap();
        }
        for index in INDEXES {
            harness.verify_against_rebuild(index);
        }
    }

    #[test]
    fn emptying_and_refilling_tags_is_symmetric(tags in prop::collection::vec(0i64..8, 1..6)) {
        let db = TestDatabase::memory();
        let _harness = indexed_harness(&db);
        let rid = db.insert(item(1, &tags)).unwrap();
        let before: Vec<EntrySet> = INDEXES
            .iter()
            .map(|name| entry_set(&db.index(name).unwrap()))
            .collect();

        let mut remaining = tags.clone();
        while let Some(tag) = remaining.pop() {
            remaining.retain(|t| *t != tag);
            db.update(rid, item(1, &remaining)).unwrap();
        }
        db.update(rid, item(1, &tags)).unwrap();

        for (name, expected) in INDEXES.iter().zip(&before) {
            prop_assert_eq!(&entry_set(&db.index(name).unwrap()), expected);
        }
    }
}

#[test]
fn emptied_tags_leave_a_single_null_placeholder() {
    let db = TestDatabase::memory();
    let _harness = indexed_harness(&db);
    let rid = db.insert(item(2, &[1, 2, 3])).unwrap();

    db.update(rid, item(2, &[])).unwrap();
    assert_eq!(db.index("Item.x_tags").unwrap().engine().size().unwrap(), 1);
    assert_eq!(db.index("Item.x_tags_sparse").unwrap().engine().size().unwrap(), 0);

    db.update(rid, item(2, &[4])).unwrap();
    assert_eq!(db.index("Item.x_tags").unwrap().engine().size().unwrap(), 1);
    assert_eq!(db.index("Item.x_tags_sparse").unwrap().engine().size().unwrap(), 1);

    db.remove(rid).unwrap();
    for index in INDEXES {
        assert_eq!(db.index(index).unwrap().engine().size().unwrap(), 0, "{index}");
    }
}
