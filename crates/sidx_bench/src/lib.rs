//! Benchmark utilities.

use rand::Rng;
use sidx_core::{
    CompositeKey, Config, Database, Document, IndexMetadata, IndexType, Property, PropertyType,
    Value,
};

/// Class used by every benchmark.
pub const CLASS: &str = "Bench";

/// Opens an in-memory database with `Bench { x: INTEGER, tags: EMBEDDEDLIST<INTEGER> }`,
/// a unique index on `x` and a multikey index on `(x, tags)`.
pub fn bench_database() -> Database {
    let db = Database::open_in_memory(Config::default()).expect("open database");
    define_schema(&db);
    db
}

/// Declares the benchmark class and its indexes.
pub fn define_schema(db: &Database) {
    let schema = db.schema();
    schema.create_class(CLASS, &[]).expect("create class");
    schema
        .create_property(CLASS, Property::new("x", PropertyType::Integer))
        .expect("create x");
    schema
        .create_property(
            CLASS,
            Property::new("tags", PropertyType::EmbeddedList).with_linked_type(PropertyType::Integer),
        )
        .expect("create tags");
    db.create_property_index(CLASS, "x", IndexType::Unique, IndexMetadata::new())
        .expect("create x index");
    db.create_index(CLASS, "Bench.x_tags", IndexType::NotUnique, &["x", "tags"], IndexMetadata::new())
        .expect("create composite index");
}

/// Builds a document with `tag_count` random tags.
pub fn random_document(x: i64, tag_count: usize) -> Document {
    let mut rng = rand::thread_rng();
    let tags: Vec<i64> = (0..tag_count).map(|_| rng.gen_range(0..1_000)).collect();
    Document::new(CLASS)
        .with("x", x)
        .with("tags", Value::list(tags))
}

/// Inserts `count` documents with `x` in `0..count`.
pub fn populate(db: &Database, count: usize, tag_count: usize) {
    for x in 0..count as i64 {
        db.insert(random_document(x, tag_count)).expect("insert");
    }
}

/// Generates random two-component keys.
pub fn random_keys(count: usize) -> Vec<CompositeKey> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let second = if rng.gen_bool(0.1) {
                Value::Null
            } else {
                Value::Integer(rng.gen_range(0..100))
            };
            CompositeKey::new(vec![Value::Integer(rng.gen_range(0..1_000)), second])
        })
        .collect()
}
