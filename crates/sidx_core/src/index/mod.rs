//! Secondary indexes.
//!
//! Indexes map [`CompositeKey`]s to the ids of the records that carry them.
//! They are:
//! - Declared against a schema class and bound to its property types
//! - Maintained incrementally from record before/after snapshots
//! - Updated atomically with the transaction that changed the records
//! - Fully derivable from the record store (persisted copies are a cache)
//!
//! # Index Types
//!
//! - Ordered ([`BTreeStore`]): point lookups, prefix and range scans, streams
//! - Hashed ([`HashStore`]): point lookups only

mod btree;
mod cursor;
mod definition;
mod engine;
mod hash;
mod key;
mod manager;
mod multikey;
pub(crate) mod persistence;
mod selector;
mod snapshot;
mod traits;

pub use btree::BTreeStore;
pub use cursor::{Direction, EntryCursor, KeyCursor, RecordIds};
pub use definition::{
    CollectionMode, FieldSpec, IndexDefinition, IndexField, IndexMetadata, IndexType, NullPolicy,
};
pub use engine::{IndexEngine, IndexState};
pub use hash::HashStore;
pub use key::CompositeKey;
pub use manager::{IndexHandle, IndexManager};
pub use multikey::{IndexDelta, MultikeyMaintainer};
pub use persistence::{IndexFile, IndexFileHeader};
pub use selector::{IndexChain, IndexPlan, IndexSelector, Operator};
pub use snapshot::EngineSnapshot;
pub use traits::{Bucket, IndexStore};
