//! # sidx Core
//!
//! Secondary index engine for a document/graph database.
//!
//! This crate provides:
//! - Composite keys with a total order across value kinds
//! - Ordered and hashed index engines with copy-on-write snapshots
//! - Multikey maintenance for collection-valued properties
//! - Transaction-local index buffers with unique validation at commit
//! - An index registry with rebuilds and schema-change propagation
//! - Index selection and fetch-from-index execution
//! - Checkpointed index directories that rebuild damaged snapshots on open
//!
//! ```rust,ignore
//! use sidx_core::{key, Config, Database, Document, IndexMetadata, IndexType};
//!
//! let db = Database::open_in_memory(Config::default())?;
//! db.schema().create_class("Person", &[])?;
//! db.schema().create_property("Person", Property::new("name", PropertyType::String))?;
//! let index = db.create_property_index("Person", "name", IndexType::NotUnique, IndexMetadata::new())?;
//!
//! let rid = db.insert(Document::new("Person").with("name", "Ada"))?;
//! assert_eq!(index.engine().get(&key!["Ada"])?.collect::<Vec<_>>(), vec![rid]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod dir;
mod error;
pub mod index;
mod manifest;
pub mod query;
pub mod record;
pub mod schema;
mod stats;
pub mod transaction;
mod types;
pub mod value;

pub use config::{Config, UniqueNullPolicy};
pub use database::Database;
pub use dir::IndexDir;
pub use error::{CoreError, CoreResult};
pub use index::{
    CollectionMode, CompositeKey, Direction, FieldSpec, IndexChain, IndexDefinition, IndexEngine,
    IndexField, IndexFile, IndexHandle, IndexManager, IndexMetadata, IndexPlan, IndexSelector,
    IndexState, IndexType, MultikeyMaintainer, NullPolicy, Operator,
};
pub use manifest::{Manifest, ManifestIndex};
pub use query::{ChainedFetch, FetchFromIndex, KeyCondition};
pub use record::{Document, MemoryRecordStore, RecordId, RecordSource, RecordWrite};
pub use schema::{Property, PropertyType, Schema, SchemaClass};
pub use stats::{IndexStats, StatsSnapshot};
pub use transaction::{IndexBuffer, Transaction, TransactionManager, TransactionState};
pub use types::{IndexId, SequenceNumber, TransactionId};
pub use value::Value;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
