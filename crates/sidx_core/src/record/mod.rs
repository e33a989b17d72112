//! Record collaborator: identity, documents and the record source used for
//! rebuilds and class filtering.

mod document;
mod id;
mod store;

pub use document::Document;
pub use id::RecordId;
pub use store::{MemoryRecordStore, RecordSource, RecordWrite};
pub(crate) use store::StoredRecord;
