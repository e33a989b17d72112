//! Schema collaborator: classes, properties and their declared types.
//!
//! The index engine consumes these facts to type-check index definitions
//! and to pick a comparator for every key slot.

mod property;
mod registry;

pub use property::{Property, PropertyType};
pub use registry::{Schema, SchemaClass};
