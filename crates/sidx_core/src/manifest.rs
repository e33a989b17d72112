//! Directory manifest: schema, index registry and checkpoint sequence.
//!
//! ```text
//! magic:   [u8; 4]  "SMFN"
//! version: u16 LE
//! body:    CBOR Manifest
//! ```

use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDefinition, IndexState};
use crate::schema::SchemaClass;
use crate::types::{IndexId, SequenceNumber};
use serde::{Deserialize, Serialize};

/// Magic bytes for manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"SMFN";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// A registered index as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestIndex {
    /// Bound definition.
    pub definition: IndexDefinition,
    /// Lifecycle state at checkpoint time.
    pub state: IndexState,
}

/// Directory manifest.
///
/// The manifest stores:
/// - Format version
/// - Schema classes and properties
/// - Index registry and the next index id
/// - Sequence of the last checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Sequence of the last commit included in the checkpoint.
    pub committed_seq: SequenceNumber,
    /// Next index id to assign.
    pub next_index_id: IndexId,
    /// Schema classes.
    pub classes: Vec<SchemaClass>,
    /// Registered indexes, in id order.
    pub indexes: Vec<ManifestIndex>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new((1, 0))
    }
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new(format_version: (u16, u16)) -> Self {
        Self {
            format_version,
            committed_seq: SequenceNumber::default(),
            next_index_id: IndexId::new(1),
            classes: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Looks up an index entry by name (case-insensitive).
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&ManifestIndex> {
        self.indexes
            .iter()
            .find(|i| i.definition.name.eq_ignore_ascii_case(name))
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::invalid_format(format!("manifest encode: {e}")))?;
        Ok(buf)
    }

    /// Decodes a manifest from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }
        if data.len() < 6 {
            return Err(CoreError::invalid_format("manifest too short"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }
        ciborium::from_reader(&data[6..])
            .map_err(|e| CoreError::invalid_format(format!("manifest decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexType, NullPolicy};
    use crate::schema::{Property, PropertyType, Schema};

    #[test]
    fn empty_roundtrip() {
        let manifest = Manifest::default();
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.next_index_id, IndexId::new(1));
    }

    #[test]
    fn roundtrip_with_schema_and_indexes() {
        let schema = Schema::new();
        schema.create_class("Person", &[]).unwrap();
        schema
            .create_property("Person", Property::new("name", PropertyType::String))
            .unwrap();
        let definition = IndexDefinition::bind(
            &schema,
            IndexId::new(1),
            "Person.name",
            "Person",
            IndexType::NotUnique,
            &["name"],
            NullPolicy::IncludeNulls,
        )
        .unwrap();

        let manifest = Manifest {
            committed_seq: SequenceNumber::new(12),
            next_index_id: IndexId::new(2),
            classes: schema.exported(),
            indexes: vec![ManifestIndex {
                definition,
                state: IndexState::Active,
            }],
            ..Manifest::default()
        };
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert!(decoded.index("person.NAME").is_some());
    }

    #[test]
    fn rejects_bad_header() {
        assert!(Manifest::decode(b"XXXX\x01\x00").is_err());
        assert!(Manifest::decode(b"SMF").is_err());
        assert!(Manifest::decode(b"SMFN\x09\x00").is_err());
    }
}
