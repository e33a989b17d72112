//! Index snapshot files.
//!
//! Each index is persisted to its own file so it can be reloaded on open
//! without a rescan.
//!
//! ## Format
//!
//! ```text
//! magic:    [u8; 4]   "SIDX"
//! version:  u8
//! checksum: [u8; 32]  SHA-256 of body
//! body:     CBOR { definition, state, seq, entries: [(key, rid)] }
//! ```
//!
//! ## Invariants
//!
//! - Index state is derivable from the record store
//! - A persisted index is a cache, not a source of truth
//! - A corrupt, truncated or stale file triggers a rebuild, not an error

use crate::error::{CoreError, CoreResult};
use crate::index::{CompositeKey, IndexDefinition, IndexHandle, IndexState};
use crate::record::RecordId;
use crate::types::SequenceNumber;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Magic bytes for index files: "SIDX".
pub const INDEX_MAGIC: [u8; 4] = *b"SIDX";

/// Current index file format version.
pub const INDEX_VERSION: u8 = 1;

const CHECKSUM_LEN: usize = 32;
const HEADER_LEN: usize = INDEX_MAGIC.len() + 1 + CHECKSUM_LEN;

/// Fixed-size header of an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFileHeader {
    /// Format version.
    pub version: u8,
    /// Stored SHA-256 of the body.
    pub checksum: [u8; CHECKSUM_LEN],
    /// Body length in bytes.
    pub body_len: usize,
}

/// The persisted contents of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    /// The definition the entries were derived with.
    pub definition: IndexDefinition,
    /// Lifecycle state when written.
    pub state: IndexState,
    /// Commit sequence the entries reflect.
    pub seq: SequenceNumber,
    /// Every `(key, rid)` entry, sorted.
    pub entries: Vec<(CompositeKey, RecordId)>,
}

impl IndexFile {
    /// Captures the committed state of an index.
    ///
    /// Indexes that cannot serve reads are captured without entries.
    #[must_use]
    pub fn capture(handle: &IndexHandle, seq: SequenceNumber) -> Self {
        let state = handle.state();
        let entries = if state == IndexState::Active {
            handle.engine().committed().entries()
        } else {
            Vec::new()
        };
        Self {
            definition: (*handle.definition()).clone(),
            state,
            seq,
            entries,
        }
    }

    /// Encodes the file.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body)
            .map_err(|e| CoreError::invalid_format(format!("index encode: {e}")))?;
        let checksum = Sha256::digest(&body);

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.push(INDEX_VERSION);
        buf.extend_from_slice(&checksum);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Reads and checks the header without decoding the body.
    pub fn read_header(data: &[u8]) -> CoreResult<IndexFileHeader> {
        if data.len() < HEADER_LEN {
            return Err(CoreError::invalid_format("index file truncated"));
        }
        if data[..4] != INDEX_MAGIC {
            return Err(CoreError::invalid_format("invalid index file magic"));
        }
        let version = data[4];
        if version != INDEX_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported index file version: {version}"
            )));
        }
        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&data[5..HEADER_LEN]);
        Ok(IndexFileHeader {
            version,
            checksum,
            body_len: data.len() - HEADER_LEN,
        })
    }

    /// Decodes a file, verifying its checksum.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let header = Self::read_header(data)?;
        let body = &data[HEADER_LEN..];
        if Sha256::digest(body).as_slice() != header.checksum {
            return Err(CoreError::invalid_format("index file checksum mismatch"));
        }
        ciborium::from_reader(body)
            .map_err(|e| CoreError::invalid_format(format!("index decode: {e}")))
    }

    /// Checks the entry invariants: strictly ascending order and, for
    /// unique indexes, one record per key without a null component.
    ///
    /// Returns a description of every violation found.
    #[must_use]
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let unique = self.definition.index_type.is_unique();
        for pair in self.entries.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a >= b {
                problems.push(format!("entries out of order at key {}", b.0));
            } else if unique && a.0 == b.0 && !a.0.has_null() {
                problems.push(format!(
                    "unique key {} held by {} and {}",
                    a.0, a.1, b.1
                ));
            }
        }
        let arity = self.definition.fields.len();
        if let Some((key, _)) = self.entries.iter().find(|(k, _)| k.len() != arity) {
            problems.push(format!("key {key} does not have {arity} component(s)"));
        }
        problems
    }
}
