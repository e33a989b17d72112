//! Index directory management.
//!
//! ```text
//! <path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ MANIFEST          # Schema, index registry, checkpoint sequence
//! ├─ RECORDS           # Committed records
//! └─ indexes/
//!    └─ <id>.idx       # One snapshot per index
//! ```
//!
//! Every file is written to a `.tmp` sibling, synced and renamed into place,
//! so a crash leaves either the old or the new version.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexFile;
use crate::manifest::Manifest;
use crate::record::StoredRecord;
use crate::types::{IndexId, SequenceNumber};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const RECORDS_FILE: &str = "RECORDS";
const LOCK_FILE: &str = "LOCK";
const INDEXES_DIR: &str = "indexes";

/// Magic bytes for the records file: "SREC".
const RECORDS_MAGIC: [u8; 4] = *b"SREC";

#[derive(Serialize, Deserialize)]
struct RecordsBody {
    seq: SequenceNumber,
    records: Vec<StoredRecord>,
}

/// Holds the directory lock and knows the file layout.
///
/// Only one `IndexDir` can exist per directory at a time.
#[derive(Debug)]
pub struct IndexDir {
    path: PathBuf,
    sync: bool,
    _lock_file: File,
}

impl IndexDir {
    /// Opens or creates an index directory.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidFormat`] if the path is missing and
    ///   `create_if_missing` is false, or is not a directory
    /// - [`CoreError::DirectoryLocked`] if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool, sync: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "index directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }
        fs::create_dir_all(path.join(INDEXES_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            sync,
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the MANIFEST file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Returns the path to the RECORDS file.
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.path.join(RECORDS_FILE)
    }

    /// Returns the path of an index snapshot file.
    #[must_use]
    pub fn index_path(&self, id: IndexId) -> PathBuf {
        self.path
            .join(INDEXES_DIR)
            .join(format!("{:06}.idx", id.as_u64()))
    }

    /// Returns true if nothing has been checkpointed yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        !self.manifest_path().exists()
    }

    /// Loads the manifest; `None` for a fresh directory.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        match read_optional(&self.manifest_path())? {
            Some(data) if !data.is_empty() => Manifest::decode(&data).map(Some),
            _ => Ok(None),
        }
    }

    /// Saves the manifest atomically.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        self.write_atomic(&self.manifest_path(), &manifest.encode()?)
    }

    /// Loads the committed records and the sequence they reflect.
    pub(crate) fn load_records(&self) -> CoreResult<(SequenceNumber, Vec<StoredRecord>)> {
        let Some(data) = read_optional(&self.records_path())? else {
            return Ok((SequenceNumber::default(), Vec::new()));
        };
        if data.len() < 4 || data[..4] != RECORDS_MAGIC {
            return Err(CoreError::invalid_format("invalid records file magic"));
        }
        let body: RecordsBody = ciborium::from_reader(&data[4..])
            .map_err(|e| CoreError::invalid_format(format!("records decode: {e}")))?;
        Ok((body.seq, body.records))
    }

    pub(crate) fn save_records(
        &self,
        seq: SequenceNumber,
        records: Vec<StoredRecord>,
    ) -> CoreResult<()> {
        let mut buf = RECORDS_MAGIC.to_vec();
        ciborium::into_writer(&RecordsBody { seq, records }, &mut buf)
            .map_err(|e| CoreError::invalid_format(format!("records encode: {e}")))?;
        self.write_atomic(&self.records_path(), &buf)
    }

    /// Loads an index snapshot.
    ///
    /// Returns `Ok(None)` if the file is missing, `Err` if it is unreadable
    /// or corrupt.
    pub fn load_index(&self, id: IndexId) -> CoreResult<Option<IndexFile>> {
        match read_optional(&self.index_path(id))? {
            Some(data) => IndexFile::decode(&data).map(Some),
            None => Ok(None),
        }
    }

    /// Saves an index snapshot atomically.
    pub fn save_index(&self, file: &IndexFile) -> CoreResult<()> {
        self.write_atomic(&self.index_path(file.definition.id), &file.encode()?)
    }

    /// Deletes an index snapshot. Missing files are not an error.
    pub fn remove_index(&self, id: IndexId) -> CoreResult<()> {
        let path = self.index_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
            sync_directory(&self.path.join(INDEXES_DIR))?;
        }
        Ok(())
    }

    /// Lists the ids of every index snapshot on disk.
    pub fn index_files(&self) -> CoreResult<Vec<IndexId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.path.join(INDEXES_DIR))? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".idx")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(IndexId::new(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn write_atomic(&self, target: &Path, data: &[u8]) -> CoreResult<()> {
        let mut temp = target.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        if self.sync {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp, target)?;
        if self.sync {
            if let Some(parent) = target.parent() {
                sync_directory(parent)?;
            }
        }
        Ok(())
    }
}

fn read_optional(path: &Path) -> CoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Syncs a directory so renames and deletions inside it are durable.
#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexDefinition, IndexState, IndexType, NullPolicy};
    use crate::key;
    use crate::record::{Document, RecordId};
    use crate::schema::{Property, PropertyType, Schema};
    use tempfile::tempdir;

    fn index_file(id: u64) -> IndexFile {
        let schema = Schema::new();
        schema.create_class("C", &[]).unwrap();
        schema
            .create_property("C", Property::new("x", PropertyType::Integer))
            .unwrap();
        IndexFile {
            definition: IndexDefinition::bind(
                &schema,
                IndexId::new(id),
                "C.x",
                "C",
                IndexType::NotUnique,
                &["x"],
                NullPolicy::IncludeNulls,
            )
            .unwrap(),
            state: IndexState::Active,
            seq: SequenceNumber::new(1),
            entries: vec![(key![1], RecordId::new())],
        }
    }

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new");
        let dir = IndexDir::open(&path, true, true).unwrap();
        assert!(path.join(INDEXES_DIR).is_dir());
        assert!(dir.is_new());
    }

    #[test]
    fn open_fails_if_missing_and_no_create() {
        let temp = tempdir().unwrap();
        assert!(IndexDir::open(&temp.path().join("nope"), false, true).is_err());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");
        let _first = IndexDir::open(&path, true, true).unwrap();
        assert!(matches!(
            IndexDir::open(&path, true, true),
            Err(CoreError::DirectoryLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("reopen");
        drop(IndexDir::open(&path, true, true).unwrap());
        let _again = IndexDir::open(&path, true, true).unwrap();
    }

    #[test]
    fn manifest_and_records_roundtrip() {
        let temp = tempdir().unwrap();
        let dir = IndexDir::open(temp.path(), true, false).unwrap();
        assert!(dir.load_manifest().unwrap().is_none());
        assert!(dir.load_records().unwrap().1.is_empty());

        let manifest = Manifest {
            committed_seq: SequenceNumber::new(7),
            ..Manifest::default()
        };
        dir.save_manifest(&manifest).unwrap();
        assert_eq!(dir.load_manifest().unwrap().unwrap(), manifest);
        assert!(!dir.is_new());

        let rid = RecordId::new();
        dir.save_records(
            SequenceNumber::new(7),
            vec![StoredRecord {
                rid,
                document: Document::new("C").with("x", 1),
                version: SequenceNumber::new(7),
            }],
        )
        .unwrap();
        let (seq, loaded) = dir.load_records().unwrap();
        assert_eq!(seq, SequenceNumber::new(7));
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].rid, rid);
        assert!(!temp.path().join("RECORDS.tmp").exists());
    }

    #[test]
    fn index_files_lifecycle() {
        let temp = tempdir().unwrap();
        let dir = IndexDir::open(temp.path(), true, false).unwrap();
        assert!(dir.load_index(IndexId::new(2)).unwrap().is_none());

        dir.save_index(&index_file(2)).unwrap();
        dir.save_index(&index_file(5)).unwrap();
        assert_eq!(dir.index_files().unwrap(), vec![IndexId::new(2), IndexId::new(5)]);
        assert_eq!(dir.load_index(IndexId::new(2)).unwrap().unwrap().entries.len(), 1);

        dir.remove_index(IndexId::new(2)).unwrap();
        dir.remove_index(IndexId::new(2)).unwrap();
        assert_eq!(dir.index_files().unwrap(), vec![IndexId::new(5)]);
    }

    #[test]
    fn corrupt_index_file_is_an_error() {
        let temp = tempdir().unwrap();
        let dir = IndexDir::open(temp.path(), true, false).unwrap();
        fs::write(dir.index_path(IndexId::new(1)), b"garbage").unwrap();
        assert!(dir.load_index(IndexId::new(1)).is_err());
    }
}
