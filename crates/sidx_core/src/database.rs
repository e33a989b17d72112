//! Database facade, persistence and recovery.

use crate::config::Config;
use crate::dir::IndexDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{
    CompositeKey, IndexChain, IndexDefinition, IndexFile, IndexHandle, IndexManager,
    IndexMetadata, IndexPlan, IndexSelector, IndexState, IndexType, Operator,
};
use crate::manifest::{Manifest, ManifestIndex};
use crate::query::{ChainedFetch, FetchFromIndex};
use crate::record::{Document, MemoryRecordStore, RecordId, RecordSource, RecordWrite};
use crate::schema::{PropertyType, Schema};
use crate::stats::IndexStats;
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{IndexId, SequenceNumber};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The main database handle.
///
/// `Database` owns the schema, the record arena, the index registry and the
/// transaction manager of one database. There are no process-wide
/// singletons; open as many independent databases as needed.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use sidx_core::{Config, Database, Document, IndexMetadata, IndexType};
///
/// let db = Database::open(Path::new("my_indexes"), Config::default())?;
/// db.schema().create_class("User", &[])?;
/// db.schema().create_property("User", Property::new("email", PropertyType::String))?;
/// db.create_property_index("User", "email", IndexType::Unique, IndexMetadata::new())?;
///
/// db.transaction(|txn| {
///     db.save(txn, Document::new("User").with("email", "a@example.com"))?;
///     Ok(())
/// })?;
///
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// ```rust,ignore
/// let db = Database::open_in_memory(Config::default())?;
/// ```
pub struct Database {
    config: Config,
    /// Index directory (holds the lock). None for in-memory databases.
    dir: Option<IndexDir>,
    schema: Arc<Schema>,
    records: Arc<MemoryRecordStore>,
    indexes: Arc<IndexManager>,
    txn_manager: TransactionManager,
    stats: Arc<IndexStats>,
    is_open: RwLock<bool>,
}

impl Database {
    fn assemble(config: Config, dir: Option<IndexDir>) -> Self {
        let schema = Arc::new(Schema::new());
        let records = Arc::new(MemoryRecordStore::new());
        let stats = Arc::new(IndexStats::new());
        let source: Arc<dyn RecordSource> = records.clone();
        let indexes = Arc::new(IndexManager::new(
            Arc::clone(&schema),
            source,
            config.clone(),
            Arc::clone(&stats),
        ));
        let txn_manager = TransactionManager::new(Arc::clone(&indexes), Arc::clone(&records));
        Self {
            config,
            dir,
            schema,
            records,
            indexes,
            txn_manager,
            stats,
            is_open: RwLock::new(true),
        }
    }

    /// Opens a database that lives only in memory.
    pub fn open_in_memory(config: Config) -> CoreResult<Self> {
        Ok(Self::assemble(config, None))
    }

    /// Opens a database backed by an index directory.
    ///
    /// The method:
    /// - Creates the directory if it doesn't exist (unless `create_if_missing` is false)
    /// - Acquires an exclusive lock to prevent concurrent access
    /// - Loads the schema, the records and every index from the last checkpoint
    ///
    /// An index file that is missing, corrupt or older than the records is
    /// not an error: the index is rebuilt from the records. An index whose
    /// rebuild fails stays `Rebuilding` and is logged; see
    /// [`rebuilding_indexes`](Self::rebuilding_indexes).
    ///
    /// # Errors
    ///
    /// - [`CoreError::DirectoryLocked`] if another handle has the directory
    /// - [`CoreError::InvalidFormat`] if the manifest or records are corrupt
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = IndexDir::open(path, config.create_if_missing, config.sync_on_write)?;
        let manifest = dir.load_manifest()?;
        let db = Self::assemble(config, Some(dir));
        let rebuilding = match manifest {
            Some(manifest) => db.recover(manifest)?,
            None => Vec::new(),
        };
        if !rebuilding.is_empty() {
            warn!(
                target: "sidx::persist",
                indexes = ?rebuilding,
                "indexes could not be rebuilt and are unavailable"
            );
        }
        info!(
            target: "sidx::persist",
            path = %path.display(),
            indexes = db.indexes.indexes().len(),
            rebuilding = rebuilding.len(),
            records = db.records.len(),
            "index directory opened"
        );
        Ok(db)
    }

    /// Loads the checkpoint; returns the indexes left `Rebuilding`.
    fn recover(&self, manifest: Manifest) -> CoreResult<Vec<String>> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(Vec::new());
        };
        self.schema.load(manifest.classes);
        let (seq, stored) = dir.load_records()?;
        self.records.load(stored);
        self.indexes.set_committed_seq(seq);
        self.indexes.reserve_ids(manifest.next_index_id.as_u64());

        let mut known = BTreeSet::new();
        let mut rebuilding = Vec::new();
        for ManifestIndex { definition, state } in manifest.indexes {
            known.insert(definition.id);
            let name = definition.name.clone();
            let entries = self.persisted_entries(dir, &definition, state, seq);
            if self.indexes.restore(definition, entries).is_err() {
                rebuilding.push(name);
            }
        }
        for id in dir.index_files()? {
            if !known.contains(&id) {
                dir.remove_index(id)?;
            }
        }
        Ok(rebuilding)
    }

    /// Returns the persisted entries of an index if they can be trusted.
    fn persisted_entries(
        &self,
        dir: &IndexDir,
        definition: &IndexDefinition,
        state: IndexState,
        seq: SequenceNumber,
    ) -> Option<Vec<(CompositeKey, RecordId)>> {
        if state != IndexState::Active {
            return None;
        }
        let reason = match dir.load_index(definition.id) {
            Ok(Some(file))
                if file.seq == seq
                    && file.state == IndexState::Active
                    && file.definition == *definition =>
            {
                return Some(file.entries);
            }
            Ok(Some(file)) => format!("stale snapshot at {}", file.seq),
            Ok(None) => "snapshot missing".to_string(),
            Err(e) => e.to_string(),
        };
        warn!(
            target: "sidx::persist",
            index = %definition.name,
            reason = %reason,
            "discarding persisted index, rebuilding"
        );
        None
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the index registry.
    #[must_use]
    pub fn indexes(&self) -> &Arc<IndexManager> {
        &self.indexes
    }

    /// Creates an index over one or more properties.
    pub fn create_index(
        &self,
        class: &str,
        name: &str,
        index_type: IndexType,
        fields: &[&str],
        metadata: IndexMetadata,
    ) -> CoreResult<Arc<IndexHandle>> {
        self.ensure_open()?;
        self.indexes
            .create_index(class, name, index_type, fields, metadata)
    }

    /// Creates an index named `<class>.<property>`.
    pub fn create_property_index(
        &self,
        class: &str,
        property: &str,
        index_type: IndexType,
        metadata: IndexMetadata,
    ) -> CoreResult<Arc<IndexHandle>> {
        self.ensure_open()?;
        self.indexes
            .create_property_index(class, property, index_type, metadata)
    }

    /// Drops an index and deletes its persisted snapshot.
    pub fn drop_index(&self, name: &str) -> CoreResult<IndexDefinition> {
        self.ensure_open()?;
        let definition = self.indexes.drop_index(name)?;
        self.forget(&[definition.id])?;
        Ok(definition)
    }

    /// Drops a property together with every index over it.
    pub fn drop_property(&self, class: &str, property: &str) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        let before: Vec<(IndexId, String)> = self
            .indexes
            .indexes()
            .iter()
            .map(|h| (h.id(), h.name().to_string()))
            .collect();
        let dropped = self.indexes.drop_property(class, property)?;
        let ids: Vec<IndexId> = before
            .into_iter()
            .filter(|(_, name)| dropped.contains(name))
            .map(|(id, _)| id)
            .collect();
        self.forget(&ids)?;
        Ok(dropped)
    }

    /// Deletes snapshots of dropped indexes and records the new registry.
    fn forget(&self, ids: &[IndexId]) -> CoreResult<()> {
        if let Some(dir) = self.dir.as_ref() {
            for id in ids {
                dir.remove_index(*id)?;
            }
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Changes a property's type and rebuilds the indexes over it.
    pub fn alter_property_type(
        &self,
        class: &str,
        property: &str,
        property_type: PropertyType,
        linked_type: Option<PropertyType>,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        self.indexes
            .alter_property_type(class, property, property_type, linked_type)
    }

    /// Rebuilds an index from the records; returns its entry count.
    pub fn rebuild_index(&self, name: &str) -> CoreResult<usize> {
        self.ensure_open()?;
        self.indexes.rebuild(name)
    }

    /// Names of the indexes left `Rebuilding` by a failed rebuild.
    pub fn rebuilding_indexes(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .indexes
            .indexes()
            .iter()
            .filter(|handle| handle.state() == IndexState::Rebuilding)
            .map(|handle| handle.name().to_string())
            .collect())
    }

    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> CoreResult<Arc<IndexHandle>> {
        self.ensure_open()?;
        self.indexes.index(name)
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        Ok(self.txn_manager.begin())
    }

    /// Commits a transaction.
    ///
    /// With [`Config::persist_on_commit`] on a directory-backed database, a
    /// checkpoint follows every successful commit.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<SequenceNumber> {
        self.ensure_open()?;
        let seq = self.txn_manager.commit(txn)?;
        if self.config.persist_on_commit && self.dir.is_some() {
            if let Err(e) = self.checkpoint() {
                error!(target: "sidx::persist", seq = %seq, error = %e, "checkpoint after commit failed");
            }
        }
        Ok(seq)
    }

    /// Rolls back a transaction.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.txn_manager.rollback(txn)
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                if txn.is_active() {
                    self.rollback(&mut txn)?;
                }
                Err(e)
            }
        }
    }

    /// Checks a document against the schema and canonicalizes its class.
    fn validate(&self, mut doc: Document) -> CoreResult<Document> {
        let class = self.schema.canonical_name(doc.class())?;
        for (name, value) in doc.fields() {
            if let Some(property) = self.schema.property(&class, name)? {
                property.check_value(value)?;
            }
        }
        doc.set_class(class);
        Ok(doc)
    }

    /// Saves a new record in a transaction; returns its id.
    pub fn save(&self, txn: &mut Transaction, doc: Document) -> CoreResult<RecordId> {
        let rid = RecordId::new();
        self.save_with_id(txn, rid, doc)?;
        Ok(rid)
    }

    /// Inserts or replaces the record `rid` in a transaction.
    pub fn save_with_id(&self, txn: &mut Transaction, rid: RecordId, doc: Document) -> CoreResult<()> {
        self.ensure_open()?;
        let doc = self.validate(doc)?;
        self.txn_manager.write(txn, rid, RecordWrite::Save(doc))
    }

    /// Deletes a record in a transaction.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the transaction cannot see the record.
    pub fn delete(&self, txn: &mut Transaction, rid: RecordId) -> CoreResult<()> {
        self.ensure_open()?;
        if self.txn_manager.get(txn, rid)?.is_none() {
            return Err(CoreError::not_found(format!("record {rid}")));
        }
        self.txn_manager.write(txn, rid, RecordWrite::Delete)
    }

    /// Inserts a record in its own transaction.
    pub fn insert(&self, doc: Document) -> CoreResult<RecordId> {
        self.transaction(|txn| self.save(txn, doc))
    }

    /// Replaces an existing record in its own transaction.
    pub fn update(&self, rid: RecordId, doc: Document) -> CoreResult<()> {
        self.transaction(|txn| {
            if self.txn_manager.get(txn, rid)?.is_none() {
                return Err(CoreError::not_found(format!("record {rid}")));
            }
            self.save_with_id(txn, rid, doc)
        })
    }

    /// Deletes a record in its own transaction.
    pub fn remove(&self, rid: RecordId) -> CoreResult<()> {
        self.transaction(|txn| self.delete(txn, rid))
    }

    /// Reads a committed record.
    pub fn get(&self, rid: RecordId) -> CoreResult<Option<Document>> {
        self.ensure_open()?;
        Ok(self.records.get(rid))
    }

    /// Reads a record as a transaction sees it.
    pub fn get_in_txn(&self, txn: &Transaction, rid: RecordId) -> CoreResult<Option<Document>> {
        self.ensure_open()?;
        self.txn_manager.get(txn, rid)
    }

    /// Looks up a key in an index as a transaction sees it.
    pub fn index_get_in_txn(
        &self,
        txn: &Transaction,
        index: &str,
        key: &CompositeKey,
    ) -> CoreResult<BTreeSet<RecordId>> {
        self.ensure_open()?;
        let handle = self.indexes.index(index)?;
        self.txn_manager.index_get(txn, &handle, key)
    }

    /// Returns an index's entry count as a transaction sees it.
    pub fn index_size_in_txn(&self, txn: &Transaction, index: &str) -> CoreResult<usize> {
        self.ensure_open()?;
        let handle = self.indexes.index(index)?;
        self.txn_manager.index_size(txn, &handle)
    }

    /// Picks the best index for a predicate.
    pub fn select_index(
        &self,
        class: &str,
        fields: &[&str],
        operator: Operator,
    ) -> CoreResult<Option<IndexPlan>> {
        self.ensure_open()?;
        IndexSelector::new(&self.indexes).select_for(class, fields, operator)
    }

    /// Runs an index fetch against committed state.
    pub fn fetch(&self, fetch: &FetchFromIndex) -> CoreResult<Vec<RecordId>> {
        self.ensure_open()?;
        fetch.execute(&self.indexes, self.records.as_ref())
    }

    /// Runs an index fetch as a transaction sees it.
    pub fn fetch_in_txn(&self, txn: &Transaction, fetch: &FetchFromIndex) -> CoreResult<Vec<RecordId>> {
        self.ensure_open()?;
        fetch.execute_in(&self.indexes, &self.txn_manager, txn)
    }

    /// Picks the indexes for a predicate on a dotted link path such as
    /// `address.city`.
    pub fn select_chain(
        &self,
        class: &str,
        path: &str,
        operator: Operator,
    ) -> CoreResult<Option<IndexChain>> {
        self.ensure_open()?;
        let names: Vec<&str> = path.split('.').map(str::trim).collect();
        IndexSelector::new(&self.indexes).select_chain(class, &names, operator)
    }

    /// Runs a chained fetch against committed state.
    pub fn fetch_chain(&self, fetch: &ChainedFetch) -> CoreResult<Vec<RecordId>> {
        self.ensure_open()?;
        fetch.execute(&self.indexes, self.records.as_ref())
    }

    /// Runs a chained fetch as a transaction sees it.
    pub fn fetch_chain_in_txn(
        &self,
        txn: &Transaction,
        fetch: &ChainedFetch,
    ) -> CoreResult<Vec<RecordId>> {
        self.ensure_open()?;
        fetch.execute_in(&self.indexes, &self.txn_manager, txn)
    }

    /// Writes records, index snapshots and the manifest to the directory.
    ///
    /// No-op for in-memory databases. Commits wait while a checkpoint runs,
    /// so every file reflects the same sequence.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };
        let _guard = self.indexes.lock_writes();
        let seq = self.indexes.committed_seq();

        dir.save_records(seq, self.records.exported())?;
        let handles = self.indexes.indexes();
        for handle in &handles {
            dir.save_index(&IndexFile::capture(handle, seq))?;
        }
        let manifest = Manifest {
            committed_seq: seq,
            next_index_id: IndexId::new(self.indexes.next_id()),
            classes: self.schema.exported(),
            indexes: handles
                .iter()
                .map(|h| ManifestIndex {
                    definition: (*h.definition()).clone(),
                    state: h.state(),
                })
                .collect(),
            ..Manifest::default()
        };
        dir.save_manifest(&manifest)?;
        info!(target: "sidx::persist", seq = %seq, indexes = handles.len(), "checkpoint written");
        Ok(())
    }

    /// Returns the sequence of the last commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.txn_manager.committed_seq()
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Returns the shared index statistics.
    #[must_use]
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the directory path, if directory-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(IndexDir::path)
    }

    /// Closes the database, writing a final checkpoint.
    pub fn close(&self) -> CoreResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.checkpoint()?;
        *self.is_open.write() = false;
        Ok(())
    }

    /// Closes the handle without a final checkpoint.
    ///
    /// Changes since the last checkpoint are lost; the next open recovers
    /// the last checkpointed state.
    pub fn abandon(&self) {
        *self.is_open.write() = false;
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("records", &self.record_count())
            .field("indexes", &self.indexes.indexes().len())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(target: "sidx::persist", error = %e, "checkpoint on close failed");
        }
    }
}
