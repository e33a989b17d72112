//! Index registry and lifecycle.
//!
//! The [`IndexManager`] is owned by a database instance and passed by
//! reference to everything that needs index lookup. It registers, drops and
//! rebuilds indexes, and turns record before/after snapshots into index
//! deltas for the transaction layer.
//!
//! Lifecycle changes and commits serialize on one write lock, so an index
//! never misses a commit that raced with its initial population. Every
//! change to the set of usable definitions bumps a generation counter;
//! transactions staged against an older generation are re-staged at commit.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{
    CompositeKey, EngineSnapshot, IndexDefinition, IndexDelta, IndexEngine, IndexMetadata,
    IndexState, IndexType, MultikeyMaintainer, NullPolicy,
};
use crate::record::{Document, RecordId, RecordSource, RecordWrite};
use crate::schema::{PropertyType, Schema};
use crate::stats::IndexStats;
use crate::transaction::IndexBuffer;
use crate::types::{IndexId, SequenceNumber};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A registered index: its definition and its engine.
pub struct IndexHandle {
    definition: RwLock<Arc<IndexDefinition>>,
    engine: IndexEngine,
}

impl IndexHandle {
    fn new(definition: IndexDefinition, engine: IndexEngine) -> Self {
        Self {
            definition: RwLock::new(Arc::new(definition)),
            engine,
        }
    }

    /// Returns the index id.
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.definition.read().id
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Returns the current definition.
    #[must_use]
    pub fn definition(&self) -> Arc<IndexDefinition> {
        Arc::clone(&self.definition.read())
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        self.engine.state()
    }

    fn set_definition(&self, definition: IndexDefinition) {
        *self.definition.write() = Arc::new(definition);
    }
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("definition", &self.definition())
            .field("engine", &self.engine)
            .finish()
    }
}

/// Registry of the indexes of one database.
pub struct IndexManager {
    schema: Arc<Schema>,
    records: Arc<dyn RecordSource>,
    config: Config,
    stats: Arc<IndexStats>,
    registry: RwLock<BTreeMap<IndexId, Arc<IndexHandle>>>,
    next_id: AtomicU64,
    generation: AtomicU64,
    committed_seq: AtomicU64,
    /// Serializes commits with create, drop, alter and rebuild.
    write_lock: Mutex<()>,
}

impl IndexManager {
    /// Creates an empty registry over a schema and a record source.
    pub fn new(
        schema: Arc<Schema>,
        records: Arc<dyn RecordSource>,
        config: Config,
        stats: Arc<IndexStats>,
    ) -> Self {
        Self {
            schema,
            records,
            config,
            stats,
            registry: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            committed_seq: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the schema the indexes are bound against.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the shared statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<IndexStats> {
        &self.stats
    }

    /// Returns the registry generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the sequence of the last commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    pub(crate) fn set_committed_seq(&self, seq: SequenceNumber) {
        self.committed_seq.store(seq.as_u64(), Ordering::SeqCst);
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn find(&self, name: &str) -> Option<Arc<IndexHandle>> {
        self.registry
            .read()
            .values()
            .find(|h| h.name().eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Creates an index over one or more properties.
    ///
    /// When `metadata` carries no `ignoreNullValues`, the configured default
    /// ([`Config::ignore_null_values_default`]) applies.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateName`] if the name is taken, [`CoreError::Schema`]
    /// for a malformed definition, [`CoreError::DuplicateKey`] if existing
    /// records already violate a unique index.
    pub fn create_index(
        &self,
        class: &str,
        name: &str,
        index_type: IndexType,
        fields: &[&str],
        metadata: IndexMetadata,
    ) -> CoreResult<Arc<IndexHandle>> {
        let ignore = metadata
            .ignore_null_values
            .unwrap_or(self.config.ignore_null_values_default);
        self.register(
            class,
            name,
            index_type,
            fields,
            NullPolicy::from_ignore_nulls(ignore),
        )
    }

    /// Creates an index named `<class>.<property>` over a single property.
    ///
    /// Unlike [`create_index`](Self::create_index), absent metadata always
    /// means nulls are indexed.
    pub fn create_property_index(
        &self,
        class: &str,
        property: &str,
        index_type: IndexType,
        metadata: IndexMetadata,
    ) -> CoreResult<Arc<IndexHandle>> {
        let class = self.schema.canonical_name(class)?;
        let field = property.split_whitespace().next().unwrap_or(property);
        let name = format!("{class}.{field}");
        let ignore = metadata.ignore_null_values.unwrap_or(false);
        self.register(
            &class,
            &name,
            index_type,
            &[property],
            NullPolicy::from_ignore_nulls(ignore),
        )
    }

    fn register(
        &self,
        class: &str,
        name: &str,
        index_type: IndexType,
        fields: &[&str],
        null_policy: NullPolicy,
    ) -> CoreResult<Arc<IndexHandle>> {
        let _guard = self.write_lock.lock();
        if self.find(name).is_some() {
            return Err(CoreError::duplicate_index(name.trim()));
        }
        let id = IndexId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let definition =
            IndexDefinition::bind(&self.schema, id, name, class, index_type, fields, null_policy)?;
        let engine = IndexEngine::new(
            definition.name.clone(),
            index_type,
            self.config.unique_null_policy,
            Arc::clone(&self.stats),
        );
        let handle = Arc::new(IndexHandle::new(definition, engine));

        let snapshot = self.populate(&handle)?;
        let entries = snapshot.len();
        handle.engine.install(snapshot);
        handle.engine.set_state(IndexState::Active);
        self.registry.write().insert(id, Arc::clone(&handle));
        self.bump_generation();

        let def = handle.definition();
        info!(
            target: "sidx::index",
            index = %def.name,
            class = %def.class,
            kind = %index_type,
            entries,
            "index created"
        );
        Ok(handle)
    }

    /// Derives every entry of an index from the record source.
    fn populate(&self, handle: &IndexHandle) -> CoreResult<EngineSnapshot> {
        let def = handle.definition();
        let mut entries: Vec<(CompositeKey, RecordId)> = Vec::new();
        let mut failures = 0usize;
        for class in self.schema.descendants(&def.class)? {
            for (rid, doc) in self.records.scan_class(&class) {
                match def.derive_keys(&doc) {
                    Ok(keys) => entries.extend(keys.into_iter().map(|k| (k, rid))),
                    Err(e) => {
                        failures += 1;
                        warn!(
                            target: "sidx::index",
                            index = %def.name,
                            record = %rid,
                            error = %e,
                            "record skipped while populating index"
                        );
                        if failures > self.config.max_rebuild_errors {
                            return Err(CoreError::rebuild_failed(
                                def.name.clone(),
                                format!("record {rid}: {e}"),
                            ));
                        }
                    }
                }
            }
        }
        handle.engine.build_snapshot(entries, self.committed_seq())
    }

    /// Drops an index; later use of it fails with `NotFound`.
    pub fn drop_index(&self, name: &str) -> CoreResult<IndexDefinition> {
        let _guard = self.write_lock.lock();
        let handle = self
            .find(name)
            .ok_or_else(|| CoreError::not_found(format!("index '{name}'")))?;
        self.drop_locked(&handle);
        Ok((*handle.definition()).clone())
    }

    fn drop_locked(&self, handle: &IndexHandle) {
        handle.engine.release();
        self.registry.write().remove(&handle.id());
        self.bump_generation();
        info!(target: "sidx::index", index = %handle.name(), "index dropped");
    }

    /// Indexes of `class` or its subclasses that name `property`.
    fn affected_by(&self, class: &str, property: &str) -> CoreResult<Vec<Arc<IndexHandle>>> {
        let classes = self.schema.descendants(class)?;
        Ok(self
            .indexes()
            .into_iter()
            .filter(|h| {
                let def = h.definition();
                def.references(property)
                    && classes.iter().any(|c| c.eq_ignore_ascii_case(&def.class))
            })
            .collect())
    }

    /// Drops a property and every index that names it.
    ///
    /// Returns the names of the dropped indexes.
    pub fn drop_property(&self, class: &str, property: &str) -> CoreResult<Vec<String>> {
        let _guard = self.write_lock.lock();
        let affected = self.affected_by(class, property)?;
        self.schema.drop_property(class, property)?;
        let mut dropped = Vec::with_capacity(affected.len());
        for handle in affected {
            self.drop_locked(&handle);
            dropped.push(handle.name().to_string());
        }
        Ok(dropped)
    }

    /// Changes a property's type and rebuilds the indexes over it.
    ///
    /// # Errors
    ///
    /// [`CoreError::RebuildFailed`] for the first index whose rebuild
    /// failed. That index stays `Rebuilding`; the others are rebuilt anyway.
    pub fn alter_property_type(
        &self,
        class: &str,
        property: &str,
        property_type: PropertyType,
        linked_type: Option<PropertyType>,
    ) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        self.schema
            .alter_property_type(class, property, property_type, linked_type)?;
        let mut first_error = None;
        for handle in self.affected_by(class, property)? {
            if let Err(e) = self.rebuild_locked(&handle) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Rebuilds an index from a full scan of its class and subclasses.
    ///
    /// Returns the number of entries. Rebuilding an unchanged record set
    /// yields the same entries every time.
    pub fn rebuild(&self, name: &str) -> CoreResult<usize> {
        let _guard = self.write_lock.lock();
        let handle = self
            .find(name)
            .ok_or_else(|| CoreError::not_found(format!("index '{name}'")))?;
        self.rebuild_locked(&handle)
    }

    fn rebuild_locked(&self, handle: &IndexHandle) -> CoreResult<usize> {
        handle.engine.set_state(IndexState::Rebuilding);
        self.bump_generation();
        let result = handle
            .definition()
            .rebind(&self.schema)
            .and_then(|definition| {
                handle.set_definition(definition);
                self.populate(handle)
            });
        match result {
            Ok(snapshot) => {
                let entries = snapshot.len();
                handle.engine.install(snapshot);
                handle.engine.set_state(IndexState::Active);
                self.stats.record_rebuild(true);
                info!(target: "sidx::index", index = %handle.name(), entries, "index rebuilt");
                Ok(entries)
            }
            Err(e) => {
                self.stats.record_rebuild(false);
                error!(
                    target: "sidx::index",
                    index = %handle.name(),
                    error = %e,
                    "index rebuild failed"
                );
                Err(match e {
                    CoreError::RebuildFailed { .. } => e,
                    other => CoreError::rebuild_failed(handle.name(), other.to_string()),
                })
            }
        }
    }

    /// Looks up an index by name (case-insensitive).
    pub fn index(&self, name: &str) -> CoreResult<Arc<IndexHandle>> {
        self.find(name)
            .ok_or_else(|| CoreError::not_found(format!("index '{name}'")))
    }

    /// Looks up an index by id.
    #[must_use]
    pub fn get_by_id(&self, id: IndexId) -> Option<Arc<IndexHandle>> {
        self.registry.read().get(&id).cloned()
    }

    /// Returns every registered index in id order.
    #[must_use]
    pub fn indexes(&self) -> Vec<Arc<IndexHandle>> {
        self.registry.read().values().cloned().collect()
    }

    /// Returns the indexes declared directly on `class`.
    pub fn class_indexes(&self, class: &str) -> CoreResult<Vec<Arc<IndexHandle>>> {
        let class = self.schema.canonical_name(class)?;
        Ok(self
            .indexes()
            .into_iter()
            .filter(|h| h.definition().class.eq_ignore_ascii_case(&class))
            .collect())
    }

    /// Returns the indexes declared on `class` or any ancestor, nearest
    /// class first.
    pub fn class_involved_indexes(&self, class: &str) -> CoreResult<Vec<Arc<IndexHandle>>> {
        let all = self.indexes();
        let mut out = Vec::new();
        for ancestor in self.schema.ancestors(class)? {
            out.extend(
                all.iter()
                    .filter(|h| h.definition().class.eq_ignore_ascii_case(&ancestor))
                    .cloned(),
            );
        }
        Ok(out)
    }

    /// Computes the index deltas of one record change.
    ///
    /// This is the hook the record layer calls on save and delete. Only
    /// `Active` indexes are maintained; an index that is not active is
    /// brought up to date by the rebuild that reactivates it.
    pub fn on_record_change(
        &self,
        rid: RecordId,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> CoreResult<Vec<(IndexId, IndexDelta)>> {
        let mut candidates: BTreeMap<IndexId, Arc<IndexHandle>> = BTreeMap::new();
        for doc in [before, after].into_iter().flatten() {
            for handle in self.class_involved_indexes(doc.class())? {
                candidates.insert(handle.id(), handle);
            }
        }
        let mut deltas = Vec::new();
        for (id, handle) in candidates {
            if handle.state() != IndexState::Active {
                continue;
            }
            let def = handle.definition();
            let applies =
                |d: &&Document| self.schema.is_subclass_of(d.class(), &def.class);
            let delta = MultikeyMaintainer::diff(
                &def,
                rid,
                before.filter(applies),
                after.filter(applies),
            )?;
            if !delta.is_empty() {
                deltas.push((id, delta));
            }
        }
        Ok(deltas)
    }

    /// Stages the index deltas of a set of record writes from scratch,
    /// diffing each write against the committed record.
    pub(crate) fn stage_writes<'a>(
        &self,
        writes: impl IntoIterator<Item = (&'a RecordId, &'a RecordWrite)>,
    ) -> CoreResult<IndexBuffer> {
        let mut buffer = IndexBuffer::new();
        for (rid, write) in writes {
            let before = self.records.get(*rid);
            let after = match write {
                RecordWrite::Save(doc) => Some(doc),
                RecordWrite::Delete => None,
            };
            for (id, delta) in self.on_record_change(*rid, before.as_ref(), after)? {
                buffer.stage(id, &delta);
            }
        }
        Ok(buffer)
    }

    /// Registers a persisted index.
    ///
    /// `entries` are the persisted entries, or `None` when the persisted
    /// copy was unusable; the index is then rebuilt.
    ///
    /// # Errors
    ///
    /// [`CoreError::RebuildFailed`] if the rebuild failed. The index stays
    /// registered in the `Rebuilding` state.
    pub(crate) fn restore(
        &self,
        definition: IndexDefinition,
        entries: Option<Vec<(CompositeKey, RecordId)>>,
    ) -> CoreResult<Arc<IndexHandle>> {
        let id = definition.id;
        let engine = IndexEngine::new(
            definition.name.clone(),
            definition.index_type,
            self.config.unique_null_policy,
            Arc::clone(&self.stats),
        );
        let handle = Arc::new(IndexHandle::new(definition, engine));
        self.registry.write().insert(id, Arc::clone(&handle));
        self.next_id.fetch_max(id.as_u64() + 1, Ordering::SeqCst);
        self.bump_generation();

        let loaded = entries.map(|e| handle.engine.build_snapshot(e, self.committed_seq()));
        match loaded {
            Some(Ok(snapshot)) => {
                handle.engine.install(snapshot);
                handle.engine.set_state(IndexState::Active);
            }
            other => {
                if let Some(Err(e)) = other {
                    warn!(
                        target: "sidx::index",
                        index = %handle.name(),
                        error = %e,
                        "persisted entries rejected, rebuilding"
                    );
                }
                self.rebuild_locked(&handle)?;
            }
        }
        Ok(handle)
    }

    pub(crate) fn reserve_ids(&self, next_id: u64) {
        self.next_id.fetch_max(next_id, Ordering::SeqCst);
    }
}

impl fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexManager")
            .field("indexes", &self.registry.read().len())
            .field("generation", &self.generation())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}
