//! The fetch-from-index execution step.

use crate::error::{CoreError, CoreResult};
use crate::index::{CompositeKey, Direction, IndexDefinition, IndexManager, IndexPlan};
use crate::record::{Document, RecordId, RecordSource};
use crate::transaction::{IndexBuffer, Transaction, TransactionManager};
use std::collections::HashSet;
use std::ops::Bound;

/// Key condition derived from a predicate.
///
/// Keys may be partial; a partial key matches every entry that extends it.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCondition {
    /// `fields = key`
    Eq(CompositeKey),
    /// `fields IN keys`
    In(Vec<CompositeKey>),
    /// Keys between two bounds.
    Range {
        /// Lower bound.
        lower: Bound<CompositeKey>,
        /// Upper bound.
        upper: Bound<CompositeKey>,
    },
    /// Every covered field is null.
    IsNull,
}

/// Reads the records matching a condition from the index chosen by a plan.
#[derive(Debug, Clone)]
pub struct FetchFromIndex {
    /// The selected index.
    pub plan: IndexPlan,
    /// What to look up.
    pub condition: KeyCondition,
    /// Result order for ordered indexes.
    pub direction: Direction,
}

type Interval = (Bound<CompositeKey>, Bound<CompositeKey>);

fn coerce(def: &IndexDefinition, key: &CompositeKey) -> CoreResult<CompositeKey> {
    if key.len() > def.fields.len() {
        return Err(CoreError::invalid_operation(format!(
            "key {key} has more components than index '{}' has fields",
            def.name
        )));
    }
    key.components()
        .iter()
        .zip(&def.fields)
        .map(|(v, f)| v.coerce_to(f.key_type))
        .collect::<CoreResult<Vec<_>>>()
        .map(CompositeKey::new)
}

fn coerce_bound(def: &IndexDefinition, bound: &Bound<CompositeKey>) -> CoreResult<Bound<CompositeKey>> {
    Ok(match bound {
        Bound::Included(k) => Bound::Included(coerce(def, k)?),
        Bound::Excluded(k) => Bound::Excluded(coerce(def, k)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

fn point(key: CompositeKey) -> Interval {
    (Bound::Included(key.clone()), Bound::Included(key))
}

impl FetchFromIndex {
    /// Creates an ascending fetch.
    #[must_use]
    pub fn new(plan: IndexPlan, condition: KeyCondition) -> Self {
        Self {
            plan,
            condition,
            direction: Direction::Ascending,
        }
    }

    /// Returns results in descending key order.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.direction = Direction::Descending;
        self
    }

    /// Turns the condition into key intervals, coerced to the key types.
    fn intervals(&self, def: &IndexDefinition) -> CoreResult<Vec<Interval>> {
        Ok(match &self.condition {
            KeyCondition::Eq(key) => vec![point(coerce(def, key)?)],
            KeyCondition::In(keys) => {
                let mut coerced = keys
                    .iter()
                    .map(|k| coerce(def, k))
                    .collect::<CoreResult<Vec<_>>>()?;
                coerced.sort();
                coerced.dedup();
                if self.direction == Direction::Descending {
                    coerced.reverse();
                }
                coerced.into_iter().map(point).collect()
            }
            KeyCondition::Range { lower, upper } => {
                vec![(coerce_bound(def, lower)?, coerce_bound(def, upper)?)]
            }
            KeyCondition::IsNull => {
                vec![point(CompositeKey::nulls(self.plan.covered_fields.max(1)))]
            }
        })
    }

    /// Runs against committed state.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the index was dropped,
    /// [`CoreError::Unsupported`] for a range over a hash index.
    pub fn execute(
        &self,
        indexes: &IndexManager,
        records: &dyn RecordSource,
    ) -> CoreResult<Vec<RecordId>> {
        self.run(indexes, None, |rid| Ok(records.get(rid)))
    }

    /// Runs against the state `txn` sees: committed entries merged with the
    /// transaction's staged operations.
    pub fn execute_in(
        &self,
        indexes: &IndexManager,
        tm: &TransactionManager,
        txn: &Transaction,
    ) -> CoreResult<Vec<RecordId>> {
        txn.ensure_active()?;
        self.run(indexes, Some(txn.index_buffer()), |rid| tm.get(txn, rid))
    }

    fn run(
        &self,
        indexes: &IndexManager,
        buffer: Option<&IndexBuffer>,
        lookup: impl Fn(RecordId) -> CoreResult<Option<Document>>,
    ) -> CoreResult<Vec<RecordId>> {
        let handle = indexes
            .get_by_id(self.plan.index_id)
            .ok_or_else(|| CoreError::not_found(format!("index '{}'", self.plan.index)))?;
        let def = handle.definition();
        let engine = handle.engine();
        let intervals = self.intervals(&def)?;
        let arity = def.fields.len();
        let exact_key = |lower: &Bound<CompositeKey>, upper: &Bound<CompositeKey>| {
            match (lower, upper) {
                (Bound::Included(lo), Bound::Included(hi)) if lo == hi && lo.len() == arity => {
                    Some(lo.clone())
                }
                _ => None,
            }
        };
        // Hash engines only answer exact lookups.
        if !engine.is_ordered() && intervals.iter().any(|(lo, hi)| exact_key(lo, hi).is_none()) {
            return Err(CoreError::unsupported(format!(
                "range fetch is not supported by hash index '{}'",
                def.name
            )));
        }

        let staged = match buffer.filter(|b| b.ops(handle.id()).is_some()) {
            Some(buffer) => Some((buffer, engine.snapshot()?)),
            None => None,
        };
        let mut matched: Vec<RecordId> = Vec::new();
        for (lower, upper) in intervals {
            let exact = exact_key(&lower, &upper).filter(|_| !engine.is_ordered());
            match (&staged, exact) {
                (Some((buffer, snapshot)), Some(key)) => {
                    matched.extend(buffer.merged_get(handle.id(), snapshot, &key));
                }
                (Some((buffer, snapshot)), None) => matched.extend(
                    buffer
                        .merged_range(handle.id(), snapshot, lower, upper, self.direction)
                        .into_iter()
                        .map(|(_, rid)| rid),
                ),
                (None, Some(key)) => matched.extend(engine.get(&key)?),
                (None, None) => matched.extend(
                    engine
                        .range(lower, upper, self.direction)?
                        .map(|(_, rid)| rid),
                ),
            }
        }

        let schema = indexes.schema();
        let mut seen = HashSet::with_capacity(matched.len());
        let mut out = Vec::with_capacity(matched.len());
        for rid in matched {
            if !seen.insert(rid) {
                continue;
            }
            if self.plan.requires_class_filter {
                let keep = lookup(rid)?
                    .is_some_and(|doc| schema.is_subclass_of(doc.class(), &self.plan.class));
                if !keep {
                    continue;
                }
            }
            out.push(rid);
        }
        Ok(out)
    }
}
