//! Fetches over property paths that cross links.

use crate::error::CoreResult;
use crate::index::{CompositeKey, IndexChain, IndexManager, IndexPlan};
use crate::query::{FetchFromIndex, KeyCondition};
use crate::record::{RecordId, RecordSource};
use crate::transaction::{Transaction, TransactionManager};
use crate::value::Value;
use tracing::trace;

/// Answers a predicate on a linked property with one index per hop.
///
/// The condition runs against the target index first. Each link index,
/// walked back towards the queried class, then turns the records found so
/// far into the records that link to them.
#[derive(Debug, Clone)]
pub struct ChainedFetch {
    /// Link indexes, from the queried class outwards.
    pub links: Vec<IndexPlan>,
    /// Fetch on the class the path ends in.
    pub target: FetchFromIndex,
}

impl ChainedFetch {
    /// Creates a fetch over a selected chain.
    #[must_use]
    pub fn new(chain: IndexChain, condition: KeyCondition) -> Self {
        Self {
            links: chain.links,
            target: FetchFromIndex::new(chain.target, condition),
        }
    }

    /// Names of the indexes used, queried class first.
    #[must_use]
    pub fn index_names(&self) -> Vec<&str> {
        self.links
            .iter()
            .chain(std::iter::once(&self.target.plan))
            .map(|plan| plan.index.as_str())
            .collect()
    }

    /// Runs against committed state.
    ///
    /// # Errors
    ///
    /// Whatever a [`FetchFromIndex`] on any index of the chain returns.
    pub fn execute(
        &self,
        indexes: &IndexManager,
        records: &dyn RecordSource,
    ) -> CoreResult<Vec<RecordId>> {
        self.run(|fetch| fetch.execute(indexes, records))
    }

    /// Runs against the state `txn` sees, staged link changes included.
    pub fn execute_in(
        &self,
        indexes: &IndexManager,
        tm: &TransactionManager,
        txn: &Transaction,
    ) -> CoreResult<Vec<RecordId>> {
        self.run(|fetch| fetch.execute_in(indexes, tm, txn))
    }

    fn run(
        &self,
        fetch: impl Fn(&FetchFromIndex) -> CoreResult<Vec<RecordId>>,
    ) -> CoreResult<Vec<RecordId>> {
        let mut rids = fetch(&self.target)?;
        for hop in self.links.iter().rev() {
            if rids.is_empty() {
                break;
            }
            let keys = rids
                .into_iter()
                .map(|rid| CompositeKey::new(vec![Value::Link(rid)]))
                .collect();
            let step = FetchFromIndex::new(hop.clone(), KeyCondition::In(keys));
            rids = fetch(&step)?;
            trace!(target: "sidx::index", index = %hop.index, hits = rids.len(), "link hop");
        }
        Ok(rids)
    }
}
