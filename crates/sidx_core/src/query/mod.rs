//! Index-backed data access for the query planner.
//!
//! The planner picks an index with [`IndexSelector`](crate::index::IndexSelector)
//! and turns the predicate into a [`KeyCondition`]; [`FetchFromIndex`] then
//! produces the matching record ids instead of a full class scan.
//! Predicates on properties reached through links run as a [`ChainedFetch`].

mod chain;
mod fetch;

pub use chain::ChainedFetch;
pub use fetch::{FetchFromIndex, KeyCondition};
