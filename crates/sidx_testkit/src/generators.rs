//! Property-based test generators using proptest.
//!
//! Values are drawn from small domains on purpose so that generated
//! records collide on keys and exercise shared buckets.

use proptest::prelude::*;
use sidx_core::{CompositeKey, RecordId, Value};

/// Strategy for record ids.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    prop::array::uniform16(any::<u8>()).prop_map(RecordId::from_bytes)
}

/// Strategy for scalar values of mixed kinds, nulls included.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        1 => any::<bool>().prop_map(Value::Bool),
        3 => (-50i64..50).prop_map(Value::Integer),
        2 => (-50.0f64..50.0).prop_map(Value::Float),
        3 => "[a-e]{0,3}".prop_map(Value::Text),
    ]
}

/// Strategy for composite keys of one to `max_arity` components.
pub fn composite_key_strategy(max_arity: usize) -> impl Strategy<Value = CompositeKey> {
    prop::collection::vec(scalar_strategy(), 1..=max_arity.max(1)).prop_map(CompositeKey::new)
}

/// Strategy for integer tag lists; duplicates are allowed.
pub fn tags_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..8, 0..5)
}

/// One mutation of a pool of `Item` records, addressed by slot.
#[derive(Debug, Clone)]
pub enum ItemOperation {
    /// Saves (inserts or replaces) the record in `slot`.
    Save {
        /// Record slot.
        slot: usize,
        /// Scalar `x`; `None` leaves the property out.
        x: Option<i64>,
        /// Tag list; `None` leaves the property out.
        tags: Option<Vec<i64>>,
    },
    /// Appends one tag to the record in `slot`, if it exists.
    AddTag {
        /// Record slot.
        slot: usize,
        /// Tag to append.
        tag: i64,
    },
    /// Removes every occurrence of a tag from the record in `slot`.
    RemoveTag {
        /// Record slot.
        slot: usize,
        /// Tag to remove.
        tag: i64,
    },
    /// Deletes the record in `slot`, if it exists.
    Delete {
        /// Record slot.
        slot: usize,
    },
}

/// Strategy for single item operations over `slots` record slots.
pub fn item_operation_strategy(slots: usize) -> impl Strategy<Value = ItemOperation> {
    let slots = slots.max(1);
    prop_oneof![
        3 => (0..slots, prop::option::weighted(0.8, 0i64..4), prop::option::weighted(0.8, tags_strategy()))
            .prop_map(|(slot, x, tags)| ItemOperation::Save { slot, x, tags }),
        3 => (0..slots, 0i64..8).prop_map(|(slot, tag)| ItemOperation::AddTag { slot, tag }),
        3 => (0..slots, 0i64..8).prop_map(|(slot, tag)| ItemOperation::RemoveTag { slot, tag }),
        1 => (0..slots).prop_map(|slot| ItemOperation::Delete { slot }),
    ]
}

/// Strategy for operation batches; each inner vector is one transaction.
pub fn transaction_batches_strategy(
    slots: usize,
    max_batches: usize,
) -> impl Strategy<Value = Vec<Vec<ItemOperation>>> {
    prop::collection::vec(
        prop::collection::vec(item_operation_strategy(slots), 1..4),
        1..max_batches.max(2),
    )
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_respect_arity(key in composite_key_strategy(3)) {
            prop_assert!((1..=3).contains(&key.len()));
        }

        #[test]
        fn operations_stay_in_pool(op in item_operation_strategy(4)) {
            let slot = match op {
                ItemOperation::Save { slot, .. }
                | ItemOperation::AddTag { slot, .. }
                | ItemOperation::RemoveTag { slot, .. }
                | ItemOperation::Delete { slot } => slot,
            };
            prop_assert!(slot < 4);
        }
    }
}
