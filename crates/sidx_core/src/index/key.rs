//! Composite keys.
//!
//! A [`CompositeKey`] is the unit stored in an index: one [`Value`] per
//! declared field, compared lexicographically slot by slot. A key with fewer
//! components than the index has fields is *partial*; it sorts before every
//! full key it is a prefix of, which is what makes prefix scans a plain
//! range scan starting at the partial key.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;

/// An ordered tuple of field values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeKey(Vec<Value>);

impl CompositeKey {
    /// Creates a key from its components.
    #[must_use]
    pub fn new(components: Vec<Value>) -> Self {
        Self(components)
    }

    /// Creates a single-component key.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Creates a key of `arity` null components.
    #[must_use]
    pub fn nulls(arity: usize) -> Self {
        Self(vec![Value::Null; arity])
    }

    /// Returns the components.
    #[must_use]
    pub fn components(&self) -> &[Value] {
        &self.0
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the component at `slot`.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Value> {
        self.0.get(slot)
    }

    /// Returns true if this key addresses fewer than `field_count` fields.
    #[must_use]
    pub fn is_partial(&self, field_count: usize) -> bool {
        self.0.len() < field_count
    }

    /// Returns the first `n` components as a key.
    #[must_use]
    pub fn prefix(&self, n: usize) -> Self {
        Self(self.0.iter().take(n).cloned().collect())
    }

    /// Returns true if `prefix` is a leading sub-tuple of this key.
    #[must_use]
    pub fn starts_with(&self, prefix: &CompositeKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns true if any component is null.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// Checks a key against a lower bound, treating a bound shorter than the
    /// key as a prefix: `Excluded(p)` also excludes every extension of `p`.
    #[must_use]
    pub fn satisfies_lower(&self, bound: &Bound<CompositeKey>) -> bool {
        match bound {
            Bound::Unbounded => true,
            Bound::Included(b) => self >= b,
            Bound::Excluded(b) => self > b && !self.starts_with(b),
        }
    }

    /// Checks a key against an upper bound, treating a bound shorter than the
    /// key as a prefix: `Included(p)` also includes every extension of `p`.
    #[must_use]
    pub fn satisfies_upper(&self, bound: &Bound<CompositeKey>) -> bool {
        match bound {
            Bound::Unbounded => true,
            Bound::Included(b) => self <= b || self.starts_with(b),
            Bound::Excluded(b) => self < b,
        }
    }
}

impl From<Vec<Value>> for CompositeKey {
    fn from(components: Vec<Value>) -> Self {
        Self(components)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// Builds a [`CompositeKey`] from a list of values.
///
/// ```rust,ignore
/// let k = key![1, "x", Value::Null];
/// ```
#[macro_export]
macro_rules! key {
    ($($v:expr),* $(,)?) => {
        $crate::index::CompositeKey::new(vec![$($crate::value::Value::from($v)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;
    use proptest::prelude::*;

    #[test]
    fn lexicographic_with_null_first() {
        assert!(key![1, Value::Null] < key![1, 0]);
        assert!(key![Value::Null, 99] < key![0, 0]);
        assert!(key![1, 10] < key![1, 20]);
        assert!(key![1, 20] < key![2, 10]);
    }

    #[test]
    fn prefix_sorts_before_extensions() {
        let p = key![1];
        assert!(p < key![1, Value::Null]);
        assert!(p < key![1, i64::MIN]);
        assert!(key![1, 5].starts_with(&p));
        assert!(!key![2, 5].starts_with(&p));
    }

    #[test]
    fn partial_and_prefix() {
        let k = key![1, "a", true];
        assert!(!k.is_partial(3));
        assert!(k.prefix(2).is_partial(3));
        assert_eq!(k.prefix(2), key![1, "a"]);
        assert_eq!(k.prefix(10), k);
    }

    #[test]
    fn null_detection() {
        assert!(CompositeKey::nulls(2).has_null());
        assert!(key![1, Value::Null].has_null());
        assert!(!key![1, 2].has_null());
    }

    #[test]
    fn prefix_aware_bounds() {
        let k = key![5, 1];
        assert!(k.satisfies_upper(&Bound::Included(key![5])));
        assert!(!k.satisfies_upper(&Bound::Excluded(key![5])));
        assert!(!k.satisfies_lower(&Bound::Excluded(key![5])));
        assert!(k.satisfies_lower(&Bound::Included(key![5])));
        assert!(key![6, 0].satisfies_lower(&Bound::Excluded(key![5])));
    }

    #[test]
    fn display() {
        assert_eq!(key![1, Value::Null].to_string(), "(1, null)");
    }

    proptest! {
        #[test]
        fn order_matches_tuple_order(a in any::<(i32, i32)>(), b in any::<(i32, i32)>()) {
            let ka = key![a.0, a.1];
            let kb = key![b.0, b.1];
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        }

        #[test]
        fn prefix_is_never_greater(a in any::<i32>(), b in any::<i32>(), n in 0usize..3) {
            let k = key![a, b];
            prop_assert!(k.prefix(n) <= k);
            prop_assert!(k.starts_with(&k.prefix(n)));
        }
    }
}
