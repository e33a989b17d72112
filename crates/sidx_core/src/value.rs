//! Property values and their total order.
//!
//! Every indexed slot holds a [`Value`]. The order defined here is the
//! comparator used by composite keys: `Null` sorts before everything, values
//! of different kinds order by kind, values of the same kind order naturally.
//! Floats order by [`f64::total_cmp`], so the order is total and comparison
//! never fails.

use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;
use crate::schema::PropertyType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// A property value as seen by the index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Absent or explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer (covers `INTEGER` and `LONG`).
    Integer(i64),
    /// Floating point (covers `FLOAT` and `DOUBLE`).
    Float(f64),
    /// UTF-8 string.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i32),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    /// Reference to another record.
    Link(RecordId),
    /// Ordered collection.
    List(Vec<Value>),
    /// Collection without duplicates.
    Set(BTreeSet<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a list value.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a set value.
    pub fn set<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Set(items.into_iter().map(Into::into).collect())
    }

    /// Builds a map value.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for lists, sets and maps.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map(_))
    }

    /// Short name of the value's kind, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
            Self::Binary(_) => "binary",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::Link(_) => "link",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Integer(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
            Self::Binary(_) => 5,
            Self::Date(_) => 6,
            Self::DateTime(_) => 7,
            Self::Link(_) => 8,
            Self::List(_) => 9,
            Self::Set(_) => 10,
            Self::Map(_) => 11,
        }
    }

    /// Converts a scalar to the representation of a declared key type.
    ///
    /// `Null` passes through unchanged. Widening conversions (integer to
    /// float, date to datetime) are applied; anything else is a
    /// [`CoreError::TypeMismatch`].
    pub fn coerce_to(&self, ty: PropertyType) -> CoreResult<Value> {
        use PropertyType as T;
        match (ty, self) {
            (_, Self::Null) => Ok(Self::Null),
            (T::Boolean, Self::Bool(_))
            | (T::Long, Self::Integer(_))
            | (T::Float | T::Double, Self::Float(_))
            | (T::String, Self::Text(_))
            | (T::Binary, Self::Binary(_))
            | (T::Date, Self::Date(_))
            | (T::DateTime, Self::DateTime(_))
            | (T::Link, Self::Link(_)) => Ok(self.clone()),
            (T::Integer, Self::Integer(i)) if i32::try_from(*i).is_ok() => Ok(self.clone()),
            (T::Float | T::Double, Self::Integer(i)) => Ok(Self::Float(*i as f64)),
            (T::DateTime, Self::Date(days)) => Ok(Self::DateTime(i64::from(*days) * MILLIS_PER_DAY)),
            _ => Err(CoreError::type_mismatch(ty.name(), self.type_name())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Link(a), Self::Link(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Integer(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Text(s) => s.hash(state),
            Self::Binary(b) => b.hash(state),
            Self::Date(d) => d.hash(state),
            Self::DateTime(t) => t.hash(state),
            Self::Link(r) => r.hash(state),
            Self::List(items) => items.hash(state),
            Self::Set(items) => {
                for item in items {
                    item.hash(state);
                }
            }
            Self::Map(entries) => {
                for (k, v) in entries {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "date({d})"),
            Self::DateTime(t) => write!(f, "datetime({t})"),
            Self::Link(r) => write!(f, "{r}"),
            Self::List(items) => write_seq(f, "[", items.iter(), "]"),
            Self::Set(items) => write_seq(f, "{", items.iter(), "}"),
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = &'a Value>,
    close: &str,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "{close}")
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<RecordId> for Value {
    fn from(v: RecordId) -> Self {
        Self::Link(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn null_sorts_first() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Null < Value::Integer(i64::MIN));
        assert!(Value::Null < Value::Text(String::new()));
    }

    #[test]
    fn kinds_order_by_rank() {
        assert!(Value::Integer(100) < Value::Text("a".into()));
        assert!(Value::Text("z".into()) < Value::Link(RecordId::from_bytes([0; 16])));
    }

    #[test]
    fn floats_have_total_order() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert!(Value::Float(1.0) < Value::Float(2.5));
    }

    #[test]
    fn coerce_widens_numbers_and_dates() {
        let v = Value::Integer(3).coerce_to(PropertyType::Double).unwrap();
        assert_eq!(v, Value::Float(3.0));
        let dt = Value::Date(1).coerce_to(PropertyType::DateTime).unwrap();
        assert_eq!(dt, Value::DateTime(MILLIS_PER_DAY));
    }

    #[test]
    fn coerce_rejects_mismatch() {
        let err = Value::Text("1".into())
            .coerce_to(PropertyType::Integer)
            .unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));

        let too_big = Value::Integer(i64::from(i32::MAX) + 1).coerce_to(PropertyType::Integer);
        assert!(too_big.is_err());
        assert!(Value::Null.coerce_to(PropertyType::Integer).unwrap().is_null());
    }

    #[test]
    fn display_renders_nested_values() {
        let v = Value::list([1, 2]);
        assert_eq!(v.to_string(), "[1, 2]");
        assert_eq!(Value::from("x").to_string(), "'x'");
        assert_eq!(Value::from(None::<i32>).to_string(), "null");
    }

    proptest! {
        #[test]
        fn integer_order_matches_i64(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(Value::Integer(a).cmp(&Value::Integer(b)), a.cmp(&b));
        }

        #[test]
        fn order_is_antisymmetric(a in any::<i32>(), b in ".{0,4}") {
            let x = Value::from(a);
            let y = Value::from(b);
            prop_assert_eq!(x.cmp(&y), y.cmp(&x).reverse());
        }
    }
}
