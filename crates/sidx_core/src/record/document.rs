//! Owned property snapshots.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record's class and properties at one point in time.
///
/// The index engine never holds documents; it receives them as before/after
/// snapshots on save and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    class: String,
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Creates an empty document of the given class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    pub(crate) fn set_class(&mut self, class: impl Into<String>) {
        self.class = class.into();
    }

    /// Returns a field value, `None` when the field is absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Removes a field entirely.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Iterates over fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_accessors() {
        let mut doc = Document::new("Person").with("name", "ada").with("age", 36);
        assert_eq!(doc.class(), "Person");
        assert_eq!(doc.get("age"), Some(&Value::Integer(36)));

        assert_eq!(doc.set("age", 37), Some(Value::Integer(36)));
        assert_eq!(doc.remove("name"), Some(Value::from("ada")));
        assert!(doc.get("name").is_none());
        assert_eq!(doc.fields().count(), 1);
    }
}
