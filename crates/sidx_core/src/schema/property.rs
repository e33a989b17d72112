//! Property declarations.

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a class property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// `true` / `false`.
    Boolean,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    /// Single precision float (stored as `f64`).
    Float,
    /// Double precision float.
    Double,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Binary,
    /// Calendar date.
    Date,
    /// Timestamp.
    DateTime,
    /// Reference to a record.
    Link,
    /// List of embedded values.
    EmbeddedList,
    /// Set of embedded values.
    EmbeddedSet,
    /// Map of embedded values.
    EmbeddedMap,
    /// List of links.
    LinkList,
    /// Set of links.
    LinkSet,
    /// Map of links.
    LinkMap,
    /// Unordered bag of links.
    LinkBag,
}

impl PropertyType {
    const ALL: [PropertyType; 17] = [
        Self::Boolean,
        Self::Integer,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::String,
        Self::Binary,
        Self::Date,
        Self::DateTime,
        Self::Link,
        Self::EmbeddedList,
        Self::EmbeddedSet,
        Self::EmbeddedMap,
        Self::LinkList,
        Self::LinkSet,
        Self::LinkMap,
        Self::LinkBag,
    ];

    /// Upper-case type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Long => "LONG",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::Binary => "BINARY",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Link => "LINK",
            Self::EmbeddedList => "EMBEDDEDLIST",
            Self::EmbeddedSet => "EMBEDDEDSET",
            Self::EmbeddedMap => "EMBEDDEDMAP",
            Self::LinkList => "LINKLIST",
            Self::LinkSet => "LINKSET",
            Self::LinkMap => "LINKMAP",
            Self::LinkBag => "LINKBAG",
        }
    }

    /// Parses a type name case-insensitively.
    pub fn parse(name: &str) -> CoreResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| CoreError::schema(format!("unknown property type '{name}'")))
    }

    /// Returns true for every list, set, map and bag type.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        !self.is_scalar()
    }

    /// Returns true for types that hold a single value.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Integer
                | Self::Long
                | Self::Float
                | Self::Double
                | Self::String
                | Self::Binary
                | Self::Date
                | Self::DateTime
                | Self::Link
        )
    }

    /// Returns true for map types.
    #[must_use]
    pub const fn is_map(self) -> bool {
        matches!(self, Self::EmbeddedMap | Self::LinkMap)
    }

    /// Returns true for collections whose elements are links.
    #[must_use]
    pub const fn is_link_collection(self) -> bool {
        matches!(
            self,
            Self::LinkList | Self::LinkSet | Self::LinkMap | Self::LinkBag
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A declared class property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property name (case-sensitive).
    pub name: String,
    /// Declared type.
    pub property_type: PropertyType,
    /// Element type of an embedded collection, if declared.
    pub linked_type: Option<PropertyType>,
    /// Class a link property points to, if declared.
    #[serde(default)]
    pub linked_class: Option<String>,
}

impl Property {
    /// Creates a property without a linked type.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            linked_type: None,
            linked_class: None,
        }
    }

    /// Sets the element type of an embedded collection.
    #[must_use]
    pub fn with_linked_type(mut self, linked: PropertyType) -> Self {
        self.linked_type = Some(linked);
        self
    }

    /// Declares the class a link property points to.
    #[must_use]
    pub fn with_linked_class(mut self, class: impl Into<String>) -> Self {
        self.linked_class = Some(class.into());
        self
    }

    /// Returns the linked class if links can be followed through this
    /// property to single records.
    #[must_use]
    pub fn link_target(&self) -> Option<&str> {
        let ty = self.property_type;
        if ty == PropertyType::Link || (ty.is_link_collection() && !ty.is_map()) {
            self.linked_class.as_deref()
        } else {
            None
        }
    }

    /// Checks the declaration itself.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() || self.name.contains(char::is_whitespace) {
            return Err(CoreError::schema(format!(
                "invalid property name '{}'",
                self.name
            )));
        }
        let links = self.property_type == PropertyType::Link || self.property_type.is_link_collection();
        if self.linked_class.is_some() && !links {
            return Err(CoreError::schema(format!(
                "property '{}' of type {} cannot declare a linked class",
                self.name, self.property_type
            )));
        }
        match self.linked_type {
            Some(linked) if self.property_type.is_scalar() => Err(CoreError::schema(format!(
                "property '{}' of type {} cannot declare linked type {linked}",
                self.name, self.property_type
            ))),
            Some(linked) if linked.is_collection() => Err(CoreError::schema(format!(
                "linked type of property '{}' must be a scalar type, got {linked}",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    /// Checks that a stored value fits this declaration.
    ///
    /// Scalars must coerce to the declared type; collections must be of the
    /// matching shape and, when a linked type is declared, every element
    /// must coerce to it.
    pub fn check_value(&self, value: &Value) -> CoreResult<()> {
        use PropertyType as T;
        if value.is_null() {
            return Ok(());
        }
        if self.property_type.is_scalar() {
            return self.property_type_check(value);
        }
        let elements: Vec<&Value> = match (self.property_type, value) {
            (T::EmbeddedList | T::LinkList | T::LinkBag, Value::List(items)) => items.iter().collect(),
            (T::EmbeddedSet | T::LinkSet | T::LinkBag, Value::Set(items))
            | (T::EmbeddedList | T::LinkList, Value::Set(items)) => items.iter().collect(),
            (T::EmbeddedSet | T::LinkSet, Value::List(items)) => items.iter().collect(),
            (T::EmbeddedMap | T::LinkMap, Value::Map(entries)) => entries.values().collect(),
            _ => {
                return Err(CoreError::type_mismatch(
                    self.property_type.name(),
                    value.type_name(),
                ))
            }
        };
        let element_type = if self.property_type.is_link_collection() {
            Some(T::Link)
        } else {
            self.linked_type
        };
        if let Some(ty) = element_type {
            for element in elements {
                element.coerce_to(ty)?;
            }
        }
        Ok(())
    }

    fn property_type_check(&self, value: &Value) -> CoreResult<()> {
        value.coerce_to(self.property_type).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(PropertyType::parse("embeddedList").unwrap(), PropertyType::EmbeddedList);
        assert_eq!(PropertyType::parse(" INTEGER ").unwrap(), PropertyType::Integer);
        assert!(PropertyType::parse("proxy").is_err());
    }

    #[test]
    fn collection_classification() {
        assert!(PropertyType::LinkBag.is_link_collection());
        assert!(PropertyType::EmbeddedMap.is_map());
        assert!(!PropertyType::Link.is_collection());
    }

    #[test]
    fn linked_type_must_be_scalar() {
        let nested = Property::new("tags", PropertyType::EmbeddedList)
            .with_linked_type(PropertyType::EmbeddedSet);
        assert!(nested.validate().is_err());

        let on_scalar =
            Property::new("x", PropertyType::Integer).with_linked_type(PropertyType::Integer);
        assert!(on_scalar.validate().is_err());

        let ok = Property::new("tags", PropertyType::EmbeddedList)
            .with_linked_type(PropertyType::Integer);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn check_value_shapes() {
        let tags = Property::new("tags", PropertyType::EmbeddedList)
            .with_linked_type(PropertyType::Integer);
        assert!(tags.check_value(&Value::list([1, 2])).is_ok());
        assert!(tags.check_value(&Value::list(["a"])).is_err());
        assert!(tags.check_value(&Value::from(1)).is_err());
        assert!(tags.check_value(&Value::Null).is_ok());

        let x = Property::new("x", PropertyType::Long);
        assert!(x.check_value(&Value::from(5)).is_ok());
        assert!(x.check_value(&Value::from("5")).is_err());
    }
}
