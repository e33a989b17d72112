//! Index definitions and their binding to the schema.
//!
//! A definition is parsed and type-checked once, when the index is created.
//! Field specs use the grammar `<property> [by key|by value]`; the suffix is
//! turned into a [`CollectionMode`] here and never re-parsed afterwards.

use crate::error::{CoreError, CoreResult};
use crate::index::CompositeKey;
use crate::record::Document;
use crate::schema::{PropertyType, Schema};
use crate::types::IndexId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const MISSING_LINKED_TYPE: &str = "Linked type was not provided. You should provide linked type \
     for embedded collections that are going to be indexed.";

/// How a collection-valued field contributes to keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionMode {
    /// Scalar field, or one entry per list/set element.
    None,
    /// One entry per map key.
    ByKey,
    /// One entry per map value.
    ByValue,
}

/// A parsed `<property> [by key|by value]` field spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Property name.
    pub name: String,
    /// Explicit collection mode, if a suffix was given.
    pub mode: Option<CollectionMode>,
}

impl FieldSpec {
    /// Parses a field spec.
    ///
    /// Exactly one token, or three tokens where the second is `by` and the
    /// third is `key` or `value`. Anything else is a schema error.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let illegal = || {
            CoreError::schema(format!(
                "Illegal field name format, should be '<property> [by key|value]' but was '{text}'"
            ))
        };
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            [name] => Ok(Self {
                name: (*name).to_string(),
                mode: None,
            }),
            [name, by, mode] if by.eq_ignore_ascii_case("by") => {
                let mode = if mode.eq_ignore_ascii_case("key") {
                    CollectionMode::ByKey
                } else if mode.eq_ignore_ascii_case("value") {
                    CollectionMode::ByValue
                } else {
                    return Err(illegal());
                };
                Ok(Self {
                    name: (*name).to_string(),
                    mode: Some(mode),
                })
            }
            _ => Err(illegal()),
        }
    }
}

/// Index algorithm and uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// Ordered, unique.
    Unique,
    /// Ordered, not unique.
    NotUnique,
    /// Hashed, unique.
    UniqueHash,
    /// Hashed, not unique.
    NotUniqueHash,
    /// Ordered key to record map; unique, never picked by the query planner.
    Dictionary,
    /// Hashed key to record map; unique, never picked by the query planner.
    DictionaryHash,
}

impl IndexType {
    const ALL: [IndexType; 6] = [
        Self::Unique,
        Self::NotUnique,
        Self::UniqueHash,
        Self::NotUniqueHash,
        Self::Dictionary,
        Self::DictionaryHash,
    ];

    /// Canonical type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unique => "UNIQUE",
            Self::NotUnique => "NOTUNIQUE",
            Self::UniqueHash => "UNIQUE_HASH_INDEX",
            Self::NotUniqueHash => "NOTUNIQUE_HASH_INDEX",
            Self::Dictionary => "DICTIONARY",
            Self::DictionaryHash => "DICTIONARY_HASH_INDEX",
        }
    }

    /// Parses a type name case-insensitively.
    pub fn parse(name: &str) -> CoreResult<Self> {
        let trimmed = name.trim();
        if let Some(t) = Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(trimmed))
        {
            return Ok(t);
        }
        let upper = trimmed.to_ascii_uppercase();
        if matches!(upper.as_str(), "PROXY" | "FULLTEXT" | "SPATIAL" | "LUCENE") {
            return Err(CoreError::unsupported(format!(
                "index type {upper} is not supported"
            )));
        }
        Err(CoreError::schema(format!("unknown index type '{name}'")))
    }

    /// Returns true if the index allows at most one record per key.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        !matches!(self, Self::NotUnique | Self::NotUniqueHash)
    }

    /// Returns true for hash-backed variants.
    #[must_use]
    pub const fn is_hashed(self) -> bool {
        matches!(
            self,
            Self::UniqueHash | Self::NotUniqueHash | Self::DictionaryHash
        )
    }

    /// Returns true for dictionary variants.
    #[must_use]
    pub const fn is_dictionary(self) -> bool {
        matches!(self, Self::Dictionary | Self::DictionaryHash)
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether records with a null in an indexed slot are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullPolicy {
    /// Null-bearing keys are stored.
    IncludeNulls,
    /// Null-bearing keys are skipped.
    IgnoreNulls,
}

impl NullPolicy {
    /// Maps the `ignoreNullValues` flag to a policy.
    #[must_use]
    pub const fn from_ignore_nulls(ignore: bool) -> Self {
        if ignore {
            Self::IgnoreNulls
        } else {
            Self::IncludeNulls
        }
    }

    /// Returns true for [`NullPolicy::IgnoreNulls`].
    #[must_use]
    pub const fn ignores_nulls(self) -> bool {
        matches!(self, Self::IgnoreNulls)
    }
}

/// Per-index creation metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexMetadata {
    /// `ignoreNullValues`; `None` when the key is absent.
    pub ignore_null_values: Option<bool>,
}

impl IndexMetadata {
    /// Metadata with no keys set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ignore_null_values: None,
        }
    }

    /// Sets `ignoreNullValues`.
    #[must_use]
    pub const fn ignore_null_values(mut self, value: bool) -> Self {
        self.ignore_null_values = Some(value);
        self
    }
}

/// One bound field of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    /// Property name.
    pub name: String,
    /// Declared property type.
    pub property_type: PropertyType,
    /// Type of the key component this field produces.
    pub key_type: PropertyType,
    /// Collection mode.
    pub mode: CollectionMode,
}

impl IndexField {
    /// Returns true if this field can contribute more than one key.
    #[must_use]
    pub const fn is_multi_valued(&self) -> bool {
        self.property_type.is_collection()
    }

    /// Renders the field back into spec syntax.
    #[must_use]
    pub fn spec(&self) -> String {
        match self.mode {
            CollectionMode::None => self.name.clone(),
            CollectionMode::ByKey => format!("{} by key", self.name),
            CollectionMode::ByValue => format!("{} by value", self.name),
        }
    }

    fn bind(schema: &Schema, class: &str, spec: &FieldSpec) -> CoreResult<Self> {
        let property = schema.property(class, &spec.name)?.ok_or_else(|| {
            CoreError::schema(format!(
                "Property '{}' is not declared in class '{class}'",
                spec.name
            ))
        })?;
        let ty = property.property_type;
        let (key_type, mode) = if ty.is_map() {
            match spec.mode.unwrap_or(CollectionMode::ByKey) {
                CollectionMode::ByValue if ty == PropertyType::LinkMap => {
                    (PropertyType::Link, CollectionMode::ByValue)
                }
                CollectionMode::ByValue => (
                    property
                        .linked_type
                        .ok_or_else(|| CoreError::schema(MISSING_LINKED_TYPE))?,
                    CollectionMode::ByValue,
                ),
                _ => (PropertyType::String, CollectionMode::ByKey),
            }
        } else if spec.mode.is_some() {
            return Err(CoreError::schema(format!(
                "'by key|value' can only be used with map properties, '{}' is {ty}",
                spec.name
            )));
        } else if ty.is_link_collection() {
            (PropertyType::Link, CollectionMode::None)
        } else if ty.is_collection() {
            (
                property
                    .linked_type
                    .ok_or_else(|| CoreError::schema(MISSING_LINKED_TYPE))?,
                CollectionMode::None,
            )
        } else {
            (ty, CollectionMode::None)
        };
        Ok(Self {
            name: spec.name.clone(),
            property_type: ty,
            key_type,
            mode,
        })
    }

    /// Expands a multi-valued field into coerced elements.
    fn elements(&self, raw: &Value) -> CoreResult<Vec<Value>> {
        let coerce = |v: &Value| v.coerce_to(self.key_type);
        match raw {
            Value::Null => Ok(Vec::new()),
            Value::Map(entries) if self.property_type.is_map() => match self.mode {
                CollectionMode::ByValue => entries.values().map(coerce).collect(),
                _ => Ok(entries.keys().map(|k| Value::Text(k.clone())).collect()),
            },
            Value::List(items) if !self.property_type.is_map() => items.iter().map(coerce).collect(),
            Value::Set(items) if !self.property_type.is_map() => items.iter().map(coerce).collect(),
            v if v.is_collection() => Err(CoreError::type_mismatch(
                self.property_type.name(),
                v.type_name(),
            )),
            scalar => Ok(vec![coerce(scalar)?]),
        }
    }
}

/// A bound index definition.
///
/// Immutable once created; changing the shape means dropping and recreating
/// the index. A property type change rebinds the same fields to new key types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Registry id.
    pub id: IndexId,
    /// Index name, unique per database (case-insensitive).
    pub name: String,
    /// Owning class.
    pub class: String,
    /// Algorithm and uniqueness.
    pub index_type: IndexType,
    /// Fields in declaration order.
    pub fields: Vec<IndexField>,
    /// Null handling.
    pub null_policy: NullPolicy,
}

impl IndexDefinition {
    /// Parses and binds field specs against the schema.
    ///
    /// # Errors
    ///
    /// [`CoreError::Schema`] if `specs` is empty, names an undeclared
    /// property, repeats a property, misuses the `by key|value` suffix,
    /// indexes an embedded collection without a linked type, or contains
    /// more than one collection field. [`CoreError::NotFound`] if the class
    /// does not exist.
    pub fn bind(
        schema: &Schema,
        id: IndexId,
        name: &str,
        class: &str,
        index_type: IndexType,
        specs: &[&str],
        null_policy: NullPolicy,
    ) -> CoreResult<Self> {
        let class = schema.canonical_name(class)?;
        if name.trim().is_empty() {
            return Err(CoreError::schema("index name must not be empty"));
        }
        if specs.is_empty() {
            return Err(CoreError::schema(format!(
                "List of fields to index cannot be empty (index '{name}')"
            )));
        }
        let mut fields: Vec<IndexField> = Vec::with_capacity(specs.len());
        for text in specs {
            let spec = FieldSpec::parse(text)?;
            if fields.iter().any(|f| f.name == spec.name) {
                return Err(CoreError::schema(format!(
                    "property '{}' appears twice in index '{name}'",
                    spec.name
                )));
            }
            fields.push(IndexField::bind(schema, &class, &spec)?);
        }
        if fields.iter().filter(|f| f.is_multi_valued()).count() > 1 {
            return Err(CoreError::schema(
                "Composite key cannot contain more than one collection item",
            ));
        }
        Ok(Self {
            id,
            name: name.trim().to_string(),
            class,
            index_type,
            fields,
            null_policy,
        })
    }

    /// Rebinds the same fields against the current schema.
    pub fn rebind(&self, schema: &Schema) -> CoreResult<Self> {
        let specs: Vec<String> = self.fields.iter().map(IndexField::spec).collect();
        let refs: Vec<&str> = specs.iter().map(String::as_str).collect();
        Self::bind(
            schema,
            self.id,
            &self.name,
            &self.class,
            self.index_type,
            &refs,
            self.null_policy,
        )
    }

    /// Returns the field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns true if the definition indexes `property`.
    #[must_use]
    pub fn references(&self, property: &str) -> bool {
        self.fields.iter().any(|f| f.name == property)
    }

    /// Returns the slot of the multi-valued field, if any.
    #[must_use]
    pub fn multi_valued_slot(&self) -> Option<usize> {
        self.fields.iter().position(IndexField::is_multi_valued)
    }

    /// Computes every key a record contributes to this index.
    ///
    /// The multi-valued slot, if any, is expanded to one key per distinct
    /// element with every other slot held fixed. An empty or missing
    /// collection yields one key with `Null` in that slot. Under
    /// [`NullPolicy::IgnoreNulls`] keys containing a null are dropped.
    pub fn derive_keys(&self, doc: &Document) -> CoreResult<BTreeSet<CompositeKey>> {
        let mut fixed = Vec::with_capacity(self.fields.len());
        let mut expansion = None;
        for (slot, field) in self.fields.iter().enumerate() {
            let raw = doc.get(&field.name).unwrap_or(&Value::Null);
            if field.is_multi_valued() {
                expansion = Some((slot, field.elements(raw)?));
                fixed.push(Value::Null);
            } else {
                fixed.push(raw.coerce_to(field.key_type)?);
            }
        }

        let mut keys = BTreeSet::new();
        match expansion {
            Some((slot, elements)) if !elements.is_empty() => {
                for element in elements {
                    let mut components = fixed.clone();
                    components[slot] = element;
                    keys.insert(CompositeKey::new(components));
                }
            }
            _ => {
                keys.insert(CompositeKey::new(fixed));
            }
        }
        if self.null_policy.ignores_nulls() {
            keys.retain(|k| !k.has_null());
        }
        Ok(keys)
    }
}
