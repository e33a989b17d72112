//! Query-time index selection.
//!
//! An index is usable for a predicate when the predicate's field set is
//! exactly the set of the index's first `|P|` declared fields. `{a}`,
//! `{a, b}` and `{b, a}` can use `[a, b, c]`; `{b}`, `{a, c}` and
//! `{a, b, c, d}` cannot.

use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDefinition, IndexManager, IndexState};
use crate::types::IndexId;
use std::cmp::Reverse;
use std::collections::BTreeSet;

/// Predicate operator the planner wants to serve from an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `field = value`
    Eq,
    /// `field IN [...]`
    In,
    /// `field IS NULL`
    IsNull,
    /// `field < value`
    Lt,
    /// `field <= value`
    Le,
    /// `field > value`
    Gt,
    /// `field >= value`
    Ge,
    /// `field BETWEEN a AND b`
    Between,
}

impl Operator {
    /// Returns true for operators a hash index can serve.
    #[must_use]
    pub const fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::In | Self::IsNull)
    }

    /// Returns true for operators that need key order.
    #[must_use]
    pub const fn is_range(self) -> bool {
        !self.is_equality()
    }
}

/// A chosen index and how it covers the predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    /// Index name.
    pub index: String,
    /// Index id.
    pub index_id: IndexId,
    /// The queried class, as declared.
    pub class: String,
    /// Number of leading index fields the predicate binds.
    pub covered_fields: usize,
    /// True if the predicate binds every index field.
    pub full_match: bool,
    /// True if the index belongs to a strict ancestor of the queried class;
    /// its results then include sibling classes and must be filtered.
    pub requires_class_filter: bool,
}

/// Indexes that answer a predicate on a property reached through links,
/// such as `address.city` on `Person`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChain {
    /// One index per link hop, keyed by the link, from the queried class
    /// outwards.
    pub links: Vec<IndexPlan>,
    /// Index on the last property, in the class the final link points to.
    pub target: IndexPlan,
}

/// Chooses indexes for predicates.
#[derive(Debug, Clone, Copy)]
pub struct IndexSelector<'a> {
    manager: &'a IndexManager,
}

/// Returns the covered prefix length if `predicate` is exactly the set of
/// the first `predicate.len()` fields.
fn covered_prefix(definition: &IndexDefinition, predicate: &BTreeSet<&str>) -> Option<usize> {
    let n = predicate.len();
    if n == 0 || n > definition.fields.len() {
        return None;
    }
    let leading: BTreeSet<&str> = definition.field_names().take(n).collect();
    (leading == *predicate).then_some(n)
}

impl<'a> IndexSelector<'a> {
    /// Creates a selector over a registry.
    #[must_use]
    pub fn new(manager: &'a IndexManager) -> Self {
        Self { manager }
    }

    /// Returns every usable index, best first.
    pub fn usable_indexes(
        &self,
        class: &str,
        fields: &[&str],
        operator: Operator,
    ) -> CoreResult<Vec<IndexPlan>> {
        let class = self.manager.schema().canonical_name(class)?;
        let predicate: BTreeSet<&str> = fields.iter().map(|f| f.trim()).collect();

        let mut ranked = Vec::new();
        for handle in self.manager.class_involved_indexes(&class)? {
            if handle.state() != IndexState::Active {
                continue;
            }
            let def = handle.definition();
            if def.index_type.is_dictionary() {
                continue;
            }
            let Some(covered) = covered_prefix(&def, &predicate) else {
                continue;
            };
            let full_match = covered == def.fields.len();
            if def.index_type.is_hashed() && !(full_match && operator.is_equality()) {
                continue;
            }
            if def.null_policy.ignores_nulls() && (!full_match || operator == Operator::IsNull) {
                continue;
            }
            let plan = IndexPlan {
                index: def.name.clone(),
                index_id: def.id,
                class: class.clone(),
                covered_fields: covered,
                full_match,
                requires_class_filter: !def.class.eq_ignore_ascii_case(&class),
            };
            let rank = (
                Reverse(covered),
                Reverse(full_match),
                Reverse(def.index_type.is_unique()),
                def.index_type.is_hashed(),
                def.fields.len(),
                def.name.to_ascii_lowercase(),
            );
            ranked.push((rank, plan));
        }
        ranked.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ranked.into_iter().map(|(_, plan)| plan).collect())
    }

    /// Selects the best index for a predicate, if any is usable.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`](crate::error::CoreError::NotFound) if the
    /// class does not exist.
    pub fn select_for(
        &self,
        class: &str,
        fields: &[&str],
        operator: Operator,
    ) -> CoreResult<Option<IndexPlan>> {
        Ok(self
            .usable_indexes(class, fields, operator)?
            .into_iter()
            .next())
    }

    /// Selects an index chain for `path`, a dotted property path split into
    /// its names.
    ///
    /// Every name but the last must be a link property that declares its
    /// linked class and has an index able to look records up by link. The
    /// last name is served by the best index for `operator` on the class the
    /// path ends in. Returns `None` when any step has no usable index.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`](crate::error::CoreError::InvalidOperation)
    /// if `path` has no link hop, [`CoreError::NotFound`](crate::error::CoreError::NotFound)
    /// if the class does not exist.
    pub fn select_chain(
        &self,
        class: &str,
        path: &[&str],
        operator: Operator,
    ) -> CoreResult<Option<IndexChain>> {
        let Some((last, hops)) = path.split_last().filter(|(_, hops)| !hops.is_empty()) else {
            return Err(CoreError::invalid_operation(format!(
                "property path '{}' does not cross a link",
                path.join(".")
            )));
        };
        let schema = self.manager.schema();
        let mut current = schema.canonical_name(class)?;
        let mut links = Vec::with_capacity(hops.len());
        for hop in hops {
            let Some(property) = schema.property(&current, hop)? else {
                return Ok(None);
            };
            let Some(next) = property.link_target() else {
                return Ok(None);
            };
            let Some(plan) = self.select_for(&current, &[hop], Operator::In)? else {
                return Ok(None);
            };
            links.push(plan);
            current = schema.canonical_name(next)?;
        }
        Ok(self
            .select_for(&current, &[last], operator)?
            .map(|target| IndexChain { links, target }))
    }

    /// Returns true if some index can serve an equality on `fields`.
    pub fn are_indexed(&self, class: &str, fields: &[&str]) -> CoreResult<bool> {
        Ok(self.select_for(class, fields, Operator::Eq)?.is_some())
    }
}
