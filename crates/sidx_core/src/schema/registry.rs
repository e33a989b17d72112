//! Class registry with single and multiple inheritance.

use crate::error::{CoreError, CoreResult};
use crate::schema::{Property, PropertyType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// A schema class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaClass {
    name: String,
    superclasses: Vec<String>,
    properties: BTreeMap<String, Property>,
}

impl SchemaClass {
    /// Returns the class name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the direct superclasses.
    #[must_use]
    pub fn superclasses(&self) -> &[String] {
        &self.superclasses
    }

    /// Returns a property declared directly on this class.
    #[must_use]
    pub fn own_property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Iterates over properties declared directly on this class.
    pub fn own_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }
}

/// Registry of classes and their properties.
///
/// Class names are case-insensitive; property names are case-sensitive.
#[derive(Debug, Default)]
pub struct Schema {
    classes: RwLock<BTreeMap<String, SchemaClass>>,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a class extending the given superclasses.
    pub fn create_class(&self, name: &str, superclasses: &[&str]) -> CoreResult<()> {
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(CoreError::schema(format!("invalid class name '{name}'")));
        }
        let mut classes = self.classes.write();
        if classes.contains_key(&fold(name)) {
            return Err(CoreError::DuplicateName {
                kind: "Class",
                name: name.to_string(),
            });
        }
        let mut supers = Vec::with_capacity(superclasses.len());
        for sup in superclasses {
            let class = classes
                .get(&fold(sup))
                .ok_or_else(|| CoreError::not_found(format!("superclass '{sup}'")))?;
            supers.push(class.name.clone());
        }
        classes.insert(
            fold(name),
            SchemaClass {
                name: name.to_string(),
                superclasses: supers,
                properties: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Returns true if the class exists.
    #[must_use]
    pub fn exists(&self, class: &str) -> bool {
        self.classes.read().contains_key(&fold(class))
    }

    /// Returns a copy of a class.
    pub fn class(&self, class: &str) -> CoreResult<SchemaClass> {
        self.classes
            .read()
            .get(&fold(class))
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("class '{class}'")))
    }

    /// Returns the class name as it was declared.
    pub fn canonical_name(&self, class: &str) -> CoreResult<String> {
        self.class(class).map(|c| c.name)
    }

    /// Returns all class names as declared.
    #[must_use]
    pub fn class_names(&self) -> Vec<String> {
        self.classes.read().values().map(|c| c.name.clone()).collect()
    }

    /// Declares a property on a class.
    pub fn create_property(&self, class: &str, property: Property) -> CoreResult<()> {
        property.validate()?;
        if let Some(linked) = &property.linked_class {
            if !self.exists(linked) {
                return Err(CoreError::not_found(format!("class '{linked}'")));
            }
        }
        if self.property(class, &property.name)?.is_some() {
            return Err(CoreError::DuplicateName {
                kind: "Property",
                name: format!("{class}.{}", property.name),
            });
        }
        let mut classes = self.classes.write();
        let target = classes
            .get_mut(&fold(class))
            .ok_or_else(|| CoreError::not_found(format!("class '{class}'")))?;
        target.properties.insert(property.name.clone(), property);
        Ok(())
    }

    /// Looks up a property on the class or any ancestor.
    pub fn property(&self, class: &str, name: &str) -> CoreResult<Option<Property>> {
        let classes = self.classes.read();
        for ancestor in Self::walk_up(&classes, class)? {
            if let Some(p) = classes
                .get(&fold(&ancestor))
                .and_then(|c| c.properties.get(name))
            {
                return Ok(Some(p.clone()));
            }
        }
        Ok(None)
    }

    /// Removes a property declared directly on `class`.
    pub fn drop_property(&self, class: &str, name: &str) -> CoreResult<Property> {
        let mut classes = self.classes.write();
        let target = classes
            .get_mut(&fold(class))
            .ok_or_else(|| CoreError::not_found(format!("class '{class}'")))?;
        target
            .properties
            .remove(name)
            .ok_or_else(|| CoreError::not_found(format!("property '{class}.{name}'")))
    }

    /// Changes the declared type of a property, returning the old declaration.
    pub fn alter_property_type(
        &self,
        class: &str,
        name: &str,
        property_type: PropertyType,
        linked_type: Option<PropertyType>,
    ) -> CoreResult<Property> {
        let mut classes = self.classes.write();
        let target = classes
            .get_mut(&fold(class))
            .ok_or_else(|| CoreError::not_found(format!("class '{class}'")))?;
        let slot = target
            .properties
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found(format!("property '{class}.{name}'")))?;
        let mut replacement = Property {
            name: name.to_string(),
            property_type,
            linked_type,
            linked_class: slot.linked_class.clone(),
        };
        if replacement.validate().is_err() {
            // A link class does not survive a change to a non-link type.
            replacement.linked_class = None;
        }
        replacement.validate()?;
        Ok(std::mem::replace(slot, replacement))
    }

    /// Returns the class followed by all of its ancestors, nearest first.
    pub fn ancestors(&self, class: &str) -> CoreResult<Vec<String>> {
        Self::walk_up(&self.classes.read(), class)
    }

    /// Returns the class followed by every class that inherits from it.
    pub fn descendants(&self, class: &str) -> CoreResult<Vec<String>> {
        let classes = self.classes.read();
        let root = classes
            .get(&fold(class))
            .ok_or_else(|| CoreError::not_found(format!("class '{class}'")))?
            .name
            .clone();
        let mut out = vec![root.clone()];
        for candidate in classes.values() {
            if candidate.name == root {
                continue;
            }
            let line = Self::walk_up(&classes, &candidate.name)?;
            if line.iter().any(|a| a.eq_ignore_ascii_case(&root)) {
                out.push(candidate.name.clone());
            }
        }
        Ok(out)
    }

    /// Returns true if `class` is `ancestor` or inherits from it.
    ///
    /// Unknown classes are never subclasses of anything.
    #[must_use]
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class)
            .map(|line| line.iter().any(|a| a.eq_ignore_ascii_case(ancestor)))
            .unwrap_or(false)
    }

    fn walk_up(classes: &BTreeMap<String, SchemaClass>, class: &str) -> CoreResult<Vec<String>> {
        let start = classes
            .get(&fold(class))
            .ok_or_else(|| CoreError::not_found(format!("class '{class}'")))?;
        let mut out = Vec::new();
        let mut queue = VecDeque::from([start.name.clone()]);
        while let Some(next) = queue.pop_front() {
            if out.iter().any(|seen: &String| seen.eq_ignore_ascii_case(&next)) {
                continue;
            }
            if let Some(c) = classes.get(&fold(&next)) {
                queue.extend(c.superclasses.iter().cloned());
            }
            out.push(next);
        }
        Ok(out)
    }

    pub(crate) fn exported(&self) -> Vec<SchemaClass> {
        self.classes.read().values().cloned().collect()
    }

    pub(crate) fn load(&self, classes: Vec<SchemaClass>) {
        let mut map = self.classes.write();
        map.clear();
        for c in classes {
            map.insert(fold(&c.name), c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> Schema {
        let schema = Schema::new();
        schema.create_class("Animal", &[]).unwrap();
        schema.create_class("Dog", &["animal"]).unwrap();
        schema.create_class("Cat", &["Animal"]).unwrap();
        schema
            .create_property("Animal", Property::new("name", PropertyType::String))
            .unwrap();
        schema
    }

    #[test]
    fn class_names_are_case_insensitive() {
        let schema = hierarchy();
        assert!(schema.exists("DOG"));
        assert_eq!(schema.canonical_name("dog").unwrap(), "Dog");
        let err = schema.create_class("dog", &[]).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateName { .. }));
    }

    #[test]
    fn properties_are_inherited() {
        let schema = hierarchy();
        let p = schema.property("Dog", "name").unwrap().unwrap();
        assert_eq!(p.property_type, PropertyType::String);
        assert!(schema.property("Dog", "Name").unwrap().is_none());

        let dup = schema.create_property("Cat", Property::new("name", PropertyType::String));
        assert!(matches!(dup, Err(CoreError::DuplicateName { .. })));
    }

    #[test]
    fn ancestry_queries() {
        let schema = hierarchy();
        assert_eq!(schema.ancestors("Dog").unwrap(), vec!["Dog", "Animal"]);
        let mut desc = schema.descendants("animal").unwrap();
        desc.sort();
        assert_eq!(desc, vec!["Animal", "Cat", "Dog"]);
        assert!(schema.is_subclass_of("dog", "ANIMAL"));
        assert!(!schema.is_subclass_of("Animal", "Dog"));
        assert!(!schema.is_subclass_of("Unknown", "Animal"));
    }

    #[test]
    fn drop_and_alter_property() {
        let schema = hierarchy();
        let old = schema
            .alter_property_type("Animal", "name", PropertyType::Binary, None)
            .unwrap();
        assert_eq!(old.property_type, PropertyType::String);
        schema.drop_property("Animal", "name").unwrap();
        assert!(schema.property("Dog", "name").unwrap().is_none());
        assert!(matches!(
            schema.drop_property("Animal", "name"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_superclass_is_rejected() {
        let schema = Schema::new();
        assert!(matches!(
            schema.create_class("A", &["Missing"]),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn linked_class_must_exist_and_follows_link_types() {
        let schema = hierarchy();
        schema.create_class("Owner", &[]).unwrap();
        assert!(matches!(
            schema.create_property(
                "Owner",
                Property::new("pet", PropertyType::Link).with_linked_class("Fish")
            ),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            schema.create_property(
                "Owner",
                Property::new("pet", PropertyType::String).with_linked_class("Dog")
            ),
            Err(CoreError::Schema { .. })
        ));
        schema
            .create_property(
                "Owner",
                Property::new("pet", PropertyType::Link).with_linked_class("Dog"),
            )
            .unwrap();
        let pet = schema.property("Owner", "pet").unwrap().unwrap();
        assert_eq!(pet.link_target(), Some("Dog"));

        schema
            .alter_property_type("Owner", "pet", PropertyType::LinkList, None)
            .unwrap();
        let pets = schema.property("Owner", "pet").unwrap().unwrap();
        assert_eq!(pets.link_target(), Some("Dog"));

        schema
            .alter_property_type("Owner", "pet", PropertyType::String, None)
            .unwrap();
        let name = schema.property("Owner", "pet").unwrap().unwrap();
        assert_eq!(name.linked_class, None);
        assert_eq!(name.link_target(), None);
    }
}
