//! # Type Registry
//!
//! Type definitions and the lookups the write path depends on: resolution by
//! guid or name, "is-a" queries over the super-type chain, and the effective
//! attribute schema of a type (own attributes plus inherited ones).
//!
//! The registry is loaded once and shared read-only (`Arc<dyn TypeRegistry>`);
//! nothing in the core mutates it.

use crate::primitives::MAX_TYPE_LINEAGE;
use crate::types::properties::{CollectionKind, PrimitiveCategory};
use crate::types::{InstanceStatus, InstanceType, MetarepoError, TypeCategory};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// DEFINITIONS
// =============================================================================

/// Declared kind of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Primitive(PrimitiveCategory),
    /// Enumeration with its valid symbolic names.
    Enum(Vec<String>),
    Collection(CollectionKind),
}

/// One attribute of a type's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
}

/// One end of a relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEndDef {
    /// Entity type (or any of its subtypes) allowed at this end.
    pub entity_type: String,
    pub attribute_name: String,
}

fn default_statuses() -> Vec<InstanceStatus> {
    vec![InstanceStatus::Active, InstanceStatus::Deleted]
}

fn default_initial_status() -> InstanceStatus {
    InstanceStatus::Active
}

/// A type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub guid: String,
    pub name: String,
    pub category: TypeCategory,
    #[serde(default)]
    pub super_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Attributes declared by this type (inherited ones are not repeated).
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    #[serde(default = "default_statuses")]
    pub valid_statuses: Vec<InstanceStatus>,
    #[serde(default = "default_initial_status")]
    pub initial_status: InstanceStatus,
    /// Relationship types only: exactly two ends.
    #[serde(default)]
    pub ends: Vec<RelationshipEndDef>,
    /// Classification types only: entity types it may be attached to.
    /// Empty means any entity type.
    #[serde(default)]
    pub valid_entity_types: Vec<String>,
}

impl TypeDef {
    /// The instance-type stamp recorded on instances of this type.
    #[must_use]
    pub fn instance_type(&self) -> InstanceType {
        InstanceType {
            type_def_guid: self.guid.clone(),
            type_def_name: self.name.clone(),
            category: self.category,
        }
    }

    #[must_use]
    pub fn allows_status(&self, status: InstanceStatus) -> bool {
        self.valid_statuses.contains(&status)
    }
}

// =============================================================================
// REGISTRY TRAIT
// =============================================================================

/// Read-only access to type definitions.
///
/// Implementors supply the two primitive lookups; lineage, "is-a" and
/// effective-schema queries are derived from them.
pub trait TypeRegistry: Send + Sync {
    /// Lookup a type by guid.
    fn type_by_guid(&self, guid: &str) -> Option<&TypeDef>;

    /// Lookup a type by name.
    fn type_by_name(&self, name: &str) -> Option<&TypeDef>;

    /// Resolve a type name and check its category.
    fn resolve_name(&self, name: &str, expected: TypeCategory) -> Result<&TypeDef, MetarepoError> {
        let def = self
            .type_by_name(name)
            .ok_or_else(|| MetarepoError::TypeDefNotKnown(name.to_string()))?;
        if def.category != expected {
            return Err(MetarepoError::TypeCategoryMismatch {
                type_name: name.to_string(),
                expected,
                actual: def.category,
            });
        }
        Ok(def)
    }

    /// Resolve the type recorded on an instance.
    ///
    /// The guid is authoritative; the recorded name and category must agree
    /// with the definition it resolves to.
    fn resolve(&self, instance_type: &InstanceType) -> Result<&TypeDef, MetarepoError> {
        let def = self
            .type_by_guid(&instance_type.type_def_guid)
            .ok_or_else(|| MetarepoError::TypeDefNotKnown(instance_type.type_def_name.clone()))?;
        if def.name != instance_type.type_def_name {
            return Err(MetarepoError::TypeDefNotKnown(
                instance_type.type_def_name.clone(),
            ));
        }
        if def.category != instance_type.category {
            return Err(MetarepoError::TypeCategoryMismatch {
                type_name: def.name.clone(),
                expected: instance_type.category,
                actual: def.category,
            });
        }
        Ok(def)
    }

    /// The type followed by its ancestors, nearest first.
    fn lineage(&self, name: &str) -> Result<Vec<&TypeDef>, MetarepoError> {
        let mut lineage = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(name.to_string());

        while let Some(type_name) = current {
            if !seen.insert(type_name.clone()) || lineage.len() >= MAX_TYPE_LINEAGE {
                return Err(MetarepoError::InvalidTypeDefinition(format!(
                    "type inheritance cycle at {}",
                    type_name
                )));
            }
            let def = self
                .type_by_name(&type_name)
                .ok_or_else(|| MetarepoError::TypeDefNotKnown(type_name.clone()))?;
            lineage.push(def);
            current = def.super_type.clone();
        }

        Ok(lineage)
    }

    /// Whether `name` is `ancestor` or one of its subtypes.
    fn is_type_of(&self, name: &str, ancestor: &str) -> bool {
        self.lineage(name)
            .map(|lineage| lineage.iter().any(|def| def.name == ancestor))
            .unwrap_or(false)
    }

    /// Own and inherited attributes; a subtype's declaration wins over its parent's.
    fn effective_attributes(
        &self,
        name: &str,
    ) -> Result<BTreeMap<String, AttributeDef>, MetarepoError> {
        let mut attributes = BTreeMap::new();
        for def in self.lineage(name)? {
            for attribute in &def.attributes {
                attributes
                    .entry(attribute.name.clone())
                    .or_insert_with(|| attribute.clone());
            }
        }
        Ok(attributes)
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Serialized form of a set of type definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeDefinitions {
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

/// In-memory, validated type registry.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    by_name: BTreeMap<String, TypeDef>,
    name_by_guid: BTreeMap<String, String>,
}

impl TypeCatalog {
    /// Build a catalog, rejecting inconsistent definitions.
    ///
    /// Checks: unique names and guids, super types exist and share the
    /// category, no inheritance cycles, relationship types have two ends naming
    /// entity types, classification targets name entity types, and the initial
    /// status is one of the valid statuses.
    pub fn new(definitions: Vec<TypeDef>) -> Result<Self, MetarepoError> {
        let mut catalog = Self::default();
        for def in definitions {
            if catalog.name_by_guid.contains_key(&def.guid) {
                return Err(MetarepoError::InvalidTypeDefinition(format!(
                    "duplicate type guid {}",
                    def.guid
                )));
            }
            if catalog.by_name.contains_key(&def.name) {
                return Err(MetarepoError::InvalidTypeDefinition(format!(
                    "duplicate type name {}",
                    def.name
                )));
            }
            catalog
                .name_by_guid
                .insert(def.guid.clone(), def.name.clone());
            catalog.by_name.insert(def.name.clone(), def);
        }
        catalog.check_consistency()?;
        Ok(catalog)
    }

    /// Build a catalog from its serialized form.
    pub fn from_definitions(definitions: TypeDefinitions) -> Result<Self, MetarepoError> {
        Self::new(definitions.types)
    }

    fn check_consistency(&self) -> Result<(), MetarepoError> {
        for def in self.by_name.values() {
            if let Some(parent) = &def.super_type {
                let parent_def = self.by_name.get(parent).ok_or_else(|| {
                    MetarepoError::InvalidTypeDefinition(format!(
                        "{} extends unknown type {}",
                        def.name, parent
                    ))
                })?;
                if parent_def.category != def.category {
                    return Err(MetarepoError::InvalidTypeDefinition(format!(
                        "{} ({}) cannot extend {} ({})",
                        def.name, def.category, parent_def.name, parent_def.category
                    )));
                }
            }
            self.lineage(&def.name)?;

            if !def.allows_status(def.initial_status) {
                return Err(MetarepoError::InvalidTypeDefinition(format!(
                    "initial status {} of {} is not a valid status",
                    def.initial_status, def.name
                )));
            }

            match def.category {
                TypeCategory::Relationship => {
                    if def.ends.len() != 2 {
                        return Err(MetarepoError::InvalidTypeDefinition(format!(
                            "relationship type {} declares {} ends",
                            def.name,
                            def.ends.len()
                        )));
                    }
                    for end in &def.ends {
                        self.require_entity_type(&def.name, &end.entity_type)?;
                    }
                }
                TypeCategory::Classification => {
                    for target in &def.valid_entity_types {
                        self.require_entity_type(&def.name, target)?;
                    }
                }
                TypeCategory::Entity => {}
            }
        }
        Ok(())
    }

    fn require_entity_type(&self, owner: &str, name: &str) -> Result<(), MetarepoError> {
        match self.by_name.get(name) {
            Some(def) if def.category == TypeCategory::Entity => Ok(()),
            _ => Err(MetarepoError::InvalidTypeDefinition(format!(
                "{} refers to {}, which is not an entity type",
                owner, name
            ))),
        }
    }

    /// All definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDef> {
        self.by_name.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl TypeRegistry for TypeCatalog {
    fn type_by_guid(&self, guid: &str) -> Option<&TypeDef> {
        self.name_by_guid
            .get(guid)
            .and_then(|name| self.by_name.get(name))
    }

    fn type_by_name(&self, name: &str) -> Option<&TypeDef> {
        self.by_name.get(name)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn lineage_walks_to_root() {
        let catalog = fixtures::catalog();
        let names: Vec<_> = catalog
            .lineage("DataSet")
            .expect("lineage")
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["DataSet", "Asset", "Referenceable"]);
    }

    #[test]
    fn is_type_of_follows_hierarchy() {
        let catalog = fixtures::catalog();
        assert!(catalog.is_type_of("DataSet", "Asset"));
        assert!(catalog.is_type_of("DataSet", "DataSet"));
        assert!(!catalog.is_type_of("Asset", "DataSet"));
        assert!(!catalog.is_type_of("Nope", "Asset"));
    }

    #[test]
    fn effective_attributes_include_inherited() {
        let catalog = fixtures::catalog();
        let attrs = catalog.effective_attributes("DataSet").expect("attrs");
        assert!(attrs.contains_key("qualifiedName"));
        assert!(attrs.contains_key("owner"));
        assert!(attrs.contains_key("format"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut defs: Vec<TypeDef> = fixtures::catalog().iter().cloned().collect();
        let mut dup = defs[0].clone();
        dup.guid = "other-guid".into();
        defs.push(dup);
        assert!(matches!(
            TypeCatalog::new(defs),
            Err(MetarepoError::InvalidTypeDefinition(_))
        ));
    }

    #[test]
    fn cycle_rejected() {
        let a = TypeDef {
            guid: "a".into(),
            name: "A".into(),
            category: TypeCategory::Entity,
            super_type: Some("B".into()),
            description: None,
            attributes: Vec::new(),
            valid_statuses: default_statuses(),
            initial_status: InstanceStatus::Active,
            ends: Vec::new(),
            valid_entity_types: Vec::new(),
        };
        let mut b = a.clone();
        b.guid = "b".into();
        b.name = "B".into();
        b.super_type = Some("A".into());

        assert!(matches!(
            TypeCatalog::new(vec![a, b]),
            Err(MetarepoError::InvalidTypeDefinition(_))
        ));
    }

    #[test]
    fn resolve_checks_name_and_category() {
        let catalog = fixtures::catalog();
        let mut stamp = catalog
            .type_by_name("Asset")
            .expect("asset")
            .instance_type();
        assert!(catalog.resolve(&stamp).is_ok());

        stamp.category = TypeCategory::Relationship;
        assert!(matches!(
            catalog.resolve(&stamp),
            Err(MetarepoError::TypeCategoryMismatch { .. })
        ));

        stamp.type_def_guid = "missing".into();
        assert!(matches!(
            catalog.resolve(&stamp),
            Err(MetarepoError::TypeDefNotKnown(_))
        ));
    }
}
