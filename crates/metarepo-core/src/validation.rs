//! # Validation
//!
//! Stateless predicate checks used by every transaction function.
//!
//! Each check either passes or fails with the specific error for the
//! condition. None of them mutate anything.

use crate::primitives::{
    MAX_GUID_LENGTH, MAX_PROPERTIES_PER_INSTANCE, MAX_PROPERTY_DEPTH, MAX_PROPERTY_NAME_LENGTH,
};
use crate::typedefs::{AttributeKind, TypeDef, TypeRegistry};
use crate::types::instance::{EntityDetail, EntityRecord, Relationship};
use crate::types::properties::{InstanceProperties, PropertyValue};
use crate::types::{
    Guid, Homed, InstanceHeader, InstanceProvenance, InstanceStatus, InstanceType, MetarepoError,
    TypeCategory,
};

// =============================================================================
// EXISTENCE & STATUS
// =============================================================================

/// A guid supplied by a caller is non-empty and within bounds.
pub fn guid_valid(guid: &Guid) -> Result<(), MetarepoError> {
    if guid.as_str().is_empty() {
        return Err(MetarepoError::InvalidParameter("guid is empty".to_string()));
    }
    if guid.as_str().len() > MAX_GUID_LENGTH {
        return Err(MetarepoError::InvalidParameter(format!(
            "guid exceeds {} bytes",
            MAX_GUID_LENGTH
        )));
    }
    Ok(())
}

pub fn entity_exists(
    guid: &Guid,
    found: Option<EntityRecord>,
) -> Result<EntityRecord, MetarepoError> {
    found.ok_or_else(|| MetarepoError::EntityNotKnown(guid.clone()))
}

pub fn relationship_exists(
    guid: &Guid,
    found: Option<Relationship>,
) -> Result<Relationship, MetarepoError> {
    found.ok_or_else(|| MetarepoError::RelationshipNotKnown(guid.clone()))
}

pub fn is_not_deleted(header: &InstanceHeader) -> Result<(), MetarepoError> {
    if !header.is_deleted() {
        return Ok(());
    }
    Err(match header.instance_type.category {
        TypeCategory::Relationship => MetarepoError::RelationshipDeleted(header.guid.clone()),
        TypeCategory::Entity | TypeCategory::Classification => {
            MetarepoError::EntityDeleted(header.guid.clone())
        }
    })
}

pub fn is_deleted(header: &InstanceHeader) -> Result<(), MetarepoError> {
    if header.is_deleted() {
        return Ok(());
    }
    Err(match header.instance_type.category {
        TypeCategory::Relationship => MetarepoError::RelationshipNotDeleted(header.guid.clone()),
        TypeCategory::Entity | TypeCategory::Classification => {
            MetarepoError::EntityNotDeleted(header.guid.clone())
        }
    })
}

/// The fully known entity, or `EntityProxyOnly`.
pub fn non_proxy(record: EntityRecord) -> Result<EntityDetail, MetarepoError> {
    match record {
        EntityRecord::Detail(entity) => Ok(entity),
        EntityRecord::Proxy(proxy) => Err(MetarepoError::EntityProxyOnly(proxy.header.guid)),
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Resolve an instance's type and check it belongs to `expected`.
pub fn valid_type<'r>(
    registry: &'r dyn TypeRegistry,
    instance_type: &InstanceType,
    expected: TypeCategory,
) -> Result<&'r TypeDef, MetarepoError> {
    let def = registry.resolve(instance_type)?;
    if def.category != expected {
        return Err(MetarepoError::TypeCategoryMismatch {
            type_name: def.name.clone(),
            expected,
            actual: def.category,
        });
    }
    Ok(def)
}

/// `status` is settable through an update: listed by the type, never `Deleted`.
pub fn status_valid(def: &TypeDef, status: InstanceStatus) -> Result<(), MetarepoError> {
    if status == InstanceStatus::Deleted || !def.allows_status(status) {
        return Err(MetarepoError::StatusNotSupported {
            type_name: def.name.clone(),
            status,
        });
    }
    Ok(())
}

pub fn classification_valid_for_entity_type(
    registry: &dyn TypeRegistry,
    classification: &TypeDef,
    entity_type: &str,
) -> Result<(), MetarepoError> {
    if classification.valid_entity_types.is_empty()
        || classification
            .valid_entity_types
            .iter()
            .any(|target| registry.is_type_of(entity_type, target))
    {
        return Ok(());
    }
    Err(MetarepoError::ClassificationInvalidForEntity {
        classification: classification.name.clone(),
        entity_type: entity_type.to_string(),
    })
}

/// Both end types are (subtypes of) the relationship type's declared ends.
pub fn relationship_ends_compatible(
    registry: &dyn TypeRegistry,
    relationship_type: &TypeDef,
    relationship: &Guid,
    end_types: [&str; 2],
) -> Result<(), MetarepoError> {
    if relationship_type.ends.len() != 2 {
        return Err(MetarepoError::InvalidTypeDefinition(format!(
            "relationship type {} declares {} ends",
            relationship_type.name,
            relationship_type.ends.len()
        )));
    }
    for (end, (declared, actual)) in relationship_type.ends.iter().zip(end_types).enumerate() {
        if !registry.is_type_of(actual, &declared.entity_type) {
            return Err(MetarepoError::RelationshipEndsIncompatible {
                relationship: relationship.clone(),
                end,
                entity_type: actual.to_string(),
                expected: declared.entity_type.clone(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// PROPERTIES
// =============================================================================

/// Every property is declared by the type (or an ancestor) with a matching kind.
pub fn properties_match_type(
    registry: &dyn TypeRegistry,
    type_name: &str,
    properties: &InstanceProperties,
) -> Result<(), MetarepoError> {
    if properties.len() > MAX_PROPERTIES_PER_INSTANCE {
        return Err(MetarepoError::InvalidParameter(format!(
            "{} properties exceed the limit of {}",
            properties.len(),
            MAX_PROPERTIES_PER_INSTANCE
        )));
    }

    let attributes = registry.effective_attributes(type_name)?;
    for (name, value) in properties.iter() {
        if name.is_empty() || name.len() > MAX_PROPERTY_NAME_LENGTH {
            return Err(MetarepoError::InvalidParameter(format!(
                "property name of {} bytes is out of bounds",
                name.len()
            )));
        }
        let attribute = attributes
            .get(name)
            .ok_or_else(|| MetarepoError::PropertyUndefined {
                type_name: type_name.to_string(),
                property: name.clone(),
            })?;

        let mismatch = |expected: String| MetarepoError::PropertyTypeMismatch {
            type_name: type_name.to_string(),
            property: name.clone(),
            expected,
            actual: value.describe(),
        };

        match (&attribute.kind, value) {
            (AttributeKind::Primitive(category), PropertyValue::Primitive(primitive)) => {
                if primitive.category() != *category {
                    return Err(mismatch(category.to_string()));
                }
            }
            (
                AttributeKind::Enum(symbols),
                PropertyValue::Enum {
                    ordinal,
                    symbolic_name,
                },
            ) => {
                let position = symbols.iter().position(|s| s == symbolic_name);
                if position.map(|p| p as i64) != Some(i64::from(*ordinal)) {
                    return Err(mismatch(format!("enum of {}", symbols.join("|"))));
                }
            }
            (AttributeKind::Collection(kind), value) => {
                if value.collection_kind() != Some(*kind) {
                    return Err(mismatch(kind.to_string()));
                }
                if depth(value) > MAX_PROPERTY_DEPTH {
                    return Err(MetarepoError::InvalidParameter(format!(
                        "property {} nests deeper than {}",
                        name, MAX_PROPERTY_DEPTH
                    )));
                }
            }
            (AttributeKind::Primitive(category), _) => {
                return Err(mismatch(category.to_string()));
            }
            (AttributeKind::Enum(symbols), _) => {
                return Err(mismatch(format!("enum of {}", symbols.join("|"))));
            }
        }
    }
    Ok(())
}

fn depth(value: &PropertyValue) -> usize {
    let children = match value {
        PropertyValue::Primitive(_) | PropertyValue::Enum { .. } => return 1,
        PropertyValue::Array(items) => items.iter().map(depth).max(),
        PropertyValue::Map(entries) | PropertyValue::Struct(entries) => {
            entries.values().map(depth).max()
        }
    };
    children.unwrap_or(0).saturating_add(1)
}

// =============================================================================
// HOME
// =============================================================================

/// Whether `local_id` owns the instance and may change it in place.
pub fn is_locally_homed(homed: &impl Homed, local_id: &str) -> bool {
    match homed.provenance() {
        InstanceProvenance::LocalCohort => homed.metadata_collection_id() == local_id,
        InstanceProvenance::ExternalSource => homed.replicated_by() == Some(local_id),
    }
}

/// The instance is not a reference copy, or `InstanceHomeNotLocal`.
pub fn can_be_updated(homed: &impl Homed, guid: &Guid, local_id: &str) -> Result<(), MetarepoError> {
    if is_locally_homed(homed, local_id) {
        return Ok(());
    }
    let home = match homed.provenance() {
        InstanceProvenance::LocalCohort => homed.metadata_collection_id(),
        InstanceProvenance::ExternalSource => homed
            .replicated_by()
            .unwrap_or_else(|| homed.metadata_collection_id()),
    };
    Err(MetarepoError::InstanceHomeNotLocal {
        guid: guid.clone(),
        home: home.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
