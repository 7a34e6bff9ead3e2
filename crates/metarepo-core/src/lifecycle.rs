//! # Instance Lifecycle
//!
//! Version and maintainer bookkeeping, status transitions, and the
//! create/update transaction functions for entities and relationships.
//!
//! Every accepted mutation goes through [`increment_version`], so a record's
//! version rises by exactly one per write.

use crate::transaction::Transaction;
use crate::typedefs::{TypeDef, TypeRegistry};
use crate::types::instance::{
    EntityDetail, EntityProxy, EntityRecord, Instance, Relationship,
};
use crate::types::properties::InstanceProperties;
use crate::types::{
    ExternalSource, Guid, InstanceHeader, InstanceProvenance, InstanceStatus, MaintenanceFields,
    MetarepoError, RepositoryIdentity, Timestamp, TypeCategory,
};
use crate::validation;
use serde::{Deserialize, Serialize};

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Record an update by `user_id` at `now`: bump the version by one and add
/// the user to the maintainers.
pub fn increment_version(user_id: &str, fields: &mut MaintenanceFields, now: Timestamp) {
    fields.updated_by = Some(user_id.to_string());
    fields.update_time = Some(now);
    fields.version = fields.version.saturating_add(1);
    fields.maintained_by.insert(user_id.to_string());
}

/// [`increment_version`] on an entity, or on one of its classifications when
/// `classification` is given. The entity's own fields are then left alone.
pub fn increment_entity_version(
    user_id: &str,
    record: &mut EntityRecord,
    classification: Option<&str>,
    now: Timestamp,
) -> Result<(), MetarepoError> {
    match classification {
        None => increment_version(user_id, &mut record.header_mut().maintenance, now),
        Some(name) => {
            let entity = record.header().guid.clone();
            let attached = record.classification_mut(name).ok_or_else(|| {
                MetarepoError::ClassificationNotKnown {
                    entity,
                    classification: name.to_string(),
                }
            })?;
            increment_version(user_id, &mut attached.maintenance, now);
        }
    }
    Ok(())
}

/// Flip to `Deleted`, remembering the status to restore.
pub fn soft_delete(user_id: &str, header: &mut InstanceHeader, now: Timestamp) {
    increment_version(user_id, &mut header.maintenance, now);
    if !header.is_deleted() {
        header.status_on_delete = Some(header.status);
    }
    header.status = InstanceStatus::Deleted;
}

/// Undo a soft delete.
pub fn restore(
    user_id: &str,
    header: &mut InstanceHeader,
    now: Timestamp,
) -> Result<(), MetarepoError> {
    validation::is_deleted(header)?;
    increment_version(user_id, &mut header.maintenance, now);
    header.status = header.status_on_delete.take().unwrap_or(InstanceStatus::Active);
    Ok(())
}

pub fn update_properties(
    registry: &dyn TypeRegistry,
    user_id: &str,
    instance: &mut impl Instance,
    properties: InstanceProperties,
    now: Timestamp,
) -> Result<(), MetarepoError> {
    let type_name = instance.header().type_name().to_string();
    validation::properties_match_type(registry, &type_name, &properties)?;
    *instance.properties_mut() = properties;
    increment_version(user_id, &mut instance.header_mut().maintenance, now);
    Ok(())
}

pub fn update_status(
    registry: &dyn TypeRegistry,
    user_id: &str,
    header: &mut InstanceHeader,
    status: InstanceStatus,
    now: Timestamp,
) -> Result<(), MetarepoError> {
    let def = registry.resolve(&header.instance_type)?;
    validation::status_valid(def, status)?;
    header.status = status;
    increment_version(user_id, &mut header.maintenance, now);
    Ok(())
}

/// Switch to `new_type`, which must accept the existing properties and status.
pub fn update_type(
    registry: &dyn TypeRegistry,
    user_id: &str,
    instance: &mut impl Instance,
    new_type: &TypeDef,
    now: Timestamp,
) -> Result<(), MetarepoError> {
    let current = instance.header().instance_type.clone();
    let invalid = |reason: String| MetarepoError::InvalidTypeChange {
        from: current.type_def_name.clone(),
        to: new_type.name.clone(),
        reason,
    };

    if new_type.category != current.category {
        return Err(invalid(format!(
            "{} type cannot replace a {} type",
            new_type.category, current.category
        )));
    }
    validation::properties_match_type(registry, &new_type.name, instance.properties())
        .map_err(|e| invalid(e.to_string()))?;

    let status = instance.header().status;
    let kept_status = instance.header().status_on_delete.unwrap_or(status);
    if !new_type.allows_status(kept_status) {
        return Err(invalid(format!("status {} is not valid", kept_status)));
    }

    let header = instance.header_mut();
    header.instance_type = new_type.instance_type();
    increment_version(user_id, &mut header.maintenance, now);
    Ok(())
}

/// Take ownership of a reference copy.
///
/// Only a reference copy can be re-homed: `LocalCohort` homed elsewhere, or
/// `ExternalSource` replicated by someone else.
pub fn re_home(
    user_id: &str,
    header: &mut InstanceHeader,
    new_home: &RepositoryIdentity,
    now: Timestamp,
) -> Result<(), MetarepoError> {
    if validation::is_locally_homed(header, &new_home.metadata_collection_id) {
        return Err(MetarepoError::InstanceHomeNotLocal {
            guid: header.guid.clone(),
            home: new_home.metadata_collection_id.clone(),
        });
    }
    increment_version(user_id, &mut header.maintenance, now);
    header.provenance = InstanceProvenance::LocalCohort;
    header.metadata_collection_id = new_home.metadata_collection_id.clone();
    header.metadata_collection_name = Some(new_home.metadata_collection_name.clone());
    header.replicated_by = None;
    Ok(())
}

// =============================================================================
// CREATION
// =============================================================================

/// Caller-supplied part of a new entity or relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstance {
    pub guid: Guid,
    pub type_name: String,
    #[serde(default)]
    pub properties: InstanceProperties,
    /// Defaults to the type's initial status.
    #[serde(default)]
    pub status: Option<InstanceStatus>,
}

fn new_header(
    def: &TypeDef,
    new: &NewInstance,
    local: &RepositoryIdentity,
    source: Option<&ExternalSource>,
    user_id: &str,
    now: Timestamp,
) -> Result<InstanceHeader, MetarepoError> {
    let status = new.status.unwrap_or(def.initial_status);
    validation::status_valid(def, status)?;

    let (provenance, home, home_name, replicated_by) = match source {
        None => (
            InstanceProvenance::LocalCohort,
            local.metadata_collection_id.clone(),
            local.metadata_collection_name.clone(),
            None,
        ),
        Some(source) => (
            InstanceProvenance::ExternalSource,
            source.guid.clone(),
            source.name.clone(),
            Some(local.metadata_collection_id.clone()),
        ),
    };

    Ok(InstanceHeader {
        guid: new.guid.clone(),
        instance_type: def.instance_type(),
        status,
        status_on_delete: None,
        provenance,
        metadata_collection_id: home,
        metadata_collection_name: Some(home_name),
        replicated_by,
        re_identified_from_guid: None,
        maintenance: MaintenanceFields::created(user_id, now),
    })
}

/// Create an entity homed here, or mirrored from `source`.
///
/// A proxy already stored under the guid is upgraded in place: the new entity
/// continues its version and keeps its classifications and relationships.
pub fn add_entity(
    tx: &mut Transaction<'_>,
    new: NewInstance,
    source: Option<&ExternalSource>,
) -> Result<EntityDetail, MetarepoError> {
    validation::guid_valid(&new.guid)?;
    let def = tx.registry().resolve_name(&new.type_name, TypeCategory::Entity)?;
    validation::properties_match_type(tx.registry(), &def.name, &new.properties)?;
    let mut header = new_header(
        def,
        &new,
        &tx.ctx().local,
        source,
        tx.user_id(),
        tx.now(),
    )?;

    if tx.find_relationship(&new.guid)?.is_some() {
        return Err(MetarepoError::GuidAlreadyInUse(new.guid));
    }

    let entity = match tx.find_entity(&new.guid)? {
        None => EntityDetail {
            header,
            properties: new.properties,
            classifications: Vec::new(),
            last_classification_change: None,
        },
        Some(EntityRecord::Detail(_)) => return Err(MetarepoError::GuidAlreadyInUse(new.guid)),
        Some(EntityRecord::Proxy(proxy)) => {
            upgrade_check(&proxy, &header)?;
            let mut maintenance = proxy.header.maintenance.clone();
            increment_version(tx.user_id(), &mut maintenance, tx.now());
            header.maintenance = maintenance;
            EntityDetail {
                header,
                properties: new.properties,
                classifications: proxy.classifications,
                last_classification_change: proxy.last_classification_change,
            }
        }
    };

    tx.put_entity(EntityRecord::Detail(entity.clone()))?;
    Ok(entity)
}

/// A proxy can only be upgraded by its own home, to its own type.
fn upgrade_check(proxy: &EntityProxy, incoming: &InstanceHeader) -> Result<(), MetarepoError> {
    if proxy.header.metadata_collection_id != incoming.metadata_collection_id {
        return Err(MetarepoError::EntityConflict {
            guid: proxy.header.guid.clone(),
            existing: proxy.header.metadata_collection_id.clone(),
            incoming: incoming.metadata_collection_id.clone(),
        });
    }
    if proxy.header.instance_type.type_def_guid != incoming.instance_type.type_def_guid {
        return Err(MetarepoError::InvalidTypeChange {
            from: proxy.header.type_name().to_string(),
            to: incoming.type_name().to_string(),
            reason: "a proxy keeps its type when upgraded".to_string(),
        });
    }
    Ok(())
}

/// Store a proxy unless the entity is already known; returns what is stored.
pub fn add_entity_proxy(
    tx: &mut Transaction<'_>,
    proxy: EntityProxy,
) -> Result<EntityRecord, MetarepoError> {
    validation::guid_valid(&proxy.header.guid)?;
    validation::valid_type(
        tx.registry(),
        &proxy.header.instance_type,
        TypeCategory::Entity,
    )?;
    if tx.find_relationship(&proxy.header.guid)?.is_some() {
        return Err(MetarepoError::GuidAlreadyInUse(proxy.header.guid));
    }
    if let Some(existing) = tx.find_entity(&proxy.header.guid)? {
        return Ok(existing);
    }
    tx.put_entity(EntityRecord::Proxy(proxy.clone()))?;
    Ok(EntityRecord::Proxy(proxy))
}

/// Create a relationship between two known, live, type-compatible entities.
pub fn add_relationship(
    tx: &mut Transaction<'_>,
    new: NewInstance,
    ends: [Guid; 2],
    source: Option<&ExternalSource>,
) -> Result<Relationship, MetarepoError> {
    validation::guid_valid(&new.guid)?;
    let def = tx
        .registry()
        .resolve_name(&new.type_name, TypeCategory::Relationship)?;
    validation::properties_match_type(tx.registry(), &def.name, &new.properties)?;
    let header = new_header(
        def,
        &new,
        &tx.ctx().local,
        source,
        tx.user_id(),
        tx.now(),
    )?;

    if tx.guid_in_use(&new.guid)? {
        return Err(MetarepoError::GuidAlreadyInUse(new.guid));
    }

    let relationship = Relationship {
        header,
        properties: new.properties,
        entity_proxies: ends.to_vec(),
    };
    check_ends(tx, def, &relationship)?;

    tx.put_relationship(relationship.clone())?;
    Ok(relationship)
}

/// Both ends are stored, not deleted, and of types `def` accepts.
pub(crate) fn check_ends(
    tx: &Transaction<'_>,
    def: &TypeDef,
    relationship: &Relationship,
) -> Result<(), MetarepoError> {
    let (one, two) = relationship.ends()?;
    let ends = [tx.entity(one)?, tx.entity(two)?];
    for end in &ends {
        validation::is_not_deleted(end.header())?;
    }
    validation::relationship_ends_compatible(
        tx.registry(),
        def,
        &relationship.header.guid,
        [ends[0].header().type_name(), ends[1].header().type_name()],
    )
}

// =============================================================================
// ENTITY UPDATES
// =============================================================================

/// A full, locally homed, live entity.
fn updatable_entity(tx: &Transaction<'_>, guid: &Guid) -> Result<EntityDetail, MetarepoError> {
    let entity = validation::non_proxy(tx.entity(guid)?)?;
    validation::can_be_updated(&entity.header, guid, tx.local_id())?;
    validation::is_not_deleted(&entity.header)?;
    Ok(entity)
}

pub fn update_entity_properties(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    properties: InstanceProperties,
) -> Result<EntityDetail, MetarepoError> {
    let mut entity = updatable_entity(tx, guid)?;
    update_properties(tx.registry(), tx.user_id(), &mut entity, properties, tx.now())?;
    tx.put_entity(EntityRecord::Detail(entity.clone()))?;
    Ok(entity)
}

pub fn update_entity_status(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    status: InstanceStatus,
) -> Result<EntityDetail, MetarepoError> {
    let mut entity = updatable_entity(tx, guid)?;
    update_status(
        tx.registry(),
        tx.user_id(),
        &mut entity.header,
        status,
        tx.now(),
    )?;
    tx.put_entity(EntityRecord::Detail(entity.clone()))?;
    Ok(entity)
}

/// Change an entity's type. Attached classifications, and the ends of its
/// live relationships, must remain valid for the new type.
pub fn retype_entity(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    type_name: &str,
) -> Result<EntityDetail, MetarepoError> {
    let mut entity = updatable_entity(tx, guid)?;
    let registry = tx.registry();
    let new_type = registry.resolve_name(type_name, TypeCategory::Entity)?;

    for classification in &entity.classifications {
        let def = registry.resolve_name(&classification.name, TypeCategory::Classification)?;
        validation::classification_valid_for_entity_type(registry, def, &new_type.name)
            .map_err(|e| MetarepoError::InvalidTypeChange {
                from: entity.header.type_name().to_string(),
                to: new_type.name.clone(),
                reason: e.to_string(),
            })?;
    }

    for relationship in tx.relationships_for(guid, false)? {
        let def = validation::valid_type(
            registry,
            &relationship.header.instance_type,
            TypeCategory::Relationship,
        )?;
        let (one, two) = relationship.ends()?;
        let end_type = |end: &Guid| -> Result<String, MetarepoError> {
            if end == guid {
                return Ok(new_type.name.clone());
            }
            Ok(tx.entity(end)?.header().type_name().to_string())
        };
        let ends = [end_type(one)?, end_type(two)?];
        validation::relationship_ends_compatible(
            registry,
            def,
            &relationship.header.guid,
            [ends[0].as_str(), ends[1].as_str()],
        )
        .map_err(|e| MetarepoError::InvalidTypeChange {
            from: entity.header.type_name().to_string(),
            to: new_type.name.clone(),
            reason: e.to_string(),
        })?;
    }

    update_type(registry, tx.user_id(), &mut entity, new_type, tx.now())?;
    tx.put_entity(EntityRecord::Detail(entity.clone()))?;
    Ok(entity)
}

/// Make this repository the home of a reference copy.
pub fn rehome_entity(tx: &mut Transaction<'_>, guid: &Guid) -> Result<EntityDetail, MetarepoError> {
    let mut entity = validation::non_proxy(tx.entity(guid)?)?;
    validation::is_not_deleted(&entity.header)?;
    re_home(tx.user_id(), &mut entity.header, &tx.ctx().local, tx.now())?;
    tx.put_entity(EntityRecord::Detail(entity.clone()))?;
    Ok(entity)
}

pub fn restore_entity(tx: &mut Transaction<'_>, guid: &Guid) -> Result<EntityDetail, MetarepoError> {
    let mut entity = validation::non_proxy(tx.entity(guid)?)?;
    validation::can_be_updated(&entity.header, guid, tx.local_id())?;
    restore(tx.user_id(), &mut entity.header, tx.now())?;
    tx.put_entity(EntityRecord::Detail(entity.clone()))?;
    Ok(entity)
}

// =============================================================================
// RELATIONSHIP UPDATES
// =============================================================================

/// A locally homed, live relationship.
fn updatable_relationship(
    tx: &Transaction<'_>,
    guid: &Guid,
) -> Result<Relationship, MetarepoError> {
    let relationship = tx.relationship(guid)?;
    validation::can_be_updated(&relationship.header, guid, tx.local_id())?;
    validation::is_not_deleted(&relationship.header)?;
    Ok(relationship)
}

pub fn update_relationship_properties(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    properties: InstanceProperties,
) -> Result<Relationship, MetarepoError> {
    let mut relationship = updatable_relationship(tx, guid)?;
    update_properties(
        tx.registry(),
        tx.user_id(),
        &mut relationship,
        properties,
        tx.now(),
    )?;
    tx.put_relationship(relationship.clone())?;
    Ok(relationship)
}

pub fn update_relationship_status(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    status: InstanceStatus,
) -> Result<Relationship, MetarepoError> {
    let mut relationship = updatable_relationship(tx, guid)?;
    update_status(
        tx.registry(),
        tx.user_id(),
        &mut relationship.header,
        status,
        tx.now(),
    )?;
    tx.put_relationship(relationship.clone())?;
    Ok(relationship)
}

/// Change a relationship's type. Its current ends must suit the new type.
pub fn retype_relationship(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    type_name: &str,
) -> Result<Relationship, MetarepoError> {
    let mut relationship = updatable_relationship(tx, guid)?;
    let new_type = tx
        .registry()
        .resolve_name(type_name, TypeCategory::Relationship)?;

    check_ends(tx, new_type, &relationship).map_err(|e| match e {
        MetarepoError::RelationshipEndsIncompatible { .. } => MetarepoError::InvalidTypeChange {
            from: relationship.header.type_name().to_string(),
            to: new_type.name.clone(),
            reason: e.to_string(),
        },
        other => other,
    })?;

    update_type(
        tx.registry(),
        tx.user_id(),
        &mut relationship,
        new_type,
        tx.now(),
    )?;
    tx.put_relationship(relationship.clone())?;
    Ok(relationship)
}

pub fn rehome_relationship(
    tx: &mut Transaction<'_>,
    guid: &Guid,
) -> Result<Relationship, MetarepoError> {
    let mut relationship = tx.relationship(guid)?;
    validation::is_not_deleted(&relationship.header)?;
    re_home(
        tx.user_id(),
        &mut relationship.header,
        &tx.ctx().local,
        tx.now(),
    )?;
    tx.put_relationship(relationship.clone())?;
    Ok(relationship)
}

/// Restore a deleted relationship; both ends must be live again.
pub fn restore_relationship(
    tx: &mut Transaction<'_>,
    guid: &Guid,
) -> Result<Relationship, MetarepoError> {
    let mut relationship = tx.relationship(guid)?;
    validation::can_be_updated(&relationship.header, guid, tx.local_id())?;
    validation::is_deleted(&relationship.header)?;
    let def = validation::valid_type(
        tx.registry(),
        &relationship.header.instance_type,
        TypeCategory::Relationship,
    )?;
    check_ends(tx, def, &relationship)?;

    restore(tx.user_id(), &mut relationship.header, tx.now())?;
    tx.put_relationship(relationship.clone())?;
    Ok(relationship)
}

// =============================================================================
// TESTS
// =============================================================================
