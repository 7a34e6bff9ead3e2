//! # Replication
//!
//! Saving and purging reference copies: local copies of instances homed in
//! another repository. Every write of a copy homed elsewhere ends up here, so
//! the same conflict checks apply whichever operation produced it.
//!
//! - A copy claiming to be homed here is rejected (`Home*`)
//! - A copy from a different home than the stored one is rejected (`*Conflict`)
//! - A copy older than the stored full copy is ignored

use crate::classification;
use crate::lifecycle::soft_delete;
use crate::transaction::Transaction;
use crate::types::instance::{Classification, EntityProxy, EntityRecord, Relationship};
use crate::types::{Guid, Homed, MetarepoError, TypeCategory};
use crate::validation;
use tracing::{debug, warn};

/// Whether a copy names this repository as its home.
fn claims_local_home(homed: &impl Homed, local_id: &str) -> bool {
    homed.metadata_collection_id() == local_id || validation::is_locally_homed(homed, local_id)
}

/// Locally held classifications survive a replacement from the entity's home,
/// unless the incoming copy carries a classification of the same name.
fn keep_foreign_classifications(existing: &EntityRecord, incoming: &mut EntityRecord) {
    let home = incoming.header().metadata_collection_id.clone();
    let kept: Vec<Classification> = existing
        .classifications()
        .iter()
        .filter(|c| c.metadata_collection_id != home && incoming.classification(&c.name).is_none())
        .cloned()
        .collect();
    if kept.is_empty() {
        return;
    }
    incoming.classifications_mut().extend(kept);
    let marker = existing
        .last_classification_change()
        .max(incoming.last_classification_change());
    incoming.set_last_classification_change(marker);
}

/// The entity a classification copy applies to: the stored one, else the
/// supplied one when it is itself a reference copy or a proxy.
fn resolve_target(
    tx: &Transaction<'_>,
    supplied: EntityRecord,
) -> Result<EntityRecord, MetarepoError> {
    let guid = supplied.header().guid.clone();
    if let Some(stored) = tx.find_entity(&guid)? {
        return Ok(stored);
    }
    if supplied.is_proxy() || !validation::is_locally_homed(supplied.header(), tx.local_id()) {
        validation::valid_type(
            tx.registry(),
            &supplied.header().instance_type,
            TypeCategory::Entity,
        )?;
        return Ok(supplied);
    }
    Err(MetarepoError::EntityNotKnown(guid))
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Store a copy of an entity (or proxy) homed elsewhere; returns what is stored.
///
/// Over a stored proxy the copy is an in-place upgrade. A proxy never
/// replaces a stored full copy. Classifications held here but not homed at
/// the entity's home are kept.
pub fn save_entity_reference_copy(
    tx: &mut Transaction<'_>,
    incoming: EntityRecord,
) -> Result<EntityRecord, MetarepoError> {
    save_entity_copy(tx, incoming, true)
}

/// Store a reference copy whose classification list was edited here; the
/// list is taken as is.
pub(crate) fn save_reclassified_copy(
    tx: &mut Transaction<'_>,
    record: EntityRecord,
) -> Result<EntityRecord, MetarepoError> {
    save_entity_copy(tx, record, false)
}

fn save_entity_copy(
    tx: &mut Transaction<'_>,
    mut incoming: EntityRecord,
    keep_local_classifications: bool,
) -> Result<EntityRecord, MetarepoError> {
    let guid = incoming.header().guid.clone();
    validation::guid_valid(&guid)?;
    if claims_local_home(incoming.header(), tx.local_id()) {
        warn!(%guid, "rejected entity reference copy homed in this repository");
        return Err(MetarepoError::HomeEntity(guid));
    }
    validation::valid_type(
        tx.registry(),
        &incoming.header().instance_type,
        TypeCategory::Entity,
    )?;
    if tx.find_relationship(&guid)?.is_some() {
        return Err(MetarepoError::GuidAlreadyInUse(guid));
    }

    if let Some(existing) = tx.find_entity(&guid)? {
        let existing_home = &existing.header().metadata_collection_id;
        let incoming_home = &incoming.header().metadata_collection_id;
        if existing_home != incoming_home {
            warn!(%guid, existing = %existing_home, incoming = %incoming_home,
                "rejected conflicting entity reference copy");
            return Err(MetarepoError::EntityConflict {
                guid,
                existing: existing_home.clone(),
                incoming: incoming_home.clone(),
            });
        }
        if !existing.is_proxy()
            && (incoming.is_proxy() || incoming.header().version() < existing.header().version())
        {
            debug!(%guid, version = incoming.header().version(), "ignored stale entity reference copy");
            return Ok(existing);
        }
        if keep_local_classifications {
            keep_foreign_classifications(&existing, &mut incoming);
        }
    }

    tx.put_entity(incoming.clone())?;
    Ok(incoming)
}

/// Remove a reference copy along with the relationship copies attached to it.
///
/// Relationships homed here are soft-deleted rather than removed, so they
/// keep their history.
pub fn purge_entity_reference_copy(
    tx: &mut Transaction<'_>,
    guid: &Guid,
) -> Result<(), MetarepoError> {
    let Some(existing) = tx.find_entity(guid)? else {
        return Ok(());
    };
    if validation::is_locally_homed(existing.header(), tx.local_id()) {
        warn!(%guid, "refused to purge entity homed in this repository as a reference copy");
        return Err(MetarepoError::HomeEntity(guid.clone()));
    }
    for mut relationship in tx.relationships_for(guid, true)? {
        if !validation::is_locally_homed(&relationship.header, tx.local_id()) {
            tx.evict_relationship(&relationship.header.guid);
        } else if !relationship.header.is_deleted() {
            debug!(entity = %guid, relationship = %relationship.header.guid,
                "soft-deleting local relationship to purged reference copy");
            soft_delete(tx.user_id(), &mut relationship.header, tx.now());
            tx.put_relationship(relationship)?;
        }
    }
    tx.evict_entity(guid);
    Ok(())
}

// =============================================================================
// RELATIONSHIPS
// =============================================================================

/// A stored end, else the matching supplied proxy (which is then stored).
fn resolve_end(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    end_proxies: &[EntityProxy],
) -> Result<EntityRecord, MetarepoError> {
    if let Some(stored) = tx.find_entity(guid)? {
        return Ok(stored);
    }
    let proxy = end_proxies
        .iter()
        .find(|p| p.header.guid == *guid)
        .cloned()
        .ok_or_else(|| MetarepoError::EntityNotKnown(guid.clone()))?;
    validation::valid_type(tx.registry(), &proxy.header.instance_type, TypeCategory::Entity)?;
    let record = EntityRecord::Proxy(proxy);
    tx.put_entity(record.clone())?;
    Ok(record)
}

/// Store a copy of a relationship homed elsewhere.
///
/// Ends not known locally are taken from `end_proxies`.
pub fn save_relationship_reference_copy(
    tx: &mut Transaction<'_>,
    incoming: Relationship,
    end_proxies: &[EntityProxy],
) -> Result<Relationship, MetarepoError> {
    let guid = incoming.header.guid.clone();
    validation::guid_valid(&guid)?;
    if claims_local_home(&incoming.header, tx.local_id()) {
        warn!(%guid, "rejected relationship reference copy homed in this repository");
        return Err(MetarepoError::HomeRelationship(guid));
    }
    let def = validation::valid_type(
        tx.registry(),
        &incoming.header.instance_type,
        TypeCategory::Relationship,
    )?;
    let (one, two) = incoming.ends()?;
    if tx.find_entity(&guid)?.is_some() {
        return Err(MetarepoError::GuidAlreadyInUse(guid));
    }

    if let Some(existing) = tx.find_relationship(&guid)? {
        if existing.header.metadata_collection_id != incoming.header.metadata_collection_id {
            warn!(%guid, existing = %existing.header.metadata_collection_id,
                incoming = %incoming.header.metadata_collection_id,
                "rejected conflicting relationship reference copy");
            return Err(MetarepoError::RelationshipConflict {
                guid,
                existing: existing.header.metadata_collection_id,
                incoming: incoming.header.metadata_collection_id,
            });
        }
        if incoming.header.version() < existing.header.version() {
            debug!(%guid, version = incoming.header.version(), "ignored stale relationship reference copy");
            return Ok(existing);
        }
    }

    let ends = [
        resolve_end(tx, one, end_proxies)?,
        resolve_end(tx, two, end_proxies)?,
    ];
    if !incoming.header.is_deleted() {
        for end in &ends {
            validation::is_not_deleted(end.header())?;
        }
    }
    validation::relationship_ends_compatible(
        tx.registry(),
        def,
        &guid,
        [ends[0].header().type_name(), ends[1].header().type_name()],
    )?;

    tx.put_relationship(incoming.clone())?;
    Ok(incoming)
}

pub fn purge_relationship_reference_copy(
    tx: &mut Transaction<'_>,
    guid: &Guid,
) -> Result<(), MetarepoError> {
    let Some(existing) = tx.find_relationship(guid)? else {
        return Ok(());
    };
    if validation::is_locally_homed(&existing.header, tx.local_id()) {
        warn!(%guid, "refused to purge relationship homed in this repository as a reference copy");
        return Err(MetarepoError::HomeRelationship(guid.clone()));
    }
    tx.evict_relationship(guid);
    Ok(())
}

// =============================================================================
// CLASSIFICATIONS
// =============================================================================

/// Store a copy of a classification homed elsewhere on `entity`.
pub fn save_classification_reference_copy(
    tx: &mut Transaction<'_>,
    entity: EntityRecord,
    incoming: Classification,
) -> Result<EntityRecord, MetarepoError> {
    let guid = entity.header().guid.clone();
    if claims_local_home(&incoming, tx.local_id()) {
        warn!(%guid, classification = %incoming.name,
            "rejected classification reference copy homed in this repository");
        return Err(MetarepoError::HomeClassification {
            entity: guid,
            classification: incoming.name,
        });
    }
    let registry = tx.registry();
    let def = registry.resolve_name(&incoming.name, TypeCategory::Classification)?;
    if def.guid != incoming.type_def_guid {
        return Err(MetarepoError::TypeDefNotKnown(incoming.type_def_guid));
    }

    let mut record = resolve_target(tx, entity)?;
    if let Some(existing) = record.classification(&incoming.name) {
        if existing.metadata_collection_id != incoming.metadata_collection_id {
            warn!(%guid, classification = %incoming.name,
                "rejected conflicting classification reference copy");
            return Err(MetarepoError::ClassificationConflict {
                entity: guid,
                classification: incoming.name,
                existing: existing.metadata_collection_id.clone(),
                incoming: incoming.metadata_collection_id,
            });
        }
        if incoming.version() < existing.version() {
            debug!(%guid, classification = %incoming.name, "ignored stale classification reference copy");
            return Ok(record);
        }
    }
    validation::classification_valid_for_entity_type(registry, def, record.header().type_name())?;

    record
        .classifications_mut()
        .retain(|c| c.name != incoming.name);
    record.classifications_mut().push(incoming);
    record.set_last_classification_change(Some(tx.now()));

    classification::persist(tx, record)
}

/// Remove a copy of a classification homed elsewhere from `entity`.
///
/// An entity not stored here is returned as supplied, and nothing is written.
pub fn purge_classification_reference_copy(
    tx: &mut Transaction<'_>,
    entity: EntityRecord,
    name: &str,
) -> Result<EntityRecord, MetarepoError> {
    let guid = entity.header().guid.clone();
    let Some(mut record) = tx.find_entity(&guid)? else {
        debug!(%guid, classification = %name, "no stored entity to purge classification copy from");
        return Ok(entity);
    };
    let existing = record
        .classification(name)
        .ok_or_else(|| MetarepoError::ClassificationNotKnown {
            entity: guid.clone(),
            classification: name.to_string(),
        })?;
    if validation::is_locally_homed(existing, tx.local_id()) {
        warn!(%guid, classification = %name,
            "refused to purge classification homed in this repository as a reference copy");
        return Err(MetarepoError::HomeClassification {
            entity: guid,
            classification: name.to_string(),
        });
    }

    record.classifications_mut().retain(|c| c.name != name);
    record.set_last_classification_change(Some(tx.now()));

    classification::persist(tx, record)
}

// =============================================================================
// TESTS
// =============================================================================
