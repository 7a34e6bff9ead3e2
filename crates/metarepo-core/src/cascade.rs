//! # Cascades
//!
//! Deletes and purges, expanded into every dependent write so the whole
//! change commits as one write-set.
//!
//! - Deleting an entity soft-deletes its relationships sharing its home and
//!   evicts relationship copies homed elsewhere
//! - Purging an entity evicts every relationship that references it

use crate::lifecycle::soft_delete;
use crate::transaction::Transaction;
use crate::types::instance::{EntityDetail, EntityRecord, Relationship};
use crate::types::{Guid, MetarepoError};
use crate::validation;
use tracing::debug;

/// Soft-delete an entity along with its live relationships.
pub fn delete_entity(tx: &mut Transaction<'_>, guid: &Guid) -> Result<EntityDetail, MetarepoError> {
    let mut entity = validation::non_proxy(tx.entity(guid)?)?;
    validation::can_be_updated(&entity.header, guid, tx.local_id())?;
    validation::is_not_deleted(&entity.header)?;

    for mut relationship in tx.relationships_for(guid, false)? {
        if relationship.header.metadata_collection_id == entity.header.metadata_collection_id {
            soft_delete(tx.user_id(), &mut relationship.header, tx.now());
            tx.put_relationship(relationship)?;
        } else {
            debug!(entity = %guid, relationship = %relationship.header.guid,
                home = %relationship.header.metadata_collection_id,
                "evicting orphaned relationship copy");
            tx.evict_relationship(&relationship.header.guid);
        }
    }

    soft_delete(tx.user_id(), &mut entity.header, tx.now());
    tx.put_entity(EntityRecord::Detail(entity.clone()))?;
    Ok(entity)
}

/// Permanently remove an entity and every relationship referencing it.
///
/// Without `force` the entity must already be soft-deleted.
pub fn purge_entity(tx: &mut Transaction<'_>, guid: &Guid, force: bool) -> Result<(), MetarepoError> {
    let entity = validation::non_proxy(tx.entity(guid)?)?;
    validation::can_be_updated(&entity.header, guid, tx.local_id())?;
    if !force {
        validation::is_deleted(&entity.header)?;
    }

    for relationship in tx.relationships_for(guid, true)? {
        tx.evict_relationship(&relationship.header.guid);
    }
    tx.evict_entity(guid);
    Ok(())
}

pub fn delete_relationship(
    tx: &mut Transaction<'_>,
    guid: &Guid,
) -> Result<Relationship, MetarepoError> {
    let mut relationship = tx.relationship(guid)?;
    validation::can_be_updated(&relationship.header, guid, tx.local_id())?;
    validation::is_not_deleted(&relationship.header)?;

    soft_delete(tx.user_id(), &mut relationship.header, tx.now());
    tx.put_relationship(relationship.clone())?;
    Ok(relationship)
}

/// Without `force` the relationship must already be soft-deleted.
pub fn purge_relationship(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    force: bool,
) -> Result<(), MetarepoError> {
    let relationship = tx.relationship(guid)?;
    validation::can_be_updated(&relationship.header, guid, tx.local_id())?;
    if !force {
        validation::is_deleted(&relationship.header)?;
    }
    tx.evict_relationship(guid);
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
