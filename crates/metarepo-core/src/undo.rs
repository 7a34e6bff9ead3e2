//! # Undo
//!
//! Roll an instance back to the version before its latest one.
//!
//! The rolled-back record always gets a version past the current head, so
//! history keeps moving forward. Classification state is never rolled back:
//! an entity keeps its present classifications, and a relationship keeps its
//! present ends (re-links do not count as versions).
//!
//! Undo never moves an instance into or out of `DELETED`; that goes through
//! delete and restore so their cascades and checks apply.

use crate::lifecycle::{check_ends, increment_version};
use crate::store::Snapshot;
use crate::transaction::Transaction;
use crate::types::instance::{DocId, Document, EntityDetail, EntityRecord, Relationship};
use crate::types::{Guid, InstanceHeader, MaintenanceFields, MetarepoError, TypeCategory};
use crate::validation;
use tracing::debug;

/// Walk history newest first for the nearest record older than `current`
/// that `pick` accepts. Records sharing the current version are skipped.
fn previous_version<T>(
    snapshot: &dyn Snapshot,
    id: &DocId,
    current: u64,
    pick: impl Fn(Document) -> Option<T>,
) -> Result<Option<T>, MetarepoError> {
    for entry in snapshot.history(id)? {
        let entry = entry?;
        if entry.document.header().version() >= current {
            continue;
        }
        if let Some(found) = pick(entry.document) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn keeps_deletion_state(
    current: &InstanceHeader,
    restored: &InstanceHeader,
) -> Result<(), MetarepoError> {
    if current.status != restored.status && (current.is_deleted() || restored.is_deleted()) {
        return Err(MetarepoError::UndoCrossesDelete {
            guid: current.guid.clone(),
            from: current.status,
            to: restored.status,
        });
    }
    Ok(())
}

fn roll_forward(
    tx: &Transaction<'_>,
    maintenance: &mut MaintenanceFields,
    current_version: u64,
) {
    increment_version(tx.user_id(), maintenance, tx.now());
    maintenance.version = current_version.saturating_add(1);
}

/// Undo the latest update of an entity. With no earlier version this is a
/// no-op returning the entity as stored.
pub fn undo_entity(tx: &mut Transaction<'_>, guid: &Guid) -> Result<EntityDetail, MetarepoError> {
    let current = validation::non_proxy(tx.entity(guid)?)?;
    validation::can_be_updated(&current.header, guid, tx.local_id())?;

    let version = current.header.version();
    let previous = previous_version(tx.snapshot(), &DocId::entity(guid), version, |doc| {
        match doc {
            Document::Entity(entity) => Some(entity),
            Document::Proxy(_) | Document::Relationship(_) => None,
        }
    })?;
    let Some(mut restored) = previous else {
        debug!(%guid, version, "nothing to undo");
        return Ok(current);
    };
    keeps_deletion_state(&current.header, &restored.header)?;

    roll_forward(tx, &mut restored.header.maintenance, version);
    restored.classifications = current.classifications;
    restored.last_classification_change = current.last_classification_change;

    tx.put_entity(EntityRecord::Detail(restored.clone()))?;
    Ok(restored)
}

/// Undo the latest update of a relationship. With no earlier version this is
/// a no-op returning the relationship as stored.
pub fn undo_relationship(
    tx: &mut Transaction<'_>,
    guid: &Guid,
) -> Result<Relationship, MetarepoError> {
    let current = tx.relationship(guid)?;
    validation::can_be_updated(&current.header, guid, tx.local_id())?;

    let version = current.header.version();
    let previous = previous_version(tx.snapshot(), &DocId::relationship(guid), version, |doc| {
        doc.into_relationship()
    })?;
    let Some(mut restored) = previous else {
        debug!(%guid, version, "nothing to undo");
        return Ok(current);
    };
    keeps_deletion_state(&current.header, &restored.header)?;

    roll_forward(tx, &mut restored.header.maintenance, version);
    restored.entity_proxies = current.entity_proxies;
    if !restored.header.is_deleted() {
        let def = validation::valid_type(
            tx.registry(),
            &restored.header.instance_type,
            TypeCategory::Relationship,
        )?;
        check_ends(tx, def, &restored)?;
    }

    tx.put_relationship(restored.clone())?;
    Ok(restored)
}

// =============================================================================
// TESTS
// =============================================================================
