//! # Re-identification
//!
//! Moving an instance to a new guid. The old guid is retired (soft-deleted)
//! and the new record points back at it through `re_identified_from_guid`.
//! Relationships attached to a re-identified entity are re-linked to the new
//! guid in the same write-set.

use crate::lifecycle::{increment_version, soft_delete};
use crate::transaction::Transaction;
use crate::types::instance::{EntityDetail, EntityRecord, Relationship};
use crate::types::{Guid, InstanceHeader, MetarepoError};
use crate::validation;
use tracing::debug;

/// The retired and the replacement header derived from `current`.
fn split_header(
    tx: &Transaction<'_>,
    current: &InstanceHeader,
    new_guid: &Guid,
) -> (InstanceHeader, InstanceHeader) {
    let mut retired = current.clone();
    soft_delete(tx.user_id(), &mut retired, tx.now());

    let mut replacement = current.clone();
    increment_version(tx.user_id(), &mut replacement.maintenance, tx.now());
    replacement.guid = new_guid.clone();
    replacement.re_identified_from_guid = Some(current.guid.clone());

    (retired, replacement)
}

fn new_guid_free(tx: &Transaction<'_>, new_guid: &Guid) -> Result<(), MetarepoError> {
    validation::guid_valid(new_guid)?;
    if tx.guid_in_use(new_guid)? {
        return Err(MetarepoError::GuidAlreadyInUse(new_guid.clone()));
    }
    Ok(())
}

/// Move an entity to `new_guid`; returns the new record.
pub fn re_identify_entity(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    new_guid: &Guid,
) -> Result<EntityDetail, MetarepoError> {
    let current = validation::non_proxy(tx.entity(guid)?)?;
    validation::can_be_updated(&current.header, guid, tx.local_id())?;
    new_guid_free(tx, new_guid)?;

    let (retired, replacement) = split_header(tx, &current.header, new_guid);
    let mut old = current.clone();
    old.header = retired;
    let mut new = current;
    new.header = replacement;

    tx.put_entity(EntityRecord::Detail(old))?;
    tx.put_entity(EntityRecord::Detail(new.clone()))?;

    for relationship in tx.relationships_for(guid, true)? {
        re_link(tx, &relationship.header.guid, guid, new_guid)?;
    }
    Ok(new)
}

/// Move a relationship to `new_guid`; returns the new record.
pub fn re_identify_relationship(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    new_guid: &Guid,
) -> Result<Relationship, MetarepoError> {
    let current = tx.relationship(guid)?;
    validation::can_be_updated(&current.header, guid, tx.local_id())?;
    new_guid_free(tx, new_guid)?;

    let (retired, replacement) = split_header(tx, &current.header, new_guid);
    let mut old = current.clone();
    old.header = retired;
    let mut new = current;
    new.header = replacement;

    tx.put_relationship(old)?;
    tx.put_relationship(new.clone())?;
    Ok(new)
}

/// Point every end of a relationship that names `old` at `new`.
///
/// Only the matching slots change. The relationship keeps its version, and
/// the write is recorded at the relationship's current valid time.
pub fn re_link(
    tx: &mut Transaction<'_>,
    relationship: &Guid,
    old: &Guid,
    new: &Guid,
) -> Result<Relationship, MetarepoError> {
    let mut current = tx.relationship(relationship)?;
    current.ends()?;
    for end in current.entity_proxies.iter_mut().filter(|end| **end == *old) {
        *end = new.clone();
    }
    debug!(relationship = %relationship, from = %old, to = %new, "re-linked relationship");
    tx.put_relationship(current.clone())?;
    Ok(current)
}

// =============================================================================
// TESTS
// =============================================================================
