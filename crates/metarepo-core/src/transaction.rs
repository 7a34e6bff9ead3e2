//! # Transaction
//!
//! The handle every transaction function works through: one snapshot for all
//! reads, the shared type registry, the caller's context, and the write-set
//! being accumulated.
//!
//! Reads never observe pending writes. A function sees exactly the snapshot it
//! was started on, including during cascades.

use crate::store::{DocumentQuery, Snapshot, WriteSet};
use crate::typedefs::TypeRegistry;
use crate::types::instance::{DocId, Document, EntityRecord, Relationship};
use crate::types::{Guid, MetarepoError, RepositoryIdentity, Timestamp};
use crate::validation;

/// Who is executing, where, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    /// The invoking repository.
    pub local: RepositoryIdentity,
    pub user_id: String,
    /// Transaction time; the only clock the core ever sees.
    pub now: Timestamp,
}

impl TxContext {
    #[must_use]
    pub fn new(local: RepositoryIdentity, user_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            local,
            user_id: user_id.into(),
            now,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.local.metadata_collection_id
    }
}

// =============================================================================
// SNAPSHOT READS
// =============================================================================

/// Load the entity or proxy stored under `guid`.
pub fn load_entity(
    snapshot: &dyn Snapshot,
    guid: &Guid,
) -> Result<Option<EntityRecord>, MetarepoError> {
    let id = DocId::entity(guid);
    match snapshot.get(&id)? {
        None => Ok(None),
        Some(document) => document
            .into_entity()
            .map(Some)
            .ok_or_else(|| MetarepoError::CorruptDocument {
                id: id.to_string(),
                reason: "entity key holds a relationship".to_string(),
            }),
    }
}

/// Load the relationship stored under `guid`.
pub fn load_relationship(
    snapshot: &dyn Snapshot,
    guid: &Guid,
) -> Result<Option<Relationship>, MetarepoError> {
    let id = DocId::relationship(guid);
    match snapshot.get(&id)? {
        None => Ok(None),
        Some(document) => document
            .into_relationship()
            .map(Some)
            .ok_or_else(|| MetarepoError::CorruptDocument {
                id: id.to_string(),
                reason: "relationship key holds an entity".to_string(),
            }),
    }
}

/// Relationships with `entity` at either end.
pub fn load_relationships_for(
    snapshot: &dyn Snapshot,
    entity: &Guid,
    include_deleted: bool,
) -> Result<Vec<Relationship>, MetarepoError> {
    let ids = snapshot.query(&DocumentQuery::RelationshipsFor {
        entity: entity.clone(),
        include_deleted,
    })?;
    let mut relationships = Vec::with_capacity(ids.len());
    for id in ids {
        let relationship = load_relationship(snapshot, &id.guid())?
            .ok_or_else(|| MetarepoError::RelationshipNotKnown(id.guid()))?;
        relationships.push(relationship);
    }
    Ok(relationships)
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// A transaction in progress.
pub struct Transaction<'a> {
    snapshot: &'a dyn Snapshot,
    registry: &'a dyn TypeRegistry,
    ctx: &'a TxContext,
    writes: WriteSet,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("ctx", &self.ctx)
            .field("snapshot_sequence", &self.snapshot.sequence())
            .field("pending", &self.writes.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Transaction<'a> {
    #[must_use]
    pub fn new(
        snapshot: &'a dyn Snapshot,
        registry: &'a dyn TypeRegistry,
        ctx: &'a TxContext,
    ) -> Self {
        Self {
            snapshot,
            registry,
            ctx,
            writes: WriteSet::new(ctx.now),
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &'a TxContext {
        self.ctx
    }

    #[must_use]
    pub fn registry(&self) -> &'a dyn TypeRegistry {
        self.registry
    }

    #[must_use]
    pub fn snapshot(&self) -> &'a dyn Snapshot {
        self.snapshot
    }

    #[must_use]
    pub fn local_id(&self) -> &'a str {
        self.ctx.local_id()
    }

    #[must_use]
    pub fn user_id(&self) -> &'a str {
        &self.ctx.user_id
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.ctx.now
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn find_entity(&self, guid: &Guid) -> Result<Option<EntityRecord>, MetarepoError> {
        load_entity(self.snapshot, guid)
    }

    /// The stored entity or proxy, or `EntityNotKnown`.
    pub fn entity(&self, guid: &Guid) -> Result<EntityRecord, MetarepoError> {
        validation::entity_exists(guid, self.find_entity(guid)?)
    }

    pub fn find_relationship(&self, guid: &Guid) -> Result<Option<Relationship>, MetarepoError> {
        load_relationship(self.snapshot, guid)
    }

    /// The stored relationship, or `RelationshipNotKnown`.
    pub fn relationship(&self, guid: &Guid) -> Result<Relationship, MetarepoError> {
        validation::relationship_exists(guid, self.find_relationship(guid)?)
    }

    pub fn relationships_for(
        &self,
        entity: &Guid,
        include_deleted: bool,
    ) -> Result<Vec<Relationship>, MetarepoError> {
        load_relationships_for(self.snapshot, entity, include_deleted)
    }

    /// Whether any entity, proxy or relationship uses `guid`.
    pub fn guid_in_use(&self, guid: &Guid) -> Result<bool, MetarepoError> {
        Ok(self.snapshot.get(&DocId::entity(guid))?.is_some()
            || self.snapshot.get(&DocId::relationship(guid))?.is_some())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Valid time of a new version of `document`.
    ///
    /// The document's effective time, capped at the transaction time and
    /// raised to the newest valid time already recorded for the document, so
    /// valid time never decreases along a document's history. When the
    /// recorded floor is itself past the transaction time (a clock running
    /// behind an earlier writer), the floor wins.
    pub fn valid_time(&self, document: &Document) -> Result<Timestamp, MetarepoError> {
        let proposed = document.effective_time().min(self.ctx.now);
        let floor = self.snapshot.latest_valid_time(&document.id())?;
        Ok(match floor {
            Some(floor) => proposed.max(floor),
            None => proposed,
        })
    }

    pub fn put(&mut self, document: Document) -> Result<(), MetarepoError> {
        let valid_time = self.valid_time(&document)?;
        self.writes.put(document, valid_time);
        Ok(())
    }

    pub fn put_entity(&mut self, record: EntityRecord) -> Result<(), MetarepoError> {
        self.put(Document::from(record))
    }

    pub fn put_relationship(&mut self, relationship: Relationship) -> Result<(), MetarepoError> {
        self.put(Document::Relationship(relationship))
    }

    pub fn evict_entity(&mut self, guid: &Guid) {
        self.writes.evict(DocId::entity(guid));
    }

    pub fn evict_relationship(&mut self, guid: &Guid) {
        self.writes.evict(DocId::relationship(guid));
    }

    /// Pending writes so far.
    #[must_use]
    pub fn writes(&self) -> &WriteSet {
        &self.writes
    }

    #[must_use]
    pub fn into_writes(self) -> WriteSet {
        self.writes
    }
}
