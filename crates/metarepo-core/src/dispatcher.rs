//! # Dispatcher
//!
//! Entry point of the write path. Each [`Operation`] runs as one transaction:
//! it is planned against a single snapshot into a write-set, and the
//! write-set is committed atomically, or not at all when planning fails.
//!
//! ## Transaction ids
//!
//! Every call to [`Dispatcher::execute`] gets a fresh id, including calls
//! that fail, so a failure can be matched with its log lines.

use crate::cascade;
use crate::classification::{self, NewClassification};
use crate::lifecycle::{self, NewInstance};
use crate::reidentify;
use crate::replication;
use crate::store::{CommitInfo, DocumentStore, Snapshot, WriteSet};
use crate::transaction::{Transaction, TxContext};
use crate::typedefs::TypeRegistry;
use crate::types::instance::{
    Classification, EntityDetail, EntityProxy, EntityRecord, Relationship,
};
use crate::types::properties::InstanceProperties;
use crate::types::{
    ErrorKind, ExternalSource, Guid, InstanceStatus, MetarepoError, RepositoryIdentity, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

// =============================================================================
// OPERATIONS
// =============================================================================

/// A client-level write request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    // Entities
    AddEntity {
        entity: NewInstance,
    },
    AddExternalEntity {
        entity: NewInstance,
        source: ExternalSource,
    },
    AddEntityProxy {
        proxy: EntityProxy,
    },
    UpdateEntityProperties {
        guid: Guid,
        properties: InstanceProperties,
    },
    UpdateEntityStatus {
        guid: Guid,
        status: InstanceStatus,
    },
    RetypeEntity {
        guid: Guid,
        type_name: String,
    },
    RehomeEntity {
        guid: Guid,
    },
    DeleteEntity {
        guid: Guid,
    },
    RestoreEntity {
        guid: Guid,
    },
    PurgeEntity {
        guid: Guid,
        #[serde(default)]
        force: bool,
    },
    ReIdentifyEntity {
        guid: Guid,
        new_guid: Guid,
    },
    UndoEntityUpdate {
        guid: Guid,
    },

    // Relationships
    AddRelationship {
        relationship: NewInstance,
        ends: [Guid; 2],
    },
    AddExternalRelationship {
        relationship: NewInstance,
        ends: [Guid; 2],
        source: ExternalSource,
    },
    UpdateRelationshipProperties {
        guid: Guid,
        properties: InstanceProperties,
    },
    UpdateRelationshipStatus {
        guid: Guid,
        status: InstanceStatus,
    },
    RetypeRelationship {
        guid: Guid,
        type_name: String,
    },
    RehomeRelationship {
        guid: Guid,
    },
    DeleteRelationship {
        guid: Guid,
    },
    RestoreRelationship {
        guid: Guid,
    },
    PurgeRelationship {
        guid: Guid,
        #[serde(default)]
        force: bool,
    },
    ReIdentifyRelationship {
        guid: Guid,
        new_guid: Guid,
    },
    UndoRelationshipUpdate {
        guid: Guid,
    },

    // Classifications
    ClassifyEntity {
        guid: Guid,
        /// Used when the entity is not stored here.
        #[serde(default)]
        proxy: Option<EntityProxy>,
        classification: NewClassification,
    },
    DeclassifyEntity {
        guid: Guid,
        classification: String,
    },
    UpdateClassification {
        guid: Guid,
        classification: String,
        properties: InstanceProperties,
    },

    // Reference copies
    SaveEntityReferenceCopy {
        entity: EntityRecord,
    },
    SaveRelationshipReferenceCopy {
        relationship: Relationship,
        #[serde(default)]
        end_proxies: Vec<EntityProxy>,
    },
    SaveClassificationReferenceCopy {
        entity: EntityRecord,
        classification: Classification,
    },
    PurgeEntityReferenceCopy {
        guid: Guid,
    },
    PurgeRelationshipReferenceCopy {
        guid: Guid,
    },
    PurgeClassificationReferenceCopy {
        entity: EntityRecord,
        classification: String,
    },
}

impl Operation {
    /// Wire name of the operation.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddEntity { .. } => "add_entity",
            Self::AddExternalEntity { .. } => "add_external_entity",
            Self::AddEntityProxy { .. } => "add_entity_proxy",
            Self::UpdateEntityProperties { .. } => "update_entity_properties",
            Self::UpdateEntityStatus { .. } => "update_entity_status",
            Self::RetypeEntity { .. } => "retype_entity",
            Self::RehomeEntity { .. } => "rehome_entity",
            Self::DeleteEntity { .. } => "delete_entity",
            Self::RestoreEntity { .. } => "restore_entity",
            Self::PurgeEntity { .. } => "purge_entity",
            Self::ReIdentifyEntity { .. } => "re_identify_entity",
            Self::UndoEntityUpdate { .. } => "undo_entity_update",
            Self::AddRelationship { .. } => "add_relationship",
            Self::AddExternalRelationship { .. } => "add_external_relationship",
            Self::UpdateRelationshipProperties { .. } => "update_relationship_properties",
            Self::UpdateRelationshipStatus { .. } => "update_relationship_status",
            Self::RetypeRelationship { .. } => "retype_relationship",
            Self::RehomeRelationship { .. } => "rehome_relationship",
            Self::DeleteRelationship { .. } => "delete_relationship",
            Self::RestoreRelationship { .. } => "restore_relationship",
            Self::PurgeRelationship { .. } => "purge_relationship",
            Self::ReIdentifyRelationship { .. } => "re_identify_relationship",
            Self::UndoRelationshipUpdate { .. } => "undo_relationship_update",
            Self::ClassifyEntity { .. } => "classify_entity",
            Self::DeclassifyEntity { .. } => "declassify_entity",
            Self::UpdateClassification { .. } => "update_classification",
            Self::SaveEntityReferenceCopy { .. } => "save_entity_reference_copy",
            Self::SaveRelationshipReferenceCopy { .. } => "save_relationship_reference_copy",
            Self::SaveClassificationReferenceCopy { .. } => "save_classification_reference_copy",
            Self::PurgeEntityReferenceCopy { .. } => "purge_entity_reference_copy",
            Self::PurgeRelationshipReferenceCopy { .. } => "purge_relationship_reference_copy",
            Self::PurgeClassificationReferenceCopy { .. } => {
                "purge_classification_reference_copy"
            }
        }
    }

    /// Guid of the instance the operation is aimed at.
    #[must_use]
    pub fn target(&self) -> &Guid {
        match self {
            Self::AddEntity { entity } | Self::AddExternalEntity { entity, .. } => &entity.guid,
            Self::AddRelationship { relationship, .. }
            | Self::AddExternalRelationship { relationship, .. } => &relationship.guid,
            Self::AddEntityProxy { proxy } => &proxy.header.guid,
            Self::SaveEntityReferenceCopy { entity }
            | Self::SaveClassificationReferenceCopy { entity, .. }
            | Self::PurgeClassificationReferenceCopy { entity, .. } => &entity.header().guid,
            Self::SaveRelationshipReferenceCopy { relationship, .. } => &relationship.header.guid,
            Self::UpdateEntityProperties { guid, .. }
            | Self::UpdateEntityStatus { guid, .. }
            | Self::RetypeEntity { guid, .. }
            | Self::RehomeEntity { guid }
            | Self::DeleteEntity { guid }
            | Self::RestoreEntity { guid }
            | Self::PurgeEntity { guid, .. }
            | Self::ReIdentifyEntity { guid, .. }
            | Self::UndoEntityUpdate { guid }
            | Self::UpdateRelationshipProperties { guid, .. }
            | Self::UpdateRelationshipStatus { guid, .. }
            | Self::RetypeRelationship { guid, .. }
            | Self::RehomeRelationship { guid }
            | Self::DeleteRelationship { guid }
            | Self::RestoreRelationship { guid }
            | Self::PurgeRelationship { guid, .. }
            | Self::ReIdentifyRelationship { guid, .. }
            | Self::UndoRelationshipUpdate { guid }
            | Self::ClassifyEntity { guid, .. }
            | Self::DeclassifyEntity { guid, .. }
            | Self::UpdateClassification { guid, .. }
            | Self::PurgeEntityReferenceCopy { guid }
            | Self::PurgeRelationshipReferenceCopy { guid } => guid,
        }
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// What an operation hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "instance", rename_all = "snake_case")]
pub enum OperationResult {
    Entity(EntityDetail),
    Proxy(EntityProxy),
    Relationship(Relationship),
    Purged { guid: Guid },
}

impl From<EntityRecord> for OperationResult {
    fn from(record: EntityRecord) -> Self {
        match record {
            EntityRecord::Detail(entity) => Self::Entity(entity),
            EntityRecord::Proxy(proxy) => Self::Proxy(proxy),
        }
    }
}

/// A committed (or write-free) transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub tx_id: u64,
    pub result: OperationResult,
    /// `None` when the operation produced no writes.
    pub commit: Option<CommitInfo>,
}

/// A failed transaction, tagged for correlation with the logs.
#[derive(Debug, thiserror::Error)]
#[error("transaction {tx_id} ({operation}) failed: {source}")]
pub struct TxError {
    pub tx_id: u64,
    pub operation: &'static str,
    pub source: MetarepoError,
}

impl TxError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

// =============================================================================
// DISPATCHER
// =============================================================================

/// Runs operations for one repository identity against a type registry.
pub struct Dispatcher {
    registry: Arc<dyn TypeRegistry>,
    identity: RepositoryIdentity,
    next_tx: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("identity", &self.identity)
            .field("next_tx", &self.next_tx)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<dyn TypeRegistry>, identity: RepositoryIdentity) -> Self {
        Self {
            registry,
            identity,
            next_tx: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn TypeRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    /// Compute the result and write-set of `op` without committing anything.
    pub fn plan(
        &self,
        snapshot: &dyn Snapshot,
        ctx: &TxContext,
        op: Operation,
    ) -> Result<(OperationResult, WriteSet), MetarepoError> {
        let mut tx = Transaction::new(snapshot, self.registry.as_ref(), ctx);
        let result = run(&mut tx, op)?;
        Ok((result, tx.into_writes()))
    }

    /// Plan `op` on a fresh snapshot of `store` and commit the result.
    pub fn execute(
        &self,
        store: &mut dyn DocumentStore,
        user_id: &str,
        now: Timestamp,
        op: Operation,
    ) -> Result<TxOutcome, TxError> {
        let tx_id = self.next_tx.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let operation = op.name();
        debug!(tx_id, operation, guid = %op.target(), user = user_id, "planning transaction");

        let ctx = TxContext::new(self.identity.clone(), user_id, now);
        let planned = {
            let snapshot = store
                .snapshot()
                .map_err(|e| self.failed(tx_id, operation, e))?;
            self.plan(snapshot.as_ref(), &ctx, op)
        };
        let (result, writes) = planned.map_err(|e| self.failed(tx_id, operation, e))?;

        if writes.is_empty() {
            debug!(tx_id, operation, "no writes to commit");
            return Ok(TxOutcome {
                tx_id,
                result,
                commit: None,
            });
        }

        let commit = store
            .commit(writes)
            .map_err(|e| self.failed(tx_id, operation, e))?;
        info!(
            tx_id,
            operation,
            sequence = commit.sequence,
            puts = commit.puts,
            evictions = commit.evictions,
            "transaction committed"
        );
        Ok(TxOutcome {
            tx_id,
            result,
            commit: Some(commit),
        })
    }

    fn failed(&self, tx_id: u64, operation: &'static str, source: MetarepoError) -> TxError {
        match source.kind() {
            ErrorKind::Repository | ErrorKind::Storage => {
                error!(tx_id, operation, repository = %self.identity.metadata_collection_id,
                    error = %source, "transaction failed");
            }
            ErrorKind::Conflict => {
                warn!(tx_id, operation, error = %source, "transaction rejected");
            }
            ErrorKind::NotFound
            | ErrorKind::InvalidState
            | ErrorKind::InvalidParameter
            | ErrorKind::TypeError => {
                debug!(tx_id, operation, error = %source, "transaction rejected");
            }
        }
        TxError {
            tx_id,
            operation,
            source,
        }
    }
}

/// Route an operation to its transaction function.
fn run(tx: &mut Transaction<'_>, op: Operation) -> Result<OperationResult, MetarepoError> {
    use OperationResult as R;

    Ok(match op {
        Operation::AddEntity { entity } => R::Entity(lifecycle::add_entity(tx, entity, None)?),
        Operation::AddExternalEntity { entity, source } => {
            R::Entity(lifecycle::add_entity(tx, entity, Some(&source))?)
        }
        Operation::AddEntityProxy { proxy } => lifecycle::add_entity_proxy(tx, proxy)?.into(),
        Operation::UpdateEntityProperties { guid, properties } => {
            R::Entity(lifecycle::update_entity_properties(tx, &guid, properties)?)
        }
        Operation::UpdateEntityStatus { guid, status } => {
            R::Entity(lifecycle::update_entity_status(tx, &guid, status)?)
        }
        Operation::RetypeEntity { guid, type_name } => {
            R::Entity(lifecycle::retype_entity(tx, &guid, &type_name)?)
        }
        Operation::RehomeEntity { guid } => R::Entity(lifecycle::rehome_entity(tx, &guid)?),
        Operation::DeleteEntity { guid } => R::Entity(cascade::delete_entity(tx, &guid)?),
        Operation::RestoreEntity { guid } => R::Entity(lifecycle::restore_entity(tx, &guid)?),
        Operation::PurgeEntity { guid, force } => {
            cascade::purge_entity(tx, &guid, force)?;
            R::Purged { guid }
        }
        Operation::ReIdentifyEntity { guid, new_guid } => {
            R::Entity(reidentify::re_identify_entity(tx, &guid, &new_guid)?)
        }
        Operation::UndoEntityUpdate { guid } => R::Entity(crate::undo::undo_entity(tx, &guid)?),

        Operation::AddRelationship { relationship, ends } => {
            R::Relationship(lifecycle::add_relationship(tx, relationship, ends, None)?)
        }
        Operation::AddExternalRelationship {
            relationship,
            ends,
            source,
        } => R::Relationship(lifecycle::add_relationship(
            tx,
            relationship,
            ends,
            Some(&source),
        )?),
        Operation::UpdateRelationshipProperties { guid, properties } => R::Relationship(
            lifecycle::update_relationship_properties(tx, &guid, properties)?,
        ),
        Operation::UpdateRelationshipStatus { guid, status } => {
            R::Relationship(lifecycle::update_relationship_status(tx, &guid, status)?)
        }
        Operation::RetypeRelationship { guid, type_name } => {
            R::Relationship(lifecycle::retype_relationship(tx, &guid, &type_name)?)
        }
        Operation::RehomeRelationship { guid } => {
            R::Relationship(lifecycle::rehome_relationship(tx, &guid)?)
        }
        Operation::DeleteRelationship { guid } => {
            R::Relationship(cascade::delete_relationship(tx, &guid)?)
        }
        Operation::RestoreRelationship { guid } => {
            R::Relationship(lifecycle::restore_relationship(tx, &guid)?)
        }
        Operation::PurgeRelationship { guid, force } => {
            cascade::purge_relationship(tx, &guid, force)?;
            R::Purged { guid }
        }
        Operation::ReIdentifyRelationship { guid, new_guid } => {
            R::Relationship(reidentify::re_identify_relationship(tx, &guid, &new_guid)?)
        }
        Operation::UndoRelationshipUpdate { guid } => {
            R::Relationship(crate::undo::undo_relationship(tx, &guid)?)
        }

        Operation::ClassifyEntity {
            guid,
            proxy,
            classification,
        } => classification::classify(tx, &guid, proxy, classification)?.into(),
        Operation::DeclassifyEntity {
            guid,
            classification,
        } => classification::declassify(tx, &guid, &classification)?.into(),
        Operation::UpdateClassification {
            guid,
            classification,
            properties,
        } => classification::update_classification(tx, &guid, &classification, properties)?
            .into(),

        Operation::SaveEntityReferenceCopy { entity } => {
            replication::save_entity_reference_copy(tx, entity)?.into()
        }
        Operation::SaveRelationshipReferenceCopy {
            relationship,
            end_proxies,
        } => R::Relationship(replication::save_relationship_reference_copy(
            tx,
            relationship,
            &end_proxies,
        )?),
        Operation::SaveClassificationReferenceCopy {
            entity,
            classification,
        } => replication::save_classification_reference_copy(tx, entity, classification)?.into(),
        Operation::PurgeEntityReferenceCopy { guid } => {
            replication::purge_entity_reference_copy(tx, &guid)?;
            R::Purged { guid }
        }
        Operation::PurgeRelationshipReferenceCopy { guid } => {
            replication::purge_relationship_reference_copy(tx, &guid)?;
            R::Purged { guid }
        }
        Operation::PurgeClassificationReferenceCopy {
            entity,
            classification,
        } => replication::purge_classification_reference_copy(tx, entity, &classification)?
            .into(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
