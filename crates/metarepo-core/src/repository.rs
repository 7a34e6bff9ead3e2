//! # Repository
//!
//! A dispatcher bound to a document store, plus snapshot-consistent reads.
//!
//! ## Storage Backends
//!
//! - `InMemory`: copy-on-write [`MemoryStore`] (fast, volatile)
//! - `Persistent`: [`RedbStore`] (ACID, on disk)

use crate::dispatcher::{Dispatcher, Operation, TxError, TxOutcome};
use crate::store::{DocumentStore, HistoryEntry, MemoryStore, RedbStore};
use crate::transaction::{load_entity, load_relationship, load_relationships_for};
use crate::typedefs::TypeRegistry;
use crate::types::instance::{DocId, EntityRecord, Relationship};
use crate::types::{Guid, MetarepoError, RepositoryIdentity, Timestamp};
use std::path::Path;
use std::sync::Arc;

/// Storage backend for a [`Repository`].
#[derive(Debug)]
pub enum StorageBackend {
    InMemory(MemoryStore),
    Persistent(RedbStore),
}

impl StorageBackend {
    fn store(&self) -> &dyn DocumentStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }

    fn store_mut(&mut self) -> &mut dyn DocumentStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

#[derive(Debug)]
pub struct Repository {
    dispatcher: Dispatcher,
    backend: StorageBackend,
}

impl Repository {
    #[must_use]
    pub fn new(
        backend: StorageBackend,
        registry: Arc<dyn TypeRegistry>,
        identity: RepositoryIdentity,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry, identity),
            backend,
        }
    }

    #[must_use]
    pub fn in_memory(registry: Arc<dyn TypeRegistry>, identity: RepositoryIdentity) -> Self {
        Self::new(StorageBackend::InMemory(MemoryStore::new()), registry, identity)
    }

    /// Open or create a redb database at `path`.
    pub fn with_redb(
        path: impl AsRef<Path>,
        registry: Arc<dyn TypeRegistry>,
        identity: RepositoryIdentity,
    ) -> Result<Self, MetarepoError> {
        let store = RedbStore::open(path)?;
        Ok(Self::new(StorageBackend::Persistent(store), registry, identity))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn identity(&self) -> &RepositoryIdentity {
        self.dispatcher.identity()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn TypeRegistry> {
        self.dispatcher.registry()
    }

    /// Run one operation as `user_id` at transaction time `now`.
    pub fn execute(
        &mut self,
        user_id: &str,
        now: Timestamp,
        op: Operation,
    ) -> Result<TxOutcome, TxError> {
        self.dispatcher
            .execute(self.backend.store_mut(), user_id, now, op)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn entity(&self, guid: &Guid) -> Result<Option<EntityRecord>, MetarepoError> {
        let snapshot = self.backend.store().snapshot()?;
        load_entity(snapshot.as_ref(), guid)
    }

    pub fn relationship(&self, guid: &Guid) -> Result<Option<Relationship>, MetarepoError> {
        let snapshot = self.backend.store().snapshot()?;
        load_relationship(snapshot.as_ref(), guid)
    }

    pub fn relationships_for(
        &self,
        entity: &Guid,
        include_deleted: bool,
    ) -> Result<Vec<Relationship>, MetarepoError> {
        let snapshot = self.backend.store().snapshot()?;
        load_relationships_for(snapshot.as_ref(), entity, include_deleted)
    }

    /// Up to `limit` versions of the instance under `guid`, newest first.
    ///
    /// Empty when nothing is stored under the guid (never stored, or purged).
    pub fn history(&self, guid: &Guid, limit: usize) -> Result<Vec<HistoryEntry>, MetarepoError> {
        let snapshot = self.backend.store().snapshot()?;
        let entity = DocId::entity(guid);
        let id = if snapshot.get(&entity)?.is_some() {
            entity
        } else {
            DocId::relationship(guid)
        };
        snapshot.history(&id)?.take(limit).collect()
    }

    pub fn sequence(&self) -> Result<u64, MetarepoError> {
        self.backend.store().sequence()
    }
}

// =============================================================================
// TESTS
// =============================================================================
