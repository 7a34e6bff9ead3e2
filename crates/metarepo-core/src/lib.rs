//! # metarepo-core
//!
//! The write path of a versioned, replicated metadata repository.
//!
//! Entities, relationships and the classifications attached to entities are
//! stored as documents. Every client operation runs as one transaction
//! function: it reads a single snapshot, validates its preconditions and
//! yields the exact set of documents to write, which the store commits
//! atomically.
//!
//! ## Layers
//!
//! - `dispatcher` routes an [`Operation`] to its transaction function
//! - `lifecycle`, `classification`, `replication`, `reidentify`, `undo` and
//!   `cascade` compute the writes
//! - `validation` holds the shared precondition checks
//! - `store` persists documents with per-document history
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies
//! - No clocks: transaction time is supplied by the caller
//! - Type definitions and repository identity are injected

// =============================================================================
// MODULES
// =============================================================================

pub mod cascade;
pub mod classification;
pub mod dispatcher;
pub mod lifecycle;
pub mod primitives;
pub mod reidentify;
pub mod replication;
pub mod repository;
pub mod store;
pub mod transaction;
pub mod typedefs;
pub mod types;
pub mod undo;
pub mod validation;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod fixtures;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::instance::{
    Classification, DocId, Document, EntityDetail, EntityProxy, EntityRecord, Instance,
    Relationship,
};
pub use types::properties::{
    CollectionKind, InstanceProperties, PrimitiveCategory, PrimitiveValue, PropertyValue,
};
pub use types::{
    ClassificationOrigin, ErrorKind, ExternalSource, Guid, Homed, InstanceHeader,
    InstanceProvenance, InstanceStatus, InstanceType, MaintenanceFields, MetarepoError,
    RepositoryIdentity, Timestamp, TypeCategory,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use classification::NewClassification;
pub use dispatcher::{Dispatcher, Operation, OperationResult, TxError, TxOutcome};
pub use lifecycle::NewInstance;
pub use repository::{Repository, StorageBackend};
pub use store::{
    CommitInfo, DocumentStore, History, HistoryEntry, MemoryStore, RedbStore, Snapshot, WriteSet,
};
pub use transaction::{Transaction, TxContext};
pub use typedefs::{
    AttributeDef, AttributeKind, RelationshipEndDef, TypeCatalog, TypeDef, TypeDefinitions,
    TypeRegistry,
};
