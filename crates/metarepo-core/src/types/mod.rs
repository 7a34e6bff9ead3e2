//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the metadata repository:
//! - Identifiers and time (`Guid`, `Timestamp`)
//! - Lifecycle and provenance enums (`InstanceStatus`, `InstanceProvenance`)
//! - The instance header and its maintenance fields
//! - Error types (`MetarepoError`, `ErrorKind`)
//!
//! Instances themselves live in [`instance`], typed property bags in [`properties`].
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Use `BTreeMap`/`BTreeSet` for deterministic ordering
//! - Carry time as caller-supplied `Timestamp` values, never read a clock

pub mod instance;
pub mod properties;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Globally unique identifier of an instance.
///
/// Immutable once assigned. Re-identification creates a new instance under a
/// new guid, it never rewrites this value in place.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(pub String);

impl Guid {
    /// Create a guid from any string-like value.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the guid as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Milliseconds since the Unix epoch.
///
/// The core never reads a clock; every timestamp is supplied by the caller
/// through the transaction context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Create a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Get the raw epoch milliseconds.
    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }
}

// =============================================================================
// LIFECYCLE & PROVENANCE
// =============================================================================

/// Lifecycle status of an instance or classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Unknown,
    Draft,
    Prepared,
    Proposed,
    Approved,
    Rejected,
    Active,
    Deleted,
    Other,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Draft => "DRAFT",
            Self::Prepared => "PREPARED",
            Self::Proposed => "PROPOSED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Active => "ACTIVE",
            Self::Deleted => "DELETED",
            Self::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Where an instance originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceProvenance {
    /// Owned by a member of the cohort; `metadata_collection_id` is its home.
    LocalCohort,
    /// Mirrors a system outside the cohort; `replicated_by` is responsible for it.
    ExternalSource,
}

/// How a classification came to be attached to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationOrigin {
    Assigned,
    Propagated,
}

/// Category of a type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeCategory {
    Entity,
    Relationship,
    Classification,
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Entity => "entity",
            Self::Relationship => "relationship",
            Self::Classification => "classification",
        };
        f.write_str(name)
    }
}

/// The resolved type of an instance, as recorded on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub type_def_guid: String,
    pub type_def_name: String,
    pub category: TypeCategory,
}

/// Identity of the repository executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    pub metadata_collection_id: String,
    pub metadata_collection_name: String,
}

impl RepositoryIdentity {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata_collection_id: id.into(),
            metadata_collection_name: name.into(),
        }
    }
}

/// An external system an instance can be attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSource {
    pub guid: String,
    pub name: String,
}

// =============================================================================
// MAINTENANCE FIELDS
// =============================================================================

/// Version and audit fields.
///
/// Carried once by every instance header and once per attached classification,
/// so updating a classification never touches the owner's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceFields {
    /// Optimistic-concurrency token. Starts at 1.
    pub version: u64,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub create_time: Timestamp,
    pub update_time: Option<Timestamp>,
    /// Union of every user that created or updated the record.
    pub maintained_by: BTreeSet<String>,
}

impl MaintenanceFields {
    /// Fields of a freshly created record (version 1).
    #[must_use]
    pub fn created(user_id: &str, now: Timestamp) -> Self {
        Self {
            version: 1,
            created_by: user_id.to_string(),
            updated_by: None,
            create_time: now,
            update_time: None,
            maintained_by: BTreeSet::from([user_id.to_string()]),
        }
    }
}

// =============================================================================
// INSTANCE HEADER
// =============================================================================

/// Fields shared by entities, proxies and relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHeader {
    pub guid: Guid,
    pub instance_type: InstanceType,
    pub status: InstanceStatus,
    /// Status to restore to while `status` is `Deleted`.
    pub status_on_delete: Option<InstanceStatus>,
    pub provenance: InstanceProvenance,
    pub metadata_collection_id: String,
    pub metadata_collection_name: Option<String>,
    pub replicated_by: Option<String>,
    pub re_identified_from_guid: Option<Guid>,
    pub maintenance: MaintenanceFields,
}

impl InstanceHeader {
    #[must_use]
    pub fn version(&self) -> u64 {
        self.maintenance.version
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == InstanceStatus::Deleted
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.instance_type.type_def_name
    }
}

/// Anything that has a home repository and a provenance.
///
/// Implemented by instance headers and by classifications, which are homed
/// independently of the entity they are attached to.
pub trait Homed {
    fn provenance(&self) -> InstanceProvenance;
    fn metadata_collection_id(&self) -> &str;
    fn replicated_by(&self) -> Option<&str>;
}

impl Homed for InstanceHeader {
    fn provenance(&self) -> InstanceProvenance {
        self.provenance
    }

    fn metadata_collection_id(&self) -> &str {
        &self.metadata_collection_id
    }

    fn replicated_by(&self) -> Option<&str> {
        self.replicated_by.as_deref()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Coarse classification of a failure, used by callers to pick a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Entity, relationship or classification absent.
    NotFound,
    /// Already deleted, not deleted, or proxy-only where a full instance is required.
    InvalidState,
    /// Home mismatch, reference-copy collision, incompatible relationship ends.
    Conflict,
    /// Malformed or undefined properties, bad arguments.
    InvalidParameter,
    /// Unknown type or incompatible type usage.
    TypeError,
    /// Corrupt stored data or broken internal invariant.
    Repository,
    /// Failure of the backing store or of document encoding.
    Storage,
}

/// Errors that can occur in the repository write path.
///
/// - No silent failures
/// - Every transaction function returns `Result<T, MetarepoError>`
/// - A failure anywhere aborts the whole write-set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetarepoError {
    #[error("Entity {0} is not known to this repository")]
    EntityNotKnown(Guid),

    #[error("Relationship {0} is not known to this repository")]
    RelationshipNotKnown(Guid),

    #[error("Classification {classification} is not attached to entity {entity}")]
    ClassificationNotKnown { entity: Guid, classification: String },

    #[error("Entity {0} is deleted")]
    EntityDeleted(Guid),

    #[error("Relationship {0} is deleted")]
    RelationshipDeleted(Guid),

    #[error("Entity {0} is not deleted")]
    EntityNotDeleted(Guid),

    #[error("Relationship {0} is not deleted")]
    RelationshipNotDeleted(Guid),

    #[error("Entity {0} is only known as a proxy")]
    EntityProxyOnly(Guid),

    #[error("Undo of {guid} would move its status from {from} to {to}; delete and restore do that")]
    UndoCrossesDelete {
        guid: Guid,
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("Instance {guid} is homed in {home} and cannot be changed here")]
    InstanceHomeNotLocal { guid: Guid, home: String },

    #[error("Entity {0} is homed in this repository and cannot be saved as a reference copy")]
    HomeEntity(Guid),

    #[error("Relationship {0} is homed in this repository and cannot be saved as a reference copy")]
    HomeRelationship(Guid),

    #[error(
        "Classification {classification} on {entity} is homed in this repository and cannot be replicated"
    )]
    HomeClassification { entity: Guid, classification: String },

    #[error("Entity {guid} is already held as a reference copy from {existing}, not {incoming}")]
    EntityConflict {
        guid: Guid,
        existing: String,
        incoming: String,
    },

    #[error(
        "Relationship {guid} is already held as a reference copy from {existing}, not {incoming}"
    )]
    RelationshipConflict {
        guid: Guid,
        existing: String,
        incoming: String,
    },

    #[error(
        "Classification {classification} on {entity} is already held from {existing}, not {incoming}"
    )]
    ClassificationConflict {
        entity: Guid,
        classification: String,
        existing: String,
        incoming: String,
    },

    #[error("Classification {classification} is already attached to entity {entity}")]
    ClassificationAlreadyAttached { entity: Guid, classification: String },

    #[error("Guid {0} is already in use")]
    GuidAlreadyInUse(Guid),

    #[error(
        "End {end} of relationship {relationship} is a {entity_type}, which is not a {expected}"
    )]
    RelationshipEndsIncompatible {
        relationship: Guid,
        end: usize,
        entity_type: String,
        expected: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Property {property} is not defined by type {type_name}")]
    PropertyUndefined { type_name: String, property: String },

    #[error("Property {property} of type {type_name} expects {expected}, got {actual}")]
    PropertyTypeMismatch {
        type_name: String,
        property: String,
        expected: String,
        actual: String,
    },

    #[error("Status {status} is not valid for type {type_name}")]
    StatusNotSupported {
        type_name: String,
        status: InstanceStatus,
    },

    #[error("Type {0} is not known")]
    TypeDefNotKnown(String),

    #[error("Type {type_name} is a {actual} type, expected a {expected} type")]
    TypeCategoryMismatch {
        type_name: String,
        expected: TypeCategory,
        actual: TypeCategory,
    },

    #[error("Classification {classification} cannot be attached to a {entity_type}")]
    ClassificationInvalidForEntity {
        classification: String,
        entity_type: String,
    },

    #[error("Cannot change type from {from} to {to}: {reason}")]
    InvalidTypeChange {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid type definition: {0}")]
    InvalidTypeDefinition(String),

    #[error("Corrupt document {id}: {reason}")]
    CorruptDocument { id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MetarepoError {
    /// The caller-facing category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EntityNotKnown(_)
            | Self::RelationshipNotKnown(_)
            | Self::ClassificationNotKnown { .. } => ErrorKind::NotFound,

            Self::EntityDeleted(_)
            | Self::RelationshipDeleted(_)
            | Self::EntityNotDeleted(_)
            | Self::RelationshipNotDeleted(_)
            | Self::EntityProxyOnly(_)
            | Self::UndoCrossesDelete { .. } => ErrorKind::InvalidState,

            Self::InstanceHomeNotLocal { .. }
            | Self::HomeEntity(_)
            | Self::HomeRelationship(_)
            | Self::HomeClassification { .. }
            | Self::EntityConflict { .. }
            | Self::RelationshipConflict { .. }
            | Self::ClassificationConflict { .. }
            | Self::ClassificationAlreadyAttached { .. }
            | Self::GuidAlreadyInUse(_)
            | Self::RelationshipEndsIncompatible { .. } => ErrorKind::Conflict,

            Self::InvalidParameter(_)
            | Self::PropertyUndefined { .. }
            | Self::PropertyTypeMismatch { .. }
            | Self::StatusNotSupported { .. } => ErrorKind::InvalidParameter,

            Self::TypeDefNotKnown(_)
            | Self::TypeCategoryMismatch { .. }
            | Self::ClassificationInvalidForEntity { .. }
            | Self::InvalidTypeChange { .. } => ErrorKind::TypeError,

            Self::InvalidTypeDefinition(_) | Self::CorruptDocument { .. } => ErrorKind::Repository,

            Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
