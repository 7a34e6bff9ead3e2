//! # Repository Primitives
//!
//! Hardcoded runtime constants for the Metarepo core.
//!
//! These are compiled into the binary and are immutable at runtime.

/// Key prefix of entity and entity-proxy documents.
pub const ENTITY_DOC_PREFIX: &str = "entity:";

/// Key prefix of relationship documents.
pub const RELATIONSHIP_DOC_PREFIX: &str = "relationship:";

/// Exclusive upper bound of the relationship key range (`:` + 1 = `;`).
pub const RELATIONSHIP_DOC_RANGE_END: &str = "relationship;";

/// Current on-disk document format version.
///
/// Increment this when making breaking changes to the stored document encoding.
pub const FORMAT_VERSION: u64 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a guid.
pub const MAX_GUID_LENGTH: usize = 256;

/// Maximum length of a property name.
pub const MAX_PROPERTY_NAME_LENGTH: usize = 256;

/// Maximum number of top-level properties on one instance.
pub const MAX_PROPERTIES_PER_INSTANCE: usize = 1024;

/// Maximum nesting depth of collection-valued properties.
pub const MAX_PROPERTY_DEPTH: usize = 16;

/// Maximum depth of a type's super-type chain.
pub const MAX_TYPE_LINEAGE: usize = 64;
