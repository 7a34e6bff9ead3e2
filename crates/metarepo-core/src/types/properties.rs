//! # Instance Properties
//!
//! Typed property bags carried by entities, relationships and classifications.
//! Properties are validated against the attribute schema of the resolved type
//! (see `validation::properties_match_type`).

use super::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Category of a primitive property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveCategory {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    BigInteger,
    BigDecimal,
    String,
    Date,
}

impl fmt::Display for PrimitiveCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::BigInteger => "biginteger",
            Self::BigDecimal => "bigdecimal",
            Self::String => "string",
            Self::Date => "date",
        };
        f.write_str(name)
    }
}

/// A primitive property value.
///
/// Arbitrary-precision numbers are carried in their decimal string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveValue {
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    BigInteger(String),
    BigDecimal(String),
    String(String),
    Date(Timestamp),
}

impl PrimitiveValue {
    #[must_use]
    pub fn category(&self) -> PrimitiveCategory {
        match self {
            Self::Boolean(_) => PrimitiveCategory::Boolean,
            Self::Byte(_) => PrimitiveCategory::Byte,
            Self::Char(_) => PrimitiveCategory::Char,
            Self::Short(_) => PrimitiveCategory::Short,
            Self::Int(_) => PrimitiveCategory::Int,
            Self::Long(_) => PrimitiveCategory::Long,
            Self::BigInteger(_) => PrimitiveCategory::BigInteger,
            Self::BigDecimal(_) => PrimitiveCategory::BigDecimal,
            Self::String(_) => PrimitiveCategory::String,
            Self::Date(_) => PrimitiveCategory::Date,
        }
    }
}

// =============================================================================
// PROPERTY VALUES
// =============================================================================

/// Kind of a collection-valued property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Array,
    Map,
    Struct,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Array => "array",
            Self::Map => "map",
            Self::Struct => "struct",
        };
        f.write_str(name)
    }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Primitive(PrimitiveValue),
    Enum { ordinal: i32, symbolic_name: String },
    Array(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    Struct(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Shorthand for a string primitive.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Primitive(PrimitiveValue::String(value.into()))
    }

    /// Shorthand for an int primitive.
    #[must_use]
    pub fn int(value: i32) -> Self {
        Self::Primitive(PrimitiveValue::Int(value))
    }

    /// Shorthand for a boolean primitive.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::Primitive(PrimitiveValue::Boolean(value))
    }

    /// Collection kind, if this is a collection value.
    #[must_use]
    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self {
            Self::Array(_) => Some(CollectionKind::Array),
            Self::Map(_) => Some(CollectionKind::Map),
            Self::Struct(_) => Some(CollectionKind::Struct),
            Self::Primitive(_) | Self::Enum { .. } => None,
        }
    }

    /// Human-readable category used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Primitive(p) => p.category().to_string(),
            Self::Enum { symbolic_name, .. } => format!("enum {}", symbolic_name),
            Self::Array(_) => "array".to_string(),
            Self::Map(_) => "map".to_string(),
            Self::Struct(_) => "struct".to_string(),
        }
    }
}

// =============================================================================
// PROPERTY BAG
// =============================================================================

/// Named property values of one instance, in deterministic name order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceProperties(BTreeMap<String, PropertyValue>);

impl InstanceProperties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
