//! # Metadata Instances
//!
//! Entities, entity proxies and relationships, the classifications attached to
//! entities, and the `Document` form in which all of them are stored.

use super::properties::InstanceProperties;
use super::{
    ClassificationOrigin, Guid, Homed, InstanceHeader, InstanceProvenance, InstanceStatus,
    MaintenanceFields, MetarepoError, Timestamp,
};
use crate::primitives::{ENTITY_DOC_PREFIX, RELATIONSHIP_DOC_PREFIX};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// A classification attached to an entity or proxy.
///
/// Classifications are versioned and homed on their own: the maintenance
/// fields here are independent of the owning entity's header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Classification type name; unique per entity.
    pub name: String,
    pub type_def_guid: String,
    pub origin: ClassificationOrigin,
    /// Entity the classification was propagated from.
    pub origin_guid: Option<Guid>,
    pub status: InstanceStatus,
    pub properties: InstanceProperties,
    pub provenance: InstanceProvenance,
    pub metadata_collection_id: String,
    pub metadata_collection_name: Option<String>,
    pub replicated_by: Option<String>,
    pub maintenance: MaintenanceFields,
}

impl Classification {
    #[must_use]
    pub fn version(&self) -> u64 {
        self.maintenance.version
    }
}

impl Homed for Classification {
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
// INSTANCE TRAIT
// =============================================================================

/// A fully known instance: a header plus a property bag.
pub trait Instance {
    fn header(&self) -> &InstanceHeader;
    fn header_mut(&mut self) -> &mut InstanceHeader;
    fn properties(&self) -> &InstanceProperties;
    fn properties_mut(&mut self) -> &mut InstanceProperties;
}

// =============================================================================
// ENTITIES
// =============================================================================

/// A fully known entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDetail {
    pub header: InstanceHeader,
    pub properties: InstanceProperties,
    pub classifications: Vec<Classification>,
    /// Last time the classification list changed.
    pub last_classification_change: Option<Timestamp>,
}

impl Instance for EntityDetail {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut InstanceHeader {
        &mut self.header
    }

    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut InstanceProperties {
        &mut self.properties
    }
}

/// Placeholder for an entity that is not fully known locally.
///
/// Serves as a relationship endpoint; may later be upgraded in place to an
/// `EntityDetail` under the same guid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProxy {
    pub header: InstanceHeader,
    /// Identifying properties only.
    pub unique_properties: InstanceProperties,
    pub classifications: Vec<Classification>,
    pub last_classification_change: Option<Timestamp>,
}

impl EntityProxy {
    /// Reduce a full entity to its proxy projection.
    #[must_use]
    pub fn from_entity(entity: &EntityDetail) -> Self {
        Self {
            header: entity.header.clone(),
            unique_properties: InstanceProperties::new(),
            classifications: entity.classifications.clone(),
            last_classification_change: entity.last_classification_change,
        }
    }
}

/// An entity as held by the store: either fully known or a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRecord {
    Detail(EntityDetail),
    Proxy(EntityProxy),
}

impl EntityRecord {
    #[must_use]
    pub fn header(&self) -> &InstanceHeader {
        match self {
            Self::Detail(e) => &e.header,
            Self::Proxy(p) => &p.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut InstanceHeader {
        match self {
            Self::Detail(e) => &mut e.header,
            Self::Proxy(p) => &mut p.header,
        }
    }

    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }

    #[must_use]
    pub fn classifications(&self) -> &[Classification] {
        match self {
            Self::Detail(e) => &e.classifications,
            Self::Proxy(p) => &p.classifications,
        }
    }

    pub fn classifications_mut(&mut self) -> &mut Vec<Classification> {
        match self {
            Self::Detail(e) => &mut e.classifications,
            Self::Proxy(p) => &mut p.classifications,
        }
    }

    #[must_use]
    pub fn classification(&self, name: &str) -> Option<&Classification> {
        self.classifications().iter().find(|c| c.name == name)
    }

    pub fn classification_mut(&mut self, name: &str) -> Option<&mut Classification> {
        self.classifications_mut().iter_mut().find(|c| c.name == name)
    }

    #[must_use]
    pub fn last_classification_change(&self) -> Option<Timestamp> {
        match self {
            Self::Detail(e) => e.last_classification_change,
            Self::Proxy(p) => p.last_classification_change,
        }
    }

    pub fn set_last_classification_change(&mut self, at: Option<Timestamp>) {
        match self {
            Self::Detail(e) => e.last_classification_change = at,
            Self::Proxy(p) => p.last_classification_change = at,
        }
    }
}

impl From<EntityRecord> for Document {
    fn from(record: EntityRecord) -> Self {
        match record {
            EntityRecord::Detail(e) => Self::Entity(e),
            EntityRecord::Proxy(p) => Self::Proxy(p),
        }
    }
}

// =============================================================================
// RELATIONSHIP
// =============================================================================

/// A typed link between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub header: InstanceHeader,
    pub properties: InstanceProperties,
    /// Ordered endpoints; exactly two in any well-formed relationship.
    pub entity_proxies: Vec<Guid>,
}

impl Instance for Relationship {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut InstanceHeader {
        &mut self.header
    }

    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut InstanceProperties {
        &mut self.properties
    }
}

impl Relationship {
    /// Both endpoints, or `CorruptDocument` if the stored end list is malformed.
    pub fn ends(&self) -> Result<(&Guid, &Guid), MetarepoError> {
        match self.entity_proxies.as_slice() {
            [one, two] => Ok((one, two)),
            other => Err(MetarepoError::CorruptDocument {
                id: DocId::relationship(&self.header.guid).to_string(),
                reason: format!("relationship has {} ends, expected 2", other.len()),
            }),
        }
    }

    #[must_use]
    pub fn references(&self, entity: &Guid) -> bool {
        self.entity_proxies.iter().any(|end| end == entity)
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Key of a stored document.
///
/// Entities and proxies share one key space so a proxy can be upgraded in place.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    #[must_use]
    pub fn entity(guid: &Guid) -> Self {
        Self(format!("{}{}", ENTITY_DOC_PREFIX, guid))
    }

    #[must_use]
    pub fn relationship(guid: &Guid) -> Self {
        Self(format!("{}{}", RELATIONSHIP_DOC_PREFIX, guid))
    }

    /// Rebuild a key from its stored string form.
    pub fn parse(raw: &str) -> Result<Self, MetarepoError> {
        if raw.starts_with(ENTITY_DOC_PREFIX) || raw.starts_with(RELATIONSHIP_DOC_PREFIX) {
            Ok(Self(raw.to_string()))
        } else {
            Err(MetarepoError::CorruptDocument {
                id: raw.to_string(),
                reason: "unrecognised document key".to_string(),
            })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_relationship(&self) -> bool {
        self.0.starts_with(RELATIONSHIP_DOC_PREFIX)
    }

    /// The guid part of the key.
    #[must_use]
    pub fn guid(&self) -> Guid {
        let raw = self
            .0
            .strip_prefix(ENTITY_DOC_PREFIX)
            .or_else(|| self.0.strip_prefix(RELATIONSHIP_DOC_PREFIX))
            .unwrap_or(&self.0);
        Guid::from(raw)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Document {
    Entity(EntityDetail),
    Proxy(EntityProxy),
    Relationship(Relationship),
}

impl Document {
    #[must_use]
    pub fn header(&self) -> &InstanceHeader {
        match self {
            Self::Entity(e) => &e.header,
            Self::Proxy(p) => &p.header,
            Self::Relationship(r) => &r.header,
        }
    }

    #[must_use]
    pub fn id(&self) -> DocId {
        match self {
            Self::Entity(e) => DocId::entity(&e.header.guid),
            Self::Proxy(p) => DocId::entity(&p.header.guid),
            Self::Relationship(r) => DocId::relationship(&r.header.guid),
        }
    }

    /// Entity or proxy view, `None` for relationships.
    #[must_use]
    pub fn into_entity(self) -> Option<EntityRecord> {
        match self {
            Self::Entity(e) => Some(EntityRecord::Detail(e)),
            Self::Proxy(p) => Some(EntityRecord::Proxy(p)),
            Self::Relationship(_) => None,
        }
    }

    #[must_use]
    pub fn into_relationship(self) -> Option<Relationship> {
        match self {
            Self::Relationship(r) => Some(r),
            Self::Entity(_) | Self::Proxy(_) => None,
        }
    }

    /// Valid time of this document's state.
    ///
    /// The later of the last classification change and the last update, or the
    /// creation time when neither is set.
    #[must_use]
    pub fn effective_time(&self) -> Timestamp {
        let maintenance = &self.header().maintenance;
        let classified = match self {
            Self::Entity(e) => e.last_classification_change,
            Self::Proxy(p) => p.last_classification_change,
            Self::Relationship(_) => None,
        };
        match (classified, maintenance.update_time) {
            (Some(c), Some(u)) => c.max(u),
            (Some(c), None) => c,
            (None, Some(u)) => u,
            (None, None) => maintenance.create_time,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{InstanceType, TypeCategory};

    fn header(guid: &str) -> InstanceHeader {
        InstanceHeader {
            guid: Guid::from(guid),
            instance_type: InstanceType {
                type_def_guid: "t-1".into(),
                type_def_name: "Link".into(),
                category: TypeCategory::Relationship,
            },
            status: InstanceStatus::Active,
            status_on_delete: None,
            provenance: InstanceProvenance::LocalCohort,
            metadata_collection_id: "mc-1".into(),
            metadata_collection_name: None,
            replicated_by: None,
            re_identified_from_guid: None,
            maintenance: MaintenanceFields::created("u", Timestamp(100)),
        }
    }

    #[test]
    fn doc_id_round_trips_guid() {
        let guid = Guid::from("abc");
        let id = DocId::relationship(&guid);
        assert!(id.is_relationship());
        assert_eq!(id.guid(), guid);
        assert_eq!(DocId::parse(id.as_str()), Ok(id));
        assert!(DocId::parse("bogus").is_err());
    }

    #[test]
    fn malformed_ends_are_corrupt() {
        let rel = Relationship {
            header: header("r1"),
            properties: InstanceProperties::new(),
            entity_proxies: vec![Guid::from("a")],
        };
        assert!(matches!(
            rel.ends(),
            Err(MetarepoError::CorruptDocument { .. })
        ));
    }

    #[test]
    fn effective_time_prefers_latest_change() {
        let mut rel = Relationship {
            header: header("r1"),
            properties: InstanceProperties::new(),
            entity_proxies: vec![Guid::from("a"), Guid::from("b")],
        };
        assert_eq!(
            Document::Relationship(rel.clone()).effective_time(),
            Timestamp(100)
        );

        rel.header.maintenance.update_time = Some(Timestamp(250));
        assert_eq!(
            Document::Relationship(rel).effective_time(),
            Timestamp(250)
        );
    }
}
