//! # Classification Engine
//!
//! Attach, detach and update classifications on entities and proxies.
//!
//! A classification carries its own version, maintainers and home. Changing
//! one never bumps the owning entity's version; it only moves the entity's
//! last-classification-change marker, which feeds the valid time of the write.

use crate::lifecycle::increment_entity_version;
use crate::replication;
use crate::transaction::Transaction;
use crate::typedefs::TypeDef;
use crate::types::instance::{Classification, EntityProxy, EntityRecord};
use crate::types::properties::InstanceProperties;
use crate::types::{
    ClassificationOrigin, ExternalSource, Guid, InstanceProvenance, MaintenanceFields,
    MetarepoError, RepositoryIdentity, Timestamp, TypeCategory,
};
use crate::validation;
use serde::{Deserialize, Serialize};

fn default_origin() -> ClassificationOrigin {
    ClassificationOrigin::Assigned
}

/// Caller-supplied part of a new classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClassification {
    /// Classification type name.
    pub name: String,
    #[serde(default)]
    pub properties: InstanceProperties,
    #[serde(default = "default_origin")]
    pub origin: ClassificationOrigin,
    #[serde(default)]
    pub origin_guid: Option<Guid>,
    /// Set when the classification mirrors an external system.
    #[serde(default)]
    pub source: Option<ExternalSource>,
}

impl NewClassification {
    #[must_use]
    pub fn assigned(name: impl Into<String>, properties: InstanceProperties) -> Self {
        Self {
            name: name.into(),
            properties,
            origin: ClassificationOrigin::Assigned,
            origin_guid: None,
            source: None,
        }
    }
}

/// Build a version-1 classification of type `def`.
pub fn new_classification(
    def: &TypeDef,
    request: NewClassification,
    local: &RepositoryIdentity,
    user_id: &str,
    now: Timestamp,
) -> Classification {
    let (provenance, home, home_name, replicated_by) = match request.source {
        None => (
            InstanceProvenance::LocalCohort,
            local.metadata_collection_id.clone(),
            local.metadata_collection_name.clone(),
            None,
        ),
        Some(source) => (
            InstanceProvenance::ExternalSource,
            source.guid,
            source.name,
            Some(local.metadata_collection_id.clone()),
        ),
    };

    Classification {
        name: def.name.clone(),
        type_def_guid: def.guid.clone(),
        origin: request.origin,
        origin_guid: request.origin_guid,
        status: def.initial_status,
        properties: request.properties,
        provenance,
        metadata_collection_id: home,
        metadata_collection_name: Some(home_name),
        replicated_by,
        maintenance: MaintenanceFields::created(user_id, now),
    }
}

/// Write an entity whose classifications changed.
///
/// Entities homed elsewhere are funnelled through the reference-copy save so
/// they pass the same conflict checks as any other replicated write.
pub(crate) fn persist(
    tx: &mut Transaction<'_>,
    record: EntityRecord,
) -> Result<EntityRecord, MetarepoError> {
    if validation::is_locally_homed(record.header(), tx.local_id()) {
        tx.put_entity(record.clone())?;
        Ok(record)
    } else {
        replication::save_reclassified_copy(tx, record)
    }
}

/// Attach a classification.
///
/// The entity is the stored one when known, else the supplied proxy.
pub fn classify(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    proxy: Option<EntityProxy>,
    request: NewClassification,
) -> Result<EntityRecord, MetarepoError> {
    let mut record = match (tx.find_entity(guid)?, proxy) {
        (Some(stored), _) => stored,
        (None, Some(proxy)) if proxy.header.guid == *guid => EntityRecord::Proxy(proxy),
        (None, Some(proxy)) => {
            return Err(MetarepoError::InvalidParameter(format!(
                "proxy {} does not match entity {}",
                proxy.header.guid, guid
            )));
        }
        (None, None) => return Err(MetarepoError::EntityNotKnown(guid.clone())),
    };
    validation::is_not_deleted(record.header())?;

    let registry = tx.registry();
    let def = registry.resolve_name(&request.name, TypeCategory::Classification)?;
    if record.classification(&def.name).is_some() {
        return Err(MetarepoError::ClassificationAlreadyAttached {
            entity: guid.clone(),
            classification: def.name.clone(),
        });
    }
    validation::valid_type(registry, &record.header().instance_type, TypeCategory::Entity)?;
    validation::classification_valid_for_entity_type(registry, def, record.header().type_name())?;
    validation::properties_match_type(registry, &def.name, &request.properties)?;

    let classification = new_classification(def, request, &tx.ctx().local, tx.user_id(), tx.now());
    record.classifications_mut().push(classification);
    record.set_last_classification_change(Some(tx.now()));

    persist(tx, record)
}

/// Detach a classification.
pub fn declassify(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    name: &str,
) -> Result<EntityRecord, MetarepoError> {
    let mut record = tx.entity(guid)?;
    validation::is_not_deleted(record.header())?;

    let attached = record
        .classification(name)
        .ok_or_else(|| MetarepoError::ClassificationNotKnown {
            entity: guid.clone(),
            classification: name.to_string(),
        })?;
    validation::can_be_updated(attached, guid, tx.local_id())?;

    record.classifications_mut().retain(|c| c.name != name);
    record.set_last_classification_change(Some(tx.now()));

    persist(tx, record)
}

/// Replace a classification's properties, bumping only its own version.
pub fn update_classification(
    tx: &mut Transaction<'_>,
    guid: &Guid,
    name: &str,
    properties: InstanceProperties,
) -> Result<EntityRecord, MetarepoError> {
    let mut record = tx.entity(guid)?;
    validation::is_not_deleted(record.header())?;

    let attached = record
        .classification(name)
        .ok_or_else(|| MetarepoError::ClassificationNotKnown {
            entity: guid.clone(),
            classification: name.to_string(),
        })?;
    validation::can_be_updated(attached, guid, tx.local_id())?;
    validation::properties_match_type(tx.registry(), name, &properties)?;

    if let Some(attached) = record.classification_mut(name) {
        attached.properties = properties;
    }
    increment_entity_version(tx.user_id(), &mut record, Some(name), tx.now())?;
    record.set_last_classification_change(Some(tx.now()));

    persist(tx, record)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::typedefs::TypeRegistry;
    use crate::store::{DocumentStore, WriteOp};
    use crate::types::instance::Document;
    use crate::types::properties::PropertyValue;

    fn conf(level: i32) -> NewClassification {
        NewClassification::assigned(
            "Confidentiality",
            InstanceProperties::new().with("level", PropertyValue::int(level)),
        )
    }

    fn pending_entity(tx: &Transaction<'_>, guid: &str) -> EntityRecord {
        let id = crate::types::instance::DocId::entity(&Guid::from(guid));
        match tx.writes().pending(&id) {
            Some(WriteOp::Put { document, .. }) => document
                .clone()
                .into_entity()
                .expect("entity document"),
            other => unreachable!("expected a put, got {other:?}"),
        }
    }

    #[test]
    fn classify_does_not_bump_entity_version() {
        let catalog = fixtures::catalog();
        let store = fixtures::store_with(vec![Document::Entity(fixtures::asset(
            "e1",
            fixtures::LOCAL,
        ))]);
        let ctx = fixtures::ctx(50);
        let snapshot = store.snapshot().expect("snapshot");
        let mut tx = Transaction::new(snapshot.as_ref(), &catalog, &ctx);

        let record = classify(&mut tx, &Guid::from("e1"), None, conf(2)).expect("classify");
        assert_eq!(record.header().version(), 1);
        assert_eq!(record.last_classification_change(), Some(Timestamp(50)));
        let attached = record.classification("Confidentiality").expect("attached");
        assert_eq!(attached.version(), 1);
        assert_eq!(attached.metadata_collection_id, fixtures::LOCAL);
        assert_eq!(pending_entity(&tx, "e1"), record);
    }

    #[test]
    fn classify_rejects_duplicates_and_wrong_targets() {
        let catalog = fixtures::catalog();
        let mut classified = fixtures::asset("e1", fixtures::LOCAL);
        classified.classifications.push(new_classification(
            catalog.type_by_name("Confidentiality").expect("type"),
            conf(1),
            &fixtures::identity(),
            fixtures::USER,
            Timestamp(1),
        ));
        let store = fixtures::store_with(vec![
            Document::Entity(classified),
            Document::Entity(fixtures::entity("t1", "GlossaryTerm", fixtures::LOCAL)),
        ]);
        let ctx = fixtures::ctx(50);
        let snapshot = store.snapshot().expect("snapshot");
        let mut tx = Transaction::new(snapshot.as_ref(), &catalog, &ctx);

        assert!(matches!(
            classify(&mut tx, &Guid::from("e1"), None, conf(2)),
            Err(MetarepoError::ClassificationAlreadyAttached { .. })
        ));
        assert!(matches!(
            classify(&mut tx, &Guid::from("t1"), None, conf(2)),
            Err(MetarepoError::ClassificationInvalidForEntity { .. })
        ));
        assert!(matches!(
            classify(&mut tx, &Guid::from("nope"), None, conf(2)),
            Err(MetarepoError::EntityNotKnown(_))
        ));
    }

    #[test]
    fn stored_entity_wins_over_supplied_proxy() {
        let catalog = fixtures::catalog();
        let store = fixtures::store_with(vec![Document::Entity(fixtures::asset(
            "e1",
            fixtures::LOCAL,
        ))]);
        let ctx = fixtures::ctx(50);
        let snapshot = store.snapshot().expect("snapshot");
        let mut tx = Transaction::new(snapshot.as_ref(), &catalog, &ctx);

        let proxy = fixtures::proxy("e1", fixtures::LOCAL);
        let record =
            classify(&mut tx, &Guid::from("e1"), Some(proxy), conf(1)).expect("classify");
        assert!(!record.is_proxy());
    }

    #[test]
    fn classifying_remote_proxy_goes_through_reference_copy() {
        let catalog = fixtures::catalog();
        let store = fixtures::store_with(Vec::new());
        let ctx = fixtures::ctx(50);
        let snapshot = store.snapshot().expect("snapshot");
        let mut tx = Transaction::new(snapshot.as_ref(), &catalog, &ctx);

        let proxy = fixtures::proxy("e1", fixtures::REMOTE);
        let record =
            classify(&mut tx, &Guid::from("e1"), Some(proxy), conf(1)).expect("classify");
        assert!(record.is_proxy());
        assert_eq!(pending_entity(&tx, "e1"), record);
        assert_eq!(
            record.header().metadata_collection_id,
            fixtures::REMOTE.to_string()
        );

        let mismatched = fixtures::proxy("e2", fixtures::REMOTE);
        assert!(matches!(
            classify(&mut tx, &Guid::from("e3"), Some(mismatched), conf(1)),
            Err(MetarepoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn update_bumps_classification_only() {
        let catalog = fixtures::catalog();
        let mut entity = fixtures::asset("e1", fixtures::LOCAL);
        entity.classifications.push(new_classification(
            catalog.type_by_name("Confidentiality").expect("type"),
            conf(1),
            &fixtures::identity(),
            fixtures::USER,
            Timestamp(1),
        ));
        let store = fixtures::store_with(vec![Document::Entity(entity)]);
        let ctx = fixtures::ctx(60);
        let snapshot = store.snapshot().expect("snapshot");
        let mut tx = Transaction::new(snapshot.as_ref(), &catalog, &ctx);

        let record = update_classification(
            &mut tx,
            &Guid::from("e1"),
            "Confidentiality",
            InstanceProperties::new().with("level", PropertyValue::int(5)),
        )
        .expect("update");
        assert_eq!(record.header().version(), 1);
        let attached = record.classification("Confidentiality").expect("attached");
        assert_eq!(attached.version(), 2);
        assert_eq!(attached.properties.get("level"), Some(&PropertyValue::int(5)));

        assert!(matches!(
            declassify(&mut tx, &Guid::from("e1"), "Memento"),
            Err(MetarepoError::ClassificationNotKnown { .. })
        ));
        let record = declassify(&mut tx, &Guid::from("e1"), "Confidentiality").expect("remove");
        assert!(record.classifications().is_empty());
    }

    #[test]
    fn remote_classification_cannot_be_changed_here() {
        let catalog = fixtures::catalog();
        let mut entity = fixtures::asset("e1", fixtures::LOCAL);
        let mut remote = new_classification(
            catalog.type_by_name("Memento").expect("type"),
            NewClassification::assigned("Memento", InstanceProperties::new()),
            &fixtures::identity(),
            fixtures::USER,
            Timestamp(1),
        );
        remote.metadata_collection_id = fixtures::REMOTE.to_string();
        entity.classifications.push(remote);
        let store = fixtures::store_with(vec![Document::Entity(entity)]);
        let ctx = fixtures::ctx(60);
        let snapshot = store.snapshot().expect("snapshot");
        let mut tx = Transaction::new(snapshot.as_ref(), &catalog, &ctx);

        assert!(matches!(
            declassify(&mut tx, &Guid::from("e1"), "Memento"),
            Err(MetarepoError::InstanceHomeNotLocal { .. })
        ));
    }
}
