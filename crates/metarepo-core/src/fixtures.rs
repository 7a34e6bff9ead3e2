//! Shared test fixtures: a small type catalog and instance builders.

use crate::store::{DocumentStore, MemoryStore, WriteSet};
use crate::transaction::TxContext;
use crate::typedefs::{
    AttributeDef, AttributeKind, RelationshipEndDef, TypeCatalog, TypeDef, TypeRegistry,
};
use crate::types::instance::{Document, EntityDetail, EntityProxy, Relationship};
use crate::types::properties::{CollectionKind, InstanceProperties, PrimitiveCategory, PropertyValue};
use crate::types::{
    Guid, InstanceHeader, InstanceProvenance, InstanceStatus, MaintenanceFields,
    RepositoryIdentity, Timestamp, TypeCategory,
};

pub const LOCAL: &str = "mc-local";
pub const REMOTE: &str = "mc-remote";
pub const USER: &str = "tester";

fn def(guid: &str, name: &str, category: TypeCategory, super_type: Option<&str>) -> TypeDef {
    TypeDef {
        guid: guid.to_string(),
        name: name.to_string(),
        category,
        super_type: super_type.map(str::to_string),
        description: None,
        attributes: Vec::new(),
        valid_statuses: vec![InstanceStatus::Active, InstanceStatus::Deleted],
        initial_status: InstanceStatus::Active,
        ends: Vec::new(),
        valid_entity_types: Vec::new(),
    }
}

fn attr(name: &str, kind: AttributeKind) -> AttributeDef {
    AttributeDef {
        name: name.to_string(),
        kind,
    }
}

fn end(entity_type: &str, attribute_name: &str) -> RelationshipEndDef {
    RelationshipEndDef {
        entity_type: entity_type.to_string(),
        attribute_name: attribute_name.to_string(),
    }
}

/// Referenceable <- Asset <- DataSet, Asset <- Process, Referenceable <- GlossaryTerm,
/// AssetLink(Asset, Asset), TermAssignment(GlossaryTerm, Referenceable),
/// Confidentiality (assets only), Memento (any entity).
pub fn catalog() -> TypeCatalog {
    let string = || AttributeKind::Primitive(PrimitiveCategory::String);

    let mut referenceable = def("t-ref", "Referenceable", TypeCategory::Entity, None);
    referenceable.attributes = vec![attr("qualifiedName", string())];

    let mut asset = def("t-asset", "Asset", TypeCategory::Entity, Some("Referenceable"));
    asset.attributes = vec![
        attr("owner", string()),
        attr("tags", AttributeKind::Collection(CollectionKind::Array)),
    ];
    asset.valid_statuses = vec![
        InstanceStatus::Draft,
        InstanceStatus::Active,
        InstanceStatus::Deleted,
    ];

    let mut dataset = def("t-dataset", "DataSet", TypeCategory::Entity, Some("Asset"));
    dataset.attributes = vec![attr("format", string())];

    let process = def("t-process", "Process", TypeCategory::Entity, Some("Asset"));

    let mut term = def("t-term", "GlossaryTerm", TypeCategory::Entity, Some("Referenceable"));
    term.attributes = vec![attr("summary", string())];

    let mut link = def("t-link", "AssetLink", TypeCategory::Relationship, None);
    link.attributes = vec![attr("description", string())];
    link.ends = vec![end("Asset", "source"), end("Asset", "target")];

    let mut assignment = def("t-assign", "TermAssignment", TypeCategory::Relationship, None);
    assignment.ends = vec![end("GlossaryTerm", "term"), end("Referenceable", "assigned")];

    let mut confidentiality = def(
        "t-conf",
        "Confidentiality",
        TypeCategory::Classification,
        None,
    );
    confidentiality.attributes = vec![
        attr("level", AttributeKind::Primitive(PrimitiveCategory::Int)),
        attr(
            "scope",
            AttributeKind::Enum(vec!["INTERNAL".to_string(), "PUBLIC".to_string()]),
        ),
    ];
    confidentiality.valid_entity_types = vec!["Asset".to_string()];

    let mut memento = def("t-memento", "Memento", TypeCategory::Classification, None);
    memento.attributes = vec![attr(
        "archived",
        AttributeKind::Primitive(PrimitiveCategory::Boolean),
    )];

    match TypeCatalog::new(vec![
        referenceable,
        asset,
        dataset,
        process,
        term,
        link,
        assignment,
        confidentiality,
        memento,
    ]) {
        Ok(catalog) => catalog,
        Err(e) => unreachable!("fixture catalog is valid: {e}"),
    }
}

pub fn identity() -> RepositoryIdentity {
    RepositoryIdentity::new(LOCAL, "Local Repository")
}

pub fn ctx(now: i64) -> TxContext {
    TxContext::new(identity(), USER, Timestamp(now))
}

/// Header of a version-1 instance of `type_name` homed in `home`.
pub fn header(guid: &str, type_name: &str, home: &str) -> InstanceHeader {
    let catalog = catalog();
    let instance_type = match catalog.type_by_name(type_name) {
        Some(def) => def.instance_type(),
        None => unreachable!("fixture type {type_name} exists"),
    };
    InstanceHeader {
        guid: Guid::from(guid),
        instance_type,
        status: InstanceStatus::Active,
        status_on_delete: None,
        provenance: InstanceProvenance::LocalCohort,
        metadata_collection_id: home.to_string(),
        metadata_collection_name: None,
        replicated_by: None,
        re_identified_from_guid: None,
        maintenance: MaintenanceFields::created("creator", Timestamp(1)),
    }
}

pub fn asset(guid: &str, home: &str) -> EntityDetail {
    entity(guid, "Asset", home)
}

pub fn entity(guid: &str, type_name: &str, home: &str) -> EntityDetail {
    EntityDetail {
        header: header(guid, type_name, home),
        properties: InstanceProperties::new()
            .with("qualifiedName", PropertyValue::string(format!("qn:{guid}"))),
        classifications: Vec::new(),
        last_classification_change: None,
    }
}

pub fn proxy(guid: &str, home: &str) -> EntityProxy {
    EntityProxy::from_entity(&asset(guid, home))
}

pub fn link(guid: &str, one: &str, two: &str, home: &str) -> Relationship {
    Relationship {
        header: header(guid, "AssetLink", home),
        properties: InstanceProperties::new(),
        entity_proxies: vec![Guid::from(one), Guid::from(two)],
    }
}

/// Commit `documents` as one write-set at time `at`.
pub fn seed(store: &mut dyn DocumentStore, documents: Vec<Document>, at: i64) {
    let mut writes = WriteSet::new(Timestamp(at));
    for document in documents {
        writes.put(document, Timestamp(at));
    }
    if let Err(e) = store.commit(writes) {
        unreachable!("seeding a store cannot fail: {e}");
    }
}

/// A memory store holding `documents`.
pub fn store_with(documents: Vec<Document>) -> MemoryStore {
    let mut store = MemoryStore::new();
    seed(&mut store, documents, 1);
    store
}
