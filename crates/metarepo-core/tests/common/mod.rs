//! Shared setup for the integration tests: a small type catalog, repositories
//! on both storage backends, and request builders.

#![allow(dead_code)]

use metarepo_core::{
    AttributeDef, AttributeKind, EntityDetail, EntityProxy, Guid, InstanceHeader,
    InstanceProperties, InstanceProvenance, InstanceStatus, MaintenanceFields, NewInstance,
    Operation, OperationResult, PrimitiveCategory, PropertyValue, Relationship,
    RelationshipEndDef, Repository, RepositoryIdentity, Timestamp, TxOutcome, TypeCatalog,
    TypeCategory, TypeDef, TypeRegistry,
};
use std::sync::Arc;

pub const LOCAL: &str = "mc-local";
pub const REMOTE: &str = "mc-remote";
pub const USER: &str = "integration";

fn def(guid: &str, name: &str, category: TypeCategory) -> TypeDef {
    TypeDef {
        guid: guid.to_string(),
        name: name.to_string(),
        category,
        super_type: None,
        description: None,
        attributes: Vec::new(),
        valid_statuses: vec![InstanceStatus::Active, InstanceStatus::Deleted],
        initial_status: InstanceStatus::Active,
        ends: Vec::new(),
        valid_entity_types: Vec::new(),
    }
}

fn string_attr(name: &str) -> AttributeDef {
    AttributeDef {
        name: name.to_string(),
        kind: AttributeKind::Primitive(PrimitiveCategory::String),
    }
}

/// Referenceable <- Asset, AssetLink(Asset, Asset), Memento on any entity.
pub fn catalog() -> Arc<dyn TypeRegistry> {
    let mut referenceable = def("t-ref", "Referenceable", TypeCategory::Entity);
    referenceable.attributes = vec![string_attr("qualifiedName")];

    let mut asset = def("t-asset", "Asset", TypeCategory::Entity);
    asset.super_type = Some("Referenceable".to_string());
    asset.attributes = vec![string_attr("owner")];
    asset.valid_statuses = vec![
        InstanceStatus::Draft,
        InstanceStatus::Active,
        InstanceStatus::Deleted,
    ];

    let mut link = def("t-link", "AssetLink", TypeCategory::Relationship);
    link.attributes = vec![string_attr("description")];
    link.ends = ["source", "target"]
        .into_iter()
        .map(|attribute| RelationshipEndDef {
            entity_type: "Asset".to_string(),
            attribute_name: attribute.to_string(),
        })
        .collect();

    let mut memento = def("t-memento", "Memento", TypeCategory::Classification);
    memento.attributes = vec![AttributeDef {
        name: "archived".to_string(),
        kind: AttributeKind::Primitive(PrimitiveCategory::Boolean),
    }];

    Arc::new(TypeCatalog::new(vec![referenceable, asset, link, memento]).expect("catalog"))
}

pub fn identity() -> RepositoryIdentity {
    RepositoryIdentity::new(LOCAL, "Integration Repository")
}

/// Run `test` once against an in-memory and once against a redb repository.
pub fn on_each_backend(test: impl Fn(&mut Repository)) {
    let mut memory = Repository::in_memory(catalog(), identity());
    test(&mut memory);

    let dir = tempfile::tempdir().expect("tempdir");
    let mut redb =
        Repository::with_redb(dir.path().join("metarepo.redb"), catalog(), identity())
            .expect("open redb");
    test(&mut redb);
}

pub fn run(repo: &mut Repository, at: i64, op: Operation) -> TxOutcome {
    repo.execute(USER, Timestamp(at), op).expect("operation")
}

pub fn new_asset(guid: &str) -> NewInstance {
    NewInstance {
        guid: Guid::from(guid),
        type_name: "Asset".to_string(),
        properties: InstanceProperties::new()
            .with("qualifiedName", PropertyValue::string(format!("qn:{guid}"))),
        status: None,
    }
}

pub fn add_asset(repo: &mut Repository, guid: &str, at: i64) -> EntityDetail {
    match run(repo, at, Operation::AddEntity { entity: new_asset(guid) }).result {
        OperationResult::Entity(entity) => entity,
        other => panic!("expected entity, got {other:?}"),
    }
}

pub fn add_link(repo: &mut Repository, guid: &str, one: &str, two: &str, at: i64) -> Relationship {
    let op = Operation::AddRelationship {
        relationship: NewInstance {
            guid: Guid::from(guid),
            type_name: "AssetLink".to_string(),
            properties: InstanceProperties::new(),
            status: None,
        },
        ends: [Guid::from(one), Guid::from(two)],
    };
    match run(repo, at, op).result {
        OperationResult::Relationship(relationship) => relationship,
        other => panic!("expected relationship, got {other:?}"),
    }
}

pub fn remote_header(guid: &str, type_name: &str, home: &str) -> InstanceHeader {
    let registry = catalog();
    let instance_type = registry
        .type_by_name(type_name)
        .expect("type")
        .instance_type();
    InstanceHeader {
        guid: Guid::from(guid),
        instance_type,
        status: InstanceStatus::Active,
        status_on_delete: None,
        provenance: InstanceProvenance::LocalCohort,
        metadata_collection_id: home.to_string(),
        metadata_collection_name: Some(format!("{home} repository")),
        replicated_by: None,
        re_identified_from_guid: None,
        maintenance: MaintenanceFields::created("remote-user", Timestamp(1)),
    }
}

/// A full asset homed in `home`.
pub fn remote_asset(guid: &str, home: &str) -> EntityDetail {
    EntityDetail {
        header: remote_header(guid, "Asset", home),
        properties: InstanceProperties::new()
            .with("qualifiedName", PropertyValue::string(format!("qn:{guid}"))),
        classifications: Vec::new(),
        last_classification_change: None,
    }
}

pub fn remote_proxy(guid: &str, home: &str) -> EntityProxy {
    EntityProxy::from_entity(&remote_asset(guid, home))
}

pub fn remote_link(guid: &str, one: &str, two: &str, home: &str) -> Relationship {
    Relationship {
        header: remote_header(guid, "AssetLink", home),
        properties: InstanceProperties::new(),
        entity_proxies: vec![Guid::from(one), Guid::from(two)],
    }
}

pub fn entity_version(repo: &Repository, guid: &str) -> u64 {
    repo.entity(&Guid::from(guid))
        .expect("read")
        .expect("entity stored")
        .header()
        .version()
}
