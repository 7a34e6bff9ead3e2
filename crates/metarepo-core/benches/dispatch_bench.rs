//! # Dispatch Benchmarks
//!
//! Throughput of the write path on both storage backends.
//!
//! Run with: `cargo bench -p metarepo-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use metarepo_core::{
    AttributeDef, AttributeKind, Guid, InstanceProperties, InstanceStatus, NewInstance, Operation,
    PrimitiveCategory, PropertyValue, RelationshipEndDef, Repository, RepositoryIdentity,
    Timestamp, TypeCatalog, TypeCategory, TypeDef,
};
use std::hint::black_box;
use std::sync::Arc;

fn def(guid: &str, name: &str, category: TypeCategory) -> TypeDef {
    TypeDef {
        guid: guid.to_string(),
        name: name.to_string(),
        category,
        super_type: None,
        description: None,
        attributes: vec![AttributeDef {
            name: "name".to_string(),
            kind: AttributeKind::Primitive(PrimitiveCategory::String),
        }],
        valid_statuses: vec![InstanceStatus::Active, InstanceStatus::Deleted],
        initial_status: InstanceStatus::Active,
        ends: Vec::new(),
        valid_entity_types: Vec::new(),
    }
}

fn repository(path: Option<&std::path::Path>) -> Repository {
    let node = def("t-node", "Node", TypeCategory::Entity);
    let mut edge = def("t-edge", "Edge", TypeCategory::Relationship);
    edge.ends = ["from", "to"]
        .into_iter()
        .map(|attribute| RelationshipEndDef {
            entity_type: "Node".to_string(),
            attribute_name: attribute.to_string(),
        })
        .collect();
    let registry = Arc::new(TypeCatalog::new(vec![node, edge]).expect("catalog"));
    let identity = RepositoryIdentity::new("bench", "Bench Repository");
    match path {
        Some(path) => Repository::with_redb(path, registry, identity).expect("open"),
        None => Repository::in_memory(registry, identity),
    }
}

fn new_instance(guid: String, type_name: &str) -> NewInstance {
    NewInstance {
        properties: InstanceProperties::new().with("name", PropertyValue::string(guid.clone())),
        guid: Guid::new(guid),
        type_name: type_name.to_string(),
        status: None,
    }
}

/// A star: one hub linked to `size` spokes.
fn populate(repo: &mut Repository, size: usize) {
    let mut at = 0;
    let mut run = |repo: &mut Repository, op| {
        at += 1;
        repo.execute("bench", Timestamp(at), op).expect("operation");
    };
    run(repo, Operation::AddEntity {
        entity: new_instance("hub".to_string(), "Node"),
    });
    for i in 0..size {
        run(repo, Operation::AddEntity {
            entity: new_instance(format!("n{i}"), "Node"),
        });
        run(repo, Operation::AddRelationship {
            relationship: new_instance(format!("r{i}"), "Edge"),
            ends: [Guid::from("hub"), Guid::new(format!("n{i}"))],
        });
    }
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_add_entity(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_entity");

    group.bench_function("memory", |b| {
        let mut repo = repository(None);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let op = Operation::AddEntity {
                entity: new_instance(format!("e{i}"), "Node"),
            };
            black_box(repo.execute("bench", Timestamp(i as i64), op).expect("add"));
        });
    });

    group.bench_function("redb", |b| {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut repo = repository(Some(&dir.path().join("bench.redb")));
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let op = Operation::AddEntity {
                entity: new_instance(format!("e{i}"), "Node"),
            };
            black_box(repo.execute("bench", Timestamp(i as i64), op).expect("add"));
        });
    });

    group.finish();
}

fn bench_cascade_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade_delete");

    for size in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let mut repo = repository(None);
                    populate(&mut repo, size);
                    repo
                },
                |mut repo| {
                    let op = Operation::DeleteEntity {
                        guid: Guid::from("hub"),
                    };
                    black_box(repo.execute("bench", Timestamp(i64::MAX), op).expect("delete"))
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_entity, bench_cascade_delete);
criterion_main!(benches);
