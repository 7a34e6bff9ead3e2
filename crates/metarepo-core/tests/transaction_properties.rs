//! # Transaction Properties
//!
//! End-to-end checks of the write path through `Repository`, each run against
//! the in-memory and the redb backend.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::*;
use metarepo_core::{
    Document, DocumentStore, EntityRecord, ErrorKind, Guid, InstanceProperties, InstanceStatus,
    MemoryStore, MetarepoError, NewClassification, Operation, OperationResult, PropertyValue,
    RedbStore, Repository, StorageBackend, Timestamp, WriteSet,
};

// =============================================================================
// VERSIONS
// =============================================================================

mod versions {
    use super::*;

    #[test]
    fn each_accepted_update_adds_one_version() {
        on_each_backend(|repo| {
            add_asset(repo, "e1", 1);
            let updates = [
                Operation::UpdateEntityProperties {
                    guid: Guid::from("e1"),
                    properties: InstanceProperties::new()
                        .with("qualifiedName", PropertyValue::string("qn:e1"))
                        .with("owner", PropertyValue::string("ann")),
                },
                Operation::UpdateEntityStatus {
                    guid: Guid::from("e1"),
                    status: InstanceStatus::Draft,
                },
                Operation::DeleteEntity {
                    guid: Guid::from("e1"),
                },
                Operation::RestoreEntity {
                    guid: Guid::from("e1"),
                },
            ];
            let count = updates.len() as u64;
            for (i, op) in updates.into_iter().enumerate() {
                run(repo, 2 + i as i64, op);
            }
            assert_eq!(entity_version(repo, "e1"), 1 + count);

            let history = repo.history(&Guid::from("e1"), 100).expect("history");
            let versions: Vec<u64> = history
                .iter()
                .map(|entry| entry.document.header().version())
                .collect();
            assert_eq!(versions, vec![5, 4, 3, 2, 1]);
        });
    }

    #[test]
    fn rejected_update_leaves_version_alone() {
        on_each_backend(|repo| {
            add_asset(repo, "e1", 1);
            let err = repo
                .execute(
                    USER,
                    Timestamp(2),
                    Operation::UpdateEntityStatus {
                        guid: Guid::from("e1"),
                        status: InstanceStatus::Deleted,
                    },
                )
                .expect_err("deleted is not settable");
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
            assert_eq!(entity_version(repo, "e1"), 1);
            assert_eq!(repo.sequence().expect("sequence"), 1);
        });
    }

    #[test]
    fn delete_restore_round_trip() {
        on_each_backend(|repo| {
            let original = add_asset(repo, "e1", 1);
            run(repo, 2, Operation::DeleteEntity { guid: Guid::from("e1") });
            run(repo, 3, Operation::RestoreEntity { guid: Guid::from("e1") });

            let restored = match repo.entity(&Guid::from("e1")).expect("read") {
                Some(EntityRecord::Detail(entity)) => entity,
                other => panic!("expected entity, got {other:?}"),
            };
            assert_eq!(restored.header.status, original.header.status);
            assert_eq!(restored.properties, original.properties);
            assert_eq!(restored.header.version(), original.header.version() + 2);
        });
    }
}

// =============================================================================
// HOME ENFORCEMENT
// =============================================================================

mod home_enforcement {
    use super::*;

    #[test]
    fn reference_copies_cannot_be_updated_locally() {
        on_each_backend(|repo| {
            run(
                repo,
                1,
                Operation::SaveEntityReferenceCopy {
                    entity: EntityRecord::Detail(remote_asset("e1", REMOTE)),
                },
            );
            let attempts = [
                Operation::UpdateEntityStatus {
                    guid: Guid::from("e1"),
                    status: InstanceStatus::Draft,
                },
                Operation::DeleteEntity {
                    guid: Guid::from("e1"),
                },
                Operation::ReIdentifyEntity {
                    guid: Guid::from("e1"),
                    new_guid: Guid::from("e2"),
                },
                Operation::PurgeEntity {
                    guid: Guid::from("e1"),
                    force: true,
                },
            ];
            for op in attempts {
                let err = repo.execute(USER, Timestamp(2), op).expect_err("not home");
                assert!(
                    matches!(err.source, MetarepoError::InstanceHomeNotLocal { .. }),
                    "unexpected {err}"
                );
            }
            assert_eq!(entity_version(repo, "e1"), 1);
        });
    }

    #[test]
    fn rehome_takes_ownership() {
        on_each_backend(|repo| {
            run(
                repo,
                1,
                Operation::SaveEntityReferenceCopy {
                    entity: EntityRecord::Detail(remote_asset("e1", REMOTE)),
                },
            );
            run(repo, 2, Operation::RehomeEntity { guid: Guid::from("e1") });
            run(
                repo,
                3,
                Operation::UpdateEntityStatus {
                    guid: Guid::from("e1"),
                    status: InstanceStatus::Draft,
                },
            );
            let stored = repo.entity(&Guid::from("e1")).expect("read").expect("stored");
            assert_eq!(stored.header().metadata_collection_id, LOCAL);
            assert_eq!(stored.header().version(), 3);
        });
    }
}

// =============================================================================
// CASCADES
// =============================================================================

mod cascades {
    use super::*;

    #[test]
    fn delete_entity_soft_deletes_local_and_evicts_foreign_relationships() {
        on_each_backend(|repo| {
            add_asset(repo, "e1", 1);
            add_asset(repo, "e2", 2);
            add_link(repo, "r1", "e1", "e2", 3);
            run(
                repo,
                4,
                Operation::SaveRelationshipReferenceCopy {
                    relationship: remote_link("r2", "x1", "e1", REMOTE),
                    end_proxies: vec![remote_proxy("x1", REMOTE)],
                },
            );

            let outcome = run(repo, 5, Operation::DeleteEntity { guid: Guid::from("e1") });
            let commit = outcome.commit.expect("committed");
            assert_eq!((commit.puts, commit.evictions), (2, 1));

            let r1 = repo.relationship(&Guid::from("r1")).expect("read").expect("r1");
            assert_eq!(r1.header.status, InstanceStatus::Deleted);
            assert_eq!(r1.header.version(), 2);
            assert!(repo.relationship(&Guid::from("r2")).expect("read").is_none());
            assert!(repo.entity(&Guid::from("e1")).expect("read").expect("e1").header().is_deleted());
        });
    }

    #[test]
    fn purge_removes_entity_relationships_and_history() {
        on_each_backend(|repo| {
            add_asset(repo, "e1", 1);
            add_asset(repo, "e2", 2);
            add_link(repo, "r1", "e1", "e2", 3);
            run(repo, 4, Operation::DeleteEntity { guid: Guid::from("e1") });
            run(
                repo,
                5,
                Operation::PurgeEntity {
                    guid: Guid::from("e1"),
                    force: false,
                },
            );

            assert!(repo.entity(&Guid::from("e1")).expect("read").is_none());
            assert!(repo.relationship(&Guid::from("r1")).expect("read").is_none());
            assert!(repo.history(&Guid::from("e1"), 10).expect("history").is_empty());
            assert!(repo.entity(&Guid::from("e2")).expect("read").is_some());
        });
    }
    /// Run `test` on both backends, each starting from `documents` committed
    /// straight to the store as sequence 1.
    fn on_each_seeded_backend(documents: Vec<Document>, test: impl Fn(&mut Repository)) {
        let seed = |store: &mut dyn DocumentStore| {
            let mut writes = WriteSet::new(Timestamp(1));
            for document in documents.clone() {
                writes.put(document, Timestamp(1));
            }
            store.commit(writes).expect("seed");
        };

        let mut memory = MemoryStore::new();
        seed(&mut memory);
        test(&mut Repository::new(
            StorageBackend::InMemory(memory),
            catalog(),
            identity(),
        ));

        let dir = tempfile::tempdir().expect("tempdir");
        let mut redb = RedbStore::open(dir.path().join("metarepo.redb")).expect("open redb");
        seed(&mut redb);
        test(&mut Repository::new(
            StorageBackend::Persistent(redb),
            catalog(),
            identity(),
        ));
    }

    #[test]
    fn failure_midway_through_a_cascade_writes_nothing() {
        // r2 carries a single end, so re-linking it fails after the entity
        // records and r1 have been staged
        let mut broken = remote_link("r2", "e1", "e2", LOCAL);
        broken.entity_proxies = vec![Guid::from("e1")];
        let documents = vec![
            Document::Entity(remote_asset("e1", LOCAL)),
            Document::Entity(remote_asset("e2", LOCAL)),
            Document::Relationship(remote_link("r1", "e1", "e2", LOCAL)),
            Document::Relationship(broken),
        ];

        on_each_seeded_backend(documents, |repo| {
            let before = repo.sequence().expect("sequence");
            let r1_before = repo.relationship(&Guid::from("r1")).expect("read").expect("r1");

            let err = repo
                .execute(
                    USER,
                    Timestamp(5),
                    Operation::ReIdentifyEntity {
                        guid: Guid::from("e1"),
                        new_guid: Guid::from("e9"),
                    },
                )
                .expect_err("broken relationship");
            assert_eq!(err.kind(), ErrorKind::Repository);

            assert_eq!(repo.sequence().expect("sequence"), before);
            let e1 = repo.entity(&Guid::from("e1")).expect("read").expect("e1");
            assert_eq!(e1.header().status, InstanceStatus::Active);
            assert_eq!(e1.header().version(), 1);
            assert!(repo.entity(&Guid::from("e9")).expect("read").is_none());
            assert_eq!(
                repo.relationship(&Guid::from("r1")).expect("read").expect("r1"),
                r1_before
            );
            assert_eq!(repo.history(&Guid::from("e1"), 10).expect("history").len(), 1);
            assert_eq!(repo.history(&Guid::from("r1"), 10).expect("history").len(), 1);
        });
    }
}

// =============================================================================
// TYPE CHANGES
// =============================================================================

mod type_changes {
    use super::*;

    #[test]
    fn retype_entity_must_fit_its_relationships() {
        on_each_backend(|repo| {
            add_asset(repo, "a", 1);
            add_asset(repo, "b", 2);
            add_link(repo, "r", "a", "b", 3);

            let err = repo
                .execute(
                    USER,
                    Timestamp(4),
                    Operation::RetypeEntity {
                        guid: Guid::from("a"),
                        type_name: "Referenceable".to_string(),
                    },
                )
                .expect_err("AssetLink needs an Asset");
            assert!(
                matches!(err.source, MetarepoError::InvalidTypeChange { .. }),
                "unexpected {err}"
            );
            let a = repo.entity(&Guid::from("a")).expect("read").expect("a");
            assert_eq!(a.header().type_name(), "Asset");
            assert_eq!(a.header().version(), 1);

            // once the relationship is gone the retype goes through
            run(repo, 5, Operation::DeleteRelationship { guid: Guid::from("r") });
            run(
                repo,
                6,
                Operation::RetypeEntity {
                    guid: Guid::from("a"),
                    type_name: "Referenceable".to_string(),
                },
            );
            let a = repo.entity(&Guid::from("a")).expect("read").expect("a");
            assert_eq!(a.header().type_name(), "Referenceable");
        });
    }
}

// =============================================================================
// RE-IDENTIFICATION
// =============================================================================

mod re_identification {
    use super::*;

    #[test]
    fn re_identify_links_records_and_relinks_relationships() {
        on_each_backend(|repo| {
            add_asset(repo, "g1", 1);
            add_asset(repo, "gx", 2);
            let before = add_link(repo, "r1", "g1", "gx", 3);

            run(
                repo,
                4,
                Operation::ReIdentifyEntity {
                    guid: Guid::from("g1"),
                    new_guid: Guid::from("g2"),
                },
            );

            let old = repo.entity(&Guid::from("g1")).expect("read").expect("g1");
            assert_eq!(old.header().status, InstanceStatus::Deleted);
            let new = repo.entity(&Guid::from("g2")).expect("read").expect("g2");
            assert_eq!(new.header().re_identified_from_guid, Some(Guid::from("g1")));

            let after = repo.relationship(&Guid::from("r1")).expect("read").expect("r1");
            assert_eq!(after.entity_proxies, vec![Guid::from("g2"), Guid::from("gx")]);
            assert_eq!(after.header, before.header);
            assert_eq!(after.properties, before.properties);

            let linked = repo.relationships_for(&Guid::from("g2"), false).expect("query");
            assert_eq!(linked.len(), 1);
        });
    }
}

// =============================================================================
// UNDO
// =============================================================================

mod undo {
    use super::*;

    #[test]
    fn undo_rolls_back_properties_but_not_classifications() {
        on_each_backend(|repo| {
            add_asset(repo, "e1", 1);
            run(
                repo,
                2,
                Operation::UpdateEntityProperties {
                    guid: Guid::from("e1"),
                    properties: InstanceProperties::new()
                        .with("qualifiedName", PropertyValue::string("qn:e1"))
                        .with("owner", PropertyValue::string("ann")),
                },
            );
            run(
                repo,
                3,
                Operation::UpdateEntityProperties {
                    guid: Guid::from("e1"),
                    properties: InstanceProperties::new()
                        .with("qualifiedName", PropertyValue::string("qn:e1"))
                        .with("owner", PropertyValue::string("bob")),
                },
            );
            run(
                repo,
                4,
                Operation::ClassifyEntity {
                    guid: Guid::from("e1"),
                    proxy: None,
                    classification: NewClassification::assigned(
                        "Memento",
                        InstanceProperties::new(),
                    ),
                },
            );
            assert_eq!(entity_version(repo, "e1"), 3);

            let undone = match run(repo, 5, Operation::UndoEntityUpdate { guid: Guid::from("e1") })
                .result
            {
                OperationResult::Entity(entity) => entity,
                other => panic!("expected entity, got {other:?}"),
            };
            assert_eq!(undone.header.version(), 4);
            assert_eq!(
                undone.properties.get("owner"),
                Some(&PropertyValue::string("ann"))
            );
            assert!(undone.classifications.iter().any(|c| c.name == "Memento"));
        });
    }
    #[test]
    fn undo_does_not_cross_a_delete() {
        on_each_backend(|repo| {
            add_asset(repo, "a", 1);
            add_asset(repo, "b", 2);
            run(repo, 3, Operation::DeleteEntity { guid: Guid::from("a") });

            let err = repo
                .execute(USER, Timestamp(4), Operation::UndoEntityUpdate { guid: Guid::from("a") })
                .expect_err("undo of delete");
            assert_eq!(err.kind(), ErrorKind::InvalidState);

            run(repo, 5, Operation::RestoreEntity { guid: Guid::from("a") });
            add_link(repo, "r", "a", "b", 6);
            let err = repo
                .execute(USER, Timestamp(7), Operation::UndoEntityUpdate { guid: Guid::from("a") })
                .expect_err("undo of restore");
            assert!(
                matches!(err.source, MetarepoError::UndoCrossesDelete { .. }),
                "unexpected {err}"
            );

            let a = repo.entity(&Guid::from("a")).expect("read").expect("a");
            assert_eq!(a.header().status, InstanceStatus::Active);
            assert_eq!(a.header().version(), 3);
            let r = repo.relationship(&Guid::from("r")).expect("read").expect("r");
            assert_eq!(r.header.status, InstanceStatus::Active);
        });
    }

    #[test]
    fn undo_of_relationship_delete_is_rejected() {
        on_each_backend(|repo| {
            add_asset(repo, "a", 1);
            add_asset(repo, "b", 2);
            add_link(repo, "r", "a", "b", 3);
            run(repo, 4, Operation::DeleteRelationship { guid: Guid::from("r") });

            let err = repo
                .execute(
                    USER,
                    Timestamp(5),
                    Operation::UndoRelationshipUpdate { guid: Guid::from("r") },
                )
                .expect_err("undo of delete");
            assert_eq!(err.kind(), ErrorKind::InvalidState);
            let r = repo.relationship(&Guid::from("r")).expect("read").expect("r");
            assert_eq!(r.header.status, InstanceStatus::Deleted);
            assert_eq!(r.header.version(), 2);
        });
    }
}

// =============================================================================
// REPLICATION
// =============================================================================

mod replication {
    use super::*;

    #[test]
    fn conflicting_reference_copy_is_rejected_and_stored_copy_kept() {
        on_each_backend(|repo| {
            run(
                repo,
                1,
                Operation::SaveEntityReferenceCopy {
                    entity: EntityRecord::Detail(remote_asset("g", "mid2")),
                },
            );
            let mut incoming = remote_asset("g", "mid1");
            incoming.header.maintenance.version = 7;
            let err = repo
                .execute(
                    USER,
                    Timestamp(2),
                    Operation::SaveEntityReferenceCopy {
                        entity: EntityRecord::Detail(incoming),
                    },
                )
                .expect_err("conflict");
            assert_eq!(err.kind(), ErrorKind::Conflict);

            let stored = repo.entity(&Guid::from("g")).expect("read").expect("stored");
            assert_eq!(stored.header().metadata_collection_id, "mid2");
            assert_eq!(stored.header().version(), 1);
        });
    }

    #[test]
    fn reference_copy_upgrades_proxy_in_place() {
        on_each_backend(|repo| {
            add_asset(repo, "e1", 1);
            run(
                repo,
                2,
                Operation::SaveRelationshipReferenceCopy {
                    relationship: remote_link("r1", "e1", "x1", REMOTE),
                    end_proxies: vec![remote_proxy("x1", REMOTE)],
                },
            );
            assert!(repo.entity(&Guid::from("x1")).expect("read").expect("x1").is_proxy());

            run(
                repo,
                3,
                Operation::SaveEntityReferenceCopy {
                    entity: EntityRecord::Detail(remote_asset("x1", REMOTE)),
                },
            );
            assert!(!repo.entity(&Guid::from("x1")).expect("read").expect("x1").is_proxy());
            assert_eq!(
                repo.relationships_for(&Guid::from("x1"), false).expect("query").len(),
                1
            );

            // a proxy never replaces the full copy
            run(
                repo,
                4,
                Operation::SaveEntityReferenceCopy {
                    entity: EntityRecord::Proxy(remote_proxy("x1", REMOTE)),
                },
            );
            assert!(!repo.entity(&Guid::from("x1")).expect("read").expect("x1").is_proxy());
        });
    }

    #[test]
    fn local_copy_claim_is_rejected() {
        on_each_backend(|repo| {
            let err = repo
                .execute(
                    USER,
                    Timestamp(1),
                    Operation::SaveEntityReferenceCopy {
                        entity: EntityRecord::Detail(remote_asset("e1", LOCAL)),
                    },
                )
                .expect_err("home copy");
            assert!(matches!(err.source, MetarepoError::HomeEntity(_)));
            assert!(repo.entity(&Guid::from("e1")).expect("read").is_none());
        });
    }
    #[test]
    fn purging_a_copy_keeps_local_relationships_as_deleted() {
        on_each_backend(|repo| {
            add_asset(repo, "e1", 1);
            run(
                repo,
                2,
                Operation::SaveEntityReferenceCopy {
                    entity: EntityRecord::Detail(remote_asset("x1", REMOTE)),
                },
            );
            add_link(repo, "r-local", "e1", "x1", 3);
            run(
                repo,
                4,
                Operation::SaveRelationshipReferenceCopy {
                    relationship: remote_link("r-remote", "x1", "e1", REMOTE),
                    end_proxies: Vec::new(),
                },
            );

            run(repo, 5, Operation::PurgeEntityReferenceCopy { guid: Guid::from("x1") });

            assert!(repo.entity(&Guid::from("x1")).expect("read").is_none());
            assert!(repo.relationship(&Guid::from("r-remote")).expect("read").is_none());
            let local = repo
                .relationship(&Guid::from("r-local"))
                .expect("read")
                .expect("local relationship kept");
            assert_eq!(local.header.status, InstanceStatus::Deleted);
            assert_eq!(local.header.version(), 2);
            assert_eq!(repo.history(&Guid::from("r-local"), 10).expect("history").len(), 2);
        });
    }

    #[test]
    fn classification_purge_never_stores_the_supplied_entity() {
        on_each_backend(|repo| {
            let outcome = run(
                repo,
                1,
                Operation::PurgeClassificationReferenceCopy {
                    entity: EntityRecord::Proxy(remote_proxy("x1", REMOTE)),
                    classification: "Memento".to_string(),
                },
            );
            assert!(outcome.commit.is_none());
            assert!(repo.entity(&Guid::from("x1")).expect("read").is_none());
            assert_eq!(repo.sequence().expect("sequence"), 0);
        });
    }
}
