use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use plan_cascade::db::{Database, DerivedUpdate};
use plan_cascade::models::*;
use serde_json::{json, Value};
use speculate2::speculate;
use uuid::Uuid;

fn path(s: &str) -> FieldPath {
    FieldPath::parse(s).expect("valid field path")
}

fn fields(paths: &[&str]) -> BTreeSet<FieldPath> {
    paths.iter().map(|p| path(p)).collect()
}

fn create_test_root(db: &Database) -> RootDocument {
    let mut initial = BTreeMap::new();
    initial.insert(path("targetAudience"), json!("SMBs"));
    initial.insert(path("companyName"), json!("Acme"));

    db.create_root(CreateRootInput {
        title: "Launch Plan".to_string(),
        fields: initial,
    })
    .expect("Failed to create root")
}

fn create_test_derived(db: &Database, root_id: Uuid, inherited: &[&str]) -> DerivedDocument {
    db.create_derived(root_id, CreateDerivedInput {
        title: "Pitch Deck".to_string(),
        doc_type: DocumentType::Presentation,
        inherited_fields: fields(inherited),
    })
    .expect("Failed to create derived document")
}

fn pending(root: &RootDocument, field: &str, new_value: Value) -> PendingChange {
    let field_path = path(field);
    PendingChange {
        id: Uuid::new_v4(),
        root_id: root.id,
        old_value: root.value_at(&field_path),
        field_path,
        new_value,
        proposed_by: Provenance::User,
        resolution: Resolution::Unresolved,
        created_at: Utc::now(),
        resolved_at: None,
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "root documents" {
        describe "create_root" {
            it "starts in draft at version zero with the given fields" {
                let root = create_test_root(&db);

                assert_eq!(root.status, RootStatus::Draft);
                assert_eq!(root.version, 0);
                assert_eq!(root.value_at(&path("targetAudience")), json!("SMBs"));
                assert_eq!(root.value_at(&path("missing")), Value::Null);
            }
        }

        describe "get_root" {
            it "returns None for non-existent root" {
                let result = db.get_root(Uuid::new_v4()).expect("Query failed");
                assert!(result.is_none());
            }

            it "round-trips fields through storage" {
                let created = create_test_root(&db);
                let found = db.get_root(created.id).expect("Query failed").expect("Root not found");

                assert_eq!(found.fields, created.fields);
                assert_eq!(found.title, "Launch Plan");
            }
        }

        describe "get_all_roots" {
            it "returns roots ordered by title" {
                db.create_root(CreateRootInput { title: "Zebra".to_string(), fields: BTreeMap::new() })
                    .expect("Failed to create");
                db.create_root(CreateRootInput { title: "Alpha".to_string(), fields: BTreeMap::new() })
                    .expect("Failed to create");

                let roots = db.get_all_roots().expect("Query failed");
                assert_eq!(roots.len(), 2);
                assert_eq!(roots[0].title, "Alpha");
                assert_eq!(roots[1].title, "Zebra");
            }
        }

        describe "update_root_status" {
            it "persists the new status" {
                let root = create_test_root(&db);
                db.update_root_status(root.id, RootStatus::InReview).expect("Update failed");

                let found = db.get_root(root.id).expect("Query failed").expect("Root not found");
                assert_eq!(found.status, RootStatus::InReview);
            }

            it "returns None for non-existent root" {
                let result = db.update_root_status(Uuid::new_v4(), RootStatus::Approved).expect("Query failed");
                assert!(result.is_none());
            }
        }
    }

    describe "derived documents" {
        describe "create_derived" {
            it "stores inherited fields and starts not_started" {
                let root = create_test_root(&db);
                let doc = create_test_derived(&db, root.id, &["companyName", "targetAudience"]);

                let found = db.get_derived(doc.id).expect("Query failed").expect("Doc not found");
                assert_eq!(found.status, DerivedStatus::NotStarted);
                assert_eq!(found.doc_type, DocumentType::Presentation);
                assert_eq!(found.inherited_fields, fields(&["companyName", "targetAudience"]));
                assert!(found.outstanding_fields.is_empty());
            }

            it "fails for a missing root" {
                let result = db.create_derived(Uuid::new_v4(), CreateDerivedInput {
                    title: "Orphan".to_string(),
                    doc_type: DocumentType::Generic,
                    inherited_fields: fields(&["companyName"]),
                });
                assert!(result.is_err());
            }
        }

        describe "get_derived_by_root" {
            it "only returns documents of the given root" {
                let root = create_test_root(&db);
                let other = create_test_root(&db);
                create_test_derived(&db, root.id, &["companyName"]);
                create_test_derived(&db, other.id, &["companyName"]);

                let docs = db.get_derived_by_root(root.id).expect("Query failed");
                assert_eq!(docs.len(), 1);
                assert_eq!(docs[0].root_id, root.id);
            }
        }

        describe "update_derived_status" {
            it "clears outstanding fields when work resumes" {
                let root = create_test_root(&db);
                let doc = create_test_derived(&db, root.id, &["targetAudience"]);
                db.record_cascade(root.id, &DerivedUpdate {
                    derived_id: doc.id,
                    status: DerivedStatus::NeedsUpdate,
                    outstanding_fields: fields(&["targetAudience"]),
                    flag_reason: Some("Requires review".to_string()),
                    outcome: CascadeOutcome::Flagged,
                    triggering_fields: fields(&["targetAudience"]),
                }).expect("Record failed");

                let resumed = db.update_derived_status(doc.id, DerivedStatus::InProgress)
                    .expect("Update failed")
                    .expect("Doc not found");

                assert_eq!(resumed.status, DerivedStatus::InProgress);
                assert!(resumed.outstanding_fields.is_empty());
                assert!(resumed.flag_reason.is_none());
            }
        }

        describe "set_inherited_fields" {
            it "replaces the declared dependencies" {
                let root = create_test_root(&db);
                let doc = create_test_derived(&db, root.id, &["companyName"]);

                db.set_inherited_fields(doc.id, fields(&["industry", "description"])).expect("Update failed");

                let found = db.get_derived(doc.id).expect("Query failed").expect("Doc not found");
                assert_eq!(found.inherited_fields, fields(&["industry", "description"]));
            }
        }
    }

    describe "pending changes" {
        it "lists only unresolved changes for the root" {
            let root = create_test_root(&db);
            let first = pending(&root, "companyName", json!("Acme Corp"));
            let second = pending(&root, "targetAudience", json!("Enterprises"));
            db.insert_change(&first).expect("Insert failed");
            db.insert_change(&second).expect("Insert failed");

            db.reject_changes(root.id, &[first.id]).expect("Reject failed");

            let changes = db.get_pending_changes(root.id).expect("Query failed");
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].id, second.id);
            assert_eq!(changes[0].old_value, json!("SMBs"));
        }

        it "does not reject an already rejected change twice" {
            let root = create_test_root(&db);
            let change = pending(&root, "companyName", json!("Acme Corp"));
            db.insert_change(&change).expect("Insert failed");

            let first = db.reject_changes(root.id, &[change.id]).expect("Reject failed");
            let second = db.reject_changes(root.id, &[change.id]).expect("Reject failed");

            assert_eq!(first, vec![change.id]);
            assert!(second.is_empty());
        }

        it "keeps the stored change when an id is inserted twice" {
            let root = create_test_root(&db);
            let change = pending(&root, "companyName", json!("Acme Corp"));
            let duplicate = PendingChange {
                new_value: json!("Other Corp"),
                ..change.clone()
            };

            assert!(db.insert_change(&change).expect("Insert failed"));
            assert!(!db.insert_change(&duplicate).expect("Insert failed"));

            let stored = db.get_change(change.id).expect("Query failed").expect("Change not found");
            assert_eq!(stored.new_value, json!("Acme Corp"));
        }
    }

    describe "merge_changes" {
        it "writes values, bumps the version and accepts the changes" {
            let root = create_test_root(&db);
            let change = pending(&root, "companyName", json!("Acme Corp"));
            db.insert_change(&change).expect("Insert failed");

            let merged = db.merge_changes(root.id, root.version, &[change.clone()], &[]).expect("Merge failed");

            assert_eq!(merged.version, 1);
            assert_eq!(merged.value_at(&path("companyName")), json!("Acme Corp"));

            let stored = db.get_change(change.id).expect("Query failed").expect("Change not found");
            assert_eq!(stored.resolution, Resolution::Accepted);
            assert!(stored.resolved_at.is_some());
        }

        it "writes nothing when the version moved" {
            let root = create_test_root(&db);
            let change = pending(&root, "companyName", json!("Acme Corp"));
            db.insert_change(&change).expect("Insert failed");

            let result = db.merge_changes(root.id, root.version + 1, &[change.clone()], &[]);
            assert!(result.is_err());

            let unchanged = db.get_root(root.id).expect("Query failed").expect("Root not found");
            assert_eq!(unchanged.fields, root.fields);
            let stored = db.get_change(change.id).expect("Query failed").expect("Change not found");
            assert_eq!(stored.resolution, Resolution::Unresolved);
        }

        it "rolls back when a change was already resolved" {
            let root = create_test_root(&db);
            let fresh = pending(&root, "companyName", json!("Acme Corp"));
            let rejected = pending(&root, "targetAudience", json!("Enterprises"));
            db.insert_change(&fresh).expect("Insert failed");
            db.insert_change(&rejected).expect("Insert failed");
            db.reject_changes(root.id, &[rejected.id]).expect("Reject failed");

            let result = db.merge_changes(root.id, root.version, &[fresh.clone(), rejected], &[]);
            assert!(result.is_err());

            let unchanged = db.get_root(root.id).expect("Query failed").expect("Root not found");
            assert_eq!(unchanged.fields, root.fields);
            assert_eq!(unchanged.version, 0);
            let stored = db.get_change(fresh.id).expect("Query failed").expect("Change not found");
            assert_eq!(stored.resolution, Resolution::Unresolved);
        }

        it "flags derived documents in the same transaction" {
            let root = create_test_root(&db);
            let doc = create_test_derived(&db, root.id, &["targetAudience"]);
            let change = pending(&root, "targetAudience", json!("Enterprises"));
            db.insert_change(&change).expect("Insert failed");

            db.merge_changes(root.id, root.version, &[change], &[DerivedUpdate {
                derived_id: doc.id,
                status: DerivedStatus::NeedsUpdate,
                outstanding_fields: fields(&["targetAudience"]),
                flag_reason: Some("Requires review".to_string()),
                outcome: CascadeOutcome::Flagged,
                triggering_fields: fields(&["targetAudience"]),
            }]).expect("Merge failed");

            let flagged = db.get_derived(doc.id).expect("Query failed").expect("Doc not found");
            assert_eq!(flagged.status, DerivedStatus::NeedsUpdate);
            assert_eq!(flagged.outstanding_fields, fields(&["targetAudience"]));

            let history = db.get_cascade_history(doc.id).expect("Query failed");
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].outcome, CascadeOutcome::Flagged);
            assert_eq!(history[0].root_id, root.id);
        }
    }

    describe "nested fields" {
        it "merges a nested change into the stored object" {
            let root = db.create_root(CreateRootInput {
                title: "Launch Plan".to_string(),
                fields: [(path("objectives"), json!({ "primary": "Grow ARR", "secondary": "Hire" }))]
                    .into_iter()
                    .collect(),
            }).expect("Failed to create root");
            let change = pending(&root, "objectives.primary", json!("Cut churn"));
            assert_eq!(change.old_value, json!("Grow ARR"));
            db.insert_change(&change).expect("Insert failed");

            db.merge_changes(root.id, root.version, &[change], &[]).expect("Merge failed");

            let stored = db.get_root(root.id).expect("Query failed").expect("Root not found");
            assert_eq!(stored.fields.len(), 1);
            assert_eq!(
                stored.value_at(&path("objectives")),
                json!({ "primary": "Cut churn", "secondary": "Hire" })
            );
        }
    }

    describe "corrupt rows" {
        it "fails to read or merge a root whose fields are not json" {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let db_path = dir.path().join("plan.db");
            let on_disk = Database::open(db_path.clone()).expect("Failed to open");
            on_disk.migrate().expect("Failed to migrate");
            let root = create_test_root(&on_disk);
            let change = pending(&root, "companyName", json!("Acme Corp"));
            on_disk.insert_change(&change).expect("Insert failed");

            let raw = rusqlite::Connection::open(&db_path).expect("Failed to open raw connection");
            raw.execute("UPDATE root_documents SET fields = 'not json'", [])
                .expect("Failed to corrupt row");
            drop(raw);

            assert!(on_disk.get_root(root.id).is_err());
            assert!(on_disk.merge_changes(root.id, root.version, &[change.clone()], &[]).is_err());

            let stored = on_disk.get_change(change.id).expect("Query failed").expect("Change not found");
            assert_eq!(stored.resolution, Resolution::Unresolved);
        }
    }

    describe "cascade history" {
        it "returns events newest first" {
            let root = create_test_root(&db);
            let doc = create_test_derived(&db, root.id, &["companyName"]);

            for outcome in [CascadeOutcome::Failed, CascadeOutcome::Regenerating] {
                db.record_cascade(root.id, &DerivedUpdate {
                    derived_id: doc.id,
                    status: DerivedStatus::InProgress,
                    outstanding_fields: BTreeSet::new(),
                    flag_reason: None,
                    outcome,
                    triggering_fields: fields(&["companyName"]),
                }).expect("Record failed");
            }

            let history = db.get_cascade_history(doc.id).expect("Query failed");
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].outcome, CascadeOutcome::Regenerating);
            assert_eq!(history[1].outcome, CascadeOutcome::Failed);
        }

        it "refuses to record against a document of another root" {
            let root = create_test_root(&db);
            let other = create_test_root(&db);
            let doc = create_test_derived(&db, root.id, &["companyName"]);

            let result = db.record_cascade(other.id, &DerivedUpdate {
                derived_id: doc.id,
                status: DerivedStatus::NeedsUpdate,
                outstanding_fields: BTreeSet::new(),
                flag_reason: None,
                outcome: CascadeOutcome::Flagged,
                triggering_fields: fields(&["companyName"]),
            });
            assert!(result.is_err());
        }
    }

    describe "open" {
        it "creates the database file and its parent directory" {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let db_path = dir.path().join("nested").join("plan.db");

            let on_disk = Database::open(db_path.clone()).expect("Failed to open");
            on_disk.migrate().expect("Failed to migrate");
            let root = create_test_root(&on_disk);
            drop(on_disk);

            let reopened = Database::open(db_path).expect("Failed to reopen");
            let found = reopened.get_root(root.id).expect("Query failed");
            assert!(found.is_some());
        }
    }
}
