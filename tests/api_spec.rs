use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use plan_cascade::api::create_router;
use plan_cascade::config::CascadeConfig;
use plan_cascade::db::Database;
use plan_cascade::models::*;
use plan_cascade::regen::DisabledRegenerator;
use plan_cascade::review::ReviewService;
use serde_json::{json, Value};
use uuid::Uuid;

fn setup() -> TestServer {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let service = ReviewService::new(db, Arc::new(DisabledRegenerator), &CascadeConfig::default());
    let app = create_router(service);
    TestServer::new(app).expect("Failed to create test server")
}

fn path(s: &str) -> FieldPath {
    FieldPath::parse(s).expect("valid field path")
}

async fn create_test_root(server: &TestServer) -> RootDocument {
    let mut fields = BTreeMap::new();
    fields.insert(path("companyName"), json!("Acme"));
    fields.insert(path("targetAudience"), json!("SMBs"));

    server
        .post("/api/v1/roots")
        .json(&CreateRootInput {
            title: "Launch Plan".to_string(),
            fields,
        })
        .await
        .json::<RootDocument>()
}

async fn create_test_derived(
    server: &TestServer,
    root_id: Uuid,
    doc_type: DocumentType,
    inherited: &[&str],
) -> DerivedDocument {
    server
        .post(&format!("/api/v1/roots/{}/derived", root_id))
        .json(&CreateDerivedInput {
            title: "Derived".to_string(),
            doc_type,
            inherited_fields: inherited.iter().map(|f| path(f)).collect(),
        })
        .await
        .json::<DerivedDocument>()
}

async fn submit(server: &TestServer, root_id: Uuid, field: &str, new_value: Value) -> PendingChange {
    server
        .post(&format!("/api/v1/roots/{}/changes", root_id))
        .json(&SubmitChangeInput {
            id: None,
            field_path: path(field),
            new_value,
            proposed_by: Provenance::User,
        })
        .await
        .json::<PendingChange>()
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        let server = setup();
        let response = server.get("/api/v1/health").await;
        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok" }));
    }
}

mod roots {
    use super::*;

    #[tokio::test]
    async fn create_returns_created() {
        let server = setup();
        let response = server
            .post("/api/v1/roots")
            .json(&json!({ "title": "Plan" }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let root: RootDocument = response.json();
        assert_eq!(root.status, RootStatus::Draft);
        assert!(root.fields.is_empty());
    }

    #[tokio::test]
    async fn empty_title_is_bad_request() {
        let server = setup();
        let response = server
            .post("/api/v1/roots")
            .json(&json!({ "title": "  " }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_root_is_not_found() {
        let server = setup();
        let response = server
            .get(&format!("/api/v1/roots/{}", Uuid::new_v4()))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_cannot_regress() {
        let server = setup();
        let root = create_test_root(&server).await;

        server
            .put(&format!("/api/v1/roots/{}/status", root.id))
            .json(&UpdateRootStatusInput { status: RootStatus::Approved })
            .await
            .assert_status_ok();

        let response = server
            .put(&format!("/api/v1/roots/{}/status", root.id))
            .json(&UpdateRootStatusInput { status: RootStatus::InReview })
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lists_roots() {
        let server = setup();
        create_test_root(&server).await;

        let roots: Vec<RootDocument> = server.get("/api/v1/roots").await.json();
        assert_eq!(roots.len(), 1);
    }
}

mod derived {
    use super::*;

    #[tokio::test]
    async fn empty_inherited_fields_is_bad_request() {
        let server = setup();
        let root = create_test_root(&server).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/derived", root.id))
            .json(&CreateDerivedInput {
                title: "Deck".to_string(),
                doc_type: DocumentType::Presentation,
                inherited_fields: BTreeSet::new(),
            })
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_document_type_is_rejected() {
        let server = setup();
        let root = create_test_root(&server).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/derived", root.id))
            .json(&json!({
                "title": "Sheet",
                "doc_type": "spreadsheet",
                "inherited_fields": ["companyName"],
            }))
            .await;
        assert!(response.status_code().is_client_error());
    }

    #[tokio::test]
    async fn malformed_field_path_is_rejected() {
        let server = setup();
        let root = create_test_root(&server).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/derived", root.id))
            .json(&json!({
                "title": "Deck",
                "doc_type": "presentation",
                "inherited_fields": ["company..name"],
            }))
            .await;
        assert!(response.status_code().is_client_error());
    }

    #[tokio::test]
    async fn lists_documents_of_a_root() {
        let server = setup();
        let root = create_test_root(&server).await;
        let doc = create_test_derived(&server, root.id, DocumentType::Presentation, &["companyName"]).await;

        let docs: Vec<DerivedDocument> = server
            .get(&format!("/api/v1/roots/{}/derived", root.id))
            .await
            .json();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, doc.id);
    }

    #[tokio::test]
    async fn invalid_status_transition_is_bad_request() {
        let server = setup();
        let root = create_test_root(&server).await;
        let doc = create_test_derived(&server, root.id, DocumentType::Presentation, &["companyName"]).await;

        let response = server
            .put(&format!("/api/v1/derived/{}/status", doc.id))
            .json(&UpdateDerivedStatusInput { status: DerivedStatus::Completed })
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server
            .put(&format!("/api/v1/derived/{}/status", doc.id))
            .json(&UpdateDerivedStatusInput { status: DerivedStatus::InProgress })
            .await;
        response.assert_status_ok();

        let response = server
            .post(&format!("/api/v1/derived/{}/complete", doc.id))
            .await;
        response.assert_status_ok();
        let doc: DerivedDocument = response.json();
        assert_eq!(doc.status, DerivedStatus::Completed);
    }

    #[tokio::test]
    async fn inherited_fields_can_be_replaced() {
        let server = setup();
        let root = create_test_root(&server).await;
        let doc = create_test_derived(&server, root.id, DocumentType::Presentation, &["companyName"]).await;

        let response = server
            .put(&format!("/api/v1/derived/{}/inherited-fields", doc.id))
            .json(&json!({ "inherited_fields": ["industry", "tagline"] }))
            .await;

        response.assert_status_ok();
        let doc: DerivedDocument = response.json();
        assert!(doc.inherited_fields.contains(&path("industry")));
        assert!(!doc.inherited_fields.contains(&path("companyName")));
    }
}

mod review_flow {
    use super::*;

    #[tokio::test]
    async fn submit_returns_created_with_snapshot() {
        let server = setup();
        let root = create_test_root(&server).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/changes", root.id))
            .json(&json!({
                "field_path": "targetAudience",
                "new_value": "Enterprises",
                "proposed_by": "expert",
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let change: PendingChange = response.json();
        assert_eq!(change.old_value, json!("SMBs"));
        assert_eq!(change.proposed_by, Provenance::Expert);

        let pending: Vec<PendingChange> = server
            .get(&format!("/api/v1/roots/{}/changes", root.id))
            .await
            .json();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn unknown_provenance_is_rejected() {
        let server = setup();
        let root = create_test_root(&server).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/changes", root.id))
            .json(&json!({
                "field_path": "targetAudience",
                "new_value": "Enterprises",
                "proposed_by": "robot",
            }))
            .await;
        assert!(response.status_code().is_client_error());
    }

    #[tokio::test]
    async fn impacts_can_be_sorted_by_severity() {
        let server = setup();
        let root = create_test_root(&server).await;
        let deck = create_test_derived(&server, root.id, DocumentType::Presentation, &["companyName"]).await;
        let campaign = create_test_derived(&server, root.id, DocumentType::Marketing, &["targetAudience"]).await;
        let c1 = submit(&server, root.id, "companyName", json!("Acme Corp")).await;
        let c2 = submit(&server, root.id, "targetAudience", json!("Enterprises")).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/impacts", root.id))
            .add_query_param("sort", "severity")
            .json(&ChangeSelection { change_ids: vec![c1.id, c2.id] })
            .await;

        response.assert_status_ok();
        let impacts: Vec<ImpactRecord> = response.json();
        assert_eq!(impacts.len(), 2);
        assert_eq!(impacts[0].derived_document_id, campaign.id);
        assert_eq!(impacts[0].severity, Severity::High);
        assert_eq!(impacts[1].derived_document_id, deck.id);
    }

    #[tokio::test]
    async fn apply_without_regeneration_flags_targets() {
        let server = setup();
        let root = create_test_root(&server).await;
        let deck = create_test_derived(&server, root.id, DocumentType::Presentation, &["companyName"]).await;
        let change = submit(&server, root.id, "companyName", json!("Acme Corp")).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/apply", root.id))
            .json(&ApplyChangesInput {
                change_ids: vec![change.id],
                approved_cascade_target_ids: vec![deck.id],
            })
            .await;

        response.assert_status_ok();
        let result: ApplyResult = response.json();
        assert_eq!(result.applied_change_ids, vec![change.id]);
        assert_eq!(result.flagged_doc_ids, vec![deck.id]);
        assert!(result.cascaded_doc_ids.is_empty());

        let history: Vec<CascadeEvent> = server
            .get(&format!("/api/v1/derived/{}/history", deck.id))
            .await
            .json();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, CascadeOutcome::Failed);

        let response = server
            .post(&format!("/api/v1/derived/{}/resume", deck.id))
            .await;
        response.assert_status_ok();
        let deck: DerivedDocument = response.json();
        assert_eq!(deck.status, DerivedStatus::InProgress);
    }

    #[tokio::test]
    async fn stale_change_is_conflict() {
        let server = setup();
        let root = create_test_root(&server).await;
        let first = submit(&server, root.id, "companyName", json!("Acme Corp")).await;
        let stale = submit(&server, root.id, "companyName", json!("Acme Inc")).await;

        server
            .post(&format!("/api/v1/roots/{}/apply", root.id))
            .json(&ApplyChangesInput {
                change_ids: vec![first.id],
                approved_cascade_target_ids: vec![],
            })
            .await
            .assert_status_ok();

        let response = server
            .post(&format!("/api/v1/roots/{}/apply", root.id))
            .json(&ApplyChangesInput {
                change_ids: vec![stale.id],
                approved_cascade_target_ids: vec![],
            })
            .await;

        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["conflicts"][0]["reason"], json!("stale_value"));
        assert_eq!(body["conflicts"][0]["actual"], json!("Acme Corp"));
    }

    #[tokio::test]
    async fn ineligible_target_is_bad_request() {
        let server = setup();
        let root = create_test_root(&server).await;
        let campaign = create_test_derived(&server, root.id, DocumentType::Marketing, &["targetAudience"]).await;
        let change = submit(&server, root.id, "targetAudience", json!("Enterprises")).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/apply", root.id))
            .json(&ApplyChangesInput {
                change_ids: vec![change.id],
                approved_cascade_target_ids: vec![campaign.id],
            })
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reject_returns_no_content() {
        let server = setup();
        let root = create_test_root(&server).await;
        let change = submit(&server, root.id, "companyName", json!("Acme Corp")).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/reject", root.id))
            .json(&ChangeSelection { change_ids: vec![change.id] })
            .await;
        response.assert_status(StatusCode::NO_CONTENT);

        let unchanged: RootDocument = server
            .get(&format!("/api/v1/roots/{}", root.id))
            .await
            .json();
        assert_eq!(unchanged.fields, root.fields);
    }

    #[tokio::test]
    async fn unknown_change_is_not_found() {
        let server = setup();
        let root = create_test_root(&server).await;

        let response = server
            .post(&format!("/api/v1/roots/{}/reject", root.id))
            .json(&ChangeSelection { change_ids: vec![Uuid::new_v4()] })
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }
}
