use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::CascadeError;
use crate::impact;
use crate::models::*;
use crate::review::ReviewService;

// ============================================================
// Error Handling
// ============================================================

/// Map errors to status codes. Storage errors are logged in full
/// server-side, but clients only see a generic message to avoid leaking
/// internal details.
impl IntoResponse for CascadeError {
    fn into_response(self) -> Response {
        match self {
            CascadeError::Validation(msg) => {
                tracing::warn!("Validation error: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": msg })),
                )
                    .into_response()
            }
            CascadeError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("Not found: {}", msg) })),
            )
                .into_response(),
            CascadeError::Conflict(conflicts) => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": format!("{} change(s) conflict with the current root document", conflicts.len()),
                    "conflicts": conflicts,
                })),
            )
                .into_response(),
            CascadeError::Storage(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = Result<T, CascadeError>;

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Root documents
// ============================================================

pub async fn list_roots(State(svc): State<ReviewService>) -> ApiResult<Json<Vec<RootDocument>>> {
    svc.list_roots().map(Json)
}

pub async fn create_root(
    State(svc): State<ReviewService>,
    Json(input): Json<CreateRootInput>,
) -> ApiResult<(StatusCode, Json<RootDocument>)> {
    svc.create_root(input)
        .map(|root| (StatusCode::CREATED, Json(root)))
}

pub async fn get_root(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RootDocument>> {
    svc.get_root(id).map(Json)
}

pub async fn update_root_status(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateRootStatusInput>,
) -> ApiResult<Json<RootDocument>> {
    svc.advance_root_status(id, input.status).map(Json)
}

// ============================================================
// Derived documents
// ============================================================

pub async fn list_derived(
    State(svc): State<ReviewService>,
    Path(root_id): Path<Uuid>,
) -> ApiResult<Json<Vec<DerivedDocument>>> {
    svc.list_derived(root_id).map(Json)
}

pub async fn create_derived(
    State(svc): State<ReviewService>,
    Path(root_id): Path<Uuid>,
    Json(input): Json<CreateDerivedInput>,
) -> ApiResult<(StatusCode, Json<DerivedDocument>)> {
    svc.create_derived(root_id, input)
        .map(|doc| (StatusCode::CREATED, Json(doc)))
}

pub async fn get_derived(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DerivedDocument>> {
    svc.get_derived(id).map(Json)
}

pub async fn update_derived_status(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateDerivedStatusInput>,
) -> ApiResult<Json<DerivedDocument>> {
    svc.set_derived_status(id, input.status).await.map(Json)
}

pub async fn set_inherited_fields(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
    Json(input): Json<SetInheritedFieldsInput>,
) -> ApiResult<Json<DerivedDocument>> {
    svc.set_inherited_fields(id, input.inherited_fields)
        .await
        .map(Json)
}

pub async fn resume_derived(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DerivedDocument>> {
    svc.resume_derived(id).await.map(Json)
}

pub async fn complete_derived(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DerivedDocument>> {
    svc.complete_derived(id).await.map(Json)
}

pub async fn get_cascade_history(
    State(svc): State<ReviewService>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<CascadeEvent>>> {
    svc.cascade_history(id).map(Json)
}

// ============================================================
// Review flow
// ============================================================

pub async fn submit_change(
    State(svc): State<ReviewService>,
    Path(root_id): Path<Uuid>,
    Json(input): Json<SubmitChangeInput>,
) -> ApiResult<(StatusCode, Json<PendingChange>)> {
    svc.submit_change(root_id, input)
        .map(|change| (StatusCode::CREATED, Json(change)))
}

pub async fn list_pending_changes(
    State(svc): State<ReviewService>,
    Path(root_id): Path<Uuid>,
) -> ApiResult<Json<Vec<PendingChange>>> {
    svc.list_pending_changes(root_id).map(Json)
}

/// Query parameters for impact previews.
#[derive(Debug, Deserialize)]
pub struct ImpactsQuery {
    /// `severity` orders records most severe first; otherwise by document id.
    pub sort: Option<String>,
}

pub async fn compute_impacts(
    State(svc): State<ReviewService>,
    Path(root_id): Path<Uuid>,
    Query(query): Query<ImpactsQuery>,
    Json(input): Json<ChangeSelection>,
) -> ApiResult<Json<Vec<ImpactRecord>>> {
    let mut impacts = svc.compute_impacts(root_id, &input.change_ids)?;
    if query.sort.as_deref() == Some("severity") {
        impact::sort_for_review(&mut impacts);
    }
    Ok(Json(impacts))
}

pub async fn apply_changes(
    State(svc): State<ReviewService>,
    Path(root_id): Path<Uuid>,
    Json(input): Json<ApplyChangesInput>,
) -> ApiResult<Json<ApplyResult>> {
    svc.apply_changes(root_id, &input.change_ids, &input.approved_cascade_target_ids)
        .await
        .map(Json)
}

pub async fn reject_changes(
    State(svc): State<ReviewService>,
    Path(root_id): Path<Uuid>,
    Json(input): Json<ChangeSelection>,
) -> ApiResult<StatusCode> {
    svc.reject_changes(root_id, &input.change_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}
