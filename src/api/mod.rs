mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::review::ReviewService;

pub fn create_router(service: ReviewService) -> Router {
    let api = Router::new()
        // Root documents
        .route("/roots", get(handlers::list_roots))
        .route("/roots", post(handlers::create_root))
        .route("/roots/{id}", get(handlers::get_root))
        .route("/roots/{id}/status", put(handlers::update_root_status))
        .route("/roots/{id}/derived", get(handlers::list_derived))
        .route("/roots/{id}/derived", post(handlers::create_derived))
        // Review flow
        .route("/roots/{id}/changes", get(handlers::list_pending_changes))
        .route("/roots/{id}/changes", post(handlers::submit_change))
        .route("/roots/{id}/impacts", post(handlers::compute_impacts))
        .route("/roots/{id}/apply", post(handlers::apply_changes))
        .route("/roots/{id}/reject", post(handlers::reject_changes))
        // Derived documents
        .route("/derived/{id}", get(handlers::get_derived))
        .route("/derived/{id}/status", put(handlers::update_derived_status))
        .route(
            "/derived/{id}/inherited-fields",
            put(handlers::set_inherited_fields),
        )
        .route("/derived/{id}/resume", post(handlers::resume_derived))
        .route("/derived/{id}/complete", post(handlers::complete_derived))
        .route("/derived/{id}/history", get(handlers::get_cascade_history))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}
