//! Router assembly.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_api_key;
use crate::handlers::{queue, status, storage, transform, upload};
use crate::infra::app_state::AppState;

pub fn build_router(state: AppState) -> Router {
    // Multipart bodies may carry several files up to the per-file ceiling.
    let upload_limit = (state.config.upload.max_bytes as usize).saturating_mul(4);

    let protected = Router::new()
        .route(
            "/upload",
            post(upload::upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/storage/", get(storage::list_storage))
        .route(
            "/storage/{*path}",
            get(storage::asset_metadata).delete(storage::delete_asset),
        )
        .route("/invalidate/{*path}", delete(storage::invalidate))
        .route("/queue/stats", get(queue::stats))
        .route("/queue/jobs", get(queue::list_jobs))
        .route("/queue/jobs/{id}/retry", post(queue::retry_job))
        .route("/queue/jobs/{id}/cancel", post(queue::cancel_job))
        .route("/queue/jobs/{id}", delete(queue::delete_job))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/t/{*path}", get(transform::transform_handler))
        .route("/{marker}/{*path}", get(transform::signed_transform_handler))
        .route("/queue/events", get(queue::events))
        .route("/video-status/{*path}", get(status::video_status))
        .route("/health", get(status::health))
        .route("/health/database", get(status::health_database))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
