//! Public progress and liveness endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use refrax_model::JobStatus;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

/// `GET /video-status/<path>` and `GET /video-status/<path>/size`.
pub async fn video_status(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let (file_path, want_size) = match path.strip_suffix("/size") {
        Some(prefix) => (prefix, true),
        None => (path.as_str(), false),
    };

    let jobs = state.require_jobs()?;
    let job = jobs
        .latest_by_file_path(file_path)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no video job for {file_path}")))?;

    if want_size {
        let size = if job.status == JobStatus::Completed {
            tokio::fs::metadata(state.disk.path_for(&job.cache_path))
                .await
                .map(|meta| meta.len())
                .ok()
        } else {
            None
        };
        return Ok(Json(json!({
            "path": file_path,
            "status": job.status,
            "optimized_size": size,
        }))
        .into_response());
    }

    Ok(Json(json!({
        "path": file_path,
        "job_id": job.id,
        "status": job.status,
        "progress": job.progress,
        "error": job.error_text,
    }))
    .into_response())
}

pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// Database liveness: 503 when the pool is missing or a ping fails.
pub async fn health_database(State(state): State<AppState>) -> Response {
    let Some(pool) = &state.db else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unconfigured" })),
        )
            .into_response();
    };

    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "detail": err.to_string() })),
        )
            .into_response(),
    }
}
