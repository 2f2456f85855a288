//! Queue introspection, job control, and the SSE event stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

/// SSE keepalive cadence; a failed write detaches the client.
const HEARTBEAT: Duration = Duration::from_secs(30);

pub async fn stats(State(state): State<AppState>) -> AppResult<Response> {
    let stats = state.require_jobs()?.stats().await?;
    Ok(Json(stats).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let jobs = state
        .require_jobs()?
        .list_recent(query.limit.clamp(1, 500))
        .await?;
    Ok(Json(jobs).into_response())
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let retried = state.require_jobs()?.retry(id).await?;
    Ok(Json(json!({ "id": id, "retried": retried })).into_response())
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let cancelled = state.require_jobs()?.cancel(id).await?;
    Ok(Json(json!({ "id": id, "cancelled": cancelled })).into_response())
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let deleted = state.require_jobs()?.delete(id).await?;
    if !deleted {
        return Err(AppError::not_found(format!("job {id}")));
    }
    Ok(Json(json!({ "id": id, "deleted": true })).into_response())
}

/// `GET /queue/events`: every job state transition as
/// `event: <kind>\ndata: <json>` frames. Lagged subscribers skip frames
/// rather than erroring out.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|result| async move {
        let event = result.ok()?;
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(event.kind.as_str()).data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("keepalive"))
}
