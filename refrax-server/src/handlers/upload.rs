//! Multipart upload endpoint.

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

use refrax_core::upload::UploadedFile;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
struct UploadFailure {
    filename: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    files: Vec<UploadedFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<UploadFailure>,
}

/// Per-file results; 200 when everything succeeded, 207 when mixed, 400
/// when every file failed (or none were sent).
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut files = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {err}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(filename, %err, "upload field read failed");
                errors.push(UploadFailure {
                    filename,
                    error: "failed to read file data".to_string(),
                });
                continue;
            }
        };

        match state.uploader.store_file(&filename, &bytes).await {
            Ok(uploaded) => files.push(uploaded),
            Err(err) => errors.push(UploadFailure {
                filename,
                error: err.to_string(),
            }),
        }
    }

    let status = match (files.is_empty(), errors.is_empty()) {
        (false, true) => StatusCode::OK,
        (false, false) => StatusCode::MULTI_STATUS,
        (true, _) => StatusCode::BAD_REQUEST,
    };

    Ok((status, Json(UploadResponse { files, errors })).into_response())
}
