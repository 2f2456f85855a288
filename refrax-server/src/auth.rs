//! Opaque API-key verification.
//!
//! Key issuance lives outside this service; verification is a comparison
//! against the configured key set. An empty set leaves the protected
//! endpoints open, which is the development default.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::infra::app_state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let keys = &state.config.auth.api_keys;
    if keys.is_empty() {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
        });

    match presented {
        Some(key) if keys.iter().any(|k| k == key) => Ok(next.run(request).await),
        Some(_) => Err(AppError::forbidden("invalid api key")),
        None => Err(AppError::unauthorized("api key required")),
    }
}
