use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use refrax_core::RefraxError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<RefraxError> for AppError {
    fn from(err: RefraxError) -> Self {
        match err {
            RefraxError::NotFound(msg) => Self::not_found(msg),
            RefraxError::InvalidRequest(msg) => Self::bad_request(msg),
            RefraxError::Unauthorized(msg) => Self::unauthorized(msg),
            RefraxError::Forbidden(msg) => Self::forbidden(msg),
            RefraxError::Storage(msg) => Self::new(StatusCode::BAD_GATEWAY, msg),
            RefraxError::Timeout(msg) => Self::new(StatusCode::GATEWAY_TIMEOUT, msg),
            // Encoder failures and everything internal stay opaque.
            RefraxError::Encoding(msg) => Self::internal(msg),
            RefraxError::Database(_) => Self::internal("database error"),
            RefraxError::Io(_) => Self::internal("io error"),
            RefraxError::Serialization(_) => Self::internal("serialization error"),
            RefraxError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
