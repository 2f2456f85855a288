use thiserror::Error;

/// Error taxonomy for the transformation engine. The HTTP layer maps each
/// variant onto a status code; messages never leak internal paths.
#[derive(Debug, Error)]
pub enum RefraxError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Recoverable object-store failure on a cache probe; callers fall
    /// through to the next tier instead of failing the request.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RefraxError>;
