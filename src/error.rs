//! Error taxonomy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Controller error taxonomy.
///
/// An admission denial is not an error: a correctly computed `allowed=false`
/// decision travels through [`crate::engine::Decision`], never through this
/// enum, so a 429 can never be confused with a broken store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed tenant identifier / request field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Non-positive or non-numeric capacity/rate in a configuration request.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// Configuration read or delete for an unprovisioned tenant.
    #[error("unknown tenant: {0}")]
    NotFound(String),

    /// The shared state store cannot be reached, timed out, or the scripted
    /// operation failed. Never retried inside the core.
    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid process configuration at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::InvalidPolicy(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::StoreUnavailable(_) | Error::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, body).into_response()
    }
}
