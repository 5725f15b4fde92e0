//! Health check endpoint

use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// GET `/health` — liveness plus store reachability.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let probe = tokio::time::timeout(state.config.store_timeout(), state.store.ping()).await;
    match probe {
        Ok(Ok(())) => (StatusCode::OK, "OK").into_response(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "health probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Redis connection failed").into_response()
        }
        Err(_) => {
            tracing::warn!("health probe timed out");
            (StatusCode::SERVICE_UNAVAILABLE, "Redis connection failed").into_response()
        }
    }
}
