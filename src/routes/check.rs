//! Admission check endpoint

use crate::config::FailurePolicy;
use crate::engine::Decision;
use crate::error::Error;
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{AppendHeaders, IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

const BODY_ALLOWED: &str = "allowed";
const BODY_DENIED: &str = "rate limit exceeded";

#[derive(Deserialize)]
pub struct CheckParams {
    user_id: Option<String>,
}

/// GET `/check?user_id={id}`
///
/// 200 `allowed` or 429 `rate limit exceeded`, both with the standard
/// rate-limit headers; 500 when the store is unreachable (unless the
/// operator configured a fail-open/fail-closed fallback).
pub async fn check(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CheckParams>,
) -> Response {
    let Some(user_id) = params.user_id.filter(|id| !id.is_empty()) else {
        return Error::InvalidRequest("user_id required".into()).into_response();
    };

    match state.engine.check(&user_id).await {
        Ok(decision) => render(decision),
        Err(Error::StoreUnavailable(reason)) => {
            tracing::error!(%user_id, %reason, "admission check failed: store unavailable");
            match state.config.on_store_error {
                FailurePolicy::Error => {
                    Error::StoreUnavailable(reason).into_response()
                }
                FailurePolicy::Allow => (StatusCode::OK, BODY_ALLOWED).into_response(),
                FailurePolicy::Deny => {
                    (StatusCode::TOO_MANY_REQUESTS, BODY_DENIED).into_response()
                }
            }
        }
        Err(e) => e.into_response(),
    }
}

fn render(decision: Decision) -> Response {
    let mut headers = vec![
        ("X-RateLimit-Limit", fmt_num(decision.limit)),
        ("X-RateLimit-Remaining", fmt_num(decision.remaining.floor())),
        ("X-RateLimit-Reset", decision.reset_at.to_string()),
        ("X-RateLimit-Algorithm", decision.algorithm.to_string()),
    ];

    if decision.allowed {
        (StatusCode::OK, AppendHeaders(headers), BODY_ALLOWED).into_response()
    } else {
        let retry_secs = decision
            .retry_after
            .map(|s| (s.ceil() as u64).max(1))
            .unwrap_or(1);
        headers.push(("Retry-After", retry_secs.to_string()));
        (StatusCode::TOO_MANY_REQUESTS, AppendHeaders(headers), BODY_DENIED).into_response()
    }
}

/// Format a numeric header value, dropping a trailing `.0` on whole numbers.
fn fmt_num(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
