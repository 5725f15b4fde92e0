//! Tenant policy configuration endpoints

use crate::algorithm::AlgorithmKind;
use crate::error::Error;
use crate::store::TenantPolicy;
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Query parameters shared by the `/users` methods. Capacity and rate come
/// in under algorithm-specific names: `max_tokens`/`refill_rate` for a
/// token-bucket instance, `capacity`/`leak_rate` for a leaky-bucket one.
/// They arrive as strings so a non-numeric value maps to `InvalidPolicy`.
#[derive(Deserialize)]
pub struct UserParams {
    user_id: Option<String>,
    max_tokens: Option<String>,
    refill_rate: Option<String>,
    capacity: Option<String>,
    leak_rate: Option<String>,
}

/// Tenant policy as returned by the API.
#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub user_id: String,
    pub algorithm: String,
    pub capacity: f64,
    pub rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyResponse {
    fn from_policy(policy: TenantPolicy, algorithm: &str) -> Self {
        Self {
            user_id: policy.tenant_id,
            algorithm: algorithm.to_string(),
            capacity: policy.capacity,
            rate: policy.rate,
            created_at: policy.created_at,
            updated_at: policy.updated_at,
        }
    }
}

fn require_user_id(params: &UserParams) -> Result<&str, Error> {
    params
        .user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidRequest("user_id required".into()))
}

fn parse_field(name: &str, value: Option<&str>) -> Result<Option<f64>, Error> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::InvalidPolicy(format!("{name} must be numeric, got '{raw}'"))),
    }
}

/// GET `/users?user_id={id}` — read a tenant's effective policy.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<Json<PolicyResponse>, Error> {
    let user_id = require_user_id(&params)?;
    let policy = state.registry.get_policy(user_id).await?;
    Ok(Json(PolicyResponse::from_policy(policy, state.algorithm.name())))
}

/// POST `/users?user_id={id}&...` — create or update a tenant's policy.
pub async fn upsert_user(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<Json<PolicyResponse>, Error> {
    let user_id = require_user_id(&params)?;

    let (capacity, rate) = match state.config.algorithm {
        AlgorithmKind::Token => (
            parse_field("max_tokens", params.max_tokens.as_deref())?,
            parse_field("refill_rate", params.refill_rate.as_deref())?,
        ),
        AlgorithmKind::Leaky => (
            parse_field("capacity", params.capacity.as_deref())?,
            parse_field("leak_rate", params.leak_rate.as_deref())?,
        ),
    };

    let policy = state.registry.set_policy(user_id, capacity, rate).await?;
    Ok(Json(PolicyResponse::from_policy(policy, state.algorithm.name())))
}

/// DELETE `/users?user_id={id}` — delete a tenant. Idempotent.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<&'static str, Error> {
    let user_id = require_user_id(&params)?;
    state.registry.delete(user_id).await?;
    Ok("OK")
}
