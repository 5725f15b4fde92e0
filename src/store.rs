//! Shared Atomic State Store contract
//!
//! The engine treats the store as a capability: a key/value interface that
//! can run one admission transition for one key as a single atomic unit,
//! hold per-tenant policy hashes, maintain the tenant index set, and expire
//! idle bucket state. [`crate::redis_store::RedisStore`] is the production
//! implementation; [`crate::memory::MemoryStore`] backs tests and
//! single-instance development runs.

use crate::algorithm::{AdmissionAlgorithm, BucketState, Transition, LEAKY_SEGMENT, TOKEN_SEGMENT};
use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Effective consumption-rate policy for one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantPolicy {
    /// Opaque, case-sensitive tenant identifier.
    pub tenant_id: String,
    /// Max tokens (token bucket) or max queued volume (leaky bucket). > 0.
    pub capacity: f64,
    /// Tokens refilled or volume leaked per second. > 0.
    pub rate: f64,
    /// When the policy record was first persisted.
    pub created_at: DateTime<Utc>,
    /// Last explicit configuration change (or creation).
    pub updated_at: DateTime<Utc>,
}

/// Raw policy hash as loaded from the store. Unset fields fall back to
/// process-wide defaults at resolve time.
#[derive(Debug, Clone, Default)]
pub struct PolicyFields {
    pub capacity: Option<f64>,
    pub rate: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Abstract key/value store shared by all controller instances.
///
/// `admit` is the load-refill-compare-mutate-persist sequence; every
/// implementation must execute it atomically per key, so that no two
/// concurrent calls for the same tenant can observe the same pre-mutation
/// state and both succeed when only one should.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Run one atomic admission transition for `tenant_id` under `algo`.
    async fn admit(
        &self,
        algo: &dyn AdmissionAlgorithm,
        tenant_id: &str,
        policy: &TenantPolicy,
        cost: f64,
        now: f64,
        ttl: Duration,
    ) -> Result<Transition, Error>;

    /// Whether `tenant_id` is in the tenant index.
    async fn tenant_known(&self, tenant_id: &str) -> Result<bool, Error>;

    /// Load the policy hash for `tenant_id`, `None` if absent.
    async fn load_policy(&self, tenant_id: &str) -> Result<Option<PolicyFields>, Error>;

    /// Persist a policy record and ensure index membership.
    async fn save_policy(&self, policy: &TenantPolicy) -> Result<(), Error>;

    /// Remove a tenant's index entry, policy, and bucket state under both
    /// algorithm namespaces. Idempotent.
    async fn delete_tenant(&self, tenant_id: &str) -> Result<(), Error>;

    /// Reachability probe for the health endpoint.
    async fn ping(&self) -> Result<(), Error>;
}

// =============================================================================
// Key namespace
// =============================================================================

/// Bucket state key: `{ns}:{algorithm}:{tenant_id}`. The algorithm segment
/// guarantees token-bucket and leaky-bucket state never collide for the same
/// tenant.
pub fn bucket_key(namespace: &str, segment: &str, tenant_id: &str) -> String {
    format!("{namespace}:{segment}:{tenant_id}")
}

/// Policy record key: `{ns}:users:{tenant_id}`.
pub fn policy_key(namespace: &str, tenant_id: &str) -> String {
    format!("{namespace}:users:{tenant_id}")
}

/// Tenant index set key: `{ns}:users`.
pub fn index_key(namespace: &str) -> String {
    format!("{namespace}:users")
}

/// Both bucket keys for a tenant, for deletion.
pub fn all_bucket_keys(namespace: &str, tenant_id: &str) -> [String; 2] {
    [
        bucket_key(namespace, TOKEN_SEGMENT, tenant_id),
        bucket_key(namespace, LEAKY_SEGMENT, tenant_id),
    ]
}

// =============================================================================
// Bucket state codec
// =============================================================================

/// Decode a bucket record from its store field representation: the `level`
/// and `ts` hash fields written by the Lua scripts in [`crate::algorithm`].
pub fn decode_bucket(level: &str, ts: &str) -> Option<BucketState> {
    let level: f64 = level.parse().ok()?;
    let updated_at: f64 = ts.parse().ok()?;
    Some(BucketState { level, updated_at })
}

// =============================================================================
// Policy codec
// =============================================================================

const POLICY_FIELD_CAPACITY: &str = "capacity";
const POLICY_FIELD_RATE: &str = "rate";
const POLICY_FIELD_CREATED_AT: &str = "created_at";
const POLICY_FIELD_UPDATED_AT: &str = "updated_at";

/// Encode a policy record into store hash fields.
pub fn encode_policy(policy: &TenantPolicy) -> Vec<(&'static str, String)> {
    vec![
        (POLICY_FIELD_CAPACITY, policy.capacity.to_string()),
        (POLICY_FIELD_RATE, policy.rate.to_string()),
        (POLICY_FIELD_CREATED_AT, policy.created_at.to_rfc3339()),
        (POLICY_FIELD_UPDATED_AT, policy.updated_at.to_rfc3339()),
    ]
}

/// Decode store hash fields back into a partial policy. Unparseable fields
/// are treated as unset rather than failing the whole record.
pub fn decode_policy(fields: &HashMap<String, String>) -> PolicyFields {
    let parse_ts = |name: &str| {
        fields
            .get(name)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    PolicyFields {
        capacity: fields.get(POLICY_FIELD_CAPACITY).and_then(|v| v.parse().ok()),
        rate: fields.get(POLICY_FIELD_RATE).and_then(|v| v.parse().ok()),
        created_at: parse_ts(POLICY_FIELD_CREATED_AT),
        updated_at: parse_ts(POLICY_FIELD_UPDATED_AT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_algorithm() {
        assert_eq!(bucket_key("ratelimit", "token", "u1"), "ratelimit:token:u1");
        assert_eq!(bucket_key("ratelimit", "leaky", "u1"), "ratelimit:leaky:u1");
        assert_eq!(policy_key("ratelimit", "u1"), "ratelimit:users:u1");
        assert_eq!(index_key("ratelimit"), "ratelimit:users");
    }

    #[test]
    fn bucket_codec_round_trips() {
        let state = decode_bucket("3.5", "1700000000.25").unwrap();
        assert_eq!(state.level, 3.5);
        assert_eq!(state.updated_at, 1700000000.25);
        assert!(decode_bucket("not-a-number", "0").is_none());
    }

    #[test]
    fn policy_codec_round_trips() {
        let now = Utc::now();
        let policy = TenantPolicy {
            tenant_id: "u1".into(),
            capacity: 10.0,
            rate: 2.5,
            created_at: now,
            updated_at: now,
        };
        let fields: HashMap<String, String> = encode_policy(&policy)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let decoded = decode_policy(&fields);
        assert_eq!(decoded.capacity, Some(10.0));
        assert_eq!(decoded.rate, Some(2.5));
        assert_eq!(decoded.created_at.unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn policy_codec_tolerates_partial_records() {
        let mut fields = HashMap::new();
        fields.insert("capacity".to_string(), "7".to_string());
        fields.insert("rate".to_string(), "garbage".to_string());
        let decoded = decode_policy(&fields);
        assert_eq!(decoded.capacity, Some(7.0));
        assert_eq!(decoded.rate, None);
        assert!(decoded.created_at.is_none());
    }
}
