//! In-memory state store
//!
//! Single-instance stand-in for the shared Redis store, used by the test
//! suite and by development runs (`store_url = "memory://"`). Per-key
//! atomicity for `admit` comes from holding the dashmap entry guard across
//! the whole load-step-persist sequence; idle buckets expire lazily against
//! the deadline recorded at the last write.

use crate::algorithm::{AdmissionAlgorithm, BucketState, Transition};
use crate::error::Error;
use crate::store::{
    bucket_key, decode_policy, encode_policy, PolicyFields, StateStore, TenantPolicy,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct BucketSlot {
    state: BucketState,
    expires_at: f64,
}

/// In-process [`StateStore`].
pub struct MemoryStore {
    namespace: String,
    buckets: DashMap<String, BucketSlot>,
    policies: DashMap<String, HashMap<String, String>>,
    index: DashSet<String>,
}

impl MemoryStore {
    /// Create an empty store using the given key namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            buckets: DashMap::new(),
            policies: DashMap::new(),
            index: DashSet::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("ratelimit")
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn admit(
        &self,
        algo: &dyn AdmissionAlgorithm,
        tenant_id: &str,
        policy: &TenantPolicy,
        cost: f64,
        now: f64,
        ttl: Duration,
    ) -> Result<Transition, Error> {
        let key = bucket_key(&self.namespace, algo.key_segment(), tenant_id);

        // The entry guard serializes concurrent transitions for this key.
        let mut entry = self.buckets.entry(key).or_insert(BucketSlot {
            state: BucketState { level: 0.0, updated_at: 0.0 },
            expires_at: f64::NEG_INFINITY,
        });

        let prior = if now < entry.expires_at {
            Some(entry.state)
        } else {
            None // never written, or idle past its TTL
        };

        let transition = algo.step(prior, policy.capacity, policy.rate, cost, now);
        *entry = BucketSlot {
            state: transition.state,
            expires_at: now + ttl.as_secs_f64(),
        };
        Ok(transition)
    }

    async fn tenant_known(&self, tenant_id: &str) -> Result<bool, Error> {
        Ok(self.index.contains(tenant_id))
    }

    async fn load_policy(&self, tenant_id: &str) -> Result<Option<PolicyFields>, Error> {
        Ok(self
            .policies
            .get(tenant_id)
            .map(|fields| decode_policy(fields.value())))
    }

    async fn save_policy(&self, policy: &TenantPolicy) -> Result<(), Error> {
        let fields = encode_policy(policy)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.policies.insert(policy.tenant_id.clone(), fields);
        self.index.insert(policy.tenant_id.clone());
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<(), Error> {
        self.index.remove(tenant_id);
        self.policies.remove(tenant_id);
        for key in crate::store::all_bucket_keys(&self.namespace, tenant_id) {
            self.buckets.remove(&key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}
