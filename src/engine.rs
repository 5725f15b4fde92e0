//! Admission Decision Engine
//!
//! Single entry point used by the HTTP layer: resolve the tenant's policy,
//! run the configured algorithm's atomic transition against the shared
//! store, and assemble a structured decision. Never mutates policy.

use crate::algorithm::AdmissionAlgorithm;
use crate::error::Error;
use crate::registry::TenantRegistry;
use crate::store::StateStore;
use std::sync::Arc;
use std::time::Duration;

/// Cost of one admission check.
const CHECK_COST: f64 = 1.0;

/// Outcome of one admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the tenant may proceed.
    pub allowed: bool,
    /// The tenant's configured capacity.
    pub limit: f64,
    /// Remaining capacity after this check; 0 on denial.
    pub remaining: f64,
    /// Seconds until at least one unit is available, `None` when allowed.
    pub retry_after: Option<f64>,
    /// Epoch seconds of the (approximate) next availability.
    pub reset_at: i64,
    /// Algorithm name, e.g. `token bucket`.
    pub algorithm: &'static str,
}

/// Orchestrates policy resolution and the atomic admission transition.
pub struct AdmissionEngine {
    store: Arc<dyn StateStore>,
    registry: Arc<TenantRegistry>,
    algorithm: Arc<dyn AdmissionAlgorithm>,
    bucket_ttl: Duration,
    op_timeout: Duration,
}

impl AdmissionEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: Arc<TenantRegistry>,
        algorithm: Arc<dyn AdmissionAlgorithm>,
        bucket_ttl: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            algorithm,
            bucket_ttl,
            op_timeout,
        }
    }

    /// May this tenant proceed now?
    ///
    /// Auto-provisions unknown tenants. Store unreachability or timeout
    /// surfaces as [`Error::StoreUnavailable`], never as a denial.
    pub async fn check(&self, tenant_id: &str) -> Result<Decision, Error> {
        let policy = self.registry.resolve(tenant_id).await?;
        let now = epoch_now();

        let admit = self.store.admit(
            self.algorithm.as_ref(),
            tenant_id,
            &policy,
            CHECK_COST,
            now,
            self.bucket_ttl,
        );
        let transition = tokio::time::timeout(self.op_timeout, admit)
            .await
            .map_err(|_| Error::StoreUnavailable("admission transition timed out".into()))??;

        let interval = 1.0 / policy.rate;
        let reset_at = (now + interval.ceil()) as i64;
        let decision = if transition.allowed {
            Decision {
                allowed: true,
                limit: policy.capacity,
                remaining: self
                    .algorithm
                    .remaining(policy.capacity, transition.state.level)
                    .max(0.0),
                retry_after: None,
                reset_at,
                algorithm: self.algorithm.name(),
            }
        } else {
            Decision {
                allowed: false,
                limit: policy.capacity,
                remaining: 0.0,
                retry_after: Some(interval),
                reset_at,
                algorithm: self.algorithm.name(),
            }
        };

        tracing::debug!(
            tenant_id,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "admission check"
        );
        Ok(decision)
    }
}

/// Current time as fractional epoch seconds.
fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmKind;
    use crate::memory::MemoryStore;
    use crate::registry::PolicyDefaults;

    fn engine(kind: AlgorithmKind, capacity: f64, rate: f64) -> AdmissionEngine {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::default());
        let registry = Arc::new(TenantRegistry::new(
            Arc::clone(&store),
            PolicyDefaults { capacity, rate },
            Duration::from_millis(500),
        ));
        AdmissionEngine::new(
            store,
            registry,
            kind.build(),
            Duration::from_secs(3600),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn token_bucket_decision_sequence() {
        let engine = engine(AlgorithmKind::Token, 2.0, 1.0);

        let d1 = engine.check("u1").await.unwrap();
        assert!(d1.allowed);
        assert_eq!(d1.limit, 2.0);
        assert_eq!(d1.remaining.floor(), 1.0);
        assert_eq!(d1.algorithm, "token bucket");
        assert!(d1.retry_after.is_none());

        let d2 = engine.check("u1").await.unwrap();
        assert!(d2.allowed);

        let d3 = engine.check("u1").await.unwrap();
        assert!(!d3.allowed);
        assert_eq!(d3.remaining, 0.0);
        let retry = d3.retry_after.unwrap();
        assert!(retry > 0.9 && retry <= 1.0);
    }

    #[tokio::test]
    async fn leaky_bucket_decision_sequence() {
        let engine = engine(AlgorithmKind::Leaky, 2.0, 1000.0);
        let d = engine.check("u2").await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.algorithm, "leaky bucket");
        assert!(d.remaining >= 1.0);
    }

    #[tokio::test]
    async fn check_never_mutates_policy() {
        let engine = engine(AlgorithmKind::Token, 2.0, 1.0);
        engine.check("u1").await.unwrap();
        engine.check("u1").await.unwrap();
        let policy = engine.registry.get_policy("u1").await.unwrap();
        assert_eq!(policy.capacity, 2.0);
        assert_eq!(policy.rate, 1.0);
    }

    #[tokio::test]
    async fn override_bound_applies_to_checks() {
        let engine = engine(AlgorithmKind::Token, 2.0, 0.001);
        engine.registry.set_policy("u1", Some(10.0), None).await.unwrap();

        let mut admitted = 0;
        for _ in 0..12 {
            if engine.check("u1").await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
