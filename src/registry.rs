//! Tenant Registry
//!
//! Resolves the effective policy for a tenant and manages explicit
//! overrides. Tenants are auto-provisioned with process-wide defaults on
//! first contact; concurrent first-contact requests converge because the
//! defaults are deterministic and the index add is last-writer-wins.

use crate::error::Error;
use crate::store::{PolicyFields, StateStore, TenantPolicy};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Process-wide fallback policy applied to tenants without explicit
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct PolicyDefaults {
    pub capacity: f64,
    pub rate: f64,
}

/// Per-tenant policy lookup and lifecycle.
pub struct TenantRegistry {
    store: Arc<dyn StateStore>,
    defaults: PolicyDefaults,
    op_timeout: Duration,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn StateStore>, defaults: PolicyDefaults, op_timeout: Duration) -> Self {
        Self {
            store,
            defaults,
            op_timeout,
        }
    }

    /// Bound every store call so a partitioned store cannot stall the
    /// admission path.
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| Error::StoreUnavailable("store operation timed out".into()))?
    }

    fn merge(&self, tenant_id: &str, fields: PolicyFields) -> TenantPolicy {
        let now = Utc::now();
        TenantPolicy {
            tenant_id: tenant_id.to_string(),
            capacity: fields.capacity.unwrap_or(self.defaults.capacity),
            rate: fields.rate.unwrap_or(self.defaults.rate),
            created_at: fields.created_at.unwrap_or(now),
            updated_at: fields.updated_at.unwrap_or(now),
        }
    }

    /// Effective policy for `tenant_id`, provisioning a default record on
    /// first contact.
    pub async fn resolve(&self, tenant_id: &str) -> Result<TenantPolicy, Error> {
        if self.bounded(self.store.tenant_known(tenant_id)).await? {
            let fields = self
                .bounded(self.store.load_policy(tenant_id))
                .await?
                .unwrap_or_default();
            return Ok(self.merge(tenant_id, fields));
        }

        let policy = self.merge(tenant_id, PolicyFields::default());
        self.bounded(self.store.save_policy(&policy)).await?;
        tracing::debug!(tenant_id, capacity = policy.capacity, rate = policy.rate,
            "provisioned tenant with default policy");
        Ok(policy)
    }

    /// Create or update a tenant's policy. Provided fields must be finite
    /// and positive; omitted fields keep their current (or default) values.
    pub async fn set_policy(
        &self,
        tenant_id: &str,
        capacity: Option<f64>,
        rate: Option<f64>,
    ) -> Result<TenantPolicy, Error> {
        for (name, value) in [("capacity", capacity), ("rate", rate)] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(Error::InvalidPolicy(format!("{name} must be positive, got {v}")));
                }
            }
        }

        let existing = self
            .bounded(self.store.load_policy(tenant_id))
            .await?
            .unwrap_or_default();
        let mut policy = self.merge(tenant_id, existing);
        if let Some(c) = capacity {
            policy.capacity = c;
        }
        if let Some(r) = rate {
            policy.rate = r;
        }
        policy.updated_at = Utc::now();

        self.bounded(self.store.save_policy(&policy)).await?;
        tracing::info!(tenant_id, capacity = policy.capacity, rate = policy.rate,
            "tenant policy updated");
        Ok(policy)
    }

    /// Explicitly configured or previously provisioned policy.
    pub async fn get_policy(&self, tenant_id: &str) -> Result<TenantPolicy, Error> {
        if !self.bounded(self.store.tenant_known(tenant_id)).await? {
            return Err(Error::NotFound(tenant_id.to_string()));
        }
        let fields = self
            .bounded(self.store.load_policy(tenant_id))
            .await?
            .unwrap_or_default();
        Ok(self.merge(tenant_id, fields))
    }

    /// Remove a tenant's policy, index entry, and bucket state. Deleting an
    /// unknown tenant is not an error.
    pub async fn delete(&self, tenant_id: &str) -> Result<(), Error> {
        self.bounded(self.store.delete_tenant(tenant_id)).await?;
        tracing::info!(tenant_id, "tenant deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn registry() -> TenantRegistry {
        TenantRegistry::new(
            Arc::new(MemoryStore::default()),
            PolicyDefaults { capacity: 5.0, rate: 1.0 },
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn resolve_provisions_defaults_on_first_contact() {
        let reg = registry();
        let policy = reg.resolve("u1").await.unwrap();
        assert_eq!(policy.capacity, 5.0);
        assert_eq!(policy.rate, 1.0);

        // Now known: get_policy succeeds and resolve is stable.
        let loaded = reg.get_policy("u1").await.unwrap();
        assert_eq!(loaded.capacity, 5.0);
        assert_eq!(reg.resolve("u1").await.unwrap().created_at, loaded.created_at);
    }

    #[tokio::test]
    async fn get_policy_unknown_tenant_is_not_found() {
        let reg = registry();
        assert!(matches!(reg.get_policy("ghost").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn set_policy_overrides_and_merges() {
        let reg = registry();
        let policy = reg.set_policy("u1", Some(10.0), None).await.unwrap();
        assert_eq!(policy.capacity, 10.0);
        assert_eq!(policy.rate, 1.0); // default kept

        let policy = reg.set_policy("u1", None, Some(2.0)).await.unwrap();
        assert_eq!(policy.capacity, 10.0); // previous override kept
        assert_eq!(policy.rate, 2.0);
    }

    #[tokio::test]
    async fn set_policy_rejects_non_positive_fields() {
        let reg = registry();
        assert!(matches!(
            reg.set_policy("u1", Some(0.0), None).await,
            Err(Error::InvalidPolicy(_))
        ));
        assert!(matches!(
            reg.set_policy("u1", None, Some(-1.0)).await,
            Err(Error::InvalidPolicy(_))
        ));
        assert!(matches!(
            reg.set_policy("u1", Some(f64::NAN), None).await,
            Err(Error::InvalidPolicy(_))
        ));
        // Nothing was persisted.
        assert!(matches!(reg.get_policy("u1").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let reg = registry();
        reg.set_policy("u1", Some(3.0), Some(1.0)).await.unwrap();
        reg.delete("u1").await.unwrap();
        assert!(matches!(reg.get_policy("u1").await, Err(Error::NotFound(_))));
        reg.delete("u1").await.unwrap();
        reg.delete("never-existed").await.unwrap();
    }
}
