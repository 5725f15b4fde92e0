//! Process configuration
//!
//! Read once at startup: optional JSON config file via `CONFIG_PATH`, then
//! individual environment-variable overrides. Nothing here is consulted on
//! the request path except through the structs built from it.

use crate::algorithm::AlgorithmKind;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What `/check` should answer when the shared store is unreachable.
///
/// The default surfaces the failure as a server error so operators and
/// clients can distinguish "you are rate-limited" from "the limiter is
/// broken"; `allow`/`deny` are explicit operator choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Respond 500 (default).
    Error,
    /// Fail open: admit the request.
    Allow,
    /// Fail closed: deny the request.
    Deny,
}

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen address for the admission API.
    pub listen_addr: String,
    /// Shared store URL; `memory://` selects the in-process store.
    pub store_url: String,
    /// Active admission algorithm for this instance.
    pub algorithm: AlgorithmKind,
    /// Default bucket capacity for auto-provisioned tenants.
    pub default_capacity: f64,
    /// Default refill/leak rate (units per second).
    pub default_rate: f64,
    /// Key namespace prefix in the shared store.
    pub namespace: String,
    /// Idle seconds after which bucket state expires from the store.
    pub bucket_ttl_secs: u64,
    /// Upper bound on any single store operation.
    pub store_timeout_ms: u64,
    /// `/check` behavior when the store is unreachable.
    pub on_store_error: FailurePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            store_url: "redis://127.0.0.1:6379/0".into(),
            algorithm: AlgorithmKind::Leaky,
            default_capacity: 5.0,
            default_rate: 1.0,
            namespace: "ratelimit".into(),
            bucket_ttl_secs: 3600,
            store_timeout_ms: 500,
            on_store_error: FailurePolicy::Error,
        }
    }
}

impl AppConfig {
    /// Load from a JSON file.
    pub fn load(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// File config (via `CONFIG_PATH`) if present, defaults otherwise,
    /// then environment overrides on top.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::load(&path)
                .map_err(|e| Error::Config(format!("failed to load {path}: {e}")))?,
            Err(_) => Self::default(),
        };

        if let Ok(v) = std::env::var("RATELIMITD_LISTEN_ADDR") {
            config.listen_addr = v;
        }
        if let Ok(v) = std::env::var("RATELIMITD_STORE_URL") {
            config.store_url = v;
        }
        if let Ok(v) = std::env::var("RATELIMITD_ALGORITHM") {
            config.algorithm = v.parse().map_err(Error::Config)?;
        }
        if let Ok(v) = std::env::var("RATELIMITD_DEFAULT_CAPACITY") {
            config.default_capacity = v
                .parse()
                .map_err(|_| Error::Config(format!("invalid default capacity '{v}'")))?;
        }
        if let Ok(v) = std::env::var("RATELIMITD_DEFAULT_RATE") {
            config.default_rate = v
                .parse()
                .map_err(|_| Error::Config(format!("invalid default rate '{v}'")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Enforce the policy invariants on the process defaults.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.default_capacity.is_finite() || self.default_capacity <= 0.0 {
            return Err(Error::Config(format!(
                "default_capacity must be positive, got {}",
                self.default_capacity
            )));
        }
        if !self.default_rate.is_finite() || self.default_rate <= 0.0 {
            return Err(Error::Config(format!(
                "default_rate must be positive, got {}",
                self.default_rate
            )));
        }
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace must not be empty".into()));
        }
        Ok(())
    }

    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Whether the in-process store was selected.
    pub fn uses_memory_store(&self) -> bool {
        self.store_url.starts_with("memory")
    }
}
