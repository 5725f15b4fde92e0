//! ratelimitd — distributed multi-tenant request-admission controller
//!
//! Decides in bounded time whether a tenant may proceed, based on a
//! consumption-rate policy shared consistently across many controller
//! instances through an external atomic state store.
//!
//! ```text
//! HTTP API → Decision Engine → Tenant Registry → Algorithm → State Store
//! ```
//!
//! Replicas coordinate only through the store: each admission check runs as
//! one atomic load-refill-compare-mutate-persist transition, so concurrent
//! checks for the same tenant can never both spend the same capacity.

pub mod algorithm;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod registry;
pub mod routes;
pub mod store;

pub use algorithm::{AdmissionAlgorithm, AlgorithmKind};
pub use config::AppConfig;
pub use engine::{AdmissionEngine, Decision};
pub use error::Error;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use registry::{PolicyDefaults, TenantRegistry};
pub use store::{StateStore, TenantPolicy};

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared per-process state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn StateStore>,
    pub algorithm: Arc<dyn AdmissionAlgorithm>,
    pub registry: Arc<TenantRegistry>,
    pub engine: Arc<AdmissionEngine>,
}

impl AppState {
    /// Wire the registry and engine onto a store using `config`.
    pub fn new(config: AppConfig, store: Arc<dyn StateStore>) -> Self {
        let algorithm = config.algorithm.build();
        let registry = Arc::new(TenantRegistry::new(
            Arc::clone(&store),
            PolicyDefaults {
                capacity: config.default_capacity,
                rate: config.default_rate,
            },
            config.store_timeout(),
        ));
        let engine = Arc::new(AdmissionEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&algorithm),
            config.bucket_ttl(),
            config.store_timeout(),
        ));
        Self {
            config,
            store,
            algorithm,
            registry,
            engine,
        }
    }
}

/// Build the admission API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/check", get(routes::check::check))
        .route(
            "/users",
            get(routes::users::get_user)
                .post(routes::users::upsert_user)
                .delete(routes::users::delete_user),
        )
        .route("/health", get(routes::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
