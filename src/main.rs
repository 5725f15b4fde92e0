//! ratelimitd — Main Entry Point

use ratelimitd::{build_router, AppConfig, AppState, MemoryStore, RedisStore, StateStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ratelimitd v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    tracing::info!(
        algorithm = ?config.algorithm,
        store_url = %config.store_url,
        default_capacity = config.default_capacity,
        default_rate = config.default_rate,
        namespace = %config.namespace,
        "starting with configuration"
    );

    let store: Arc<dyn StateStore> = if config.uses_memory_store() {
        tracing::warn!("using in-process state store; limits are not shared across instances");
        Arc::new(MemoryStore::new(config.namespace.clone()))
    } else {
        Arc::new(RedisStore::connect(&config.store_url, config.namespace.clone()).await?)
    };

    // Fail fast if the store is unreachable at startup.
    store.ping().await?;
    tracing::info!("connected to state store");

    let listen_addr = config.listen_addr.clone();
    let app = build_router(AppState::new(config, store));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!("admission API listening on {listen_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
