pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod notify;
pub mod store;

use std::sync::Arc;

use anyhow::Context;

pub use api::{create_router, ApiError, AppState};
pub use config::AppConfig;
pub use logic::Resolver;
pub use model::{Field, FieldSet, FieldStyle, ModelSpec};
pub use notify::{LogNotifier, MemoryNotifier, Notify};
pub use store::{MemoryStore, PostgresStore, Store};

/// Boots the service for the given models: loads configuration, connects to
/// PostgreSQL, creates any missing tables, and serves the REST surface until
/// shutdown.
pub async fn run_server(models: Vec<ModelSpec>) -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    let store = PostgresStore::new(
        &config.database_url(),
        config.database.max_connections.unwrap_or(20),
    )
    .await?;
    store.migrate(&models).await?;

    let address = config.server_address();
    let state = Arc::new(AppState::new(
        Arc::new(store),
        config,
        Arc::new(LogNotifier),
    )?);
    let router = create_router(models).with_state(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    log::info!("listening on {address}");
    axum::serve(listener, router).await?;

    Ok(())
}
