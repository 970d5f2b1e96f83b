mod config;
mod db;
mod error;
mod llm;
mod model;
mod render;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::llm::BackendRegistry;
use crate::llm::config::BackendsConfig;
use crate::store::DocumentStore;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PgStore;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    let store: Arc<dyn DocumentStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url).await.expect("database init failed");
            let listeners = db::init_listener_pool(url).expect("invalid DATABASE_URL");
            tracing::info!("using PostgreSQL document store");
            Arc::new(PgStore::new(pool, listeners))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is lost on exit)");
            Arc::new(MemoryStore::new())
        }
    };

    // Backends are optional: replies finalize as interrupted when none is configured.
    let backends = match BackendRegistry::from_config(&BackendsConfig::from_env()) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::warn!(error = %e, "LLM backends not configured, replies will be interrupted");
            BackendRegistry::empty()
        }
    };
    tracing::info!(backends = ?backends.list_available(), "backend registry initialized");

    let port = config.port;
    let grace = config.shutdown_grace;
    let state = state::AppState::new(store, backends, config);
    let generations = state.generations.clone();

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "chatspace listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    let aborted = generations.shutdown(grace).await;
    tracing::info!(aborted, "chatspace stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
