use anyhow::Context;
use keel_engine::{Engine, EngineConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod service;
pub mod state;

use state::AppState;

const DEFAULT_DATABASE_URL: &str = "sqlite://keel.db";
/// Time aborted runs get to record their result and notify
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_server=debug,keel_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Keel server...");

    let mut config = EngineConfig::from_env();
    if config.database_url.is_none() {
        config.database_url = Some(DEFAULT_DATABASE_URL.to_string());
    }
    let pipelines_dir = std::env::var("KEEL_PIPELINES_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("pipelines"));

    let engine = Engine::from_config(config)
        .await
        .context("Failed to initialize engine")?;
    let pool = engine
        .store()
        .cloned()
        .context("Run store is not configured")?;

    tracing::info!("Serving pipelines from {}", pipelines_dir.display());

    let state = AppState::new(engine, pool, pipelines_dir);
    let app = api::create_router(state.clone());

    let addr = std::env::var("KEEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("Server error")?;

    let unfinished = state.drain(SHUTDOWN_GRACE).await;
    if unfinished > 0 {
        tracing::warn!(
            "{} run(s) did not finish within {}s of shutdown",
            unfinished,
            SHUTDOWN_GRACE.as_secs()
        );
    }

    Ok(())
}

/// Resolves on Ctrl-C after aborting every active run
async fn shutdown_signal(state: AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    let cancelled = state.cancel_all();
    tracing::info!("Shutting down, aborted {} active run(s)", cancelled);
}
