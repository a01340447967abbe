//! festreg registration server.

use std::sync::Arc;

use anyhow::Result;
use festreg_server::{
    api,
    config::{self, StoreKind},
    db,
    mail::LogMailer,
    seed::seed,
    state::AppState,
    store::{MemoryStore, PgStore, Store},
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to FESTREG_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting festreg");
    info!(listen_addr = %config.listen_addr, store = ?config.store, "Configuration loaded");

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Postgres => {
            let pool = match db::connect(&config.database).await {
                Ok(pool) => {
                    info!("Database connection established");
                    pool
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            if config.dev_mode {
                let dir = config.database.resolve_migrations_dir()?;
                if let Err(e) = db::migrate(&pool, &dir).await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }
            Arc::new(PgStore::new(pool))
        }
        StoreKind::Memory => {
            info!("Using in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, Arc::new(LogMailer), config.app.clone());

    if let Err(e) = seed(state.store(), state.credentials(), state.settings()).await {
        error!(error = %e, "Failed to seed defaults");
        return Err(e.into());
    }

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("festreg shutdown complete");
    Ok(())
}
