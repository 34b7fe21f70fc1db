//! PLM Sync - webhook ingest for product lifecycle data
//!
//! Receives change events from the PLM (materials, styles, tracking plans)
//! and mirrors them into PostgreSQL. New payload fields become new columns,
//! nested collections are reconciled against their previous snapshot, and
//! milestone dependencies are resolved once the external agent delivers a
//! plan's dependency table.

mod config;
mod db;
mod dependency;
mod error;
mod models;
mod payload;
mod plm;
mod recalc;
mod routes;
mod schema;
mod state;
mod store;
mod sync;
mod tables;
#[cfg(test)]
mod testing;

use crate::config::Settings;
use crate::routes::create_router;
use crate::state::{AppState, Ports};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting PLM Sync...");

    let settings = Settings::load()?;
    info!("Configuration loaded successfully");

    let pool = db::create_pool(&settings.database).await?;
    if settings.database.bootstrap {
        if let Err(e) = db::bootstrap(&pool).await {
            warn!("Warning creating tables: {}", e);
        }
    }

    let ports = Ports::connect(pool, &settings)?;
    let state = Arc::new(AppState::new(ports, &settings));
    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    info!("Server listening on http://{}", addr);
    info!("   POST /webhooks/material      - Material header events");
    info!("   POST /webhooks/style         - Style header events");
    info!("   POST /webhooks/tracking      - Tracking plan-style events");
    info!("   POST /webhooks/dependencies  - Dependency delivery from the agent");
    info!("   POST /masterdata/sync        - Pull masterdata choice lists");
    info!("   GET  /health                 - Health check");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,plm_sync=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
