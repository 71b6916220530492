//! Robohub server entry point

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use robohub_config::load_settings;
use robohub_fleet::HeartbeatReaper;
use robohub_persistence::AuditStore;
use robohub_server::{create_router, AppState, LogBuffer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logs = LogBuffer::new(2000);
    init_tracing(&logs);

    let config = match load_settings(std::env::var("ROBOHUB_ENV").ok().as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("starting robohub v{}", env!("CARGO_PKG_VERSION"));

    let store = match AuditStore::open(&config.database.path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(path = %config.database.path, error = %e, "cannot open audit store");
            std::process::exit(1);
        }
    };
    tracing::info!(path = %config.database.path, "audit store ready");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config.clone(), store, logs);

    let reaper = Arc::new(HeartbeatReaper::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.sessions),
        Arc::clone(&state.router),
        Duration::from_secs(config.fleet.reaper_interval_seconds),
        Duration::from_secs(config.fleet.heartbeat_timeout_seconds),
    ));
    let reaper_shutdown = reaper.start();
    tracing::info!("heartbeat reaper started");

    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "cannot bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = reaper_shutdown.send(true);
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(logs: &LogBuffer) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "robohub=info,tower_http=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(logs.layer())
        .init();
}
