mod config;
mod frame;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::config::{ConfigError, RelayConfig};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env()?;
    let port = config.port;
    let state = state::AppState::new(config);

    // Spawn background stroke sweep.
    let _sweep = services::sweep::spawn_sweep_task(state.strokes.clone(), state.config.sweep_interval);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| StartupError::Bind { port, source })?;

    info!(%port, "drawrelay listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
