// crates/server/src/main.rs
//! Syncview server binary.
//!
//! Binds the HTTP server, then serves until SIGINT. On shutdown every
//! running job gets a cancellation request so no imapsync process outlives
//! the server unsupervised.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use syncview_server::{create_app, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = Config::from_env();
    let port = config.port;
    tracing::info!(
        bin = %config.imapsync_bin,
        sync_timeout_secs = config.sync_timeout.as_secs(),
        "syncview v{}",
        env!("CARGO_PKG_VERSION"),
    );

    let (app, state) = create_app(config);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("\n  \u{2192} http://localhost:{port}\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Wait for SIGINT, then initiate cancellation of every running job.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install SIGINT handler");
        return;
    }
    tracing::info!("shutdown requested");
    state.registry.shutdown();
}
