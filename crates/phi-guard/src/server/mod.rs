//! Axum HTTP(S) sidecar API, routing, and middleware.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Inject shared application state (`AppState`) into handlers.
//! - Bind the listener, with rustls when a certificate is configured.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
pub mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use state::AppState;

/// Serve the API on `0.0.0.0:port` until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the TLS material is invalid.
pub async fn run(state: AppState, port: u16, tls_paths: Option<(PathBuf, PathBuf)>) -> Result<()> {
    let router = router::build(state);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    match tls_paths {
        Some((cert, key)) => {
            let config = tls::load_server_config(&cert, &key).await?;
            info!(addr = %addr, tls = true, "listening");
            tls::serve(listener, config, router, shutdown_signal()).await
        }
        None => {
            info!(addr = %addr, tls = false, "listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server failed")
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
