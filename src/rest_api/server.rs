//! Axum HTTP server for the operational endpoints

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::LeaderState;
use crate::{Error, Result};

use super::handlers;

#[derive(Clone, Debug)]
pub struct ApiState {
    pub leader: LeaderState,
}

pub fn router(state: ApiState) -> Router {
    let app = Router::new().route("/healthz", get(handlers::health));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(handlers::metrics));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve the endpoints until the process exits
pub async fn run_server(state: ApiState, addr: SocketAddr) -> Result<()> {
    info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
