//! Axum HTTP server exposing `/health` and `/metrics` for the operator process.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ReconcilerContext;
use crate::error::{Error, Result};

use super::dto::HealthResponse;

pub async fn run_server(ctx: Arc<ReconcilerContext>, listen: &str) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| Error::ConfigError(format!("invalid metrics listen address {listen}: {e}")))?;

    info!(%addr, "metrics/health server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("server error: {e}")))?;

    Ok(())
}

async fn health(State(ctx): State<Arc<ReconcilerContext>>) -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: if ctx.leadership.is_leader() { "leading".to_string() } else { "standby".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn metrics(State(ctx): State<Arc<ReconcilerContext>>) -> Result<String, axum::http::StatusCode> {
    let Some(metrics) = &ctx.metrics else {
        return Err(axum::http::StatusCode::NOT_FOUND);
    };
    metrics.encode().map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}
