pub mod commands;
pub mod error;
pub mod latency;
pub mod observability;
pub mod state;

use axum::routing::get;
use axum::Router;
use commands::{app_info::app_info, health::health, latency_stream::latency_stream};
use error::AppError;
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", get(app_info))
        .route(latency::STREAM_PATH, get(latency_stream))
        .with_state(state)
}

/// Serves until the state's shutdown token is cancelled. Open streams see the
/// same cancellation and close with reason `cancelled`.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), AppError> {
    let shutdown = state.shutdown.clone();
    let local_addr = listener.local_addr()?;
    tracing::info!(
        service = "latency-stream",
        bind = %local_addr,
        poll_interval_ms = state.stream_config.poll_interval_ms,
        heartbeat_interval_ms = state.stream_config.heartbeat_interval_ms,
        "latency api started"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!(service = "latency-stream", "latency api stopped");
    Ok(())
}
