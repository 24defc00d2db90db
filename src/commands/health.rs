use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub open_streams: usize,
}

pub fn build_health_response(started_at: Instant, open_streams: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        open_streams,
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(build_health_response(state.started_at, state.open_streams()))
}
