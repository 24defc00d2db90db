use crate::latency::types::StreamConfig;
use crate::latency::STREAM_PATH;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfoResponse {
    pub product_name: String,
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub stream_path: &'static str,
    pub stream_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
}

pub fn build_app_info_response(
    product_name: String,
    version: String,
    stream_config: StreamConfig,
) -> AppInfoResponse {
    AppInfoResponse {
        product_name,
        version,
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        stream_path: STREAM_PATH,
        stream_interval_ms: stream_config.poll_interval_ms,
        heartbeat_interval_ms: stream_config.heartbeat_interval_ms,
    }
}

pub async fn app_info(State(state): State<Arc<AppState>>) -> Json<AppInfoResponse> {
    Json(build_app_info_response(
        env!("CARGO_PKG_NAME").to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
        state.stream_config,
    ))
}
