use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 250;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 120_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MIN_LATENCY_FLOOR_MS: f64 = 10.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exchange {
    Binance,
    Bybit,
    Deribit,
    #[serde(rename = "OKX")]
    Okx,
    Coinbase,
}

impl Exchange {
    pub const ALL: [Exchange; 5] = [
        Self::Binance,
        Self::Bybit,
        Self::Deribit,
        Self::Okx,
        Self::Coinbase,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "Binance",
            Self::Bybit => "Bybit",
            Self::Deribit => "Deribit",
            Self::Okx => "OKX",
            Self::Coinbase => "Coinbase",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|exchange| exchange.as_str() == value)
            .ok_or_else(|| AppError::validation(format!("unknown exchange '{value}'")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CloudProvider {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "GCP")]
    Gcp,
    Azure,
    Fastly,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 4] = [Self::Aws, Self::Gcp, Self::Azure, Self::Fastly];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::Gcp => "GCP",
            Self::Azure => "Azure",
            Self::Fastly => "Fastly",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == value)
            .ok_or_else(|| AppError::validation(format!("unknown provider '{value}'")))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencySample {
    pub id: String,
    pub exchange: Exchange,
    pub provider: CloudProvider,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub latency_ms: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AggregatedLatency {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p95: f64,
}

impl AggregatedLatency {
    /// Frame-level summary. `avg` is rounded to two decimals and `p95` is a
    /// rank selection over the sorted values, not an interpolation.
    pub fn from_latencies(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);

        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let sum: f64 = sorted.iter().sum();
        let avg = round_to_hundredths(sum / sorted.len() as f64);
        let p95 = percentile_from_sorted(&sorted, 0.95)?;

        Some(Self { min, max, avg, p95 })
    }
}

pub fn percentile_from_sorted(sorted_values: &[f64], percentile: f64) -> Option<f64> {
    if sorted_values.is_empty() {
        return None;
    }
    let max_index = sorted_values.len() - 1;
    let index = ((percentile * max_index as f64).floor() as usize).min(max_index);
    sorted_values.get(index).copied()
}

pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencyFrame {
    pub frame_id: String,
    pub samples: Vec<LatencySample>,
    pub aggregated: AggregatedLatency,
}

impl LatencyFrame {
    pub fn from_samples(frame_id: String, samples: Vec<LatencySample>) -> Result<Self, AppError> {
        let latencies: Vec<f64> = samples.iter().map(|sample| sample.latency_ms).collect();
        let aggregated = AggregatedLatency::from_latencies(&latencies)
            .ok_or_else(|| AppError::validation("frame must contain at least one sample"))?;

        Ok(Self {
            frame_id,
            samples,
            aggregated,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEnvelope<'a> {
    pub frame: &'a LatencyFrame,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfigArgs {
    pub poll_interval_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl StreamConfigArgs {
    pub fn normalize(self) -> Result<StreamConfig, AppError> {
        let poll_interval_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&poll_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "pollIntervalMs must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}"
            )));
        }

        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&heartbeat_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "heartbeatIntervalMs must be between {MIN_HEARTBEAT_INTERVAL_MS} and {MAX_HEARTBEAT_INTERVAL_MS}"
            )));
        }

        Ok(StreamConfig {
            poll_interval_ms,
            heartbeat_interval_ms,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub url: String,
    pub reconnect_delay_ms: u64,
}

impl ConsumerConfig {
    pub fn new(url: impl Into<String>, reconnect_delay_ms: Option<u64>) -> Result<Self, AppError> {
        let url = url.into().trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::InvalidArgument(
                "stream url must be an http(s) url".to_string(),
            ));
        }

        let reconnect_delay_ms = reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        Ok(Self {
            url,
            reconnect_delay_ms,
        })
    }
}
