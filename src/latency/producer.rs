use crate::error::AppError;
use crate::latency::schema::validate_frame;
use crate::latency::types::{
    CloudProvider, Exchange, LatencyFrame, LatencySample, MIN_LATENCY_FLOOR_MS,
};
use crate::observability::log_latency_event;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::ops::Range;
use uuid::Uuid;

const JITTER_PERIOD_MS: f64 = 60_000.0;
const JITTER_AMPLITUDE_MS: f64 = 12.0;

/// Source of latency frames. The publisher only depends on this capability,
/// so a real measurement feed can replace the synthetic generator.
pub trait FrameProducer: Send + Sync {
    fn generate_frame(&self) -> Result<LatencyFrame, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointLocation {
    pub exchange: Exchange,
    pub provider: CloudProvider,
    pub region: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

pub const REFERENCE_ENDPOINTS: [EndpointLocation; 5] = [
    EndpointLocation {
        exchange: Exchange::Binance,
        provider: CloudProvider::Aws,
        region: "ap-southeast-1",
        latitude: 1.3521,
        longitude: 103.8198,
    },
    EndpointLocation {
        exchange: Exchange::Bybit,
        provider: CloudProvider::Fastly,
        region: "eu-west-3",
        latitude: 48.8566,
        longitude: 2.3522,
    },
    EndpointLocation {
        exchange: Exchange::Deribit,
        provider: CloudProvider::Gcp,
        region: "us-central1",
        latitude: 41.8781,
        longitude: -87.6298,
    },
    EndpointLocation {
        exchange: Exchange::Okx,
        provider: CloudProvider::Azure,
        region: "jp-east",
        latitude: 35.6762,
        longitude: 139.6503,
    },
    EndpointLocation {
        exchange: Exchange::Coinbase,
        provider: CloudProvider::Aws,
        region: "us-east-1",
        latitude: 37.7749,
        longitude: -122.4194,
    },
];

#[derive(Debug, Clone)]
pub struct SyntheticLatencyProducer {
    endpoints: Vec<EndpointLocation>,
}

impl Default for SyntheticLatencyProducer {
    fn default() -> Self {
        Self::new(REFERENCE_ENDPOINTS.to_vec())
    }
}

impl SyntheticLatencyProducer {
    pub fn new(endpoints: Vec<EndpointLocation>) -> Self {
        Self { endpoints }
    }

    pub fn endpoints(&self) -> &[EndpointLocation] {
        &self.endpoints
    }

    /// Builds and validates one frame for the given instant. Deterministic for
    /// a fixed `now` and RNG state.
    pub fn build_frame_at<R: Rng>(
        &self,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<LatencyFrame, AppError> {
        let now_ms = now.timestamp_millis() as f64;
        let samples = self
            .endpoints
            .iter()
            .map(|location| {
                let base = rng.random_range(base_latency_band(location.provider));
                let jitter = coherent_jitter_ms(now_ms, location.latitude);

                LatencySample {
                    id: Uuid::new_v4().to_string(),
                    exchange: location.exchange,
                    provider: location.provider,
                    region: location.region.to_string(),
                    latitude: location.latitude,
                    longitude: location.longitude,
                    latency_ms: (base + jitter).round().max(MIN_LATENCY_FLOOR_MS),
                    recorded_at: now,
                }
            })
            .collect::<Vec<_>>();

        let frame = LatencyFrame::from_samples(Uuid::new_v4().to_string(), samples)?;
        validate_frame(&frame)?;
        Ok(frame)
    }
}

impl FrameProducer for SyntheticLatencyProducer {
    fn generate_frame(&self) -> Result<LatencyFrame, AppError> {
        let frame = self.build_frame_at(Utc::now(), &mut rand::rng())?;
        if let Some(sample) = frame.samples.first() {
            log_latency_event("latency-simulator", sample, "simulated-latency-frame");
        }
        Ok(frame)
    }
}

pub fn base_latency_band(provider: CloudProvider) -> Range<f64> {
    match provider {
        CloudProvider::Fastly => 45.0..80.0,
        CloudProvider::Azure => 60.0..95.0,
        CloudProvider::Aws | CloudProvider::Gcp => 55.0..90.0,
    }
}

/// Smooth drift shared by every frame at the same instant, phase-shifted by
/// latitude so endpoints do not move in lockstep.
pub fn coherent_jitter_ms(now_ms: f64, latitude: f64) -> f64 {
    (now_ms / JITTER_PERIOD_MS + latitude).sin() * JITTER_AMPLITUDE_MS
}
