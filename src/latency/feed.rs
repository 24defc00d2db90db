use crate::latency::types::{AggregatedLatency, CloudProvider, Exchange, LatencyFrame};
use chrono::{DateTime, Utc};
use serde::Serialize;

const GLOBE_RADIUS: f64 = 1.5;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Connecting,
    Streaming,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    pub position: [f64; 3],
    pub color: &'static str,
    pub emissive: &'static str,
    pub label: String,
    pub latency_ms: f64,
    pub exchange: Exchange,
    pub provider: CloudProvider,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub status: FeedStatus,
    pub markers: Vec<Marker>,
    pub aggregated: Option<AggregatedLatency>,
    pub last_updated: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Latest-known view of the stream. Written only by the consumer.
#[derive(Debug, Clone)]
pub struct LiveFeedStore {
    status: FeedStatus,
    markers: Vec<Marker>,
    aggregated: Option<AggregatedLatency>,
    last_updated: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl Default for LiveFeedStore {
    fn default() -> Self {
        Self {
            status: FeedStatus::Connecting,
            markers: Vec::new(),
            aggregated: None,
            last_updated: None,
            error_message: None,
        }
    }
}

impl LiveFeedStore {
    pub fn status(&self) -> FeedStatus {
        self.status
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn aggregated(&self) -> Option<&AggregatedLatency> {
        self.aggregated.as_ref()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Replaces markers wholesale; endpoints missing from `frame` disappear.
    pub fn ingest_frame(&mut self, frame: &LatencyFrame) {
        self.ingest_frame_at(frame, Utc::now());
    }

    pub fn ingest_frame_at(&mut self, frame: &LatencyFrame, now: DateTime<Utc>) {
        self.markers = frame
            .samples
            .iter()
            .map(|sample| Marker {
                id: sample.id.clone(),
                position: lat_long_to_cartesian(sample.latitude, sample.longitude, GLOBE_RADIUS),
                color: latency_to_color(sample.latency_ms),
                emissive: latency_to_emissive(sample.latency_ms),
                label: format!("{} • {:.0}ms", sample.exchange, sample.latency_ms),
                latency_ms: sample.latency_ms,
                exchange: sample.exchange,
                provider: sample.provider,
                region: sample.region.clone(),
            })
            .collect();
        self.aggregated = Some(frame.aggregated);
        self.last_updated = Some(
            frame
                .samples
                .first()
                .map(|sample| sample.recorded_at)
                .unwrap_or(now),
        );
        self.status = FeedStatus::Streaming;
        self.error_message = None;
    }

    /// Keeps the last good markers and aggregates visible.
    pub fn report_error(&mut self, message: impl Into<String>) {
        self.status = FeedStatus::Error;
        self.error_message = Some(message.into());
    }

    pub fn mark_streaming(&mut self) {
        self.status = FeedStatus::Streaming;
    }

    pub fn mark_connecting(&mut self) {
        self.status = FeedStatus::Connecting;
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            status: self.status,
            markers: self.markers.clone(),
            aggregated: self.aggregated,
            last_updated: self.last_updated,
            error_message: self.error_message.clone(),
        }
    }
}

pub fn lat_long_to_cartesian(latitude: f64, longitude: f64, radius: f64) -> [f64; 3] {
    let phi = (90.0 - latitude).to_radians();
    let theta = (longitude + 180.0).to_radians();

    let x = -radius * phi.sin() * theta.cos();
    let z = radius * phi.sin() * theta.sin();
    let y = radius * phi.cos();

    [x, y, z]
}

pub fn latency_to_color(latency_ms: f64) -> &'static str {
    match latency_ms {
        value if value <= 40.0 => "#22d3ee",
        value if value <= 70.0 => "#38bdf8",
        value if value <= 100.0 => "#fb923c",
        _ => "#f87171",
    }
}

pub fn latency_to_emissive(latency_ms: f64) -> &'static str {
    match latency_ms {
        value if value <= 40.0 => "#0e7490",
        value if value <= 70.0 => "#0369a1",
        value if value <= 100.0 => "#b45309",
        _ => "#b91c1c",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::types::LatencySample;
    use chrono::TimeZone;

    fn sample(id: &str, exchange: Exchange, latency_ms: f64) -> LatencySample {
        LatencySample {
            id: id.to_string(),
            exchange,
            provider: CloudProvider::Aws,
            region: "us-east-1".to_string(),
            latitude: 37.7749,
            longitude: -122.4194,
            latency_ms,
            recorded_at: Utc
                .with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
                .single()
                .expect("fixed timestamp should be valid"),
        }
    }

    fn frame(samples: Vec<LatencySample>) -> LatencyFrame {
        LatencyFrame::from_samples("frame".to_string(), samples).expect("frame should build")
    }

    #[test]
    fn new_frame_replaces_markers_instead_of_merging() {
        let mut store = LiveFeedStore::default();
        let first = frame(
            Exchange::ALL
                .iter()
                .enumerate()
                .map(|(index, exchange)| sample(&format!("a{index}"), *exchange, 40.0))
                .collect(),
        );
        let second = frame(
            Exchange::ALL[..3]
                .iter()
                .enumerate()
                .map(|(index, exchange)| sample(&format!("b{index}"), *exchange, 80.0))
                .collect(),
        );

        store.ingest_frame(&first);
        assert_eq!(store.markers().len(), 5);

        store.ingest_frame(&second);
        assert_eq!(store.markers().len(), 3);
        assert!(store.markers().iter().all(|marker| marker.id.starts_with('b')));
        assert_eq!(store.aggregated().map(|aggregated| aggregated.max), Some(80.0));
    }

    #[test]
    fn error_keeps_last_good_data_visible() {
        let mut store = LiveFeedStore::default();
        store.ingest_frame(&frame(vec![sample("s1", Exchange::Binance, 55.0)]));
        let before = store.snapshot();

        store.report_error("Latency stream disconnected");

        assert_eq!(store.status(), FeedStatus::Error);
        assert_eq!(store.error_message(), Some("Latency stream disconnected"));
        assert_eq!(store.markers(), before.markers.as_slice());
        assert_eq!(store.aggregated(), before.aggregated.as_ref());
        assert_eq!(store.last_updated(), before.last_updated);
    }

    #[test]
    fn successful_frame_clears_error_and_uses_sample_timestamp() {
        let mut store = LiveFeedStore::default();
        store.report_error("boom");
        let frame = frame(vec![sample("s1", Exchange::Okx, 120.0)]);

        store.ingest_frame(&frame);

        assert_eq!(store.status(), FeedStatus::Streaming);
        assert!(store.error_message().is_none());
        assert_eq!(store.last_updated(), Some(frame.samples[0].recorded_at));
    }

    #[test]
    fn marker_carries_label_bucket_colors_and_projection() {
        let mut store = LiveFeedStore::default();
        store.ingest_frame(&frame(vec![sample("s1", Exchange::Okx, 64.6)]));

        let marker = &store.markers()[0];
        assert_eq!(marker.label, "OKX • 65ms");
        assert_eq!(marker.color, "#38bdf8");
        assert_eq!(marker.emissive, "#0369a1");

        let radius = marker.position.iter().map(|axis| axis * axis).sum::<f64>().sqrt();
        assert!((radius - GLOBE_RADIUS).abs() < 1e-9);
    }

    #[test]
    fn projection_puts_equator_prime_meridian_on_negative_x() {
        let [x, y, z] = lat_long_to_cartesian(0.0, 0.0, 1.0);
        assert!((x - 1.0).abs() < 1e-9, "x = {x}");
        assert!(y.abs() < 1e-9);
        assert!(z.abs() < 1e-9);

        let [_, north, _] = lat_long_to_cartesian(90.0, 0.0, 1.5);
        assert!((north - 1.5).abs() < 1e-9);
    }

    #[test]
    fn color_buckets_are_inclusive_at_upper_bound() {
        assert_eq!(latency_to_color(40.0), "#22d3ee");
        assert_eq!(latency_to_color(70.0), "#38bdf8");
        assert_eq!(latency_to_color(100.0), "#fb923c");
        assert_eq!(latency_to_color(100.5), "#f87171");
        assert_eq!(latency_to_emissive(10.0), "#0e7490");
        assert_eq!(latency_to_emissive(250.0), "#b91c1c");
    }

    #[test]
    fn status_only_transitions_leave_data_untouched() {
        let mut store = LiveFeedStore::default();
        store.ingest_frame(&frame(vec![sample("s1", Exchange::Bybit, 30.0)]));

        store.mark_connecting();
        assert_eq!(store.status(), FeedStatus::Connecting);
        store.mark_streaming();
        assert_eq!(store.status(), FeedStatus::Streaming);
        assert_eq!(store.markers().len(), 1);
    }
}
