use crate::latency::types::{CloudProvider, Exchange, LatencyFrame};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::error::AppError;

pub const RETENTION_TRIGGER_POINTS: usize = 1_000;
pub const RETENTION_MAX_AGE_DAYS: i64 = 30;
pub const DEFAULT_BUCKET_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TimeRange {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl TimeRange {
    pub const ALL: [TimeRange; 5] = [
        Self::OneMinute,
        Self::OneHour,
        Self::OneDay,
        Self::SevenDays,
        Self::ThirtyDays,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    /// How far back a query reaches. The one-minute range is padded to two
    /// minutes so a freshly opened chart is never empty between frames.
    pub fn lookback(self) -> Duration {
        match self {
            Self::OneMinute => Duration::minutes(2),
            Self::OneHour => Duration::hours(1),
            Self::OneDay => Duration::hours(24),
            Self::SevenDays => Duration::days(7),
            Self::ThirtyDays => Duration::days(30),
        }
    }

    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback()
    }
}

impl FromStr for TimeRange {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|range| range.as_str() == value)
            .ok_or_else(|| AppError::InvalidArgument(format!("unknown time range '{value}'")))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataPoint {
    pub timestamp: DateTime<Utc>,
    pub exchange: Exchange,
    pub provider: CloudProvider,
    pub region: String,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct LatencyStatistics {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencyBucket {
    pub bucket_start: DateTime<Utc>,
    pub sample_count: usize,
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
}

/// Append-only observation log with lazy, threshold-triggered retention.
#[derive(Debug, Clone, Default)]
pub struct HistoryAccumulator {
    points: Vec<HistoricalDataPoint>,
}

impl HistoryAccumulator {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[HistoricalDataPoint] {
        &self.points
    }

    pub fn ingest_frame(&mut self, frame: &LatencyFrame) {
        self.ingest_frame_at(frame, Utc::now());
    }

    /// Every point is stamped with `now`, the ingestion instant, rather than
    /// the sample's own `recordedAt`.
    pub fn ingest_frame_at(&mut self, frame: &LatencyFrame, now: DateTime<Utc>) {
        let points = frame.samples.iter().map(|sample| HistoricalDataPoint {
            timestamp: now,
            exchange: sample.exchange,
            provider: sample.provider,
            region: sample.region.clone(),
            latency_ms: sample.latency_ms,
        });
        self.record_points(points, now);
    }

    pub fn record_points(
        &mut self,
        points: impl IntoIterator<Item = HistoricalDataPoint>,
        now: DateTime<Utc>,
    ) {
        self.points.extend(points);

        if self.points.len() > RETENTION_TRIGGER_POINTS {
            let cutoff = now - Duration::days(RETENTION_MAX_AGE_DAYS);
            self.points.retain(|point| point.timestamp >= cutoff);
        }
    }

    /// Union filter: points for `first`, or for either exchange when `second`
    /// is given. No timestamp pairing happens.
    pub fn query_by_exchange_pair(
        &self,
        first: Exchange,
        second: Option<Exchange>,
        range: TimeRange,
    ) -> Vec<HistoricalDataPoint> {
        self.query_by_exchange_pair_at(first, second, range, Utc::now())
    }

    pub fn query_by_exchange_pair_at(
        &self,
        first: Exchange,
        second: Option<Exchange>,
        range: TimeRange,
        now: DateTime<Utc>,
    ) -> Vec<HistoricalDataPoint> {
        let cutoff = range.cutoff(now);
        self.points
            .iter()
            .filter(|point| point.timestamp >= cutoff)
            .filter(|point| point.exchange == first || Some(point.exchange) == second)
            .cloned()
            .collect()
    }

    pub fn query_by_region(&self, region: &str, range: TimeRange) -> Vec<HistoricalDataPoint> {
        self.query_by_region_at(region, range, Utc::now())
    }

    pub fn query_by_region_at(
        &self,
        region: &str,
        range: TimeRange,
        now: DateTime<Utc>,
    ) -> Vec<HistoricalDataPoint> {
        let cutoff = range.cutoff(now);
        self.points
            .iter()
            .filter(|point| point.region == region && point.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn clear_older_than(&mut self, max_age: Duration, now: DateTime<Utc>) {
        let cutoff = now - max_age;
        self.points.retain(|point| point.timestamp >= cutoff);
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.points
            .iter()
            .map(|point| point.exchange)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn regions(&self) -> Vec<String> {
        self.points
            .iter()
            .map(|point| point.region.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

pub fn compute_statistics(points: &[HistoricalDataPoint]) -> LatencyStatistics {
    if points.is_empty() {
        return LatencyStatistics::default();
    }

    let (min, max, sum) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), point| {
            (
                min.min(point.latency_ms),
                max.max(point.latency_ms),
                sum + point.latency_ms,
            )
        },
    );

    LatencyStatistics {
        min,
        max,
        avg: sum / points.len() as f64,
    }
}

/// Groups points into fixed windows aligned to the epoch, oldest first.
pub fn bucketize(points: &[HistoricalDataPoint], bucket: Duration) -> Vec<LatencyBucket> {
    let bucket_ms = bucket.num_milliseconds();
    if bucket_ms <= 0 {
        return Vec::new();
    }

    let mut grouped: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for point in points {
        let start_ms = point.timestamp.timestamp_millis().div_euclid(bucket_ms) * bucket_ms;
        grouped.entry(start_ms).or_default().push(point.latency_ms);
    }

    grouped
        .into_iter()
        .filter_map(|(start_ms, latencies)| {
            let bucket_start = DateTime::<Utc>::from_timestamp_millis(start_ms)?;
            let count = latencies.len();
            let sum: f64 = latencies.iter().sum();
            Some(LatencyBucket {
                bucket_start,
                sample_count: count,
                avg_latency: sum / count as f64,
                min_latency: latencies.iter().copied().fold(f64::INFINITY, f64::min),
                max_latency: latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            })
        })
        .collect()
}
