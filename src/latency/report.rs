use crate::error::AppError;
use crate::latency::feed::{FeedSnapshot, FeedStatus};
use crate::latency::history::HistoricalDataPoint;
use crate::latency::types::{AggregatedLatency, CloudProvider, Exchange};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

pub const REPORT_VERSION: &str = "1.0.0";
const MISSING: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        match path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Ok(Self::Json),
            Some("csv") => Ok(Self::Csv),
            _ => Err(AppError::InvalidArgument(format!(
                "report path '{}' must end in .json or .csv",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    pub metadata: ReportMetadata,
    pub current_data: CurrentData,
    pub historical_data: Vec<HistoricalDataPoint>,
    pub summary: ReportSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub report_version: &'static str,
    pub total_samples: usize,
    pub time_range: ReportTimeRange,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportTimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportMarker {
    pub exchange: Exchange,
    pub provider: CloudProvider,
    pub region: String,
    pub latency_ms: f64,
    pub position: [f64; 3],
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentData {
    pub markers: Vec<ReportMarker>,
    pub aggregated: Option<AggregatedLatency>,
    pub last_updated: Option<DateTime<Utc>>,
    pub status: FeedStatus,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_exchanges: usize,
    pub total_providers: usize,
    pub total_regions: usize,
    pub average_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
}

/// Snapshot of the live view plus the full history log.
pub fn generate_report(
    feed: &FeedSnapshot,
    history: &[HistoricalDataPoint],
    now: DateTime<Utc>,
) -> LatencyReport {
    let exchanges: HashSet<Exchange> = feed.markers.iter().map(|marker| marker.exchange).collect();
    let providers: HashSet<CloudProvider> =
        feed.markers.iter().map(|marker| marker.provider).collect();
    let regions: HashSet<&str> = feed.markers.iter().map(|marker| marker.region.as_str()).collect();

    let latencies: Vec<f64> = feed
        .markers
        .iter()
        .map(|marker| marker.latency_ms)
        .chain(history.iter().map(|point| point.latency_ms))
        .collect();

    let mut summary = ReportSummary {
        total_exchanges: exchanges.len(),
        total_providers: providers.len(),
        total_regions: regions.len(),
        ..ReportSummary::default()
    };
    if !latencies.is_empty() {
        summary.average_latency = latencies.iter().sum::<f64>() / latencies.len() as f64;
        summary.min_latency = latencies.iter().copied().fold(f64::INFINITY, f64::min);
        summary.max_latency = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    }

    LatencyReport {
        metadata: ReportMetadata {
            generated_at: now,
            report_version: REPORT_VERSION,
            total_samples: feed.markers.len() + history.len(),
            time_range: ReportTimeRange {
                start: history.iter().map(|point| point.timestamp).min(),
                end: history.iter().map(|point| point.timestamp).max(),
            },
        },
        current_data: CurrentData {
            markers: feed
                .markers
                .iter()
                .map(|marker| ReportMarker {
                    exchange: marker.exchange,
                    provider: marker.provider,
                    region: marker.region.clone(),
                    latency_ms: marker.latency_ms,
                    position: marker.position,
                })
                .collect(),
            aggregated: feed.aggregated,
            last_updated: feed.last_updated,
            status: feed.status,
        },
        historical_data: history.to_vec(),
        summary,
    }
}

pub fn to_json_pretty(report: &LatencyReport) -> Result<String, AppError> {
    Ok(simd_json::serde::to_string_pretty(report)?)
}

pub fn to_csv(report: &LatencyReport) -> String {
    let mut out = String::new();
    let metadata = &report.metadata;
    let summary = &report.summary;

    let _ = writeln!(out, "Latency Report - Metadata");
    let _ = writeln!(out, "Generated At,{}", iso(metadata.generated_at));
    let _ = writeln!(out, "Report Version,{}", metadata.report_version);
    let _ = writeln!(out, "Total Samples,{}", metadata.total_samples);
    let _ = writeln!(out, "Time Range Start,{}", iso_or_missing(metadata.time_range.start));
    let _ = writeln!(out, "Time Range End,{}", iso_or_missing(metadata.time_range.end));
    out.push('\n');

    let _ = writeln!(out, "Summary");
    let _ = writeln!(out, "Total Exchanges,{}", summary.total_exchanges);
    let _ = writeln!(out, "Total Providers,{}", summary.total_providers);
    let _ = writeln!(out, "Total Regions,{}", summary.total_regions);
    let _ = writeln!(out, "Average Latency,{:.2}ms", summary.average_latency);
    let _ = writeln!(out, "Min Latency,{}ms", summary.min_latency);
    let _ = writeln!(out, "Max Latency,{}ms", summary.max_latency);
    out.push('\n');

    if let Some(aggregated) = &report.current_data.aggregated {
        let _ = writeln!(out, "Current Aggregated Metrics");
        let _ = writeln!(out, "Min,{}ms", aggregated.min);
        let _ = writeln!(out, "Max,{}ms", aggregated.max);
        let _ = writeln!(out, "Average,{:.2}ms", aggregated.avg);
        if aggregated.p95 > 0.0 {
            let _ = writeln!(out, "P95,{}ms", aggregated.p95);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "Current Markers");
    let _ = writeln!(out, "Exchange,Provider,Region,Latency (ms)");
    for marker in &report.current_data.markers {
        let _ = writeln!(
            out,
            "{},{},{},{}",
            marker.exchange,
            marker.provider,
            csv_field(&marker.region),
            marker.latency_ms
        );
    }
    out.push('\n');

    let _ = writeln!(out, "Historical Data");
    let _ = write!(out, "Timestamp,Exchange,Provider,Region,Latency (ms)");
    for point in &report.historical_data {
        let _ = write!(
            out,
            "\n{},{},{},{},{}",
            iso(point.timestamp),
            point.exchange,
            point.provider,
            csv_field(&point.region),
            point.latency_ms
        );
    }

    out
}

pub fn render(report: &LatencyReport, format: ReportFormat) -> Result<String, AppError> {
    match format {
        ReportFormat::Json => to_json_pretty(report),
        ReportFormat::Csv => Ok(to_csv(report)),
    }
}

/// `latency-report-YYYY-MM-DD.<ext>`
pub fn report_file_name(now: DateTime<Utc>, format: ReportFormat) -> String {
    format!(
        "latency-report-{}.{}",
        now.format("%Y-%m-%d"),
        format.extension()
    )
}

/// Quotes a field holding a delimiter, quote or line break, doubling any
/// embedded quotes.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn iso_or_missing(value: Option<DateTime<Utc>>) -> String {
    value.map(iso).unwrap_or_else(|| MISSING.to_string())
}
