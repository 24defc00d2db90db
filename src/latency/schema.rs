use crate::error::AppError;
use crate::latency::types::{AggregatedLatency, LatencyFrame, LatencySample};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashSet;

const MIN_REGION_LEN: usize = 2;
/// `avg` is rounded to hundredths, so it may sit up to half a hundredth
/// outside `[min, max]`. The extra 1e-9 absorbs binary float error.
const AVG_ROUNDING_TOLERANCE: f64 = 0.005 + 1e-9;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TimestampWire {
    Text(String),
    EpochMs(f64),
}

impl TryFrom<TimestampWire> for DateTime<Utc> {
    type Error = AppError;

    fn try_from(value: TimestampWire) -> Result<Self, Self::Error> {
        match value {
            TimestampWire::Text(text) => {
                Ok(DateTime::parse_from_rfc3339(text.trim())?.with_timezone(&Utc))
            }
            TimestampWire::EpochMs(millis) => {
                if !millis.is_finite() {
                    return Err(AppError::validation("recordedAt must be a finite epoch"));
                }
                Utc.timestamp_millis_opt(millis.trunc() as i64)
                    .single()
                    .ok_or_else(|| AppError::validation("recordedAt epoch is out of range"))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySampleWire {
    pub id: String,
    pub exchange: String,
    pub provider: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub latency_ms: f64,
    pub recorded_at: TimestampWire,
}

impl TryFrom<LatencySampleWire> for LatencySample {
    type Error = AppError;

    fn try_from(value: LatencySampleWire) -> Result<Self, Self::Error> {
        let sample = Self {
            exchange: value.exchange.parse()?,
            provider: value.provider.parse()?,
            recorded_at: value.recorded_at.try_into()?,
            id: value.id,
            region: value.region,
            latitude: value.latitude,
            longitude: value.longitude,
            latency_ms: value.latency_ms,
        };
        validate_sample(&sample)?;
        Ok(sample)
    }
}

#[derive(Debug, Deserialize)]
pub struct AggregatedLatencyWire {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p95: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyFrameWire {
    pub frame_id: String,
    pub samples: Vec<LatencySampleWire>,
    pub aggregated: AggregatedLatencyWire,
}

impl TryFrom<LatencyFrameWire> for LatencyFrame {
    type Error = AppError;

    fn try_from(value: LatencyFrameWire) -> Result<Self, Self::Error> {
        let samples = value
            .samples
            .into_iter()
            .map(LatencySample::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let frame = Self {
            frame_id: value.frame_id,
            samples,
            aggregated: AggregatedLatency {
                min: value.aggregated.min,
                max: value.aggregated.max,
                avg: value.aggregated.avg,
                p95: value.aggregated.p95,
            },
        };
        validate_frame(&frame)?;
        Ok(frame)
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamEnvelopeWire {
    pub frame: LatencyFrameWire,
}

/// Decodes a `latency-frame` event payload (`{"frame": ...}`) in place and
/// validates it before it can reach any client-side store.
pub fn parse_envelope_payload(payload: &mut [u8]) -> Result<LatencyFrame, AppError> {
    let wire: StreamEnvelopeWire = simd_json::serde::from_slice(payload)?;
    wire.frame.try_into()
}

pub fn validate_sample(sample: &LatencySample) -> Result<(), AppError> {
    if sample.id.is_empty() {
        return Err(AppError::validation("sample id must not be empty"));
    }
    if sample.region.chars().count() < MIN_REGION_LEN {
        return Err(AppError::validation(format!(
            "region must be at least {MIN_REGION_LEN} characters"
        )));
    }
    if !sample.latitude.is_finite() || !(-90.0..=90.0).contains(&sample.latitude) {
        return Err(AppError::validation("latitude must be within [-90, 90]"));
    }
    if !sample.longitude.is_finite() || !(-180.0..=180.0).contains(&sample.longitude) {
        return Err(AppError::validation("longitude must be within [-180, 180]"));
    }
    if !sample.latency_ms.is_finite() || sample.latency_ms < 0.0 {
        return Err(AppError::validation(
            "latencyMs must be a finite non-negative number",
        ));
    }
    Ok(())
}

pub fn validate_aggregated(aggregated: &AggregatedLatency) -> Result<(), AppError> {
    let AggregatedLatency { min, max, avg, p95 } = *aggregated;
    if [min, max, avg, p95]
        .iter()
        .any(|value| !value.is_finite() || *value < 0.0)
    {
        return Err(AppError::validation(
            "aggregated values must be finite and non-negative",
        ));
    }
    let avg_bounds = (min - AVG_ROUNDING_TOLERANCE)..=(max + AVG_ROUNDING_TOLERANCE);
    if min > max || !avg_bounds.contains(&avg) || !(min..=max).contains(&p95) {
        return Err(AppError::validation(
            "aggregated values must satisfy min <= avg, p95 <= max",
        ));
    }
    Ok(())
}

/// Full structural check for a frame, used both before a frame leaves the
/// producer and after one is decoded from the wire.
pub fn validate_frame(frame: &LatencyFrame) -> Result<(), AppError> {
    if frame.frame_id.is_empty() {
        return Err(AppError::validation("frameId must not be empty"));
    }
    if frame.samples.is_empty() {
        return Err(AppError::validation("samples must contain at least one entry"));
    }

    let mut seen_ids = HashSet::with_capacity(frame.samples.len());
    for sample in &frame.samples {
        validate_sample(sample)?;
        if !seen_ids.insert(sample.id.as_str()) {
            return Err(AppError::validation(format!(
                "duplicate sample id '{}' in frame",
                sample.id
            )));
        }
    }

    validate_aggregated(&frame.aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::types::{CloudProvider, Exchange, StreamEnvelope};

    fn payload_with_sample(sample_json: &str) -> Vec<u8> {
        format!(
            r#"{{"frame":{{"frameId":"f-1","samples":[{sample_json}],"aggregated":{{"min":42,"max":42,"avg":42,"p95":42}}}}}}"#
        )
        .into_bytes()
    }

    const VALID_SAMPLE: &str = r#"{"id":"s-1","exchange":"Binance","provider":"AWS","region":"ap-southeast-1","latitude":1.3521,"longitude":103.8198,"latencyMs":42,"recordedAt":"2026-10-16T09:30:00.000Z"}"#;

    #[test]
    fn parses_valid_envelope_payload() {
        let mut payload = payload_with_sample(VALID_SAMPLE);
        let frame = parse_envelope_payload(&mut payload).expect("valid envelope should parse");

        assert_eq!(frame.frame_id, "f-1");
        assert_eq!(frame.samples.len(), 1);
        assert_eq!(frame.samples[0].exchange, Exchange::Binance);
        assert_eq!(frame.samples[0].provider, CloudProvider::Aws);
        assert_eq!(frame.samples[0].latency_ms, 42.0);
        assert_eq!(frame.aggregated.p95, 42.0);
    }

    #[test]
    fn rejects_negative_latency() {
        let sample = VALID_SAMPLE.replace(r#""latencyMs":42"#, r#""latencyMs":-1"#);
        let mut payload = payload_with_sample(&sample);

        let error = parse_envelope_payload(&mut payload).expect_err("negative latency must fail");
        assert!(error.to_string().contains("latencyMs"));
    }

    #[test]
    fn rejects_unknown_exchange() {
        let sample = VALID_SAMPLE.replace("Binance", "Unknown");
        let mut payload = payload_with_sample(&sample);

        let error = parse_envelope_payload(&mut payload).expect_err("unknown exchange must fail");
        assert!(error.to_string().contains("unknown exchange 'Unknown'"));
    }

    #[test]
    fn rejects_empty_sample_array() {
        let mut payload = br#"{"frame":{"frameId":"f-1","samples":[],"aggregated":{"min":0,"max":0,"avg":0,"p95":0}}}"#.to_vec();

        let result = parse_envelope_payload(&mut payload);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_short_region_and_out_of_range_coordinates() {
        let short_region = VALID_SAMPLE.replace("ap-southeast-1", "x");
        assert!(parse_envelope_payload(&mut payload_with_sample(&short_region)).is_err());

        let bad_latitude = VALID_SAMPLE.replace("1.3521", "91.5");
        assert!(parse_envelope_payload(&mut payload_with_sample(&bad_latitude)).is_err());

        let bad_longitude = VALID_SAMPLE.replace("103.8198", "-181");
        assert!(parse_envelope_payload(&mut payload_with_sample(&bad_longitude)).is_err());
    }

    #[test]
    fn coerces_epoch_millis_timestamps() {
        let sample = VALID_SAMPLE.replace(r#""2026-10-16T09:30:00.000Z""#, "1792143000000");
        let frame = parse_envelope_payload(&mut payload_with_sample(&sample))
            .expect("numeric timestamp should coerce");

        assert_eq!(frame.samples[0].recorded_at.timestamp_millis(), 1_792_143_000_000);
    }

    #[test]
    fn rejects_uncoercible_timestamps() {
        let sample = VALID_SAMPLE.replace("2026-10-16T09:30:00.000Z", "yesterday");
        assert!(parse_envelope_payload(&mut payload_with_sample(&sample)).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let mut payload = b"{\"frame\":".to_vec();
        assert!(parse_envelope_payload(&mut payload).is_err());
    }

    #[test]
    fn rejects_duplicate_sample_ids() {
        let mut frame = parse_envelope_payload(&mut payload_with_sample(VALID_SAMPLE))
            .expect("valid envelope should parse");
        let duplicate = frame.samples[0].clone();
        frame.samples.push(duplicate);

        let error = validate_frame(&frame).expect_err("duplicate ids must fail");
        assert!(error.to_string().contains("duplicate sample id"));
    }

    #[test]
    fn rejects_inconsistent_aggregates() {
        let aggregated = AggregatedLatency {
            min: 50.0,
            max: 40.0,
            avg: 45.0,
            p95: 45.0,
        };
        assert!(validate_aggregated(&aggregated).is_err());

        let aggregated = AggregatedLatency {
            min: 10.0,
            max: 40.0,
            avg: 25.0,
            p95: 41.0,
        };
        assert!(validate_aggregated(&aggregated).is_err());
    }

    #[test]
    fn rounded_average_of_fractional_samples_is_accepted() {
        for latency in [10.004, 10.005, 10.006, 0.001] {
            let sample = LatencySample {
                id: "s-1".to_string(),
                exchange: Exchange::Binance,
                provider: CloudProvider::Aws,
                region: "ap-southeast-1".to_string(),
                latitude: 1.3521,
                longitude: 103.8198,
                latency_ms: latency,
                recorded_at: Utc::now(),
            };
            let frame = LatencyFrame::from_samples("f-1".to_string(), vec![sample])
                .expect("single sample frame should build");
            validate_frame(&frame).expect("rounded average should validate");

            let encoded = simd_json::serde::to_string(&StreamEnvelope { frame: &frame })
                .expect("envelope should serialize");
            parse_envelope_payload(&mut encoded.into_bytes())
                .expect("rounded average should pass wire validation");
        }
    }

    #[test]
    fn average_beyond_rounding_slack_is_rejected() {
        let aggregated = AggregatedLatency {
            min: 10.004,
            max: 10.004,
            avg: 9.99,
            p95: 10.004,
        };
        assert!(validate_aggregated(&aggregated).is_err());
    }

    #[test]
    fn serialized_envelope_passes_wire_validation() {
        let frame = parse_envelope_payload(&mut payload_with_sample(VALID_SAMPLE))
            .expect("valid envelope should parse");
        let encoded = simd_json::serde::to_string(&StreamEnvelope { frame: &frame })
            .expect("envelope should serialize");

        let decoded = parse_envelope_payload(&mut encoded.into_bytes())
            .expect("serialized envelope should validate");
        assert_eq!(decoded, frame);
    }
}
