//! Parses a broker envelope's JSON payload into a [`TelemetryRecord`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::error::{Error, Result};

/// Parsed, typed form of an envelope payload, suitable for storage and
/// query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub gpu_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub metrics: HashMap<String, f64>,
    /// RFC 3339 UTC.
    pub timestamp: String,
}

fn rfc3339_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Coerces a loosely-typed JSON scalar to a metric value, mirroring the
/// streamer's CSV coercion (`crate::streamer::coercion`): numbers pass
/// through, numeric strings parse, everything else (bool, object, array,
/// null, non-numeric string) is not a metric.
fn as_metric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_hostname(fields: &serde_json::Map<String, Value>) -> Option<String> {
    for key in ["hostname", "Hostname"] {
        if let Some(Value::String(s)) = fields.get(key) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}

/// Parses a raw envelope payload (the `{"timestamp": ..., "fields": {...}}`
/// telemetry JSON object) into a [`TelemetryRecord`].
///
/// Requires a non-empty `fields.gpu_id`; everything else in `fields` that
/// coerces to a number becomes a metric. The envelope's own `timestamp`
/// (broker-assigned publish time, milliseconds since epoch) is used only
/// as a fallback when the payload's own `timestamp` is absent or zero.
pub fn parse_envelope(payload: &[u8], envelope_timestamp_millis: i64) -> Result<TelemetryRecord> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| Error::Malformed(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Malformed("payload is not a JSON object".to_string()))?;

    let fields = obj
        .get("fields")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let gpu_id = fields
        .get("gpu_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Malformed("missing required field gpu_id".to_string()))?
        .to_string();

    let hostname = as_hostname(&fields);

    let mut metrics = HashMap::new();
    for (key, value) in &fields {
        if key == "gpu_id" || key == "hostname" || key == "Hostname" {
            continue;
        }
        if let Some(metric) = as_metric(value) {
            metrics.insert(key.clone(), metric);
        }
    }

    let payload_timestamp = obj.get("timestamp").and_then(Value::as_str).map(str::to_string);
    let timestamp = match payload_timestamp {
        Some(ts) if !ts.is_empty() => ts,
        _ if envelope_timestamp_millis != 0 => millis_to_rfc3339(envelope_timestamp_millis),
        _ => rfc3339_now(),
    };

    Ok(TelemetryRecord {
        gpu_id,
        hostname,
        metrics,
        timestamp,
    })
}

fn millis_to_rfc3339(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(rfc3339_now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_happy_path_with_coerced_strings() {
        let payload = br#"{"timestamp":"2025-01-01T00:00:00Z","fields":{"gpu_id":"gpu_0","temperature":"72.3","utilization":"85.5"}}"#;
        let record = parse_envelope(payload, 0).expect("parse");
        assert_eq!(record.gpu_id, "gpu_0");
        assert_eq!(record.timestamp, "2025-01-01T00:00:00Z");
        assert!((record.metrics["temperature"] - 72.3).abs() < 1e-9);
        assert!((record.metrics["utilization"] - 85.5).abs() < 1e-9);
    }

    #[test]
    fn missing_gpu_id_is_malformed() {
        let payload = br#"{"fields":{}}"#;
        let err = parse_envelope(payload, 0).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn non_numeric_fields_are_dropped_from_metrics() {
        let payload = br#"{"fields":{"gpu_id":"gpu_1","hostname":"node-a","note":"idle"}}"#;
        let record = parse_envelope(payload, 0).expect("parse");
        assert_eq!(record.hostname.as_deref(), Some("node-a"));
        assert!(record.metrics.is_empty());
    }

    #[test]
    fn falls_back_to_envelope_timestamp_when_payload_timestamp_absent() {
        let payload = br#"{"fields":{"gpu_id":"gpu_2","util":10.0}}"#;
        let record = parse_envelope(payload, 1_700_000_000_000).expect("parse");
        assert!(record.timestamp.starts_with("2023-11-14"));
    }
}
