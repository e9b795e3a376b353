//! Normalization boundary for push-channel payloads.
//!
//! The hub emits ad-hoc object shapes with several field-name variants
//! (`Punto`/`punto`/`pointId`, Italian and English parameter names, two wire
//! names for the alert events). Every known variant is mapped onto one
//! canonical [`PushEvent`] here, before any business logic runs; this module
//! is the single point of schema tolerance in the crate.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::DecodeError;
use crate::models::{
    parse_server_timestamp, ActiveAlert, CriticalValue, EmailNotification, SensorReading, Severity,
    SimulationStatus,
};

/// Canonical push event, ready for dispatch.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// Authoritative batch for a point (`{data: [...]}` wire shape).
    SensorBatch {
        point: String,
        readings: Vec<SensorReading>,
    },
    /// Single new reading (old flat shape or `ReceiveNewReading`).
    Reading(SensorReading),
    SimulationStatus {
        point: String,
        status: SimulationStatus,
    },
    CacheReloaded {
        point: String,
        record_count: u64,
    },
    CacheInvalidated {
        point: String,
    },
    StatusChanged {
        point: String,
        record_count: u64,
    },
    FileReset {
        point: String,
    },
    FileStopped {
        point: String,
        message: Option<String>,
    },
    CriticalAlert(ActiveAlert),
    EmailSent(EmailNotification),
}

impl PushEvent {
    /// The point this event concerns.
    pub fn point(&self) -> &str {
        match self {
            PushEvent::SensorBatch { point, .. }
            | PushEvent::SimulationStatus { point, .. }
            | PushEvent::CacheReloaded { point, .. }
            | PushEvent::CacheInvalidated { point }
            | PushEvent::StatusChanged { point, .. }
            | PushEvent::FileReset { point }
            | PushEvent::FileStopped { point, .. } => point,
            PushEvent::Reading(reading) => &reading.point,
            PushEvent::CriticalAlert(alert) => &alert.point,
            PushEvent::EmailSent(email) => &email.point,
        }
    }
}

/// Raw reading as the hub sends it; tolerant of every known field variant.
#[derive(Debug, Clone, Deserialize)]
struct RawReading {
    #[serde(alias = "Punto", alias = "punto", alias = "PointId", alias = "pointId")]
    point: Option<String>,
    #[serde(alias = "Timestamp", alias = "timestamp")]
    timestamp: Option<String>,
    #[serde(
        alias = "Temperatura",
        alias = "temperatura",
        alias = "Temperature",
        alias = "temperature"
    )]
    temperature: Option<f64>,
    #[serde(
        alias = "Umidita",
        alias = "umidita",
        alias = "Humidity",
        alias = "humidity"
    )]
    humidity: Option<f64>,
    #[serde(alias = "Pm2_5", alias = "pm2_5", alias = "PM2_5", alias = "pm25")]
    pm2_5: Option<f64>,
    #[serde(alias = "Co3", alias = "co3", alias = "CO3")]
    co3: Option<f64>,
}

impl RawReading {
    fn into_reading(self, fallback_point: Option<&str>) -> Option<SensorReading> {
        let point = self
            .point
            .or_else(|| fallback_point.map(str::to_string))?;
        let timestamp = self.timestamp.as_deref().and_then(parse_server_timestamp)?;
        Some(SensorReading {
            point,
            timestamp,
            temperature: self.temperature.unwrap_or(0.0),
            humidity: self.humidity.unwrap_or(0.0),
            pm2_5: self.pm2_5.unwrap_or(0.0),
            co3: self.co3.unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawCriticalValue {
    #[serde(alias = "Parameter", alias = "parameter")]
    parameter: String,
    #[serde(alias = "Value", alias = "value")]
    value: f64,
    #[serde(alias = "Threshold", alias = "threshold")]
    threshold: f64,
    #[serde(alias = "Unit", alias = "unit", default)]
    unit: Option<String>,
}

impl From<RawCriticalValue> for CriticalValue {
    fn from(raw: RawCriticalValue) -> Self {
        CriticalValue::new(
            raw.parameter,
            raw.value,
            raw.threshold,
            raw.unit.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawCriticalAlert {
    #[serde(alias = "Punto", alias = "punto", alias = "PointId", alias = "pointId")]
    point: Option<String>,
    #[serde(alias = "Timestamp", alias = "timestamp")]
    timestamp: Option<String>,
    #[serde(alias = "Severity", alias = "severity", default)]
    severity: Option<u8>,
    #[serde(
        alias = "CriticalValues",
        alias = "criticalValues",
        alias = "CurrentCriticalValues",
        alias = "currentCriticalValues",
        default
    )]
    critical_values: Vec<RawCriticalValue>,
    #[serde(alias = "EmailSent", alias = "emailSent", default)]
    email_sent: bool,
    #[serde(alias = "EmailSentTo", alias = "emailSentTo", default)]
    email_sent_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEmailNotification {
    #[serde(alias = "Punto", alias = "punto", alias = "PointId", alias = "pointId")]
    point: Option<String>,
    #[serde(
        alias = "Recipient",
        alias = "recipient",
        alias = "EmailSentTo",
        alias = "emailSentTo",
        alias = "sentTo"
    )]
    recipient: Option<String>,
    #[serde(alias = "Timestamp", alias = "timestamp")]
    timestamp: Option<String>,
    #[serde(alias = "Subject", alias = "subject", default)]
    subject: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSimulationStatus {
    #[serde(alias = "IsActive", alias = "isActive", default)]
    is_active: bool,
    #[serde(alias = "IsPaused", alias = "isPaused", default)]
    is_paused: bool,
    #[serde(alias = "Progress", alias = "progress", default)]
    progress: f64,
    #[serde(alias = "CurrentIndex", alias = "currentIndex", default)]
    current_index: u64,
    #[serde(alias = "TotalRecords", alias = "totalRecords", default)]
    total_records: u64,
}

impl From<RawSimulationStatus> for SimulationStatus {
    fn from(raw: RawSimulationStatus) -> Self {
        SimulationStatus {
            is_active: raw.is_active,
            is_paused: raw.is_paused,
            progress: raw.progress,
            current_index: raw.current_index,
            total_records: raw.total_records,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawCacheEvent {
    #[serde(alias = "Punto", alias = "punto", alias = "PointId", alias = "pointId")]
    point: Option<String>,
    #[serde(alias = "RecordCount", alias = "recordCount", default)]
    record_count: Option<u64>,
    #[serde(alias = "Message", alias = "message", default)]
    message: Option<String>,
}

/// Decodes one text frame from the hub into a canonical event.
pub fn decode_frame(text: &str) -> Result<PushEvent, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| DecodeError::Malformed(err.to_string()))?;

    let name = value
        .get("type")
        .or_else(|| value.get("target"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(DecodeError::MissingEventName)?;

    // SignalR-style frames carry the payload in `arguments[0]`; plain frames
    // use `payload` or put the fields on the envelope itself.
    let payload = value
        .get("payload")
        .cloned()
        .or_else(|| {
            value
                .get("arguments")
                .and_then(Value::as_array)
                .and_then(|args| args.first())
                .cloned()
        })
        .unwrap_or(value);

    normalize_event(&name, payload)
}

/// Maps a named payload onto the canonical event, tolerating every known
/// wire variant.
pub fn normalize_event(name: &str, payload: Value) -> Result<PushEvent, DecodeError> {
    match name {
        "ReceiveSensorData" => decode_sensor_data(payload),
        "ReceiveNewReading" => decode_single_reading(payload),
        "SimulationStatusChanged" => decode_simulation_status(payload),
        "RealDataCacheUpdated" => {
            let raw = decode_cache_event(payload, "RealDataCacheUpdated")?;
            Ok(PushEvent::CacheReloaded {
                point: raw.0,
                record_count: raw.1.unwrap_or(0),
            })
        }
        "RealDataFileChanged" => {
            let raw = decode_cache_event(payload, "RealDataFileChanged")?;
            Ok(PushEvent::CacheInvalidated { point: raw.0 })
        }
        "RealDataStatusChanged" => {
            let raw = decode_cache_event(payload, "RealDataStatusChanged")?;
            Ok(PushEvent::StatusChanged {
                point: raw.0,
                record_count: raw.1.unwrap_or(0),
            })
        }
        "RealDataFileReset" => {
            let raw = decode_cache_event(payload, "RealDataFileReset")?;
            Ok(PushEvent::FileReset { point: raw.0 })
        }
        "RealDataFileStop" => {
            let raw = decode_cache_event(payload, "RealDataFileStop")?;
            Ok(PushEvent::FileStopped {
                point: raw.0,
                message: raw.2,
            })
        }
        // The alert events arrive under two wire names with differing casing.
        _ if name.eq_ignore_ascii_case("CriticalAlertNotification")
            || name.eq_ignore_ascii_case("criticalalert") =>
        {
            decode_critical_alert(payload)
        }
        _ if name.eq_ignore_ascii_case("EmailSentNotification")
            || name.eq_ignore_ascii_case("alertemailsent") =>
        {
            decode_email_sent(payload)
        }
        other => Err(DecodeError::UnknownEvent(other.to_string())),
    }
}

fn decode_sensor_data(payload: Value) -> Result<PushEvent, DecodeError> {
    let point = extract_point(&payload);

    if let Some(data) = payload.get("data").and_then(Value::as_array) {
        let point = point.ok_or(DecodeError::MissingPoint {
            event: "ReceiveSensorData",
        })?;
        let readings = data
            .iter()
            .filter_map(|entry| {
                serde_json::from_value::<RawReading>(entry.clone())
                    .ok()
                    .and_then(|raw| raw.into_reading(Some(&point)))
            })
            .collect();
        return Ok(PushEvent::SensorBatch { point, readings });
    }

    // Old wire shape: a single flat reading.
    decode_single_reading(payload)
}

fn decode_single_reading(payload: Value) -> Result<PushEvent, DecodeError> {
    let raw: RawReading = serde_json::from_value(payload)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    if raw.point.is_none() {
        return Err(DecodeError::MissingPoint {
            event: "ReceiveNewReading",
        });
    }
    raw.into_reading(None)
        .map(PushEvent::Reading)
        .ok_or(DecodeError::MissingField {
            event: "ReceiveNewReading",
            field: "timestamp",
        })
}

fn decode_simulation_status(payload: Value) -> Result<PushEvent, DecodeError> {
    let point = extract_point(&payload).ok_or(DecodeError::MissingPoint {
        event: "SimulationStatusChanged",
    })?;
    let raw: RawSimulationStatus = serde_json::from_value(payload)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    Ok(PushEvent::SimulationStatus {
        point,
        status: raw.into(),
    })
}

fn decode_cache_event(
    payload: Value,
    event: &'static str,
) -> Result<(String, Option<u64>, Option<String>), DecodeError> {
    let raw: RawCacheEvent = serde_json::from_value(payload)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    let point = raw.point.ok_or(DecodeError::MissingPoint { event })?;
    Ok((point, raw.record_count, raw.message))
}

fn decode_critical_alert(payload: Value) -> Result<PushEvent, DecodeError> {
    let raw: RawCriticalAlert = serde_json::from_value(payload)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    let point = raw.point.ok_or(DecodeError::MissingPoint {
        event: "CriticalAlertNotification",
    })?;
    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(parse_server_timestamp)
        .unwrap_or_else(Utc::now);

    Ok(PushEvent::CriticalAlert(ActiveAlert {
        id: Uuid::new_v4().to_string(),
        point,
        timestamp,
        severity: Severity::from_level(raw.severity.unwrap_or(3)),
        breaches: raw.critical_values.into_iter().map(Into::into).collect(),
        email_sent: raw.email_sent,
        email_sent_to: raw.email_sent_to,
    }))
}

fn decode_email_sent(payload: Value) -> Result<PushEvent, DecodeError> {
    let raw: RawEmailNotification = serde_json::from_value(payload)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    let point = raw.point.ok_or(DecodeError::MissingPoint {
        event: "EmailSentNotification",
    })?;
    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(parse_server_timestamp)
        .unwrap_or_else(Utc::now);

    Ok(PushEvent::EmailSent(EmailNotification {
        id: Uuid::new_v4().to_string(),
        point,
        recipient: raw.recipient.unwrap_or_default(),
        timestamp,
        subject: raw.subject,
    }))
}

/// Tolerant reading decode for REST bodies that share the push wire shapes.
pub fn reading_from_value(value: Value, fallback_point: Option<&str>) -> Option<SensorReading> {
    serde_json::from_value::<RawReading>(value)
        .ok()
        .and_then(|raw| raw.into_reading(fallback_point))
}

/// Tolerant alert decode for the REST recent-alerts endpoint, which shares
/// the push notification shape.
pub fn alert_from_value(value: Value) -> Option<ActiveAlert> {
    match decode_critical_alert(value) {
        Ok(PushEvent::CriticalAlert(alert)) => Some(alert),
        _ => None,
    }
}

fn extract_point(payload: &Value) -> Option<String> {
    for key in ["Punto", "punto", "PointId", "pointId", "point"] {
        if let Some(found) = payload.get(key).and_then(Value::as_str) {
            return Some(found.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_new_reading_with_italian_fields() {
        let frame = json!({
            "type": "ReceiveNewReading",
            "payload": {
                "Punto": "Punto 1",
                "Timestamp": "2024-05-01T10:00:00",
                "Temperatura": 21.5,
                "Umidita": 48.0,
                "Pm2_5": 12.0,
                "Co3": 0.4
            }
        });
        let event = decode_frame(&frame.to_string()).unwrap();
        match event {
            PushEvent::Reading(reading) => {
                assert_eq!(reading.point, "Punto 1");
                assert_eq!(reading.temperature, 21.5);
                assert_eq!(reading.pm2_5, 12.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn decodes_batch_shape() {
        let frame = json!({
            "type": "ReceiveSensorData",
            "payload": {
                "punto": "Punto 2",
                "data": [
                    {"timestamp": "2024-05-01T10:00:00", "temperature": 20.0},
                    {"timestamp": "2024-05-01T10:00:10", "temperature": 20.5}
                ]
            }
        });
        match decode_frame(&frame.to_string()).unwrap() {
            PushEvent::SensorBatch { point, readings } => {
                assert_eq!(point, "Punto 2");
                assert_eq!(readings.len(), 2);
                assert_eq!(readings[1].temperature, 20.5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn old_flat_shape_still_decodes_as_single_reading() {
        let frame = json!({
            "type": "ReceiveSensorData",
            "payload": {
                "punto": "Punto 1",
                "timestamp": "2024-05-01T10:00:00Z",
                "temperature": 19.0
            }
        });
        assert!(matches!(
            decode_frame(&frame.to_string()).unwrap(),
            PushEvent::Reading(_)
        ));
    }

    #[test]
    fn decodes_signalr_envelope() {
        let frame = json!({
            "target": "RealDataCacheUpdated",
            "arguments": [{"Punto": "Punto 1", "RecordCount": 120}]
        });
        match decode_frame(&frame.to_string()).unwrap() {
            PushEvent::CacheReloaded {
                point,
                record_count,
            } => {
                assert_eq!(point, "Punto 1");
                assert_eq!(record_count, 120);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn both_alert_wire_names_normalize_identically() {
        for name in ["CriticalAlertNotification", "criticalalert"] {
            let frame = json!({
                "type": name,
                "payload": {
                    "punto": "Punto 3",
                    "severity": 2,
                    "criticalValues": [
                        {"Parameter": "Temperatura", "Value": 40.0, "Threshold": 30.0, "Unit": "°C"}
                    ]
                }
            });
            match decode_frame(&frame.to_string()).unwrap() {
                PushEvent::CriticalAlert(alert) => {
                    assert_eq!(alert.point, "Punto 3");
                    assert_eq!(alert.severity, Severity::High);
                    assert_eq!(alert.breaches[0].exceeded_by, 10.0);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn missing_point_is_an_error_not_a_panic() {
        let frame = json!({
            "type": "RealDataFileReset",
            "payload": {"RecordCount": 3}
        });
        assert!(matches!(
            decode_frame(&frame.to_string()),
            Err(DecodeError::MissingPoint { .. })
        ));
    }

    #[test]
    fn unknown_event_is_reported_by_name() {
        let frame = json!({"type": "SomethingElse", "payload": {}});
        assert!(matches!(
            decode_frame(&frame.to_string()),
            Err(DecodeError::UnknownEvent(name)) if name == "SomethingElse"
        ));
    }
}
