use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sensor sample for a monitoring point. Within a point's buffer a
/// reading is uniquely identified by its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub point: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "pm2_5")]
    pub pm2_5: f64,
    pub co3: f64,
}

impl SensorReading {
    pub fn new(point: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            point: point.into(),
            timestamp,
            temperature: 0.0,
            humidity: 0.0,
            pm2_5: 0.0,
            co3: 0.0,
        }
    }
}

/// Parses a server-side timestamp. The server emits naive UTC strings
/// without a zone suffix, so a missing offset is treated as `Z`.
pub fn parse_server_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    // Naive "YYYY-MM-DDTHH:MM:SS[.fff]" shapes
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    None
}
