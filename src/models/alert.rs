use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlertLifecycle {
    Monitoring,
    AlertSent,
    Normal,
}

impl Default for AlertLifecycle {
    fn default() -> Self {
        AlertLifecycle::Monitoring
    }
}

/// Alert severity as reported by the server: 1=moderate, 2=high, 3=critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 | 1 => Severity::Moderate,
            2 => Severity::High,
            _ => Severity::Critical,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Severity::Moderate => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }
}

/// One threshold breach inside an alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CriticalValue {
    /// Wire parameter name, e.g. "Temperatura".
    #[serde(alias = "Parameter")]
    pub parameter: String,
    #[serde(alias = "Value")]
    pub value: f64,
    #[serde(alias = "Threshold")]
    pub threshold: f64,
    #[serde(alias = "Unit", default)]
    pub unit: String,
    #[serde(alias = "ExceededBy", default)]
    pub exceeded_by: f64,
}

impl CriticalValue {
    pub fn new(parameter: impl Into<String>, value: f64, threshold: f64, unit: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            value,
            threshold,
            unit: unit.into(),
            exceeded_by: value - threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertThresholds {
    #[serde(alias = "maxTemperatura", alias = "MaxTemperatura")]
    pub max_temperature: f64,
    #[serde(alias = "maxCO3", alias = "MaxCo3")]
    pub max_co3: f64,
    #[serde(rename = "maxPm2_5", alias = "maxPm25", alias = "MaxPm2_5")]
    pub max_pm2_5: f64,
}

/// Per-point alert state, owned exclusively by the alert engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertStatus {
    #[serde(alias = "punto", alias = "Punto")]
    pub point: String,
    pub is_monitoring: bool,
    pub has_active_alert: bool,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub current_critical_values: Vec<CriticalValue>,
    pub thresholds: AlertThresholds,
    pub status: AlertLifecycle,
}

impl Default for AlertStatus {
    fn default() -> Self {
        Self::monitoring("")
    }
}

impl AlertStatus {
    pub fn monitoring(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
            is_monitoring: true,
            has_active_alert: false,
            last_alert_time: None,
            current_critical_values: Vec::new(),
            thresholds: AlertThresholds::default(),
            status: AlertLifecycle::Monitoring,
        }
    }
}

/// One occurrence in the bounded active-alert history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAlert {
    pub id: String,
    pub point: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub breaches: Vec<CriticalValue>,
    pub email_sent: bool,
    #[serde(default)]
    pub email_sent_to: Option<String>,
}

/// Email-dispatch confirmation, kept purely for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailNotification {
    pub id: String,
    pub point: String,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_levels() {
        assert_eq!(Severity::from_level(1), Severity::Moderate);
        assert_eq!(Severity::from_level(2), Severity::High);
        assert_eq!(Severity::from_level(3), Severity::Critical);
        assert_eq!(Severity::from_level(9), Severity::Critical);
        assert_eq!(Severity::Critical.level(), 3);
    }

    #[test]
    fn critical_value_computes_exceeded_by() {
        let value = CriticalValue::new("Temperatura", 40.0, 30.0, "°C");
        assert_eq!(value.exceeded_by, 10.0);
    }
}
