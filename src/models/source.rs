use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which pipeline currently supplies a point's displayed readings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataSource {
    Simulated,
    Historical,
    Realtime,
}

impl Default for DataSource {
    fn default() -> Self {
        DataSource::Simulated
    }
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Simulated => "simulated",
            DataSource::Historical => "historical",
            DataSource::Realtime => "realtime",
        }
    }
}

/// Server answer for the real-data availability probe of a point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealDataAvailability {
    pub file_exists: bool,
    pub has_data: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RealDataAvailability {
    pub fn is_available(&self) -> bool {
        self.file_exists && self.has_data
    }
}
