use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// REST API base, e.g. "http://localhost:5000/api".
    pub api_base_url: String,
    /// Push hub endpoint, e.g. "ws://localhost:5000/hubs/sensordata".
    pub hub_url: String,
    /// Base sliding-window size for simulated/historical playback.
    pub base_window: usize,
    /// Configured ceiling for live real-time points; the effective live
    /// window is five times this value.
    pub max_real_points: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Interval of the alert polling fallback.
    pub alert_poll_secs: u64,
    pub active_alert_capacity: usize,
    pub email_log_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".into(),
            hub_url: "ws://localhost:5000/hubs/sensordata".into(),
            base_window: 50,
            max_real_points: 50,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            alert_poll_secs: 30,
            active_alert_capacity: 50,
            email_log_capacity: 100,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Effective window size for live real-time tracks.
    pub fn live_window(&self) -> usize {
        self.max_real_points * 5
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn alert_poll_interval(&self) -> Duration {
        Duration::from_secs(self.alert_poll_secs)
    }
}
