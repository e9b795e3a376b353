//! Typed REST client for the monitoring API.
//!
//! Thin wrappers over `reqwest`; every call returns `anyhow::Result` and the
//! callers decide whether a failure is fatal or becomes a scoped error
//! string. Response bodies reuse the wire-normalization helpers so the REST
//! path tolerates the same field-name variants as the push channel.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    ActiveAlert, AlertStatus, AlertThresholds, RealDataAvailability, SensorReading,
    SimulationStatus,
};
use crate::wire;

/// Playback commands accepted by the simulate endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Restart,
}

impl SimulationCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationCommand::Start => "start",
            SimulationCommand::Stop => "stop",
            SimulationCommand::Pause => "pause",
            SimulationCommand::Resume => "resume",
            SimulationCommand::Restart => "restart",
        }
    }
}

/// `GET /sensordata` response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(alias = "Punto", default)]
    pub punto: Option<String>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub is_real_time: bool,
}

impl SensorDataResponse {
    pub fn readings(self) -> Vec<SensorReading> {
        let fallback = self.punto.clone();
        self.data
            .into_iter()
            .filter_map(|entry| wire::reading_from_value(entry, fallback.as_deref()))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTestResponse {
    #[serde(alias = "processed", default)]
    pub triggered: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalQuery {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl Default for HistoricalQuery {
    fn default() -> Self {
        Self {
            from_date: None,
            to_date: None,
            limit: Some(50),
        }
    }
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn points(&self) -> Result<Vec<String>> {
        self.get_json("sensordata/points")
            .await
            .context("failed to list monitoring points")
    }

    pub async fn sensor_data(
        &self,
        punto: &str,
        query: &HistoricalQuery,
        simulate: bool,
    ) -> Result<SensorDataResponse> {
        let response = self
            .http
            .get(self.url("sensordata"))
            .query(&[("punto", punto)])
            .query(query)
            .query(&[("simulate", simulate)])
            .send()
            .await
            .with_context(|| format!("sensordata request for {punto} failed"))?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Last `count` readings from the live ingest buffer.
    pub async fn recent_real_data(&self, punto: &str, count: usize) -> Result<Vec<SensorReading>> {
        let response: Vec<Value> = self
            .http
            .get(self.url(&format!("sensoringest/recent/{punto}")))
            .query(&[("count", count)])
            .send()
            .await
            .with_context(|| format!("recent real-data request for {punto} failed"))?
            .error_for_status()?
            .json()
            .await?;
        Ok(response
            .into_iter()
            .filter_map(|entry| wire::reading_from_value(entry, Some(punto)))
            .collect())
    }

    pub async fn historical_data(
        &self,
        punto: &str,
        query: &HistoricalQuery,
    ) -> Result<Vec<SensorReading>> {
        let response: SensorDataResponse = self
            .http
            .get(self.url(&format!("sensordata/historical/{punto}")))
            .query(query)
            .send()
            .await
            .with_context(|| format!("historical request for {punto} failed"))?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.readings())
    }

    pub async fn real_data_availability(&self, punto: &str) -> Result<RealDataAvailability> {
        self.get_json(&format!("sensordata/realdata/{punto}/availability"))
            .await
            .with_context(|| format!("availability check for {punto} failed"))
    }

    pub async fn start_realtime(&self, punto: &str) -> Result<()> {
        self.post_empty(&format!("sensordata/realtime/{punto}/start"))
            .await
            .with_context(|| format!("failed to start real-time monitoring for {punto}"))
    }

    pub async fn stop_realtime(&self, punto: &str) -> Result<()> {
        self.post_empty(&format!("sensordata/realtime/{punto}/stop"))
            .await
            .with_context(|| format!("failed to stop real-time monitoring for {punto}"))
    }

    pub async fn simulation_command(&self, punto: &str, command: SimulationCommand) -> Result<()> {
        self.post_empty(&format!("sensordata/simulate/{punto}/{}", command.as_str()))
            .await
            .with_context(|| format!("simulation {} for {punto} failed", command.as_str()))
    }

    pub async fn simulation_status(&self, punto: &str) -> Result<SimulationStatus> {
        self.get_json(&format!("sensordata/simulate/{punto}/status"))
            .await
            .with_context(|| format!("simulation status query for {punto} failed"))
    }

    pub async fn reset_file_status(&self, punto: &str) -> Result<()> {
        self.post_empty(&format!("sensordata/reset-file-status/{punto}"))
            .await
            .with_context(|| format!("file-status reset for {punto} failed"))
    }

    pub async fn alert_status(&self, punto: &str) -> Result<AlertStatus> {
        let response = self
            .http
            .get(self.url("alerts/status"))
            .query(&[("punto", punto)])
            .send()
            .await
            .with_context(|| format!("alert status query for {punto} failed"))?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn recent_alerts(&self) -> Result<Vec<ActiveAlert>> {
        let entries: Vec<Value> = self
            .get_json("alerts/recent")
            .await
            .context("recent alerts query failed")?;
        Ok(entries.into_iter().filter_map(wire::alert_from_value).collect())
    }

    pub async fn alert_thresholds(&self) -> Result<AlertThresholds> {
        self.get_json("alerts/thresholds")
            .await
            .context("threshold query failed")
    }

    /// Feeds a synthetic reading through the server-side alert pipeline.
    pub async fn simulate_alert(&self, reading: &SensorReading) -> Result<AlertTestResponse> {
        let response = self
            .http
            .post(self.url("alerts/simulate"))
            .json(reading)
            .send()
            .await
            .context("alert simulation request failed")?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn clear_ingest_history(&self, punto: &str) -> Result<()> {
        self.delete(&format!("sensoringest/history/{punto}"))
            .await
            .with_context(|| format!("failed to clear ingest history for {punto}"))
    }

    pub async fn clear_all_ingest_history(&self) -> Result<()> {
        self.delete("sensoringest/history/all")
            .await
            .context("failed to clear ingest history")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        self.http
            .post(self.url(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.http
            .delete(self.url(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
