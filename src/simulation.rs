//! Per-point simulation playback control.
//!
//! Each command is a remote call followed by an optimistic local update; the
//! authoritative phase arrives later through `SimulationStatusChanged`
//! pushes or an explicit [`SimulationController::refresh_status`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use log::warn;
use tokio::sync::Mutex;

use crate::models::{SimulationPhase, SimulationState, SimulationStatus};
use crate::rest::{HistoricalQuery, RestClient, SimulationCommand};

/// Local phase change applied as soon as the remote command succeeds.
pub fn optimistic_transition(state: &mut SimulationState, command: SimulationCommand) {
    match command {
        SimulationCommand::Start | SimulationCommand::Restart => {
            state.phase = SimulationPhase::Running;
            state.progress = 0.0;
        }
        SimulationCommand::Pause => {
            if state.phase == SimulationPhase::Running {
                state.phase = SimulationPhase::Paused;
            }
        }
        SimulationCommand::Resume => {
            if state.phase == SimulationPhase::Paused {
                state.phase = SimulationPhase::Running;
            }
        }
        SimulationCommand::Stop => {
            state.phase = SimulationPhase::Stopped;
            state.progress = 0.0;
        }
    }
}

#[derive(Clone)]
pub struct SimulationController {
    rest: RestClient,
    states: Arc<Mutex<HashMap<String, SimulationState>>>,
}

impl SimulationController {
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Local state for a point, created on first query.
    pub async fn state(&self, punto: &str) -> SimulationState {
        *self
            .states
            .lock()
            .await
            .entry(punto.to_string())
            .or_default()
    }

    pub async fn is_active(&self, punto: &str) -> bool {
        self.state(punto).await.is_active()
    }

    pub async fn start(&self, punto: &str) -> Result<SimulationState> {
        self.command(punto, SimulationCommand::Start).await
    }

    pub async fn pause(&self, punto: &str) -> Result<SimulationState> {
        self.command(punto, SimulationCommand::Pause).await
    }

    pub async fn resume(&self, punto: &str) -> Result<SimulationState> {
        self.command(punto, SimulationCommand::Resume).await
    }

    pub async fn restart(&self, punto: &str) -> Result<SimulationState> {
        self.command(punto, SimulationCommand::Restart).await
    }

    pub async fn stop(&self, punto: &str) -> Result<SimulationState> {
        self.command(punto, SimulationCommand::Stop).await
    }

    /// Stops playback only when it is active, for callers that must make
    /// sure no simulation interferes (e.g. switching to real data).
    pub async fn stop_if_active(&self, punto: &str) -> Result<()> {
        if self.is_active(punto).await {
            self.stop(punto).await?;
        }
        Ok(())
    }

    async fn command(&self, punto: &str, command: SimulationCommand) -> Result<SimulationState> {
        self.rest.simulation_command(punto, command).await?;
        let mut guard = self.states.lock().await;
        let state = guard.entry(punto.to_string()).or_default();
        optimistic_transition(state, command);
        Ok(*state)
    }

    /// Applies a server-confirmed snapshot (push path).
    pub async fn apply_snapshot(&self, punto: &str, snapshot: &SimulationStatus) {
        let mut guard = self.states.lock().await;
        let state = guard.entry(punto.to_string()).or_default();
        state.apply_snapshot(snapshot);
    }

    /// Reconciles local state against the server. When the status query
    /// fails, falls back to a coarser "is simulating" probe over the data
    /// endpoint; when that fails too, the optimistic state stands.
    pub async fn refresh_status(&self, punto: &str) -> SimulationState {
        match self.rest.simulation_status(punto).await {
            Ok(snapshot) => {
                self.apply_snapshot(punto, &snapshot).await;
            }
            Err(err) => {
                warn!("simulation status for {punto} unavailable: {err:#}");
                match self.coarse_is_simulating(punto).await {
                    Some(running) => {
                        let mut guard = self.states.lock().await;
                        let state = guard.entry(punto.to_string()).or_default();
                        if !running {
                            state.phase = SimulationPhase::Stopped;
                            state.progress = 0.0;
                        } else if state.phase == SimulationPhase::Stopped {
                            state.phase = SimulationPhase::Running;
                        }
                    }
                    None => warn!("coarse simulation probe for {punto} failed as well"),
                }
            }
        }
        self.state(punto).await
    }

    async fn coarse_is_simulating(&self, punto: &str) -> Option<bool> {
        let query = HistoricalQuery {
            limit: Some(1),
            ..Default::default()
        };
        match self.rest.sensor_data(punto, &query, true).await {
            Ok(response) => Some(!response.is_real_time && response.total_records > 0),
            Err(_) => None,
        }
    }
}
