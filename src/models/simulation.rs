use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SimulationPhase {
    Stopped,
    Running,
    Paused,
}

impl Default for SimulationPhase {
    fn default() -> Self {
        SimulationPhase::Stopped
    }
}

/// Local playback state for one point. Mutated optimistically by the
/// playback commands and reconciled against server snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub phase: SimulationPhase,
    /// Playback progress in percent, 0..=100.
    pub progress: f64,
}

impl SimulationState {
    pub fn is_active(&self) -> bool {
        self.phase != SimulationPhase::Stopped
    }

    pub fn apply_snapshot(&mut self, snapshot: &SimulationStatus) {
        self.phase = if !snapshot.is_active {
            SimulationPhase::Stopped
        } else if snapshot.is_paused {
            SimulationPhase::Paused
        } else {
            SimulationPhase::Running
        };
        self.progress = snapshot.progress.clamp(0.0, 100.0);
    }
}

/// Server-reported playback snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    pub is_active: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_index: u64,
    #[serde(default)]
    pub total_records: u64,
}
