//! Per-point data-source reconciliation.
//!
//! Every server push and user switch for a point funnels into one reducer:
//! [`apply_event`] takes the point's current state plus a tagged event and
//! mutates the state according to a single decision table, instead of
//! scattering the rules across independent callbacks. Side effects that need
//! I/O (re-fetching recent real data) are returned as a [`Followup`] for the
//! caller to execute.

use chrono::{DateTime, Utc};
use log::debug;

use crate::models::{DataSource, SensorReading};
use crate::window;

#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub base_window: usize,
    pub max_real_points: usize,
}

impl WindowConfig {
    fn limit_for(&self, source: DataSource) -> usize {
        window::window_limit(source, self.base_window, self.max_real_points)
    }
}

/// Reconciled view of one monitoring point.
#[derive(Debug, Clone)]
pub struct PointState {
    pub point: String,
    pub source: DataSource,
    pub available: bool,
    pub monitoring: bool,
    pub status_message: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub readings: Vec<SensorReading>,
    pub latest: Option<SensorReading>,
}

impl PointState {
    pub fn new(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
            source: DataSource::Simulated,
            available: false,
            monitoring: false,
            status_message: None,
            last_update: None,
            readings: Vec::new(),
            latest: None,
        }
    }

    fn clear_readings(&mut self) {
        self.readings.clear();
        self.latest = None;
    }

    fn set_monitoring(&mut self, monitoring: bool) {
        self.monitoring = monitoring;
        if monitoring {
            // monitoring implies availability
            self.available = true;
        }
    }
}

/// Tagged event for the reducer. Server pushes and user switches share the
/// same dispatch surface.
#[derive(Debug, Clone)]
pub enum PointEvent {
    /// Single live reading (either wire shape, already normalized).
    ReadingReceived(SensorReading),
    /// Authoritative batch pushed by the server.
    BatchReceived(Vec<SensorReading>),
    /// Recent real data fetched after a cache reload or a user switch.
    RealDataLoaded(Vec<SensorReading>),
    /// Historical fallback load after a failed real-data switch.
    HistoricalLoaded(Vec<SensorReading>),
    CacheReloaded { record_count: u64 },
    CacheInvalidated,
    StatusChanged { record_count: u64 },
    FileReset,
    FileStopped { message: Option<String> },
    /// Result of a passive background availability poll.
    AvailabilityPolled { available: bool },
    /// Simulation playback is (re)starting; the timeline begins fresh.
    SimulationCleared,
    SwitchedToSimulated,
}

/// Deferred side effect the caller must run after the state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    None,
    /// Re-fetch the last N readings from the real-data endpoint.
    RefetchRecent,
}

pub fn apply_event(state: &mut PointState, event: PointEvent, config: &WindowConfig) -> Followup {
    match event {
        PointEvent::ReadingReceived(reading) => {
            state.source = DataSource::Realtime;
            state.set_monitoring(true);
            state.last_update = Some(reading.timestamp);
            state.latest = Some(reading.clone());
            window::upsert(
                &mut state.readings,
                reading,
                config.limit_for(DataSource::Realtime),
            );
            Followup::None
        }
        PointEvent::BatchReceived(batch) | PointEvent::RealDataLoaded(batch) => {
            state.source = DataSource::Realtime;
            state.set_monitoring(true);
            window::replace_window(
                &mut state.readings,
                batch,
                config.limit_for(DataSource::Realtime),
            );
            state.latest = state.readings.last().cloned();
            state.last_update = state.latest.as_ref().map(|reading| reading.timestamp);
            Followup::None
        }
        PointEvent::HistoricalLoaded(batch) => {
            state.source = DataSource::Historical;
            state.monitoring = false;
            window::replace_window(
                &mut state.readings,
                batch,
                config.limit_for(DataSource::Historical),
            );
            state.latest = state.readings.last().cloned();
            state.last_update = state.latest.as_ref().map(|reading| reading.timestamp);
            Followup::None
        }
        PointEvent::CacheReloaded { record_count } => {
            if record_count == 0 {
                state.clear_readings();
                state.available = false;
                state.monitoring = false;
                state.source = DataSource::Simulated;
                state.status_message = Some("real-data cache emptied".into());
                Followup::None
            } else {
                state.available = true;
                state.source = DataSource::Realtime;
                state.status_message = None;
                Followup::RefetchRecent
            }
        }
        PointEvent::CacheInvalidated => {
            state.clear_readings();
            state.available = false;
            state.monitoring = false;
            state.source = DataSource::Simulated;
            state.status_message = Some("real-data cache invalidated".into());
            Followup::None
        }
        PointEvent::StatusChanged { record_count } => {
            // Availability only; the buffer is never touched here.
            state.available = record_count > 0;
            if !state.available {
                state.monitoring = false;
            }
            Followup::None
        }
        PointEvent::FileReset => {
            state.clear_readings();
            state.set_monitoring(true);
            state.source = DataSource::Realtime;
            state.status_message = Some("data file reset, monitoring restarted".into());
            Followup::None
        }
        PointEvent::FileStopped { message } => {
            state.monitoring = false;
            state.status_message =
                Some(message.unwrap_or_else(|| "real-time file stopped".into()));
            Followup::None
        }
        PointEvent::AvailabilityPolled { available } => {
            // A passive poll may never downgrade a live track; only explicit
            // events or user action do that.
            if state.source == DataSource::Realtime && !available {
                debug!(
                    "ignoring negative availability poll for live point {}",
                    state.point
                );
            } else {
                state.available = available;
                if !available {
                    state.monitoring = false;
                }
            }
            Followup::None
        }
        PointEvent::SimulationCleared => {
            state.clear_readings();
            state.source = DataSource::Simulated;
            state.status_message = None;
            Followup::None
        }
        PointEvent::SwitchedToSimulated => {
            state.clear_readings();
            state.monitoring = false;
            state.source = DataSource::Simulated;
            state.status_message = None;
            Followup::None
        }
    }
}
