//! Real-time monitor: owns the per-point reconciled state and wires the
//! push channel, the REST client, the simulation controller and the alert
//! engine together.
//!
//! All mutation goes through [`reconciler::apply_event`]; this layer only
//! dispatches push frames to it, executes the followup I/O it requests and
//! exposes the user-facing switch operations. Fetches carry a per-point
//! generation number so a slow response can never overwrite state requested
//! later.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::alerts::AlertEngine;
use crate::config::ClientConfig;
use crate::models::DataSource;
use crate::push::{PushCallbacks, PushClient};
use crate::reconciler::{self, Followup, PointEvent, PointState, WindowConfig};
use crate::rest::{HistoricalQuery, RestClient};
use crate::simulation::SimulationController;
use crate::wire::PushEvent;

struct PointEntry {
    state: PointState,
    /// Bumped every time a fetch for this point starts; a completed fetch
    /// only lands when its number is still the latest.
    generation: u64,
}

impl PointEntry {
    fn new(punto: &str) -> Self {
        Self {
            state: PointState::new(punto),
            generation: 0,
        }
    }
}

#[derive(Clone)]
pub struct RealtimeMonitor {
    rest: RestClient,
    push: PushClient,
    simulation: SimulationController,
    alerts: AlertEngine,
    window: WindowConfig,
    live_window: usize,
    points: Arc<Mutex<HashMap<String, PointEntry>>>,
}

impl RealtimeMonitor {
    pub fn new(
        rest: RestClient,
        push: PushClient,
        simulation: SimulationController,
        alerts: AlertEngine,
        config: &ClientConfig,
    ) -> Self {
        Self {
            rest,
            push,
            simulation,
            alerts,
            window: WindowConfig {
                base_window: config.base_window,
                max_real_points: config.max_real_points,
            },
            live_window: config.live_window(),
            points: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers this monitor as the push client's event sink. Handlers are
    /// synchronous, so each frame is bounced onto a task.
    pub async fn install_callbacks(&self) {
        let monitor = self.clone();
        self.push
            .set_callbacks(PushCallbacks {
                on_event: Some(Arc::new(move |event| {
                    let monitor = monitor.clone();
                    tokio::spawn(async move { monitor.handle_push_event(event).await });
                })),
                ..PushCallbacks::default()
            })
            .await;
    }

    pub async fn connect(&self) -> Result<()> {
        self.push.start().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.push.stop().await
    }

    /// Starts following a point: push subscription, alert tracking and a
    /// fresh state entry.
    pub async fn subscribe(&self, punto: &str) -> Result<()> {
        {
            let mut points = self.points.lock().await;
            points
                .entry(punto.to_string())
                .or_insert_with(|| PointEntry::new(punto));
        }
        self.alerts.track_point(punto).await;
        self.push.subscribe_to_point(punto).await
    }

    pub async fn unsubscribe(&self, punto: &str) -> Result<()> {
        self.alerts.untrack_point(punto).await;
        self.push.unsubscribe_from_point(punto).await
    }

    pub async fn point_state(&self, punto: &str) -> Option<PointState> {
        self.points
            .lock()
            .await
            .get(punto)
            .map(|entry| entry.state.clone())
    }

    pub async fn handle_push_event(&self, event: PushEvent) {
        match event {
            PushEvent::Reading(reading) => {
                self.alerts.handle_reading(&reading).await;
                let point = reading.point.clone();
                self.apply(&point, PointEvent::ReadingReceived(reading)).await;
            }
            PushEvent::SensorBatch { point, readings } => {
                self.apply(&point, PointEvent::BatchReceived(readings)).await;
            }
            PushEvent::SimulationStatus { point, status } => {
                self.simulation.apply_snapshot(&point, &status).await;
            }
            PushEvent::CacheReloaded {
                point,
                record_count,
            } => {
                self.apply(&point, PointEvent::CacheReloaded { record_count })
                    .await;
            }
            PushEvent::CacheInvalidated { point } => {
                self.apply(&point, PointEvent::CacheInvalidated).await;
            }
            PushEvent::StatusChanged {
                point,
                record_count,
            } => {
                self.apply(&point, PointEvent::StatusChanged { record_count })
                    .await;
            }
            PushEvent::FileReset { point } => {
                self.apply(&point, PointEvent::FileReset).await;
            }
            PushEvent::FileStopped { point, message } => {
                self.apply(&point, PointEvent::FileStopped { message }).await;
            }
            PushEvent::CriticalAlert(alert) => {
                self.alerts.handle_critical_alert(alert).await;
            }
            PushEvent::EmailSent(email) => {
                self.alerts.handle_email_sent(email).await;
            }
        }
    }

    /// Switches a point to real data. Stops any running simulation first,
    /// then checks availability; when real data exists the live feed is
    /// started and the recent window loaded, otherwise the point falls back
    /// to historical data and reports why.
    pub async fn switch_to_real_data(&self, punto: &str) -> Result<DataSource> {
        self.simulation.stop_if_active(punto).await?;
        let generation = self.begin_fetch(punto).await;

        let availability = self.rest.real_data_availability(punto).await?;
        if availability.is_available() {
            self.rest.start_realtime(punto).await?;
            let recent = self.rest.recent_real_data(punto, self.live_window).await?;
            if self
                .apply_fetched(punto, generation, PointEvent::RealDataLoaded(recent))
                .await
            {
                info!("{punto} switched to real-time data");
            }
            Ok(DataSource::Realtime)
        } else {
            let historical = self
                .rest
                .historical_data(punto, &HistoricalQuery::default())
                .await?;
            if self
                .apply_fetched(punto, generation, PointEvent::HistoricalLoaded(historical))
                .await
            {
                let mut points = self.points.lock().await;
                if let Some(entry) = points.get_mut(punto) {
                    entry.state.status_message = availability
                        .message
                        .clone()
                        .or_else(|| Some("no real data available, showing history".into()));
                }
                info!("{punto} has no real data, fell back to historical");
            }
            Ok(DataSource::Historical)
        }
    }

    /// Returns a point to simulated mode: best-effort stop of the live feed
    /// on the server, then a local clear.
    pub async fn switch_to_simulated(&self, punto: &str) -> Result<()> {
        if let Err(err) = self.rest.stop_realtime(punto).await {
            warn!("stopping real-time feed for {punto} failed: {err:#}");
        }
        self.begin_fetch(punto).await;
        self.apply(punto, PointEvent::SwitchedToSimulated).await;
        Ok(())
    }

    /// Starts (or restarts) simulation playback and clears the timeline so
    /// the chart begins fresh.
    pub async fn start_simulation(&self, punto: &str, restart: bool) -> Result<()> {
        if restart {
            self.simulation.restart(punto).await?;
        } else {
            self.simulation.start(punto).await?;
        }
        self.apply(punto, PointEvent::SimulationCleared).await;
        Ok(())
    }

    /// Background availability probe; the reducer guarantees it can only
    /// raise availability for live points, never revoke it.
    pub async fn poll_availability(&self, punto: &str) {
        match self.rest.real_data_availability(punto).await {
            Ok(availability) => {
                self.apply(
                    punto,
                    PointEvent::AvailabilityPolled {
                        available: availability.is_available(),
                    },
                )
                .await;
            }
            Err(err) => warn!("availability poll for {punto} failed: {err:#}"),
        }
    }

    /// Applies an event and executes whatever followup the reducer asks for.
    async fn apply(&self, punto: &str, event: PointEvent) {
        let followup = {
            let mut points = self.points.lock().await;
            let entry = points
                .entry(punto.to_string())
                .or_insert_with(|| PointEntry::new(punto));
            reconciler::apply_event(&mut entry.state, event, &self.window)
        };
        self.run_followup(punto, followup).await;
    }

    fn run_followup<'a>(
        &'a self,
        punto: &'a str,
        followup: Followup,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match followup {
                Followup::None => {}
                Followup::RefetchRecent => {
                    let generation = self.begin_fetch(punto).await;
                    match self.rest.recent_real_data(punto, self.live_window).await {
                        Ok(recent) => {
                            self.apply_fetched(punto, generation, PointEvent::RealDataLoaded(recent))
                                .await;
                        }
                        Err(err) => warn!("recent-data refetch for {punto} failed: {err:#}"),
                    }
                }
            }
        })
    }

    /// Starts a fetch for a point and returns its generation number.
    async fn begin_fetch(&self, punto: &str) -> u64 {
        let mut points = self.points.lock().await;
        let entry = points
            .entry(punto.to_string())
            .or_insert_with(|| PointEntry::new(punto));
        entry.generation += 1;
        entry.generation
    }

    /// Applies a fetched result only when no newer fetch has started since;
    /// returns whether it landed.
    async fn apply_fetched(&self, punto: &str, generation: u64, event: PointEvent) -> bool {
        let followup = {
            let mut points = self.points.lock().await;
            let entry = match points.get_mut(punto) {
                Some(entry) => entry,
                None => return false,
            };
            if entry.generation != generation {
                warn!("dropping stale fetch result for {punto}");
                return false;
            }
            reconciler::apply_event(&mut entry.state, event, &self.window)
        };
        self.run_followup(punto, followup).await;
        true
    }
}
