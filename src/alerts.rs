//! Critical-alert engine: per-point alert status, bounded alert and email
//! histories, reset semantics and the polling fallback that reconciles
//! state when a push notification was missed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{
    ActiveAlert, AlertLifecycle, AlertStatus, AlertThresholds, CriticalValue, EmailNotification,
    SensorReading, Severity,
};
use crate::rest::RestClient;

/// Evaluates a reading against the configured thresholds. Returns one
/// breach per exceeded parameter, wire parameter names included.
pub fn evaluate_breaches(reading: &SensorReading, thresholds: &AlertThresholds) -> Vec<CriticalValue> {
    let mut breaches = Vec::new();
    if thresholds.max_temperature > 0.0 && reading.temperature > thresholds.max_temperature {
        breaches.push(CriticalValue::new(
            "Temperatura",
            reading.temperature,
            thresholds.max_temperature,
            "°C",
        ));
    }
    if thresholds.max_co3 > 0.0 && reading.co3 > thresholds.max_co3 {
        breaches.push(CriticalValue::new("CO3", reading.co3, thresholds.max_co3, "ppm"));
    }
    if thresholds.max_pm2_5 > 0.0 && reading.pm2_5 > thresholds.max_pm2_5 {
        breaches.push(CriticalValue::new(
            "PM2.5",
            reading.pm2_5,
            thresholds.max_pm2_5,
            "µg/m³",
        ));
    }
    breaches
}

/// Severity from the worst relative exceedance: more than 50% over the
/// threshold is critical, more than 20% is high, anything else moderate.
pub fn severity_for(breaches: &[CriticalValue]) -> Severity {
    let worst = breaches
        .iter()
        .filter(|breach| breach.threshold > 0.0)
        .map(|breach| breach.value / breach.threshold)
        .fold(0.0_f64, f64::max);
    if worst > 1.5 {
        Severity::Critical
    } else if worst > 1.2 {
        Severity::High
    } else {
        Severity::Moderate
    }
}

struct AlertBook {
    statuses: HashMap<String, AlertStatus>,
    /// When each point's status was last written, for timestamp-compared
    /// merges between the push path and the polling fallback.
    status_seen_at: HashMap<String, DateTime<Utc>>,
    active: Vec<ActiveAlert>,
    emails: Vec<EmailNotification>,
    thresholds: Option<AlertThresholds>,
    tracked: BTreeSet<String>,
    last_error: Option<String>,
}

impl AlertBook {
    fn new() -> Self {
        Self {
            statuses: HashMap::new(),
            status_seen_at: HashMap::new(),
            active: Vec::new(),
            emails: Vec::new(),
            thresholds: None,
            tracked: BTreeSet::new(),
            last_error: None,
        }
    }

    fn status_mut(&mut self, punto: &str) -> &mut AlertStatus {
        self.statuses
            .entry(punto.to_string())
            .or_insert_with(|| AlertStatus::monitoring(punto))
    }
}

#[derive(Clone)]
pub struct AlertEngine {
    rest: RestClient,
    book: Arc<Mutex<AlertBook>>,
    active_capacity: usize,
    email_capacity: usize,
}

impl AlertEngine {
    pub fn new(rest: RestClient, active_capacity: usize, email_capacity: usize) -> Self {
        Self {
            rest,
            book: Arc::new(Mutex::new(AlertBook::new())),
            active_capacity,
            email_capacity,
        }
    }

    /// Includes a point in the polling fallback.
    pub async fn track_point(&self, punto: &str) {
        self.book.lock().await.tracked.insert(punto.to_string());
    }

    pub async fn untrack_point(&self, punto: &str) {
        self.book.lock().await.tracked.remove(punto);
    }

    pub async fn status(&self, punto: &str) -> AlertStatus {
        self.book.lock().await.status_mut(punto).clone()
    }

    pub async fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.book.lock().await.active.clone()
    }

    pub async fn alerts_for_point(&self, punto: &str) -> Vec<ActiveAlert> {
        self.book
            .lock()
            .await
            .active
            .iter()
            .filter(|alert| alert.point == punto)
            .cloned()
            .collect()
    }

    pub async fn email_notifications(&self) -> Vec<EmailNotification> {
        self.book.lock().await.emails.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.book.lock().await.last_error.clone()
    }

    pub async fn clear_error(&self) {
        self.book.lock().await.last_error = None;
    }

    /// Ingests a critical-alert push notification: prepends it to the
    /// bounded history (deduplicated by point and timestamp) and flips the
    /// point's status to alert-sent.
    pub async fn handle_critical_alert(&self, alert: ActiveAlert) {
        let mut book = self.book.lock().await;

        let duplicate = book
            .active
            .iter()
            .any(|existing| existing.point == alert.point && existing.timestamp == alert.timestamp);
        if !duplicate {
            book.active.insert(0, alert.clone());
            book.active.truncate(self.active_capacity);
        }

        let timestamp = alert.timestamp;
        let status = book.status_mut(&alert.point);
        status.has_active_alert = true;
        status.last_alert_time = Some(timestamp);
        status.current_critical_values = alert.breaches.clone();
        status.status = AlertLifecycle::AlertSent;
        book.status_seen_at.insert(alert.point.clone(), timestamp);

        warn!(
            "critical alert for {} (severity {})",
            alert.point,
            alert.severity.level()
        );
    }

    /// Ingests an email-dispatch confirmation into the bounded display log.
    pub async fn handle_email_sent(&self, email: EmailNotification) {
        let mut book = self.book.lock().await;
        let duplicate = book.emails.iter().any(|existing| {
            existing.point == email.point
                && existing.timestamp == email.timestamp
                && existing.recipient == email.recipient
        });
        if duplicate {
            return;
        }
        book.emails.insert(0, email);
        book.emails.truncate(self.email_capacity);
    }

    /// Evaluates a reading against the cached thresholds and raises a local
    /// alert when it breaches. Used by the live pipeline so that the UI
    /// reacts even when the server notification is delayed.
    pub async fn handle_reading(&self, reading: &SensorReading) {
        let thresholds = match self.cached_thresholds().await {
            Some(thresholds) => thresholds,
            None => return,
        };
        let breaches = evaluate_breaches(reading, &thresholds);
        if breaches.is_empty() {
            return;
        }
        let severity = severity_for(&breaches);
        self.handle_critical_alert(ActiveAlert {
            id: Uuid::new_v4().to_string(),
            point: reading.point.clone(),
            timestamp: reading.timestamp,
            severity,
            breaches,
            email_sent: false,
            email_sent_to: None,
        })
        .await;
    }

    /// Clears the server-side alert state for a point; on success the local
    /// status returns to monitoring and the point's history entries are
    /// removed. Returns whether the reset took effect.
    pub async fn reset_alert(&self, punto: &str) -> bool {
        if let Err(err) = self.rest.reset_file_status(punto).await {
            self.record_error(format!("alert reset for {punto} failed: {err:#}"))
                .await;
            return false;
        }
        let mut book = self.book.lock().await;
        book.active.retain(|alert| alert.point != punto);
        let status = book.status_mut(punto);
        status.has_active_alert = false;
        status.current_critical_values.clear();
        status.status = AlertLifecycle::Monitoring;
        book.status_seen_at.insert(punto.to_string(), Utc::now());
        info!("alert state reset for {punto}");
        true
    }

    /// Feeds a synthetic reading through the server-side alert pipeline.
    /// Local state is not mutated here; if the test trips the thresholds,
    /// the resulting push notifications arrive through the normal path.
    pub async fn test_alert(&self, reading: &SensorReading) -> bool {
        match self.rest.simulate_alert(reading).await {
            Ok(response) => {
                info!(
                    "alert test for {}: triggered={} {}",
                    reading.point,
                    response.triggered,
                    response.message.unwrap_or_default()
                );
                response.triggered
            }
            Err(err) => {
                self.record_error(format!("alert test failed: {err:#}")).await;
                false
            }
        }
    }

    /// Fetches thresholds once and caches them on the engine.
    pub async fn ensure_thresholds(&self) -> Option<AlertThresholds> {
        if let Some(cached) = self.cached_thresholds().await {
            return Some(cached);
        }
        match self.rest.alert_thresholds().await {
            Ok(thresholds) => {
                let mut book = self.book.lock().await;
                book.thresholds = Some(thresholds);
                for status in book.statuses.values_mut() {
                    status.thresholds = thresholds;
                }
                Some(thresholds)
            }
            Err(err) => {
                self.record_error(format!("threshold fetch failed: {err:#}")).await;
                None
            }
        }
    }

    async fn cached_thresholds(&self) -> Option<AlertThresholds> {
        self.book.lock().await.thresholds
    }

    /// Sets thresholds directly; used by tests and by callers that already
    /// hold a server copy.
    pub async fn set_thresholds(&self, thresholds: AlertThresholds) {
        let mut book = self.book.lock().await;
        book.thresholds = Some(thresholds);
        for status in book.statuses.values_mut() {
            status.thresholds = thresholds;
        }
    }

    /// Polling fallback for the per-point status. A polled snapshot is
    /// applied only when it is not older than the newest push-derived
    /// write, so a slow poll response cannot overwrite fresher state.
    pub async fn refresh_monitoring_status(&self) {
        let tracked: Vec<String> = {
            let book = self.book.lock().await;
            book.tracked.iter().cloned().collect()
        };
        for punto in tracked {
            match self.rest.alert_status(&punto).await {
                Ok(polled) => self.apply_polled_status(&punto, polled).await,
                Err(err) => {
                    warn!("alert status poll for {punto} failed: {err:#}");
                }
            }
        }
    }

    async fn apply_polled_status(&self, punto: &str, mut polled: AlertStatus) {
        let mut book = self.book.lock().await;
        let polled_time = polled.last_alert_time;
        if let (Some(seen), Some(polled_time)) = (book.status_seen_at.get(punto), polled_time) {
            if polled_time < *seen {
                return;
            }
        } else if book.status_seen_at.contains_key(punto) && polled_time.is_none() {
            // a dated local write beats an undated poll
            return;
        }
        if polled.point.is_empty() {
            polled.point = punto.to_string();
        }
        if let Some(polled_time) = polled_time {
            book.status_seen_at.insert(punto.to_string(), polled_time);
        }
        book.statuses.insert(punto.to_string(), polled);
    }

    /// Polling fallback for the alert history; merges by point and
    /// timestamp so re-delivered alerts do not duplicate.
    pub async fn refresh_active_alerts(&self) {
        match self.rest.recent_alerts().await {
            Ok(recent) => {
                let mut book = self.book.lock().await;
                for alert in recent {
                    let duplicate = book.active.iter().any(|existing| {
                        existing.point == alert.point && existing.timestamp == alert.timestamp
                    });
                    if !duplicate {
                        book.active.insert(0, alert);
                    }
                }
                book.active
                    .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                book.active.truncate(self.active_capacity);
            }
            Err(err) => warn!("recent alerts poll failed: {err:#}"),
        }
    }

    /// Spawns the periodic polling fallback. Independent of and
    /// complementary to push delivery; cancelled through the token.
    pub fn spawn_polling(
        &self,
        interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.ensure_thresholds().await;
                        engine.refresh_monitoring_status().await;
                        engine.refresh_active_alerts().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("alert polling loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    async fn record_error(&self, message: String) {
        error!("{message}");
        self.book.lock().await.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> AlertEngine {
        AlertEngine::new(RestClient::new("http://localhost:0/api"), 50, 100)
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn alert(point: &str, seconds: i64) -> ActiveAlert {
        ActiveAlert {
            id: Uuid::new_v4().to_string(),
            point: point.to_string(),
            timestamp: at(seconds),
            severity: Severity::Critical,
            breaches: vec![CriticalValue::new("Temperatura", 40.0, 30.0, "°C")],
            email_sent: false,
            email_sent_to: None,
        }
    }

    #[test]
    fn breach_evaluation_matches_thresholds() {
        let thresholds = AlertThresholds {
            max_temperature: 30.0,
            max_co3: 1.0,
            max_pm2_5: 25.0,
        };
        let mut reading = SensorReading::new("Punto 1", at(0));
        reading.temperature = 40.0;
        reading.co3 = 0.5;
        reading.pm2_5 = 25.0;

        let breaches = evaluate_breaches(&reading, &thresholds);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].parameter, "Temperatura");
        assert_eq!(breaches[0].value, 40.0);
        assert_eq!(breaches[0].threshold, 30.0);
        assert_eq!(breaches[0].exceeded_by, 10.0);
    }

    #[test]
    fn severity_scales_with_relative_exceedance() {
        let slight = vec![CriticalValue::new("CO3", 1.1, 1.0, "ppm")];
        let high = vec![CriticalValue::new("CO3", 1.3, 1.0, "ppm")];
        let extreme = vec![CriticalValue::new("Temperatura", 60.0, 30.0, "°C")];
        assert_eq!(severity_for(&slight), Severity::Moderate);
        assert_eq!(severity_for(&high), Severity::High);
        assert_eq!(severity_for(&extreme), Severity::Critical);
    }

    #[tokio::test]
    async fn critical_alert_flips_status_to_alert_sent() {
        let engine = engine();
        engine.handle_critical_alert(alert("Punto 1", 10)).await;

        let status = engine.status("Punto 1").await;
        assert!(status.has_active_alert);
        assert_eq!(status.status, AlertLifecycle::AlertSent);
        assert_eq!(status.last_alert_time, Some(at(10)));
        assert_eq!(status.current_critical_values[0].parameter, "Temperatura");
    }

    #[tokio::test]
    async fn redelivered_alert_is_deduplicated() {
        let engine = engine();
        let first = alert("Punto 1", 10);
        let mut redelivered = first.clone();
        redelivered.id = Uuid::new_v4().to_string();

        engine.handle_critical_alert(first).await;
        engine.handle_critical_alert(redelivered).await;

        assert_eq!(engine.alerts_for_point("Punto 1").await.len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded_and_newest_first() {
        let engine = AlertEngine::new(RestClient::new("http://localhost:0/api"), 5, 100);
        for second in 0..8 {
            engine.handle_critical_alert(alert("Punto 1", second)).await;
        }
        let alerts = engine.active_alerts().await;
        assert_eq!(alerts.len(), 5);
        assert_eq!(alerts[0].timestamp, at(7));
        assert_eq!(alerts[4].timestamp, at(3));
    }

    #[tokio::test]
    async fn email_log_is_bounded() {
        let engine = AlertEngine::new(RestClient::new("http://localhost:0/api"), 50, 3);
        for second in 0..5 {
            engine
                .handle_email_sent(EmailNotification {
                    id: Uuid::new_v4().to_string(),
                    point: "Punto 1".into(),
                    recipient: "ops@example.com".into(),
                    timestamp: at(second),
                    subject: None,
                })
                .await;
        }
        let emails = engine.email_notifications().await;
        assert_eq!(emails.len(), 3);
        assert_eq!(emails[0].timestamp, at(4));
    }

    #[tokio::test]
    async fn reading_through_pipeline_raises_alert_sent() {
        let engine = engine();
        engine
            .set_thresholds(AlertThresholds {
                max_temperature: 30.0,
                max_co3: 0.0,
                max_pm2_5: 0.0,
            })
            .await;

        let mut reading = SensorReading::new("Punto 1", at(0));
        reading.temperature = 40.0;
        engine.handle_reading(&reading).await;

        let status = engine.status("Punto 1").await;
        assert_eq!(status.status, AlertLifecycle::AlertSent);
        let breach = &status.current_critical_values[0];
        assert_eq!(breach.parameter, "Temperatura");
        assert_eq!(breach.value, 40.0);
        assert_eq!(breach.threshold, 30.0);
    }

    #[tokio::test]
    async fn reset_clears_history_and_returns_to_monitoring() {
        let server = crate::rest::stub::StubServer::start(Vec::new()).await;
        let engine = AlertEngine::new(RestClient::new(&server.base_url), 50, 100);

        engine.handle_critical_alert(alert("Punto1", 10)).await;
        engine.handle_critical_alert(alert("Punto2", 11)).await;

        assert!(engine.reset_alert("Punto1").await);

        let status = engine.status("Punto1").await;
        assert_eq!(status.status, AlertLifecycle::Monitoring);
        assert!(!status.has_active_alert);
        assert!(status.current_critical_values.is_empty());
        assert!(engine.alerts_for_point("Punto1").await.is_empty());
        // other points keep their history
        assert_eq!(engine.alerts_for_point("Punto2").await.len(), 1);
    }

    #[tokio::test]
    async fn stale_poll_cannot_overwrite_push_state() {
        let engine = engine();
        engine.handle_critical_alert(alert("Punto 1", 100)).await;

        let polled = AlertStatus {
            point: "Punto 1".into(),
            has_active_alert: false,
            last_alert_time: Some(at(50)),
            status: AlertLifecycle::Normal,
            ..AlertStatus::monitoring("Punto 1")
        };
        engine.apply_polled_status("Punto 1", polled).await;

        let status = engine.status("Punto 1").await;
        assert_eq!(status.status, AlertLifecycle::AlertSent);
        assert!(status.has_active_alert);
    }

    #[tokio::test]
    async fn fresher_poll_is_applied() {
        let engine = engine();
        engine.handle_critical_alert(alert("Punto 1", 100)).await;

        let polled = AlertStatus {
            point: "Punto 1".into(),
            has_active_alert: false,
            last_alert_time: Some(at(200)),
            status: AlertLifecycle::Normal,
            ..AlertStatus::monitoring("Punto 1")
        };
        engine.apply_polled_status("Punto 1", polled).await;

        let status = engine.status("Punto 1").await;
        assert_eq!(status.status, AlertLifecycle::Normal);
        assert!(!status.has_active_alert);
    }
}
