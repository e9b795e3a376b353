//! Push connection client: one hub connection shared by the whole process,
//! with subscribe/unsubscribe commands, an additive callback registry and
//! capped exponential-backoff reconnection.
//!
//! The key disambiguator is the lifecycle epoch: every supervisor task owns
//! the epoch it was spawned with, and [`PushClient::stop`] bumps it. A close
//! requested by `stop` leaves the supervisor stale, so it exits wherever it
//! happens to be (even mid-connect) instead of scheduling reconnection; an
//! unsolicited close finds the epoch intact and retries up to the attempt
//! cap, then reports a terminal error exactly once. At most one supervisor
//! is ever current, so rapid start/stop sequences cannot leak a second
//! connection.

use std::{
    collections::BTreeSet,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::error::PushError;
use crate::models::SensorReading;
use crate::push::transport::{Transport, TransportLink};
use crate::wire::{self, PushEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
}

pub type EventHandler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Named event handlers. `set_callbacks` merges `Some` fields into the
/// registry, last writer wins per key; existing handlers for other keys are
/// kept.
#[derive(Default, Clone)]
pub struct PushCallbacks {
    pub on_event: Option<EventHandler<PushEvent>>,
    pub on_reading: Option<EventHandler<SensorReading>>,
    pub on_connection_change: Option<EventHandler<ConnectionState>>,
    pub on_error: Option<EventHandler<PushError>>,
}

impl PushCallbacks {
    fn merge(&mut self, update: PushCallbacks) {
        if update.on_event.is_some() {
            self.on_event = update.on_event;
        }
        if update.on_reading.is_some() {
            self.on_reading = update.on_reading;
        }
        if update.on_connection_change.is_some() {
            self.on_connection_change = update.on_connection_change;
        }
        if update.on_error.is_some() {
            self.on_error = update.on_error;
        }
    }
}

struct Inner {
    state: ConnectionState,
    /// Lifecycle generation; bumped by `start` and `stop`. A supervisor task
    /// whose epoch no longer matches must exit without touching state.
    epoch: u64,
    reconnect_attempts: u32,
    callbacks: PushCallbacks,
    outgoing: Option<mpsc::Sender<String>>,
    subscriptions: BTreeSet<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            epoch: 0,
            reconnect_attempts: 0,
            callbacks: PushCallbacks::default(),
            outgoing: None,
            subscriptions: BTreeSet::new(),
        }
    }
}

#[derive(Clone)]
pub struct PushClient {
    transport: Arc<dyn Transport>,
    hub_url: String,
    max_reconnect_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl PushClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        hub_url: impl Into<String>,
        max_reconnect_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            transport,
            hub_url: hub_url.into(),
            max_reconnect_attempts,
            base_delay,
            max_delay,
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    /// Merges a partial set of handlers into the registry.
    pub async fn set_callbacks(&self, update: PushCallbacks) {
        self.inner.lock().await.callbacks.merge(update);
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Opens the hub connection. Idempotent when already connected or
    /// connecting; failures are routed to the error callback and feed the
    /// automatic reconnection path.
    pub async fn start(&self) -> Result<()> {
        let epoch = {
            let mut guard = self.inner.lock().await;
            if guard.state != ConnectionState::Disconnected {
                debug!("push connection already {:?}", guard.state);
                return Ok(());
            }
            guard.epoch += 1;
            guard.reconnect_attempts = 0;
            guard.epoch
        };

        let client = self.clone();
        tokio::spawn(async move { client.run(epoch).await });
        Ok(())
    }

    /// Closes the connection intentionally. Bumping the epoch strands the
    /// supervisor task, so the close can never turn into a reconnect, and
    /// the state settles to disconnected right here; a `start` issued
    /// immediately afterwards spawns a fresh supervisor.
    pub async fn stop(&self) -> Result<()> {
        let (callbacks, had_link, was_disconnected) = {
            let mut guard = self.inner.lock().await;
            guard.epoch += 1;
            guard.reconnect_attempts = 0;
            let was_disconnected = guard.state == ConnectionState::Disconnected;
            guard.state = ConnectionState::Disconnected;
            // Dropping the sender asks the transport to close the link.
            let had_link = guard.outgoing.take().is_some();
            (guard.callbacks.clone(), had_link, was_disconnected)
        };
        if had_link {
            emit_connection_change(&callbacks, ConnectionState::Disconnecting);
        }
        if had_link || !was_disconnected {
            emit_connection_change(&callbacks, ConnectionState::Disconnected);
        }
        Ok(())
    }

    /// Subscribes to a point's push events, auto-starting the connection
    /// first when needed. Failures are reported through the error callback
    /// and never propagated as panics.
    pub async fn subscribe_to_point(&self, point: &str) -> Result<()> {
        {
            let mut guard = self.inner.lock().await;
            guard.subscriptions.insert(point.to_string());
        }
        match self.connection_state().await {
            ConnectionState::Connected => self.invoke("SubscribeToPoint", point).await,
            ConnectionState::Disconnected => {
                // Auto-start; the subscription is replayed once connected.
                self.start().await?;
            }
            // Connect in progress: resubscription covers it.
            _ => {}
        }
        Ok(())
    }

    pub async fn unsubscribe_from_point(&self, point: &str) -> Result<()> {
        {
            let mut guard = self.inner.lock().await;
            guard.subscriptions.remove(point);
        }
        if self.connection_state().await == ConnectionState::Connected {
            self.invoke("UnsubscribeFromPoint", point).await;
        }
        Ok(())
    }

    /// Sends a hub command; a missing or broken link surfaces on the error
    /// callback only.
    async fn invoke(&self, command: &str, point: &str) {
        let (sender, callbacks) = {
            let guard = self.inner.lock().await;
            (guard.outgoing.clone(), guard.callbacks.clone())
        };
        let frame = json!({ "type": command, "pointId": point }).to_string();
        let failure = match sender {
            Some(sender) => sender.send(frame).await.err().map(|_| "link closed".to_string()),
            None => Some("not connected".to_string()),
        };
        if let Some(reason) = failure {
            warn!("{command} for {point} failed: {reason}");
            emit_error(
                &callbacks,
                PushError::Invoke {
                    command: command.to_string(),
                    reason,
                },
            );
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based): exponential from
    /// the base delay, doubling, capped at the max delay.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(factor as u32);
        delay.min(self.max_delay)
    }

    /// Connection supervisor: initial connect, frame pump and the capped
    /// reconnect loop all live here. Only the supervisor whose epoch is
    /// current may touch the shared state; a stale one exits silently.
    async fn run(&self, epoch: u64) {
        let mut initial = true;
        loop {
            if initial {
                if !self.transition_if(epoch, ConnectionState::Connecting).await {
                    return;
                }
            } else {
                let give_up = {
                    let mut guard = self.inner.lock().await;
                    if guard.epoch != epoch {
                        return;
                    }
                    guard.reconnect_attempts += 1;
                    guard.reconnect_attempts > self.max_reconnect_attempts
                };
                if give_up {
                    error!(
                        "push connection gave up after {} reconnect attempts",
                        self.max_reconnect_attempts
                    );
                    let callbacks = self.inner.lock().await.callbacks.clone();
                    emit_error(
                        &callbacks,
                        PushError::ReconnectExhausted {
                            attempts: self.max_reconnect_attempts,
                        },
                    );
                    self.transition_if(epoch, ConnectionState::Disconnected).await;
                    return;
                }
                let attempt = self.inner.lock().await.reconnect_attempts;
                if !self.transition_if(epoch, ConnectionState::Reconnecting).await {
                    return;
                }
                tokio::time::sleep(self.backoff_delay(attempt)).await;
                if self.is_stale(epoch).await {
                    return;
                }
            }

            match self.transport.connect(&self.hub_url).await {
                Ok(link) => {
                    let TransportLink { incoming, outgoing } = link;
                    {
                        let mut guard = self.inner.lock().await;
                        if guard.epoch != epoch {
                            // A stop or restart won the race while this
                            // connect was in flight; dropping `outgoing`
                            // closes the fresh link.
                            return;
                        }
                        guard.outgoing = Some(outgoing);
                        guard.reconnect_attempts = 0;
                    }
                    self.transition_if(epoch, ConnectionState::Connected).await;
                    info!("push connection established to {}", self.hub_url);
                    self.resubscribe().await;

                    self.pump(incoming).await;

                    {
                        let mut guard = self.inner.lock().await;
                        if guard.epoch != epoch {
                            // Requested close; `stop` already settled state.
                            info!("push connection closed by request");
                            return;
                        }
                        guard.outgoing = None;
                    }
                    warn!("push connection lost, scheduling reconnect");
                    initial = false;
                }
                Err(err) => {
                    if self.is_stale(epoch).await {
                        return;
                    }
                    let callbacks = self.inner.lock().await.callbacks.clone();
                    emit_error(&callbacks, err);
                    initial = false;
                }
            }
        }
    }

    /// Reads frames until the link closes, dispatching normalized events.
    async fn pump(&self, mut incoming: mpsc::Receiver<String>) {
        while let Some(text) = incoming.recv().await {
            let callbacks = self.inner.lock().await.callbacks.clone();
            match wire::decode_frame(&text) {
                Ok(event) => dispatch(&callbacks, event),
                Err(err) => warn!("dropping push frame: {err}"),
            }
        }
    }

    async fn resubscribe(&self) {
        let points: Vec<String> = {
            let guard = self.inner.lock().await;
            guard.subscriptions.iter().cloned().collect()
        };
        for point in points {
            self.invoke("SubscribeToPoint", &point).await;
        }
    }

    /// State transition gated on the epoch; returns whether the caller is
    /// still the current supervisor.
    async fn transition_if(&self, epoch: u64, state: ConnectionState) -> bool {
        let callbacks = {
            let mut guard = self.inner.lock().await;
            if guard.epoch != epoch {
                return false;
            }
            if guard.state == state {
                return true;
            }
            guard.state = state;
            guard.callbacks.clone()
        };
        emit_connection_change(&callbacks, state);
        true
    }

    async fn is_stale(&self, epoch: u64) -> bool {
        self.inner.lock().await.epoch != epoch
    }
}

/// Runs handlers outside any lock; a panicking handler is contained so the
/// dispatch loop keeps serving other events.
fn dispatch(callbacks: &PushCallbacks, event: PushEvent) {
    if let PushEvent::Reading(reading) = &event {
        if let Some(on_reading) = &callbacks.on_reading {
            let reading = reading.clone();
            if catch_unwind(AssertUnwindSafe(|| on_reading(reading))).is_err() {
                error!("reading handler panicked");
            }
        }
    }
    if let Some(on_event) = &callbacks.on_event {
        if catch_unwind(AssertUnwindSafe(|| on_event(event))).is_err() {
            error!("event handler panicked");
        }
    }
}

fn emit_connection_change(callbacks: &PushCallbacks, state: ConnectionState) {
    if let Some(on_change) = &callbacks.on_connection_change {
        on_change(state);
    }
}

fn emit_error(callbacks: &PushCallbacks, err: PushError) {
    if let Some(on_error) = &callbacks.on_error {
        on_error(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::transport::ConnectFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{advance, Duration};

    /// Per-connection script: refuse, hand out a working link, or hand one
    /// out only after a delay (a connect still in flight).
    enum Script {
        Refuse,
        Accept,
        AcceptAfter(Duration),
    }

    struct FakeTransport {
        scripts: StdMutex<VecDeque<Script>>,
        connects: StdMutex<u32>,
        sent: Arc<StdMutex<Vec<String>>>,
        /// Frame injectors for accepted links, in connection order.
        frame_senders: StdMutex<Vec<mpsc::Sender<String>>>,
        /// Links whose client-side sender is still alive.
        live_links: Arc<StdMutex<i32>>,
    }

    impl FakeTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(scripts.into()),
                connects: StdMutex::new(0),
                sent: Arc::new(StdMutex::new(Vec::new())),
                frame_senders: StdMutex::new(Vec::new()),
                live_links: Arc::new(StdMutex::new(0)),
            })
        }

        fn connect_count(&self) -> u32 {
            *self.connects.lock().unwrap()
        }

        fn live_link_count(&self) -> i32 {
            *self.live_links.lock().unwrap()
        }

        fn sent_commands(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn close_link(&self, index: usize) {
            let mut senders = self.frame_senders.lock().unwrap();
            if index < senders.len() {
                senders.remove(index);
            }
        }

        fn build_link(&self) -> TransportLink {
            let (incoming_tx, incoming_rx) = mpsc::channel::<String>(16);
            let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(16);
            let (frame_tx, mut frame_rx) = mpsc::channel::<String>(16);
            self.frame_senders.lock().unwrap().push(frame_tx);
            let sent = Arc::clone(&self.sent);
            let live = Arc::clone(&self.live_links);
            *live.lock().unwrap() += 1;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        command = outgoing_rx.recv() => match command {
                            Some(text) => sent.lock().unwrap().push(text),
                            None => break,
                        },
                        frame = frame_rx.recv() => match frame {
                            Some(text) => {
                                if incoming_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                *live.lock().unwrap() -= 1;
            });
            TransportLink {
                incoming: incoming_rx,
                outgoing: outgoing_tx,
            }
        }
    }

    impl Transport for FakeTransport {
        fn connect(&self, _url: &str) -> ConnectFuture {
            *self.connects.lock().unwrap() += 1;
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Refuse);
            match script {
                Script::Refuse => {
                    Box::pin(async { Err(PushError::Connect("refused".into())) })
                }
                Script::Accept => {
                    let link = self.build_link();
                    Box::pin(async move { Ok(link) })
                }
                Script::AcceptAfter(delay) => {
                    let link = self.build_link();
                    Box::pin(async move {
                        tokio::time::sleep(delay).await;
                        Ok(link)
                    })
                }
            }
        }
    }

    fn client_with(transport: Arc<FakeTransport>) -> PushClient {
        PushClient::new(
            transport,
            "ws://test/hub",
            5,
            Duration::from_millis(1_000),
            Duration::from_millis(30_000),
        )
    }

    async fn settle() {
        // Let spawned tasks run and timers fire under paused time.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        advance(Duration::from_millis(31_000)).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let transport = FakeTransport::new(vec![]);
        let client = client_with(transport);
        assert_eq!(client.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(client.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(client.backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(client.backoff_delay(5), Duration::from_millis(16_000));
        assert_eq!(client.backoff_delay(6), Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_cap_reports_terminal_error_once() {
        let transport = FakeTransport::new(vec![]);
        let client = client_with(Arc::clone(&transport));

        let errors: Arc<StdMutex<Vec<PushError>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        client
            .set_callbacks(PushCallbacks {
                on_error: Some(Arc::new(move |err| sink.lock().unwrap().push(err))),
                ..Default::default()
            })
            .await;

        client.start().await.unwrap();
        for _ in 0..10 {
            settle().await;
        }

        // one initial attempt plus five reconnects, then nothing
        assert_eq!(transport.connect_count(), 6);
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);

        let errors = errors.lock().unwrap();
        let exhausted = errors
            .iter()
            .filter(|err| matches!(err, PushError::ReconnectExhausted { attempts: 5 }))
            .count();
        assert_eq!(exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_suppresses_reconnection() {
        let transport = FakeTransport::new(vec![Script::Accept]);
        let client = client_with(Arc::clone(&transport));

        client.start().await.unwrap();
        settle().await;
        assert_eq!(client.connection_state().await, ConnectionState::Connected);

        client.stop().await.unwrap();
        settle().await;

        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_close_reconnects_and_resubscribes() {
        let transport = FakeTransport::new(vec![Script::Accept, Script::Accept]);
        let client = client_with(Arc::clone(&transport));

        client.subscribe_to_point("Punto 1").await.unwrap();
        settle().await;
        assert_eq!(client.connection_state().await, ConnectionState::Connected);

        transport.close_link(0);
        settle().await;

        assert_eq!(client.connection_state().await, ConnectionState::Connected);
        assert_eq!(transport.connect_count(), 2);

        let subscribes = transport
            .sent_commands()
            .iter()
            .filter(|frame| frame.contains("SubscribeToPoint") && frame.contains("Punto 1"))
            .count();
        assert_eq!(subscribes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_connect_never_leaks_a_second_link() {
        let transport = FakeTransport::new(vec![
            Script::AcceptAfter(Duration::from_millis(500)),
            Script::Accept,
        ]);
        let client = client_with(Arc::clone(&transport));

        client.start().await.unwrap();
        // let the supervisor reach the in-flight connect without resolving it
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.connection_state().await, ConnectionState::Connecting);

        client.stop().await.unwrap();
        client.start().await.unwrap();
        settle().await;

        assert_eq!(client.connection_state().await, ConnectionState::Connected);
        assert_eq!(transport.connect_count(), 2);
        // the connect that resolved after the stop was discarded, not kept
        // as a duplicate live connection
        assert_eq!(transport.live_link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_restart_after_stop_reconnects() {
        let transport = FakeTransport::new(vec![Script::Accept, Script::Accept]);
        let client = client_with(Arc::clone(&transport));

        client.start().await.unwrap();
        settle().await;
        assert_eq!(client.connection_state().await, ConnectionState::Connected);

        // back to back, with no scheduler turns in between: the restart must
        // not be swallowed while the previous close settles
        client.stop().await.unwrap();
        client.start().await.unwrap();
        settle().await;

        assert_eq!(client.connection_state().await, ConnectionState::Connected);
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.live_link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_when_connected() {
        let transport = FakeTransport::new(vec![Script::Accept]);
        let client = client_with(Arc::clone(&transport));

        client.start().await.unwrap();
        settle().await;
        client.start().await.unwrap();
        settle().await;

        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_callbacks_merges_instead_of_replacing() {
        let transport = FakeTransport::new(vec![Script::Accept]);
        let client = client_with(Arc::clone(&transport));

        let states: Arc<StdMutex<Vec<ConnectionState>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        client
            .set_callbacks(PushCallbacks {
                on_connection_change: Some(Arc::new(move |state| {
                    sink.lock().unwrap().push(state)
                })),
                ..Default::default()
            })
            .await;
        // A later partial update must not clear the state handler.
        client
            .set_callbacks(PushCallbacks {
                on_error: Some(Arc::new(|_| {})),
                ..Default::default()
            })
            .await;

        client.start().await.unwrap();
        settle().await;

        let states = states.lock().unwrap();
        assert!(states.contains(&ConnectionState::Connecting));
        assert!(states.contains(&ConnectionState::Connected));
    }
}
