//! Connection manager: the reconnect/heartbeat state machine
//!
//! One `ConnectionManager` owns the only connection handle, the backoff
//! value and both timers. Lifecycle events, heartbeat ticks and reconnect
//! deadlines are processed one at a time by whoever drives [`step`], so no
//! state is ever shared.
//!
//! [`step`]: ConnectionManager::step

use std::future::Future;
use std::time::Duration;

use ::backoff::backoff::Backoff;
use ::backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::backoff::reconnect_backoff;
use super::heartbeat::HeartbeatScheduler;
use super::state::{ConnectionState, LinkEnvelope, LinkEvent, LinkId, Payload};
use super::timer::Deadline;
use super::transport::{Dialer, LinkHandle};
use crate::config::EndpointSettings;
use crate::error::Result;
use crate::protocol::{endpoint_url, OutboundMessage};

/// Capacity of the link-to-manager event channel
const EVENT_QUEUE_SIZE: usize = 64;

/// How long shutdown waits for the close frame to be written
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// What a single [`ConnectionManager::step`] processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A link event was handled (or dropped as stale)
    Event(LinkEnvelope),
    /// The reconnect deadline elapsed
    Reconnect,
    /// A heartbeat tick; `sent` is false when the tick was skipped
    Heartbeat { sent: bool },
}

/// Owns the single connection and drives its lifecycle
pub struct ConnectionManager<D: Dialer> {
    endpoint: EndpointSettings,
    dialer: D,
    state: ConnectionState,
    link: Option<LinkHandle>,
    next_link_id: LinkId,
    user_id: Option<String>,
    backoff: ExponentialBackoff,
    reconnect: Deadline,
    reconnect_attempts: u32,
    heartbeat: HeartbeatScheduler,
    events_tx: mpsc::Sender<LinkEnvelope>,
    events_rx: mpsc::Receiver<LinkEnvelope>,
    closing: Option<JoinHandle<()>>,
}

impl<D: Dialer> ConnectionManager<D> {
    pub fn new(endpoint: EndpointSettings, dialer: D) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        Self {
            endpoint,
            dialer,
            state: ConnectionState::Disconnected,
            link: None,
            next_link_id: 0,
            user_id: None,
            backoff: reconnect_backoff(),
            reconnect: Deadline::new(),
            reconnect_attempts: 0,
            heartbeat: HeartbeatScheduler::default(),
            events_tx,
            events_rx,
            closing: None,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Id of the owned connection, if any
    pub fn link_id(&self) -> Option<LinkId> {
        self.link.as_ref().map(LinkHandle::id)
    }

    // ─────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────

    /// Start connecting as `user_id`.
    ///
    /// Does nothing when a connection is already owned or after shutdown.
    /// Returns as soon as the dial is started.
    pub fn connect(&mut self, user_id: &str) -> Result<()> {
        if self.state == ConnectionState::ShuttingDown {
            debug!("Connect ignored, shutting down");
            return Ok(());
        }
        if let Some(link) = &self.link {
            debug!(link = link.id(), state = %self.state, "Connect ignored, connection already active");
            return Ok(());
        }

        let url = endpoint_url(&self.endpoint.url, user_id, &self.endpoint.version)?;
        if self.user_id.is_none() {
            self.user_id = Some(user_id.to_string());
        }

        self.reconnect.cancel();
        self.next_link_id += 1;
        let id = self.next_link_id;
        self.link = Some(self.dialer.dial(id, &url, self.events_tx.clone()));
        self.state = ConnectionState::Connecting;

        info!(link = id, url = %redact(&url), "Connecting");
        Ok(())
    }

    /// Deliberately close the connection and stop all timers.
    ///
    /// Terminal: later events, ticks and reconnect deadlines are ignored.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::ShuttingDown;
        self.reconnect.cancel();
        self.heartbeat.stop();

        if let Some(link) = self.link.take() {
            info!(link = link.id(), "Closing connection");
            self.closing = link.close();
        }
    }

    /// React to one event from a connection
    pub fn handle_event(&mut self, envelope: LinkEnvelope) {
        if self.link_id() != Some(envelope.link) {
            trace!(link = envelope.link, event = ?envelope.event, "Dropping event from released connection");
            return;
        }

        match envelope.event {
            LinkEvent::Opened => self.on_open(envelope.link),
            LinkEvent::Message(payload) => on_message(envelope.link, payload),
            LinkEvent::Error(message) => {
                // Recovery is driven by the close that follows
                error!(link = envelope.link, error = %message, "WebSocket error");
            }
            LinkEvent::Closed { reason } => self.on_close(envelope.link, reason),
        }
    }

    fn on_open(&mut self, link: LinkId) {
        self.state = ConnectionState::Open;
        self.backoff.reset();
        self.reconnect_attempts = 0;
        self.heartbeat.start();
        info!(link, "WebSocket connected");
    }

    fn on_close(&mut self, link: LinkId, reason: Option<String>) {
        self.heartbeat.stop();
        self.link = None;

        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval);
        self.reconnect.arm(delay);
        self.reconnect_attempts += 1;
        self.state = ConnectionState::ClosedPendingRetry;

        warn!(
            link,
            reason = reason.as_deref().unwrap_or("none"),
            delay_ms = delay.as_millis() as u64,
            attempt = self.reconnect_attempts,
            "WebSocket disconnected. Reconnecting..."
        );
    }

    /// Heartbeat tick: send a ping only if the connection is open.
    ///
    /// Returns whether a ping was queued. A tick that lands after the
    /// connection went away is skipped without error.
    pub fn on_heartbeat_tick(&mut self) -> bool {
        let link = match (&self.link, self.state) {
            (Some(link), ConnectionState::Open) => link,
            _ => {
                trace!(state = %self.state, "Heartbeat skipped, connection not open");
                return false;
            }
        };

        let ping = match OutboundMessage::Ping.to_json() {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "Heartbeat not encoded");
                return false;
            }
        };

        match link.send_text(ping) {
            Ok(()) => {
                debug!(link = link.id(), "Sent heartbeat");
                true
            }
            Err(e) => {
                debug!(link = link.id(), error = %e, "Heartbeat dropped");
                false
            }
        }
    }

    /// The reconnect deadline elapsed
    pub fn on_reconnect_due(&mut self) {
        if self.state != ConnectionState::ClosedPendingRetry {
            return;
        }
        let Some(user_id) = self.user_id.clone() else {
            return;
        };
        if let Err(e) = self.connect(&user_id) {
            // The endpoint cannot change between attempts, so this only
            // happens if the first connect already failed the same way
            error!(error = %e.format_for_log(), "Reconnect failed");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────

    /// Wait for and process the next event, tick or deadline.
    ///
    /// Link events win over timers that become ready at the same instant,
    /// so a close is always processed before a heartbeat racing with it.
    pub async fn step(&mut self) -> Step {
        tokio::select! {
            biased;

            Some(envelope) = self.events_rx.recv() => {
                self.handle_event(envelope.clone());
                Step::Event(envelope)
            }

            _ = self.reconnect.fired() => {
                self.on_reconnect_due();
                Step::Reconnect
            }

            _ = self.heartbeat.tick() => {
                let sent = self.on_heartbeat_tick();
                Step::Heartbeat { sent }
            }
        }
    }

    /// Connect as `user_id` and keep the connection alive until `shutdown`
    /// resolves, then disconnect.
    pub async fn run<F>(&mut self, user_id: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.connect(user_id)?;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested. Disconnecting...");
                    break;
                }

                step = self.step() => {
                    trace!(?step, state = %self.state, "Step processed");
                }
            }
        }

        self.disconnect();
        if let Some(task) = self.closing.take() {
            if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                debug!("Close frame not confirmed before exit");
            }
        }
        debug!(state = %self.state(), "Connection manager stopped");

        Ok(())
    }
}

#[cfg(test)]
impl<D: Dialer> ConnectionManager<D> {
    /// Delay the next scheduled reconnect will use
    pub fn backoff_delay(&self) -> Duration {
        self.backoff.current_interval
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.is_active()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_armed()
    }

    /// Consecutive reconnects scheduled since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }
}

fn on_message(link: LinkId, payload: Payload) {
    match payload {
        Payload::Text(text) => info!(link, message = %text, "Received message"),
        Payload::Binary(data) => info!(link, bytes = data.len(), "Received binary message"),
    }
}

/// The URL without its query, which carries the user id
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::backoff::{RECONNECT_CEILING, RECONNECT_FLOOR};
    use crate::connection::heartbeat::HEARTBEAT_INTERVAL;
    use crate::connection::testing::ScriptedDialer;
    use crate::connection::transport::LinkCommand;
    use tokio::sync::oneshot;
    use tokio::time::{advance, timeout, Instant};

    const PING: &str = r#"{"type":"PING"}"#;

    fn manager() -> ConnectionManager<ScriptedDialer> {
        ConnectionManager::new(EndpointSettings::default(), ScriptedDialer::default())
    }

    async fn emit(manager: &mut ConnectionManager<ScriptedDialer>, link: LinkId, event: LinkEvent) {
        manager.dialer().emit(link, event).await;
        assert!(matches!(manager.step().await, Step::Event(_)));
    }

    fn closed() -> LinkEvent {
        LinkEvent::Closed { reason: None }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_builds_target_from_user_id() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();

        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(
            manager.dialer().dialed_urls(),
            vec!["wss://secure.ws.teneo.pro/websocket?userId=abc123&version=v0.2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_while_connection_owned() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        manager.connect("abc123").unwrap();
        assert_eq!(manager.dialer().dial_count(), 1);

        emit(&mut manager, 1, LinkEvent::Opened).await;
        let started = Instant::now();
        manager.connect("abc123").unwrap();
        assert_eq!(manager.dialer().dial_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Open);

        // Still exactly one heartbeat timer: one ping per period
        assert_eq!(manager.step().await, Step::Heartbeat { sent: true });
        assert_eq!(started.elapsed(), HEARTBEAT_INTERVAL);
        assert_eq!(manager.dialer().sent(1), vec![PING.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_resets_backoff_and_starts_heartbeat() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        for link in 1..=4 {
            emit(&mut manager, link, closed()).await;
            assert_eq!(manager.step().await, Step::Reconnect);
        }
        assert_eq!(manager.backoff_delay(), Duration::from_millis(16_000));
        assert_eq!(manager.reconnect_attempts(), 4);

        emit(&mut manager, 5, LinkEvent::Opened).await;
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.backoff_delay(), RECONNECT_FLOOR);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(manager.heartbeat_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_closes_follow_doubling_schedule() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, LinkEvent::Opened).await;

        let mut observed = Vec::new();
        for link in 1..=3 {
            emit(&mut manager, link, closed()).await;
            assert_eq!(manager.state(), ConnectionState::ClosedPendingRetry);
            assert!(manager.link_id().is_none());

            let closed_at = Instant::now();
            assert_eq!(manager.step().await, Step::Reconnect);
            observed.push(closed_at.elapsed().as_millis());
            assert_eq!(manager.state(), ConnectionState::Connecting);
        }

        assert_eq!(observed, vec![1_000, 2_000, 4_000]);
        assert_eq!(manager.dialer().dial_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_capped_at_ceiling() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();

        for link in 1..=8 {
            emit(&mut manager, link, closed()).await;
            let expected = (RECONNECT_FLOOR * 2u32.pow(link as u32 - 1)).min(RECONNECT_CEILING);
            let closed_at = Instant::now();
            assert_eq!(manager.step().await, Step::Reconnect);
            assert_eq!(closed_at.elapsed(), expected, "reconnect #{}", link);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_on_close() {
        let mut manager = manager();
        let start = Instant::now();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, LinkEvent::Opened).await;

        assert_eq!(manager.step().await, Step::Heartbeat { sent: true });
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        advance(Duration::from_millis(500)).await;
        emit(&mut manager, 1, closed()).await;
        assert!(!manager.heartbeat_active());

        // The next thing to happen is the reconnect at 10.5s + 1s
        assert_eq!(manager.step().await, Step::Reconnect);
        assert_eq!(start.elapsed(), Duration::from_millis(11_500));

        // Link 2 never opens, so nothing fires at 20s or later
        assert!(timeout(Duration::from_secs(30), manager.step()).await.is_err());
        assert_eq!(manager.dialer().sent(1), vec![PING.to_string()]);
        assert!(manager.dialer().sent(2).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wins_over_simultaneous_tick() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, LinkEvent::Opened).await;

        // Tick is due and the close is queued at the same instant
        advance(HEARTBEAT_INTERVAL).await;
        manager.dialer().emit(1, closed()).await;

        assert!(matches!(manager.step().await, Step::Event(_)));
        assert_eq!(manager.step().await, Step::Reconnect);
        assert!(manager.dialer().sent(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_is_skipped() {
        let mut manager = manager();
        assert!(!manager.on_heartbeat_tick());

        manager.connect("abc123").unwrap();
        assert!(!manager.on_heartbeat_tick(), "connecting is not open");

        emit(&mut manager, 1, LinkEvent::Opened).await;
        emit(&mut manager, 1, closed()).await;
        assert!(!manager.on_heartbeat_tick());
        assert!(manager.dialer().sent(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_alone_does_not_schedule_reconnect() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, LinkEvent::Opened).await;
        emit(&mut manager, 1, LinkEvent::Error("connection reset".into())).await;

        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(!manager.reconnect_pending());
        assert_eq!(manager.link_id(), Some(1));

        // Error followed by close schedules exactly one reconnect
        emit(&mut manager, 1, closed()).await;
        assert!(manager.reconnect_pending());
        assert_eq!(manager.backoff_delay(), Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_do_not_change_state() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, LinkEvent::Opened).await;
        emit(&mut manager, 1, LinkEvent::Message(Payload::Text("hello".into()))).await;
        emit(&mut manager, 1, LinkEvent::Message(Payload::Binary(vec![1, 2, 3]))).await;

        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(manager.dialer().sent(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_close_is_ignored() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, closed()).await;
        assert_eq!(manager.step().await, Step::Reconnect);
        emit(&mut manager, 2, LinkEvent::Opened).await;

        // A duplicate close from the released link must not schedule anything
        emit(&mut manager, 1, closed()).await;
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(!manager.reconnect_pending());
        assert_eq!(manager.link_id(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_everything() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, LinkEvent::Opened).await;

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::ShuttingDown);
        assert!(manager.link_id().is_none());
        assert!(!manager.heartbeat_active());
        assert!(!manager.reconnect_pending());
        assert_eq!(manager.dialer().commands(1).last(), Some(&LinkCommand::Close));

        // The transport's trailing close is stale and nothing is rescheduled
        emit(&mut manager, 1, closed()).await;
        assert!(timeout(Duration::from_secs(120), manager.step()).await.is_err());
        assert_eq!(manager.dialer().dial_count(), 1);

        manager.connect("abc123").unwrap();
        assert_eq!(manager.dialer().dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_reconnect_pending() {
        let mut manager = manager();
        manager.connect("abc123").unwrap();
        emit(&mut manager, 1, closed()).await;
        assert!(manager.reconnect_pending());

        manager.disconnect();
        assert!(!manager.reconnect_pending());
        manager.on_reconnect_due();
        assert_eq!(manager.dialer().dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let mut manager = manager();
        let dialer = manager.dialer().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let driver = async {
            tokio::task::yield_now().await;
            dialer.emit(1, LinkEvent::Opened).await;
            tokio::time::sleep(Duration::from_secs(15)).await;
            let _ = stop_tx.send(());
        };
        let run = manager.run("abc123", async {
            let _ = stop_rx.await;
        });

        let (result, ()) = tokio::join!(run, driver);
        assert!(result.is_ok());

        assert_eq!(manager.state(), ConnectionState::ShuttingDown);
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(
            dialer.commands(1),
            vec![LinkCommand::Send(PING.to_string()), LinkCommand::Close]
        );
        assert!(!manager.heartbeat_active());
        assert!(!manager.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_endpoint_fails_connect() {
        let endpoint = EndpointSettings {
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        let mut manager = ConnectionManager::new(endpoint, ScriptedDialer::default());
        assert!(manager.connect("abc123").is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.dialer().dial_count(), 0);
    }

    #[test]
    fn test_redact_hides_user_id() {
        let url = endpoint_url("wss://secure.ws.teneo.pro", "secret", "v0.2").unwrap();
        assert_eq!(redact(&url), "wss://secure.ws.teneo.pro/websocket");
    }
}
