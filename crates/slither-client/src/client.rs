//! [`GameClient`]: one object per game connection that owns the session,
//! the world reconciler and the tick scheduler.
//!
//! The owner calls [`GameClient::frame`] once per frame. A frame drains the
//! network events, handles joins and disconnects, fires due reconnects, then
//! lets the scheduler decide whether to send the steering direction and
//! whether to reconcile the latest buffered snapshot into render operations.

use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use slither_config::{Config, NetworkConfig, TransportKind};
use slither_net::{
    BlockingConfig, ClientMessage, ConnectionState, DisconnectReason, EventedConfig, GameEvent,
    GameEventKind, Message, ReconnectConfig, ReconnectState, SessionError, SessionListener,
    SessionManager,
};
use slither_world::{
    EffectNames, JoinInfo, Operation, RankingEntry, WorldModel, WorldReconciler, leaderboard,
};

use crate::input::{MonotonicClock, MovementSource};
use crate::scheduler::TickScheduler;
use crate::status::status_text;

/// Receives everything the client wants drawn or shown.
pub trait RenderSink {
    /// Apply operations in order.
    fn apply(&mut self, ops: &[Operation]);

    /// A line of status text for the player.
    fn status(&mut self, _text: &str) {}

    fn connection_changed(&mut self, _state: ConnectionState) {}
}

/// Errors returned by [`GameClient`] and [`build_session`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("username must not be empty")]
    EmptyUsername,

    #[error("the evented transport needs a tokio runtime")]
    MissingRuntime,

    #[error(transparent)]
    Session(#[from] SessionError),
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Client tuning, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Seconds between direction sends.
    pub movement_interval: f64,
    /// Seconds between reconciliation passes.
    pub update_interval: f64,
    pub effect_names: EffectNames,
    /// Invisibility decay used when the join payload gives none.
    pub default_decay: f64,
    /// `None` disables automatic reconnection.
    pub reconnect: Option<ReconnectConfig>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            movement_interval: 0.1,
            update_interval: 1.0 / 30.0,
            effect_names: EffectNames::default(),
            default_decay: 1.5,
            reconnect: None,
        }
    }
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        let effects = &config.effects;
        let network = &config.network;
        let reconnect = network.auto_reconnect.then(|| ReconnectConfig {
            initial_delay: Duration::from_millis(network.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(network.reconnect_max_delay_ms),
            max_attempts: network.reconnect_max_attempts,
            ..Default::default()
        });
        Self {
            movement_interval: config.session.movement_interval_s,
            update_interval: config.session.update_interval_s,
            effect_names: EffectNames {
                reveal: effects.reveal.clone(),
                invisibility: effects.invisibility.clone(),
                invulnerable: effects.invulnerable.clone(),
                shielded: effects.shielded.clone(),
            },
            default_decay: effects.default_decay,
            reconnect,
        }
    }
}

/// Build the session for the configured transport. The evented transport
/// runs on `runtime`, which must outlive the session.
pub fn build_session(
    network: &NetworkConfig,
    runtime: Option<Handle>,
) -> Result<SessionManager, ClientError> {
    let connect_timeout = Duration::from_millis(network.connect_timeout_ms);
    match network.transport {
        TransportKind::Blocking => Ok(SessionManager::blocking(BlockingConfig {
            connect_timeout: Some(connect_timeout),
            retry_sleep: Duration::from_millis(network.read_retry_ms),
            write_timeout: Duration::from_millis(network.write_timeout_ms.max(1)),
            ..Default::default()
        })),
        TransportKind::Evented => {
            let runtime = runtime.ok_or(ClientError::MissingRuntime)?;
            Ok(SessionManager::evented(
                runtime,
                EventedConfig {
                    connect_timeout,
                    ..Default::default()
                },
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Session output collected during one poll, in arrival order.
enum Inbound {
    Connected,
    Disconnected(DisconnectReason),
    Event(GameEvent),
    State(Message),
}

#[derive(Default)]
struct Inbox(Vec<Inbound>);

impl SessionListener for Inbox {
    fn on_connected(&mut self) {
        self.0.push(Inbound::Connected);
    }

    fn on_disconnected(&mut self, reason: &DisconnectReason) {
        self.0.push(Inbound::Disconnected(reason.clone()));
    }

    fn on_game_event(&mut self, event: GameEvent) {
        self.0.push(Inbound::Event(event));
    }

    fn on_game_state(&mut self, snapshot: Message) {
        self.0.push(Inbound::State(snapshot));
    }
}

// ---------------------------------------------------------------------------
// GameClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Login {
    host: String,
    port: u16,
    username: String,
}

/// Session, world and scheduler for one player.
pub struct GameClient<C, M> {
    session: SessionManager,
    reconciler: WorldReconciler,
    scheduler: TickScheduler,
    settings: ClientSettings,
    clock: C,
    movement: M,
    login: Option<Login>,
    reconnect: Option<ReconnectState>,
    /// Newest `game_state` not yet reconciled.
    latest: Option<Message>,
    inbox: Inbox,
    reported_state: ConnectionState,
}

impl<C: MonotonicClock, M: MovementSource> GameClient<C, M> {
    pub fn new(session: SessionManager, settings: ClientSettings, clock: C, movement: M) -> Self {
        let reconciler =
            WorldReconciler::new(settings.effect_names.clone(), settings.default_decay);
        let reconnect = settings.reconnect.clone().map(ReconnectState::new);
        Self {
            session,
            reconciler,
            scheduler: TickScheduler::new(),
            settings,
            clock,
            movement,
            login: None,
            reconnect,
            latest: None,
            inbox: Inbox::default(),
            reported_state: ConnectionState::Disconnected,
        }
    }

    /// Connect and log in as `username` once the connection is up.
    pub fn login(&mut self, host: &str, port: u16, username: &str) -> Result<(), ClientError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::EmptyUsername);
        }
        if let Some(reconnect) = &mut self.reconnect {
            reconnect.reset();
        }
        self.login = Some(Login {
            host: host.to_string(),
            port,
            username: username.to_string(),
        });
        self.session.connect(host, port)?;
        Ok(())
    }

    /// Close the connection without reconnecting.
    pub fn disconnect(&mut self) {
        if let Some(reconnect) = &mut self.reconnect {
            reconnect.reset();
        }
        self.session.disconnect();
    }

    /// Run one frame against `sink`.
    pub fn frame(&mut self, sink: &mut dyn RenderSink) {
        let now = self.clock.now();

        self.session.poll(&mut self.inbox);
        let inbound = std::mem::take(&mut self.inbox.0);
        for item in inbound {
            match item {
                Inbound::Connected => self.on_connected(),
                Inbound::Disconnected(reason) => self.on_disconnected(&reason, now, sink),
                Inbound::Event(event) => self.on_game_event(event, sink),
                Inbound::State(snapshot) => self.latest = Some(snapshot),
            }
        }

        self.retry_if_due(now);

        let due = self.scheduler.tick(now, self.movement.direction());
        if let Some(direction) = due.direction {
            let message = ClientMessage::Direction {
                direction: direction.to_array(),
            };
            if let Err(e) = self.session.send_client(&message) {
                debug!(error = %e, "Direction not sent");
            }
        }
        if due.reconcile
            && let Some(snapshot) = self.latest.take()
        {
            let ops = self.reconciler.apply_message(&snapshot);
            if !ops.is_empty() {
                sink.apply(&ops);
            }
        }

        let state = self.session.state();
        if state != self.reported_state {
            self.reported_state = state;
            sink.connection_changed(state);
        }
    }

    fn on_connected(&mut self) {
        if let Some(reconnect) = &mut self.reconnect {
            reconnect.reset();
        }
        let Some(login) = &self.login else {
            return;
        };
        let message = ClientMessage::Username {
            username: login.username.clone(),
        };
        match self.session.send_client(&message) {
            Ok(()) => info!(username = %login.username, "Sent login"),
            Err(e) => warn!(error = %e, "Failed to send login"),
        }
    }

    fn on_disconnected(&mut self, reason: &DisconnectReason, now: f64, sink: &mut dyn RenderSink) {
        self.scheduler.stop();
        self.latest = None;
        let ops = self.reconciler.reset();
        if !ops.is_empty() {
            sink.apply(&ops);
        }
        sink.status(&format!("Disconnected: {reason}"));

        if reason.is_local() || self.login.is_none() {
            return;
        }
        let Some(reconnect) = &mut self.reconnect else {
            return;
        };
        match reconnect.schedule(now) {
            Some(delay) => info!(
                attempt = reconnect.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            ),
            None => {
                warn!(attempts = reconnect.attempts(), "Giving up reconnecting");
                sink.status("Could not reconnect");
            }
        }
    }

    fn on_game_event(&mut self, event: GameEvent, sink: &mut dyn RenderSink) {
        debug!(event = event.kind.as_str(), "Game event");
        if event.kind == GameEventKind::JoinGame {
            match JoinInfo::from_content(&event.content) {
                Ok(info) => {
                    if self.reconciler.join(info) {
                        self.scheduler
                            .start(self.settings.movement_interval, self.settings.update_interval);
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed join_game"),
            }
        }
        sink.status(&status_text(&event));
    }

    fn retry_if_due(&mut self, now: f64) {
        let (Some(reconnect), Some(login)) = (&mut self.reconnect, &self.login) else {
            return;
        };
        if !reconnect.is_due(now) {
            return;
        }
        reconnect.begin_attempt();
        info!(attempt = reconnect.attempts(), host = %login.host, "Reconnecting");
        // A failed attempt arrives as `Disconnected`, which arms the next one.
        if let Err(e) = self.session.connect(&login.host, login.port) {
            warn!(error = %e, "Reconnect attempt failed");
        }
    }

    // --- Commands ---

    pub fn quit_game(&mut self) -> Result<(), SessionError> {
        self.session.send_client(&ClientMessage::QuitGame)
    }

    pub fn reborn(&mut self) -> Result<(), SessionError> {
        self.session.send_client(&ClientMessage::Reborn)
    }

    pub fn pause_game(&mut self) -> Result<(), SessionError> {
        self.session.send_client(&ClientMessage::PauseGame)
    }

    pub fn change_color(&mut self) -> Result<(), SessionError> {
        self.session.send_client(&ClientMessage::ChangeColor)
    }

    // --- Accessors ---

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn world(&self) -> &WorldModel {
        self.reconciler.world()
    }

    pub fn leaderboard(&self) -> Vec<RankingEntry> {
        leaderboard(self.reconciler.world())
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn movement_mut(&mut self) -> &mut M {
        &mut self.movement
    }

    pub fn is_joined(&self) -> bool {
        self.reconciler.world().has_joined()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.as_ref().is_some_and(ReconnectState::is_pending)
    }

    /// Disconnected with nothing left to try.
    pub fn is_finished(&self) -> bool {
        self.session.state() == ConnectionState::Disconnected && !self.reconnect_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    use glam::DVec2;
    use serde_json::json;
    use slither_net::{
        ConnectionStateWatch, Decoded, EventSender, Transport, TransportError, TransportEvent,
        decode, encode,
    };

    #[derive(Default)]
    struct Shared {
        events: Option<EventSender>,
        written: Vec<Message>,
        connects: usize,
    }

    /// Transport double: the test drives its events by hand.
    struct Scripted {
        state: Arc<ConnectionStateWatch>,
        shared: Arc<Mutex<Shared>>,
    }

    impl Transport for Scripted {
        fn connect(
            &mut self,
            _host: &str,
            _port: u16,
            events: EventSender,
        ) -> Result<(), TransportError> {
            self.state.set(ConnectionState::Connecting);
            let mut shared = self.shared.lock().unwrap();
            shared.events = Some(events);
            shared.connects += 1;
            Ok(())
        }

        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            let Ok(Decoded::Frame { message, .. }) = decode(frame) else {
                panic!("client wrote an invalid frame");
            };
            self.shared.lock().unwrap().written.push(message);
            Ok(())
        }

        fn close(&mut self, reason: DisconnectReason) {
            if self.state.current() == ConnectionState::Disconnected {
                return;
            }
            self.state.set(ConnectionState::Disconnected);
            if let Some(events) = &self.shared.lock().unwrap().events {
                events.send(TransportEvent::Disconnected(reason)).unwrap();
            }
        }

        fn state_watch(&self) -> &Arc<ConnectionStateWatch> {
            &self.state
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct ManualClock(Rc<Cell<f64>>);

    impl MonotonicClock for ManualClock {
        fn now(&self) -> f64 {
            self.0.get()
        }
    }

    #[derive(Default)]
    struct Sink {
        ops: Vec<Operation>,
        statuses: Vec<String>,
        states: Vec<ConnectionState>,
    }

    impl RenderSink for Sink {
        fn apply(&mut self, ops: &[Operation]) {
            self.ops.extend_from_slice(ops);
        }
        fn status(&mut self, text: &str) {
            self.statuses.push(text.to_string());
        }
        fn connection_changed(&mut self, state: ConnectionState) {
            self.states.push(state);
        }
    }

    struct Harness {
        client: GameClient<ManualClock, DVec2>,
        time: Rc<Cell<f64>>,
        state: Arc<ConnectionStateWatch>,
        shared: Arc<Mutex<Shared>>,
        sink: Sink,
    }

    impl Harness {
        fn new(reconnect: bool) -> Self {
            let state = Arc::new(ConnectionStateWatch::new());
            let shared = Arc::new(Mutex::new(Shared::default()));
            let transport = Scripted {
                state: Arc::clone(&state),
                shared: Arc::clone(&shared),
            };
            let settings = ClientSettings {
                reconnect: reconnect.then(|| ReconnectConfig {
                    jitter: 0.0,
                    ..Default::default()
                }),
                ..Default::default()
            };
            let time = Rc::new(Cell::new(0.0));
            let client = GameClient::new(
                SessionManager::new(Box::new(transport)),
                settings,
                ManualClock(Rc::clone(&time)),
                DVec2::new(0.0, 1.0),
            );
            Self {
                client,
                time,
                state,
                shared,
                sink: Sink::default(),
            }
        }

        fn post(&self, event: TransportEvent) {
            let shared = self.shared.lock().unwrap();
            shared.events.as_ref().unwrap().send(event).unwrap();
        }

        fn post_message(&self, message: &Message) {
            self.post(TransportEvent::Bytes(encode(message).unwrap()));
        }

        fn frame_at(&mut self, now: f64) {
            self.time.set(now);
            self.client.frame(&mut self.sink);
        }

        fn written_kinds(&self) -> Vec<String> {
            let shared = self.shared.lock().unwrap();
            shared.written.iter().map(|m| m.kind().to_string()).collect()
        }

        fn connect_and_join(&mut self) {
            self.client.login("localhost", 8888, " ann ").unwrap();
            self.state.set(ConnectionState::Connected);
            self.post(TransportEvent::Connected);
            let join = GameEvent::new(
                GameEventKind::JoinGame,
                json!({"player_id": "1", "effects": {}}),
            );
            self.post_message(&join.to_message());
            self.frame_at(0.0);
        }
    }

    fn snapshot() -> Message {
        Message::from_value(json!({
            "type": "game_state",
            "players": {"1": {"body": [[0, 0], [1, 0]], "color": [1, 0, 0], "direction": [1, 0]}},
            "food_list": [["apple", [3, 3]]],
        }))
        .unwrap()
    }

    #[test]
    fn test_login_sends_username_once_connected() {
        let mut harness = Harness::new(false);
        harness.client.login("localhost", 8888, "ann").unwrap();
        harness.frame_at(0.0);
        assert!(harness.written_kinds().is_empty());

        harness.state.set(ConnectionState::Connected);
        harness.post(TransportEvent::Connected);
        harness.frame_at(0.01);

        let shared = harness.shared.lock().unwrap();
        assert_eq!(shared.written.len(), 1);
        assert_eq!(shared.written[0].get("username"), Some(&json!("ann")));
    }

    #[test]
    fn test_empty_username_rejected() {
        let mut harness = Harness::new(false);
        assert!(matches!(
            harness.client.login("localhost", 1, "   "),
            Err(ClientError::EmptyUsername)
        ));
        assert_eq!(harness.shared.lock().unwrap().connects, 0);
    }

    #[test]
    fn test_join_starts_ticks_and_reconciles() {
        let mut harness = Harness::new(false);
        harness.connect_and_join();
        assert!(harness.client.is_joined());
        assert!(harness.client.scheduler().is_running());
        assert!(harness.sink.statuses.contains(&"Joined the game".to_string()));
        // The first tick after joining sends the direction.
        assert_eq!(harness.written_kinds(), vec!["username", "direction"]);

        harness.post_message(&snapshot());
        harness.frame_at(0.05);
        assert!(harness.sink.ops.iter().any(|op| matches!(
            op,
            Operation::CreatePlayer { id, appearance } if id.as_str() == "1" && appearance.is_local
        )));
        assert!(
            harness
                .sink
                .ops
                .iter()
                .any(|op| matches!(op, Operation::CreateFood { index: 0, .. }))
        );
        assert_eq!(harness.client.leaderboard().len(), 1);
    }

    #[test]
    fn test_snapshot_waits_for_update_interval() {
        let mut harness = Harness::new(false);
        harness.connect_and_join();

        harness.post_message(&snapshot());
        harness.frame_at(0.01);
        assert!(harness.sink.ops.is_empty());

        harness.frame_at(0.04);
        assert!(!harness.sink.ops.is_empty());
    }

    #[test]
    fn test_commands_use_catalog_messages() {
        let mut harness = Harness::new(false);
        harness.connect_and_join();
        harness.client.reborn().unwrap();
        harness.client.pause_game().unwrap();
        harness.client.change_color().unwrap();
        harness.client.quit_game().unwrap();
        assert_eq!(
            harness.written_kinds()[2..],
            ["reborn", "pause_game", "change_color", "quit_game"]
        );
    }

    #[test]
    fn test_peer_close_clears_world_and_reconnects() {
        let mut harness = Harness::new(true);
        harness.connect_and_join();
        harness.post_message(&snapshot());
        harness.frame_at(0.05);
        harness.sink.ops.clear();

        harness.state.set(ConnectionState::Disconnected);
        harness.post(TransportEvent::Disconnected(DisconnectReason::PeerClosed));
        harness.frame_at(1.0);

        assert!(harness.sink.ops.contains(&Operation::RemovePlayer {
            id: slither_world::PlayerId::new("1")
        }));
        assert!(harness.sink.ops.contains(&Operation::HideFood { index: 0 }));
        assert!(!harness.client.is_joined());
        assert!(!harness.client.scheduler().is_running());
        assert!(harness.client.reconnect_pending());
        assert_eq!(harness.shared.lock().unwrap().connects, 1);

        // The first delay is one second without jitter.
        harness.frame_at(1.5);
        assert_eq!(harness.shared.lock().unwrap().connects, 1);
        harness.frame_at(2.0);
        assert_eq!(harness.shared.lock().unwrap().connects, 2);

        // Logging in again on the new connection.
        harness.state.set(ConnectionState::Connected);
        harness.post(TransportEvent::Connected);
        harness.frame_at(2.1);
        assert_eq!(harness.written_kinds().last().map(String::as_str), Some("username"));
        assert!(!harness.client.reconnect_pending());
    }

    #[test]
    fn test_local_disconnect_does_not_reconnect() {
        let mut harness = Harness::new(true);
        harness.connect_and_join();
        harness.client.disconnect();
        harness.frame_at(0.5);

        assert!(!harness.client.reconnect_pending());
        assert!(harness.client.is_finished());
        assert_eq!(
            harness.sink.states.last(),
            Some(&ConnectionState::Disconnected)
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        assert!(ClientSettings::from_config(&config).reconnect.is_none());

        config.network.auto_reconnect = true;
        config.network.reconnect_max_attempts = 3;
        config.effects.invisibility = "cloak".to_string();
        let settings = ClientSettings::from_config(&config);
        assert_eq!(settings.reconnect.map(|r| r.max_attempts), Some(3));
        assert_eq!(settings.effect_names.invisibility, "cloak");
    }

    #[test]
    fn test_evented_session_needs_runtime() {
        let network = NetworkConfig {
            transport: TransportKind::Evented,
            ..Default::default()
        };
        assert!(matches!(
            build_session(&network, None),
            Err(ClientError::MissingRuntime)
        ));
        let session = build_session(&NetworkConfig::default(), None).unwrap();
        assert_eq!(session.transport_name(), "blocking");
    }
}
