//! Session manager: framing on top of a [`Transport`].
//!
//! The manager owns the transport and the receiving end of its event
//! channel. The caller drains events with [`SessionManager::poll`], passing
//! the listener each time, so nothing ever calls back into the caller from a
//! network thread and no listener reference is stored.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::blocking::{BlockingConfig, BlockingTransport};
use crate::diagnostics::TrafficStats;
use crate::evented::{EventedConfig, EventedTransport};
use crate::framing::{self, Decoded, EncodeError, FrameBuffer};
use crate::messages::{ClientMessage, GAME_EVENT, GAME_STATE, GameEvent, Message};
use crate::transport::{
    ConnectionState, ConnectionStateWatch, DisconnectReason, Transport, TransportError,
    TransportEvent,
};

/// Receives session output during [`SessionManager::poll`]. Every method
/// defaults to doing nothing.
pub trait SessionListener {
    fn on_connected(&mut self) {}

    /// Called once per connection attempt, including failed connects.
    fn on_disconnected(&mut self, _reason: &DisconnectReason) {}

    fn on_game_event(&mut self, _event: GameEvent) {}

    /// A full `game_state` snapshot, unparsed.
    fn on_game_state(&mut self, _snapshot: Message) {}
}

/// Errors returned by session calls.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected to a server")]
    NotConnected,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => Self::NotConnected,
            other => Self::Transport(other),
        }
    }
}

/// Connects framing, transport and listener dispatch.
pub struct SessionManager {
    transport: Box<dyn Transport>,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    inbound: FrameBuffer,
    /// Set after a protocol error; remaining bytes of that link are ignored
    /// until its `Disconnected` arrives.
    discarding: bool,
    stats: TrafficStats,
}

impl SessionManager {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            transport,
            events_tx,
            events_rx,
            inbound: FrameBuffer::new(),
            discarding: false,
            stats: TrafficStats::default(),
        }
    }

    /// Session over a [`BlockingTransport`].
    pub fn blocking(config: BlockingConfig) -> Self {
        Self::new(Box::new(BlockingTransport::new(config)))
    }

    /// Session over an [`EventedTransport`] running on `runtime`.
    pub fn evented(runtime: Handle, config: EventedConfig) -> Self {
        Self::new(Box::new(EventedTransport::new(runtime, config)))
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn state_watch(&self) -> &Arc<ConnectionStateWatch> {
        self.transport.state_watch()
    }

    pub fn stats(&self) -> &TrafficStats {
        &self.stats
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Start connecting. The outcome arrives through [`poll`](Self::poll).
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), SessionError> {
        info!(
            host,
            port,
            transport = self.transport.name(),
            "Connecting to server"
        );
        self.inbound.clear();
        self.transport.connect(host, port, self.events_tx.clone())?;
        Ok(())
    }

    /// Frame and send `message`. Nothing reaches the wire unless connected.
    pub fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        if self.state() != ConnectionState::Connected {
            debug!(kind = message.kind(), "send refused: not connected");
            self.stats.record_rejected();
            return Err(SessionError::NotConnected);
        }

        let frame = match framing::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Dropping unencodable message");
                self.stats.record_rejected();
                return Err(e.into());
            }
        };

        self.transport.send(&frame)?;
        self.stats.record_sent(frame.len());
        Ok(())
    }

    /// Send one of the client catalog messages.
    pub fn send_client(&mut self, message: &ClientMessage) -> Result<(), SessionError> {
        let message = match message.to_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping unencodable message");
                self.stats.record_rejected();
                return Err(e.into());
            }
        };
        self.send(&message)
    }

    /// Close the connection. Idempotent; the `Disconnected` notification is
    /// delivered by the next poll.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Handle every queued transport event. Returns how many were handled.
    pub fn poll(&mut self, listener: &mut dyn SessionListener) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle(event, listener);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for the first event, then drain the rest.
    pub fn poll_timeout(&mut self, listener: &mut dyn SessionListener, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle(event, listener);
                1 + self.poll(listener)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn handle(&mut self, event: TransportEvent, listener: &mut dyn SessionListener) {
        match event {
            TransportEvent::Connected => {
                self.inbound.clear();
                self.discarding = false;
                self.stats.record_connected();
                listener.on_connected();
            }
            TransportEvent::Disconnected(reason) => {
                let leftover = self.inbound.buffered();
                if leftover > 0 {
                    debug!(leftover, "discarding partial frame");
                }
                self.inbound.clear();
                self.discarding = false;
                self.stats.record_disconnected();
                info!(%reason, "Disconnected");
                listener.on_disconnected(&reason);
            }
            TransportEvent::Bytes(bytes) => {
                if self.discarding {
                    return;
                }
                self.stats.record_received_bytes(bytes.len());
                self.inbound.extend(&bytes);
                self.drain_frames(listener);
            }
        }
    }

    fn drain_frames(&mut self, listener: &mut dyn SessionListener) {
        loop {
            match self.inbound.next_frame() {
                Ok(Decoded::Frame { message, .. }) => {
                    self.stats.record_frame_received();
                    self.dispatch(message, listener);
                }
                Ok(Decoded::Untyped { reason, .. }) => {
                    self.stats.record_frame_received();
                    self.stats.record_dropped();
                    warn!(%reason, "Dropping payload that is not a message");
                }
                Ok(Decoded::NeedMoreData) => break,
                Err(e) => {
                    warn!(error = %e, "Protocol error, closing connection");
                    self.inbound.clear();
                    self.discarding = true;
                    self.transport
                        .close(DisconnectReason::Protocol(e.to_string()));
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, message: Message, listener: &mut dyn SessionListener) {
        match message.kind() {
            GAME_STATE => listener.on_game_state(message),
            GAME_EVENT => match GameEvent::from_message(&message) {
                Ok(event) => listener.on_game_event(event),
                Err(e) => {
                    self.stats.record_dropped();
                    warn!(error = %e, "Dropping malformed game event");
                }
            },
            other => {
                self.stats.record_dropped();
                warn!(kind = other, "Dropping message of unknown type");
            }
        }
    }
}
