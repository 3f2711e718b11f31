//! Transport abstraction shared by the blocking and event-driven socket
//! strategies.
//!
//! A transport owns the socket lifecycle. It never calls back into its
//! owner: connection changes and received bytes are posted as
//! [`TransportEvent`]s on a channel the owner drains, and the current state
//! is mirrored in a [`ConnectionStateWatch`].

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::debug;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. The only state from which `connect` is accepted.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Socket established, frames flow both ways.
    Connected,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Why a connection attempt or an established connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The connect attempt itself failed.
    ConnectFailed(String),
    /// The peer closed the stream.
    PeerClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// Inbound bytes violated the framing protocol.
    Protocol(String),
    /// `disconnect` was called locally.
    Local,
}

impl DisconnectReason {
    /// Whether the owner asked for this disconnect.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Local => f.write_str("closed locally"),
        }
    }
}

/// Notifications posted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// Posted exactly once per connection attempt.
    Disconnected(DisconnectReason),
    /// Raw bytes in arrival order. May hold partial or several frames.
    Bytes(Vec<u8>),
}

/// Sending half of the event channel handed to [`Transport::connect`].
pub type EventSender = Sender<TransportEvent>;

/// Errors returned synchronously by transport calls.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("a connection is already active (state: {0:?})")]
    AlreadyActive(ConnectionState),

    #[error("could not resolve {0}")]
    Resolve(String),

    /// The writer fell too far behind; the connection was closed.
    #[error("outbound queue is full")]
    QueueFull,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A byte-stream connection to the game server.
pub trait Transport: Send {
    /// Start connecting. Events for this attempt go to `events`.
    ///
    /// Rejected with [`TransportError::AlreadyActive`] unless the state is
    /// [`ConnectionState::Disconnected`].
    fn connect(&mut self, host: &str, port: u16, events: EventSender)
    -> Result<(), TransportError>;

    /// Write one already framed message.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Tear the connection down with `reason`. No-op when nothing is open.
    fn close(&mut self, reason: DisconnectReason);

    /// Shared state watch.
    fn state_watch(&self) -> &Arc<ConnectionStateWatch>;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn disconnect(&mut self) {
        self.close(DisconnectReason::Local);
    }

    fn state(&self) -> ConnectionState {
        self.state_watch().current()
    }
}

// ---------------------------------------------------------------------------
// Link signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Connecting,
    Open,
    Closed,
}

/// Per-attempt gate in front of the event channel.
///
/// Every emission happens under one lock, so once `close` has posted
/// `Disconnected` no further event from this attempt can follow it.
pub(crate) struct LinkSignal {
    phase: Mutex<LinkPhase>,
    events: EventSender,
    state: Arc<ConnectionStateWatch>,
}

impl LinkSignal {
    pub(crate) fn new(events: EventSender, state: Arc<ConnectionStateWatch>) -> Arc<Self> {
        state.set(ConnectionState::Connecting);
        Arc::new(Self {
            phase: Mutex::new(LinkPhase::Connecting),
            events,
            state,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LinkPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the socket established. Returns `false` if the attempt was
    /// already closed, in which case the caller drops the socket.
    pub(crate) fn open(&self) -> bool {
        let mut phase = self.lock();
        if *phase != LinkPhase::Connecting {
            return false;
        }
        *phase = LinkPhase::Open;
        self.state.set(ConnectionState::Connected);
        let _ = self.events.send(TransportEvent::Connected);
        true
    }

    /// Post received bytes. Returns `false` once the link is closed or the
    /// owner has gone away.
    pub(crate) fn deliver(&self, bytes: Vec<u8>) -> bool {
        let phase = self.lock();
        if *phase != LinkPhase::Open {
            return false;
        }
        self.events.send(TransportEvent::Bytes(bytes)).is_ok()
    }

    /// Close the attempt. Only the first call posts `Disconnected`.
    pub(crate) fn close(&self, reason: DisconnectReason) -> bool {
        let mut phase = self.lock();
        if *phase == LinkPhase::Closed {
            return false;
        }
        *phase = LinkPhase::Closed;
        self.state.set(ConnectionState::Disconnected);
        debug!(%reason, "link closed");
        let _ = self.events.send(TransportEvent::Disconnected(reason));
        true
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.lock() == LinkPhase::Open
    }
}
