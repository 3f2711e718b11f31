//! Client networking: message framing, socket transports, and the session
//! manager that turns a byte stream into dispatched game messages.

pub mod blocking;
pub mod diagnostics;
pub mod evented;
pub mod framing;
pub mod messages;
pub mod reconnection;
pub mod session;
pub mod transport;

pub use blocking::{BlockingConfig, BlockingTransport};
pub use diagnostics::TrafficStats;
pub use evented::{EventedConfig, EventedTransport};
pub use framing::{
    Decoded, EncodeError, FrameAssembler, FrameBuffer, HEADER_LEN, MAX_PAYLOAD_LEN,
    ProtocolError, decode, encode,
};
pub use messages::{
    ClientMessage, EventParseError, GameEvent, GameEventKind, Message, UntypedPayload,
};
pub use reconnection::{ReconnectConfig, ReconnectState};
pub use session::{SessionError, SessionListener, SessionManager};
pub use transport::{
    ConnectionState, ConnectionStateWatch, DisconnectReason, EventSender, Transport,
    TransportError, TransportEvent,
};
