//! Message model and the client/server message catalog.
//!
//! Every payload is a JSON object with a string `type` field. Inbound
//! messages stay loosely typed ([`Message`]) because snapshot parsing is
//! done per entity further up; outbound messages are the closed
//! [`ClientMessage`] enum.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::framing::EncodeError;

/// Key holding the message type.
pub const TYPE_KEY: &str = "type";

/// Server → client: a discrete game event.
pub const GAME_EVENT: &str = "game_event";

/// Server → client: a full world snapshot.
pub const GAME_STATE: &str = "game_state";

/// Well-formed JSON that is not a message. Such payloads are dropped and the
/// connection stays up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UntypedPayload {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing string `type` field")]
    MissingType,
}

/// A decoded JSON message. Always an object with a string `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    fields: Map<String, Value>,
}

impl Message {
    /// Create a message with only its `type` set.
    pub fn new(kind: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_KEY.to_owned(), Value::String(kind.into()));
        Self { fields }
    }

    /// Builder-style field setter. The `type` field cannot be replaced.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != TYPE_KEY {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// The message type.
    pub fn kind(&self) -> &str {
        self.fields
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Validate a JSON value as a message.
    pub fn from_value(value: Value) -> Result<Self, UntypedPayload> {
        let Value::Object(fields) = value else {
            return Err(UntypedPayload::NotAnObject);
        };
        match fields.get(TYPE_KEY) {
            Some(Value::String(_)) => Ok(Self { fields }),
            _ => Err(UntypedPayload::MissingType),
        }
    }

    /// Build a message from any serializable value that maps to an object
    /// with a string `type`.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, EncodeError> {
        let value = serde_json::to_value(value).map_err(EncodeError::Serialize)?;
        Self::from_value(value).map_err(|_| EncodeError::Invalid("value is not a typed JSON object"))
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message after connecting.
    Username { username: String },
    /// Steering vector, `[dx, dy]`.
    Direction { direction: [f64; 2] },
    QuitGame,
    Reborn,
    PauseGame,
    ChangeColor,
}

impl ClientMessage {
    /// Convert to a wire message. Non-finite direction components are
    /// rejected here since JSON has no representation for them.
    pub fn to_message(&self) -> Result<Message, EncodeError> {
        if let Self::Direction { direction } = self
            && !direction.iter().all(|c| c.is_finite())
        {
            return Err(EncodeError::Invalid("direction components must be finite"));
        }
        Message::from_serializable(self)
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Named game events carried by `game_event` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameEventKind {
    JoinGame,
    GameOver,
    QuitGame,
    Reborn,
    PauseGame,
    EatingFood,
    Crash,
}

impl GameEventKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "join_game" => Self::JoinGame,
            "game_over" => Self::GameOver,
            "quit_game" => Self::QuitGame,
            "reborn" => Self::Reborn,
            "pause_game" => Self::PauseGame,
            "eating_food" => Self::EatingFood,
            "crash" => Self::Crash,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinGame => "join_game",
            Self::GameOver => "game_over",
            Self::QuitGame => "quit_game",
            Self::Reborn => "reborn",
            Self::PauseGame => "pause_game",
            Self::EatingFood => "eating_food",
            Self::Crash => "crash",
        }
    }
}

/// Why a `game_event` message could not be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("`game_event` field missing or not a string")]
    MissingName,

    #[error("unknown game event `{0}`")]
    UnknownEvent(String),
}

/// A decoded `game_event` message.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    pub kind: GameEventKind,
    /// Event-specific payload, `Null` when absent.
    pub content: Value,
}

impl GameEvent {
    pub fn new(kind: GameEventKind, content: Value) -> Self {
        Self { kind, content }
    }

    pub fn from_message(message: &Message) -> Result<Self, EventParseError> {
        let name = message
            .get(GAME_EVENT)
            .and_then(Value::as_str)
            .ok_or(EventParseError::MissingName)?;
        let kind = GameEventKind::parse(name)
            .ok_or_else(|| EventParseError::UnknownEvent(name.to_owned()))?;
        let content = message.get("content").cloned().unwrap_or(Value::Null);
        Ok(Self { kind, content })
    }

    pub fn to_message(&self) -> Message {
        Message::new(GAME_EVENT)
            .with(GAME_EVENT, self.kind.as_str())
            .with("content", self.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages_serialize_with_type_tag() {
        let cases = [
            (
                ClientMessage::Username {
                    username: "ann".into(),
                },
                json!({"type": "username", "username": "ann"}),
            ),
            (
                ClientMessage::Direction {
                    direction: [0.5, -1.0],
                },
                json!({"type": "direction", "direction": [0.5, -1.0]}),
            ),
            (ClientMessage::QuitGame, json!({"type": "quit_game"})),
            (ClientMessage::Reborn, json!({"type": "reborn"})),
            (ClientMessage::PauseGame, json!({"type": "pause_game"})),
            (ClientMessage::ChangeColor, json!({"type": "change_color"})),
        ];

        for (message, expected) in cases {
            assert_eq!(message.to_message().unwrap().into_value(), expected);
        }
    }

    #[test]
    fn test_non_finite_direction_rejected() {
        let message = ClientMessage::Direction {
            direction: [f64::NAN, 0.0],
        };
        assert!(matches!(
            message.to_message(),
            Err(EncodeError::Invalid(_))
        ));
    }

    #[test]
    fn test_type_cannot_be_overwritten() {
        let message = Message::new("a").with("type", 5);
        assert_eq!(message.kind(), "a");
    }

    #[test]
    fn test_from_value_requires_string_type() {
        assert_eq!(
            Message::from_value(json!({"type": 3})),
            Err(UntypedPayload::MissingType)
        );
        assert_eq!(
            Message::from_value(json!("game_state")),
            Err(UntypedPayload::NotAnObject)
        );
        assert_eq!(
            Message::from_value(json!({"type": "game_state"}))
                .unwrap()
                .kind(),
            GAME_STATE
        );
    }

    #[test]
    fn test_game_event_parse() {
        let message = Message::from_value(json!({
            "type": "game_event",
            "game_event": "eating_food",
            "content": "apple"
        }))
        .unwrap();

        let event = GameEvent::from_message(&message).unwrap();
        assert_eq!(event.kind, GameEventKind::EatingFood);
        assert_eq!(event.content, json!("apple"));
        assert_eq!(event.to_message(), message);
    }

    #[test]
    fn test_game_event_errors() {
        let missing = Message::new(GAME_EVENT);
        assert!(matches!(
            GameEvent::from_message(&missing),
            Err(EventParseError::MissingName)
        ));

        let unknown = Message::new(GAME_EVENT).with(GAME_EVENT, "dance");
        assert!(matches!(
            GameEvent::from_message(&unknown),
            Err(EventParseError::UnknownEvent(name)) if name == "dance"
        ));
    }

    #[test]
    fn test_event_without_content_is_null() {
        let message = Message::new(GAME_EVENT).with(GAME_EVENT, "reborn");
        let event = GameEvent::from_message(&message).unwrap();
        assert_eq!(event.content, Value::Null);
    }
}
