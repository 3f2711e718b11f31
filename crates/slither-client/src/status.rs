//! Status line text for game events.

use serde_json::Value;
use slither_net::{GameEvent, GameEventKind};

/// Text shown to the player for `event`.
pub fn status_text(event: &GameEvent) -> String {
    match event.kind {
        GameEventKind::JoinGame => "Joined the game".to_string(),
        GameEventKind::GameOver => match score(&event.content) {
            Some(score) => format!("Game over - final score {score}"),
            None => "Game over".to_string(),
        },
        GameEventKind::QuitGame => "You left the game".to_string(),
        GameEventKind::Reborn => "Reborn".to_string(),
        GameEventKind::PauseGame => "Game paused".to_string(),
        GameEventKind::EatingFood => match event.content.as_str() {
            Some(food) if !food.is_empty() => format!("Ate {food}"),
            _ => "Ate food".to_string(),
        },
        GameEventKind::Crash => "You crashed".to_string(),
    }
}

/// `content` may be the bare score or an object carrying `score`.
fn score(content: &Value) -> Option<i64> {
    content
        .as_i64()
        .or_else(|| content.get("score").and_then(Value::as_i64))
}
