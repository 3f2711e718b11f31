//! Parsing of `game_state` snapshots into per-entity records.
//!
//! Parsing never fails as a whole because of one bad entity: each player and
//! food entry becomes a `Result<Record, SkipReason>` and reconciliation skips
//! the failures. Only a snapshot whose top-level shape is wrong is rejected.

use std::collections::BTreeMap;

use glam::DVec2;
use serde_json::{Map, Value};
use slither_net::Message;

use crate::world::{PlayerId, Rgb, vec2};

/// Why one entity in a snapshot was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("entry is not an object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` has the wrong shape")]
    BadField(&'static str),
}

/// Why a whole snapshot was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("message type is `{0}`, not `game_state`")]
    WrongType(String),

    #[error("`players` is missing or not an object")]
    Players,

    #[error("`food_list` is missing or not an array")]
    FoodList,
}

/// A validated player entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    /// Segment positions, head first. Never empty.
    pub body: Vec<DVec2>,
    pub color: Rgb,
    pub direction: DVec2,
    pub size_ratio: f64,
    pub effect_times: BTreeMap<String, f64>,
    pub name: String,
    pub alive: bool,
    pub score: i64,
    pub rank: u32,
    pub hp: i64,
    pub live_time: f64,
}

/// A validated food entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FoodRecord {
    pub kind: String,
    pub position: DVec2,
}

/// One parsed snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// In snapshot order (by id, since JSON objects are keyed).
    pub players: Vec<(PlayerId, Result<PlayerRecord, SkipReason>)>,
    /// Positional: entry `i` describes food slot `i`.
    pub food: Vec<Result<FoodRecord, SkipReason>>,
}

impl Snapshot {
    pub fn from_message(message: &Message) -> Result<Self, SnapshotError> {
        if message.kind() != slither_net::messages::GAME_STATE {
            return Err(SnapshotError::WrongType(message.kind().to_owned()));
        }

        let players = message
            .get("players")
            .and_then(Value::as_object)
            .ok_or(SnapshotError::Players)?
            .iter()
            .map(|(id, entry)| (PlayerId::new(id.clone()), PlayerRecord::parse(entry)))
            .collect();

        let food = message
            .get("food_list")
            .and_then(Value::as_array)
            .ok_or(SnapshotError::FoodList)?
            .iter()
            .map(FoodRecord::parse)
            .collect();

        Ok(Self { players, food })
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.players.iter().map(|(id, _)| id)
    }
}

impl PlayerRecord {
    pub fn parse(entry: &Value) -> Result<Self, SkipReason> {
        let fields = entry.as_object().ok_or(SkipReason::NotAnObject)?;

        let body = required(fields, "body")?
            .as_array()
            .filter(|items| !items.is_empty())
            .and_then(|items| items.iter().map(vec2).collect::<Option<Vec<_>>>())
            .ok_or(SkipReason::BadField("body"))?;
        let color = Rgb::from_value(required(fields, "color")?).ok_or(SkipReason::BadField("color"))?;
        let direction = vec2(required(fields, "direction")?).ok_or(SkipReason::BadField("direction"))?;

        let effect_times = match fields.get("times") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(times)) => times
                .iter()
                .filter_map(|(name, t)| Some((name.clone(), t.as_f64()?)))
                .filter(|(_, t)| t.is_finite())
                .collect(),
            Some(_) => return Err(SkipReason::BadField("times")),
        };

        Ok(Self {
            body,
            color,
            direction,
            size_ratio: fields
                .get("size_ratio")
                .and_then(Value::as_f64)
                .filter(|r| r.is_finite() && *r > 0.0)
                .unwrap_or(1.0),
            effect_times,
            name: fields
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            alive: fields.get("alive").and_then(Value::as_bool).unwrap_or(true),
            score: integer(fields, "score"),
            rank: u32::try_from(integer(fields, "ranking")).unwrap_or(0),
            hp: integer(fields, "hp"),
            live_time: fields
                .get("live_time")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        })
    }
}

impl FoodRecord {
    /// Parse `[kind, [x, y]]`.
    pub fn parse(entry: &Value) -> Result<Self, SkipReason> {
        let [kind, position] = entry
            .as_array()
            .map(Vec::as_slice)
            .ok_or(SkipReason::BadField("food"))?
        else {
            return Err(SkipReason::BadField("food"));
        };
        let kind = kind.as_str().ok_or(SkipReason::BadField("food kind"))?;
        let position = vec2(position).ok_or(SkipReason::BadField("food position"))?;
        Ok(Self {
            kind: kind.to_owned(),
            position,
        })
    }
}

fn required<'a>(fields: &'a Map<String, Value>, key: &'static str) -> Result<&'a Value, SkipReason> {
    fields.get(key).ok_or(SkipReason::MissingField(key))
}

/// Integers may arrive as floats; missing means zero.
fn integer(fields: &Map<String, Value>, key: &str) -> i64 {
    match fields.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        _ => 0,
    }
}
