//! Local world model: players, food slots, and the local player's identity.
//!
//! The model is plain data. Only [`crate::reconcile`] mutates it, and the
//! renderer learns about changes through [`crate::Operation`]s rather than
//! by reading it.

use std::collections::BTreeMap;
use std::fmt;

use glam::DVec2;
use serde_json::Value;

use crate::effects::{EffectCatalog, Glow};
use crate::snapshot::SkipReason;

// ---------------------------------------------------------------------------
// Identifiers and colours
// ---------------------------------------------------------------------------

/// Server-assigned player identifier. Snapshots key players by string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a string or integer id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Linear RGB colour with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parse `[r, g, b]`. Components above 1 mean the whole triple is on a
    /// 0–255 scale.
    pub fn from_value(value: &Value) -> Option<Self> {
        let [r, g, b] = number_array::<3>(value)?;
        let scale = if r > 1.0 || g > 1.0 || b > 1.0 {
            255.0
        } else {
            1.0
        };
        let channel = |c: f64| (c / scale).clamp(0.0, 1.0) as f32;
        Some(Self::new(channel(r), channel(g), channel(b)))
    }

    pub fn complement(self) -> Self {
        Self::new(1.0 - self.r, 1.0 - self.g, 1.0 - self.b)
    }
}

/// Parse a JSON array of exactly `N` finite numbers.
pub(crate) fn number_array<const N: usize>(value: &Value) -> Option<[f64; N]> {
    let items = value.as_array()?;
    if items.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        let n = item.as_f64()?;
        if !n.is_finite() {
            return None;
        }
        *slot = n;
    }
    Some(out)
}

/// Parse `[x, y]`.
pub(crate) fn vec2(value: &Value) -> Option<DVec2> {
    number_array::<2>(value).map(DVec2::from_array)
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// One body segment slot. Slots are reused by index; surplus slots are
/// hidden rather than freed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub position: DVec2,
    /// Size relative to the head.
    pub scale: f64,
    pub visible: bool,
}

/// Derived head visuals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadVisual {
    /// Radians, `atan2(direction.y, direction.x)`.
    pub rotation: f64,
    pub glow: Glow,
}

/// Everything the client keeps about one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntity {
    /// Head first.
    pub segments: Vec<Segment>,
    pub color: Rgb,
    /// Tail size relative to the head.
    pub size_ratio: f64,
    pub direction: DVec2,
    /// Remaining seconds per effect name.
    pub effect_times: BTreeMap<String, f64>,
    pub name: String,
    pub alive: bool,
    pub score: i64,
    pub rank: u32,
    pub hp: i64,
    /// Seconds alive, cumulative.
    pub live_time: f64,
    pub alpha: f64,
    pub head: HeadVisual,
}

impl Default for PlayerEntity {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            color: Rgb::WHITE,
            size_ratio: 1.0,
            direction: DVec2::ZERO,
            effect_times: BTreeMap::new(),
            name: String::new(),
            alive: true,
            score: 0,
            rank: 0,
            hp: 0,
            live_time: 0.0,
            alpha: 1.0,
            head: HeadVisual::default(),
        }
    }
}

impl PlayerEntity {
    pub fn visible_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.visible)
    }

    /// Number of visible segments.
    pub fn length(&self) -> usize {
        self.visible_segments().count()
    }

    pub fn head_position(&self) -> Option<DVec2> {
        self.segments
            .first()
            .filter(|s| s.visible)
            .map(|s| s.position)
    }
}

/// One food slot. Slot `i` is "the i-th food in the latest snapshot", not a
/// stable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FoodEntity {
    pub kind: String,
    pub position: DVec2,
    pub visible: bool,
}

impl FoodEntity {
    /// Placeholder for a slot whose entry could not be parsed.
    pub fn hidden() -> Self {
        Self {
            kind: String::new(),
            position: DVec2::ZERO,
            visible: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

/// Content of a `join_game` event.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinInfo {
    pub player_id: PlayerId,
    pub catalog: EffectCatalog,
}

impl JoinInfo {
    /// Parse `{"player_id": id, "effects": {...}}`. A bare id is accepted as
    /// well, with an empty catalog.
    pub fn from_content(content: &Value) -> Result<Self, SkipReason> {
        if let Some(player_id) = PlayerId::from_value(content) {
            return Ok(Self {
                player_id,
                catalog: EffectCatalog::default(),
            });
        }

        let object = content.as_object().ok_or(SkipReason::NotAnObject)?;
        let player_id = object
            .get("player_id")
            .ok_or(SkipReason::MissingField("player_id"))
            .and_then(|v| PlayerId::from_value(v).ok_or(SkipReason::BadField("player_id")))?;
        let catalog = object
            .get("effects")
            .map(EffectCatalog::from_value)
            .unwrap_or_default();

        Ok(Self { player_id, catalog })
    }
}

// ---------------------------------------------------------------------------
// WorldModel
// ---------------------------------------------------------------------------

/// The client's view of the game world.
#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    pub players: BTreeMap<PlayerId, PlayerEntity>,
    pub food: Vec<FoodEntity>,
    local_player: Option<PlayerId>,
    effect_catalog: Option<EffectCatalog>,
}

impl WorldModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_player(&self) -> Option<&PlayerId> {
        self.local_player.as_ref()
    }

    pub fn is_local(&self, id: &PlayerId) -> bool {
        self.local_player.as_ref() == Some(id)
    }

    pub fn effect_catalog(&self) -> Option<&EffectCatalog> {
        self.effect_catalog.as_ref()
    }

    pub fn has_joined(&self) -> bool {
        self.local_player.is_some()
    }

    /// Record the local player and effect catalog. Returns `false` (and
    /// changes nothing) if a join was already recorded.
    pub fn join(&mut self, info: JoinInfo) -> bool {
        if self.local_player.is_some() {
            return false;
        }
        self.local_player = Some(info.player_id);
        self.effect_catalog = Some(info.catalog);
        true
    }

    /// Visible food slots with their indices.
    pub fn visible_food(&self) -> impl Iterator<Item = (usize, &FoodEntity)> {
        self.food.iter().enumerate().filter(|(_, f)| f.visible)
    }
}
