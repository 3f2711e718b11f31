//! Snapshot reconciliation: diff a full server snapshot against the local
//! world model and emit the minimal create/update/remove operations.
//!
//! [`apply_snapshot`] is a pure function of the previous world, the snapshot
//! and the visibility rules. [`WorldReconciler`] owns the world between
//! passes and handles the join/disconnect lifecycle around it.

use std::collections::{BTreeMap, BTreeSet};

use glam::DVec2;
use slither_net::Message;
use tracing::{debug, info, warn};

use crate::effects::{EffectCatalog, EffectNames, Glow, VisibilityRules};
use crate::snapshot::{FoodRecord, PlayerRecord, SkipReason, Snapshot};
use crate::world::{
    FoodEntity, HeadVisual, JoinInfo, PlayerEntity, PlayerId, Rgb, Segment, WorldModel,
};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Player-level visual state handed to the renderer with create/update.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAppearance {
    pub color: Rgb,
    pub name: String,
    pub alpha: f64,
    pub head: HeadVisual,
    pub alive: bool,
    pub is_local: bool,
}

/// One change the renderer must apply. Emitted in application order: a
/// player's create/update precedes its segment operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreatePlayer {
        id: PlayerId,
        appearance: PlayerAppearance,
    },
    UpdatePlayer {
        id: PlayerId,
        appearance: PlayerAppearance,
    },
    RemovePlayer {
        id: PlayerId,
    },
    CreateSegment {
        player: PlayerId,
        index: usize,
        segment: Segment,
    },
    UpdateSegment {
        player: PlayerId,
        index: usize,
        segment: Segment,
    },
    HideSegment {
        player: PlayerId,
        index: usize,
    },
    CreateFood {
        index: usize,
        food: FoodEntity,
    },
    UpdateFood {
        index: usize,
        food: FoodEntity,
    },
    HideFood {
        index: usize,
    },
    /// A local effect went from inactive to active.
    StartEffectTimer {
        effect: String,
        duration: f64,
    },
}

impl Operation {
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreatePlayer { .. } | Self::CreateSegment { .. } | Self::CreateFood { .. }
        )
    }

    pub fn is_update(&self) -> bool {
        matches!(
            self,
            Self::UpdatePlayer { .. } | Self::UpdateSegment { .. } | Self::UpdateFood { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// apply_snapshot
// ---------------------------------------------------------------------------

/// Reconcile `world` with `snapshot`. Returns the new world and the
/// operations that take a renderer from the old world to the new one.
pub fn apply_snapshot(
    mut world: WorldModel,
    snapshot: &Snapshot,
    rules: &VisibilityRules,
) -> (WorldModel, Vec<Operation>) {
    let mut ops = Vec::new();
    let catalog = world.effect_catalog().cloned();

    for (id, entry) in &snapshot.players {
        let record = match entry {
            Ok(record) => record,
            Err(reason) => {
                warn!(player = %id, %reason, "Skipping malformed player entry");
                continue;
            }
        };
        let is_local = world.is_local(id);

        let created = !world.players.contains_key(id);
        let entity = world.players.entry(id.clone()).or_default();
        if is_local {
            start_effect_timers(&entity.effect_times, record, catalog.as_ref(), &mut ops);
        }
        sync_player(entity, id, record, is_local, created, rules, &mut ops);
    }

    let present: BTreeSet<&PlayerId> = snapshot.player_ids().collect();
    let gone: Vec<PlayerId> = world
        .players
        .keys()
        .filter(|id| !present.contains(id))
        .cloned()
        .collect();
    for id in gone {
        world.players.remove(&id);
        debug!(player = %id, "player left");
        ops.push(Operation::RemovePlayer { id });
    }

    sync_food(&mut world.food, &snapshot.food, &mut ops);

    (world, ops)
}

fn start_effect_timers(
    previous: &BTreeMap<String, f64>,
    record: &PlayerRecord,
    catalog: Option<&EffectCatalog>,
    ops: &mut Vec<Operation>,
) {
    for (effect, remaining) in &record.effect_times {
        let was_active = previous.get(effect).is_some_and(|t| *t > 0.0);
        if *remaining > 0.0 && !was_active {
            let duration = catalog
                .and_then(|c| c.duration(effect))
                .unwrap_or(*remaining);
            ops.push(Operation::StartEffectTimer {
                effect: effect.clone(),
                duration,
            });
        }
    }
}

fn sync_player(
    entity: &mut PlayerEntity,
    id: &PlayerId,
    record: &PlayerRecord,
    is_local: bool,
    created: bool,
    rules: &VisibilityRules,
    ops: &mut Vec<Operation>,
) {
    entity.color = record.color;
    entity.size_ratio = record.size_ratio;
    entity.direction = record.direction;
    entity.effect_times.clone_from(&record.effect_times);
    entity.name.clone_from(&record.name);
    entity.alive = record.alive;
    entity.score = record.score;
    entity.rank = record.rank;
    entity.hp = record.hp;
    entity.live_time = record.live_time;
    entity.head = HeadVisual {
        rotation: head_rotation(record.direction),
        glow: rules.glow(&record.effect_times, record.color),
    };
    // Opponents may fade out completely; the local player stays faintly
    // visible to themselves.
    entity.alpha = rules.alpha(&record.effect_times, !is_local);

    let appearance = PlayerAppearance {
        color: entity.color,
        name: entity.name.clone(),
        alpha: entity.alpha,
        head: entity.head,
        alive: entity.alive,
        is_local,
    };
    ops.push(if created {
        Operation::CreatePlayer {
            id: id.clone(),
            appearance,
        }
    } else {
        Operation::UpdatePlayer {
            id: id.clone(),
            appearance,
        }
    });

    let count = record.body.len();
    for (index, position) in record.body.iter().enumerate() {
        let segment = Segment {
            position: *position,
            scale: segment_scale(index, count, record.size_ratio),
            visible: true,
        };
        let player = id.clone();
        match entity.segments.get_mut(index) {
            Some(slot) => {
                *slot = segment;
                ops.push(Operation::UpdateSegment {
                    player,
                    index,
                    segment,
                });
            }
            None => {
                entity.segments.push(segment);
                ops.push(Operation::CreateSegment {
                    player,
                    index,
                    segment,
                });
            }
        }
    }

    for (index, slot) in entity.segments.iter_mut().enumerate().skip(count) {
        if slot.visible {
            slot.visible = false;
            ops.push(Operation::HideSegment {
                player: id.clone(),
                index,
            });
        }
    }
}

/// Heading in radians for a facing vector.
pub fn head_rotation(direction: DVec2) -> f64 {
    direction.y.atan2(direction.x)
}

/// Linear taper from 1.0 at the head to `size_ratio` at the tail.
pub fn segment_scale(index: usize, count: usize, size_ratio: f64) -> f64 {
    if count <= 1 {
        return 1.0;
    }
    let t = index as f64 / (count - 1) as f64;
    1.0 + (size_ratio - 1.0) * t
}

fn sync_food(
    slots: &mut Vec<FoodEntity>,
    entries: &[Result<FoodRecord, SkipReason>],
    ops: &mut Vec<Operation>,
) {
    for (index, entry) in entries.iter().enumerate() {
        let food = match entry {
            Ok(record) => FoodEntity {
                kind: record.kind.clone(),
                position: record.position,
                visible: true,
            },
            Err(reason) => {
                warn!(index, %reason, "Skipping malformed food entry");
                // Keep positional addressing intact for the entries after it.
                if index >= slots.len() {
                    let food = FoodEntity::hidden();
                    slots.push(food.clone());
                    ops.push(Operation::CreateFood { index, food });
                }
                continue;
            }
        };

        match slots.get_mut(index) {
            Some(slot) => {
                *slot = food.clone();
                ops.push(Operation::UpdateFood { index, food });
            }
            None => {
                slots.push(food.clone());
                ops.push(Operation::CreateFood { index, food });
            }
        }
    }

    for (index, slot) in slots.iter_mut().enumerate().skip(entries.len()) {
        if slot.visible {
            slot.visible = false;
            ops.push(Operation::HideFood { index });
        }
    }
}

// ---------------------------------------------------------------------------
// WorldReconciler
// ---------------------------------------------------------------------------

/// Owns the world model and the rules derived from the join payload.
#[derive(Debug)]
pub struct WorldReconciler {
    world: WorldModel,
    names: EffectNames,
    default_decay: f64,
    rules: VisibilityRules,
}

impl WorldReconciler {
    pub fn new(names: EffectNames, default_decay: f64) -> Self {
        let rules = VisibilityRules::new(names.clone(), None, default_decay);
        Self {
            world: WorldModel::new(),
            names,
            default_decay,
            rules,
        }
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    pub fn rules(&self) -> &VisibilityRules {
        &self.rules
    }

    /// Record the local player and catalog. A second join before
    /// [`reset`](Self::reset) is ignored.
    pub fn join(&mut self, info: JoinInfo) -> bool {
        let player = info.player_id.clone();
        if !self.world.join(info) {
            warn!(
                player = %player,
                "Ignoring second join on the same connection"
            );
            return false;
        }
        self.rules = VisibilityRules::new(
            self.names.clone(),
            self.world.effect_catalog(),
            self.default_decay,
        );
        info!(player = %player, "Joined game");
        true
    }

    /// Reconcile against a parsed snapshot.
    pub fn apply(&mut self, snapshot: &Snapshot) -> Vec<Operation> {
        let world = std::mem::take(&mut self.world);
        let (world, ops) = apply_snapshot(world, snapshot, &self.rules);
        self.world = world;
        ops
    }

    /// Parse and reconcile a raw `game_state` message. A snapshot with the
    /// wrong top-level shape is logged and changes nothing.
    pub fn apply_message(&mut self, message: &Message) -> Vec<Operation> {
        match Snapshot::from_message(message) {
            Ok(snapshot) => self.apply(&snapshot),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed snapshot");
                Vec::new()
            }
        }
    }

    /// Clear everything after a disconnect. Returns the operations that
    /// take the renderer back to an empty scene.
    pub fn reset(&mut self) -> Vec<Operation> {
        let world = std::mem::take(&mut self.world);
        let mut ops: Vec<Operation> = world
            .players
            .into_keys()
            .map(|id| Operation::RemovePlayer { id })
            .collect();
        ops.extend(
            world
                .food
                .iter()
                .enumerate()
                .filter(|(_, f)| f.visible)
                .map(|(index, _)| Operation::HideFood { index }),
        );
        self.rules = VisibilityRules::new(self.names.clone(), None, self.default_decay);
        ops
    }

    /// Glow of the local player's head, if present.
    pub fn local_glow(&self) -> Option<Glow> {
        let id = self.world.local_player()?;
        self.world.players.get(id).map(|p| p.head.glow)
    }
}
