//! Client world state: snapshot parsing, the local world model, effect
//! visuals, and reconciliation of server snapshots into render operations.

pub mod effects;
pub mod ranking;
pub mod reconcile;
pub mod snapshot;
pub mod world;

pub use effects::{
    AlphaParams, EffectCatalog, EffectNames, EffectSpec, Glow, MIN_VISIBLE_ALPHA, VisibilityRules,
    alpha,
};
pub use ranking::{RankingEntry, leaderboard};
pub use reconcile::{Operation, PlayerAppearance, WorldReconciler, apply_snapshot};
pub use snapshot::{FoodRecord, PlayerRecord, SkipReason, Snapshot, SnapshotError};
pub use world::{FoodEntity, HeadVisual, JoinInfo, PlayerEntity, PlayerId, Rgb, Segment, WorldModel};
