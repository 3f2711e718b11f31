//! Leaderboard rows built from the world model.

use crate::world::{PlayerId, WorldModel};

/// Prefix marking the local player's row.
pub const LOCAL_MARKER: &str = "->";

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub id: PlayerId,
    pub rank: u32,
    pub is_local: bool,
    pub text: String,
}

/// Rows ordered by rank, then id. Unranked players (rank 0) go last.
pub fn leaderboard(world: &WorldModel) -> Vec<RankingEntry> {
    let mut rows: Vec<RankingEntry> = world
        .players
        .iter()
        .map(|(id, player)| {
            let is_local = world.is_local(id);
            let text = format!(
                "{marker}{id}: {name} (HP={hp}) {score} pts - {status} {live:.1}s",
                marker = if is_local { LOCAL_MARKER } else { "" },
                name = player.name,
                hp = player.hp,
                score = player.score,
                status = if player.alive { "alive" } else { "dead" },
                live = player.live_time,
            );
            RankingEntry {
                id: id.clone(),
                rank: player.rank,
                is_local,
                text,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        (a.rank == 0, a.rank, &a.id).cmp(&(b.rank == 0, b.rank, &b.id))
    });
    rows
}
