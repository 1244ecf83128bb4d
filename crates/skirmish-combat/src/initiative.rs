//! Turn order from initiative totals.
//!
//! The scheduler is a pure function of its inputs: the same totals always
//! produce the same order, so a replayed session schedules identically.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use skirmish_protocol::EntityId;

use crate::state::Faction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiativeMode {
    /// Every entity takes its own place in the order.
    #[default]
    Individual,
    /// Each faction acts as a block.
    Group,
}

/// Which faction goes first when totals tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePriority {
    #[default]
    PlayersFirst,
    EnemiesFirst,
    /// Alternate factions, players first.
    Interleaved,
}

/// One entity's initiative result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiativeCandidate {
    pub entity_id: EntityId,
    pub faction: Faction,
    pub total: i64,
}

impl InitiativeCandidate {
    pub fn new(entity_id: impl Into<EntityId>, faction: Faction, total: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            faction,
            total,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitiativeScheduler {
    priority: TiePriority,
}

impl InitiativeScheduler {
    pub fn new(priority: TiePriority) -> Self {
        Self { priority }
    }

    pub fn order(&self, mode: InitiativeMode, candidates: &[InitiativeCandidate]) -> Vec<EntityId> {
        match mode {
            InitiativeMode::Individual => self.order_individual(candidates),
            InitiativeMode::Group => self.order_group(candidates),
        }
    }

    /// Descending total; a tie group is split by faction priority, then
    /// by ascending entity id.
    fn order_individual(&self, candidates: &[InitiativeCandidate]) -> Vec<EntityId> {
        let mut sorted: Vec<&InitiativeCandidate> = candidates.iter().collect();
        sorted.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then_with(|| self.rank(a.faction).cmp(&self.rank(b.faction)))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });

        if self.priority != TiePriority::Interleaved {
            return sorted.into_iter().map(|c| c.entity_id.clone()).collect();
        }

        let mut order = Vec::with_capacity(sorted.len());
        for group in sorted.chunk_by(|a, b| a.total == b.total) {
            let (players, enemies) = split_by_faction(group.iter().copied());
            order.extend(interleave(players, enemies));
        }
        order
    }

    /// The faction with the better best member acts first, all of it.
    fn order_group(&self, candidates: &[InitiativeCandidate]) -> Vec<EntityId> {
        let mut sorted: Vec<&InitiativeCandidate> = candidates.iter().collect();
        sorted.sort_by_key(|c| (Reverse(c.total), c.entity_id.clone()));
        let block_total = |faction: Faction| {
            sorted
                .iter()
                .find(|c| c.faction == faction)
                .map(|c| c.total)
        };
        let players_best = block_total(Faction::Players);
        let enemies_best = block_total(Faction::Enemies);
        let (players, enemies) = split_by_faction(sorted.iter().copied());

        match (players_best, enemies_best) {
            (Some(p), Some(e)) if p > e => chain(players, enemies),
            (Some(p), Some(e)) if e > p => chain(enemies, players),
            _ => match self.priority {
                TiePriority::PlayersFirst => chain(players, enemies),
                TiePriority::EnemiesFirst => chain(enemies, players),
                TiePriority::Interleaved => interleave(players, enemies),
            },
        }
    }

    fn rank(&self, faction: Faction) -> u8 {
        match (self.priority, faction) {
            (TiePriority::EnemiesFirst, Faction::Enemies) => 0,
            (TiePriority::EnemiesFirst, Faction::Players) => 1,
            (_, Faction::Players) => 0,
            (_, Faction::Enemies) => 1,
        }
    }
}

fn split_by_faction<'a>(
    candidates: impl Iterator<Item = &'a InitiativeCandidate>,
) -> (Vec<EntityId>, Vec<EntityId>) {
    let mut players = Vec::new();
    let mut enemies = Vec::new();
    for c in candidates {
        match c.faction {
            Faction::Players => players.push(c.entity_id.clone()),
            Faction::Enemies => enemies.push(c.entity_id.clone()),
        }
    }
    (players, enemies)
}

fn chain(first: Vec<EntityId>, second: Vec<EntityId>) -> Vec<EntityId> {
    first.into_iter().chain(second).collect()
}

/// `[a1, b1, a2, b2, ...]`, with the leftovers of the longer list last.
fn interleave(a: Vec<EntityId>, b: Vec<EntityId>) -> Vec<EntityId> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter();
    let mut b = b.into_iter();
    loop {
        match (a.next(), b.next()) {
            (None, None) => break,
            (x, y) => out.extend(x.into_iter().chain(y)),
        }
    }
    out
}
