//! The combat aggregate and everything it is made of.
//!
//! [`CombatSessionState`] is plain data: it derives `Clone` and `Serialize`
//! so a snapshot is just a clone, and a rejected command can be rolled back
//! by restoring the clone taken before it ran. All rules live in
//! [`CombatStateMachine`](crate::CombatStateMachine).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use skirmish_protocol::{Controller, EntityId};

use crate::contest::ContestOutcome;
use crate::dice::RollResult;
use crate::initiative::InitiativeMode;
use crate::ledger::ResourceModifier;
use crate::log::CombatLog;

// ---------------------------------------------------------------------------
// Pools and resources
// ---------------------------------------------------------------------------

/// A bounded counter. `current` never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pool {
    pub current: u32,
    pub max: u32,
}

impl Pool {
    /// Builds a pool, clamping `current` into `0..=max`.
    pub fn new(current: u32, max: u32) -> Self {
        Self {
            current: current.min(max),
            max,
        }
    }

    pub fn full(max: u32) -> Self {
        Self { current: max, max }
    }

    pub(crate) fn from_signed(current: i64, max: i64) -> Self {
        let max = u32::try_from(max.max(0)).unwrap_or(u32::MAX);
        let current = u32::try_from(current.max(0)).unwrap_or(u32::MAX);
        Self::new(current, max)
    }

    pub fn is_valid(&self) -> bool {
        self.current <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Ap,
    Energy,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ap => "AP",
            Self::Energy => "Energy",
        })
    }
}

/// The two sides of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Players,
    Enemies,
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Players => "players",
            Self::Enemies => "enemies",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub available: bool,
}

impl Default for Reaction {
    fn default() -> Self {
        Self { available: true }
    }
}

/// A named condition. `duration: None` is permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub key: String,
    pub stacks: u32,
    pub duration: Option<u32>,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A combatant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub controller: Controller,
    pub faction: Faction,
    #[serde(default)]
    pub skills: BTreeMap<String, i64>,
    #[serde(default)]
    pub ap: Pool,
    #[serde(default)]
    pub energy: Pool,
    #[serde(default)]
    pub tier: u32,
    #[serde(default)]
    pub reaction: Reaction,
    #[serde(default)]
    pub status_effects: Vec<StatusEffect>,
    #[serde(default)]
    pub wounds: BTreeMap<String, u32>,
    #[serde(default)]
    pub modifiers: Vec<ResourceModifier>,
    #[serde(default = "alive_default")]
    pub alive: bool,
}

fn alive_default() -> bool {
    true
}

impl Entity {
    pub fn new(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        controller: Controller,
        faction: Faction,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            controller,
            faction,
            skills: BTreeMap::new(),
            ap: Pool::default(),
            energy: Pool::default(),
            tier: 1,
            reaction: Reaction::default(),
            status_effects: Vec::new(),
            wounds: BTreeMap::new(),
            modifiers: Vec::new(),
            alive: true,
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>, value: i64) -> Self {
        self.skills.insert(skill.into(), value);
        self
    }

    /// Full AP pool of `max`.
    pub fn with_ap(mut self, max: u32) -> Self {
        self.ap = Pool::full(max);
        self
    }

    pub fn with_energy(mut self, max: u32) -> Self {
        self.energy = Pool::full(max);
        self
    }

    /// Skill value, 0 when the entity lacks the skill.
    pub fn skill(&self, name: &str) -> i64 {
        self.skills.get(name).copied().unwrap_or(0)
    }

    pub fn pool(&self, resource: Resource) -> Pool {
        match resource {
            Resource::Ap => self.ap,
            Resource::Energy => self.energy,
        }
    }

    pub fn pool_mut(&mut self, resource: Resource) -> &mut Pool {
        match resource {
            Resource::Ap => &mut self.ap,
            Resource::Energy => &mut self.energy,
        }
    }

    pub fn status(&self, key: &str) -> Option<&StatusEffect> {
        self.status_effects.iter().find(|s| s.key == key)
    }

    pub fn total_wounds(&self) -> u32 {
        self.wounds.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle of one combat.
///
/// ```text
/// Setup → InitiativeRolling → ActiveTurn ⇄ ReactionInterrupt
///                                  ↓
///                             Resolution → Completed
/// ```
///
/// `Completed` is reachable from every phase through `endCombat`, and a
/// round wrap with per-round rerolls goes back to `InitiativeRolling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Setup,
    InitiativeRolling,
    ActiveTurn,
    ReactionInterrupt,
    Resolution,
    Completed,
}

impl Phase {
    /// Whether the machine may move from `self` to `to`.
    pub fn can_transition_to(self, to: Phase) -> bool {
        match (self, to) {
            (Self::Completed, _) => false,
            (_, Self::Completed) => true,
            (Self::Setup, Self::InitiativeRolling)
            | (Self::InitiativeRolling, Self::ActiveTurn)
            | (
                Self::ActiveTurn,
                Self::ReactionInterrupt | Self::Resolution | Self::InitiativeRolling,
            )
            | (Self::ReactionInterrupt, Self::ActiveTurn | Self::Resolution)
            | (Self::Resolution, Self::ActiveTurn) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::InitiativeRolling => "initiative-rolling",
            Self::ActiveTurn => "active-turn",
            Self::ReactionInterrupt => "reaction-interrupt",
            Self::Resolution => "resolution",
            Self::Completed => "completed",
        })
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// A buffered reaction, applied when the window resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReaction {
    pub entity_id: EntityId,
    pub reaction_type: String,
    pub ap_cost: u32,
    pub target_id: Option<EntityId>,
}

/// The open reaction window following an interruptible action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionWindow {
    /// Log id of the `action_declared` entry that opened the window.
    pub trigger_log_id: u64,
    pub actor_id: EntityId,
    pub action_type: String,
    pub eligible: BTreeSet<EntityId>,
    pub responded: BTreeSet<EntityId>,
}

impl ReactionWindow {
    pub fn all_responded(&self) -> bool {
        self.eligible.is_subset(&self.responded)
    }
}

// ---------------------------------------------------------------------------
// Contests and checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContestId(pub u64);

impl fmt::Display for ContestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckId(pub u64);

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    /// Waiting for the initiator's roll.
    Pending,
    AwaitingDefense,
    Resolved,
}

/// Whether a contest was opened during a normal turn or inside a
/// reaction window. Decides which log entry records its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestOrigin {
    Action,
    Reaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillContestRequest {
    pub contest_id: ContestId,
    pub initiator_id: EntityId,
    pub initiator_skill: String,
    pub initiator_roll: Option<RollResult>,
    pub target_id: EntityId,
    pub suggested_defense_skill: Option<String>,
    pub status: ContestStatus,
    pub defender_skill: Option<String>,
    pub defender_roll: Option<RollResult>,
    pub outcome: Option<ContestOutcome>,
    pub gm_can_resolve: bool,
    pub origin: ContestOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Rolled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRoll {
    pub roll: RollResult,
    /// `None` when the check had no target number.
    pub success: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCheckRequest {
    pub check_id: CheckId,
    pub target_entity_id: EntityId,
    pub skill: String,
    pub target_number: Option<i64>,
    pub dice_count: u32,
    pub keep_highest: bool,
    pub status: CheckStatus,
    pub roll_data: Option<CheckRoll>,
    pub gm_can_resolve: bool,
}

// ---------------------------------------------------------------------------
// Initiative
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiativeEntry {
    pub roll: RollResult,
    /// Rolled by the engine on the GM's request rather than submitted.
    pub forced: bool,
}

// ---------------------------------------------------------------------------
// CombatSessionState
// ---------------------------------------------------------------------------

/// Everything one combat knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatSessionState {
    pub phase: Phase,
    pub round: u32,
    pub turn_index: usize,
    pub initiative_order: Vec<EntityId>,
    pub active_entity_id: Option<EntityId>,
    pub entities: BTreeMap<EntityId, Entity>,
    pub pending_reactions: Vec<PendingReaction>,
    pub reaction_window: Option<ReactionWindow>,
    pub pending_skill_contests: BTreeMap<ContestId, SkillContestRequest>,
    pub pending_skill_checks: BTreeMap<CheckId, SkillCheckRequest>,
    pub log: CombatLog,
    pub initiative_rolls: BTreeMap<EntityId, InitiativeEntry>,
    pub initiative_mode: InitiativeMode,
    pub manual_initiative: bool,
}

impl CombatSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Factions present in the encounter that have no living member.
    pub fn wiped_factions(&self) -> Vec<Faction> {
        [Faction::Players, Faction::Enemies]
            .into_iter()
            .filter(|&faction| {
                let mut members = self.entities.values().filter(|e| e.faction == faction);
                let mut any = false;
                let all_dead = members.all(|e| {
                    any = true;
                    !e.alive
                });
                any && all_dead
            })
            .collect()
    }

    /// Structural invariants that must hold between commands.
    ///
    /// A violation means the engine itself is broken; the session layer
    /// treats it as fatal.
    pub fn check_invariants(&self) -> Result<(), String> {
        for entity in self.entities.values() {
            for (name, pool) in [("ap", entity.ap), ("energy", entity.energy)] {
                if !pool.is_valid() {
                    return Err(format!(
                        "{} {name} current {} exceeds max {}",
                        entity.id, pool.current, pool.max
                    ));
                }
            }
            if let Some(status) = entity
                .status_effects
                .iter()
                .find(|s| s.stacks == 0 || s.duration == Some(0))
            {
                return Err(format!("{} has exhausted status {}", entity.id, status.key));
            }
        }

        match self.phase {
            Phase::ActiveTurn | Phase::ReactionInterrupt => {
                let expected = self.initiative_order.get(self.turn_index);
                if expected.is_none() || expected != self.active_entity_id.as_ref() {
                    return Err(format!(
                        "active entity {:?} does not match turn index {}",
                        self.active_entity_id, self.turn_index
                    ));
                }
            }
            _ => {}
        }
        if (self.phase == Phase::ReactionInterrupt) != self.reaction_window.is_some() {
            return Err(format!(
                "reaction window present outside reaction-interrupt (phase {})",
                self.phase
            ));
        }
        if self.phase != Phase::ReactionInterrupt && !self.pending_reactions.is_empty() {
            return Err("reactions buffered outside a reaction window".to_string());
        }
        for id in &self.initiative_order {
            if !self.entities.contains_key(id) {
                return Err(format!("initiative order names unknown entity {id}"));
            }
        }
        for (id, contest) in &self.pending_skill_contests {
            if *id != contest.contest_id {
                return Err(format!("contest {id} stored under the wrong key"));
            }
        }
        for (id, check) in &self.pending_skill_checks {
            if *id != check.check_id {
                return Err(format!("skill check {id} stored under the wrong key"));
            }
        }
        self.log.check_dense()
    }
}
