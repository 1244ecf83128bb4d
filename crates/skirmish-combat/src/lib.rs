//! Combat rules for Skirmish.
//!
//! Everything here is synchronous and deterministic given a dice source.
//! The session layer wraps one [`CombatStateMachine`] per encounter and
//! feeds it commands one at a time.
//!
//! # Key types
//!
//! - [`CombatStateMachine`]: phases, turns, reactions, contests, overrides
//! - [`DiceEngine`]: rolls and verifies dice against a [`DiceRoll`]
//! - [`ResourceLedger`]: AP/energy pools, modifiers and wounds
//! - [`InitiativeScheduler`]: turn order with faction tie-breaks
//! - [`SkillContestResolver`]: opposed rolls and critical tiers
//! - [`CombatLobby`]: player readiness gate before combat
//! - [`Command`]: the closed set of inbound commands

mod command;
mod config;
mod contest;
mod dice;
mod effects;
mod error;
mod initiative;
mod ledger;
mod lobby;
mod log;
mod machine;
mod state;

pub use command::{
    CombatSummary, Command, CommandEnvelope, CommandOutcome, EntitySummary, OverrideAction,
};
pub use config::{CombatConfig, ReactionTrigger};
pub use contest::{ContestOutcome, CriticalThresholds, CriticalTier, SkillContestResolver};
pub use dice::{
    DEFAULT_MAX_DICE, DiceEngine, DiceError, DiceRoll, DieSource, RngSource, RollResult,
    ScriptedDice,
};
pub use effects::{apply_status, remove_status, tick_statuses};
pub use error::{CombatError, ErrorKind, Missing};
pub use initiative::{InitiativeCandidate, InitiativeMode, InitiativeScheduler, TiePriority};
pub use ledger::{AppliedDelta, ModifierOp, ResourceLedger, ResourceModifier, StackingPolicy};
pub use lobby::{CombatLobby, LobbyConfig, LobbySnapshot, LobbyState};
pub use log::{CombatLog, CombatLogEntry, LogKind};
pub use machine::CombatStateMachine;
pub use state::{
    CheckId, CheckRoll, CheckStatus, CombatSessionState, ContestId, ContestOrigin, ContestStatus,
    Entity, Faction, InitiativeEntry, PendingReaction, Phase, Pool, Reaction, ReactionWindow,
    Resource, SkillCheckRequest, SkillContestRequest, StatusEffect,
};
