//! The closed set of inbound commands and what they return.
//!
//! On the wire a command is internally tagged:
//!
//! ```json
//! { "type": "declareAction", "entityId": "hero", "actionType": "strike", "apCost": 2 }
//! ```
//!
//! and travels inside a [`CommandEnvelope`] naming the actor.

use serde::{Deserialize, Serialize};
use skirmish_protocol::{Controller, EntityId};

use crate::contest::ContestOutcome;
use crate::initiative::InitiativeMode;
use crate::ledger::ResourceModifier;
use crate::state::{
    CheckId, CheckRoll, ContestId, ContestStatus, Entity, Pool, Resource, StatusEffect,
};

fn default_true() -> bool {
    true
}

fn default_stacks() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    StartCombat {
        entities: Vec<Entity>,
        #[serde(default)]
        initiative_mode: InitiativeMode,
        #[serde(default)]
        manual: bool,
    },
    SubmitInitiativeRoll {
        entity_id: EntityId,
        raw: Vec<u32>,
    },
    ForceInitiativeRoll {
        entity_id: EntityId,
    },
    DeclareAction {
        entity_id: EntityId,
        action_type: String,
        ap_cost: u32,
        #[serde(default)]
        target_id: Option<EntityId>,
        #[serde(default)]
        interruptible: bool,
    },
    DeclareReaction {
        entity_id: EntityId,
        reaction_type: String,
        #[serde(default)]
        ap_cost: u32,
        #[serde(default)]
        target_id: Option<EntityId>,
    },
    DeclineReaction {
        entity_id: EntityId,
    },
    ResolveReactions,
    EndTurn {
        entity_id: EntityId,
        #[serde(default = "default_true")]
        voluntary: bool,
    },
    InitiateSkillContest {
        initiator_id: EntityId,
        target_id: EntityId,
        skill: String,
        #[serde(default)]
        roll: Option<Vec<u32>>,
        #[serde(default)]
        suggested_defense_skill: Option<String>,
        #[serde(default)]
        gm_can_resolve: bool,
    },
    RespondToSkillContest {
        contest_id: ContestId,
        entity_id: EntityId,
        skill: String,
        #[serde(default)]
        roll: Option<Vec<u32>>,
    },
    RequestSkillCheck {
        target_entity_id: EntityId,
        skill: String,
        #[serde(default)]
        target_number: Option<i64>,
        dice_count: u32,
        #[serde(default = "default_true")]
        keep_highest: bool,
        #[serde(default)]
        gm_can_resolve: bool,
    },
    SubmitSkillCheck {
        check_id: CheckId,
        #[serde(default)]
        roll: Option<Vec<u32>>,
    },
    GmOverride {
        target_entity_id: EntityId,
        action: OverrideAction,
        reason: String,
    },
    EndCombat {
        reason: String,
    },
    JoinLobby,
    LeaveLobby,
    SetReady {
        ready: bool,
    },
}

impl Command {
    /// The wire name, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartCombat { .. } => "startCombat",
            Self::SubmitInitiativeRoll { .. } => "submitInitiativeRoll",
            Self::ForceInitiativeRoll { .. } => "forceInitiativeRoll",
            Self::DeclareAction { .. } => "declareAction",
            Self::DeclareReaction { .. } => "declareReaction",
            Self::DeclineReaction { .. } => "declineReaction",
            Self::ResolveReactions => "resolveReactions",
            Self::EndTurn { .. } => "endTurn",
            Self::InitiateSkillContest { .. } => "initiateSkillContest",
            Self::RespondToSkillContest { .. } => "respondToSkillContest",
            Self::RequestSkillCheck { .. } => "requestSkillCheck",
            Self::SubmitSkillCheck { .. } => "submitSkillCheck",
            Self::GmOverride { .. } => "gmOverride",
            Self::EndCombat { .. } => "endCombat",
            Self::JoinLobby => "joinLobby",
            Self::LeaveLobby => "leaveLobby",
            Self::SetReady { .. } => "setReady",
        }
    }

    pub fn is_gm_only(&self) -> bool {
        matches!(
            self,
            Self::StartCombat { .. }
                | Self::ForceInitiativeRoll { .. }
                | Self::ResolveReactions
                | Self::RequestSkillCheck { .. }
                | Self::GmOverride { .. }
                | Self::EndCombat { .. }
        )
    }

    pub fn is_lobby(&self) -> bool {
        matches!(self, Self::JoinLobby | Self::LeaveLobby | Self::SetReady { .. })
    }
}

/// Direct GM mutations. Each skips turn and phase validation but still
/// needs an existing target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OverrideAction {
    AdjustResource {
        resource: Resource,
        delta: i64,
    },
    SetResource {
        resource: Resource,
        #[serde(default)]
        current: Option<u32>,
        #[serde(default)]
        max: Option<u32>,
    },
    AddWounds {
        wound_type: String,
        count: u32,
    },
    ApplyModifier {
        modifier: ResourceModifier,
    },
    RemoveModifier {
        resource: Resource,
        source: String,
    },
    ApplyStatus {
        key: String,
        #[serde(default = "default_stacks")]
        stacks: u32,
        #[serde(default)]
        duration: Option<u32>,
    },
    RemoveStatus {
        key: String,
    },
    SetAlive {
        alive: bool,
    },
    SetReaction {
        available: bool,
    },
    /// Moves the turn pointer to the target.
    JumpToTurn,
    /// Ends the target's turn without it acting.
    SkipTurn,
}

impl OverrideAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AdjustResource { .. } => "adjustResource",
            Self::SetResource { .. } => "setResource",
            Self::AddWounds { .. } => "addWounds",
            Self::ApplyModifier { .. } => "applyModifier",
            Self::RemoveModifier { .. } => "removeModifier",
            Self::ApplyStatus { .. } => "applyStatus",
            Self::RemoveStatus { .. } => "removeStatus",
            Self::SetAlive { .. } => "setAlive",
            Self::SetReaction { .. } => "setReaction",
            Self::JumpToTurn => "jumpToTurn",
            Self::SkipTurn => "skipTurn",
        }
    }
}

/// A command plus who sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub actor: Controller,
    /// Revision the client last saw. A mismatch rejects the command.
    #[serde(default)]
    pub expected_revision: Option<u64>,
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(actor: Controller, command: Command) -> Self {
        Self {
            actor,
            expected_revision: None,
            command,
        }
    }

    pub fn at_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

/// What an accepted command produced, beyond the state change itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CommandOutcome {
    Accepted,
    ContestUpdated {
        contest_id: ContestId,
        status: ContestStatus,
    },
    ContestResolved {
        contest_id: ContestId,
        outcome: ContestOutcome,
    },
    CheckRequested {
        check_id: CheckId,
    },
    CheckRolled {
        check_id: CheckId,
        result: CheckRoll,
    },
    CombatEnded {
        summary: CombatSummary,
    },
}

/// Post-combat report for the roster collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatSummary {
    pub reason: String,
    pub rounds: u32,
    pub entities: Vec<EntitySummary>,
    pub invalidated_contests: Vec<ContestId>,
    pub invalidated_checks: Vec<CheckId>,
    pub log_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub id: EntityId,
    pub name: String,
    pub alive: bool,
    pub ap: Pool,
    pub energy: Pool,
    pub wounds: std::collections::BTreeMap<String, u32>,
    pub status_effects: Vec<StatusEffect>,
}

impl From<&Entity> for EntitySummary {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            alive: entity.alive,
            ap: entity.ap,
            energy: entity.energy,
            wounds: entity.wounds.clone(),
            status_effects: entity.status_effects.clone(),
        }
    }
}
