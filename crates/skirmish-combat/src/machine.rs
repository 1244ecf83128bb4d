//! The combat state machine.
//!
//! [`CombatStateMachine`] owns one [`CombatSessionState`] and is the only
//! thing that mutates it. Every public operation is a transaction: the
//! state is cloned before the operation runs and restored if it fails, so
//! a rejected command never leaves a partial change behind.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use skirmish_protocol::EntityId;

use crate::command::{CombatSummary, CommandOutcome, EntitySummary, OverrideAction};
use crate::config::{CombatConfig, ReactionTrigger};
use crate::contest::{ContestOutcome, SkillContestResolver};
use crate::dice::{DiceEngine, DiceRoll, RollResult};
use crate::effects;
use crate::error::{CombatError, Missing};
use crate::initiative::{InitiativeCandidate, InitiativeMode, InitiativeScheduler};
use crate::ledger::ResourceLedger;
use crate::log::LogKind;
use crate::state::{
    CheckId, CheckRoll, CheckStatus, CombatSessionState, ContestId, ContestOrigin, ContestStatus,
    Entity, InitiativeEntry, PendingReaction, Phase, ReactionWindow, Resource, SkillCheckRequest,
    SkillContestRequest,
};

pub struct CombatStateMachine {
    state: CombatSessionState,
    config: CombatConfig,
    dice: DiceEngine,
    ledger: ResourceLedger,
    resolver: SkillContestResolver,
    scheduler: InitiativeScheduler,
}

impl std::fmt::Debug for CombatStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombatStateMachine")
            .field("phase", &self.state.phase)
            .field("round", &self.state.round)
            .field("entities", &self.state.entities.len())
            .finish_non_exhaustive()
    }
}

impl CombatStateMachine {
    /// Builds a machine in `Setup`. The config is clamped before use and the
    /// dice engine inherits its `max_dice` limit.
    pub fn new(config: CombatConfig, dice: DiceEngine) -> Self {
        let config = config.validated();
        Self {
            dice: dice.with_max_dice(config.max_dice),
            ledger: ResourceLedger::new(config.stacking),
            resolver: SkillContestResolver::new(config.thresholds),
            scheduler: InitiativeScheduler::new(config.tie_priority),
            state: CombatSessionState::new(),
            config,
        }
    }

    /// Borrowed view of the live state.
    pub fn state(&self) -> &CombatSessionState {
        &self.state
    }

    /// The validated config in effect.
    pub fn config(&self) -> &CombatConfig {
        &self.config
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Whether combat has ended. A completed machine rejects every command.
    pub fn is_completed(&self) -> bool {
        self.state.phase == Phase::Completed
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> CombatSessionState {
        self.state.clone()
    }

    // -----------------------------------------------------------------------
    // Setup and initiative
    // -----------------------------------------------------------------------

    /// Loads the roster and moves to initiative.
    ///
    /// Without `manual` every entity is rolled immediately and the machine
    /// passes straight through to the first turn. With `manual` only
    /// GM-controlled entities are rolled; players submit their own.
    pub fn start_combat(
        &mut self,
        entities: Vec<Entity>,
        mode: InitiativeMode,
        manual: bool,
    ) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;
            if m.state.phase != Phase::Setup {
                return Err(CombatError::validation("combat already started"));
            }
            if entities.is_empty() {
                return Err(CombatError::NoCombatants);
            }

            let mut roster = BTreeMap::new();
            for entity in entities {
                if !entity.ap.is_valid() || !entity.energy.is_valid() {
                    return Err(CombatError::validation(format!(
                        "{} has a pool above its max",
                        entity.id
                    )));
                }
                if roster.contains_key(&entity.id) {
                    return Err(CombatError::validation(format!(
                        "duplicate entity id {}",
                        entity.id
                    )));
                }
                roster.insert(entity.id.clone(), entity);
            }

            let ids: Vec<&EntityId> = roster.keys().collect();
            m.state.log.append(
                LogKind::CombatStarted,
                None,
                None,
                json!({ "entities": ids, "initiativeMode": mode, "manual": manual }),
            );
            tracing::info!(entities = roster.len(), ?mode, manual, "combat started");

            m.state.entities = roster;
            m.state.initiative_mode = mode;
            m.state.manual_initiative = manual;
            m.state.phase = Phase::InitiativeRolling;

            m.roll_pending_initiative(!manual)?;
            m.complete_initiative_if_ready()
        })
    }

    /// Records a player's own initiative dice. The engine recomputes the
    /// total from the faces.
    pub fn submit_initiative_roll(
        &mut self,
        entity_id: &EntityId,
        raw: &[u32],
    ) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.check_initiative_pending(entity_id)?;
            m.roll_initiative(entity_id, Some(raw), false)?;
            m.complete_initiative_if_ready()
        })
    }

    /// Rolls on behalf of an entity that hasn't submitted.
    pub fn force_initiative_roll(&mut self, entity_id: &EntityId) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.check_initiative_pending(entity_id)?;
            m.roll_initiative(entity_id, None, true)?;
            m.complete_initiative_if_ready()
        })
    }

    // -----------------------------------------------------------------------
    // Actions and reactions
    // -----------------------------------------------------------------------

    /// Spends `ap_cost` AP from the active entity and logs the action.
    ///
    /// An interruptible action opens a reaction window for every other living
    /// entity with its reaction available. If nobody is eligible the turn
    /// stays in `ActiveTurn`.
    pub fn declare_action(
        &mut self,
        entity_id: &EntityId,
        action_type: &str,
        ap_cost: u32,
        target_id: Option<&EntityId>,
        interruptible: bool,
    ) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.require_phase(Phase::ActiveTurn, "declare an action")?;
            m.require_active(entity_id)?;
            if let Some(target) = target_id {
                entity(&m.state.entities, target)?;
            }

            let actor = entity_mut(&mut m.state.entities, entity_id)?;
            ResourceLedger::ensure_available(actor, Resource::Ap, ap_cost)?;
            let trigger = m.state.log.append(
                LogKind::ActionDeclared,
                Some(entity_id),
                target_id,
                json!({
                    "actionType": action_type,
                    "apCost": ap_cost,
                    "interruptible": interruptible,
                }),
            );
            m.ledger.spend(actor, &mut m.state.log, Resource::Ap, ap_cost)?;
            tracing::debug!(entity = %entity_id, action = action_type, ap_cost, "action declared");

            if !interruptible {
                return Ok(());
            }
            let eligible: BTreeSet<EntityId> = m
                .state
                .entities
                .values()
                .filter(|e| e.alive && e.id != *entity_id && e.reaction.available)
                .map(|e| e.id.clone())
                .collect();
            if eligible.is_empty() {
                return Ok(());
            }
            m.state.reaction_window = Some(ReactionWindow {
                trigger_log_id: trigger,
                actor_id: entity_id.clone(),
                action_type: action_type.to_string(),
                eligible,
                responded: BTreeSet::new(),
            });
            m.change_phase(Phase::ReactionInterrupt)
        })
    }

    /// Buffers a reaction. AP is checked now and deducted at resolution.
    pub fn declare_reaction(
        &mut self,
        entity_id: &EntityId,
        reaction_type: &str,
        ap_cost: u32,
        target_id: Option<&EntityId>,
    ) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.require_phase(Phase::ReactionInterrupt, "declare a reaction")?;
            m.check_reactor(entity_id)?;
            if let Some(target) = target_id {
                entity(&m.state.entities, target)?;
            }
            let reactor = entity(&m.state.entities, entity_id)?;
            ResourceLedger::ensure_available(reactor, Resource::Ap, ap_cost)?;

            m.state.pending_reactions.push(PendingReaction {
                entity_id: entity_id.clone(),
                reaction_type: reaction_type.to_string(),
                ap_cost,
                target_id: target_id.cloned(),
            });
            m.mark_responded(entity_id);
            m.state.log.append(
                LogKind::ReactionDeclared,
                Some(entity_id),
                target_id,
                json!({ "reactionType": reaction_type, "apCost": ap_cost }),
            );
            m.close_window_if_complete()
        })
    }

    /// Passes on the open window. The window closes once every eligible
    /// entity has declared or declined.
    pub fn decline_reaction(&mut self, entity_id: &EntityId) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.require_phase(Phase::ReactionInterrupt, "decline a reaction")?;
            m.check_reactor(entity_id)?;
            m.mark_responded(entity_id);
            m.state
                .log
                .append(LogKind::ReactionDeclined, Some(entity_id), None, json!({}));
            m.close_window_if_complete()
        })
    }

    /// Applies buffered reactions in arrival order and returns to the
    /// active turn.
    pub fn resolve_reactions(&mut self) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.require_phase(Phase::ReactionInterrupt, "resolve reactions")?;
            m.resolve_window()
        })
    }

    // -----------------------------------------------------------------------
    // Contests and checks
    // -----------------------------------------------------------------------

    /// Opens an opposed roll. With `roll` the initiator's faces are
    /// recorded at once and the contest waits for the defender; without it
    /// the contest waits for the initiator.
    pub fn initiate_skill_contest(
        &mut self,
        initiator_id: &EntityId,
        target_id: &EntityId,
        skill: &str,
        roll: Option<&[u32]>,
        suggested_defense_skill: Option<&str>,
        gm_can_resolve: bool,
    ) -> Result<CommandOutcome, CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;
            let origin = match m.state.phase {
                Phase::ActiveTurn | Phase::Resolution => ContestOrigin::Action,
                Phase::ReactionInterrupt => ContestOrigin::Reaction,
                phase => {
                    return Err(CombatError::validation(format!(
                        "cannot start a contest during {phase}"
                    )));
                }
            };
            entity(&m.state.entities, initiator_id)?;
            entity(&m.state.entities, target_id)?;
            if initiator_id == target_id {
                return Err(CombatError::validation("an entity cannot contest itself"));
            }

            let initiator_roll = match roll {
                Some(raw) => Some(m.contest_roll(initiator_id, skill, Some(raw))?),
                None => {
                    require_skill(skill)?;
                    None
                }
            };
            let status = if initiator_roll.is_some() {
                ContestStatus::AwaitingDefense
            } else {
                ContestStatus::Pending
            };
            let contest_id = ContestId(
                m.state
                    .pending_skill_contests
                    .last_key_value()
                    .map_or(1, |(id, _)| id.0 + 1),
            );

            m.state.log.append(
                LogKind::SkillContestInitiated,
                Some(initiator_id),
                Some(target_id),
                json!({
                    "contestId": contest_id,
                    "skill": skill,
                    "status": status,
                    "initiatorTotal": initiator_roll.as_ref().map(|r| r.total),
                    "gmCanResolve": gm_can_resolve,
                }),
            );
            m.state.pending_skill_contests.insert(
                contest_id,
                SkillContestRequest {
                    contest_id,
                    initiator_id: initiator_id.clone(),
                    initiator_skill: skill.to_string(),
                    initiator_roll,
                    target_id: target_id.clone(),
                    suggested_defense_skill: suggested_defense_skill.map(str::to_string),
                    status,
                    defender_skill: None,
                    defender_roll: None,
                    outcome: None,
                    gm_can_resolve,
                    origin,
                },
            );

            if status == ContestStatus::AwaitingDefense {
                if let Some(outcome) = m.auto_defend(contest_id)? {
                    return Ok(CommandOutcome::ContestResolved {
                        contest_id,
                        outcome,
                    });
                }
            }
            Ok(CommandOutcome::ContestUpdated { contest_id, status })
        })
    }

    /// Records the next roll a contest is waiting for: the initiator's on
    /// a pending contest, the defender's otherwise. `roll: None` lets the
    /// engine roll.
    pub fn respond_to_skill_contest(
        &mut self,
        contest_id: ContestId,
        entity_id: &EntityId,
        skill: &str,
        roll: Option<&[u32]>,
    ) -> Result<CommandOutcome, CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;
            let contest = m.contest(contest_id)?;
            let (status, initiator_id, target_id) = (
                contest.status,
                contest.initiator_id.clone(),
                contest.target_id.clone(),
            );
            entity(&m.state.entities, entity_id)?;

            match status {
                ContestStatus::Resolved => {
                    Err(CombatError::AlreadyResolved(format!("contest {contest_id}")))
                }
                ContestStatus::Pending => {
                    if *entity_id != initiator_id {
                        return Err(CombatError::validation(format!(
                            "contest {contest_id} is waiting for {initiator_id} to roll"
                        )));
                    }
                    let rolled = m.contest_roll(entity_id, skill, roll)?;
                    let total = rolled.total;
                    if let Some(contest) = m.state.pending_skill_contests.get_mut(&contest_id) {
                        contest.initiator_skill = skill.to_string();
                        contest.initiator_roll = Some(rolled);
                        contest.status = ContestStatus::AwaitingDefense;
                    }
                    m.state.log.append(
                        LogKind::SkillContestRolled,
                        Some(entity_id),
                        Some(&target_id),
                        json!({ "contestId": contest_id, "side": "initiator", "total": total }),
                    );
                    if let Some(outcome) = m.auto_defend(contest_id)? {
                        return Ok(CommandOutcome::ContestResolved {
                            contest_id,
                            outcome,
                        });
                    }
                    Ok(CommandOutcome::ContestUpdated {
                        contest_id,
                        status: ContestStatus::AwaitingDefense,
                    })
                }
                ContestStatus::AwaitingDefense => {
                    if *entity_id != target_id {
                        return Err(CombatError::validation(format!(
                            "{entity_id} is not the defender in contest {contest_id}"
                        )));
                    }
                    let outcome = m.defend(contest_id, entity_id, skill, roll)?;
                    Ok(CommandOutcome::ContestResolved {
                        contest_id,
                        outcome,
                    })
                }
            }
        })
    }

    /// GM-requested check, independent of turn order.
    pub fn request_skill_check(
        &mut self,
        target_entity_id: &EntityId,
        skill: &str,
        target_number: Option<i64>,
        dice_count: u32,
        keep_highest: bool,
        gm_can_resolve: bool,
    ) -> Result<CommandOutcome, CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;
            if m.state.phase == Phase::Setup {
                return Err(CombatError::validation("combat has not started"));
            }
            entity(&m.state.entities, target_entity_id)?;
            require_skill(skill)?;
            DiceRoll::new(dice_count, m.config.check_die_size).validate(m.dice.max_dice())?;

            let check_id = CheckId(
                m.state
                    .pending_skill_checks
                    .last_key_value()
                    .map_or(1, |(id, _)| id.0 + 1),
            );
            m.state.pending_skill_checks.insert(
                check_id,
                SkillCheckRequest {
                    check_id,
                    target_entity_id: target_entity_id.clone(),
                    skill: skill.to_string(),
                    target_number,
                    dice_count,
                    keep_highest,
                    status: CheckStatus::Pending,
                    roll_data: None,
                    gm_can_resolve,
                },
            );
            m.state.log.append(
                LogKind::SkillCheckRequested,
                None,
                Some(target_entity_id),
                json!({
                    "checkId": check_id,
                    "skill": skill,
                    "targetNumber": target_number,
                    "diceCount": dice_count,
                    "keepHighest": keep_highest,
                }),
            );
            Ok(CommandOutcome::CheckRequested { check_id })
        })
    }

    /// Rolls a pending check with the target's skill as the modifier.
    ///
    /// `roll` supplies client dice, which must match the check's dice count
    /// and die size. A check can be rolled once.
    pub fn submit_skill_check(
        &mut self,
        check_id: CheckId,
        roll: Option<&[u32]>,
    ) -> Result<CommandOutcome, CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;
            let check = m.check(check_id)?;
            if check.status == CheckStatus::Rolled {
                return Err(CombatError::AlreadyResolved(format!("skill check {check_id}")));
            }
            let target_id = check.target_entity_id.clone();
            let target_number = check.target_number;
            let bonus = entity(&m.state.entities, &target_id)?.skill(&check.skill);
            let mut spec =
                DiceRoll::new(check.dice_count, m.config.check_die_size).with_modifier(bonus);
            if !check.keep_highest {
                spec = spec.keep_lowest();
            }

            let rolled = m.roll_or_verify(&spec, roll)?;
            let result = CheckRoll {
                success: target_number.map(|tn| rolled.total >= tn),
                roll: rolled,
            };
            if let Some(check) = m.state.pending_skill_checks.get_mut(&check_id) {
                check.status = CheckStatus::Rolled;
                check.roll_data = Some(result.clone());
            }
            m.state.log.append(
                LogKind::SkillCheckRolled,
                None,
                Some(&target_id),
                json!({
                    "checkId": check_id,
                    "raw": result.roll.raw,
                    "total": result.roll.total,
                    "success": result.success,
                }),
            );
            Ok(CommandOutcome::CheckRolled { check_id, result })
        })
    }

    // -----------------------------------------------------------------------
    // Turns
    // -----------------------------------------------------------------------

    /// Ends the active entity's turn and hands off to the next living entity,
    /// starting a new round when the order wraps. Refused while a reaction
    /// window is open.
    pub fn end_turn(&mut self, entity_id: &EntityId, voluntary: bool) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;
            if m.state.phase == Phase::ReactionInterrupt {
                return Err(CombatError::validation(
                    "cannot end a turn while a reaction window is open",
                ));
            }
            m.require_phase(Phase::ActiveTurn, "end a turn")?;
            m.require_active(entity_id)?;
            m.state.log.append(
                LogKind::TurnEnded,
                Some(entity_id),
                None,
                json!({ "voluntary": voluntary }),
            );
            m.advance_turn()
        })
    }

    // -----------------------------------------------------------------------
    // GM overrides
    // -----------------------------------------------------------------------

    /// Direct GM mutation. Skips turn validation; the target must exist.
    pub fn gm_override(
        &mut self,
        target_id: &EntityId,
        action: OverrideAction,
        reason: &str,
    ) -> Result<(), CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;
            if reason.trim().is_empty() {
                return Err(CombatError::validation("an override needs a reason"));
            }
            entity(&m.state.entities, target_id)?;
            m.state.log.append(
                LogKind::GmOverride,
                None,
                Some(target_id),
                json!({ "kind": action.name(), "reason": reason, "action": action }),
            );
            tracing::info!(target = %target_id, kind = action.name(), reason, "gm override");

            let log = &mut m.state.log;
            let target = entity_mut(&mut m.state.entities, target_id)?;
            match action {
                OverrideAction::AdjustResource { resource, delta } => {
                    m.ledger.adjust(target, log, resource, delta);
                }
                OverrideAction::SetResource {
                    resource,
                    current,
                    max,
                } => {
                    m.ledger.set_pool(target, log, resource, current, max);
                }
                OverrideAction::AddWounds { wound_type, count } => {
                    m.ledger.add_wounds(target, log, &wound_type, count)?;
                }
                OverrideAction::ApplyModifier { modifier } => {
                    m.ledger.apply_modifier(target, log, modifier)?;
                }
                OverrideAction::RemoveModifier { resource, source } => {
                    m.ledger.remove_modifier(target, log, resource, &source)?;
                }
                OverrideAction::ApplyStatus {
                    key,
                    stacks,
                    duration,
                } => {
                    let effect = effects::apply_status(target, &key, stacks, duration)?;
                    log.append(
                        LogKind::StatusApplied,
                        None,
                        Some(target_id),
                        json!({ "key": effect.key, "stacks": effect.stacks, "duration": effect.duration }),
                    );
                }
                OverrideAction::RemoveStatus { key } => {
                    let effect = effects::remove_status(target, &key)?;
                    log.append(
                        LogKind::StatusRemoved,
                        None,
                        Some(target_id),
                        json!({ "key": effect.key }),
                    );
                }
                OverrideAction::SetReaction { available } => {
                    target.reaction.available = available;
                }
                OverrideAction::SetAlive { alive } => m.set_alive(target_id, alive)?,
                OverrideAction::JumpToTurn => m.jump_to_turn(target_id)?,
                OverrideAction::SkipTurn => m.skip_turn(target_id)?,
            }

            if m.state.phase == Phase::InitiativeRolling {
                m.complete_initiative_if_ready()?;
            }
            m.update_resolution()
        })
    }

    // -----------------------------------------------------------------------
    // End
    // -----------------------------------------------------------------------

    /// Completes the combat. Unresolved contests and checks are dropped.
    pub fn end_combat(&mut self, reason: &str) -> Result<CombatSummary, CombatError> {
        self.transaction(|m| {
            m.ensure_live()?;

            let invalidated_contests: Vec<ContestId> = m
                .state
                .pending_skill_contests
                .values()
                .filter(|c| c.status != ContestStatus::Resolved)
                .map(|c| c.contest_id)
                .collect();
            m.state
                .pending_skill_contests
                .retain(|_, c| c.status == ContestStatus::Resolved);
            let invalidated_checks: Vec<CheckId> = m
                .state
                .pending_skill_checks
                .values()
                .filter(|c| c.status == CheckStatus::Pending)
                .map(|c| c.check_id)
                .collect();
            m.state
                .pending_skill_checks
                .retain(|_, c| c.status == CheckStatus::Rolled);

            m.state.reaction_window = None;
            m.state.pending_reactions.clear();
            m.state.active_entity_id = None;
            m.change_phase(Phase::Completed)?;

            let rounds = m.state.round;
            m.state.log.append(
                LogKind::CombatEnded,
                None,
                None,
                json!({
                    "reason": reason,
                    "rounds": rounds,
                    "invalidatedContests": invalidated_contests,
                    "invalidatedChecks": invalidated_checks,
                }),
            );
            tracing::info!(rounds, reason, "combat ended");

            Ok(CombatSummary {
                reason: reason.to_string(),
                rounds,
                entities: m.state.entities.values().map(EntitySummary::from).collect(),
                invalidated_contests,
                invalidated_checks,
                log_entries: m.state.log.len(),
            })
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn transaction<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, CombatError>,
    ) -> Result<T, CombatError> {
        let checkpoint = self.state.clone();
        let result = op(self);
        if let Err(err) = &result {
            tracing::debug!(error = %err, "combat command rejected");
            self.state = checkpoint;
        }
        result
    }

    fn ensure_live(&self) -> Result<(), CombatError> {
        if self.state.phase == Phase::Completed {
            return Err(CombatError::completed());
        }
        Ok(())
    }

    fn require_phase(&self, expected: Phase, what: &str) -> Result<(), CombatError> {
        self.ensure_live()?;
        if self.state.phase != expected {
            return Err(CombatError::validation(format!(
                "cannot {what} during {}",
                self.state.phase
            )));
        }
        Ok(())
    }

    fn require_active(&self, entity_id: &EntityId) -> Result<(), CombatError> {
        if !entity(&self.state.entities, entity_id)?.alive {
            return Err(CombatError::validation(format!("{entity_id} is dead")));
        }
        if self.state.active_entity_id.as_ref() != Some(entity_id) {
            return Err(CombatError::validation(format!("it is not {entity_id}'s turn")));
        }
        Ok(())
    }

    fn change_phase(&mut self, to: Phase) -> Result<(), CombatError> {
        let from = self.state.phase;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(CombatError::validation(format!(
                "cannot move from {from} to {to}"
            )));
        }
        self.state.phase = to;
        self.state.log.append(
            LogKind::PhaseChanged,
            None,
            None,
            json!({ "from": from, "to": to }),
        );
        Ok(())
    }

    fn is_alive(&self, id: &EntityId) -> bool {
        self.state.entities.get(id).is_some_and(|e| e.alive)
    }

    fn roll_or_verify(
        &mut self,
        spec: &DiceRoll,
        raw: Option<&[u32]>,
    ) -> Result<RollResult, CombatError> {
        Ok(match raw {
            Some(raw) => self.dice.verify(spec, raw)?,
            None => self.dice.roll(spec)?,
        })
    }

    fn check_initiative_pending(&self, entity_id: &EntityId) -> Result<(), CombatError> {
        self.require_phase(Phase::InitiativeRolling, "roll initiative")?;
        let target = entity(&self.state.entities, entity_id)?;
        if !target.alive {
            return Err(CombatError::validation(format!("{entity_id} is dead")));
        }
        if self.state.initiative_rolls.contains_key(entity_id) {
            return Err(CombatError::AlreadyResolved(format!(
                "initiative for {entity_id}"
            )));
        }
        Ok(())
    }

    fn roll_initiative(
        &mut self,
        entity_id: &EntityId,
        raw: Option<&[u32]>,
        forced: bool,
    ) -> Result<(), CombatError> {
        let bonus = entity(&self.state.entities, entity_id)?.skill(&self.config.initiative_skill);
        let base = &self.config.initiative_dice;
        let spec = base.clone().with_modifier(base.modifier.saturating_add(bonus));
        let roll = self.roll_or_verify(&spec, raw)?;

        self.state.log.append(
            LogKind::InitiativeRolled,
            Some(entity_id),
            None,
            json!({
                "raw": roll.raw,
                "selected": roll.selected,
                "total": roll.total,
                "forced": forced,
                "submitted": raw.is_some(),
            }),
        );
        self.state
            .initiative_rolls
            .insert(entity_id.clone(), InitiativeEntry { roll, forced });
        Ok(())
    }

    /// Engine-rolls every living entity without a roll. With
    /// `include_players` false only GM-controlled entities are rolled.
    fn roll_pending_initiative(&mut self, include_players: bool) -> Result<(), CombatError> {
        let pending: Vec<EntityId> = self
            .state
            .entities
            .values()
            .filter(|e| e.alive && !self.state.initiative_rolls.contains_key(&e.id))
            .filter(|e| include_players || e.controller.is_gm())
            .map(|e| e.id.clone())
            .collect();
        for id in pending {
            self.roll_initiative(&id, None, false)?;
        }
        Ok(())
    }

    /// Orders the turn list once every living entity has rolled.
    fn complete_initiative_if_ready(&mut self) -> Result<(), CombatError> {
        let waiting = self
            .state
            .entities
            .values()
            .any(|e| e.alive && !self.state.initiative_rolls.contains_key(&e.id));
        if waiting {
            return Ok(());
        }

        let order = self.compute_order();
        self.state.log.append(
            LogKind::InitiativeOrdered,
            None,
            None,
            json!({ "order": order }),
        );
        self.state.initiative_order = order;
        self.change_phase(Phase::ActiveTurn)?;
        if self.state.round == 0 {
            self.begin_round(1);
        }
        self.start_turn(0);
        self.update_resolution()
    }

    fn compute_order(&self) -> Vec<EntityId> {
        let candidates: Vec<InitiativeCandidate> = self
            .state
            .initiative_rolls
            .iter()
            .filter_map(|(id, entry)| {
                let e = self.state.entities.get(id)?;
                e.alive.then(|| InitiativeCandidate {
                    entity_id: id.clone(),
                    faction: e.faction,
                    total: entry.roll.total,
                })
            })
            .collect();
        self.scheduler.order(self.state.initiative_mode, &candidates)
    }

    fn begin_round(&mut self, round: u32) {
        self.state.round = round;
        self.state.log.set_round(round);
        self.state
            .log
            .append(LogKind::RoundStarted, None, None, json!({ "round": round }));
        tracing::info!(round, "round started");
    }

    /// Points the turn at `index`; the entity's reaction resets and its AP
    /// refills.
    fn start_turn(&mut self, index: usize) {
        self.state.turn_index = index;
        let Some(id) = self.state.initiative_order.get(index).cloned() else {
            self.state.active_entity_id = None;
            return;
        };
        self.state.log.append(
            LogKind::TurnStarted,
            Some(&id),
            None,
            json!({ "turnIndex": index }),
        );
        if let Some(entity) = self.state.entities.get_mut(&id) {
            entity.reaction.available = true;
            if self.config.refill_ap_on_turn_start {
                self.ledger.refill(entity, &mut self.state.log, Resource::Ap);
            }
        }
        self.state.active_entity_id = Some(id);
    }

    /// Moves to the next living entity, wrapping into a new round.
    fn advance_turn(&mut self) -> Result<(), CombatError> {
        let next = (self.state.turn_index + 1..self.state.initiative_order.len())
            .find(|&i| self.is_alive(&self.state.initiative_order[i]));
        match next {
            Some(index) => {
                self.start_turn(index);
                Ok(())
            }
            None => self.advance_round(),
        }
    }

    fn advance_round(&mut self) -> Result<(), CombatError> {
        self.begin_round(self.state.round + 1);

        let ids: Vec<EntityId> = self.state.entities.keys().cloned().collect();
        for id in &ids {
            let Some(entity) = self.state.entities.get_mut(id) else {
                continue;
            };
            for expired in effects::tick_statuses(entity) {
                self.state.log.append(
                    LogKind::StatusExpired,
                    None,
                    Some(id),
                    json!({ "key": expired.key, "stacks": expired.stacks }),
                );
            }
            self.ledger.tick_modifiers(entity, &mut self.state.log);
        }

        if self.config.reroll_initiative_each_round {
            self.state.initiative_rolls.clear();
            self.state.initiative_order.clear();
            self.state.active_entity_id = None;
            self.state.turn_index = 0;
            self.change_phase(Phase::InitiativeRolling)?;
            self.roll_pending_initiative(!self.state.manual_initiative)?;
            return self.complete_initiative_if_ready();
        }

        // Entities revived after initiative join the new round.
        self.roll_pending_initiative(true)?;
        let order = self.compute_order();
        self.state.log.append(
            LogKind::InitiativeOrdered,
            None,
            None,
            json!({ "order": order }),
        );
        self.state.initiative_order = order;
        self.start_turn(0);
        Ok(())
    }

    /// Enters resolution when a faction is wiped out and leaves it when a
    /// revive undoes that.
    fn update_resolution(&mut self) -> Result<(), CombatError> {
        let wiped = self.state.wiped_factions();
        match self.state.phase {
            Phase::ActiveTurn | Phase::ReactionInterrupt if !wiped.is_empty() => {
                self.state.reaction_window = None;
                self.state.pending_reactions.clear();
                self.change_phase(Phase::Resolution)?;
                tracing::info!(?wiped, "faction defeated");
                Ok(())
            }
            Phase::Resolution if wiped.is_empty() => {
                self.change_phase(Phase::ActiveTurn)?;
                let active = self.state.initiative_order.get(self.state.turn_index);
                let intact = active.is_some()
                    && active == self.state.active_entity_id.as_ref()
                    && active.is_some_and(|id| self.is_alive(id));
                if intact {
                    Ok(())
                } else {
                    self.advance_turn()
                }
            }
            _ => Ok(()),
        }
    }

    fn check_reactor(&self, entity_id: &EntityId) -> Result<(), CombatError> {
        entity(&self.state.entities, entity_id)?;
        let window = self
            .state
            .reaction_window
            .as_ref()
            .ok_or_else(|| CombatError::validation("no reaction window is open"))?;
        if !window.eligible.contains(entity_id) {
            return Err(CombatError::validation(format!(
                "{entity_id} may not react to this action"
            )));
        }
        if window.responded.contains(entity_id) {
            return Err(CombatError::AlreadyResolved(format!(
                "{entity_id}'s reaction"
            )));
        }
        Ok(())
    }

    fn mark_responded(&mut self, entity_id: &EntityId) {
        if let Some(window) = self.state.reaction_window.as_mut() {
            window.responded.insert(entity_id.clone());
        }
    }

    fn close_window_if_complete(&mut self) -> Result<(), CombatError> {
        let complete = self
            .state
            .reaction_window
            .as_ref()
            .is_some_and(ReactionWindow::all_responded);
        if complete && self.config.reaction_trigger == ReactionTrigger::AllResponded {
            return self.resolve_window();
        }
        Ok(())
    }

    /// Applies buffered reactions in arrival order and hands the turn back.
    /// An actor killed while the window was open loses the rest of its turn.
    fn resolve_window(&mut self) -> Result<(), CombatError> {
        let trigger = self
            .state
            .reaction_window
            .take()
            .map(|w| w.trigger_log_id);
        let pending = std::mem::take(&mut self.state.pending_reactions);
        let count = pending.len();

        for reaction in pending {
            let Some(reactor) = self.state.entities.get_mut(&reaction.entity_id) else {
                continue;
            };
            let fizzled = !reactor.alive || reactor.ap.current < reaction.ap_cost;
            if fizzled {
                tracing::warn!(
                    entity = %reaction.entity_id,
                    reaction = %reaction.reaction_type,
                    "reaction fizzled"
                );
            }
            reactor.reaction.available = false;
            self.state.log.append(
                LogKind::ReactionResolved,
                Some(&reaction.entity_id),
                reaction.target_id.as_ref(),
                json!({
                    "reactionType": reaction.reaction_type,
                    "apCost": reaction.ap_cost,
                    "fizzled": fizzled,
                    "trigger": trigger,
                }),
            );
            if !fizzled {
                self.ledger.adjust(
                    reactor,
                    &mut self.state.log,
                    Resource::Ap,
                    -i64::from(reaction.ap_cost),
                );
            }
        }

        tracing::debug!(reactions = count, "reaction window closed");
        self.change_phase(Phase::ActiveTurn)?;
        match self.state.active_entity_id.clone() {
            Some(active) if !self.is_alive(&active) => {
                self.end_dead_turn(&active);
                self.advance_turn()
            }
            _ => Ok(()),
        }
    }

    fn end_dead_turn(&mut self, entity_id: &EntityId) {
        self.state.log.append(
            LogKind::TurnEnded,
            Some(entity_id),
            None,
            json!({ "voluntary": false, "died": true }),
        );
    }

    fn contest(&self, id: ContestId) -> Result<&SkillContestRequest, CombatError> {
        self.state
            .pending_skill_contests
            .get(&id)
            .ok_or(CombatError::NotFound(Missing::Contest(id)))
    }

    fn check(&self, id: CheckId) -> Result<&SkillCheckRequest, CombatError> {
        self.state
            .pending_skill_checks
            .get(&id)
            .ok_or(CombatError::NotFound(Missing::Check(id)))
    }

    fn contest_roll(
        &mut self,
        entity_id: &EntityId,
        skill: &str,
        raw: Option<&[u32]>,
    ) -> Result<RollResult, CombatError> {
        require_skill(skill)?;
        let bonus = entity(&self.state.entities, entity_id)?.skill(skill);
        let base = &self.config.contest_dice;
        let spec = base.clone().with_modifier(base.modifier.saturating_add(bonus));
        self.roll_or_verify(&spec, raw)
    }

    /// Rolls for a GM-controlled defender when configured to.
    fn auto_defend(&mut self, contest_id: ContestId) -> Result<Option<ContestOutcome>, CombatError> {
        if !self.config.auto_resolve_gm_defense {
            return Ok(None);
        }
        let contest = self.contest(contest_id)?;
        let target_id = contest.target_id.clone();
        let skill = contest
            .suggested_defense_skill
            .clone()
            .unwrap_or_else(|| contest.initiator_skill.clone());
        if !entity(&self.state.entities, &target_id)?.controller.is_gm() {
            return Ok(None);
        }
        self.defend(contest_id, &target_id, &skill, None).map(Some)
    }

    fn defend(
        &mut self,
        contest_id: ContestId,
        defender_id: &EntityId,
        skill: &str,
        raw: Option<&[u32]>,
    ) -> Result<ContestOutcome, CombatError> {
        let rolled = self.contest_roll(defender_id, skill, raw)?;
        let contest = self
            .state
            .pending_skill_contests
            .get_mut(&contest_id)
            .ok_or(CombatError::NotFound(Missing::Contest(contest_id)))?;
        let initiator_total = contest
            .initiator_roll
            .as_ref()
            .map(|r| r.total)
            .ok_or_else(|| CombatError::validation("the initiator has not rolled"))?;

        let outcome = self.resolver.resolve(
            &contest.initiator_id,
            initiator_total,
            &contest.target_id,
            rolled.total,
        );
        contest.defender_skill = Some(skill.to_string());
        contest.defender_roll = Some(rolled);
        contest.outcome = Some(outcome.clone());
        contest.status = ContestStatus::Resolved;

        let kind = match contest.origin {
            ContestOrigin::Action => LogKind::ActionResolved,
            ContestOrigin::Reaction => LogKind::ReactionResolved,
        };
        self.state.log.append(
            kind,
            Some(&contest.initiator_id),
            Some(&contest.target_id),
            json!({ "contestId": contest_id, "outcome": outcome }),
        );
        tracing::debug!(
            contest = %contest_id,
            tie = outcome.is_tie,
            tier = ?outcome.critical_tier,
            "contest resolved"
        );
        Ok(outcome)
    }

    fn set_alive(&mut self, target_id: &EntityId, alive: bool) -> Result<(), CombatError> {
        let target = entity_mut(&mut self.state.entities, target_id)?;
        if target.alive == alive {
            return Ok(());
        }
        target.alive = alive;
        if alive {
            return Ok(());
        }

        if let Some(window) = self.state.reaction_window.as_mut() {
            window.eligible.remove(target_id);
        }
        match self.state.phase {
            Phase::ActiveTurn if self.state.active_entity_id.as_ref() == Some(target_id) => {
                self.end_dead_turn(target_id);
                self.advance_turn()
            }
            Phase::ReactionInterrupt => self.close_window_if_complete(),
            _ => Ok(()),
        }
    }

    fn jump_to_turn(&mut self, target_id: &EntityId) -> Result<(), CombatError> {
        self.require_phase(Phase::ActiveTurn, "move the turn pointer")?;
        let index = self
            .state
            .initiative_order
            .iter()
            .position(|id| id == target_id)
            .ok_or_else(|| {
                CombatError::validation(format!("{target_id} is not in the initiative order"))
            })?;
        if !self.is_alive(target_id) {
            return Err(CombatError::validation(format!("{target_id} is dead")));
        }
        self.start_turn(index);
        Ok(())
    }

    fn skip_turn(&mut self, target_id: &EntityId) -> Result<(), CombatError> {
        self.require_phase(Phase::ActiveTurn, "skip a turn")?;
        self.require_active(target_id)?;
        self.state.log.append(
            LogKind::TurnEnded,
            Some(target_id),
            None,
            json!({ "voluntary": false, "skipped": true }),
        );
        self.advance_turn()
    }
}

fn entity<'a>(
    entities: &'a BTreeMap<EntityId, Entity>,
    id: &EntityId,
) -> Result<&'a Entity, CombatError> {
    entities.get(id).ok_or_else(|| CombatError::entity_not_found(id))
}

fn entity_mut<'a>(
    entities: &'a mut BTreeMap<EntityId, Entity>,
    id: &EntityId,
) -> Result<&'a mut Entity, CombatError> {
    entities
        .get_mut(id)
        .ok_or_else(|| CombatError::entity_not_found(id))
}

fn require_skill(skill: &str) -> Result<(), CombatError> {
    if skill.trim().is_empty() {
        return Err(CombatError::validation("skill name must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use skirmish_protocol::{Controller, PlayerId};

    use super::*;
    use crate::ledger::{ModifierOp, ResourceModifier};
    use crate::state::{Faction, Pool};

    fn id(s: &str) -> EntityId {
        EntityId::from(s)
    }

    fn hero() -> Entity {
        Entity::new("hero", "Hero", Controller::Player(PlayerId(1)), Faction::Players)
            .with_ap(6)
            .with_skill("melee", 40)
            .with_skill("initiative", 10)
    }

    fn orc() -> Entity {
        Entity::new("orc", "Orc", Controller::Gm, Faction::Enemies)
            .with_ap(4)
            .with_skill("melee", 20)
    }

    /// hero rolls 90, orc rolls 30: hero acts first.
    fn started() -> CombatStateMachine {
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::scripted([90, 30]));
        m.start_combat(vec![orc(), hero()], InitiativeMode::Individual, false)
            .unwrap();
        m
    }

    #[test]
    fn test_start_combat_rolls_everyone_and_starts_round_one() {
        let m = started();
        let state = m.state();
        assert_eq!(state.phase, Phase::ActiveTurn);
        assert_eq!(state.round, 1);
        assert_eq!(state.turn_index, 0);
        assert_eq!(state.initiative_order, vec![id("hero"), id("orc")]);
        assert_eq!(state.active_entity_id, Some(id("hero")));
        assert_eq!(state.initiative_rolls[&id("hero")].roll.total, 100);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_start_combat_empty_is_no_combatants() {
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::seeded(1));
        let err = m
            .start_combat(vec![], InitiativeMode::Individual, false)
            .unwrap_err();
        assert_eq!(err, CombatError::NoCombatants);
        assert_eq!(m.phase(), Phase::Setup);
    }

    #[test]
    fn test_start_combat_duplicate_id_is_rejected_without_change() {
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::seeded(1));
        let err = m
            .start_combat(vec![orc(), orc()], InitiativeMode::Individual, false)
            .unwrap_err();
        assert_eq!(err.code(), 400);
        assert!(m.state().entities.is_empty());
        assert!(m.state().log.is_empty());
    }

    #[test]
    fn test_declare_action_insufficient_ap_leaves_state_unchanged() {
        let mut m = started();
        m.gm_override(
            &id("hero"),
            OverrideAction::SetResource {
                resource: Resource::Ap,
                current: Some(2),
                max: None,
            },
            "exhausted",
        )
        .unwrap();
        let log_len = m.state().log.len();

        let err = m
            .declare_action(&id("hero"), "cleave", 3, None, false)
            .unwrap_err();
        assert!(matches!(err, CombatError::InsufficientResource { required: 3, available: 2, .. }));
        assert_eq!(m.state().entities[&id("hero")].ap, Pool::new(2, 6));
        assert_eq!(m.state().log.len(), log_len);
    }

    #[test]
    fn test_declare_action_out_of_turn_is_validation() {
        let mut m = started();
        let err = m
            .declare_action(&id("orc"), "bite", 1, None, false)
            .unwrap_err();
        assert_eq!(err, CombatError::validation("it is not orc's turn"));
    }

    #[test]
    fn test_declare_action_unknown_target_is_not_found() {
        let mut m = started();
        let err = m
            .declare_action(&id("hero"), "strike", 1, Some(&id("ghost")), false)
            .unwrap_err();
        assert_eq!(err.code(), 404);
        assert_eq!(m.state().entities[&id("hero")].ap.current, 6);
    }

    #[test]
    fn test_interruptible_action_opens_window_and_all_responded_closes_it() {
        let mut m = started();
        m.declare_action(&id("hero"), "charge", 2, Some(&id("orc")), true)
            .unwrap();
        assert_eq!(m.phase(), Phase::ReactionInterrupt);

        m.declare_reaction(&id("orc"), "parry", 1, Some(&id("hero")))
            .unwrap();
        assert_eq!(m.phase(), Phase::ActiveTurn);
        let orc = &m.state().entities[&id("orc")];
        assert_eq!(orc.ap.current, 3);
        assert!(!orc.reaction.available);
    }

    #[test]
    fn test_gm_only_trigger_waits_for_resolve() {
        let config = CombatConfig {
            reaction_trigger: ReactionTrigger::GmOnly,
            ..CombatConfig::default()
        };
        let mut m = CombatStateMachine::new(config, DiceEngine::scripted([90, 30]));
        m.start_combat(vec![orc(), hero()], InitiativeMode::Individual, false)
            .unwrap();
        m.declare_action(&id("hero"), "charge", 2, None, true).unwrap();
        m.decline_reaction(&id("orc")).unwrap();
        assert_eq!(m.phase(), Phase::ReactionInterrupt);

        let err = m.decline_reaction(&id("orc")).unwrap_err();
        assert_eq!(err.code(), 409);

        m.resolve_reactions().unwrap();
        assert_eq!(m.phase(), Phase::ActiveTurn);
        assert!(m.state().entities[&id("orc")].reaction.available);
    }

    #[test]
    fn test_reaction_fizzles_when_ap_drained() {
        let config = CombatConfig {
            reaction_trigger: ReactionTrigger::GmOnly,
            ..CombatConfig::default()
        };
        let mut m = CombatStateMachine::new(config, DiceEngine::scripted([90, 30]));
        m.start_combat(vec![orc(), hero()], InitiativeMode::Individual, false)
            .unwrap();
        m.declare_action(&id("hero"), "charge", 2, None, true).unwrap();
        m.declare_reaction(&id("orc"), "parry", 3, None).unwrap();
        m.gm_override(
            &id("orc"),
            OverrideAction::AdjustResource {
                resource: Resource::Ap,
                delta: -4,
            },
            "drain",
        )
        .unwrap();
        m.resolve_reactions().unwrap();

        let resolved = m
            .state()
            .log
            .iter()
            .rfind(|e| e.kind == LogKind::ReactionResolved)
            .unwrap();
        assert_eq!(resolved.payload["fizzled"], true);
        let orc = &m.state().entities[&id("orc")];
        assert_eq!(orc.ap.current, 0);
        assert!(!orc.reaction.available);
    }

    #[test]
    fn test_end_turn_wraps_round_and_refills_ap() {
        let mut m = started();
        m.declare_action(&id("hero"), "strike", 4, None, false).unwrap();
        m.end_turn(&id("hero"), true).unwrap();
        assert_eq!(m.state().active_entity_id, Some(id("orc")));

        m.end_turn(&id("orc"), true).unwrap();
        let state = m.state();
        assert_eq!(state.round, 2);
        assert_eq!(state.active_entity_id, Some(id("hero")));
        assert_eq!(state.entities[&id("hero")].ap.current, 6);
    }

    #[test]
    fn test_round_wrap_ticks_statuses_and_modifiers() {
        let mut m = started();
        m.gm_override(
            &id("orc"),
            OverrideAction::ApplyStatus {
                key: "stunned".into(),
                stacks: 1,
                duration: Some(1),
            },
            "shield bash",
        )
        .unwrap();
        m.gm_override(
            &id("orc"),
            OverrideAction::ApplyModifier {
                modifier: ResourceModifier::new(Resource::Energy, ModifierOp::Add, 5.0, "potion")
                    .for_rounds(1),
            },
            "drank",
        )
        .unwrap();
        assert_eq!(m.state().entities[&id("orc")].energy.max, 5);

        m.end_turn(&id("hero"), true).unwrap();
        m.end_turn(&id("orc"), true).unwrap();
        let orc = &m.state().entities[&id("orc")];
        assert!(orc.status_effects.is_empty());
        assert!(orc.modifiers.is_empty());
        assert_eq!(orc.energy, Pool::default());
    }

    #[test]
    fn test_dead_entities_are_skipped() {
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::scripted([90, 50, 30]));
        let goblin = Entity::new("goblin", "Goblin", Controller::Gm, Faction::Enemies).with_ap(2);
        // ids in order: goblin 90, hero 50 (+10), orc 30
        m.start_combat(vec![goblin, hero(), orc()], InitiativeMode::Individual, false)
            .unwrap();
        assert_eq!(
            m.state().initiative_order,
            vec![id("goblin"), id("hero"), id("orc")]
        );
        m.gm_override(&id("orc"), OverrideAction::SetAlive { alive: false }, "slain")
            .unwrap();
        m.end_turn(&id("goblin"), true).unwrap();
        m.end_turn(&id("hero"), true).unwrap();
        assert_eq!(m.state().round, 2);
        assert_eq!(m.state().initiative_order, vec![id("goblin"), id("hero")]);
        assert_eq!(m.state().active_entity_id, Some(id("goblin")));
    }

    #[test]
    fn test_faction_wipe_enters_resolution_and_revive_returns() {
        let mut m = started();
        m.gm_override(&id("orc"), OverrideAction::SetAlive { alive: false }, "slain")
            .unwrap();
        assert_eq!(m.phase(), Phase::Resolution);
        assert!(m.declare_action(&id("hero"), "strike", 1, None, false).is_err());

        m.gm_override(&id("orc"), OverrideAction::SetAlive { alive: true }, "second wind")
            .unwrap();
        assert_eq!(m.phase(), Phase::ActiveTurn);
        assert_eq!(m.state().active_entity_id, Some(id("hero")));
        assert!(m.state().check_invariants().is_ok());
    }

    #[test]
    fn test_manual_initiative_waits_for_players() {
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::scripted([30]));
        m.start_combat(vec![orc(), hero()], InitiativeMode::Individual, true)
            .unwrap();
        assert_eq!(m.phase(), Phase::InitiativeRolling);
        assert!(m.state().initiative_rolls.contains_key(&id("orc")));

        let err = m.submit_initiative_roll(&id("hero"), &[0]).unwrap_err();
        assert_eq!(err.code(), 400);

        m.submit_initiative_roll(&id("hero"), &[15]).unwrap();
        assert_eq!(m.phase(), Phase::ActiveTurn);
        // orc 30 beats hero 15 + 10.
        assert_eq!(m.state().active_entity_id, Some(id("orc")));
        let err = m.submit_initiative_roll(&id("hero"), &[15]).unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn test_force_initiative_twice_is_already_resolved() {
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::scripted([30, 60]));
        let second = Entity::new("rogue", "Rogue", Controller::Player(PlayerId(2)), Faction::Players);
        m.start_combat(vec![orc(), hero(), second], InitiativeMode::Individual, true)
            .unwrap();
        m.force_initiative_roll(&id("hero")).unwrap();
        let err = m.force_initiative_roll(&id("hero")).unwrap_err();
        assert_eq!(err.code(), 409);
        assert!(m.state().initiative_rolls[&id("hero")].forced);
    }

    #[test]
    fn test_contest_flow_resolves_with_tier() {
        let mut m = started();
        let outcome = m
            .initiate_skill_contest(&id("hero"), &id("orc"), "melee", Some(&[80]), None, false)
            .unwrap();
        let CommandOutcome::ContestUpdated { contest_id, status } = outcome else {
            panic!("expected an open contest");
        };
        assert_eq!(status, ContestStatus::AwaitingDefense);

        // hero 80 + 40 = 120, orc 40 + 20 = 60.
        let outcome = m
            .respond_to_skill_contest(contest_id, &id("orc"), "melee", Some(&[40]))
            .unwrap();
        let CommandOutcome::ContestResolved { outcome, .. } = outcome else {
            panic!("expected a resolved contest");
        };
        assert_eq!(outcome.winner_id, Some(id("hero")));
        assert_eq!(outcome.critical_tier, Some(crate::CriticalTier::Vicious));

        let err = m
            .respond_to_skill_contest(contest_id, &id("orc"), "melee", Some(&[40]))
            .unwrap_err();
        assert_eq!(err.code(), 409);
    }

    #[test]
    fn test_pending_contest_waits_for_initiator() {
        let mut m = started();
        let CommandOutcome::ContestUpdated { contest_id, status } = m
            .initiate_skill_contest(&id("hero"), &id("orc"), "melee", None, Some("dodge"), false)
            .unwrap()
        else {
            panic!("expected an open contest");
        };
        assert_eq!(status, ContestStatus::Pending);
        assert!(m
            .respond_to_skill_contest(contest_id, &id("orc"), "dodge", Some(&[10]))
            .is_err());
        m.respond_to_skill_contest(contest_id, &id("hero"), "melee", Some(&[50]))
            .unwrap();
        assert_eq!(
            m.state().pending_skill_contests[&contest_id].status,
            ContestStatus::AwaitingDefense
        );
    }

    #[test]
    fn test_auto_gm_defense_resolves_immediately() {
        let config = CombatConfig {
            auto_resolve_gm_defense: true,
            ..CombatConfig::default()
        };
        let mut m = CombatStateMachine::new(config, DiceEngine::scripted([90, 30, 10]));
        m.start_combat(vec![orc(), hero()], InitiativeMode::Individual, false)
            .unwrap();
        let outcome = m
            .initiate_skill_contest(&id("hero"), &id("orc"), "melee", Some(&[50]), None, false)
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::ContestResolved { .. }));
    }

    #[test]
    fn test_skill_check_records_success() {
        let mut m = started();
        let CommandOutcome::CheckRequested { check_id } = m
            .request_skill_check(&id("hero"), "melee", Some(100), 2, true, false)
            .unwrap()
        else {
            panic!("expected a check");
        };
        let CommandOutcome::CheckRolled { result, .. } =
            m.submit_skill_check(check_id, Some(&[12, 64])).unwrap()
        else {
            panic!("expected a rolled check");
        };
        assert_eq!(result.roll.total, 104);
        assert_eq!(result.success, Some(true));
        assert_eq!(
            m.submit_skill_check(check_id, Some(&[1, 1])).unwrap_err().code(),
            409
        );
    }

    #[test]
    fn test_jump_and_skip_turn() {
        let mut m = started();
        m.gm_override(&id("orc"), OverrideAction::JumpToTurn, "ambush")
            .unwrap();
        assert_eq!(m.state().active_entity_id, Some(id("orc")));
        m.gm_override(&id("orc"), OverrideAction::SkipTurn, "stunned")
            .unwrap();
        assert_eq!(m.state().round, 2);
        assert_eq!(m.state().active_entity_id, Some(id("hero")));
    }

    #[test]
    fn test_end_combat_drops_pending_and_freezes() {
        let mut m = started();
        m.initiate_skill_contest(&id("hero"), &id("orc"), "melee", Some(&[50]), None, false)
            .unwrap();
        m.request_skill_check(&id("orc"), "perception", None, 1, true, true)
            .unwrap();

        let summary = m.end_combat("orc fled").unwrap();
        assert_eq!(summary.invalidated_contests, vec![ContestId(1)]);
        assert_eq!(summary.invalidated_checks, vec![CheckId(1)]);
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.entities.len(), 2);
        assert!(m.state().pending_skill_contests.is_empty());
        assert_eq!(m.phase(), Phase::Completed);

        assert_eq!(
            m.end_turn(&id("hero"), true).unwrap_err(),
            CombatError::completed()
        );
        assert_eq!(m.end_combat("again").unwrap_err(), CombatError::completed());
        assert_eq!(
            m.gm_override(&id("hero"), OverrideAction::SkipTurn, "x")
                .unwrap_err(),
            CombatError::completed()
        );
    }

    #[test]
    fn test_gm_override_requires_reason_and_target() {
        let mut m = started();
        assert_eq!(
            m.gm_override(&id("hero"), OverrideAction::SkipTurn, " ")
                .unwrap_err()
                .code(),
            400
        );
        assert_eq!(
            m.gm_override(&id("nobody"), OverrideAction::SkipTurn, "x")
                .unwrap_err()
                .code(),
            404
        );
    }

    #[test]
    fn test_gm_override_extreme_adjust_saturates() {
        let mut m = started();
        m.gm_override(
            &id("orc"),
            OverrideAction::AdjustResource {
                resource: Resource::Ap,
                delta: i64::MAX,
            },
            "surge",
        )
        .unwrap();
        assert_eq!(m.state().entities[&id("orc")].ap, Pool::new(4, 4));

        m.gm_override(
            &id("orc"),
            OverrideAction::AdjustResource {
                resource: Resource::Ap,
                delta: i64::MIN,
            },
            "void",
        )
        .unwrap();
        assert_eq!(m.state().entities[&id("orc")].ap, Pool::new(0, 4));
    }

    #[test]
    fn test_gm_override_out_of_range_modifier_is_rejected() {
        let mut m = started();
        let before = m.snapshot();
        let err = m
            .gm_override(
                &id("orc"),
                OverrideAction::ApplyModifier {
                    modifier: ResourceModifier::new(Resource::Ap, ModifierOp::Add, 1e19, "curse"),
                },
                "cursed",
            )
            .unwrap_err();
        assert_eq!(err.code(), 400);
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_huge_initiative_skill_saturates_total() {
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::scripted([90, 30]));
        m.start_combat(
            vec![orc(), hero().with_skill("initiative", i64::MAX)],
            InitiativeMode::Individual,
            false,
        )
        .unwrap();
        assert_eq!(m.state().initiative_rolls[&id("hero")].roll.total, i64::MAX);
        assert_eq!(m.state().active_entity_id, Some(id("hero")));
    }

    #[test]
    fn test_actor_killed_during_reaction_window_loses_turn() {
        let rogue = Entity::new("rogue", "Rogue", Controller::Player(PlayerId(2)), Faction::Players)
            .with_ap(4);
        // hero 100, orc 30, rogue 50
        let mut m = CombatStateMachine::new(CombatConfig::default(), DiceEngine::scripted([90, 30, 50]));
        m.start_combat(vec![orc(), hero(), rogue], InitiativeMode::Individual, false)
            .unwrap();
        assert_eq!(m.state().initiative_order, vec![id("hero"), id("rogue"), id("orc")]);

        m.declare_action(&id("hero"), "charge", 2, Some(&id("orc")), true)
            .unwrap();
        m.gm_override(&id("hero"), OverrideAction::SetAlive { alive: false }, "sniped")
            .unwrap();
        assert_eq!(m.phase(), Phase::ReactionInterrupt);

        m.decline_reaction(&id("orc")).unwrap();
        m.decline_reaction(&id("rogue")).unwrap();

        assert_eq!(m.phase(), Phase::ActiveTurn);
        assert_eq!(m.state().active_entity_id, Some(id("rogue")));
        let err = m
            .declare_action(&id("hero"), "strike", 2, None, false)
            .unwrap_err();
        assert_eq!(err, CombatError::validation("hero is dead"));
        assert!(m.state().check_invariants().is_ok());
    }
}

