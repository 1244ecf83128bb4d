//! Ownership checks run before a command reaches the combat rules.
//!
//! A command is authorized when its actor controls the entity it acts for.
//! GM-only commands need the GM, lobby commands need a player, and the GM
//! may answer a contest or check on a player's behalf only when the
//! request was opened with `gmCanResolve`.

use skirmish_combat::{CombatError, CombatSessionState, Command, Missing};
use skirmish_protocol::{Controller, EntityId};

pub fn authorize(
    actor: Controller,
    command: &Command,
    state: &CombatSessionState,
) -> Result<(), CombatError> {
    if command.is_gm_only() {
        return require(actor.is_gm(), actor, command.name());
    }
    if command.is_lobby() {
        return require(!actor.is_gm(), actor, command.name());
    }

    match command {
        Command::SubmitInitiativeRoll { entity_id, .. }
        | Command::DeclareAction { entity_id, .. }
        | Command::DeclareReaction { entity_id, .. }
        | Command::DeclineReaction { entity_id }
        | Command::EndTurn { entity_id, .. } => controls(actor, state, entity_id),

        Command::InitiateSkillContest { initiator_id, .. } => controls(actor, state, initiator_id),

        Command::RespondToSkillContest {
            contest_id,
            entity_id,
            ..
        } => {
            let contest = state
                .pending_skill_contests
                .get(contest_id)
                .ok_or(CombatError::NotFound(Missing::Contest(*contest_id)))?;
            if actor.is_gm() && contest.gm_can_resolve {
                return Ok(());
            }
            controls(actor, state, entity_id)
        }

        Command::SubmitSkillCheck { check_id, .. } => {
            let check = state
                .pending_skill_checks
                .get(check_id)
                .ok_or(CombatError::NotFound(Missing::Check(*check_id)))?;
            if actor.is_gm() && check.gm_can_resolve {
                return Ok(());
            }
            controls(actor, state, &check.target_entity_id)
        }

        // Covered by the role checks above.
        Command::StartCombat { .. }
        | Command::ForceInitiativeRoll { .. }
        | Command::ResolveReactions
        | Command::RequestSkillCheck { .. }
        | Command::GmOverride { .. }
        | Command::EndCombat { .. }
        | Command::JoinLobby
        | Command::LeaveLobby
        | Command::SetReady { .. } => Ok(()),
    }
}

fn controls(
    actor: Controller,
    state: &CombatSessionState,
    entity_id: &EntityId,
) -> Result<(), CombatError> {
    let entity = state
        .entities
        .get(entity_id)
        .ok_or_else(|| CombatError::entity_not_found(entity_id))?;
    require(entity.controller == actor, actor, entity_id.as_str())
}

fn require(allowed: bool, actor: Controller, subject: &str) -> Result<(), CombatError> {
    if allowed {
        Ok(())
    } else {
        Err(CombatError::Unauthorized {
            actor,
            subject: subject.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use skirmish_combat::{
        CombatConfig, CombatStateMachine, DiceEngine, Entity, Faction, InitiativeMode,
    };
    use skirmish_protocol::PlayerId;

    use super::*;

    const ALICE: Controller = Controller::Player(PlayerId(1));
    const BOB: Controller = Controller::Player(PlayerId(2));

    fn state() -> CombatSessionState {
        let mut machine =
            CombatStateMachine::new(CombatConfig::default(), DiceEngine::scripted([90, 10]));
        machine
            .start_combat(
                vec![
                    Entity::new("hero", "Hero", ALICE, Faction::Players).with_ap(4),
                    Entity::new("orc", "Orc", Controller::Gm, Faction::Enemies).with_ap(4),
                ],
                InitiativeMode::Individual,
                false,
            )
            .unwrap();
        machine.snapshot()
    }

    fn end_turn(entity: &str) -> Command {
        Command::EndTurn {
            entity_id: EntityId::from(entity),
            voluntary: true,
        }
    }

    #[test]
    fn test_authorize_controller_may_act() {
        let state = state();
        assert!(authorize(ALICE, &end_turn("hero"), &state).is_ok());
        assert!(authorize(Controller::Gm, &end_turn("orc"), &state).is_ok());
    }

    #[test]
    fn test_authorize_other_player_is_unauthorized() {
        let state = state();
        let err = authorize(BOB, &end_turn("hero"), &state).unwrap_err();
        assert_eq!(err.code(), 401);
        let err = authorize(Controller::Gm, &end_turn("hero"), &state).unwrap_err();
        assert_eq!(err.code(), 401);
    }

    #[test]
    fn test_authorize_gm_only_commands() {
        let state = state();
        let end = Command::EndCombat {
            reason: "done".into(),
        };
        assert!(authorize(Controller::Gm, &end, &state).is_ok());
        assert_eq!(authorize(ALICE, &end, &state).unwrap_err().code(), 401);
    }

    #[test]
    fn test_authorize_lobby_commands_are_player_only() {
        let state = CombatSessionState::new();
        assert!(authorize(ALICE, &Command::JoinLobby, &state).is_ok());
        assert_eq!(
            authorize(Controller::Gm, &Command::JoinLobby, &state)
                .unwrap_err()
                .code(),
            401
        );
    }

    #[test]
    fn test_authorize_unknown_entity_is_not_found() {
        let state = state();
        assert_eq!(
            authorize(ALICE, &end_turn("ghost"), &state).unwrap_err().code(),
            404
        );
    }
}
