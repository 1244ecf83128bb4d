use skirmish::combat::{ContestOutcome, CriticalTier};
use skirmish::prelude::*;

// ---------------------------------------------------------------------------
// Encounter
// ---------------------------------------------------------------------------

const RANGER: PlayerId = PlayerId(1);
const MAX_ROUNDS: u32 = 6;
const WOUNDS_TO_DROP: u32 = 4;

fn roster() -> Vec<Entity> {
    vec![
        Entity::new("ranger", "Ilse the Ranger", Controller::Player(RANGER), Faction::Players)
            .with_skill("melee", 45)
            .with_skill("dodge", 30)
            .with_skill("initiative", 15)
            .with_ap(6)
            .with_energy(8),
        Entity::new("bandit-1", "Bandit", Controller::Gm, Faction::Enemies)
            .with_skill("melee", 30)
            .with_skill("dodge", 20)
            .with_ap(4),
        Entity::new("bandit-2", "Bandit Archer", Controller::Gm, Faction::Enemies)
            .with_skill("melee", 20)
            .with_skill("dodge", 25)
            .with_ap(4),
    ]
}

fn wounds_for(tier: Option<CriticalTier>) -> u32 {
    match tier {
        None | Some(CriticalTier::Normal) => 1,
        Some(CriticalTier::Wicked) => 2,
        Some(CriticalTier::Vicious) => 3,
        Some(CriticalTier::Brutal) => 4,
    }
}

// ---------------------------------------------------------------------------
// Driving the engine
// ---------------------------------------------------------------------------

async fn send(
    engine: &Engine,
    session: SessionId,
    actor: Controller,
    command: Command,
) -> Result<CommandOutcome, SkirmishError> {
    let receipt = engine
        .submit(session, CommandEnvelope::new(actor, command))
        .await?;
    Ok(receipt.outcome)
}

/// One swing: the attacker spends AP, rolls melee, and the defender dodges.
async fn attack(
    engine: &Engine,
    session: SessionId,
    attacker: &Entity,
    defender: &Entity,
) -> Result<Option<ContestOutcome>, SkirmishError> {
    send(
        engine,
        session,
        attacker.controller,
        Command::DeclareAction {
            entity_id: attacker.id.clone(),
            action_type: "strike".into(),
            ap_cost: 2,
            target_id: Some(defender.id.clone()),
            interruptible: false,
        },
    )
    .await?;

    let mut outcome = send(
        engine,
        session,
        attacker.controller,
        Command::InitiateSkillContest {
            initiator_id: attacker.id.clone(),
            target_id: defender.id.clone(),
            skill: "melee".into(),
            roll: None,
            suggested_defense_skill: Some("dodge".into()),
            gm_can_resolve: false,
        },
    )
    .await?;

    loop {
        match outcome {
            CommandOutcome::ContestResolved { outcome, .. } => return Ok(Some(outcome)),
            CommandOutcome::ContestUpdated { contest_id, .. } => {
                let snapshot = engine.snapshot(session).await?;
                let Some(contest) = snapshot.combat.pending_skill_contests.get(&contest_id) else {
                    return Ok(None);
                };
                let (responder, skill) = if contest.initiator_roll.is_none() {
                    (attacker, "melee")
                } else {
                    (defender, "dodge")
                };
                outcome = send(
                    engine,
                    session,
                    responder.controller,
                    Command::RespondToSkillContest {
                        contest_id,
                        entity_id: responder.id.clone(),
                        skill: skill.into(),
                        roll: None,
                    },
                )
                .await?;
            }
            _ => return Ok(None),
        }
    }
}

async fn apply_hit(
    engine: &Engine,
    session: SessionId,
    defender: &Entity,
    outcome: &ContestOutcome,
) -> Result<(), SkirmishError> {
    let count = wounds_for(outcome.critical_tier);
    send(
        engine,
        session,
        Controller::Gm,
        Command::GmOverride {
            target_entity_id: defender.id.clone(),
            action: OverrideAction::AddWounds {
                wound_type: "cut".into(),
                count,
            },
            reason: format!("struck for {count}"),
        },
    )
    .await?;

    if defender.total_wounds() + count >= WOUNDS_TO_DROP {
        send(
            engine,
            session,
            Controller::Gm,
            Command::GmOverride {
                target_entity_id: defender.id.clone(),
                action: OverrideAction::SetAlive { alive: false },
                reason: "dropped".into(),
            },
        )
        .await?;
    }
    Ok(())
}

async fn play_turn(engine: &Engine, session: SessionId) -> Result<(), SkirmishError> {
    let snapshot = engine.snapshot(session).await?;
    let combat = &snapshot.combat;
    let Some(active) = combat
        .active_entity_id
        .as_ref()
        .and_then(|id| combat.entity(id))
        .cloned()
    else {
        return Ok(());
    };
    let target = combat
        .entities
        .values()
        .find(|e| e.alive && e.faction != active.faction)
        .cloned();

    if let Some(target) = target {
        match attack(engine, session, &active, &target).await {
            Ok(Some(outcome)) if outcome.winner_id.as_ref() == Some(&active.id) => {
                tracing::info!(attacker = %active.id, defender = %target.id, tier = ?outcome.critical_tier, "hit");
                apply_hit(engine, session, &target, &outcome).await?;
            }
            Ok(Some(outcome)) => {
                tracing::info!(attacker = %active.id, defender = %target.id, tie = outcome.is_tie, "miss");
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(attacker = %active.id, error = %err, "attack rejected"),
        }
    }

    if engine.snapshot(session).await?.combat.phase == Phase::ActiveTurn {
        send(
            engine,
            session,
            active.controller,
            Command::EndTurn {
                entity_id: active.id.clone(),
                voluntary: true,
            },
        )
        .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), SkirmishError> {
    init_tracing("ambush=info,skirmish=info");

    let engine = Engine::builder()
        .combat(CombatConfig {
            auto_resolve_gm_defense: true,
            ..CombatConfig::default()
        })
        .build();
    // An optional seed makes the fight repeatable.
    let session = match std::env::args().nth(1).and_then(|arg| arg.parse::<u64>().ok()) {
        Some(seed) => {
            tracing::info!(seed, "using seeded dice");
            engine.create_session_with_dice(DiceEngine::seeded(seed)).await
        }
        None => engine.create_session().await,
    };
    let player = Controller::Player(RANGER);

    send(&engine, session, player, Command::JoinLobby).await?;
    send(&engine, session, player, Command::SetReady { ready: true }).await?;
    send(
        &engine,
        session,
        Controller::Gm,
        Command::StartCombat {
            entities: roster(),
            initiative_mode: InitiativeMode::Individual,
            manual: false,
        },
    )
    .await?;

    loop {
        let combat = engine.snapshot(session).await?.combat;
        if combat.phase != Phase::ActiveTurn || combat.round > MAX_ROUNDS {
            break;
        }
        play_turn(&engine, session).await?;
    }

    let outcome = send(
        &engine,
        session,
        Controller::Gm,
        Command::EndCombat {
            reason: "the dust settles".into(),
        },
    )
    .await?;

    let snapshot = engine.snapshot(session).await?;
    for entry in snapshot.combat.log.entries() {
        println!("{}", serde_json::to_string(entry).unwrap_or_default());
    }
    if let CommandOutcome::CombatEnded { summary } = outcome {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    }
    Ok(())
}
