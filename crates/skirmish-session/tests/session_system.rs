//! Integration tests for the session system: coordinator, actors,
//! authorization and subscriber fan-out.

use std::time::Duration;

use skirmish_combat::{
    CombatError, Command, CommandEnvelope, CommandOutcome, DiceEngine, Entity, Faction,
    InitiativeMode, LogKind, OverrideAction, Phase,
};
use skirmish_protocol::{Controller, EntityId, PlayerId, SessionId};
use skirmish_session::{
    SessionConfig, SessionCoordinator, SessionError, SessionStatus, SessionUpdate,
};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

const ALICE: Controller = Controller::Player(PlayerId(1));
const BOB: Controller = Controller::Player(PlayerId(2));
const GM: Controller = Controller::Gm;

fn id(s: &str) -> EntityId {
    EntityId::from(s)
}

fn roster() -> Vec<Entity> {
    vec![
        Entity::new("alice-pc", "Sable", ALICE, Faction::Players)
            .with_ap(6)
            .with_skill("melee", 40),
        Entity::new("bob-pc", "Wren", BOB, Faction::Players)
            .with_ap(6)
            .with_skill("melee", 30),
        Entity::new("wolf", "Wolf", GM, Faction::Enemies)
            .with_ap(4)
            .with_skill("melee", 20),
    ]
}

fn send(actor: Controller, command: Command) -> CommandEnvelope {
    CommandEnvelope::new(actor, command)
}

/// Both players join and ready up, then the GM starts combat.
/// Dice: alice-pc 90, bob-pc 60, wolf 30, so alice-pc acts first.
async fn started(coordinator: &mut SessionCoordinator) -> SessionId {
    let session = coordinator.create_session_with_dice(DiceEngine::scripted([90, 60, 30]));
    for player in [ALICE, BOB] {
        coordinator
            .submit(session, send(player, Command::JoinLobby))
            .await
            .unwrap();
        coordinator
            .submit(session, send(player, Command::SetReady { ready: true }))
            .await
            .unwrap();
    }
    coordinator
        .submit(
            session,
            send(
                GM,
                Command::StartCombat {
                    entities: roster(),
                    initiative_mode: InitiativeMode::Individual,
                    manual: false,
                },
            ),
        )
        .await
        .unwrap();
    session
}

// =========================================================================
// Coordinator
// =========================================================================

#[tokio::test]
async fn test_create_session_returns_unique_ids() {
    let mut coordinator = SessionCoordinator::default();
    let s1 = coordinator.create_session();
    let s2 = coordinator.create_session();
    assert_ne!(s1, s2);
    assert_eq!(coordinator.session_count(), 2);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let coordinator = SessionCoordinator::default();
    let err = coordinator
        .submit(SessionId(9999), send(ALICE, Command::JoinLobby))
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::NotFound(SessionId(9999)));
    assert_eq!(err.code(), 404);
}

#[tokio::test]
async fn test_close_session_removes_it() {
    let mut coordinator = SessionCoordinator::default();
    let session = coordinator.create_session();
    let handle = coordinator.handle(session).unwrap();
    coordinator.close_session(session).await.unwrap();

    assert_eq!(coordinator.session_count(), 0);
    assert!(coordinator.close_session(session).await.is_err());

    // The actor stops once it processes the shutdown.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        handle.snapshot().await.unwrap_err(),
        SessionError::Unavailable(session)
    );
}

// =========================================================================
// Lobby gating
// =========================================================================

#[tokio::test]
async fn test_start_combat_waits_for_ready_lobby() {
    let mut coordinator = SessionCoordinator::default();
    let session = coordinator.create_session_with_dice(DiceEngine::seeded(3));
    coordinator
        .submit(session, send(ALICE, Command::JoinLobby))
        .await
        .unwrap();

    let start = || {
        send(
            GM,
            Command::StartCombat {
                entities: roster(),
                initiative_mode: InitiativeMode::Individual,
                manual: false,
            },
        )
    };
    // Alice not ready, Bob not present.
    let err = coordinator.submit(session, start()).await.unwrap_err();
    assert_eq!(err.code(), 400);

    coordinator
        .submit(session, send(ALICE, Command::SetReady { ready: true }))
        .await
        .unwrap();
    // Bob controls an entity but never joined.
    assert_eq!(coordinator.submit(session, start()).await.unwrap_err().code(), 400);

    coordinator
        .submit(session, send(BOB, Command::JoinLobby))
        .await
        .unwrap();
    coordinator
        .submit(session, send(BOB, Command::SetReady { ready: true }))
        .await
        .unwrap();
    coordinator.submit(session, start()).await.unwrap();

    let snapshot = coordinator.snapshot(session).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::InCombat);
    assert_eq!(snapshot.combat.phase, Phase::ActiveTurn);

    let late = coordinator
        .submit(session, send(Controller::Player(PlayerId(3)), Command::JoinLobby))
        .await
        .unwrap_err();
    assert_eq!(late.code(), 400);
}

#[tokio::test]
async fn test_player_cannot_start_combat() {
    let mut coordinator = SessionCoordinator::default();
    let session = coordinator.create_session();
    let err = coordinator
        .submit(
            session,
            send(
                ALICE,
                Command::StartCombat {
                    entities: roster(),
                    initiative_mode: InitiativeMode::Individual,
                    manual: false,
                },
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), 401);
}

// =========================================================================
// Authorization and ordering
// =========================================================================

#[tokio::test]
async fn test_player_cannot_act_for_another_players_entity() {
    let mut coordinator = SessionCoordinator::default();
    let session = started(&mut coordinator).await;

    let err = coordinator
        .submit(
            session,
            send(
                BOB,
                Command::EndTurn {
                    entity_id: id("alice-pc"),
                    voluntary: true,
                },
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Rejected(CombatError::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_actions_on_same_revision_exactly_one_wins() {
    let mut coordinator = SessionCoordinator::default();
    let session = started(&mut coordinator).await;
    let handle = coordinator.handle(session).unwrap();
    let revision = handle.snapshot().await.unwrap().revision;

    let strike = |ap_cost| {
        send(
            ALICE,
            Command::DeclareAction {
                entity_id: id("alice-pc"),
                action_type: "strike".into(),
                ap_cost,
                target_id: Some(id("wolf")),
                interruptible: false,
            },
        )
        .at_revision(revision)
    };

    let (first, second) = tokio::join!(handle.submit(strike(2)), handle.submit(strike(3)));
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(
        *loser,
        SessionError::Rejected(CombatError::validation("stale revision"))
    );

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.revision, revision + 1);
    let ap = snapshot.combat.entities[&id("alice-pc")].ap.current;
    assert!(ap == 4 || ap == 3, "only one action's cost applied, got {ap}");
}

#[tokio::test]
async fn test_gm_can_resolve_contest_when_allowed() {
    let mut coordinator = SessionCoordinator::default();
    let session = started(&mut coordinator).await;

    let opened = coordinator
        .submit(
            session,
            send(
                GM,
                Command::GmOverride {
                    target_entity_id: id("wolf"),
                    action: OverrideAction::JumpToTurn,
                    reason: "ambush".into(),
                },
            ),
        )
        .await;
    assert!(opened.is_ok());

    let receipt = coordinator
        .submit(
            session,
            send(
                GM,
                Command::InitiateSkillContest {
                    initiator_id: id("wolf"),
                    target_id: id("bob-pc"),
                    skill: "melee".into(),
                    roll: Some(vec![50]),
                    suggested_defense_skill: None,
                    gm_can_resolve: true,
                },
            ),
        )
        .await
        .unwrap();
    let CommandOutcome::ContestUpdated { contest_id, .. } = receipt.outcome else {
        panic!("expected an open contest");
    };

    // Alice does not control bob-pc; the GM may answer because of gmCanResolve.
    let respond = |actor| {
        send(
            actor,
            Command::RespondToSkillContest {
                contest_id,
                entity_id: id("bob-pc"),
                skill: "melee".into(),
                roll: Some(vec![10]),
            },
        )
    };
    assert_eq!(
        coordinator.submit(session, respond(ALICE)).await.unwrap_err().code(),
        401
    );
    let receipt = coordinator.submit(session, respond(GM)).await.unwrap();
    assert!(matches!(
        receipt.outcome,
        CommandOutcome::ContestResolved { .. }
    ));
}

// =========================================================================
// Subscribers
// =========================================================================

#[tokio::test]
async fn test_subscriber_gets_snapshot_then_incremental_log() {
    let mut coordinator = SessionCoordinator::default();
    let session = started(&mut coordinator).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let snapshot = coordinator.subscribe(session, tx).await.unwrap();
    let last_seen = snapshot.combat.log.last_id();
    match rx.recv().await.unwrap() {
        SessionUpdate::Snapshot { snapshot: pushed } => assert_eq!(pushed, snapshot),
        other => panic!("expected snapshot first, got {other:?}"),
    }

    coordinator
        .submit(
            session,
            send(
                ALICE,
                Command::EndTurn {
                    entity_id: id("alice-pc"),
                    voluntary: true,
                },
            ),
        )
        .await
        .unwrap();

    let SessionUpdate::Applied {
        revision,
        command,
        snapshot,
        log,
    } = rx.recv().await.unwrap()
    else {
        panic!("expected an applied update");
    };
    assert_eq!(command, "endTurn");
    assert_eq!(revision, snapshot.revision);
    assert_eq!(log.first().map(|e| e.id), Some(last_seen + 1));
    assert_eq!(log[0].kind, LogKind::TurnEnded);
    assert_eq!(snapshot.combat.active_entity_id, Some(id("bob-pc")));
}

#[tokio::test]
async fn test_rejected_command_reaches_only_the_caller() {
    let mut coordinator = SessionCoordinator::default();
    let session = started(&mut coordinator).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    coordinator.subscribe(session, tx).await.unwrap();
    let _ = rx.recv().await;

    let err = coordinator
        .submit(
            session,
            send(
                BOB,
                Command::EndTurn {
                    entity_id: id("bob-pc"),
                    voluntary: true,
                },
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), 400);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_end_combat_then_everything_is_completed() {
    let mut coordinator = SessionCoordinator::default();
    let session = started(&mut coordinator).await;

    let receipt = coordinator
        .submit(
            session,
            send(
                GM,
                Command::EndCombat {
                    reason: "wolf fled".into(),
                },
            ),
        )
        .await
        .unwrap();
    let CommandOutcome::CombatEnded { summary } = receipt.outcome else {
        panic!("expected a summary");
    };
    assert_eq!(summary.entities.len(), 3);

    for envelope in [
        send(ALICE, Command::LeaveLobby),
        send(GM, Command::ResolveReactions),
    ] {
        let err = coordinator.submit(session, envelope).await.unwrap_err();
        assert_eq!(err, SessionError::Rejected(CombatError::completed()));
    }
    let snapshot = coordinator.snapshot(session).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let mut coordinator = SessionCoordinator::new(SessionConfig::default());
    let a = started(&mut coordinator).await;
    let b = coordinator.create_session();

    let snap_b = coordinator.snapshot(b).await.unwrap();
    assert_eq!(snap_b.status, SessionStatus::Lobby);
    assert_eq!(snap_b.revision, 0);
    assert!(coordinator.snapshot(a).await.unwrap().revision > 0);
}
