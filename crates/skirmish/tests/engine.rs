//! Integration tests for the engine facade: JSON in, JSON out.

use serde_json::{Value, json};
use skirmish::prelude::*;
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

async fn send(engine: &Engine, session: SessionId, envelope: Value) -> Value {
    let reply = engine
        .submit_json(session, &envelope.to_string())
        .await
        .unwrap();
    serde_json::from_str(&reply).unwrap()
}

fn roster() -> Value {
    json!([
        {
            "id": "sable", "name": "Sable", "controller": "player:1", "faction": "players",
            "skills": { "melee": 40 },
            "ap": { "current": 6, "max": 6 }
        },
        {
            "id": "ghoul", "name": "Ghoul", "controller": "gm", "faction": "enemies",
            "skills": { "melee": 20 },
            "ap": { "current": 3, "max": 3 }
        }
    ])
}

/// Player 1 joins and readies, GM starts. Dice go out in id order: ghoul 20, sable 80.
async fn started(engine: &Engine) -> SessionId {
    let session = engine
        .create_session_with_dice(DiceEngine::scripted([20, 80]))
        .await;
    send(engine, session, json!({ "actor": "player:1", "command": { "type": "joinLobby" } })).await;
    send(
        engine,
        session,
        json!({ "actor": "player:1", "command": { "type": "setReady", "ready": true } }),
    )
    .await;
    let reply = send(
        engine,
        session,
        json!({ "actor": "gm", "command": { "type": "startCombat", "entities": roster() } }),
    )
    .await;
    assert_eq!(reply["result"], "ok", "start failed: {reply}");
    session
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_submit_json_accepts_and_returns_receipt() {
    let engine = Engine::builder().build();
    let session = started(&engine).await;

    let reply = send(
        &engine,
        session,
        json!({
            "actor": "player:1",
            "command": {
                "type": "declareAction", "entityId": "sable",
                "actionType": "strike", "apCost": 2, "targetId": "ghoul"
            }
        }),
    )
    .await;
    assert_eq!(reply["result"], "ok");
    assert_eq!(reply["revision"], 4);
    assert_eq!(reply["outcome"]["type"], "accepted");
}

#[tokio::test]
async fn test_submit_json_insufficient_ap_is_402() {
    let engine = Engine::default();
    let session = started(&engine).await;

    let reply = send(
        &engine,
        session,
        json!({
            "actor": "player:1",
            "command": { "type": "declareAction", "entityId": "sable", "actionType": "cleave", "apCost": 7 }
        }),
    )
    .await;
    assert_eq!(reply["result"], "error");
    assert_eq!(reply["code"], 402);
    assert_eq!(reply["kind"], "insufficient_resource");
    assert_eq!(reply["message"], "sable needs 7 AP but has 6");

    let snapshot = engine.snapshot(session).await.unwrap();
    assert_eq!(snapshot.combat.entities[&EntityId::from("sable")].ap.current, 6);
}

#[tokio::test]
async fn test_submit_json_malformed_is_400() {
    let engine = Engine::default();
    let session = engine.create_session().await;

    for body in [
        "not json",
        r#"{"actor":"wizard","command":{"type":"joinLobby"}}"#,
        r#"{"actor":"gm","command":{"type":"castFireball"}}"#,
    ] {
        let reply: Value =
            serde_json::from_str(&engine.submit_json(session, body).await.unwrap()).unwrap();
        assert_eq!(reply["code"], 400, "body {body}");
        assert_eq!(reply["kind"], "malformed");
    }
}

#[tokio::test]
async fn test_submit_json_unknown_session_is_404() {
    let engine = Engine::default();
    let reply = send(
        &engine,
        SessionId(424_242),
        json!({ "actor": "player:1", "command": { "type": "joinLobby" } }),
    )
    .await;
    assert_eq!(reply["code"], 404);
    assert_eq!(reply["kind"], "session_not_found");
}

#[tokio::test]
async fn test_submit_json_wrong_player_is_401() {
    let engine = Engine::default();
    let session = started(&engine).await;
    let reply = send(
        &engine,
        session,
        json!({
            "actor": "player:2",
            "command": { "type": "endTurn", "entityId": "sable" }
        }),
    )
    .await;
    assert_eq!(reply["code"], 401);
    assert_eq!(reply["kind"], "unauthorized");
}

#[tokio::test]
async fn test_stale_expected_revision_is_rejected() {
    let engine = Engine::default();
    let session = started(&engine).await;
    let reply = send(
        &engine,
        session,
        json!({
            "actor": "player:1",
            "expectedRevision": 1,
            "command": { "type": "endTurn", "entityId": "sable" }
        }),
    )
    .await;
    assert_eq!(reply["code"], 400);
    assert_eq!(reply["message"], "validation failed: stale revision");
}

#[tokio::test]
async fn test_typed_submit_and_encoded_updates() {
    let engine = Engine::default();
    let session = started(&engine).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.subscribe(session, tx).await.unwrap();

    engine
        .submit(
            session,
            CommandEnvelope::new(
                Controller::Gm,
                Command::GmOverride {
                    target_entity_id: EntityId::from("ghoul"),
                    action: OverrideAction::SetAlive { alive: false },
                    reason: "beheaded".into(),
                },
            ),
        )
        .await
        .unwrap();

    let _initial = rx.recv().await.unwrap();
    let applied = rx.recv().await.unwrap();
    let bytes = engine.encode_update(&applied).unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["type"], "applied");
    assert_eq!(value["snapshot"]["combat"]["phase"], "resolution");
    assert!(
        value["log"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["type"] == "gm_override")
    );
}

#[tokio::test]
async fn test_engine_clones_share_sessions() {
    let engine = Engine::default();
    let other = engine.clone();
    let session = engine.create_session().await;
    assert_eq!(other.session_ids().await, vec![session]);
    other.close_session(session).await.unwrap();
    assert!(engine.session_ids().await.is_empty());
}
