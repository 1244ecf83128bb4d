//! Session actor: one Tokio task per combat encounter.
//!
//! The actor owns the lobby and the combat state machine. Every command
//! arrives through a bounded mpsc channel and is processed to completion
//! before the next one is read, so commands for one session never
//! interleave. Replies go back on oneshot channels; state changes are
//! pushed to subscribers.

use serde::{Deserialize, Serialize};
use skirmish_combat::{
    CombatError, CombatLobby, CombatLogEntry, CombatSessionState, CombatStateMachine, Command,
    CommandEnvelope, CommandOutcome, DiceEngine, LobbySnapshot, Phase,
};
use skirmish_protocol::{Controller, SessionId};
use tokio::sync::{mpsc, oneshot};

use crate::authorize::authorize;
use crate::{SessionConfig, SessionError, SessionStatus};

/// Everything a client needs to render the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    /// Number of accepted commands so far.
    pub revision: u64,
    pub status: SessionStatus,
    pub lobby: LobbySnapshot,
    pub combat: CombatSessionState,
}

/// Pushed to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionUpdate {
    /// Sent once, right after subscribing.
    Snapshot { snapshot: SessionSnapshot },
    /// A command was accepted. `log` holds only the entries it appended.
    Applied {
        revision: u64,
        command: String,
        snapshot: SessionSnapshot,
        log: Vec<CombatLogEntry>,
    },
    /// The session hit an internal fault and stopped accepting commands.
    Fatal { reason: String },
    /// The session was closed.
    Closed,
}

/// Reply to an accepted command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReceipt {
    pub session_id: SessionId,
    pub revision: u64,
    pub outcome: CommandOutcome,
}

/// Channel for delivering updates to one subscriber.
pub type UpdateSender = mpsc::UnboundedSender<SessionUpdate>;

pub(crate) enum SessionCommand {
    Submit {
        envelope: CommandEnvelope,
        reply: oneshot::Sender<Result<CommandReceipt, SessionError>>,
    },
    Subscribe {
        sender: UpdateSender,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

/// Handle to a running session actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionCommand>,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit { envelope, .. } => write!(f, "Submit({})", envelope.command.name()),
            Self::Subscribe { .. } => write!(f, "Subscribe"),
            Self::Snapshot { .. } => write!(f, "Snapshot"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queues a command and waits for its result.
    pub async fn submit(&self, envelope: CommandEnvelope) -> Result<CommandReceipt, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Submit {
                envelope,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?
    }

    /// Registers a subscriber. It receives the current snapshot first,
    /// which is also returned here.
    pub async fn subscribe(&self, sender: UpdateSender) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Subscribe {
                sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }

    /// Copy of the state between two commands.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }
}

struct SessionActor {
    session_id: SessionId,
    revision: u64,
    lobby: CombatLobby,
    machine: CombatStateMachine,
    subscribers: Vec<UpdateSender>,
    status: SessionStatus,
    /// Set once an invariant breaks; the session is dead from then on.
    fault: Option<String>,
    receiver: mpsc::Receiver<SessionCommand>,
}

impl SessionActor {
    fn new(
        session_id: SessionId,
        config: &SessionConfig,
        dice: DiceEngine,
        receiver: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        Self {
            session_id,
            revision: 0,
            lobby: CombatLobby::new(config.lobby.clone()),
            machine: CombatStateMachine::new(config.combat.clone(), dice),
            subscribers: Vec::new(),
            status: SessionStatus::Lobby,
            fault: None,
            receiver,
        }
    }

    async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "session actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                SessionCommand::Submit { envelope, reply } => {
                    let result = self.handle_submit(envelope);
                    let _ = reply.send(result);
                }
                SessionCommand::Subscribe { sender, reply } => {
                    let snapshot = self.snapshot();
                    if sender
                        .send(SessionUpdate::Snapshot {
                            snapshot: snapshot.clone(),
                        })
                        .is_ok()
                    {
                        self.subscribers.push(sender);
                    }
                    let _ = reply.send(snapshot);
                }
                SessionCommand::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                SessionCommand::Shutdown => {
                    tracing::info!(session_id = %self.session_id, "session shutting down");
                    self.broadcast(SessionUpdate::Closed);
                    break;
                }
            }
        }

        tracing::info!(session_id = %self.session_id, "session actor stopped");
    }

    fn handle_submit(&mut self, envelope: CommandEnvelope) -> Result<CommandReceipt, SessionError> {
        if let Some(reason) = &self.fault {
            return Err(SessionError::Terminated {
                session_id: self.session_id,
                reason: reason.clone(),
            });
        }

        let name = envelope.command.name();
        let log_before = self.machine.state().log.last_id();
        let outcome = self.apply(envelope).inspect_err(|err| {
            tracing::debug!(
                session_id = %self.session_id,
                command = name,
                code = err.code(),
                error = %err,
                "command rejected"
            );
        })?;
        self.revision += 1;

        let checked = self.machine.state().check_invariants();
        if let Err(reason) = checked.and_then(|()| self.advance_status()) {
            self.fail(reason.clone());
            return Err(SessionError::Terminated {
                session_id: self.session_id,
                reason,
            });
        }

        tracing::debug!(
            session_id = %self.session_id,
            command = name,
            revision = self.revision,
            "command applied"
        );
        let log = self.machine.state().log.since(log_before).to_vec();
        self.broadcast(SessionUpdate::Applied {
            revision: self.revision,
            command: name.to_string(),
            snapshot: self.snapshot(),
            log,
        });

        Ok(CommandReceipt {
            session_id: self.session_id,
            revision: self.revision,
            outcome,
        })
    }

    fn apply(&mut self, envelope: CommandEnvelope) -> Result<CommandOutcome, CombatError> {
        if !self.status.accepts_commands() {
            return Err(CombatError::completed());
        }
        if let Some(expected) = envelope.expected_revision {
            if expected != self.revision {
                return Err(CombatError::validation("stale revision"));
            }
        }
        authorize(envelope.actor, &envelope.command, self.machine.state())?;
        self.dispatch(envelope.actor, envelope.command)
    }

    fn dispatch(&mut self, actor: Controller, command: Command) -> Result<CommandOutcome, CombatError> {
        let machine = &mut self.machine;
        let accepted = |()| CommandOutcome::Accepted;
        match command {
            Command::StartCombat {
                entities,
                initiative_mode,
                manual,
            } => {
                if machine.phase() != Phase::Setup {
                    return Err(CombatError::validation("combat already started"));
                }
                self.lobby.check_roster(&entities)?;
                machine.start_combat(entities, initiative_mode, manual)?;
                self.lobby.close();
                tracing::info!(
                    session_id = %self.session_id,
                    phase = %machine.phase(),
                    "session entered combat"
                );
                Ok(CommandOutcome::Accepted)
            }
            Command::SubmitInitiativeRoll { entity_id, raw } => {
                machine.submit_initiative_roll(&entity_id, &raw).map(accepted)
            }
            Command::ForceInitiativeRoll { entity_id } => {
                machine.force_initiative_roll(&entity_id).map(accepted)
            }
            Command::DeclareAction {
                entity_id,
                action_type,
                ap_cost,
                target_id,
                interruptible,
            } => machine
                .declare_action(
                    &entity_id,
                    &action_type,
                    ap_cost,
                    target_id.as_ref(),
                    interruptible,
                )
                .map(accepted),
            Command::DeclareReaction {
                entity_id,
                reaction_type,
                ap_cost,
                target_id,
            } => machine
                .declare_reaction(&entity_id, &reaction_type, ap_cost, target_id.as_ref())
                .map(accepted),
            Command::DeclineReaction { entity_id } => {
                machine.decline_reaction(&entity_id).map(accepted)
            }
            Command::ResolveReactions => machine.resolve_reactions().map(accepted),
            Command::EndTurn {
                entity_id,
                voluntary,
            } => machine.end_turn(&entity_id, voluntary).map(accepted),
            Command::InitiateSkillContest {
                initiator_id,
                target_id,
                skill,
                roll,
                suggested_defense_skill,
                gm_can_resolve,
            } => machine.initiate_skill_contest(
                &initiator_id,
                &target_id,
                &skill,
                roll.as_deref(),
                suggested_defense_skill.as_deref(),
                gm_can_resolve,
            ),
            Command::RespondToSkillContest {
                contest_id,
                entity_id,
                skill,
                roll,
            } => machine.respond_to_skill_contest(contest_id, &entity_id, &skill, roll.as_deref()),
            Command::RequestSkillCheck {
                target_entity_id,
                skill,
                target_number,
                dice_count,
                keep_highest,
                gm_can_resolve,
            } => machine.request_skill_check(
                &target_entity_id,
                &skill,
                target_number,
                dice_count,
                keep_highest,
                gm_can_resolve,
            ),
            Command::SubmitSkillCheck { check_id, roll } => {
                machine.submit_skill_check(check_id, roll.as_deref())
            }
            Command::GmOverride {
                target_entity_id,
                action,
                reason,
            } => machine
                .gm_override(&target_entity_id, action, &reason)
                .map(accepted),
            Command::EndCombat { reason } => machine
                .end_combat(&reason)
                .map(|summary| CommandOutcome::CombatEnded { summary }),
            Command::JoinLobby => self.lobby.join(player(actor)?).map(accepted),
            Command::LeaveLobby => self.lobby.leave(player(actor)?).map(accepted),
            Command::SetReady { ready } => self.lobby.set_ready(player(actor)?, ready).map(accepted),
        }
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    /// Moves the status to match the combat phase after a command.
    fn advance_status(&mut self) -> Result<(), String> {
        let next = if self.machine.is_completed() {
            SessionStatus::Completed
        } else if self.machine.phase() == Phase::Setup {
            SessionStatus::Lobby
        } else {
            SessionStatus::InCombat
        };
        if next == self.status {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(format!("session cannot go from {} to {next}", self.status));
        }
        tracing::info!(
            session_id = %self.session_id,
            from = %self.status,
            to = %next,
            "session status changed"
        );
        self.status = next;
        Ok(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            revision: self.revision,
            status: self.status(),
            lobby: self.lobby.snapshot(),
            combat: self.machine.snapshot(),
        }
    }

    /// Marks the session dead and tells every subscriber.
    fn fail(&mut self, reason: String) {
        tracing::error!(session_id = %self.session_id, %reason, "session invariant violated");
        self.fault = Some(reason.clone());
        self.status = SessionStatus::Terminated;
        self.broadcast(SessionUpdate::Fatal { reason });
    }

    /// Sends to every subscriber, dropping the ones whose receiver is gone.
    fn broadcast(&mut self, update: SessionUpdate) {
        let session_id = self.session_id;
        self.subscribers.retain(|tx| {
            let delivered = tx.send(update.clone()).is_ok();
            if !delivered {
                tracing::warn!(%session_id, "dropping closed subscriber");
            }
            delivered
        });
    }
}

fn player(actor: Controller) -> Result<skirmish_protocol::PlayerId, CombatError> {
    actor.player().ok_or(CombatError::Unauthorized {
        actor,
        subject: "the lobby".to_string(),
    })
}

/// Spawns a session actor and returns a handle to it.
pub(crate) fn spawn_session(
    session_id: SessionId,
    config: &SessionConfig,
    dice: DiceEngine,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.channel_size);
    let actor = SessionActor::new(session_id, config, dice, rx);
    tokio::spawn(actor.run());
    SessionHandle {
        session_id,
        sender: tx,
    }
}

#[cfg(test)]
mod tests {
    use skirmish_protocol::PlayerId;

    use super::*;

    fn actor() -> SessionActor {
        let (_tx, rx) = mpsc::channel(1);
        SessionActor::new(
            SessionId(99),
            &SessionConfig::default(),
            DiceEngine::seeded(7),
            rx,
        )
    }

    fn join(player: u64) -> CommandEnvelope {
        CommandEnvelope::new(Controller::Player(PlayerId(player)), Command::JoinLobby)
    }

    #[test]
    fn test_handle_submit_bumps_revision_and_broadcasts() {
        let mut actor = actor();
        let (tx, mut rx) = mpsc::unbounded_channel();
        actor.subscribers.push(tx);

        let receipt = actor.handle_submit(join(1)).unwrap();
        assert_eq!(receipt.revision, 1);
        assert_eq!(receipt.outcome, CommandOutcome::Accepted);

        let Ok(SessionUpdate::Applied {
            revision,
            command,
            snapshot,
            log,
        }) = rx.try_recv()
        else {
            panic!("expected an applied update");
        };
        assert_eq!(revision, 1);
        assert_eq!(command, "joinLobby");
        assert!(snapshot.lobby.members.contains_key(&PlayerId(1)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_handle_submit_stale_revision_is_rejected() {
        let mut actor = actor();
        actor.handle_submit(join(1)).unwrap();
        let err = actor.handle_submit(join(2).at_revision(0)).unwrap_err();
        assert_eq!(
            err,
            SessionError::Rejected(CombatError::validation("stale revision"))
        );
        assert_eq!(actor.revision, 1);
    }

    #[test]
    fn test_rejected_command_is_not_broadcast() {
        let mut actor = actor();
        let (tx, mut rx) = mpsc::unbounded_channel();
        actor.subscribers.push(tx);
        let gm_join = CommandEnvelope::new(Controller::Gm, Command::JoinLobby);
        assert_eq!(actor.handle_submit(gm_join).unwrap_err().code(), 401);
        assert!(rx.try_recv().is_err());
        assert_eq!(actor.revision, 0);
    }

    #[test]
    fn test_fail_broadcasts_fatal_and_terminates() {
        let mut actor = actor();
        let (tx, mut rx) = mpsc::unbounded_channel();
        actor.subscribers.push(tx);

        actor.fail("log out of sequence".to_string());
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionUpdate::Fatal {
                reason: "log out of sequence".to_string()
            }
        );
        assert_eq!(actor.status(), SessionStatus::Terminated);

        let err = actor.handle_submit(join(1)).unwrap_err();
        assert!(matches!(err, SessionError::Terminated { .. }));
        assert_eq!(err.code(), 500);
    }

    #[test]
    fn test_status_follows_combat_and_completed_rejects() {
        let mut actor = actor();
        actor.handle_submit(join(1)).unwrap();
        assert_eq!(actor.status(), SessionStatus::Lobby);

        let end = CommandEnvelope::new(
            Controller::Gm,
            Command::EndCombat {
                reason: "called off".into(),
            },
        );
        actor.handle_submit(end).unwrap();
        assert_eq!(actor.status(), SessionStatus::Completed);

        let err = actor.handle_submit(join(2)).unwrap_err();
        assert_eq!(err, SessionError::Rejected(CombatError::completed()));
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let mut actor = actor();
        let (tx, rx) = mpsc::unbounded_channel();
        actor.subscribers.push(tx);
        drop(rx);
        actor.handle_submit(join(1)).unwrap();
        assert!(actor.subscribers.is_empty());
    }

    #[test]
    fn test_update_serializes_tagged() {
        let value = serde_json::to_value(SessionUpdate::Fatal {
            reason: "x".into(),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({ "type": "fatal", "reason": "x" }));
    }
}
