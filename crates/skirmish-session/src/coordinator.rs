//! Session coordinator: creates, tracks, and routes commands to sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use skirmish_combat::{CommandEnvelope, DiceEngine};
use skirmish_protocol::SessionId;

use crate::session::spawn_session;
use crate::{
    CommandReceipt, SessionConfig, SessionError, SessionHandle, SessionSnapshot, UpdateSender,
};

/// Counter for generating unique session ids.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Entry point for every session operation from higher layers.
///
/// The coordinator only routes. Each session's state lives inside its own
/// actor task, so two sessions never contend and one session never sees
/// two commands at once.
pub struct SessionCoordinator {
    config: SessionConfig,
    sessions: HashMap<SessionId, SessionHandle>,
}

impl SessionCoordinator {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: config.validated(),
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creates a session with operating-system dice.
    pub fn create_session(&mut self) -> SessionId {
        self.create_session_with_dice(DiceEngine::from_os_rng())
    }

    /// Creates a session rolling with `dice`. Seeded or scripted engines
    /// make a session replayable.
    pub fn create_session_with_dice(&mut self, dice: DiceEngine) -> SessionId {
        let session_id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let handle = spawn_session(session_id, &self.config, dice);
        self.sessions.insert(session_id, handle);
        tracing::info!(%session_id, "session created");
        session_id
    }

    /// A cloned handle, for callers that want to talk to the session
    /// without holding the coordinator.
    pub fn handle(&self, session_id: SessionId) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::NotFound(session_id))
    }

    pub async fn submit(
        &self,
        session_id: SessionId,
        envelope: CommandEnvelope,
    ) -> Result<CommandReceipt, SessionError> {
        self.get(session_id)?.submit(envelope).await
    }

    pub async fn subscribe(
        &self,
        session_id: SessionId,
        sender: UpdateSender,
    ) -> Result<SessionSnapshot, SessionError> {
        self.get(session_id)?.subscribe(sender).await
    }

    pub async fn snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot, SessionError> {
        self.get(session_id)?.snapshot().await
    }

    /// Shuts the session's actor down and forgets it.
    pub async fn close_session(&mut self, session_id: SessionId) -> Result<(), SessionError> {
        let handle = self
            .sessions
            .remove(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        let _ = handle.shutdown().await;
        tracing::info!(%session_id, "session closed");
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    fn get(&self, session_id: SessionId) -> Result<&SessionHandle, SessionError> {
        self.sessions
            .get(&session_id)
            .ok_or(SessionError::NotFound(session_id))
    }
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
