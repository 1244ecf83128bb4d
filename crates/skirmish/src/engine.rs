//! `Engine` builder and command entry points.
//!
//! The engine ties the layers together: bytes are decoded by a
//! [`Codec`], routed by the [`SessionCoordinator`], and answered with an
//! encoded receipt or error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skirmish_combat::{CombatConfig, CommandEnvelope, DiceEngine, LobbyConfig};
use skirmish_protocol::{Codec, JsonCodec, SessionId};
use skirmish_session::{
    CommandReceipt, SessionConfig, SessionCoordinator, SessionHandle, SessionSnapshot,
    SessionUpdate, UpdateSender,
};
use tokio::sync::Mutex;

use crate::{ErrorReceipt, SkirmishError};

/// Wire reply to an encoded command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Reply {
    Ok(CommandReceipt),
    Error(ErrorReceipt),
}

/// Shared engine state. Wrapped in `Arc` so the engine can be cloned
/// across tasks.
struct EngineState<C: Codec> {
    coordinator: Mutex<SessionCoordinator>,
    codec: C,
}

/// Builder for configuring an [`Engine`].
///
/// ```rust
/// use skirmish::prelude::*;
///
/// let engine = Engine::builder()
///     .channel_size(32)
///     .combat(CombatConfig {
///         tie_priority: TiePriority::EnemiesFirst,
///         ..CombatConfig::default()
///     })
///     .build();
/// assert_eq!(engine.config().channel_size, 32);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    session_config: SessionConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn channel_size(mut self, size: usize) -> Self {
        self.session_config.channel_size = size;
        self
    }

    pub fn lobby(mut self, lobby: LobbyConfig) -> Self {
        self.session_config.lobby = lobby;
        self
    }

    pub fn combat(mut self, combat: CombatConfig) -> Self {
        self.session_config.combat = combat;
        self
    }

    /// Builds an engine speaking JSON.
    pub fn build(self) -> Engine<JsonCodec> {
        self.build_with_codec(JsonCodec)
    }

    pub fn build_with_codec<C: Codec>(self, codec: C) -> Engine<C> {
        let coordinator = SessionCoordinator::new(self.session_config);
        Engine {
            config: coordinator.config().clone(),
            state: Arc::new(EngineState {
                coordinator: Mutex::new(coordinator),
                codec,
            }),
        }
    }
}

/// A running combat engine. Cheap to clone.
pub struct Engine<C: Codec = JsonCodec> {
    config: SessionConfig,
    state: Arc<EngineState<C>>,
}

impl<C: Codec> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl Engine<JsonCodec> {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }
}

impl<C: Codec> Engine<C> {
    /// The validated configuration every new session gets.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn create_session(&self) -> SessionId {
        self.state.coordinator.lock().await.create_session()
    }

    pub async fn create_session_with_dice(&self, dice: DiceEngine) -> SessionId {
        self.state
            .coordinator
            .lock()
            .await
            .create_session_with_dice(dice)
    }

    pub async fn close_session(&self, session_id: SessionId) -> Result<(), SkirmishError> {
        Ok(self
            .state
            .coordinator
            .lock()
            .await
            .close_session(session_id)
            .await?)
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.state.coordinator.lock().await.session_ids()
    }

    /// Submits a typed command.
    pub async fn submit(
        &self,
        session_id: SessionId,
        envelope: CommandEnvelope,
    ) -> Result<CommandReceipt, SkirmishError> {
        Ok(self.handle(session_id).await?.submit(envelope).await?)
    }

    pub async fn subscribe(
        &self,
        session_id: SessionId,
        sender: UpdateSender,
    ) -> Result<SessionSnapshot, SkirmishError> {
        Ok(self.handle(session_id).await?.subscribe(sender).await?)
    }

    pub async fn snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot, SkirmishError> {
        Ok(self.handle(session_id).await?.snapshot().await?)
    }

    /// Decodes an encoded [`CommandEnvelope`], runs it, and encodes the
    /// [`Reply`]. Decode and rule failures become an error reply; only a
    /// failure to encode the reply itself is returned as `Err`.
    pub async fn submit_encoded(
        &self,
        session_id: SessionId,
        data: &[u8],
    ) -> Result<Vec<u8>, SkirmishError> {
        let result = match self.state.codec.decode::<CommandEnvelope>(data) {
            Ok(envelope) => self.submit(session_id, envelope).await,
            Err(err) => Err(err.into()),
        };
        let reply = match result {
            Ok(receipt) => Reply::Ok(receipt),
            Err(err) => {
                tracing::debug!(%session_id, code = err.code(), error = %err, "error reply");
                Reply::Error(ErrorReceipt::from(&err))
            }
        };
        Ok(self.state.codec.encode(&reply)?)
    }

    /// Encodes an update for whatever channel carries it to a client.
    pub fn encode_update(&self, update: &SessionUpdate) -> Result<Vec<u8>, SkirmishError> {
        Ok(self.state.codec.encode(update)?)
    }

    /// Clones the session handle so the coordinator lock is released
    /// before awaiting the session.
    async fn handle(&self, session_id: SessionId) -> Result<SessionHandle, SkirmishError> {
        Ok(self.state.coordinator.lock().await.handle(session_id)?)
    }
}

impl Engine<JsonCodec> {
    /// [`submit_encoded`](Self::submit_encoded) for JSON text.
    pub async fn submit_json(&self, session_id: SessionId, json: &str) -> Result<String, SkirmishError> {
        let bytes = self.submit_encoded(session_id, json.as_bytes()).await?;
        String::from_utf8(bytes)
            .map_err(|err| skirmish_protocol::ProtocolError::InvalidMessage(err.to_string()).into())
    }
}

impl Default for Engine<JsonCodec> {
    fn default() -> Self {
        EngineBuilder::new().build()
    }
}
