//! # Skirmish
//!
//! Authoritative combat-session engine for tabletop RPGs.
//!
//! Skirmish runs the rules of an encounter: initiative, turns, action
//! points, reaction windows, opposed skill contests, GM overrides, and an
//! append-only combat log. Clients send commands; every session processes
//! them one at a time and pushes the resulting state to subscribers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skirmish::prelude::*;
//!
//! # async fn run() -> Result<(), SkirmishError> {
//! init_tracing(DEFAULT_FILTER);
//! let engine = Engine::builder().build();
//! let session = engine.create_session().await;
//!
//! let reply = engine
//!     .submit_json(session, r#"{"actor":"player:1","command":{"type":"joinLobby"}}"#)
//!     .await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod telemetry;

pub use engine::{Engine, EngineBuilder, Reply};
pub use error::{ErrorReceipt, SkirmishError};
pub use telemetry::{DEFAULT_FILTER, init_tracing};

pub use skirmish_combat as combat;
pub use skirmish_protocol as protocol;
pub use skirmish_session as session;

/// Everything needed to drive an engine.
pub mod prelude {
    pub use crate::{DEFAULT_FILTER, Engine, EngineBuilder, ErrorReceipt, Reply, SkirmishError, init_tracing};
    pub use skirmish_combat::{
        CombatConfig, CombatError, Command, CommandEnvelope, CommandOutcome, ContestId,
        CheckId, DiceEngine, Entity, Faction, InitiativeMode, LobbyConfig, ModifierOp,
        OverrideAction, Phase, ReactionTrigger, Resource, ResourceModifier, StackingPolicy,
        TiePriority,
    };
    pub use skirmish_protocol::{Codec, Controller, EntityId, JsonCodec, PlayerId, SessionId};
    pub use skirmish_session::{
        CommandReceipt, SessionConfig, SessionSnapshot, SessionStatus, SessionUpdate,
    };
}
