//! Error types for the combat rules layer.
//!
//! Every rejected command maps to exactly one [`ErrorKind`]. The kind is
//! what clients branch on; the message is for humans.

use std::fmt;

use serde::{Deserialize, Serialize};
use skirmish_protocol::{Controller, EntityId, PlayerId};

use crate::dice::DiceError;
use crate::state::{CheckId, ContestId, Resource};

/// Classification of a [`CombatError`], stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InsufficientResource,
    NotFound,
    Unauthorized,
    AlreadyResolved,
}

impl ErrorKind {
    /// HTTP-style status code used in wire error receipts.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthorized => 401,
            Self::InsufficientResource => 402,
            Self::NotFound => 404,
            Self::AlreadyResolved => 409,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::InsufficientResource => "insufficient_resource",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::AlreadyResolved => "already_resolved",
        })
    }
}

/// What a [`CombatError::NotFound`] was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Entity(EntityId),
    Contest(ContestId),
    Check(CheckId),
    Player(PlayerId),
    Modifier { entity: EntityId, source: String },
    Status { entity: EntityId, key: String },
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "entity {id}"),
            Self::Contest(id) => write!(f, "contest {id}"),
            Self::Check(id) => write!(f, "skill check {id}"),
            Self::Player(id) => write!(f, "player {id}"),
            Self::Modifier { entity, source } => {
                write!(f, "modifier {source:?} on {entity}")
            }
            Self::Status { entity, key } => write!(f, "status {key:?} on {entity}"),
        }
    }
}

/// Errors produced by the combat rules.
///
/// A command that fails with any of these has left the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CombatError {
    /// Wrong phase, wrong actor, malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("combat needs at least one entity")]
    NoCombatants,

    #[error("{entity} needs {required} {resource} but has {available}")]
    InsufficientResource {
        entity: EntityId,
        resource: Resource,
        required: u32,
        available: u32,
    },

    #[error("{0} not found")]
    NotFound(Missing),

    #[error("{actor} may not act for {subject}")]
    Unauthorized { actor: Controller, subject: String },

    #[error("{0} is already resolved")]
    AlreadyResolved(String),

    /// Bad dice shape or client-submitted faces that fail verification.
    #[error(transparent)]
    Dice(#[from] DiceError),
}

impl CombatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// The error every command receives once combat has ended.
    pub fn completed() -> Self {
        Self::Validation("combat completed".to_string())
    }

    pub fn entity_not_found(id: &EntityId) -> Self {
        Self::NotFound(Missing::Entity(id.clone()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::NoCombatants | Self::Dice(_) => ErrorKind::Validation,
            Self::InsufficientResource { .. } => ErrorKind::InsufficientResource,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind().code()
    }
}
