//! Identity types.
//!
//! Every id is a newtype so a `SessionId` can never be passed where a
//! `PlayerId` is expected. All of them serialize "transparently": a
//! `PlayerId(42)` is just `42` on the wire, an `EntityId("orc-1")` is just
//! `"orc-1"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Numeric ids
// ---------------------------------------------------------------------------

/// A unique identifier for a remote player, issued by the external
/// identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a combat session (one encounter, one queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Identifier of a combatant.
///
/// Entity ids come from the roster collaborator (character sheets, monster
/// stat blocks) so they are strings rather than counters. `Ord` matters:
/// initiative ties are finally broken by ascending entity id, and session
/// snapshots keep entities in a `BTreeMap` so they serialize in a stable
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Who controls an entity, and who is issuing a command.
///
/// The same type plays both roles: a command's actor is authorized when it
/// equals the target entity's controller. On the wire a controller is the
/// string `"gm"` or `"player:<id>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Controller {
    /// The game master.
    Gm,
    /// A remote player.
    Player(PlayerId),
}

impl Controller {
    pub fn is_gm(&self) -> bool {
        matches!(self, Self::Gm)
    }

    /// Returns the player id, or `None` for the GM.
    pub fn player(&self) -> Option<PlayerId> {
        match self {
            Self::Gm => None,
            Self::Player(pid) => Some(*pid),
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gm => f.write_str("gm"),
            Self::Player(pid) => write!(f, "player:{}", pid.0),
        }
    }
}

impl FromStr for Controller {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "gm" {
            return Ok(Self::Gm);
        }
        s.strip_prefix("player:")
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|id| Self::Player(PlayerId(id)))
            .ok_or_else(|| ProtocolError::InvalidController(s.to_string()))
    }
}

impl TryFrom<String> for Controller {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Controller> for String {
    fn from(controller: Controller) -> Self {
        controller.to_string()
    }
}
