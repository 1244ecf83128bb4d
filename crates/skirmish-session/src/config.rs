//! Session configuration and lifecycle.

use serde::{Deserialize, Serialize};
use skirmish_combat::{CombatConfig, LobbyConfig};

/// Default command channel size for session actors.
pub const DEFAULT_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings applied to every session a coordinator creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Capacity of the bounded command queue. Senders wait when it is full.
    pub channel_size: usize,
    pub lobby: LobbyConfig,
    pub combat: CombatConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_size: DEFAULT_CHANNEL_SIZE,
            lobby: LobbyConfig::default(),
            combat: CombatConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn validated(mut self) -> Self {
        if self.channel_size == 0 {
            tracing::warn!("session channel size of 0, using {DEFAULT_CHANNEL_SIZE}");
            self.channel_size = DEFAULT_CHANNEL_SIZE;
        }
        self.lobby = self.lobby.validated();
        self.combat = self.combat.validated();
        self
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Coarse lifecycle of a session.
///
/// ```text
/// Lobby → InCombat → Completed
///   └──────────────────↗
/// ```
///
/// `endCombat` may close a session that never left the lobby.
/// `Terminated` can be entered from any state after an internal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Players are gathering; combat has not started.
    Lobby,
    InCombat,
    /// `endCombat` ran. The final state stays readable.
    Completed,
    Terminated,
}

impl SessionStatus {
    /// Returns `true` while commands can still change the session.
    pub fn accepts_commands(&self) -> bool {
        matches!(self, Self::Lobby | Self::InCombat)
    }

    /// Whether the session may move from `self` to `target`.
    pub fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Terminated, _) => false,
            (_, Self::Terminated) => true,
            (Self::Lobby, Self::InCombat | Self::Completed) => true,
            (Self::InCombat, Self::Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lobby => write!(f, "Lobby"),
            Self::InCombat => write!(f, "InCombat"),
            Self::Completed => write!(f, "Completed"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}
