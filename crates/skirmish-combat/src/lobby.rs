//! Pre-combat lobby.
//!
//! Players join and flag themselves ready. The GM can only start combat
//! once the lobby reports ready for the proposed roster, after which the
//! lobby closes for good.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skirmish_protocol::{Controller, PlayerId};

use crate::error::{CombatError, Missing};
use crate::state::Entity;

/// Player limits for a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbyConfig {
    /// Players that must be present before combat can start.
    pub min_players: usize,
    pub max_players: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            min_players: 1,
            max_players: 8,
        }
    }
}

impl LobbyConfig {
    /// Forces `max_players >= 1` and `min_players <= max_players`.
    pub fn validated(mut self) -> Self {
        self.max_players = self.max_players.max(1);
        if self.min_players > self.max_players {
            tracing::warn!(
                min = self.min_players,
                max = self.max_players,
                "lobby min_players above max_players, clamping"
            );
            self.min_players = self.max_players;
        }
        self
    }
}

/// Whether the lobby still accepts joins and ready flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyState {
    #[default]
    Open,
    /// Combat has started.
    Closed,
}

/// Read-only view sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub state: LobbyState,
    pub members: BTreeMap<PlayerId, bool>,
    pub min_players: usize,
    pub max_players: usize,
    pub ready: bool,
}

/// Membership and readiness for the players of one session.
#[derive(Debug, Clone, Default)]
pub struct CombatLobby {
    config: LobbyConfig,
    state: LobbyState,
    /// Player id to ready flag.
    members: BTreeMap<PlayerId, bool>,
}

impl CombatLobby {
    /// An open lobby with no members.
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config: config.validated(),
            state: LobbyState::Open,
            members: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    /// Whether `player` has joined and not left.
    pub fn is_member(&self, player: PlayerId) -> bool {
        self.members.contains_key(&player)
    }

    pub fn player_count(&self) -> usize {
        self.members.len()
    }

    /// Joining twice is a no-op.
    pub fn join(&mut self, player: PlayerId) -> Result<(), CombatError> {
        self.ensure_open()?;
        if self.is_member(player) {
            return Ok(());
        }
        if self.player_count() >= self.config.max_players {
            return Err(CombatError::validation(format!(
                "lobby is full ({} players)",
                self.config.max_players
            )));
        }
        self.members.insert(player, false);
        Ok(())
    }

    /// Leaving is allowed after combat starts; the player's entities stay
    /// in the fight under GM fallback.
    pub fn leave(&mut self, player: PlayerId) -> Result<(), CombatError> {
        self.members
            .remove(&player)
            .map(|_| ())
            .ok_or(CombatError::NotFound(Missing::Player(player)))
    }

    /// Sets a member's ready flag. Only members of an open lobby can.
    pub fn set_ready(&mut self, player: PlayerId, ready: bool) -> Result<(), CombatError> {
        self.ensure_open()?;
        let flag = self
            .members
            .get_mut(&player)
            .ok_or(CombatError::NotFound(Missing::Player(player)))?;
        *flag = ready;
        Ok(())
    }

    /// Enough players, all of them ready.
    pub fn is_ready(&self) -> bool {
        self.state == LobbyState::Open
            && self.members.len() >= self.config.min_players
            && self.members.values().all(|&ready| ready)
    }

    /// Checks the lobby can start a combat with `entities`: it must be
    /// ready, and every player controlling an entity must be a member.
    pub fn check_roster(&self, entities: &[Entity]) -> Result<(), CombatError> {
        self.ensure_open()?;
        if self.player_count() < self.config.min_players {
            return Err(CombatError::validation(format!(
                "lobby has {} of {} required players",
                self.members.len(),
                self.config.min_players
            )));
        }
        if let Some((player, _)) = self.members.iter().find(|(_, ready)| !**ready) {
            return Err(CombatError::validation(format!("{player} is not ready")));
        }
        for entity in entities {
            if let Controller::Player(player) = entity.controller {
                if !self.is_member(player) {
                    return Err(CombatError::validation(format!(
                        "{} is controlled by {player}, who is not in the lobby",
                        entity.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Closes the lobby once combat starts.
    pub fn close(&mut self) {
        self.state = LobbyState::Closed;
    }

    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            state: self.state,
            members: self.members.clone(),
            min_players: self.config.min_players,
            max_players: self.config.max_players,
            ready: self.is_ready(),
        }
    }

    fn ensure_open(&self) -> Result<(), CombatError> {
        match self.state {
            LobbyState::Open => Ok(()),
            LobbyState::Closed => Err(CombatError::validation("lobby is closed")),
        }
    }
}
