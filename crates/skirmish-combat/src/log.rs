//! Append-only combat log.
//!
//! Entries are never edited or removed. Ids are dense and start at 1, so a
//! subscriber that has seen entry `n` can ask for everything after it with
//! [`CombatLog::since`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use skirmish_protocol::EntityId;

/// Closed set of log entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    CombatStarted,
    InitiativeRolled,
    InitiativeOrdered,
    RoundStarted,
    TurnStarted,
    TurnEnded,
    ActionDeclared,
    ReactionDeclared,
    ReactionDeclined,
    ReactionResolved,
    ActionResolved,
    SkillContestInitiated,
    SkillContestRolled,
    SkillCheckRequested,
    SkillCheckRolled,
    ResourcesUpdated,
    ModifierApplied,
    ModifierRemoved,
    ModifierExpired,
    WoundsAdded,
    StatusApplied,
    StatusRemoved,
    StatusExpired,
    GmOverride,
    PhaseChanged,
    CombatEnded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatLogEntry {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: LogKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub round: u32,
    pub source_id: Option<EntityId>,
    pub target_id: Option<EntityId>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatLog {
    entries: Vec<CombatLogEntry>,
    /// Round stamped onto new entries.
    #[serde(skip)]
    round: u32,
}

impl CombatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    /// Appends an entry and returns its id.
    pub fn append(
        &mut self,
        kind: LogKind,
        source_id: Option<&EntityId>,
        target_id: Option<&EntityId>,
        payload: serde_json::Value,
    ) -> u64 {
        let id = self.last_id() + 1;
        self.entries.push(CombatLogEntry {
            id,
            kind,
            timestamp: now_millis(),
            round: self.round,
            source_id: source_id.cloned(),
            target_id: target_id.cloned(),
            payload,
        });
        id
    }

    pub fn entries(&self) -> &[CombatLogEntry] {
        &self.entries
    }

    /// Entries with an id greater than `after`.
    pub fn since(&self, after: u64) -> &[CombatLogEntry] {
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(self.entries.len());
        &self.entries[start..]
    }

    /// Id of the newest entry, 0 when empty.
    pub fn last_id(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CombatLogEntry> {
        self.entries.iter()
    }

    pub(crate) fn check_dense(&self) -> Result<(), String> {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.id != index as u64 + 1 {
                return Err(format!("log entry {} out of sequence at {index}", entry.id));
            }
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
