//! Status effects: apply, remove, and the once-per-round tick.

use skirmish_protocol::EntityId;

use crate::error::{CombatError, Missing};
use crate::state::{Entity, StatusEffect};

/// Applies `stacks` of `key` to an entity and returns the merged effect.
///
/// Re-applying an existing key adds the stacks and keeps the longer
/// duration; a permanent duration always wins.
pub fn apply_status(
    entity: &mut Entity,
    key: &str,
    stacks: u32,
    duration: Option<u32>,
) -> Result<StatusEffect, CombatError> {
    if key.is_empty() {
        return Err(CombatError::validation("status key must not be empty"));
    }
    if stacks == 0 {
        return Err(CombatError::validation("status stacks must be at least 1"));
    }
    if duration == Some(0) {
        return Err(CombatError::validation(
            "status duration must be at least 1 round",
        ));
    }

    if let Some(existing) = entity.status_effects.iter_mut().find(|s| s.key == key) {
        existing.stacks = existing.stacks.saturating_add(stacks);
        existing.duration = match (existing.duration, duration) {
            (None, _) | (_, None) => None,
            (Some(a), Some(b)) => Some(a.max(b)),
        };
        return Ok(existing.clone());
    }

    let effect = StatusEffect {
        key: key.to_string(),
        stacks,
        duration,
    };
    entity.status_effects.push(effect.clone());
    Ok(effect)
}

pub fn remove_status(entity: &mut Entity, key: &str) -> Result<StatusEffect, CombatError> {
    let index = entity
        .status_effects
        .iter()
        .position(|s| s.key == key)
        .ok_or_else(|| missing(&entity.id, key))?;
    Ok(entity.status_effects.remove(index))
}

/// Decrements every timed effect by one round and returns the ones that
/// reached zero, already removed from the entity.
pub fn tick_statuses(entity: &mut Entity) -> Vec<StatusEffect> {
    let mut expired = Vec::new();
    entity.status_effects.retain_mut(|effect| match effect.duration {
        None => true,
        Some(rounds) if rounds <= 1 => {
            expired.push(StatusEffect {
                duration: Some(0),
                ..effect.clone()
            });
            false
        }
        Some(rounds) => {
            effect.duration = Some(rounds - 1);
            true
        }
    });
    expired
}

fn missing(entity: &EntityId, key: &str) -> CombatError {
    CombatError::NotFound(Missing::Status {
        entity: entity.clone(),
        key: key.to_string(),
    })
}
