//! Resource ledger: AP and Energy pools, timed modifiers, wounds and
//! reaction availability.
//!
//! Every mutation is written to the combat log by the ledger itself, so
//! callers can't forget to record a change.
//!
//! # Modifiers
//!
//! A modifier changes a pool's effective `current`/`max`. When it is
//! applied the ledger records the exact delta it produced. Any change to
//! the modifier list is a recompute:
//!
//! 1. unwind every modifier of that resource, newest first, by subtracting
//!    its recorded delta;
//! 2. change the list;
//! 3. re-apply the survivors in order, recording fresh deltas.
//!
//! Because unwinding is the exact inverse of applying, a pool returns to
//! its base values once every modifier is gone.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{CombatError, Missing};
use crate::log::{CombatLog, LogKind};
use crate::state::{Entity, Pool, Resource};

/// Largest magnitude a modifier amount may have. Pools are `u32`.
const MAX_MODIFIER_AMOUNT: f64 = u32::MAX as f64;

/// How a modifier changes a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierOp {
    /// Adds `amount` to both current and max.
    Add,
    /// Scales both current and max, rounding to the nearest integer.
    Multiply,
    /// Sets max to `amount`; current is capped at it.
    Set,
}

impl ModifierOp {
    fn apply(self, current: i64, max: i64, amount: f64) -> (i64, i64) {
        match self {
            Self::Add => {
                let delta = amount.round() as i64;
                (current.saturating_add(delta), max.saturating_add(delta))
            }
            Self::Multiply => (
                (current as f64 * amount).round() as i64,
                (max as f64 * amount).round() as i64,
            ),
            Self::Set => {
                let value = amount.round() as i64;
                (current.min(value), value)
            }
        }
    }
}

/// The change a modifier actually made the last time it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppliedDelta {
    pub current: i64,
    pub max: i64,
}

/// A pending or active change to one pool, keyed by `source` for stacking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceModifier {
    pub resource: Resource,
    pub op: ModifierOp,
    pub amount: f64,
    /// Rounds left; `None` lasts until removed.
    pub remaining: Option<u32>,
    pub source: String,
    #[serde(default)]
    pub applied: AppliedDelta,
}

impl ResourceModifier {
    /// A permanent modifier. Chain [`ResourceModifier::for_rounds`] to make
    /// it expire.
    pub fn new(resource: Resource, op: ModifierOp, amount: f64, source: impl Into<String>) -> Self {
        Self {
            resource,
            op,
            amount,
            remaining: None,
            source: source.into(),
            applied: AppliedDelta::default(),
        }
    }

    /// Expires after `rounds` round boundaries.
    pub fn for_rounds(mut self, rounds: u32) -> Self {
        self.remaining = Some(rounds);
        self
    }

    fn validate(&self) -> Result<(), CombatError> {
        if !self.amount.is_finite() {
            return Err(CombatError::validation("modifier amount must be finite"));
        }
        if self.amount.abs() > MAX_MODIFIER_AMOUNT {
            return Err(CombatError::validation(format!(
                "modifier amount {} is out of range",
                self.amount
            )));
        }
        if matches!(self.op, ModifierOp::Multiply | ModifierOp::Set) && self.amount < 0.0 {
            return Err(CombatError::validation(format!(
                "{:?} modifier amount must not be negative",
                self.op
            )));
        }
        if self.remaining == Some(0) {
            return Err(CombatError::validation(
                "modifier duration must be at least 1 round",
            ));
        }
        if self.source.is_empty() {
            return Err(CombatError::validation("modifier source must not be empty"));
        }
        Ok(())
    }
}

/// What happens when a modifier arrives from a source that already has one
/// on the same resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingPolicy {
    /// The new modifier replaces the old one in place.
    #[default]
    Refresh,
    /// Both apply.
    Stack,
}

/// Applies resource rules to one entity at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLedger {
    stacking: StackingPolicy,
}

impl ResourceLedger {
    /// A ledger that resolves same-source modifiers with `stacking`.
    pub fn new(stacking: StackingPolicy) -> Self {
        Self { stacking }
    }

    /// Adds `delta` to the pool's current value, clamped into `0..=max`.
    pub fn adjust(
        &self,
        entity: &mut Entity,
        log: &mut CombatLog,
        resource: Resource,
        delta: i64,
    ) -> Pool {
        let before = entity.pool(resource);
        let after = Pool::from_signed(
            i64::from(before.current).saturating_add(delta),
            i64::from(before.max),
        );
        *entity.pool_mut(resource) = after;
        log_pool_change(log, entity, resource, before, after, "adjust");
        after
    }

    /// Returns `InsufficientResource` unless the pool holds `cost`.
    pub fn ensure_available(
        entity: &Entity,
        resource: Resource,
        cost: u32,
    ) -> Result<(), CombatError> {
        let available = entity.pool(resource).current;
        if available < cost {
            return Err(CombatError::InsufficientResource {
                entity: entity.id.clone(),
                resource,
                required: cost,
                available,
            });
        }
        Ok(())
    }

    /// Deducts `cost`, or fails without touching the pool.
    pub fn spend(
        &self,
        entity: &mut Entity,
        log: &mut CombatLog,
        resource: Resource,
        cost: u32,
    ) -> Result<Pool, CombatError> {
        Self::ensure_available(entity, resource, cost)?;
        Ok(self.adjust(entity, log, resource, -i64::from(cost)))
    }

    /// Tops the pool's current value up to max.
    pub fn refill(&self, entity: &mut Entity, log: &mut CombatLog, resource: Resource) -> Pool {
        let pool = entity.pool(resource);
        if pool.current == pool.max {
            return pool;
        }
        self.adjust(entity, log, resource, i64::from(pool.max - pool.current))
    }

    /// Sets the base pool underneath any active modifiers.
    pub fn set_pool(
        &self,
        entity: &mut Entity,
        log: &mut CombatLog,
        resource: Resource,
        current: Option<u32>,
        max: Option<u32>,
    ) -> Pool {
        let before = entity.pool(resource);
        recompute(entity, resource, |pool, _| {
            let max = max.unwrap_or(pool.max);
            *pool = Pool::new(current.unwrap_or(pool.current), max);
        });
        let after = entity.pool(resource);
        log_pool_change(log, entity, resource, before, after, "set");
        after
    }

    /// Validates and attaches `modifier`, then recomputes the pool from its
    /// base. Under `Refresh` a modifier from the same source is replaced.
    pub fn apply_modifier(
        &self,
        entity: &mut Entity,
        log: &mut CombatLog,
        modifier: ResourceModifier,
    ) -> Result<Pool, CombatError> {
        modifier.validate()?;
        let resource = modifier.resource;
        let before = entity.pool(resource);
        let payload = json!({
            "resource": resource,
            "op": modifier.op,
            "amount": modifier.amount,
            "remaining": modifier.remaining,
            "source": modifier.source,
        });

        let stacking = self.stacking;
        recompute(entity, resource, move |_, modifiers| {
            let existing = modifiers
                .iter()
                .position(|m| m.resource == resource && m.source == modifier.source);
            match (stacking, existing) {
                (StackingPolicy::Refresh, Some(index)) => modifiers[index] = modifier,
                _ => modifiers.push(modifier),
            }
        });

        let after = entity.pool(resource);
        log.append(
            LogKind::ModifierApplied,
            None,
            Some(&entity.id),
            with_pools(payload, before, after),
        );
        Ok(after)
    }

    /// Removes every modifier from `source` on `resource`.
    pub fn remove_modifier(
        &self,
        entity: &mut Entity,
        log: &mut CombatLog,
        resource: Resource,
        source: &str,
    ) -> Result<Pool, CombatError> {
        if !entity
            .modifiers
            .iter()
            .any(|m| m.resource == resource && m.source == source)
        {
            return Err(CombatError::NotFound(Missing::Modifier {
                entity: entity.id.clone(),
                source: source.to_string(),
            }));
        }

        let before = entity.pool(resource);
        recompute(entity, resource, |_, modifiers| {
            modifiers.retain(|m| !(m.resource == resource && m.source == source));
        });
        let after = entity.pool(resource);
        log.append(
            LogKind::ModifierRemoved,
            None,
            Some(&entity.id),
            with_pools(json!({ "resource": resource, "source": source }), before, after),
        );
        Ok(after)
    }

    /// Advances every timed modifier by one round, removing the expired
    /// ones. Returns what expired.
    pub fn tick_modifiers(
        &self,
        entity: &mut Entity,
        log: &mut CombatLog,
    ) -> Vec<ResourceModifier> {
        let mut expired = Vec::new();
        for resource in [Resource::Ap, Resource::Energy] {
            let timed = entity
                .modifiers
                .iter()
                .any(|m| m.resource == resource && m.remaining.is_some());
            if !timed {
                continue;
            }

            let before = entity.pool(resource);
            let mut gone = Vec::new();
            recompute(entity, resource, |_, modifiers| {
                let mut kept = Vec::with_capacity(modifiers.len());
                for mut m in modifiers.drain(..) {
                    match m.remaining {
                        Some(rounds) if m.resource == resource && rounds <= 1 => gone.push(m),
                        Some(rounds) if m.resource == resource => {
                            m.remaining = Some(rounds - 1);
                            kept.push(m);
                        }
                        _ => kept.push(m),
                    }
                }
                *modifiers = kept;
            });

            if !gone.is_empty() {
                let after = entity.pool(resource);
                let sources: Vec<&str> = gone.iter().map(|m| m.source.as_str()).collect();
                log.append(
                    LogKind::ModifierExpired,
                    None,
                    Some(&entity.id),
                    with_pools(json!({ "resource": resource, "sources": sources }), before, after),
                );
            }
            expired.extend(gone);
        }
        expired
    }

    /// Adds wounds of one type and returns the new count for that type.
    pub fn add_wounds(
        &self,
        entity: &mut Entity,
        log: &mut CombatLog,
        wound_type: &str,
        count: u32,
    ) -> Result<u32, CombatError> {
        if count == 0 {
            return Err(CombatError::validation("wound count must be at least 1"));
        }
        if wound_type.is_empty() {
            return Err(CombatError::validation("wound type must not be empty"));
        }
        let total = entity.wounds.entry(wound_type.to_string()).or_insert(0);
        *total = total.saturating_add(count);
        let total = *total;
        log.append(
            LogKind::WoundsAdded,
            None,
            Some(&entity.id),
            json!({ "woundType": wound_type, "count": count, "total": total }),
        );
        Ok(total)
    }
}

/// Unwinds every modifier on `resource`, lets `change` edit the base pool
/// or the modifier list, then re-applies the survivors.
fn recompute(
    entity: &mut Entity,
    resource: Resource,
    change: impl FnOnce(&mut Pool, &mut Vec<ResourceModifier>),
) {
    let (pool, modifiers) = match resource {
        Resource::Ap => (&mut entity.ap, &mut entity.modifiers),
        Resource::Energy => (&mut entity.energy, &mut entity.modifiers),
    };

    let mut current = i64::from(pool.current);
    let mut max = i64::from(pool.max);
    for m in modifiers.iter().rev().filter(|m| m.resource == resource) {
        current -= m.applied.current;
        max -= m.applied.max;
    }
    *pool = Pool::from_signed(current, max);

    change(pool, modifiers);

    for m in modifiers.iter_mut().filter(|m| m.resource == resource) {
        let (c0, m0) = (i64::from(pool.current), i64::from(pool.max));
        let (c1, m1) = m.op.apply(c0, m0, m.amount);
        let next = Pool::from_signed(c1, m1);
        m.applied = AppliedDelta {
            current: i64::from(next.current) - c0,
            max: i64::from(next.max) - m0,
        };
        *pool = next;
    }
}

fn with_pools(mut payload: serde_json::Value, before: Pool, after: Pool) -> serde_json::Value {
    payload["before"] = json!(before);
    payload["after"] = json!(after);
    payload
}

fn log_pool_change(
    log: &mut CombatLog,
    entity: &Entity,
    resource: Resource,
    before: Pool,
    after: Pool,
    reason: &str,
) {
    if before == after {
        return;
    }
    log.append(
        LogKind::ResourcesUpdated,
        None,
        Some(&entity.id),
        with_pools(json!({ "resource": resource, "reason": reason }), before, after),
    );
}
