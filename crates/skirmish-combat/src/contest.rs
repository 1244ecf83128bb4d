//! Opposed-roll resolution.
//!
//! Two totals go in; a winner, a margin, and a critical tier come out. The
//! tier is driven by the ratio `winner / loser`:
//!
//! ```text
//! ratio < 1.5        normal
//! 1.5 ≤ ratio < 2.0  wicked
//! 2.0 ≤ ratio < 3.0  vicious
//! 3.0 ≤ ratio        brutal
//! ```
//!
//! Thresholds are configuration ([`CriticalThresholds`]); the defaults
//! above are the canonical rule.

use serde::{Deserialize, Serialize};
use skirmish_protocol::EntityId;

/// Severity of a contest win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalTier {
    Normal,
    Wicked,
    Vicious,
    Brutal,
}

impl std::fmt::Display for CriticalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Wicked => "wicked",
            Self::Vicious => "vicious",
            Self::Brutal => "brutal",
        })
    }
}

/// Ratio cut-offs for each tier above `normal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalThresholds {
    pub wicked: f64,
    pub vicious: f64,
    pub brutal: f64,
}

impl Default for CriticalThresholds {
    fn default() -> Self {
        Self {
            wicked: 1.5,
            vicious: 2.0,
            brutal: 3.0,
        }
    }
}

impl CriticalThresholds {
    /// Forces the thresholds into ascending order, each at least 1.0.
    pub fn validated(mut self) -> Self {
        if !self.wicked.is_finite() || self.wicked < 1.0 {
            tracing::warn!(wicked = self.wicked, "wicked threshold below 1.0, clamping");
            self.wicked = 1.0;
        }
        if !self.vicious.is_finite() || self.vicious < self.wicked {
            self.vicious = self.wicked;
        }
        if !self.brutal.is_finite() || self.brutal < self.vicious {
            self.brutal = self.vicious;
        }
        self
    }

    /// Classifies a winner/loser pair.
    ///
    /// A non-positive loser against a positive winner is an unbounded
    /// ratio and therefore brutal; two non-positive totals are normal.
    pub fn classify(&self, winner_total: i64, loser_total: i64) -> CriticalTier {
        if loser_total <= 0 {
            return if winner_total > 0 {
                CriticalTier::Brutal
            } else {
                CriticalTier::Normal
            };
        }
        let ratio = winner_total as f64 / loser_total as f64;
        if ratio >= self.brutal {
            CriticalTier::Brutal
        } else if ratio >= self.vicious {
            CriticalTier::Vicious
        } else if ratio >= self.wicked {
            CriticalTier::Wicked
        } else {
            CriticalTier::Normal
        }
    }
}

/// Result of an opposed roll. On a tie every winner/loser field is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestOutcome {
    pub initiator_total: i64,
    pub defender_total: i64,
    pub winner_id: Option<EntityId>,
    pub loser_id: Option<EntityId>,
    pub winner_total: Option<i64>,
    pub loser_total: Option<i64>,
    pub margin: Option<i64>,
    pub critical_tier: Option<CriticalTier>,
    pub is_tie: bool,
}

/// Stateless resolver configured with tier thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillContestResolver {
    thresholds: CriticalThresholds,
}

impl SkillContestResolver {
    pub fn new(thresholds: CriticalThresholds) -> Self {
        Self {
            thresholds: thresholds.validated(),
        }
    }

    pub fn resolve(
        &self,
        initiator: &EntityId,
        initiator_total: i64,
        defender: &EntityId,
        defender_total: i64,
    ) -> ContestOutcome {
        if initiator_total == defender_total {
            return ContestOutcome {
                initiator_total,
                defender_total,
                winner_id: None,
                loser_id: None,
                winner_total: None,
                loser_total: None,
                margin: None,
                critical_tier: None,
                is_tie: true,
            };
        }

        let (winner, winner_total, loser, loser_total) = if initiator_total > defender_total {
            (initiator, initiator_total, defender, defender_total)
        } else {
            (defender, defender_total, initiator, initiator_total)
        };

        ContestOutcome {
            initiator_total,
            defender_total,
            winner_id: Some(winner.clone()),
            loser_id: Some(loser.clone()),
            winner_total: Some(winner_total),
            loser_total: Some(loser_total),
            margin: Some(winner_total.saturating_sub(loser_total)),
            critical_tier: Some(self.thresholds.classify(winner_total, loser_total)),
            is_tie: false,
        }
    }
}
