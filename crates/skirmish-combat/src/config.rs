//! Rule configuration for one combat.

use serde::{Deserialize, Serialize};

use crate::contest::CriticalThresholds;
use crate::dice::{DEFAULT_MAX_DICE, DiceRoll};
use crate::initiative::TiePriority;
use crate::ledger::StackingPolicy;

/// Upper bound for the configurable dice cap.
const DICE_CAP_LIMIT: u32 = 100;

/// When a reaction window closes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionTrigger {
    /// Only `resolveReactions` closes the window.
    GmOnly,
    /// The window also closes once every eligible reactor has declared or
    /// declined.
    #[default]
    AllResponded,
}

/// Tunable rules. Every field has a default, so a partial JSON object
/// deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CombatConfig {
    pub tie_priority: TiePriority,
    pub stacking: StackingPolicy,
    pub reaction_trigger: ReactionTrigger,
    pub thresholds: CriticalThresholds,

    /// Dice for initiative; the entity's initiative skill is added.
    pub initiative_dice: DiceRoll,
    pub initiative_skill: String,

    /// Dice each side rolls in a skill contest; the skill value is added.
    pub contest_dice: DiceRoll,

    /// Die size for GM-requested skill checks.
    pub check_die_size: u32,

    /// Most dice a single roll may use.
    pub max_dice: u32,

    pub reroll_initiative_each_round: bool,
    pub refill_ap_on_turn_start: bool,

    /// A GM-controlled defender rolls immediately when a contest reaches it.
    pub auto_resolve_gm_defense: bool,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            tie_priority: TiePriority::PlayersFirst,
            stacking: StackingPolicy::Refresh,
            reaction_trigger: ReactionTrigger::AllResponded,
            thresholds: CriticalThresholds::default(),
            initiative_dice: DiceRoll::new(1, 100),
            initiative_skill: "initiative".to_string(),
            contest_dice: DiceRoll::new(1, 100),
            check_die_size: 100,
            max_dice: DEFAULT_MAX_DICE,
            reroll_initiative_each_round: false,
            refill_ap_on_turn_start: true,
            auto_resolve_gm_defense: false,
        }
    }
}

impl CombatConfig {
    /// Clamps out-of-range values so the machine never sees an
    /// unrollable configuration.
    pub fn validated(mut self) -> Self {
        self.max_dice = self.max_dice.clamp(1, DICE_CAP_LIMIT);
        for dice in [&mut self.initiative_dice, &mut self.contest_dice] {
            dice.count = dice.count.clamp(1, self.max_dice);
            dice.size = dice.size.max(1);
        }
        if self.check_die_size == 0 {
            tracing::warn!("check die size of 0, using 100");
            self.check_die_size = 100;
        }
        if self.initiative_skill.is_empty() {
            self.initiative_skill = "initiative".to_string();
        }
        self.thresholds = self.thresholds.validated();
        self
    }
}
