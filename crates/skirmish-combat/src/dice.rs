//! Dice engine.
//!
//! Rolls `N` dice of size `S`, keeps the highest (or lowest) single die and
//! adds a modifier. The randomness comes from an injectable [`DieSource`]
//! so a session can be replayed from a seed, and tests can script exact
//! values.
//!
//! Client-rolled dice are never trusted as totals: [`DiceEngine::verify`]
//! checks every submitted value against the expected roll shape and
//! recomputes the total on the server.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// Default cap on dice per roll.
pub const DEFAULT_MAX_DICE: u32 = 20;

/// Errors produced while building, rolling, or verifying dice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiceError {
    #[error("at least one die is required")]
    NoDice,

    #[error("dice must have at least one side")]
    NoSides,

    #[error("{count} dice exceeds the limit of {max}")]
    TooManyDice { count: u32, max: u32 },

    /// A client submitted a different number of dice than the roll calls for.
    #[error("expected {expected} dice, got {got}")]
    CountMismatch { expected: u32, got: usize },

    /// A client submitted a face that doesn't exist on the die.
    #[error("die value {value} is outside 1..={size}")]
    OutOfRange { value: u32, size: u32 },

    #[error("invalid dice notation {0:?}: {1}")]
    Notation(String, String),
}

// ---------------------------------------------------------------------------
// DiceRoll
// ---------------------------------------------------------------------------

/// The shape of a roll: how many dice, what size, which one counts, and
/// the flat modifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRoll {
    pub count: u32,
    pub size: u32,
    #[serde(default = "keep_highest_default")]
    pub keep_highest: bool,
    #[serde(default)]
    pub modifier: i64,
}

fn keep_highest_default() -> bool {
    true
}

impl DiceRoll {
    /// `count` dice of `size`, keep highest, no modifier.
    pub fn new(count: u32, size: u32) -> Self {
        Self {
            count,
            size,
            keep_highest: true,
            modifier: 0,
        }
    }

    pub fn with_modifier(mut self, modifier: i64) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn keep_lowest(mut self) -> Self {
        self.keep_highest = false;
        self
    }

    /// Checks the shape against a dice cap.
    pub fn validate(&self, max_dice: u32) -> Result<(), DiceError> {
        if self.count == 0 {
            return Err(DiceError::NoDice);
        }
        if self.size == 0 {
            return Err(DiceError::NoSides);
        }
        if self.count > max_dice {
            return Err(DiceError::TooManyDice {
                count: self.count,
                max: max_dice,
            });
        }
        Ok(())
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.size)?;
        if self.count > 1 {
            f.write_str(if self.keep_highest { "kh" } else { "kl" })?;
        }
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

/// Parses `NdS`, `NdSkh`, `NdSkl`, each optionally followed by `+M`/`-M`.
/// A missing count means one die (`d20`).
impl FromStr for DiceRoll {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let notation = s.trim().to_lowercase();
        let bad = |why: &str| DiceError::Notation(s.to_string(), why.to_string());

        let d_pos = notation.find('d').ok_or_else(|| bad("missing 'd'"))?;
        let count_str = &notation[..d_pos];
        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str.parse().map_err(|_| bad("invalid dice count"))?
        };

        let rest = &notation[d_pos + 1..];
        let (body, modifier) = match rest.find(['+', '-']) {
            Some(pos) => {
                let modifier: i64 = rest[pos..]
                    .trim_start_matches('+')
                    .parse()
                    .map_err(|_| bad("invalid modifier"))?;
                (&rest[..pos], modifier)
            }
            None => (rest, 0),
        };

        let (sides_str, keep_highest) = if let Some(sides) = body.strip_suffix("kh") {
            (sides, true)
        } else if let Some(sides) = body.strip_suffix("kl") {
            (sides, false)
        } else {
            (body, true)
        };
        let size: u32 = sides_str.parse().map_err(|_| bad("invalid die size"))?;

        let roll = DiceRoll {
            count,
            size,
            keep_highest,
            modifier,
        };
        if count == 0 {
            return Err(DiceError::NoDice);
        }
        if size == 0 {
            return Err(DiceError::NoSides);
        }
        Ok(roll)
    }
}

// ---------------------------------------------------------------------------
// RollResult
// ---------------------------------------------------------------------------

/// A finished roll: the raw faces, the one that counted, and the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollResult {
    pub raw: Vec<u32>,
    pub size: u32,
    pub keep_highest: bool,
    pub selected: u32,
    pub modifier: i64,
    pub total: i64,
}

impl RollResult {
    fn from_raw(spec: &DiceRoll, raw: Vec<u32>) -> Result<Self, DiceError> {
        let selected =
            DiceEngine::select(&raw, spec.keep_highest).ok_or(DiceError::NoDice)?;
        Ok(Self {
            raw,
            size: spec.size,
            keep_highest: spec.keep_highest,
            selected,
            modifier: spec.modifier,
            total: i64::from(selected).saturating_add(spec.modifier),
        })
    }
}

// ---------------------------------------------------------------------------
// Die sources
// ---------------------------------------------------------------------------

/// Produces single die faces. Implementations must return a value in
/// `1..=size`.
pub trait DieSource: Send {
    fn roll_die(&mut self, size: u32) -> u32;
}

/// Adapts any `rand` generator into a [`DieSource`].
#[derive(Debug, Clone)]
pub struct RngSource<R>(pub R);

impl<R: RngCore + Send> DieSource for RngSource<R> {
    fn roll_die(&mut self, size: u32) -> u32 {
        self.0.random_range(1..=size)
    }
}

/// Replays a fixed sequence of faces, cycling when exhausted.
///
/// Values are clamped into `1..=size` so a script written for d100 still
/// produces legal d6 faces.
#[derive(Debug, Clone)]
pub struct ScriptedDice {
    values: Vec<u32>,
    cursor: usize,
}

impl ScriptedDice {
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            values: values.into_iter().collect(),
            cursor: 0,
        }
    }
}

impl DieSource for ScriptedDice {
    fn roll_die(&mut self, size: u32) -> u32 {
        if self.values.is_empty() {
            return 1;
        }
        let value = self.values[self.cursor % self.values.len()];
        self.cursor += 1;
        value.clamp(1, size.max(1))
    }
}

// ---------------------------------------------------------------------------
// DiceEngine
// ---------------------------------------------------------------------------

/// Rolls and verifies dice for one combat session.
pub struct DiceEngine {
    source: Box<dyn DieSource>,
    max_dice: u32,
}

impl fmt::Debug for DiceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiceEngine")
            .field("max_dice", &self.max_dice)
            .finish_non_exhaustive()
    }
}

impl DiceEngine {
    pub fn new(source: impl DieSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            max_dice: DEFAULT_MAX_DICE,
        }
    }

    /// Deterministic engine: the same seed yields the same faces.
    pub fn seeded(seed: u64) -> Self {
        Self::new(RngSource(StdRng::seed_from_u64(seed)))
    }

    /// Engine seeded from operating-system entropy.
    pub fn from_os_rng() -> Self {
        Self::new(RngSource(StdRng::from_os_rng()))
    }

    pub fn scripted(values: impl IntoIterator<Item = u32>) -> Self {
        Self::new(ScriptedDice::new(values))
    }

    pub fn with_max_dice(mut self, max_dice: u32) -> Self {
        self.max_dice = max_dice.max(1);
        self
    }

    pub fn max_dice(&self) -> u32 {
        self.max_dice
    }

    /// Rolls `count` dice of `size`, returning the raw faces in roll order.
    pub fn roll_raw(
        &mut self,
        count: u32,
        size: u32,
    ) -> Result<Vec<u32>, DiceError> {
        DiceRoll::new(count, size).validate(self.max_dice)?;
        Ok((0..count).map(|_| self.source.roll_die(size)).collect())
    }

    /// The highest (or lowest) face, or `None` for an empty roll.
    pub fn select(raw: &[u32], keep_highest: bool) -> Option<u32> {
        if keep_highest {
            raw.iter().copied().max()
        } else {
            raw.iter().copied().min()
        }
    }

    /// Rolls a full [`DiceRoll`] server-side.
    pub fn roll(&mut self, spec: &DiceRoll) -> Result<RollResult, DiceError> {
        let raw = self.roll_raw(spec.count, spec.size)?;
        RollResult::from_raw(spec, raw)
    }

    /// Validates client-submitted faces against `spec` and recomputes the
    /// total. The client's own arithmetic is never consulted.
    pub fn verify(
        &self,
        spec: &DiceRoll,
        raw: &[u32],
    ) -> Result<RollResult, DiceError> {
        spec.validate(self.max_dice)?;
        if raw.len() != spec.count as usize {
            return Err(DiceError::CountMismatch {
                expected: spec.count,
                got: raw.len(),
            });
        }
        if let Some(&value) = raw.iter().find(|&&v| v == 0 || v > spec.size) {
            return Err(DiceError::OutOfRange {
                value,
                size: spec.size,
            });
        }
        RollResult::from_raw(spec, raw.to_vec())
    }
}
