//! Listener priorities.
//!
//! Listeners are invoked in ascending priority order. Two bands are reserved:
//! everything at or above [`PriorityBand::Monitor`] sees immutable args, and
//! everything at or above [`PriorityBand::Post`] only runs in the post-event
//! phase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric listener priority. Lower values are invoked first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(i64);

impl Priority {
    /// Threshold at and above which args are made immutable before invocation.
    pub const MONITOR: Priority = Priority(PriorityBand::Monitor.as_value());

    /// Threshold at and above which listeners fire only in the post-event phase.
    pub const POST: Priority = Priority(PriorityBand::Post.as_value());

    /// Creates a priority from a raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn value(self) -> i64 {
        self.0
    }

    /// True when listeners at this priority must see immutable args.
    pub fn is_monitor(self) -> bool {
        self >= Self::MONITOR
    }

    /// True when listeners at this priority belong to the post-event phase.
    pub fn is_post(self) -> bool {
        self >= Self::POST
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<PriorityBand> for Priority {
    fn from(band: PriorityBand) -> Self {
        Self(band.as_value())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named priority constants.
///
/// `Lowest` through `Highest` are ordinary bands for listeners that may still
/// change the outcome. `Monitor` listeners only observe the result, and `Post`
/// listeners react after the action has taken place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    /// Runs first (-2000).
    Lowest,
    /// (-1000).
    Low,
    /// Default band (0).
    #[default]
    Normal,
    /// (1000).
    High,
    /// Last band that may still mutate args (2000).
    Highest,
    /// Observes immutable args (10000).
    Monitor,
    /// Post-event phase (20000).
    Post,
}

impl PriorityBand {
    /// Returns the numeric value of this band.
    pub const fn as_value(self) -> i64 {
        match self {
            PriorityBand::Lowest => -2_000,
            PriorityBand::Low => -1_000,
            PriorityBand::Normal => 0,
            PriorityBand::High => 1_000,
            PriorityBand::Highest => 2_000,
            PriorityBand::Monitor => 10_000,
            PriorityBand::Post => 20_000,
        }
    }

    /// All bands in ascending order.
    pub fn all() -> [PriorityBand; 7] {
        [
            PriorityBand::Lowest,
            PriorityBand::Low,
            PriorityBand::Normal,
            PriorityBand::High,
            PriorityBand::Highest,
            PriorityBand::Monitor,
            PriorityBand::Post,
        ]
    }
}
