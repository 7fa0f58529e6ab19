//! Lifecycle status of an args object.

use serde::{Deserialize, Serialize};

/// Where an args object is in its raise cycle.
///
/// Transitions only move forward, one step at a time:
/// `Unused -> UsingPreEvent -> UsedPreEvent -> UsingPostEvent -> UsedPostEvent`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ArgsStatus {
    /// Not yet raised.
    #[default]
    Unused,
    /// Pre-event listeners are being invoked.
    UsingPreEvent,
    /// Pre-event phase finished; post-event listeners are pending.
    UsedPreEvent,
    /// Post-event listeners are being invoked.
    UsingPostEvent,
    /// Raise cycle complete.
    UsedPostEvent,
}

impl ArgsStatus {
    /// The status that follows this one, if any.
    pub fn next(self) -> Option<ArgsStatus> {
        match self {
            ArgsStatus::Unused => Some(ArgsStatus::UsingPreEvent),
            ArgsStatus::UsingPreEvent => Some(ArgsStatus::UsedPreEvent),
            ArgsStatus::UsedPreEvent => Some(ArgsStatus::UsingPostEvent),
            ArgsStatus::UsingPostEvent => Some(ArgsStatus::UsedPostEvent),
            ArgsStatus::UsedPostEvent => None,
        }
    }

    /// True once the pre-event phase has begun.
    pub fn is_started(self) -> bool {
        self != ArgsStatus::Unused
    }

    /// True once the whole raise cycle has completed.
    pub fn is_finished(self) -> bool {
        self == ArgsStatus::UsedPostEvent
    }
}
