//! Shared value types for Herald.
//!
//! This crate provides the small, copyable types every other Herald crate
//! agrees on: typed identifiers for events and args, listener priorities
//! with their named bands, and the lifecycle status of an args object.

pub mod ids;
pub mod priority;
pub mod status;

pub use ids::{ArgsId, EventId};
pub use priority::{Priority, PriorityBand};
pub use status::ArgsStatus;
