//! Priority-ordered, dependency-aware event dispatch for Herald.
//!
//! This crate provides:
//! - [`Event`], a thread-safe table of prioritized listeners and dependent events
//! - [`EventArgs`], a once-only args object with shared cancellation
//! - two-phase raising: a pre-event phase and a deferred post-event phase
//! - simultaneous raising of several events as one merged queue
//!
//! # Example
//!
//! ```no_run
//! use herald_events::{Event, EventArgs, ListenerError, PriorityBand};
//!
//! struct World;
//!
//! let save: Event<World, String> = Event::new("world-save");
//! let chunk_save: Event<World, usize> = Event::new("chunk-save");
//!
//! // Every world save also saves its chunks.
//! save.register_dependent(&chunk_save, |_, _| EventArgs::new(16)).unwrap();
//!
//! save.listen(PriorityBand::Normal, |_: &World, args: &EventArgs<World, String>| {
//!     println!("saving {}", args.read(|name| name.clone())?);
//!     Ok::<(), ListenerError>(())
//! })
//! .unwrap();
//!
//! let args = EventArgs::new("overworld".to_string());
//! save.raise(&World, &args).unwrap();
//! save.raise_post_event(&World, &args).unwrap();
//! ```

pub mod args;
pub mod config;
pub mod error;
pub mod event;
pub mod listener;
pub mod queue;
pub mod registry;

pub use args::{ArgsRef, EventArgs};
pub use config::{CyclePolicy, DispatchConfig};
pub use error::{DispatchError, ListenerError, Result};
pub use event::{Event, Participant};
pub use listener::{Listener, ListenerRef};
pub use registry::{Lifetime, Registration};

pub use herald_models::{ArgsId, ArgsStatus, EventId, Priority, PriorityBand};
