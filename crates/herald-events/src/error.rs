//! Error types for dispatch operations.

use herald_models::{ArgsId, ArgsStatus, EventId};
use thiserror::Error;

/// Errors that can occur while registering with or raising an event.
///
/// Lifecycle and mutability errors indicate a bug in the calling code and
/// are never retried by the dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The args object was already raised through this phase.
    #[error("args {args} already used (status {status:?})")]
    MultipleUse { args: ArgsId, status: ArgsStatus },

    /// A phase was finished before it was started.
    #[error("args {args} has not started its {phase} phase")]
    NotStarted { args: ArgsId, phase: &'static str },

    /// The post-event phase was requested before the pre-event phase finished.
    #[error("post-event phase requested for args {args} before the pre-event phase finished (status {status:?})")]
    UsedPostBeforePre { args: ArgsId, status: ArgsStatus },

    /// Cancellation or payload was written after the args became immutable.
    #[error("args {0} is immutable")]
    ImmutableArgs(ArgsId),

    /// A required argument was missing or unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The dependent-event graph loops back on itself.
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// A listener returned an error; remaining listeners in that drain were skipped.
    #[error("listener on event {event} failed: {source}")]
    Listener {
        event: EventId,
        #[source]
        source: ListenerError,
    },

    /// Lock poisoned (thread panicked while holding lock).
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Dispatch configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    /// True for errors caused by misusing the raise lifecycle.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            DispatchError::MultipleUse { .. }
                | DispatchError::NotStarted { .. }
                | DispatchError::UsedPostBeforePre { .. }
        )
    }
}

/// Error returned by a listener.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Listener-defined failure.
    #[error("{0}")]
    Failed(String),

    /// An args or event operation inside the listener failed.
    #[error(transparent)]
    Dispatch(Box<DispatchError>),

    /// Any other error raised by listener code.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ListenerError {
    /// Creates a listener-defined failure.
    pub fn failed(message: impl Into<String>) -> Self {
        ListenerError::Failed(message.into())
    }
}

impl From<DispatchError> for ListenerError {
    fn from(err: DispatchError) -> Self {
        ListenerError::Dispatch(Box::new(err))
    }
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
