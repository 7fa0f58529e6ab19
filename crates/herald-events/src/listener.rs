//! Listener trait.

use std::sync::Arc;

use herald_models::Priority;

use crate::args::EventArgs;
use crate::error::ListenerError;
use crate::registry::{Slot, Target};

/// Something that reacts to an event raised by a sender of type `S` with a
/// payload of type `P`.
///
/// Any `Fn(&S, &EventArgs<S, P>) -> Result<(), ListenerError>` closure is a
/// listener. A listener's identity is its `Arc` allocation: registering the
/// same `Arc` twice updates the existing registration instead of adding a
/// second one.
pub trait Listener<S, P>: Send + Sync {
    /// Called once per raise, in priority order.
    fn on_event(&self, sender: &S, args: &EventArgs<S, P>) -> Result<(), ListenerError>;
}

impl<S, P, F> Listener<S, P> for F
where
    F: Fn(&S, &EventArgs<S, P>) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, sender: &S, args: &EventArgs<S, P>) -> Result<(), ListenerError> {
        self(sender, args)
    }
}

/// Shared listener handle, as stored by an [`Event`](crate::Event).
pub type ListenerRef<S, P> = Arc<dyn Listener<S, P>>;

/// Identity of a listener allocation.
pub(crate) fn listener_key<S, P>(listener: &ListenerRef<S, P>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Registration-table entry for a listener.
pub(crate) struct ListenerSlot<S, P> {
    pub(crate) key: usize,
    pub(crate) listener: Target<dyn Listener<S, P>>,
    pub(crate) priority: Priority,
}

impl<S, P> Clone for ListenerSlot<S, P> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            listener: self.listener.clone(),
            priority: self.priority,
        }
    }
}

impl<S, P> Slot for ListenerSlot<S, P> {
    type Key = usize;

    fn key(&self) -> &usize {
        &self.key
    }

    fn is_live(&self) -> bool {
        self.listener.is_live()
    }
}
