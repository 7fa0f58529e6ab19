//! Events and the dispatcher.
//!
//! An [`Event`] owns a listener table and a dependent-event table. Raising
//! it expands the dependency graph, runs every listener below
//! [`Priority::POST`] in priority order, and parks the rest until
//! [`Event::raise_post_event`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use herald_models::{ArgsStatus, EventId, Priority};
use tracing::{debug, warn};

use crate::args::{ArgsCore, ArgsRef, EventArgs};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, ListenerError, Result};
use crate::listener::{listener_key, ListenerRef, ListenerSlot};
use crate::queue::{self, BoundArgs, DependencySlot, DispatchQueue, Edge};
use crate::registry::{Lifetime, Partitioned, Registration, Target};

pub(crate) struct EventInner<S, P> {
    pub(crate) id: EventId,
    pub(crate) name: String,
    pub(crate) config: DispatchConfig,
    pub(crate) listeners: Partitioned<ListenerSlot<S, P>>,
    pub(crate) dependencies: Partitioned<DependencySlot<S, P>>,
}

/// A raisable event for senders of type `S` carrying payloads of type `P`.
///
/// `Event` is a cheap handle; clones share the same tables. Registration and
/// raising may happen concurrently from any thread.
pub struct Event<S, P> {
    inner: Arc<EventInner<S, P>>,
}

impl<S, P> Clone for Event<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// One args object joined to the event it will be raised for.
///
/// Built with [`Event::participant`] and passed to
/// [`Event::raise_alongside`] so events with different payload types can be
/// raised as one.
pub struct Participant<S> {
    bound: Arc<dyn BoundArgs<S>>,
    args: ArgsRef<S>,
}

impl<S> Clone for Participant<S> {
    fn clone(&self) -> Self {
        Self {
            bound: Arc::clone(&self.bound),
            args: self.args.clone(),
        }
    }
}

impl<S: 'static> Participant<S> {
    /// The participating args.
    pub fn args(&self) -> &ArgsRef<S> {
        &self.args
    }

    /// Name of the event the args will be raised for.
    pub fn event_name(&self) -> &str {
        self.bound.event_name()
    }

    fn core(&self) -> &Arc<ArgsCore<S>> {
        self.args.core()
    }
}

impl<S: 'static> fmt::Debug for Participant<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("event", &self.event_name())
            .field("args", self.args.id())
            .finish()
    }
}

impl<S, P> Event<S, P>
where
    S: 'static,
    P: Send + Sync + 'static,
{
    /// Creates an event using [`DispatchConfig::global`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, DispatchConfig::global().clone())
    }

    pub fn with_config(name: impl Into<String>, config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id: EventId::new(),
                name: name.into(),
                config,
                listeners: Partitioned::new("listeners"),
                dependencies: Partitioned::new("dependencies"),
            }),
        }
    }

    pub fn id(&self) -> &EventId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub(crate) fn inner(&self) -> &Arc<EventInner<S, P>> {
        &self.inner
    }

    // Listeners

    /// Registers a listener the event keeps alive until deregistered.
    ///
    /// Registering a listener that is already registered replaces its
    /// priority and returns [`Registration::Updated`].
    pub fn register(&self, listener: ListenerRef<S, P>, priority: impl Into<Priority>) -> Result<Registration> {
        self.register_with(&listener, priority, Lifetime::Durable)
    }

    /// Registers a listener that is dropped from the table once every other
    /// `Arc` to it is gone.
    pub fn register_ephemeral(
        &self,
        listener: &ListenerRef<S, P>,
        priority: impl Into<Priority>,
    ) -> Result<Registration> {
        self.register_with(listener, priority, Lifetime::Ephemeral)
    }

    pub fn register_with(
        &self,
        listener: &ListenerRef<S, P>,
        priority: impl Into<Priority>,
        lifetime: Lifetime,
    ) -> Result<Registration> {
        let priority = priority.into();
        let slot = ListenerSlot {
            key: listener_key(listener),
            listener: Target::new(listener, lifetime),
            priority,
        };
        let outcome = self.inner.listeners.insert(lifetime, slot)?;
        debug!(
            event = %self.inner.name,
            priority = %priority,
            ?lifetime,
            ?outcome,
            "registered listener"
        );
        Ok(outcome)
    }

    /// Registers several listeners; returns how many were newly added.
    pub fn register_all<I>(&self, listeners: I, lifetime: Lifetime) -> Result<usize>
    where
        I: IntoIterator<Item = (ListenerRef<S, P>, Priority)>,
    {
        let mut added = 0;
        for (listener, priority) in listeners {
            if self.register_with(&listener, priority, lifetime)? == Registration::Added {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Wraps `f` as a durable listener and returns its handle for later
    /// deregistration.
    pub fn listen<F>(&self, priority: impl Into<Priority>, f: F) -> Result<ListenerRef<S, P>>
    where
        F: Fn(&S, &EventArgs<S, P>) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        let listener: ListenerRef<S, P> = Arc::new(f);
        self.register(Arc::clone(&listener), priority)?;
        Ok(listener)
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn deregister(&self, listener: &ListenerRef<S, P>) -> Result<bool> {
        let removed = self.inner.listeners.remove(&listener_key(listener))?;
        if removed {
            debug!(event = %self.inner.name, "deregistered listener");
        }
        Ok(removed)
    }

    /// Removes several listeners; returns how many were registered.
    pub fn deregister_all<'a, I>(&self, listeners: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a ListenerRef<S, P>>,
    {
        let mut removed = 0;
        for listener in listeners {
            if self.deregister(listener)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn has_listener(&self, listener: &ListenerRef<S, P>) -> bool {
        self.inner.listeners.contains(&listener_key(listener))
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Live listeners with their priorities, durable ones first.
    pub fn listeners(&self) -> Result<Vec<(ListenerRef<S, P>, Priority)>> {
        Ok(self
            .inner
            .listeners
            .snapshot(false)?
            .into_iter()
            .filter_map(|slot| slot.listener.upgrade().map(|l| (l, slot.priority)))
            .collect())
    }

    // Dependent events

    /// Makes `dependent` fire whenever this event is raised.
    ///
    /// On every raise, `derive` builds the dependent's args from this
    /// event's args. The derived args become dependents of the raised args,
    /// sharing their cancellation and mutability.
    pub fn register_dependent<Q, F>(&self, dependent: &Event<S, Q>, derive: F) -> Result<Registration>
    where
        Q: Send + Sync + 'static,
        F: Fn(&S, &EventArgs<S, P>) -> EventArgs<S, Q> + Send + Sync + 'static,
    {
        self.register_dependent_with(dependent, derive, Lifetime::Durable)
    }

    /// Like [`register_dependent`](Self::register_dependent), but the link
    /// disappears once every handle to `dependent` is dropped.
    pub fn register_dependent_ephemeral<Q, F>(&self, dependent: &Event<S, Q>, derive: F) -> Result<Registration>
    where
        Q: Send + Sync + 'static,
        F: Fn(&S, &EventArgs<S, P>) -> EventArgs<S, Q> + Send + Sync + 'static,
    {
        self.register_dependent_with(dependent, derive, Lifetime::Ephemeral)
    }

    pub fn register_dependent_with<Q, F>(
        &self,
        dependent: &Event<S, Q>,
        derive: F,
        lifetime: Lifetime,
    ) -> Result<Registration>
    where
        Q: Send + Sync + 'static,
        F: Fn(&S, &EventArgs<S, P>) -> EventArgs<S, Q> + Send + Sync + 'static,
    {
        let edge = Edge::new(Target::new(&dependent.inner, lifetime), Box::new(derive));
        let slot = DependencySlot {
            key: dependent.id().clone(),
            link: Arc::new(edge),
        };
        let outcome = self.inner.dependencies.insert(lifetime, slot)?;
        debug!(
            event = %self.inner.name,
            dependent = %dependent.name(),
            ?lifetime,
            ?outcome,
            "registered dependent event"
        );
        Ok(outcome)
    }

    /// Removes a dependent event. Returns false if it was not registered.
    pub fn deregister_dependent<Q>(&self, dependent: &Event<S, Q>) -> Result<bool> {
        self.inner.dependencies.remove(&dependent.inner.id)
    }

    pub fn has_dependent<Q>(&self, dependent: &Event<S, Q>) -> bool {
        self.inner.dependencies.contains(&dependent.inner.id)
    }

    /// Number of live dependent events.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependencies.len()
    }

    /// Ids of live dependent events, durable ones first.
    pub fn dependent_events(&self) -> Result<Vec<EventId>> {
        Ok(self
            .inner
            .dependencies
            .snapshot(false)?
            .into_iter()
            .map(|slot| slot.key)
            .collect())
    }

    /// Drops stale ephemeral registrations from both tables.
    pub fn prune(&self) -> Result<usize> {
        let removed = self.inner.listeners.prune()? + self.inner.dependencies.prune()?;
        if removed > 0 {
            debug!(event = %self.inner.name, removed, "pruned stale registrations");
        }
        Ok(removed)
    }

    // Raising

    /// Joins `args` to this event for a simultaneous raise.
    pub fn participant(&self, args: &EventArgs<S, P>) -> Participant<S> {
        Participant {
            bound: queue::bind(&self.inner, args),
            args: args.handle(),
        }
    }

    /// Runs the pre-event phase for `args`.
    ///
    /// Every listener of this event and of every dependent event below
    /// [`Priority::POST`] runs in ascending priority order. Listeners at or
    /// above `POST` are held back for [`raise_post_event`](Self::raise_post_event).
    ///
    /// `args` ends in [`ArgsStatus::UsedPreEvent`] even when a listener fails.
    pub fn raise(&self, sender: &S, args: &EventArgs<S, P>) -> Result<()> {
        self.raise_alongside(sender, args, &[], false)
    }

    /// Runs the listeners held back by [`raise`](Self::raise).
    pub fn raise_post_event(&self, sender: &S, args: &EventArgs<S, P>) -> Result<()> {
        self.raise_post_event_alongside(sender, args, &[], false)
    }

    /// Raises this event together with `others` as one merged queue.
    ///
    /// With `share_cancellation`, cancellation set by any listener is visible
    /// to every listener after it, whichever event it belongs to, and all
    /// participating args end with the same cancellation state.
    pub fn raise_alongside(
        &self,
        sender: &S,
        args: &EventArgs<S, P>,
        others: &[Participant<S>],
        share_cancellation: bool,
    ) -> Result<()> {
        let group = self.group(args, others);
        debug!(
            event = %self.inner.name,
            args = %args.id(),
            participants = group.len(),
            share_cancellation,
            "raising pre-event"
        );
        run_pre_event(sender, &group, share_cancellation)
    }

    /// Post-event counterpart of [`raise_alongside`](Self::raise_alongside).
    pub fn raise_post_event_alongside(
        &self,
        sender: &S,
        args: &EventArgs<S, P>,
        others: &[Participant<S>],
        share_cancellation: bool,
    ) -> Result<()> {
        let group = self.group(args, others);
        debug!(
            event = %self.inner.name,
            args = %args.id(),
            participants = group.len(),
            share_cancellation,
            "raising post-event"
        );
        run_post_event(sender, &group, share_cancellation)
    }

    fn group(&self, args: &EventArgs<S, P>, others: &[Participant<S>]) -> Vec<Participant<S>> {
        let mut group = Vec::with_capacity(others.len() + 1);
        group.push(self.participant(args));
        group.extend(others.iter().cloned());
        group
    }
}

impl<S, P> fmt::Debug for Event<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Pre,
    Post,
}

impl Phase {
    fn starting(self) -> ArgsStatus {
        match self {
            Phase::Pre => ArgsStatus::UsingPreEvent,
            Phase::Post => ArgsStatus::UsingPostEvent,
        }
    }

    fn start<S: 'static>(self, core: &Arc<ArgsCore<S>>) -> Result<()> {
        match self {
            Phase::Pre => core.mark_using_pre_event(),
            Phase::Post => core.mark_using_post_event(),
        }
    }

    fn finish<S: 'static>(self, core: &Arc<ArgsCore<S>>) -> Result<()> {
        match self {
            Phase::Pre => core.mark_used_pre_event(),
            Phase::Post => core.mark_used_post_event(),
        }
    }
}

/// Marks every participant as finished with a phase, on success or failure.
struct PhaseGuard<S: 'static> {
    phase: Phase,
    cores: Vec<Arc<ArgsCore<S>>>,
}

impl<S: 'static> PhaseGuard<S> {
    /// Validates the whole group before touching any status.
    fn begin(phase: Phase, group: &[Participant<S>]) -> Result<Self> {
        let mut seen = HashSet::new();
        for participant in group {
            let core = participant.core();
            if !seen.insert(core.id().clone()) {
                return Err(DispatchError::InvalidArgument(format!(
                    "args {} appears more than once in one raise",
                    core.id()
                )));
            }
            if !core.is_master() {
                return Err(DispatchError::InvalidArgument(format!(
                    "args {} were derived for a dependent event and cannot be raised directly",
                    core.id()
                )));
            }
            core.check(phase.starting())?;
        }

        let mut guard = Self {
            phase,
            cores: Vec::with_capacity(group.len()),
        };
        for participant in group {
            phase.start(participant.core())?;
            guard.cores.push(Arc::clone(participant.core()));
        }
        Ok(guard)
    }

    fn finish(mut self) -> Result<()> {
        let cores = std::mem::take(&mut self.cores);
        complete(self.phase, &cores)
    }
}

impl<S: 'static> Drop for PhaseGuard<S> {
    fn drop(&mut self) {
        if self.cores.is_empty() {
            return;
        }
        if let Err(e) = complete(self.phase, &self.cores) {
            warn!(phase = ?self.phase, error = %e, "failed to mark args after an aborted raise");
        }
    }
}

fn complete<S: 'static>(phase: Phase, cores: &[Arc<ArgsCore<S>>]) -> Result<()> {
    let mut first_error = None;
    for core in cores {
        if let Err(e) = phase.finish(core) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn apply_shared_cancellation<S: 'static>(group: &[Participant<S>], carried: Option<bool>) -> Result<()> {
    if let Some(cancelled) = carried {
        for participant in group {
            participant.core().force_cancelled(cancelled)?;
        }
    }
    Ok(())
}

fn run_pre_event<S: 'static>(sender: &S, group: &[Participant<S>], share_cancellation: bool) -> Result<()> {
    let guard = PhaseGuard::begin(Phase::Pre, group)?;

    if group.len() > 1 {
        let cores: Vec<Arc<ArgsCore<S>>> = group.iter().map(|p| Arc::clone(p.core())).collect();
        ArgsCore::link_related(&cores)?;
    }

    // Post queues are only stored once every participant expanded cleanly.
    let split = group
        .iter()
        .map(|participant| Ok(queue::build_queue(participant.bound.as_ref(), sender)?.split_post()))
        .collect::<Result<Vec<_>>>()?;

    let mut queues = Vec::with_capacity(split.len());
    for (participant, (pre, post)) in group.iter().zip(split) {
        participant.core().store_pending(post)?;
        queues.push(pre);
    }

    let queue = DispatchQueue::combine(queues);
    debug!(listeners = queue.len(), "draining pre-event queue");
    let carried = queue.drain(sender, share_cancellation)?;
    apply_shared_cancellation(group, carried)?;

    guard.finish()
}

fn run_post_event<S: 'static>(sender: &S, group: &[Participant<S>], share_cancellation: bool) -> Result<()> {
    let guard = PhaseGuard::begin(Phase::Post, group)?;

    let queues = group
        .iter()
        .map(|p| p.core().take_pending())
        .collect::<Result<Vec<_>>>()?;

    let queue = DispatchQueue::combine(queues);
    debug!(listeners = queue.len(), "draining post-event queue");
    let carried = queue.drain(sender, share_cancellation)?;
    apply_shared_cancellation(group, carried)?;

    guard.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_models::PriorityBand;

    fn noop() -> ListenerRef<(), u8> {
        Arc::new(|_: &(), _: &EventArgs<(), u8>| -> std::result::Result<(), ListenerError> { Ok(()) })
    }

    #[test]
    fn test_register_then_update() {
        let event: Event<(), u8> = Event::new("register");
        let listener = noop();

        assert_eq!(
            event.register(Arc::clone(&listener), PriorityBand::Low).unwrap(),
            Registration::Added
        );
        assert_eq!(
            event.register(Arc::clone(&listener), PriorityBand::High).unwrap(),
            Registration::Updated
        );

        assert_eq!(event.listener_count(), 1);
        let listeners = event.listeners().unwrap();
        assert_eq!(listeners[0].1, Priority::from(PriorityBand::High));
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let event: Event<(), u8> = Event::new("deregister");
        let listener = noop();
        event.register(Arc::clone(&listener), 0_i64).unwrap();

        assert!(event.has_listener(&listener));
        assert!(event.deregister(&listener).unwrap());
        assert!(!event.deregister(&listener).unwrap());
        assert!(!event.has_listener(&listener));
    }

    #[test]
    fn test_register_all_counts_new_entries() {
        let event: Event<(), u8> = Event::new("batch");
        let a = noop();
        let b = noop();
        event.register(Arc::clone(&a), 0_i64).unwrap();

        let added = event
            .register_all(
                vec![(Arc::clone(&a), Priority::new(1)), (Arc::clone(&b), Priority::new(2))],
                Lifetime::Durable,
            )
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(event.listener_count(), 2);

        assert_eq!(event.deregister_all([&a, &b]).unwrap(), 2);
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn test_ephemeral_listener_vanishes_with_owner() {
        let event: Event<(), u8> = Event::new("ephemeral");
        let listener = noop();
        event.register_ephemeral(&listener, 0_i64).unwrap();
        assert_eq!(event.listener_count(), 1);

        drop(listener);
        assert_eq!(event.listener_count(), 0);
        assert_eq!(event.prune().unwrap(), 1);
    }

    #[test]
    fn test_reregistering_moves_between_lifetimes() {
        let event: Event<(), u8> = Event::new("move");
        let listener = noop();
        event.register_ephemeral(&listener, 0_i64).unwrap();
        assert_eq!(
            event.register(Arc::clone(&listener), 0_i64).unwrap(),
            Registration::Updated
        );

        let weak = Arc::downgrade(&listener);
        drop(listener);
        assert!(weak.upgrade().is_some());
        assert_eq!(event.listener_count(), 1);
    }

    #[test]
    fn test_dependent_registration() {
        let parent: Event<(), u8> = Event::new("parent");
        let child: Event<(), String> = Event::new("child");

        parent
            .register_dependent(&child, |_, _| EventArgs::new(String::new()))
            .unwrap();
        assert!(parent.has_dependent(&child));
        assert_eq!(parent.dependent_count(), 1);
        assert_eq!(parent.dependent_events().unwrap(), vec![child.id().clone()]);

        assert!(parent.deregister_dependent(&child).unwrap());
        assert!(!parent.deregister_dependent(&child).unwrap());
        assert_eq!(parent.dependent_count(), 0);
    }

    #[test]
    fn test_ephemeral_dependent_vanishes_with_event() {
        let parent: Event<(), u8> = Event::new("parent");
        let child: Event<(), u8> = Event::new("child");
        parent
            .register_dependent_ephemeral(&child, |_, _| EventArgs::new(0))
            .unwrap();

        drop(child);
        assert_eq!(parent.dependent_count(), 0);
    }

    #[test]
    fn test_failed_validation_leaves_status_untouched() {
        let event: Event<(), u8> = Event::new("validate");
        let args = EventArgs::new(0);
        let duplicate = event.participant(&args);

        let result = event.raise_alongside(&(), &args, &[duplicate], false);
        assert!(matches!(result, Err(DispatchError::InvalidArgument(_))));
        assert_eq!(args.status(), ArgsStatus::Unused);
    }

    #[test]
    fn test_participant_reports_event() {
        let event: Event<(), u8> = Event::new("named");
        let args = EventArgs::new(0);
        let participant = event.participant(&args);

        assert_eq!(participant.event_name(), "named");
        assert_eq!(participant.args().id(), args.id());
    }
}
