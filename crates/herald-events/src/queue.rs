//! Dispatch queue construction.
//!
//! Raising an event walks its dependent-event graph, derives one args object
//! per reachable event, and flattens every listener of every reached event
//! into a single queue sorted by priority. Queues of events raised together
//! are merged with a k-way merge over a `BinaryHeap`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};

use herald_models::{EventId, Priority};
use tracing::{trace, warn};

use crate::args::{ArgsCore, EventArgs};
use crate::config::{CyclePolicy, DispatchConfig};
use crate::error::{DispatchError, ListenerError, Result};
use crate::event::EventInner;
use crate::registry::{Slot, Target};

type Invoke<S> = Arc<dyn Fn(&S) -> std::result::Result<(), ListenerError> + Send + Sync>;

/// One pending listener invocation: (listener, priority, args).
pub(crate) struct QueueEntry<S> {
    priority: Priority,
    event: EventId,
    args: Weak<ArgsCore<S>>,
    invoke: Invoke<S>,
}

impl<S: 'static> QueueEntry<S> {
    fn new<P: Send + Sync + 'static>(
        event: EventId,
        listener: Arc<dyn crate::listener::Listener<S, P>>,
        priority: Priority,
        args: &EventArgs<S, P>,
    ) -> Self {
        let weak = args.downgrade();
        let invoke: Invoke<S> = Arc::new(move |sender: &S| match weak.upgrade() {
            Some(args) => listener.on_event(sender, &args),
            None => Ok(()),
        });
        Self {
            priority,
            event,
            args: Arc::downgrade(args.core()),
            invoke,
        }
    }

    #[cfg(test)]
    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    #[cfg(test)]
    pub(crate) fn event(&self) -> &EventId {
        &self.event
    }
}

/// Priority-sorted sequence of queue entries.
pub(crate) struct DispatchQueue<S> {
    entries: Vec<QueueEntry<S>>,
}

impl<S> Default for DispatchQueue<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

/// Head of one source queue during a merge.
///
/// Ordered so that `BinaryHeap` (a max-heap) pops the lowest priority first,
/// and the earlier source first among equal priorities.
#[derive(PartialEq, Eq)]
struct MergeHead {
    priority: Priority,
    source: usize,
}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl<S: 'static> DispatchQueue<S> {
    /// Sorts `entries` ascending by priority. The sort is stable, so equal
    /// priorities keep their collection order.
    pub(crate) fn from_entries(mut entries: Vec<QueueEntry<S>>) -> Self {
        entries.sort_by_key(|e| e.priority);
        Self { entries }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[QueueEntry<S>] {
        &self.entries
    }

    /// Splits into (below Post, at or above Post).
    pub(crate) fn split_post(mut self) -> (Self, Self) {
        let index = self.entries.partition_point(|e| !e.priority.is_post());
        let post = self.entries.split_off(index);
        (self, Self { entries: post })
    }

    /// Merges already-sorted queues into one sorted queue.
    pub(crate) fn combine(queues: Vec<DispatchQueue<S>>) -> Self {
        let total = queues.iter().map(|q| q.len()).sum();
        let mut sources: Vec<std::vec::IntoIter<QueueEntry<S>>> =
            queues.into_iter().map(|q| q.entries.into_iter()).collect();
        let mut heads: Vec<Option<QueueEntry<S>>> = sources.iter_mut().map(|s| s.next()).collect();

        let mut heap = BinaryHeap::new();
        for (source, head) in heads.iter().enumerate() {
            if let Some(entry) = head {
                heap.push(MergeHead {
                    priority: entry.priority,
                    source,
                });
            }
        }

        let mut merged = Vec::with_capacity(total);
        while let Some(MergeHead { source, .. }) = heap.pop() {
            if let Some(entry) = heads[source].take() {
                merged.push(entry);
            }
            if let Some(next) = sources[source].next() {
                heap.push(MergeHead {
                    priority: next.priority,
                    source,
                });
                heads[source] = Some(next);
            }
        }

        Self { entries: merged }
    }

    /// Invokes every entry in order.
    ///
    /// Args at or above Monitor are made immutable before their listener runs.
    /// With `share_cancellation`, each listener sees the cancellation state the
    /// previous listener left behind, whichever event that listener belonged
    /// to; the final state is returned. The first listener error stops the
    /// drain.
    pub(crate) fn drain(self, sender: &S, share_cancellation: bool) -> Result<Option<bool>> {
        let mut carried = None;

        for entry in self.entries {
            let Some(args) = entry.args.upgrade() else {
                continue;
            };

            if entry.priority.is_monitor() {
                args.make_immutable()?;
            }
            if let (true, Some(cancelled)) = (share_cancellation, carried) {
                args.force_cancelled(cancelled)?;
            }

            trace!(
                event = %entry.event,
                priority = %entry.priority,
                args = %args.id(),
                "invoking listener"
            );

            if let Err(source) = (entry.invoke)(sender) {
                warn!(
                    event = %entry.event,
                    priority = %entry.priority,
                    error = %source,
                    "listener failed, skipping the rest of this drain"
                );
                return Err(DispatchError::Listener {
                    event: entry.event,
                    source,
                });
            }

            if share_cancellation {
                carried = Some(args.is_cancelled());
            }
        }

        Ok(carried)
    }
}

/// Derives a dependent event's args from its parent's.
pub(crate) type DeriveFn<S, P, Q> = dyn Fn(&S, &EventArgs<S, P>) -> EventArgs<S, Q> + Send + Sync;

/// Type-erased edge from an event with payload `P` to one dependent event.
pub(crate) trait DependentLink<S, P>: Send + Sync {
    fn is_live(&self) -> bool;

    /// Derives and attaches the child args, then expands the dependent event.
    fn expand(
        &self,
        sender: &S,
        parent: &EventArgs<S, P>,
        expansion: &mut Expansion<'_, S>,
    ) -> Result<()>;
}

/// Dependent event with payload `Q`, plus its derivation function.
pub(crate) struct Edge<S, P, Q> {
    target: Target<EventInner<S, Q>>,
    derive: Box<DeriveFn<S, P, Q>>,
}

impl<S, P, Q> Edge<S, P, Q> {
    pub(crate) fn new(target: Target<EventInner<S, Q>>, derive: Box<DeriveFn<S, P, Q>>) -> Self {
        Self { target, derive }
    }
}

impl<S, P, Q> DependentLink<S, P> for Edge<S, P, Q>
where
    S: 'static,
    P: Send + Sync + 'static,
    Q: Send + Sync + 'static,
{
    fn is_live(&self) -> bool {
        self.target.is_live()
    }

    fn expand(
        &self,
        sender: &S,
        parent: &EventArgs<S, P>,
        expansion: &mut Expansion<'_, S>,
    ) -> Result<()> {
        let Some(event) = self.target.upgrade() else {
            return Ok(());
        };
        let child = (self.derive)(sender, parent);
        parent.add_dependent(&child)?;
        expansion.visit(&event, &child)
    }
}

/// Registration-table entry for a dependent event.
pub(crate) struct DependencySlot<S, P> {
    pub(crate) key: EventId,
    pub(crate) link: Arc<dyn DependentLink<S, P>>,
}

impl<S, P> Clone for DependencySlot<S, P> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            link: Arc::clone(&self.link),
        }
    }
}

impl<S, P> Slot for DependencySlot<S, P> {
    type Key = EventId;

    fn key(&self) -> &EventId {
        &self.key
    }

    fn is_live(&self) -> bool {
        self.link.is_live()
    }
}

/// An args object paired with the event it is (or will be) raised for.
pub(crate) trait BoundArgs<S>: Send + Sync {
    fn event_name(&self) -> &str;

    fn config(&self) -> &DispatchConfig;

    /// One queue entry per live listener of the bound event.
    fn queue_entries(&self, prune: bool) -> Result<Vec<QueueEntry<S>>>;

    /// These args plus every args derived through the dependency graph.
    fn expand(&self, sender: &S) -> Result<Vec<Arc<dyn BoundArgs<S>>>>;
}

struct Bound<S, P> {
    event: Arc<EventInner<S, P>>,
    args: EventArgs<S, P>,
}

impl<S, P> BoundArgs<S> for Bound<S, P>
where
    S: 'static,
    P: Send + Sync + 'static,
{
    fn event_name(&self) -> &str {
        &self.event.name
    }

    fn config(&self) -> &DispatchConfig {
        &self.event.config
    }

    fn queue_entries(&self, prune: bool) -> Result<Vec<QueueEntry<S>>> {
        Ok(self
            .event
            .listeners
            .snapshot(prune)?
            .into_iter()
            .filter_map(|slot| {
                slot.listener.upgrade().map(|listener| {
                    QueueEntry::new(self.event.id.clone(), listener, slot.priority, &self.args)
                })
            })
            .collect())
    }

    fn expand(&self, sender: &S) -> Result<Vec<Arc<dyn BoundArgs<S>>>> {
        let mut expansion = Expansion::new(sender, &self.event.config);
        expansion.visit(&self.event, &self.args)?;
        Ok(expansion.sources)
    }
}

pub(crate) fn bind<S, P>(event: &Arc<EventInner<S, P>>, args: &EventArgs<S, P>) -> Arc<dyn BoundArgs<S>>
where
    S: 'static,
    P: Send + Sync + 'static,
{
    Arc::new(Bound {
        event: Arc::clone(event),
        args: args.clone(),
    })
}

/// State of one depth-first walk over a dependency graph.
pub(crate) struct Expansion<'a, S> {
    sender: &'a S,
    config: &'a DispatchConfig,
    path: Vec<(EventId, String)>,
    sources: Vec<Arc<dyn BoundArgs<S>>>,
}

impl<'a, S: 'static> Expansion<'a, S> {
    fn new(sender: &'a S, config: &'a DispatchConfig) -> Self {
        Self {
            sender,
            config,
            path: Vec::new(),
            sources: Vec::new(),
        }
    }

    fn describe_path(&self, last: &str) -> String {
        let mut names: Vec<&str> = self.path.iter().map(|(_, name)| name.as_str()).collect();
        names.push(last);
        names.join(" -> ")
    }

    /// Records `args` as owned by `event`, then recurses into its dependents.
    pub(crate) fn visit<P>(&mut self, event: &Arc<EventInner<S, P>>, args: &EventArgs<S, P>) -> Result<()>
    where
        P: Send + Sync + 'static,
    {
        match self.config.cycle_policy {
            CyclePolicy::Detect => {
                if self.path.iter().any(|(id, _)| *id == event.id) {
                    let chain = self.describe_path(&event.name);
                    warn!(cycle = %chain, "dependency cycle detected");
                    return Err(DispatchError::DependencyCycle(chain));
                }
            }
            CyclePolicy::Unchecked => {
                if self.path.len() >= self.config.max_depth {
                    let chain = self.describe_path(&event.name);
                    warn!(depth = self.path.len(), "dependency expansion exceeded max depth");
                    return Err(DispatchError::DependencyCycle(format!(
                        "exceeded max depth {}: {}",
                        self.config.max_depth, chain
                    )));
                }
            }
        }

        args.core().set_owning_event(event.id.clone())?;
        self.sources.push(bind(event, args));

        let links = event.dependencies.snapshot(self.config.prune_on_dispatch)?;
        if links.is_empty() {
            return Ok(());
        }

        let sender = self.sender;
        self.path.push((event.id.clone(), event.name.clone()));
        for slot in &links {
            slot.link.expand(sender, args, self)?;
        }
        self.path.pop();
        Ok(())
    }
}

/// Every args object reachable from `root`, each bound to its owning event.
pub(crate) fn expand<S: 'static>(root: &dyn BoundArgs<S>, sender: &S) -> Result<Vec<Arc<dyn BoundArgs<S>>>> {
    root.expand(sender)
}

/// The sorted queue of every listener of every event reachable from `root`.
pub(crate) fn build_queue<S: 'static>(root: &dyn BoundArgs<S>, sender: &S) -> Result<DispatchQueue<S>> {
    let prune = root.config().prune_on_dispatch;
    let mut entries = Vec::new();
    for source in expand(root, sender)? {
        entries.extend(source.queue_entries(prune)?);
    }
    Ok(DispatchQueue::from_entries(entries))
}
