//! EventArgs - the payload threaded through one raise cycle.
//!
//! An args object carries three things:
//! - the caller's payload, behind an `RwLock` so listeners can edit it
//! - a lifecycle status that only ever moves forward
//! - cancellation and mutability flags
//!
//! Args generated for dependent events are attached to a parent. Attaching
//! copies the master's flag cell into the child, so cancellation and
//! mutability reads on any descendant go straight to the master without
//! walking the parent chain.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};

use herald_models::{ArgsId, ArgsStatus, EventId};

use crate::error::{DispatchError, Result};
use crate::queue::DispatchQueue;

#[derive(Debug)]
struct Flags {
    cancelled: bool,
    mutable: bool,
}

type SharedFlags = Arc<Mutex<Flags>>;

/// Link from a dependent args object to its parent and master.
struct Attachment<S> {
    parent: Weak<ArgsCore<S>>,
    master: Weak<ArgsCore<S>>,
    flags: SharedFlags,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| DispatchError::LockPoisoned(format!("{}: {}", what, e)))
}

/// Payload-independent part of an args object.
///
/// Everything the dispatcher needs to drive the lifecycle lives here, so
/// args of different payload types can share one dependency graph and one
/// dispatch queue.
pub(crate) struct ArgsCore<S> {
    id: ArgsId,
    status: Mutex<ArgsStatus>,
    flags: SharedFlags,
    attachment: OnceLock<Attachment<S>>,
    owning_event: Mutex<Option<EventId>>,
    dependents: Mutex<Vec<Arc<ArgsCore<S>>>>,
    related: Mutex<Vec<Weak<ArgsCore<S>>>>,
    pending: Mutex<Option<DispatchQueue<S>>>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl<S: 'static> ArgsCore<S> {
    fn new(payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            id: ArgsId::new(),
            status: Mutex::new(ArgsStatus::Unused),
            flags: Arc::new(Mutex::new(Flags {
                cancelled: false,
                mutable: true,
            })),
            attachment: OnceLock::new(),
            owning_event: Mutex::new(None),
            dependents: Mutex::new(Vec::new()),
            related: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            payload,
        }
    }

    pub(crate) fn id(&self) -> &ArgsId {
        &self.id
    }

    pub(crate) fn status(&self) -> ArgsStatus {
        self.status.lock().map(|s| *s).unwrap_or_default()
    }

    /// Checks that `target` is the legal next status from `current`.
    fn check_transition(&self, current: ArgsStatus, target: ArgsStatus) -> Result<()> {
        use ArgsStatus::*;

        let args = self.id.clone();
        let err = match (target, current) {
            (UsingPreEvent, Unused)
            | (UsedPreEvent, UsingPreEvent)
            | (UsingPostEvent, UsedPreEvent)
            | (UsedPostEvent, UsingPostEvent) => return Ok(()),
            (UsingPreEvent, _)
            | (UsedPreEvent, UsedPreEvent | UsingPostEvent | UsedPostEvent)
            | (UsedPostEvent, UsedPostEvent) => DispatchError::MultipleUse {
                args,
                status: current,
            },
            (UsedPreEvent, Unused) => DispatchError::NotStarted {
                args,
                phase: "pre-event",
            },
            (UsedPostEvent, UsedPreEvent) => DispatchError::NotStarted {
                args,
                phase: "post-event",
            },
            (UsingPostEvent, _) | (UsedPostEvent, Unused | UsingPreEvent) => {
                DispatchError::UsedPostBeforePre {
                    args,
                    status: current,
                }
            }
            (Unused, _) => DispatchError::InvalidArgument(format!(
                "args {} cannot move from {:?} back to Unused",
                args, current
            )),
        };
        Err(err)
    }

    /// Validates a transition without performing it.
    pub(crate) fn check(&self, target: ArgsStatus) -> Result<()> {
        let current = *lock(&self.status, "args status")?;
        self.check_transition(current, target)
    }

    fn transition(&self, target: ArgsStatus) -> Result<()> {
        let mut status = lock(&self.status, "args status")?;
        self.check_transition(*status, target)?;
        *status = target;
        Ok(())
    }

    pub(crate) fn mark_using_pre_event(&self) -> Result<()> {
        self.transition(ArgsStatus::UsingPreEvent)
    }

    pub(crate) fn mark_used_pre_event(&self) -> Result<()> {
        self.transition(ArgsStatus::UsedPreEvent)
    }

    pub(crate) fn mark_using_post_event(&self) -> Result<()> {
        self.transition(ArgsStatus::UsingPostEvent)
    }

    pub(crate) fn mark_used_post_event(&self) -> Result<()> {
        self.transition(ArgsStatus::UsedPostEvent)
    }

    fn master_flags(&self) -> &SharedFlags {
        match self.attachment.get() {
            Some(attachment) => &attachment.flags,
            None => &self.flags,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.master_flags()
            .lock()
            .map(|f| f.cancelled)
            .unwrap_or(false)
    }

    pub(crate) fn set_cancelled(&self, cancelled: bool) -> Result<()> {
        let mut flags = lock(self.master_flags().as_ref(), "args flags")?;
        if !flags.mutable {
            return Err(DispatchError::ImmutableArgs(self.id.clone()));
        }
        flags.cancelled = cancelled;
        Ok(())
    }

    /// Overwrites cancellation regardless of mutability (shared-cancellation threading).
    pub(crate) fn force_cancelled(&self, cancelled: bool) -> Result<()> {
        lock(self.master_flags().as_ref(), "args flags")?.cancelled = cancelled;
        Ok(())
    }

    pub(crate) fn is_mutable(&self) -> bool {
        self.master_flags()
            .lock()
            .map(|f| f.mutable)
            .unwrap_or(false)
    }

    pub(crate) fn make_immutable(&self) -> Result<()> {
        lock(self.master_flags().as_ref(), "args flags")?.mutable = false;
        Ok(())
    }

    pub(crate) fn owning_event(&self) -> Option<EventId> {
        self.owning_event.lock().ok().and_then(|e| e.clone())
    }

    pub(crate) fn set_owning_event(&self, event: EventId) -> Result<()> {
        *lock(&self.owning_event, "args owning event")? = Some(event);
        Ok(())
    }

    pub(crate) fn is_master(&self) -> bool {
        self.attachment.get().is_none()
    }

    pub(crate) fn parent(&self) -> Option<Arc<ArgsCore<S>>> {
        self.attachment.get().and_then(|a| a.parent.upgrade())
    }

    pub(crate) fn master(self: &Arc<Self>) -> Arc<ArgsCore<S>> {
        self.attachment
            .get()
            .and_then(|a| a.master.upgrade())
            .unwrap_or_else(|| Arc::clone(self))
    }

    /// Makes `child` a dependent of this args object.
    ///
    /// The child must be unused, parentless, and without dependents of its own.
    pub(crate) fn attach(self: &Arc<Self>, child: &Arc<ArgsCore<S>>) -> Result<()> {
        if Arc::ptr_eq(self, child) {
            return Err(DispatchError::InvalidArgument(format!(
                "args {} cannot depend on itself",
                self.id
            )));
        }
        if child.status() != ArgsStatus::Unused {
            return Err(DispatchError::InvalidArgument(format!(
                "derived args {} was already raised",
                child.id
            )));
        }
        if !child.direct_dependents().is_empty() {
            return Err(DispatchError::InvalidArgument(format!(
                "derived args {} already has dependents",
                child.id
            )));
        }

        let master = match self.attachment.get() {
            Some(attachment) => attachment.master.clone(),
            None => Arc::downgrade(self),
        };
        let attachment = Attachment {
            parent: Arc::downgrade(self),
            master,
            flags: Arc::clone(self.master_flags()),
        };
        child.attachment.set(attachment).map_err(|_| {
            DispatchError::InvalidArgument(format!("args {} already has a parent", child.id))
        })?;

        lock(&self.dependents, "args dependents")?.push(Arc::clone(child));
        Ok(())
    }

    fn direct_dependents(&self) -> Vec<Arc<ArgsCore<S>>> {
        self.dependents
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Dependents in depth-first pre-order.
    ///
    /// Each args object appears once, so traversal terminates on any graph shape.
    pub(crate) fn dependents(
        self: &Arc<Self>,
        include_self: bool,
        cascading: bool,
    ) -> Vec<Arc<ArgsCore<S>>> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(self.id.clone());

        if include_self {
            result.push(Arc::clone(self));
        }

        let mut stack = self.direct_dependents();
        stack.reverse();

        while let Some(next) = stack.pop() {
            if !seen.insert(next.id.clone()) {
                continue;
            }
            if cascading {
                let mut children = next.direct_dependents();
                children.reverse();
                stack.extend(children);
            }
            result.push(next);
        }

        result
    }

    /// Records every member of `group` as a related master of the others.
    pub(crate) fn link_related(group: &[Arc<ArgsCore<S>>]) -> Result<()> {
        let weak: Vec<Weak<ArgsCore<S>>> = group.iter().map(Arc::downgrade).collect();
        for core in group {
            let mut related = lock(&core.related, "related args")?;
            related.clear();
            related.extend(
                weak.iter()
                    .filter(|w| Weak::as_ptr(w) != Arc::as_ptr(core))
                    .cloned(),
            );
        }
        Ok(())
    }

    /// Every args object in this args' simultaneous-raise group.
    pub(crate) fn related_args(self: &Arc<Self>) -> Vec<Arc<ArgsCore<S>>> {
        let master = self.master();
        let mut masters = vec![Arc::clone(&master)];
        if let Ok(related) = master.related.lock() {
            masters.extend(related.iter().filter_map(Weak::upgrade));
        }

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for m in masters {
            for args in m.dependents(true, true) {
                if seen.insert(args.id.clone()) {
                    result.push(args);
                }
            }
        }
        result
    }

    /// Stores the post-event entries. Only one store per raise cycle.
    pub(crate) fn store_pending(&self, queue: DispatchQueue<S>) -> Result<()> {
        let mut pending = lock(&self.pending, "pending queue")?;
        if pending.is_some() {
            return Err(DispatchError::MultipleUse {
                args: self.id.clone(),
                status: self.status(),
            });
        }
        *pending = Some(queue);
        Ok(())
    }

    /// Takes the post-event entries, leaving nothing behind.
    pub(crate) fn take_pending(&self) -> Result<DispatchQueue<S>> {
        Ok(lock(&self.pending, "pending queue")?
            .take()
            .unwrap_or_default())
    }
}

/// The args object passed through one raise of an [`Event`](crate::Event).
///
/// `EventArgs` is a cheap handle: clones refer to the same args. An args
/// object can be raised exactly once; raising it again is a lifecycle error.
///
/// Callers must serialize `raise` and `raise_post_event` on the same args
/// themselves. Each individual status change, flag access and payload access
/// is atomic, but the raise sequence as a whole is not.
pub struct EventArgs<S, P> {
    core: Arc<ArgsCore<S>>,
    payload: Arc<RwLock<P>>,
}

impl<S, P> Clone for EventArgs<S, P> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<S: 'static, P: Send + Sync + 'static> EventArgs<S, P> {
    /// Creates fresh, unused, mutable args around `payload`.
    pub fn new(payload: P) -> Self {
        let payload = Arc::new(RwLock::new(payload));
        let erased: Arc<dyn Any + Send + Sync> = payload.clone();
        Self {
            core: Arc::new(ArgsCore::new(erased)),
            payload,
        }
    }
}

impl<S: 'static, P> EventArgs<S, P> {
    /// Unique identifier of this args object.
    pub fn id(&self) -> &ArgsId {
        self.core.id()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ArgsStatus {
        self.core.status()
    }

    /// Whether the raise has been cancelled. Reads the master's flag.
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Sets the master's cancellation flag.
    ///
    /// Fails with [`DispatchError::ImmutableArgs`] once the master is immutable.
    pub fn set_cancelled(&self, cancelled: bool) -> Result<()> {
        self.core.set_cancelled(cancelled)
    }

    /// Whether listeners may still change cancellation or payload.
    pub fn is_mutable(&self) -> bool {
        self.core.is_mutable()
    }

    /// Permanently locks cancellation and payload for the whole args graph.
    pub fn make_immutable(&self) -> Result<()> {
        self.core.make_immutable()
    }

    /// `Unused -> UsingPreEvent`.
    pub fn mark_using_pre_event(&self) -> Result<()> {
        self.core.mark_using_pre_event()
    }

    /// `UsingPreEvent -> UsedPreEvent`.
    pub fn mark_used_pre_event(&self) -> Result<()> {
        self.core.mark_used_pre_event()
    }

    /// `UsedPreEvent -> UsingPostEvent`.
    pub fn mark_using_post_event(&self) -> Result<()> {
        self.core.mark_using_post_event()
    }

    /// `UsingPostEvent -> UsedPostEvent`.
    pub fn mark_used_post_event(&self) -> Result<()> {
        self.core.mark_used_post_event()
    }

    /// The event these args were last expanded for.
    pub fn owning_event(&self) -> Option<EventId> {
        self.core.owning_event()
    }

    /// True when these args have no parent.
    pub fn is_master(&self) -> bool {
        self.core.is_master()
    }

    /// The args these were derived from, if any.
    pub fn parent(&self) -> Option<ArgsRef<S>> {
        self.core.parent().map(ArgsRef::from_core)
    }

    /// The top-most ancestor, or these args themselves.
    pub fn master(&self) -> ArgsRef<S> {
        ArgsRef::from_core(self.core.master())
    }

    /// Attaches `child` as a dependent of these args.
    pub fn add_dependent<Q>(&self, child: &EventArgs<S, Q>) -> Result<()> {
        self.core.attach(&child.core)
    }

    /// Dependents of these args; `cascading` walks the whole subtree.
    pub fn dependents(&self, include_self: bool, cascading: bool) -> Vec<ArgsRef<S>> {
        self.core
            .dependents(include_self, cascading)
            .into_iter()
            .map(ArgsRef::from_core)
            .collect()
    }

    /// Every args object raised together with these, dependents included.
    pub fn related_args(&self) -> Vec<ArgsRef<S>> {
        self.core
            .related_args()
            .into_iter()
            .map(ArgsRef::from_core)
            .collect()
    }

    /// Type-erased handle to these args.
    pub fn handle(&self) -> ArgsRef<S> {
        ArgsRef::from_core(Arc::clone(&self.core))
    }

    /// Reads the payload.
    pub fn read<R>(&self, f: impl FnOnce(&P) -> R) -> Result<R> {
        let payload = self
            .payload
            .read()
            .map_err(|e| DispatchError::LockPoisoned(format!("args payload: {}", e)))?;
        Ok(f(&payload))
    }

    /// Edits the payload. Fails with [`DispatchError::ImmutableArgs`] once immutable.
    pub fn update<R>(&self, f: impl FnOnce(&mut P) -> R) -> Result<R> {
        if !self.core.is_mutable() {
            return Err(DispatchError::ImmutableArgs(self.core.id().clone()));
        }
        let mut payload = self
            .payload
            .write()
            .map_err(|e| DispatchError::LockPoisoned(format!("args payload: {}", e)))?;
        // May have been frozen while waiting for the lock.
        if !self.core.is_mutable() {
            return Err(DispatchError::ImmutableArgs(self.core.id().clone()));
        }
        Ok(f(&mut payload))
    }

    pub(crate) fn core(&self) -> &Arc<ArgsCore<S>> {
        &self.core
    }

    pub(crate) fn downgrade(&self) -> WeakArgs<S, P> {
        WeakArgs {
            core: Arc::downgrade(&self.core),
            payload: Arc::downgrade(&self.payload),
        }
    }
}

impl<S: 'static, P> fmt::Debug for EventArgs<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventArgs")
            .field("id", self.core.id())
            .field("status", &self.core.status())
            .field("cancelled", &self.core.is_cancelled())
            .field("mutable", &self.core.is_mutable())
            .finish()
    }
}

/// Non-owning counterpart of [`EventArgs`], held by queued entries.
pub(crate) struct WeakArgs<S, P> {
    core: Weak<ArgsCore<S>>,
    payload: Weak<RwLock<P>>,
}

impl<S, P> WeakArgs<S, P> {
    pub(crate) fn upgrade(&self) -> Option<EventArgs<S, P>> {
        Some(EventArgs {
            core: self.core.upgrade()?,
            payload: self.payload.upgrade()?,
        })
    }
}

/// Type-erased view of any args object in a dependency graph.
pub struct ArgsRef<S> {
    core: Arc<ArgsCore<S>>,
}

impl<S> Clone for ArgsRef<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: 'static> ArgsRef<S> {
    pub(crate) fn from_core(core: Arc<ArgsCore<S>>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<ArgsCore<S>> {
        &self.core
    }

    /// Unique identifier of the args object.
    pub fn id(&self) -> &ArgsId {
        self.core.id()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ArgsStatus {
        self.core.status()
    }

    /// Whether the raise has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Sets the master's cancellation flag.
    pub fn set_cancelled(&self, cancelled: bool) -> Result<()> {
        self.core.set_cancelled(cancelled)
    }

    /// Whether the args graph is still mutable.
    pub fn is_mutable(&self) -> bool {
        self.core.is_mutable()
    }

    /// The event the args were expanded for.
    pub fn owning_event(&self) -> Option<EventId> {
        self.core.owning_event()
    }

    /// True when the args have no parent.
    pub fn is_master(&self) -> bool {
        self.core.is_master()
    }

    /// Parent args, if any.
    pub fn parent(&self) -> Option<ArgsRef<S>> {
        self.core.parent().map(ArgsRef::from_core)
    }

    /// Dependents; `cascading` walks the whole subtree.
    pub fn dependents(&self, include_self: bool, cascading: bool) -> Vec<ArgsRef<S>> {
        self.core
            .dependents(include_self, cascading)
            .into_iter()
            .map(ArgsRef::from_core)
            .collect()
    }

    /// Recovers the typed args when `P` is the payload type.
    pub fn downcast<P: Send + Sync + 'static>(&self) -> Option<EventArgs<S, P>> {
        let payload = Arc::clone(&self.core.payload)
            .downcast::<RwLock<P>>()
            .ok()?;
        Some(EventArgs {
            core: Arc::clone(&self.core),
            payload,
        })
    }
}

impl<S> PartialEq for ArgsRef<S> {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl<S> Eq for ArgsRef<S> {}

impl<S: 'static> fmt::Debug for ArgsRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgsRef")
            .field("id", self.core.id())
            .field("status", &self.core.status())
            .field("owning_event", &self.core.owning_event())
            .finish()
    }
}
