//! Registration tables.
//!
//! Each event owns two tables, one for listeners and one for dependent
//! events. Every table is split into a durable partition, which keeps its
//! targets alive, and an ephemeral partition, which only holds `Weak`
//! references and lets its targets vanish with their owner.
//!
//! Each partition has its own `Mutex`. A table-wide `RwLock` gate sits in
//! front of both: writers that touch more than one partition hold it for
//! writing, and a snapshot holds it for reading across both copies, so a
//! target moving between partitions is always seen in exactly one of them.
//! The gate is always taken before a partition lock, and no code path locks
//! both partitions at once.
//!
//! Dispatch never iterates a partition in place: it copies a snapshot under
//! the locks and works on the copy, so registrations made while a raise is in
//! flight only affect later raises.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, Result};

/// Lifetime class of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Kept until explicitly deregistered.
    Durable,
    /// Dropped once its owner is gone.
    Ephemeral,
}

impl Lifetime {
    fn other(self) -> Lifetime {
        match self {
            Lifetime::Durable => Lifetime::Ephemeral,
            Lifetime::Ephemeral => Lifetime::Durable,
        }
    }
}

/// Outcome of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The target was not registered before.
    Added,
    /// The target was already registered; its entry was replaced.
    Updated,
}

/// Strong or weak reference to a registered target.
pub(crate) enum Target<T: ?Sized> {
    Durable(Arc<T>),
    Ephemeral(Weak<T>),
}

impl<T: ?Sized> Target<T> {
    pub(crate) fn new(target: &Arc<T>, lifetime: Lifetime) -> Self {
        match lifetime {
            Lifetime::Durable => Target::Durable(Arc::clone(target)),
            Lifetime::Ephemeral => Target::Ephemeral(Arc::downgrade(target)),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<T>> {
        match self {
            Target::Durable(target) => Some(Arc::clone(target)),
            Target::Ephemeral(target) => target.upgrade(),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        match self {
            Target::Durable(_) => true,
            Target::Ephemeral(target) => target.strong_count() > 0,
        }
    }
}

impl<T: ?Sized> Clone for Target<T> {
    fn clone(&self) -> Self {
        match self {
            Target::Durable(target) => Target::Durable(Arc::clone(target)),
            Target::Ephemeral(target) => Target::Ephemeral(Weak::clone(target)),
        }
    }
}

/// One entry in a partitioned table.
pub(crate) trait Slot: Clone {
    type Key: PartialEq;

    fn key(&self) -> &Self::Key;

    /// False once an ephemeral target has been dropped.
    fn is_live(&self) -> bool;
}

/// A registration table split into durable and ephemeral partitions.
pub(crate) struct Partitioned<E> {
    name: &'static str,
    gate: RwLock<()>,
    durable: Mutex<Vec<E>>,
    ephemeral: Mutex<Vec<E>>,
}

impl<E: Slot> Partitioned<E> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            gate: RwLock::new(()),
            durable: Mutex::new(Vec::new()),
            ephemeral: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self, lifetime: Lifetime) -> Result<MutexGuard<'_, Vec<E>>> {
        let partition = match lifetime {
            Lifetime::Durable => &self.durable,
            Lifetime::Ephemeral => &self.ephemeral,
        };
        partition
            .lock()
            .map_err(|e| DispatchError::LockPoisoned(format!("{} ({:?}): {}", self.name, lifetime, e)))
    }

    fn read_gate(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.gate
            .read()
            .map_err(|e| DispatchError::LockPoisoned(format!("{} gate: {}", self.name, e)))
    }

    fn write_gate(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.gate
            .write()
            .map_err(|e| DispatchError::LockPoisoned(format!("{} gate: {}", self.name, e)))
    }

    /// Registers `slot`, replacing any entry with the same key.
    ///
    /// An entry with the same key in the other partition is moved, not copied.
    pub(crate) fn insert(&self, lifetime: Lifetime, slot: E) -> Result<Registration> {
        let _gate = self.write_gate()?;
        let moved = {
            let mut other = self.lock(lifetime.other())?;
            let before = other.len();
            other.retain(|s| s.key() != slot.key());
            before != other.len()
        };

        let mut partition = self.lock(lifetime)?;
        match partition.iter_mut().find(|s| s.key() == slot.key()) {
            Some(existing) => {
                let was_live = existing.is_live();
                *existing = slot;
                Ok(if was_live || moved {
                    Registration::Updated
                } else {
                    Registration::Added
                })
            }
            None => {
                partition.push(slot);
                Ok(if moved {
                    Registration::Updated
                } else {
                    Registration::Added
                })
            }
        }
    }

    /// Removes the entry with `key` from whichever partition holds it.
    ///
    /// Returns false when nothing live was registered under `key`.
    pub(crate) fn remove(&self, key: &E::Key) -> Result<bool> {
        let _gate = self.write_gate()?;
        let mut removed = false;
        for lifetime in [Lifetime::Durable, Lifetime::Ephemeral] {
            let mut partition = self.lock(lifetime)?;
            partition.retain(|s| {
                if s.key() == key {
                    removed |= s.is_live();
                    false
                } else {
                    true
                }
            });
        }
        Ok(removed)
    }

    /// Copies all live entries, durable first, in registration order.
    ///
    /// With `prune`, stale ephemeral entries are dropped from the table while
    /// its lock is held anyway.
    pub(crate) fn snapshot(&self, prune: bool) -> Result<Vec<E>> {
        let _gate = self.read_gate()?;
        let mut entries = self.lock(Lifetime::Durable)?.clone();

        let ephemeral = {
            let mut partition = self.lock(Lifetime::Ephemeral)?;
            if prune {
                let before = partition.len();
                partition.retain(E::is_live);
                if before != partition.len() {
                    debug!(
                        table = self.name,
                        removed = before - partition.len(),
                        "pruned stale registrations during dispatch"
                    );
                }
            }
            partition.clone()
        };

        for slot in ephemeral {
            if slot.is_live() && !entries.iter().any(|e| e.key() == slot.key()) {
                entries.push(slot);
            }
        }
        Ok(entries)
    }

    /// Drops ephemeral entries whose target has vanished.
    pub(crate) fn prune(&self) -> Result<usize> {
        let mut partition = self.lock(Lifetime::Ephemeral)?;
        let before = partition.len();
        partition.retain(E::is_live);
        Ok(before - partition.len())
    }

    /// True when a live entry exists under `key`.
    pub(crate) fn contains(&self, key: &E::Key) -> bool {
        let Ok(_gate) = self.read_gate() else {
            return false;
        };
        [Lifetime::Durable, Lifetime::Ephemeral].iter().any(|lifetime| {
            self.lock(*lifetime)
                .map(|p| p.iter().any(|s| s.key() == key && s.is_live()))
                .unwrap_or(false)
        })
    }

    /// Number of live entries across both partitions.
    pub(crate) fn len(&self) -> usize {
        let Ok(_gate) = self.read_gate() else {
            return 0;
        };
        [Lifetime::Durable, Lifetime::Ephemeral]
            .iter()
            .map(|lifetime| {
                self.lock(*lifetime)
                    .map(|p| p.iter().filter(|s| s.is_live()).count())
                    .unwrap_or(0)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct TestSlot {
        key: u32,
        target: Target<String>,
    }

    impl Slot for TestSlot {
        type Key = u32;

        fn key(&self) -> &u32 {
            &self.key
        }

        fn is_live(&self) -> bool {
            self.target.is_live()
        }
    }

    fn slot(key: u32, target: &Arc<String>, lifetime: Lifetime) -> TestSlot {
        TestSlot {
            key,
            target: Target::new(target, lifetime),
        }
    }

    #[test]
    fn test_insert_then_update() {
        let table = Partitioned::new("test");
        let target = Arc::new("a".to_string());

        let first = table.insert(Lifetime::Durable, slot(1, &target, Lifetime::Durable)).unwrap();
        let second = table.insert(Lifetime::Durable, slot(1, &target, Lifetime::Durable)).unwrap();

        assert_eq!(first, Registration::Added);
        assert_eq!(second, Registration::Updated);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_moves_between_partitions() {
        let table = Partitioned::new("test");
        let target = Arc::new("a".to_string());

        table.insert(Lifetime::Durable, slot(1, &target, Lifetime::Durable)).unwrap();
        let moved = table.insert(Lifetime::Ephemeral, slot(1, &target, Lifetime::Ephemeral)).unwrap();

        assert_eq!(moved, Registration::Updated);
        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot(false).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_never_misses_a_moving_entry() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let table = Arc::new(Partitioned::new("test"));
        let target = Arc::new("a".to_string());
        table.insert(Lifetime::Durable, slot(1, &target, Lifetime::Durable)).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let toggler = {
            let table = Arc::clone(&table);
            let target = Arc::clone(&target);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut lifetime = Lifetime::Durable;
                while !stop.load(Ordering::Relaxed) {
                    lifetime = lifetime.other();
                    table.insert(lifetime, slot(1, &target, lifetime)).unwrap();
                }
            })
        };

        for _ in 0..20_000 {
            let keys: Vec<u32> = table.snapshot(false).unwrap().iter().map(|s| s.key).collect();
            assert_eq!(keys, vec![1]);
        }

        stop.store(true, Ordering::Relaxed);
        toggler.join().unwrap();
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = Partitioned::new("test");
        let target = Arc::new("a".to_string());
        table.insert(Lifetime::Durable, slot(1, &target, Lifetime::Durable)).unwrap();

        assert!(table.remove(&1).unwrap());
        assert!(!table.remove(&1).unwrap());
        assert!(!table.remove(&2).unwrap());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_ephemeral_entries_vanish_with_owner() {
        let table = Partitioned::new("test");
        let kept = Arc::new("kept".to_string());
        let dropped = Arc::new("dropped".to_string());

        table.insert(Lifetime::Ephemeral, slot(1, &kept, Lifetime::Ephemeral)).unwrap();
        table.insert(Lifetime::Ephemeral, slot(2, &dropped, Lifetime::Ephemeral)).unwrap();
        drop(dropped);

        assert_eq!(table.len(), 1);
        assert!(!table.contains(&2));

        let snapshot = table.snapshot(false).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].key, 1);

        assert_eq!(table.prune().unwrap(), 1);
        assert_eq!(table.prune().unwrap(), 0);
    }

    #[test]
    fn test_snapshot_prunes_when_asked() {
        let table = Partitioned::new("test");
        let dropped = Arc::new("dropped".to_string());
        table.insert(Lifetime::Ephemeral, slot(1, &dropped, Lifetime::Ephemeral)).unwrap();
        drop(dropped);

        assert!(table.snapshot(true).unwrap().is_empty());
        assert_eq!(table.prune().unwrap(), 0);
    }

    #[test]
    fn test_removing_stale_entry_reports_not_found() {
        let table = Partitioned::new("test");
        let dropped = Arc::new("dropped".to_string());
        table.insert(Lifetime::Ephemeral, slot(1, &dropped, Lifetime::Ephemeral)).unwrap();
        drop(dropped);

        assert!(!table.remove(&1).unwrap());
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let table = Partitioned::new("test");
        let targets: Vec<Arc<String>> = (0..4).map(|i| Arc::new(i.to_string())).collect();

        table.insert(Lifetime::Ephemeral, slot(0, &targets[0], Lifetime::Ephemeral)).unwrap();
        table.insert(Lifetime::Durable, slot(1, &targets[1], Lifetime::Durable)).unwrap();
        table.insert(Lifetime::Durable, slot(2, &targets[2], Lifetime::Durable)).unwrap();
        table.insert(Lifetime::Ephemeral, slot(3, &targets[3], Lifetime::Ephemeral)).unwrap();

        let keys: Vec<u32> = table.snapshot(false).unwrap().iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![1, 2, 0, 3]);
    }
}
