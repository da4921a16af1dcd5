//! Ranked locks for the few long-lived locks shared across threads.
//!
//! Each [`OrderedMutex`] / [`OrderedRwLock`] carries a [`LockLevel`]. In debug
//! builds every thread keeps a stack of the levels it holds, and asking for a
//! level that is not strictly above the top of that stack panics before the
//! lock is touched. Release builds skip the bookkeeping entirely.
//!
//! Message-list gates are leaf locks and are not ranked: nothing else is
//! acquired while one is held.
//!
//! Poisoned locks are recovered; a panicking holder never wedges the
//! pipeline.

#![forbid(unsafe_code)]

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Position of a lock in the acquisition order. Nested locks must be taken
/// in ascending rank.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum LockLevel {
    /// Current tab set (swapped wholesale on reconfiguration).
    TabRegistry = 10,
    /// Receiving end of the pipeline's background event channel.
    PipelineEvents = 20,
    /// Join handle of the persist drain thread.
    PersistQueueHandle = 30,
    /// Connection of a persistent message store.
    StoreConnection = 40,
}

impl LockLevel {
    #[must_use]
    pub const fn rank(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}#{}", self.rank())
    }
}

#[cfg(debug_assertions)]
mod held {
    use std::cell::RefCell;

    use super::LockLevel;

    thread_local! {
        static STACK: RefCell<Vec<LockLevel>> = const { RefCell::new(Vec::new()) };
    }

    pub(super) fn enter(level: LockLevel) {
        STACK.with_borrow_mut(|stack| {
            if let Some(&top) = stack.last() {
                assert!(
                    top.rank() < level.rank(),
                    "lock order violation: {level} requested while holding {top} (held: {stack:?})"
                );
            }
            stack.push(level);
        });
    }

    pub(super) fn leave(level: LockLevel) {
        STACK.with_borrow_mut(|stack| {
            // Guards can be dropped in any order.
            if let Some(pos) = stack.iter().rposition(|&held| held == level) {
                stack.remove(pos);
            }
        });
    }

    #[cfg(test)]
    pub(super) fn current() -> Vec<LockLevel> {
        STACK.with_borrow(Clone::clone)
    }
}

#[cfg(not(debug_assertions))]
mod held {
    use super::LockLevel;

    #[inline]
    pub(super) const fn enter(_level: LockLevel) {}

    #[inline]
    pub(super) const fn leave(_level: LockLevel) {}
}

/// Guard of a ranked lock; derefs to the protected value.
pub struct Ranked<G> {
    level: LockLevel,
    guard: G,
}

impl<G> Ranked<G> {
    fn acquire(level: LockLevel, lock: impl FnOnce() -> G) -> Self {
        held::enter(level);
        Self {
            level,
            guard: lock(),
        }
    }
}

impl<G> Drop for Ranked<G> {
    fn drop(&mut self) {
        held::leave(self.level);
    }
}

impl<G: Deref> Deref for Ranked<G> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<G: DerefMut> DerefMut for Ranked<G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

pub type OrderedMutexGuard<'a, T> = Ranked<MutexGuard<'a, T>>;
pub type OrderedRwLockReadGuard<'a, T> = Ranked<RwLockReadGuard<'a, T>>;
pub type OrderedRwLockWriteGuard<'a, T> = Ranked<RwLockWriteGuard<'a, T>>;

#[derive(Debug)]
pub struct OrderedMutex<T> {
    level: LockLevel,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> OrderedMutexGuard<'_, T> {
        Ranked::acquire(self.level, || {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        })
    }
}

#[derive(Debug)]
pub struct OrderedRwLock<T> {
    level: LockLevel,
    inner: RwLock<T>,
}

impl<T> OrderedRwLock<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: RwLock::new(value),
        }
    }

    pub fn read(&self) -> OrderedRwLockReadGuard<'_, T> {
        Ranked::acquire(self.level, || {
            self.inner.read().unwrap_or_else(PoisonError::into_inner)
        })
    }

    pub fn write(&self) -> OrderedRwLockWriteGuard<'_, T> {
        Ranked::acquire(self.level, || {
            self.inner.write().unwrap_or_else(PoisonError::into_inner)
        })
    }
}
