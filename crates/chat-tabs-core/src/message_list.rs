//! Bounded, deduplicated, lock-protected message list (one per tab).
//!
//! Design:
//! - **One gate per list**: a binary semaphore (`Mutex<bool>` + `Condvar`)
//!   serializes every operation. Readers do not overlap with each other.
//! - **Writers block, readers time out**: `add_prune`, `add_sort_prune` and
//!   `clear` wait for the gate; `snapshot`, `read_view`, `len` and `contains`
//!   give up after a deadline and report [`LockTimeout`].
//! - **Dedup by id**: a `HashSet<Uuid>` mirrors exactly the ids present in
//!   the sequence, so redelivered messages are no-ops.
//! - **Bounded**: after every write the sequence holds at most `max` items,
//!   evicting from the head (oldest first).
//!
//! The state mutex behind the gate is only ever locked by the gate holder, so
//! it never contends.

#![forbid(unsafe_code)]

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::Error;
use crate::message::Message;

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Gate {
    held: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    fn acquire(&self) -> Permit<'_> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut held = self
            .released
            .wait_while(held, |held| *held)
            .unwrap_or_else(PoisonError::into_inner);
        *held = true;
        Permit { gate: self }
    }

    #[allow(clippy::significant_drop_tightening)] // guard is consumed by wait_timeout_while
    fn try_acquire_for(&self, timeout: Duration) -> Option<Permit<'_>> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut held, wait) = self
            .released
            .wait_timeout_while(held, timeout, |held| *held)
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() && *held {
            return None;
        }
        *held = true;
        Some(Permit { gate: self })
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = false;
        drop(held);
        self.released.notify_all();
    }
}

/// Ownership of the gate. Dropping it releases the gate exactly once.
#[derive(Debug)]
struct Permit<'a> {
    gate: &'a Gate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A bounded read could not acquire the list within its deadline.
///
/// Callers skip the operation for this cycle; this is never "no messages".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeout {
    pub waited_ms: u64,
}

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message list busy after {}ms", self.waited_ms)
    }
}

impl std::error::Error for LockTimeout {}

impl From<LockTimeout> for Error {
    fn from(value: LockTimeout) -> Self {
        Self::LockTimeout {
            waited_ms: value.waited_ms,
        }
    }
}

#[derive(Debug, Default)]
struct ListState {
    messages: VecDeque<Arc<Message>>,
    ids: HashSet<Uuid>,
}

impl ListState {
    fn push_unseen(&mut self, message: Arc<Message>) -> bool {
        if !self.ids.insert(message.id()) {
            return false;
        }
        self.messages.push_back(message);
        true
    }

    fn prune(&mut self, max: usize) {
        while self.messages.len() > max {
            if let Some(evicted) = self.messages.pop_front() {
                self.ids.remove(&evicted.id());
            }
        }
    }
}

/// Ordered, bounded, deduplicated message container.
#[derive(Debug, Default)]
pub struct MessageList {
    gate: Gate,
    state: Mutex<ListState>,
}

impl MessageList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire_for(&self, timeout: Duration) -> Result<Permit<'_>, LockTimeout> {
        let started = Instant::now();
        self.gate.try_acquire_for(timeout).ok_or_else(|| {
            let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            tracing::debug!(waited_ms, "message list read timed out");
            LockTimeout { waited_ms }
        })
    }

    /// Append `message` unless its id is already present, then evict from the
    /// head until at most `max` remain. Returns whether the message was new
    /// and is still in the list afterwards (never true when `max == 0`).
    pub fn add_prune(&self, message: Arc<Message>, max: usize) -> bool {
        let _permit = self.gate.acquire();
        let mut state = self.state();
        let id = message.id();
        let inserted = state.push_unseen(message);
        state.prune(max);
        inserted && state.ids.contains(&id)
    }

    /// Append every unseen message in input order, stable-sort the whole list
    /// by date, then evict from the head until at most `max` remain.
    ///
    /// Equal dates keep their relative order (existing entries first, then the
    /// batch in input order). Returns how many messages were new.
    pub fn add_sort_prune<I>(&self, messages: I, max: usize) -> usize
    where
        I: IntoIterator<Item = Arc<Message>>,
    {
        let _permit = self.gate.acquire();
        let mut state = self.state();
        let inserted = messages
            .into_iter()
            .map(|message| state.push_unseen(message))
            .filter(|inserted| *inserted)
            .count();
        state.messages.make_contiguous().sort_by_key(|m| m.date());
        state.prune(max);
        inserted
    }

    pub fn clear(&self) {
        let _permit = self.gate.acquire();
        let mut state = self.state();
        state.messages.clear();
        state.ids.clear();
    }

    /// Owned copy of the current contents.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the list stays busy for `timeout`.
    pub fn snapshot(&self, timeout: Duration) -> Result<Vec<Arc<Message>>, LockTimeout> {
        let _permit = self.acquire_for(timeout)?;
        let state = self.state();
        Ok(state.messages.iter().cloned().collect())
    }

    /// Borrow the contents without copying. The list stays locked until the
    /// view is dropped or [`ReadOnlyView::release`]d; writers block meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the list stays busy for `timeout`.
    pub fn read_view(&self, timeout: Duration) -> Result<ReadOnlyView<'_>, LockTimeout> {
        let permit = self.acquire_for(timeout)?;
        let mut state = self.state();
        state.messages.make_contiguous();
        Ok(ReadOnlyView {
            state: Some(state),
            permit: Some(permit),
        })
    }

    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the list stays busy for `timeout`.
    pub fn len(&self, timeout: Duration) -> Result<usize, LockTimeout> {
        let _permit = self.acquire_for(timeout)?;
        let len = self.state().messages.len();
        Ok(len)
    }

    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the list stays busy for `timeout`.
    pub fn contains(&self, id: Uuid, timeout: Duration) -> Result<bool, LockTimeout> {
        let _permit = self.acquire_for(timeout)?;
        let found = self.state().ids.contains(&id);
        Ok(found)
    }
}

/// Zero-copy view over a locked [`MessageList`].
///
/// Derefs to the messages in list order.
pub struct ReadOnlyView<'a> {
    // Field order matters: the state guard must drop before the permit.
    state: Option<MutexGuard<'a, ListState>>,
    permit: Option<Permit<'a>>,
}

impl ReadOnlyView<'_> {
    /// Unlock the list now. Safe to call repeatedly; afterwards the view is
    /// empty.
    pub fn release(&mut self) {
        self.state.take();
        self.permit.take();
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.permit.is_none()
    }
}

impl Deref for ReadOnlyView<'_> {
    type Target = [Arc<Message>];

    fn deref(&self) -> &Self::Target {
        match &self.state {
            Some(state) => state.messages.as_slices().0,
            None => &[],
        }
    }
}

impl fmt::Debug for ReadOnlyView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyView")
            .field("len", &self.len())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_code::{ChatSource, ChatType};
    use crate::proptest_generators::{
        arb_messages, arb_messages_distinct_dates, message_at, proptest_config,
    };
    use proptest::prelude::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    fn msg(micros: i64) -> Arc<Message> {
        message_at(micros, ChatType::Say, ChatSource::OTHER)
    }

    fn dates(list: &MessageList) -> Vec<i64> {
        list.snapshot(SHORT)
            .unwrap()
            .iter()
            .map(|m| m.date().timestamp_micros())
            .collect()
    }

    #[test]
    fn fifo_eviction_keeps_last_max() {
        let list = MessageList::new();
        let (a, b, c, d) = (msg(1), msg(2), msg(3), msg(4));
        for m in [&a, &b, &c, &d] {
            assert!(list.add_prune(Arc::clone(m), 3));
        }
        let ids: Vec<_> = list.snapshot(SHORT).unwrap().iter().map(|m| m.id()).collect();
        assert_eq!(ids, [b.id(), c.id(), d.id()]);
        assert!(!list.contains(a.id(), SHORT).unwrap());
        assert!(list.contains(d.id(), SHORT).unwrap());
    }

    #[test]
    fn duplicate_add_is_noop() {
        let list = MessageList::new();
        let a = msg(1);
        assert!(list.add_prune(Arc::clone(&a), 10));
        assert!(!list.add_prune(Arc::clone(&a), 10));
        assert_eq!(list.len(SHORT).unwrap(), 1);
    }

    #[test]
    fn evicted_id_can_be_reinserted() {
        let list = MessageList::new();
        let a = msg(1);
        list.add_prune(Arc::clone(&a), 1);
        list.add_prune(msg(2), 1);
        assert!(list.add_prune(a, 1));
    }

    #[test]
    fn zero_max_keeps_list_empty() {
        let list = MessageList::new();
        assert!(!list.add_prune(msg(1), 0));
        assert_eq!(list.len(SHORT).unwrap(), 0);
        assert_eq!(list.add_sort_prune([msg(2), msg(3)], 0), 2);
        assert!(list.snapshot(SHORT).unwrap().is_empty());
    }

    #[test]
    fn sort_prune_merges_backfill_with_live() {
        let list = MessageList::new();
        list.add_prune(msg(50), 10);
        list.add_prune(msg(60), 10);
        let inserted = list.add_sort_prune([msg(30), msg(10), msg(40)], 4);
        assert_eq!(inserted, 3);
        assert_eq!(dates(&list), [30, 40, 50, 60]);
    }

    #[test]
    fn sort_prune_skips_known_ids_and_keeps_ties_stable() {
        let list = MessageList::new();
        let live = msg(5);
        list.add_prune(Arc::clone(&live), 10);
        let tie_a = msg(5);
        let tie_b = msg(5);
        let inserted = list.add_sort_prune(
            [Arc::clone(&live), Arc::clone(&tie_a), Arc::clone(&tie_b)],
            10,
        );
        assert_eq!(inserted, 2);
        let ids: Vec<_> = list.snapshot(SHORT).unwrap().iter().map(|m| m.id()).collect();
        assert_eq!(ids, [live.id(), tie_a.id(), tie_b.id()]);
    }

    #[test]
    fn clear_empties_ids_too() {
        let list = MessageList::new();
        let a = msg(1);
        list.add_prune(Arc::clone(&a), 10);
        list.clear();
        assert_eq!(list.len(SHORT).unwrap(), 0);
        assert!(list.add_prune(a, 10));
    }

    #[test]
    fn view_blocks_reads_until_released() {
        let list = MessageList::new();
        list.add_prune(msg(1), 10);
        let mut view = list.read_view(SHORT).unwrap();
        assert_eq!(view.len(), 1);

        assert!(matches!(list.snapshot(SHORT), Err(LockTimeout { .. })));
        assert!(list.read_view(SHORT).is_err());

        view.release();
        assert!(view.is_empty());
        view.release();
        drop(view);

        assert_eq!(list.snapshot(SHORT).unwrap().len(), 1);
    }

    #[test]
    fn double_release_then_writer_proceeds() {
        let list = MessageList::new();
        {
            let mut view = list.read_view(SHORT).unwrap();
            view.release();
            view.release();
        }
        assert!(list.add_prune(msg(1), 10));
        assert_eq!(list.len(SHORT).unwrap(), 1);
    }

    #[test]
    fn writer_waits_for_view_then_completes() {
        let list = Arc::new(MessageList::new());
        let view = list.read_view(SHORT).unwrap();

        let writer = {
            let list = Arc::clone(&list);
            thread::spawn(move || list.add_prune(msg(1), 10))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(view.is_empty());
        drop(view);

        assert!(writer.join().unwrap());
        assert_eq!(list.len(SHORT).unwrap(), 1);
    }

    #[test]
    fn view_released_during_unwind() {
        let list = MessageList::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _view = list.read_view(SHORT).unwrap();
            panic!("renderer blew up");
        }));
        assert!(result.is_err());
        assert!(list.add_prune(msg(1), 10));
    }

    #[test]
    fn timeout_converts_to_error() {
        let err: Error = LockTimeout { waited_ms: 7 }.into();
        assert_eq!(err.error_type(), "LOCK_TIMEOUT");
        assert!(err.is_recoverable());
    }

    proptest! {
        #![proptest_config(proptest_config())]

        /// Repeated insertion of one message grows the list by at most one.
        #[test]
        fn proptest_add_prune_idempotent(
            seed in arb_messages(8),
            repeats in 1_usize..8,
            max in 1_usize..16,
        ) {
            let list = MessageList::new();
            for m in &seed {
                list.add_prune(Arc::clone(m), max);
            }
            let before = list.len(SHORT).unwrap();
            let probe = msg(42);
            for _ in 0..repeats {
                list.add_prune(Arc::clone(&probe), max);
            }
            let snapshot = list.snapshot(SHORT).unwrap();
            prop_assert!(snapshot.len() <= before + 1);
            let copies = snapshot.iter().filter(|m| m.id() == probe.id()).count();
            prop_assert_eq!(copies, 1);
        }

        /// No write ever leaves more than `max` items.
        #[test]
        fn proptest_length_bounded(
            singles in arb_messages(32),
            batch in arb_messages(32),
            max in 0_usize..20,
        ) {
            let list = MessageList::new();
            for m in singles {
                list.add_prune(m, max);
                prop_assert!(list.len(SHORT).unwrap() <= max);
            }
            list.add_sort_prune(batch, max);
            prop_assert!(list.len(SHORT).unwrap() <= max);
        }

        /// `max + k` distinct inserts keep exactly the last `max`, in order.
        #[test]
        fn proptest_fifo_eviction(batch in arb_messages(40), max in 0_usize..20) {
            let list = MessageList::new();
            for m in &batch {
                list.add_prune(Arc::clone(m), max);
            }
            let expected: Vec<_> = batch
                .iter()
                .skip(batch.len().saturating_sub(max))
                .map(|m| m.id())
                .collect();
            let actual: Vec<_> = list.snapshot(SHORT).unwrap().iter().map(|m| m.id()).collect();
            prop_assert_eq!(actual, expected);
        }

        /// Bulk load of distinct dates ends sorted ascending after pruning.
        #[test]
        fn proptest_sort_prune_sorted(
            batch in arb_messages_distinct_dates(48),
            max in 0_usize..64,
        ) {
            let list = MessageList::new();
            list.add_sort_prune(batch.clone(), max);
            let got = dates(&list);
            prop_assert!(got.windows(2).all(|w| w[0] < w[1]));

            let mut all: Vec<i64> = batch.iter().map(|m| m.date().timestamp_micros()).collect();
            all.sort_unstable();
            let keep = all.len().min(max);
            prop_assert_eq!(&got[..], &all[all.len() - keep..]);
        }
    }
}
