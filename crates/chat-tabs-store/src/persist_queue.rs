//! Write-behind persistence for routed messages.
//!
//! The ingest path hands each message to [`PersistQueue::enqueue`], which
//! never blocks. A named drain thread batches whatever is queued and writes
//! it through [`MessageStore::record_batch`]. Store failures are logged and
//! counted; they never reach the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use chat_tabs_core::{Error, LockLevel, Message, MessageStore, OrderedMutex, Result};

const DRAIN_BATCH_CAP: usize = 256;
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Enqueued,
    /// Channel at capacity; the message was not persisted.
    QueueFull,
    /// Drain thread is gone (shut down or panicked).
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub enqueued: u64,
    pub written: u64,
    pub errors: u64,
    pub dropped: u64,
}

enum QueueMsg {
    Record(Arc<Message>),
    Flush(SyncSender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    written: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PersistStats {
        PersistStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn as_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Bounded write-behind queue in front of a [`MessageStore`].
pub struct PersistQueue {
    sender: SyncSender<QueueMsg>,
    drain_handle: OrderedMutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for PersistQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistQueue")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl PersistQueue {
    /// Spawn the drain thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the thread cannot be spawned.
    pub fn start(store: Arc<dyn MessageStore>, capacity: usize) -> Result<Self> {
        let (sender, rx) = mpsc::sync_channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let drain_counters = Arc::clone(&counters);
        let handle = std::thread::Builder::new()
            .name("chat-tabs-persist".into())
            .spawn(move || drain_loop(&rx, store.as_ref(), &drain_counters))
            .map_err(|e| Error::Internal(format!("failed to spawn persist drain thread: {e}")))?;
        Ok(Self {
            sender,
            drain_handle: OrderedMutex::new(LockLevel::PersistQueueHandle, Some(handle)),
            counters,
        })
    }

    /// Queue `message` for persistence without blocking.
    pub fn enqueue(&self, message: Arc<Message>) -> EnqueueResult {
        match self.sender.try_send(QueueMsg::Record(message)) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                EnqueueResult::Enqueued
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueResult::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueResult::Unavailable
            }
        }
    }

    /// Block until everything enqueued before this call has been written
    /// (or has failed).
    ///
    /// Uses a blocking `send` so the request gets in even when the channel
    /// is full. A dead drain thread makes this return immediately.
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        if self.sender.send(QueueMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv_timeout(FLUSH_TIMEOUT);
        }
    }

    /// Flush, stop the drain thread and join it. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let handle = self.drain_handle.lock().take();
        let Some(handle) = handle else {
            return;
        };
        self.flush();
        let _ = self.sender.send(QueueMsg::Shutdown);
        if handle.join().is_err() {
            tracing::error!("persist drain thread panicked");
        }
    }

    #[must_use]
    pub fn stats(&self) -> PersistStats {
        self.counters.snapshot()
    }
}

impl Drop for PersistQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_batch(store: &dyn MessageStore, batch: &[Arc<Message>], counters: &Counters) {
    if batch.is_empty() {
        return;
    }
    match store.record_batch(batch) {
        Ok(()) => {
            counters.written.fetch_add(as_u64(batch.len()), Ordering::Relaxed);
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                error_type = e.error_type(),
                batch = batch.len(),
                "[persist-drain] batch failed"
            );
            counters.errors.fetch_add(as_u64(batch.len()), Ordering::Relaxed);
        }
    }
}

fn drain_loop(rx: &Receiver<QueueMsg>, store: &dyn MessageStore, counters: &Counters) {
    let mut flush_waiters: Vec<SyncSender<()>> = Vec::new();
    let mut shutting_down = false;

    loop {
        let mut batch: Vec<Arc<Message>> = Vec::new();

        match rx.recv_timeout(DRAIN_INTERVAL) {
            Ok(QueueMsg::Record(message)) => batch.push(message),
            Ok(QueueMsg::Flush(done_tx)) => flush_waiters.push(done_tx),
            Ok(QueueMsg::Shutdown) => shutting_down = true,
            Err(RecvTimeoutError::Timeout) => {
                for waiter in flush_waiters.drain(..) {
                    let _ = waiter.try_send(());
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // A flush request must not be answered before the records queued
        // ahead of it are written, so keep pulling until the cap.
        while batch.len() < DRAIN_BATCH_CAP {
            match rx.try_recv() {
                Ok(QueueMsg::Record(message)) => batch.push(message),
                Ok(QueueMsg::Flush(done_tx)) => flush_waiters.push(done_tx),
                Ok(QueueMsg::Shutdown) => shutting_down = true,
                Err(_) => break,
            }
        }

        write_batch(store, &batch, counters);

        // Waiters that arrived after a full batch may still have records
        // ahead of them in the channel; they are answered on a later pass
        // once the channel runs dry.
        if batch.len() < DRAIN_BATCH_CAP {
            for waiter in flush_waiters.drain(..) {
                let _ = waiter.try_send(());
            }
        }

        if shutting_down {
            break;
        }
    }

    // Anything left after shutdown.
    let mut leftover: Vec<Arc<Message>> = Vec::new();
    for msg in rx.try_iter() {
        match msg {
            QueueMsg::Record(message) => leftover.push(message),
            QueueMsg::Flush(done_tx) => flush_waiters.push(done_tx),
            QueueMsg::Shutdown => {}
        }
    }
    for chunk in leftover.chunks(DRAIN_BATCH_CAP) {
        write_batch(store, chunk, counters);
    }
    for waiter in flush_waiters.drain(..) {
        let _ = waiter.try_send(());
    }
    tracing::debug!(stats = ?counters.snapshot(), "persist drain thread stopped");
}
