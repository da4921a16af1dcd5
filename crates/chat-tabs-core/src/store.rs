//! Persistent store boundary.
//!
//! The core only records messages and reads recent history back; everything
//! else about storage lives behind [`MessageStore`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::lock_order::{LockLevel, OrderedMutex};
use crate::message::Message;

/// Which history to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only lines seen by this local character.
    pub receiver: Option<u64>,
    /// Only lines dated at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Most recent `limit` matching lines.
    pub limit: usize,
}

impl HistoryQuery {
    #[must_use]
    pub const fn recent(limit: usize) -> Self {
        Self {
            receiver: None,
            since: None,
            limit,
        }
    }

    #[must_use]
    pub const fn for_receiver(mut self, receiver: u64) -> Self {
        self.receiver = Some(receiver);
        self
    }

    #[must_use]
    pub const fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Whether `message` passes the receiver and date bounds (not the limit).
    #[must_use]
    pub fn admits(&self, message: &Message) -> bool {
        self.receiver.is_none_or(|r| r == message.receiver())
            && self.since.is_none_or(|since| message.date() >= since)
    }
}

/// Durable message history. Implementations must be usable from background
/// threads.
pub trait MessageStore: Send + Sync {
    /// Insert or replace the message with this id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] when the store rejects the write.
    fn record(&self, message: &Message) -> Result<()>;

    /// Record several messages. Stores with transactions override this to
    /// write the batch atomically.
    ///
    /// # Errors
    ///
    /// Stops at the first rejected write.
    fn record_batch(&self, messages: &[Arc<Message>]) -> Result<()> {
        messages.iter().try_for_each(|message| self.record(message))
    }

    /// The most recent matching messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StoreUnavailable`] when the store cannot be read.
    fn query_recent(&self, query: &HistoryQuery) -> Result<Vec<Message>>;
}

/// Volatile store for tests and `--memory` runs.
#[derive(Debug)]
pub struct InMemoryStore {
    messages: OrderedMutex<HashMap<Uuid, Message>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            messages: OrderedMutex::new(LockLevel::StoreConnection, HashMap::new()),
        }
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageStore for InMemoryStore {
    fn record(&self, message: &Message) -> Result<()> {
        self.messages.lock().insert(message.id(), message.clone());
        Ok(())
    }

    fn query_recent(&self, query: &HistoryQuery) -> Result<Vec<Message>> {
        let mut matching: Vec<Message> = self
            .messages
            .lock()
            .values()
            .filter(|message| query.admits(message))
            .cloned()
            .collect();
        matching.sort_by_key(Message::date);
        let skip = matching.len().saturating_sub(query.limit);
        Ok(matching.split_off(skip))
    }
}
