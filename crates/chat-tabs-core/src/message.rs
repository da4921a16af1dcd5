//! The chat message model.
//!
//! A [`Message`] is immutable once built. Tabs share messages through
//! `Arc<Message>`; identity (and therefore deduplication) is by [`Message::id`]
//! alone, never by content.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat_code::{ChatCode, ChatSource, ChatType};
use crate::chunk::{Chunk, ChunkLink, chunks_to_text};
use crate::timestamps::now_utc;

/// One chat line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    /// Content id of the local character that saw the line.
    #[serde(default)]
    receiver: u64,
    /// Content id of the remote character, 0 when unknown.
    #[serde(default)]
    content_id: u64,
    date: DateTime<Utc>,
    code: ChatCode,
    #[serde(default)]
    sender: Vec<Chunk>,
    #[serde(default)]
    content: Vec<Chunk>,
    /// Set for lines from channels outside the enumerable chat types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra_chat_channel: Option<Uuid>,
}

impl Message {
    /// Build a live message with a fresh id, dated now.
    #[must_use]
    pub fn new(code: ChatCode, sender: Vec<Chunk>, content: Vec<Chunk>) -> Self {
        MessageBuilder::new(code)
            .sender(sender)
            .content(content)
            .build()
    }

    #[must_use]
    pub fn builder(code: ChatCode) -> MessageBuilder {
        MessageBuilder::new(code)
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn receiver(&self) -> u64 {
        self.receiver
    }

    #[must_use]
    pub const fn content_id(&self) -> u64 {
        self.content_id
    }

    #[must_use]
    pub const fn date(&self) -> DateTime<Utc> {
        self.date
    }

    #[must_use]
    pub const fn code(&self) -> ChatCode {
        self.code
    }

    #[must_use]
    pub fn sender(&self) -> &[Chunk] {
        &self.sender
    }

    #[must_use]
    pub fn content(&self) -> &[Chunk] {
        &self.content
    }

    #[must_use]
    pub const fn extra_chat_channel(&self) -> Option<Uuid> {
        self.extra_chat_channel
    }

    #[must_use]
    pub fn sender_text(&self) -> String {
        chunks_to_text(&self.sender)
    }

    #[must_use]
    pub fn content_text(&self) -> String {
        chunks_to_text(&self.content)
    }

    /// The other party of a tell: the first player link in the sender.
    #[must_use]
    pub fn tell_partner(&self) -> Option<(&str, u16)> {
        if !self.code.chat_type().is_some_and(ChatType::is_tell) {
            return None;
        }
        self.sender.iter().find_map(|chunk| match &chunk.link {
            Some(ChunkLink::Player { name, world_id }) => Some((name.as_str(), *world_id)),
            _ => None,
        })
    }

    /// Routing predicate.
    ///
    /// Lines from an extra-chat channel match when `extra_all` is set or their
    /// channel id is in `extra_channels`. Every other line matches when its
    /// chat type is a key of `channels` and that key's source mask intersects
    /// the line's source.
    #[must_use]
    pub fn matches<S: std::hash::BuildHasher>(
        &self,
        channels: &IndexMap<ChatType, ChatSource>,
        extra_all: bool,
        extra_channels: &HashSet<Uuid, S>,
    ) -> bool {
        if let Some(channel) = self.extra_chat_channel {
            return extra_all || extra_channels.contains(&channel);
        }

        let Some(chat_type) = self.code.chat_type() else {
            return false;
        };
        channels
            .get(&chat_type)
            .is_some_and(|mask| mask.intersects(self.code.source()))
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Builder used by adapters and by the store when decoding rows.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: Option<Uuid>,
    receiver: u64,
    content_id: u64,
    date: Option<DateTime<Utc>>,
    code: ChatCode,
    sender: Vec<Chunk>,
    content: Vec<Chunk>,
    extra_chat_channel: Option<Uuid>,
}

impl MessageBuilder {
    #[must_use]
    pub const fn new(code: ChatCode) -> Self {
        Self {
            id: None,
            receiver: 0,
            content_id: 0,
            date: None,
            code,
            sender: Vec::new(),
            content: Vec::new(),
            extra_chat_channel: None,
        }
    }

    /// Reuse a known id (store rows, redelivered lines).
    #[must_use]
    pub const fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub const fn receiver(mut self, receiver: u64) -> Self {
        self.receiver = receiver;
        self
    }

    #[must_use]
    pub const fn content_id(mut self, content_id: u64) -> Self {
        self.content_id = content_id;
        self
    }

    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: Vec<Chunk>) -> Self {
        self.sender = sender;
        self
    }

    #[must_use]
    pub fn content(mut self, content: Vec<Chunk>) -> Self {
        self.content = content;
        self
    }

    #[must_use]
    pub const fn extra_chat_channel(mut self, channel: Option<Uuid>) -> Self {
        self.extra_chat_channel = channel;
        self
    }

    /// Finish the message. Missing ids are generated (v4) and missing dates
    /// are set to now.
    #[must_use]
    pub fn build(self) -> Message {
        Message {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            receiver: self.receiver,
            content_id: self.content_id,
            date: self.date.unwrap_or_else(now_utc),
            code: self.code,
            sender: self.sender,
            content: self.content,
            extra_chat_channel: self.extra_chat_channel,
        }
    }
}
