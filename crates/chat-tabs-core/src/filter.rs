//! Channel predicates used for tab routing and activity tracking.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat_code::{ChatSource, ChatType};
use crate::message::Message;

/// Which chat lines a tab (or the activity check) accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFilter {
    /// Accepted chat types, each with the sources accepted for it.
    #[serde(default)]
    pub chat_codes: IndexMap<ChatType, ChatSource>,
    /// Accept every extra-chat channel.
    #[serde(default)]
    pub extra_chat_all: bool,
    #[serde(default)]
    pub extra_chat_channels: HashSet<Uuid>,
}

impl ChannelFilter {
    /// A filter that accepts nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Accept the given types from every source.
    #[must_use]
    pub fn for_types(types: impl IntoIterator<Item = ChatType>) -> Self {
        Self {
            chat_codes: types.into_iter().map(|t| (t, ChatSource::all())).collect(),
            ..Self::default()
        }
    }

    /// Accept `chat_type` from `sources`, merging with any existing mask.
    #[must_use]
    pub fn with(mut self, chat_type: ChatType, sources: ChatSource) -> Self {
        self.chat_codes
            .entry(chat_type)
            .and_modify(|mask| *mask |= sources)
            .or_insert(sources);
        self
    }

    #[must_use]
    pub fn with_extra_channel(mut self, channel: Uuid) -> Self {
        self.extra_chat_channels.insert(channel);
        self
    }

    #[must_use]
    pub const fn with_all_extra_channels(mut self) -> Self {
        self.extra_chat_all = true;
        self
    }

    #[must_use]
    pub fn accepts(&self, message: &Message) -> bool {
        message.matches(
            &self.chat_codes,
            self.extra_chat_all,
            &self.extra_chat_channels,
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chat_codes.values().all(|mask| mask.is_empty())
            && !self.extra_chat_all
            && self.extra_chat_channels.is_empty()
    }
}
