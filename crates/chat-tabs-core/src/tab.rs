//! Tabs: user-configured chat views with a routing rule and a message list.
//!
//! A live [`Tab`] is never cloned. Configuration changes go through
//! [`Tab::to_persisted`] and [`Tab::from_persisted`], which yields a new tab
//! with the same identifier, an empty list and zeroed counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::ChannelFilter;
use crate::message::Message;
use crate::message_list::MessageList;
use crate::router::RoutingContext;
use crate::timestamps::monotonic_millis;

/// When routed messages bump a tab's unread counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadMode {
    /// Every routed live message.
    #[default]
    All,
    /// Only while the tab is not visible.
    Unseen,
    None,
}

/// The other party of a direct-message tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TellPartner {
    pub name: String,
    pub world_id: u16,
    /// Remote content id; 0 when unknown.
    #[serde(default)]
    pub content_id: u64,
}

impl TellPartner {
    /// Whether `message` is a tell exchanged with this partner.
    ///
    /// Content ids decide when both sides know one; otherwise the sender's
    /// player link must name the same character on the same world.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        if !message.code().chat_type().is_some_and(|t| t.is_tell()) {
            return false;
        }
        if self.content_id != 0 && message.content_id() != 0 {
            return self.content_id == message.content_id();
        }
        message
            .tell_partner()
            .is_some_and(|(name, world)| name == self.name && world == self.world_id)
    }
}

/// Tab variant, persisted as an explicit `kind` discriminant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TabKind {
    #[default]
    Standard,
    DirectMessage { partner: TellPartner },
}

/// Everything about a tab that survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct PersistedTab {
    #[serde(default = "Uuid::new_v4")]
    pub identifier: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub kind: TabKind,
    #[serde(default)]
    pub channels: ChannelFilter,
    #[serde(default)]
    pub unread_mode: UnreadMode,
    #[serde(default)]
    pub unhide_on_activity: bool,
    #[serde(default = "default_true")]
    pub display_timestamp: bool,
    #[serde(default)]
    pub pop_out: bool,
}

const fn default_true() -> bool {
    true
}

impl PersistedTab {
    /// A standard tab with default display options.
    #[must_use]
    pub fn standard(name: impl Into<String>, channels: ChannelFilter) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            name: name.into(),
            kind: TabKind::Standard,
            channels,
            unread_mode: UnreadMode::All,
            unhide_on_activity: false,
            display_timestamp: true,
            pop_out: false,
        }
    }

    /// A direct-message tab for `partner`, named after them.
    #[must_use]
    pub fn direct_message(partner: TellPartner) -> Self {
        Self {
            name: partner.name.clone(),
            kind: TabKind::DirectMessage { partner },
            ..Self::standard(String::new(), ChannelFilter::empty())
        }
    }
}

/// A live tab.
#[derive(Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct Tab {
    identifier: Uuid,
    name: String,
    kind: TabKind,
    filter: ChannelFilter,
    unread_mode: UnreadMode,
    unhide_on_activity: bool,
    display_timestamp: bool,
    pop_out: bool,

    unread: AtomicU32,
    /// Monotonic milliseconds of the last counted activity; 0 = never.
    last_activity: AtomicU64,
    visible: AtomicBool,
    messages: MessageList,
}

impl Tab {
    #[must_use]
    pub fn new(name: impl Into<String>, filter: ChannelFilter) -> Self {
        Self::from_persisted(PersistedTab::standard(name, filter))
    }

    /// Fresh tab from configuration: empty list, zero counters, not visible.
    #[must_use]
    pub fn from_persisted(persisted: PersistedTab) -> Self {
        Self {
            identifier: persisted.identifier,
            name: persisted.name,
            kind: persisted.kind,
            filter: persisted.channels,
            unread_mode: persisted.unread_mode,
            unhide_on_activity: persisted.unhide_on_activity,
            display_timestamp: persisted.display_timestamp,
            pop_out: persisted.pop_out,
            unread: AtomicU32::new(0),
            last_activity: AtomicU64::new(0),
            visible: AtomicBool::new(false),
            messages: MessageList::new(),
        }
    }

    /// Configuration of this tab, without messages or counters.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedTab {
        PersistedTab {
            identifier: self.identifier,
            name: self.name.clone(),
            kind: self.kind.clone(),
            channels: self.filter.clone(),
            unread_mode: self.unread_mode,
            unhide_on_activity: self.unhide_on_activity,
            display_timestamp: self.display_timestamp,
            pop_out: self.pop_out,
        }
    }

    #[must_use]
    pub const fn identifier(&self) -> Uuid {
        self.identifier
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> &TabKind {
        &self.kind
    }

    #[must_use]
    pub const fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    #[must_use]
    pub const fn unread_mode(&self) -> UnreadMode {
        self.unread_mode
    }

    #[must_use]
    pub const fn unhide_on_activity(&self) -> bool {
        self.unhide_on_activity
    }

    #[must_use]
    pub const fn display_timestamp(&self) -> bool {
        self.display_timestamp
    }

    #[must_use]
    pub const fn pop_out(&self) -> bool {
        self.pop_out
    }

    #[must_use]
    pub const fn messages(&self) -> &MessageList {
        &self.messages
    }

    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        match &self.kind {
            TabKind::Standard => self.filter.accepts(message),
            TabKind::DirectMessage { partner } => partner.matches(message),
        }
    }

    /// Insert into the list (bounded by the global display limit) and, for
    /// live messages, update unread and activity bookkeeping.
    ///
    /// Returns whether the message was new to this tab.
    pub fn add_message(
        &self,
        message: Arc<Message>,
        counts_as_unread: bool,
        ctx: &RoutingContext,
    ) -> bool {
        let counts_as_activity = counts_as_unread && ctx.activity.accepts(&message);
        let inserted = self.messages.add_prune(message, ctx.display_limit);

        if counts_as_unread && self.should_count_unread() {
            self.bump_unread();
        }
        if counts_as_activity {
            self.last_activity
                .fetch_max(monotonic_millis(), Ordering::Relaxed);
        }
        inserted
    }

    fn should_count_unread(&self) -> bool {
        match self.unread_mode {
            UnreadMode::All => true,
            UnreadMode::Unseen => !self.visible.load(Ordering::Relaxed),
            UnreadMode::None => false,
        }
    }

    fn bump_unread(&self) {
        let _ = self
            .unread
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add(1))
            });
    }

    #[must_use]
    pub fn unread(&self) -> u32 {
        self.unread.load(Ordering::Relaxed)
    }

    pub fn mark_read(&self) {
        self.unread.store(0, Ordering::Relaxed);
    }

    /// Monotonic milliseconds of the last activity, `None` if never active.
    #[must_use]
    pub fn last_activity(&self) -> Option<u64> {
        match self.last_activity.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Driven by the UI. Becoming visible does not clear unread.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    /// Whether an unhide-on-activity tab has been quiet for longer than
    /// `hide_after`. A zero threshold disables hiding.
    #[must_use]
    pub fn is_hidden_by_inactivity(&self, hide_after: Duration) -> bool {
        self.hidden_at(hide_after, monotonic_millis())
    }

    fn hidden_at(&self, hide_after: Duration, now_ms: u64) -> bool {
        if !self.unhide_on_activity || hide_after.is_zero() {
            return false;
        }
        let threshold = u64::try_from(hide_after.as_millis()).unwrap_or(u64::MAX);
        self.last_activity()
            .is_none_or(|last| now_ms.saturating_sub(last) > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_code::{ChatCode, ChatSource, ChatType};
    use crate::chunk::Chunk;

    const SHORT: Duration = Duration::from_millis(20);

    fn ctx(limit: usize, activity: ChannelFilter) -> RoutingContext {
        RoutingContext {
            display_limit: limit,
            activity,
        }
    }

    fn say() -> Arc<Message> {
        Arc::new(Message::new(
            ChatCode::new(ChatType::Say, ChatSource::OTHER),
            vec![Chunk::player("Alpha Beta", 73)],
            vec![Chunk::text("hi")],
        ))
    }

    fn tell_from(name: &str, world: u16, content_id: u64) -> Arc<Message> {
        Arc::new(
            Message::builder(ChatCode::new(ChatType::TellIncoming, ChatSource::OTHER))
                .content_id(content_id)
                .sender(vec![Chunk::player(name, world)])
                .content(vec![Chunk::text("psst")])
                .build(),
        )
    }

    fn tab_with(mode: UnreadMode) -> Tab {
        Tab::from_persisted(PersistedTab {
            unread_mode: mode,
            ..PersistedTab::standard("Say", ChannelFilter::for_types([ChatType::Say]))
        })
    }

    #[test]
    fn standard_tab_uses_filter() {
        let tab = tab_with(UnreadMode::All);
        assert!(tab.matches(&say()));
        assert!(!tab.matches(&tell_from("Alpha Beta", 73, 0)));
    }

    #[test]
    fn unread_modes() {
        let context = ctx(10, ChannelFilter::empty());

        let all = tab_with(UnreadMode::All);
        all.set_visible(true);
        all.add_message(say(), true, &context);
        all.add_message(say(), false, &context);
        assert_eq!(all.unread(), 1);

        let unseen = tab_with(UnreadMode::Unseen);
        unseen.set_visible(true);
        unseen.add_message(say(), true, &context);
        assert_eq!(unseen.unread(), 0);
        unseen.set_visible(false);
        unseen.add_message(say(), true, &context);
        assert_eq!(unseen.unread(), 1);

        let none = tab_with(UnreadMode::None);
        none.add_message(say(), true, &context);
        assert_eq!(none.unread(), 0);
        assert_eq!(none.messages().len(SHORT).unwrap(), 1);
    }

    #[test]
    fn mark_read_resets() {
        let tab = tab_with(UnreadMode::All);
        tab.add_message(say(), true, &ctx(10, ChannelFilter::empty()));
        tab.mark_read();
        assert_eq!(tab.unread(), 0);
    }

    #[test]
    fn activity_requires_live_and_activity_filter() {
        let tab = tab_with(UnreadMode::All);
        let quiet = ctx(10, ChannelFilter::for_types([ChatType::Shout]));
        tab.add_message(say(), true, &quiet);
        assert_eq!(tab.last_activity(), None);

        let loud = ctx(10, ChannelFilter::for_types([ChatType::Say]));
        tab.add_message(say(), false, &loud);
        assert_eq!(tab.last_activity(), None);

        tab.add_message(say(), true, &loud);
        assert!(tab.last_activity().is_some());
    }

    #[test]
    fn display_limit_comes_from_context() {
        let tab = tab_with(UnreadMode::All);
        let context = ctx(2, ChannelFilter::empty());
        for _ in 0..5 {
            tab.add_message(say(), true, &context);
        }
        assert_eq!(tab.messages().len(SHORT).unwrap(), 2);
        assert_eq!(tab.unread(), 5);
    }

    #[test]
    fn direct_message_matches_partner_only() {
        let tab = Tab::from_persisted(PersistedTab::direct_message(TellPartner {
            name: "Alpha Beta".into(),
            world_id: 73,
            content_id: 0,
        }));
        assert_eq!(tab.name(), "Alpha Beta");
        assert!(tab.matches(&tell_from("Alpha Beta", 73, 0)));
        assert!(!tab.matches(&tell_from("Alpha Beta", 74, 0)));
        assert!(!tab.matches(&tell_from("Gamma Delta", 73, 0)));
        assert!(!tab.matches(&say()));
    }

    #[test]
    fn direct_message_prefers_content_id() {
        let partner = TellPartner {
            name: "Alpha Beta".into(),
            world_id: 73,
            content_id: 99,
        };
        assert!(partner.matches(&tell_from("Renamed Person", 1, 99)));
        assert!(!partner.matches(&tell_from("Alpha Beta", 73, 100)));
        assert!(partner.matches(&tell_from("Alpha Beta", 73, 0)));
    }

    #[test]
    fn persisted_roundtrip_resets_live_state() {
        let tab = tab_with(UnreadMode::Unseen);
        tab.add_message(say(), true, &ctx(10, ChannelFilter::for_types([ChatType::Say])));
        tab.set_visible(true);

        let persisted = tab.to_persisted();
        let json = serde_json::to_string(&persisted).unwrap();
        let restored = Tab::from_persisted(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.identifier(), tab.identifier());
        assert_eq!(restored.to_persisted(), persisted);
        assert_eq!(restored.unread(), 0);
        assert_eq!(restored.last_activity(), None);
        assert!(!restored.is_visible());
        assert_eq!(restored.messages().len(SHORT).unwrap(), 0);
    }

    #[test]
    fn kind_is_persisted_as_tag() {
        let dm = PersistedTab::direct_message(TellPartner {
            name: "Alpha Beta".into(),
            world_id: 73,
            content_id: 5,
        });
        let json = serde_json::to_value(&dm).unwrap();
        assert_eq!(json["kind"], "direct_message");
        assert_eq!(json["partner"]["world_id"], 73);

        let standard = serde_json::to_value(PersistedTab::standard("General", ChannelFilter::empty()))
            .unwrap();
        assert_eq!(standard["kind"], "standard");
    }

    #[test]
    fn minimal_json_gets_defaults() {
        let tab: PersistedTab =
            serde_json::from_str(r#"{"name": "Say", "kind": "standard"}"#).unwrap();
        assert_eq!(tab.unread_mode, UnreadMode::All);
        assert!(tab.display_timestamp);
        assert!(tab.channels.is_empty());
    }

    #[test]
    fn inactivity_hiding() {
        let tab = Tab::from_persisted(PersistedTab {
            unhide_on_activity: true,
            ..PersistedTab::standard("Say", ChannelFilter::for_types([ChatType::Say]))
        });
        let hide_after = Duration::from_secs(60);
        assert!(tab.hidden_at(hide_after, 1_000));
        assert!(!tab.hidden_at(Duration::ZERO, 1_000));

        tab.add_message(say(), true, &ctx(10, ChannelFilter::for_types([ChatType::Say])));
        let last = tab.last_activity().unwrap();
        assert!(!tab.hidden_at(hide_after, last + 59_000));
        assert!(tab.hidden_at(hide_after, last + 61_000));

        let plain = tab_with(UnreadMode::All);
        assert!(!plain.hidden_at(hide_after, u64::MAX));
    }
}
