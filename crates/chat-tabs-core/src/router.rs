//! Message routing across tabs.
//!
//! The router holds no tab list of its own: every call gets the tab set the
//! caller currently has, in configured order. Fan-out is intentional; one
//! message normally lands in several tabs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::filter::ChannelFilter;
use crate::message::Message;
use crate::tab::Tab;

/// Default per-tab display limit.
pub const DEFAULT_DISPLAY_LIMIT: usize = 10_000;

/// Settings shared by every tab during routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    /// Maximum messages kept per tab.
    pub display_limit: usize,
    /// Global activity predicate for unhide-on-activity tabs.
    pub activity: ChannelFilter,
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self {
            display_limit: DEFAULT_DISPLAY_LIMIT,
            activity: ChannelFilter::empty(),
        }
    }
}

/// Result of routing one live message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Tabs whose predicate accepted the message.
    pub matched_tabs: usize,
    /// Tabs that did not already hold it.
    pub inserted: usize,
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_unrouted(&self) -> bool {
        self.matched_tabs == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    ctx: Arc<RoutingContext>,
}

impl Router {
    #[must_use]
    pub fn new(ctx: RoutingContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    #[must_use]
    pub fn context(&self) -> &RoutingContext {
        &self.ctx
    }

    /// Route a live message into every matching tab, counting it as unread.
    pub fn dispatch(&self, tabs: &[Arc<Tab>], message: &Arc<Message>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for tab in tabs.iter().filter(|tab| tab.matches(message)) {
            outcome.matched_tabs += 1;
            if tab.add_message(Arc::clone(message), true, &self.ctx) {
                outcome.inserted += 1;
            }
        }
        if outcome.is_unrouted() {
            tracing::debug!(id = %message.id(), code = message.code().raw(), "message matched no tab");
        } else {
            tracing::debug!(
                id = %message.id(),
                matched = outcome.matched_tabs,
                inserted = outcome.inserted,
                "message routed"
            );
        }
        outcome
    }

    /// Load historical messages into every tab they match. Never counts as
    /// unread or activity. Returns the total number of insertions.
    pub fn backfill(&self, tabs: &[Arc<Tab>], messages: &[Arc<Message>]) -> usize {
        let mut total = 0;
        for tab in tabs {
            let matching: Vec<Arc<Message>> = messages
                .iter()
                .filter(|message| tab.matches(message))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            let inserted = tab
                .messages()
                .add_sort_prune(matching, self.ctx.display_limit);
            tracing::debug!(tab = tab.name(), inserted, "backfilled tab");
            total += inserted;
        }
        total
    }

    pub fn clear_all(&self, tabs: &[Arc<Tab>]) {
        for tab in tabs {
            tab.messages().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_code::{ChatCode, ChatSource, ChatType};
    use crate::chunk::Chunk;
    use crate::timestamps::micros_to_datetime;
    use std::time::Duration;

    const SHORT: Duration = Duration::from_millis(20);

    fn line(chat_type: ChatType, micros: i64) -> Arc<Message> {
        Arc::new(
            Message::builder(ChatCode::new(chat_type, ChatSource::OTHER))
                .date(micros_to_datetime(micros))
                .content(vec![Chunk::text("x")])
                .build(),
        )
    }

    fn tabs() -> Vec<Arc<Tab>> {
        vec![
            Arc::new(Tab::new(
                "General",
                ChannelFilter::for_types([ChatType::Say, ChatType::Shout]),
            )),
            Arc::new(Tab::new("Say", ChannelFilter::for_types([ChatType::Say]))),
        ]
    }

    #[test]
    fn dispatch_fans_out() {
        let router = Router::default();
        let tabs = tabs();
        let outcome = router.dispatch(&tabs, &line(ChatType::Say, 1));
        assert_eq!(outcome, DispatchOutcome { matched_tabs: 2, inserted: 2 });

        let outcome = router.dispatch(&tabs, &line(ChatType::Shout, 2));
        assert_eq!(outcome.matched_tabs, 1);
        assert_eq!(tabs[1].messages().len(SHORT).unwrap(), 1);
    }

    #[test]
    fn redelivery_matches_but_does_not_insert() {
        let router = Router::default();
        let tabs = tabs();
        let msg = line(ChatType::Say, 1);
        router.dispatch(&tabs, &msg);
        let again = router.dispatch(&tabs, &msg);
        assert_eq!(again, DispatchOutcome { matched_tabs: 2, inserted: 0 });
    }

    #[test]
    fn zero_display_limit_matches_without_inserting() {
        let router = Router::new(RoutingContext {
            display_limit: 0,
            activity: ChannelFilter::empty(),
        });
        let tabs = tabs();
        let outcome = router.dispatch(&tabs, &line(ChatType::Say, 1));
        assert_eq!(outcome, DispatchOutcome { matched_tabs: 2, inserted: 0 });
        assert!(tabs.iter().all(|t| t.messages().len(SHORT).unwrap() == 0));
    }

    #[test]
    fn unmatched_is_dropped() {
        let router = Router::default();
        let tabs = tabs();
        assert!(router.dispatch(&tabs, &line(ChatType::Party, 1)).is_unrouted());
        assert!(tabs.iter().all(|t| t.messages().len(SHORT).unwrap() == 0));
    }

    #[test]
    fn backfill_sorts_and_skips_unread() {
        let router = Router::default();
        let tabs = tabs();
        router.dispatch(&tabs, &line(ChatType::Say, 50));
        let history = vec![line(ChatType::Shout, 30), line(ChatType::Say, 10)];
        assert_eq!(router.backfill(&tabs, &history), 3);

        let general: Vec<i64> = tabs[0]
            .messages()
            .snapshot(SHORT)
            .unwrap()
            .iter()
            .map(|m| m.date().timestamp_micros())
            .collect();
        assert_eq!(general, [10, 30, 50]);
        assert_eq!(tabs[0].unread(), 1);
    }

    #[test]
    fn clear_all_empties_every_tab() {
        let router = Router::default();
        let tabs = tabs();
        router.dispatch(&tabs, &line(ChatType::Say, 1));
        router.clear_all(&tabs);
        assert!(tabs.iter().all(|t| t.messages().len(SHORT).unwrap() == 0));
    }
}
