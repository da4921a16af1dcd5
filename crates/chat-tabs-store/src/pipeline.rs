//! The owner-side chat pipeline.
//!
//! [`ChatPipeline`] is driven from one owning context (the frame loop in the
//! overlay, `main` in the CLI). Live messages are routed synchronously and
//! handed to the persist queue. History loads run on a worker thread and post
//! a [`PipelineEvent`] back; the owner applies it in [`ChatPipeline::pump`].
//! Every load is tagged with the registry generation it was requested for,
//! and results for an older generation are dropped.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use chat_tabs_core::{
    ChannelFilter, Config, DispatchOutcome, Error, HistoryQuery, LockLevel, Message,
    MessageStore, OrderedMutex, PersistedTab, Router, Tab, TabRegistry, TabsConfig,
};

use crate::persist_queue::{EnqueueResult, PersistQueue, PersistStats};

/// Work finished in the background, waiting to be applied by the owner.
#[derive(Debug)]
pub enum PipelineEvent {
    BackfillReady {
        generation: u64,
        messages: Vec<Arc<Message>>,
    },
    BackfillFailed {
        generation: u64,
        error: Error,
    },
}

impl PipelineEvent {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::BackfillReady { generation, .. } | Self::BackfillFailed { generation, .. } => {
                *generation
            }
        }
    }
}

/// What one [`ChatPipeline::pump`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Backfills merged into the current tabs.
    pub applied: usize,
    /// Events for a tab set that has since been replaced.
    pub stale: usize,
    /// Backfills whose store read failed.
    pub failed: usize,
}

impl PumpReport {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.applied == 0 && self.stale == 0 && self.failed == 0
    }
}

pub struct ChatPipeline {
    config: Config,
    registry: TabRegistry,
    router: Router,
    inactivity_activity: ChannelFilter,
    store: Option<Arc<dyn MessageStore>>,
    persist: Option<PersistQueue>,
    events_tx: Sender<PipelineEvent>,
    events_rx: OrderedMutex<Receiver<PipelineEvent>>,
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("generation", &self.registry.generation())
            .field("has_store", &self.store.is_some())
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}

impl ChatPipeline {
    /// Build the pipeline for `layout`. With a store present (and
    /// persistence enabled) a persist queue is started.
    ///
    /// No history is loaded here. Callers that want the startup backfill
    /// call [`request_backfill`](Self::request_backfill) once the pipeline
    /// is wired up, then pump events as usual.
    ///
    /// # Errors
    ///
    /// Fails only if the persist drain thread cannot be spawned.
    pub fn new(
        config: Config,
        layout: TabsConfig,
        store: Option<Arc<dyn MessageStore>>,
    ) -> chat_tabs_core::Result<Self> {
        let router = Router::new(config.routing_context(layout.inactivity_activity.clone()));
        let registry = TabRegistry::from_persisted(layout.tabs);
        let persist = match &store {
            Some(store) if config.persist_enabled => Some(PersistQueue::start(
                Arc::clone(store),
                config.persist_queue_capacity,
            )?),
            _ => None,
        };
        let (events_tx, events_rx) = mpsc::channel();
        tracing::info!(
            tabs = registry.current().len(),
            persist = persist.is_some(),
            display_limit = config.display_limit,
            "chat pipeline ready"
        );
        Ok(Self {
            config,
            registry,
            router,
            inactivity_activity: layout.inactivity_activity,
            store,
            persist,
            events_tx,
            events_rx: OrderedMutex::new(LockLevel::PipelineEvents, events_rx),
        })
    }

    /// Route one live message to every matching tab, then queue it for
    /// persistence. Unrouted messages are still persisted.
    pub fn ingest(&self, message: Message) -> DispatchOutcome {
        let message = Arc::new(message);
        let tabs = self.registry.current();
        let outcome = self.router.dispatch(&tabs, &message);
        if outcome.is_unrouted() {
            tracing::debug!(id = %message.id(), code = message.code().raw(), "no tab matched");
        }

        if let Some(persist) = &self.persist {
            match persist.enqueue(message) {
                EnqueueResult::Enqueued => {}
                EnqueueResult::QueueFull => {
                    tracing::warn!("persist queue full, message not stored");
                }
                EnqueueResult::Unavailable => {
                    tracing::warn!("persist queue unavailable, message not stored");
                }
            }
        }
        outcome
    }

    /// Install a new tab layout and start loading history into it. Returns
    /// the new generation.
    pub fn reconfigure(&self, tabs: Vec<PersistedTab>) -> u64 {
        let generation = self
            .registry
            .replace(tabs.into_iter().map(Tab::from_persisted).collect());
        self.request_backfill();
        generation
    }

    /// Load recent history on a worker thread for the current tab set.
    /// Returns the generation the load is tagged with, or `None` when there
    /// is nothing to load from.
    pub fn request_backfill(&self) -> Option<u64> {
        let store = Arc::clone(self.store.as_ref()?);
        let limit = self.config.backfill_limit;
        if limit == 0 {
            return None;
        }
        let generation = self.registry.generation();
        let events = self.events_tx.clone();

        let spawned = std::thread::Builder::new()
            .name("chat-tabs-backfill".into())
            .spawn(move || {
                let event = match store.query_recent(&HistoryQuery::recent(limit)) {
                    Ok(messages) => PipelineEvent::BackfillReady {
                        generation,
                        messages: messages.into_iter().map(Arc::new).collect(),
                    },
                    Err(error) => PipelineEvent::BackfillFailed { generation, error },
                };
                // The pipeline may be gone already; nothing left to do then.
                let _ = events.send(event);
            });

        match spawned {
            Ok(_) => {
                tracing::debug!(generation, limit, "backfill requested");
                Some(generation)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn backfill thread");
                None
            }
        }
    }

    /// Apply every background result that has arrived, without blocking.
    pub fn pump(&self) -> PumpReport {
        let events: Vec<PipelineEvent> = self.events_rx.lock().try_iter().collect();
        self.apply(events)
    }

    /// Like [`pump`](Self::pump), but wait up to `timeout` for the first
    /// event if none is pending.
    pub fn wait_for_events(&self, timeout: Duration) -> PumpReport {
        let events: Vec<PipelineEvent> = {
            let rx = self.events_rx.lock();
            match rx.recv_timeout(timeout) {
                Ok(first) => std::iter::once(first).chain(rx.try_iter()).collect(),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Vec::new(),
            }
        };
        self.apply(events)
    }

    fn apply(&self, events: Vec<PipelineEvent>) -> PumpReport {
        let mut report = PumpReport::default();
        for event in events {
            let (tabs, current) = self.registry.current_with_generation();
            if event.generation() != current {
                tracing::info!(
                    requested = event.generation(),
                    current,
                    "discarding stale backfill"
                );
                report.stale += 1;
                continue;
            }
            match event {
                PipelineEvent::BackfillReady { messages, .. } => {
                    let inserted = self.router.backfill(&tabs, &messages);
                    tracing::info!(
                        generation = current,
                        loaded = messages.len(),
                        inserted,
                        "backfill applied"
                    );
                    report.applied += 1;
                }
                PipelineEvent::BackfillFailed { error, .. } => {
                    tracing::warn!(
                        error = %error,
                        error_type = error.error_type(),
                        "backfill failed"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Empty every tab's message list.
    pub fn clear_all_tabs(&self) {
        self.router.clear_all(&self.registry.current());
    }

    #[must_use]
    pub fn tabs(&self) -> Arc<[Arc<Tab>]> {
        self.registry.current()
    }

    /// Tabs not currently hidden for inactivity.
    #[must_use]
    pub fn visible_tabs(&self) -> Vec<Arc<Tab>> {
        let hide_after = self.config.inactivity_hide_after;
        self.registry
            .current()
            .iter()
            .filter(|tab| !tab.is_hidden_by_inactivity(hide_after))
            .cloned()
            .collect()
    }

    #[must_use]
    pub const fn registry(&self) -> &TabRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The current layout, ready to be saved.
    #[must_use]
    pub fn layout(&self) -> TabsConfig {
        TabsConfig {
            tabs: self.registry.persisted(),
            inactivity_activity: self.inactivity_activity.clone(),
            ..TabsConfig::default()
        }
    }

    #[must_use]
    pub fn persist_stats(&self) -> Option<PersistStats> {
        self.persist.as_ref().map(PersistQueue::stats)
    }

    /// Wait until every message ingested so far has reached the store.
    pub fn flush(&self) {
        if let Some(persist) = &self.persist {
            persist.flush();
        }
    }

    /// Flush and stop the persist queue. Further ingests still route.
    pub fn shutdown(&self) {
        if let Some(persist) = &self.persist {
            persist.shutdown();
        }
    }
}
