//! The current tab set.
//!
//! Tabs are replaced wholesale: a reconfiguration builds new [`Tab`] objects
//! and swaps them in, bumping the generation. Holders of the old slice keep
//! working against the old objects until they drop them.

use std::sync::Arc;

use uuid::Uuid;

use crate::lock_order::{LockLevel, OrderedRwLock};
use crate::tab::{PersistedTab, Tab};

#[derive(Debug)]
struct Installed {
    tabs: Arc<[Arc<Tab>]>,
    generation: u64,
}

#[derive(Debug)]
pub struct TabRegistry {
    inner: OrderedRwLock<Installed>,
}

impl Default for TabRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TabRegistry {
    #[must_use]
    pub fn new(tabs: Vec<Tab>) -> Self {
        Self {
            inner: OrderedRwLock::new(
                LockLevel::TabRegistry,
                Installed {
                    tabs: tabs.into_iter().map(Arc::new).collect(),
                    generation: 0,
                },
            ),
        }
    }

    #[must_use]
    pub fn from_persisted(tabs: Vec<PersistedTab>) -> Self {
        Self::new(tabs.into_iter().map(Tab::from_persisted).collect())
    }

    /// The installed tabs in configured order.
    #[must_use]
    pub fn current(&self) -> Arc<[Arc<Tab>]> {
        Arc::clone(&self.inner.read().tabs)
    }

    /// Current tabs plus the generation they belong to, read atomically.
    #[must_use]
    pub fn current_with_generation(&self) -> (Arc<[Arc<Tab>]>, u64) {
        let installed = self.inner.read();
        (Arc::clone(&installed.tabs), installed.generation)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Install a new tab set. Returns the new generation.
    pub fn replace(&self, tabs: Vec<Tab>) -> u64 {
        let tabs: Arc<[Arc<Tab>]> = tabs.into_iter().map(Arc::new).collect();
        let count = tabs.len();
        let generation = {
            let mut installed = self.inner.write();
            installed.tabs = tabs;
            installed.generation += 1;
            installed.generation
        };
        tracing::info!(generation, tabs = count, "tab set replaced");
        generation
    }

    #[must_use]
    pub fn find(&self, identifier: Uuid) -> Option<Arc<Tab>> {
        self.current()
            .iter()
            .find(|tab| tab.identifier() == identifier)
            .cloned()
    }

    /// Configuration of every installed tab.
    #[must_use]
    pub fn persisted(&self) -> Vec<PersistedTab> {
        self.current().iter().map(|tab| tab.to_persisted()).collect()
    }
}
