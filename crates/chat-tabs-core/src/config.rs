//! Configuration.
//!
//! Two layers:
//! - [`Config`]: runtime knobs read from `CHAT_TABS_*` environment variables.
//! - [`TabsConfig`]: the user-editable tab layout, stored as JSON. Loading
//!   accepts JSON5 (comments, trailing commas); saving writes plain JSON.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat_code::{ChatSource, ChatType};
use crate::error::{Error, Result};
use crate::filter::ChannelFilter;
use crate::paths;
use crate::router::{DEFAULT_DISPLAY_LIMIT, RoutingContext};
use crate::tab::PersistedTab;

const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 50;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum messages kept per tab.
    pub display_limit: usize,
    /// Messages loaded from the store on startup and reconfiguration.
    pub backfill_limit: usize,
    /// Deadline for renderer reads of a tab's list.
    pub snapshot_timeout: Duration,
    pub persist_queue_capacity: usize,
    pub persist_enabled: bool,
    pub database_path: PathBuf,
    pub tabs_config_path: PathBuf,
    /// Hide unhide-on-activity tabs after this much silence; zero disables.
    pub inactivity_hide_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_limit: DEFAULT_DISPLAY_LIMIT,
            backfill_limit: 1_000,
            snapshot_timeout: Duration::from_millis(DEFAULT_SNAPSHOT_TIMEOUT_MS),
            persist_queue_capacity: 4_096,
            persist_enabled: true,
            database_path: paths::database_path(),
            tabs_config_path: paths::tabs_config_path(),
            inactivity_hide_after: Duration::ZERO,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            display_limit: env_usize("CHAT_TABS_DISPLAY_LIMIT", defaults.display_limit),
            backfill_limit: env_usize("CHAT_TABS_BACKFILL_LIMIT", defaults.backfill_limit),
            snapshot_timeout: Duration::from_millis(env_u64(
                "CHAT_TABS_SNAPSHOT_TIMEOUT_MS",
                DEFAULT_SNAPSHOT_TIMEOUT_MS,
            )),
            persist_queue_capacity: env_usize(
                "CHAT_TABS_PERSIST_QUEUE_CAPACITY",
                defaults.persist_queue_capacity,
            )
            .max(1),
            persist_enabled: env_bool("CHAT_TABS_PERSIST_ENABLED", defaults.persist_enabled),
            database_path: env_path("CHAT_TABS_DATABASE_PATH").unwrap_or(defaults.database_path),
            tabs_config_path: env_path("CHAT_TABS_CONFIG_PATH")
                .unwrap_or(defaults.tabs_config_path),
            inactivity_hide_after: Duration::from_secs(env_u64(
                "CHAT_TABS_INACTIVITY_HIDE_SECS",
                0,
            )),
        }
    }

    /// Process-wide cached configuration, parsed from the environment on
    /// first use.
    #[must_use]
    pub fn get() -> Self {
        global_config_cache_get()
    }

    /// Drop the cached configuration so the next [`Config::get`] re-reads the
    /// environment.
    pub fn reset_cached() {
        global_config_cache_reset();
    }

    /// Routing context for these settings and the given activity predicate.
    #[must_use]
    pub fn routing_context(&self, activity: ChannelFilter) -> RoutingContext {
        RoutingContext {
            display_limit: self.display_limit,
            activity,
        }
    }
}

static CONFIG_CACHE: std::sync::RwLock<Option<Config>> = std::sync::RwLock::new(None);

fn global_config_cache_get() -> Config {
    {
        let guard = CONFIG_CACHE
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(ref c) = *guard {
            return c.clone();
        }
    }
    let mut guard = CONFIG_CACHE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guard.get_or_insert_with(Config::from_env).clone()
}

fn global_config_cache_reset() {
    let mut guard = CONFIG_CACHE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = None;
}

// ---------------------------------------------------------------------------
// Tab layout
// ---------------------------------------------------------------------------

pub const TABS_CONFIG_VERSION: u32 = 1;

/// Persisted tab layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabsConfig {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub tabs: Vec<PersistedTab>,
    /// Which lines count as activity for unhide-on-activity tabs.
    #[serde(default)]
    pub inactivity_activity: ChannelFilter,
}

const fn current_version() -> u32 {
    TABS_CONFIG_VERSION
}

impl Default for TabsConfig {
    /// First-run layout: a single "General" tab with the usual player and
    /// system channels from every source.
    fn default() -> Self {
        let general = ChannelFilter::for_types(
            ChatType::ALL
                .iter()
                .copied()
                .filter(|t| t.is_general_default()),
        );
        let activity = ChannelFilter::empty()
            .with(ChatType::TellIncoming, ChatSource::all())
            .with(ChatType::Party, ChatSource::all())
            .with(ChatType::Alliance, ChatSource::all())
            .with(ChatType::FreeCompany, ChatSource::all());
        Self {
            version: TABS_CONFIG_VERSION,
            tabs: vec![PersistedTab::standard("General", general)],
            inactivity_activity: activity,
        }
    }
}

impl TabsConfig {
    /// Parse a layout. JSON5 syntax is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for syntax errors and unsupported versions.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self =
            json5::from_str(text).map_err(|e| Error::Config(format!("invalid tab layout: {e}")))?;
        if config.version > TABS_CONFIG_VERSION {
            return Err(Error::Config(format!(
                "tab layout version {} is newer than supported version {TABS_CONFIG_VERSION}",
                config.version
            )));
        }
        Ok(config)
    }

    /// Read the layout at `path`, or the default layout if the file does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns I/O errors other than not-found, and parse errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::parse(&text)?;
                tracing::info!(path = %path.display(), tabs = config.tabs.len(), "loaded tab layout");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no tab layout, using default");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pretty-printed JSON, written atomically.
    ///
    /// # Errors
    ///
    /// Returns serialization and I/O errors.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        paths::write_file_atomic(path, json.as_bytes())?;
        tracing::debug!(path = %path.display(), "saved tab layout");
        Ok(())
    }
}

// Helper functions for environment variable parsing

#[cfg(test)]
thread_local! {
    static TEST_ENV_OVERRIDES: std::cell::RefCell<std::collections::HashMap<String, String>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

/// Read a value from the process environment.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    #[cfg(test)]
    if let Some(v) = TEST_ENV_OVERRIDES.with(|cell| cell.borrow().get(key).cloned()) {
        return Some(v);
    }
    env::var(key).ok()
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => true,
        "0" | "false" | "f" | "no" | "n" | "off" => false,
        _ => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key).map_or(default, |v| parse_bool(&v, default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_value(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tab::{TabKind, TellPartner};

    struct TestEnvOverrideGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl TestEnvOverrideGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let mut previous = Vec::new();
            TEST_ENV_OVERRIDES.with(|cell| {
                let mut map = cell.borrow_mut();
                for (key, value) in vars {
                    let old = map.get(*key).cloned();
                    previous.push(((*key).to_string(), old));
                    map.insert((*key).to_string(), (*value).to_string());
                }
            });
            Self { previous }
        }
    }

    impl Drop for TestEnvOverrideGuard {
        fn drop(&mut self) {
            TEST_ENV_OVERRIDES.with(|cell| {
                let mut map = cell.borrow_mut();
                for (key, value) in self.previous.drain(..) {
                    match value {
                        Some(v) => {
                            map.insert(key, v);
                        }
                        None => {
                            map.remove(&key);
                        }
                    }
                }
            });
        }
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = TestEnvOverrideGuard::set(&[
            ("CHAT_TABS_DISPLAY_LIMIT", "250"),
            ("CHAT_TABS_SNAPSHOT_TIMEOUT_MS", "5"),
            ("CHAT_TABS_PERSIST_ENABLED", "off"),
            ("CHAT_TABS_DATABASE_PATH", "/tmp/chat.db"),
            ("CHAT_TABS_INACTIVITY_HIDE_SECS", "90"),
        ]);
        let config = Config::from_env();
        assert_eq!(config.display_limit, 250);
        assert_eq!(config.snapshot_timeout, Duration::from_millis(5));
        assert!(!config.persist_enabled);
        assert_eq!(config.database_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.inactivity_hide_after, Duration::from_secs(90));
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let _guard = TestEnvOverrideGuard::set(&[
            ("CHAT_TABS_DISPLAY_LIMIT", "lots"),
            ("CHAT_TABS_PERSIST_ENABLED", "maybe"),
            ("CHAT_TABS_PERSIST_QUEUE_CAPACITY", "0"),
            ("CHAT_TABS_CONFIG_PATH", "  "),
        ]);
        let config = Config::from_env();
        let defaults = Config::default();
        assert_eq!(config.display_limit, defaults.display_limit);
        assert!(config.persist_enabled);
        assert_eq!(config.persist_queue_capacity, 1);
        assert_eq!(config.tabs_config_path, defaults.tabs_config_path);
    }

    #[test]
    fn routing_context_uses_display_limit() {
        let config = Config {
            display_limit: 3,
            ..Config::default()
        };
        assert_eq!(config.routing_context(ChannelFilter::empty()).display_limit, 3);
    }

    #[test]
    fn default_layout_has_general_tab() {
        let layout = TabsConfig::default();
        assert_eq!(layout.tabs.len(), 1);
        let general = &layout.tabs[0];
        assert_eq!(general.name, "General");
        assert_eq!(general.kind, TabKind::Standard);
        assert_eq!(
            general.channels.chat_codes.get(&ChatType::Say),
            Some(&ChatSource::all())
        );
        assert!(!general.channels.chat_codes.contains_key(&ChatType::Damage));
    }

    #[test]
    fn parse_accepts_json5() {
        let text = r#"{
            // hand-edited
            version: 1,
            tabs: [
                { name: "Say", kind: "standard", channels: { chat_codes: { "Say": "SELF | OTHER" } } },
                { name: "Alpha", kind: "direct_message",
                  partner: { name: "Alpha Beta", world_id: 73 }, },
            ],
        }"#;
        let layout = TabsConfig::parse(text).unwrap();
        assert_eq!(layout.tabs.len(), 2);
        assert_eq!(
            layout.tabs[0].channels.chat_codes[&ChatType::Say],
            ChatSource::SELF | ChatSource::OTHER
        );
        assert_eq!(
            layout.tabs[1].kind,
            TabKind::DirectMessage {
                partner: TellPartner {
                    name: "Alpha Beta".into(),
                    world_id: 73,
                    content_id: 0,
                }
            }
        );
    }

    #[test]
    fn parse_rejects_future_version() {
        let err = TabsConfig::parse(r#"{"version": 99, "tabs": []}"#).unwrap_err();
        assert_eq!(err.error_type(), "CONFIG_ERROR");
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabs.json");
        let layout = TabsConfig::default();
        layout.save(&path).unwrap();
        assert_eq!(TabsConfig::load_or_default(&path).unwrap(), layout);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TabsConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(layout.tabs[0].name, "General");
    }
}
