//! XDG-style path resolution.
//!
//! - Config: `~/.config/chat-tabs/tabs.json` (or `$XDG_CONFIG_HOME/chat-tabs/`)
//! - Data: `~/.local/share/chat-tabs/messages.db` (or `$XDG_DATA_HOME/chat-tabs/`)
//!
//! On Windows the `%APPDATA%` / `%LOCALAPPDATA%` conventions apply.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "chat-tabs";

fn xdg_or(var: &str, fallback: impl FnOnce() -> Option<PathBuf>, relative: &str) -> PathBuf {
    if let Ok(value) = std::env::var(var) {
        if !value.is_empty() {
            return PathBuf::from(value).join(APP_DIR);
        }
    }
    fallback().map_or_else(|| PathBuf::from(relative).join(APP_DIR), |dir| dir.join(APP_DIR))
}

/// Configuration directory for chat-tabs.
#[must_use]
pub fn config_dir() -> PathBuf {
    xdg_or(
        "XDG_CONFIG_HOME",
        || {
            #[cfg(target_os = "windows")]
            {
                dirs::config_dir()
            }
            #[cfg(not(target_os = "windows"))]
            {
                dirs::home_dir().map(|home| home.join(".config"))
            }
        },
        ".config",
    )
}

/// Data directory for chat-tabs (message database).
#[must_use]
pub fn data_dir() -> PathBuf {
    xdg_or(
        "XDG_DATA_HOME",
        || {
            #[cfg(target_os = "windows")]
            {
                dirs::data_local_dir()
            }
            #[cfg(not(target_os = "windows"))]
            {
                dirs::home_dir().map(|home| home.join(".local").join("share"))
            }
        },
        ".local/share",
    )
}

/// Default tab configuration file.
#[must_use]
pub fn tabs_config_path() -> PathBuf {
    config_dir().join("tabs.json")
}

/// Default message database.
#[must_use]
pub fn database_path() -> PathBuf {
    data_dir().join("messages.db")
}

/// Write `content` to a sibling temp file, then rename it over `path`.
///
/// # Errors
///
/// Propagates any I/O failure; the original file is left untouched.
pub fn write_file_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}
