//! Error types for the message store.

use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be turned back into a message.
    #[error("Undecodable row {id}: {message}")]
    Decode { id: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn decode(id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            id: id.into(),
            message: message.to_string(),
        }
    }
}

impl From<StoreError> for chat_tabs_core::Error {
    fn from(value: StoreError) -> Self {
        Self::StoreUnavailable(value.to_string())
    }
}
