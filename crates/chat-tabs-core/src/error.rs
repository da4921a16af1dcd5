//! Error types for chat-tabs
//!
//! Every failure in the routing core degrades to "skip and continue": callers
//! log these and keep chat flowing. Nothing here is meant to reach the user.

use thiserror::Error;

/// Result type alias for chat-tabs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chat-tabs
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Concurrency
    // ==========================================================================
    /// A bounded-wait acquisition of a message list did not succeed in time.
    /// Callers skip the operation for this cycle; this is never "empty".
    #[error("Lock not acquired within {waited_ms}ms")]
    LockTimeout { waited_ms: u64 },

    // ==========================================================================
    // Persistence
    // ==========================================================================
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),

    // ==========================================================================
    // Input / configuration
    // ==========================================================================
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==========================================================================
    // Internal Errors
    // ==========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error type string (for logs and CLI output)
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::MalformedInput(_) => "MALFORMED_INPUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "OS_ERROR",
            Self::Serialization(_) => "TYPE_ERROR",
            Self::Internal(_) => "UNHANDLED_EXCEPTION",
        }
    }

    /// Returns whether the error is recoverable (the operation can simply be
    /// retried on a later cycle)
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::StoreUnavailable(_) | Self::Io(_)
        )
    }
}
