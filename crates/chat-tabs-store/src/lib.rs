//! Persistence and orchestration for chat-tabs.
//!
//! - [`SqliteMessageStore`]: durable message history
//! - [`PersistQueue`]: non-blocking write-behind in front of any store
//! - [`ChatPipeline`]: live ingest, background backfill, reconfiguration

#![forbid(unsafe_code)]

pub mod error;
pub mod persist_queue;
pub mod pipeline;
pub mod schema;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use persist_queue::{EnqueueResult, PersistQueue, PersistStats};
pub use pipeline::{ChatPipeline, PipelineEvent, PumpReport};
pub use sqlite::SqliteMessageStore;
