//! Message routing core for the chat-tabs overlay.
//!
//! This crate provides:
//! - The chat message model (`Message`, `ChatCode`, `Chunk`)
//! - Bounded, deduplicated per-tab message lists with timed reads
//! - Tabs, channel filters and the router that fans messages out to them
//! - The persistent store boundary (`MessageStore`) and an in-memory store
//! - Configuration (environment and persisted tab layout) and common errors

#![forbid(unsafe_code)]

pub mod chat_code;
pub mod chunk;
pub mod config;
pub mod error;
pub mod filter;
pub mod lock_order;
pub mod message;
pub mod message_list;
pub mod paths;
pub mod registry;
pub mod router;
pub mod store;
pub mod tab;
pub mod timestamps;

#[cfg(test)]
mod proptest_generators;

// Re-export key types for convenience
pub use chat_code::{ChatCode, ChatSource, ChatType};
pub use chunk::{Chunk, ChunkKind, ChunkLink, chunks_to_text};
pub use config::{Config, TabsConfig};
pub use error::{Error, Result};
pub use filter::ChannelFilter;
pub use lock_order::{LockLevel, OrderedMutex, OrderedRwLock};
pub use message::{Message, MessageBuilder};
pub use message_list::{LockTimeout, MessageList, ReadOnlyView};
pub use registry::TabRegistry;
pub use router::{DispatchOutcome, Router, RoutingContext};
pub use store::{HistoryQuery, InMemoryStore, MessageStore};
pub use tab::{PersistedTab, Tab, TabKind, TellPartner, UnreadMode};
