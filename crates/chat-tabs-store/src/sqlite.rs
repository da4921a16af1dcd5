//! SQLite-backed message history.
//!
//! One connection per store, guarded by an [`OrderedMutex`] at
//! [`LockLevel::StoreConnection`]. Callers on the UI side never touch this
//! directly: writes arrive through the persist queue and reads through the
//! pipeline's backfill thread.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use chat_tabs_core::timestamps::{datetime_to_micros, micros_to_datetime};
use chat_tabs_core::{
    ChatCode, Chunk, HistoryQuery, LockLevel, Message, MessageStore, OrderedMutex,
};

use crate::error::{StoreError, StoreResult};
use crate::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UPSERT_SQL: &str = r"
INSERT INTO messages (
    id, receiver, content_id, date, code, sender, content,
    extra_chat_channel, partner_name, partner_world
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(id) DO UPDATE SET
    receiver = excluded.receiver,
    content_id = excluded.content_id,
    date = excluded.date,
    code = excluded.code,
    sender = excluded.sender,
    content = excluded.content,
    extra_chat_channel = excluded.extra_chat_channel,
    partner_name = excluded.partner_name,
    partner_world = excluded.partner_world
";

const RECENT_SQL: &str = r"
SELECT id, receiver, content_id, date, code, sender, content, extra_chat_channel
FROM messages
WHERE deleted = 0
  AND (?1 IS NULL OR receiver = ?1)
  AND (?2 IS NULL OR date >= ?2)
ORDER BY date DESC
LIMIT ?3
";

/// SQLite stores integers as i64; ids are reinterpreted bit for bit.
const fn u64_to_sql(value: u64) -> i64 {
    i64::from_ne_bytes(value.to_ne_bytes())
}

const fn sql_to_u64(value: i64) -> u64 {
    u64::from_ne_bytes(value.to_ne_bytes())
}

/// Columns of one `messages` row before decoding.
struct RawRow {
    id: String,
    receiver: i64,
    content_id: i64,
    date: i64,
    code: i64,
    sender: String,
    content: String,
    extra_chat_channel: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            receiver: row.get(1)?,
            content_id: row.get(2)?,
            date: row.get(3)?,
            code: row.get(4)?,
            sender: row.get(5)?,
            content: row.get(6)?,
            extra_chat_channel: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<Message> {
        let id = Uuid::parse_str(&self.id).map_err(|e| StoreError::decode(&self.id, e))?;
        let code = u16::try_from(self.code)
            .map(ChatCode::from_raw)
            .map_err(|e| StoreError::decode(&self.id, e))?;
        let sender: Vec<Chunk> = serde_json::from_str(&self.sender)?;
        let content: Vec<Chunk> = serde_json::from_str(&self.content)?;
        let extra_chat_channel = self
            .extra_chat_channel
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|e| StoreError::decode(&self.id, e))?;

        Ok(Message::builder(code)
            .id(id)
            .receiver(sql_to_u64(self.receiver))
            .content_id(sql_to_u64(self.content_id))
            .date(micros_to_datetime(self.date))
            .sender(sender)
            .content(content)
            .extra_chat_channel(extra_chat_channel)
            .build())
    }
}

fn upsert(conn: &Connection, message: &Message) -> StoreResult<()> {
    let sender = serde_json::to_string(message.sender())?;
    let content = serde_json::to_string(message.content())?;
    let partner = message.tell_partner();
    conn.execute(
        UPSERT_SQL,
        params![
            message.id().to_string(),
            u64_to_sql(message.receiver()),
            u64_to_sql(message.content_id()),
            datetime_to_micros(message.date()),
            i64::from(message.code().raw()),
            sender,
            content,
            message.extra_chat_channel().map(|c| c.to_string()),
            partner.map(|(name, _)| name),
            partner.map(|(_, world)| i64::from(world)),
        ],
    )?;
    Ok(())
}

/// Message history in a single SQLite database file.
#[derive(Debug)]
pub struct SqliteMessageStore {
    conn: OrderedMutex<Connection>,
}

impl SqliteMessageStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the parent directory cannot be created or the database
    /// cannot be opened or migrated.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::migrate(&conn)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened message store");
        Ok(Self::from_connection(conn))
    }

    /// Private database that disappears when the store is dropped.
    ///
    /// # Errors
    ///
    /// Fails only if SQLite cannot allocate the database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: OrderedMutex::new(LockLevel::StoreConnection, conn),
        }
    }

    /// Upsert one message.
    ///
    /// # Errors
    ///
    /// Propagates SQLite and JSON encoding failures.
    pub fn insert(&self, message: &Message) -> StoreResult<()> {
        let conn = self.conn.lock();
        upsert(&conn, message)
    }

    /// Upsert a batch inside one transaction.
    ///
    /// # Errors
    ///
    /// The whole batch is rolled back on the first failure.
    pub fn insert_batch(&self, messages: &[Arc<Message>]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for message in messages {
            upsert(&tx, message)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent visible messages matching `query`, oldest first. Rows
    /// that no longer decode are skipped.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn recent(&self, query: &HistoryQuery) -> StoreResult<Vec<Message>> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let raw: Vec<RawRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(RECENT_SQL)?;
            let rows = stmt.query_map(
                params![
                    query.receiver.map(u64_to_sql),
                    query.since.map(datetime_to_micros),
                    limit
                ],
                RawRow::from_row,
            )?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut messages: Vec<Message> = raw
            .into_iter()
            .filter_map(|row| match row.decode() {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable stored message");
                    None
                }
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Number of visible messages.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// World of the most recent visible tell exchanged with `name`, if any.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn last_known_world(&self, name: &str) -> StoreResult<Option<u16>> {
        let conn = self.conn.lock();
        let world: Option<i64> = conn
            .query_row(
                r"SELECT partner_world FROM messages
                  WHERE deleted = 0 AND partner_name = ?1 AND partner_world IS NOT NULL
                  ORDER BY date DESC LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(world.and_then(|w| u16::try_from(w).ok()))
    }

    /// Permanently remove messages dated before `cutoff`. Returns the number
    /// of rows removed.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM messages WHERE date < ?1",
            params![datetime_to_micros(cutoff)],
        )?;
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "pruned stored messages");
        }
        Ok(removed)
    }

    /// Hide a message from future history reads. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Propagates SQLite failures.
    pub fn mark_deleted(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE messages SET deleted = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }
}

impl MessageStore for SqliteMessageStore {
    fn record(&self, message: &Message) -> chat_tabs_core::Result<()> {
        Ok(self.insert(message)?)
    }

    fn record_batch(&self, messages: &[Arc<Message>]) -> chat_tabs_core::Result<()> {
        Ok(self.insert_batch(messages)?)
    }

    fn query_recent(&self, query: &HistoryQuery) -> chat_tabs_core::Result<Vec<Message>> {
        Ok(self.recent(query)?)
    }
}
