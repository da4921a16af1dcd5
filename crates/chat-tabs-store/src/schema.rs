//! Database schema and migrations.
//!
//! Versions are tracked in `PRAGMA user_version`.

use rusqlite::Connection;

use crate::error::StoreResult;

pub const SCHEMA_VERSION: i64 = 1;

/// Dates are microseconds since the Unix epoch. Sender and content are JSON
/// arrays of chunks. `partner_*` mirror the first player link of a tell so
/// world lookups do not need to parse JSON.
const CREATE_V1: &str = r"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    receiver INTEGER NOT NULL,
    content_id INTEGER NOT NULL DEFAULT 0,
    date INTEGER NOT NULL,
    code INTEGER NOT NULL,
    sender TEXT NOT NULL,
    content TEXT NOT NULL,
    extra_chat_channel TEXT,
    partner_name TEXT,
    partner_world INTEGER,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_messages_receiver_date ON messages(receiver, date);
CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date);
CREATE INDEX IF NOT EXISTS idx_messages_partner ON messages(partner_name, date);
";

/// Bring `conn` up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &Connection) -> StoreResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(CREATE_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tracing::info!(from = version, to = SCHEMA_VERSION, "migrated message schema");
    }
    Ok(())
}
