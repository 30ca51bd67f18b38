use rusqlite::Connection;

use crate::error::Result;

/// Initialise the `sessions` / `session_messages` tables. Safe to call on
/// every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            chat_id       TEXT PRIMARY KEY,
            message_count INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_messages (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id       TEXT NOT NULL,
            role          TEXT NOT NULL,
            content       TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_session_messages_chat
            ON session_messages(chat_id, created_at_ms, id);",
    )?;
    Ok(())
}
