use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS outbound_ledger (
            id                       INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id                  TEXT NOT NULL,
            ref_key                  TEXT,
            text                     TEXT NOT NULL,
            sent_at_ms               INTEGER NOT NULL,
            is_group                 INTEGER NOT NULL DEFAULT 0,
            primary_channel_user_id  TEXT,
            person_id                TEXT,
            message_type             TEXT NOT NULL DEFAULT 'reactive',
            got_reply                INTEGER NOT NULL DEFAULT 0,
            refinement               INTEGER NOT NULL DEFAULT 0,
            lesson_logged            INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_outbound_chat
            ON outbound_ledger(chat_id, sent_at_ms DESC);
        CREATE INDEX IF NOT EXISTS idx_outbound_window
            ON outbound_ledger(sent_at_ms);",
    )?;
    Ok(())
}
