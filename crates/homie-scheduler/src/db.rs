use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            kind            TEXT NOT NULL,
            subject         TEXT NOT NULL,
            chat_id         TEXT NOT NULL,
            trigger_at_ms   INTEGER NOT NULL,
            recurrence      TEXT,
            delivered       INTEGER NOT NULL DEFAULT 0,
            claim_id        TEXT,
            claim_until_ms  INTEGER,
            created_at_ms   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_due
            ON events(delivered, trigger_at_ms);
        CREATE INDEX IF NOT EXISTS idx_events_idempotency
            ON events(chat_id, kind, subject, trigger_at_ms);

        CREATE TABLE IF NOT EXISTS proactive_send_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     TEXT NOT NULL,
            is_group    INTEGER NOT NULL DEFAULT 0,
            event_id    INTEGER,
            sent_at_ms  INTEGER NOT NULL,
            ignored     INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_send_log_chat ON proactive_send_log(chat_id, sent_at_ms);
        CREATE INDEX IF NOT EXISTS idx_send_log_scope ON proactive_send_log(is_group, sent_at_ms);",
    )?;
    Ok(())
}
