use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::instrument;

use crate::error::Result;
use crate::types::{MessageType, NewSend, OutboundRow};

/// Records every message the agent sends, independent of channel, so the
/// feedback tracker and the proactive scheduler can both read off it
/// without coupling to `SessionStore` or a specific channel adapter.
pub struct OutboundLedger {
    db: Mutex<Connection>,
}

impl OutboundLedger {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    #[instrument(skip(self, send), fields(chat_id = %send.chat_id, message_type = ?send.message_type))]
    pub fn record_send(&self, send: NewSend) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO outbound_ledger
             (chat_id, ref_key, text, sent_at_ms, is_group, primary_channel_user_id,
              person_id, message_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                send.chat_id,
                send.ref_key,
                send.text,
                send.sent_at_ms,
                send.is_group as i64,
                send.primary_channel_user_id,
                send.person_id,
                send.message_type.as_str(),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Marks the nearest preceding unanswered row from `chat_id` as
    /// `got_reply = true`. When `ref_key` is supplied it narrows the match
    /// to that exact send; otherwise the most recent unanswered send in
    /// the chat is used.
    #[instrument(skip(self), fields(chat_id, ref_key, timestamp_ms))]
    pub fn on_incoming_reply(&self, chat_id: &str, ref_key: Option<&str>, timestamp_ms: i64) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let id: Option<i64> = match ref_key {
            Some(key) => db
                .query_row(
                    "SELECT id FROM outbound_ledger
                     WHERE chat_id = ?1 AND ref_key = ?2 AND sent_at_ms <= ?3
                     ORDER BY sent_at_ms DESC LIMIT 1",
                    params![chat_id, key, timestamp_ms],
                    |r| r.get(0),
                )
                .ok(),
            None => db
                .query_row(
                    "SELECT id FROM outbound_ledger
                     WHERE chat_id = ?1 AND got_reply = 0 AND sent_at_ms <= ?2
                     ORDER BY sent_at_ms DESC LIMIT 1",
                    params![chat_id, timestamp_ms],
                    |r| r.get(0),
                )
                .ok(),
        };

        match id {
            Some(id) => {
                db.execute("UPDATE outbound_ledger SET got_reply = 1 WHERE id = ?1", params![id])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Candidate sends for a follow-up: unanswered, within the window,
    /// newest first.
    #[instrument(skip(self), fields(min_sent_at_ms, max_sent_at_ms, limit))]
    pub fn list_unanswered_in_window(
        &self,
        min_sent_at_ms: i64,
        max_sent_at_ms: i64,
        limit: usize,
    ) -> Result<Vec<OutboundRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, chat_id, ref_key, text, sent_at_ms, is_group, primary_channel_user_id,
                    person_id, message_type, got_reply, refinement, lesson_logged
             FROM outbound_ledger
             WHERE got_reply = 0 AND sent_at_ms BETWEEN ?1 AND ?2
             ORDER BY sent_at_ms DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![min_sent_at_ms, max_sent_at_ms, limit as i64], row_to_outbound)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Per-chat count of unanswered sends within the window — used by the
    /// scheduler's follow-up-candidate gate ("fewer than 2 outstanding").
    pub fn count_unanswered_for_chat(&self, chat_id: &str, min_sent_at_ms: i64, max_sent_at_ms: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT COUNT(*) FROM outbound_ledger
             WHERE chat_id = ?1 AND got_reply = 0 AND sent_at_ms BETWEEN ?2 AND ?3",
            params![chat_id, min_sent_at_ms, max_sent_at_ms],
            |r| r.get(0),
        )
        .map_err(Into::into)
    }

    pub fn mark_refinement(&self, ref_key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("UPDATE outbound_ledger SET refinement = 1 WHERE ref_key = ?1", params![ref_key])?;
        Ok(())
    }

    pub fn mark_lesson_logged(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("UPDATE outbound_ledger SET lesson_logged = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Most recent send timestamp for a chat, if any — used by the
    /// heartbeat's per-tier minimum-interval check.
    pub fn last_send_ms_for_chat(&self, chat_id: &str) -> Result<Option<i64>> {
        use rusqlite::OptionalExtension;
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT sent_at_ms FROM outbound_ledger WHERE chat_id = ?1 ORDER BY sent_at_ms DESC LIMIT 1",
                params![chat_id],
                |r| r.get(0),
            )
            .optional()?)
    }
}

fn row_to_outbound(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboundRow> {
    let mt: String = row.get(8)?;
    Ok(OutboundRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        ref_key: row.get(2)?,
        text: row.get(3)?,
        sent_at_ms: row.get(4)?,
        is_group: row.get::<_, i64>(5)? != 0,
        primary_channel_user_id: row.get(6)?,
        person_id: row.get(7)?,
        message_type: MessageType::parse(&mt),
        got_reply: row.get::<_, i64>(9)? != 0,
        refinement: row.get::<_, i64>(10)? != 0,
        lesson_logged: row.get::<_, i64>(11)? != 0,
    })
}
