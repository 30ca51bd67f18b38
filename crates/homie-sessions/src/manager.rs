use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::types::{NewMessage, Role, SessionMessage, PERSONA_REMINDER_HEADER, SUMMARY_HEADER};

/// Token estimation ratio shared with the rest of the crate family: roughly
/// 4 characters per token, rounded up. Good enough for budget decisions,
/// never shown to a user as an exact count.
fn estimate_tokens_from_chars(chars: i64) -> i64 {
    (chars + 3) / 4
}

/// Append-only per-chat message log with token-budget-triggered compaction.
///
/// Wraps a single SQLite connection in a `Mutex`, matching the rest of the
/// store crates in this workspace — a connection pool is unnecessary at
/// Homie's single-process scale.
pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert one message row, upserting the parent `sessions` row in the
    /// same transaction.
    #[instrument(skip(self, msg), fields(chat_id = %msg.chat_id, role = ?msg.role))]
    pub fn append_message(&self, msg: NewMessage) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        tx.execute(
            "INSERT INTO sessions (chat_id, message_count, created_at_ms, updated_at_ms)
             VALUES (?1, 1, ?2, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET
                message_count = message_count + 1,
                updated_at_ms = excluded.updated_at_ms",
            params![msg.chat_id, msg.created_at_ms],
        )?;

        tx.execute(
            "INSERT INTO session_messages (chat_id, role, content, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![msg.chat_id, msg.role.as_str(), msg.content, msg.created_at_ms],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// The last `limit` messages for a chat, oldest first.
    #[instrument(skip(self), fields(chat_id, limit))]
    pub fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<SessionMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, chat_id, role, content, created_at_ms
             FROM session_messages
             WHERE chat_id = ?1
             ORDER BY created_at_ms DESC, id DESC
             LIMIT ?2",
        )?;
        let mut rows: Vec<SessionMessage> = stmt
            .query_map(params![chat_id, limit as i64], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    /// `ceil(total_chars / 4)` over every row currently stored for the chat.
    #[instrument(skip(self), fields(chat_id))]
    pub fn estimate_tokens(&self, chat_id: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        estimate_tokens_locked(&db, chat_id)
    }

    /// Summarize and collapse the oldest part of a chat's history once it
    /// crosses the configured token budget.
    ///
    /// Returns `Ok(false)` whenever no mutation happened — not enough
    /// history, budget not yet exceeded, an unsafe window size, or the
    /// `summarize` callback declining to produce a summary. The caller is
    /// expected to treat `false` as "nothing to do", not as an error.
    #[instrument(skip(self, summarize), fields(chat_id, max_tokens, force))]
    pub fn compact_if_needed<F>(
        &self,
        chat_id: &str,
        max_tokens: i64,
        persona_reminder: &str,
        force: bool,
        summarize: F,
    ) -> Result<bool>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let mut db = self.db.lock().unwrap();

        let total_count: i64 = db.query_row(
            "SELECT COUNT(*) FROM session_messages WHERE chat_id = ?1",
            params![chat_id],
            |r| r.get(0),
        )?;
        if total_count < 8 {
            return Ok(false);
        }

        let estimated = estimate_tokens_locked(&db, chat_id)?;
        if !(force || (estimated as f64) > 0.8 * max_tokens as f64) {
            return Ok(false);
        }

        let mut stmt = db.prepare(
            "SELECT id, chat_id, role, content, created_at_ms
             FROM session_messages
             WHERE chat_id = ?1
             ORDER BY created_at_ms ASC, id ASC",
        )?;
        let all: Vec<SessionMessage> = stmt
            .query_map(params![chat_id], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let total_chars: i64 = all.iter().map(|m| m.content.len() as i64).sum();
        let mut accumulated_chars: i64 = 0;
        let mut window_end = 0usize;
        for (i, msg) in all.iter().enumerate() {
            accumulated_chars += msg.content.len() as i64;
            let remaining = estimate_tokens_from_chars(total_chars - accumulated_chars);
            window_end = i + 1;
            if (remaining as f64) < 0.6 * max_tokens as f64 {
                break;
            }
        }

        let window = &all[..window_end];
        let max_window_len = total_count - 2;
        if window.is_empty() || window.len() as i64 > max_window_len {
            debug!(window_len = window.len(), max_window_len, "compaction window out of bounds, skipping");
            return Ok(false);
        }

        let formatted: String = window
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = match summarize(&formatted) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Ok(false),
        };

        let first_ts = window.first().unwrap().created_at_ms;
        let last_ts = window.last().unwrap().created_at_ms;
        let window_ids: Vec<i64> = window.iter().map(|m| m.id).collect();

        let tx = db.transaction()?;
        {
            let placeholders = window_ids
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(",");
            let sql = format!("DELETE FROM session_messages WHERE id IN ({placeholders})");
            let params_dyn: Vec<&dyn rusqlite::ToSql> =
                window_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            tx.execute(&sql, params_dyn.as_slice())?;
        }

        tx.execute(
            "INSERT INTO session_messages (chat_id, role, content, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![
                chat_id,
                Role::System.as_str(),
                format!("{SUMMARY_HEADER}\n{summary}"),
                first_ts
            ],
        )?;
        tx.execute(
            "INSERT INTO session_messages (chat_id, role, content, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![
                chat_id,
                Role::System.as_str(),
                format!("{PERSONA_REMINDER_HEADER}\n{persona_reminder}"),
                last_ts
            ],
        )?;

        let delta = 2 - window.len() as i64;
        tx.execute(
            "UPDATE sessions SET message_count = message_count + ?1 WHERE chat_id = ?2",
            params![delta, chat_id],
        )?;

        tx.commit()?;
        info!(chat_id, collapsed = window.len(), "compacted session history");
        Ok(true)
    }
}

fn estimate_tokens_locked(db: &Connection, chat_id: &str) -> Result<i64> {
    let total_chars: i64 = db.query_row(
        "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM session_messages WHERE chat_id = ?1",
        params![chat_id],
        |r| r.get(0),
    )?;
    Ok(estimate_tokens_from_chars(total_chars))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionMessage> {
    let role_str: String = row.get(2)?;
    Ok(SessionMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: Role::parse(&role_str),
        content: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}
