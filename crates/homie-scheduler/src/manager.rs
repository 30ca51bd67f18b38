use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::types::{EventKind, NewEvent, ProactiveEvent, Recurrence};

/// Idempotency window for `add_event`: a second call describing the same
/// `(chat_id, kind, subject)` within this many ms of an existing row's
/// `trigger_at_ms` is treated as a duplicate and returns the existing id.
const IDEMPOTENCY_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Durable store of proactive events with lease-based at-most-once
/// claiming, mirroring the poll/claim/deliver shape the rest of this
/// workspace uses for scheduled work.
pub struct ProactiveScheduler {
    db: Mutex<Connection>,
}

impl ProactiveScheduler {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    #[instrument(skip(self, event), fields(chat_id = %event.chat_id, kind = ?event.kind))]
    pub fn add_event(&self, event: NewEvent, now_ms: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();

        let existing: Option<i64> = db
            .query_row(
                "SELECT id FROM events
                 WHERE chat_id = ?1 AND kind = ?2 AND subject = ?3
                   AND ABS(trigger_at_ms - ?4) <= ?5",
                params![
                    event.chat_id,
                    event.kind.as_str(),
                    event.subject,
                    event.trigger_at_ms,
                    IDEMPOTENCY_WINDOW_MS
                ],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        db.execute(
            "INSERT INTO events (kind, subject, chat_id, trigger_at_ms, recurrence, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.kind.as_str(),
                event.subject,
                event.chat_id,
                event.trigger_at_ms,
                event.recurrence.map(|r| r.as_str()),
                now_ms
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Expires stale claims, then selects and claims up to `limit` due,
    /// unclaimed events in one immediate transaction so two callers
    /// against the same DB file can never both claim the same row.
    #[instrument(skip(self), fields(window_ms, limit, lease_ms))]
    pub fn claim_pending_events(
        &self,
        now_ms: i64,
        window_ms: i64,
        limit: usize,
        lease_ms: i64,
    ) -> Result<Vec<ProactiveEvent>> {
        let claim_id = Uuid::new_v4().to_string();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        tx.execute(
            "UPDATE events SET claim_id = NULL, claim_until_ms = NULL
             WHERE claim_until_ms IS NOT NULL AND claim_until_ms <= ?1",
            params![now_ms],
        )?;

        let due_ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM events
                 WHERE delivered = 0 AND trigger_at_ms <= ?1
                   AND (claim_until_ms IS NULL OR claim_until_ms <= ?2)
                 ORDER BY trigger_at_ms ASC LIMIT ?3",
            )?;
            stmt.query_map(params![now_ms + window_ms, now_ms, limit as i64], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };

        for id in &due_ids {
            tx.execute(
                "UPDATE events SET claim_id = ?1, claim_until_ms = ?2 WHERE id = ?3",
                params![claim_id, now_ms + lease_ms, id],
            )?;
        }

        let mut events = Vec::with_capacity(due_ids.len());
        for id in &due_ids {
            if let Some(event) = row_to_event(&tx, *id)? {
                events.push(event);
            }
        }
        tx.commit()?;
        Ok(events)
    }

    #[instrument(skip(self), fields(id, claim_id))]
    pub fn mark_delivered(&self, id: i64, claim_id: &str, now_ms: i64) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let current_claim: Option<String> = tx
            .query_row("SELECT claim_id FROM events WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?
            .flatten();
        if current_claim.as_deref() != Some(claim_id) {
            return Err(SchedulerError::ClaimMismatch { id });
        }

        let event = row_to_event(&tx, id)?.ok_or(SchedulerError::EventNotFound { id })?;
        tx.execute(
            "UPDATE events SET delivered = 1, claim_id = NULL, claim_until_ms = NULL WHERE id = ?1",
            params![id],
        )?;

        if event.recurrence == Some(Recurrence::Yearly) {
            let next_trigger = event.trigger_at_ms + 365 * 24 * 3600 * 1000;
            tx.execute(
                "INSERT INTO events (kind, subject, chat_id, trigger_at_ms, recurrence, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.kind.as_str(),
                    event.subject,
                    event.chat_id,
                    next_trigger,
                    Recurrence::Yearly.as_str(),
                    now_ms
                ],
            )?;
        }

        tx.commit()?;
        info!(event_id = id, "proactive event delivered");
        Ok(())
    }

    pub fn release_claim(&self, id: i64, claim_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE events SET claim_id = NULL, claim_until_ms = NULL WHERE id = ?1 AND claim_id = ?2",
            params![id, claim_id],
        )?;
        Ok(())
    }

    pub fn defer_event(&self, id: i64, claim_id: &str, next_attempt_at_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE events SET claim_id = NULL, claim_until_ms = NULL, trigger_at_ms = ?1
             WHERE id = ?2 AND claim_id = ?3",
            params![next_attempt_at_ms, id, claim_id],
        )?;
        Ok(())
    }

    pub fn log_proactive_send(&self, chat_id: &str, is_group: bool, event_id: Option<i64>, now_ms: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO proactive_send_log (chat_id, is_group, event_id, sent_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, is_group as i64, event_id, now_ms],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn mark_send_ignored(&self, send_log_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("UPDATE proactive_send_log SET ignored = 1 WHERE id = ?1", params![send_log_id])?;
        Ok(())
    }

    pub fn count_recent_sends_for_scope(&self, is_group: bool, now_ms: i64, window_ms: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT COUNT(*) FROM proactive_send_log WHERE is_group = ?1 AND sent_at_ms >= ?2",
            params![is_group as i64, now_ms - window_ms],
            |r| r.get(0),
        )
        .map_err(Into::into)
    }

    pub fn count_recent_sends_for_chat(&self, chat_id: &str, now_ms: i64, window_ms: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT COUNT(*) FROM proactive_send_log WHERE chat_id = ?1 AND sent_at_ms >= ?2",
            params![chat_id, now_ms - window_ms],
            |r| r.get(0),
        )
        .map_err(Into::into)
    }

    /// Length of the trailing streak of ignored sends to this chat — the
    /// exponential-backoff signal the heartbeat's suppression policy uses.
    pub fn count_ignored_recent(&self, chat_id: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT ignored FROM proactive_send_log WHERE chat_id = ?1 ORDER BY sent_at_ms DESC",
        )?;
        let mut count = 0i64;
        let rows = stmt.query_map(params![chat_id], |r| r.get::<_, i64>(0))?;
        for row in rows {
            match row {
                Ok(1) => count += 1,
                Ok(_) => break,
                Err(_) => break,
            }
        }
        Ok(count)
    }

    pub fn last_send_ms_for_chat(&self, chat_id: &str) -> Result<Option<i64>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT sent_at_ms FROM proactive_send_log WHERE chat_id = ?1 ORDER BY sent_at_ms DESC LIMIT 1",
                params![chat_id],
                |r| r.get(0),
            )
            .optional()?)
    }
}

fn row_to_event(conn: &Connection, id: i64) -> Result<Option<ProactiveEvent>> {
    Ok(conn
        .query_row(
            "SELECT id, kind, subject, chat_id, trigger_at_ms, recurrence, delivered,
                    claim_id, claim_until_ms, created_at_ms
             FROM events WHERE id = ?1",
            params![id],
            |row| {
                let kind_str: String = row.get(1)?;
                let recurrence_str: Option<String> = row.get(5)?;
                Ok(ProactiveEvent {
                    id: row.get(0)?,
                    kind: EventKind::parse(&kind_str),
                    subject: row.get(2)?,
                    chat_id: row.get(3)?,
                    trigger_at_ms: row.get(4)?,
                    recurrence: Recurrence::parse(recurrence_str.as_deref()),
                    delivered: row.get::<_, i64>(6)? != 0,
                    claim_id: row.get(7)?,
                    claim_until_ms: row.get(8)?,
                    created_at_ms: row.get(9)?,
                })
            },
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> ProactiveScheduler {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        ProactiveScheduler::new(conn)
    }

    fn new_event(chat_id: &str, trigger_at_ms: i64) -> NewEvent {
        NewEvent {
            kind: EventKind::Reminder,
            subject: "take the bins out".into(),
            chat_id: chat_id.into(),
            trigger_at_ms,
            recurrence: None,
        }
    }

    #[test]
    fn add_event_is_idempotent_within_window() {
        let sched = open();
        let a = sched.add_event(new_event("cli:u1", 100_000), 0).unwrap();
        let b = sched.add_event(new_event("cli:u1", 100_000 + 60_000), 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn add_event_outside_window_creates_new_row() {
        let sched = open();
        let a = sched.add_event(new_event("cli:u1", 100_000), 0).unwrap();
        let b = sched.add_event(new_event("cli:u1", 100_000 + 6 * 60_000), 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn claim_is_exclusive_across_callers() {
        let sched = open();
        sched.add_event(new_event("cli:u1", 0), 0).unwrap();

        let first = sched.claim_pending_events(1000, 0, 10, 60_000).unwrap();
        let second = sched.claim_pending_events(1000, 0, 10, 60_000).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn expired_lease_can_be_reclaimed() {
        let sched = open();
        sched.add_event(new_event("cli:u1", 0), 0).unwrap();
        sched.claim_pending_events(1000, 0, 10, 1000).unwrap();
        let reclaimed = sched.claim_pending_events(5000, 0, 10, 60_000).unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[test]
    fn mark_delivered_requires_matching_claim() {
        let sched = open();
        sched.add_event(new_event("cli:u1", 0), 0).unwrap();
        let claimed = sched.claim_pending_events(1000, 0, 10, 60_000).unwrap();
        let event = &claimed[0];
        let result = sched.mark_delivered(event.id, "wrong-claim", 2000);
        assert!(result.is_err());
    }

    #[test]
    fn yearly_recurrence_reinserts_on_delivery() {
        let sched = open();
        let mut event = new_event("cli:u1", 0);
        event.recurrence = Some(Recurrence::Yearly);
        sched.add_event(event, 0).unwrap();

        let claimed = sched.claim_pending_events(1000, 0, 10, 60_000).unwrap();
        let claim_id = claimed[0].claim_id.clone().unwrap();
        sched.mark_delivered(claimed[0].id, &claim_id, 2000).unwrap();

        let remaining = sched.claim_pending_events(2000, i64::MAX, 10, 60_000).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].trigger_at_ms >= 365 * 24 * 3600 * 1000);
    }

    #[test]
    fn consecutive_ignored_streak_stops_at_first_acknowledged_send() {
        let sched = open();
        let a = sched.log_proactive_send("cli:u1", false, None, 100).unwrap();
        let b = sched.log_proactive_send("cli:u1", false, None, 200).unwrap();
        let c = sched.log_proactive_send("cli:u1", false, None, 300).unwrap();
        sched.mark_send_ignored(b).unwrap();
        sched.mark_send_ignored(c).unwrap();
        let _ = a;

        assert_eq!(sched.count_ignored_recent("cli:u1").unwrap(), 2);
    }
}
