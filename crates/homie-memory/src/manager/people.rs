use rusqlite::{params, OptionalExtension};
use tracing::instrument;

use crate::error::Result;
use crate::types::{ObservationCounters, Person, TrustTier};

use super::MemoryStore;

impl MemoryStore {
    /// Idempotent on `(channel, channel_user_id)` — first call creates the
    /// row, later calls just return the existing one.
    #[instrument(skip(self), fields(channel, channel_user_id))]
    pub fn track_person(
        &self,
        channel: &str,
        channel_user_id: &str,
        display_name: Option<&str>,
        now_ms: i64,
    ) -> Result<Person> {
        let id = Person::person_id(channel, channel_user_id);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO people (id, display_name, channel, channel_user_id, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO NOTHING",
            params![id, display_name, channel, channel_user_id, now_ms],
        )?;
        row_to_person(&db, &id)?.ok_or_else(|| {
            crate::error::MemoryError::PersonNotFound(id.clone())
        })
    }

    #[instrument(skip(self))]
    pub fn get_person(&self, id: &str) -> Result<Option<Person>> {
        let db = self.db.lock().unwrap();
        row_to_person(&db, id)
    }

    /// Relationship score is monotone — a lower incoming value is ignored.
    #[instrument(skip(self), fields(id, score))]
    pub fn update_relationship_score(&self, id: &str, score: f64, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE people SET relationship_score = MAX(relationship_score, ?1), updated_at_ms = ?2
             WHERE id = ?3",
            params![score, now_ms, id],
        )?;
        Ok(())
    }

    pub fn set_trust_tier_override(&self, id: &str, tier: Option<TrustTier>, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE people SET trust_tier_override = ?1, updated_at_ms = ?2 WHERE id = ?3",
            params![tier.map(|t| t.as_str()), now_ms, id],
        )?;
        Ok(())
    }

    pub fn set_capsule(&self, id: &str, capsule: &str, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE people SET capsule = ?1, updated_at_ms = ?2 WHERE id = ?3",
            params![capsule, now_ms, id],
        )?;
        Ok(())
    }

    pub fn set_public_style_capsule(&self, id: &str, capsule: &str, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE people SET public_style_capsule = ?1, updated_at_ms = ?2 WHERE id = ?3",
            params![capsule, now_ms, id],
        )?;
        Ok(())
    }

    /// Roll one more observed turn into the running averages. `reply_len` /
    /// `user_len` are character counts of the assistant reply and the
    /// triggering user message, respectively.
    #[instrument(skip(self), fields(id))]
    pub fn record_observation(
        &self,
        id: &str,
        reply_len: usize,
        user_len: usize,
        local_hour: u32,
        now_ms: i64,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let Some(mut person) = row_to_person(&db, id)? else {
            return Err(crate::error::MemoryError::PersonNotFound(id.to_string()));
        };

        let n = person.counters.sample_count as f64;
        let new_n = n + 1.0;
        person.counters.avg_reply_len = (person.counters.avg_reply_len * n + reply_len as f64) / new_n;
        person.counters.avg_user_len = (person.counters.avg_user_len * n + user_len as f64) / new_n;
        person.counters.sample_count += 1;
        person.counters.conversation_count += 1;
        person.counters.active_hours_bitmask |= 1i64 << (local_hour.min(23));

        db.execute(
            "UPDATE people SET avg_reply_len = ?1, avg_user_len = ?2, active_hours_bitmask = ?3,
             conversation_count = ?4, sample_count = ?5, updated_at_ms = ?6
             WHERE id = ?7",
            params![
                person.counters.avg_reply_len,
                person.counters.avg_user_len,
                person.counters.active_hours_bitmask,
                person.counters.conversation_count,
                person.counters.sample_count,
                now_ms,
                id
            ],
        )?;
        Ok(())
    }

    /// Cascades to facts, lessons, and this person's dirty-style-queue row.
    /// Episodes are retained — chat history is not rewritten by a forget.
    #[instrument(skip(self))]
    pub fn delete_person(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM facts WHERE person_id = ?1", params![id])?;
        tx.execute("DELETE FROM lessons WHERE person_id = ?1", params![id])?;
        tx.execute("DELETE FROM public_style_dirty WHERE person_id = ?1", params![id])?;
        tx.execute("DELETE FROM people WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn row_to_person(
    db: &rusqlite::Connection,
    id: &str,
) -> Result<Option<Person>> {
    let person = db
        .query_row(
            "SELECT id, display_name, channel, channel_user_id, relationship_score,
                    trust_tier_override, capsule, public_style_capsule,
                    avg_reply_len, avg_user_len, active_hours_bitmask,
                    conversation_count, sample_count, created_at_ms, updated_at_ms
             FROM people WHERE id = ?1",
            params![id],
            |row| {
                let tier_str: Option<String> = row.get(5)?;
                Ok(Person {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    channel: row.get(2)?,
                    channel_user_id: row.get(3)?,
                    relationship_score: row.get(4)?,
                    trust_tier_override: tier_str.and_then(|s| TrustTier::parse(&s)),
                    capsule: row.get(6)?,
                    public_style_capsule: row.get(7)?,
                    counters: ObservationCounters {
                        avg_reply_len: row.get(8)?,
                        avg_user_len: row.get(9)?,
                        active_hours_bitmask: row.get(10)?,
                        conversation_count: row.get(11)?,
                        sample_count: row.get(12)?,
                    },
                    created_at_ms: row.get(13)?,
                    updated_at_ms: row.get(14)?,
                })
            },
        )
        .optional()?;
    Ok(person)
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    fn open() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        MemoryStore::new(conn)
    }

    #[test]
    fn track_person_is_idempotent() {
        let store = open();
        let a = store.track_person("cli", "u1", Some("Ada"), 100).unwrap();
        let b = store.track_person("cli", "u1", Some("ignored name"), 200).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.display_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn relationship_score_never_decreases() {
        let store = open();
        let p = store.track_person("cli", "u1", None, 100).unwrap();
        store.update_relationship_score(&p.id, 0.6, 200).unwrap();
        store.update_relationship_score(&p.id, 0.2, 300).unwrap();
        let reloaded = store.get_person(&p.id).unwrap().unwrap();
        assert_eq!(reloaded.relationship_score, 0.6);
    }

    #[test]
    fn delete_person_retains_episodes() {
        let store = open();
        let p = store.track_person("cli", "u1", None, 100).unwrap();
        store
            .add_fact(Some(&p.id), "food", "likes pizza", crate::types::FactCategory::Preference, None, 100)
            .unwrap();
        store
            .add_episode("cli:u1", Some(&p.id), false, "USER: hi\nFRIEND: hey", 100)
            .unwrap();

        store.delete_person(&p.id).unwrap();

        assert!(store.get_person(&p.id).unwrap().is_none());
        let facts = store.hybrid_search_facts("pizza", 10, &Default::default(), None).unwrap();
        assert!(facts.is_empty());
        let episodes = store.hybrid_search_episodes("hi", 10, &Default::default(), None).unwrap();
        assert_eq!(episodes.len(), 1);
    }
}
