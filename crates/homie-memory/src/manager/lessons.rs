use rusqlite::params;
use tracing::instrument;

use crate::error::Result;
use crate::types::{Lesson, LessonType};

use super::MemoryStore;

impl MemoryStore {
    #[instrument(skip(self, content, rule, alternative), fields(category, person_id))]
    pub fn add_lesson(
        &self,
        kind: LessonType,
        category: &str,
        content: &str,
        rule: Option<&str>,
        alternative: Option<&str>,
        person_id: Option<&str>,
        episode_refs: &[i64],
        confidence: f64,
        now_ms: i64,
    ) -> Result<i64> {
        let refs_json = serde_json::to_string(episode_refs).unwrap_or_else(|_| "[]".to_string());
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO lessons (kind, category, content, rule, alternative, person_id,
             episode_refs, confidence, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                kind.as_str(),
                category,
                content,
                rule,
                alternative,
                person_id,
                refs_json,
                confidence,
                now_ms
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Bump the validation counter — a prior lesson's rule played out again
    /// as predicted.
    pub fn validate_lesson(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("UPDATE lessons SET times_validated = times_validated + 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Bump the violation counter — a prior lesson's rule was contradicted.
    pub fn violate_lesson(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("UPDATE lessons SET times_violated = times_violated + 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Lessons relevant to a person (or global, person_id NULL), ordered by
    /// confidence, for injection into the pre-draft / slop-check prompts.
    pub fn lessons_for_person(&self, person_id: Option<&str>, limit: usize) -> Result<Vec<Lesson>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, kind, category, content, rule, alternative, person_id,
                    episode_refs, confidence, times_validated, times_violated, created_at_ms
             FROM lessons
             WHERE person_id IS ?1 OR person_id IS NULL
             ORDER BY confidence DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![person_id, limit as i64], row_to_lesson)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_lesson(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lesson> {
    let kind_str: String = row.get(1)?;
    let refs_json: Option<String> = row.get(7)?;
    let episode_refs = refs_json.and_then(|s| serde_json::from_str(&s).ok());
    Ok(Lesson {
        id: row.get(0)?,
        kind: LessonType::parse(&kind_str),
        category: row.get(2)?,
        content: row.get(3)?,
        rule: row.get(4)?,
        alternative: row.get(5)?,
        person_id: row.get(6)?,
        episode_refs,
        confidence: row.get(8)?,
        times_validated: row.get(9)?,
        times_violated: row.get(10)?,
        created_at_ms: row.get(11)?,
    })
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
    fn lessons_for_person_includes_global_rows() {
        let store = open();
        store
            .add_lesson(LessonType::Failure, "tone", "too formal", Some("keep it casual"), None, None, &[], 0.7, 100)
            .unwrap();
        store
            .add_lesson(LessonType::Success, "tone", "liked jokes", None, None, Some("person:cli:u1"), &[], 0.9, 100)
            .unwrap();

        let lessons = store.lessons_for_person(Some("person:cli:u1"), 10).unwrap();
        assert_eq!(lessons.len(), 2);
    }

    #[test]
    fn validate_and_violate_increment_counters() {
        let store = open();
        let id = store
            .add_lesson(LessonType::Observation, "timing", "replies fast at night", None, None, None, &[], 0.5, 100)
            .unwrap();
        store.validate_lesson(id).unwrap();
        store.validate_lesson(id).unwrap();
        store.violate_lesson(id).unwrap();

        let lessons = store.lessons_for_person(None, 10).unwrap();
        let lesson = lessons.iter().find(|l| l.id == id).unwrap();
        assert_eq!(lesson.times_validated, 2);
        assert_eq!(lesson.times_violated, 1);
    }
}
