use std::collections::HashMap;

use rusqlite::params;
use tracing::instrument;

use crate::error::Result;
use crate::types::{Fact, FactCategory, ScoredFact};

use super::{MemoryStore, RetrievalWeights};

impl MemoryStore {
    #[instrument(skip(self, content, evidence_quote), fields(person_id, subject))]
    pub fn add_fact(
        &self,
        person_id: Option<&str>,
        subject: &str,
        content: &str,
        category: FactCategory,
        evidence_quote: Option<&str>,
        now_ms: i64,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO facts (person_id, subject, content, category, evidence_quote, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![person_id, subject, content, category.as_str(), evidence_quote, now_ms],
        )?;
        let id = db.last_insert_rowid();
        db.execute(
            "INSERT INTO facts_fts(rowid, subject, content) VALUES (?1, ?2, ?3)",
            params![id, subject, content],
        )?;
        Ok(id)
    }

    pub fn update_fact(&self, id: i64, content: &str, evidence_quote: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let subject: String = db.query_row("SELECT subject FROM facts WHERE id = ?1", params![id], |r| r.get(0))?;
        db.execute(
            "UPDATE facts SET content = ?1, evidence_quote = ?2 WHERE id = ?3",
            params![content, evidence_quote, id],
        )?;
        db.execute(
            "INSERT INTO facts_fts(facts_fts, rowid, subject, content) VALUES('delete', ?1, ?2, ?3)",
            params![id, subject, content],
        )?;
        db.execute(
            "INSERT INTO facts_fts(rowid, subject, content) VALUES (?1, ?2, ?3)",
            params![id, subject, content],
        )?;
        Ok(())
    }

    pub fn delete_fact(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let row: Option<(String, String)> = db
            .query_row(
                "SELECT subject, content FROM facts WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        if let Some((subject, content)) = row {
            db.execute(
                "INSERT INTO facts_fts(facts_fts, rowid, subject, content) VALUES('delete', ?1, ?2, ?3)",
                params![id, subject, content],
            )?;
            db.execute("DELETE FROM facts WHERE id = ?1", params![id])?;
        }
        Ok(())
    }

    /// RRF-fused FTS + (optional) vector search, blended with a recency
    /// term. `vector_scores`, keyed by fact id, is supplied by the caller
    /// when an embedder is configured; `None` degrades to FTS-only.
    #[instrument(skip(self, vector_scores), fields(query, limit))]
    pub fn hybrid_search_facts(
        &self,
        query: &str,
        limit: usize,
        weights: &RetrievalWeights,
        vector_scores: Option<&HashMap<i64, f64>>,
    ) -> Result<Vec<ScoredFact>> {
        let db = self.db.lock().unwrap();
        let fts_rank = fts_ranked_ids(&db, "facts_fts", query, limit.max(50))?;
        drop(db);

        let fused = super::episodes::reciprocal_rank_fuse(&fts_rank, vector_scores, weights);

        let db = self.db.lock().unwrap();
        let mut scored = Vec::with_capacity(fused.len());
        let now_ms = chrono::Utc::now().timestamp_millis();
        for (id, base_score) in fused {
            if let Some(fact) = row_to_fact(&db, id)? {
                let recency = super::episodes::recency_boost(fact.created_at_ms, now_ms, weights.half_life_days);
                let score = base_score + weights.recency_weight * recency;
                scored.push(ScoredFact { fact, score });
            }
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(limit);
        Ok(scored)
    }
}

fn row_to_fact(db: &rusqlite::Connection, id: i64) -> Result<Option<Fact>> {
    use rusqlite::OptionalExtension;
    let fact = db
        .query_row(
            "SELECT id, person_id, subject, content, category, evidence_quote, last_accessed_at_ms, created_at_ms
             FROM facts WHERE id = ?1",
            params![id],
            |row| {
                let cat: String = row.get(4)?;
                Ok(Fact {
                    id: row.get(0)?,
                    person_id: row.get(1)?,
                    subject: row.get(2)?,
                    content: row.get(3)?,
                    category: FactCategory::parse(&cat),
                    evidence_quote: row.get(5)?,
                    last_accessed_at_ms: row.get(6)?,
                    created_at_ms: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(fact)
}

/// Returns `(rowid, fts-rank 1-based)` pairs, best match first.
pub(crate) fn fts_ranked_ids(
    db: &rusqlite::Connection,
    fts_table: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<(i64, usize)>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!("SELECT rowid FROM {fts_table} WHERE {fts_table} MATCH ?1 ORDER BY rank LIMIT ?2");
    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map(params![query, limit as i64], |r| r.get::<_, i64>(0))?;
    Ok(rows
        .filter_map(|r| r.ok())
        .enumerate()
        .map(|(i, id)| (id, i + 1))
        .collect())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::manager::MemoryStore;

    fn open() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        MemoryStore::new(conn)
    }

    #[test]
    fn search_finds_by_content() {
        let store = open();
        store
            .add_fact(None, "food", "is vegetarian", FactCategory::Preference, None, 100)
            .unwrap();
        store
            .add_fact(None, "job", "works as a pilot", FactCategory::Professional, None, 200)
            .unwrap();

        let hits = store.hybrid_search_facts("vegetarian", 10, &Default::default(), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fact.subject, "food");
    }

    #[test]
    fn update_fact_keeps_fts_in_sync() {
        let store = open();
        let id = store
            .add_fact(None, "food", "is vegetarian", FactCategory::Preference, None, 100)
            .unwrap();
        store.update_fact(id, "is vegan", None).unwrap();

        let old = store.hybrid_search_facts("vegetarian", 10, &Default::default(), None).unwrap();
        let new = store.hybrid_search_facts("vegan", 10, &Default::default(), None).unwrap();
        assert!(old.is_empty());
        assert_eq!(new.len(), 1);
    }

    #[test]
    fn delete_fact_removes_from_search() {
        let store = open();
        let id = store
            .add_fact(None, "food", "is vegetarian", FactCategory::Preference, None, 100)
            .unwrap();
        store.delete_fact(id).unwrap();
        let hits = store.hybrid_search_facts("vegetarian", 10, &Default::default(), None).unwrap();
        assert!(hits.is_empty());
    }
}
