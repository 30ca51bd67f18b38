use std::collections::HashMap;

use rusqlite::params;
use tracing::instrument;

use crate::error::Result;
use crate::types::{Episode, ScoredEpisode};

use super::{MemoryStore, RetrievalWeights};

impl MemoryStore {
    /// Inserts one episode row. Group episodes additionally touch
    /// `group_capsule_dirty`; DM episodes with a known person touch
    /// `public_style_dirty` for that person — both upserts extend
    /// `last_dirty_ms` without disturbing an in-flight claim.
    #[instrument(skip(self, content), fields(chat_id, person_id, is_group))]
    pub fn add_episode(
        &self,
        chat_id: &str,
        person_id: Option<&str>,
        is_group: bool,
        content: &str,
        now_ms: i64,
    ) -> Result<i64> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        tx.execute(
            "INSERT INTO episodes (chat_id, person_id, is_group, content, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chat_id, person_id, is_group as i64, content, now_ms],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO episodes_fts(rowid, content) VALUES (?1, ?2)",
            params![id, content],
        )?;

        if is_group {
            tx.execute(
                "INSERT INTO group_capsule_dirty (chat_id, first_dirty_ms, last_dirty_ms, claimed_at_ms)
                 VALUES (?1, ?2, ?2, NULL)
                 ON CONFLICT(chat_id) DO UPDATE SET last_dirty_ms = excluded.last_dirty_ms",
                params![chat_id, now_ms],
            )?;
        } else if let Some(pid) = person_id {
            tx.execute(
                "INSERT INTO public_style_dirty (person_id, first_dirty_ms, last_dirty_ms, claimed_at_ms)
                 VALUES (?1, ?2, ?2, NULL)
                 ON CONFLICT(person_id) DO UPDATE SET last_dirty_ms = excluded.last_dirty_ms",
                params![pid, now_ms],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    #[instrument(skip(self, vector_scores), fields(query, limit))]
    pub fn hybrid_search_episodes(
        &self,
        query: &str,
        limit: usize,
        weights: &RetrievalWeights,
        vector_scores: Option<&HashMap<i64, f64>>,
    ) -> Result<Vec<ScoredEpisode>> {
        let db = self.db.lock().unwrap();
        let fts_rank = super::facts::fts_ranked_ids(&db, "episodes_fts", query, limit.max(50))?;
        drop(db);

        let fused = reciprocal_rank_fuse(&fts_rank, vector_scores, weights);

        let db = self.db.lock().unwrap();
        let mut scored = Vec::with_capacity(fused.len());
        let now_ms = chrono::Utc::now().timestamp_millis();
        for (id, base_score) in fused {
            if let Some(episode) = row_to_episode(&db, id)? {
                let recency = recency_boost(episode.created_at_ms, now_ms, weights.half_life_days);
                let score = base_score + weights.recency_weight * recency;
                scored.push(ScoredEpisode { episode, score });
            }
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(limit);
        Ok(scored)
    }

    /// Claims every chat whose `group_capsule_dirty` row is older than
    /// `staleness_ms` and unclaimed, marking `claimed_at_ms = now`. The
    /// consolidation worker is expected to call [`Self::clear_group_dirty`]
    /// once it has refreshed the capsule.
    pub fn claim_dirty_group_capsules(&self, now_ms: i64, staleness_ms: i64, limit: usize) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT chat_id FROM group_capsule_dirty
             WHERE claimed_at_ms IS NULL AND last_dirty_ms <= ?1
             ORDER BY first_dirty_ms ASC LIMIT ?2",
        )?;
        let chat_ids: Vec<String> = stmt
            .query_map(params![now_ms - staleness_ms, limit as i64], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        for chat_id in &chat_ids {
            db.execute(
                "UPDATE group_capsule_dirty SET claimed_at_ms = ?1 WHERE chat_id = ?2",
                params![now_ms, chat_id],
            )?;
        }
        Ok(chat_ids)
    }

    pub fn clear_group_dirty(&self, chat_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM group_capsule_dirty WHERE chat_id = ?1", params![chat_id])?;
        Ok(())
    }

    pub fn claim_dirty_public_styles(&self, now_ms: i64, staleness_ms: i64, limit: usize) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT person_id FROM public_style_dirty
             WHERE claimed_at_ms IS NULL AND last_dirty_ms <= ?1
             ORDER BY first_dirty_ms ASC LIMIT ?2",
        )?;
        let person_ids: Vec<String> = stmt
            .query_map(params![now_ms - staleness_ms, limit as i64], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        for person_id in &person_ids {
            db.execute(
                "UPDATE public_style_dirty SET claimed_at_ms = ?1 WHERE person_id = ?2",
                params![now_ms, person_id],
            )?;
        }
        Ok(person_ids)
    }

    pub fn clear_public_style_dirty(&self, person_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM public_style_dirty WHERE person_id = ?1", params![person_id])?;
        Ok(())
    }

    pub fn get_group_capsule(&self, chat_id: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT capsule FROM group_capsules WHERE chat_id = ?1",
                params![chat_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn set_group_capsule(&self, chat_id: &str, capsule: &str, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO group_capsules (chat_id, capsule, updated_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET capsule = excluded.capsule, updated_at_ms = excluded.updated_at_ms",
            params![chat_id, capsule, now_ms],
        )?;
        Ok(())
    }
}

fn row_to_episode(db: &rusqlite::Connection, id: i64) -> Result<Option<Episode>> {
    use rusqlite::OptionalExtension;
    Ok(db
        .query_row(
            "SELECT id, chat_id, person_id, is_group, content, created_at_ms FROM episodes WHERE id = ?1",
            params![id],
            |row| {
                Ok(Episode {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    person_id: row.get(2)?,
                    is_group: row.get::<_, i64>(3)? != 0,
                    content: row.get(4)?,
                    created_at_ms: row.get(5)?,
                })
            },
        )
        .optional()?)
}

/// RRF fusion over an FTS rank list and an optional vector-similarity map
/// (converted to ranks internally — RRF operates on rank, not raw score).
pub(crate) fn reciprocal_rank_fuse(
    fts_ranks: &[(i64, usize)],
    vector_scores: Option<&HashMap<i64, f64>>,
    weights: &RetrievalWeights,
) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for (id, rank) in fts_ranks {
        *scores.entry(*id).or_insert(0.0) += weights.fts_weight / (weights.rrf_k + *rank as f64);
    }
    if let Some(vs) = vector_scores {
        let mut ranked: Vec<(&i64, &f64)> = vs.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap());
        for (rank, (id, _)) in ranked.into_iter().enumerate() {
            *scores.entry(*id).or_insert(0.0) += weights.vec_weight / (weights.rrf_k + (rank + 1) as f64);
        }
    }
    scores.into_iter().collect()
}

/// Exponential decay in `[0, 1]`: 1.0 for something that just happened,
/// halving every `half_life_days`.
pub(crate) fn recency_boost(created_at_ms: i64, now_ms: i64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age_days = ((now_ms - created_at_ms).max(0) as f64) / 86_400_000.0;
    0.5f64.powf(age_days / half_life_days)
}
