mod episodes;
mod facts;
mod lessons;
mod people;

use std::sync::Mutex;

use rusqlite::Connection;

/// Owns every table this crate is responsible for: people, facts (+FTS),
/// episodes (+FTS), lessons, and the two dirty-flag consolidation queues.
///
/// A single SQLite connection behind a `Mutex`, matching the rest of the
/// store crates — Homie runs single-node, so a connection pool buys
/// nothing here.
pub struct MemoryStore {
    pub(crate) db: Mutex<Connection>,
}

impl MemoryStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }
}

/// Tunables for [`episodes`] / [`facts`] hybrid retrieval, set at store
/// construction from `memory.retrieval` config.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalWeights {
    pub rrf_k: f64,
    pub fts_weight: f64,
    pub vec_weight: f64,
    pub recency_weight: f64,
    pub half_life_days: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            fts_weight: 0.6,
            vec_weight: 0.4,
            recency_weight: 0.2,
            half_life_days: 30.0,
        }
    }
}
