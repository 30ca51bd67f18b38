use rusqlite::Connection;

use crate::error::Result;

/// Initialise every table this crate owns. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_people(conn)?;
    create_facts(conn)?;
    create_episodes(conn)?;
    create_lessons(conn)?;
    create_group_capsules(conn)?;
    create_dirty_queues(conn)?;
    Ok(())
}

fn create_people(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS people (
            id                      TEXT PRIMARY KEY,
            display_name            TEXT,
            channel                 TEXT NOT NULL,
            channel_user_id         TEXT NOT NULL,
            relationship_score      REAL NOT NULL DEFAULT 0.0,
            trust_tier_override     TEXT,
            capsule                 TEXT,
            public_style_capsule    TEXT,
            avg_reply_len           REAL NOT NULL DEFAULT 0.0,
            avg_user_len            REAL NOT NULL DEFAULT 0.0,
            active_hours_bitmask    INTEGER NOT NULL DEFAULT 0,
            conversation_count      INTEGER NOT NULL DEFAULT 0,
            sample_count            INTEGER NOT NULL DEFAULT 0,
            created_at_ms           INTEGER NOT NULL,
            updated_at_ms           INTEGER NOT NULL,
            UNIQUE(channel, channel_user_id)
        );",
    )?;
    Ok(())
}

fn create_facts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS facts (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            person_id           TEXT,
            subject             TEXT NOT NULL,
            content              TEXT NOT NULL,
            category             TEXT NOT NULL DEFAULT 'misc',
            evidence_quote       TEXT,
            last_accessed_at_ms  INTEGER,
            created_at_ms        INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_person ON facts(person_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts
            USING fts5(subject, content, content='facts', content_rowid='id');",
    )?;
    Ok(())
}

fn create_episodes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS episodes (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id         TEXT NOT NULL,
            person_id       TEXT,
            is_group        INTEGER NOT NULL DEFAULT 0,
            content         TEXT NOT NULL,
            created_at_ms   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_chat ON episodes(chat_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_episodes_person ON episodes(person_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS episodes_fts
            USING fts5(content, content='episodes', content_rowid='id');",
    )?;
    Ok(())
}

fn create_lessons(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS lessons (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            kind              TEXT NOT NULL,
            category          TEXT NOT NULL,
            content           TEXT NOT NULL,
            rule              TEXT,
            alternative       TEXT,
            person_id         TEXT,
            episode_refs      TEXT,
            confidence        REAL NOT NULL DEFAULT 0.5,
            times_validated   INTEGER NOT NULL DEFAULT 0,
            times_violated    INTEGER NOT NULL DEFAULT 0,
            created_at_ms     INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lessons_person ON lessons(person_id);",
    )?;
    Ok(())
}

fn create_group_capsules(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS group_capsules (
            chat_id         TEXT PRIMARY KEY,
            capsule         TEXT NOT NULL,
            updated_at_ms   INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn create_dirty_queues(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS group_capsule_dirty (
            chat_id         TEXT PRIMARY KEY,
            first_dirty_ms  INTEGER NOT NULL,
            last_dirty_ms   INTEGER NOT NULL,
            claimed_at_ms   INTEGER
        );
        CREATE TABLE IF NOT EXISTS public_style_dirty (
            person_id       TEXT PRIMARY KEY,
            first_dirty_ms  INTEGER NOT NULL,
            last_dirty_ms   INTEGER NOT NULL,
            claimed_at_ms   INTEGER
        );",
    )?;
    Ok(())
}
