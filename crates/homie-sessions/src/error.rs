use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("summarizer returned no summary")]
    EmptySummary,
}

pub type Result<T> = std::result::Result<T, SessionError>;
