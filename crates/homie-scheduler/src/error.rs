use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("event not found: {id}")]
    EventNotFound { id: i64 },

    #[error("claim mismatch for event {id}")]
    ClaimMismatch { id: i64 },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
