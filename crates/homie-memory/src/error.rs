use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("person not found: {0}")]
    PersonNotFound(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
