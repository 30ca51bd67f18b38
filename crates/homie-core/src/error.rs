use thiserror::Error;

/// Errors shared across the turn engine and its collaborators.
///
/// Per-store crates (`homie-sessions`, `homie-memory`, ...) define their own
/// error enums; this one exists for `homie-core`'s own surface (config
/// loading, the per-key lock, the accumulator) and as the catch-all the
/// turn engine converts everything else into before it ever reaches a caller.
#[derive(Debug, Error)]
pub enum HomieError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid chat id: {0}")]
    InvalidChatId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HomieError>;
