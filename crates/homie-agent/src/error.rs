use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Session(#[from] homie_sessions::SessionError),

    #[error(transparent)]
    Memory(#[from] homie_memory::MemoryError),

    #[error(transparent)]
    Ledger(#[from] homie_ledger::LedgerError),

    #[error(transparent)]
    Scheduler(#[from] homie_scheduler::SchedulerError),

    #[error("duplicate message, dropped silently")]
    Duplicate,

    #[error("stale draft discarded: {0}")]
    Stale(&'static str),
}

pub type Result<T> = std::result::Result<T, AgentError>;
