use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("memory store error: {0}")]
    Memory(#[from] homie_memory::MemoryError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] homie_scheduler::SchedulerError),
}

pub type Result<T> = std::result::Result<T, ExtractorError>;
