pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::MemoryError;
pub use manager::{MemoryStore, RetrievalWeights};
pub use types::{
    Episode, Fact, FactCategory, GroupCapsule, Lesson, LessonType, ObservationCounters, Person,
    ScoredEpisode, ScoredFact, TrustTier,
};
