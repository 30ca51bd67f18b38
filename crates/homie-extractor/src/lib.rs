pub mod error;
pub mod extractor;
pub mod model;
pub mod types;

pub use error::ExtractorError;
pub use extractor::MemoryExtractor;
pub use model::FastModel;
pub use types::{ExtractedEvent, ExtractedFact, ExtractionResult, ReconcileResult, TurnText};
