pub mod db;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod types;

pub use error::SchedulerError;
pub use homie_core::config::{ProactiveConfig, ScopeLimits};
pub use heartbeat::{DeliveryHandler, HeartbeatLoop, TrustResolver};
pub use manager::ProactiveScheduler;
pub use types::{DeliverOutcome, EventKind, NewEvent, ProactiveEvent, Recurrence};
