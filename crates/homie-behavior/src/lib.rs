pub mod predraft;
pub mod sleep;
pub mod slop;
pub mod velocity;

pub use homie_core::config::{BehaviorConfig, SleepConfig};
pub use predraft::{BehaviorEngine, EngagementGate, PreDraftDecision};
pub use slop::{collapse_newlines_for_group, post_draft_slop_check, SlopCheck};
pub use velocity::{snapshot as velocity_snapshot, RecentMessage, VelocitySnapshot};
