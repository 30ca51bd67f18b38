pub mod accumulator;
pub mod config;
pub mod error;
pub mod lock;
pub mod types;

pub use accumulator::MessageAccumulator;
pub use error::{HomieError, Result};
pub use lock::PerKeyLock;
pub use types::{
    Attachment, ChatId, IncomingMessage, OutgoingAction, ReactionTarget, SendAudio, SendText,
};
