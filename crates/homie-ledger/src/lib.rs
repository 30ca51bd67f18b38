pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::LedgerError;
pub use manager::OutboundLedger;
pub use types::{MessageType, NewSend, OutboundRow};
