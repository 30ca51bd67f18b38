pub mod channel;
pub mod cli;
pub mod error;
pub mod manager;
pub mod signal;
pub mod telegram;
pub mod types;

pub use channel::Channel;
pub use cli::CliChannel;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use signal::SignalChannel;
pub use telegram::TelegramChannel;
pub use types::ChannelStatus;
