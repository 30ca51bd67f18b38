use async_trait::async_trait;

use homie_core::OutgoingAction;

use crate::{error::ChannelError, types::ChannelStatus};

/// Common interface implemented by every channel adapter (CLI, Signal,
/// Telegram, ...). The wire protocol each adapter speaks to reach its
/// external service is out of scope for this crate — adapters translate
/// platform events into `homie_core::IncomingMessage` (fed to the turn
/// engine by the host binary) and consume `OutgoingAction` via `send`.
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from
/// multiple Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"cli"`, `"signal"`,
    /// `"telegram"`). Used as the key inside `ChannelManager` and must be
    /// unique across all registered adapters.
    fn name(&self) -> &str;

    /// Establish the connection to the external service.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Deliver a single outbound action to a specific chat.
    ///
    /// `&self` (shared reference) so a connected adapter can send
    /// concurrently without a mutable borrow.
    async fn send(&self, chat_id: &str, action: &OutgoingAction) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
