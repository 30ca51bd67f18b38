//! Signal adapter stub.
//!
//! The Signal wire protocol (signal-cli JSON-RPC or libsignal directly) is
//! out of scope — see `spec.md` §1, "channel adapters ... deliberately out
//! of scope". This type exists so the rest of the system (registration,
//! `ChannelManager`, config) can be wired against a real `Channel`
//! implementation without a live Signal account. Chat ids follow
//! `signal:dm:<e164>` / `signal:group:<groupId>` per spec §6.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use homie_core::OutgoingAction;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::types::ChannelStatus;

pub struct SignalChannel {
    status: Arc<Mutex<ChannelStatus>>,
}

impl SignalChannel {
    pub fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(ChannelStatus::Disconnected)),
        }
    }
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for SignalChannel {
    fn name(&self) -> &str {
        "signal"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        Err(ChannelError::ConnectionFailed(
            "signal adapter is a stub, no signal-cli transport wired up".into(),
        ))
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, _chat_id: &str, _action: &OutgoingAction) -> Result<(), ChannelError> {
        Err(ChannelError::SendFailed("signal adapter is a stub".into()))
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}
