//! Telegram adapter stub.
//!
//! Real Telegram delivery (Bot API long-polling or webhook) is out of
//! scope, see `spec.md` §1. Chat ids follow `tg:<userId>` for DMs and
//! `tg:<chatId>` (negative) for groups per spec §6.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use homie_core::OutgoingAction;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::types::ChannelStatus;

pub struct TelegramChannel {
    status: Arc<Mutex<ChannelStatus>>,
}

impl TelegramChannel {
    pub fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(ChannelStatus::Disconnected)),
        }
    }
}

impl Default for TelegramChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        Err(ChannelError::ConnectionFailed(
            "telegram adapter is a stub, no bot API transport wired up".into(),
        ))
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, _chat_id: &str, _action: &OutgoingAction) -> Result<(), ChannelError> {
        Err(ChannelError::SendFailed("telegram adapter is a stub".into()))
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}
