//! CLI channel adapter — reads lines from stdin, writes replies to stdout.
//!
//! This is the one adapter fully implemented in this crate: it is how the
//! worked examples in the spec (and the integration tests in `homie-agent`)
//! exercise the turn engine end-to-end without a network. Signal and
//! Telegram wire protocols are out of scope (see `spec.md` §1) and are
//! represented by [`crate::signal::SignalChannel`] /
//! [`crate::telegram::TelegramChannel`] as thin adapters satisfying the
//! same [`Channel`] trait.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use homie_core::{ChatId, IncomingMessage, OutgoingAction};

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::types::ChannelStatus;

/// `cli:<slot>` chat id format from spec §6.
pub struct CliChannel {
    slot: String,
    status: Arc<Mutex<ChannelStatus>>,
    inbound_tx: mpsc::Sender<IncomingMessage>,
    next_message_id: Arc<AtomicU64>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
    stopped: Arc<AtomicI64>,
}

impl CliChannel {
    /// `inbound_tx` is how the host binary receives messages typed at the
    /// terminal; it should be fed directly into `TurnEngine::handle_incoming_message`.
    pub fn new(slot: impl Into<String>, inbound_tx: mpsc::Sender<IncomingMessage>) -> Self {
        Self {
            slot: slot.into(),
            status: Arc::new(Mutex::new(ChannelStatus::Disconnected)),
            inbound_tx,
            next_message_id: Arc::new(AtomicU64::new(1)),
            reader_task: None,
            stopped: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        ChatId::new(format!("cli:{}", self.slot))
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        let chat_id = self.chat_id();
        let tx = self.inbound_tx.clone();
        let counter = self.next_message_id.clone();
        let stopped = self.stopped.clone();

        let handle = tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut lines = BufReader::new(stdin).lines();
            loop {
                if stopped.load(Ordering::SeqCst) != 0 {
                    break;
                }
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        let msg = IncomingMessage {
                            channel: "cli".to_string(),
                            chat_id: chat_id.clone(),
                            message_id: format!("cli:{}", counter.fetch_add(1, Ordering::SeqCst)),
                            author_id: "operator".to_string(),
                            author_display_name: None,
                            text: line,
                            attachments: None,
                            is_group: false,
                            mentioned: None,
                            is_operator: Some(true),
                            timestamp_ms: chrono::Utc::now().timestamp_millis(),
                        };
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "cli channel: stdin read error");
                        break;
                    }
                }
            }
        });

        self.reader_task = Some(handle);
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        info!(slot = %self.slot, "cli channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.stopped.store(1, Ordering::SeqCst);
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
        }
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, _chat_id: &str, action: &OutgoingAction) -> Result<(), ChannelError> {
        match action {
            OutgoingAction::Silence { .. } => {}
            OutgoingAction::SendText(t) => println!("{}", t.text),
            OutgoingAction::SendAudio(a) => {
                println!("[audio reply, {} bytes, {}]", a.bytes.len(), a.mime)
            }
            OutgoingAction::React(r) => println!("[reacted {} to {}]", r.emoji, r.target_author_id),
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_id_uses_slot_format() {
        let (tx, _rx) = mpsc::channel(1);
        let chan = CliChannel::new("local", tx);
        assert_eq!(chan.chat_id().as_str(), "cli:local");
    }

    #[tokio::test]
    async fn send_silence_is_a_noop() {
        let (tx, _rx) = mpsc::channel(1);
        let chan = CliChannel::new("local", tx);
        let result = chan
            .send("cli:local", &OutgoingAction::silence("duplicate_message"))
            .await;
        assert!(result.is_ok());
    }
}
