use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{ChatId, IncomingMessage};

/// Upper bound on the debounce delay returned by `push_and_get_debounce_ms`.
const MAX_DEBOUNCE_MS: i64 = 10_000;

/// Debounces bursts of incoming messages into a single logical turn.
///
/// Holds per-chat buffers of in-flight messages. Draining and pushing for the
/// same chat are expected to be serialized by the caller's `PerKeyLock`
/// (see `homie-agent::TurnEngine`) — this type itself is just a `Mutex`-guarded
/// map and does not attempt chat-level exclusion on its own.
pub struct MessageAccumulator {
    state: Mutex<HashMap<ChatId, ChatBuffer>>,
    /// Configured base debounce delay in milliseconds.
    debounce_ms: i64,
}

#[derive(Default)]
struct ChatBuffer {
    messages: Vec<IncomingMessage>,
    last_push_ms: Option<i64>,
}

impl MessageAccumulator {
    pub fn new(debounce_ms: i64) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            debounce_ms,
        }
    }

    /// Append `msg` to its chat's buffer and compute the debounce delay.
    ///
    /// Clamp rules, evaluated in order:
    /// 1. commands (`text` starts with `/`) → 0
    /// 2. attachments present → 0
    /// 3. group message where `mentioned` is true → 0
    /// 4. otherwise `min(debounce_ms, min(elapsed_since_last_push, 10s))`,
    ///    where `elapsed_since_last_push` is treated as unbounded (so the
    ///    min collapses to `debounce_ms`) on the first message seen for a
    ///    chat.
    pub fn push_and_get_debounce_ms(&self, msg: IncomingMessage, now_ms: i64) -> i64 {
        let chat_id = msg.chat_id.clone();
        let is_command = msg.is_command();
        let has_attachments = msg.has_attachments();
        let mentioned_in_group = msg.is_group && msg.mentioned.unwrap_or(false);

        let mut state = self.state.lock().unwrap();
        let buf = state.entry(chat_id).or_default();

        let ms = if is_command || has_attachments || mentioned_in_group {
            0
        } else {
            match buf.last_push_ms {
                Some(last) => {
                    let elapsed = (now_ms - last).max(0).min(MAX_DEBOUNCE_MS);
                    self.debounce_ms.min(elapsed)
                }
                None => self.debounce_ms,
            }
        };

        buf.messages.push(msg);
        buf.last_push_ms = Some(now_ms);

        ms.clamp(0, MAX_DEBOUNCE_MS)
    }

    /// Return the buffered messages for `chat_id` in arrival order and clear
    /// the buffer (including the last-push timestamp, so the next message
    /// starts a fresh debounce window).
    pub fn drain(&self, chat_id: &ChatId) -> Vec<IncomingMessage> {
        let mut state = self.state.lock().unwrap();
        match state.remove(chat_id) {
            Some(buf) => buf.messages,
            None => Vec::new(),
        }
    }

    /// True if a newer message has arrived for `chat_id` than `since_ms`.
    /// Used by the turn engine's stale-discard check (original spec §4.7 step 8).
    pub fn has_newer_than(&self, chat_id: &ChatId, since_ms: i64) -> bool {
        let state = self.state.lock().unwrap();
        state
            .get(chat_id)
            .map(|buf| buf.messages.iter().any(|m| m.timestamp_ms > since_ms))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(chat: &str, text: &str, is_group: bool, mentioned: Option<bool>, ts: i64) -> IncomingMessage {
        IncomingMessage {
            channel: "cli".into(),
            chat_id: ChatId::from(chat),
            message_id: format!("m-{ts}"),
            author_id: "u1".into(),
            author_display_name: None,
            text: text.into(),
            attachments: None,
            is_group,
            mentioned,
            is_operator: None,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn command_debounces_to_zero() {
        let acc = MessageAccumulator::new(3000);
        let ms = acc.push_and_get_debounce_ms(msg("c1", "/start", false, None, 1000), 1000);
        assert_eq!(ms, 0);
    }

    #[test]
    fn attachments_debounce_to_zero() {
        let acc = MessageAccumulator::new(3000);
        let mut m = msg("c1", "look", false, None, 1000);
        m.attachments = Some(vec![crate::types::Attachment {
            kind: "image".into(),
            filename: None,
            mime: None,
            size_bytes: None,
        }]);
        let ms = acc.push_and_get_debounce_ms(m, 1000);
        assert_eq!(ms, 0);
    }

    #[test]
    fn group_mention_debounces_to_zero() {
        let acc = MessageAccumulator::new(3000);
        let m = msg("c1", "hey", true, Some(true), 1000);
        let ms = acc.push_and_get_debounce_ms(m, 1000);
        assert_eq!(ms, 0);
    }

    #[test]
    fn first_message_uses_configured_debounce() {
        let acc = MessageAccumulator::new(3000);
        let ms = acc.push_and_get_debounce_ms(msg("c1", "hi", false, None, 1000), 1000);
        assert_eq!(ms, 3000);
    }

    #[test]
    fn rapid_followup_shrinks_to_elapsed() {
        let acc = MessageAccumulator::new(3000);
        acc.push_and_get_debounce_ms(msg("c1", "hi", false, None, 1000), 1000);
        let ms = acc.push_and_get_debounce_ms(msg("c1", "and", false, None, 1200), 1200);
        assert_eq!(ms, 200);
    }

    #[test]
    fn debounce_never_exceeds_ten_seconds() {
        let acc = MessageAccumulator::new(50_000);
        let ms = acc.push_and_get_debounce_ms(msg("c1", "hi", false, None, 1000), 1000);
        assert_eq!(ms, 10_000);
    }

    #[test]
    fn drain_returns_arrival_order_and_clears() {
        let acc = MessageAccumulator::new(3000);
        acc.push_and_get_debounce_ms(msg("c1", "a", false, None, 1000), 1000);
        acc.push_and_get_debounce_ms(msg("c1", "b", false, None, 1100), 1100);
        let drained = acc.drain(&ChatId::from("c1"));
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text, "a");
        assert_eq!(drained[1].text, "b");
        assert!(acc.drain(&ChatId::from("c1")).is_empty());
    }
}
