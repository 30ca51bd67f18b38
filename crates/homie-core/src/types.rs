use serde::{Deserialize, Serialize};

/// Stable chat identifier. Format is channel-specific — see §6 of the spec:
/// `cli:<slot>`, `signal:dm:<e164>`, `signal:group:<groupId>`, `tg:<userId>`,
/// `tg:<chatId>` (negative for Telegram groups).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Metadata-only attachment reference — the turn engine never inlines bytes
/// into prompts, only a description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: String,
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub size_bytes: Option<u64>,
}

/// A value produced by a channel adapter on receipt of an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel: String,
    pub chat_id: ChatId,
    /// Channel-unique message id, used for dedupe and for outbound-ledger
    /// reply matching.
    pub message_id: String,
    pub author_id: String,
    pub author_display_name: Option<String>,
    pub text: String,
    pub attachments: Option<Vec<Attachment>>,
    pub is_group: bool,
    pub mentioned: Option<bool>,
    pub is_operator: Option<bool>,
    pub timestamp_ms: i64,
}

impl IncomingMessage {
    pub fn is_command(&self) -> bool {
        self.text.starts_with('/')
    }

    pub fn has_attachments(&self) -> bool {
        self.attachments.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Media attached to an outbound text message (image/file references the
/// channel adapter is responsible for actually transmitting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendText {
    pub text: String,
    pub media: Option<Vec<MediaRef>>,
    pub tts_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAudio {
    pub text: String,
    pub mime: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub as_voice_note: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionTarget {
    pub emoji: String,
    pub target_author_id: String,
    pub target_timestamp_ms: i64,
}

/// The single value the turn engine (and the proactive scheduler) ever
/// produce. Every failure path in the engine converges on `Silence` — errors
/// are never surfaced to a channel adapter as exceptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingAction {
    Silence {
        reason: Option<String>,
    },
    SendText(SendText),
    SendAudio(SendAudio),
    React(ReactionTarget),
}

impl OutgoingAction {
    pub fn silence(reason: impl Into<String>) -> Self {
        Self::Silence {
            reason: Some(reason.into()),
        }
    }

    pub fn send_text(text: impl Into<String>) -> Self {
        Self::SendText(SendText {
            text: text.into(),
            media: None,
            tts_hint: None,
        })
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Self::Silence { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_display_roundtrips() {
        let id = ChatId::from("signal:dm:+15555550123");
        assert_eq!(id.to_string(), "signal:dm:+15555550123");
    }

    #[test]
    fn is_command_detects_leading_slash() {
        let msg = IncomingMessage {
            channel: "cli".into(),
            chat_id: ChatId::from("cli:local"),
            message_id: "1".into(),
            author_id: "u1".into(),
            author_display_name: None,
            text: "/help".into(),
            attachments: None,
            is_group: false,
            mentioned: None,
            is_operator: None,
            timestamp_ms: 0,
        };
        assert!(msg.is_command());
    }
}
