use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Reactive,
    Proactive,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Reactive => "reactive",
            MessageType::Proactive => "proactive",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "proactive" => MessageType::Proactive,
            _ => MessageType::Reactive,
        }
    }
}

/// What [`crate::manager::OutboundLedger::record_send`] appends — nearly
/// the full persisted row, minus the bookkeeping columns the store itself
/// owns (`got_reply`, `refinement`, `lesson_logged`, `id`).
#[derive(Debug, Clone)]
pub struct NewSend {
    pub chat_id: String,
    pub text: String,
    pub message_type: MessageType,
    pub sent_at_ms: i64,
    pub ref_key: Option<String>,
    pub person_id: Option<String>,
    pub is_group: bool,
    pub primary_channel_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundRow {
    pub id: i64,
    pub chat_id: String,
    pub ref_key: Option<String>,
    pub text: String,
    pub sent_at_ms: i64,
    pub is_group: bool,
    pub primary_channel_user_id: Option<String>,
    pub person_id: Option<String>,
    pub message_type: MessageType,
    pub got_reply: bool,
    pub refinement: bool,
    pub lesson_logged: bool,
}
