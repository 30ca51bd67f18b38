use serde::{Deserialize, Serialize};

/// Role of a single row in a chat's message log. `System` rows are only
/// ever produced by [`crate::manager::SessionStore::compact_if_needed`] —
/// the turn engine treats them as the only trusted system-role content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// A single persisted row of a chat's append-only message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: i64,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at_ms: i64,
}

/// A row to be appended. `created_at_ms` is supplied by the caller (not
/// taken from wall-clock inside the store) so tests can control ordering.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at_ms: i64,
}

pub const SUMMARY_HEADER: &str = "=== CONVERSATION SUMMARY ===";
pub const PERSONA_REMINDER_HEADER: &str = "=== PERSONA REMINDER ===";
