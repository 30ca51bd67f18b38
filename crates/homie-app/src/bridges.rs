//! Concrete implementations of the narrow traits the lower crates inject so
//! they never depend upward on `homie-agent`. Wired together once in `main`.

use std::sync::Arc;

use async_trait::async_trait;

use homie_agent::backend::{Backend, BackendRole, CompletionParams, MessageRole};
use homie_agent::BackendMessage;
use homie_behavior::{EngagementGate, RecentMessage};
use homie_extractor::FastModel as ExtractorFastModel;
use homie_memory::{MemoryStore, TrustTier};
use homie_scheduler::TrustResolver;

/// Splits a chat id of the form `<channel>:<rest>` the way every channel
/// adapter in this workspace constructs them (`cli:<slot>`,
/// `signal:dm:<e164>`, `signal:group:<id>`, `tg:<id>`). A `rest` containing
/// `"group"` is treated as a group chat; anything else is assumed to be the
/// remote party's channel user id.
fn split_chat_id(chat_id: &str) -> (&str, &str, bool) {
    let (channel, rest) = chat_id.split_once(':').unwrap_or((chat_id, ""));
    let is_group = rest.contains("group") || rest.starts_with('-');
    (channel, rest, is_group)
}

/// Resolves a chat id to its DM counterpart's trust tier via `homie-memory`.
/// Groups have no single trust tier, so the heartbeat loop never gates a
/// group send on this (see `TrustResolver`'s doc comment).
pub struct MemoryTrustResolver {
    memory: Arc<MemoryStore>,
}

impl MemoryTrustResolver {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl TrustResolver for MemoryTrustResolver {
    async fn resolve(&self, chat_id: &str) -> Option<(TrustTier, bool)> {
        let (channel, rest, is_group) = split_chat_id(chat_id);
        if is_group {
            return Some((TrustTier::GettingToKnow, true));
        }
        let person_id = homie_memory::Person::person_id(channel, rest);
        let person = self.memory.get_person(&person_id).ok()??;
        Some((person.trust_tier(), false))
    }
}

/// Drives the group engagement gate through a fast-tier backend
/// completion, asking for a small JSON verdict.
pub struct BackendEngagementGate {
    backend: Arc<dyn Backend>,
}

impl BackendEngagementGate {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

const ENGAGEMENT_GATE_SYSTEM: &str = "You decide whether a friend who is part of this group chat \
should reply to the latest message, react to it, or stay silent. Respond with exactly one line of \
JSON: {\"action\":\"send\"|\"react\"|\"silence\",\"emoji\":\"<only if react>\",\"reason\":\"<short, optional>\"}.";

#[async_trait]
impl EngagementGate for BackendEngagementGate {
    async fn evaluate(&self, history: &[RecentMessage], incoming_text: &str) -> Option<String> {
        let mut transcript = String::new();
        for m in history {
            transcript.push_str(&format!("{}: {}\n", m.author_id, m.text));
        }
        transcript.push_str(&format!("(latest) {incoming_text}"));

        let params = CompletionParams {
            role: BackendRole::Fast,
            system: ENGAGEMENT_GATE_SYSTEM.to_string(),
            max_steps: 1,
            messages: vec![BackendMessage {
                role: MessageRole::User,
                content: transcript,
            }],
            tools: Vec::new(),
            cancellation: None,
        };

        self.backend.complete(params).await.ok().map(|r| r.text)
    }
}

/// Wraps the same backend for `homie-extractor`'s fact-extraction passes,
/// which only need a plain system/user round trip, not the full turn-engine
/// contract.
pub struct BackendFastModel {
    backend: Arc<dyn Backend>,
}

impl BackendFastModel {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ExtractorFastModel for BackendFastModel {
    async fn complete(&self, system: &str, user: &str) -> Option<String> {
        let params = CompletionParams {
            role: BackendRole::Fast,
            system: system.to_string(),
            max_steps: 1,
            messages: vec![BackendMessage {
                role: MessageRole::User,
                content: user.to_string(),
            }],
            tools: Vec::new(),
            cancellation: None,
        };
        self.backend.complete(params).await.ok().map(|r| r.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_dm_chat_id() {
        assert_eq!(split_chat_id("cli:local"), ("cli", "local", false));
    }

    #[test]
    fn recognizes_group_marker() {
        assert_eq!(split_chat_id("signal:group:abc"), ("signal", "group:abc", true));
    }

    #[test]
    fn recognizes_negative_telegram_group_id() {
        assert_eq!(split_chat_id("tg:-10045"), ("tg", "-10045", true));
    }
}
