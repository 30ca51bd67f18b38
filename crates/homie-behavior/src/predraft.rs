use async_trait::async_trait;
use homie_core::config::BehaviorConfig;
use homie_core::IncomingMessage;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::sleep::is_sleep_window_active;
use crate::velocity::{snapshot, RecentMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum PreDraftDecision {
    Send,
    Silence { reason: &'static str },
    React { emoji: String, reason: Option<String> },
}

/// The group-only fast-model engagement check, invoked with recent
/// history and the text that just arrived. Kept as an injected trait so
/// this crate never depends on a concrete backend.
#[async_trait]
pub trait EngagementGate: Send + Sync {
    async fn evaluate(&self, history: &[RecentMessage], incoming_text: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum GateAction {
    Send,
    React,
    Silence,
}

#[derive(Debug, Deserialize)]
struct GateResponse {
    action: GateAction,
    emoji: Option<String>,
    reason: Option<String>,
}

const VELOCITY_WINDOW_MS: i64 = 120_000;
const MAX_ENGAGEMENT_HISTORY: usize = 12;

/// Stateless pre-draft policy: sleep window, velocity snapshot, decision
/// table, and (for groups) the fast-model engagement gate.
pub struct BehaviorEngine {
    config: BehaviorConfig,
}

impl BehaviorEngine {
    pub fn new(config: BehaviorConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self, msg, history, gate), fields(chat_id = %msg.chat_id))]
    pub async fn decide_pre_draft(
        &self,
        msg: &IncomingMessage,
        history: &[RecentMessage],
        now_ms: i64,
        gate: Option<&dyn EngagementGate>,
    ) -> PreDraftDecision {
        if self.config.sleep.enabled
            && !msg.is_command()
            && is_sleep_window_active(&self.config.sleep, now_ms)
        {
            return PreDraftDecision::Silence { reason: "sleep" };
        }

        let snap = snapshot(history, &msg.text, now_ms, VELOCITY_WINDOW_MS);

        if msg.is_group && snap.is_rapid_dialogue {
            return PreDraftDecision::Silence { reason: "rapid_dialogue" };
        }
        if msg.is_group && snap.is_burst {
            return PreDraftDecision::Silence { reason: "wait_burst" };
        }
        if snap.is_continuation {
            return PreDraftDecision::Silence { reason: "wait_continuation" };
        }

        if msg.is_group {
            if let Some(gate) = gate {
                let tail: Vec<&RecentMessage> = history
                    .iter()
                    .rev()
                    .take(MAX_ENGAGEMENT_HISTORY)
                    .collect();
                let tail: Vec<RecentMessage> = tail.into_iter().rev().cloned().collect();
                if let Some(raw) = gate.evaluate(&tail, &msg.text).await {
                    match serde_json::from_str::<GateResponse>(&raw) {
                        Ok(parsed) => match parsed.action {
                            GateAction::Send => {}
                            GateAction::React => {
                                return PreDraftDecision::React {
                                    emoji: parsed.emoji.unwrap_or_else(|| "👍".into()),
                                    reason: parsed.reason,
                                };
                            }
                            GateAction::Silence => {
                                return PreDraftDecision::Silence { reason: "engagement_gate" };
                            }
                        },
                        Err(err) => {
                            warn!(error = %err, "engagement gate returned unparseable JSON, defaulting to send");
                        }
                    }
                }
            }
        }

        PreDraftDecision::Send
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(is_group: bool, text: &str) -> IncomingMessage {
        IncomingMessage {
            channel: "cli".into(),
            chat_id: "cli:local".into(),
            message_id: "1".into(),
            author_id: "u1".into(),
            author_display_name: None,
            text: text.into(),
            attachments: None,
            is_group,
            mentioned: None,
            is_operator: None,
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn sleep_window_silences_non_commands() {
        let mut config = BehaviorConfig::default();
        config.sleep.enabled = true;
        config.sleep.timezone = "UTC".into();
        config.sleep.start_local = "00:00".into();
        config.sleep.end_local = "23:59".into();
        let engine = BehaviorEngine::new(config);

        let decision = engine.decide_pre_draft(&msg(false, "hey"), &[], 1_000, None).await;
        assert_eq!(decision, PreDraftDecision::Silence { reason: "sleep" });
    }

    #[tokio::test]
    async fn continuation_text_waits() {
        let engine = BehaviorEngine::new(BehaviorConfig::default());
        let decision = engine
            .decide_pre_draft(&msg(false, "so anyway and"), &[], 0, None)
            .await;
        assert_eq!(decision, PreDraftDecision::Silence { reason: "wait_continuation" });
    }

    #[tokio::test]
    async fn plain_dm_sends() {
        let engine = BehaviorEngine::new(BehaviorConfig::default());
        let decision = engine.decide_pre_draft(&msg(false, "hello there"), &[], 0, None).await;
        assert_eq!(decision, PreDraftDecision::Send);
    }

    struct StubGate(&'static str);

    #[async_trait]
    impl EngagementGate for StubGate {
        async fn evaluate(&self, _history: &[RecentMessage], _incoming_text: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn group_engagement_gate_can_react() {
        let engine = BehaviorEngine::new(BehaviorConfig::default());
        let gate = StubGate(r#"{"action":"react","emoji":"😂"}"#);
        let decision = engine
            .decide_pre_draft(&msg(true, "lol nice"), &[], 0, Some(&gate))
            .await;
        assert_eq!(
            decision,
            PreDraftDecision::React {
                emoji: "😂".into(),
                reason: None
            }
        );
    }

    #[tokio::test]
    async fn group_engagement_gate_parse_failure_falls_back_to_send() {
        let engine = BehaviorEngine::new(BehaviorConfig::default());
        let gate = StubGate("not json");
        let decision = engine
            .decide_pre_draft(&msg(true, "whatever"), &[], 0, Some(&gate))
            .await;
        assert_eq!(decision, PreDraftDecision::Send);
    }
}
