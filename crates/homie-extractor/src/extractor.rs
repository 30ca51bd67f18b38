use std::sync::Arc;

use homie_memory::{FactCategory, MemoryStore, RetrievalWeights};
use homie_scheduler::{EventKind, NewEvent, ProactiveScheduler, Recurrence};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::model::FastModel;
use crate::types::{ExtractionResult, ReconcileActionType, ReconcileResult, TurnText};

const PASS1_SYSTEM_PROMPT: &str = "You extract durable facts and future events from a conversation turn. \
Only attribute statements to the human speaker; never record something the assistant said about itself as a fact about the human. \
Return strictly JSON: {\"facts\":[{\"content\":string,\"category\":string}],\"events\":[{\"kind\":string,\"subject\":string,\"triggerAtMs\":number,\"recurrence\":string|null}]}. \
Return empty arrays for small talk and greetings.";

const RECONCILE_SYSTEM_PROMPT: &str = "You reconcile newly observed facts against a person's existing fact list. \
For each candidate, decide whether it should be added as new, should update an existing fact (by index), should delete a now-false existing fact, or requires no change. \
Return strictly JSON: {\"actions\":[{\"type\":\"add\"|\"update\"|\"delete\"|\"none\",\"existingIdx\":number|null,\"content\":string|null}]}.";

const MAX_RECONCILE_CANDIDATES: usize = 30;
const EVENT_MIN_LEAD_MS: i64 = -5 * 60 * 1000;
const EVENT_MAX_LEAD_MS: i64 = 366 * 24 * 3600 * 1000;

/// Background, off-critical-path pipeline that turns a finished turn's
/// text into durable facts and scheduled events. Any failure here is
/// swallowed; it never surfaces to the turn that triggered it.
pub struct MemoryExtractor {
    memory: Arc<MemoryStore>,
    scheduler: Arc<ProactiveScheduler>,
    model: Arc<dyn FastModel>,
    weights: RetrievalWeights,
}

impl MemoryExtractor {
    pub fn new(memory: Arc<MemoryStore>, scheduler: Arc<ProactiveScheduler>, model: Arc<dyn FastModel>) -> Self {
        Self {
            memory,
            scheduler,
            model,
            weights: RetrievalWeights::default(),
        }
    }

    /// Runs both passes for one turn. Never returns an error to the
    /// caller; extraction failures are logged and dropped.
    #[instrument(skip(self, turn), fields(chat_id = %turn.chat_id))]
    pub async fn run(&self, turn: TurnText, now_ms: i64) {
        if let Err(err) = self.run_inner(&turn, now_ms).await {
            warn!(error = %err, "memory extraction failed, continuing without a lesson");
        }
    }

    async fn run_inner(&self, turn: &TurnText, now_ms: i64) -> Result<()> {
        let extraction = match self.pass1_extract(turn).await {
            Some(result) => result,
            None => return Ok(()),
        };

        if !extraction.events.is_empty() && !turn.is_group {
            for event in &extraction.events {
                let in_range = event.trigger_at_ms >= now_ms + EVENT_MIN_LEAD_MS
                    && event.trigger_at_ms <= now_ms + EVENT_MAX_LEAD_MS;
                if !in_range {
                    continue;
                }
                let new_event = NewEvent {
                    kind: EventKind::parse(&event.kind),
                    subject: event.subject.clone(),
                    chat_id: turn.chat_id.clone(),
                    trigger_at_ms: event.trigger_at_ms,
                    recurrence: Recurrence::parse(event.recurrence.as_deref()),
                };
                self.scheduler.add_event(new_event, now_ms)?;
            }
        }

        if extraction.facts.is_empty() {
            return Ok(());
        }
        let Some(person_id) = turn.person_id.as_deref() else {
            return Ok(());
        };

        self.pass2_reconcile(person_id, &extraction, now_ms).await?;
        Ok(())
    }

    async fn pass1_extract(&self, turn: &TurnText) -> Option<ExtractionResult> {
        let user_prompt = format!(
            "USER: {}\nFRIEND: {}",
            turn.user_text.trim(),
            turn.assistant_text.trim()
        );
        let raw = self.model.complete(PASS1_SYSTEM_PROMPT, &user_prompt).await?;
        match serde_json::from_str::<ExtractionResult>(&raw) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(error = %err, "pass1 extraction returned unparseable JSON, dropping turn");
                None
            }
        }
    }

    async fn pass2_reconcile(&self, person_id: &str, extraction: &ExtractionResult, now_ms: i64) -> Result<()> {
        let joined_query = extraction
            .facts
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let existing = self
            .memory
            .hybrid_search_facts(&joined_query, MAX_RECONCILE_CANDIDATES, &self.weights, None)?;

        let prompt = self.reconcile_prompt(&existing, extraction);
        let raw = self.model.complete(RECONCILE_SYSTEM_PROMPT, &prompt).await;
        let reconciled = raw.and_then(|text| serde_json::from_str::<ReconcileResult>(&text).ok());

        match reconciled {
            Some(result) if !result.actions.is_empty() => {
                for action in result.actions {
                    self.apply_action(person_id, &existing, &action, now_ms)?;
                }
            }
            _ => {
                // Parse failure (or an empty action list): fall back to adding every candidate.
                for fact in &extraction.facts {
                    self.memory.add_fact(
                        Some(person_id),
                        "general",
                        &fact.content,
                        FactCategory::parse(&fact.category),
                        None,
                        now_ms,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn apply_action(
        &self,
        person_id: &str,
        existing: &[homie_memory::ScoredFact],
        action: &crate::types::ReconcileAction,
        now_ms: i64,
    ) -> Result<()> {
        match action.action_type {
            ReconcileActionType::Add => {
                if let Some(content) = &action.content {
                    self.memory
                        .add_fact(Some(person_id), "general", content, FactCategory::Misc, None, now_ms)?;
                }
            }
            ReconcileActionType::Update => {
                if let (Some(idx), Some(content)) = (action.existing_idx, &action.content) {
                    if let Some(scored) = existing.get(idx) {
                        self.memory.update_fact(scored.fact.id, content, None)?;
                    }
                }
            }
            ReconcileActionType::Delete => {
                if let Some(idx) = action.existing_idx {
                    if let Some(scored) = existing.get(idx) {
                        self.memory.delete_fact(scored.fact.id)?;
                    }
                }
            }
            ReconcileActionType::None => {}
        }
        Ok(())
    }

    fn reconcile_prompt(&self, existing: &[homie_memory::ScoredFact], extraction: &ExtractionResult) -> String {
        let mut prompt = String::from("EXISTING FACTS:\n");
        for (idx, scored) in existing.iter().enumerate() {
            prompt.push_str(&format!("{idx}. {}\n", scored.fact.content));
        }
        prompt.push_str("\nCANDIDATE FACTS:\n");
        for candidate in &extraction.facts {
            prompt.push_str(&format!("- {}\n", candidate.content));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rusqlite::Connection;

    struct StubModel {
        pass1: &'static str,
        pass2: &'static str,
    }

    #[async_trait]
    impl FastModel for StubModel {
        async fn complete(&self, system: &str, _user: &str) -> Option<String> {
            if system == PASS1_SYSTEM_PROMPT {
                Some(self.pass1.to_string())
            } else {
                Some(self.pass2.to_string())
            }
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ProactiveScheduler>) {
        let mem_conn = Connection::open_in_memory().unwrap();
        homie_memory::db::init_db(&mem_conn).unwrap();
        let memory = Arc::new(MemoryStore::new(mem_conn));

        let sched_conn = Connection::open_in_memory().unwrap();
        homie_scheduler::db::init_db(&sched_conn).unwrap();
        let scheduler = Arc::new(ProactiveScheduler::new(sched_conn));
        (memory, scheduler)
    }

    #[tokio::test]
    async fn small_talk_extracts_nothing() {
        let (memory, scheduler) = setup();
        let model: Arc<dyn FastModel> = Arc::new(StubModel {
            pass1: r#"{"facts":[],"events":[]}"#,
            pass2: r#"{"actions":[]}"#,
        });
        let extractor = MemoryExtractor::new(memory.clone(), scheduler, model);
        let turn = TurnText {
            chat_id: "cli:local".into(),
            person_id: Some("person:cli:u1".into()),
            is_group: false,
            user_text: "hey".into(),
            assistant_text: "hey!".into(),
            timestamp_ms: 0,
        };
        extractor.run(turn, 0).await;

        let found = memory.hybrid_search_facts("hey", 10, &RetrievalWeights::default(), None).unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn group_events_are_never_scheduled() {
        let (memory, scheduler) = setup();
        let model: Arc<dyn FastModel> = Arc::new(StubModel {
            pass1: r#"{"facts":[],"events":[{"kind":"reminder","subject":"standup","triggerAtMs":86400000,"recurrence":null}]}"#,
            pass2: r#"{"actions":[]}"#,
        });
        let extractor = MemoryExtractor::new(memory, scheduler.clone(), model);
        let turn = TurnText {
            chat_id: "tg:-100".into(),
            person_id: None,
            is_group: true,
            user_text: "remind us tomorrow".into(),
            assistant_text: "ok".into(),
            timestamp_ms: 0,
        };
        extractor.run(turn, 0).await;

        let claimed = scheduler.claim_pending_events(i64::MAX, i64::MAX, 10, 60_000).unwrap();
        assert!(claimed.is_empty());
    }
}
