use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use homie_core::config::HomieConfig;
use homie_core::{ChatId, IncomingMessage, MessageAccumulator, OutgoingAction, PerKeyLock, ReactionTarget};
use homie_behavior::{
    collapse_newlines_for_group, post_draft_slop_check, BehaviorEngine, EngagementGate,
    PreDraftDecision, RecentMessage,
};
use homie_extractor::{MemoryExtractor, TurnText};
use homie_ledger::{MessageType, NewSend, OutboundLedger};
use homie_memory::{LessonType, MemoryStore, Person, RetrievalWeights};
use homie_scheduler::{DeliverOutcome, ProactiveEvent, ProactiveScheduler};
use homie_sessions::{NewMessage, Role as SessionRole, SessionStore};

use crate::backend::{Backend, BackendMessage, BackendRole, CompletionParams, MessageRole};
use crate::dedupe::DedupeCache;
use crate::prompt::{external_data_message, PromptBuilder, SessionInfo};
use crate::tools::{select_tools, ToolDefinition};

const MAX_HISTORY_MESSAGES: usize = 40;
const MAX_SESSION_NOTES: usize = 5;
const MAX_RETRIEVED_FACTS: usize = 10;
const MAX_RETRIEVED_EPISODES: usize = 5;
const DEFAULT_MAX_STEPS: u32 = 6;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything `TurnEngine` needs beyond its own internal state. Constructed
/// once in `homie-app` and handed over at startup.
pub struct TurnEngine {
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    ledger: Arc<OutboundLedger>,
    scheduler: Arc<ProactiveScheduler>,
    behavior: Arc<BehaviorEngine>,
    extractor: Arc<MemoryExtractor>,
    backend: Arc<dyn Backend>,
    engagement_gate: Option<Arc<dyn EngagementGate>>,
    prompt: Mutex<PromptBuilder>,
    dedupe: DedupeCache<(ChatId, String)>,
    locks: PerKeyLock<ChatId>,
    accumulator: MessageAccumulator,
    tool_catalog: Vec<ToolDefinition>,
    config: HomieConfig,
    retrieval_weights: RetrievalWeights,
    background: Mutex<JoinSet<()>>,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionStore>,
        memory: Arc<MemoryStore>,
        ledger: Arc<OutboundLedger>,
        scheduler: Arc<ProactiveScheduler>,
        extractor: Arc<MemoryExtractor>,
        backend: Arc<dyn Backend>,
        engagement_gate: Option<Arc<dyn EngagementGate>>,
        tool_catalog: Vec<ToolDefinition>,
        config: HomieConfig,
    ) -> Self {
        let behavior = Arc::new(BehaviorEngine::new(config.behavior.clone()));
        let prompt = PromptBuilder::load(&config.paths.identity_dir, compile_behavior_rules(&config));
        let retrieval_weights = RetrievalWeights {
            rrf_k: config.memory.retrieval.rrf_k,
            fts_weight: config.memory.retrieval.fts_weight,
            vec_weight: config.memory.retrieval.vec_weight,
            recency_weight: config.memory.retrieval.recency_weight,
            half_life_days: config.memory.decay.half_life_days,
        };

        Self {
            sessions,
            memory,
            ledger,
            scheduler,
            behavior,
            extractor,
            backend,
            engagement_gate,
            prompt: Mutex::new(prompt),
            dedupe: DedupeCache::default(),
            locks: PerKeyLock::new(),
            accumulator: MessageAccumulator::new(config.behavior.debounce_ms),
            tool_catalog,
            config,
            retrieval_weights,
            background: Mutex::new(JoinSet::new()),
        }
    }

    #[instrument(skip(self, msg, cancellation), fields(chat_id = %msg.chat_id, message_id = %msg.message_id))]
    pub async fn handle_incoming_message(
        &self,
        msg: IncomingMessage,
        cancellation: CancellationToken,
    ) -> OutgoingAction {
        let now_ms = msg.timestamp_ms;
        let dedupe_key = (msg.chat_id.clone(), msg.message_id.clone());
        if self.dedupe.check_and_insert(dedupe_key, now_ms) {
            return OutgoingAction::silence("duplicate_message");
        }

        // Pushed before the per-chat lock is acquired so a message that
        // arrives while another turn on this chat is mid-flight still lands
        // in the batch that turn's *next* lock acquisition will drain,
        // rather than queuing invisibly behind a lock that already closed
        // its batch.
        let debounce_ms = self.accumulator.push_and_get_debounce_ms(msg.clone(), now_ms);

        let chat_id = msg.chat_id.clone();
        self.locks
            .run_exclusive(chat_id, || self.process_turn(msg, now_ms, debounce_ms, cancellation))
            .await
    }

    async fn process_turn(
        &self,
        msg: IncomingMessage,
        now_ms: i64,
        debounce_ms: i64,
        cancellation: CancellationToken,
    ) -> OutgoingAction {
        if debounce_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(debounce_ms as u64)) => {}
                _ = cancellation.cancelled() => return OutgoingAction::silence("cancelled"),
            }
        }

        let mut batch = self.accumulator.drain(&msg.chat_id);
        if batch.is_empty() {
            batch.push(msg.clone());
        }
        let head = batch.last().cloned().unwrap_or(msg);
        let combined_text = combine_batch(&batch);

        if let Err(err) = self.sessions.append_message(NewMessage {
            chat_id: head.chat_id.to_string(),
            role: SessionRole::User,
            content: combined_text.clone(),
            created_at_ms: now_ms,
        }) {
            warn!(error = %err, "failed to persist user turn");
            return OutgoingAction::silence("turn_error");
        }

        let person = self
            .memory
            .track_person(&head.channel, &head.author_id, head.author_display_name.as_deref(), now_ms)
            .ok();

        let recent: Vec<RecentMessage> = batch
            .iter()
            .map(|m| RecentMessage {
                author_id: m.author_id.clone(),
                text: m.text.clone(),
                timestamp_ms: m.timestamp_ms,
            })
            .collect();

        let gate = self.engagement_gate.as_deref();
        let decision = self
            .behavior
            .decide_pre_draft(&head, &recent, now_ms, gate)
            .await;

        match decision {
            PreDraftDecision::Silence { reason } => {
                let _ = self.memory.add_lesson(
                    LessonType::Observation,
                    "silence_decision",
                    reason,
                    None,
                    None,
                    person.as_ref().map(|p| p.id.as_str()),
                    &[],
                    0.5,
                    now_ms,
                );
                return OutgoingAction::silence(reason);
            }
            PreDraftDecision::React { emoji, .. } => {
                let _ = self.sessions.append_message(NewMessage {
                    chat_id: head.chat_id.to_string(),
                    role: SessionRole::Assistant,
                    content: format!("[REACTION] {emoji}"),
                    created_at_ms: now_ms,
                });
                let _ = self.memory.add_episode(
                    head.chat_id.as_str(),
                    person.as_ref().map(|p| p.id.as_str()),
                    head.is_group,
                    &format!("USER: {combined_text}\nFRIEND: [reacted {emoji}]"),
                    now_ms,
                );
                return OutgoingAction::React(ReactionTarget {
                    emoji,
                    target_author_id: head.author_id.clone(),
                    target_timestamp_ms: head.timestamp_ms,
                });
            }
            PreDraftDecision::Send => {}
        }

        let system = self.build_system_prompt(&head, person.as_ref(), now_ms);
        let mut messages = self.build_external_messages(&head, person.as_ref(), &combined_text);
        messages.extend(self.load_conversation_history(head.chat_id.as_str()));
        messages.push(BackendMessage {
            role: MessageRole::User,
            content: combined_text.clone(),
        });

        let tools = select_tools(
            &self.tool_catalog,
            head.is_operator.unwrap_or(false),
            &self.config.tools,
            &combined_text,
        );

        let params = CompletionParams {
            role: BackendRole::Default,
            system,
            max_steps: DEFAULT_MAX_STEPS,
            messages,
            tools,
            cancellation: Some(cancellation.clone()),
        };

        let result = match self
            .complete_with_overflow_recovery(head.chat_id.as_str(), params.clone())
            .await
        {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "turn completion failed");
                return OutgoingAction::silence("turn_error");
            }
        };

        if self.accumulator.has_newer_than(&head.chat_id, now_ms) {
            return OutgoingAction::silence("stale_discard");
        }

        let mut draft = result.text;
        let check = post_draft_slop_check(
            &draft,
            head.is_group,
            self.config.behavior.group_max_chars,
            self.config.behavior.dm_max_chars,
        );
        if check.is_slop {
            let hint = format!(
                "\n\nYour previous draft was rejected for: {}. Write a new reply that avoids these.",
                check.violations.join(", ")
            );
            let mut regen_params = params;
            regen_params.system.push_str(&hint);
            if let Ok(regen) = self
                .complete_with_overflow_recovery(head.chat_id.as_str(), regen_params)
                .await
            {
                draft = regen.text;
            }
        }

        if head.is_group {
            draft = collapse_newlines_for_group(&draft);
        }

        if draft.trim().is_empty() {
            return OutgoingAction::silence("empty_output");
        }

        let _ = self.sessions.append_message(NewMessage {
            chat_id: head.chat_id.to_string(),
            role: SessionRole::Assistant,
            content: draft.clone(),
            created_at_ms: now_ms,
        });

        let ref_key = format!("{}:{}", head.chat_id, head.message_id);
        let _ = self.ledger.record_send(NewSend {
            chat_id: head.chat_id.to_string(),
            text: draft.clone(),
            message_type: MessageType::Reactive,
            sent_at_ms: now_ms,
            ref_key: Some(ref_key),
            person_id: person.as_ref().map(|p| p.id.clone()),
            is_group: head.is_group,
            primary_channel_user_id: Some(head.author_id.clone()),
        });

        let _ = self.memory.add_episode(
            head.chat_id.as_str(),
            person.as_ref().map(|p| p.id.as_str()),
            head.is_group,
            &format!("USER: {combined_text}\nFRIEND: {draft}"),
            now_ms,
        );

        self.spawn_extraction(TurnText {
            chat_id: head.chat_id.to_string(),
            person_id: person.map(|p| p.id),
            is_group: head.is_group,
            user_text: combined_text,
            assistant_text: draft.clone(),
            timestamp_ms: now_ms,
        });

        info!(chat_id = %head.chat_id, "turn complete");
        OutgoingAction::send_text(draft)
    }

    /// Drives a proactive event to completion without the dedupe/accumulate
    /// steps a user-initiated turn needs — there is no inbound message to
    /// deduplicate against.
    #[instrument(skip(self, event), fields(chat_id = %event.chat_id, kind = ?event.kind))]
    pub async fn handle_proactive_event(&self, event: &ProactiveEvent) -> OutgoingAction {
        let now_ms = event.trigger_at_ms;
        let chat_id = ChatId::from(event.chat_id.clone());

        let system = format!(
            "{}\n\n[Proactive trigger: {} — {}. Write a short, in-character message. \
             If it no longer makes sense to reach out, reply with exactly NO_OP.]",
            self.prompt.lock().unwrap().build_prompt(None, None).to_plain_text(),
            event.kind.as_str(),
            event.subject,
        );
        let history = self.load_conversation_history(chat_id.as_str());

        let params = CompletionParams {
            role: BackendRole::Default,
            system,
            max_steps: DEFAULT_MAX_STEPS,
            messages: history,
            tools: Vec::new(),
            cancellation: None,
        };

        let result = match self.complete_with_overflow_recovery(chat_id.as_str(), params).await {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "proactive completion failed");
                return OutgoingAction::silence("turn_error");
            }
        };

        let draft = result.text.trim().to_string();
        if draft.is_empty() || draft == "NO_OP" {
            return OutgoingAction::silence("proactive_declined");
        }

        let _ = self.sessions.append_message(NewMessage {
            chat_id: chat_id.to_string(),
            role: SessionRole::Assistant,
            content: draft.clone(),
            created_at_ms: now_ms,
        });
        let _ = self.ledger.record_send(NewSend {
            chat_id: chat_id.to_string(),
            text: draft.clone(),
            message_type: MessageType::Proactive,
            sent_at_ms: now_ms,
            ref_key: None,
            person_id: None,
            is_group: is_group_chat_id(chat_id.as_str()),
            primary_channel_user_id: None,
        });
        let _ = self.memory.add_episode(
            chat_id.as_str(),
            None,
            is_group_chat_id(chat_id.as_str()),
            &format!("FRIEND: {draft}"),
            now_ms,
        );

        OutgoingAction::send_text(draft)
    }

    /// Waits for background memory-extraction tasks to finish, up to
    /// [`DRAIN_TIMEOUT`]. Called during ordered shutdown.
    pub async fn drain(&self) {
        let mut set = std::mem::replace(&mut *self.background.lock().unwrap(), JoinSet::new());
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while set.join_next().await.is_some() {}
        })
        .await;
    }

    fn spawn_extraction(&self, turn: TurnText) {
        let extractor = self.extractor.clone();
        let now_ms = turn.timestamp_ms;
        self.background
            .lock()
            .unwrap()
            .spawn(async move { extractor.run(turn, now_ms).await });
    }

    async fn complete_with_overflow_recovery(
        &self,
        chat_id: &str,
        params: CompletionParams,
    ) -> Result<crate::backend::CompletionResult, crate::backend::BackendError> {
        match self.backend.complete(params.clone()).await {
            Ok(r) => Ok(r),
            Err(crate::backend::BackendError::ContextOverflow) => {
                let persona_reminder = "Stay in character; keep replies natural and brief.";
                let _ = self.sessions.compact_if_needed(
                    chat_id,
                    self.config.memory.context_budget_tokens as i64,
                    persona_reminder,
                    true,
                    |window| Some(truncate_for_summary(window)),
                );
                self.backend.complete(params).await
            }
            Err(err) => Err(err),
        }
    }

    fn build_system_prompt(&self, msg: &IncomingMessage, person: Option<&Person>, now_ms: i64) -> String {
        let person_context = person.and_then(|p| p.capsule.clone());
        let turn_count = self
            .sessions
            .get_messages(msg.chat_id.as_str(), MAX_HISTORY_MESSAGES)
            .map(|m| m.len() as u32)
            .unwrap_or(0);
        let session_info = SessionInfo {
            session_key: msg.chat_id.to_string(),
            turn_count,
            timestamp: chrono::DateTime::from_timestamp_millis(now_ms)
                .unwrap_or_else(chrono::Utc::now)
                .format("%Y-%m-%d %H:%M UTC")
                .to_string(),
        };
        self.prompt
            .lock()
            .unwrap()
            .build_prompt(person_context.as_deref(), Some(&session_info))
            .to_plain_text()
    }

    fn build_external_messages(
        &self,
        msg: &IncomingMessage,
        person: Option<&Person>,
        query_text: &str,
    ) -> Vec<BackendMessage> {
        let mut out = Vec::new();

        let facts = self
            .memory
            .hybrid_search_facts(query_text, MAX_RETRIEVED_FACTS, &self.retrieval_weights, None)
            .unwrap_or_default();
        let episodes = self
            .memory
            .hybrid_search_episodes(query_text, MAX_RETRIEVED_EPISODES, &self.retrieval_weights, None)
            .unwrap_or_default();

        if !facts.is_empty() || !episodes.is_empty() || person.and_then(|p| p.capsule.as_ref()).is_some() {
            let mut body = String::new();
            if let Some(capsule) = person.and_then(|p| p.capsule.as_ref()) {
                body.push_str("Capsule: ");
                body.push_str(capsule);
                body.push('\n');
            }
            for f in &facts {
                body.push_str(&format!("- ({}) {}\n", f.fact.category.as_str(), f.fact.content));
            }
            for e in &episodes {
                body.push_str(&format!("- recalled: {}\n", e.episode.content));
            }
            out.push(external_data_message("memory_context", &body));
        }

        let notes: Vec<String> = self
            .sessions
            .get_messages(msg.chat_id.as_str(), MAX_HISTORY_MESSAGES)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.role == SessionRole::System)
            .map(|m| m.content)
            .take(MAX_SESSION_NOTES)
            .collect();
        if !notes.is_empty() {
            out.push(external_data_message("session_notes", &notes.join("\n")));
        }

        out
    }

    fn load_conversation_history(&self, chat_id: &str) -> Vec<BackendMessage> {
        self.sessions
            .get_messages(chat_id, MAX_HISTORY_MESSAGES)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.role != SessionRole::System)
            .map(|m| BackendMessage {
                role: match m.role {
                    SessionRole::Assistant => MessageRole::Assistant,
                    _ => MessageRole::User,
                },
                content: m.content,
            })
            .collect()
    }
}

/// Implements the scheduler's delivery contract by driving a proactive
/// event through this engine and handing the outcome to `sink`, which
/// forwards it to the right channel adapter.
pub struct EngineDeliveryHandler<F> {
    engine: Arc<TurnEngine>,
    sink: F,
}

impl<F> EngineDeliveryHandler<F>
where
    F: Fn(&str, OutgoingAction) -> DeliverOutcome + Send + Sync + 'static,
{
    pub fn new(engine: Arc<TurnEngine>, sink: F) -> Self {
        Self { engine, sink }
    }
}

#[async_trait::async_trait]
impl<F> homie_scheduler::DeliveryHandler for EngineDeliveryHandler<F>
where
    F: Fn(&str, OutgoingAction) -> DeliverOutcome + Send + Sync + 'static,
{
    async fn deliver(&self, event: &ProactiveEvent) -> DeliverOutcome {
        let action = self.engine.handle_proactive_event(event).await;
        if action.is_silence() {
            return DeliverOutcome::Refused;
        }
        (self.sink)(&event.chat_id, action)
    }
}

/// Infers group-ness from a `channel:rest` chat id when no `IncomingMessage`
/// is in hand (the proactive path only has the id the event was scheduled
/// against). A `rest` containing `"group"` covers `signal:group:<id>`; a
/// leading `-` covers Telegram's negative supergroup ids.
fn is_group_chat_id(chat_id: &str) -> bool {
    let rest = chat_id.split_once(':').map(|(_, rest)| rest).unwrap_or("");
    rest.contains("group") || rest.starts_with('-')
}

fn combine_batch(batch: &[IncomingMessage]) -> String {
    match batch.len() {
        0 => String::new(),
        1 => batch[0].text.clone(),
        _ => {
            let (prior, head) = batch.split_at(batch.len() - 1);
            let mut combined = prior
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            combined.push('\n');
            combined.push_str(&head[0].text);
            combined
        }
    }
}

fn compile_behavior_rules(config: &HomieConfig) -> String {
    format!(
        "## Behavior rules\n\
         - Keep DM replies under {} characters and group replies under {} characters.\n\
         - Never use assistant-style filler (\"I'd be happy to\", \"As an AI\").\n\
         - Match the energy of the conversation; don't lecture.",
        config.behavior.dm_max_chars, config.behavior.group_max_chars,
    )
}

/// Deterministic fallback summary used when a session is force-compacted
/// after a context-overflow error. Avoids bridging into an async model
/// call from inside `SessionStore::compact_if_needed`'s synchronous
/// callback.
fn truncate_for_summary(window: &str) -> String {
    const MAX_SUMMARY_CHARS: usize = 800;
    if window.len() <= MAX_SUMMARY_CHARS {
        return window.to_string();
    }
    let cut = window[..MAX_SUMMARY_CHARS].rfind('\n').unwrap_or(MAX_SUMMARY_CHARS);
    format!("{}\n[earlier turns omitted]", &window[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_batch_prefixes_prior_messages() {
        fn msg(text: &str) -> IncomingMessage {
            IncomingMessage {
                channel: "cli".into(),
                chat_id: ChatId::from("cli:local"),
                message_id: "1".into(),
                author_id: "u1".into(),
                author_display_name: None,
                text: text.into(),
                attachments: None,
                is_group: false,
                mentioned: None,
                is_operator: None,
                timestamp_ms: 0,
            }
        }
        let batch = vec![msg("hey"), msg("also"), msg("what's up")];
        assert_eq!(combine_batch(&batch), "hey\nalso\nwhat's up");
    }

    #[test]
    fn single_message_batch_is_unprefixed() {
        let batch = vec![IncomingMessage {
            channel: "cli".into(),
            chat_id: ChatId::from("cli:local"),
            message_id: "1".into(),
            author_id: "u1".into(),
            author_display_name: None,
            text: "hello".into(),
            attachments: None,
            is_group: false,
            mentioned: None,
            is_operator: None,
            timestamp_ms: 0,
        }];
        assert_eq!(combine_batch(&batch), "hello");
    }

    #[test]
    fn summary_truncation_keeps_small_windows_intact() {
        assert_eq!(truncate_for_summary("short window"), "short window");
    }
}
