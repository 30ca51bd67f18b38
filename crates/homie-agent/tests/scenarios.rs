//! End-to-end scenarios against a stub backend and in-memory stores.
//! Each test name matches the lettered scenario it covers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use homie_agent::backend::{Backend, BackendError, CompletionParams, CompletionResult};
use homie_agent::TurnEngine;
use homie_behavior::{EngagementGate, RecentMessage};
use homie_core::config::HomieConfig;
use homie_core::{ChatId, IncomingMessage, OutgoingAction};
use homie_extractor::{FastModel, MemoryExtractor};
use homie_ledger::OutboundLedger;
use homie_memory::MemoryStore;
use homie_scheduler::{EventKind, NewEvent, ProactiveScheduler, Recurrence};
use homie_sessions::{Role, SessionStore};

enum StubResponse {
    Text(String),
    Overflow,
}

/// Queued-response backend. Calls are served in order; the queue running
/// dry yields an empty string (silence). `gate`, if set, blocks only the
/// *first* call until the test releases it.
struct StubBackend {
    responses: Mutex<VecDeque<StubResponse>>,
    calls: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl StubBackend {
    fn new(responses: Vec<StubResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn gated(responses: Vec<StubResponse>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn complete(&self, _params: CompletionParams) -> Result<CompletionResult, BackendError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);

        let active = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(active, Ordering::SeqCst);

        if idx == 0 {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }

        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(StubResponse::Text(text)) => Ok(CompletionResult {
                text,
                steps: 1,
                usage: None,
                model_id: None,
            }),
            Some(StubResponse::Overflow) => Err(BackendError::ContextOverflow),
            None => Ok(CompletionResult {
                text: String::new(),
                steps: 1,
                usage: None,
                model_id: None,
            }),
        }
    }
}

/// Fast model stub used for the group engagement gate. Wraps a fixed JSON
/// verdict string.
struct StubGate(String);

#[async_trait]
impl EngagementGate for StubGate {
    async fn evaluate(&self, _history: &[RecentMessage], _incoming_text: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

struct NoopFastModel;

#[async_trait]
impl FastModel for NoopFastModel {
    async fn complete(&self, _system: &str, _user: &str) -> Option<String> {
        None
    }
}

fn in_memory_engine(backend: Arc<dyn Backend>, gate: Option<Arc<dyn EngagementGate>>) -> TurnEngine {
    let sessions_conn = Connection::open_in_memory().unwrap();
    homie_sessions::db::init_db(&sessions_conn).unwrap();
    let sessions = Arc::new(SessionStore::new(sessions_conn));
    in_memory_engine_with_sessions(sessions, backend, gate)
}

fn in_memory_engine_with_sessions(
    sessions: Arc<SessionStore>,
    backend: Arc<dyn Backend>,
    gate: Option<Arc<dyn EngagementGate>>,
) -> TurnEngine {
    let memory_conn = Connection::open_in_memory().unwrap();
    homie_memory::db::init_db(&memory_conn).unwrap();
    let ledger_conn = Connection::open_in_memory().unwrap();
    homie_ledger::db::init_db(&ledger_conn).unwrap();
    let scheduler_conn = Connection::open_in_memory().unwrap();
    homie_scheduler::db::init_db(&scheduler_conn).unwrap();

    let memory = Arc::new(MemoryStore::new(memory_conn));
    let ledger = Arc::new(OutboundLedger::new(ledger_conn));
    let scheduler = Arc::new(ProactiveScheduler::new(scheduler_conn));
    let extractor = Arc::new(MemoryExtractor::new(
        memory.clone(),
        scheduler.clone(),
        Arc::new(NoopFastModel),
    ));

    let mut config = HomieConfig::default();
    config.behavior.debounce_ms = 0;
    // Points nowhere on disk; PromptBuilder falls back to a default identity.
    config.paths.identity_dir = "/nonexistent/homie-test-identity".into();

    TurnEngine::new(sessions, memory, ledger, scheduler, extractor, backend, gate, Vec::new(), config)
}

fn incoming(chat: &str, message_id: &str, text: &str, ts: i64, is_group: bool) -> IncomingMessage {
    IncomingMessage {
        channel: "cli".into(),
        chat_id: ChatId::from(chat),
        message_id: message_id.into(),
        author_id: "u1".into(),
        author_display_name: None,
        text: text.into(),
        attachments: None,
        is_group,
        mentioned: None,
        is_operator: None,
        timestamp_ms: ts,
    }
}

#[tokio::test]
async fn scenario_a_empty_output_is_silence() {
    let backend = StubBackend::new(vec![StubResponse::Text("   ".into())]);

    let sessions_conn = Connection::open_in_memory().unwrap();
    homie_sessions::db::init_db(&sessions_conn).unwrap();
    let sessions = Arc::new(SessionStore::new(sessions_conn));
    let sessions_for_assertions = sessions.clone();
    let engine = in_memory_engine_with_sessions(sessions, backend.clone(), None);

    let action = engine
        .handle_incoming_message(incoming("cli:local", "m1", "hi", 0, false), CancellationToken::new())
        .await;

    assert!(matches!(action, OutgoingAction::Silence { reason: Some(r) } if r == "empty_output"));

    let rows = sessions_for_assertions.get_messages("cli:local", 100).unwrap();
    assert!(
        rows.iter().all(|m| m.role != Role::Assistant),
        "a blank draft must not be appended as an assistant row"
    );
}

#[tokio::test]
async fn scenario_b_dedup_by_chat_and_message_id() {
    let backend = StubBackend::new(vec![StubResponse::Text("yo".into())]);
    let engine = in_memory_engine(backend.clone(), None);

    let first = engine
        .handle_incoming_message(incoming("cli:local", "cli:1", "hey", 0, false), CancellationToken::new())
        .await;
    let second = engine
        .handle_incoming_message(incoming("cli:local", "cli:1", "hey", 10, false), CancellationToken::new())
        .await;

    match first {
        OutgoingAction::SendText(send) => assert_eq!(send.text, "yo"),
        other => panic!("expected send_text, got {other:?}"),
    }
    assert!(matches!(second, OutgoingAction::Silence { reason: Some(r) } if r == "duplicate_message"));
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn scenario_c_group_reaction_path() {
    let gate: Arc<dyn EngagementGate> = Arc::new(StubGate(r#"{"action":"react","emoji":"🔥"}"#.to_string()));
    let backend = StubBackend::new(vec![]);
    let engine = in_memory_engine(backend.clone(), Some(gate));

    let action = engine
        .handle_incoming_message(incoming("tg:-100", "m1", "thats wild", 0, true), CancellationToken::new())
        .await;

    match action {
        OutgoingAction::React(target) => assert_eq!(target.emoji, "🔥"),
        other => panic!("expected react, got {other:?}"),
    }
    assert_eq!(backend.call_count(), 0, "engagement-gate reactions never reach the backend");
}

#[tokio::test]
async fn scenario_d_stale_discard() {
    let gate = Arc::new(Notify::new());
    let backend = StubBackend::gated(
        vec![StubResponse::Text("m1-reply".into()), StubResponse::Text("yo".into())],
        gate.clone(),
    );
    let engine = Arc::new(in_memory_engine(backend.clone(), None));

    let m1 = incoming("cli:local", "m1", "first", 1_000, false);
    let engine_for_m1 = engine.clone();
    let m1_task = tokio::spawn(async move {
        engine_for_m1
            .handle_incoming_message(m1, CancellationToken::new())
            .await
    });

    // Wait until m1's completion call has actually started (and is parked
    // on the gate) before pushing m2, so m2's accumulator registration
    // genuinely lands while m1 is mid-flight.
    while backend.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    let m2 = incoming("cli:local", "m2", "second", 1_001, false);
    let engine_for_m2 = engine.clone();
    let m2_task = tokio::spawn(async move {
        engine_for_m2
            .handle_incoming_message(m2, CancellationToken::new())
            .await
    });

    // Give m2 a chance to push into the accumulator and queue on the
    // per-chat lock before releasing m1.
    tokio::task::yield_now().await;
    gate.notify_one();

    let m1_result = m1_task.await.unwrap();
    let m2_result = m2_task.await.unwrap();

    assert!(matches!(m1_result, OutgoingAction::Silence { reason: Some(r) } if r == "stale_discard"));
    match m2_result {
        OutgoingAction::SendText(send) => assert_eq!(send.text, "yo"),
        other => panic!("expected send_text for m2, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_e_slop_regeneration() {
    let backend = StubBackend::new(vec![
        StubResponse::Text("I'd be happy to help with that!".into()),
        StubResponse::Text("yo".into()),
    ]);
    let engine = in_memory_engine(backend.clone(), None);

    let action = engine
        .handle_incoming_message(incoming("cli:local", "m1", "help me out", 0, false), CancellationToken::new())
        .await;

    match action {
        OutgoingAction::SendText(send) => assert_eq!(send.text, "yo"),
        other => panic!("expected send_text, got {other:?}"),
    }
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn scenario_f_proactive_suppression_for_new_contact() {
    let scheduler_conn = Connection::open_in_memory().unwrap();
    homie_scheduler::db::init_db(&scheduler_conn).unwrap();
    let ledger_conn = Connection::open_in_memory().unwrap();
    homie_ledger::db::init_db(&ledger_conn).unwrap();
    let scheduler = Arc::new(ProactiveScheduler::new(scheduler_conn));
    let ledger = Arc::new(OutboundLedger::new(ledger_conn));

    scheduler
        .add_event(
            NewEvent {
                kind: EventKind::CheckIn,
                subject: "how's it going".into(),
                chat_id: "cli:newbie".into(),
                trigger_at_ms: 0,
                recurrence: None,
            },
            0,
        )
        .unwrap();

    struct NewContactResolver;
    #[async_trait]
    impl homie_scheduler::TrustResolver for NewContactResolver {
        async fn resolve(&self, _chat_id: &str) -> Option<(homie_memory::TrustTier, bool)> {
            Some((homie_memory::TrustTier::NewContact, false))
        }
    }

    struct CountingDelivery(AtomicUsize);
    #[async_trait]
    impl homie_scheduler::DeliveryHandler for CountingDelivery {
        async fn deliver(&self, _event: &homie_scheduler::ProactiveEvent) -> homie_scheduler::DeliverOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            homie_scheduler::DeliverOutcome::Delivered
        }
    }
    let delivery = Arc::new(CountingDelivery(AtomicUsize::new(0)));

    let heartbeat = homie_scheduler::HeartbeatLoop::new(
        scheduler.clone(),
        ledger,
        Arc::new(NewContactResolver),
        delivery.clone(),
        homie_core::config::ProactiveConfig::default(),
    );

    heartbeat.tick(1_000, false).await.unwrap();

    assert_eq!(delivery.0.load(Ordering::SeqCst), 0, "no outbound action for a brand new contact");

    // The event was deferred, not delivered, so it is not due again on the
    // next tick...
    let still_due = scheduler.claim_pending_events(1_000, 0, 10, 60_000).unwrap();
    assert_eq!(still_due.len(), 0);

    // ...but is due again roughly 14 days out.
    const MS_PER_DAY: i64 = 24 * 3600 * 1000;
    let due_after_defer = scheduler
        .claim_pending_events(1_000 + 14 * MS_PER_DAY, 0, 10, 60_000)
        .unwrap();
    assert_eq!(due_after_defer.len(), 1);
}

#[tokio::test]
async fn scenario_g_context_overflow_retry() {
    let backend = StubBackend::new(vec![StubResponse::Overflow, StubResponse::Text("yo".into())]);

    // Seed enough prior history that `compact_if_needed` is willing to
    // collapse a prefix once force-triggered by the overflow recovery path.
    let sessions_conn = Connection::open_in_memory().unwrap();
    homie_sessions::db::init_db(&sessions_conn).unwrap();
    let sessions = Arc::new(SessionStore::new(sessions_conn));
    for i in 0..10 {
        sessions
            .append_message(homie_sessions::NewMessage {
                chat_id: "cli:local".into(),
                role: Role::User,
                content: "x".repeat(200),
                created_at_ms: i * 100,
            })
            .unwrap();
    }

    let sessions_for_assertions = sessions.clone();
    let engine = in_memory_engine_with_sessions(sessions, backend.clone(), None);

    let action = engine
        .handle_incoming_message(incoming("cli:local", "m1", "tell me about it", 0, false), CancellationToken::new())
        .await;

    match action {
        OutgoingAction::SendText(send) => assert_eq!(send.text, "yo"),
        other => panic!("expected send_text, got {other:?}"),
    }
    assert_eq!(backend.call_count(), 2);

    let rows = sessions_for_assertions.get_messages("cli:local", 100).unwrap();
    let summary_rows = rows
        .iter()
        .filter(|m| m.content.starts_with(homie_sessions::types::SUMMARY_HEADER))
        .count();
    let reminder_rows = rows
        .iter()
        .filter(|m| m.content.starts_with(homie_sessions::types::PERSONA_REMINDER_HEADER))
        .count();
    assert_eq!(summary_rows, 1);
    assert_eq!(reminder_rows, 1);
}

#[tokio::test]
async fn property_perkeylock_serializes_concurrent_turns_on_same_chat() {
    let backend = StubBackend::new(vec![StubResponse::Text("a".into()), StubResponse::Text("b".into())]);
    let engine = Arc::new(in_memory_engine(backend.clone(), None));

    let e1 = engine.clone();
    let e2 = engine.clone();
    let (r1, r2) = tokio::join!(
        e1.handle_incoming_message(incoming("cli:shared", "m1", "one", 0, false), CancellationToken::new()),
        e2.handle_incoming_message(incoming("cli:shared", "m2", "two", 1, false), CancellationToken::new()),
    );

    assert_eq!(backend.max_concurrent.load(Ordering::SeqCst), 1);
    assert!(matches!(r1, OutgoingAction::SendText(_) | OutgoingAction::Silence { .. }));
    assert!(matches!(r2, OutgoingAction::SendText(_) | OutgoingAction::Silence { .. }));
}
