use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

mod bridges;
mod db;

use homie_agent::{AnthropicBackend, Backend, EngineDeliveryHandler, Lifecycle, ToolDefinition, TurnEngine};
use homie_channels::{Channel, ChannelManager, CliChannel};
use homie_core::config::HomieConfig;
use homie_extractor::MemoryExtractor;
use homie_ledger::OutboundLedger;
use homie_memory::MemoryStore;
use homie_scheduler::{HeartbeatLoop, ProactiveScheduler};
use homie_sessions::SessionStore;

use bridges::{BackendEngagementGate, BackendFastModel, MemoryTrustResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homie_app=info,homie_agent=info".into()),
        )
        .init();

    let config_path = std::env::var("HOMIE_CONFIG").ok();
    let config = HomieConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        HomieConfig::default()
    });

    let data_dir = config.paths.data_dir.clone();
    let sessions_conn = db::open(&data_dir, "sessions.db")?;
    homie_sessions::db::init_db(&sessions_conn)?;
    let memory_conn = db::open(&data_dir, "memory.db")?;
    homie_memory::db::init_db(&memory_conn)?;
    let ledger_conn = db::open(&data_dir, "ledger.db")?;
    homie_ledger::db::init_db(&ledger_conn)?;
    let scheduler_conn = db::open(&data_dir, "scheduler.db")?;
    homie_scheduler::db::init_db(&scheduler_conn)?;

    let sessions = Arc::new(SessionStore::new(sessions_conn));
    let memory = Arc::new(MemoryStore::new(memory_conn));
    let ledger = Arc::new(OutboundLedger::new(ledger_conn));
    let scheduler = Arc::new(ProactiveScheduler::new(scheduler_conn));

    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    let backend: Arc<dyn Backend> = Arc::new(AnthropicBackend::new(
        api_key,
        config.model.models.default.clone(),
        config.model.models.fast.clone(),
        None,
    ));

    let extractor = Arc::new(MemoryExtractor::new(
        memory.clone(),
        scheduler.clone(),
        Arc::new(BackendFastModel::new(backend.clone())),
    ));

    let engagement_gate = Arc::new(BackendEngagementGate::new(backend.clone()));
    let tool_catalog: Vec<ToolDefinition> = Vec::new();

    let engine = Arc::new(TurnEngine::new(
        sessions.clone(),
        memory.clone(),
        ledger.clone(),
        scheduler.clone(),
        extractor,
        backend,
        Some(engagement_gate),
        tool_catalog,
        config.clone(),
    ));

    let lifecycle = Arc::new(Lifecycle::new());

    let mut channels = ChannelManager::new();
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    let cli_channel = CliChannel::new("local", inbound_tx);
    let cli_chat_id = cli_channel.chat_id();
    channels.register(Box::new(cli_channel));
    channels.connect_all().await;
    let channels = Arc::new(tokio::sync::Mutex::new(channels));

    let turn_engine_for_inbound = engine.clone();
    let channels_for_inbound = channels.clone();
    lifecycle.spawn_loop(move |token| async move {
        loop {
            tokio::select! {
                msg = inbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let engine = turn_engine_for_inbound.clone();
                    let channels = channels_for_inbound.clone();
                    let turn_token = token.clone();
                    tokio::spawn(async move {
                        let chat_id = msg.chat_id.clone();
                        let action = engine.handle_incoming_message(msg, turn_token).await;
                        let channels = channels.lock().await;
                        if let Some(channel) = channels.get("cli") {
                            if let Err(e) = channel.send(chat_id.as_str(), &action).await {
                                warn!(error = %e, "failed to deliver reply");
                            }
                        }
                    });
                }
                _ = token.cancelled() => break,
            }
        }
    });

    let channels_for_delivery = channels.clone();
    let delivery = EngineDeliveryHandler::new(engine.clone(), move |chat_id, action| {
        // `DeliveryHandler::deliver` is async, but the sink it hands us is a
        // plain `Fn`; a channel send is fire-and-forget from the scheduler's
        // point of view (it only needs to know the turn engine produced
        // something worth sending), so we spawn it rather than block this
        // thread on the async send.
        let chat_id = chat_id.to_string();
        let channels = channels_for_delivery.clone();
        tokio::spawn(async move {
            let channels = channels.lock().await;
            if let Some(channel) = channels.get("cli") {
                if let Err(e) = channel.send(&chat_id, &action).await {
                    warn!(error = %e, "failed to deliver proactive message");
                }
            }
        });
        homie_scheduler::DeliverOutcome::Delivered
    });

    let heartbeat = Arc::new(HeartbeatLoop::new(
        scheduler.clone(),
        ledger.clone(),
        Arc::new(MemoryTrustResolver::new(memory.clone())),
        Arc::new(delivery),
        config.proactive.clone(),
    ));
    let heartbeat_interval = Duration::from_millis(config.proactive.heartbeat_interval_ms);
    lifecycle.spawn_loop(move |token| async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let sleep_active = false;
                    if let Err(e) = heartbeat.tick(now_ms, sleep_active).await {
                        warn!(error = %e, "heartbeat tick error");
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    });

    info!(chat_id = %cli_chat_id, "homie is running; type into stdin to chat");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    lifecycle.shutdown_with_default_timeout(&engine).await;
    channels.lock().await.disconnect_all().await;

    Ok(())
}
