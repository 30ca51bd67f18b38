use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use homie_core::config::ProactiveConfig;
use homie_memory::TrustTier;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::manager::ProactiveScheduler;
use crate::types::{DeliverOutcome, EventKind, ProactiveEvent};

const MS_PER_DAY: i64 = 24 * 3600 * 1000;
const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;
const MAX_BACKOFF_MS: i64 = 7 * MS_PER_DAY;
const SKIP_ROLL_BUCKET_MS: i64 = 6 * 3600 * 1000;

/// Per-tier minimum interval since the last proactive send to a DM,
/// ascending trust.
fn min_interval_ms(tier: TrustTier) -> i64 {
    match tier {
        TrustTier::NewContact => 60 * MS_PER_DAY,
        TrustTier::GettingToKnow => 30 * MS_PER_DAY,
        TrustTier::Established => 14 * MS_PER_DAY,
        TrustTier::CloseFriend => 5 * MS_PER_DAY,
    }
}

/// Resolves a chat to its trust tier and group-ness; DMs only (groups have
/// no single trust tier to gate on).
#[async_trait]
pub trait TrustResolver: Send + Sync {
    async fn resolve(&self, chat_id: &str) -> Option<(TrustTier, bool)>;
}

/// Performs the actual send for a claimed event. Kept decoupled from the
/// turn engine so this crate never depends on it.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, event: &ProactiveEvent) -> DeliverOutcome;
}

/// Fowler/Noll/Vo 1a hash, used only for a deterministic pseudo-random
/// skip decision — never for anything security sensitive.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Same `(eventId, 6h bucket)` always yields the same verdict, so a given
/// event's skip/no-skip status does not flicker tick to tick.
fn stable_skip_roll(event_id: i64, now_ms: i64, skip_rate: f64) -> bool {
    let bucket = now_ms / SKIP_ROLL_BUCKET_MS;
    let key = format!("{event_id}:{bucket}");
    let hash = fnv1a(key.as_bytes());
    let fraction = (hash % 1_000_000) as f64 / 1_000_000.0;
    fraction < skip_rate
}

enum Verdict {
    Allow,
    Defer(i64),
    Release,
}

/// Periodic driver for proactive outreach: claims due events, applies the
/// suppression policy, and hands survivors to the injected delivery
/// handler. At most one tick runs at a time per process.
pub struct HeartbeatLoop {
    scheduler: Arc<ProactiveScheduler>,
    ledger: Arc<homie_ledger::OutboundLedger>,
    trust: Arc<dyn TrustResolver>,
    delivery: Arc<dyn DeliveryHandler>,
    config: ProactiveConfig,
    ticking: AtomicBool,
}

impl HeartbeatLoop {
    pub fn new(
        scheduler: Arc<ProactiveScheduler>,
        ledger: Arc<homie_ledger::OutboundLedger>,
        trust: Arc<dyn TrustResolver>,
        delivery: Arc<dyn DeliveryHandler>,
        config: ProactiveConfig,
    ) -> Self {
        Self {
            scheduler,
            ledger,
            trust,
            delivery,
            config,
            ticking: AtomicBool::new(false),
        }
    }

    #[instrument(skip(self, now_ms, sleep_window_active))]
    pub async fn tick(&self, now_ms: i64, sleep_window_active: bool) -> Result<()> {
        if self.ticking.swap(true, Ordering::SeqCst) {
            warn!("heartbeat tick already in flight, skipping overlap");
            return Ok(());
        }
        let result = self.tick_inner(now_ms, sleep_window_active).await;
        self.ticking.store(false, Ordering::SeqCst);
        result
    }

    async fn tick_inner(&self, now_ms: i64, sleep_window_active: bool) -> Result<()> {
        if !self.config.enabled || sleep_window_active {
            return Ok(());
        }

        let claim_id = Uuid::new_v4().to_string();
        let due = self.scheduler.claim_pending_events(now_ms, 0, 50, 10 * 60 * 1000)?;
        for event in &due {
            self.process_event(event, now_ms, &claim_id).await?;
        }

        self.deliver_follow_up_candidates(now_ms, &claim_id).await?;
        Ok(())
    }

    async fn process_event(&self, event: &ProactiveEvent, now_ms: i64, claim_id: &str) -> Result<()> {
        let resolved = self.trust.resolve(&event.chat_id).await;
        let (tier, is_group) = match resolved {
            Some(pair) => pair,
            None => (TrustTier::GettingToKnow, true),
        };

        if !is_group && !event.kind.is_critical() {
            if tier == TrustTier::NewContact {
                self.scheduler.defer_event(event.id, claim_id, now_ms + 14 * MS_PER_DAY)?;
                return Ok(());
            }
            if tier == TrustTier::GettingToKnow {
                let sent_today = self.scheduler.count_recent_sends_for_chat(&event.chat_id, now_ms, MS_PER_DAY)?;
                if sent_today >= 1 {
                    self.scheduler.defer_event(event.id, claim_id, now_ms + MS_PER_DAY)?;
                    return Ok(());
                }
            }
        }

        match self.should_suppress_outreach(event, now_ms, tier, is_group)? {
            Verdict::Release => {
                self.scheduler.release_claim(event.id, claim_id)?;
                return Ok(());
            }
            Verdict::Defer(next_at) => {
                self.scheduler.defer_event(event.id, claim_id, next_at)?;
                return Ok(());
            }
            Verdict::Allow => {}
        }

        if !event.kind.is_critical() && stable_skip_roll(event.id, now_ms, self.config.skip_rate) {
            self.scheduler.defer_event(event.id, claim_id, now_ms + SKIP_ROLL_BUCKET_MS)?;
            return Ok(());
        }

        match self.delivery.deliver(event).await {
            DeliverOutcome::Delivered => {
                self.scheduler.mark_delivered(event.id, claim_id, now_ms)?;
                self.scheduler.log_proactive_send(&event.chat_id, is_group, Some(event.id), now_ms)?;
                info!(event_id = event.id, chat_id = %event.chat_id, "proactive event delivered");
            }
            DeliverOutcome::Refused => {
                if event.kind.is_critical() {
                    self.scheduler.defer_event(event.id, claim_id, now_ms + 15 * 60 * 1000)?;
                } else {
                    self.scheduler.mark_delivered(event.id, claim_id, now_ms)?;
                }
            }
        }
        Ok(())
    }

    /// Implements the ordered checks from the outreach suppression policy:
    /// reminders pass unconditionally, then per-tier cadence, user-reply
    /// cooldown, scope-wide and per-chat caps, and finally ignored-send
    /// backoff.
    fn should_suppress_outreach(
        &self,
        event: &ProactiveEvent,
        now_ms: i64,
        tier: TrustTier,
        is_group: bool,
    ) -> Result<Verdict> {
        if event.kind == EventKind::Reminder {
            return Ok(Verdict::Allow);
        }

        if !is_group {
            if let Some(last_send) = self.scheduler.last_send_ms_for_chat(&event.chat_id)? {
                let min_gap = min_interval_ms(tier);
                if now_ms - last_send < min_gap {
                    return Ok(Verdict::Defer(last_send + min_gap));
                }
            }
        }

        let limits = self.config.limits_for(is_group);
        if let Some(last_user_ms) = self.ledger.last_send_ms_for_chat(&event.chat_id)? {
            let cooldown_until = last_user_ms + limits.cooldown_after_user_ms;
            if now_ms < cooldown_until {
                return Ok(Verdict::Defer(cooldown_until));
            }
        }

        let scope_daily = self.scheduler.count_recent_sends_for_scope(is_group, now_ms, MS_PER_DAY)?;
        if scope_daily >= limits.max_per_day as i64 {
            return Ok(Verdict::Defer(now_ms + MS_PER_DAY));
        }
        let scope_weekly = self.scheduler.count_recent_sends_for_scope(is_group, now_ms, MS_PER_WEEK)?;
        if scope_weekly >= limits.max_per_week as i64 {
            return Ok(Verdict::Defer(now_ms + MS_PER_WEEK));
        }

        if is_group {
            let chat_daily = self.scheduler.count_recent_sends_for_chat(&event.chat_id, now_ms, MS_PER_DAY)?;
            if chat_daily >= limits.max_per_day as i64 {
                return Ok(Verdict::Defer(now_ms + MS_PER_DAY));
            }
            let chat_weekly = self.scheduler.count_recent_sends_for_chat(&event.chat_id, now_ms, MS_PER_WEEK)?;
            if chat_weekly >= limits.max_per_week as i64 {
                return Ok(Verdict::Defer(now_ms + MS_PER_WEEK));
            }
        }

        let consecutive_ignored = self.scheduler.count_ignored_recent(&event.chat_id)?;
        if consecutive_ignored >= limits.pause_after_ignored as i64 {
            return Ok(Verdict::Defer(now_ms + MAX_BACKOFF_MS));
        }
        if consecutive_ignored > 0 {
            if let Some(last_send) = self.scheduler.last_send_ms_for_chat(&event.chat_id)? {
                let backoff = (limits.cooldown_after_user_ms as f64
                    * 2f64.powi(consecutive_ignored as i32))
                .min(MAX_BACKOFF_MS as f64) as i64;
                if now_ms - last_send < backoff {
                    return Ok(Verdict::Defer(last_send + backoff));
                }
            }
        }

        Ok(Verdict::Allow)
    }

    /// Scans unanswered outbound sends from 3-7 days ago; chats with fewer
    /// than two still-outstanding sends get a synthetic follow-up event,
    /// subject to the same suppression rules as any other proactive event.
    async fn deliver_follow_up_candidates(&self, now_ms: i64, claim_id: &str) -> Result<()> {
        let window_min = now_ms - 7 * MS_PER_DAY;
        let window_max = now_ms - 3 * MS_PER_DAY;
        let unanswered = self.ledger.list_unanswered_in_window(window_min, window_max, 100)?;

        for row in unanswered {
            if row.is_group {
                continue;
            }
            let outstanding = self.ledger.count_unanswered_for_chat(&row.chat_id, window_min, now_ms)?;
            if outstanding >= 2 {
                continue;
            }
            let virtual_event = ProactiveEvent {
                id: row.id,
                kind: EventKind::FollowUp,
                subject: "follow_up_candidate".into(),
                chat_id: row.chat_id.clone(),
                trigger_at_ms: now_ms,
                recurrence: None,
                delivered: false,
                claim_id: Some(claim_id.into()),
                claim_until_ms: Some(now_ms + 10 * 60 * 1000),
                created_at_ms: row.sent_at_ms,
            };
            let (tier, is_group) = self
                .trust
                .resolve(&row.chat_id)
                .await
                .unwrap_or((TrustTier::GettingToKnow, false));
            if let Verdict::Allow = self.should_suppress_outreach(&virtual_event, now_ms, tier, is_group)? {
                self.delivery.deliver(&virtual_event).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_roll_is_stable_within_a_bucket() {
        let a = stable_skip_roll(42, 1_000, 0.5);
        let b = stable_skip_roll(42, 1_000 + 1000, 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn skip_roll_changes_across_buckets_eventually() {
        let verdicts: Vec<bool> = (0..20)
            .map(|i| stable_skip_roll(7, i * SKIP_ROLL_BUCKET_MS, 0.5))
            .collect();
        assert!(verdicts.iter().any(|v| *v) && verdicts.iter().any(|v| !*v));
    }

    #[test]
    fn min_interval_widens_for_less_trusted_tiers() {
        assert!(min_interval_ms(TrustTier::NewContact) > min_interval_ms(TrustTier::GettingToKnow));
        assert!(min_interval_ms(TrustTier::GettingToKnow) > min_interval_ms(TrustTier::Established));
        assert!(min_interval_ms(TrustTier::Established) > min_interval_ms(TrustTier::CloseFriend));
    }
}
