use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::TurnEngine;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Process-wide coordination for an orderly shutdown: stop the long-running
/// loops this process owns (heartbeat, channel adapters), abort the shared
/// cancellation signal so in-flight turns unwind, then wait for background
/// work to drain before the caller closes its database handles.
///
/// `homie-app` registers every background loop via [`Lifecycle::spawn_loop`]
/// and calls [`Lifecycle::shutdown`] once on receipt of a shutdown signal
/// (ctrl-c, SIGTERM).
pub struct Lifecycle {
    root: CancellationToken,
    loops: Mutex<JoinSet<()>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            loops: Mutex::new(JoinSet::new()),
        }
    }

    /// A child of the root token. Every turn and every long-running loop
    /// should hold one of these rather than the root token directly, so a
    /// loop can also be cancelled individually if it's ever needed.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Registers `f` as a long-running loop that must observe the token it
    /// is handed and return once it's cancelled. Tracked so `shutdown` can
    /// wait for it to actually exit, not just signal it to.
    pub fn spawn_loop<F, Fut>(&self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.child_token();
        self.loops.lock().unwrap().spawn(f(token));
    }

    /// (a) cancels the root token, which every loop and in-flight turn is
    /// holding a child of; (b) waits up to `timeout` for registered loops to
    /// exit; (c) drains `engine`'s background memory-extraction tasks. The
    /// caller closes its own DB handles after this returns.
    pub async fn shutdown(&self, engine: &TurnEngine, timeout: Duration) {
        info!("shutdown requested, cancelling root token");
        self.root.cancel();

        let mut loops = std::mem::replace(&mut *self.loops.lock().unwrap(), JoinSet::new());
        let drained = tokio::time::timeout(timeout, async {
            while loops.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("one or more loops did not exit before the shutdown timeout");
        }

        engine.drain().await;
        info!("shutdown complete");
    }

    pub async fn shutdown_with_default_timeout(&self, engine: &TurnEngine) {
        self.shutdown(engine, DEFAULT_SHUTDOWN_TIMEOUT).await;
    }
}
