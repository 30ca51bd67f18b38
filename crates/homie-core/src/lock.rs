use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// Async mutual exclusion keyed by chat id (or any hashable key).
///
/// `run_exclusive` runs `f` after every prior acquisition of the same key has
/// completed, in FIFO order; acquisitions on different keys never block each
/// other. There is no global lock — only a map of per-key slots.
///
/// The slot for a key is created lazily on first use and removed again once
/// its queue drains, so a long-lived process doesn't accumulate one entry per
/// chat forever. Removal only happens when the slot is still the current tail
/// (nobody queued behind it) — a late arrival always sees a live slot, never
/// a stale one that was already cleaned up.
pub struct PerKeyLock<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for PerKeyLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> PerKeyLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` with exclusive access to `key`. If `f` panics the lock is
    /// still released (tokio's async mutex is never poisoned) and the panic
    /// propagates to the caller as normal.
    pub async fn run_exclusive<F, Fut, T>(&self, key: K, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = slot.lock().await;
        let result = f().await;
        drop(guard);

        // Only the map entry plus our local `slot` should be holding a
        // reference at this point (count == 2) for us to be the tail; if a
        // newer call already grabbed a clone while we held the lock, leave
        // the slot alone so that caller's eventual cleanup handles it.
        let mut slots = self.slots.lock().unwrap();
        if let Some(current) = slots.get(&key) {
            if Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2 {
                slots.remove(&key);
            }
        }

        result
    }

    /// Number of keys with a live (possibly contended) slot. Exposed for
    /// tests and diagnostics only.
    pub fn active_keys(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes_fifo() {
        let lock: Arc<PerKeyLock<String>> = Arc::new(PerKeyLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let lock = lock.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                lock.run_exclusive("chat-1".to_string(), || async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                })
                .await;
            }));
            // Ensure task `i` has actually started queuing before spawning `i+1`.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for h in handles {
            h.await.unwrap();
        }

        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let lock: Arc<PerKeyLock<String>> = Arc::new(PerKeyLock::new());
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let lock = lock.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                lock.run_exclusive(format!("chat-{i}"), || async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn slot_cleaned_up_after_drain() {
        let lock: PerKeyLock<String> = PerKeyLock::new();
        lock.run_exclusive("chat-1".to_string(), || async {}).await;
        assert_eq!(lock.active_keys(), 0);
    }

    #[tokio::test]
    async fn error_propagates_through_run_exclusive() {
        let lock: PerKeyLock<String> = PerKeyLock::new();
        let result: Result<(), &str> = lock
            .run_exclusive("chat-1".to_string(), || async { Err("boom") })
            .await;
        assert_eq!(result, Err("boom"));
    }
}
