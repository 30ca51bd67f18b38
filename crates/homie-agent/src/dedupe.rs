use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Process-local, bounded dedupe cache keyed by `(chatId, messageId)`.
///
/// Entries expire after a TTL and the whole cache is capped at a max size,
/// with the oldest insertion evicted first once full. This is a point-in-time
/// guard against redelivery from flaky channel adapters, not a durable log.
pub struct DedupeCache<K> {
    ttl_ms: i64,
    max_entries: usize,
    seen: Mutex<HashMap<K, i64>>,
    order: Mutex<VecDeque<K>>,
}

impl<K> Default for DedupeCache<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL_MS, DEFAULT_MAX_ENTRIES)
    }
}

impl<K> DedupeCache<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl_ms: i64, max_entries: usize) -> Self {
        Self {
            ttl_ms,
            max_entries,
            seen: Mutex::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns `true` if `key` was already seen within the TTL window
    /// (and should be dropped as a duplicate); otherwise records it and
    /// returns `false`.
    pub fn check_and_insert(&self, key: K, now_ms: i64) -> bool {
        let mut seen = self.seen.lock().unwrap();

        if let Some(&seen_at) = seen.get(&key) {
            if now_ms - seen_at < self.ttl_ms {
                return true;
            }
        }

        seen.insert(key.clone(), now_ms);
        let mut order = self.order.lock().unwrap();
        order.push_back(key);

        while order.len() > self.max_entries {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }

        false
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_within_ttl_is_a_duplicate() {
        let cache: DedupeCache<(String, String)> = DedupeCache::new(5_000, 10);
        let key = ("chat-1".to_string(), "msg-1".to_string());
        assert!(!cache.check_and_insert(key.clone(), 0));
        assert!(cache.check_and_insert(key, 1_000));
    }

    #[test]
    fn same_key_after_ttl_is_not_a_duplicate() {
        let cache: DedupeCache<(String, String)> = DedupeCache::new(5_000, 10);
        let key = ("chat-1".to_string(), "msg-1".to_string());
        assert!(!cache.check_and_insert(key.clone(), 0));
        assert!(!cache.check_and_insert(key, 10_000));
    }

    #[test]
    fn overflow_evicts_oldest_entry() {
        let cache: DedupeCache<i32> = DedupeCache::new(60_000, 2);
        cache.check_and_insert(1, 0);
        cache.check_and_insert(2, 0);
        cache.check_and_insert(3, 0);
        assert_eq!(cache.len(), 2);
        assert!(!cache.check_and_insert(1, 0));
    }
}
