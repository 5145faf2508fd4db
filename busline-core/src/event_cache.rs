//! Event cache (spec §4.7): per-endpoint cache of the last broadcast
//! payload for each `(code, topic)`, enabling subscribe-time snapshot
//! replay and "don't republish unchanged" suppression.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    code: i32,
    topic: String,
}

/// Bounded by `capacity` distinct keys (§12's "event-cache capacity"
/// config key); `order` tracks insertion order so a full cache evicts its
/// oldest key rather than growing without limit. `capacity == 0` means
/// unbounded, matching `event_cache_enabled = false` disabling the cache
/// entirely rather than the bound disabling itself.
pub struct EventCache {
    entries: DashMap<Key, Arc<[u8]>>,
    capacity: usize,
    order: Mutex<VecDeque<Key>>,
}

/// What the caller should do after offering a broadcast to the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Payload changed (or `force_update` was set): cache updated, dispatch.
    Updated,
    /// Payload identical to the cached value and `force_update` was not
    /// set: suppress the dispatch (spec §4.7).
    Unchanged,
}

impl EventCache {
    /// `capacity` is the maximum number of distinct `(code, topic)` keys
    /// retained at once; `0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Offers a broadcast payload to the cache. New subscribers always
    /// receive the cached value regardless of `force_update` (spec §4.7);
    /// this method only governs whether *this* broadcast is dispatched.
    pub fn offer(&self, code: i32, topic: &str, payload: Arc<[u8]>, force_update: bool) -> CacheOutcome {
        let key = Key {
            code,
            topic: topic.to_string(),
        };
        if !force_update {
            if let Some(existing) = self.entries.get(&key) {
                if **existing == *payload {
                    return CacheOutcome::Unchanged;
                }
            }
        }
        let is_new_key = self.entries.insert(key.clone(), payload).is_none();
        if is_new_key {
            self.track_insertion(key);
        }
        CacheOutcome::Updated
    }

    fn track_insertion(&self, key: Key) {
        if self.capacity == 0 {
            return;
        }
        let mut order = self.order.lock();
        order.push_back(key);
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, code: i32, topic: &str) -> Option<Arc<[u8]>> {
        self.entries
            .get(&Key {
                code,
                topic: topic.to_string(),
            })
            .map(|v| v.clone())
    }

    /// Every cached `(code, topic)` entry whose `code` matches and whose
    /// topic satisfies the subscribe-time wildcard rule relative to
    /// `requested_topic` (spec §4.6's snapshot walk).
    pub fn matching(&self, code: i32, requested_topic: &str) -> Vec<(String, Arc<[u8]>)> {
        self.entries
            .iter()
            .filter(|e| e.key().code == code)
            .filter(|e| {
                requested_topic.is_empty() || e.key().topic == requested_topic
            })
            .map(|e| (e.key().topic.clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_payload_without_force_is_suppressed() {
        let cache = EventCache::new(0);
        assert_eq!(
            cache.offer(1, "t", Arc::from(&b"a"[..]), false),
            CacheOutcome::Updated
        );
        assert_eq!(
            cache.offer(1, "t", Arc::from(&b"a"[..]), false),
            CacheOutcome::Unchanged
        );
    }

    #[test]
    fn force_update_always_dispatches_even_if_unchanged() {
        let cache = EventCache::new(0);
        cache.offer(1, "t", Arc::from(&b"a"[..]), false);
        assert_eq!(
            cache.offer(1, "t", Arc::from(&b"a"[..]), true),
            CacheOutcome::Updated
        );
    }

    #[test]
    fn changed_payload_always_dispatches() {
        let cache = EventCache::new(0);
        cache.offer(1, "t", Arc::from(&b"a"[..]), false);
        assert_eq!(
            cache.offer(1, "t", Arc::from(&b"b"[..]), false),
            CacheOutcome::Updated
        );
    }

    #[test]
    fn matching_walk_honors_wildcard_subscribe_topic() {
        let cache = EventCache::new(0);
        cache.offer(1, "t1", Arc::from(&b"a"[..]), false);
        cache.offer(1, "t2", Arc::from(&b"b"[..]), false);
        assert_eq!(cache.matching(1, "").len(), 2);
        assert_eq!(cache.matching(1, "t1").len(), 1);
    }

    #[test]
    fn capacity_evicts_the_oldest_key_once_full() {
        let cache = EventCache::new(2);
        cache.offer(1, "t1", Arc::from(&b"a"[..]), false);
        cache.offer(1, "t2", Arc::from(&b"b"[..]), false);
        cache.offer(1, "t3", Arc::from(&b"c"[..]), false);

        assert!(cache.get(1, "t1").is_none());
        assert!(cache.get(1, "t2").is_some());
        assert!(cache.get(1, "t3").is_some());
    }

    #[test]
    fn re_offering_an_existing_key_does_not_count_twice_against_capacity() {
        let cache = EventCache::new(2);
        cache.offer(1, "t1", Arc::from(&b"a"[..]), false);
        cache.offer(1, "t2", Arc::from(&b"b"[..]), false);
        cache.offer(1, "t1", Arc::from(&b"a2"[..]), true);

        assert!(cache.get(1, "t1").is_some());
        assert!(cache.get(1, "t2").is_some());
    }
}
