//! Bounded TTL cache of recently seen event keys.
//!
//! The stream may deliver the same note twice (a reply that also mentions
//! the bot, or a replay after reconnect). Keys older than the TTL are
//! forgotten, and the oldest keys are evicted once capacity is reached.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct Inner {
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl DedupCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Record `key`. Returns `true` the first time a key is seen within the TTL.
    pub fn observe(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        Self::expire(&mut inner, now, self.ttl);

        if inner.seen.contains_key(key) {
            return false;
        }
        while inner.seen.len() >= self.capacity {
            match inner.order.pop_front() {
                Some((old, at)) => {
                    if inner.seen.get(&old) == Some(&at) {
                        inner.seen.remove(&old);
                    }
                }
                None => break,
            }
        }
        inner.seen.insert(key.to_string(), now);
        inner.order.push_back((key.to_string(), now));
        true
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every key. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.seen.len();
        inner.seen.clear();
        inner.order.clear();
        n
    }

    fn expire(inner: &mut Inner, now: Instant, ttl: Duration) {
        while let Some((key, at)) = inner.order.front() {
            if now.duration_since(*at) < ttl {
                break;
            }
            if inner.seen.get(key) == Some(at) {
                inner.seen.remove(key);
            }
            inner.order.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn repeats_are_suppressed_until_ttl() {
        let cache = DedupCache::new(10, Duration::from_secs(60));
        assert!(cache.observe("mention:1"));
        assert!(!cache.observe("mention:1"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.observe("mention:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_key_evicted_at_capacity() {
        let cache = DedupCache::new(2, Duration::from_secs(60));
        cache.observe("a");
        cache.observe("b");
        cache.observe("c");
        assert_eq!(cache.len(), 2);
        assert!(cache.observe("a"));
        assert!(!cache.observe("c"));
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let cache = DedupCache::new(10, Duration::from_secs(60));
        cache.observe("a");
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
