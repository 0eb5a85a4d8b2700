//! Bounded, time-limited cache of object heads.
//!
//! Saves a blob-store head call on hot files. Entries live at most `ttl` and
//! the cache never holds more than `capacity` keys; the oldest insertion is
//! evicted first. All access goes through one `parking_lot::Mutex`, so the
//! cache is safe to share between concurrent requests and the sweeper.
//!
//! A head read from the store may be overtaken by a write before it is
//! cached. Callers take a [`FillToken`] before reading; any invalidation after
//! that point makes the later insert a no-op.

use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use crate::models::object::ObjectHead;

pub struct MetadataCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

/// Snapshot of the invalidation counter taken before a store read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken(u64);

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CachedHead>,
    /// Insertion order as (key, generation); stale generations are skipped.
    order: VecDeque<(String, u64)>,
    next_generation: u64,
    invalidations: u64,
}

struct CachedHead {
    head: ObjectHead,
    stored_at: Instant,
    generation: u64,
}

impl MetadataCache {
    /// A zero capacity or zero TTL disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    fn enabled(&self) -> bool {
        self.capacity > 0 && !self.ttl.is_zero()
    }

    pub fn get(&self, key: &str) -> Option<ObjectHead> {
        self.get_at(key, Instant::now())
    }

    /// Take before reading a head from the store.
    pub fn begin_fill(&self) -> FillToken {
        FillToken(self.inner.lock().invalidations)
    }

    /// Cache `head` unless some key was invalidated since `token` was taken.
    pub fn insert(&self, head: ObjectHead, token: FillToken) {
        self.insert_at(head, token, Instant::now());
    }

    /// Drop a key after it was written or deleted.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.invalidations += 1;
        inner.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<ObjectHead> {
        if !self.enabled() {
            return None;
        }
        let mut inner = self.inner.lock();
        let fresh = inner
            .entries
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.stored_at) < self.ttl)?;
        if fresh {
            inner.entries.get(key).map(|entry| entry.head.clone())
        } else {
            inner.entries.remove(key);
            None
        }
    }

    fn insert_at(&self, head: ObjectHead, token: FillToken, now: Instant) {
        if !self.enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.invalidations != token.0 {
            return;
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;

        if !inner.entries.contains_key(&head.key) {
            while inner.entries.len() >= self.capacity {
                let Some((oldest, oldest_generation)) = inner.order.pop_front() else {
                    break;
                };
                let current = inner.entries.get(&oldest).map(|entry| entry.generation);
                if current == Some(oldest_generation) {
                    inner.entries.remove(&oldest);
                }
            }
        }

        inner.order.push_back((head.key.clone(), generation));
        inner.entries.insert(
            head.key.clone(),
            CachedHead {
                head,
                stored_at: now,
                generation,
            },
        );

        if inner.order.len() > self.capacity * 2 {
            let CacheInner { entries, order, .. } = &mut *inner;
            order.retain(|(key, generation)| {
                entries.get(key).map(|entry| entry.generation) == Some(*generation)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn head(key: &str, size: u64) -> ObjectHead {
        ObjectHead {
            key: key.to_string(),
            size,
            etag: None,
            last_modified: Utc::now(),
            content_type: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn returns_fresh_entries() {
        let cache = MetadataCache::new(4, Duration::from_secs(30));
        cache.insert(head("a.txt", 5), cache.begin_fill());
        assert_eq!(cache.get("a.txt").map(|h| h.size), Some(5));
        assert!(cache.get("b.txt").is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = MetadataCache::new(4, Duration::from_secs(30));
        let start = Instant::now();
        cache.insert_at(head("a.txt", 5), cache.begin_fill(), start);

        assert!(cache.get_at("a.txt", start + Duration::from_secs(29)).is_some());
        assert!(cache.get_at("a.txt", start + Duration::from_secs(30)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_when_full() {
        let cache = MetadataCache::new(2, Duration::from_secs(30));
        cache.insert(head("a", 1), cache.begin_fill());
        cache.insert(head("b", 2), cache.begin_fill());
        cache.insert(head("c", 3), cache.begin_fill());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn reinserting_a_key_refreshes_it_in_place() {
        let cache = MetadataCache::new(2, Duration::from_secs(30));
        cache.insert(head("a", 1), cache.begin_fill());
        cache.insert(head("b", 2), cache.begin_fill());
        cache.insert(head("a", 10), cache.begin_fill());
        cache.insert(head("c", 3), cache.begin_fill());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").map(|h| h.size), Some(10));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = MetadataCache::new(4, Duration::from_secs(30));
        cache.insert(head("a", 1), cache.begin_fill());
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn fill_overtaken_by_invalidation_is_dropped() {
        let cache = MetadataCache::new(4, Duration::from_secs(30));
        let token = cache.begin_fill();
        cache.invalidate("a");
        cache.insert(head("a", 1), token);
        assert!(cache.get("a").is_none());

        cache.insert(head("a", 2), cache.begin_fill());
        assert_eq!(cache.get("a").map(|h| h.size), Some(2));
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = MetadataCache::disabled();
        cache.insert(head("a", 1), cache.begin_fill());
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }
}
