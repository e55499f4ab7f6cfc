use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::dns::{Answer, QType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub qtype: QType,
}

impl CacheKey {
    pub fn new(name: &str, qtype: QType) -> Self {
        Self {
            name: name.to_lowercase(),
            qtype,
        }
    }
}

/// A resolved answer set, addressed by `(name, type)`. TTL accounting is
/// done relative to `stored_at`, not refreshed on hit.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub answers: Vec<Answer>,
    stored_at: Instant,
    expires_at: Instant,
    original_ttl: u32,
    hit_count: u64,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(answers: Vec<Answer>, ttl: u32) -> Self {
        let now = Instant::now();
        Self {
            answers,
            stored_at: now,
            expires_at: now + Duration::from_secs(ttl as u64),
            original_ttl: ttl,
            hit_count: 0,
            last_accessed: now,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn remaining_ttl(&self, now: Instant) -> u32 {
        self.expires_at.saturating_duration_since(now).as_secs() as u32
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub expired: AtomicU64,
    pub evicted: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

/// Result of a cache lookup: the answers plus the TTL remaining at the
/// moment of the lookup, per the invariant that a cache hit's advertised
/// TTL never exceeds what's actually left.
pub struct CacheHit {
    pub answers: Vec<Answer>,
    pub ttl: u32,
}

/// Bounded, TTL-aware, concurrency-safe response cache. `insertion_order`
/// tracks recency for strict LRU eviction; it is only ever touched while
/// holding its own lock, never while holding a `DashMap` shard lock.
pub struct DnsCache {
    entries: DashMap<CacheKey, CacheEntry>,
    max_size: usize,
    insertion_order: Mutex<Vec<CacheKey>>,
    stats: CacheStats,
}

impl DnsCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
            insertion_order: Mutex::new(Vec::new()),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                self.remove_from_order(key);
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                trace!(name = %key.name, "cache entry expired");
                return None;
            }
            entry.hit_count += 1;
            entry.last_accessed = now;
            let ttl = entry.remaining_ttl(now);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.touch_order(key);
            return Some(CacheHit {
                answers: entry.answers.clone(),
                ttl,
            });
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store an answer set. A `ttl` of zero, or an empty answer set (an
    /// affirmative NOERROR response with nothing in it), is a no-op: neither
    /// is cached.
    pub fn set(&self, key: CacheKey, answers: Vec<Answer>, ttl: u32) {
        if ttl == 0 || answers.is_empty() {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        self.entries.insert(key.clone(), CacheEntry::new(answers, ttl));
        self.touch_order(&key);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        debug!(name = %key.name, ttl, "cached response");
    }

    pub fn delete(&self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.remove_from_order(key);
            self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
            self.remove_from_order(key);
        }
        self.stats.expired.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn touch_order(&self, key: &CacheKey) {
        let mut order = self.insertion_order.lock();
        order.retain(|k| k != key);
        order.push(key.clone());
    }

    fn remove_from_order(&self, key: &CacheKey) {
        self.insertion_order.lock().retain(|k| k != key);
    }

    fn evict_lru(&self) {
        let victim = {
            let mut order = self.insertion_order.lock();
            if order.is_empty() { None } else { Some(order.remove(0)) }
        };
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(name = %key.name, "evicted lru cache entry");
        }
    }
}
