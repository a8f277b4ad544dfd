//! Bounded TTL + LRU memoization of task results.
//!
//! Expiry is lazy: stale entries read as absent and are dropped on access,
//! and they stay eligible for LRU eviction until then. The entry count never
//! exceeds the configured capacity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::image::ImageInput;
use crate::schema::{TaskKind, TaskResult};

/// Cache of task results shared by every runner
pub type ResultCache = TtlLruCache<TaskResult>;

/// Deterministic key over (image content, task kind, context)
pub fn cache_key(input: &ImageInput, task: TaskKind, context: &str) -> String {
    let context_digest = Sha256::digest(context.as_bytes());
    format!("{}:{}:{:x}", task.as_str(), input.digest(), context_digest)
}

// Ten years stands in for "never" when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

fn expiry_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    tick: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    // Recency order: smallest tick is least recently used.
    order: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> Inner<V> {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;

        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (&tick, _) = self.order.iter().next()?;
        let key = self.order.remove(&tick)?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub active: usize,
    pub expired: usize,
    pub capacity: usize,
    pub utilization_pct: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Capacity-bounded cache with per-entry TTL and LRU eviction
#[derive(Debug)]
pub struct TtlLruCache<V> {
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, refreshing its recency on a hit
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.entries.get(key).map(|entry| entry.expires_at <= now) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(true) => {
                inner.remove(key);
                inner.expirations += 1;
                inner.misses += 1;
                return None;
            }
            Some(false) => {}
        }

        inner.hits += 1;
        inner.touch(key);
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store `value` under `key` for `ttl`
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut inner = self.lock();
        let expires_at = expiry_after(ttl);

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            inner.touch(&key);
            return;
        }

        while inner.entries.len() >= self.capacity {
            match inner.evict_lru() {
                Some(evicted) => debug!(key = %evicted, "Evicted least recently used cache entry"),
                None => break,
            }
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                tick,
            },
        );
    }

    /// Store `value` for the default TTL
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let now = Instant::now();
        let entries = inner.entries.len();
        let expired = inner.entries.values().filter(|e| e.expires_at <= now).count();

        CacheStats {
            entries,
            active: entries - expired,
            expired,
            capacity: self.capacity,
            utilization_pct: entries as f64 * 100.0 / self.capacity as f64,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}
