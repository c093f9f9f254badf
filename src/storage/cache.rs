//! Read-through cache for store queries.
//!
//! Entries expire `ttl` after insertion and are never refreshed by reads.
//! When full, the entry inserted longest ago is evicted. Invalidation drops
//! everything and bumps a generation counter; a read that started under an
//! older generation cannot put its result back.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds an entry stays valid.
    pub ttl_secs: u64,
    /// Maximum number of entries; zero disables caching.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            capacity: 256,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    order: VecDeque<String>,
    generation: u64,
}

/// Bounded TTL cache keyed by query.
pub struct QueryCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache from its configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.ttl(), config.capacity)
    }

    /// Create a cache with an explicit entry lifetime.
    pub fn with_ttl(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                generation: 0,
            }),
            ttl,
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current generation. Capture it before reading the backend and hand it
    /// to [`insert`](Self::insert).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Look up a live entry, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
        };

        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }

        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a value read under `generation`. Returns false when the cache
    /// was invalidated since then and the value was dropped.
    pub fn insert(&self, key: impl Into<String>, value: V, generation: u64) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let key = key.into();
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }

        if inner.entries.remove(&key).is_some() {
            inner.order.retain(|k| k != &key);
        }

        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    /// Drop every entry and start a new generation.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.generation += 1;
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
