//! Relevance score cache.
//!
//! Maps (normalized query, candidate identity) to a previously computed
//! cross-encoder score so repeated searches skip inference.
//!
//! ## Policy
//!
//! - **LRU eviction** when `capacity` is exceeded.
//! - **TTL expiration** checked on read, independent of LRU position.
//! - A cache hit returns the stored score unchanged.
//!
//! ```ascii
//! entries: HashMap<CacheKey, Entry{score, inserted_at, last_access, tick}>
//! order:   BTreeMap<tick, CacheKey>        (oldest tick = least recently used)
//! ```
//!
//! Both maps live behind one mutex so a lookup and its recency update are a
//! single atomic step. The lock is never held across an await point.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for the relevance cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Time-to-live for entries, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Stable key derived from the normalized query and candidate identity.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn new(normalized_query: &str, candidate_identity: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized_query.as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart.
        hasher.update(&[0u8]);
        hasher.update(candidate_identity.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    score: f64,
    inserted_at: Instant,
    last_access: Instant,
    tick: u64,
}

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<CacheKey, CacheEntry>,
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
}

impl LruState {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let oldest = match self.order.iter().next() {
            Some((&tick, &key)) => (tick, key),
            None => return false,
        };
        self.order.remove(&oldest.0);
        self.entries.remove(&oldest.1);
        true
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to respect capacity.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, TTL-aware LRU cache of relevance scores.
#[derive(Debug)]
pub struct RelevanceCache {
    config: CacheConfig,
    state: Mutex<LruState>,
    stats: Mutex<CacheStats>,
}

impl RelevanceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: CacheConfig {
                capacity: config.capacity.max(1),
                ..config
            },
            state: Mutex::new(LruState::default()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a score using the configured TTL.
    pub async fn get(&self, key: &CacheKey) -> Option<f64> {
        self.get_within(key, self.config.ttl()).await
    }

    /// Look up a score that is at most `max_age` old.
    ///
    /// An entry older than `max_age` is removed and counted as a miss.
    pub async fn get_within(&self, key: &CacheKey, max_age: Duration) -> Option<f64> {
        let now = Instant::now();
        let result = {
            let mut state = self.state.lock().await;
            match state.entries.get(key).map(|e| (e.inserted_at, e.tick)) {
                None => Lookup::Miss,
                Some((inserted_at, _)) if now.duration_since(inserted_at) >= max_age => {
                    state.remove(key);
                    Lookup::Expired
                }
                Some((_, old_tick)) => {
                    let tick = state.bump();
                    state.order.remove(&old_tick);
                    state.order.insert(tick, *key);
                    match state.entries.get_mut(key) {
                        Some(entry) => {
                            entry.tick = tick;
                            entry.last_access = now;
                            Lookup::Hit(entry.score)
                        }
                        None => Lookup::Miss,
                    }
                }
            }
        };

        let mut stats = self.stats.lock().await;
        match result {
            Lookup::Hit(score) => {
                stats.hits += 1;
                Some(score)
            }
            Lookup::Miss => {
                stats.misses += 1;
                None
            }
            Lookup::Expired => {
                stats.misses += 1;
                stats.expirations += 1;
                None
            }
        }
    }

    /// Store a score, evicting least-recently-used entries past capacity.
    pub async fn put(&self, key: CacheKey, score: f64) {
        let now = Instant::now();
        let evicted = {
            let mut state = self.state.lock().await;
            state.remove(&key);
            let tick = state.bump();
            state.entries.insert(
                key,
                CacheEntry {
                    score,
                    inserted_at: now,
                    last_access: now,
                    tick,
                },
            );
            state.order.insert(tick, key);

            let mut evicted = 0;
            while state.entries.len() > self.config.capacity && state.evict_lru() {
                evicted += 1;
            }
            evicted
        };

        if evicted > 0 {
            tracing::trace!(evicted, "Relevance cache evicted LRU entries");
            self.stats.lock().await.evictions += evicted;
        }
    }

    /// Time since the entry was last read or written, if present.
    pub async fn idle_time(&self, key: &CacheKey) -> Option<Duration> {
        let state = self.state.lock().await;
        state.entries.get(key).map(|e| e.last_access.elapsed())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.len().await;
        let stats = self.stats.lock().await;
        CacheStats {
            entries,
            ..stats.clone()
        }
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.order.clear();
    }
}

impl Default for RelevanceCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

enum Lookup {
    Hit(f64),
    Miss,
    Expired,
}
