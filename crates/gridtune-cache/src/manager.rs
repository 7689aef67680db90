//! Cache manager — TTL lookups, size-bounded admission, eviction, and
//! self-tuning.
//!
//! Reads lock only the shard that owns the key. Writes that may evict take
//! a short admission lock so the capacity invariant holds across
//! concurrent `set` calls; two writers on the same key still race and the
//! last to finish wins.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use gridtune_core::{CacheConfig, EvictionStrategy};

use crate::entry::{CacheEntry, EntryOptions};
use crate::error::{CacheError, CacheResult};

/// Fraction of live entries removed by one eviction batch.
const EVICTION_BATCH_FRACTION: usize = 10;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    pub size_bytes: u64,
    pub capacity_bytes: u64,
    pub average_entry_size: f64,
    /// Lifetime hit rate.
    pub hit_rate: f64,
    pub strategy: EvictionStrategy,
}

/// What one `optimize()` pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptimization {
    pub expired_removed: usize,
    /// `(from, to)` when the adaptive strategy switched.
    pub strategy_switch: Option<(EvictionStrategy, EvictionStrategy)>,
    /// Rolling hit rate observed before the window was reset.
    pub window_hit_rate: Option<f64>,
    /// Bytes the size counter was off by before compaction.
    pub size_drift: i64,
}

impl CacheOptimization {
    pub fn recommendations(&self) -> Vec<String> {
        let mut recs = Vec::new();
        if let Some((from, to)) = self.strategy_switch {
            recs.push(format!("switched eviction strategy from {from:?} to {to:?}"));
        }
        if self.expired_removed > 0 {
            recs.push(format!("purged {} expired entries", self.expired_removed));
        }
        if let Some(rate) = self.window_hit_rate
            && rate < 0.5
        {
            recs.push(format!(
                "hit rate {rate:.2} is low; consider raising the base TTL or narrowing the cache key fields"
            ));
        }
        recs
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    window_hits: AtomicU64,
    window_misses: AtomicU64,
}

pub struct CacheManager {
    entries: DashMap<String, CacheEntry>,
    config: RwLock<CacheConfig>,
    /// Active ordering. Starts as the configured strategy; an adaptive
    /// cache may switch it to LFU.
    strategy: RwLock<EvictionStrategy>,
    size_bytes: AtomicU64,
    seq: AtomicU64,
    admission: Mutex<()>,
    counters: Counters,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let strategy = config.strategy;
        Self {
            entries: DashMap::new(),
            config: RwLock::new(config),
            strategy: RwLock::new(strategy),
            size_bytes: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            admission: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Look up a key.
    ///
    /// An entry older than its TTL counts as a miss and is purged.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();

        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                let seq = self.next_seq();
                entry.touch(now, seq);
                self.record_hit();
                debug!(%key, access_count = entry.access_count, "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => {}
            None => {
                self.record_miss();
                debug!(%key, "cache miss");
                return None;
            }
        }

        // The shard guard is released above, so removal cannot deadlock.
        if let Some((_, expired)) = self.entries.remove_if(key, |_, e| e.is_expired(now)) {
            self.sub_size(expired.size_bytes);
        }
        self.record_miss();
        debug!(%key, "cache miss (expired)");
        None
    }

    /// Store a value with an optional TTL in seconds. Returns the TTL the
    /// entry was stored with.
    pub fn set(&self, key: &str, value: serde_json::Value, ttl_seconds: Option<u64>) -> CacheResult<u64> {
        self.set_with(
            key,
            value,
            EntryOptions {
                ttl_seconds,
                ..EntryOptions::default()
            },
        )
    }

    /// Store a value, evicting as needed to stay within capacity.
    ///
    /// Returns the TTL after clamping to `[min_ttl, max_ttl]`.
    pub fn set_with(&self, key: &str, value: serde_json::Value, options: EntryOptions) -> CacheResult<u64> {
        let size = serde_json::to_vec(&value)?.len() as u64;
        let (capacity, ttl) = {
            let config = self.config.read();
            let ttl = options
                .ttl_seconds
                .unwrap_or(config.default_ttl_seconds)
                .clamp(config.min_ttl_seconds, config.max_ttl_seconds);
            (config.capacity_bytes(), ttl)
        };

        if size > capacity {
            return Err(CacheError::CapacityExceeded { size, capacity });
        }

        let _admission = self.admission.lock();

        if let Some((_, old)) = self.entries.remove(key) {
            self.sub_size(old.size_bytes);
        }
        if self.size() + size > capacity {
            self.evict_until(size, capacity);
        }

        let seq = self.next_seq();
        let entry = CacheEntry::new(key.to_string(), value, size, ttl, options, seq);
        self.entries.insert(key.to_string(), entry);
        self.size_bytes.fetch_add(size, Ordering::AcqRel);

        debug!(%key, size, ttl, total = self.size(), "cache entry stored");
        Ok(ttl)
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.sub_size(entry.size_bytes);
                true
            }
            None => false,
        }
    }

    /// Remove every entry carrying `tag`.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.has_tag(tag))
            .map(|e| e.key().clone())
            .collect();

        let removed = keys.iter().filter(|k| self.remove(k)).count();
        debug!(%tag, removed, "cache entries invalidated by tag");
        removed
    }

    pub fn clear(&self) {
        let _admission = self.admission.lock();
        self.entries.clear();
        self.size_bytes.store(0, Ordering::Release);
    }

    /// Remove one batch of victims: the first 10% (at least one) of live
    /// entries in eviction order. Returns the number removed.
    ///
    /// Expired entries go first, then lower priorities, then the active
    /// strategy's ordering: LRU by last access, LFU by access count, TTL by
    /// creation.
    pub fn evict(&self) -> usize {
        let now = Instant::now();
        let strategy = *self.strategy.read();

        let mut candidates: Vec<(bool, u8, u64, u64, String)> = self
            .entries
            .iter()
            .map(|e| {
                let (primary, secondary) = match strategy {
                    EvictionStrategy::Lru | EvictionStrategy::Adaptive => (e.accessed_seq, 0),
                    EvictionStrategy::Lfu => (e.access_count, e.accessed_seq),
                    EvictionStrategy::Ttl => (e.created_seq, 0),
                };
                (!e.is_expired(now), e.priority as u8, primary, secondary, e.key().clone())
            })
            .collect();

        if candidates.is_empty() {
            return 0;
        }
        candidates.sort_unstable();

        let batch = (candidates.len() / EVICTION_BATCH_FRACTION).max(1);
        let mut removed = 0;
        for (_, _, _, _, key) in candidates.into_iter().take(batch) {
            if self.remove(&key) {
                removed += 1;
                debug!(%key, ?strategy, "cache entry evicted");
            }
        }

        self.counters.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Evict batches until `incoming` more bytes fit within `capacity`.
    fn evict_until(&self, incoming: u64, capacity: u64) {
        while self.size() + incoming > capacity {
            if self.evict() == 0 {
                break;
            }
        }
    }

    /// Purge every expired entry.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| e.is_expired(now)) {
                self.sub_size(entry.size_bytes);
                removed += 1;
            }
        }
        removed
    }

    /// Recompute the size counter from live entries and release spare map
    /// capacity. Returns how far the counter had drifted.
    pub fn compact(&self) -> i64 {
        let _admission = self.admission.lock();
        let actual: u64 = self.entries.iter().map(|e| e.size_bytes).sum();
        let recorded = self.size_bytes.swap(actual, Ordering::AcqRel);
        self.entries.shrink_to_fit();
        recorded as i64 - actual as i64
    }

    /// Self-tuning pass. All three steps run every time:
    /// purge expired entries, let an adaptive cache switch to LFU when its
    /// rolling hit rate is below the floor, and compact.
    pub fn optimize(&self) -> CacheOptimization {
        let expired_removed = self.evict_expired();

        let window_hit_rate = self.window_hit_rate();
        let floor = self.config.read().adaptive_hit_rate_floor;
        let strategy_switch = {
            let mut strategy = self.strategy.write();
            match (*strategy, window_hit_rate) {
                (EvictionStrategy::Adaptive, Some(rate)) if rate < floor => {
                    *strategy = EvictionStrategy::Lfu;
                    info!(hit_rate = rate, floor, "adaptive cache switched to LFU");
                    Some((EvictionStrategy::Adaptive, EvictionStrategy::Lfu))
                }
                _ => None,
            }
        };

        let size_drift = self.compact();
        self.counters.window_hits.store(0, Ordering::Relaxed);
        self.counters.window_misses.store(0, Ordering::Relaxed);

        debug!(expired_removed, size_drift, "cache optimized");
        CacheOptimization {
            expired_removed,
            strategy_switch,
            window_hit_rate,
            size_drift,
        }
    }

    /// Replace the configuration after validating it. The active strategy
    /// resets to the configured one; a smaller capacity evicts at once.
    pub fn reconfigure(&self, config: CacheConfig) -> CacheResult<()> {
        config.validate()?;
        let capacity = config.capacity_bytes();
        *self.strategy.write() = config.strategy;
        *self.config.write() = config;

        let _admission = self.admission.lock();
        self.evict_until(0, capacity);
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let entry_count = self.entries.len();
        let size_bytes = self.size();
        CacheStats {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entry_count,
            size_bytes,
            capacity_bytes: self.config.read().capacity_bytes(),
            average_entry_size: if entry_count > 0 {
                size_bytes as f64 / entry_count as f64
            } else {
                0.0
            },
            hit_rate: ratio(hits, misses).unwrap_or(0.0),
            strategy: self.strategy(),
        }
    }

    /// Hit rate since the last `optimize()`, or `None` without lookups.
    pub fn window_hit_rate(&self) -> Option<f64> {
        ratio(
            self.counters.window_hits.load(Ordering::Relaxed),
            self.counters.window_misses.load(Ordering::Relaxed),
        )
    }

    pub fn strategy(&self) -> EvictionStrategy {
        *self.strategy.read()
    }

    pub fn size(&self) -> u64 {
        self.size_bytes.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Clone an entry's metadata without counting an access.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.counters.window_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.window_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn sub_size(&self, bytes: u64) {
        let _ = self
            .size_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| Some(cur.saturating_sub(bytes)));
    }
}

fn ratio(hits: u64, misses: u64) -> Option<f64> {
    let total = hits + misses;
    (total > 0).then(|| hits as f64 / total as f64)
}
