//! Query optimizer — finds hot, slow requests and caches them longer.
//!
//! Every processed request is recorded under its cache key. `optimize()`
//! recomputes the boosted set: fingerprints executed at least
//! `hot_query_count` times whose mean processing time exceeds
//! `slow_query_ms`. Boosted fingerprints get their TTL multiplied by
//! `ttl_boost` on the next store.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use gridtune_core::QueryOptimizerConfig;

#[derive(Debug, Clone, Copy, Default)]
struct QueryStats {
    count: u64,
    total_ms: f64,
}

impl QueryStats {
    fn mean_ms(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.total_ms / self.count as f64 }
    }
}

/// What one `optimize()` pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptimization {
    pub tracked: usize,
    pub boosted: usize,
    /// Fingerprints dropped to stay under `max_tracked`.
    pub dropped: usize,
}

impl QueryOptimization {
    pub fn recommendations(&self) -> Vec<String> {
        let mut recs = Vec::new();
        if self.boosted > 0 {
            recs.push(format!("extended TTL for {} hot slow queries", self.boosted));
        }
        if self.dropped > 0 {
            recs.push(format!("stopped tracking {} rarely seen queries", self.dropped));
        }
        recs
    }
}

pub struct QueryOptimizer {
    stats: Mutex<HashMap<String, QueryStats>>,
    boosted: RwLock<HashSet<String>>,
    config: RwLock<QueryOptimizerConfig>,
}

impl QueryOptimizer {
    pub fn new(config: QueryOptimizerConfig) -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
            boosted: RwLock::new(HashSet::new()),
            config: RwLock::new(config),
        }
    }

    pub fn record(&self, fingerprint: &str, processing_ms: f64) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(fingerprint.to_string()).or_default();
        entry.count += 1;
        entry.total_ms += processing_ms;
    }

    /// TTL multiplier for `fingerprint`, `1.0` unless boosted.
    pub fn ttl_multiplier(&self, fingerprint: &str) -> f64 {
        if self.boosted.read().contains(fingerprint) {
            self.config.read().ttl_boost
        } else {
            1.0
        }
    }

    pub fn is_boosted(&self, fingerprint: &str) -> bool {
        self.boosted.read().contains(fingerprint)
    }

    pub fn tracked(&self) -> usize {
        self.stats.lock().len()
    }

    pub fn optimize(&self) -> QueryOptimization {
        let config = self.config.read().clone();
        let mut stats = self.stats.lock();

        let mut dropped = 0;
        if stats.len() > config.max_tracked {
            let mut by_count: Vec<(String, u64)> = stats.iter().map(|(k, s)| (k.clone(), s.count)).collect();
            by_count.sort_by_key(|(_, count)| *count);
            let excess = stats.len() - config.max_tracked;
            for (key, _) in by_count.into_iter().take(excess) {
                stats.remove(&key);
                dropped += 1;
            }
        }

        let boosted: HashSet<String> = stats
            .iter()
            .filter(|(_, s)| s.count >= config.hot_query_count && s.mean_ms() > config.slow_query_ms)
            .map(|(k, _)| k.clone())
            .collect();
        let result = QueryOptimization {
            tracked: stats.len(),
            boosted: boosted.len(),
            dropped,
        };
        drop(stats);

        *self.boosted.write() = boosted;
        debug!(tracked = result.tracked, boosted = result.boosted, dropped, "query stats optimized");
        result
    }

    pub fn reconfigure(&self, config: QueryOptimizerConfig) {
        *self.config.write() = config;
    }
}
