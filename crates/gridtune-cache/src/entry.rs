//! Cache entries and their metadata.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Eviction priority. Lower priorities are evicted first; within a
/// priority the active strategy decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Per-entry options for [`CacheManager::set_with`](crate::CacheManager::set_with).
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// TTL in seconds; `None` uses the configured default. Always clamped
    /// to `[min_ttl_seconds, max_ttl_seconds]`.
    pub ttl_seconds: Option<u64>,
    pub tags: Vec<String>,
    pub priority: CachePriority,
}

/// A stored value plus the bookkeeping eviction needs.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: Instant,
    pub ttl_seconds: u64,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    /// Serialized payload length.
    pub size_bytes: u64,
    pub tags: Vec<String>,
    pub priority: CachePriority,
    /// Monotonic sequence numbers. They order entries even when several
    /// share an `Instant`.
    pub(crate) created_seq: u64,
    pub(crate) accessed_seq: u64,
}

impl CacheEntry {
    pub(crate) fn new(
        key: String,
        value: serde_json::Value,
        size_bytes: u64,
        ttl_seconds: u64,
        options: EntryOptions,
        seq: u64,
    ) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            created_at: now,
            ttl_seconds,
            access_count: 0,
            last_accessed_at: now,
            size_bytes,
            tags: options.tags,
            priority: options.priority,
            created_seq: seq,
            accessed_seq: seq,
        }
    }

    /// Expired once strictly more than `ttl_seconds` have passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > Duration::from_secs(self.ttl_seconds)
    }

    pub(crate) fn touch(&mut self, now: Instant, seq: u64) {
        self.access_count += 1;
        self.last_accessed_at = now;
        self.accessed_seq = seq;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
