//! gridtune-cache — intelligent response cache.
//!
//! A size-bounded key/value store with per-entry TTLs and a pluggable
//! eviction ordering (LRU, LFU, creation-time, or adaptive).
//!
//! # Architecture
//!
//! ```text
//! CacheManager
//!   ├── DashMap<String, CacheEntry>   (sharded, per-key locking)
//!   ├── size counter (atomic, recomputed by compact())
//!   ├── admission lock                (serializes evict + insert only)
//!   └── hit/miss counters             (lifetime + rolling window)
//! ```
//!
//! # Capacity
//!
//! After every `set` returns, the summed `size_bytes` of live entries is at
//! most the configured capacity. A single payload larger than the whole
//! capacity is rejected with [`CacheError::CapacityExceeded`].

pub mod entry;
pub mod error;
pub mod manager;

pub use entry::{CacheEntry, CachePriority, EntryOptions};
pub use error::{CacheError, CacheResult};
pub use manager::{CacheManager, CacheOptimization, CacheStats};
