//! gridtune-coordinator — ties the cache, balancer, autoscaler and
//! monitoring together.
//!
//! # Request path
//!
//! ```text
//! process_optimized(request)
//!   ├── cache_key(payload, fields) ── hit ──→ record_cache_hit → return
//!   └── miss
//!         ├── ResourcePool::acquire        (bounded concurrency)
//!         ├── LoadBalancer::acquire        (NodeLease, connection +1)
//!         ├── RequestProcessor::process    (under processor_timeout_ms)
//!         ├── TTL = base × confidence × complexity × query boost
//!         ├── CacheManager::set_with
//!         └── record_cache_miss            (or record_error + alerts → Err)
//! ```
//!
//! # Optimization pass
//!
//! For cache, load balancing, scaling, query and resource in that order:
//! mark the collector's running totals, run the subsystem's `optimize`,
//! wait the stabilization delay, mark again. The traffic before and after
//! the `optimize` is compared; an [`OptimizationResult`] is recorded only
//! when both stretches saw requests and the subsystem's primary metric
//! improved past its significance threshold. One pass runs at a time.
//!
//! [`OptimizationResult`]: gridtune_core::OptimizationResult

pub mod coordinator;
pub mod error;
pub mod key;
pub mod pool;
pub mod processor;
pub mod query;

pub use coordinator::{Coordinator, ProcessedResponse, improvement_percent};
pub use error::{CoordinatorError, CoordinatorResult};
pub use key::{cache_key, complexity_factor, compute_ttl};
pub use pool::{PoolOptimization, PoolPermit, ResourcePool};
pub use processor::{HttpProcessor, OptimizedRequest, ProcessorResponse, RequestProcessor};
pub use query::{QueryOptimization, QueryOptimizer};
