//! gridtune-core — types shared by every gridtune subsystem.
//!
//! Holds the metric snapshot model that flows between the monitoring
//! system, the alert manager, and the optimization coordinator, the
//! `OptimizationResult` record, and the TOML configuration model with its
//! bounds validation.
//!
//! # Configuration
//!
//! ```toml
//! [cache]
//! strategy = "adaptive"
//! max_size_mb = 256
//! default_ttl_seconds = 3600
//!
//! [balancer]
//! algorithm = "scored"
//!
//! [scaling]
//! min_instances = 1
//! max_instances = 10
//!
//! [[alerting.rules]]
//! id = "high-latency"
//! metric = "response_time_ms"
//! operator = ">"
//! threshold = 500.0
//! channels = ["ops-log"]
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{ConfigError, ConfigResult};
pub use types::*;
