//! gridtune-monitor — observability for the optimization layer.
//!
//! Turns per-request outcomes into [`MetricSnapshot`]s, keeps them for the
//! retention window, and raises alerts when configured thresholds are
//! crossed.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── record_cache_hit / record_cache_miss / record_error ← request path
//!   ├── snapshot() → MetricSnapshot (resets the window)
//!   └── mark() / between() → WindowReading (running totals, never reset)
//!
//! MonitoringSystem
//!   ├── record_metrics() → append + prune past retention
//!   ├── get_current_metrics() / get_metrics(range)
//!   └── run() → sample collector, record, check thresholds
//!
//! AlertManager
//!   ├── check_thresholds(&[MetricSnapshot]) → Vec<Alert>
//!   └── dispatch → NotificationChannel (spawned, never awaited)
//! ```
//!
//! [`MetricSnapshot`]: gridtune_core::MetricSnapshot

pub mod alert;
pub mod channel;
pub mod collector;
pub mod monitoring;

pub use alert::{Alert, AlertManager};
pub use channel::{LogChannel, NotificationChannel, RelayChannel, SlackChannel, WebhookChannel, build_channel};
pub use collector::{InFlight, MetricsCollector, WindowMark, WindowReading};
pub use monitoring::MonitoringSystem;
