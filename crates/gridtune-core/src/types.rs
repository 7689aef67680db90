//! Domain types shared across gridtune subsystems.
//!
//! `MetricSnapshot` is the unit of observation: the monitoring system
//! stores them, the alert manager evaluates rules against them, and the
//! coordinator compares a before/after pair to judge an optimization pass.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ── Metrics ────────────────────────────────────────────────────────

/// A point-in-time view of the service's performance.
///
/// Snapshots are plain records with no binary framing, suitable for export
/// to any metrics backend as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Unix timestamp (milliseconds) when the snapshot was taken.
    pub timestamp: u64,
    /// Mean response latency over the sampling window.
    pub response_time_ms: f64,
    /// Requests per second over the sampling window.
    pub throughput: f64,
    /// Fraction of requests that failed, `0.0..=1.0`.
    pub error_rate: f64,
    /// CPU utilization, `0.0..=1.0`.
    pub cpu_utilization: f64,
    /// Memory utilization, `0.0..=1.0`.
    pub memory_utilization: f64,
    /// Fraction of lookups served from cache, `0.0..=1.0`.
    pub cache_hit_rate: f64,
    /// Requests waiting for a processing slot.
    pub queue_depth: u64,
    /// Requests in flight when the snapshot was taken.
    pub concurrent_users: u64,
    /// Mean time spent inside the downstream processor.
    pub inference_time_ms: f64,
    /// Mean end-to-end processing time of cache misses.
    pub processing_time_ms: f64,
}

impl MetricSnapshot {
    /// The "no data yet" snapshot, stamped with the current time.
    ///
    /// Every gauge is zero except `cache_hit_rate`, which is also zero: an
    /// empty cache has served nothing.
    pub fn empty_now() -> Self {
        Self {
            timestamp: epoch_millis(),
            ..Self::default()
        }
    }

    /// Read a single metric by kind.
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::ResponseTimeMs => self.response_time_ms,
            MetricKind::Throughput => self.throughput,
            MetricKind::ErrorRate => self.error_rate,
            MetricKind::CpuUtilization => self.cpu_utilization,
            MetricKind::MemoryUtilization => self.memory_utilization,
            MetricKind::CacheHitRate => self.cache_hit_rate,
            MetricKind::QueueDepth => self.queue_depth as f64,
            MetricKind::ConcurrentUsers => self.concurrent_users as f64,
            MetricKind::InferenceTimeMs => self.inference_time_ms,
            MetricKind::ProcessingTimeMs => self.processing_time_ms,
        }
    }
}

/// Names a single field of [`MetricSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ResponseTimeMs,
    Throughput,
    ErrorRate,
    CpuUtilization,
    MemoryUtilization,
    CacheHitRate,
    QueueDepth,
    ConcurrentUsers,
    InferenceTimeMs,
    ProcessingTimeMs,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ResponseTimeMs => "response_time_ms",
            Self::Throughput => "throughput",
            Self::ErrorRate => "error_rate",
            Self::CpuUtilization => "cpu_utilization",
            Self::MemoryUtilization => "memory_utilization",
            Self::CacheHitRate => "cache_hit_rate",
            Self::QueueDepth => "queue_depth",
            Self::ConcurrentUsers => "concurrent_users",
            Self::InferenceTimeMs => "inference_time_ms",
            Self::ProcessingTimeMs => "processing_time_ms",
        };
        f.write_str(name)
    }
}

/// Inclusive timestamp range (Unix milliseconds) for metric queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The trailing window of `millis` ending now.
    pub fn last_millis(millis: u64) -> Self {
        let now = epoch_millis();
        Self {
            start: now.saturating_sub(millis),
            end: now,
        }
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

// ── Optimization ───────────────────────────────────────────────────

/// A subsystem tuned by the optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemKind {
    Cache,
    LoadBalancing,
    Scaling,
    Query,
    Resource,
}

impl SubsystemKind {
    /// Every subsystem, in the order the optimization pass visits them.
    pub const ALL: [SubsystemKind; 5] = [
        SubsystemKind::Cache,
        SubsystemKind::LoadBalancing,
        SubsystemKind::Scaling,
        SubsystemKind::Query,
        SubsystemKind::Resource,
    ];

    /// Minimum improvement (percent) for a pass to be recorded.
    pub fn significance_threshold(self) -> f64 {
        match self {
            Self::Cache => 5.0,
            Self::LoadBalancing => 10.0,
            Self::Scaling => 15.0,
            Self::Query => 20.0,
            Self::Resource => 8.0,
        }
    }

    /// The snapshot field this subsystem is judged on.
    pub fn primary_metric(self) -> MetricKind {
        match self {
            Self::Cache => MetricKind::CacheHitRate,
            Self::LoadBalancing => MetricKind::ResponseTimeMs,
            Self::Scaling => MetricKind::Throughput,
            Self::Query => MetricKind::ProcessingTimeMs,
            Self::Resource => MetricKind::CpuUtilization,
        }
    }

    /// Whether a larger primary metric is an improvement.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Self::Cache | Self::Scaling)
    }
}

impl std::fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cache => "cache",
            Self::LoadBalancing => "load_balancing",
            Self::Scaling => "scaling",
            Self::Query => "query",
            Self::Resource => "resource",
        };
        f.write_str(name)
    }
}

/// Record of an optimization pass whose improvement was significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub id: String,
    /// Unix timestamp (milliseconds) when the pass finished.
    pub timestamp: u64,
    pub subsystem: SubsystemKind,
    pub before: MetricSnapshot,
    pub after: MetricSnapshot,
    pub improvement_percent: f64,
    pub recommendations: Vec<String>,
    /// Unix timestamp (milliseconds) of the next scheduled pass.
    pub next_run_at: u64,
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
