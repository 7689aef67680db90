//! Metrics collector — accumulates request outcomes into a window.
//!
//! Counters are atomics so the request path never takes a lock. A
//! `snapshot()` turns the window into a [`MetricSnapshot`] and starts a new
//! one; `peek()` reads the window without resetting it.
//!
//! Alongside the window the collector keeps running totals that are never
//! reset. A [`WindowMark`] captures them, and [`MetricsCollector::between`]
//! measures the traffic between two marks no matter how often the sampling
//! loop closes windows in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use gridtune_core::{MetricSnapshot, epoch_millis};

/// Request counters, either for the current window or since start.
#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Sum of end-to-end latency of every request, microseconds.
    latency_us: AtomicU64,
    /// Sum of end-to-end latency of cache misses, microseconds.
    miss_latency_us: AtomicU64,
    /// Sum of time spent inside the processor, microseconds.
    inference_us: AtomicU64,
}

impl Counters {
    fn hit(&self, latency_us: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    fn miss(&self, latency_us: u64, inference_us: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.miss_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.inference_us.fetch_add(inference_us, Ordering::Relaxed);
    }

    fn error(&self, latency_us: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    fn load(&self) -> Counts {
        Counts {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            latency_us: self.latency_us.load(Ordering::Relaxed),
            miss_latency_us: self.miss_latency_us.load(Ordering::Relaxed),
            inference_us: self.inference_us.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.latency_us.store(0, Ordering::Relaxed);
        self.miss_latency_us.store(0, Ordering::Relaxed);
        self.inference_us.store(0, Ordering::Relaxed);
    }
}

/// A plain reading of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    requests: u64,
    errors: u64,
    cache_hits: u64,
    cache_misses: u64,
    latency_us: u64,
    miss_latency_us: u64,
    inference_us: u64,
}

impl Counts {
    fn since(self, earlier: Counts) -> Counts {
        Counts {
            requests: self.requests.saturating_sub(earlier.requests),
            errors: self.errors.saturating_sub(earlier.errors),
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(earlier.cache_misses),
            latency_us: self.latency_us.saturating_sub(earlier.latency_us),
            miss_latency_us: self.miss_latency_us.saturating_sub(earlier.miss_latency_us),
            inference_us: self.inference_us.saturating_sub(earlier.inference_us),
        }
    }
}

/// Running totals at one instant.
#[derive(Debug, Clone, Copy)]
pub struct WindowMark {
    totals: Counts,
    at: Instant,
}

impl WindowMark {
    /// Requests recorded since the collector was created.
    pub fn total_requests(&self) -> u64 {
        self.totals.requests
    }
}

/// Traffic between two marks.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReading {
    /// Requests recorded between the marks.
    pub requests: u64,
    pub snapshot: MetricSnapshot,
}

/// Collects request metrics and gauges for the service.
pub struct MetricsCollector {
    window: Counters,
    totals: Counters,
    window_started: Mutex<Instant>,
    in_flight: AtomicU64,
    queue_depth: AtomicU64,
    /// f64 bit patterns.
    cpu_utilization: AtomicU64,
    memory_utilization: AtomicU64,
}

/// Marks one request as in flight until dropped.
pub struct InFlight<'a> {
    collector: &'a MetricsCollector,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.collector.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn micros(d: Duration) -> u64 {
    d.as_micros().min(u64::MAX as u128) as u64
}

fn mean_ms(sum_us: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum_us as f64 / count as f64 / 1000.0
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            window: Counters::default(),
            totals: Counters::default(),
            window_started: Mutex::new(Instant::now()),
            in_flight: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            cpu_utilization: AtomicU64::new(0f64.to_bits()),
            memory_utilization: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Count a request as in flight for the guard's lifetime.
    pub fn enter(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight { collector: self }
    }

    pub fn record_cache_hit(&self, latency: Duration) {
        let latency_us = micros(latency);
        self.window.hit(latency_us);
        self.totals.hit(latency_us);
    }

    /// A request served by the processor. `inference` is the time spent
    /// inside the processor call.
    pub fn record_cache_miss(&self, latency: Duration, inference: Duration) {
        let (latency_us, inference_us) = (micros(latency), micros(inference));
        self.window.miss(latency_us, inference_us);
        self.totals.miss(latency_us, inference_us);
    }

    /// A request that failed. It still looked up the cache and missed.
    pub fn record_error(&self, latency: Duration) {
        let latency_us = micros(latency);
        self.window.error(latency_us);
        self.totals.error(latency_us);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Host utilization gauges, `0.0..=1.0`.
    pub fn set_utilization(&self, cpu: f64, memory: f64) {
        self.cpu_utilization.store(cpu.to_bits(), Ordering::Relaxed);
        self.memory_utilization.store(memory.to_bits(), Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Requests recorded in the current window.
    pub fn current_request_count(&self) -> u64 {
        self.window.requests.load(Ordering::Relaxed)
    }

    /// The current window as a snapshot, without resetting it.
    pub fn peek(&self) -> MetricSnapshot {
        let elapsed = self.window_started.lock().elapsed();
        self.to_snapshot(self.window.load(), elapsed)
    }

    /// Capture the running totals.
    pub fn mark(&self) -> WindowMark {
        WindowMark {
            totals: self.totals.load(),
            at: Instant::now(),
        }
    }

    /// Traffic recorded between `from` and `to`. Gauges are read now.
    pub fn between(&self, from: &WindowMark, to: &WindowMark) -> WindowReading {
        let counts = to.totals.since(from.totals);
        WindowReading {
            requests: counts.requests,
            snapshot: self.to_snapshot(counts, to.at.saturating_duration_since(from.at)),
        }
    }

    fn to_snapshot(&self, c: Counts, elapsed: Duration) -> MetricSnapshot {
        let elapsed = elapsed.as_secs_f64();
        let served_misses = c.cache_misses.saturating_sub(c.errors);

        MetricSnapshot {
            timestamp: epoch_millis(),
            response_time_ms: mean_ms(c.latency_us, c.requests),
            throughput: if elapsed > 0.0 { c.requests as f64 / elapsed } else { 0.0 },
            error_rate: ratio(c.errors, c.requests),
            cpu_utilization: f64::from_bits(self.cpu_utilization.load(Ordering::Relaxed)),
            memory_utilization: f64::from_bits(self.memory_utilization.load(Ordering::Relaxed)),
            cache_hit_rate: ratio(c.cache_hits, c.cache_hits + c.cache_misses),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            concurrent_users: self.in_flight(),
            inference_time_ms: mean_ms(c.inference_us, served_misses),
            processing_time_ms: mean_ms(c.miss_latency_us, served_misses),
        }
    }

    /// Close the current window and return it as a snapshot.
    pub fn snapshot(&self) -> MetricSnapshot {
        let snapshot = self.peek();
        self.window.reset();
        *self.window_started.lock() = Instant::now();
        debug!(
            throughput = snapshot.throughput,
            response_time_ms = snapshot.response_time_ms,
            cache_hit_rate = snapshot.cache_hit_rate,
            "metrics window closed"
        );
        snapshot
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_is_all_zero() {
        let collector = MetricsCollector::new();
        let snap = collector.peek();
        assert_eq!(snap.response_time_ms, 0.0);
        assert_eq!(snap.error_rate, 0.0);
        assert_eq!(snap.cache_hit_rate, 0.0);
        assert_eq!(snap.processing_time_ms, 0.0);
    }

    #[test]
    fn rates_and_means() {
        let collector = MetricsCollector::new();
        collector.record_cache_hit(Duration::from_millis(2));
        collector.record_cache_miss(Duration::from_millis(40), Duration::from_millis(30));
        collector.record_cache_miss(Duration::from_millis(60), Duration::from_millis(50));
        collector.record_error(Duration::from_millis(18));

        let snap = collector.peek();
        assert_eq!(collector.current_request_count(), 4);
        assert!((snap.response_time_ms - 30.0).abs() < 1e-9);
        assert!((snap.error_rate - 0.25).abs() < 1e-9);
        assert!((snap.cache_hit_rate - 0.25).abs() < 1e-9);
        assert!((snap.processing_time_ms - 50.0).abs() < 1e-9);
        assert!((snap.inference_time_ms - 40.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_resets_window() {
        let collector = MetricsCollector::new();
        collector.record_cache_hit(Duration::from_millis(1));
        let first = collector.snapshot();
        assert_eq!(first.cache_hit_rate, 1.0);
        assert_eq!(collector.current_request_count(), 0);
        assert_eq!(collector.snapshot().cache_hit_rate, 0.0);
    }

    #[test]
    fn gauges_survive_reset() {
        let collector = MetricsCollector::new();
        collector.set_utilization(0.6, 0.4);
        collector.set_queue_depth(7);
        collector.snapshot();
        let snap = collector.peek();
        assert_eq!(snap.cpu_utilization, 0.6);
        assert_eq!(snap.memory_utilization, 0.4);
        assert_eq!(snap.queue_depth, 7);
    }

    #[test]
    fn in_flight_guard_tracks_concurrency() {
        let collector = MetricsCollector::new();
        let a = collector.enter();
        let b = collector.enter();
        assert_eq!(collector.peek().concurrent_users, 2);
        drop(a);
        drop(b);
        assert_eq!(collector.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn marks_measure_across_window_resets() {
        let collector = MetricsCollector::new();
        collector.record_cache_miss(Duration::from_millis(50), Duration::from_millis(45));
        let start = collector.mark();

        collector.record_cache_hit(Duration::from_millis(2));
        collector.snapshot();
        collector.record_cache_miss(Duration::from_millis(50), Duration::from_millis(45));
        collector.snapshot();
        tokio::time::advance(Duration::from_secs(2)).await;

        let reading = collector.between(&start, &collector.mark());
        assert_eq!(reading.requests, 2);
        assert!((reading.snapshot.cache_hit_rate - 0.5).abs() < 1e-9);
        assert!((reading.snapshot.response_time_ms - 26.0).abs() < 1e-9);
        assert!((reading.snapshot.processing_time_ms - 50.0).abs() < 1e-9);
        assert!((reading.snapshot.throughput - 1.0).abs() < 1e-6);
        assert_eq!(collector.mark().total_requests(), 3);
    }

    #[test]
    fn empty_interval_has_no_requests() {
        let collector = MetricsCollector::new();
        collector.record_cache_hit(Duration::from_millis(1));
        let mark = collector.mark();
        let reading = collector.between(&mark, &collector.mark());
        assert_eq!(reading.requests, 0);
        assert_eq!(reading.snapshot.response_time_ms, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_uses_window_length() {
        let collector = MetricsCollector::new();
        for _ in 0..20 {
            collector.record_cache_hit(Duration::from_millis(1));
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        let snap = collector.snapshot();
        assert!((snap.throughput - 2.0).abs() < 1e-6, "throughput was {}", snap.throughput);
    }
}
