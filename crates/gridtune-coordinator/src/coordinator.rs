//! The optimization coordinator.
//!
//! Owns one of each subsystem and drives them on two paths:
//!
//! - `process_optimized` serves a request from cache or through a node.
//! - `optimize_performance` tunes every subsystem in turn and records the
//!   passes that moved their primary metric far enough.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use gridtune_autoscale::Autoscaler;
use gridtune_balancer::{LoadBalancer, LoadBalancerNode, RouteRequest};
use gridtune_cache::{CacheError, CacheManager, EntryOptions};
use gridtune_core::{
    GridtuneConfig, MetricSnapshot, OptimizationResult, SubsystemKind, TimeRange, epoch_millis,
};
use gridtune_monitor::{AlertManager, MetricsCollector, MonitoringSystem, WindowMark};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::key::{cache_key, complexity_factor, compute_ttl};
use crate::pool::ResourcePool;
use crate::processor::{OptimizedRequest, ProcessorResponse, RequestProcessor};
use crate::query::QueryOptimizer;

/// Optimization results kept for inspection.
const MAX_HISTORY: usize = 500;
/// Monitoring history handed to the autoscaler before each scaling pass.
const SCALING_LOOKBACK_MS: u64 = 60 * 60 * 1000;

/// The answer to one optimized request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedResponse {
    pub confidence: f64,
    pub body: serde_json::Value,
    pub cached: bool,
    /// Node that served the request; `None` for cache hits.
    pub node: Option<String>,
    /// TTL the response was stored with; `None` for cache hits and for
    /// responses that could not be cached.
    pub ttl_seconds: Option<u64>,
}

/// Percentage improvement of `subsystem`'s primary metric from `before`
/// to `after`.
///
/// A zero baseline counts as 100% when the metric moved the right way and
/// 0% otherwise.
pub fn improvement_percent(subsystem: SubsystemKind, before: &MetricSnapshot, after: &MetricSnapshot) -> f64 {
    let metric = subsystem.primary_metric();
    let (b, a) = (before.value(metric), after.value(metric));
    let gain = if subsystem.higher_is_better() { a - b } else { b - a };
    if b.abs() < f64::EPSILON {
        return if gain > 0.0 { 100.0 } else { 0.0 };
    }
    gain / b.abs() * 100.0
}

pub struct Coordinator {
    cache: Arc<CacheManager>,
    balancer: Arc<LoadBalancer>,
    autoscaler: Arc<Autoscaler>,
    monitoring: Arc<MonitoringSystem>,
    alerts: Arc<AlertManager>,
    collector: Arc<MetricsCollector>,
    processor: Arc<dyn RequestProcessor>,
    queries: QueryOptimizer,
    pool: ResourcePool,
    config: RwLock<GridtuneConfig>,
    history: Mutex<VecDeque<OptimizationResult>>,
    /// Start of the traffic the next subsystem is measured "before" on.
    baseline: Mutex<WindowMark>,
    /// Held for the whole of an optimization pass.
    pass: tokio::sync::Mutex<()>,
}

impl Coordinator {
    /// Validate `config`, build every subsystem, and register the
    /// configured nodes.
    pub fn new(config: GridtuneConfig, processor: Arc<dyn RequestProcessor>) -> CoordinatorResult<Self> {
        config.validate()?;

        let balancer = LoadBalancer::new(config.balancer.clone());
        for node in &config.nodes {
            balancer.register(LoadBalancerNode::from(node))?;
        }

        let collector = Arc::new(MetricsCollector::new());
        let coordinator = Self {
            cache: Arc::new(CacheManager::new(config.cache.clone())),
            balancer: Arc::new(balancer),
            autoscaler: Arc::new(Autoscaler::new(config.scaling.clone())),
            monitoring: Arc::new(MonitoringSystem::new(config.monitoring.clone())),
            alerts: Arc::new(AlertManager::new(&config.alerting)),
            baseline: Mutex::new(collector.mark()),
            collector,
            processor,
            queries: QueryOptimizer::new(config.optimizer.query.clone()),
            pool: ResourcePool::new(config.optimizer.pool.clone()),
            config: RwLock::new(config),
            history: Mutex::new(VecDeque::new()),
            pass: tokio::sync::Mutex::new(()),
        };
        info!(
            nodes = coordinator.balancer.nodes().len(),
            algorithm = ?coordinator.balancer.algorithm(),
            strategy = ?coordinator.cache.strategy(),
            "coordinator initialized"
        );
        Ok(coordinator)
    }

    /// Replace the autoscaler, typically with one carrying a scale callback.
    pub fn with_autoscaler(mut self, autoscaler: Autoscaler) -> Self {
        self.autoscaler = Arc::new(autoscaler);
        self
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn autoscaler(&self) -> &Arc<Autoscaler> {
        &self.autoscaler
    }

    pub fn monitoring(&self) -> &Arc<MonitoringSystem> {
        &self.monitoring
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn queries(&self) -> &QueryOptimizer {
        &self.queries
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn config(&self) -> GridtuneConfig {
        self.config.read().clone()
    }

    /// Recorded optimization results, oldest first.
    pub fn history(&self) -> Vec<OptimizationResult> {
        self.history.lock().iter().cloned().collect()
    }

    // ── Request path ────────────────────────────────────────────────

    /// Serve `request` from cache, or through a selected node on a miss.
    ///
    /// Failures are counted and run through the alert rules before they
    /// are returned.
    pub async fn process_optimized(&self, request: &OptimizedRequest) -> CoordinatorResult<ProcessedResponse> {
        let started = Instant::now();
        let _in_flight = self.collector.enter();
        let (fields, base_ttl, timeout) = {
            let config = self.config.read();
            (
                config.optimizer.cache_key_fields.clone(),
                config.optimizer.base_ttl_seconds,
                Duration::from_millis(config.optimizer.processor_timeout_ms),
            )
        };
        let key = cache_key(&request.payload, &fields);

        if let Some(cached) = self.cache.get(&key) {
            match serde_json::from_value::<ProcessorResponse>(cached) {
                Ok(hit) => {
                    self.collector.record_cache_hit(started.elapsed());
                    debug!(key = %key, "served from cache");
                    return Ok(ProcessedResponse {
                        confidence: hit.confidence,
                        body: hit.body,
                        cached: true,
                        node: None,
                        ttl_seconds: None,
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "unreadable cache entry dropped");
                    self.cache.remove(&key);
                }
            }
        }

        match self.dispatch(request, timeout).await {
            Ok((node, response, inference)) => {
                let ttl = compute_ttl(
                    base_ttl,
                    response.confidence,
                    complexity_factor(&request.payload),
                    self.queries.ttl_multiplier(&key),
                );
                let stored_ttl = self.store(&key, &response, ttl, request.tags.clone());

                let latency = started.elapsed();
                self.queries.record(&key, latency.as_secs_f64() * 1000.0);
                self.collector.record_cache_miss(latency, inference);
                self.refresh_gauges();
                debug!(key = %key, node = %node, ttl = ?stored_ttl, "processed");

                Ok(ProcessedResponse {
                    confidence: response.confidence,
                    body: response.body,
                    cached: false,
                    node: Some(node),
                    ttl_seconds: stored_ttl,
                })
            }
            Err(e) => {
                self.collector.record_error(started.elapsed());
                self.refresh_gauges();
                let raised = self.alerts.check_thresholds(&[self.collector.peek()]);
                warn!(key = %key, error = %e, alerts = raised.len(), "request failed");
                Err(e)
            }
        }
    }

    /// Take a processing slot and a node, then call the processor under
    /// the deadline.
    async fn dispatch(
        &self,
        request: &OptimizedRequest,
        timeout: Duration,
    ) -> CoordinatorResult<(String, ProcessorResponse, Duration)> {
        self.collector.set_queue_depth(self.pool.waiting() as u64 + 1);
        let permit = self.pool.acquire().await;
        self.collector.set_queue_depth(self.pool.waiting() as u64);
        let _permit = permit?;

        let route = RouteRequest {
            requires_capability: request.requires_capability.clone(),
        };
        let lease = self.balancer.acquire(&route)?;
        let node = lease.node_id().to_string();

        let call_started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.processor.process(request, lease.node())).await;
        let inference = call_started.elapsed();

        match outcome {
            Ok(Ok(response)) => {
                lease.finish(true);
                Ok((node, response, inference))
            }
            Ok(Err(e)) => {
                lease.finish(false);
                Err(CoordinatorError::Processing(format!("node {node}: {e:#}")))
            }
            Err(_) => {
                lease.finish(false);
                Err(CoordinatorError::Processing(format!(
                    "node {node}: no response within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Returns the TTL the cache stored, or `None` when the response could
    /// not be cached. It is still returned to the caller either way.
    fn store(&self, key: &str, response: &ProcessorResponse, ttl: u64, tags: Vec<String>) -> Option<u64> {
        let value = match serde_json::to_value(response) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "response not cacheable");
                return None;
            }
        };
        let options = EntryOptions {
            ttl_seconds: Some(ttl),
            tags,
            ..Default::default()
        };
        match self.cache.set_with(key, value, options) {
            Ok(stored) => Some(stored),
            Err(CacheError::CapacityExceeded { size, capacity }) => {
                warn!(key = %key, size, capacity, "response larger than the cache, not stored");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "response not cached");
                None
            }
        }
    }

    /// Utilization gauges come from this layer's own resources: processing
    /// slot occupancy and cache fill.
    fn refresh_gauges(&self) {
        let stats = self.cache.stats();
        let fill = if stats.capacity_bytes == 0 {
            0.0
        } else {
            stats.size_bytes as f64 / stats.capacity_bytes as f64
        };
        self.collector.set_utilization(self.pool.utilization(), fill);
    }

    // ── Optimization pass ───────────────────────────────────────────

    /// Run one tuning pass over every subsystem.
    ///
    /// A subsystem is judged on two stretches of traffic: "before" runs from
    /// the previous subsystem's `optimize` (or the previous pass) up to its
    /// own, "after" covers its stabilization delay. Both are read from the
    /// collector's running totals, so the sampling loop closing windows
    /// meanwhile does not skew them. A stretch without requests is not a
    /// measurement and the subsystem is not scored. Only significant
    /// improvements are recorded. A subsystem that fails is logged and
    /// skipped.
    ///
    /// Passes never overlap; a second caller waits for the running one.
    pub async fn optimize_performance(&self) -> Vec<OptimizationResult> {
        let _pass = self.pass.lock().await;
        let (delay, interval_ms) = {
            let config = self.config.read();
            (
                Duration::from_millis(config.optimizer.stabilization_delay_ms),
                config.optimizer.interval_seconds.saturating_mul(1000),
            )
        };
        let mut recorded = Vec::new();

        for subsystem in SubsystemKind::ALL {
            self.refresh_gauges();
            let started = self.collector.mark();
            let previous = std::mem::replace(&mut *self.baseline.lock(), started);
            let before = self.collector.between(&previous, &started);

            let recommendations = match self.optimize_subsystem(subsystem).await {
                Ok(recommendations) => recommendations,
                Err(e) => {
                    warn!(%subsystem, error = %e, "subsystem optimization failed, skipped");
                    continue;
                }
            };

            tokio::time::sleep(delay).await;
            self.refresh_gauges();
            let after = self.collector.between(&started, &self.collector.mark());

            if before.requests == 0 || after.requests == 0 {
                debug!(
                    %subsystem,
                    before = before.requests,
                    after = after.requests,
                    "no traffic to compare, not scored"
                );
                continue;
            }

            let improvement = improvement_percent(subsystem, &before.snapshot, &after.snapshot);
            if improvement <= subsystem.significance_threshold() {
                debug!(%subsystem, improvement, "improvement below threshold, not recorded");
                continue;
            }

            let now = epoch_millis();
            let result = OptimizationResult {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: now,
                subsystem,
                before: before.snapshot,
                after: after.snapshot,
                improvement_percent: improvement,
                recommendations,
                next_run_at: now.saturating_add(interval_ms),
            };
            info!(%subsystem, improvement, id = %result.id, "optimization recorded");
            self.remember(result.clone());
            recorded.push(result);
        }
        recorded
    }

    /// Whether an optimization pass is running right now.
    pub fn is_optimizing(&self) -> bool {
        self.pass.try_lock().is_err()
    }

    async fn optimize_subsystem(&self, subsystem: SubsystemKind) -> anyhow::Result<Vec<String>> {
        match subsystem {
            SubsystemKind::Cache => Ok(self.cache.optimize().recommendations()),
            SubsystemKind::LoadBalancing => Ok(self.balancer.optimize().recommendations()),
            SubsystemKind::Scaling => {
                for snapshot in self.monitoring.get_metrics(TimeRange::last_millis(SCALING_LOOKBACK_MS)) {
                    self.autoscaler.observe(snapshot);
                }
                let result = self.autoscaler.optimize().await;
                if result.actions.is_empty()
                    && let Some((routine, reason)) = result.failures.first()
                {
                    anyhow::bail!("{routine:?} scaling failed: {reason}");
                }
                Ok(result.recommendations())
            }
            SubsystemKind::Query => Ok(self.queries.optimize().recommendations()),
            SubsystemKind::Resource => Ok(self.pool.optimize().recommendations()),
        }
    }

    fn remember(&self, result: OptimizationResult) {
        let mut history = self.history.lock();
        history.push_back(result);
        if history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Run `optimize_performance` every `interval_seconds` until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.read().optimizer.interval_seconds.max(1));
        info!(interval_secs = interval.as_secs(), "optimization loop started");
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let recorded = tokio::select! {
                        recorded = self.optimize_performance() => recorded,
                        _ = shutdown.changed() => {
                            info!("optimization loop stopped mid-pass");
                            return;
                        }
                    };
                    debug!(recorded = recorded.len(), "optimization pass finished");

                    let wanted = Duration::from_secs(self.config.read().optimizer.interval_seconds.max(1));
                    if wanted != ticker.period() {
                        ticker = tokio::time::interval_at(Instant::now() + wanted, wanted);
                    }
                }
                _ = shutdown.changed() => {
                    info!("optimization loop stopped");
                    return;
                }
            }
        }
    }

    // ── Configuration ───────────────────────────────────────────────

    /// Validate `config` and apply it to every subsystem.
    ///
    /// Nothing changes unless the whole document validates. The node
    /// registry is not touched; nodes are managed through the balancer.
    pub fn update_config(&self, config: GridtuneConfig) -> CoordinatorResult<()> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "configuration update rejected");
            return Err(e.into());
        }

        self.cache.reconfigure(config.cache.clone())?;
        self.balancer.reconfigure(config.balancer.clone())?;
        self.autoscaler.reconfigure(config.scaling.clone())?;
        self.monitoring.reconfigure(config.monitoring.clone())?;
        self.alerts.reconfigure(&config.alerting)?;
        self.pool.reconfigure(config.optimizer.pool.clone());
        self.queries.reconfigure(config.optimizer.query.clone());
        *self.config.write() = config;
        info!("configuration updated");
        Ok(())
    }
}
