//! Node registry and selection.
//!
//! The registry is a `Vec` so selection can honour registration order for
//! round-robin and for score ties. Node stats live behind each node's own
//! lock; the registry lock is only held long enough to clone the `Arc`s.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use gridtune_core::{BalancerConfig, BalancingAlgorithm, FailoverStrategy, epoch_millis};

use crate::error::{BalancerError, BalancerResult};
use crate::health::{HealthTracker, ProbeFn, ProbeOutcome};
use crate::node::{LoadBalancerNode, NodeHandle, NodeStatus};
use crate::scorer::{NodeScorer, WeightedScorer};

/// Response time at or below which a node gets the full response-time
/// factor when weights are recomputed.
const REFERENCE_RESPONSE_TIME_MS: f64 = 100.0;

/// Routing hints carried by a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRequest {
    pub requires_capability: Option<String>,
}

impl RouteRequest {
    pub fn requiring(capability: impl Into<String>) -> Self {
        Self {
            requires_capability: Some(capability.into()),
        }
    }
}

/// What one `optimize()` pass changed.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancerOptimization {
    /// `(node id, new weight)` in registry order.
    pub weights: Vec<(String, u32)>,
    /// Mean response time across healthy nodes that have reported one.
    pub average_response_time_ms: Option<f64>,
    pub algorithm_switch: Option<(BalancingAlgorithm, BalancingAlgorithm)>,
}

impl BalancerOptimization {
    pub fn recommendations(&self) -> Vec<String> {
        let mut recs = Vec::new();
        if let Some((from, to)) = self.algorithm_switch {
            recs.push(format!("switched balancing algorithm from {from:?} to {to:?}"));
        }
        if !self.weights.is_empty() {
            recs.push(format!("recomputed weights for {} nodes", self.weights.len()));
        }
        recs
    }
}

/// An in-flight call against a node.
///
/// The node's connection count was incremented when the lease was handed
/// out and is decremented when the lease drops.
pub struct NodeLease {
    handle: Arc<NodeHandle>,
    node: LoadBalancerNode,
    started: Instant,
}

impl NodeLease {
    /// The node as it was when selected.
    pub fn node(&self) -> &LoadBalancerNode {
        &self.node
    }

    pub fn node_id(&self) -> &str {
        &self.handle.id
    }

    /// Fold the call's latency and outcome into the node's stats and
    /// release the connection.
    pub fn finish(self, success: bool) -> f64 {
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.handle.record_completion(latency_ms, success);
        latency_ms
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        let remaining = self.handle.decrement();
        if remaining == 0 {
            let mut state = self.handle.state.write();
            if state.status == NodeStatus::Draining {
                state.status = NodeStatus::Unhealthy;
                info!(node = %self.handle.id, "drained node is idle, marked unhealthy");
            }
        }
    }
}

pub struct LoadBalancer {
    registry: RwLock<Vec<Arc<NodeHandle>>>,
    config: RwLock<BalancerConfig>,
    algorithm: RwLock<BalancingAlgorithm>,
    /// Round-robin position, advanced on every round-robin selection.
    cursor: AtomicUsize,
    scorer: Box<dyn NodeScorer>,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self::with_scorer(config, Box::new(WeightedScorer::default()))
    }

    /// Use a custom scorer for the `scored` algorithm.
    pub fn with_scorer(config: BalancerConfig, scorer: Box<dyn NodeScorer>) -> Self {
        Self {
            registry: RwLock::new(Vec::new()),
            algorithm: RwLock::new(config.algorithm),
            config: RwLock::new(config),
            cursor: AtomicUsize::new(0),
            scorer,
        }
    }

    pub fn register(&self, node: LoadBalancerNode) -> BalancerResult<()> {
        let threshold = self.config.read().unhealthy_threshold;
        let mut registry = self.registry.write();
        if registry.iter().any(|h| h.id == node.id) {
            return Err(BalancerError::DuplicateNode(node.id));
        }
        info!(node = %node.id, endpoint = %node.endpoint, "node registered");
        registry.push(Arc::new(NodeHandle::new(node, HealthTracker::new(threshold))));
        Ok(())
    }

    pub fn deregister(&self, id: &str) -> BalancerResult<LoadBalancerNode> {
        let mut registry = self.registry.write();
        let pos = registry
            .iter()
            .position(|h| h.id == id)
            .ok_or_else(|| BalancerError::UnknownNode(id.to_string()))?;
        let handle = registry.remove(pos);
        info!(node = %id, in_flight = handle.connections(), "node deregistered");
        Ok(handle.snapshot())
    }

    /// Snapshot of every node, in registration order.
    pub fn nodes(&self) -> Vec<LoadBalancerNode> {
        self.registry.read().iter().map(|h| h.snapshot()).collect()
    }

    pub fn node(&self, id: &str) -> Option<LoadBalancerNode> {
        self.find(id).map(|h| h.snapshot())
    }

    pub fn healthy_count(&self) -> usize {
        self.registry
            .read()
            .iter()
            .filter(|h| h.status() == NodeStatus::Healthy)
            .count()
    }

    pub fn algorithm(&self) -> BalancingAlgorithm {
        *self.algorithm.read()
    }

    /// Pick a healthy node for `request` without touching its counters.
    pub fn select_node(&self, request: &RouteRequest) -> BalancerResult<LoadBalancerNode> {
        self.select_handle(request).map(|h| h.snapshot())
    }

    /// Pick a node and open a lease on it.
    pub fn acquire(&self, request: &RouteRequest) -> BalancerResult<NodeLease> {
        let handle = self.select_handle(request)?;
        let connections = handle.increment();
        debug!(node = %handle.id, connections, "node leased");
        Ok(NodeLease {
            node: handle.snapshot(),
            handle,
            started: Instant::now(),
        })
    }

    fn select_handle(&self, request: &RouteRequest) -> BalancerResult<Arc<NodeHandle>> {
        let healthy: Vec<Arc<NodeHandle>> = self
            .registry
            .read()
            .iter()
            .filter(|h| h.status() == NodeStatus::Healthy)
            .cloned()
            .collect();
        if healthy.is_empty() {
            return Err(BalancerError::NoHealthyNodes);
        }

        let algorithm = self.algorithm();
        let chosen = match algorithm {
            BalancingAlgorithm::RoundRobin => {
                // Wraps over the healthy list as it is right now.
                &healthy[self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len()]
            }
            BalancingAlgorithm::LeastConnections => first_min_by(&healthy, |h| h.connections() as f64),
            BalancingAlgorithm::LeastResponseTime => {
                first_min_by(&healthy, |h| h.state.read().response_time_ms)
            }
            BalancingAlgorithm::ResourceBased => first_min_by(&healthy, |h| h.snapshot().load_ratio()),
            BalancingAlgorithm::Scored => first_min_by(&healthy, |h| {
                -self.scorer.score(&h.snapshot(), request)
            }),
        };
        debug!(node = %chosen.id, ?algorithm, "node selected");
        Ok(Arc::clone(chosen))
    }

    /// Force a node's status.
    pub fn set_status(&self, id: &str, status: NodeStatus) -> BalancerResult<()> {
        let handle = self
            .find(id)
            .ok_or_else(|| BalancerError::UnknownNode(id.to_string()))?;
        let mut state = handle.state.write();
        if state.status != status {
            info!(node = %id, from = ?state.status, to = ?status, "node status changed");
            state.status = status;
        }
        Ok(())
    }

    /// Apply a health-probe result and return the node's resulting status.
    ///
    /// A passing probe's latency stands in for the node's response time
    /// until it has served traffic.
    pub fn record_probe(&self, id: &str, outcome: ProbeOutcome) -> BalancerResult<NodeStatus> {
        let handle = self
            .find(id)
            .ok_or_else(|| BalancerError::UnknownNode(id.to_string()))?;
        let failover = self.config.read().failover_strategy;

        let mut state = handle.state.write();
        state.last_health_check_at = Some(epoch_millis());
        if let ProbeOutcome::Healthy { latency_ms } = outcome
            && state.response_time_ms <= 0.0
        {
            state.response_time_ms = latency_ms;
        }
        let passing = state.tracker.record(outcome);
        let next = match (passing, state.status) {
            (true, _) => NodeStatus::Healthy,
            (false, NodeStatus::Healthy) => match failover {
                FailoverStrategy::Immediate => NodeStatus::Unhealthy,
                FailoverStrategy::Drain if handle.connections() == 0 => NodeStatus::Unhealthy,
                FailoverStrategy::Drain => NodeStatus::Draining,
            },
            (false, current) => current,
        };
        if next != state.status {
            match next {
                NodeStatus::Healthy => info!(node = %id, "node back in rotation"),
                _ => warn!(
                    node = %id,
                    status = ?next,
                    failures = state.tracker.consecutive_failures(),
                    "node taken out of rotation"
                ),
            }
            state.status = next;
        }
        Ok(next)
    }

    /// Recompute node weights and, if the fleet is slow, switch to
    /// least-response-time.
    pub fn optimize(&self) -> BalancerOptimization {
        let handles: Vec<Arc<NodeHandle>> = self.registry.read().clone();
        let threshold = self.config.read().response_time_threshold_ms;

        let mut weights = Vec::with_capacity(handles.len());
        let mut rt_sum = 0.0;
        let mut rt_count = 0usize;
        for handle in &handles {
            let node = handle.snapshot();
            let weight = blended_weight(&node);
            handle.state.write().weight = weight;
            weights.push((node.id.clone(), weight));

            if node.status == NodeStatus::Healthy && node.response_time_ms > 0.0 {
                rt_sum += node.response_time_ms;
                rt_count += 1;
            }
        }

        let average_response_time_ms = (rt_count > 0).then(|| rt_sum / rt_count as f64);
        let mut algorithm_switch = None;
        if let Some(avg) = average_response_time_ms
            && avg > threshold
        {
            let mut algorithm = self.algorithm.write();
            if *algorithm != BalancingAlgorithm::LeastResponseTime {
                algorithm_switch = Some((*algorithm, BalancingAlgorithm::LeastResponseTime));
                info!(
                    average_ms = avg,
                    threshold_ms = threshold,
                    from = ?*algorithm,
                    "fleet slow, switching to least-response-time"
                );
                *algorithm = BalancingAlgorithm::LeastResponseTime;
            }
        }

        debug!(nodes = weights.len(), ?average_response_time_ms, "load balancer optimized");
        BalancerOptimization {
            weights,
            average_response_time_ms,
            algorithm_switch,
        }
    }

    /// Validate and apply a new configuration. Resets the active
    /// algorithm to the configured one.
    pub fn reconfigure(&self, config: BalancerConfig) -> BalancerResult<()> {
        config.validate()?;
        for handle in self.registry.read().iter() {
            handle
                .state
                .write()
                .tracker
                .set_unhealthy_threshold(config.unhealthy_threshold);
        }
        *self.algorithm.write() = config.algorithm;
        info!(algorithm = ?config.algorithm, "load balancer reconfigured");
        *self.config.write() = config;
        Ok(())
    }

    pub fn config(&self) -> BalancerConfig {
        self.config.read().clone()
    }

    /// Probe every registered node once, concurrently. Unhealthy nodes are
    /// probed too so they can recover.
    pub async fn probe_all(&self, probe: &ProbeFn) -> usize {
        let mut probes = JoinSet::new();
        for node in self.nodes() {
            let id = node.id.clone();
            let fut = probe(node);
            probes.spawn(async move { (id, fut.await) });
        }

        let mut probed = 0;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Err(e) = self.record_probe(&id, outcome) {
                        debug!(node = %id, error = %e, "probe result dropped");
                    } else {
                        probed += 1;
                    }
                }
                Err(e) => warn!(error = %e, "health probe task failed"),
            }
        }
        probed
    }

    /// Probe all nodes every `health_check_interval_seconds` until
    /// `shutdown` flips.
    pub async fn run_health_checks(self: Arc<Self>, probe: ProbeFn, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.read().health_check_interval_seconds);
        let mut ticker = tokio::time::interval(period);
        info!(interval_secs = period.as_secs(), "health checks started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let probed = self.probe_all(&probe).await;
                    debug!(probed, healthy = self.healthy_count(), "health check round complete");
                }
                _ = shutdown.changed() => {
                    info!("health checks shutting down");
                    break;
                }
            }
        }
    }

    fn find(&self, id: &str) -> Option<Arc<NodeHandle>> {
        self.registry.read().iter().find(|h| h.id == id).cloned()
    }
}

/// First element (in registry order) with the smallest key.
fn first_min_by(handles: &[Arc<NodeHandle>], key: impl Fn(&NodeHandle) -> f64) -> &Arc<NodeHandle> {
    let mut best = &handles[0];
    let mut best_key = key(best.as_ref());
    for handle in &handles[1..] {
        let k = key(handle.as_ref());
        if k < best_key {
            best = handle;
            best_key = k;
        }
    }
    best
}

/// Average of response-time, reliability and headroom factors, scaled to
/// `1..=100`.
fn blended_weight(node: &LoadBalancerNode) -> u32 {
    let rt_factor = if node.response_time_ms <= 0.0 {
        1.0
    } else {
        (REFERENCE_RESPONSE_TIME_MS / node.response_time_ms).min(1.0)
    };
    let error_factor = (1.0 - node.error_rate).clamp(0.0, 1.0);
    let load_factor = (1.0 - node.load_ratio()).clamp(0.0, 1.0);
    let blended = (rt_factor + error_factor + load_factor) / 3.0;
    ((blended * 100.0).round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProbeFuture;

    fn balancer(algorithm: BalancingAlgorithm, ids: &[&str]) -> LoadBalancer {
        let lb = LoadBalancer::new(BalancerConfig {
            algorithm,
            ..Default::default()
        });
        for (i, id) in ids.iter().enumerate() {
            lb.register(LoadBalancerNode::new(*id, format!("127.0.0.1:{}", 7000 + i)))
                .unwrap();
        }
        lb
    }

    fn pick(lb: &LoadBalancer) -> String {
        lb.select_node(&RouteRequest::default()).unwrap().id
    }

    #[test]
    fn round_robin_two_nodes() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1", "n2"]);
        assert_eq!(pick(&lb), "n1");
        assert_eq!(pick(&lb), "n2");
        assert_eq!(pick(&lb), "n1");
    }

    #[test]
    fn round_robin_visits_each_node_once_in_order() {
        let ids = ["a", "b", "c", "d", "e"];
        let lb = balancer(BalancingAlgorithm::RoundRobin, &ids);
        let picks: Vec<String> = (0..ids.len()).map(|_| pick(&lb)).collect();
        assert_eq!(picks, ids);
    }

    #[test]
    fn round_robin_cycles_over_the_healthy_list() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1", "n2", "n3"]);
        lb.set_status("n2", NodeStatus::Unhealthy).unwrap();
        let picks: Vec<String> = (0..4).map(|_| pick(&lb)).collect();
        assert_eq!(picks, ["n1", "n3", "n1", "n3"]);

        lb.set_status("n2", NodeStatus::Healthy).unwrap();
        // Four selections so far: the cursor continues at index 4 % 3.
        assert_eq!(pick(&lb), "n2");
    }

    #[test]
    fn concurrent_round_robin_spreads_evenly() {
        let lb = Arc::new(balancer(BalancingAlgorithm::RoundRobin, &["n1", "n2", "n3"]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = Arc::clone(&lb);
                std::thread::spawn(move || (0..30).map(|_| pick(&lb)).collect::<Vec<_>>())
            })
            .collect();
        let mut counts = std::collections::HashMap::new();
        for h in handles {
            for id in h.join().unwrap() {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        assert_eq!(counts.values().copied().collect::<Vec<_>>(), vec![40, 40, 40]);
    }

    #[test]
    fn only_healthy_node_is_selected() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1", "n2", "n3"]);
        lb.set_status("n1", NodeStatus::Unhealthy).unwrap();
        lb.set_status("n3", NodeStatus::Draining).unwrap();
        for _ in 0..5 {
            assert_eq!(pick(&lb), "n2");
        }
    }

    #[test]
    fn all_unhealthy_is_an_error() {
        let lb = balancer(BalancingAlgorithm::Scored, &["n1", "n2"]);
        lb.set_status("n1", NodeStatus::Unhealthy).unwrap();
        lb.set_status("n2", NodeStatus::Unhealthy).unwrap();
        assert!(matches!(
            lb.select_node(&RouteRequest::default()),
            Err(BalancerError::NoHealthyNodes)
        ));
    }

    #[test]
    fn empty_registry_is_an_error() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &[]);
        assert!(matches!(lb.acquire(&RouteRequest::default()), Err(BalancerError::NoHealthyNodes)));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1"]);
        let err = lb.register(LoadBalancerNode::new("n1", "other")).unwrap_err();
        assert!(matches!(err, BalancerError::DuplicateNode(id) if id == "n1"));
    }

    #[test]
    fn deregister_removes_node() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1", "n2"]);
        lb.deregister("n1").unwrap();
        assert_eq!(pick(&lb), "n2");
        assert!(matches!(lb.deregister("n1"), Err(BalancerError::UnknownNode(_))));
    }

    #[test]
    fn least_connections_follows_leases() {
        let lb = balancer(BalancingAlgorithm::LeastConnections, &["n1", "n2"]);
        let first = lb.acquire(&RouteRequest::default()).unwrap();
        assert_eq!(first.node_id(), "n1");
        let second = lb.acquire(&RouteRequest::default()).unwrap();
        assert_eq!(second.node_id(), "n2");
        drop(first);
        assert_eq!(pick(&lb), "n1");
        drop(second);
    }

    #[test]
    fn least_response_time_prefers_fastest() {
        let lb = LoadBalancer::new(BalancerConfig {
            algorithm: BalancingAlgorithm::LeastResponseTime,
            ..Default::default()
        });
        lb.register(LoadBalancerNode::new("slow", "a").with_response_time(80.0)).unwrap();
        lb.register(LoadBalancerNode::new("fast", "b").with_response_time(20.0)).unwrap();
        assert_eq!(pick(&lb), "fast");
    }

    #[test]
    fn resource_based_uses_capacity() {
        let lb = LoadBalancer::new(BalancerConfig {
            algorithm: BalancingAlgorithm::ResourceBased,
            ..Default::default()
        });
        lb.register(LoadBalancerNode::new("small", "a").with_capacity(2)).unwrap();
        lb.register(LoadBalancerNode::new("big", "b").with_capacity(20)).unwrap();

        let _a = lb.acquire(&RouteRequest::default()).unwrap(); // small: 0/2 ties 0/20, first wins
        // small now 1/2 = 0.5, big 0/20
        let b = lb.acquire(&RouteRequest::default()).unwrap();
        assert_eq!(b.node_id(), "big");
        // small 0.5, big 1/20 = 0.05
        assert_eq!(pick(&lb), "big");
    }

    #[test]
    fn scored_ties_break_by_registration_order() {
        let lb = balancer(BalancingAlgorithm::Scored, &["n1", "n2", "n3"]);
        for _ in 0..3 {
            assert_eq!(pick(&lb), "n1");
        }
    }

    #[test]
    fn scored_prefers_capability_match() {
        let lb = LoadBalancer::new(BalancerConfig::default());
        lb.register(LoadBalancerNode::new("cpu", "a").with_response_time(10.0)).unwrap();
        lb.register(
            LoadBalancerNode::new("gpu", "b")
                .with_response_time(10.0)
                .with_capability("gpu"),
        )
        .unwrap();
        assert_eq!(pick(&lb), "cpu");
        assert_eq!(lb.select_node(&RouteRequest::requiring("gpu")).unwrap().id, "gpu");
    }

    struct ByName;

    impl NodeScorer for ByName {
        fn score(&self, node: &LoadBalancerNode, _request: &RouteRequest) -> f64 {
            if node.id == "preferred" { 1.0 } else { 0.0 }
        }
    }

    #[test]
    fn custom_scorer_is_used() {
        let lb = LoadBalancer::with_scorer(BalancerConfig::default(), Box::new(ByName));
        lb.register(LoadBalancerNode::new("other", "a")).unwrap();
        lb.register(LoadBalancerNode::new("preferred", "b")).unwrap();
        assert_eq!(pick(&lb), "preferred");
    }

    #[test]
    fn lease_releases_connection_on_drop_and_finish() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1"]);
        let lease = lb.acquire(&RouteRequest::default()).unwrap();
        assert_eq!(lb.node("n1").unwrap().current_connections, 1);
        lease.finish(true);
        assert_eq!(lb.node("n1").unwrap().current_connections, 0);

        let lease = lb.acquire(&RouteRequest::default()).unwrap();
        drop(lease);
        assert_eq!(lb.node("n1").unwrap().current_connections, 0);
    }

    #[test]
    fn failed_call_raises_error_rate() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1"]);
        lb.acquire(&RouteRequest::default()).unwrap().finish(false);
        assert!(lb.node("n1").unwrap().error_rate > 0.0);
    }

    #[test]
    fn concurrent_leases_do_not_drift() {
        use std::thread;

        let lb = Arc::new(balancer(BalancingAlgorithm::LeastConnections, &["n1", "n2", "n3"]));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let lb = Arc::clone(&lb);
                thread::spawn(move || {
                    for i in 0..200 {
                        let lease = lb.acquire(&RouteRequest::default()).unwrap();
                        lease.finish(i % 7 != 0);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert!(lb.nodes().iter().all(|n| n.current_connections == 0));
    }

    #[test]
    fn immediate_failover_after_threshold() {
        let lb = LoadBalancer::new(BalancerConfig {
            unhealthy_threshold: 2,
            ..Default::default()
        });
        lb.register(LoadBalancerNode::new("n1", "a")).unwrap();

        assert_eq!(lb.record_probe("n1", ProbeOutcome::Failed).unwrap(), NodeStatus::Healthy);
        assert_eq!(lb.record_probe("n1", ProbeOutcome::Failed).unwrap(), NodeStatus::Unhealthy);
        assert!(lb.node("n1").unwrap().last_health_check_at.is_some());

        let status = lb
            .record_probe("n1", ProbeOutcome::Healthy { latency_ms: 2.0 })
            .unwrap();
        assert_eq!(status, NodeStatus::Healthy);
    }

    #[test]
    fn health_check_latency_stands_in_until_traffic() {
        let lb = LoadBalancer::new(BalancerConfig {
            algorithm: BalancingAlgorithm::LeastResponseTime,
            ..Default::default()
        });
        lb.register(LoadBalancerNode::new("n1", "a")).unwrap();
        lb.register(LoadBalancerNode::new("n2", "b").with_response_time(30.0)).unwrap();

        lb.record_probe("n1", ProbeOutcome::Healthy { latency_ms: 80.0 }).unwrap();
        lb.record_probe("n2", ProbeOutcome::Healthy { latency_ms: 5.0 }).unwrap();

        assert_eq!(lb.node("n1").unwrap().response_time_ms, 80.0);
        // n2 already has traffic data; the probe does not replace it.
        assert_eq!(lb.node("n2").unwrap().response_time_ms, 30.0);
        assert_eq!(pick(&lb), "n2");
    }

    #[test]
    fn drain_failover_waits_for_idle() {
        let lb = LoadBalancer::new(BalancerConfig {
            unhealthy_threshold: 1,
            failover_strategy: FailoverStrategy::Drain,
            ..Default::default()
        });
        lb.register(LoadBalancerNode::new("n1", "a")).unwrap();
        lb.register(LoadBalancerNode::new("n2", "b")).unwrap();

        let lease = lb.acquire(&RouteRequest::default()).unwrap();
        assert_eq!(lease.node_id(), "n1");
        assert_eq!(lb.record_probe("n1", ProbeOutcome::Unhealthy).unwrap(), NodeStatus::Draining);
        assert_eq!(pick(&lb), "n2");

        drop(lease);
        assert_eq!(lb.node("n1").unwrap().status, NodeStatus::Unhealthy);
    }

    #[test]
    fn optimize_recomputes_weights() {
        let lb = LoadBalancer::new(BalancerConfig::default());
        lb.register(LoadBalancerNode::new("fast", "a").with_response_time(50.0)).unwrap();
        lb.register(LoadBalancerNode::new("slow", "b").with_response_time(400.0)).unwrap();

        let result = lb.optimize();
        // fast: (1 + 1 + 1) / 3; slow: (0.25 + 1 + 1) / 3
        assert_eq!(result.weights, vec![("fast".to_string(), 100), ("slow".to_string(), 75)]);
        assert_eq!(lb.node("slow").unwrap().weight, 75);
        assert!(result.algorithm_switch.is_none());
    }

    #[test]
    fn optimize_switches_when_fleet_is_slow() {
        let lb = LoadBalancer::new(BalancerConfig {
            response_time_threshold_ms: 100.0,
            ..Default::default()
        });
        lb.register(LoadBalancerNode::new("n1", "a").with_response_time(150.0)).unwrap();
        lb.register(LoadBalancerNode::new("n2", "b").with_response_time(90.0)).unwrap();

        let result = lb.optimize();
        assert_eq!(
            result.algorithm_switch,
            Some((BalancingAlgorithm::Scored, BalancingAlgorithm::LeastResponseTime))
        );
        assert_eq!(lb.algorithm(), BalancingAlgorithm::LeastResponseTime);
        assert!(lb.optimize().algorithm_switch.is_none());
    }

    #[test]
    fn reconfigure_rejects_invalid_and_keeps_previous() {
        let lb = balancer(BalancingAlgorithm::RoundRobin, &["n1"]);
        let bad = BalancerConfig {
            unhealthy_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(lb.reconfigure(bad), Err(BalancerError::Config(_))));
        assert_eq!(lb.algorithm(), BalancingAlgorithm::RoundRobin);

        lb.reconfigure(BalancerConfig {
            algorithm: BalancingAlgorithm::LeastConnections,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(lb.algorithm(), BalancingAlgorithm::LeastConnections);
    }

    #[tokio::test(start_paused = true)]
    async fn health_loop_marks_failing_nodes() {
        let lb = Arc::new(LoadBalancer::new(BalancerConfig {
            unhealthy_threshold: 1,
            ..Default::default()
        }));
        lb.register(LoadBalancerNode::new("up", "a")).unwrap();
        lb.register(LoadBalancerNode::new("down", "b")).unwrap();

        let probe: ProbeFn = Arc::new(|node: LoadBalancerNode| -> ProbeFuture {
            Box::pin(async move {
                if node.id == "up" {
                    ProbeOutcome::Healthy { latency_ms: 1.0 }
                } else {
                    ProbeOutcome::Failed
                }
            })
        });

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&lb).run_health_checks(probe, rx));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(lb.node("down").unwrap().status, NodeStatus::Unhealthy);
        assert_eq!(lb.node("up").unwrap().status, NodeStatus::Healthy);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
