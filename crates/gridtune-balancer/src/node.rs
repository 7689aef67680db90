//! Backend nodes.
//!
//! A `NodeHandle` is the registry's shared, mutable view of one node: an
//! atomic connection counter plus a per-node lock for health and latency
//! stats. `LoadBalancerNode` is the plain, serializable copy handed to
//! scorers, callers, and the API.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use gridtune_core::NodeConfig;

use crate::health::HealthTracker;

/// Smoothing factor for the response-time moving average.
const RESPONSE_TIME_ALPHA: f64 = 0.2;
/// Smoothing factor for the error-rate moving average.
const ERROR_RATE_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Healthy,
    Unhealthy,
    /// Finishing in-flight work; receives no new requests.
    Draining,
}

/// Snapshot of a backend node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerNode {
    pub id: String,
    pub endpoint: String,
    pub weight: u32,
    pub status: NodeStatus,
    pub current_connections: u32,
    pub response_time_ms: f64,
    pub error_rate: f64,
    /// Unix timestamp (milliseconds) of the last health probe.
    pub last_health_check_at: Option<u64>,
    pub region: String,
    pub zone: String,
    pub capacity_units: u32,
    pub capabilities: BTreeSet<String>,
}

impl LoadBalancerNode {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            weight: 100,
            status: NodeStatus::Healthy,
            current_connections: 0,
            response_time_ms: 0.0,
            error_rate: 0.0,
            last_health_check_at: None,
            region: String::new(),
            zone: String::new(),
            capacity_units: 100,
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capacity(mut self, capacity_units: u32) -> Self {
        self.capacity_units = capacity_units;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    /// Connections per capacity unit. A zero-capacity node counts as full.
    pub fn load_ratio(&self) -> f64 {
        if self.capacity_units == 0 {
            return 1.0;
        }
        self.current_connections as f64 / self.capacity_units as f64
    }
}

impl From<&NodeConfig> for LoadBalancerNode {
    fn from(config: &NodeConfig) -> Self {
        Self {
            id: config.id.clone(),
            endpoint: config.endpoint.clone(),
            weight: config.weight,
            status: NodeStatus::Healthy,
            current_connections: 0,
            response_time_ms: 0.0,
            error_rate: 0.0,
            last_health_check_at: None,
            region: config.region.clone(),
            zone: config.zone.clone(),
            capacity_units: config.capacity_units,
            capabilities: config.capabilities.iter().cloned().collect(),
        }
    }
}

/// Mutable per-node stats guarded by the node's own lock.
pub(crate) struct NodeState {
    pub weight: u32,
    pub status: NodeStatus,
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub last_health_check_at: Option<u64>,
    pub tracker: HealthTracker,
}

pub(crate) struct NodeHandle {
    pub id: String,
    pub endpoint: String,
    pub region: String,
    pub zone: String,
    pub capacity_units: u32,
    pub capabilities: BTreeSet<String>,
    connections: AtomicU32,
    pub state: RwLock<NodeState>,
}

impl NodeHandle {
    pub fn new(node: LoadBalancerNode, tracker: HealthTracker) -> Self {
        Self {
            id: node.id,
            endpoint: node.endpoint,
            region: node.region,
            zone: node.zone,
            capacity_units: node.capacity_units,
            capabilities: node.capabilities,
            connections: AtomicU32::new(node.current_connections),
            state: RwLock::new(NodeState {
                weight: node.weight,
                status: node.status,
                response_time_ms: node.response_time_ms,
                error_rate: node.error_rate,
                last_health_check_at: node.last_health_check_at,
                tracker,
            }),
        }
    }

    pub fn snapshot(&self) -> LoadBalancerNode {
        let state = self.state.read();
        LoadBalancerNode {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            weight: state.weight,
            status: state.status,
            current_connections: self.connections(),
            response_time_ms: state.response_time_ms,
            error_rate: state.error_rate,
            last_health_check_at: state.last_health_check_at,
            region: self.region.clone(),
            zone: self.zone.clone(),
            capacity_units: self.capacity_units,
            capabilities: self.capabilities.clone(),
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.state.read().status
    }

    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::Acquire)
    }

    pub fn increment(&self) -> u32 {
        self.connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Saturates at zero so a stray decrement cannot wrap the counter.
    pub fn decrement(&self) -> u32 {
        let prev = self
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Fold one completed call into the moving averages.
    pub fn record_completion(&self, latency_ms: f64, success: bool) {
        let mut state = self.state.write();
        state.response_time_ms = if state.response_time_ms <= 0.0 {
            latency_ms
        } else {
            state.response_time_ms * (1.0 - RESPONSE_TIME_ALPHA) + latency_ms * RESPONSE_TIME_ALPHA
        };
        let sample = if success { 0.0 } else { 1.0 };
        state.error_rate = state.error_rate * (1.0 - ERROR_RATE_ALPHA) + sample * ERROR_RATE_ALPHA;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> NodeHandle {
        NodeHandle::new(
            LoadBalancerNode::new("n1", "127.0.0.1:7001"),
            HealthTracker::new(3),
        )
    }

    #[test]
    fn connection_counter_never_underflows() {
        let node = handle();
        assert_eq!(node.increment(), 1);
        assert_eq!(node.decrement(), 0);
        assert_eq!(node.decrement(), 0);
        assert_eq!(node.connections(), 0);
    }

    #[test]
    fn first_completion_seeds_response_time() {
        let node = handle();
        node.record_completion(40.0, true);
        assert_eq!(node.snapshot().response_time_ms, 40.0);

        node.record_completion(140.0, true);
        // 40 * 0.8 + 140 * 0.2
        assert!((node.snapshot().response_time_ms - 60.0).abs() < 1e-9);
    }

    #[test]
    fn failures_raise_error_rate() {
        let node = handle();
        node.record_completion(10.0, false);
        assert!((node.snapshot().error_rate - 0.1).abs() < 1e-9);
        node.record_completion(10.0, true);
        assert!((node.snapshot().error_rate - 0.09).abs() < 1e-9);
    }

    #[test]
    fn load_ratio_handles_zero_capacity() {
        let node = LoadBalancerNode::new("n", "e").with_capacity(0);
        assert_eq!(node.load_ratio(), 1.0);
    }

    #[test]
    fn from_config_copies_capabilities() {
        let config = NodeConfig {
            id: "gpu-1".to_string(),
            endpoint: "10.0.0.1:7000".to_string(),
            weight: 50,
            region: "eu-west".to_string(),
            zone: "a".to_string(),
            capacity_units: 8,
            capabilities: vec!["gpu".to_string()],
        };
        let node = LoadBalancerNode::from(&config);
        assert_eq!(node.weight, 50);
        assert!(node.capabilities.contains("gpu"));
        assert_eq!(node.status, NodeStatus::Healthy);
    }
}
