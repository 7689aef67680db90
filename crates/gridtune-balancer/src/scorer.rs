//! Node scoring for the `scored` algorithm.
//!
//! The default [`WeightedScorer`] is a fixed arithmetic blend:
//!
//! ```text
//! score = (1 / response_time_ms) * 100
//!       + (1 - connections / capacity_units) * 50
//!       + (1 - error_rate) * 30
//!       + 20 if the request needs a capability the node advertises
//! ```
//!
//! Higher is better. Implement [`NodeScorer`] to swap the formula without
//! touching selection.

use crate::balancer::RouteRequest;
use crate::node::LoadBalancerNode;

/// Response times below this are treated as this value, so an idle node
/// with no latency data scores finitely.
const MIN_RESPONSE_TIME_MS: f64 = 1.0;

pub trait NodeScorer: Send + Sync {
    fn score(&self, node: &LoadBalancerNode, request: &RouteRequest) -> f64;
}

/// Weights for the components of [`WeightedScorer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreWeights {
    pub response_time: f64,
    pub load: f64,
    pub reliability: f64,
    pub capability_bonus: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            response_time: 100.0,
            load: 50.0,
            reliability: 30.0,
            capability_bonus: 20.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeightedScorer {
    weights: ScoreWeights,
}

impl WeightedScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }
}

impl NodeScorer for WeightedScorer {
    fn score(&self, node: &LoadBalancerNode, request: &RouteRequest) -> f64 {
        let w = &self.weights;
        let response = (1.0 / node.response_time_ms.max(MIN_RESPONSE_TIME_MS)) * w.response_time;
        let load = (1.0 - node.load_ratio()) * w.load;
        let reliability = (1.0 - node.error_rate) * w.reliability;
        let bonus = match &request.requires_capability {
            Some(cap) if node.capabilities.contains(cap) => w.capability_bonus,
            _ => 0.0,
        };
        response + load + reliability + bonus
    }
}
