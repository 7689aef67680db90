//! gridtune-balancer — adaptive load balancing across backend nodes.
//!
//! Keeps a registry of backend nodes and picks one per request with a
//! configurable algorithm. Only `healthy` nodes are ever considered.
//!
//! # Architecture
//!
//! ```text
//! LoadBalancer
//!   ├── registry: RwLock<Vec<Arc<NodeHandle>>>   (registration order)
//!   │     └── NodeHandle
//!   │           ├── connections: AtomicU32       (per-node, lock-free)
//!   │           └── state: RwLock<NodeState>      (per-node health + stats)
//!   ├── cursor: AtomicUsize (round-robin position)
//!   ├── Box<dyn NodeScorer> (scored algorithm)
//!   └── run_health_checks() → ProbeFn per node
//! ```
//!
//! # Connection accounting
//!
//! [`LoadBalancer::acquire`] returns a [`NodeLease`]. The chosen node's
//! connection count is incremented before the lease is handed out and
//! decremented when the lease drops, whether the call succeeded or not.

pub mod balancer;
pub mod error;
pub mod health;
pub mod node;
pub mod scorer;

pub use balancer::{BalancerOptimization, LoadBalancer, NodeLease, RouteRequest};
pub use error::{BalancerError, BalancerResult};
pub use health::{HealthTracker, ProbeFn, ProbeFuture, ProbeOutcome, http_probe, http_probe_fn};
pub use node::{LoadBalancerNode, NodeStatus};
pub use scorer::{NodeScorer, ScoreWeights, WeightedScorer};
