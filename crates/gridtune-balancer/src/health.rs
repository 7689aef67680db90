//! Node health probing.
//!
//! A [`HealthTracker`] per node counts consecutive probe results and only
//! flips the node out of rotation after `unhealthy_threshold` failures in a
//! row. A single passing probe brings it back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::node::LoadBalancerNode;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// The endpoint answered 2xx.
    Healthy { latency_ms: f64 },
    /// The endpoint answered, but not 2xx.
    Unhealthy,
    /// The probe could not complete (connection error or timeout).
    Failed,
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

/// Async probe invoked once per node per health-check round.
pub type ProbeFn = Arc<dyn Fn(LoadBalancerNode) -> ProbeFuture + Send + Sync>;

pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeOutcome> + Send>>;

/// Tracks consecutive probe failures for a single node.
#[derive(Debug)]
pub struct HealthTracker {
    passing: bool,
    consecutive_failures: u32,
    unhealthy_threshold: u32,
}

impl HealthTracker {
    /// A tracker that needs `unhealthy_threshold` failures to fail and a
    /// single success to recover. New nodes start out passing.
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self {
            passing: true,
            consecutive_failures: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    /// Record a probe and return whether the node is now passing.
    pub fn record(&mut self, outcome: ProbeOutcome) -> bool {
        if outcome.is_healthy() {
            if !self.passing {
                debug!(failures = self.consecutive_failures, "node recovered");
            }
            self.consecutive_failures = 0;
            self.passing = true;
        } else {
            self.consecutive_failures += 1;
            if self.passing && self.consecutive_failures >= self.unhealthy_threshold {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.unhealthy_threshold,
                    "node failing health checks"
                );
                self.passing = false;
            }
        }
        self.passing
    }

    pub fn is_passing(&self) -> bool {
        self.passing
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn set_unhealthy_threshold(&mut self, threshold: u32) {
        self.unhealthy_threshold = threshold.max(1);
    }
}

/// Build a [`ProbeFn`] that issues `GET {path}` against each node's
/// endpoint (`host:port`).
pub fn http_probe_fn(path: String, timeout: Duration) -> ProbeFn {
    Arc::new(move |node: LoadBalancerNode| -> ProbeFuture {
        let path = path.clone();
        Box::pin(async move { http_probe(&node.endpoint, &path, timeout).await })
    })
}

/// Perform an HTTP health probe against an endpoint.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeOutcome {
    let uri = format!("http://{address}{path}");
    let started = Instant::now();

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeOutcome::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeOutcome::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "gridtune-balancer/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeOutcome::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeOutcome::Healthy {
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            },
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "health probe non-2xx");
                ProbeOutcome::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeOutcome::Failed
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%uri, "health probe timed out");
        ProbeOutcome::Failed
    })
}
