//! The request-processor boundary.
//!
//! The coordinator knows nothing about what a processor computes. It needs
//! a `confidence` in the answer (for TTL) and passes through the rest as an
//! opaque JSON body.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use tracing::debug;

use gridtune_balancer::LoadBalancerNode;

/// A request entering the optimized path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizedRequest {
    pub payload: serde_json::Value,
    /// Only nodes advertising this capability get the scoring bonus.
    #[serde(default)]
    pub requires_capability: Option<String>,
    /// Tags attached to the cached response, for bulk invalidation.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl OptimizedRequest {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }
}

/// What a processor returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorResponse {
    /// Confidence in the result, `0.0..=1.0`.
    pub confidence: f64,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait RequestProcessor: Send + Sync {
    async fn process(
        &self,
        request: &OptimizedRequest,
        node: &LoadBalancerNode,
    ) -> anyhow::Result<ProcessorResponse>;
}

/// Forwards the payload to `POST http://{node.endpoint}{path}` and reads a
/// JSON answer carrying a numeric `confidence` field.
pub struct HttpProcessor {
    path: String,
}

impl HttpProcessor {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RequestProcessor for HttpProcessor {
    async fn process(
        &self,
        request: &OptimizedRequest,
        node: &LoadBalancerNode,
    ) -> anyhow::Result<ProcessorResponse> {
        let address = node.endpoint.as_str();
        let uri = format!("http://{address}{}", self.path);
        let payload = serde_json::to_vec(&request.payload)?;

        let stream = tokio::net::TcpStream::connect(address).await?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "processor connection closed");
            }
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", address)
            .header("content-type", "application/json")
            .header("user-agent", "gridtune-coordinator/0.1")
            .body(Full::new(Bytes::from(payload)))?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();
        if !status.is_success() {
            anyhow::bail!("node {} answered {status}", node.id);
        }

        let body: serde_json::Value = serde_json::from_slice(&body)?;
        let confidence = body
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("node {} answered without a numeric confidence", node.id))?;
        Ok(ProcessorResponse { confidence, body })
    }
}
