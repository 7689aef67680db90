//! REST API handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use gridtune_balancer::BalancerError;
use gridtune_cache::CacheStats;
use gridtune_coordinator::{CoordinatorError, OptimizedRequest};
use gridtune_core::{MetricSnapshot, TimeRange, epoch_millis};

use crate::ApiState;

/// Default window for `GET /metrics` history: the last hour.
const DEFAULT_METRICS_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::Processing(_) => StatusCode::BAD_GATEWAY,
        CoordinatorError::Balancer(BalancerError::NoHealthyNodes) => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Requests ───────────────────────────────────────────────────

/// POST /api/v1/process
pub async fn process(State(state): State<ApiState>, Json(request): Json<OptimizedRequest>) -> impl IntoResponse {
    match state.coordinator.process_optimized(&request).await {
        Ok(response) => ApiResponse::ok(response).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

// ── Observability ──────────────────────────────────────────────

/// Optional range for `GET /metrics`, Unix milliseconds.
#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    pub from: Option<u64>,
    pub to: Option<u64>,
}

#[derive(Serialize)]
struct MetricsView {
    /// Newest recorded snapshot.
    current: MetricSnapshot,
    /// The collector's open window, not yet recorded.
    live: MetricSnapshot,
    history: Vec<MetricSnapshot>,
    cache: CacheStats,
}

/// GET /api/v1/metrics
pub async fn get_metrics(State(state): State<ApiState>, Query(query): Query<MetricsQuery>) -> impl IntoResponse {
    let to = query.to.unwrap_or_else(epoch_millis);
    let from = query.from.unwrap_or_else(|| to.saturating_sub(DEFAULT_METRICS_WINDOW_MS));
    if from > to {
        return error_response("`from` is after `to`", StatusCode::BAD_REQUEST).into_response();
    }

    let coordinator = &state.coordinator;
    ApiResponse::ok(MetricsView {
        current: coordinator.monitoring().get_current_metrics(),
        live: coordinator.collector().peek(),
        history: coordinator.monitoring().get_metrics(TimeRange::new(from, to)),
        cache: coordinator.cache().stats(),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default = "default_alert_limit")]
    pub limit: usize,
}

fn default_alert_limit() -> usize {
    100
}

/// GET /api/v1/alerts
pub async fn list_alerts(State(state): State<ApiState>, Query(query): Query<AlertsQuery>) -> impl IntoResponse {
    ApiResponse::ok(state.coordinator.alerts().recent_alerts(query.limit)).into_response()
}

/// GET /api/v1/optimizations
pub async fn list_optimizations(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.coordinator.history()).into_response()
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.coordinator.balancer().nodes()).into_response()
}

// ── Optimization ───────────────────────────────────────────────

/// POST /api/v1/optimize
///
/// A pass waits out one stabilization delay per subsystem, so it runs in
/// the background; results appear under `/optimizations`. Refused with 409
/// while another pass, manual or periodic, is running.
pub async fn trigger_optimization(State(state): State<ApiState>) -> impl IntoResponse {
    if state.coordinator.is_optimizing() {
        return error_response("an optimization pass is already running", StatusCode::CONFLICT).into_response();
    }
    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move {
        let recorded = coordinator.optimize_performance().await;
        info!(recorded = recorded.len(), "manual optimization pass finished");
    });
    (StatusCode::ACCEPTED, ApiResponse::ok("optimization started")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridtune_balancer::{LoadBalancerNode, NodeStatus};
    use gridtune_coordinator::{Coordinator, ProcessorResponse, RequestProcessor};
    use gridtune_core::{GridtuneConfig, NodeConfig};
    use serde_json::json;

    struct Fixed {
        fail: bool,
    }

    #[async_trait]
    impl RequestProcessor for Fixed {
        async fn process(&self, _: &OptimizedRequest, _: &LoadBalancerNode) -> anyhow::Result<ProcessorResponse> {
            if self.fail {
                anyhow::bail!("backend exploded");
            }
            Ok(ProcessorResponse {
                confidence: 0.9,
                body: json!({ "label": "positive" }),
            })
        }
    }

    fn test_state(fail: bool) -> ApiState {
        let mut config = GridtuneConfig::default();
        config.nodes = vec![NodeConfig {
            id: "n1".to_string(),
            endpoint: "127.0.0.1:9".to_string(),
            weight: 100,
            region: String::new(),
            zone: String::new(),
            capacity_units: 10,
            capabilities: Vec::new(),
        }];
        let coordinator = Coordinator::new(config, Arc::new(Fixed { fail })).unwrap();
        ApiState {
            coordinator: Arc::new(coordinator),
        }
    }

    #[tokio::test]
    async fn process_ok() {
        let state = test_state(false);
        let resp = process(State(state), Json(OptimizedRequest::new(json!({"text": "hi"})))).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn processor_failure_is_bad_gateway() {
        let state = test_state(true);
        let resp = process(State(state), Json(OptimizedRequest::new(json!({"text": "hi"})))).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn no_healthy_nodes_is_service_unavailable() {
        let state = test_state(false);
        state
            .coordinator
            .balancer()
            .set_status("n1", NodeStatus::Unhealthy)
            .unwrap();
        let resp = process(State(state), Json(OptimizedRequest::new(json!({"text": "hi"})))).await;
        assert_eq!(resp.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn inverted_metrics_range_is_rejected() {
        let state = test_state(false);
        let query = MetricsQuery {
            from: Some(10),
            to: Some(5),
        };
        let resp = get_metrics(State(state), Query(query)).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_nodes_ok() {
        let resp = list_nodes(State(test_state(false))).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn trigger_is_accepted() {
        let resp = trigger_optimization(State(test_state(false))).await;
        assert_eq!(resp.into_response().status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn trigger_during_a_pass_conflicts() {
        let state = test_state(false);
        let resp = trigger_optimization(State(state.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::ACCEPTED);

        // Let the spawned pass start and park in its stabilization delay.
        tokio::task::yield_now().await;
        assert!(state.coordinator.is_optimizing());

        let resp = trigger_optimization(State(state)).await;
        assert_eq!(resp.into_response().status(), StatusCode::CONFLICT);
    }
}
