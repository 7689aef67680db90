//! gridtuned — HTTP surface of the gridtune daemon.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/process` | Serve a request through the optimized path |
//! | GET | `/api/v1/metrics` | Current snapshot, live window, history, cache stats |
//! | GET | `/api/v1/alerts` | Recent alerts |
//! | GET | `/api/v1/optimizations` | Recorded optimization results |
//! | GET | `/api/v1/nodes` | Node registry |
//! | POST | `/api/v1/optimize` | Start an optimization pass (409 while one runs) |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use gridtune_coordinator::Coordinator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
}

/// Build the API router.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let state = ApiState { coordinator };

    let api_routes = Router::new()
        .route("/process", post(handlers::process))
        .route("/metrics", get(handlers::get_metrics))
        .route("/alerts", get(handlers::list_alerts))
        .route("/optimizations", get(handlers::list_optimizations))
        .route("/nodes", get(handlers::list_nodes))
        .route("/optimize", post(handlers::trigger_optimization))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
