//! `/healthz`, `/readyz`, `/metrics` endpoints, in the same shape as
//! the other worker binaries' health servers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::metrics;

#[derive(Clone)]
pub struct ServiceState {
    ready: Arc<AtomicBool>,
}

impl ServiceState {
    pub fn new() -> Self {
        Self { ready: Arc::new(AtomicBool::new(false)) }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }
}

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}


async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "clusterbus-agentd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness_check(State(state): State<ServiceState>) -> (StatusCode, Json<Value>) {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false })))
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
