/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Health Check Module
//!
//! HTTP endpoints used by Kubernetes probes and operators:
//!
//! - `GET /healthz`: liveness (200 OK while the process runs)
//! - `GET /readyz`: readiness with API server connectivity validation
//! - `GET /health`: the supervisor's health snapshot as JSON, with
//!   uptime, version, and timestamp
//! - `GET /metrics`: Prometheus text exposition

use crate::metrics;
use crate::supervisor::Supervisor;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use heimdall_models::models::health::HealthSnapshot;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::error;

/// Shared state for health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub supervisor: Arc<Supervisor>,
    pub start_time: SystemTime,
}

/// Health status response structure
#[derive(Serialize)]
struct HealthStatus {
    status: String,
    #[serde(flatten)]
    snapshot: HealthSnapshot,
    uptime_seconds: u64,
    version: String,
    timestamp: String,
}

/// Configures and returns the health check router
pub fn configure_health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Simple liveness check endpoint
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check endpoint
///
/// Validates Kubernetes API connectivity. Returns 200 OK when the API
/// server is reachable, 503 otherwise.
async fn readyz(State(state): State<HealthState>) -> impl IntoResponse {
    match state.supervisor.kube().ping().await {
        Ok(()) => (StatusCode::OK, "Ready"),
        Err(e) => {
            error!("Kubernetes API connectivity check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Kubernetes API unavailable",
            )
        }
    }
}

/// Detailed health check endpoint
///
/// Serves the supervisor's read-only snapshot: active namespaces,
/// aggregated connection state, cache statistics, and counters.
/// Returns 200 when the connection state is healthy, 503 otherwise.
async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let snapshot = state.supervisor.health_snapshot();

    let uptime_seconds = SystemTime::now()
        .duration_since(state.start_time)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let timestamp = chrono::Utc::now().to_rfc3339();

    let healthy = snapshot.connection.healthy;
    let response = HealthStatus {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        snapshot,
        uptime_seconds,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

/// Prometheus metrics endpoint
///
/// Returns all agent metrics in text exposition format.
async fn metrics_handler() -> impl IntoResponse {
    let metrics_data = metrics::encode_metrics();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics_data,
    )
}
