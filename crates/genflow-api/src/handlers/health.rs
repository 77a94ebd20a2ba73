//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    /// Provider kinds with a registered adapter
    pub providers: usize,
    /// Jobs currently tracked by the registry
    pub tracked_jobs: usize,
    /// Open websocket connections
    pub connections: usize,
}

/// Readiness check endpoint (readiness probe).
///
/// Everything here is in-process, so readiness amounts to "state was
/// constructed and the adapter set is not empty".
pub async fn ready(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let providers = state.adapters.len();
    Json(ReadinessResponse {
        status: if providers > 0 { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            providers,
            tracked_jobs: state.registry.len().await,
            connections: state.hub.connection_count().await,
        },
    })
}
