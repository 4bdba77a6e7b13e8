//! Health and diagnostics endpoints.
//!
//! # Endpoints
//!
//! - `GET /v1/healthcheck` - Liveness with environment and version
//! - `GET /debug/vars` - Request counters collected by the instrumentation layer

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use crate::middleware::MetricsSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "available",
///   "system_info": { "environment": "development", "version": "0.1.0", "uptime_seconds": 42 }
/// }
/// ```
#[instrument(skip(state))]
pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.config.env.clone(),
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: state.uptime_seconds(),
        },
    })
}

#[derive(Debug, Serialize)]
pub struct DebugVars {
    pub version: &'static str,
    /// Unix seconds at the time of the snapshot.
    pub timestamp: i64,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

/// Read-only snapshot of the request counters.
///
/// # Response Body
///
/// ```json
/// {
///   "version": "0.1.0",
///   "timestamp": 1705315800,
///   "total_requests_received": 12,
///   "total_responses_sent": 11,
///   "total_processing_time_μs": 48210,
///   "total_responses_sent_by_status": { "200": 9, "429": 2 }
/// }
/// ```
pub async fn debug_vars(State(state): State<AppState>) -> Json<DebugVars> {
    Json(DebugVars {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().timestamp(),
        metrics: state.metrics.snapshot(),
    })
}
