//! Prometheus metrics for application observability.
//!
//! These complement the in-process counters served at `GET /debug/vars`
//! (see [`crate::middleware::instrument`]) and are exposed on a dedicated
//! listener when `METRICS_PORT` is non-zero.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `cinema_http_requests_total` - Responses sent (labels: method, status)
//! - `cinema_rate_limit_rejections_total` - Requests rejected with 429
//! - `cinema_auth_failures_total` - Requests rejected by authentication or
//!   authorization (label: reason)
//!
//! ## Histograms
//! - `cinema_http_request_duration_seconds` - Request duration (labels: method, status)
//!
//! ## Gauges
//! - `cinema_rate_limiter_clients` - Clients currently tracked by the rate limiter
//!
//! # Usage
//!
//! ```rust,ignore
//! use cinema_api::metrics::{init_metrics, record_request};
//!
//! // Initialize metrics (call once at startup)
//! init_metrics(addr)?;
//!
//! record_request("GET", 200, 0.045);
//! ```
//!
//! Recording without an installed exporter is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "cinema_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "cinema_http_request_duration_seconds";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "cinema_rate_limit_rejections_total";
    pub const AUTH_FAILURES_TOTAL: &str = "cinema_auth_failures_total";
    pub const RATE_LIMITER_CLIENTS: &str = "cinema_rate_limiter_clients";
}

/// Initialize the Prometheus metrics exporter.
///
/// This sets up metric descriptions and starts the Prometheus HTTP listener
/// on the specified address.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is
/// taken or a recorder was already installed).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::HTTP_REQUESTS_TOTAL,
        "Total number of HTTP responses sent"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by the per-client rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of requests rejected by authentication or authorization"
    );

    describe_histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMITER_CLIENTS,
        "Number of clients currently tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::HTTP_REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record a request rejected by the rate limiter.
pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

/// Record a request rejected for lack of (sufficient) credentials.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Update the tracked client count gauge.
pub fn set_rate_limiter_clients(count: usize) {
    gauge!(names::RATE_LIMITER_CLIENTS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only verify the recorders don't panic without an exporter.

    #[test]
    fn test_record_request() {
        record_request("GET", 200, 0.1);
        record_request("POST", 500, 1.5);
    }

    #[test]
    fn test_record_rejections() {
        record_rate_limit_rejection();
        record_auth_failure("invalid_token");
    }

    #[test]
    fn test_set_rate_limiter_clients() {
        set_rate_limiter_clients(0);
        set_rate_limiter_clients(1024);
    }
}
