//! Request counters served at `GET /debug/vars`.
//!
//! [`InstrumentLayer`] sits just inside the panic recovery layer so it sees
//! the final status of every request, including 401/403/429 responses
//! produced by inner middleware. Each request is also forwarded to the
//! Prometheus recorders in [`crate::metrics`].
//!
//! Finalization runs from a drop guard: a request that was counted as
//! received is always counted as sent, exactly once. A request whose future
//! is dropped before producing a response (client disconnect, or a panic
//! unwinding through the stack) is tallied as 500, which is also what the
//! recovery layer answers for a panic.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use serde::Serialize;
use tower::{Layer, Service};

use crate::metrics;

#[derive(Debug, Default)]
struct MetricsState {
    total_requests_received: u64,
    total_responses_sent: u64,
    total_processing_time_us: u64,
    total_responses_sent_by_status: BTreeMap<u16, u64>,
}

/// Point-in-time copy of the request counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    #[serde(rename = "total_processing_time_μs")]
    pub total_processing_time_us: u64,
    pub total_responses_sent_by_status: BTreeMap<u16, u64>,
}

/// Process-lifetime request counters.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    state: Mutex<MetricsState>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_received(&self) {
        self.state().total_requests_received += 1;
    }

    pub fn record_sent(&self, status: StatusCode, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

        let mut state = self.state();
        state.total_responses_sent += 1;
        state.total_processing_time_us = state.total_processing_time_us.saturating_add(micros);
        *state
            .total_responses_sent_by_status
            .entry(status.as_u16())
            .or_default() += 1;
    }

    /// Copy all counters under a single lock acquisition.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state();
        MetricsSnapshot {
            total_requests_received: state.total_requests_received,
            total_responses_sent: state.total_responses_sent,
            total_processing_time_us: state.total_processing_time_us,
            total_responses_sent_by_status: state.total_responses_sent_by_status.clone(),
        }
    }
}

/// Records completion of one request when dropped.
struct InFlight {
    metrics: Arc<RequestMetrics>,
    method: Method,
    start: Instant,
    status: Option<StatusCode>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let status = self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        self.metrics.record_sent(status, elapsed);
        metrics::record_request(self.method.as_str(), status.as_u16(), elapsed.as_secs_f64());
    }
}

/// Layer feeding [`RequestMetrics`].
#[derive(Clone)]
pub struct InstrumentLayer {
    metrics: Arc<RequestMetrics>,
}

impl InstrumentLayer {
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InstrumentService<S> {
    inner: S,
    metrics: Arc<RequestMetrics>,
}

impl<S> Service<Request<Body>> for InstrumentService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        self.metrics.record_received();
        let guard = InFlight {
            metrics: self.metrics.clone(),
            method: req.method().clone(),
            start: Instant::now(),
            status: None,
        };

        let mut inner = self.inner.clone();
        Box::pin(async move {
            // Bind the whole guard so it lives until the response is known.
            let mut guard = guard;
            let response = inner.call(req).await?;
            guard.status = Some(response.status());
            Ok(response)
        })
    }
}
