//! Per-client rate limiting using the token bucket algorithm.
//!
//! # Algorithm
//!
//! Every client (keyed by the host of its remote address, see
//! [`super::ip`]) owns a bucket holding up to `burst` tokens. On each request
//! the bucket is lazily refilled by `elapsed × rate`, capped at `burst`; a
//! request that finds at least one token consumes it and is forwarded, any
//! other request is answered with 429 and never reaches the handler.
//!
//! # Memory Bound
//!
//! Client entries are created on first sight and dropped by a background
//! sweep once idle longer than the eviction window, so memory stays bounded
//! under churn of many distinct clients.
//!
//! # Locking
//!
//! ```text
//!   clients: Mutex<HashMap<host, Arc<ClientEntry>>>   (lookup / insert / sweep)
//!                                     │
//!                                     └── ClientEntry.bucket: Mutex<TokenBucket>
//! ```
//!
//! The map lock is held only for the lookup (and by the sweep); refill and
//! decrement happen under the entry's own lock, so distinct clients never
//! contend on bucket arithmetic. `last_seen` is an atomic so the sweep can
//! read it without touching entry locks.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Whole seconds until a token is available (at least 1)
//! - `X-RateLimit-Limit`: Configured refill rate per second

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{client_key, remote_addr};
use crate::error::AppError;
use crate::metrics;

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Rate must be a finite number greater than zero.
    InvalidRate,
    /// Burst capacity cannot be zero.
    ZeroBurst,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::InvalidRate => {
                write!(f, "rate must be a positive number of tokens per second")
            }
            RateLimitError::ZeroBurst => write!(f, "burst must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

// =============================================================================
// Token Bucket
// =============================================================================

/// Refill rate and capacity shared by every client bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    rate: f64,
    burst: u32,
}

impl Quota {
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if `rate` is not a positive finite number or
    /// `burst` is zero.
    pub fn new(rate: f64, burst: u32) -> Result<Self, RateLimitError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RateLimitError::InvalidRate);
        }
        if burst == 0 {
            return Err(RateLimitError::ZeroBurst);
        }
        Ok(Self { rate, burst })
    }

    /// Tokens added per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Bucket capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }
}

/// Lazily refilled token bucket for a single client.
///
/// Time is passed in explicitly so the arithmetic is deterministic under test.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket holding its full burst capacity.
    pub fn full(quota: &Quota, now: Instant) -> Self {
        Self {
            tokens: f64::from(quota.burst),
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last call, then try to take one
    /// token.
    ///
    /// On rejection returns how long until a whole token is available.
    pub fn try_acquire(&mut self, quota: &Quota, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * quota.rate).min(f64::from(quota.burst));
        self.last_refill = self.last_refill.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / quota.rate))
        }
    }

    /// Tokens currently held, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

// =============================================================================
// Client Store
// =============================================================================

struct ClientEntry {
    bucket: Mutex<TokenBucket>,
    /// Nanoseconds since the owning store's epoch.
    last_seen: AtomicU64,
}

/// Map of client host → token bucket, with idle eviction.
pub struct ClientLimiterStore {
    quota: Quota,
    eviction_window: Duration,
    epoch: Instant,
    clients: Mutex<HashMap<String, Arc<ClientEntry>>>,
    sweeper_started: AtomicBool,
}

impl fmt::Debug for ClientLimiterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientLimiterStore")
            .field("quota", &self.quota)
            .field("eviction_window", &self.eviction_window)
            .field("clients", &self.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding one of these locks cannot leave the data
    // half-updated, so poisoning is ignored.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClientLimiterStore {
    pub fn new(quota: Quota, eviction_window: Duration) -> Self {
        Self {
            quota,
            eviction_window,
            epoch: Instant::now(),
            clients: Mutex::new(HashMap::new()),
            sweeper_started: AtomicBool::new(false),
        }
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    fn offset_nanos(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }

    /// Apply the token bucket check for `client` at `now`.
    ///
    /// Unknown clients start with a full bucket.
    pub fn check(&self, client: &str, now: Instant) -> Result<(), Duration> {
        let seen = self.offset_nanos(now);

        let entry = {
            let mut clients = lock(&self.clients);
            let entry = match clients.get(client) {
                Some(entry) => Arc::clone(entry),
                None => {
                    let entry = Arc::new(ClientEntry {
                        bucket: Mutex::new(TokenBucket::full(&self.quota, now)),
                        last_seen: AtomicU64::new(seen),
                    });
                    clients.insert(client.to_owned(), Arc::clone(&entry));
                    entry
                }
            };
            entry.last_seen.fetch_max(seen, Ordering::Relaxed);
            entry
        };

        lock(&entry.bucket).try_acquire(&self.quota, now)
    }

    /// Remove every client idle for longer than the eviction window.
    ///
    /// Returns the number of entries removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let now = self.offset_nanos(now);
        let window = u64::try_from(self.eviction_window.as_nanos()).unwrap_or(u64::MAX);

        let mut clients = lock(&self.clients);
        let before = clients.len();
        clients.retain(|_, entry| {
            now.saturating_sub(entry.last_seen.load(Ordering::Relaxed)) <= window
        });
        before - clients.len()
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the periodic eviction sweep on `tracker`.
    ///
    /// Returns `false` without spawning if a sweeper was already started for
    /// this store or `period` is zero. The task exits when `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) -> bool {
        if period.is_zero() {
            warn!("Rate limiter sweep interval is zero, idle clients will not be evicted");
            return false;
        }
        if self
            .sweeper_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let store = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Rate limiter sweep received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = store.evict_idle(Instant::now());
                        let remaining = store.len();
                        if evicted > 0 {
                            debug!(evicted, remaining, "Evicted idle rate limiter clients");
                        }
                        metrics::set_rate_limiter_clients(remaining);
                    }
                }
            }

            debug!("Rate limiter sweep stopped");
        });

        true
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let quota = Quota::new(2.0, 4)?;
/// let store = Arc::new(ClientLimiterStore::new(quota, Duration::from_secs(180)));
/// let app = Router::new()
///     .route("/v1/movies", get(handler))
///     .layer(RateLimitLayer::new(store));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    store: Arc<ClientLimiterStore>,
}

impl RateLimitLayer {
    pub fn new(store: Arc<ClientLimiterStore>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            store: self.store.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    store: Arc<ClientLimiterStore>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let Some(client) = client_key(&req) else {
            let response = AppError::Internal(format!(
                "cannot derive client host from remote address {:?}",
                remote_addr(&req)
            ))
            .into_response();
            return Box::pin(async move { Ok(response) });
        };

        let mut inner = self.inner.clone();
        match self.store.check(&client, Instant::now()) {
            Ok(()) => Box::pin(async move { inner.call(req).await }),
            Err(wait) => {
                let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;

                warn!(
                    client_ip = %client,
                    path = %req.uri().path(),
                    retry_after_secs = retry_after,
                    "Rate limit exceeded for client"
                );
                metrics::record_rate_limit_rejection();

                let response = rate_limited_response(retry_after, self.store.quota().rate());
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

fn rate_limited_response(retry_after: u64, rate: f64) -> Response<Body> {
    let mut response = AppError::RateLimited.into_response();
    let headers = response.headers_mut();
    headers.insert("Retry-After", HeaderValue::from(retry_after));
    if let Ok(limit) = HeaderValue::from_str(&rate.to_string()) {
        headers.insert("X-RateLimit-Limit", limit);
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use axum::Router;
    use axum::extract::ConnectInfo;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    fn store(rate: f64, burst: u32) -> ClientLimiterStore {
        ClientLimiterStore::new(Quota::new(rate, burst).unwrap(), Duration::from_secs(180))
    }

    #[test]
    fn test_quota_rejects_invalid_values() {
        assert_eq!(Quota::new(0.0, 4), Err(RateLimitError::InvalidRate));
        assert_eq!(Quota::new(-1.0, 4), Err(RateLimitError::InvalidRate));
        assert_eq!(Quota::new(f64::INFINITY, 4), Err(RateLimitError::InvalidRate));
        assert_eq!(Quota::new(2.0, 0), Err(RateLimitError::ZeroBurst));
        assert!(Quota::new(0.5, 1).is_ok());
    }

    #[test]
    fn test_bucket_allows_burst_then_rejects() {
        let quota = Quota::new(2.0, 4).unwrap();
        let now = Instant::now();
        let mut bucket = TokenBucket::full(&quota, now);

        for _ in 0..4 {
            assert!(bucket.try_acquire(&quota, now).is_ok());
        }
        let wait = bucket.try_acquire(&quota, now).unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));
    }

    #[test]
    fn test_bucket_refills_one_token_per_interval() {
        let quota = Quota::new(2.0, 4).unwrap();
        let start = Instant::now();
        let mut bucket = TokenBucket::full(&quota, start);
        for _ in 0..4 {
            bucket.try_acquire(&quota, start).unwrap();
        }

        let later = start + Duration::from_millis(500);
        assert!(bucket.try_acquire(&quota, later).is_ok());
        assert!(bucket.try_acquire(&quota, later).is_err());
    }

    #[test]
    fn test_bucket_refill_is_capped_at_burst() {
        let quota = Quota::new(2.0, 4).unwrap();
        let start = Instant::now();
        let mut bucket = TokenBucket::full(&quota, start);
        bucket.try_acquire(&quota, start).unwrap();

        let much_later = start + Duration::from_secs(3600);
        bucket.try_acquire(&quota, much_later).unwrap();
        assert_eq!(bucket.tokens(), 3.0);
    }

    #[test]
    fn test_bucket_ignores_time_going_backwards() {
        let quota = Quota::new(1.0, 1).unwrap();
        let start = Instant::now() + Duration::from_secs(10);
        let mut bucket = TokenBucket::full(&quota, start);
        bucket.try_acquire(&quota, start).unwrap();

        let earlier = start - Duration::from_secs(5);
        assert!(bucket.try_acquire(&quota, earlier).is_err());
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_fractional_rate() {
        let quota = Quota::new(0.5, 1).unwrap();
        let start = Instant::now();
        let mut bucket = TokenBucket::full(&quota, start);
        bucket.try_acquire(&quota, start).unwrap();

        let wait = bucket.try_acquire(&quota, start).unwrap_err();
        assert_eq!(wait, Duration::from_secs(2));
        assert!(
            bucket
                .try_acquire(&quota, start + Duration::from_secs(2))
                .is_ok()
        );
    }

    #[test]
    fn test_clients_are_isolated() {
        let store = store(1.0, 1);
        let now = Instant::now();

        assert!(store.check("10.0.0.1", now).is_ok());
        assert!(store.check("10.0.0.1", now).is_err());
        assert!(store.check("10.0.0.2", now).is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_evict_idle_removes_only_stale_clients() {
        let store = store(2.0, 4);
        let start = Instant::now();

        store.check("stale", start).unwrap();
        store.check("fresh", start + Duration::from_secs(120)).unwrap();

        let evicted = store.evict_idle(start + Duration::from_secs(181));
        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_evict_idle_keeps_client_at_window_boundary() {
        let store = store(2.0, 4);
        let start = Instant::now();
        store.check("client", start).unwrap();

        assert_eq!(store.evict_idle(start + Duration::from_secs(180)), 0);
        assert_eq!(store.evict_idle(start + Duration::from_secs(181)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_evicted_client_starts_with_full_bucket() {
        let store = store(1.0, 2);
        let start = Instant::now();
        store.check("client", start).unwrap();
        store.check("client", start).unwrap();
        assert!(store.check("client", start).is_err());

        store.evict_idle(start + Duration::from_secs(200));

        let back = start + Duration::from_secs(200);
        assert!(store.check("client", back).is_ok());
        assert!(store.check("client", back).is_ok());
    }

    #[test]
    fn test_concurrent_checks_never_exceed_burst() {
        let store = store(0.001, 100);
        let allowed = AtomicU64::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        if store.check("shared", Instant::now()).is_ok() {
                            allowed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::Relaxed), 100);
    }

    #[tokio::test]
    async fn test_sweeper_starts_only_once() {
        let store = Arc::new(store(2.0, 4));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        assert!(store.spawn_sweeper(Duration::from_secs(60), &tracker, cancel.clone()));
        assert!(!store.spawn_sweeper(Duration::from_secs(60), &tracker, cancel.clone()));

        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_tick() {
        let store = Arc::new(ClientLimiterStore::new(
            Quota::new(2.0, 4).unwrap(),
            Duration::ZERO,
        ));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        store.check("client", Instant::now()).unwrap();
        // The sweep reads the wall clock, which paused tokio time does not move.
        std::thread::sleep(Duration::from_millis(2));

        store.spawn_sweeper(Duration::from_secs(60), &tracker, cancel.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.is_empty());
        cancel.cancel();
        tracker.close();
        tracker.wait().await;
    }

    fn router(store: Arc<ClientLimiterStore>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(store))
    }

    fn request_from(addr: SocketAddr) -> Request<Body> {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    #[tokio::test]
    async fn test_layer_returns_429_with_headers() {
        let store = Arc::new(store(2.0, 4));
        let app = router(store);
        let addr = SocketAddr::from(([127, 0, 0, 1], 40000));

        for _ in 0..4 {
            let response = app.clone().oneshot(request_from(addr)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(request_from(addr)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1");
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    }

    #[tokio::test]
    async fn test_layer_keys_on_host_not_port() {
        let store = Arc::new(store(1.0, 1));
        let app = router(store.clone());

        let first = app
            .clone()
            .oneshot(request_from(SocketAddr::from(([10, 1, 1, 1], 1000))))
            .await
            .unwrap();
        let second = app
            .oneshot(request_from(SocketAddr::from(([10, 1, 1, 1], 2000))))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_layer_without_remote_address_is_500() {
        let store = Arc::new(store(2.0, 4));
        let app = router(store.clone());

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.is_empty());
    }
}
