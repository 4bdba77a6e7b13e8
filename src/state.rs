//! Application state shared across all HTTP handlers.
//!
//! # Design
//!
//! `AppState` is cloned for every request, so every field is either cheap to
//! clone or wrapped in `Arc`. It owns:
//!
//! - The storage capabilities ([`Stores`]) and the [`Mailer`]
//! - The request counters served at `/debug/vars` ([`RequestMetrics`])
//! - The per-client rate limiter, when enabled ([`ClientLimiterStore`])
//!
//! # Background Tasks
//!
//! The rate limiter's eviction sweep and fire-and-forget work such as
//! activation emails run on a `tokio_util::task::TaskTracker` and observe a
//! shared `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::Config;
use crate::mailer::Mailer;
use crate::middleware::{ClientLimiterStore, Quota, RateLimitError, RequestMetrics};
use crate::store::Stores;

/// Shared application state for Axum handlers and middleware.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, Stores::in_memory(), Arc::new(LogMailer))?;
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Storage capabilities
    pub stores: Stores,
    /// Delivers activation tokens
    pub mailer: Arc<dyn Mailer>,
    /// Counters exposed at `/debug/vars`
    pub metrics: Arc<RequestMetrics>,
    /// Per-client rate limiter, `None` when limiting is disabled
    pub limiter: Option<Arc<ClientLimiterStore>>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime when rate limiting is
    /// enabled, since the eviction sweep is spawned here.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if limiting is enabled with an invalid
    /// rate or burst.
    pub fn new(
        config: Config,
        stores: Stores,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, RateLimitError> {
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let limiter = if config.limiter_enabled {
            let quota = Quota::new(config.limiter_rps, config.limiter_burst)?;
            let limiter = Arc::new(ClientLimiterStore::new(
                quota,
                config.limiter_eviction_window,
            ));
            limiter.spawn_sweeper(
                config.limiter_sweep_interval,
                &task_tracker,
                cancellation_token.clone(),
            );
            info!(
                rps = config.limiter_rps,
                burst = config.limiter_burst,
                eviction_secs = config.limiter_eviction_window.as_secs(),
                "Per-client rate limiting enabled"
            );
            Some(limiter)
        } else {
            info!("Rate limiting disabled");
            None
        };

        Ok(Self {
            config: Arc::new(config),
            stores,
            mailer,
            metrics: Arc::new(RequestMetrics::new()),
            limiter,
            started_at: Instant::now(),
            task_tracker,
            cancellation_token,
        })
    }

    /// Run `task` in the background, tracked for graceful shutdown.
    pub fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.task_tracker.spawn(task);
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker
    /// 3. Waits for all tasks to complete, including in-flight emails
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        debug!(pending = self.task_tracker.len(), "Waiting for background tasks");
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
