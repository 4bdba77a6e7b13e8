//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Panic Recovery  │ ← 500 + Connection: close on panic
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Instrumentation  │ ← /debug/vars counters, sees every final status
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (when enabled)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 on a bad bearer token, Vary: Authorization
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │       CORS       │ ← Vary: Origin, trusted preflight answered here
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Permission check │ ← per route: 401 anonymous, 403 inactive / not permitted
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/v1/healthcheck`, `/debug/vars` - Health & diagnostics (public)
//! - `/v1/movies` - Catalog (`movies:read` / `movies:write`)
//! - `/v1/users`, `/v1/tokens` - Registration, activation, login (public)

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post, put};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    AuthenticateLayer, CorsLayer, InstrumentLayer, RateLimitLayer, RequirePermissionLayer,
    TrustedOrigins, recover_panic,
};
use crate::models::{MOVIES_READ, MOVIES_WRITE};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Rate limiting is applied only when `state.limiter` is present.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    let can_read = RequirePermissionLayer::new(MOVIES_READ);
    let can_write = RequirePermissionLayer::new(MOVIES_WRITE);

    // =========================================================================
    // Build Router with Routes
    // =========================================================================
    let mut router = Router::new()
        // Health and diagnostics
        .route("/v1/healthcheck", get(handlers::healthcheck))
        .route("/debug/vars", get(handlers::debug_vars))
        // Movie catalog
        .route(
            "/v1/movies",
            get(handlers::list_movies)
                .route_layer(can_read)
                .merge(post(handlers::create_movie).route_layer(can_write)),
        )
        .route(
            "/v1/movies/{id}",
            get(handlers::show_movie).route_layer(can_read).merge(
                patch(handlers::update_movie)
                    .delete(handlers::delete_movie)
                    .route_layer(can_write),
            ),
        )
        // Accounts and credentials
        .route("/v1/users", post(handlers::register_user))
        .route("/v1/users/activated", put(handlers::activate_user))
        .route(
            "/v1/tokens/authentication",
            post(handlers::create_authentication_token),
        )
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed);

    // =========================================================================
    // Apply Middleware Stack (order matters - last applied runs first)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. CORS
    let origins = TrustedOrigins::new(&config.cors_trusted_origins);
    if origins.is_empty() {
        info!("No trusted CORS origins configured, cross-origin requests get no grant");
    } else {
        info!(
            origins = config.cors_trusted_origins.len(),
            "CORS trusted origins configured"
        );
    }
    router = router.layer(CorsLayer::new(origins));

    // 3. Authentication
    router = router.layer(AuthenticateLayer::new(
        state.stores.users.clone(),
        state.stores.permissions.clone(),
    ));

    // 4. Rate limiting (if enabled)
    if let Some(limiter) = &state.limiter {
        router = router.layer(RateLimitLayer::new(limiter.clone()));
    }

    // 5. Instrumentation
    router = router.layer(InstrumentLayer::new(state.metrics.clone()));

    // 6. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 7. Panic recovery - outermost
    router = router.layer(recover_panic());

    router.with_state(state)
}
