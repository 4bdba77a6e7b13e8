//! # Cinema API
//!
//! A movie catalog JSON API built on Axum, featuring a layered request
//! pipeline:
//!
//! - **Resilience**: Panics become 500 responses instead of dropped connections
//! - **Fairness**: Per-client token-bucket rate limiting with idle eviction
//! - **Security**: Bearer token authentication and per-route permission checks
//! - **Cross-origin**: Trusted-origin CORS with wildcard patterns and preflight
//! - **Observability**: Request counters at `/debug/vars`, tracing, Prometheus
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Recover → Trace → Metrics → Rate Limit →       │
//! │              Authenticate → CORS → Permission)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, movies, users, tokens)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Stores (movies, users, tokens, permissions) + Mailer       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use cinema_api::{AppState, Config, LogMailer, Stores, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let addr = config.server_addr();
//!     let state = AppState::new(config, Stores::in_memory(), Arc::new(LogMailer))?;
//!     let app = build_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Rate Limiting Configuration
//!
//! ```bash
//! LIMITER_RPS=10 LIMITER_BURST=20 cargo run
//! LIMITER_ENABLED=false cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use mailer::{LogMailer, MailError, Mailer};
pub use routes::build_router;
pub use state::AppState;
pub use store::{MemoryStore, Stores};
