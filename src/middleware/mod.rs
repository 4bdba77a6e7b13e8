//! HTTP middleware forming the request pipeline.
//!
//! - **Panic recovery**: Turns handler panics into a generic 500 and closes the connection
//! - **Instrumentation**: Request/response counters for `/debug/vars` and Prometheus
//! - **Rate limiting**: Per-client token buckets with idle eviction
//! - **Authentication**: Bearer token → caller identity
//! - **CORS**: Allow-listed origins and preflight handling
//! - **Authorization**: Per-route permission codes
//!
//! # Architecture
//!
//! ```text
//! Request → Recover → Trace → Instrument → Rate Limiter → Authenticate → CORS → Router → Permission → Handler
//!              ↓                                ↓              ↓            ↓                 ↓
//!          500 on panic                   429 / 500      401 bad token  preflight 200   401 / 403
//! ```
//!
//! Any stage that rejects a request answers immediately; no inner stage and
//! no handler runs. The instrumentation layer still observes the rejection.

pub mod auth;
pub mod cors;
pub mod instrument;
pub mod ip;
pub mod permission;
pub mod rate_limit;
pub mod recover;

pub use auth::AuthenticateLayer;
pub use cors::{CorsLayer, OriginPattern, TrustedOrigins};
pub use instrument::{InstrumentLayer, MetricsSnapshot, RequestMetrics};
pub use ip::{client_key, remote_addr, split_host};
pub use permission::{RequirePermissionLayer, authorize};
pub use rate_limit::{ClientLimiterStore, Quota, RateLimitError, RateLimitLayer, TokenBucket};
pub use recover::{RecoverPanicLayer, recover_panic};
