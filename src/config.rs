//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Rate Limiting
//!
//! - `LIMITER_ENABLED`: Enable per-client rate limiting (default: true)
//! - `LIMITER_RPS`: Token refill rate per client, may be fractional (default: 2)
//! - `LIMITER_BURST`: Bucket capacity per client (default: 4)
//! - `LIMITER_EVICTION_SECS`: Idle time after which a client entry is dropped (default: 180)
//! - `LIMITER_SWEEP_SECS`: Interval of the background eviction sweep (default: 60)
//!
//! # Security Configuration
//!
//! - `CORS_TRUSTED_ORIGINS`: Comma- or space-separated list of trusted origins.
//!   An entry may contain one `*` wildcard, e.g. `https://*.example.com`.
//!   Empty (the default) means no cross-origin access is granted.
//! - `ACTIVATION_TOKEN_TTL_SECS` / `AUTH_TOKEN_TTL_SECS`: Token lifetimes

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 4000)
    pub port: u16,

    /// Deployment environment name reported by the healthcheck
    /// (development|staging|production)
    pub env: String,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Whether per-client rate limiting is applied
    pub limiter_enabled: bool,

    /// Tokens added to each client bucket per second
    pub limiter_rps: f64,

    /// Maximum tokens a client bucket can hold
    pub limiter_burst: u32,

    /// Idle time after which a client's limiter state is evicted
    pub limiter_eviction_window: Duration,

    /// How often the eviction sweep runs
    pub limiter_sweep_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Trusted CORS origins (exact match, one `*` wildcard allowed per entry)
    pub cors_trusted_origins: Vec<String>,

    /// Lifetime of account activation tokens (default: 3 days)
    pub activation_token_ttl: Duration,

    /// Lifetime of bearer authentication tokens (default: 24 hours)
    pub auth_token_ttl: Duration,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration value is invalid
    /// (e.g., non-numeric PORT value, non-positive LIMITER_RPS).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 4000)?,
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),

            // Rate limiting
            limiter_enabled: Self::parse_env("LIMITER_ENABLED", true)?,
            limiter_rps: Self::parse_env("LIMITER_RPS", 2.0)?,
            limiter_burst: Self::parse_env("LIMITER_BURST", 4)?,
            limiter_eviction_window: Duration::from_secs(Self::parse_env(
                "LIMITER_EVICTION_SECS",
                180,
            )?),
            limiter_sweep_interval: Duration::from_secs(Self::parse_env("LIMITER_SWEEP_SECS", 60)?),

            // Security
            cors_trusted_origins: Self::parse_trusted_origins(),
            activation_token_ttl: Duration::from_secs(Self::parse_env(
                "ACTIVATION_TOKEN_TTL_SECS",
                3 * 24 * 60 * 60,
            )?),
            auth_token_ttl: Duration::from_secs(Self::parse_env(
                "AUTH_TOKEN_TTL_SECS",
                24 * 60 * 60,
            )?),
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.limiter_enabled {
            if !(self.limiter_rps.is_finite() && self.limiter_rps > 0.0) {
                return Err(AppError::ConfigError(format!(
                    "LIMITER_RPS must be a positive number, got {}",
                    self.limiter_rps
                )));
            }

            if self.limiter_burst == 0 {
                return Err(AppError::ConfigError(
                    "LIMITER_BURST must be greater than 0".to_string(),
                ));
            }

            if self.limiter_sweep_interval.is_zero() {
                return Err(AppError::ConfigError(
                    "LIMITER_SWEEP_SECS must be greater than 0".to_string(),
                ));
            }
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.auth_token_ttl.is_zero() || self.activation_token_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "token TTLs must be greater than 0".to_string(),
            ));
        }

        if let Some(bad) = self
            .cors_trusted_origins
            .iter()
            .find(|o| o.matches('*').count() > 1)
        {
            return Err(AppError::ConfigError(format!(
                "CORS_TRUSTED_ORIGINS entry {bad:?} has more than one wildcard"
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse trusted CORS origins from environment variable.
    fn parse_trusted_origins() -> Vec<String> {
        env::var("CORS_TRUSTED_ORIGINS")
            .map(|raw| split_origins(&raw))
            .unwrap_or_default()
    }
}

/// Split a comma- and/or whitespace-separated origin list.
fn split_origins(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 4000,
            env: "development".to_string(),
            // Rate limiting
            limiter_enabled: true,
            limiter_rps: 2.0,
            limiter_burst: 4,
            limiter_eviction_window: Duration::from_secs(180),
            limiter_sweep_interval: Duration::from_secs(60),
            // Security
            cors_trusted_origins: vec![],
            activation_token_ttl: Duration::from_secs(3 * 24 * 60 * 60),
            auth_token_ttl: Duration::from_secs(24 * 60 * 60),
            max_request_body_size: 1024 * 1024, // 1MB
            // Observability
            log_level: "info".to_string(),
            metrics_port: 0,
        }
    }
}
