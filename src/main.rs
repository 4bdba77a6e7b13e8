use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cinema_api::{AppState, Config, LogMailer, Stores, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // A .env file may carry RUST_LOG, so load it before the subscriber.
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting Cinema API v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Install the global subscriber. `LOG_FORMAT=json` selects JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        env = %config.env,
        log_level = %config.log_level,
        limiter_enabled = config.limiter_enabled,
        "Configuration loaded"
    );

    // Prometheus exporter (optional)
    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    // Build application state and router
    let state = AppState::new(config, Stores::in_memory(), Arc::new(LogMailer)).map_err(|e| {
        error!("Invalid rate limiter settings: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET    /v1/healthcheck            - Health check");
    info!("  GET    /debug/vars                - Request counters");
    info!("  GET    /v1/movies                 - List movies");
    info!("  POST   /v1/movies                 - Create movie");
    info!("  GET    /v1/movies/{{id}}            - Show movie");
    info!("  PATCH  /v1/movies/{{id}}            - Update movie");
    info!("  DELETE /v1/movies/{{id}}            - Delete movie");
    info!("  POST   /v1/users                  - Register user");
    info!("  PUT    /v1/users/activated        - Activate user");
    info!("  POST   /v1/tokens/authentication  - Issue authentication token");

    // Client addresses feed the rate limiter, so serve with connect info.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
