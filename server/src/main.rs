//! Chorus Server - Main entry point.
//!
//! This binary starts the Chorus broadcast hub with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`chorus_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! CHORUS_SECRET_KEY="change-me" \
//! CHORUS_ALLOWED_ORIGINS="https://chat.example.com" \
//! PORT=8080 \
//! cargo run --release --bin chorus-server
//! ```

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use chorus_server::config::Config;
use chorus_server::error::{Result, ServerError};
use chorus_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  CHORUS_SECRET_KEY            - Secret used to sign access tokens");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                         - HTTP server port (default: 8080)");
            eprintln!("  CHORUS_ALLOWED_ORIGINS       - Comma-separated origins, or '*'");
            eprintln!("  CHORUS_CLIENT_QUEUE_CAPACITY - Per-client outbound queue (default: 64)");
            eprintln!("  CHORUS_MAX_FRAME_BYTES       - Largest accepted message (default: 65536)");
            eprintln!("  RUST_LOG                     - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match serve(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Server error");
            ExitCode::from(1)
        }
    }
}

/// Binds the listener and serves until a shutdown signal arrives.
async fn serve(config: Config) -> Result<()> {
    info!(
        port = config.port,
        allowed_origins = ?config.allowed_origins.origins(),
        allow_any_origin = config.allowed_origins.allows_any(),
        client_queue_capacity = config.client_queue_capacity,
        max_frame_bytes = config.max_frame_bytes,
        "Chorus server starting"
    );

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| ServerError::bind(bind_addr.clone(), err))?;
    info!(address = %bind_addr, "Server listening");

    let app = create_router(AppState::new(config));

    info!("Server ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    info!("Server shutting down gracefully");
    Ok(())
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT (Ctrl+C) or SIGTERM is received.
///
/// If a handler cannot be installed the failure is logged and that signal is
/// never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
