//! Receipt worker - custom handler process for the receipt OCR functions.
//!
//! This binary serves the two functions the Functions host forwards to it:
//! - `POST /api/receipt-ocr`: Event Grid webhook (handshake + blob created)
//! - `POST /receipt-blob-trigger`: blob trigger invocations
//!
//! Clients and secrets are built lazily on first use and kept for the
//! lifetime of the process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use receipts::web::{is_function_key_enabled, router};
use receipts::{AppState, AzureBackend, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("receipt_worker_starting");

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!(
        port = config.port,
        keyvault_configured = config.keyvault_url.is_some(),
        storage_account_configured = config.storage_account_url.is_some(),
        raw_container = ?config.raw_container,
        output_container = %config.output_container,
        connection_string_configured = config.storage_connection_string.is_some(),
        function_key_configured = is_function_key_enabled(&config.function_key),
        failure_policy = ?config.failure_policy,
        "config_loaded"
    );

    let backend = AzureBackend::new(config.clone()).context("Failed to create Azure backend")?;
    let state = AppState::new(config.clone(), Arc::new(backend));

    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "receipt_worker_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("receipt_worker_shutdown_complete");

    Ok(())
}

/// Resolves on SIGINT, or SIGTERM (what the Functions host sends on recycle).
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "receipt_worker_sigint_unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "receipt_worker_sigterm_unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    info!(signal = received, "receipt_worker_draining");
}
