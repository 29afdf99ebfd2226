//! Billing Ledger entry point.
//!
//! Connects to PostgreSQL, applies migrations and holds the ledger ready
//! until a shutdown signal arrives. The transport layer embeds
//! [`LedgerService`] directly.

use billing_ledger::config::LedgerConfig;
use billing_ledger::services::{init_metrics, Database, LedgerService};

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = LedgerConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    // Initialize tracing
    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
        config.common.json_logs,
    )
    .map_err(|e| std::io::Error::other(format!("Tracing error: {}", e)))?;

    tracing::info!(
        version = %config.service_version,
        otlp_endpoint = ?config.common.otlp_endpoint,
        "Starting billing-ledger"
    );

    // Initialize metrics
    init_metrics();

    tracing::info!(
        service_name = %config.service_name,
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        max_retries = %config.retry.max_retries,
        "Configuration loaded"
    );

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to database");
        std::io::Error::other(format!("Database error: {}", e))
    })?;

    if config.database.run_migrations {
        db.run_migrations()
            .await
            .map_err(|e| std::io::Error::other(format!("Migration error: {}", e)))?;
    }

    db.health_check()
        .await
        .map_err(|e| std::io::Error::other(format!("Health check error: {}", e)))?;

    let ledger = LedgerService::with_retry(db, config.retry.clone());
    tracing::info!(
        pool_size = ledger.store().pool().size(),
        "Ledger ready"
    );

    shutdown_signal().await;

    ledger.store().pool().close().await;
    tracing::info!("Service shutdown complete");
    Ok(())
}
