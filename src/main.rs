//! GSALT Ledger - maintenance worker
//!
//! Connects to the ledger database and runs the pending-expiry sweep until
//! shut down. Money movements are driven by the embedding service through
//! [`gsalt_ledger::TransactionEngine`].

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gsalt_ledger::audit::AuditLogService;
use gsalt_ledger::db;
use gsalt_ledger::jobs::JobScheduler;
use gsalt_ledger::store::PgLedgerStore;
use gsalt_ledger::Config;

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gsalt_ledger=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.is_production());

    tracing::info!(environment = %config.environment, "Starting GSALT ledger worker");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Apply migrations/0001_ledger.sql.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let store = Arc::new(PgLedgerStore::new(pool.clone()));
    let audit = Arc::new(AuditLogService::new(pool.clone()));
    let scheduler = JobScheduler::with_config(store, audit, config.scheduler.clone())
        .with_pending_expiry(config.engine.pending_expiry);
    let jobs = scheduler.start();

    shutdown_signal().await?;

    // Cleanup
    tracing::info!("Worker shutting down...");
    jobs.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            },
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    Ok(())
}
