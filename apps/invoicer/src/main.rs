//! # Kardex Invoicer
//!
//! Daemon that issues electronic invoices for completed sales.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Invoicer Daemon                                  │
//! │                                                                         │
//! │  load billing.toml + KARDEX_* ──► open SQLite (migrations)             │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  store configured credentials ──► check billing profile                │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  InvoicePipeline.start() ──► log queue stats every minute              │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  Ctrl-C / SIGTERM ──► workers finish current job ──► exit              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Environment
//! - `KARDEX_CONFIG`: explicit config file path
//! - `RUST_LOG`: log filter (default `info`)
//! - `KARDEX_*`: config overrides, see `kardex_billing::config`

use anyhow::Context;
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kardex_billing::{BillingConfig, InvoicePipeline};
use kardex_core::validation::validate_billing_profile;
use kardex_db::{Database, DbConfig};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Kardex invoicer...");

    let config_path = std::env::var_os("KARDEX_CONFIG").map(PathBuf::from);
    let config = BillingConfig::load(config_path).context("loading billing configuration")?;
    info!(
        tenant_id = %config.tenant_id(),
        workers = config.worker.pool_size,
        max_attempts = config.retry.max_attempts,
        "Configuration loaded"
    );

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let db_config = DbConfig::new(db_path.clone()).for_workers(config.worker.pool_size);
    let db = Database::new(db_config)
        .await
        .context("opening database")?;

    let mut pipeline = InvoicePipeline::from_config(db.clone(), &config);

    match config.credentials() {
        Some(credentials) => {
            pipeline
                .update_credentials(&credentials)
                .await
                .context("storing billing credentials")?;
            info!(base_url = %credentials.base_url, "Billing credentials stored");
        }
        None => info!("No provider credentials configured, using stored credentials"),
    }

    check_profile(&db, &config).await?;

    pipeline.start();

    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = stats_tick.tick() => match pipeline.stats(config.tenant_id()).await {
                Ok(stats) => info!(
                    live_jobs = stats.live_jobs,
                    due_jobs = stats.due_jobs,
                    pending = stats.pending,
                    authorized = stats.authorized,
                    failed = stats.failed,
                    "Invoice queue status"
                ),
                Err(e) => warn!(error = %e, "Failed to read queue statistics"),
            },
        }
    }

    pipeline.shutdown().await;
    db.close().await;

    info!("Invoicer shutdown complete");
    Ok(())
}

/// Warns about profile problems that will fail every invoice of the tenant.
async fn check_profile(db: &Database, config: &BillingConfig) -> anyhow::Result<()> {
    let tenant_id = config.tenant_id();
    let Some(profile) = db
        .billing()
        .get_profile(tenant_id)
        .await
        .context("reading billing profile")?
    else {
        warn!(
            tenant_id = %tenant_id,
            "No billing profile stored, invoices will fail until one is configured"
        );
        return Ok(());
    };

    if let Err(e) = validate_billing_profile(&profile) {
        warn!(tenant_id = %tenant_id, error = %e, "Billing profile is incomplete");
    }
    if profile.environment != config.provider.environment {
        warn!(
            tenant_id = %tenant_id,
            profile = %profile.environment,
            configured = %config.provider.environment,
            "Billing profile environment differs from configuration"
        );
    }
    if !profile.signature_valid_at(Utc::now()) {
        error!(alert = true, tenant_id = %tenant_id, "Signing certificate missing or expired");
    }
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
