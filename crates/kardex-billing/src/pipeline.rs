//! # Invoice Pipeline
//!
//! Owns the worker pool and the operator-facing invoicing commands.
//!
//! ## Pipeline Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        InvoicePipeline                                  │
//! │                                                                         │
//! │   start()  ── spawns pool_size workers ──┐                             │
//! │                                          ▼                             │
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐                │
//! │   │ InvoiceWorker│  │ InvoiceWorker│  │ InvoiceWorker│  ...           │
//! │   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘                │
//! │          └─────────────────┼─────────────────┘                         │
//! │                            ▼                                            │
//! │        invoice_jobs (SQLite)      TenantClients (one client/tenant)    │
//! │                                                                         │
//! │   shutdown() ── watch signal ── workers finish their job ── joined     │
//! │                                                                         │
//! │   Commands: reissue, download_document, upload_signature,              │
//! │             update_credentials, stats                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::retry::RetryPolicy;
use crate::tenants::TenantClients;
use crate::worker::{InvoiceWorker, WorkerSettings};
use kardex_core::{BillingCredentials, InvoiceStatus, Sale};
use kardex_db::Database;

/// Queue and invoice counts for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Jobs in the queue, leased or not.
    pub live_jobs: i64,
    /// Jobs a worker could lease right now.
    pub due_jobs: i64,
    pub pending: i64,
    pub authorized: i64,
    pub failed: i64,
}

/// Worker pool plus invoicing commands over one database.
pub struct InvoicePipeline {
    db: Database,
    clients: Arc<TenantClients>,
    policy: RetryPolicy,
    settings: WorkerSettings,
    pool_size: usize,
    shutdown_tx: Option<watch::Sender<bool>>,
    workers: Vec<JoinHandle<()>>,
}

impl InvoicePipeline {
    pub fn new(
        db: Database,
        clients: Arc<TenantClients>,
        policy: RetryPolicy,
        settings: WorkerSettings,
        pool_size: usize,
    ) -> Self {
        InvoicePipeline {
            db,
            clients,
            policy,
            settings,
            pool_size,
            shutdown_tx: None,
            workers: Vec::new(),
        }
    }

    /// Pipeline talking HTTP to the provider, wired from configuration.
    pub fn from_config(db: Database, config: &BillingConfig) -> Self {
        let clients = Arc::new(TenantClients::new(db.clone(), config.request_timeout()));
        Self::new(
            db,
            clients,
            config.retry_policy(),
            config.worker_settings(),
            config.worker.pool_size,
        )
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Spawns the worker pool. Calling it on a running pipeline is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Invoice pipeline already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let instance = uuid::Uuid::new_v4().simple().to_string();

        for i in 0..self.pool_size {
            let worker = InvoiceWorker::new(
                format!("invoicer-{}-{}", &instance[..8], i),
                self.db.clone(),
                self.clients.clone(),
                self.policy.clone(),
                self.settings,
                shutdown_rx.clone(),
            );
            self.workers.push(tokio::spawn(worker.run()));
        }

        self.shutdown_tx = Some(shutdown_tx);
        info!(
            workers = self.pool_size,
            max_attempts = self.policy.max_attempts,
            "Invoice pipeline started"
        );
    }

    /// Signals every worker and waits for them to finish their current job.
    pub async fn shutdown(&mut self) {
        let Some(tx) = self.shutdown_tx.take() else {
            return;
        };
        info!("Shutting down invoice pipeline");

        let _ = tx.send(true);
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Invoice worker task panicked");
            }
        }

        info!("Invoice pipeline stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Moves an ERROR sale back to PENDING and queues it again.
    pub async fn reissue(&self, sale_id: &str) -> BillingResult<Sale> {
        Ok(self.db.sales().reissue(sale_id).await?)
    }

    /// Downloads the provider's signed document for an authorized sale.
    pub async fn download_document(&self, sale_id: &str) -> BillingResult<Vec<u8>> {
        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| BillingError::Validation(format!("sale {} not found", sale_id)))?;

        let document_id = match (&sale.invoice_status, &sale.document_id) {
            (InvoiceStatus::Authorized, Some(id)) => id,
            _ => {
                return Err(BillingError::Validation(format!(
                    "sale {} has no authorized invoice (status {})",
                    sale_id, sale.invoice_status
                )))
            }
        };

        let client = self.clients.get(&sale.tenant_id).await?;
        client.fetch_signed_document(document_id).await
    }

    /// Uploads a new signing certificate and records its expiry on the
    /// tenant's billing profile.
    pub async fn upload_signature(
        &self,
        tenant_id: &str,
        certificate: &[u8],
        password: &str,
    ) -> BillingResult<DateTime<Utc>> {
        let client = self.clients.get(tenant_id).await?;
        let expires_at = client.upload_signature(certificate, password).await?;

        self.db
            .billing()
            .update_signature_expiry(tenant_id, expires_at)
            .await?;
        // the cached token still carries the old signature expiry
        client.auth().invalidate_token().await;

        info!(tenant_id = %tenant_id, %expires_at, "Signing certificate updated");
        Ok(expires_at)
    }

    /// Stores a tenant's provider credentials; the next job logs in with them.
    pub async fn update_credentials(&self, credentials: &BillingCredentials) -> BillingResult<()> {
        self.db.billing().upsert_credentials(credentials).await?;
        if self.clients.evict(&credentials.tenant_id).await {
            info!(tenant_id = %credentials.tenant_id, "Billing credentials replaced");
        }
        Ok(())
    }

    pub async fn stats(&self, tenant_id: &str) -> BillingResult<PipelineStats> {
        let jobs = self.db.invoice_jobs();
        let sales = self.db.sales();
        Ok(PipelineStats {
            live_jobs: jobs.count_live().await?,
            due_jobs: jobs.count_due().await?,
            pending: sales
                .count_by_invoice_status(tenant_id, InvoiceStatus::Pending)
                .await?,
            authorized: sales
                .count_by_invoice_status(tenant_id, InvoiceStatus::Authorized)
                .await?,
            failed: sales
                .count_by_invoice_status(tenant_id, InvoiceStatus::Error)
                .await?,
        })
    }
}
