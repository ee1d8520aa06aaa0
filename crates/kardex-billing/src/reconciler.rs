//! # Reconciler
//!
//! Asks the provider about an invoice before submitting it again.
//!
//! A worker can crash (or time out) after the provider accepted an invoice
//! but before the sale was marked AUTHORIZED. The access key is recorded on
//! the job before the first POST, so every repeat attempt has a key to ask
//! about. A manual re-issue carries the key of the failed job into the new
//! one, so its first attempt asks as well.
//!
//! ```text
//! attempt 1 ── record key ── POST /invoices ──✗ crash
//! attempt 2 ── GET /invoices/{key}/status
//!                 ├── AUTHORIZED  → AlreadyAuthorized (no second POST)
//!                 ├── PROCESSING  → Transient, ask again later
//!                 └── anything else → Proceed with submission
//! ```

use tracing::{debug, info};

use crate::client::{BillingApiClient, RemoteStatus};
use crate::error::{BillingError, BillingResult};
use kardex_core::{InvoiceJob, Sale};

/// What to do before submitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The provider already authorized this invoice: record it, do not POST.
    AlreadyAuthorized {
        access_key: String,
        document_id: String,
    },
    /// Nothing on record at the provider; submit.
    Proceed,
}

/// The key a previous attempt may have used: the sale's own key, else the one
/// recorded on the job.
pub fn correlation_key<'a>(job: &'a InvoiceJob, sale: &'a Sale) -> Option<&'a str> {
    sale.access_key
        .as_deref()
        .or(job.access_key.as_deref())
}

/// Checks the provider for an earlier, unrecorded success.
///
/// Runs on repeat attempts and on any job that already carries a key from an
/// earlier submission. A first attempt of a fresh job proceeds without a
/// network call.
pub async fn reconcile(
    client: &BillingApiClient,
    job: &InvoiceJob,
    sale: &Sale,
) -> BillingResult<ReconcileOutcome> {
    if !job.is_repeat_attempt() && job.access_key.is_none() {
        return Ok(ReconcileOutcome::Proceed);
    }

    let Some(access_key) = correlation_key(job, sale) else {
        debug!(sale_id = %sale.id, attempt = job.attempts, "No access key recorded, nothing to reconcile");
        return Ok(ReconcileOutcome::Proceed);
    };

    let state = client.get_invoice_status(access_key).await?;
    match state.status {
        RemoteStatus::Authorized => {
            let document_id = state.document_id.ok_or_else(|| {
                BillingError::Transient(format!(
                    "provider reports {} authorized without a document id",
                    access_key
                ))
            })?;
            info!(
                sale_id = %sale.id,
                access_key = %access_key,
                document_id = %document_id,
                "Duplicate invoice detected, provider already authorized it"
            );
            Ok(ReconcileOutcome::AlreadyAuthorized {
                access_key: access_key.to_string(),
                document_id,
            })
        }
        RemoteStatus::Processing => Err(BillingError::Transient(format!(
            "provider is still processing {}",
            access_key
        ))),
        status => {
            debug!(sale_id = %sale.id, ?status, "Provider has no authorized invoice, submitting");
            Ok(ReconcileOutcome::Proceed)
        }
    }
}
