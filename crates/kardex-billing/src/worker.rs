//! # Invoice Worker
//!
//! Drains the invoice job queue: lease a job, turn the sale into an
//! authorized invoice, record the outcome.
//!
//! ## Per-Job State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Invoice Worker Flow                                │
//! │                                                                         │
//! │  LEASED (attempts += 1)                                                │
//! │    │  re-read sale ── voided / not PENDING ──────────► ack (DROPPED)   │
//! │    │  profile + signature ── missing/expired ──────► ExpiredSignature  │
//! │    │  local validation ── invalid ─────────────────► Validation        │
//! │    ▼                                                                    │
//! │  AUTHENTICATING  get_valid_token()                                     │
//! │    │  earlier key known: reconcile by access key                       │
//! │    │     └── provider already AUTHORIZED ───────────► AUTHORIZED       │
//! │    ▼                                                                    │
//! │  SUBMITTING  record access key on job, POST /invoices                  │
//! │    │                                                                    │
//! │    ├── ok ──────────────► AUTHORIZED: sale updated + job deleted (tx)  │
//! │    ├── Transient ───────► RETRY_SCHEDULED: next_eligible = now+backoff │
//! │    │                      (budget spent → sale ERROR, job deleted)     │
//! │    └── Authentication / Validation / ExpiredSignature                  │
//! │                    ─────► TERMINAL_ERROR: sale ERROR + job deleted (tx)│
//! │                                                                         │
//! │  Storage failures leave the job leased; it is picked up again once    │
//! │  the visibility timeout passes. If another worker took over an        │
//! │  expired lease, nothing is recorded (LEASE_LOST).                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::BillingApiClient;
use crate::error::{BillingError, BillingResult};
use crate::payload::InvoicePayload;
use crate::reconciler::{reconcile, ReconcileOutcome};
use crate::retry::RetryPolicy;
use crate::tenants::TenantClients;
use kardex_core::validation::{validate_billing_profile, validate_invoice};
use kardex_core::{AccessKey, BillingProfile, InvoiceJob, InvoiceStatus, Sale, SaleStatus};
use kardex_db::{Database, DbError, InvoiceJobRepository, RetryOutcome};

// =============================================================================
// Settings & Outcomes
// =============================================================================

/// Queue polling behaviour of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Sleep between polls when the queue has nothing due.
    pub poll_interval: Duration,
    /// How long a lease protects a job from other workers.
    pub visibility_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            poll_interval: Duration::from_millis(1000),
            visibility_timeout: Duration::from_secs(120),
        }
    }
}

/// What happened to a leased job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Sale is AUTHORIZED, job deleted.
    Authorized {
        access_key: String,
        document_id: String,
        /// Found already authorized at the provider, no submission made.
        reconciled: bool,
    },
    /// Sale no longer needs an invoice, job deleted.
    Dropped,
    /// Transient failure, job back in the queue.
    RetryScheduled {
        attempts: i64,
        next_eligible_at: DateTime<Utc>,
    },
    /// Sale is ERROR with `reason`, job deleted.
    Failed { reason: String, attempts: i64 },
    /// The lease expired and another worker holds the job; outcome discarded.
    LeaseLost,
}

enum Attempt {
    Authorized {
        access_key: String,
        document_id: String,
        reconciled: bool,
    },
    Dropped(&'static str),
}

// =============================================================================
// Invoice Worker
// =============================================================================

/// One queue consumer. A pool runs several, each in its own task.
pub struct InvoiceWorker {
    id: String,
    db: Database,
    jobs: InvoiceJobRepository,
    clients: Arc<TenantClients>,
    policy: RetryPolicy,
    settings: WorkerSettings,
    shutdown_rx: watch::Receiver<bool>,
}

impl InvoiceWorker {
    pub fn new(
        id: impl Into<String>,
        db: Database,
        clients: Arc<TenantClients>,
        policy: RetryPolicy,
        settings: WorkerSettings,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let jobs = db.invoice_jobs().with_max_attempts(policy.max_attempts);
        InvoiceWorker {
            id: id.into(),
            db,
            jobs,
            clients,
            policy,
            settings,
            shutdown_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the worker loop until shutdown is signalled.
    ///
    /// The signal is checked between jobs only; a job in flight finishes
    /// (its HTTP calls are bounded by the request timeout).
    pub async fn run(mut self) {
        info!(worker = %self.id, "Invoice worker starting");

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*self.shutdown_rx.borrow() {
            match self.run_once().await {
                // more may be due, poll again right away
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker = %self.id, error = %e, "Invoice worker iteration failed"),
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker = %self.id, "Invoice worker stopped");
    }

    /// Leases and processes at most one job.
    ///
    /// ## Returns
    /// `None` when nothing was due.
    pub async fn run_once(&self) -> BillingResult<Option<JobOutcome>> {
        let Some(job) = self
            .jobs
            .lease(&self.id, self.settings.visibility_timeout)
            .await?
        else {
            return Ok(None);
        };

        self.process(&job).await.map(Some)
    }

    async fn process(&self, job: &InvoiceJob) -> BillingResult<JobOutcome> {
        match self.settle(job).await {
            Err(BillingError::Database(DbError::LeaseLost { .. })) => {
                warn!(
                    worker = %self.id,
                    sale_id = %job.sale_id,
                    attempt = job.attempts,
                    "Lease lost to another worker, outcome discarded"
                );
                Ok(JobOutcome::LeaseLost)
            }
            other => other,
        }
    }

    async fn settle(&self, job: &InvoiceJob) -> BillingResult<JobOutcome> {
        match self.attempt(job).await {
            Ok(Attempt::Authorized {
                access_key,
                document_id,
                reconciled,
            }) => {
                self.jobs
                    .complete(&job.id, &self.id, &access_key, &document_id)
                    .await?;
                info!(
                    worker = %self.id,
                    sale_id = %job.sale_id,
                    attempt = job.attempts,
                    access_key = %access_key,
                    document_id = %document_id,
                    reconciled,
                    "Invoice authorized"
                );
                Ok(JobOutcome::Authorized {
                    access_key,
                    document_id,
                    reconciled,
                })
            }

            Ok(Attempt::Dropped(why)) => {
                self.jobs.ack(&job.id, &self.id).await?;
                debug!(worker = %self.id, sale_id = %job.sale_id, why, "Invoice job dropped");
                Ok(JobOutcome::Dropped)
            }

            Err(err) if err.is_storage_error() => Err(err),

            Err(err) if err.is_retryable() => {
                let attempt = u32::try_from(job.attempts).unwrap_or(u32::MAX);
                let delay = self.policy.delay_for(attempt);
                let reason = err.to_string();

                match self.jobs.retry(&job.id, &self.id, delay, &reason).await? {
                    RetryOutcome::Scheduled {
                        attempts,
                        next_eligible_at,
                    } => {
                        warn!(
                            worker = %self.id,
                            sale_id = %job.sale_id,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %reason,
                            "Invoice attempt failed, retry scheduled"
                        );
                        Ok(JobOutcome::RetryScheduled {
                            attempts,
                            next_eligible_at,
                        })
                    }
                    RetryOutcome::Exhausted { attempts } => {
                        error!(
                            worker = %self.id,
                            sale_id = %job.sale_id,
                            attempts,
                            error = %reason,
                            "Invoice failed, attempt budget exhausted"
                        );
                        let reason = self
                            .db
                            .sales()
                            .get_by_id(&job.sale_id)
                            .await?
                            .and_then(|s| s.last_error)
                            .unwrap_or(reason);
                        Ok(JobOutcome::Failed { reason, attempts })
                    }
                }
            }

            Err(err) => {
                let reason = err.to_string();
                if err.needs_alert() {
                    error!(
                        alert = true,
                        worker = %self.id,
                        tenant_id = %job.tenant_id,
                        sale_id = %job.sale_id,
                        error = %reason,
                        "Signing certificate expired, invoicing halted for tenant"
                    );
                } else {
                    error!(
                        worker = %self.id,
                        sale_id = %job.sale_id,
                        attempt = job.attempts,
                        error = %reason,
                        "Invoice failed"
                    );
                }
                self.jobs.fail(&job.id, &self.id, &reason).await?;
                Ok(JobOutcome::Failed {
                    reason,
                    attempts: job.attempts,
                })
            }
        }
    }

    async fn attempt(&self, job: &InvoiceJob) -> BillingResult<Attempt> {
        let now = Utc::now();
        let sales = self.db.sales();

        // LEASED: always work from the current sale row
        let Some(sale) = sales.get_by_id(&job.sale_id).await? else {
            return Ok(Attempt::Dropped("sale no longer exists"));
        };
        if sale.status == SaleStatus::Voided {
            return Ok(Attempt::Dropped("sale voided"));
        }
        if sale.invoice_status != InvoiceStatus::Pending {
            return Ok(Attempt::Dropped("invoice no longer pending"));
        }

        let profile = self.usable_profile(&sale, now).await?;
        let items = sales.get_items(&sale.id).await?;
        validate_invoice(&sale, &items)?;

        // AUTHENTICATING
        let client = self.clients.get(&job.tenant_id).await?;
        let token = client.auth().get_valid_token().await?;
        if token.signature_expired_at(now) {
            return Err(BillingError::ExpiredSignature {
                tenant_id: job.tenant_id.clone(),
            });
        }

        if let ReconcileOutcome::AlreadyAuthorized {
            access_key,
            document_id,
        } = reconcile(&client, job, &sale).await?
        {
            return Ok(Attempt::Authorized {
                access_key,
                document_id,
                reconciled: true,
            });
        }

        // SUBMITTING
        self.submit(&client, job, &sale, &items, &profile).await
    }

    async fn usable_profile(&self, sale: &Sale, now: DateTime<Utc>) -> BillingResult<BillingProfile> {
        let profile = self
            .db
            .billing()
            .get_profile(&sale.tenant_id)
            .await?
            .filter(|p| p.signature_valid_at(now))
            .ok_or_else(|| BillingError::ExpiredSignature {
                tenant_id: sale.tenant_id.clone(),
            })?;
        validate_billing_profile(&profile)?;
        Ok(profile)
    }

    async fn submit(
        &self,
        client: &BillingApiClient,
        job: &InvoiceJob,
        sale: &Sale,
        items: &[kardex_core::SaleItem],
        profile: &BillingProfile,
    ) -> BillingResult<Attempt> {
        let generated = AccessKey::generate(sale, profile)?;
        let access_key = self.jobs.record_access_key(&job.id, generated.as_str()).await?;
        if access_key != generated.as_str() {
            warn!(
                sale_id = %sale.id,
                recorded = %access_key,
                generated = %generated,
                "Reusing access key recorded by an earlier attempt"
            );
        }

        let payload = InvoicePayload::build(sale, items, profile, &access_key);
        let receipt = client.submit_invoice(&payload).await?;

        Ok(Attempt::Authorized {
            access_key: receipt.access_key,
            document_id: receipt.document_id,
            reconciled: false,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{completed_sale, fake_clients, seed_tenant, setup, FakeProvider, Reply};
    use crate::transport::Route;
    use chrono::Duration as ChronoDuration;
    use kardex_db::repository::invoice_job::MAX_ATTEMPTS_EXCEEDED;
    use serde_json::json;

    const VISIBILITY: Duration = Duration::from_secs(60);

    fn worker(db: &Database, provider: Arc<FakeProvider>, policy: RetryPolicy) -> InvoiceWorker {
        let (_tx, rx) = watch::channel(false);
        InvoiceWorker::new(
            "test-worker",
            db.clone(),
            Arc::new(fake_clients(db, provider)),
            policy,
            WorkerSettings {
                poll_interval: Duration::from_millis(10),
                visibility_timeout: VISIBILITY,
            },
            rx,
        )
    }

    fn accepted(access_key: &str, document_id: &str) -> Reply {
        Reply::json(200, json!({"accessKey": access_key, "documentId": document_id}))
    }

    #[tokio::test]
    async fn test_success_authorizes_sale() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(Route::SubmitInvoice, vec![accepted("AK1", "D1")]);
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Authorized {
                access_key: "AK1".to_string(),
                document_id: "D1".to_string(),
                reconciled: false,
            }
        );
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Authorized);
        assert_eq!(stored.access_key.as_deref(), Some("AK1"));
        assert_eq!(stored.document_id.as_deref(), Some("D1"));
        assert_eq!(db.invoice_jobs().count_live().await.unwrap(), 0);

        // the locally computed key travels in the payload
        let sent = provider.requests(Route::SubmitInvoice);
        let key = sent[0].body.as_ref().unwrap()["accessKey"].as_str().unwrap().to_string();
        assert_eq!(key.len(), 49);
        assert_eq!(provider.calls(Route::InvoiceStatus), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none() {
        let db = setup().await;
        let w = worker(&db, FakeProvider::new(), RetryPolicy::default());
        assert!(w.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_error_schedules_retry_within_backoff() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(Route::SubmitInvoice, vec![Reply::status(503)]);
        let policy = RetryPolicy::default();
        let w = worker(&db, provider.clone(), policy.clone());

        let before = Utc::now();
        let outcome = w.run_once().await.unwrap().unwrap();
        let after = Utc::now();

        let JobOutcome::RetryScheduled {
            attempts,
            next_eligible_at,
        } = outcome
        else {
            panic!("expected retry, got {:?}", outcome);
        };
        assert_eq!(attempts, 1);

        let (low, high) = policy.bounds(1);
        let low = ChronoDuration::from_std(low).unwrap();
        let high = ChronoDuration::from_std(high).unwrap();
        assert!(next_eligible_at >= before + low - ChronoDuration::milliseconds(1));
        assert!(next_eligible_at <= after + high + ChronoDuration::milliseconds(1));

        let job = db.invoice_jobs().get_by_sale(&sale.id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert!(job.leased_by.is_none());
        assert!(job.last_error.unwrap().contains("503"));
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Pending);
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_budget() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(Route::SubmitInvoice, vec![Reply::Timeout]);
        // repeat attempts reconcile first; the provider never saw the invoice
        provider.script(Route::InvoiceStatus, vec![Reply::status(404)]);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        };
        let w = worker(&db, provider.clone(), policy);

        let mut outcomes = Vec::new();
        while let Some(outcome) = w.run_once().await.unwrap() {
            outcomes.push(outcome);
        }

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], JobOutcome::RetryScheduled { attempts: 1, .. }));
        assert!(matches!(outcomes[1], JobOutcome::RetryScheduled { attempts: 2, .. }));
        assert!(
            matches!(&outcomes[2], JobOutcome::Failed { reason, attempts: 3 } if reason.starts_with(MAX_ATTEMPTS_EXCEEDED))
        );

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Error);
        assert!(stored.last_error.unwrap().starts_with(MAX_ATTEMPTS_EXCEEDED));
        assert!(db.invoice_jobs().get_by_sale(&sale.id).await.unwrap().is_none());
        assert_eq!(provider.calls(Route::SubmitInvoice), 3);
    }

    #[tokio::test]
    async fn test_validation_error_fails_on_first_attempt() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(
            Route::SubmitInvoice,
            vec![Reply::json(400, json!({"message": "invalid buyer identification"}))],
        );
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let job_id = db.invoice_jobs().get_by_sale(&sale.id).await.unwrap().unwrap().id;
        let outcome = w.run_once().await.unwrap().unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Failed { ref reason, attempts: 1 } if reason.contains("invalid buyer")
        ));
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Error);
        assert!(stored.access_key.is_none());
        assert!(db.invoice_jobs().get(&job_id).await.unwrap().is_none());
        assert_eq!(provider.calls(Route::SubmitInvoice), 1);
    }

    #[tokio::test]
    async fn test_local_validation_skips_network() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        crate::testing::completed_sale_for(&db, "t1", "R-1", "12AB").await;
        let provider = FakeProvider::new();
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        assert_eq!(provider.calls(Route::Login), 0);
        assert_eq!(provider.calls(Route::SubmitInvoice), 0);
    }

    #[tokio::test]
    async fn test_expired_signature_is_terminal() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        db.billing()
            .update_signature_expiry("t1", Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap();
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { ref reason, .. } if reason.contains("expired")));
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Error);
        assert_eq!(provider.calls(Route::Login), 0);
    }

    #[tokio::test]
    async fn test_provider_reported_signature_expiry_is_terminal() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(
            Route::Login,
            vec![Reply::json(
                200,
                json!({"token": "tok", "signature_expires_at": "2020-01-01T00:00:00Z"}),
            )],
        );
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        assert_eq!(provider.calls(Route::SubmitInvoice), 0);
    }

    #[tokio::test]
    async fn test_authentication_failure_is_terminal() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(Route::Login, vec![Reply::status(403)]);
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { ref reason, .. } if reason.contains("authentication")));
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Error);
    }

    #[tokio::test]
    async fn test_crash_after_submit_reconciles_without_second_post() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let jobs = db.invoice_jobs();

        // attempt 1: a worker leased the job, recorded the key, posted, died;
        // a zero visibility timeout makes its lease already expired
        let crashed = jobs
            .lease("crashed-worker", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(crashed.attempts, 1);
        let recorded = jobs.record_access_key(&crashed.id, "AK1").await.unwrap();
        assert_eq!(recorded, "AK1");

        let provider = FakeProvider::new();
        provider.script(
            Route::InvoiceStatus,
            vec![Reply::json(200, json!({"status": "AUTHORIZED", "documentId": "D1"}))],
        );
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Authorized {
                access_key: "AK1".to_string(),
                document_id: "D1".to_string(),
                reconciled: true,
            }
        );
        assert_eq!(provider.calls(Route::SubmitInvoice), 0);
        assert_eq!(
            provider.requests(Route::InvoiceStatus)[0].segments,
            vec!["invoices", "AK1", "status"]
        );
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Authorized);
        assert_eq!(stored.document_id.as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn test_reissue_after_lost_response_reconciles() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        // the provider accepts the invoice but the reply never arrives
        provider.script(Route::SubmitInvoice, vec![Reply::Timeout]);
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let w = worker(&db, provider.clone(), policy);

        let outcome = w.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { attempts: 1, .. }));
        let sent_key = provider.requests(Route::SubmitInvoice)[0].body.as_ref().unwrap()["accessKey"]
            .as_str()
            .unwrap()
            .to_string();

        db.sales().reissue(&sale.id).await.unwrap();
        provider.script(
            Route::InvoiceStatus,
            vec![Reply::json(200, json!({"status": "AUTHORIZED", "documentId": "D1"}))],
        );

        let outcome = w.run_once().await.unwrap().unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Authorized {
                access_key: sent_key.clone(),
                document_id: "D1".to_string(),
                reconciled: true,
            }
        );
        assert_eq!(provider.calls(Route::SubmitInvoice), 1);
        assert_eq!(
            provider.requests(Route::InvoiceStatus)[0].segments,
            vec!["invoices".to_string(), sent_key, "status".to_string()]
        );
    }

    #[tokio::test]
    async fn test_lost_lease_records_nothing() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(Route::SubmitInvoice, vec![accepted("AK1", "D1")]);
        let w = worker(&db, provider.clone(), RetryPolicy::default());
        let jobs = db.invoice_jobs();

        // our lease expires while the attempt runs and another worker takes over
        let now = Utc::now();
        let ours = jobs.lease_at(w.id(), VISIBILITY, now).await.unwrap().unwrap();
        let takeover = now + ChronoDuration::seconds(61);
        jobs.lease_at("other-worker", VISIBILITY, takeover)
            .await
            .unwrap()
            .unwrap();

        let outcome = w.process(&ours).await.unwrap();

        assert_eq!(outcome, JobOutcome::LeaseLost);
        let held = jobs.get_by_sale(&sale.id).await.unwrap().unwrap();
        assert_eq!(held.leased_by.as_deref(), Some("other-worker"));
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Pending);
        assert!(stored.access_key.is_none());
    }

    #[tokio::test]
    async fn test_retry_reuses_recorded_key() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        completed_sale(&db, "t1", "R-1").await;
        let provider = FakeProvider::new();
        provider.script(
            Route::SubmitInvoice,
            vec![Reply::status(502), accepted("AK-FROM-PROVIDER", "D9")],
        );
        provider.script(Route::InvoiceStatus, vec![Reply::status(404)]);
        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let w = worker(&db, provider.clone(), policy);

        w.run_once().await.unwrap().unwrap();
        let outcome = w.run_once().await.unwrap().unwrap();

        assert!(matches!(outcome, JobOutcome::Authorized { reconciled: false, .. }));
        let sent = provider.requests(Route::SubmitInvoice);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body.as_ref().unwrap()["accessKey"], sent[1].body.as_ref().unwrap()["accessKey"]);
        assert_eq!(provider.calls(Route::InvoiceStatus), 1);
    }

    #[tokio::test]
    async fn test_non_pending_sale_is_dropped() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t1", "R-1").await;
        db.sales().mark_error(&sale.id, "manual").await.unwrap();
        let provider = FakeProvider::new();
        let w = worker(&db, provider.clone(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert_eq!(outcome, JobOutcome::Dropped);
        assert_eq!(db.invoice_jobs().count_live().await.unwrap(), 0);
        assert_eq!(provider.calls(Route::Login), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_sale() {
        let db = setup().await;
        seed_tenant(&db, "t1").await;
        let sale = completed_sale(&db, "t2", "R-1").await;
        crate::testing::seed_profile(&db, "t2").await;
        let w = worker(&db, FakeProvider::new(), RetryPolicy::default());

        let outcome = w.run_once().await.unwrap().unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Error);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let db = setup().await;
        let (tx, rx) = watch::channel(false);
        let w = InvoiceWorker::new(
            "w",
            db.clone(),
            Arc::new(fake_clients(&db, FakeProvider::new())),
            RetryPolicy::default(),
            WorkerSettings {
                poll_interval: Duration::from_secs(3600),
                visibility_timeout: VISIBILITY,
            },
            rx,
        );
        let handle = tokio::spawn(w.run());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
