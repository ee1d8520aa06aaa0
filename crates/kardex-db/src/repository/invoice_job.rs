//! # Invoice Job Repository
//!
//! The durable issuance queue. One row per sale waiting for an electronic
//! invoice, leased by workers with a visibility timeout.
//!
//! ## Job Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Invoice Job Lifecycle                                │
//! │                                                                         │
//! │  complete_sale / reissue / enqueue                                     │
//! │       │  INSERT ... ON CONFLICT(sale_id) DO NOTHING                    │
//! │       ▼                                                                 │
//! │  ┌──────────┐  lease(): attempts += 1,      ┌──────────┐               │
//! │  │  QUEUED  │──────────────────────────────►│  LEASED  │               │
//! │  │          │  leased_until = now + timeout │          │               │
//! │  └──────────┘                               └────┬─────┘               │
//! │       ▲                                          │                      │
//! │       │ retry(): next_eligible_at = now + delay  │                      │
//! │       ├──────────────────────────────────────────┤                      │
//! │       │ lease expired (worker crashed)           │                      │
//! │       └──────────────────────────────────────────┤                      │
//! │                                                  │                      │
//! │        complete() / fail() / ack() / exhausted   ▼                      │
//! │                                            ┌──────────┐                │
//! │                                            │ DELETED  │                │
//! │                                            └──────────┘                │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • UNIQUE(sale_id): at most one live job per sale                      │
//! │  • lease is a single UPDATE ... RETURNING: one winner per job          │
//! │  • attempts counts leases, so a crash mid-attempt still counts         │
//! │  • ack/complete/fail/retry only act for the current lease holder      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::sale::{authorize_in, fail_in};
use kardex_core::InvoiceJob;

/// Default attempt budget per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reason recorded on the sale when the attempt budget runs out.
pub const MAX_ATTEMPTS_EXCEEDED: &str = "max attempts exceeded";

const JOB_COLUMNS: &str = "id, tenant_id, sale_id, attempts, next_eligible_at, \
     leased_by, leased_until, last_error, access_key, enqueued_at, updated_at";

/// What `retry` did with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The job goes back to the queue.
    Scheduled {
        attempts: i64,
        next_eligible_at: DateTime<Utc>,
    },
    /// The attempt budget is spent: job deleted, sale moved to ERROR.
    Exhausted { attempts: i64 },
}

/// Repository for invoice queue operations.
#[derive(Debug, Clone)]
pub struct InvoiceJobRepository {
    pool: SqlitePool,
    max_attempts: u32,
}

impl InvoiceJobRepository {
    /// Creates a queue with the default attempt budget.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceJobRepository {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the attempt budget used by [`retry`](Self::retry).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Queues an invoice for `sale_id`.
    ///
    /// ## Returns
    /// `false` when a live job already exists for the sale (no-op).
    pub async fn enqueue(&self, tenant_id: &str, sale_id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        insert_job(&mut conn, tenant_id, sale_id, None, Utc::now()).await
    }

    /// Gets a job by ID.
    pub async fn get(&self, job_id: &str) -> DbResult<Option<InvoiceJob>> {
        let mut conn = self.pool.acquire().await?;
        fetch_job(&mut conn, job_id).await
    }

    /// Gets the live job for a sale, if any.
    pub async fn get_by_sale(&self, sale_id: &str) -> DbResult<Option<InvoiceJob>> {
        let sql = format!("SELECT {} FROM invoice_jobs WHERE sale_id = ?1", JOB_COLUMNS);
        let job = sqlx::query_as::<_, InvoiceJob>(&sql)
            .bind(sale_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Claims the oldest due job for `worker_id` until `visibility_timeout`
    /// elapses.
    pub async fn lease(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> DbResult<Option<InvoiceJob>> {
        self.lease_at(worker_id, visibility_timeout, Utc::now()).await
    }

    /// [`lease`](Self::lease) with an explicit clock.
    ///
    /// A job is due when `next_eligible_at <= now` and it is not under an
    /// unexpired lease. Claiming increments `attempts`.
    pub async fn lease_at(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<Option<InvoiceJob>> {
        let leased_until = now + to_chrono(visibility_timeout)?;

        let sql = format!(
            r#"
            UPDATE invoice_jobs SET
                attempts = attempts + 1,
                leased_by = ?1,
                leased_until = ?2,
                updated_at = ?3
            WHERE id = (
                SELECT id FROM invoice_jobs
                WHERE next_eligible_at <= ?3
                  AND (leased_until IS NULL OR leased_until <= ?3)
                ORDER BY next_eligible_at, enqueued_at
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let job = sqlx::query_as::<_, InvoiceJob>(&sql)
            .bind(worker_id)
            .bind(leased_until)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(job) = &job {
            debug!(
                job_id = %job.id,
                sale_id = %job.sale_id,
                attempt = job.attempts,
                worker = %worker_id,
                "Job leased"
            );
        }

        Ok(job)
    }

    /// Records the access key a submission is about to use.
    ///
    /// The first recorded key wins; the effective key is returned.
    pub async fn record_access_key(&self, job_id: &str, access_key: &str) -> DbResult<String> {
        let stored: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE invoice_jobs SET
                access_key = COALESCE(access_key, ?2),
                updated_at = ?3
            WHERE id = ?1
            RETURNING access_key
            "#,
        )
        .bind(job_id)
        .bind(access_key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        stored.ok_or_else(|| DbError::not_found("InvoiceJob", job_id))
    }

    /// Deletes a job held by `worker_id` without touching its sale.
    ///
    /// A job that is already gone counts as acknowledged.
    pub async fn ack(&self, job_id: &str, worker_id: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        if let Err(err) = delete_owned(&mut conn, job_id, worker_id).await {
            let gone = matches!(err, DbError::LeaseLost { .. })
                && fetch_job(&mut conn, job_id).await?.is_none();
            if !gone {
                return Err(err);
            }
        }

        debug!(job_id = %job_id, worker = %worker_id, "Job acknowledged");
        Ok(())
    }

    /// Terminal success: marks the sale AUTHORIZED and deletes the job in one
    /// transaction.
    ///
    /// ## Errors
    /// `LeaseLost` when another worker leased the job in the meantime; nothing
    /// is written.
    pub async fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        access_key: &str,
        document_id: &str,
    ) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let job = fetch_owned(&mut tx, job_id, worker_id).await?;
        authorize_in(&mut tx, &job.sale_id, access_key, document_id, now).await?;
        delete_owned(&mut tx, job_id, worker_id).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Terminal failure: marks the sale ERROR with `reason` and deletes the
    /// job in one transaction.
    pub async fn fail(&self, job_id: &str, worker_id: &str, reason: &str) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let job = fetch_owned(&mut tx, job_id, worker_id).await?;
        terminal_failure(&mut tx, &job, worker_id, reason, now).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Puts a leased job back with a delay, or fails it when the attempt
    /// budget is spent.
    pub async fn retry(
        &self,
        job_id: &str,
        worker_id: &str,
        delay: Duration,
        reason: &str,
    ) -> DbResult<RetryOutcome> {
        self.retry_at(job_id, worker_id, delay, reason, Utc::now()).await
    }

    /// [`retry`](Self::retry) with an explicit clock.
    pub async fn retry_at(
        &self,
        job_id: &str,
        worker_id: &str,
        delay: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<RetryOutcome> {
        let mut tx = self.pool.begin().await?;

        let job = fetch_owned(&mut tx, job_id, worker_id).await?;

        if job.attempts >= i64::from(self.max_attempts) {
            let final_reason = format!("{} (last error: {})", MAX_ATTEMPTS_EXCEEDED, reason);
            terminal_failure(&mut tx, &job, worker_id, &final_reason, now).await?;
            tx.commit().await?;

            warn!(
                job_id = %job.id,
                sale_id = %job.sale_id,
                attempts = job.attempts,
                "Attempt budget exhausted"
            );
            return Ok(RetryOutcome::Exhausted {
                attempts: job.attempts,
            });
        }

        let next_eligible_at = now + to_chrono(delay)?;
        let result = sqlx::query(
            r#"
            UPDATE invoice_jobs SET
                next_eligible_at = ?2,
                last_error = ?3,
                leased_by = NULL,
                leased_until = NULL,
                updated_at = ?4
            WHERE id = ?1 AND leased_by = ?5
            "#,
        )
        .bind(job_id)
        .bind(next_eligible_at)
        .bind(reason)
        .bind(now)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::lease_lost(job_id, worker_id));
        }

        tx.commit().await?;

        Ok(RetryOutcome::Scheduled {
            attempts: job.attempts,
            next_eligible_at,
        })
    }

    /// Deletes the job for a voided sale unless a worker currently holds it.
    pub async fn withdraw(&self, sale_id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        delete_unleased(&mut conn, sale_id, Utc::now()).await
    }

    /// Counts all live jobs.
    pub async fn count_live(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoice_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Counts jobs a worker could lease right now.
    pub async fn count_due(&self) -> DbResult<i64> {
        let now = Utc::now();
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM invoice_jobs
            WHERE next_eligible_at <= ?1
              AND (leased_until IS NULL OR leased_until <= ?1)
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

// =============================================================================
// Shared Statements
// =============================================================================

/// Inserts a job unless one is live for the sale. `access_key` pre-records
/// the key of an earlier submission, so the first lease reconciles.
pub(crate) async fn insert_job(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    sale_id: &str,
    access_key: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO invoice_jobs (
            id, tenant_id, sale_id, attempts, access_key,
            next_eligible_at, enqueued_at, updated_at
        ) VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5, ?5)
        ON CONFLICT (sale_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tenant_id)
    .bind(sale_id)
    .bind(access_key)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let created = result.rows_affected() == 1;
    if created {
        info!(tenant_id = %tenant_id, sale_id = %sale_id, "Invoice job enqueued");
    } else {
        debug!(sale_id = %sale_id, "Invoice job already live, enqueue skipped");
    }
    Ok(created)
}

pub(crate) async fn delete_unleased(
    conn: &mut SqliteConnection,
    sale_id: &str,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM invoice_jobs
        WHERE sale_id = ?1
          AND (leased_until IS NULL OR leased_until <= ?2)
        "#,
    )
    .bind(sale_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn fetch_job(conn: &mut SqliteConnection, job_id: &str) -> DbResult<Option<InvoiceJob>> {
    let sql = format!("SELECT {} FROM invoice_jobs WHERE id = ?1", JOB_COLUMNS);
    let job = sqlx::query_as::<_, InvoiceJob>(&sql)
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(job)
}

/// Loads a job and checks that `worker_id` still holds its lease.
async fn fetch_owned(
    conn: &mut SqliteConnection,
    job_id: &str,
    worker_id: &str,
) -> DbResult<InvoiceJob> {
    let job = fetch_job(&mut *conn, job_id)
        .await?
        .ok_or_else(|| DbError::not_found("InvoiceJob", job_id))?;
    if job.leased_by.as_deref() != Some(worker_id) {
        warn!(
            job_id = %job_id,
            worker = %worker_id,
            holder = ?job.leased_by,
            "Lease lost, outcome not recorded"
        );
        return Err(DbError::lease_lost(job_id, worker_id));
    }
    Ok(job)
}

async fn delete_owned(conn: &mut SqliteConnection, job_id: &str, worker_id: &str) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM invoice_jobs WHERE id = ?1 AND leased_by = ?2")
        .bind(job_id)
        .bind(worker_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::lease_lost(job_id, worker_id));
    }
    Ok(())
}

/// Sale → ERROR, then delete the job. A sale that already left PENDING keeps
/// its status; the job is dropped either way. The key the job submitted with
/// stays on the sale for a later re-issue.
async fn terminal_failure(
    conn: &mut SqliteConnection,
    job: &InvoiceJob,
    worker_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    match fail_in(&mut *conn, &job.sale_id, reason, job.access_key.as_deref(), now).await {
        Ok(()) => {}
        Err(DbError::Invariant(err)) => {
            warn!(sale_id = %job.sale_id, error = %err, "Sale left PENDING before failure was recorded");
        }
        Err(err) => return Err(err),
    }
    delete_owned(&mut *conn, &job.id, worker_id).await
}

fn to_chrono(duration: Duration) -> DbResult<chrono::Duration> {
    chrono::Duration::from_std(duration).map_err(|e| DbError::Internal(e.to_string()))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sale::fixtures::draft_sale;
    use crate::{Database, DbConfig};
    use kardex_core::InvoiceStatus;

    const VISIBILITY: Duration = Duration::from_secs(60);

    async fn setup() -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        (db, sale.id)
    }

    #[tokio::test]
    async fn test_double_enqueue_keeps_one_job() {
        let (db, sale_id) = setup().await;
        let jobs = db.invoice_jobs();

        assert!(jobs.enqueue("t1", &sale_id).await.unwrap());
        assert!(!jobs.enqueue("t1", &sale_id).await.unwrap());
        assert_eq!(jobs.count_live().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_lease_before_expiry_returns_none() {
        let (db, sale_id) = setup().await;
        let jobs = db.invoice_jobs();
        jobs.enqueue("t1", &sale_id).await.unwrap();

        let first = jobs.lease("worker-a", VISIBILITY).await.unwrap().unwrap();
        assert_eq!(first.attempts, 1);
        assert_eq!(first.leased_by.as_deref(), Some("worker-a"));

        assert!(jobs.lease("worker-b", VISIBILITY).await.unwrap().is_none());
        assert_eq!(jobs.count_due().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let (db, sale_id) = setup().await;
        let jobs = db.invoice_jobs();
        jobs.enqueue("t1", &sale_id).await.unwrap();

        let now = Utc::now();
        jobs.lease_at("worker-a", VISIBILITY, now).await.unwrap().unwrap();

        let later = now + chrono::Duration::seconds(61);
        let job = jobs.lease_at("worker-b", VISIBILITY, later).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert!(job.is_repeat_attempt());
        assert_eq!(job.leased_by.as_deref(), Some("worker-b"));
    }

    #[tokio::test]
    async fn test_retry_schedules_and_releases() {
        let (db, sale_id) = setup().await;
        let jobs = db.invoice_jobs();
        jobs.enqueue("t1", &sale_id).await.unwrap();
        let job = jobs.lease("worker-a", VISIBILITY).await.unwrap().unwrap();

        let now = Utc::now();
        let outcome = jobs
            .retry_at(&job.id, "worker-a", Duration::from_secs(4), "provider 503", now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RetryOutcome::Scheduled {
                attempts: 1,
                next_eligible_at: now + chrono::Duration::seconds(4),
            }
        );

        let stored = jobs.get(&job.id).await.unwrap().unwrap();
        assert!(stored.leased_by.is_none());
        assert_eq!(stored.last_error.as_deref(), Some("provider 503"));

        // not due until the delay passes
        assert!(jobs.lease_at("w", VISIBILITY, now).await.unwrap().is_none());
        let again = jobs
            .lease_at("w", VISIBILITY, now + chrono::Duration::seconds(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();
        let jobs = db.invoice_jobs().with_max_attempts(2);

        let mut now = Utc::now();
        for _ in 0..2 {
            let job = jobs.lease_at("w", VISIBILITY, now).await.unwrap().unwrap();
            let outcome = jobs
                .retry_at(&job.id, "w", Duration::from_millis(10), "timeout", now)
                .await
                .unwrap();
            if job.attempts < 2 {
                assert!(matches!(outcome, RetryOutcome::Scheduled { .. }));
            } else {
                assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 2 });
            }
            now += chrono::Duration::seconds(1);
        }

        assert_eq!(jobs.count_live().await.unwrap(), 0);
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Error);
        assert!(stored
            .last_error
            .unwrap()
            .starts_with(MAX_ATTEMPTS_EXCEEDED));
    }

    #[tokio::test]
    async fn test_withdraw_respects_lease() {
        let (db, sale_id) = setup().await;
        let jobs = db.invoice_jobs();
        jobs.enqueue("t1", &sale_id).await.unwrap();
        jobs.lease("worker-a", VISIBILITY).await.unwrap().unwrap();

        assert!(!jobs.withdraw(&sale_id).await.unwrap());
        assert_eq!(jobs.count_live().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_access_key_keeps_first() {
        let (db, sale_id) = setup().await;
        let jobs = db.invoice_jobs();
        jobs.enqueue("t1", &sale_id).await.unwrap();
        let job = jobs.lease("w", VISIBILITY).await.unwrap().unwrap();

        assert_eq!(jobs.record_access_key(&job.id, "AK1").await.unwrap(), "AK1");
        assert_eq!(jobs.record_access_key(&job.id, "AK2").await.unwrap(), "AK1");
        assert!(jobs.record_access_key("missing", "AK3").await.is_err());
    }

    #[tokio::test]
    async fn test_complete_authorizes_and_deletes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();
        let jobs = db.invoice_jobs();
        let job = jobs.lease("w", VISIBILITY).await.unwrap().unwrap();

        jobs.complete(&job.id, "w", "AK1", "D1").await.unwrap();

        assert!(jobs.get(&job.id).await.unwrap().is_none());
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Authorized);
        assert_eq!(stored.access_key.as_deref(), Some("AK1"));
        assert_eq!(stored.document_id.as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn test_fail_after_authorization_keeps_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();
        db.sales().mark_authorized(&sale.id, "AK1", "D1").await.unwrap();

        let jobs = db.invoice_jobs();
        let job = jobs.lease("w", VISIBILITY).await.unwrap().unwrap();
        jobs.fail(&job.id, "w", "late failure").await.unwrap();

        assert_eq!(jobs.count_live().await.unwrap(), 0);
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Authorized);
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_new_lease() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();
        let jobs = db.invoice_jobs();

        let now = Utc::now();
        let stale = jobs.lease_at("worker-a", VISIBILITY, now).await.unwrap().unwrap();
        let later = now + chrono::Duration::seconds(61);
        jobs.lease_at("worker-b", VISIBILITY, later).await.unwrap().unwrap();

        let err = jobs
            .retry_at(&stale.id, "worker-a", Duration::ZERO, "late timeout", later)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::LeaseLost { ref worker_id, .. } if worker_id == "worker-a"));
        assert!(matches!(
            jobs.complete(&stale.id, "worker-a", "AK1", "D1").await,
            Err(DbError::LeaseLost { .. })
        ));
        assert!(matches!(
            jobs.fail(&stale.id, "worker-a", "late").await,
            Err(DbError::LeaseLost { .. })
        ));
        assert!(matches!(
            jobs.ack(&stale.id, "worker-a").await,
            Err(DbError::LeaseLost { .. })
        ));

        // worker-b still holds the job, nobody else can take it
        let held = jobs.get(&stale.id).await.unwrap().unwrap();
        assert_eq!(held.leased_by.as_deref(), Some("worker-b"));
        assert!(held.last_error.is_none());
        let third = later + chrono::Duration::seconds(1);
        assert!(jobs.lease_at("worker-c", VISIBILITY, third).await.unwrap().is_none());

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Pending);

        // the real holder records its outcome normally
        jobs.complete(&stale.id, "worker-b", "AK1", "D1").await.unwrap();
        assert_eq!(jobs.count_live().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ack_of_missing_job_is_ok() {
        let (db, _) = setup().await;
        db.invoice_jobs().ack("missing", "w").await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_job_leaves_key_for_reissue() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();
        let jobs = db.invoice_jobs().with_max_attempts(1);

        let job = jobs.lease("w", VISIBILITY).await.unwrap().unwrap();
        jobs.record_access_key(&job.id, "AK1").await.unwrap();
        let outcome = jobs.retry(&job.id, "w", Duration::ZERO, "timeout").await.unwrap();
        assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 1 });

        db.sales().reissue(&sale.id).await.unwrap();

        let fresh = jobs.get_by_sale(&sale.id).await.unwrap().unwrap();
        assert_ne!(fresh.id, job.id);
        assert_eq!(fresh.attempts, 0);
        assert_eq!(fresh.access_key.as_deref(), Some("AK1"));
    }
}
