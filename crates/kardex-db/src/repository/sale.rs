//! # Sale Repository
//!
//! Database operations for sales, sale items, and the invoice status writer.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE DRAFT                                                       │
//! │     └── insert_sale() + add_item()                                     │
//! │                                                                         │
//! │  2. COMPLETE                                                           │
//! │     └── complete_sale(id, electronic)                                  │
//! │         ┌─────────────── SINGLE TRANSACTION ──────────────────┐        │
//! │         │ UPDATE sales SET status = 'completed',              │        │
//! │         │   invoice_status = PENDING | NO_ELECTRONIC,         │        │
//! │         │   invoice_sequential = MAX + 1 (electronic only)    │        │
//! │         │ INSERT INTO invoice_jobs ... (electronic only)      │        │
//! │         └─────────────────────────────────────────────────────┘        │
//! │                                                                         │
//! │  3. INVOICE OUTCOME (pipeline only)                                    │
//! │     ├── mark_authorized() → AUTHORIZED + access_key + document_id      │
//! │     └── mark_error()      → ERROR + last_error                         │
//! │                                                                         │
//! │  4. (OPTIONAL) REISSUE / VOID                                          │
//! │     ├── reissue()   → ERROR back to PENDING, new job                   │
//! │     └── void_sale() → Voided, queued job withdrawn if not leased       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every invoice status write runs the matching guard from
//! [`kardex_core::invoice`] first and repeats the precondition in the
//! `WHERE` clause.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::invoice_job;
use kardex_core::invoice::{ensure_can_authorize, ensure_can_fail, ensure_can_reissue};
use kardex_core::{CoreError, InvoiceStatus, Sale, SaleItem};

pub(crate) const SALE_COLUMNS: &str = "id, tenant_id, receipt_number, status, \
     subtotal_cents, tax_cents, discount_cents, total_cents, \
     customer_tax_id, customer_name, \
     invoice_status, invoice_sequential, access_key, document_id, last_error, \
     created_at, updated_at, completed_at";

const ITEM_COLUMNS: &str = "id, sale_id, product_id, sku_snapshot, name_snapshot, \
     unit_price_cents, quantity, line_total_cents, tax_rate_bps, tax_cents, \
     discount_cents, created_at";

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sale(&mut conn, id).await
    }

    /// Inserts a sale row as given.
    pub async fn insert_sale(&self, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, receipt_number = %sale.receipt_number, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, tenant_id, receipt_number, status,
                subtotal_cents, tax_cents, discount_cents, total_cents,
                customer_tax_id, customer_name,
                invoice_status, invoice_sequential, access_key, document_id, last_error,
                created_at, updated_at, completed_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7, ?8,
                ?9, ?10,
                ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18
            )
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.tenant_id)
        .bind(&sale.receipt_number)
        .bind(sale.status)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.discount_cents)
        .bind(sale.total_cents)
        .bind(&sale.customer_tax_id)
        .bind(&sale.customer_name)
        .bind(sale.invoice_status)
        .bind(sale.invoice_sequential)
        .bind(&sale.access_key)
        .bind(&sale.document_id)
        .bind(&sale.last_error)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Adds an item to a sale.
    ///
    /// Product details are snapshotted on the item, so the invoice reflects
    /// the sale even if the catalog changes afterwards.
    pub async fn add_item(&self, item: &SaleItem) -> DbResult<()> {
        debug!(sale_id = %item.sale_id, product_id = %item.product_id, "Adding sale item");

        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id,
                sku_snapshot, name_snapshot, unit_price_cents,
                quantity, line_total_cents, tax_rate_bps, tax_cents, discount_cents,
                created_at
            ) VALUES (
                ?1, ?2, ?3,
                ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11,
                ?12
            )
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.sku_snapshot)
        .bind(&item.name_snapshot)
        .bind(item.unit_price_cents)
        .bind(item.quantity)
        .bind(item.line_total_cents)
        .bind(item.tax_rate_bps)
        .bind(item.tax_cents)
        .bind(item.discount_cents)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets all items for a sale, in insertion order.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!(
            "SELECT {} FROM sale_items WHERE sale_id = ?1 ORDER BY created_at, rowid",
            ITEM_COLUMNS
        );
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Completes a draft sale and, when `electronic`, queues its invoice.
    ///
    /// The sale update, sequential assignment and job insert commit together:
    /// a completed electronic sale always has a live job, and a rolled-back
    /// sale never has one. `electronic = false` records NO_ELECTRONIC, which
    /// the pipeline never touches.
    pub async fn complete_sale(&self, sale_id: &str, electronic: bool) -> DbResult<Sale> {
        let now = Utc::now();
        let invoice_status = if electronic {
            InvoiceStatus::Pending
        } else {
            InvoiceStatus::NoElectronic
        };

        let mut tx = self.pool.begin().await?;

        // The sequential is computed inside the UPDATE so the write lock covers it
        let result = sqlx::query(
            r#"
            UPDATE sales SET
                status = 'completed',
                completed_at = ?2,
                updated_at = ?2,
                invoice_status = ?3,
                invoice_sequential = CASE WHEN ?4 THEN (
                    SELECT COALESCE(MAX(s.invoice_sequential), 0) + 1
                    FROM sales s
                    WHERE s.tenant_id = sales.tenant_id
                ) ELSE NULL END
            WHERE id = ?1 AND status = 'draft'
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .bind(invoice_status)
        .bind(electronic)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale (draft)", sale_id));
        }

        let sale = fetch_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?;

        if electronic {
            invoice_job::insert_job(&mut tx, &sale.tenant_id, sale_id, None, now).await?;
        }

        tx.commit().await?;

        info!(
            sale_id = %sale_id,
            invoice_status = %sale.invoice_status,
            invoice_sequential = ?sale.invoice_sequential,
            "Sale completed"
        );

        Ok(sale)
    }

    /// Voids a sale and withdraws its queued invoice job if no worker holds it.
    ///
    /// ## Returns
    /// `true` if a queued job was withdrawn.
    pub async fn void_sale(&self, sale_id: &str) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                status = 'voided',
                updated_at = ?2
            WHERE id = ?1 AND status IN ('draft', 'completed')
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", sale_id));
        }

        let withdrawn = invoice_job::delete_unleased(&mut tx, sale_id, now).await?;
        tx.commit().await?;

        info!(sale_id = %sale_id, withdrawn, "Sale voided");
        Ok(withdrawn)
    }

    /// Records a successful authorization: PENDING → AUTHORIZED.
    ///
    /// `access_key` and `document_id` are written together and only once.
    pub async fn mark_authorized(
        &self,
        sale_id: &str,
        access_key: &str,
        document_id: &str,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        authorize_in(&mut tx, sale_id, access_key, document_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Records a terminal failure: PENDING → ERROR with the reason.
    pub async fn mark_error(&self, sale_id: &str, reason: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        fail_in(&mut tx, sale_id, reason, None, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Manual re-issue: ERROR → PENDING, clears `last_error` and enqueues.
    ///
    /// This is the only way out of ERROR. The new job carries the access key
    /// of the failed submission, if any, so the provider is asked about it
    /// before anything is sent again.
    pub async fn reissue(&self, sale_id: &str) -> DbResult<Sale> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let sale = fetch_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?;
        ensure_can_reissue(&sale)?;

        let submitted_key: Option<String> =
            sqlx::query_scalar("SELECT submitted_access_key FROM sales WHERE id = ?1")
                .bind(sale_id)
                .fetch_one(&mut *tx)
                .await?;

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                invoice_status = 'PENDING',
                last_error = NULL,
                updated_at = ?2
            WHERE id = ?1 AND invoice_status = 'ERROR'
            "#,
        )
        .bind(sale_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        ensure_one_row(result.rows_affected(), sale_id)?;

        invoice_job::insert_job(
            &mut tx,
            &sale.tenant_id,
            sale_id,
            submitted_key.as_deref(),
            now,
        )
        .await?;

        let sale = fetch_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?;
        tx.commit().await?;

        info!(
            sale_id = %sale_id,
            carried_key = ?submitted_key,
            "Invoice re-issue queued"
        );
        Ok(sale)
    }

    /// Counts a tenant's sales in the given invoice status.
    pub async fn count_by_invoice_status(
        &self,
        tenant_id: &str,
        status: InvoiceStatus,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sales WHERE tenant_id = ?1 AND invoice_status = ?2 AND status = 'completed'",
        )
        .bind(tenant_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Shared Statements
// =============================================================================
// Used by both repositories so a queue operation and its sale write can share
// one transaction.

pub(crate) async fn fetch_sale(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
    let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
    let sale = sqlx::query_as::<_, Sale>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(sale)
}

pub(crate) async fn authorize_in(
    conn: &mut SqliteConnection,
    sale_id: &str,
    access_key: &str,
    document_id: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let sale = fetch_sale(&mut *conn, sale_id)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", sale_id))?;
    ensure_can_authorize(&sale)?;

    let result = sqlx::query(
        r#"
        UPDATE sales SET
            invoice_status = 'AUTHORIZED',
            access_key = ?2,
            document_id = ?3,
            last_error = NULL,
            updated_at = ?4
        WHERE id = ?1
          AND invoice_status = 'PENDING'
          AND access_key IS NULL
          AND document_id IS NULL
        "#,
    )
    .bind(sale_id)
    .bind(access_key)
    .bind(document_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    ensure_one_row(result.rows_affected(), sale_id)?;

    info!(sale_id = %sale_id, access_key = %access_key, document_id = %document_id, "Invoice authorized");
    Ok(())
}

/// PENDING → ERROR. `submitted_key` is the access key the failed job sent,
/// kept for a later re-issue.
pub(crate) async fn fail_in(
    conn: &mut SqliteConnection,
    sale_id: &str,
    reason: &str,
    submitted_key: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let sale = fetch_sale(&mut *conn, sale_id)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", sale_id))?;
    ensure_can_fail(&sale)?;

    let result = sqlx::query(
        r#"
        UPDATE sales SET
            invoice_status = 'ERROR',
            last_error = ?2,
            submitted_access_key = COALESCE(?4, submitted_access_key),
            updated_at = ?3
        WHERE id = ?1 AND invoice_status = 'PENDING'
        "#,
    )
    .bind(sale_id)
    .bind(reason)
    .bind(now)
    .bind(submitted_key)
    .execute(&mut *conn)
    .await?;
    ensure_one_row(result.rows_affected(), sale_id)?;

    warn!(sale_id = %sale_id, reason = %reason, "Invoice marked ERROR");
    Ok(())
}

/// The guard passed but the conditional UPDATE matched nothing: another
/// writer changed the row in between.
fn ensure_one_row(rows: u64, sale_id: &str) -> DbResult<()> {
    if rows == 1 {
        Ok(())
    } else {
        Err(CoreError::InvalidSaleStatus {
            sale_id: sale_id.to_string(),
            current_status: "changed concurrently".to_string(),
        }
        .into())
    }
}

// =============================================================================
// Test Fixtures
// =============================================================================


// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::fixtures::draft_sale;
    use super::*;
    use crate::{Database, DbConfig};
    use kardex_core::SaleStatus;

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_complete_electronic_sale_enqueues() {
        let db = setup().await;
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;

        let completed = db.sales().complete_sale(&sale.id, true).await.unwrap();
        assert_eq!(completed.status, SaleStatus::Completed);
        assert_eq!(completed.invoice_status, InvoiceStatus::Pending);
        assert_eq!(completed.invoice_sequential, Some(1));
        assert!(completed.completed_at.is_some());

        let job = db.invoice_jobs().get_by_sale(&sale.id).await.unwrap();
        assert!(job.is_some());
        assert_eq!(db.sales().get_items(&sale.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sequentials_are_per_tenant() {
        let db = setup().await;
        let a = draft_sale(&db.sales(), "t1", "R-1").await;
        let b = draft_sale(&db.sales(), "t1", "R-2").await;
        let c = draft_sale(&db.sales(), "t2", "R-3").await;

        let a = db.sales().complete_sale(&a.id, true).await.unwrap();
        let b = db.sales().complete_sale(&b.id, true).await.unwrap();
        let c = db.sales().complete_sale(&c.id, true).await.unwrap();

        assert_eq!(a.invoice_sequential, Some(1));
        assert_eq!(b.invoice_sequential, Some(2));
        assert_eq!(c.invoice_sequential, Some(1));
    }

    #[tokio::test]
    async fn test_no_electronic_sale_is_not_queued() {
        let db = setup().await;
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;

        let completed = db.sales().complete_sale(&sale.id, false).await.unwrap();
        assert_eq!(completed.invoice_status, InvoiceStatus::NoElectronic);
        assert_eq!(completed.invoice_sequential, None);
        assert!(db.invoice_jobs().get_by_sale(&sale.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_twice_fails() {
        let db = setup().await;
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();

        let err = db.sales().complete_sale(&sale.id, true).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        assert_eq!(db.invoice_jobs().count_live().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_authorized_sets_identifiers_once() {
        let db = setup().await;
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();

        db.sales().mark_authorized(&sale.id, "AK1", "D1").await.unwrap();
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Authorized);
        assert_eq!(stored.access_key.as_deref(), Some("AK1"));
        assert_eq!(stored.document_id.as_deref(), Some("D1"));

        let err = db.sales().mark_authorized(&sale.id, "AK2", "D2").await.unwrap_err();
        assert!(matches!(err, DbError::Invariant(_)));

        // a late failure cannot overwrite a success
        let err = db.sales().mark_error(&sale.id, "late").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Invariant(CoreError::InvalidInvoiceTransition { .. })
        ));
        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.access_key.as_deref(), Some("AK1"));
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn test_error_then_reissue() {
        let db = setup().await;
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();
        let job = db
            .invoice_jobs()
            .lease("w", std::time::Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        db.invoice_jobs().fail(&job.id, "w", "rejected").await.unwrap();

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.invoice_status, InvoiceStatus::Error);
        assert_eq!(stored.last_error.as_deref(), Some("rejected"));

        // ERROR never goes straight to AUTHORIZED
        assert!(db.sales().mark_authorized(&sale.id, "AK1", "D1").await.is_err());

        let reissued = db.sales().reissue(&sale.id).await.unwrap();
        assert_eq!(reissued.invoice_status, InvoiceStatus::Pending);
        assert!(reissued.last_error.is_none());
        assert_eq!(reissued.invoice_sequential, Some(1));
        let fresh = db.invoice_jobs().get_by_sale(&sale.id).await.unwrap().unwrap();
        // nothing was ever submitted, so there is no key to carry
        assert!(fresh.access_key.is_none());
    }

    #[tokio::test]
    async fn test_reissue_requires_error() {
        let db = setup().await;
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();

        let err = db.sales().reissue(&sale.id).await.unwrap_err();
        assert!(matches!(err, DbError::Invariant(_)));
    }

    #[tokio::test]
    async fn test_void_withdraws_unleased_job() {
        let db = setup().await;
        let sale = draft_sale(&db.sales(), "t1", "R-1").await;
        db.sales().complete_sale(&sale.id, true).await.unwrap();

        assert!(db.sales().void_sale(&sale.id).await.unwrap());
        assert_eq!(db.invoice_jobs().count_live().await.unwrap(), 0);

        let stored = db.sales().get_by_id(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SaleStatus::Voided);
    }

    #[tokio::test]
    async fn test_count_by_invoice_status() {
        let db = setup().await;
        let a = draft_sale(&db.sales(), "t1", "R-1").await;
        let b = draft_sale(&db.sales(), "t1", "R-2").await;
        db.sales().complete_sale(&a.id, true).await.unwrap();
        db.sales().complete_sale(&b.id, false).await.unwrap();

        let pending = db
            .sales()
            .count_by_invoice_status("t1", InvoiceStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending, 1);
    }
}
