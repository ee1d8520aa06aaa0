//! # Billing Repository
//!
//! Per-tenant provider credentials (the credential store) and issuer billing
//! profiles. The invoicing pipeline only reads credentials; they are written
//! by the daemon at startup or by tenant administration.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use kardex_core::{BillingCredentials, BillingProfile};

/// Repository for billing credentials and profiles.
#[derive(Debug, Clone)]
pub struct BillingRepository {
    pool: SqlitePool,
}

impl BillingRepository {
    /// Creates a new BillingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BillingRepository { pool }
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Loads the provider login for a tenant.
    pub async fn get_credentials(&self, tenant_id: &str) -> DbResult<Option<BillingCredentials>> {
        let creds = sqlx::query_as::<_, BillingCredentials>(
            r#"
            SELECT tenant_id, base_url, email, password
            FROM billing_credentials
            WHERE tenant_id = ?1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(creds)
    }

    /// Inserts or replaces the provider login for a tenant.
    pub async fn upsert_credentials(&self, creds: &BillingCredentials) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_credentials (tenant_id, base_url, email, password, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (tenant_id) DO UPDATE SET
                base_url = excluded.base_url,
                email = excluded.email,
                password = excluded.password,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&creds.tenant_id)
        .bind(&creds.base_url)
        .bind(&creds.email)
        .bind(&creds.password)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(tenant_id = %creds.tenant_id, base_url = %creds.base_url, "Billing credentials stored");
        Ok(())
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    /// Loads the issuer profile for a tenant.
    pub async fn get_profile(&self, tenant_id: &str) -> DbResult<Option<BillingProfile>> {
        let profile = sqlx::query_as::<_, BillingProfile>(
            r#"
            SELECT tenant_id, ruc, business_name, environment, accounting_obligated,
                   establishment_code, emission_point, signature_expires_at, updated_at
            FROM billing_profiles
            WHERE tenant_id = ?1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    /// Inserts or replaces the issuer profile for a tenant.
    pub async fn upsert_profile(&self, profile: &BillingProfile) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_profiles (
                tenant_id, ruc, business_name, environment, accounting_obligated,
                establishment_code, emission_point, signature_expires_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (tenant_id) DO UPDATE SET
                ruc = excluded.ruc,
                business_name = excluded.business_name,
                environment = excluded.environment,
                accounting_obligated = excluded.accounting_obligated,
                establishment_code = excluded.establishment_code,
                emission_point = excluded.emission_point,
                signature_expires_at = excluded.signature_expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.tenant_id)
        .bind(&profile.ruc)
        .bind(&profile.business_name)
        .bind(profile.environment)
        .bind(profile.accounting_obligated)
        .bind(&profile.establishment_code)
        .bind(&profile.emission_point)
        .bind(profile.signature_expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(tenant_id = %profile.tenant_id, environment = %profile.environment, "Billing profile stored");
        Ok(())
    }

    /// Records the expiry of a newly uploaded signing certificate.
    pub async fn update_signature_expiry(
        &self,
        tenant_id: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE billing_profiles SET
                signature_expires_at = ?2,
                updated_at = ?3
            WHERE tenant_id = ?1
            "#,
        )
        .bind(tenant_id)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("BillingProfile", tenant_id));
        }

        info!(tenant_id = %tenant_id, expires_at = %expires_at, "Signature expiry updated");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
