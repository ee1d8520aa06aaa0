//! # Domain Types
//!
//! Core domain types used throughout the invoicing pipeline.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Sale       │   │   InvoiceJob    │   │ BillingProfile  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  sale_id (uniq) │   │  tenant_id      │       │
//! │  │  invoice_status │   │  attempts       │   │  ruc            │       │
//! │  │  access_key     │   │  next_eligible  │   │  environment    │       │
//! │  │  document_id    │   │  leased_until   │   │  signature exp. │       │
//! │  │  last_error     │   │  access_key     │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  InvoiceStatus  │   │   SaleStatus    │   │BillingEnvironment│      │
//! │  │  Pending        │   │  Draft          │   │  Sandbox (1)    │       │
//! │  │  NoElectronic   │   │  Completed      │   │  Production (2) │       │
//! │  │  Authorized     │   │  Voided         │   └─────────────────┘       │
//! │  │  Error          │   └─────────────────┘                              │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%. 1500 bps = 15% (current IVA rate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage string with two decimals ("15.00").
    pub fn percentage_string(&self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate(0)
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Sale is in progress (items being added).
    #[default]
    Draft,
    /// Sale has been paid and finalized.
    Completed,
    /// Sale was cancelled/refunded.
    Voided,
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaleStatus::Draft => write!(f, "draft"),
            SaleStatus::Completed => write!(f, "completed"),
            SaleStatus::Voided => write!(f, "voided"),
        }
    }
}

// =============================================================================
// Invoice Status
// =============================================================================

/// Authorization status of the electronic invoice attached to a sale.
///
/// Transition rules live in [`crate::invoice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Waiting for (or being processed by) the issuance pipeline.
    Pending,
    /// The sale opted out of fiscal invoicing at completion time.
    NoElectronic,
    /// The provider authorized the invoice; identifiers are on the sale.
    Authorized,
    /// Issuance failed terminally; see `last_error`.
    Error,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceStatus::Pending => write!(f, "PENDING"),
            InvoiceStatus::NoElectronic => write!(f, "NO_ELECTRONIC"),
            InvoiceStatus::Authorized => write!(f, "AUTHORIZED"),
            InvoiceStatus::Error => write!(f, "ERROR"),
        }
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale transaction with its fiscal invoice fields.
///
/// The invoicing pipeline only ever writes `invoice_status`, `access_key`,
/// `document_id` and `last_error`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub tenant_id: String,
    pub receipt_number: String,
    pub status: SaleStatus,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    /// Buyer identification (cédula, RUC, passport or final consumer).
    pub customer_tax_id: String,
    pub customer_name: Option<String>,
    pub invoice_status: InvoiceStatus,
    /// Per-tenant invoice sequential, assigned when the sale enters the pipeline.
    pub invoice_sequential: Option<i64>,
    /// Provider-issued fiscal access key (write-once).
    pub access_key: Option<String>,
    /// Provider-issued document identifier (write-once).
    pub document_id: Option<String>,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Returns the grand total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Date the invoice is issued on: completion date, or creation as fallback.
    pub fn issue_date(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item in a sale.
/// Uses snapshot pattern to freeze product data at time of sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,
    pub quantity: i64,
    /// Line total before tax (unit_price × quantity − discount).
    pub line_total_cents: i64,
    /// Tax rate applied to this line, in basis points.
    pub tax_rate_bps: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    /// Returns the line total as Money.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }

    /// Returns the tax rate.
    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps.clamp(0, u32::MAX as i64) as u32)
    }
}

// =============================================================================
// Invoice Job
// =============================================================================

/// A queued "issue invoice for sale X" job.
///
/// `sale_id` is the correlation key: the queue keeps at most one live job per
/// sale. The row is deleted on terminal success or terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InvoiceJob {
    pub id: String,
    pub tenant_id: String,
    pub sale_id: String,
    /// Attempts started so far, incremented on every lease.
    pub attempts: i64,
    #[ts(as = "String")]
    pub next_eligible_at: DateTime<Utc>,
    /// Worker currently holding the lease.
    pub leased_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub leased_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Access key recorded before the first submission, used for reconciliation.
    pub access_key: Option<String>,
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl InvoiceJob {
    /// True when an earlier attempt may already have reached the provider.
    #[inline]
    pub fn is_repeat_attempt(&self) -> bool {
        self.attempts > 1
    }
}

// =============================================================================
// Billing Environment
// =============================================================================

/// Provider environment ("ambiente").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum BillingEnvironment {
    /// Test environment; documents have no fiscal validity.
    #[default]
    Sandbox,
    /// Production environment.
    Production,
}

impl BillingEnvironment {
    /// The single-digit environment code embedded in access keys.
    pub const fn sri_code(&self) -> char {
        match self {
            BillingEnvironment::Sandbox => '1',
            BillingEnvironment::Production => '2',
        }
    }
}

impl fmt::Display for BillingEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingEnvironment::Sandbox => write!(f, "sandbox"),
            BillingEnvironment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for BillingEnvironment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" | "test" | "pruebas" | "1" => Ok(BillingEnvironment::Sandbox),
            "production" | "prod" | "produccion" | "2" => Ok(BillingEnvironment::Production),
            other => Err(ValidationError::InvalidFormat {
                field: "environment".to_string(),
                reason: format!("unknown environment '{}', expected sandbox or production", other),
            }),
        }
    }
}

// =============================================================================
// Billing Profile
// =============================================================================

/// Per-tenant issuer data used to build and validate invoices.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BillingProfile {
    pub tenant_id: String,
    /// Issuer tax identifier (13 digits).
    pub ruc: String,
    pub business_name: String,
    pub environment: BillingEnvironment,
    pub accounting_obligated: bool,
    /// Establishment code (3 digits).
    pub establishment_code: String,
    /// Emission point code (3 digits).
    pub emission_point: String,
    #[ts(as = "Option<String>")]
    pub signature_expires_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl BillingProfile {
    /// Returns true when a signing certificate is on file and unexpired at `now`.
    pub fn signature_valid_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.signature_expires_at, Some(expires) if now < expires)
    }
}

// =============================================================================
// Billing Credentials
// =============================================================================

/// Provider base URL and login for one tenant.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct BillingCredentials {
    pub tenant_id: String,
    pub base_url: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for BillingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BillingCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
