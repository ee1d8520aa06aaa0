//! # Billing Error Types
//!
//! Error types for invoice issuance.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Billing Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────────────┐        ┌─────────────────────────────┐    │
//! │  │  Provider outcomes      │        │  Infrastructure             │    │
//! │  │                         │        │                             │    │
//! │  │  Authentication  (stop) │        │  Database                   │    │
//! │  │  Validation      (stop) │        │  InvalidConfig              │    │
//! │  │  ExpiredSignature(stop) │        │  ConfigLoadFailed           │    │
//! │  │  Transient      (retry) │        │  MissingCredentials         │    │
//! │  │  MalformedResponse      │        │                             │    │
//! │  │                 (retry) │        │                             │    │
//! │  └─────────────────────────┘        └─────────────────────────────┘    │
//! │                                                                         │
//! │  The worker is the only place that turns these into queue actions:    │
//! │  is_retryable() → retry with backoff, otherwise → sale ERROR.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use kardex_core::ValidationError;
use kardex_db::DbError;
use thiserror::Error;

/// Result type alias for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;

/// Every way an issuance step can fail.
#[derive(Debug, Error)]
pub enum BillingError {
    // =========================================================================
    // Provider Outcomes
    // =========================================================================
    /// The provider refused our credentials, or a fresh token was rejected.
    #[error("Billing provider authentication failed: {0}")]
    Authentication(String),

    /// The invoice (or request) is invalid and will not succeed on retry.
    #[error("Invoice rejected: {0}")]
    Validation(String),

    /// The tenant's signing certificate is missing or expired.
    #[error("Signing certificate missing or expired for tenant {tenant_id}")]
    ExpiredSignature { tenant_id: String },

    /// Timeout, connection failure or provider 5xx.
    #[error("Billing provider unavailable: {0}")]
    Transient(String),

    /// A success status whose body could not be decoded.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Storage failure while reading or writing issuance state.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Invalid billing configuration.
    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// No provider login stored for the tenant.
    #[error("No billing credentials stored for tenant {tenant_id}")]
    MissingCredentials { tenant_id: String },
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        BillingError::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            BillingError::InvalidConfig(err.to_string())
        } else if err.is_decode() {
            BillingError::MalformedResponse(err.to_string())
        } else {
            // timeouts, refused/reset connections, broken bodies
            BillingError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::MalformedResponse(err.to_string())
    }
}

impl From<url::ParseError> for BillingError {
    fn from(err: url::ParseError) -> Self {
        BillingError::InvalidConfig(format!("invalid provider URL: {}", err))
    }
}

impl From<std::io::Error> for BillingError {
    fn from(err: std::io::Error) -> Self {
        BillingError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for BillingError {
    fn from(err: toml::de::Error) -> Self {
        BillingError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl BillingError {
    /// Returns true if the same attempt may succeed later.
    ///
    /// ## Retryable Errors
    /// - Transient provider failures (timeouts, 5xx, connection resets)
    /// - Undecodable success responses (the reconciler sorts them out)
    ///
    /// ## Non-Retryable Errors
    /// - Authentication, validation and signature problems
    /// - Configuration and credential problems
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Transient(_) | BillingError::MalformedResponse(_)
        )
    }

    /// Returns true for storage failures. The job is left to its lease
    /// timeout instead of being retried or failed.
    pub fn is_storage_error(&self) -> bool {
        matches!(self, BillingError::Database(_))
    }

    /// Returns true if an operator has to act (renew the certificate).
    pub fn needs_alert(&self) -> bool {
        matches!(self, BillingError::ExpiredSignature { .. })
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidConfig(_)
                | BillingError::ConfigLoadFailed(_)
                | BillingError::MissingCredentials { .. }
        )
    }
}
