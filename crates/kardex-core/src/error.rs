//! # Error Types
//!
//! Domain-specific error types for kardex-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kardex-core errors (this file)                                        │
//! │  ├── CoreError        - Invoice state machine violations               │
//! │  └── ValidationError  - Invoice payload validation failures            │
//! │                                                                         │
//! │  kardex-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  kardex-billing errors (separate crate)                                │
//! │  └── BillingError     - Provider taxonomy the worker decides on        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → BillingError → Worker   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::InvoiceStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Sale cannot be found.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// The requested invoice status change is not allowed.
    ///
    /// ## When This Occurs
    /// - Marking an AUTHORIZED sale as ERROR (late failure after success)
    /// - Marking an ERROR sale as AUTHORIZED without a manual re-issue
    /// - Re-issuing a sale that is not in ERROR
    #[error("Sale {sale_id}: invoice status cannot move from {from} to {to}")]
    InvalidInvoiceTransition {
        sale_id: String,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// Access key and document id were already written for this sale.
    #[error("Sale {sale_id} already carries invoice identifiers")]
    IdentifiersAlreadySet { sale_id: String },

    /// Sale is not in a state that allows the requested operation.
    #[error("Sale {sale_id} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before an invoice ever leaves the process, so a malformed sale
/// fails without spending a provider round-trip.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., tax id with letters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Totals that should agree do not.
    #[error("{field} mismatch: expected {expected}, got {actual}")]
    Mismatch {
        field: String,
        expected: i64,
        actual: i64,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
