//! # Validation Module
//!
//! Checks run on a sale before it is turned into an invoice submission.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Sale completion                                               │
//! │  └── Totals and items written by the sales subsystem                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Invoice worker (before any HTTP call)                        │
//! │  └── THIS MODULE: tax ids, lines, totals, issuer codes                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Billing provider                                             │
//! │  └── Rejections come back as 4xx and are classified as Validation      │
//! │                                                                         │
//! │  A Layer 2 failure costs no provider round-trip.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kardex_core::validation::{validate_customer_tax_id, validate_ruc};
//!
//! assert!(validate_customer_tax_id("9999999999999").is_ok());
//! assert!(validate_ruc("1790012345001").is_ok());
//! assert!(validate_ruc("17900123450").is_err());
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{BillingProfile, Sale, SaleItem};
use crate::{FINAL_CONSUMER_TAX_ID, MAX_INVOICE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

/// Validates an issuer RUC: 13 digits ending in establishment suffix `001`.
pub fn validate_ruc(ruc: &str) -> ValidationResult<()> {
    let ruc = ruc.trim();

    if ruc.is_empty() {
        return Err(ValidationError::Required {
            field: "ruc".to_string(),
        });
    }

    if ruc.len() != 13 || !all_digits(ruc) {
        return Err(ValidationError::InvalidFormat {
            field: "ruc".to_string(),
            reason: "must be exactly 13 digits".to_string(),
        });
    }

    if !ruc.ends_with("001") {
        return Err(ValidationError::InvalidFormat {
            field: "ruc".to_string(),
            reason: "must end in 001".to_string(),
        });
    }

    Ok(())
}

/// Validates the buyer identification on a sale.
///
/// ## Accepted Forms
/// ```text
/// ┌──────────────────┬──────────────────────────────────────────┐
/// │ Final consumer   │ 9999999999999                            │
/// │ Cédula           │ 10 digits                                │
/// │ RUC              │ 13 digits ending in 001                  │
/// │ Passport         │ 5-20 letters/digits, at least one letter │
/// └──────────────────┴──────────────────────────────────────────┘
/// ```
pub fn validate_customer_tax_id(tax_id: &str) -> ValidationResult<()> {
    let tax_id = tax_id.trim();

    if tax_id.is_empty() {
        return Err(ValidationError::Required {
            field: "customer_tax_id".to_string(),
        });
    }

    if tax_id == FINAL_CONSUMER_TAX_ID {
        return Ok(());
    }

    if all_digits(tax_id) {
        return match tax_id.len() {
            10 => Ok(()),
            13 if tax_id.ends_with("001") => Ok(()),
            _ => Err(ValidationError::InvalidFormat {
                field: "customer_tax_id".to_string(),
                reason: "numeric ids must be a 10-digit cédula or a 13-digit RUC".to_string(),
            }),
        };
    }

    if tax_id.len() > 20 {
        return Err(ValidationError::TooLong {
            field: "customer_tax_id".to_string(),
            max: 20,
        });
    }

    if tax_id.len() < 5 || !tax_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidFormat {
            field: "customer_tax_id".to_string(),
            reason: "passport numbers must be 5-20 letters or digits".to_string(),
        });
    }

    Ok(())
}

/// Validates a 3-digit establishment or emission point code.
pub fn validate_point_code(field: &str, code: &str) -> ValidationResult<()> {
    if code.len() != 3 || !all_digits(code) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must be exactly 3 digits".to_string(),
        });
    }
    Ok(())
}

/// Validates the issuer data needed to build an access key.
pub fn validate_billing_profile(profile: &BillingProfile) -> ValidationResult<()> {
    validate_ruc(&profile.ruc)?;
    validate_point_code("establishment_code", &profile.establishment_code)?;
    validate_point_code("emission_point", &profile.emission_point)?;

    if profile.business_name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "business_name".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Invoice Validators
// =============================================================================

/// Validates invoice lines: at least one, at most MAX_INVOICE_LINES,
/// positive quantities and non-negative amounts.
pub fn validate_invoice_lines(items: &[SaleItem]) -> ValidationResult<()> {
    if items.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    if items.len() > MAX_INVOICE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_INVOICE_LINES as i64,
        });
    }

    for item in items {
        if item.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: format!("lines[{}].quantity", item.sku_snapshot),
            });
        }
        if item.unit_price_cents < 0 || item.line_total_cents < 0 || item.tax_cents < 0 {
            return Err(ValidationError::OutOfRange {
                field: format!("lines[{}].amount", item.sku_snapshot),
                min: 0,
                max: i64::MAX,
            });
        }
    }

    Ok(())
}

/// Validates that the sale header agrees with its lines.
///
/// The provider recomputes totals; a mismatch here would be rejected anyway.
pub fn validate_sale_totals(sale: &Sale, items: &[SaleItem]) -> ValidationResult<()> {
    for (field, cents) in [
        ("subtotal", sale.subtotal_cents),
        ("tax", sale.tax_cents),
        ("total", sale.total_cents),
    ] {
        if cents < 0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                min: 0,
                max: i64::MAX,
            });
        }
    }

    let lines_subtotal: Money = items.iter().map(SaleItem::line_total).sum();
    if lines_subtotal.cents() != sale.subtotal_cents {
        return Err(ValidationError::Mismatch {
            field: "subtotal".to_string(),
            expected: sale.subtotal_cents,
            actual: lines_subtotal.cents(),
        });
    }

    let lines_tax: i64 = items.iter().map(|i| i.tax_cents).sum();
    if lines_tax != sale.tax_cents {
        return Err(ValidationError::Mismatch {
            field: "tax".to_string(),
            expected: sale.tax_cents,
            actual: lines_tax,
        });
    }

    let expected_total = sale.subtotal_cents + sale.tax_cents;
    if expected_total != sale.total_cents {
        return Err(ValidationError::Mismatch {
            field: "total".to_string(),
            expected: expected_total,
            actual: sale.total_cents,
        });
    }

    Ok(())
}

/// Runs every check needed before an invoice leaves the process.
pub fn validate_invoice(sale: &Sale, items: &[SaleItem]) -> ValidationResult<()> {
    validate_customer_tax_id(&sale.customer_tax_id)?;
    validate_invoice_lines(items)?;
    validate_sale_totals(sale, items)
}

// =============================================================================
// Unit Tests
// =============================================================================
