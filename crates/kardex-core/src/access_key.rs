//! # Access Key (clave de acceso)
//!
//! The 49-digit key that identifies an electronic invoice at the tax
//! authority. It is computed locally, before the first submission, so a
//! crashed attempt always leaves a key the reconciler can query with.
//!
//! ## Layout
//! ```text
//! ┌──────────┬────┬───────────────┬───┬───────┬───────────┬──────────┬───┬───┐
//! │ ddmmyyyy │ 01 │ RUC (13)      │env│estab  │ sequential│ numeric  │ 1 │ChK│
//! │ (8)      │doc │               │(1)│+point │ (9)       │ code (8) │emi│(1)│
//! │          │type│               │   │ (6)   │           │          │typ│   │
//! └──────────┴────┴───────────────┴───┴───────┴───────────┴──────────┴───┴───┘
//!   issue      invoice  issuer     1=test  series   per-tenant  from sale  mod-11
//!   date                           2=prod           counter     id hash
//! ```

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::types::{BillingProfile, Sale};
use crate::validation::{validate_point_code, validate_ruc, ValidationResult};

/// Document type code for a sales invoice ("factura").
pub const INVOICE_DOCUMENT_TYPE: &str = "01";

/// Emission type code for normal (online) emission.
pub const NORMAL_EMISSION: char = '1';

/// Number of digits in a complete access key.
pub const ACCESS_KEY_LEN: usize = 49;

/// Largest sequential that fits the 9-digit field.
pub const MAX_SEQUENTIAL: i64 = 999_999_999;

/// Issue dates are rendered in the issuer's civil time (UTC-5).
const ISSUER_UTC_OFFSET_SECS: i32 = -5 * 3600;

// =============================================================================
// Access Key
// =============================================================================

/// A validated 49-digit access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Builds the access key for `sale` as issued by `profile`.
    ///
    /// The sale must already have its invoice sequential assigned.
    pub fn generate(sale: &Sale, profile: &BillingProfile) -> ValidationResult<AccessKey> {
        validate_ruc(&profile.ruc)?;
        validate_point_code("establishment_code", &profile.establishment_code)?;
        validate_point_code("emission_point", &profile.emission_point)?;

        let sequential = sale.invoice_sequential.ok_or_else(|| ValidationError::Required {
            field: "invoice_sequential".to_string(),
        })?;
        if !(1..=MAX_SEQUENTIAL).contains(&sequential) {
            return Err(ValidationError::OutOfRange {
                field: "invoice_sequential".to_string(),
                min: 1,
                max: MAX_SEQUENTIAL,
            });
        }

        let mut digits = String::with_capacity(ACCESS_KEY_LEN);
        digits.push_str(&issue_date_digits(sale.issue_date()));
        digits.push_str(INVOICE_DOCUMENT_TYPE);
        digits.push_str(&profile.ruc);
        digits.push(profile.environment.sri_code());
        digits.push_str(&profile.establishment_code);
        digits.push_str(&profile.emission_point);
        digits.push_str(&format!("{:09}", sequential));
        digits.push_str(&numeric_code(&sale.id));
        digits.push(NORMAL_EMISSION);
        digits.push(check_digit(&digits));

        Ok(AccessKey(digits))
    }

    /// Parses and verifies a key received from storage or the provider.
    pub fn parse(value: &str) -> ValidationResult<AccessKey> {
        if value.len() != ACCESS_KEY_LEN || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidFormat {
                field: "access_key".to_string(),
                reason: format!(
                    "must be {} digits, got {} characters",
                    ACCESS_KEY_LEN,
                    value.len()
                ),
            });
        }

        let (body, check) = value.split_at(ACCESS_KEY_LEN - 1);
        if check.chars().next() != Some(check_digit(body)) {
            return Err(ValidationError::InvalidFormat {
                field: "access_key".to_string(),
                reason: "check digit does not match".to_string(),
            });
        }

        Ok(AccessKey(value.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 9-digit sequential embedded in the key.
    pub fn sequential(&self) -> &str {
        &self.0[30..39]
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccessKey::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Formats `at` as a calendar date in the issuer's civil time.
///
/// `format_issuer_date(at, "%d/%m/%Y")` is the date printed on the invoice.
pub fn format_issuer_date(at: DateTime<Utc>, pattern: &str) -> String {
    match FixedOffset::east_opt(ISSUER_UTC_OFFSET_SECS) {
        Some(offset) => at.with_timezone(&offset).format(pattern).to_string(),
        None => at.format(pattern).to_string(),
    }
}

fn issue_date_digits(at: DateTime<Utc>) -> String {
    format_issuer_date(at, "%d%m%Y")
}

/// 8-digit code derived from the sale id (FNV-1a, 64 bit).
///
/// Stable across processes, so every attempt for a sale yields the same key.
fn numeric_code(sale_id: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in sale_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{:08}", hash % 100_000_000)
}

/// Modulo-11 check digit, weights 2..=7 cycling from the rightmost digit.
fn check_digit(digits: &str) -> char {
    let mut weight = 2;
    let mut sum = 0u32;
    for d in digits.chars().rev().filter_map(|c| c.to_digit(10)) {
        sum += d * weight;
        weight = if weight == 7 { 2 } else { weight + 1 };
    }

    match 11 - (sum % 11) {
        11 => '0',
        10 => '1',
        n => char::from(b'0' + n as u8),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
