//! # kardex-core: Pure Business Logic for Kardex POS Invoicing
//!
//! This crate holds the rules of the electronic invoicing pipeline as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Kardex POS Invoicing Architecture                   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            kardex-billing (worker pool, provider client)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kardex-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  invoice  │  │access_key │  │ validation│  │   │
//! │  │   │   Sale    │  │  status   │  │  SRI 49   │  │  tax ids  │  │   │
//! │  │   │ InvoiceJob│  │  guards   │  │  digits   │  │  payload  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    kardex-db (Database Layer)                   │   │
//! │  │          SQLite queries, migrations, invoice job queue          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, InvoiceJob, BillingProfile, etc.)
//! - [`invoice`] - Invoice status state machine and write guards
//! - [`access_key`] - SRI access key (clave de acceso) generation
//! - [`money`] - Money type with integer arithmetic
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use kardex_core::InvoiceStatus;
//!
//! assert!(InvoiceStatus::Pending.can_transition_to(InvoiceStatus::Authorized));
//! assert!(!InvoiceStatus::Authorized.can_transition_to(InvoiceStatus::Error));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access_key;
pub mod error;
pub mod invoice;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use access_key::AccessKey;
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default tenant ID for single-store deployments.
///
/// The schema is multi-tenant; the daemon falls back to this tenant when no
/// tenant is configured.
pub const DEFAULT_TENANT_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Tax id used for anonymous buyers ("consumidor final").
pub const FINAL_CONSUMER_TAX_ID: &str = "9999999999999";

/// Maximum number of lines accepted on a single electronic invoice.
pub const MAX_INVOICE_LINES: usize = 100;
