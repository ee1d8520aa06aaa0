//! # kardex-db: Database Layer for Kardex POS
//!
//! This crate provides database access for the invoicing pipeline.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Kardex POS Invoicing Data Flow                      │
//! │                                                                         │
//! │  InvoiceWorker (kardex-billing)                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kardex-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SaleRepo      │    │ 001_init.sql │  │   │
//! │  │   │ SqlitePool    │◄───│ InvoiceJobRepo│    │ 002_invoice  │  │   │
//! │  │   │ Connection    │    │ BillingRepo   │    │   _pipeline  │  │   │
//! │  │   │ Management    │    │               │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (sale, invoice job, billing)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kardex_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/kardex.db")).await?;
//!
//! // Complete a sale and queue its invoice in one transaction
//! db.sales().complete_sale(&sale_id, true).await?;
//!
//! // Workers lease jobs from the queue
//! let job = db.invoice_jobs().lease("worker-0", Duration::from_secs(60)).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::billing::BillingRepository;
pub use repository::invoice_job::{InvoiceJobRepository, RetryOutcome, DEFAULT_MAX_ATTEMPTS};
pub use repository::sale::SaleRepository;
