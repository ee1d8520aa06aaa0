//! # Repository Module
//!
//! Database repository implementations for Kardex POS invoicing.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Writes What                                      │
//! │                                                                         │
//! │  POS sale completion                                                   │
//! │       │  db.sales().complete_sale(id, electronic)                      │
//! │       ▼                                                                 │
//! │  SaleRepository ─────────┐ one transaction ┌──── InvoiceJobRepository  │
//! │  ├── complete_sale       │                 │     ├── enqueue           │
//! │  ├── mark_authorized     │  sales          │     ├── lease             │
//! │  ├── mark_error          │  invoice_jobs   │     ├── ack / complete    │
//! │  ├── reissue             │                 │     ├── retry / fail      │
//! │  └── void_sale           └─────────────────┘     └── withdraw          │
//! │                                                                         │
//! │  BillingRepository: credentials + issuer profile (read by the pipeline)│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`SaleRepository`](sale::SaleRepository) - Sales, items and invoice status writes
//! - [`InvoiceJobRepository`](invoice_job::InvoiceJobRepository) - Invoice issuance queue
//! - [`BillingRepository`](billing::BillingRepository) - Provider credentials and billing profiles

pub mod billing;
pub mod invoice_job;
pub mod sale;
