//! # kardex-billing: Electronic Invoice Issuance for Kardex POS
//!
//! This crate turns completed sales into authorized electronic invoices. A
//! pool of workers drains the invoice job queue against the external billing
//! provider, retrying transient failures and reconciling after crashes.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Invoice Pipeline Architecture                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                InvoicePipeline (Main Orchestrator)               │  │
//! │  │                                                                  │  │
//! │  │  Spawns the worker pool, exposes reissue/download/upload        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ InvoiceWorker  │  │ BillingApi     │  │  AuthTokenManager      │    │
//! │  │                │  │ Client         │  │                        │    │
//! │  │ Leases jobs    │  │ Classifies     │  │ Cached bearer token    │    │
//! │  │ Retry / fail   │  │ provider       │  │ Single login under     │    │
//! │  │ Writes status  │  │ responses      │  │ concurrency            │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  Reconciler    │  │  Transport     │  │  TenantClients         │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Status lookup  │  │ reqwest, one   │  │ One client and token   │    │
//! │  │ by access key  │  │ timeout per    │  │ cache per tenant       │    │
//! │  │ before resend  │  │ request        │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pipeline`] - `InvoicePipeline` worker pool and operator commands
//! - [`worker`] - Per-job state machine
//! - [`reconciler`] - Duplicate detection before resubmission
//! - [`client`] - Billing provider API and response classification
//! - [`auth`] - Token cache with double-checked refresh
//! - [`transport`] - HTTP seam to the provider
//! - [`tenants`] - Per-tenant client registry
//! - [`payload`] - Invoice JSON body
//! - [`retry`] - Backoff policy
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Billing error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kardex_billing::{BillingConfig, InvoicePipeline};
//! use kardex_db::{Database, DbConfig};
//!
//! let config = BillingConfig::load(None)?;
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//!
//! let mut pipeline = InvoicePipeline::from_config(db, &config);
//! pipeline.start();
//!
//! // ...
//! pipeline.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod payload;
pub mod pipeline;
pub mod reconciler;
pub mod retry;
pub mod tenants;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{AuthToken, AuthTokenManager};
pub use client::{BillingApiClient, InvoiceState, RemoteStatus, SubmitReceipt};
pub use config::BillingConfig;
pub use error::{BillingError, BillingResult};
pub use payload::InvoicePayload;
pub use pipeline::{InvoicePipeline, PipelineStats};
pub use reconciler::ReconcileOutcome;
pub use retry::RetryPolicy;
pub use tenants::TenantClients;
pub use transport::{BillingTransport, HttpTransport, ProviderRequest, ProviderResponse, Route};
pub use worker::{InvoiceWorker, JobOutcome, WorkerSettings};
