//! # Invoice Status Rules
//!
//! The invoice state machine carried on every sale, and the guard functions
//! the SQL writer calls before mutating a sale row.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   complete_sale(electronic=false)        complete_sale(electronic=true) │
//! │            │                                        │                   │
//! │            ▼                                        ▼                   │
//! │   ┌───────────────┐                        ┌───────────────┐            │
//! │   │ NO_ELECTRONIC │ (terminal)             │    PENDING    │◄────┐      │
//! │   └───────────────┘                        └───────┬───────┘     │      │
//! │                                     success ┌──────┴──────┐ fail │      │
//! │                                             ▼             ▼      │      │
//! │                                   ┌────────────┐   ┌─────────┐   │      │
//! │                                   │ AUTHORIZED │   │  ERROR  │───┘      │
//! │                                   │ (terminal) │   └─────────┘ manual   │
//! │                                   └────────────┘               reissue  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The automatic retry path never leaves ERROR; only [`ensure_can_reissue`]
//! opens the ERROR → PENDING edge.

use crate::error::{CoreError, CoreResult};
use crate::types::{InvoiceStatus, Sale};

// =============================================================================
// Transitions
// =============================================================================

impl InvoiceStatus {
    /// Returns true if the pipeline may move a sale from `self` to `next`.
    ///
    /// Includes the manual ERROR → PENDING re-issue edge.
    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Pending, Authorized) | (Pending, Error) | (Error, Pending)
        )
    }

    /// True for states no automatic process will ever change.
    pub fn is_terminal(self) -> bool {
        matches!(self, InvoiceStatus::Authorized | InvoiceStatus::NoElectronic)
    }
}

// =============================================================================
// Guards
// =============================================================================

fn ensure_transition(sale: &Sale, to: InvoiceStatus) -> CoreResult<()> {
    if sale.invoice_status.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidInvoiceTransition {
            sale_id: sale.id.clone(),
            from: sale.invoice_status,
            to,
        })
    }
}

/// Guard for PENDING → AUTHORIZED.
///
/// Identifiers are write-once: a sale that already carries an access key or a
/// document id cannot be authorized again.
pub fn ensure_can_authorize(sale: &Sale) -> CoreResult<()> {
    ensure_transition(sale, InvoiceStatus::Authorized)?;
    if sale.access_key.is_some() || sale.document_id.is_some() {
        return Err(CoreError::IdentifiersAlreadySet {
            sale_id: sale.id.clone(),
        });
    }
    Ok(())
}

/// Guard for PENDING → ERROR.
pub fn ensure_can_fail(sale: &Sale) -> CoreResult<()> {
    ensure_transition(sale, InvoiceStatus::Error)
}

/// Guard for the manual ERROR → PENDING re-issue.
pub fn ensure_can_reissue(sale: &Sale) -> CoreResult<()> {
    ensure_transition(sale, InvoiceStatus::Pending)
}

// =============================================================================
// Unit Tests
// =============================================================================
