//! # Billing API Client
//!
//! Typed provider operations on top of a [`BillingTransport`], with one
//! place where HTTP outcomes become [`BillingError`]s.
//!
//! ## Outcome Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Provider Outcome Classification                      │
//! │                                                                         │
//! │  2xx ............................ success                              │
//! │  401 ............................ invalidate token, retry once with a  │
//! │                                   fresh one, then Authentication       │
//! │  408 / 429 ...................... Transient (provider asks to wait)    │
//! │  other 4xx ...................... Validation                           │
//! │  5xx / timeout / reset .......... Transient                            │
//! │                                                                         │
//! │  Exception: GET /invoices/{key}/status → 404 means "never received",   │
//! │  reported as RemoteStatus::NotFound rather than an error.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{AuthToken, AuthTokenManager};
use crate::error::{BillingError, BillingResult};
use crate::payload::InvoicePayload;
use crate::transport::{BillingTransport, ProviderRequest, ProviderResponse, Route};

/// Longest provider message carried into an error (and from there into
/// `Sale.last_error`).
const MAX_MESSAGE_LEN: usize = 300;

// =============================================================================
// Classification
// =============================================================================

/// Coarse meaning of an HTTP status from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 401: the bearer token (or login) was refused.
    Unauthorized,
    /// A 4xx that will fail again if repeated.
    Rejected,
    /// 5xx, 408, 429 and anything unexpected.
    Retryable,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Unauthorized,
        408 | 429 => StatusClass::Retryable,
        400..=499 => StatusClass::Rejected,
        _ => StatusClass::Retryable,
    }
}

/// Human-readable summary of a failed reply: the provider's `message` or
/// `error` field when the body is JSON, else the body text, truncated.
pub fn provider_message(status: u16, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|json| {
            ["message", "error", "detail"]
                .iter()
                .find_map(|field| json.get(field).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

    let mut message = if detail.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, detail)
    };
    if message.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}

fn ensure_success(response: &ProviderResponse) -> BillingResult<()> {
    match classify_status(response.status) {
        StatusClass::Success => Ok(()),
        StatusClass::Unauthorized => Err(BillingError::Authentication(provider_message(
            response.status,
            &response.body,
        ))),
        StatusClass::Rejected => Err(BillingError::Validation(provider_message(
            response.status,
            &response.body,
        ))),
        StatusClass::Retryable => Err(BillingError::Transient(provider_message(
            response.status,
            &response.body,
        ))),
    }
}

// =============================================================================
// Provider Types
// =============================================================================

/// Identifiers returned for an accepted invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub access_key: String,
    pub document_id: String,
}

/// Provider-side state of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Authorized,
    /// Received, authorization still in progress.
    #[serde(alias = "RECEIVED", alias = "PENDING")]
    Processing,
    Rejected,
    NotFound,
    #[serde(other)]
    Unknown,
}

/// Reply of `GET /invoices/{accessKey}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceState {
    pub status: RemoteStatus,
    #[serde(default)]
    pub document_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SignatureUpload<'a> {
    certificate: String,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignatureReceipt {
    signature_expires_at: DateTime<Utc>,
}

// =============================================================================
// Client
// =============================================================================

/// Provider client for one tenant.
pub struct BillingApiClient {
    transport: Arc<dyn BillingTransport>,
    auth: Arc<AuthTokenManager>,
}

impl BillingApiClient {
    pub fn new(transport: Arc<dyn BillingTransport>, auth: Arc<AuthTokenManager>) -> Self {
        BillingApiClient { transport, auth }
    }

    pub fn auth(&self) -> &AuthTokenManager {
        &self.auth
    }

    pub fn tenant_id(&self) -> &str {
        self.auth.tenant_id()
    }

    /// Forces a fresh login and returns the new token.
    pub async fn authenticate(&self) -> BillingResult<AuthToken> {
        self.auth.invalidate_token().await;
        self.auth.get_valid_token().await
    }

    /// `POST /invoices`
    pub async fn submit_invoice(&self, payload: &InvoicePayload) -> BillingResult<SubmitReceipt> {
        let body = serde_json::to_value(payload)?;
        let response = self
            .execute(ProviderRequest::new(Route::SubmitInvoice, &["invoices"]).json(body))
            .await?;
        ensure_success(&response)?;

        let receipt: SubmitReceipt = serde_json::from_slice(&response.body)?;
        if receipt.access_key != payload.access_key {
            warn!(
                sent = %payload.access_key,
                returned = %receipt.access_key,
                "Provider returned a different access key"
            );
        }

        info!(
            tenant_id = %self.tenant_id(),
            sale_id = %payload.sale_id,
            document_id = %receipt.document_id,
            "Invoice accepted by provider"
        );
        Ok(receipt)
    }

    /// `GET /invoices/{accessKey}/status`
    pub async fn get_invoice_status(&self, access_key: &str) -> BillingResult<InvoiceState> {
        let response = self
            .execute(ProviderRequest::new(
                Route::InvoiceStatus,
                &["invoices", access_key, "status"],
            ))
            .await?;

        if response.status == 404 {
            return Ok(InvoiceState {
                status: RemoteStatus::NotFound,
                document_id: None,
            });
        }
        ensure_success(&response)?;

        let state: InvoiceState = serde_json::from_slice(&response.body)?;
        debug!(access_key = %access_key, status = ?state.status, "Invoice status fetched");
        Ok(state)
    }

    /// `GET /invoices/{documentId}/file`
    pub async fn fetch_signed_document(&self, document_id: &str) -> BillingResult<Vec<u8>> {
        let response = self
            .execute(ProviderRequest::new(
                Route::DocumentFile,
                &["invoices", document_id, "file"],
            ))
            .await?;
        ensure_success(&response)?;
        Ok(response.body)
    }

    /// `POST /signature`: uploads a PKCS#12 signing certificate and returns
    /// its expiry.
    pub async fn upload_signature(
        &self,
        certificate: &[u8],
        password: &str,
    ) -> BillingResult<DateTime<Utc>> {
        let body = serde_json::to_value(SignatureUpload {
            certificate: STANDARD.encode(certificate),
            password,
        })?;
        let response = self
            .execute(ProviderRequest::new(Route::UploadSignature, &["signature"]).json(body))
            .await?;
        ensure_success(&response)?;

        let receipt: SignatureReceipt = serde_json::from_slice(&response.body)?;
        info!(
            tenant_id = %self.tenant_id(),
            expires_at = %receipt.signature_expires_at,
            "Signing certificate uploaded"
        );
        Ok(receipt.signature_expires_at)
    }

    /// Sends an authorized request. A 401 invalidates the token and the
    /// request is repeated once with a fresh one.
    async fn execute(&self, request: ProviderRequest) -> BillingResult<ProviderResponse> {
        let token = self.auth.get_valid_token().await?;
        let response = self
            .transport
            .send(request.clone().bearer(&token.value))
            .await?;
        if classify_status(response.status) != StatusClass::Unauthorized {
            return Ok(response);
        }

        warn!(
            tenant_id = %self.tenant_id(),
            path = %request.path(),
            "Provider rejected bearer token, re-authenticating"
        );
        self.auth.invalidate_if_current(&token.value).await;

        let token = self.auth.get_valid_token().await?;
        let response = self.transport.send(request.bearer(&token.value)).await?;
        if classify_status(response.status) == StatusClass::Unauthorized {
            return Err(BillingError::Authentication(provider_message(
                response.status,
                &response.body,
            )));
        }
        Ok(response)
    }
}

impl std::fmt::Debug for BillingApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingApiClient")
            .field("tenant_id", &self.tenant_id())
            .finish_non_exhaustive()
    }
}
