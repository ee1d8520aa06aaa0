//! # Provider Transport
//!
//! The raw HTTP seam between the billing client and the provider.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Request Path                                       │
//! │                                                                         │
//! │  BillingApiClient                                                      │
//! │    • picks the Route and path segments                                 │
//! │    • attaches the bearer token                                         │
//! │    • classifies the status code                                        │
//! │         │                                                               │
//! │         ▼  ProviderRequest                                             │
//! │  dyn BillingTransport                                                  │
//! │    • HttpTransport (reqwest, bounded timeout)                          │
//! │    • scripted fake in tests                                            │
//! │         │                                                               │
//! │         ▼  ProviderResponse { status, body }                           │
//! │  Network errors surface as BillingError::Transient; any HTTP status    │
//! │  is returned as-is for the client to classify.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{BillingError, BillingResult};

/// Default bound on a single provider call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Requests & Responses
// =============================================================================

/// HTTP method used by a provider route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// The provider endpoints this crate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// `POST /login`
    Login,
    /// `POST /invoices`
    SubmitInvoice,
    /// `GET /invoices/{accessKey}/status`
    InvoiceStatus,
    /// `GET /invoices/{documentId}/file`
    DocumentFile,
    /// `POST /signature`
    UploadSignature,
}

impl Route {
    pub fn method(self) -> Method {
        match self {
            Route::InvoiceStatus | Route::DocumentFile => Method::Get,
            Route::Login | Route::SubmitInvoice | Route::UploadSignature => Method::Post,
        }
    }
}

/// One call to the provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub route: Route,
    /// Path segments below the base URL, unescaped.
    pub segments: Vec<String>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl ProviderRequest {
    pub fn new(route: Route, segments: &[&str]) -> Self {
        ProviderRequest {
            route,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            bearer: None,
            body: None,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `/a/b/c` form, for logs.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// Status and body of a provider reply.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Sends provider requests.
///
/// Implementations must return `Err` only for failures where no HTTP status
/// was received.
#[async_trait]
pub trait BillingTransport: Send + Sync {
    async fn send(&self, request: ProviderRequest) -> BillingResult<ProviderResponse>;
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// reqwest-backed transport for one provider base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Creates a transport whose every request is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> BillingResult<Self> {
        let base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(BillingError::InvalidConfig(format!(
                "provider URL must be http or https, got: {}",
                base_url
            )));
        }
        if base_url.cannot_be_a_base() {
            return Err(BillingError::InvalidConfig(format!(
                "provider URL cannot carry a path: {}",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(HttpTransport { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, segments: &[String]) -> BillingResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                BillingError::InvalidConfig(format!("provider URL cannot carry a path: {}", self.base_url))
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }
}

#[async_trait]
impl BillingTransport for HttpTransport {
    async fn send(&self, request: ProviderRequest) -> BillingResult<ProviderResponse> {
        let url = self.url_for(&request.segments)?;

        let mut builder = match request.route.method() {
            Method::Get => self.client.get(url.clone()),
            Method::Post => self.client.post(url.clone()),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!(route = ?request.route, %url, status, bytes = body.len(), "Provider responded");
        Ok(ProviderResponse { status, body })
    }
}
