//! # Auth Token Manager
//!
//! Logs in to the billing provider with a tenant's stored credentials and
//! caches the bearer token until shortly before it expires.
//!
//! ## Token Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Billing Token Lifecycle                            │
//! │                                                                         │
//! │  worker-0 ─┐                                                           │
//! │  worker-1 ─┼──► get_valid_token()                                      │
//! │  worker-2 ─┘        │                                                   │
//! │                     ▼                                                   │
//! │             ┌──────────────┐  cached and now < expires_at               │
//! │             │  read lock   │─────────────────────────────► token       │
//! │             └──────┬───────┘                                           │
//! │                    │ missing / expired                                  │
//! │                    ▼                                                    │
//! │             ┌──────────────┐  another worker already logged in         │
//! │             │  write lock  │─────────────────────────────► token       │
//! │             │  re-check    │                                           │
//! │             └──────┬───────┘                                           │
//! │                    │ still missing                                      │
//! │                    ▼                                                    │
//! │             POST /login {email, password}                              │
//! │             expires_at = issued_at + TTL - 5 min                       │
//! │                                                                         │
//! │  Only the login call runs under this tenant's write lock, so          │
//! │  concurrent workers wait for one login instead of issuing several.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Token Storage
//! Tokens live in memory only and are lost on restart.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::client::{classify_status, provider_message, StatusClass};
use crate::error::{BillingError, BillingResult};
use crate::transport::{BillingTransport, ProviderRequest, Route};
use kardex_core::BillingCredentials;

/// Margin subtracted from the provider-reported expiry (5 minutes).
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Lifetime assumed when the provider does not report one (8 hours).
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 8 * 3600;

// =============================================================================
// Auth Token
// =============================================================================

/// A bearer token plus the moment we stop trusting it.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    /// Provider expiry minus the refresh margin.
    pub expires_at: DateTime<Utc>,
    /// Signing certificate expiry as reported at login.
    pub signature_expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// Builds a token from a login reply.
    ///
    /// Tokens that live shorter than the margin keep half their lifetime.
    pub fn from_login(
        value: String,
        issued_at: DateTime<Utc>,
        provider_expires_at: Option<DateTime<Utc>>,
        signature_expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let provider_expires_at =
            provider_expires_at.unwrap_or(issued_at + Duration::seconds(DEFAULT_TOKEN_TTL_SECS));
        let ttl = provider_expires_at - issued_at;
        let margin = Duration::seconds(REFRESH_MARGIN_SECS);

        let expires_at = if ttl > margin {
            provider_expires_at - margin
        } else {
            issued_at + ttl / 2
        };

        AuthToken {
            value,
            issued_at,
            expires_at,
            signature_expires_at,
        }
    }

    /// Check if the token may no longer be used at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Get remaining valid time
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// True when login reported a signing certificate that has expired.
    pub fn signature_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.signature_expires_at, Some(expires) if expires <= now)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("signature_expires_at", &self.signature_expires_at)
            .finish()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    signature_expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Auth Token Manager
// =============================================================================

/// Per-tenant token cache.
pub struct AuthTokenManager {
    credentials: BillingCredentials,
    transport: Arc<dyn BillingTransport>,
    token: RwLock<Option<AuthToken>>,
}

impl AuthTokenManager {
    pub fn new(credentials: BillingCredentials, transport: Arc<dyn BillingTransport>) -> Self {
        AuthTokenManager {
            credentials,
            transport,
            token: RwLock::new(None),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.credentials.tenant_id
    }

    /// Returns a token that is valid now, logging in if needed.
    ///
    /// ## Errors
    /// - `Authentication` when the provider rejects the credentials
    /// - `Transient` on timeouts, connection failures and 5xx
    pub async fn get_valid_token(&self) -> BillingResult<AuthToken> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.is_expired() {
                    debug!(
                        tenant_id = %self.credentials.tenant_id,
                        remaining_secs = token.remaining_secs(),
                        "Using cached token"
                    );
                    return Ok(token.clone());
                }
            }
        }

        let mut guard = self.token.write().await;

        // Double-check after acquiring write lock
        if let Some(token) = guard.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }

        let token = self.login().await?;
        info!(
            tenant_id = %self.credentials.tenant_id,
            expires_in_secs = token.remaining_secs(),
            "Authenticated with billing provider"
        );
        *guard = Some(token.clone());

        Ok(token)
    }

    /// Drops the cached token; the next call logs in again.
    pub async fn invalidate_token(&self) {
        *self.token.write().await = None;
        debug!(tenant_id = %self.credentials.tenant_id, "Token invalidated");
    }

    /// Drops the cached token only if it is still `value`.
    ///
    /// A worker holding a rejected token must not throw away the fresh one
    /// another worker just obtained.
    pub async fn invalidate_if_current(&self, value: &str) {
        let mut guard = self.token.write().await;
        if guard.as_ref().is_some_and(|t| t.value == value) {
            *guard = None;
            debug!(tenant_id = %self.credentials.tenant_id, "Rejected token invalidated");
        }
    }

    /// Get current token info (without triggering a login)
    pub async fn current_token(&self) -> Option<AuthToken> {
        self.token.read().await.clone()
    }

    async fn login(&self) -> BillingResult<AuthToken> {
        let body = serde_json::to_value(LoginRequest {
            email: &self.credentials.email,
            password: &self.credentials.password,
        })?;
        let issued_at = Utc::now();
        let response = self
            .transport
            .send(ProviderRequest::new(Route::Login, &["login"]).json(body))
            .await?;

        match classify_status(response.status) {
            StatusClass::Success => {}
            StatusClass::Unauthorized | StatusClass::Rejected => {
                return Err(BillingError::Authentication(provider_message(
                    response.status,
                    &response.body,
                )));
            }
            StatusClass::Retryable => {
                return Err(BillingError::Transient(provider_message(
                    response.status,
                    &response.body,
                )));
            }
        }

        let reply: LoginResponse = serde_json::from_slice(&response.body)?;
        Ok(AuthToken::from_login(
            reply.token,
            issued_at,
            reply.token_expires_at,
            reply.signature_expires_at,
        ))
    }

    #[cfg(test)]
    pub(crate) async fn set_token(&self, token: AuthToken) {
        *self.token.write().await = Some(token);
    }
}

impl fmt::Debug for AuthTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokenManager")
            .field("tenant_id", &self.credentials.tenant_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credentials, FakeProvider, Reply};

    fn token(expires_in: i64) -> AuthToken {
        let now = Utc::now();
        AuthToken {
            value: "cached".to_string(),
            issued_at: now - Duration::hours(1),
            expires_at: now + Duration::seconds(expires_in),
            signature_expires_at: None,
        }
    }

    #[test]
    fn test_expiry_applies_refresh_margin() {
        let issued = Utc::now();
        let token = AuthToken::from_login(
            "t".into(),
            issued,
            Some(issued + Duration::hours(1)),
            None,
        );
        assert_eq!(token.expires_at, issued + Duration::minutes(55));

        let token = AuthToken::from_login("t".into(), issued, None, None);
        assert_eq!(token.expires_at, issued + Duration::hours(8) - Duration::minutes(5));
    }

    #[test]
    fn test_short_lived_token_keeps_half() {
        let issued = Utc::now();
        let token = AuthToken::from_login(
            "t".into(),
            issued,
            Some(issued + Duration::minutes(2)),
            None,
        );
        assert_eq!(token.expires_at, issued + Duration::minutes(1));
        assert!(!token.is_expired_at(issued));
    }

    #[test]
    fn test_debug_redacts_value() {
        let rendered = format!("{:?}", token(60));
        assert!(!rendered.contains("cached"));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let provider = FakeProvider::new();
        let manager = AuthTokenManager::new(credentials("t1"), provider.clone());

        let first = manager.get_valid_token().await.unwrap();
        let second = manager.get_valid_token().await.unwrap();

        assert_eq!(first.value, second.value);
        assert_eq!(provider.calls(Route::Login), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_never_returned() {
        let provider = FakeProvider::new();
        let manager = AuthTokenManager::new(credentials("t1"), provider.clone());
        manager.set_token(token(-1)).await;

        let fresh = manager.get_valid_token().await.unwrap();

        assert_ne!(fresh.value, "cached");
        assert!(!fresh.is_expired());
        assert_eq!(provider.calls(Route::Login), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let provider = FakeProvider::new();
        let manager = Arc::new(AuthTokenManager::new(credentials("t1"), provider.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_valid_token().await.unwrap().value })
            })
            .collect();
        let mut values = Vec::new();
        for task in tasks {
            values.push(task.await.unwrap());
        }

        values.dedup();
        assert_eq!(values.len(), 1);
        assert_eq!(provider.calls(Route::Login), 1);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let provider = FakeProvider::new();
        provider.script(Route::Login, vec![Reply::status(401)]);
        let manager = AuthTokenManager::new(credentials("t1"), provider.clone());

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(matches!(err, BillingError::Authentication(_)));
        assert!(manager.current_token().await.is_none());
    }

    #[tokio::test]
    async fn test_login_timeout_is_transient() {
        let provider = FakeProvider::new();
        provider.script(Route::Login, vec![Reply::Timeout]);
        let manager = AuthTokenManager::new(credentials("t1"), provider.clone());

        let err = manager.get_valid_token().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalidate_if_current_keeps_newer_token() {
        let provider = FakeProvider::new();
        let manager = AuthTokenManager::new(credentials("t1"), provider.clone());
        let token = manager.get_valid_token().await.unwrap();

        manager.invalidate_if_current("some-older-token").await;
        assert!(manager.current_token().await.is_some());

        manager.invalidate_if_current(&token.value).await;
        assert!(manager.current_token().await.is_none());

        manager.get_valid_token().await.unwrap();
        manager.invalidate_token().await;
        assert!(manager.current_token().await.is_none());
    }
}
