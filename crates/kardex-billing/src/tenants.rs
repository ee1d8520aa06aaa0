//! # Tenant Clients
//!
//! One [`BillingApiClient`] (and so one token cache) per tenant, built on
//! first use from the credential store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::AuthTokenManager;
use crate::client::BillingApiClient;
use crate::error::{BillingError, BillingResult};
use crate::transport::{BillingTransport, HttpTransport};
use kardex_core::BillingCredentials;
use kardex_db::Database;

/// Builds the transport for a tenant's credentials.
pub type TransportFactory =
    Arc<dyn Fn(&BillingCredentials) -> BillingResult<Arc<dyn BillingTransport>> + Send + Sync>;

/// Lazily populated registry of per-tenant provider clients.
pub struct TenantClients {
    db: Database,
    factory: TransportFactory,
    clients: RwLock<HashMap<String, Arc<BillingApiClient>>>,
}

impl TenantClients {
    /// Registry whose clients talk HTTP with the given per-request timeout.
    pub fn new(db: Database, request_timeout: Duration) -> Self {
        let factory: TransportFactory = Arc::new(
            move |creds: &BillingCredentials| -> BillingResult<Arc<dyn BillingTransport>> {
                let transport = HttpTransport::new(&creds.base_url, request_timeout)?;
                Ok(Arc::new(transport) as Arc<dyn BillingTransport>)
            },
        );
        Self::with_factory(db, factory)
    }

    pub fn with_factory(db: Database, factory: TransportFactory) -> Self {
        TenantClients {
            db,
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the tenant's client, creating it from stored credentials.
    ///
    /// ## Errors
    /// - `MissingCredentials` when nothing is stored for the tenant
    /// - `InvalidConfig` when the stored base URL is unusable
    pub async fn get(&self, tenant_id: &str) -> BillingResult<Arc<BillingApiClient>> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(tenant_id) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().await;

        // Double-check after acquiring write lock
        if let Some(client) = clients.get(tenant_id) {
            return Ok(client.clone());
        }

        let credentials = self
            .db
            .billing()
            .get_credentials(tenant_id)
            .await?
            .ok_or_else(|| BillingError::MissingCredentials {
                tenant_id: tenant_id.to_string(),
            })?;

        debug!(tenant_id = %tenant_id, base_url = %credentials.base_url, "Creating billing client");
        let transport = (self.factory)(&credentials)?;
        let auth = Arc::new(AuthTokenManager::new(credentials, transport.clone()));
        let client = Arc::new(BillingApiClient::new(transport, auth));

        clients.insert(tenant_id.to_string(), client.clone());
        info!(tenant_id = %tenant_id, "Billing client ready");
        Ok(client)
    }

    /// Drops a tenant's client so the next use reloads its credentials.
    pub async fn evict(&self, tenant_id: &str) -> bool {
        self.clients.write().await.remove(tenant_id).is_some()
    }
}
