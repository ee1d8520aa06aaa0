//! Shared fixtures for unit tests: a scripted in-process billing provider
//! plus seeded tenants and sales.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::auth::AuthTokenManager;
use crate::client::BillingApiClient;
use crate::error::{BillingError, BillingResult};
use crate::payload::InvoicePayload;
use crate::tenants::{TenantClients, TransportFactory};
use crate::transport::{BillingTransport, ProviderRequest, ProviderResponse, Route};
use kardex_core::{
    BillingCredentials, BillingEnvironment, BillingProfile, InvoiceStatus, Sale, SaleItem,
    SaleStatus,
};
use kardex_db::{Database, DbConfig};

// =============================================================================
// Fake Provider
// =============================================================================

/// One scripted provider reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Response { status: u16, body: Vec<u8> },
    /// The request never completes.
    Timeout,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Reply::Response {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn status(status: u16) -> Self {
        Reply::Response {
            status,
            body: Vec::new(),
        }
    }

    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        Reply::Response { status, body }
    }
}

/// In-process provider. Each route replays its script in order and then
/// keeps repeating the last reply.
///
/// Unscripted logins succeed with `tok-1`, `tok-2`, ... valid for 8 hours.
/// Other unscripted routes answer 500.
#[derive(Default)]
pub struct FakeProvider {
    scripts: Mutex<HashMap<Route, VecDeque<Reply>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, route: Route, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(route, replies.into_iter().collect());
    }

    pub fn calls(&self, route: Route) -> usize {
        self.requests(route).len()
    }

    pub fn requests(&self, route: Route) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.route == route)
            .cloned()
            .collect()
    }

    fn next_reply(&self, route: Route) -> Option<Reply> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(&route)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl BillingTransport for FakeProvider {
    async fn send(&self, request: ProviderRequest) -> BillingResult<ProviderResponse> {
        let route = request.route;
        self.requests.lock().unwrap().push(request);

        let reply = match self.next_reply(route) {
            Some(reply) => reply,
            None if route == Route::Login => Reply::json(
                200,
                json!({
                    "token": format!("tok-{}", self.calls(Route::Login)),
                    "token_expires_at": (Utc::now() + Duration::hours(8)).to_rfc3339(),
                }),
            ),
            None => Reply::json(500, json!({"message": "unscripted route"})),
        };

        match reply {
            Reply::Response { status, body } => Ok(ProviderResponse { status, body }),
            Reply::Timeout => Err(BillingError::Transient("request timed out".to_string())),
        }
    }
}

// =============================================================================
// Tenant Fixtures
// =============================================================================

pub fn credentials(tenant_id: &str) -> BillingCredentials {
    BillingCredentials {
        tenant_id: tenant_id.to_string(),
        base_url: "https://billing.example.com/api".to_string(),
        email: format!("{}@example.com", tenant_id),
        password: "secret".to_string(),
    }
}

pub fn profile(tenant_id: &str) -> BillingProfile {
    BillingProfile {
        tenant_id: tenant_id.to_string(),
        ruc: "1790012345001".to_string(),
        business_name: "Ferreteria El Clavo".to_string(),
        environment: BillingEnvironment::Sandbox,
        accounting_obligated: false,
        establishment_code: "001".to_string(),
        emission_point: "002".to_string(),
        signature_expires_at: Some(Utc::now() + Duration::days(365)),
        updated_at: Utc::now(),
    }
}

pub fn client_with(provider: Arc<FakeProvider>) -> BillingApiClient {
    let auth = Arc::new(AuthTokenManager::new(credentials("t1"), provider.clone()));
    BillingApiClient::new(provider, auth)
}

pub fn sample_payload(access_key: &str) -> InvoicePayload {
    let sale = sale_row("t1", "R-1", "1712345678");
    let items = vec![SaleItem {
        id: "I1".to_string(),
        sale_id: sale.id.clone(),
        product_id: "P1".to_string(),
        sku_snapshot: "A-1".to_string(),
        name_snapshot: "Hammer".to_string(),
        unit_price_cents: 1000,
        quantity: 2,
        line_total_cents: 2000,
        tax_rate_bps: 1500,
        tax_cents: 300,
        discount_cents: 0,
        created_at: sale.created_at,
    }];
    InvoicePayload::build(&sale, &items, &profile("t1"), access_key)
}

// =============================================================================
// Database Fixtures
// =============================================================================

pub async fn setup() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub async fn seed_profile(db: &Database, tenant_id: &str) {
    db.billing().upsert_profile(&profile(tenant_id)).await.unwrap();
}

pub async fn seed_tenant(db: &Database, tenant_id: &str) {
    db.billing()
        .upsert_credentials(&credentials(tenant_id))
        .await
        .unwrap();
    seed_profile(db, tenant_id).await;
}

/// Registry whose clients all talk to `provider`.
pub fn fake_clients(db: &Database, provider: Arc<FakeProvider>) -> TenantClients {
    let factory: TransportFactory = Arc::new(
        move |_: &BillingCredentials| -> BillingResult<Arc<dyn BillingTransport>> {
            Ok(provider.clone() as Arc<dyn BillingTransport>)
        },
    );
    TenantClients::with_factory(db.clone(), factory)
}

fn sale_row(tenant_id: &str, receipt: &str, customer_tax_id: &str) -> Sale {
    let now = Utc::now();
    Sale {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        receipt_number: receipt.to_string(),
        status: SaleStatus::Draft,
        subtotal_cents: 2500,
        tax_cents: 375,
        discount_cents: 0,
        total_cents: 2875,
        customer_tax_id: customer_tax_id.to_string(),
        customer_name: Some("Maria Lopez".to_string()),
        invoice_status: InvoiceStatus::Pending,
        invoice_sequential: Some(1),
        access_key: None,
        document_id: None,
        last_error: None,
        created_at: now,
        updated_at: now,
        completed_at: Some(now),
    }
}

/// Completed electronic sale with two lines and a queued invoice job.
pub async fn completed_sale(db: &Database, tenant_id: &str, receipt: &str) -> Sale {
    completed_sale_for(db, tenant_id, receipt, "1712345678").await
}

pub async fn completed_sale_for(
    db: &Database,
    tenant_id: &str,
    receipt: &str,
    customer_tax_id: &str,
) -> Sale {
    let sales = db.sales();
    let mut draft = sale_row(tenant_id, receipt, customer_tax_id);
    draft.invoice_sequential = None;
    draft.completed_at = None;
    sales.insert_sale(&draft).await.unwrap();

    for (sku, unit, qty, tax) in [("A-1", 1000, 2, 300), ("B-2", 500, 1, 75)] {
        sales
            .add_item(&SaleItem {
                id: uuid::Uuid::new_v4().to_string(),
                sale_id: draft.id.clone(),
                product_id: format!("prod-{}", sku),
                sku_snapshot: sku.to_string(),
                name_snapshot: format!("Product {}", sku),
                unit_price_cents: unit,
                quantity: qty,
                line_total_cents: unit * qty,
                tax_rate_bps: 1500,
                tax_cents: tax,
                discount_cents: 0,
                created_at: draft.created_at,
            })
            .await
            .unwrap();
    }

    sales.complete_sale(&draft.id, true).await.unwrap()
}
