//! # Billing Configuration
//!
//! Configuration for the invoicing daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KARDEX_BILLING_URL=https://billing.example.com/api                 │
//! │     KARDEX_TENANT_ID=store-001                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kardex-pos/billing.toml (Linux)                          │
//! │     ~/Library/Application Support/com.kardex.pos/billing.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     4 workers, 5 attempts, 2 s base delay capped at 5 min              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # billing.toml
//! [provider]
//! base_url = "https://billing.example.com/api"
//! email = "owner@store.example"
//! password = "secret"
//! environment = "sandbox"   # sandbox | production
//! request_timeout_secs = 10
//!
//! [tenant]
//! id = "store-001"
//!
//! [worker]
//! pool_size = 4
//! poll_interval_ms = 1000
//! visibility_timeout_secs = 120
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 2000
//! max_delay_secs = 300
//! jitter = 0.5
//!
//! [database]
//! path = "/var/lib/kardex/kardex.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BillingError, BillingResult};
use crate::retry::RetryPolicy;
use crate::worker::WorkerSettings;
use kardex_core::{BillingCredentials, BillingEnvironment, DEFAULT_TENANT_ID};

// =============================================================================
// Provider Settings
// =============================================================================

/// Where and as whom to talk to the billing provider.
///
/// Credentials are optional here: a tenant whose credentials are already in
/// the database needs none of them.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub password: String,

    /// Environment the tenant's profile is expected to target.
    #[serde(default)]
    pub environment: BillingEnvironment,

    /// Bound on every provider HTTP call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            base_url: String::new(),
            email: String::new(),
            password: String::new(),
            environment: BillingEnvironment::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("environment", &self.environment)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// =============================================================================
// Tenant Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default = "default_tenant_id")]
    pub id: String,
}

fn default_tenant_id() -> String {
    DEFAULT_TENANT_ID.to_string()
}

impl Default for TenantSettings {
    fn default() -> Self {
        TenantSettings {
            id: default_tenant_id(),
        }
    }
}

// =============================================================================
// Worker Settings
// =============================================================================

/// Worker pool behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolSettings {
    /// Number of concurrent workers.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Idle poll interval (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Lease duration before another worker may take a job over (seconds).
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

fn default_pool_size() -> usize {
    4
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_visibility_timeout() -> u64 {
    120
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        WorkerPoolSettings {
            pool_size: default_pool_size(),
            poll_interval_ms: default_poll_interval(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempt budget per invoice, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Randomization factor in [0, 1].
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay() -> u64 {
    2000
}
fn default_max_delay() -> u64 {
    300
}
fn default_jitter() -> f64 {
    0.5
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_secs: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `kardex.db` in the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Billing Configuration
// =============================================================================

/// Complete invoicing daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub tenant: TenantSettings,

    #[serde(default)]
    pub worker: WorkerPoolSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl BillingConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (billing.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> BillingResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading billing config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load billing config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BillingResult<()> {
        let base_url = self.provider.base_url.trim();
        if !base_url.is_empty()
            && !base_url.starts_with("http://")
            && !base_url.starts_with("https://")
        {
            return Err(BillingError::InvalidConfig(format!(
                "Provider URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        if self.provider.request_timeout_secs == 0 {
            return Err(BillingError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.tenant.id.trim().is_empty() {
            return Err(BillingError::InvalidConfig("tenant id must not be empty".into()));
        }

        if self.worker.pool_size == 0 {
            return Err(BillingError::InvalidConfig(
                "pool_size must be greater than 0".into(),
            ));
        }

        if self.worker.poll_interval_ms == 0 {
            return Err(BillingError::InvalidConfig(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(BillingError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }

        if Duration::from_millis(self.retry.base_delay_ms)
            > Duration::from_secs(self.retry.max_delay_secs)
        {
            return Err(BillingError::InvalidConfig(
                "base_delay_ms must not exceed max_delay_secs".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(BillingError::InvalidConfig(format!(
                "jitter must be within [0, 1], got: {}",
                self.retry.jitter
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("KARDEX_BILLING_URL") {
            debug!(url = %url, "Overriding provider URL from environment");
            self.provider.base_url = url;
        }

        if let Ok(email) = std::env::var("KARDEX_BILLING_EMAIL") {
            self.provider.email = email;
        }

        if let Ok(password) = std::env::var("KARDEX_BILLING_PASSWORD") {
            self.provider.password = password;
        }

        if let Ok(env) = std::env::var("KARDEX_BILLING_ENVIRONMENT") {
            match env.parse() {
                Ok(parsed) => self.provider.environment = parsed,
                Err(_) => warn!(environment = %env, "Unknown billing environment in environment"),
            }
        }

        if let Ok(id) = std::env::var("KARDEX_TENANT_ID") {
            debug!(tenant_id = %id, "Overriding tenant from environment");
            self.tenant.id = id;
        }

        if let Ok(size) = std::env::var("KARDEX_WORKER_POOL_SIZE") {
            if let Ok(n) = size.parse::<usize>() {
                self.worker.pool_size = n;
            }
        }

        if let Ok(attempts) = std::env::var("KARDEX_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                self.retry.max_attempts = n;
            }
        }

        if let Ok(path) = std::env::var("KARDEX_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kardex", "pos")
            .map(|dirs| dirs.config_dir().join("billing.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    /// Provider credentials for the configured tenant, when fully configured.
    pub fn credentials(&self) -> Option<BillingCredentials> {
        let p = &self.provider;
        if p.base_url.trim().is_empty() || p.email.is_empty() || p.password.is_empty() {
            return None;
        }
        Some(BillingCredentials {
            tenant_id: self.tenant.id.clone(),
            base_url: p.base_url.trim().to_string(),
            email: p.email.clone(),
            password: p.password.clone(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
            jitter: self.retry.jitter,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            visibility_timeout: Duration::from_secs(self.worker.visibility_timeout_secs),
        }
    }

    /// SQLite file to open.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "kardex", "pos")
                .map(|dirs| dirs.data_dir().join("kardex.db"))
                .unwrap_or_else(|| PathBuf::from("kardex.db"))
        })
    }
}
