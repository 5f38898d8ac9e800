use crate::provider::ProviderSettings;
use crate::sync::scheduler::ScheduleSettings;
use crate::sync::SyncSettings;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Complete calsync configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalsyncConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Externally reachable base URL, used for the OAuth redirect URI
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Where the callback sends the browser after a successful connect
    #[serde(default = "default_success_redirect")]
    pub success_redirect: String,
    #[serde(default = "default_error_redirect")]
    pub error_redirect: String,
    /// When false every request acts as the "default" owner
    #[serde(default = "default_auth_enabled")]
    pub auth_enabled: bool,
    /// Empty means permissive CORS
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_success_redirect() -> String {
    "/settings?calendar=connected".to_string()
}

fn default_error_redirect() -> String {
    "/settings?calendar=error".to_string()
}

fn default_auth_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
            success_redirect: default_success_redirect(),
            error_redirect: default_error_redirect(),
            auth_enabled: default_auth_enabled(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// OAuth callback URL registered with the provider
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}/api/calendar/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "calsync.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Calendar provider endpoints and scopes
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_scopes() -> Vec<String> {
    [
        "https://www.googleapis.com/auth/calendar",
        "https://www.googleapis.com/auth/calendar.events",
        "openid",
        "email",
        "profile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            scopes: default_scopes(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Reconciliation limits and the periodic trigger
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_window_days")]
    pub default_window_days: i64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_run_deadline")]
    pub run_deadline_seconds: u64,
    /// 0 disables the periodic trigger
    #[serde(default)]
    pub interval_seconds: u64,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

fn default_window_days() -> i64 {
    30
}

fn default_max_results() -> usize {
    250
}

fn default_page_size() -> usize {
    250
}

fn default_run_deadline() -> u64 {
    120
}

fn default_max_concurrent_runs() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            max_results: default_max_results(),
            page_size: default_page_size(),
            run_deadline_seconds: default_run_deadline(),
            interval_seconds: 0,
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

impl SyncConfig {
    pub fn engine_settings(&self) -> SyncSettings {
        SyncSettings {
            max_results: self.max_results.max(1),
            page_size: self.page_size.max(1),
            run_deadline: Duration::from_secs(self.run_deadline_seconds),
        }
    }

    /// None when the periodic trigger is disabled
    pub fn schedule_settings(&self) -> Option<ScheduleSettings> {
        (self.interval_seconds > 0).then(|| ScheduleSettings {
            interval: Duration::from_secs(self.interval_seconds),
            window_days: self.default_window_days,
            max_concurrent_runs: self.max_concurrent_runs,
        })
    }
}

/// OAuth state configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_state_expiry() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_expiry_seconds: default_state_expiry(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

/// Values that never live in the config file
#[derive(Clone)]
pub struct Secrets {
    pub client_id: String,
    pub client_secret: String,
    /// Base64-encoded 32-byte key
    pub encryption_key: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: std::env::var("CALSYNC_CLIENT_ID").context("CALSYNC_CLIENT_ID is required")?,
            client_secret: std::env::var("CALSYNC_CLIENT_SECRET")
                .context("CALSYNC_CLIENT_SECRET is required")?,
            encryption_key: std::env::var("CALSYNC_ENCRYPTION_KEY")
                .context("CALSYNC_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?,
        })
    }
}

impl CalsyncConfig {
    /// Applies `CALSYNC_*` overrides looked up through `var`.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = var("CALSYNC_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(path) = var("CALSYNC_DATABASE_PATH") {
            self.storage.database_path = path;
        }
        if let Some(url) = var("CALSYNC_PUBLIC_BASE_URL") {
            self.server.public_base_url = url;
        }
        if let Some(secs) = var("CALSYNC_SYNC_INTERVAL_SECONDS") {
            self.sync.interval_seconds = secs
                .parse()
                .context("CALSYNC_SYNC_INTERVAL_SECONDS must be a whole number of seconds")?;
        }
        Ok(())
    }

    pub fn provider_settings(&self, secrets: &Secrets) -> ProviderSettings {
        ProviderSettings {
            auth_url: self.provider.auth_url.clone(),
            token_url: self.provider.token_url.clone(),
            api_base_url: self.provider.api_base_url.clone(),
            scopes: self.provider.scopes.clone(),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            redirect_uri: self.server.redirect_uri(),
            request_timeout: Duration::from_secs(self.provider.request_timeout_seconds),
        }
    }
}

/// Load configuration from a TOML file. A missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CalsyncConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(CalsyncConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: CalsyncConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
