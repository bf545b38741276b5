use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::batch::{BatchingConfig, RecoveryConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a sync-mode HTTP caller waits for its batch result.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    24 * 60 * 60 // provider completion window
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("batchgate.db")
}

/// Batch provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider base URL (e.g., "https://api.openai.com")
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// API key (falls back to `OPENAI_API_KEY`)
    #[serde(default)]
    pub api_key: String,
    /// HTTP request timeout in seconds (default: 60)
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u32,
    /// Batch completion window requested from the provider
    #[serde(default = "default_completion_window")]
    pub completion_window: String,
    /// Endpoint every batch line targets
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            timeout_secs: default_provider_timeout(),
            completion_window: default_completion_window(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_provider_timeout() -> u32 {
    60
}

fn default_completion_window() -> String {
    "24h".to_string()
}

fn default_endpoint() -> String {
    "/v1/chat/completions".to_string()
}

/// How callers of `add_request` are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServingMode {
    /// Block until the batch containing the request resolves.
    #[default]
    Sync,
    /// Acknowledge immediately; the result only lands in the cache.
    Async,
    /// Answer from the cache only; never submit work.
    #[serde(alias = "cache_only")]
    CacheOnly,
}

impl ServingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServingMode::Sync => "sync",
            ServingMode::Async => "async",
            ServingMode::CacheOnly => "cache-only",
        }
    }

    /// Whether requests in this mode may trigger provider submissions.
    pub fn submits_work(&self) -> bool {
        !matches!(self, ServingMode::CacheOnly)
    }
}

impl std::fmt::Display for ServingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serving configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServingConfig {
    #[serde(default)]
    pub mode: ServingMode,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: SanitizedProviderConfig,
    pub serving: ServingConfig,
    pub batching: BatchingConfig,
    pub recovery: RecoveryConfig,
}

/// Sanitized provider config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub api_base: String,
    pub api_key_configured: bool,
    pub timeout_secs: u32,
    pub completion_window: String,
    pub endpoint: String,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            provider: SanitizedProviderConfig {
                api_base: config.provider.api_base.clone(),
                api_key_configured: !config.provider.api_key.is_empty(),
                timeout_secs: config.provider.timeout_secs,
                completion_window: config.provider.completion_window.clone(),
                endpoint: config.provider.endpoint.clone(),
            },
            serving: config.serving.clone(),
            batching: config.batching.clone(),
            recovery: config.recovery.clone(),
        }
    }
}
