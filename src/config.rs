// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup and handed to the services that need
//! it; nothing reads the environment after `Config::from_env` returns.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// AWeber OAuth client ID (public)
    pub aweber_client_id: String,
    /// OAuth redirect URI registered with AWeber
    pub aweber_redirect_uri: String,
    /// Base URL of the AWeber REST API
    pub api_base_url: String,
    /// OAuth token endpoint (refresh and authorization-code grants)
    pub token_url: String,
    /// OAuth consent endpoint
    pub authorize_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (KMS key ring and Cloud Tasks queue location)
    pub gcp_region: String,
    /// Public URL of this service, used for Cloud Tasks continuations
    pub service_url: Option<String>,
    /// Webhook that relays alerts (e.g. to email)
    pub alert_webhook_url: Option<String>,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// AWeber OAuth client secret
    pub aweber_client_secret: String,
    /// Shared secret the scheduler presents on `/tasks/*`
    pub scheduler_token: String,
    /// HMAC key for the OAuth `state` parameter
    pub oauth_state_key: Vec<u8>,

    /// Sync tuning knobs
    pub sync: SyncSettings,
}

/// Tunables for pagination, retry and batching.
///
/// Defaults match the delays and limits the sync has always used against
/// AWeber's undocumented rate limits.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Broadcasts newly written per invocation before checkpointing
    pub broadcast_batch_limit: usize,
    /// Value written to the Audience column
    pub broadcast_audience: String,
    /// Use the newest broadcast of the previous run as a pagination sentinel
    pub broadcast_stop_at_last_seen: bool,
    /// Delay between broadcast collection pages
    pub broadcast_page_delay: Duration,
    /// Delay after each broadcast row write
    pub broadcast_write_delay: Duration,
    /// Attempts for a broadcast detail fetch
    pub detail_retry_attempts: u32,
    /// First backoff delay for a broadcast detail fetch (doubles per attempt)
    pub detail_retry_base_delay: Duration,

    /// Subscriber page size for bulk and incremental loads
    pub subscriber_page_size: u32,
    /// Subscriber page size for the id-only reconciliation pass
    pub reconcile_page_size: u32,
    /// Delay between pages during the first-run bulk load
    pub bulk_page_delay: Duration,
    /// Delay between pages during incremental loads and reconciliation
    pub incremental_page_delay: Duration,
    /// Rows written per store batch
    pub write_batch_size: usize,
    /// Delay between store write batches
    pub write_batch_delay: Duration,
    /// Lookback used when no plausible sync cursor is stored
    pub default_lookback: chrono::Duration,

    /// Token refresh-and-retry ceiling for HTTP 401
    pub max_auth_retries: u32,
    /// Delay before retrying a request with a refreshed token
    pub auth_retry_delay: Duration,
    /// Wait used when a throttled response carries no Retry-After
    pub rate_limit_default_wait: Duration,
    /// Cap on any single throttling wait
    pub rate_limit_max_wait: Duration,
    /// Throttled attempts allowed per request
    pub rate_limit_max_attempts: u32,
    /// Attempts for 5xx and transport failures
    pub transient_retry_attempts: u32,
    /// First backoff delay for 5xx and transport failures
    pub transient_retry_base_delay: Duration,

    /// Suppression window for repeated alerts with the same subject
    pub alert_debounce: chrono::Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            broadcast_batch_limit: 5,
            broadcast_audience: "all".to_string(),
            broadcast_stop_at_last_seen: false,
            broadcast_page_delay: Duration::from_millis(500),
            broadcast_write_delay: Duration::from_millis(2000),
            detail_retry_attempts: 3,
            detail_retry_base_delay: Duration::from_secs(2),

            subscriber_page_size: 100,
            reconcile_page_size: 500,
            bulk_page_delay: Duration::from_millis(1500),
            incremental_page_delay: Duration::from_millis(1000),
            write_batch_size: 100,
            write_batch_delay: Duration::from_millis(1000),
            default_lookback: chrono::Duration::hours(24),

            max_auth_retries: 3,
            auth_retry_delay: Duration::from_secs(5),
            rate_limit_default_wait: Duration::from_secs(10),
            rate_limit_max_wait: Duration::from_secs(120),
            rate_limit_max_attempts: 5,
            transient_retry_attempts: 3,
            transient_retry_base_delay: Duration::from_secs(2),

            alert_debounce: chrono::Duration::hours(1),
        }
    }
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            aweber_client_id: "test_client_id".to_string(),
            aweber_redirect_uri: "http://localhost:8080/auth/aweber/callback".to_string(),
            api_base_url: "http://localhost:9999/1.0".to_string(),
            token_url: "http://localhost:9999/oauth2/token".to_string(),
            authorize_url: "http://localhost:9999/oauth2/authorize".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            service_url: None,
            alert_webhook_url: None,
            port: 8080,
            aweber_client_secret: "test_secret".to_string(),
            scheduler_token: "test_scheduler_token".to_string(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
            sync: SyncSettings::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development. Secrets arrive as
    /// environment variables through Cloud Run secret bindings.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            broadcast_batch_limit: parse_or("BROADCAST_BATCH_LIMIT", defaults.broadcast_batch_limit)?,
            broadcast_audience: env::var("BROADCAST_AUDIENCE")
                .unwrap_or(defaults.broadcast_audience),
            broadcast_stop_at_last_seen: parse_or(
                "BROADCAST_STOP_AT_LAST_SEEN",
                defaults.broadcast_stop_at_last_seen,
            )?,
            rate_limit_max_attempts: parse_or(
                "RATE_LIMIT_MAX_ATTEMPTS",
                defaults.rate_limit_max_attempts,
            )?,
            default_lookback: chrono::Duration::hours(parse_or(
                "DEFAULT_LOOKBACK_HOURS",
                defaults.default_lookback.num_hours(),
            )?),
            ..defaults
        };

        Ok(Self {
            aweber_client_id: env::var("AWEBER_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("AWEBER_CLIENT_ID"))?,
            aweber_redirect_uri: env::var("AWEBER_REDIRECT_URI")
                .unwrap_or_else(|_| "http://localhost:8080/auth/aweber/callback".to_string()),
            api_base_url: env::var("AWEBER_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.aweber.com/1.0".to_string()),
            token_url: env::var("AWEBER_TOKEN_URL")
                .unwrap_or_else(|_| "https://auth.aweber.com/oauth2/token".to_string()),
            authorize_url: env::var("AWEBER_AUTHORIZE_URL")
                .unwrap_or_else(|_| "https://auth.aweber.com/oauth2/authorize".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            service_url: env::var("SERVICE_URL").ok().filter(|v| !v.is_empty()),
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),

            aweber_client_secret: env::var("AWEBER_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("AWEBER_CLIENT_SECRET"))?,
            scheduler_token: env::var("SCHEDULER_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SCHEDULER_TOKEN"))?,
            oauth_state_key: env::var("OAUTH_STATE_KEY")
                .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
                .into_bytes(),

            sync,
        })
    }
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
