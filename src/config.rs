// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Every timing constant of the coordinator lives in [`CoordinatorSettings`]
//! so deployments can tune them without a rebuild.

use std::env;
use std::time::Duration;

/// Saxo production gateway.
pub const DEFAULT_API_BASE_URL: &str = "https://gateway.saxobank.com/openapi";
/// Saxo production authentication host.
pub const DEFAULT_AUTH_BASE_URL: &str = "https://live.logonvalidation.net";
/// Redirect URI used when an account record never stored one.
pub const FALLBACK_REDIRECT_URI: &str = "https://my.home-assistant.io/redirect/oauth";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Saxo OAuth application key
    pub client_id: String,
    /// Saxo OAuth application secret
    pub client_secret: String,
    /// OpenAPI gateway base URL
    pub api_base_url: String,
    /// OAuth host base URL (token endpoint is `{auth_base_url}/token`)
    pub auth_base_url: String,
    /// HTTP surface port
    pub port: u16,
    /// JSON file holding the per-account records
    pub accounts_file: String,
    /// Secret used to seal tokens at rest
    pub token_sealing_key: String,
    /// Coordinator tunables
    pub settings: CoordinatorSettings,
}

/// Tunable timing and quota parameters for polling cycles.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Refresh proactively when the refresh token has less than this left.
    pub refresh_token_buffer: chrono::Duration,
    /// Refresh when the access token has less than this left.
    pub access_token_buffer: chrono::Duration,
    /// How long performance data stays fresh.
    pub performance_cache_interval: chrono::Duration,
    /// Outer deadline for a whole cycle.
    pub cycle_timeout: Duration,
    /// Inner deadline for the optional phase. Must be shorter than `cycle_timeout`.
    pub optional_timeout: Duration,
    /// Deadline for a single HTTP request.
    pub request_timeout: Duration,
    /// Attempts per API request, including the first one.
    pub http_max_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub http_backoff_base: Duration,
    /// Upper bound for any single backoff delay.
    pub http_backoff_cap: Duration,
    /// Attempts for the token refresh exchange.
    pub token_refresh_max_attempts: u32,
    /// First token refresh backoff delay; doubles per attempt.
    pub token_refresh_backoff_base: Duration,
    /// Pause between calls of the optional batch.
    pub batch_delay: Duration,
    /// Successful cycles before 429s are logged as warnings.
    pub startup_phase_cycles: u32,
    /// Upper bound of the one-time random stagger.
    pub stagger_max: Duration,
    /// Requests allowed per quota window across all accounts.
    pub rate_limit_requests: usize,
    /// Quota window length.
    pub rate_limit_window: Duration,
    /// Longest pause honored from a 429 `Retry-After` header.
    pub rate_limit_max_hold: Duration,
    /// Sticky availability floor.
    pub sticky_min_failure: chrono::Duration,
    /// Sticky availability multiplier on the update interval.
    pub sticky_interval_multiplier: i32,
    /// Update interval while the configured market is open.
    pub interval_market_hours: Duration,
    /// Update interval while the configured market is closed.
    pub interval_after_hours: Duration,
    /// Update interval for the fixed ("any") schedule.
    pub interval_fixed: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            refresh_token_buffer: chrono::Duration::minutes(5),
            access_token_buffer: chrono::Duration::minutes(5),
            performance_cache_interval: chrono::Duration::hours(2),
            cycle_timeout: Duration::from_secs(30),
            optional_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(10),
            http_max_attempts: 3,
            http_backoff_base: Duration::from_secs(1),
            http_backoff_cap: Duration::from_secs(30),
            token_refresh_max_attempts: 3,
            token_refresh_backoff_base: Duration::from_secs(1),
            batch_delay: Duration::from_millis(500),
            startup_phase_cycles: 3,
            stagger_max: Duration::from_secs(30),
            rate_limit_requests: 120,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_hold: Duration::from_secs(300),
            sticky_min_failure: chrono::Duration::minutes(15),
            sticky_interval_multiplier: 3,
            interval_market_hours: Duration::from_secs(5 * 60),
            interval_after_hours: Duration::from_secs(30 * 60),
            interval_fixed: Duration::from_secs(15 * 60),
        }
    }
}

impl CoordinatorSettings {
    /// Settings for tests: real semantics, millisecond delays.
    pub fn fast() -> Self {
        Self {
            cycle_timeout: Duration::from_secs(5),
            optional_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
            http_backoff_base: Duration::from_millis(1),
            http_backoff_cap: Duration::from_millis(10),
            token_refresh_backoff_base: Duration::from_millis(1),
            batch_delay: Duration::from_millis(1),
            rate_limit_max_hold: Duration::from_millis(20),
            stagger_max: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Apply `SAXO_*` environment overrides on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let settings = Self {
            refresh_token_buffer: env_minutes("SAXO_REFRESH_TOKEN_BUFFER_MINUTES")?
                .unwrap_or(d.refresh_token_buffer),
            access_token_buffer: env_minutes("SAXO_ACCESS_TOKEN_BUFFER_MINUTES")?
                .unwrap_or(d.access_token_buffer),
            performance_cache_interval: env_minutes("SAXO_PERFORMANCE_CACHE_MINUTES")?
                .unwrap_or(d.performance_cache_interval),
            cycle_timeout: env_secs("SAXO_CYCLE_TIMEOUT_SECS")?.unwrap_or(d.cycle_timeout),
            optional_timeout: env_secs("SAXO_OPTIONAL_TIMEOUT_SECS")?
                .unwrap_or(d.optional_timeout),
            request_timeout: env_secs("SAXO_REQUEST_TIMEOUT_SECS")?.unwrap_or(d.request_timeout),
            http_max_attempts: env_parse("SAXO_HTTP_MAX_ATTEMPTS")?
                .unwrap_or(d.http_max_attempts),
            batch_delay: env_millis("SAXO_BATCH_DELAY_MS")?.unwrap_or(d.batch_delay),
            startup_phase_cycles: env_parse("SAXO_STARTUP_PHASE_CYCLES")?
                .unwrap_or(d.startup_phase_cycles),
            stagger_max: env_secs("SAXO_STAGGER_MAX_SECS")?.unwrap_or(d.stagger_max),
            rate_limit_requests: env_parse("SAXO_RATE_LIMIT_PER_MINUTE")?
                .unwrap_or(d.rate_limit_requests),
            interval_market_hours: env_secs("SAXO_INTERVAL_MARKET_SECS")?
                .unwrap_or(d.interval_market_hours),
            interval_after_hours: env_secs("SAXO_INTERVAL_AFTER_HOURS_SECS")?
                .unwrap_or(d.interval_after_hours),
            interval_fixed: env_secs("SAXO_INTERVAL_FIXED_SECS")?.unwrap_or(d.interval_fixed),
            ..d
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations that break the cycle's timing guarantees.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Optional phase must end strictly before the cycle deadline
        if self.optional_timeout >= self.cycle_timeout {
            return Err(ConfigError::Invalid(
                "optional_timeout must be shorter than cycle_timeout",
            ));
        }
        if self.http_max_attempts == 0 || self.token_refresh_max_attempts == 0 {
            return Err(ConfigError::Invalid("attempt counts must be at least 1"));
        }
        if self.rate_limit_requests == 0 {
            return Err(ConfigError::Invalid("rate limit must allow at least 1 request"));
        }
        Ok(())
    }
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            client_id: "test_client_id".to_string(),
            client_secret: "test_secret".to_string(),
            api_base_url: "http://localhost:9999/openapi".to_string(),
            auth_base_url: "http://localhost:9999".to_string(),
            port: 8080,
            accounts_file: "accounts.json".to_string(),
            token_sealing_key: "test_sealing_key_32_bytes_minimum".to_string(),
            settings: CoordinatorSettings::fast(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honored for local runs.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            client_id: env::var("SAXO_CLIENT_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SAXO_CLIENT_ID"))?,
            client_secret: env::var("SAXO_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SAXO_CLIENT_SECRET"))?,
            api_base_url: env::var("SAXO_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            auth_base_url: env::var("SAXO_AUTH_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_AUTH_BASE_URL.to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            accounts_file: env::var("ACCOUNTS_FILE")
                .unwrap_or_else(|_| "accounts.json".to_string()),
            token_sealing_key: env::var("TOKEN_SEALING_KEY")
                .map_err(|_| ConfigError::Missing("TOKEN_SEALING_KEY"))?,
            settings: CoordinatorSettings::from_env()?,
        })
    }

    /// Full URL of the OAuth token endpoint.
    pub fn token_url(&self) -> String {
        format!("{}/token", self.auth_base_url.trim_end_matches('/'))
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparseable(name)),
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}

fn env_millis(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

fn env_minutes(name: &'static str) -> Result<Option<chrono::Duration>, ConfigError> {
    Ok(env_parse::<i64>(name)?.map(chrono::Duration::minutes))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Environment variable {0} could not be parsed")]
    Unparseable(&'static str),

    #[error("Invalid settings: {0}")]
    Invalid(&'static str),
}
