// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Saxo OpenAPI client for portfolio data.
//!
//! Handles:
//! - Per-request timeout with exponential backoff retry
//! - Shared client-side quota and server `Retry-After` holds
//! - 429 severity that depends on the account's startup phase
//! - 401/403 annotation with masked OAuth diagnostics
//! - Readable summaries of HTML error pages

use crate::config::CoordinatorSettings;
use crate::error::AppError;
use crate::models::performance::{
    AccountsResponse, ClientDetails, PerformancePeriod, PerformanceV3, PerformanceV4,
};
use crate::models::token::mask_secret;
use crate::models::{Balance, BalanceResponse};
use crate::services::rate_limit::SharedRateLimiter;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const BALANCES_PATH: &str = "/port/v1/balances/me";
const CLIENTS_PATH: &str = "/port/v1/clients/me";
const ACCOUNTS_PATH: &str = "/port/v1/accounts/me";
const PERF_V3_PATH: &str = "/hist/v3/perf";
const PERF_V4_PATH: &str = "/hist/v4/performance/timeseries";

const USER_AGENT: &str = concat!("saxo-portfolio/", env!("CARGO_PKG_VERSION"));

/// Data calls the coordinator makes against the brokerage.
#[async_trait]
pub trait PortfolioApi: Send + Sync {
    async fn get_balance(&self) -> Result<Balance, AppError>;
    async fn get_client_details(&self) -> Result<ClientDetails, AppError>;
    async fn get_accounts(&self) -> Result<AccountsResponse, AppError>;
    async fn get_performance_v3(&self, client_key: &str) -> Result<PerformanceV3, AppError>;
    async fn get_performance_v4(
        &self,
        client_key: &str,
        period: PerformancePeriod,
    ) -> Result<PerformanceV4, AppError>;
    /// Release the underlying connection pool.
    async fn close(&self) -> Result<(), AppError>;
}

/// Builds a client bound to one bearer token.
pub trait ApiFactory: Send + Sync {
    fn create(&self, access_token: &str) -> Result<Arc<dyn PortfolioApi>, AppError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup phase and auth diagnostics
// ─────────────────────────────────────────────────────────────────────────────

/// Counts successful cycles; 429s are expected noise until the threshold.
#[derive(Debug)]
pub struct StartupPhase {
    successful_cycles: AtomicU32,
    threshold: u32,
}

impl StartupPhase {
    pub fn new(threshold: u32) -> Self {
        Self {
            successful_cycles: AtomicU32::new(0),
            threshold,
        }
    }

    pub fn record_success(&self) -> u32 {
        self.successful_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn successful_cycles(&self) -> u32 {
        self.successful_cycles.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.successful_cycles() < self.threshold
    }

    /// Severity for a 429 seen right now.
    pub fn rate_limit_level(&self) -> tracing::Level {
        if self.is_active() {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        }
    }
}

/// Where the redirect URI used for token calls came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectSource {
    Stored,
    Fallback,
}

impl std::fmt::Display for RedirectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedirectSource::Stored => f.write_str("stored config"),
            RedirectSource::Fallback => f.write_str("fallback default"),
        }
    }
}

/// Non-secret context attached to authentication failures.
#[derive(Debug, Clone)]
pub struct AuthDiagnostics {
    pub client_id: String,
    pub redirect_uri: String,
    pub redirect_source: RedirectSource,
}

impl AuthDiagnostics {
    pub fn describe(&self) -> String {
        format!(
            "client_id={} redirect_uri={} (from {})",
            mask_secret(&self.client_id),
            self.redirect_uri,
            self.redirect_source
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry policy
// ─────────────────────────────────────────────────────────────────────────────

/// Attempts, backoff and per-request timeout.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub request_timeout: Duration,
    pub max_hold: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &CoordinatorSettings) -> Self {
        Self {
            max_attempts: settings.http_max_attempts,
            backoff_base: settings.http_backoff_base,
            backoff_cap: settings.http_backoff_cap,
            request_timeout: settings.request_timeout,
            max_hold: settings.rate_limit_max_hold,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): base, 2×base, 4×base…
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SaxoClient
// ─────────────────────────────────────────────────────────────────────────────

/// Saxo OpenAPI client bound to a single access token.
pub struct SaxoClient {
    /// `None` once closed
    http: RwLock<Option<reqwest::Client>>,
    base_url: String,
    access_token: String,
    limiter: SharedRateLimiter,
    startup: Arc<StartupPhase>,
    auth: AuthDiagnostics,
    policy: RetryPolicy,
}

impl SaxoClient {
    pub fn new(
        base_url: &str,
        access_token: &str,
        limiter: SharedRateLimiter,
        startup: Arc<StartupPhase>,
        auth: AuthDiagnostics,
        policy: RetryPolicy,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http: RwLock::new(Some(http)),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            limiter,
            startup,
            auth,
            policy,
        })
    }

    fn http(&self) -> Result<reqwest::Client, AppError> {
        self.http
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("HTTP client already closed")))
    }

    /// GET with quota, timeout and retry.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            self.limiter.acquire().await;

            let outcome =
                match tokio::time::timeout(self.policy.request_timeout, self.send_once(&url, query))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(format!(
                        "{} did not answer within {:?}",
                        path, self.policy.request_timeout
                    ))),
                };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if err.is_reauth_required() {
                tracing::error!(endpoint = path, error = %err, "Saxo API rejected credentials");
                return Err(err);
            }

            let mut delay = self.policy.backoff(attempt);
            if let AppError::RateLimited { retry_after } = &err {
                self.log_rate_limited(path, attempt, max_attempts);
                if let Some(hold) = retry_after {
                    let hold = (*hold).min(self.policy.max_hold);
                    self.limiter.hold_for(hold).await;
                    delay = delay.max(hold);
                }
            }

            if !err.is_transient() || attempt >= max_attempts {
                return Err(err);
            }

            if !err.is_rate_limited() {
                tracing::warn!(
                    endpoint = path,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Saxo request failed, retrying"
                );
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn log_rate_limited(&self, path: &str, attempt: u32, max_attempts: u32) {
        let cycles = self.startup.successful_cycles();
        if self.startup.rate_limit_level() == tracing::Level::WARN {
            tracing::warn!(endpoint = path, attempt, max_attempts, cycles, "Saxo rate limit hit (429)");
        } else {
            tracing::debug!(
                endpoint = path,
                attempt,
                max_attempts,
                cycles,
                "Saxo rate limit hit during startup (429)"
            );
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let response = self
            .http()?
            .get(url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;

        self.check_response_json(response).await
    }

    /// Check response status and parse the JSON body.
    async fn check_response_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| AppError::from_transport(&e))?;
            return serde_json::from_str(&body)
                .map_err(|e| AppError::InvalidResponse(format!("JSON parse error: {}", e)));
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        classify_status(status.as_u16(), &body, retry_after, &self.auth)
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify_status<T>(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
    auth: &AuthDiagnostics,
) -> Result<T, AppError> {
    match status {
        429 => Err(AppError::RateLimited { retry_after }),
        401 | 403 => Err(AppError::PermanentAuth {
            status,
            context: format!("{}; {}", summarize_error_body(body), auth.describe()),
        }),
        _ => Err(AppError::Http {
            status,
            message: summarize_error_body(body),
        }),
    }
}

/// Turn an error body into one readable line.
///
/// The gateway sometimes answers with an HTML page; its title or first
/// heading is used instead of the markup.
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }

    let lower = trimmed.to_ascii_lowercase();
    let is_html = lower.starts_with("<!doctype html") || lower.contains("<html");
    if !is_html {
        return truncate(trimmed, 200);
    }

    for tag in ["title", "h1"] {
        if let Some(text) = extract_tag(trimmed, &lower, tag) {
            return format!("HTML error page: {}", text);
        }
    }
    "HTML error page".to_string()
}

fn extract_tag(original: &str, lower: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let start = lower.find(&open)?;
    let content_start = start + lower[start..].find('>')? + 1;
    let content_end = content_start + lower[content_start..].find(&close)?;
    let text = original[content_start..content_end]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

#[async_trait]
impl PortfolioApi for SaxoClient {
    async fn get_balance(&self) -> Result<Balance, AppError> {
        let raw: BalanceResponse = self.get_json(BALANCES_PATH, &[]).await?;
        raw.validate()
    }

    async fn get_client_details(&self) -> Result<ClientDetails, AppError> {
        self.get_json(CLIENTS_PATH, &[]).await
    }

    async fn get_accounts(&self) -> Result<AccountsResponse, AppError> {
        self.get_json(ACCOUNTS_PATH, &[]).await
    }

    async fn get_performance_v3(&self, client_key: &str) -> Result<PerformanceV3, AppError> {
        let path = format!("{}/{}", PERF_V3_PATH, client_key);
        self.get_json(&path, &[("StandardPeriod", "Year")]).await
    }

    async fn get_performance_v4(
        &self,
        client_key: &str,
        period: PerformancePeriod,
    ) -> Result<PerformanceV4, AppError> {
        self.get_json(
            PERF_V4_PATH,
            &[
                ("ClientKey", client_key),
                ("StandardPeriod", period.as_str()),
                ("FieldGroups", "Balance,KeyFigures"),
            ],
        )
        .await
    }

    async fn close(&self) -> Result<(), AppError> {
        let taken = self
            .http
            .write()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("HTTP client lock poisoned")))?
            .take();
        if taken.is_none() {
            tracing::debug!("Saxo client already closed");
        }
        Ok(())
    }
}

/// Creates [`SaxoClient`]s that share one quota and startup phase.
pub struct SaxoClientFactory {
    pub base_url: String,
    pub limiter: SharedRateLimiter,
    pub startup: Arc<StartupPhase>,
    pub auth: AuthDiagnostics,
    pub policy: RetryPolicy,
}

impl ApiFactory for SaxoClientFactory {
    fn create(&self, access_token: &str) -> Result<Arc<dyn PortfolioApi>, AppError> {
        let client = SaxoClient::new(
            &self.base_url,
            access_token,
            self.limiter.clone(),
            self.startup.clone(),
            self.auth.clone(),
            self.policy.clone(),
        )?;
        Ok(Arc::new(client))
    }
}
