// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token manager: keeps one account's OAuth tokens valid.

use crate::config::{Config, FALLBACK_REDIRECT_URI};
use crate::db::AccountStore;
use crate::error::AppError;
use crate::models::{AccountRecord, RefreshDecision, TokenResponse, TokenState};
use crate::services::saxo::{AuthDiagnostics, RedirectSource, summarize_error_body};
use crate::services::sealing::TokenSealer;
use crate::time_utils::Clock;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Source of valid tokens for a coordinator.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Token state valid for the configured buffers.
    async fn ensure_valid_token(&self) -> Result<TokenState, AppError>;
    /// Current state without any refresh.
    async fn current(&self) -> TokenState;
}

/// Refresh tuning, taken from the coordinator settings.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub refresh_token_buffer: ChronoDuration,
    pub access_token_buffer: ChronoDuration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub request_timeout: Duration,
}

impl RefreshPolicy {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.settings;
        Self {
            refresh_token_buffer: s.refresh_token_buffer,
            access_token_buffer: s.access_token_buffer,
            max_attempts: s.token_refresh_max_attempts,
            backoff_base: s.token_refresh_backoff_base,
            request_timeout: s.request_timeout,
        }
    }
}

/// Keeps a single account's token pair fresh.
///
/// Refreshes are serialized by the state lock, so concurrent callers never
/// spend the same refresh token twice.
pub struct TokenManager {
    account_key: String,
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    redirect_source: RedirectSource,
    store: AccountStore,
    sealer: TokenSealer,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    state: Mutex<TokenState>,
    /// Copy of `state` for readers; never waits on a refresh in flight.
    published: RwLock<TokenState>,
}

impl TokenManager {
    /// Build a manager from a stored account record.
    pub fn from_record(
        config: &Config,
        record: &AccountRecord,
        store: AccountStore,
        sealer: TokenSealer,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let stored = record.tokens.as_ref().ok_or(AppError::AuthenticationExpired)?;
        let tokens = sealer.open_tokens(stored, &record.key)?;

        let (redirect_uri, redirect_source) = match record.redirect_uri.as_deref() {
            Some(uri) if !uri.is_empty() => (uri.to_string(), RedirectSource::Stored),
            _ => (FALLBACK_REDIRECT_URI.to_string(), RedirectSource::Fallback),
        };

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            account_key: record.key.clone(),
            http,
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri,
            redirect_source,
            store,
            sealer,
            clock,
            policy: RefreshPolicy::from_config(config),
            published: RwLock::new(tokens.clone()),
            state: Mutex::new(tokens),
        })
    }

    /// Diagnostics attached to authentication failures.
    pub fn auth_diagnostics(&self) -> AuthDiagnostics {
        AuthDiagnostics {
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            redirect_source: self.redirect_source,
        }
    }

    /// Return a token state that is valid for the buffer windows, refreshing
    /// first when needed.
    ///
    /// Fails with [`AppError::AuthenticationExpired`] when the refresh token
    /// is already dead; no refresh call is made in that case.
    async fn ensure_valid_locked(&self) -> Result<TokenState, AppError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        match state.evaluate(
            now,
            self.policy.refresh_token_buffer,
            self.policy.access_token_buffer,
        ) {
            RefreshDecision::Valid => Ok(state.clone()),
            RefreshDecision::ReauthRequired => {
                tracing::error!(
                    account = %self.account_key,
                    refresh_expires_at = %state.refresh_expires_at,
                    "Refresh token expired, reauthentication required"
                );
                Err(AppError::AuthenticationExpired)
            }
            decision => {
                tracing::info!(
                    account = %self.account_key,
                    reason = ?decision,
                    access_expires_at = %state.access_expires_at,
                    refresh_expires_at = %state.refresh_expires_at,
                    "Refreshing OAuth tokens"
                );
                let refreshed = self.refresh_locked(&state).await?;
                *state = refreshed.clone();
                *self.published.write().unwrap_or_else(|e| e.into_inner()) = refreshed.clone();
                Ok(refreshed)
            }
        }
    }

    async fn refresh_locked(&self, current: &TokenState) -> Result<TokenState, AppError> {
        let response = self.exchange_with_retry(&current.refresh_token).await?;

        // Issuance must strictly increase even if the wall clock steps back.
        let now = self.clock.now();
        let issued_at = if now > current.issued_at {
            now
        } else {
            current.issued_at + ChronoDuration::milliseconds(1)
        };

        let tokens = TokenState::from_response(&response, issued_at, Some(&current.refresh_token))
            .ok_or_else(|| AppError::InvalidResponse("Token response lacks refresh token".into()))?;

        self.persist(&tokens).await;

        tracing::info!(
            account = %self.account_key,
            access_expires_at = %tokens.access_expires_at,
            refresh_expires_at = %tokens.refresh_expires_at,
            "OAuth tokens refreshed"
        );
        Ok(tokens)
    }

    /// Save refreshed tokens. The store does not signal a reload for this.
    async fn persist(&self, tokens: &TokenState) {
        let result = match self.sealer.seal_tokens(tokens, &self.account_key) {
            Ok(sealed) => self.store.save_tokens(&self.account_key, sealed).await,
            Err(e) => Err(e),
        };
        // The in-memory pair is the only valid one after rotation; keep using it.
        if let Err(e) = result {
            tracing::error!(
                account = %self.account_key,
                error = %e,
                "Failed to persist refreshed tokens"
            );
        }
    }

    async fn exchange_with_retry(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        if self.redirect_source == RedirectSource::Fallback {
            tracing::warn!(
                account = %self.account_key,
                redirect_uri = %self.redirect_uri,
                "No stored redirect URI, using fallback for token refresh"
            );
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(
                self.policy.request_timeout,
                self.exchange_once(refresh_token),
            )
            .await
            {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
                Err(_) => AppError::Timeout("token refresh timed out".into()),
            };

            if err.is_reauth_required() {
                tracing::error!(
                    account = %self.account_key,
                    error = %err,
                    "Token refresh rejected, not retrying"
                );
                return Err(err);
            }
            if !err.is_transient() || attempt >= max_attempts {
                tracing::error!(
                    account = %self.account_key,
                    attempt,
                    error = %err,
                    "Token refresh failed"
                );
                return Err(err);
            }

            let delay = self.policy.backoff_base * 2u32.saturating_pow(attempt - 1);
            tracing::warn!(
                account = %self.account_key,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Token refresh failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn exchange_once(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::from_transport(&e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::from_transport(&e))?;

        match status {
            200..=299 => serde_json::from_str(&body).map_err(|e| {
                AppError::InvalidResponse(format!("Failed to parse token response: {}", e))
            }),
            401 | 403 => Err(AppError::PermanentAuth {
                status,
                context: format!(
                    "{}; {}",
                    summarize_error_body(&body),
                    self.auth_diagnostics().describe()
                ),
            }),
            // A refresh token the server no longer knows
            400 if body.contains("invalid_grant") => Err(AppError::PermanentAuth {
                status,
                context: format!("invalid_grant; {}", self.auth_diagnostics().describe()),
            }),
            _ => Err(AppError::Http {
                status,
                message: summarize_error_body(&body),
            }),
        }
    }
}

#[async_trait]
impl TokenProvider for TokenManager {
    async fn ensure_valid_token(&self) -> Result<TokenState, AppError> {
        self.ensure_valid_locked().await
    }

    async fn current(&self) -> TokenState {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
