// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth token state and the refresh decision.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Access token lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_ACCESS_LIFETIME_SECS: i64 = 1200;
/// Refresh token lifetime assumed when the token endpoint omits
/// `refresh_token_expires_in`.
const DEFAULT_REFRESH_LIFETIME_SECS: i64 = 3600;

/// Current OAuth token pair for one account.
///
/// Both expiries are derived from `issued_at`, which is stamped when the pair
/// is obtained. It is never reconstructed from an expiry.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Token endpoint response body.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Saxo rotates refresh tokens; a missing value keeps the old one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// What the token manager must do before the next API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Both tokens comfortably valid.
    Valid,
    /// Refresh token is about to expire; rotate it now.
    RefreshTokenExpiring,
    /// Access token is about to expire.
    AccessTokenExpiring,
    /// Refresh token already expired. A refresh call would be pointless.
    ReauthRequired,
}

impl TokenState {
    /// Build a fresh state from a token endpoint response.
    ///
    /// `previous_refresh` is kept when the response does not rotate it.
    pub fn from_response(
        response: &TokenResponse,
        issued_at: DateTime<Utc>,
        previous_refresh: Option<&str>,
    ) -> Option<Self> {
        let refresh_token = response
            .refresh_token
            .clone()
            .or_else(|| previous_refresh.map(str::to_string))?;
        let expires_in = response
            .expires_in
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_ACCESS_LIFETIME_SECS);
        let refresh_expires_in = response
            .refresh_token_expires_in
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_REFRESH_LIFETIME_SECS);

        Some(Self {
            access_token: response.access_token.clone(),
            refresh_token,
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(default_token_type),
            issued_at,
            access_expires_at: issued_at + Duration::seconds(expires_in),
            refresh_expires_at: issued_at + Duration::seconds(refresh_expires_in),
        })
    }

    /// Two-step validation: the refresh token is checked first and on its own,
    /// so a short-lived refresh token is rotated even while the access token
    /// still has plenty of time left.
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        refresh_buffer: Duration,
        access_buffer: Duration,
    ) -> RefreshDecision {
        if now >= self.refresh_expires_at {
            return RefreshDecision::ReauthRequired;
        }
        if self.refresh_expires_at - now <= refresh_buffer {
            return RefreshDecision::RefreshTokenExpiring;
        }
        if self.access_expires_at - now <= access_buffer {
            return RefreshDecision::AccessTokenExpiring;
        }
        RefreshDecision::Valid
    }

    /// Human-readable access token expiry, as shown on the diagnostic entity.
    pub fn expiry_status(&self, now: DateTime<Utc>) -> String {
        let remaining = (self.access_expires_at - now).num_seconds();
        if remaining <= 0 {
            "Expired".to_string()
        } else if remaining <= 60 {
            "Critical - < 1 minute".to_string()
        } else if remaining <= 300 {
            format!("Warning - {:.1} minutes", remaining as f64 / 60.0)
        } else if remaining <= 3600 {
            format!("{} minutes", (remaining as f64 / 60.0).round())
        } else {
            format!("{:.1} hours", remaining as f64 / 3600.0)
        }
    }
}

/// Mask a secret for logs, keeping the last four characters.
pub fn mask_secret(value: &str) -> String {
    let count = value.chars().count();
    if count > 4 {
        let tail: String = value.chars().skip(count - 4).collect();
        format!("***{}", tail)
    } else {
        "***".to_string()
    }
}
