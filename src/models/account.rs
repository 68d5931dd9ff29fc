// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-account configuration record.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Schedule value meaning "poll on a fixed interval, ignore market hours".
pub const SCHEDULE_ANY: &str = "any";

/// One configured brokerage account, as kept by the account store.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccountRecord {
    /// Stable identifier of the configured entry
    #[validate(length(min = 1, max = 64))]
    pub key: String,
    /// Display title; follows the Saxo account id once known
    #[serde(default)]
    pub title: String,
    /// Redirect URI used for the original authorization
    #[validate(url)]
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// `any` or an IANA timezone name selecting a market schedule
    #[serde(default = "default_schedule")]
    #[validate(length(min = 1))]
    pub timezone: String,
    /// Saxo account id, learned from the client details endpoint
    #[serde(default)]
    pub account_id: Option<String>,
    /// Sealed OAuth tokens
    #[serde(default)]
    pub tokens: Option<StoredTokens>,
}

fn default_schedule() -> String {
    SCHEDULE_ANY.to_string()
}

/// OAuth tokens as persisted (sealed at rest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    /// Sealed access token (base64)
    pub access_token_sealed: String,
    /// Sealed refresh token (base64)
    pub refresh_token_sealed: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// When the current pair was issued (RFC3339)
    pub issued_at: String,
    /// RFC3339
    pub access_expires_at: String,
    /// RFC3339
    pub refresh_expires_at: String,
}

impl AccountRecord {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            title: format!("Saxo Portfolio ({})", key),
            key,
            redirect_uri: None,
            timezone: default_schedule(),
            account_id: None,
            tokens: None,
        }
    }

    /// Title shown once the Saxo account id is known.
    pub fn title_for_account_id(account_id: &str) -> String {
        format!("Saxo Portfolio {}", account_id)
    }
}
