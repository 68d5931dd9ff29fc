// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! The taxonomy drives the coordinator's failure handling: reauthentication
//! errors surface to the host unchanged, transient errors are retried by the
//! HTTP layer and otherwise fail only the current cycle.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The refresh token itself is dead. Only user reauthentication recovers.
    #[error("Authentication expired, reauthentication required")]
    AuthenticationExpired,

    /// 401/403 from the upstream. Never retried.
    #[error("Authentication rejected (HTTP {status}): {context}")]
    PermanentAuth { status: u16, context: String },

    #[error("Rate limited by Saxo API")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Saxo API error (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True when the host must start its reauthentication flow.
    pub fn is_reauth_required(&self) -> bool {
        matches!(
            self,
            AppError::AuthenticationExpired | AppError::PermanentAuth { .. }
        )
    }

    /// True for failures worth another attempt: timeouts, connection
    /// problems, 5xx, 429 and unparseable bodies.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Timeout(_)
            | AppError::Network(_)
            | AppError::RateLimited { .. }
            | AppError::InvalidResponse(_) => true,
            AppError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::RateLimited { .. })
    }

    /// Map a reqwest transport error onto the taxonomy.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else if err.is_decode() {
            AppError::InvalidResponse(err.to_string())
        } else {
            AppError::Network(err.to_string())
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::AuthenticationExpired => {
                (StatusCode::UNAUTHORIZED, "reauthentication_required", None)
            }
            AppError::PermanentAuth { .. } => {
                (StatusCode::UNAUTHORIZED, "authentication_rejected", None)
            }
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", None),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", Some(msg.clone())),
            AppError::Network(msg) | AppError::InvalidResponse(msg) => {
                (StatusCode::BAD_GATEWAY, "upstream_error", Some(msg.clone()))
            }
            AppError::Http { message, .. } => {
                (StatusCode::BAD_GATEWAY, "saxo_error", Some(message.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Config(msg) | AppError::Storage(msg) => {
                tracing::error!(error = %msg, "Configuration or storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
