// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account, entity and refresh routes.

use crate::error::{AppError, Result};
use crate::services::coordinator::CyclePhase;
use crate::services::projection::{self, Entity, StickyPolicy};
use crate::time_utils::{format_utc_rfc3339, Clock};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/accounts", get(list_accounts))
        .route("/api/accounts/{key}/entities", get(get_entities))
        .route("/api/accounts/{key}/refresh", post(refresh_account))
}

// ─── Accounts ────────────────────────────────────────────────

/// One configured account and its coordinator status.
#[derive(Serialize)]
pub struct AccountSummary {
    pub key: String,
    pub title: String,
    pub timezone: String,
    pub running: bool,
    pub reauth_required: bool,
    pub phase: Option<CyclePhase>,
    pub last_success: Option<String>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

async fn list_accounts(State(state): State<Arc<AppState>>) -> Json<Vec<AccountSummary>> {
    let mut accounts = Vec::new();
    for record in state.store.list().await {
        let coordinator = state.registry.coordinator(&record.key);
        let published = coordinator.as_ref().map(|c| c.published());
        accounts.push(AccountSummary {
            running: coordinator.is_some(),
            reauth_required: state.registry.reauth_required_since(&record.key).is_some(),
            phase: published.as_ref().map(|p| p.phase),
            last_success: published
                .as_ref()
                .and_then(|p| p.last_success)
                .map(format_utc_rfc3339),
            last_error: published.as_ref().and_then(|p| p.last_error.clone()),
            consecutive_failures: published.as_ref().map_or(0, |p| p.consecutive_failures),
            key: record.key,
            title: record.title,
            timezone: record.timezone,
        });
    }
    Json(accounts)
}

// ─── Entities ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EntitiesResponse {
    pub key: String,
    pub entities: Vec<Entity>,
}

/// Entities of one account. Empty until the client is identified.
async fn get_entities(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<EntitiesResponse>> {
    let coordinator = state
        .registry
        .coordinator(&key)
        .ok_or_else(|| AppError::NotFound(format!("Account {} not found", key)))?;

    let settings = coordinator.settings();
    let policy = StickyPolicy {
        min_failure: settings.sticky_min_failure,
        interval_multiplier: settings.sticky_interval_multiplier,
    };
    let view = coordinator.view().await;
    let now = state.registry.clock().now();

    Ok(Json(EntitiesResponse {
        entities: projection::project(&view, &policy, now),
        key,
    }))
}

// ─── Refresh service ─────────────────────────────────────────

/// Ask for an immediate cycle. The cycle itself runs on the account's task.
async fn refresh_account(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    state.registry.request_refresh(&key)?;
    tracing::info!(account = %key, "Refresh requested via API");
    Ok(StatusCode::ACCEPTED)
}
