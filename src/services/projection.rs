// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Renders a coordinator view as named entities.

use crate::models::metric::{BalanceField, DiagnosticField, PerformanceField, UnitRule};
use crate::models::{MetricDescriptor, MetricKind, UpdateSnapshot, METRICS};
use crate::services::coordinator::CoordinatorView;
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

/// One entity as the host would show it.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub entity_id: String,
    pub name: String,
    pub state: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub available: bool,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, Value>,
}

/// Sticky availability window tuning.
#[derive(Debug, Clone, Copy)]
pub struct StickyPolicy {
    pub min_failure: Duration,
    pub interval_multiplier: i32,
}

impl StickyPolicy {
    /// `max(min_failure, multiplier × interval)`
    pub fn threshold(&self, update_interval: std::time::Duration) -> Duration {
        let interval = Duration::from_std(update_interval).unwrap_or(Duration::MAX);
        let scaled = interval
            .checked_mul(self.interval_multiplier)
            .unwrap_or(Duration::MAX);
        scaled.max(self.min_failure)
    }

    /// Whether data entities stay available.
    pub fn is_available(&self, view: &CoordinatorView, now: DateTime<Utc>) -> bool {
        let published = &view.published;
        if published.snapshot.is_none() {
            return false;
        }
        if published.last_cycle_ok {
            return true;
        }
        match published.last_success {
            Some(at) => now - at < self.threshold(view.update_interval),
            None => false,
        }
    }
}

/// Project every metric of a coordinator view.
///
/// Returns nothing until a snapshot names the client: entity ids are keyed
/// by client id and must not change after creation.
pub fn project(view: &CoordinatorView, policy: &StickyPolicy, now: DateTime<Utc>) -> Vec<Entity> {
    let Some(snapshot) = view.published.snapshot.as_deref() else {
        return Vec::new();
    };
    if !snapshot.performance.has_client_name() {
        return Vec::new();
    }

    let data_available = policy.is_available(view, now);
    let client_id = snapshot.performance.client_id.to_lowercase();

    METRICS
        .iter()
        .map(|metric| {
            let available = metric.is_diagnostic() || data_available;
            Entity {
                entity_id: format!("saxo_{}_{}", client_id, metric.key).to_lowercase(),
                name: metric.name.to_string(),
                state: state_for(metric, view, snapshot, now),
                unit: unit_for(metric, snapshot),
                available,
                attributes: attributes_for(metric, snapshot, now),
            }
        })
        .collect()
}

fn state_for(
    metric: &MetricDescriptor,
    view: &CoordinatorView,
    snapshot: &UpdateSnapshot,
    now: DateTime<Utc>,
) -> Value {
    let perf = &snapshot.performance;
    match metric.kind {
        MetricKind::Balance(field) => money(match field {
            BalanceField::CashBalance => snapshot.balance.cash_balance,
            BalanceField::TotalValue => snapshot.balance.total_value,
            BalanceField::NonMarginPositionsValue => snapshot.balance.non_margin_positions_value,
        }),
        MetricKind::Performance(field) => match field {
            PerformanceField::Return(period) => percent(perf.return_pct(period)),
            PerformanceField::AccumulatedProfitLoss => money(perf.ytd_earnings_percentage),
            PerformanceField::CashTransferBalance => money(perf.cash_transfer_balance),
        },
        MetricKind::Diagnostic(field) => Value::String(match field {
            DiagnosticField::ClientId => perf.client_id.clone(),
            DiagnosticField::AccountId => perf.account_id.clone(),
            DiagnosticField::ClientName => perf.client_name.clone(),
            DiagnosticField::TokenExpiry => view.token.expiry_status(now),
            DiagnosticField::MarketStatus => view.market_status.to_string(),
            DiagnosticField::LastUpdate => view
                .published
                .last_success
                .map(format_utc_rfc3339)
                .unwrap_or_else(|| "never".to_string()),
            DiagnosticField::Timezone => view.timezone.clone(),
        }),
    }
}

fn unit_for(metric: &MetricDescriptor, snapshot: &UpdateSnapshot) -> Option<String> {
    match metric.unit() {
        UnitRule::Currency => Some(snapshot.balance.currency.clone()),
        UnitRule::Percent => Some("%".to_string()),
        UnitRule::None => None,
    }
}

fn attributes_for(
    metric: &MetricDescriptor,
    snapshot: &UpdateSnapshot,
    now: DateTime<Utc>,
) -> serde_json::Map<String, Value> {
    let mut attrs = serde_json::Map::new();
    if let MetricKind::Performance(field) = metric.kind {
        if let PerformanceField::Return(period) = field {
            let (from, thru) = period.date_range(now.date_naive());
            attrs.insert("time_period".into(), Value::String(period.as_str().into()));
            attrs.insert("from".into(), Value::String(from));
            attrs.insert("thru".into(), Value::String(thru));
        }
        if let Some(at) = snapshot.performance_updated_at {
            attrs.insert("last_updated".into(), Value::String(format_utc_rfc3339(at)));
        }
    }
    attrs
}

fn money(value: f64) -> Value {
    round2(value)
}

fn percent(value: f64) -> Value {
    round2(value)
}

fn round2(value: f64) -> Value {
    serde_json::Number::from_f64((value * 100.0).round() / 100.0)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
