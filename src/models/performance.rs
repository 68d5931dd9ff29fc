// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Performance and client payloads, plus the cached performance record.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Placeholder for client identity fields that were never fetched.
pub const UNKNOWN: &str = "unknown";

/// Saxo `StandardPeriod` values used for performance queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PerformancePeriod {
    AllTime,
    Year,
    Month,
    Quarter,
}

impl PerformancePeriod {
    pub const ALL: [PerformancePeriod; 4] = [
        PerformancePeriod::AllTime,
        PerformancePeriod::Year,
        PerformancePeriod::Month,
        PerformancePeriod::Quarter,
    ];

    /// Query parameter value.
    pub fn as_str(self) -> &'static str {
        match self {
            PerformancePeriod::AllTime => "AllTime",
            PerformancePeriod::Year => "Year",
            PerformancePeriod::Month => "Month",
            PerformancePeriod::Quarter => "Quarter",
        }
    }

    /// `from`/`thru` dates of the period ending `today`.
    pub fn date_range(self, today: NaiveDate) -> (String, String) {
        let thru = today.format("%Y-%m-%d").to_string();
        let from = match self {
            PerformancePeriod::AllTime => return ("inception".to_string(), thru),
            PerformancePeriod::Year => NaiveDate::from_ymd_opt(today.year(), 1, 1),
            PerformancePeriod::Month => NaiveDate::from_ymd_opt(today.year(), today.month(), 1),
            PerformancePeriod::Quarter => {
                let start_month = ((today.month() - 1) / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(today.year(), start_month, 1)
            }
        };
        let from = from.unwrap_or(today).format("%Y-%m-%d").to_string();
        (from, thru)
    }
}

/// `/port/v1/clients/me`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientDetails {
    pub client_key: Option<String>,
    pub client_id: Option<String>,
    pub default_account_id: Option<String>,
    pub name: Option<String>,
}

/// `/port/v1/accounts/me`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountsResponse {
    #[serde(default)]
    pub data: Vec<AccountInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountInfo {
    pub account_id: Option<String>,
    pub account_key: Option<String>,
    pub display_name: Option<String>,
    pub currency: Option<String>,
}

/// `/hist/v3/perf/{ClientKey}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PerformanceV3 {
    #[serde(default)]
    pub balance_performance: Option<BalancePerformance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalancePerformance {
    pub accumulated_profit_loss: Option<f64>,
}

impl PerformanceV3 {
    pub fn accumulated_profit_loss(&self) -> f64 {
        self.balance_performance
            .as_ref()
            .and_then(|b| b.accumulated_profit_loss)
            .unwrap_or(0.0)
    }
}

/// `/hist/v4/performance/timeseries`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PerformanceV4 {
    #[serde(default)]
    pub key_figures: Option<KeyFigures>,
    #[serde(default)]
    pub balance: Option<PerformanceBalance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyFigures {
    pub return_fraction: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PerformanceBalance {
    #[serde(default)]
    pub cash_transfer: Vec<TimeseriesValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeseriesValue {
    #[serde(default)]
    pub value: f64,
}

impl PerformanceV4 {
    /// Return as a percentage (Saxo reports a fraction).
    pub fn return_percentage(&self) -> f64 {
        self.key_figures
            .as_ref()
            .and_then(|k| k.return_fraction)
            .map(|f| f * 100.0)
            .unwrap_or(0.0)
    }

    /// Latest entry of the cash transfer series.
    pub fn latest_cash_transfer(&self) -> f64 {
        self.balance
            .as_ref()
            .and_then(|b| b.cash_transfer.last())
            .map(|v| v.value)
            .unwrap_or(0.0)
    }
}

/// Slow-changing data held by the performance cache.
///
/// Fixed shape on purpose: every fetched value has a named field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceData {
    pub client_id: String,
    pub account_id: String,
    pub client_name: String,
    /// v3 `AccumulatedProfitLoss`, year to date
    pub ytd_earnings_percentage: f64,
    pub all_time_return_pct: f64,
    pub year_return_pct: f64,
    pub month_return_pct: f64,
    pub quarter_return_pct: f64,
    pub cash_transfer_balance: f64,
}

impl Default for PerformanceData {
    fn default() -> Self {
        Self {
            client_id: UNKNOWN.to_string(),
            account_id: UNKNOWN.to_string(),
            client_name: UNKNOWN.to_string(),
            ytd_earnings_percentage: 0.0,
            all_time_return_pct: 0.0,
            year_return_pct: 0.0,
            month_return_pct: 0.0,
            quarter_return_pct: 0.0,
            cash_transfer_balance: 0.0,
        }
    }
}

impl PerformanceData {
    pub fn return_pct(&self, period: PerformancePeriod) -> f64 {
        match period {
            PerformancePeriod::AllTime => self.all_time_return_pct,
            PerformancePeriod::Year => self.year_return_pct,
            PerformancePeriod::Month => self.month_return_pct,
            PerformancePeriod::Quarter => self.quarter_return_pct,
        }
    }

    pub fn set_return_pct(&mut self, period: PerformancePeriod, value: f64) {
        match period {
            PerformancePeriod::AllTime => self.all_time_return_pct = value,
            PerformancePeriod::Year => self.year_return_pct = value,
            PerformancePeriod::Month => self.month_return_pct = value,
            PerformancePeriod::Quarter => self.quarter_return_pct = value,
        }
    }

    /// Client name has been learned from the API.
    pub fn has_client_name(&self) -> bool {
        self.client_name != UNKNOWN && !self.client_name.is_empty()
    }
}
