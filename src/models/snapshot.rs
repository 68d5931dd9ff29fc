// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The immutable per-cycle result handed to the entity projection.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Balance, PerformanceData};

/// Where the optional values of a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionalSource {
    /// Fetched during this cycle.
    Fresh,
    /// Served from the performance cache.
    Cached,
    /// Cache never populated; placeholder values.
    Defaults,
}

/// Result of one successful cycle.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSnapshot {
    /// Single timestamp for the whole cycle.
    pub cycle_at: DateTime<Utc>,
    pub balance: Balance,
    pub performance: PerformanceData,
    pub performance_source: OptionalSource,
    /// When the performance values were last fetched.
    pub performance_updated_at: Option<DateTime<Utc>>,
    /// Why the optional phase did not produce fresh values, if it tried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional_error: Option<String>,
}

impl UpdateSnapshot {
    /// The optional phase completed with fresh data.
    pub fn optional_ok(&self) -> bool {
        self.optional_error.is_none()
    }
}
