// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod account;
pub mod balance;
pub mod metric;
pub mod performance;
pub mod snapshot;
pub mod token;

pub use account::{AccountRecord, StoredTokens};
pub use balance::{Balance, BalanceResponse};
pub use metric::{MetricDescriptor, MetricKind, METRICS};
pub use performance::{PerformanceData, PerformancePeriod};
pub use snapshot::{OptionalSource, UpdateSnapshot};
pub use token::{RefreshDecision, TokenResponse, TokenState};
