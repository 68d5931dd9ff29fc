// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Metric descriptors: one tagged variant per entity family.

use super::PerformancePeriod;

/// Fields of the required balance phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceField {
    CashBalance,
    TotalValue,
    NonMarginPositionsValue,
}

/// Fields of the optional performance phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceField {
    Return(PerformancePeriod),
    AccumulatedProfitLoss,
    CashTransferBalance,
}

/// Diagnostic values. Always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticField {
    ClientId,
    AccountId,
    ClientName,
    TokenExpiry,
    MarketStatus,
    LastUpdate,
    Timezone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Balance(BalanceField),
    Performance(PerformanceField),
    Diagnostic(DiagnosticField),
}

/// Unit rule for a metric's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRule {
    /// The account currency
    Currency,
    Percent,
    None,
}

/// Which cycle phase produces the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePhase {
    Required,
    Optional,
    Coordinator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub kind: MetricKind,
}

impl MetricDescriptor {
    const fn new(key: &'static str, name: &'static str, kind: MetricKind) -> Self {
        Self { key, name, kind }
    }

    pub fn unit(&self) -> UnitRule {
        match self.kind {
            MetricKind::Balance(_) => UnitRule::Currency,
            MetricKind::Performance(PerformanceField::Return(_)) => UnitRule::Percent,
            MetricKind::Performance(_) => UnitRule::Currency,
            MetricKind::Diagnostic(_) => UnitRule::None,
        }
    }

    pub fn source(&self) -> SourcePhase {
        match self.kind {
            MetricKind::Balance(_) => SourcePhase::Required,
            MetricKind::Performance(_) => SourcePhase::Optional,
            MetricKind::Diagnostic(_) => SourcePhase::Coordinator,
        }
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self.kind, MetricKind::Diagnostic(_))
    }
}

use BalanceField as B;
use DiagnosticField as D;
use PerformanceField as P;

/// Every entity exposed per account.
pub const METRICS: &[MetricDescriptor] = &[
    MetricDescriptor::new("cash_balance", "Cash Balance", MetricKind::Balance(B::CashBalance)),
    MetricDescriptor::new("total_value", "Total Value", MetricKind::Balance(B::TotalValue)),
    MetricDescriptor::new(
        "non_margin_positions_value",
        "Non-Margin Positions Value",
        MetricKind::Balance(B::NonMarginPositionsValue),
    ),
    MetricDescriptor::new(
        "accumulated_profit_loss",
        "Accumulated Profit/Loss",
        MetricKind::Performance(P::AccumulatedProfitLoss),
    ),
    MetricDescriptor::new(
        "investment_performance",
        "Investment Performance",
        MetricKind::Performance(P::Return(PerformancePeriod::AllTime)),
    ),
    MetricDescriptor::new(
        "ytd_investment_performance",
        "YTD Investment Performance",
        MetricKind::Performance(P::Return(PerformancePeriod::Year)),
    ),
    MetricDescriptor::new(
        "month_investment_performance",
        "Month Investment Performance",
        MetricKind::Performance(P::Return(PerformancePeriod::Month)),
    ),
    MetricDescriptor::new(
        "quarter_investment_performance",
        "Quarter Investment Performance",
        MetricKind::Performance(P::Return(PerformancePeriod::Quarter)),
    ),
    MetricDescriptor::new(
        "cash_transfer_balance",
        "Cash Transfer Balance",
        MetricKind::Performance(P::CashTransferBalance),
    ),
    MetricDescriptor::new("client_id", "Client ID", MetricKind::Diagnostic(D::ClientId)),
    MetricDescriptor::new("account_id", "Account ID", MetricKind::Diagnostic(D::AccountId)),
    MetricDescriptor::new("client_name", "Client Name", MetricKind::Diagnostic(D::ClientName)),
    MetricDescriptor::new(
        "token_expiry",
        "Token Expiry",
        MetricKind::Diagnostic(D::TokenExpiry),
    ),
    MetricDescriptor::new(
        "market_status",
        "Market Status",
        MetricKind::Diagnostic(D::MarketStatus),
    ),
    MetricDescriptor::new("last_update", "Last Update", MetricKind::Diagnostic(D::LastUpdate)),
    MetricDescriptor::new("timezone", "Timezone", MetricKind::Diagnostic(D::Timezone)),
];
