// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account balance, the required data of every cycle.

use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// Raw `/port/v1/balances/me` body. Everything optional so missing fields
/// can be reported by name instead of as an opaque parse error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalanceResponse {
    pub cash_balance: Option<f64>,
    pub currency: Option<String>,
    pub total_value: Option<f64>,
    pub non_margin_positions_value: Option<f64>,
}

/// Validated balance figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub cash_balance: f64,
    pub currency: String,
    pub total_value: f64,
    pub non_margin_positions_value: f64,
}

impl BalanceResponse {
    /// Check required fields and financial sanity.
    pub fn validate(self) -> Result<Balance, AppError> {
        let cash_balance = self
            .cash_balance
            .ok_or_else(|| missing("CashBalance"))?;
        let currency = self.currency.ok_or_else(|| missing("Currency"))?;
        let total_value = self.total_value.ok_or_else(|| missing("TotalValue"))?;

        if !cash_balance.is_finite() {
            return Err(AppError::InvalidResponse("CashBalance is not finite".into()));
        }
        if !total_value.is_finite() {
            return Err(AppError::InvalidResponse("TotalValue is not finite".into()));
        }
        if total_value < 0.0 {
            return Err(AppError::InvalidResponse(
                "TotalValue cannot be negative".into(),
            ));
        }

        let non_margin_positions_value = self
            .non_margin_positions_value
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        Ok(Balance {
            cash_balance,
            currency,
            total_value,
            non_margin_positions_value,
        })
    }
}

fn missing(field: &str) -> AppError {
    AppError::InvalidResponse(format!("Missing required field: {}", field))
}
