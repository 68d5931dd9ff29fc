// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Saxo Portfolio: polls Saxo Bank OpenAPI accounts and publishes their
//! balances and performance as named entities.
//!
//! Each configured account gets an update coordinator that keeps its OAuth
//! tokens valid, fetches required and optional data on a market-hours aware
//! schedule, and publishes an immutable snapshot per successful cycle.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::AccountStore;
use services::Registry;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: AccountStore,
    pub registry: Arc<Registry>,
}
