// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Saxo Portfolio server
//!
//! Polls every configured Saxo account on a market-hours aware schedule and
//! serves the resulting entities over HTTP.

use anyhow::Context;
use saxo_portfolio::{
    config::Config,
    db::AccountStore,
    services::{Registry, TokenSealer},
    time_utils::SystemClock,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(port = config.port, "Starting Saxo Portfolio");

    let store = AccountStore::open(&config.accounts_file)
        .await
        .context("Failed to open account store")?;
    tracing::info!(
        path = %config.accounts_file,
        accounts = store.list().await.len(),
        "Account store loaded"
    );

    let sealer = TokenSealer::new(&config.token_sealing_key).context("Invalid sealing key")?;

    let (registry, signals) = Registry::new(
        config.clone(),
        store.clone(),
        sealer,
        Arc::new(SystemClock),
    );
    tokio::spawn(registry.clone().process_signals(signals));
    tokio::spawn(registry.clone().watch_store());
    registry.start_all().await;

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        registry: registry.clone(),
    });
    let app = saxo_portfolio::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("saxo_portfolio=debug,info"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
