// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use saxo_portfolio::config::{Config, CoordinatorSettings};
use saxo_portfolio::db::AccountStore;
use saxo_portfolio::error::AppError;
use saxo_portfolio::models::performance::{
    AccountsResponse, ClientDetails, KeyFigures, PerformanceV3, PerformanceV4,
};
use saxo_portfolio::models::{AccountRecord, Balance, PerformancePeriod, TokenState};
use saxo_portfolio::routes::create_router;
use saxo_portfolio::services::coordinator::{CoordinatorParts, HostSignal, UpdateCoordinator};
use saxo_portfolio::services::{
    ApiFactory, PortfolioApi, Registry, Schedule, StartupPhase, TokenProvider, TokenSealer,
};
use saxo_portfolio::time_utils::{Clock, ManualClock};
use saxo_portfolio::AppState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const SEALING_KEY: &str = "test_sealing_key_32_bytes_minimum";

/// Wednesday, 2026-03-04 12:00 UTC
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
}

/// A token pair issued at `issued_at` with the given lifetimes.
pub fn token_state(
    issued_at: DateTime<Utc>,
    access_secs: i64,
    refresh_secs: i64,
    access_token: &str,
) -> TokenState {
    TokenState {
        access_token: access_token.to_string(),
        refresh_token: format!("refresh-{}", access_token),
        token_type: "Bearer".to_string(),
        issued_at,
        access_expires_at: issued_at + ChronoDuration::seconds(access_secs),
        refresh_expires_at: issued_at + ChronoDuration::seconds(refresh_secs),
    }
}

/// Account record carrying sealed tokens.
pub fn sealed_record(key: &str, tokens: &TokenState) -> AccountRecord {
    let sealer = TokenSealer::new(SEALING_KEY).unwrap();
    let mut record = AccountRecord::new(key);
    record.redirect_uri = Some("https://example.com/auth/callback".to_string());
    record.tokens = Some(sealer.seal_tokens(tokens, key).unwrap());
    record
}

// ─── Fake token provider ─────────────────────────────────────

pub struct FakeTokens {
    pub state: Mutex<TokenState>,
    pub expired: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeTokens {
    pub fn new(state: TokenState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            expired: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    /// Simulate a refresh that hands out a new access token.
    pub fn rotate(&self, access_token: &str) {
        self.state.lock().unwrap().access_token = access_token.to_string();
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn ensure_valid_token(&self) -> Result<TokenState, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.expired.load(Ordering::SeqCst) {
            return Err(AppError::AuthenticationExpired);
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn current(&self) -> TokenState {
        self.state.lock().unwrap().clone()
    }
}

// ─── Fake Saxo API ───────────────────────────────────────────

/// Behaviour shared by every client a [`FakeFactory`] creates.
pub struct FakeSaxo {
    pub balance_fails: AtomicBool,
    pub optional_hangs: AtomicBool,
    pub optional_fails: AtomicBool,
    pub client_name: Mutex<Option<String>>,
    pub year_return_fraction: Mutex<f64>,
    pub balance_latency: Mutex<Duration>,
    pub calls: Mutex<Vec<String>>,
    pub closed: Mutex<Vec<String>>,
}

impl Default for FakeSaxo {
    fn default() -> Self {
        Self {
            balance_fails: AtomicBool::new(false),
            optional_hangs: AtomicBool::new(false),
            optional_fails: AtomicBool::new(false),
            client_name: Mutex::new(Some("Jane Doe".to_string())),
            year_return_fraction: Mutex::new(0.042),
            balance_latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSaxo {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(name))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

pub struct FakeClient {
    token: String,
    saxo: Arc<FakeSaxo>,
}

impl FakeClient {
    async fn optional_gate(&self) -> Result<(), AppError> {
        if self.saxo.optional_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.saxo.optional_fails.load(Ordering::SeqCst) {
            return Err(AppError::Http {
                status: 503,
                message: "HTML error page: Service Unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PortfolioApi for FakeClient {
    async fn get_balance(&self) -> Result<Balance, AppError> {
        self.saxo.record("balance");
        let latency = *self.saxo.balance_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.saxo.balance_fails.load(Ordering::SeqCst) {
            return Err(AppError::Network("connection reset".into()));
        }
        Ok(Balance {
            cash_balance: 1000.0,
            currency: "EUR".into(),
            total_value: 25000.0,
            non_margin_positions_value: 24000.0,
        })
    }

    async fn get_client_details(&self) -> Result<ClientDetails, AppError> {
        self.saxo.record("client_details");
        self.optional_gate().await?;
        Ok(ClientDetails {
            client_key: Some("ck-1".into()),
            client_id: Some("CL123".into()),
            default_account_id: Some("ACC-9".into()),
            name: self.saxo.client_name.lock().unwrap().clone(),
        })
    }

    async fn get_accounts(&self) -> Result<AccountsResponse, AppError> {
        self.saxo.record("accounts");
        Ok(AccountsResponse::default())
    }

    async fn get_performance_v3(&self, _client_key: &str) -> Result<PerformanceV3, AppError> {
        self.saxo.record("perf_v3");
        Ok(PerformanceV3::default())
    }

    async fn get_performance_v4(
        &self,
        _client_key: &str,
        period: PerformancePeriod,
    ) -> Result<PerformanceV4, AppError> {
        self.saxo.record(format!("perf_v4:{}", period.as_str()));
        let fraction = match period {
            PerformancePeriod::Year => *self.saxo.year_return_fraction.lock().unwrap(),
            _ => 0.01,
        };
        Ok(PerformanceV4 {
            key_figures: Some(KeyFigures {
                return_fraction: Some(fraction),
            }),
            balance: None,
        })
    }

    async fn close(&self) -> Result<(), AppError> {
        self.saxo.closed.lock().unwrap().push(self.token.clone());
        Ok(())
    }
}

pub struct FakeFactory {
    pub saxo: Arc<FakeSaxo>,
    pub created: Mutex<Vec<String>>,
}

impl ApiFactory for FakeFactory {
    fn create(&self, access_token: &str) -> Result<Arc<dyn PortfolioApi>, AppError> {
        self.created.lock().unwrap().push(access_token.to_string());
        Ok(Arc::new(FakeClient {
            token: access_token.to_string(),
            saxo: self.saxo.clone(),
        }))
    }
}

// ─── Coordinator harness ─────────────────────────────────────

pub struct Harness {
    pub coordinator: Arc<UpdateCoordinator>,
    pub saxo: Arc<FakeSaxo>,
    pub factory: Arc<FakeFactory>,
    pub tokens: Arc<FakeTokens>,
    pub startup: Arc<StartupPhase>,
    pub clock: ManualClock,
    pub signals: mpsc::UnboundedReceiver<HostSignal>,
}

impl Harness {
    pub fn drain_signals(&mut self) -> Vec<HostSignal> {
        let mut out = Vec::new();
        while let Ok(signal) = self.signals.try_recv() {
            out.push(signal);
        }
        out
    }
}

pub fn harness(key: &str, stagger: Option<Duration>) -> Harness {
    harness_with(key, stagger, CoordinatorSettings::fast())
}

pub fn harness_with(key: &str, stagger: Option<Duration>, settings: CoordinatorSettings) -> Harness {
    let clock = ManualClock::new(t0());
    let saxo = Arc::new(FakeSaxo::default());
    let factory = Arc::new(FakeFactory {
        saxo: saxo.clone(),
        created: Mutex::new(Vec::new()),
    });
    let tokens = FakeTokens::new(token_state(t0(), 1200, 3600, "access-1"));
    let startup = Arc::new(StartupPhase::new(settings.startup_phase_cycles));
    let (tx, rx) = mpsc::unbounded_channel();

    let coordinator = Arc::new(UpdateCoordinator::with_stagger(
        CoordinatorParts {
            key: key.to_string(),
            schedule: Schedule::from_setting("any", &settings),
            settings,
            tokens: tokens.clone(),
            factory: factory.clone(),
            startup: startup.clone(),
            clock: Arc::new(clock.clone()) as Arc<dyn Clock>,
            signals: tx,
        },
        stagger,
    ));

    Harness {
        coordinator,
        saxo,
        factory,
        tokens,
        startup,
        clock,
        signals: rx,
    }
}

// ─── HTTP app ────────────────────────────────────────────────

/// Create a test app over an in-memory store with no running accounts.
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let store = AccountStore::new_mock();
    let sealer = TokenSealer::new(&config.token_sealing_key).unwrap();
    let (registry, _signals) = Registry::new(
        config.clone(),
        store.clone(),
        sealer,
        Arc::new(ManualClock::new(t0())),
    );

    let state = Arc::new(AppState {
        config,
        store,
        registry,
    });

    (create_router(state.clone()), state)
}
