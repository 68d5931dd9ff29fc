// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Update coordinator: one polling cycle per call, per account.
//!
//! A cycle runs `TokenCheck → FetchRequired → FetchOptional → Assembling`.
//! The required phase (balances) fails the cycle on any error or when the
//! cycle deadline passes. The optional phase (client details and
//! performance) gets whatever is left of the cycle budget, capped at its own
//! shorter timeout, and resolves its failures locally by falling back to the
//! performance cache.

use crate::config::CoordinatorSettings;
use crate::error::AppError;
use crate::models::performance::{ClientDetails, UNKNOWN};
use crate::models::{
    Balance, OptionalSource, PerformanceData, PerformancePeriod, TokenState, UpdateSnapshot,
};
use crate::services::cache::PerformanceCache;
use crate::services::oauth::TokenProvider;
use crate::services::saxo::{ApiFactory, PortfolioApi, StartupPhase};
use crate::services::schedule::Schedule;
use crate::time_utils::Clock;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// At most one cycle-timeout warning per account in this window.
const TIMEOUT_WARN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Signals from a coordinator to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSignal {
    /// The refresh token is dead; start the reauthentication flow.
    ReauthRequired { key: String },
    /// Client data arrived after setup; recreate the account's entities.
    Reload { key: String },
    /// The Saxo account id is known; the entry title should follow it.
    AccountIdentified { key: String, account_id: String },
}

/// Where the current or last cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    TokenCheck,
    FetchRequired,
    FetchOptional,
    Assembling,
    Success,
    Failed,
}

/// Collaborators of a coordinator.
pub struct CoordinatorParts {
    pub key: String,
    pub settings: CoordinatorSettings,
    pub tokens: Arc<dyn TokenProvider>,
    pub factory: Arc<dyn ApiFactory>,
    pub startup: Arc<StartupPhase>,
    pub schedule: Schedule,
    pub clock: Arc<dyn Clock>,
    pub signals: mpsc::UnboundedSender<HostSignal>,
}

/// What readers see between cycles.
#[derive(Debug, Clone)]
pub struct Published {
    pub snapshot: Option<Arc<UpdateSnapshot>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_cycle_ok: bool,
    pub last_error: Option<String>,
    pub phase: CyclePhase,
    pub consecutive_failures: u32,
}

/// Read-side view handed to the entity projection.
#[derive(Debug, Clone)]
pub struct CoordinatorView {
    pub key: String,
    pub published: Published,
    pub token: TokenState,
    pub update_interval: Duration,
    pub market_status: &'static str,
    pub timezone: String,
}

/// HTTP session bound to one bearer token.
struct Session {
    access_token: String,
    client: Arc<dyn PortfolioApi>,
}

/// Mutable state owned by whichever cycle holds the lock.
struct CycleState {
    session: Option<Session>,
    cache: PerformanceCache,
    /// Unconsumed startup stagger
    stagger: Option<Duration>,
    /// No cycle has produced a client name since before setup completed
    client_pending: bool,
    reload_signalled: bool,
    reported_account_id: Option<String>,
    last_timeout_warn: Option<Instant>,
}

/// Per-account update coordinator.
pub struct UpdateCoordinator {
    key: String,
    settings: CoordinatorSettings,
    tokens: Arc<dyn TokenProvider>,
    factory: Arc<dyn ApiFactory>,
    startup: Arc<StartupPhase>,
    schedule: Schedule,
    clock: Arc<dyn Clock>,
    signals: mpsc::UnboundedSender<HostSignal>,
    setup_complete: AtomicBool,
    /// Held for a whole cycle, so cycles never overlap.
    state: Mutex<CycleState>,
    published: RwLock<Published>,
    close_tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl UpdateCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        let stagger = random_stagger(parts.settings.stagger_max);
        Self::with_stagger(parts, stagger)
    }

    /// Construct with a fixed startup stagger instead of a random one.
    pub fn with_stagger(parts: CoordinatorParts, stagger: Option<Duration>) -> Self {
        let cache = PerformanceCache::new(parts.settings.performance_cache_interval);
        Self {
            key: parts.key,
            settings: parts.settings,
            tokens: parts.tokens,
            factory: parts.factory,
            startup: parts.startup,
            schedule: parts.schedule,
            clock: parts.clock,
            signals: parts.signals,
            setup_complete: AtomicBool::new(false),
            state: Mutex::new(CycleState {
                session: None,
                cache,
                stagger,
                client_pending: true,
                reload_signalled: false,
                reported_account_id: None,
                last_timeout_warn: None,
            }),
            published: RwLock::new(Published {
                snapshot: None,
                last_success: None,
                last_cycle_ok: false,
                last_error: None,
                phase: CyclePhase::Idle,
                consecutive_failures: 0,
            }),
            close_tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Wait before the next scheduled cycle, recomputed from market hours.
    pub fn next_interval(&self) -> Duration {
        self.schedule.update_interval(self.clock.now())
    }

    /// Called by the host once its one-time setup sequence has finished.
    pub fn mark_setup_complete(&self) {
        self.setup_complete.store(true, Ordering::Release);
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.load(Ordering::Acquire)
    }

    pub fn published(&self) -> Published {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> Option<Arc<UpdateSnapshot>> {
        self.published().snapshot
    }

    /// Everything the entity projection needs, at one instant.
    pub async fn view(&self) -> CoordinatorView {
        let now = self.clock.now();
        CoordinatorView {
            key: self.key.clone(),
            published: self.published(),
            token: self.tokens.current().await,
            update_interval: self.schedule.current_interval(now),
            market_status: self.schedule.market_status(now),
            timezone: self.schedule.timezone().to_string(),
        }
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .phase = phase;
    }

    // ─── Cycle ───────────────────────────────────────────────────────────────

    /// Run one cycle to completion or failure.
    ///
    /// On failure the previous snapshot stays published. Reauthentication
    /// errors come back exactly as the token manager produced them.
    pub async fn refresh(&self) -> Result<Arc<UpdateSnapshot>, AppError> {
        let mut state = self.state.lock().await;

        let stagger = self.take_stagger(&mut state);
        if !stagger.is_zero() {
            tracing::debug!(
                account = %self.key,
                delay_ms = stagger.as_millis() as u64,
                "Applying startup stagger"
            );
            tokio::time::sleep(stagger).await;
        }

        let deadline = Instant::now() + self.settings.cycle_timeout;
        match self.run_phases(&mut state, deadline).await {
            Ok(snapshot) => Ok(self.on_success(&mut state, snapshot)),
            Err(e) => {
                self.on_failure(&mut state, &e);
                Err(e)
            }
        }
    }

    /// The stagger is skipped while no cycle has ever succeeded, then used
    /// once.
    fn take_stagger(&self, state: &mut CycleState) -> Duration {
        if self.published().last_success.is_none() {
            return Duration::ZERO;
        }
        state.stagger.take().unwrap_or(Duration::ZERO)
    }

    /// Only the token check and required fetch can time the cycle out. The
    /// optional deadline never extends past `deadline`, so completed balances
    /// always make it into the snapshot.
    async fn run_phases(
        &self,
        state: &mut CycleState,
        deadline: Instant,
    ) -> Result<UpdateSnapshot, AppError> {
        let (client, balance) =
            match tokio::time::timeout_at(deadline, self.fetch_required(state)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(AppError::Timeout(format!(
                        "update cycle exceeded {:?}",
                        self.settings.cycle_timeout
                    )))
                }
            };

        self.set_phase(CyclePhase::FetchOptional);
        let now = self.clock.now();
        let (performance, source, optional_error) = if state.cache.is_update_due(now) {
            let fetch_started = Instant::now();
            let optional_deadline = deadline.min(fetch_started + self.settings.optional_timeout);
            match tokio::time::timeout_at(optional_deadline, self.fetch_optional(client.as_ref()))
                .await
            {
                Ok(Ok(data)) => {
                    state.cache.update(data.clone(), now);
                    (data, OptionalSource::Fresh, None)
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        account = %self.key,
                        error = %e,
                        "Optional data unavailable, using cached values"
                    );
                    let (data, source) = cached_or_default(&state.cache);
                    (data, source, Some(e.to_string()))
                }
                Err(_) => {
                    tracing::warn!(
                        account = %self.key,
                        budget_ms = optional_deadline
                            .saturating_duration_since(fetch_started)
                            .as_millis() as u64,
                        "Optional data fetch timed out, using cached values"
                    );
                    let (data, source) = cached_or_default(&state.cache);
                    (data, source, Some("optional fetch timed out".to_string()))
                }
            }
        } else {
            let (data, source) = cached_or_default(&state.cache);
            (data, source, None)
        };

        self.set_phase(CyclePhase::Assembling);
        Ok(UpdateSnapshot {
            cycle_at: self.clock.now(),
            balance,
            performance,
            performance_source: source,
            performance_updated_at: state.cache.last_updated(),
            optional_error,
        })
    }

    async fn fetch_required(
        &self,
        state: &mut CycleState,
    ) -> Result<(Arc<dyn PortfolioApi>, Balance), AppError> {
        self.set_phase(CyclePhase::TokenCheck);
        let token = self.tokens.ensure_valid_token().await?;
        let client = self.session_for(state, &token)?;

        self.set_phase(CyclePhase::FetchRequired);
        let balance = client.get_balance().await?;
        Ok((client, balance))
    }

    /// Client details, then performance, paced by the batch delay.
    ///
    /// A failed client lookup fails the batch. A failed period reads as 0.0
    /// inside an otherwise successful batch.
    async fn fetch_optional(&self, client: &dyn PortfolioApi) -> Result<PerformanceData, AppError> {
        let details = client.get_client_details().await?;
        let client_key = details
            .client_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::InvalidResponse("client details lack ClientKey".into()))?;

        let mut data = identity_from(&details);
        if data.account_id == UNKNOWN || !data.has_client_name() {
            self.pause().await;
            match client.get_accounts().await {
                Ok(accounts) => {
                    if let Some(first) = accounts.data.first() {
                        if data.account_id == UNKNOWN {
                            if let Some(id) = first.account_id.clone() {
                                data.account_id = id;
                            }
                        }
                        if !data.has_client_name() {
                            if let Some(name) = first.display_name.clone() {
                                data.client_name = name;
                            }
                        }
                    }
                }
                Err(e) => tracing::debug!(account = %self.key, error = %e, "Account list unavailable"),
            }
        }

        self.pause().await;
        data.ytd_earnings_percentage = match client.get_performance_v3(&client_key).await {
            Ok(perf) => perf.accumulated_profit_loss(),
            Err(e) => {
                tracing::debug!(account = %self.key, error = %e, "v3 performance unavailable");
                0.0
            }
        };

        for period in PerformancePeriod::ALL {
            self.pause().await;
            match client.get_performance_v4(&client_key, period).await {
                Ok(perf) => {
                    data.set_return_pct(period, perf.return_percentage());
                    if period == PerformancePeriod::AllTime {
                        data.cash_transfer_balance = perf.latest_cash_transfer();
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        account = %self.key,
                        period = period.as_str(),
                        error = %e,
                        "v4 performance unavailable"
                    );
                    data.set_return_pct(period, 0.0);
                }
            }
        }

        Ok(data)
    }

    async fn pause(&self) {
        if !self.settings.batch_delay.is_zero() {
            tokio::time::sleep(self.settings.batch_delay).await;
        }
    }

    // ─── Session ─────────────────────────────────────────────────────────────

    /// Reuse the session while the token is unchanged, otherwise replace it
    /// and close the old one in the background.
    fn session_for(
        &self,
        state: &mut CycleState,
        token: &TokenState,
    ) -> Result<Arc<dyn PortfolioApi>, AppError> {
        if let Some(session) = &state.session {
            if session.access_token == token.access_token {
                return Ok(session.client.clone());
            }
        }

        let client = self.factory.create(&token.access_token)?;
        let old = state.session.replace(Session {
            access_token: token.access_token.clone(),
            client: client.clone(),
        });
        if let Some(old) = old {
            tracing::debug!(account = %self.key, "Token changed, replacing HTTP session");
            self.close_in_background(old.client);
        }
        Ok(client)
    }

    fn close_in_background(&self, client: Arc<dyn PortfolioApi>) {
        let key = self.key.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = client.close().await {
                tracing::warn!(account = %key, error = %e, "Failed to close old HTTP session");
            }
        });
        let mut tasks = self.close_tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Close the live session and wait for pending background closes.
    pub async fn shutdown(&self) {
        let session = self.state.lock().await.session.take();
        if let Some(session) = session {
            if let Err(e) = session.client.close().await {
                tracing::warn!(account = %self.key, error = %e, "Failed to close HTTP session");
            }
        }

        let pending = std::mem::take(&mut *self.close_tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for result in join_all(pending).await {
            if let Err(e) = result {
                tracing::warn!(account = %self.key, error = %e, "Session close task failed");
            }
        }
        tracing::info!(account = %self.key, "Coordinator shut down");
    }

    // ─── Outcomes ────────────────────────────────────────────────────────────

    fn on_success(&self, state: &mut CycleState, snapshot: UpdateSnapshot) -> Arc<UpdateSnapshot> {
        let cycles = self.startup.record_success();
        let snapshot = Arc::new(snapshot);

        self.track_client_identity(state, &snapshot.performance);

        {
            let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
            published.snapshot = Some(snapshot.clone());
            published.last_success = Some(snapshot.cycle_at);
            published.last_cycle_ok = true;
            published.last_error = None;
            published.phase = CyclePhase::Success;
            published.consecutive_failures = 0;
        }

        tracing::info!(
            account = %self.key,
            cycles,
            total_value = snapshot.balance.total_value,
            performance = ?snapshot.performance_source,
            "Update cycle succeeded"
        );
        snapshot
    }

    /// Title side-channel and the one-time post-setup reload.
    fn track_client_identity(&self, state: &mut CycleState, performance: &PerformanceData) {
        if performance.account_id != UNKNOWN
            && state.reported_account_id.as_deref() != Some(performance.account_id.as_str())
        {
            state.reported_account_id = Some(performance.account_id.clone());
            self.signal(HostSignal::AccountIdentified {
                key: self.key.clone(),
                account_id: performance.account_id.clone(),
            });
        }

        if !performance.has_client_name() || !state.client_pending {
            return;
        }
        if !self.is_setup_complete() {
            // Setup will create the entities itself
            state.client_pending = false;
            return;
        }

        if !state.reload_signalled {
            state.reload_signalled = true;
            state.client_pending = false;
            tracing::info!(account = %self.key, "Client data now available, requesting reload");
            self.signal(HostSignal::Reload {
                key: self.key.clone(),
            });
        }
    }

    fn on_failure(&self, state: &mut CycleState, err: &AppError) {
        let failures = {
            let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
            published.last_cycle_ok = false;
            published.last_error = Some(err.to_string());
            published.phase = CyclePhase::Failed;
            published.consecutive_failures += 1;
            published.consecutive_failures
        };

        if err.is_reauth_required() {
            tracing::error!(account = %self.key, error = %err, "Reauthentication required");
            self.signal(HostSignal::ReauthRequired {
                key: self.key.clone(),
            });
            return;
        }

        if matches!(err, AppError::Timeout(_)) {
            let now = Instant::now();
            let due = state
                .last_timeout_warn
                .map_or(true, |last| now.duration_since(last) >= TIMEOUT_WARN_INTERVAL);
            if due {
                state.last_timeout_warn = Some(now);
                tracing::warn!(account = %self.key, failures, error = %err, "Update cycle timed out");
            } else {
                tracing::debug!(account = %self.key, failures, error = %err, "Update cycle timed out");
            }
            return;
        }

        tracing::error!(account = %self.key, failures, error = %err, "Update cycle failed");
    }

    fn signal(&self, signal: HostSignal) {
        if self.signals.send(signal).is_err() {
            tracing::debug!(account = %self.key, "Host signal receiver gone");
        }
    }
}

fn random_stagger(max: Duration) -> Option<Duration> {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return None;
    }
    Some(Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms)))
}

fn cached_or_default(cache: &PerformanceCache) -> (PerformanceData, OptionalSource) {
    match cache.get() {
        Some(entry) => (entry.data.clone(), OptionalSource::Cached),
        None => (PerformanceData::default(), OptionalSource::Defaults),
    }
}

fn identity_from(details: &ClientDetails) -> PerformanceData {
    let known = |v: &Option<String>| {
        v.clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    PerformanceData {
        client_id: known(&details.client_id),
        account_id: known(&details.default_account_id),
        client_name: known(&details.name),
        ..PerformanceData::default()
    }
}
