// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Process-wide registry of account coordinators.
//!
//! Owns account setup and teardown, the shared "refresh" service, and the
//! host side of the coordinator signals (reauth, reload, title updates).

use crate::config::Config;
use crate::db::{AccountStore, StoreEvent};
use crate::error::AppError;
use crate::models::AccountRecord;
use crate::services::coordinator::{CoordinatorParts, HostSignal, UpdateCoordinator};
use crate::services::oauth::TokenManager;
use crate::services::rate_limit::{RateLimiter, SharedRateLimiter};
use crate::services::saxo::{RetryPolicy, SaxoClientFactory, StartupPhase};
use crate::services::schedule::Schedule;
use crate::services::scheduler::SchedulerHandle;
use crate::services::sealing::TokenSealer;
use crate::time_utils::Clock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

const MAX_CONCURRENT_SHUTDOWNS: usize = 16;

/// Receiving end of coordinator signals, drained by [`Registry::process_signals`].
pub type SignalReceiver = mpsc::UnboundedReceiver<HostSignal>;

struct AccountHandle {
    coordinator: Arc<UpdateCoordinator>,
    scheduler: SchedulerHandle,
}

/// All configured accounts of this process.
pub struct Registry {
    config: Config,
    store: AccountStore,
    sealer: TokenSealer,
    limiter: SharedRateLimiter,
    clock: Arc<dyn Clock>,
    signals: mpsc::UnboundedSender<HostSignal>,
    accounts: DashMap<String, AccountHandle>,
    /// Accounts whose refresh token is dead, and since when
    reauth: DashMap<String, DateTime<Utc>>,
    /// Accounts holding a reference on the refresh service
    refresh_refs: Mutex<usize>,
    /// Serializes add/remove/reload
    lifecycle: tokio::sync::Mutex<()>,
}

impl Registry {
    pub fn new(
        config: Config,
        store: AccountStore,
        sealer: TokenSealer,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, SignalReceiver) {
        let limiter = RateLimiter::shared(
            config.settings.rate_limit_requests,
            config.settings.rate_limit_window,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            config,
            store,
            sealer,
            limiter,
            clock,
            signals: tx,
            accounts: DashMap::new(),
            reauth: DashMap::new(),
            refresh_refs: Mutex::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
        });
        (registry, rx)
    }

    /// Assemble a coordinator and its collaborators for one record.
    pub fn build_coordinator(&self, record: &AccountRecord) -> Result<Arc<UpdateCoordinator>, AppError> {
        let settings = self.config.settings.clone();
        let tokens = TokenManager::from_record(
            &self.config,
            record,
            self.store.clone(),
            self.sealer.clone(),
            self.clock.clone(),
        )?;
        let startup = Arc::new(StartupPhase::new(settings.startup_phase_cycles));
        let factory = SaxoClientFactory {
            base_url: self.config.api_base_url.clone(),
            limiter: self.limiter.clone(),
            startup: startup.clone(),
            auth: tokens.auth_diagnostics(),
            policy: RetryPolicy::from_settings(&settings),
        };

        Ok(Arc::new(UpdateCoordinator::new(CoordinatorParts {
            key: record.key.clone(),
            schedule: Schedule::from_setting(&record.timezone, &settings),
            settings,
            tokens: Arc::new(tokens),
            factory: Arc::new(factory),
            startup,
            clock: self.clock.clone(),
            signals: self.signals.clone(),
        })))
    }

    /// Set up every account in the store. Failures are logged per account.
    pub async fn start_all(&self) {
        for record in self.store.list().await {
            let key = record.key.clone();
            if let Err(e) = self.add_account(record).await {
                tracing::error!(account = %key, error = %e, "Account setup failed");
            }
        }
    }

    /// Set up an account: first cycle, then scheduling.
    ///
    /// A dead refresh token fails setup. Other first-cycle errors leave the
    /// account scheduled so a later cycle can recover.
    pub async fn add_account(&self, record: AccountRecord) -> Result<(), AppError> {
        let _guard = self.lifecycle.lock().await;
        self.add_locked(record).await
    }

    async fn add_locked(&self, record: AccountRecord) -> Result<(), AppError> {
        let key = record.key.clone();
        if self.accounts.contains_key(&key) {
            return Err(AppError::BadRequest(format!("Account {} already set up", key)));
        }

        let coordinator = match self.build_coordinator(&record) {
            Ok(c) => c,
            Err(e) => {
                if e.is_reauth_required() {
                    self.mark_reauth(&key);
                }
                return Err(e);
            }
        };

        if let Err(e) = coordinator.refresh().await {
            if e.is_reauth_required() {
                self.mark_reauth(&key);
                coordinator.shutdown().await;
                return Err(e);
            }
            tracing::warn!(account = %key, error = %e, "First update failed, will retry on schedule");
        }
        coordinator.mark_setup_complete();
        self.reauth.remove(&key);

        let scheduler = SchedulerHandle::spawn(coordinator.clone());
        self.accounts.insert(
            key.clone(),
            AccountHandle {
                coordinator,
                scheduler,
            },
        );
        self.register_refresh_service();
        tracing::info!(account = %key, timezone = %record.timezone, "Account set up");
        Ok(())
    }

    /// Tear an account down. Unknown keys are ignored.
    pub async fn remove_account(&self, key: &str) {
        let _guard = self.lifecycle.lock().await;
        self.remove_locked(key).await;
    }

    async fn remove_locked(&self, key: &str) -> bool {
        let Some((_, handle)) = self.accounts.remove(key) else {
            return false;
        };
        handle.scheduler.stop().await;
        handle.coordinator.shutdown().await;
        self.unregister_refresh_service();
        tracing::info!(account = %key, "Account torn down");
        true
    }

    /// Rebuild an account from its current store record.
    pub async fn reload_account(&self, key: &str) -> Result<(), AppError> {
        let _guard = self.lifecycle.lock().await;
        tracing::info!(account = %key, "Reloading account");
        self.remove_locked(key).await;
        let record = self.store.get(key).await?;
        self.add_locked(record).await
    }

    /// Stop every account and wait for their sessions to close.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let keys: Vec<String> = self.accounts.iter().map(|e| e.key().clone()).collect();
        stream::iter(keys)
            .for_each_concurrent(MAX_CONCURRENT_SHUTDOWNS, |key| async move {
                self.remove_locked(&key).await;
            })
            .await;
    }

    // ─── Refresh service ─────────────────────────────────────────────────────

    fn register_refresh_service(&self) {
        let mut refs = self.refresh_refs.lock().unwrap_or_else(|e| e.into_inner());
        *refs += 1;
        if *refs == 1 {
            tracing::info!("Refresh service registered");
        }
    }

    fn unregister_refresh_service(&self) {
        let mut refs = self.refresh_refs.lock().unwrap_or_else(|e| e.into_inner());
        *refs = refs.saturating_sub(1);
        if *refs == 0 {
            tracing::info!("Refresh service removed");
        }
    }

    pub fn is_refresh_service_registered(&self) -> bool {
        *self.refresh_refs.lock().unwrap_or_else(|e| e.into_inner()) > 0
    }

    /// Manual "refresh now" for one account.
    pub fn request_refresh(&self, key: &str) -> Result<(), AppError> {
        if !self.is_refresh_service_registered() {
            return Err(AppError::NotFound("refresh service is not registered".into()));
        }
        let handle = self
            .accounts
            .get(key)
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", key)))?;
        handle.scheduler.trigger();
        Ok(())
    }

    // ─── Lookups ─────────────────────────────────────────────────────────────

    pub fn coordinator(&self, key: &str) -> Option<Arc<UpdateCoordinator>> {
        self.accounts.get(key).map(|h| h.coordinator.clone())
    }

    /// Keys of all running accounts, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.accounts.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn reauth_required_since(&self, key: &str) -> Option<DateTime<Utc>> {
        self.reauth.get(key).map(|v| *v)
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn mark_reauth(&self, key: &str) {
        let now = self.clock.now();
        if self.reauth.insert(key.to_string(), now).is_none() {
            tracing::error!(account = %key, "Account needs reauthentication");
        }
    }

    // ─── Host event loops ────────────────────────────────────────────────────

    /// Handle coordinator signals until every sender is gone.
    pub async fn process_signals(self: Arc<Self>, mut rx: SignalReceiver) {
        while let Some(signal) = rx.recv().await {
            self.handle_signal(signal).await;
        }
    }

    pub async fn handle_signal(&self, signal: HostSignal) {
        match signal {
            HostSignal::ReauthRequired { key } => self.mark_reauth(&key),
            HostSignal::Reload { key } => {
                if let Err(e) = self.reload_account(&key).await {
                    tracing::error!(account = %key, error = %e, "Reload failed");
                }
            }
            HostSignal::AccountIdentified { key, account_id } => {
                if let Err(e) = self.store.update_account_id(&key, &account_id).await {
                    tracing::warn!(account = %key, error = %e, "Failed to update account title");
                }
            }
        }
    }

    /// Reload accounts whose user options change.
    pub async fn watch_store(self: Arc<Self>) {
        let mut events = self.store.subscribe();
        loop {
            match events.recv().await {
                Ok(StoreEvent::OptionsChanged { key }) => {
                    if self.accounts.contains_key(&key) {
                        if let Err(e) = self.reload_account(&key).await {
                            tracing::error!(account = %key, error = %e, "Reload after options change failed");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Store events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
