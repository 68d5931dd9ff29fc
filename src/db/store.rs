// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! File-backed account store with typed operations.
//!
//! Holds the per-account configuration records (sealed tokens, redirect URI,
//! schedule, Saxo account id). Token persistence is silent; only
//! user-driven option changes are announced to subscribers.

use crate::error::AppError;
use crate::models::{AccountRecord, StoredTokens};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use validator::Validate;

/// Change notifications for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// User changed an account's options; the account must be reloaded.
    OptionsChanged { key: String },
}

/// Account record store.
#[derive(Clone)]
pub struct AccountStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// `None` in offline mode
    path: Option<PathBuf>,
    records: RwLock<BTreeMap<String, AccountRecord>>,
    events: broadcast::Sender<StoreEvent>,
}

impl AccountStore {
    /// Open the store at `path`. A missing file means no accounts yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse_records(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Accounts file not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        tracing::info!(path = %path.display(), accounts = records.len(), "Loaded account store");
        Ok(Self::build(Some(path), records))
    }

    /// Create an in-memory store for testing (offline mode).
    pub fn new_mock() -> Self {
        Self::build(None, BTreeMap::new())
    }

    fn build(path: Option<PathBuf>, records: BTreeMap<String, AccountRecord>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(StoreInner {
                path,
                records: RwLock::new(records),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    // ─── Reads ───────────────────────────────────────────────────

    pub async fn list(&self) -> Vec<AccountRecord> {
        self.inner.records.read().await.values().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Result<AccountRecord, AppError> {
        self.inner
            .records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Account {}", key)))
    }

    // ─── Writes ──────────────────────────────────────────────────

    /// Add or replace a record.
    pub async fn insert(&self, record: AccountRecord) -> Result<(), AppError> {
        record
            .validate()
            .map_err(|e| AppError::BadRequest(format!("Invalid account record: {}", e)))?;
        let key = record.key.clone();
        self.mutate(&key, move |slot| *slot = record).await
    }

    /// Persist refreshed tokens. Does not notify subscribers.
    pub async fn save_tokens(&self, key: &str, tokens: StoredTokens) -> Result<(), AppError> {
        self.mutate_existing(key, |record| record.tokens = Some(tokens))
            .await?;
        tracing::debug!(account = %key, "Persisted refreshed tokens");
        Ok(())
    }

    /// Record the Saxo account id and retitle the entry to match.
    ///
    /// Returns the new title, or `None` when nothing changed.
    pub async fn update_account_id(
        &self,
        key: &str,
        account_id: &str,
    ) -> Result<Option<String>, AppError> {
        let title = AccountRecord::title_for_account_id(account_id);
        {
            let records = self.inner.records.read().await;
            let current = records
                .get(key)
                .ok_or_else(|| AppError::NotFound(format!("Account {}", key)))?;
            if current.account_id.as_deref() == Some(account_id) && current.title == title {
                return Ok(None);
            }
        }

        let new_title = title.clone();
        self.mutate_existing(key, move |record| {
            record.account_id = Some(account_id.to_string());
            record.title = new_title;
        })
        .await?;
        tracing::info!(account = %key, title = %title, "Updated account title");
        Ok(Some(title))
    }

    /// User-driven option change. Subscribers must reload the account.
    pub async fn update_options(&self, key: &str, timezone: &str) -> Result<(), AppError> {
        if timezone.trim().is_empty() {
            return Err(AppError::BadRequest("timezone must not be empty".into()));
        }
        self.mutate_existing(key, |record| record.timezone = timezone.trim().to_string())
            .await?;
        // No subscribers is fine
        let _ = self.inner.events.send(StoreEvent::OptionsChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut records = self.inner.records.write().await;
        if records.remove(key).is_none() {
            return Err(AppError::NotFound(format!("Account {}", key)));
        }
        self.persist(&records).await
    }

    async fn mutate_existing<F>(&self, key: &str, f: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut AccountRecord),
    {
        let mut records = self.inner.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| AppError::NotFound(format!("Account {}", key)))?;
        f(record);
        self.persist(&records).await
    }

    async fn mutate<F>(&self, key: &str, f: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut AccountRecord),
    {
        let mut records = self.inner.records.write().await;
        let slot = records
            .entry(key.to_string())
            .or_insert_with(|| AccountRecord::new(key));
        f(slot);
        self.persist(&records).await
    }

    /// Write-then-rename so a crash never leaves a truncated file.
    async fn persist(&self, records: &BTreeMap<String, AccountRecord>) -> Result<(), AppError> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };

        let list: Vec<&AccountRecord> = records.values().collect();
        let body = serde_json::to_vec_pretty(&list)
            .map_err(|e| AppError::Storage(format!("Failed to serialize accounts: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to replace {}: {}", path.display(), e)))
    }
}

fn parse_records(raw: &str) -> Result<BTreeMap<String, AccountRecord>, AppError> {
    let list: Vec<AccountRecord> = serde_json::from_str(raw)
        .map_err(|e| AppError::Storage(format!("Invalid accounts file: {}", e)))?;

    let mut records = BTreeMap::new();
    for record in list {
        record.validate().map_err(|e| {
            AppError::Storage(format!("Invalid account record {:?}: {}", record.key, e))
        })?;
        if records.insert(record.key.clone(), record).is_some() {
            return Err(AppError::Storage("Duplicate account key".into()));
        }
    }
    Ok(records)
}
