// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! File-backed account store tests.

use saxo_portfolio::db::{AccountStore, StoreEvent};
use saxo_portfolio::error::AppError;
use saxo_portfolio::models::AccountRecord;
use saxo_portfolio::services::TokenSealer;

mod common;
use common::{sealed_record, t0, token_state, SEALING_KEY};

#[tokio::test]
async fn test_missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path().join("accounts.json"))
        .await
        .unwrap();
    assert!(store.list().await.is_empty());
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    let tokens = token_state(t0(), 1200, 3600, "persisted");

    {
        let store = AccountStore::open(&path).await.unwrap();
        store.insert(sealed_record("main", &tokens)).await.unwrap();
        store.update_account_id("main", "ACC-42").await.unwrap();
        store.update_options("main", "Europe/Copenhagen").await.unwrap();
    }

    let store = AccountStore::open(&path).await.unwrap();
    let record = store.get("main").await.unwrap();
    assert_eq!(record.title, "Saxo Portfolio ACC-42");
    assert_eq!(record.account_id.as_deref(), Some("ACC-42"));
    assert_eq!(record.timezone, "Europe/Copenhagen");

    let sealer = TokenSealer::new(SEALING_KEY).unwrap();
    let opened = sealer
        .open_tokens(record.tokens.as_ref().unwrap(), "main")
        .unwrap();
    assert_eq!(opened, tokens);

    // Tokens never hit the disk in the clear
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("persisted"));
}

#[tokio::test]
async fn test_token_saves_are_silent() {
    let dir = tempfile::tempdir().unwrap();
    let store = AccountStore::open(dir.path().join("accounts.json"))
        .await
        .unwrap();
    let record = sealed_record("main", &token_state(t0(), 1200, 3600, "a"));
    let refreshed = sealed_record("main", &token_state(t0(), 1200, 3600, "b"));
    store.insert(record).await.unwrap();

    let mut events = store.subscribe();
    store
        .save_tokens("main", refreshed.tokens.unwrap())
        .await
        .unwrap();
    assert!(events.try_recv().is_err());

    store.update_options("main", "any").await.unwrap();
    assert_eq!(
        events.try_recv().unwrap(),
        StoreEvent::OptionsChanged {
            key: "main".to_string()
        }
    );
}

#[tokio::test]
async fn test_invalid_records_rejected() {
    let store = AccountStore::new_mock();

    let mut bad_uri = AccountRecord::new("main");
    bad_uri.redirect_uri = Some("not a url".to_string());
    assert!(matches!(
        store.insert(bad_uri).await,
        Err(AppError::BadRequest(_))
    ));

    assert!(matches!(
        store.insert(AccountRecord::new("")).await,
        Err(AppError::BadRequest(_))
    ));
    assert!(store.list().await.is_empty());
}

#[tokio::test]
async fn test_corrupt_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        AccountStore::open(&path).await,
        Err(AppError::Storage(_))
    ));
}

#[tokio::test]
async fn test_remove_account() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    let store = AccountStore::open(&path).await.unwrap();
    store.insert(AccountRecord::new("a")).await.unwrap();
    store.insert(AccountRecord::new("b")).await.unwrap();

    store.remove("a").await.unwrap();
    assert!(matches!(store.remove("a").await, Err(AppError::NotFound(_))));

    let reopened = AccountStore::open(&path).await.unwrap();
    let keys: Vec<String> = reopened.list().await.into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["b"]);
}
