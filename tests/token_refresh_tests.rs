// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token manager tests against a mock OAuth token endpoint.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Duration as ChronoDuration;
use saxo_portfolio::config::Config;
use saxo_portfolio::db::AccountStore;
use saxo_portfolio::error::AppError;
use saxo_portfolio::models::{AccountRecord, TokenState};
use saxo_portfolio::services::{TokenManager, TokenProvider, TokenSealer};
use saxo_portfolio::time_utils::ManualClock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{sealed_record, t0, token_state, SEALING_KEY};

struct Setup {
    manager: TokenManager,
    store: AccountStore,
    clock: ManualClock,
}

async fn setup(server: &MockServer, record: AccountRecord) -> Setup {
    let mut config = Config::test_default();
    config.auth_base_url = server.uri();

    let store = AccountStore::new_mock();
    store.insert(record.clone()).await.unwrap();
    let clock = ManualClock::new(t0());
    let manager = TokenManager::from_record(
        &config,
        &record,
        store.clone(),
        TokenSealer::new(SEALING_KEY).unwrap(),
        Arc::new(clock.clone()),
    )
    .unwrap();

    Setup {
        manager,
        store,
        clock,
    }
}

/// Access token with one minute left; refresh token healthy.
fn expiring_access() -> TokenState {
    token_state(t0() - ChronoDuration::minutes(19), 1200, 3600, "old-access")
}

fn token_body(access: &str, expires_in: i64) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": format!("refresh-{}", access),
        "token_type": "Bearer",
        "expires_in": expires_in,
        "refresh_token_expires_in": 3600
    })
}

fn basic_auth() -> String {
    format!("Basic {}", BASE64.encode("test_client_id:test_secret"))
}

#[tokio::test]
async fn test_refresh_sends_basic_auth_form_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("authorization", basic_auth().as_str()))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-old-access"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Fexample.com%2Fauth%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("new-access", 1200)))
        .expect(1)
        .mount(&server)
        .await;

    let s = setup(&server, sealed_record("acct", &expiring_access())).await;
    let mut events = s.store.subscribe();

    let tokens = s.manager.ensure_valid_token().await.unwrap();

    assert_eq!(tokens.access_token, "new-access");
    assert_eq!(tokens.refresh_token, "refresh-new-access");
    assert_eq!(tokens.issued_at, t0());
    assert_eq!(tokens.access_expires_at, t0() + ChronoDuration::seconds(1200));
    assert_eq!(tokens.refresh_expires_at, t0() + ChronoDuration::seconds(3600));

    // Persisted sealed, and without a reload notification
    let stored = s.store.get("acct").await.unwrap().tokens.unwrap();
    let sealer = TokenSealer::new(SEALING_KEY).unwrap();
    assert_eq!(sealer.open_tokens(&stored, "acct").unwrap(), tokens);
    assert!(!stored.access_token_sealed.contains("new-access"));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(s.manager.current().await, tokens);
}

#[tokio::test]
async fn test_valid_tokens_make_no_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("x", 1200)))
        .expect(0)
        .mount(&server)
        .await;

    let healthy = token_state(t0(), 1200, 3600, "fresh");
    let s = setup(&server, sealed_record("acct", &healthy)).await;

    let tokens = s.manager.ensure_valid_token().await.unwrap();
    assert_eq!(tokens, healthy);
}

/// Access token has 20 minutes left but the refresh token only 5.
#[tokio::test]
async fn test_short_refresh_token_refreshes_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("rotated", 1200)))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = token_state(t0(), 1200, 300, "short");
    let s = setup(&server, sealed_record("acct", &tokens)).await;

    let refreshed = s.manager.ensure_valid_token().await.unwrap();
    assert_eq!(refreshed.access_token, "rotated");
}

#[tokio::test]
async fn test_expired_refresh_token_makes_no_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("x", 1200)))
        .expect(0)
        .mount(&server)
        .await;

    let dead = token_state(t0() - ChronoDuration::hours(2), 1200, 3600, "dead");
    let s = setup(&server, sealed_record("acct", &dead)).await;

    let err = s.manager.ensure_valid_token().await.unwrap_err();
    assert!(matches!(err, AppError::AuthenticationExpired));
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("<html><title>Down</title></html>"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("third-time", 1200)))
        .expect(1)
        .mount(&server)
        .await;

    let s = setup(&server, sealed_record("acct", &expiring_access())).await;

    let tokens = s.manager.ensure_valid_token().await.unwrap();
    assert_eq!(tokens.access_token, "third-time");
}

#[tokio::test]
async fn test_malformed_body_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(3)
        .mount(&server)
        .await;

    let s = setup(&server, sealed_record("acct", &expiring_access())).await;

    let err = s.manager.ensure_valid_token().await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResponse(_)));
    // Old tokens stay in place
    assert_eq!(s.manager.current().await.access_token, "old-access");
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    let s = setup(&server, sealed_record("acct", &expiring_access())).await;

    let err = s.manager.ensure_valid_token().await.unwrap_err();
    match &err {
        AppError::PermanentAuth { status, context } => {
            assert_eq!(*status, 401);
            assert!(context.contains("***t_id"));
            assert!(context.contains("stored config"));
            assert!(!context.contains("test_client_id"));
        }
        other => panic!("expected PermanentAuth, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_grant_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let s = setup(&server, sealed_record("acct", &expiring_access())).await;

    let err = s.manager.ensure_valid_token().await.unwrap_err();
    assert!(err.is_reauth_required());
}

#[tokio::test]
async fn test_fallback_redirect_uri_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Fmy.home-assistant.io%2Fredirect%2Foauth",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fb", 1200)))
        .expect(1)
        .mount(&server)
        .await;

    let mut record = sealed_record("acct", &expiring_access());
    record.redirect_uri = None;
    let s = setup(&server, record).await;

    assert!(s.manager.auth_diagnostics().describe().contains("fallback default"));
    let tokens = s.manager.ensure_valid_token().await.unwrap();
    assert_eq!(tokens.access_token, "fb");
}

/// Readers see the last good tokens while a slow refresh is in flight.
#[tokio::test]
async fn test_current_does_not_wait_for_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("slow", 1200))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let s = setup(&server, sealed_record("acct", &expiring_access())).await;

    let (refreshed, during) = tokio::join!(s.manager.ensure_valid_token(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_millis(100), s.manager.current()).await
    });

    assert_eq!(during.unwrap().access_token, "old-access");
    assert_eq!(refreshed.unwrap().access_token, "slow");
    assert_eq!(s.manager.current().await.access_token, "slow");
}

/// Issuance keeps increasing even when the clock does not move.
#[tokio::test]
async fn test_issued_at_strictly_increases() {
    let server = MockServer::start().await;
    // One-minute access tokens are always inside the refresh buffer
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short-lived", 60)))
        .expect(3)
        .mount(&server)
        .await;

    let s = setup(&server, sealed_record("acct", &expiring_access())).await;

    let mut previous = s.manager.current().await.issued_at;
    for _ in 0..3 {
        let tokens = s.manager.ensure_valid_token().await.unwrap();
        assert!(tokens.issued_at > previous);
        assert_eq!(
            tokens.access_expires_at,
            tokens.issued_at + ChronoDuration::seconds(60)
        );
        assert_eq!(
            tokens.refresh_expires_at,
            tokens.issued_at + ChronoDuration::seconds(3600)
        );
        previous = tokens.issued_at;
    }

    // Persisted issuance keeps its sub-second precision
    let stored = s.store.get("acct").await.unwrap().tokens.unwrap();
    let sealer = TokenSealer::new(SEALING_KEY).unwrap();
    assert_eq!(sealer.open_tokens(&stored, "acct").unwrap().issued_at, previous);

    // Stepping the clock back does not roll issuance back
    s.clock.set(t0() - ChronoDuration::minutes(10));
    assert_eq!(s.manager.ensure_valid_token().await.unwrap().issued_at, previous);
}

#[tokio::test]
async fn test_missing_tokens_require_reauth() {
    let config = Config::test_default();
    let record = AccountRecord::new("empty");
    let result = TokenManager::from_record(
        &config,
        &record,
        AccountStore::new_mock(),
        TokenSealer::new(SEALING_KEY).unwrap(),
        Arc::new(ManualClock::new(t0())),
    );
    assert!(matches!(result, Err(AppError::AuthenticationExpired)));
}
