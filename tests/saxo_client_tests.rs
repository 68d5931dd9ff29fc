// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Saxo OpenAPI client tests against a mock gateway.

use saxo_portfolio::config::CoordinatorSettings;
use saxo_portfolio::error::AppError;
use saxo_portfolio::models::PerformancePeriod;
use saxo_portfolio::services::saxo::{AuthDiagnostics, RedirectSource, RetryPolicy};
use saxo_portfolio::services::{PortfolioApi, RateLimiter, SaxoClient, StartupPhase};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> SaxoClient {
    let settings = CoordinatorSettings::fast();
    SaxoClient::new(
        &server.uri(),
        "tok-abc",
        RateLimiter::shared(100, Duration::from_secs(60)),
        Arc::new(StartupPhase::new(3)),
        AuthDiagnostics {
            client_id: "my_app_key_1234".into(),
            redirect_uri: "https://example.com/cb".into(),
            redirect_source: RedirectSource::Stored,
        },
        RetryPolicy::from_settings(&settings),
    )
    .unwrap()
}

fn balance_body() -> serde_json::Value {
    json!({
        "CashBalance": 1500.25,
        "Currency": "EUR",
        "TotalValue": 32000.0,
        "NonMarginPositionsValue": 30499.75
    })
}

#[tokio::test]
async fn test_balance_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/port/v1/balances/me"))
        .and(header("authorization", "Bearer tok-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(balance_body()))
        .expect(1)
        .mount(&server)
        .await;

    let balance = client(&server).get_balance().await.unwrap();
    assert_eq!(balance.currency, "EUR");
    assert_eq!(balance.total_value, 32000.0);
    assert_eq!(balance.non_margin_positions_value, 30499.75);
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/port/v1/balances/me"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/port/v1/balances/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(balance_body()))
        .expect(1)
        .mount(&server)
        .await;

    let balance = client(&server).get_balance().await.unwrap();
    assert_eq!(balance.cash_balance, 1500.25);
}

#[tokio::test]
async fn test_html_gateway_error_is_summarized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/port/v1/balances/me"))
        .respond_with(ResponseTemplate::new(502).set_body_string(
            "<!DOCTYPE html><html><head><title>502 Bad Gateway</title></head>\
             <body><h1>Bad Gateway</h1><p>lots of markup</p></body></html>",
        ))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).get_balance().await.unwrap_err();
    match err {
        AppError::Http { status, message } => {
            assert_eq!(status, 502);
            assert_eq!(message, "HTML error page: 502 Bad Gateway");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unauthorized_is_annotated_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/port/v1/clients/me"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid token"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get_client_details().await.unwrap_err();
    assert!(err.is_reauth_required());
    let text = err.to_string();
    assert!(text.contains("Invalid token"));
    assert!(text.contains("***1234"));
    assert!(text.contains("https://example.com/cb"));
    assert!(text.contains("stored config"));
    assert!(!text.contains("my_app_key_1234"));
}

#[tokio::test]
async fn test_balance_missing_field_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/port/v1/balances/me"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"CashBalance": 1.0, "Currency": "EUR"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get_balance().await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResponse(ref m) if m.contains("TotalValue")));
}

#[tokio::test]
async fn test_performance_v4_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hist/v4/performance/timeseries"))
        .and(query_param("ClientKey", "ck-77"))
        .and(query_param("StandardPeriod", "Month"))
        .and(query_param("FieldGroups", "Balance,KeyFigures"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "KeyFigures": {"ReturnFraction": 0.0523},
            "Balance": {"CashTransfer": [{"Value": 100.0}, {"Value": 250.5}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let perf = client(&server)
        .get_performance_v4("ck-77", PerformancePeriod::Month)
        .await
        .unwrap();
    assert!((perf.return_percentage() - 5.23).abs() < 1e-9);
    assert_eq!(perf.latest_cash_transfer(), 250.5);
}

#[tokio::test]
async fn test_performance_v3_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hist/v3/perf/ck-77"))
        .and(query_param("StandardPeriod", "Year"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "BalancePerformance": {"AccumulatedProfitLoss": 812.4}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let perf = client(&server).get_performance_v3("ck-77").await.unwrap();
    assert_eq!(perf.accumulated_profit_loss(), 812.4);
}

#[tokio::test]
async fn test_closed_client_refuses_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(balance_body()))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    client.close().await.unwrap();
    // Closing twice is harmless
    client.close().await.unwrap();

    let err = client.get_balance().await.unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
}
