mod common;

use binance_brokerage::core::config::{BrokerageConfig, RetryPolicy, Venue};
use binance_brokerage::core::errors::ExchangeError;
use binance_brokerage::core::kernel::{RequestAuth, RestClient, API_KEY_HEADER};
use binance_brokerage::exchanges::binance::builder::build_rest;
use binance_brokerage::exchanges::binance::events::EventSink;
use binance_brokerage::exchanges::binance::BinanceRestClient;
use binance_brokerage::MarketVariant;
use common::{exchange_info, params_of, MockTransport};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config(max_attempts: u32) -> BrokerageConfig {
    BrokerageConfig::read_only(Venue::Binance).retry(RetryPolicy {
        max_attempts,
        backoff_step: Duration::from_millis(1),
    })
}

#[tokio::test]
async fn test_throttled_request_stops_at_attempt_ceiling() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/api/v3/time", 429, r#"{"code":-1003,"msg":"Too many requests"}"#);

    let rest = build_rest(&config(3), MarketVariant::Spot, Some(mock.clone()), CancellationToken::new())
        .unwrap();
    let result: Result<Value, _> = rest.get_json("/api/v3/time", &[], RequestAuth::Public).await;

    match result {
        Err(ExchangeError::RateLimitExceeded { attempts, body }) => {
            assert_eq!(attempts, 3);
            assert!(body.contains("-1003"));
        }
        other => panic!("expected rate limit error, got {:?}", other),
    }
    assert_eq!(mock.requests_to("/api/v3/time").len(), 3);
}

#[tokio::test]
async fn test_throttle_then_success_is_transparent() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/api/v3/time", 429, "{}");
    mock.respond(Method::GET, "/api/v3/time", 200, r#"{"serverTime":1700000000000}"#);

    let rest = build_rest(&config(5), MarketVariant::Spot, Some(mock.clone()), CancellationToken::new())
        .unwrap();
    let time: Value = rest
        .get_json("/api/v3/time", &[], RequestAuth::Public)
        .await
        .unwrap();

    assert_eq!(time["serverTime"], 1_700_000_000_000_i64);
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/api/v3/time", 400, r#"{"code":-1100,"msg":"Illegal characters"}"#);

    let rest = build_rest(&config(5), MarketVariant::Spot, Some(mock.clone()), CancellationToken::new())
        .unwrap();
    let result: Result<Value, _> = rest.get_json("/api/v3/time", &[], RequestAuth::Public).await;

    match result {
        Err(ExchangeError::ApiError { status, body, .. }) => {
            assert_eq!(status, 400);
            assert!(body.contains("-1100"));
        }
        other => panic!("expected API error, got {:?}", other),
    }
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_signed_request_without_credentials_fails_before_sending() {
    let mock = MockTransport::new();
    let rest = build_rest(&config(1), MarketVariant::Spot, Some(mock.clone()), CancellationToken::new())
        .unwrap();

    let result: Result<Value, _> = rest.get_json("/api/v3/account", &[], RequestAuth::Signed).await;

    assert!(matches!(result, Err(ExchangeError::AuthError(_))));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_signed_request_carries_timestamp_signature_and_key() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/api/v3/openOrders", 200, "[]");

    let config = BrokerageConfig::new("key".to_string(), "secret".to_string(), Venue::Binance);
    let rest = build_rest(&config, MarketVariant::Spot, Some(mock.clone()), CancellationToken::new())
        .unwrap();
    let orders: Vec<Value> = rest
        .get_json(
            "/api/v3/openOrders",
            &[("symbol", "BTCUSDT".to_string())],
            RequestAuth::Signed,
        )
        .await
        .unwrap();
    assert!(orders.is_empty());

    let request = &mock.requests()[0];
    let params = common::params_of(request);
    assert_eq!(params["symbol"], "BTCUSDT");
    assert!(params.contains_key("timestamp"));
    assert_eq!(params["signature"].len(), 64);
    assert!(request.query.starts_with("symbol=BTCUSDT&"));
    assert!(request.query.ends_with(&format!("signature={}", params["signature"])));
    assert_eq!(request.headers.get(API_KEY_HEADER).map(String::as_str), Some("key"));
}

#[tokio::test]
async fn test_cancellation_aborts_retry_loop() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/api/v3/time", 429, "{}");

    let cancel = CancellationToken::new();
    let slow = BrokerageConfig::read_only(Venue::Binance).retry(RetryPolicy {
        max_attempts: 10,
        backoff_step: Duration::from_secs(60),
    });
    let rest = Arc::new(build_rest(&slow, MarketVariant::Spot, Some(mock.clone()), cancel.clone()).unwrap());

    let task = {
        let rest = Arc::clone(&rest);
        tokio::spawn(async move {
            rest.get_json::<Value>("/api/v3/time", &[], RequestAuth::Public)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ExchangeError::Cancelled)));
}

#[tokio::test]
async fn test_listen_key_lifecycle() {
    let mock = MockTransport::new();
    mock.respond_json(
        Method::GET,
        "/fapi/v1/exchangeInfo",
        &exchange_info(&[("BTCUSDT", "BTC", "USDT")]),
    );
    mock.respond(Method::POST, "/fapi/v1/listenKey", 200, r#"{"listenKey":"abc"}"#);
    mock.respond(Method::PUT, "/fapi/v1/listenKey", 200, "{}");
    mock.respond(Method::DELETE, "/fapi/v1/listenKey", 200, "{}");

    let config = BrokerageConfig::new("key".to_string(), "secret".to_string(), Venue::BinanceUsdtFutures);
    let rest = build_rest(&config, MarketVariant::UsdtFutures, Some(mock.clone()), CancellationToken::new())
        .unwrap();
    let (events, _rx) = EventSink::channel();
    let client = BinanceRestClient::connect(rest, MarketVariant::UsdtFutures, events)
        .await
        .unwrap();

    assert!(matches!(client.session_keep_alive().await, Err(ExchangeError::SessionNotStarted)));
    assert!(mock.requests_to("/fapi/v1/listenKey").is_empty());

    assert_eq!(client.create_listen_key().await.unwrap(), "abc");
    client.session_keep_alive().await.unwrap();
    client.stop_session().await.unwrap();
    assert_eq!(client.listen_key().await, None);
    assert!(matches!(client.session_keep_alive().await, Err(ExchangeError::SessionNotStarted)));

    let calls = mock.requests_to("/fapi/v1/listenKey");
    let methods: Vec<Method> = calls.iter().map(|r| r.method.clone()).collect();
    assert_eq!(methods, [Method::POST, Method::PUT, Method::DELETE]);
    assert_eq!(params_of(&calls[1])["listenKey"], "abc");
    assert_eq!(params_of(&calls[2])["listenKey"], "abc");
    assert_eq!(calls[0].headers.get(API_KEY_HEADER).map(String::as_str), Some("key"));
}
