//! 제공자 HTTP 클라이언트 통합 테스트 (mockito).

use chrono::{TimeZone, Utc};
use chrono_tz::America::New_York;
use mockito::{Matcher, Server};
use rust_decimal_macros::dec;
use std::sync::Arc;

use terminal_core::{ApiKey, Interval, PeersConfig, ProviderConfig, Symbol};
use terminal_data::provider::{FinnhubPeersClient, MarketDataProvider, PeersProvider, TwelveDataClient};
use terminal_data::{DataError, ManualClock, RateLimitGuard, SharedClock};

fn client(base_url: String) -> (TwelveDataClient, Arc<RateLimitGuard>) {
    let clock: SharedClock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 12, 16, 0, 0).unwrap()));
    let guard = Arc::new(RateLimitGuard::new(clock.clone(), New_York));
    let config = ProviderConfig {
        base_url,
        api_key: Some(ApiKey::new("demo")),
        ..ProviderConfig::default()
    };
    let client = TwelveDataClient::from_config(&config, guard.clone(), clock).unwrap();
    (client, guard)
}

fn aapl() -> Symbol {
    Symbol::new("AAPL").unwrap()
}

#[tokio::test]
async fn test_quote_with_string_numbers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/quote")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "AAPL".into()),
            Matcher::UrlEncoded("apikey".into(), "demo".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"symbol":"AAPL","name":"Apple Inc","close":"173.20","previous_close":"171.00",
                "change":"2.20","percent_change":"1.28655","open":"171.50","high":"174.00",
                "low":"171.10","volume":"54000000","average_volume":"60000000","timestamp":1710259200}"#,
        )
        .create_async()
        .await;

    let (client, guard) = client(server.url());
    let quote = client.get_quote(&aapl()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(quote.price, dec!(173.20));
    assert_eq!(quote.previous_close, dec!(171.00));
    assert_eq!(quote.volume, 54_000_000);
    assert_eq!(quote.average_volume, Some(60_000_000));
    assert_eq!(quote.name.as_deref(), Some("Apple Inc"));
    assert_eq!(quote.timestamp, Utc.timestamp_opt(1710259200, 0).unwrap());
    assert!(!guard.is_exhausted());
}

#[tokio::test]
async fn test_quota_error_in_200_body_marks_guard_and_blocks_network() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/quote")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"code":429,"message":"You have run out of API credits for the day.","status":"error"}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let (client, guard) = client(server.url());
    let err = client.get_quote(&aapl()).await.unwrap_err();
    assert!(err.is_quota_exhausted());
    assert!(guard.is_exhausted());

    // 두 번째 요청은 네트워크에 나가지 않음
    let err = client.get_statistics(&aapl()).await.unwrap_err();
    assert!(err.is_quota_exhausted());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_http_429_marks_guard() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/time_series")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_body("Too Many Requests")
        .create_async()
        .await;

    let (client, guard) = client(server.url());
    let err = client.get_time_series(&aapl(), Interval::D1, 30).await.unwrap_err();
    assert!(err.is_quota_exhausted());
    assert!(guard.snapshot().exhausted);
}

#[tokio::test]
async fn test_unknown_symbol_is_no_data() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/quote")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"code":404,"message":"**symbol** not found: ZZZZ","status":"error"}"#)
        .create_async()
        .await;

    let (client, guard) = client(server.url());
    let err = client.get_quote(&Symbol::new("ZZZZ").unwrap()).await.unwrap_err();
    assert!(matches!(err, DataError::NoData(_)));
    assert!(!guard.is_exhausted());
}

#[tokio::test]
async fn test_server_error_is_fetch_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/statistics")
        .match_query(Matcher::Any)
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let (client, guard) = client(server.url());
    let err = client.get_statistics(&aapl()).await.unwrap_err();
    assert!(matches!(err, DataError::Fetch(_)));
    assert!(!guard.is_exhausted());
}

#[tokio::test]
async fn test_time_series_request_params() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/time_series")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "RCL".into()),
            Matcher::UrlEncoded("interval".into(), "1day".into()),
            Matcher::UrlEncoded("outputsize".into(), "2".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{"meta":{"symbol":"RCL","exchange_timezone":"America/New_York"},
                "values":[
                  {"datetime":"2024-03-12","open":"120","high":"122","low":"119","close":"121","volume":"1000"},
                  {"datetime":"2024-03-11","open":"118","high":"120","low":"117","close":"120","volume":"900"}
                ],"status":"ok"}"#,
        )
        .create_async()
        .await;

    let (client, _) = client(server.url());
    let bars = client
        .get_time_series(&Symbol::new("RCL").unwrap(), Interval::D1, 2)
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].close, dec!(120));
    assert_eq!(bars[1].close, dec!(121));
}

fn peers_client(base_url: String) -> FinnhubPeersClient {
    FinnhubPeersClient::from_config(&PeersConfig {
        base_url,
        api_key: Some(ApiKey::new("token")),
        ..PeersConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_peers_are_normalized() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stock/peers")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "RCL".into()),
            Matcher::UrlEncoded("token".into(), "token".into()),
        ]))
        .with_status(200)
        .with_body(r#"["RCL","ccl","NCLH","CCL","CUK","LIND","VIK","ONON"]"#)
        .create_async()
        .await;

    let peers = peers_client(server.url()).get_peers(&Symbol::new("RCL").unwrap()).await;
    let peers: Vec<&str> = peers.iter().map(Symbol::as_str).collect();
    assert_eq!(peers, vec!["CCL", "NCLH", "CUK", "LIND", "VIK"]);
}

#[tokio::test]
async fn test_peers_fall_back_on_failure_or_empty() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stock/peers")
        .match_query(Matcher::UrlEncoded("symbol".into(), "RCL".into()))
        .with_status(500)
        .create_async()
        .await;
    server
        .mock("GET", "/stock/peers")
        .match_query(Matcher::UrlEncoded("symbol".into(), "CCL".into()))
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = peers_client(server.url());
    let rcl: Vec<String> = client
        .get_peers(&Symbol::new("RCL").unwrap())
        .await
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(rcl, vec!["CCL", "NCLH", "CUK", "ONON"]);

    let ccl = client.get_peers(&Symbol::new("CCL").unwrap()).await;
    assert_eq!(ccl.len(), 3);
    assert!(!ccl.contains(&Symbol::new("CCL").unwrap()));
}
