//! 설정 → 시장 시계 → 시세 직렬화 통합 테스트

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use std::time::Duration;
use terminal_core::{AppConfig, MarketClock, MarketStatus, Quote, Symbol};

#[test]
fn test_clock_built_from_toml_config() {
    // 런던 시간대 가상 거래소
    let config = AppConfig::from_toml_str(
        r#"
        [market]
        timezone = "Europe/London"
        pre_market_open = "07:00"
        regular_open = "08:00"
        regular_close = "16:30"
        after_hours_close = "17:00"
        "#,
    )
    .unwrap();

    let clock = MarketClock::from_config(&config.market).unwrap();

    // 2024-01-10 수요일 (겨울, UTC == 런던)
    let open = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
    assert_eq!(clock.status(open), MarketStatus::Open);

    let before = Utc.with_ymd_and_hms(2024, 1, 10, 7, 30, 0).unwrap();
    assert_eq!(clock.status(before), MarketStatus::PreMarket);
    assert_eq!(clock.time_until_open(before), Duration::from_secs(30 * 60));
}

#[test]
fn test_default_config_is_new_york() {
    let config = AppConfig::default();
    let clock = MarketClock::from_config(&config.market).unwrap();
    assert_eq!(clock, MarketClock::default());
}

#[test]
fn test_quote_serde_keeps_decimal_precision() {
    let quote = Quote {
        symbol: Symbol::new("rcl").unwrap(),
        name: Some("Royal Caribbean".to_string()),
        price: dec!(123.4567),
        change: dec!(-1.05),
        change_percent: dec!(-0.84),
        open: dec!(124.00),
        high: dec!(125.10),
        low: dec!(122.90),
        previous_close: dec!(124.5067),
        volume: 1_234_567,
        average_volume: None,
        timestamp: Utc.with_ymd_and_hms(2024, 3, 12, 15, 0, 0).unwrap(),
    };

    let json = serde_json::to_value(&quote).unwrap();
    assert_eq!(json["symbol"], "RCL");
    assert!(json.get("average_volume").is_none());

    let back: Quote = serde_json::from_value(json).unwrap();
    assert_eq!(back, quote);
    assert!(!back.is_up());
}
