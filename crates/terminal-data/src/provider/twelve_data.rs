//! Twelve Data 호환 REST 클라이언트.
//!
//! 기본 URL을 프록시 주소로 바꾸면 API 키 없이도 사용할 수 있습니다.
//!
//! # 엔드포인트
//!
//! - `GET {base}/quote?symbol=&apikey=`
//! - `GET {base}/statistics?symbol=&apikey=`
//! - `GET {base}/time_series?symbol=&interval=&outputsize=&apikey=`
//!
//! 오류는 HTTP 200 본문에 `{"code":429,"message":"...","status":"error"}` 형태로도 옵니다.
//! 모든 응답은 한도 가드를 거치며, 가드가 소진 상태이면 네트워크 요청 없이
//! `DataError::QuotaExhausted`를 반환합니다.
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! let guard = Arc::new(RateLimitGuard::from_config(clock.clone(), &config.provider)?);
//! let client = TwelveDataClient::from_config(&config.provider, guard, clock)?;
//! let quote = client.get_quote(&Symbol::new("AAPL")?).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use terminal_core::{ApiKey, Bar, Interval, ProviderConfig, Quote, Statistics, Symbol};

use super::{decimal_from, u64_from, MarketDataProvider};
use crate::clock::SharedClock;
use crate::error::{DataError, Result};
use crate::rate_limit::RateLimitGuard;

/// Twelve Data 클라이언트.
#[derive(Clone)]
pub struct TwelveDataClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<ApiKey>,
    guard: Arc<RateLimitGuard>,
    clock: SharedClock,
}

impl TwelveDataClient {
    /// 설정에서 클라이언트를 생성합니다.
    pub fn from_config(
        config: &ProviderConfig,
        guard: Arc<RateLimitGuard>,
        clock: SharedClock,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DataError::Config(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            guard,
            clock,
        })
    }

    /// 요청 실행. 성공 본문(JSON)을 반환합니다.
    async fn request(&self, endpoint: &str, symbol: &Symbol, params: &[(&str, String)]) -> Result<Value> {
        if self.guard.is_exhausted() {
            return Err(self.guard.quota_error());
        }

        let url = format!("{}/{}", self.base_url, endpoint);
        let mut query: Vec<(&str, String)> = vec![("symbol", symbol.to_string())];
        query.extend(params.iter().cloned());
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.expose().to_string()));
        }

        debug!(endpoint, symbol = %symbol, "Twelve Data 요청");

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        let is_error = !(200..300).contains(&status)
            || body.get("status").and_then(Value::as_str) == Some("error");
        let exhausted = self.guard.handle_response(status, &body);

        if is_error {
            if exhausted {
                return Err(self.guard.quota_error());
            }
            let code = body
                .get("code")
                .and_then(Value::as_u64)
                .unwrap_or(u64::from(status));
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| truncate(&text, 200));
            return Err(match code {
                400 | 404 => DataError::NoData(format!("{} {}: {}", endpoint, symbol, message)),
                _ => DataError::Fetch(format!("{} {} [{}]: {}", endpoint, symbol, code, message)),
            });
        }

        if body.is_null() {
            return Err(DataError::Parse(format!("{} {}: JSON 아님", endpoint, symbol)));
        }
        Ok(body)
    }

    fn parse_quote(&self, symbol: &Symbol, body: &Value) -> Result<Quote> {
        let price = decimal_from(body.get("close"))
            .ok_or_else(|| DataError::Parse(format!("quote {}: close 없음", symbol)))?;
        let previous_close = decimal_from(body.get("previous_close")).unwrap_or(price);

        let timestamp = body
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| self.clock.now());

        Ok(Quote {
            symbol: symbol.clone(),
            name: body.get("name").and_then(Value::as_str).map(str::to_string),
            price,
            change: decimal_from(body.get("change")).unwrap_or(price - previous_close),
            change_percent: decimal_from(body.get("percent_change")).unwrap_or_default(),
            open: decimal_from(body.get("open")).unwrap_or(price),
            high: decimal_from(body.get("high")).unwrap_or(price),
            low: decimal_from(body.get("low")).unwrap_or(price),
            previous_close,
            volume: u64_from(body.get("volume")).unwrap_or(0),
            average_volume: u64_from(body.get("average_volume")),
            timestamp,
        })
    }
}

fn parse_statistics(body: &Value) -> Statistics {
    let stats = body.get("statistics").unwrap_or(&Value::Null);
    let at = |path: &[&str]| -> Option<&Value> {
        path.iter().try_fold(stats, |node, key| node.get(*key))
    };

    Statistics {
        market_cap: decimal_from(at(&["valuations_metrics", "market_capitalization"])),
        pe: decimal_from(at(&["valuations_metrics", "trailing_pe"])),
        forward_pe: decimal_from(at(&["valuations_metrics", "forward_pe"])),
        eps: decimal_from(at(&["financials", "income_statement", "diluted_eps_ttm"])),
        beta: decimal_from(at(&["stock_price_summary", "beta"])),
        week_52_high: decimal_from(at(&["stock_price_summary", "fifty_two_week_high"])),
        week_52_low: decimal_from(at(&["stock_price_summary", "fifty_two_week_low"])),
        dividend_yield: decimal_from(at(&["dividends_and_splits", "forward_annual_dividend_yield"])),
    }
}

fn parse_time_series(symbol: &Symbol, body: &Value) -> Result<Vec<Bar>> {
    let values = body
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::NoData(format!("time_series {}: values 없음", symbol)))?;

    let tz: Tz = body
        .pointer("/meta/exchange_timezone")
        .and_then(Value::as_str)
        .and_then(|name| name.parse().ok())
        .unwrap_or(chrono_tz::UTC);

    let mut bars = Vec::with_capacity(values.len());
    for row in values {
        let raw_time = row
            .get("datetime")
            .and_then(Value::as_str)
            .ok_or_else(|| DataError::Parse(format!("time_series {}: datetime 없음", symbol)))?;
        let timestamp = parse_datetime(raw_time, tz)
            .ok_or_else(|| DataError::Parse(format!("time_series {}: 잘못된 datetime {}", symbol, raw_time)))?;

        let field = |name: &str| {
            decimal_from(row.get(name))
                .ok_or_else(|| DataError::Parse(format!("time_series {}: {} 없음", symbol, name)))
        };

        bars.push(Bar {
            timestamp,
            open: field("open")?,
            high: field("high")?,
            low: field("low")?,
            close: field("close")?,
            volume: u64_from(row.get("volume")).unwrap_or(0),
        });
    }

    // 응답은 최신순
    bars.sort_by_key(|bar| bar.timestamp);
    Ok(bars)
}

/// `2024-03-12` 또는 `2024-03-12 15:30:00` (거래소 현지 시각).
fn parse_datetime(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
impl MarketDataProvider for TwelveDataClient {
    fn name(&self) -> &str {
        "twelve_data"
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote> {
        let body = self.request("quote", symbol, &[]).await?;
        self.parse_quote(symbol, &body)
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_statistics(&self, symbol: &Symbol) -> Result<Statistics> {
        let body = self.request("statistics", symbol, &[]).await?;
        Ok(parse_statistics(&body))
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_time_series(
        &self,
        symbol: &Symbol,
        interval: Interval,
        outputsize: usize,
    ) -> Result<Vec<Bar>> {
        let params = [
            ("interval", interval.as_api_str().to_string()),
            ("outputsize", outputsize.to_string()),
        ];
        let body = self.request("time_series", symbol, &params).await?;
        parse_time_series(symbol, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_statistics_nested() {
        let body = json!({
            "meta": {"symbol": "AAPL"},
            "statistics": {
                "valuations_metrics": {"market_capitalization": 2.8e12, "trailing_pe": 28.5, "forward_pe": 26.1},
                "financials": {"income_statement": {"diluted_eps_ttm": 6.42}},
                "stock_price_summary": {"fifty_two_week_low": 164.08, "fifty_two_week_high": 199.62, "beta": 1.29},
                "dividends_and_splits": {"forward_annual_dividend_yield": 0.0055}
            }
        });
        let stats = parse_statistics(&body);
        assert_eq!(stats.pe, Some(dec!(28.5)));
        assert_eq!(stats.eps, Some(dec!(6.42)));
        assert_eq!(stats.week_52_high, Some(dec!(199.62)));
        assert_eq!(stats.dividend_yield, Some(dec!(0.0055)));
        assert!(stats.market_cap.is_some());

        assert!(parse_statistics(&json!({})).is_empty());
    }

    #[test]
    fn test_parse_time_series_sorted_oldest_first() {
        let body = json!({
            "meta": {"symbol": "RCL", "exchange_timezone": "America/New_York"},
            "values": [
                {"datetime": "2024-03-12", "open": "120", "high": "122", "low": "119", "close": "121", "volume": "1000"},
                {"datetime": "2024-03-11", "open": "118", "high": "120", "low": "117", "close": "120", "volume": "900"}
            ],
            "status": "ok"
        });
        let symbol = Symbol::new("RCL").unwrap();
        let bars = parse_time_series(&symbol, &body).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[1].close, dec!(121));
        // 뉴욕 자정 = UTC 04:00 (서머타임)
        assert_eq!(bars[1].timestamp, Utc.with_ymd_and_hms(2024, 3, 12, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_datetime_formats() {
        let utc = chrono_tz::UTC;
        assert_eq!(
            parse_datetime("2024-03-12 15:30:00", utc),
            Some(Utc.with_ymd_and_hms(2024, 3, 12, 15, 30, 0).unwrap())
        );
        assert!(parse_datetime("12/03/2024", utc).is_none());
    }
}
