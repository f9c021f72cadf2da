//! 데이터 Provider 모듈.
//!
//! ## 시세 제공자 (`MarketDataProvider`)
//! - `TwelveDataClient`: Twelve Data 호환 REST API (시세, 통계, 시계열)
//! - `SimulatedProvider`: 네트워크 없이 결정적인 데이터를 만드는 제공자 (`--simulated`, 테스트)
//!
//! ## 피어 제공자 (`PeersProvider`)
//! - `FinnhubPeersClient`: Finnhub 호환 `/stock/peers`
//! - 응답이 비었거나 실패하면 내장 피어 목록 사용

pub mod finnhub;
pub mod simulated;
pub mod twelve_data;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use terminal_core::{Bar, Interval, Quote, Statistics, Symbol};

use crate::error::Result;

pub use finnhub::{fallback_peers, normalize_peers, FinnhubPeersClient, StaticPeersProvider};
pub use simulated::{CallKind, ProviderCall, ScriptedFailure, SimulatedProvider};
pub use twelve_data::TwelveDataClient;

/// 시세/통계/시계열 제공자.
///
/// 한도가 있는 제공자 구현은 요청 전에 `RateLimitGuard::is_exhausted`를 확인하고,
/// 모든 응답을 `RateLimitGuard::handle_response`에 넘겨야 합니다.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// 제공자 이름 (레코드의 `data_source`).
    fn name(&self) -> &str;

    /// 실제 시장 데이터 여부.
    fn is_real_data(&self) -> bool {
        true
    }

    /// 시세 조회.
    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote>;

    /// 펀더멘털 통계 조회.
    async fn get_statistics(&self, symbol: &Symbol) -> Result<Statistics>;

    /// 시계열 조회 (오래된 순).
    async fn get_time_series(
        &self,
        symbol: &Symbol,
        interval: Interval,
        outputsize: usize,
    ) -> Result<Vec<Bar>>;
}

/// 피어(경쟁사) 목록 제공자. 실패 시 빈 목록을 반환합니다.
#[async_trait]
pub trait PeersProvider: Send + Sync {
    /// 최대 5개(설정값)의 피어 심볼.
    async fn get_peers(&self, symbol: &Symbol) -> Vec<Symbol>;
}

/// JSON 숫자 또는 숫자 문자열을 Decimal로 변환합니다.
///
/// 제공자 응답은 가격을 `"173.20"` 같은 문자열로 주기도 하고 숫자로 주기도 합니다.
pub(crate) fn decimal_from(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        _ => None,
    }
}

/// JSON 숫자 또는 숫자 문자열을 u64로 변환합니다 (소수점 이하 버림).
pub(crate) fn u64_from(value: Option<&Value>) -> Option<u64> {
    use rust_decimal::prelude::ToPrimitive;

    match value? {
        Value::Number(n) if n.is_u64() => n.as_u64(),
        other => decimal_from(Some(other))?.trunc().to_u64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_from_mixed_encodings() {
        assert_eq!(decimal_from(Some(&json!("173.20"))), Some(dec!(173.20)));
        assert_eq!(decimal_from(Some(&json!(1.5))), Some(dec!(1.5)));
        assert_eq!(decimal_from(Some(&json!("2.8E12"))), Some(dec!(2800000000000)));
        assert_eq!(decimal_from(Some(&json!(null))), None);
        assert_eq!(decimal_from(Some(&json!("n/a"))), None);
        assert_eq!(decimal_from(None), None);
    }

    #[test]
    fn test_u64_from() {
        assert_eq!(u64_from(Some(&json!("54000000"))), Some(54_000_000));
        assert_eq!(u64_from(Some(&json!(1200))), Some(1200));
        assert_eq!(u64_from(Some(&json!("12.7"))), Some(12));
        assert_eq!(u64_from(Some(&json!("-1"))), None);
    }
}
