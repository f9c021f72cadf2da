//! 시장 데이터 타입 및 구조체.
//!
//! 이 모듈은 시세 제공자가 돌려주는 데이터 타입을 정의합니다:
//! - `Quote` - 실시간(지연) 시세
//! - `Statistics` - 펀더멘털 통계
//! - `Bar` - OHLCV 캔들 데이터

use crate::types::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 금융 정밀도를 위한 가격 타입.
pub type Price = Decimal;

/// 종목 시세.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// 심볼
    pub symbol: Symbol,
    /// 종목명
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 현재가 (최근 종가)
    pub price: Price,
    /// 전일 대비 변동액
    pub change: Decimal,
    /// 전일 대비 변동률 (%)
    pub change_percent: Decimal,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 전일 종가
    pub previous_close: Price,
    /// 거래량
    pub volume: u64,
    /// 평균 거래량
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_volume: Option<u64>,
    /// 시세 기준 시각
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// 상승 여부.
    pub fn is_up(&self) -> bool {
        self.change > Decimal::ZERO
    }

    /// 당일 가격 범위(고가 - 저가).
    pub fn day_range(&self) -> Decimal {
        self.high - self.low
    }
}

/// 펀더멘털 통계.
///
/// 제공자마다 누락되는 필드가 많아 모든 값이 선택적입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// 시가총액
    pub market_cap: Option<Decimal>,
    /// PER (trailing)
    pub pe: Option<Decimal>,
    /// PER (forward)
    pub forward_pe: Option<Decimal>,
    /// EPS (trailing)
    pub eps: Option<Decimal>,
    /// 베타
    pub beta: Option<Decimal>,
    /// 52주 최고가
    pub week_52_high: Option<Price>,
    /// 52주 최저가
    pub week_52_low: Option<Price>,
    /// 배당수익률
    pub dividend_yield: Option<Decimal>,
}

impl Statistics {
    /// 모든 필드가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        *self == Statistics::default()
    }
}

/// OHLCV 캔들 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// 캔들 시작 시간
    pub timestamp: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    pub volume: u64,
}

impl Bar {
    /// 캔들 몸통 크기(절대값)를 반환합니다.
    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// 캔들 범위(고가 - 저가)를 반환합니다.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// 구간 수익률 (%) 계산. 첫 캔들 종가 대비 마지막 캔들 종가.
///
/// 피어 비교 화면에서 종목 간 성과를 맞춰 보는 데 사용합니다.
pub fn period_return_pct(bars: &[Bar]) -> Option<Decimal> {
    let first = bars.first()?;
    let last = bars.last()?;
    if first.close.is_zero() {
        return None;
    }
    Some((last.close - first.close) / first.close * Decimal::from(100))
}
