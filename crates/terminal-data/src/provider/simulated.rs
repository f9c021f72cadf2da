//! 시뮬레이션 제공자.
//!
//! 네트워크 없이 심볼에서 결정적으로 파생한 시세/통계/시계열을 돌려줍니다.
//! `--simulated` 실행과 테스트에서 사용하며, 호출 기록과 실패 주입을 지원합니다.
//!
//! ```rust,ignore
//! let provider = SimulatedProvider::new(clock.clone()).with_guard(guard.clone());
//! provider.fail(Some(CallKind::Statistics), None, ScriptedFailure::QuotaExhausted);
//! ```

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::debug;

use terminal_core::{Bar, Interval, Quote, Statistics, Symbol};

use super::MarketDataProvider;
use crate::clock::SharedClock;
use crate::error::{DataError, Result};
use crate::rate_limit::RateLimitGuard;

/// 호출 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Quote,
    Statistics,
    TimeSeries,
}

/// 기록된 호출.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// 호출 종류
    pub kind: CallKind,
    /// 심볼
    pub symbol: Symbol,
    /// 호출 시각 (tokio 시간)
    pub at: tokio::time::Instant,
}

/// 주입할 실패.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// 일반 조회 실패
    Fetch(String),
    /// 한도 소진 응답 (429)
    QuotaExhausted,
    /// 데이터 없음
    NoData,
}

#[derive(Debug, Clone)]
struct FailureRule {
    kind: Option<CallKind>,
    symbol: Option<Symbol>,
    failure: ScriptedFailure,
}

impl FailureRule {
    fn matches(&self, kind: CallKind, symbol: &Symbol) -> bool {
        self.kind.map_or(true, |k| k == kind) && self.symbol.as_ref().map_or(true, |s| s == symbol)
    }
}

/// 결정적 시뮬레이션 제공자.
#[derive(Clone)]
pub struct SimulatedProvider {
    clock: SharedClock,
    guard: Option<Arc<RateLimitGuard>>,
    calls: Arc<Mutex<Vec<ProviderCall>>>,
    failures: Arc<Mutex<Vec<FailureRule>>>,
}

impl SimulatedProvider {
    /// 새 제공자를 생성합니다.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            guard: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 한도 가드 연결. 실제 클라이언트처럼 요청 전 확인하고 429를 보고합니다.
    pub fn with_guard(mut self, guard: Arc<RateLimitGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// 실패 규칙 추가. `None`은 모든 종류/심볼에 해당합니다.
    pub fn fail(&self, kind: Option<CallKind>, symbol: Option<Symbol>, failure: ScriptedFailure) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FailureRule { kind, symbol, failure });
    }

    /// 실패 규칙 모두 제거.
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// 기록된 모든 호출.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 전체 호출 수.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 특정 종류/심볼의 호출.
    pub fn calls_for(&self, kind: CallKind, symbol: &Symbol) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.kind == kind && &c.symbol == symbol)
            .cloned()
            .collect()
    }

    async fn begin(&self, kind: CallKind, symbol: &Symbol) -> Result<()> {
        if let Some(guard) = &self.guard {
            if guard.is_exhausted() {
                return Err(guard.quota_error());
            }
        }

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProviderCall {
                kind,
                symbol: symbol.clone(),
                at: tokio::time::Instant::now(),
            });
        debug!(?kind, symbol = %symbol, "시뮬레이션 호출");

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|rule| rule.matches(kind, symbol))
            .map(|rule| rule.failure.clone());

        match failure {
            None => Ok(()),
            Some(ScriptedFailure::Fetch(message)) => Err(DataError::Fetch(message)),
            Some(ScriptedFailure::NoData) => Err(DataError::NoData(format!("{}: 데이터 없음", symbol))),
            Some(ScriptedFailure::QuotaExhausted) => {
                let body = json!({
                    "code": 429,
                    "message": "You have run out of API credits for the day.",
                    "status": "error"
                });
                match &self.guard {
                    Some(guard) => {
                        guard.handle_response(429, &body);
                        Err(guard.quota_error())
                    }
                    None => Err(DataError::QuotaExhausted {
                        reset_message: "You have run out of API credits for the day.".to_string(),
                    }),
                }
            }
        }
    }
}

/// 심볼 바이트에서 만든 기준가 (10.00 ~ 509.99).
fn base_price(symbol: &Symbol) -> Decimal {
    let seed = symbol
        .as_str()
        .bytes()
        .fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    Decimal::new((seed % 50_000) as i64 + 1_000, 2)
}

#[async_trait]
impl MarketDataProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_real_data(&self) -> bool {
        false
    }

    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote> {
        self.begin(CallKind::Quote, symbol).await?;

        let previous_close = base_price(symbol);
        let price = previous_close * Decimal::new(1012, 3);
        let change = price - previous_close;
        Ok(Quote {
            symbol: symbol.clone(),
            name: Some(format!("{} (simulated)", symbol)),
            price,
            change,
            change_percent: change / previous_close * Decimal::from(100),
            open: previous_close,
            high: price * Decimal::new(1005, 3),
            low: previous_close * Decimal::new(995, 3),
            previous_close,
            volume: 1_000_000,
            average_volume: Some(1_200_000),
            timestamp: self.clock.now(),
        })
    }

    async fn get_statistics(&self, symbol: &Symbol) -> Result<Statistics> {
        self.begin(CallKind::Statistics, symbol).await?;

        let price = base_price(symbol);
        Ok(Statistics {
            market_cap: Some(price * Decimal::from(1_000_000_000u64)),
            pe: Some(Decimal::new(215, 1)),
            forward_pe: Some(Decimal::new(190, 1)),
            eps: Some((price / Decimal::new(215, 1)).round_dp(2)),
            beta: Some(Decimal::new(11, 1)),
            week_52_high: Some(price * Decimal::new(125, 2)),
            week_52_low: Some(price * Decimal::new(75, 2)),
            dividend_yield: Some(Decimal::new(12, 3)),
        })
    }

    async fn get_time_series(
        &self,
        symbol: &Symbol,
        interval: Interval,
        outputsize: usize,
    ) -> Result<Vec<Bar>> {
        self.begin(CallKind::TimeSeries, symbol).await?;

        let step = ChronoDuration::from_std(interval.duration()).unwrap_or(ChronoDuration::days(1));
        let now = self.clock.now();
        let base = base_price(symbol);

        let bars = (0..outputsize)
            .map(|i| {
                // 오래된 순, 완만한 상승
                let close = base + Decimal::new(i as i64 * 25, 2);
                Bar {
                    timestamp: now - step * (outputsize - i) as i32,
                    open: close - Decimal::new(10, 2),
                    high: close + Decimal::new(50, 2),
                    low: close - Decimal::new(50, 2),
                    close,
                    volume: 500_000 + i as u64 * 1_000,
                }
            })
            .collect();
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use chrono_tz::America::New_York;

    fn provider() -> SimulatedProvider {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 12, 16, 0, 0).unwrap());
        SimulatedProvider::new(Arc::new(clock))
    }

    #[tokio::test]
    async fn test_deterministic_quotes() {
        let p = provider();
        let aapl = Symbol::new("AAPL").unwrap();
        let a = p.get_quote(&aapl).await.unwrap();
        let b = p.get_quote(&aapl).await.unwrap();
        assert_eq!(a.price, b.price);
        assert!(a.is_up());
        assert_eq!(p.calls_for(CallKind::Quote, &aapl).len(), 2);
        assert!(!p.is_real_data());
    }

    #[tokio::test]
    async fn test_time_series_oldest_first() {
        let p = provider();
        let bars = p.get_time_series(&Symbol::new("RCL").unwrap(), Interval::D1, 10).await.unwrap();
        assert_eq!(bars.len(), 10);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let p = provider();
        let msft = Symbol::new("MSFT").unwrap();
        let aapl = Symbol::new("AAPL").unwrap();
        p.fail(Some(CallKind::Quote), Some(msft.clone()), ScriptedFailure::Fetch("boom".into()));

        assert!(matches!(p.get_quote(&msft).await, Err(DataError::Fetch(_))));
        assert!(p.get_quote(&aapl).await.is_ok());
        assert!(p.get_statistics(&msft).await.is_ok());

        p.clear_failures();
        assert!(p.get_quote(&msft).await.is_ok());
    }

    #[tokio::test]
    async fn test_quota_failure_marks_guard_and_blocks_next_call() {
        let clock: SharedClock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 12, 16, 0, 0).unwrap()));
        let guard = Arc::new(RateLimitGuard::new(clock.clone(), New_York));
        let p = SimulatedProvider::new(clock).with_guard(guard.clone());
        let aapl = Symbol::new("AAPL").unwrap();

        p.fail(None, None, ScriptedFailure::QuotaExhausted);
        let err = p.get_quote(&aapl).await.unwrap_err();
        assert!(err.is_quota_exhausted());
        assert!(guard.is_exhausted());

        // 소진 중에는 호출 자체가 기록되지 않음
        p.clear_failures();
        assert!(p.get_quote(&aapl).await.unwrap_err().is_quota_exhausted());
        assert_eq!(p.call_count(), 1);
    }
}
