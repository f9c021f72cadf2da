//! 피어 비교 데이터 로더.
//!
//! 종목의 피어 목록과 (종목 + 피어) 시계열을 캐시 우선으로 모읍니다.
//!
//! ```text
//! 피어 목록: CacheLayer (peers, 24h) → PeersProvider (실패 시 내장 목록)
//! 시계열:    PeerSeriesCache → MarketDataProvider::get_time_series (요청 간격, 한도 소진 시 중단)
//! ```
//!
//! 불러오지 못한 심볼은 `unavailable`에 모으고 나머지 결과는 그대로 돌려줍니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use terminal_core::{period_return_pct, Bar, Interval, PeersConfig, Symbol};

use crate::cache::{CacheLayer, DataKind, PeerSeriesCache};
use crate::error::Result;
use crate::provider::{MarketDataProvider, PeersProvider};
use crate::rate_limit::RateLimitGuard;

/// 한 심볼의 비교용 시계열.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSeries {
    pub symbol: Symbol,
    pub bars: Vec<Bar>,
    /// 피어 시계열 캐시에서 읽음
    pub from_cache: bool,
    /// 구간 수익률 (%)
    pub return_pct: Option<Decimal>,
}

impl PeerSeries {
    fn new(symbol: Symbol, bars: Vec<Bar>, from_cache: bool) -> Self {
        let return_pct = period_return_pct(&bars);
        Self {
            symbol,
            bars,
            from_cache,
            return_pct,
        }
    }
}

/// 피어 비교 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerComparison {
    /// 기준 종목
    pub symbol: Symbol,
    /// 피어 목록
    pub peers: Vec<Symbol>,
    /// 불러온 시계열 (기준 종목 먼저)
    pub series: Vec<PeerSeries>,
    /// 불러오지 못한 심볼
    pub unavailable: Vec<Symbol>,
    /// 한도 소진으로 조회를 중단했는지
    pub stopped_early: bool,
}

/// 피어 비교 서비스.
pub struct PeerComparisonService {
    cache: CacheLayer,
    peer_series: PeerSeriesCache,
    provider: Arc<dyn MarketDataProvider>,
    peers: Arc<dyn PeersProvider>,
    guard: Arc<RateLimitGuard>,
    stagger: Duration,
}

impl PeerComparisonService {
    /// 새 서비스를 생성합니다.
    pub fn new(
        cache: CacheLayer,
        peer_series: PeerSeriesCache,
        provider: Arc<dyn MarketDataProvider>,
        peers: Arc<dyn PeersProvider>,
        guard: Arc<RateLimitGuard>,
        config: &PeersConfig,
    ) -> Self {
        Self {
            cache,
            peer_series,
            provider,
            peers,
            guard,
            stagger: config.series_stagger(),
        }
    }

    /// 피어 목록 (캐시 우선).
    pub async fn peers_of(&self, symbol: &Symbol) -> Result<Vec<Symbol>> {
        let provider = self.peers.clone();
        let target = symbol.clone();
        let cached = self
            .cache
            .cache_first(symbol, DataKind::Peers, move || async move {
                Ok(provider.get_peers(&target).await)
            })
            .await?;
        Ok(cached.data)
    }

    /// 피어 비교 데이터 로드.
    #[instrument(skip(self), fields(symbol = %symbol))]
    pub async fn load(
        &self,
        symbol: &Symbol,
        interval: Interval,
        outputsize: usize,
    ) -> Result<PeerComparison> {
        let peers = self.peers_of(symbol).await?;

        let mut comparison = PeerComparison {
            symbol: symbol.clone(),
            peers: peers.clone(),
            series: Vec::with_capacity(peers.len() + 1),
            unavailable: Vec::new(),
            stopped_early: false,
        };
        let mut made_request = false;

        for target in std::iter::once(symbol).chain(peers.iter()) {
            if let Some(entry) = self.peer_series.get(target).await {
                if entry.interval == interval {
                    comparison.series.push(PeerSeries::new(target.clone(), entry.bars, true));
                    continue;
                }
                debug!(symbol = %target, cached = ?entry.interval, "간격이 달라 다시 조회");
            }

            if comparison.stopped_early || self.guard.is_exhausted() {
                comparison.stopped_early = true;
                comparison.unavailable.push(target.clone());
                continue;
            }

            if made_request && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            made_request = true;

            match self.provider.get_time_series(target, interval, outputsize).await {
                Ok(bars) => {
                    self.peer_series.set(target, interval, bars.clone()).await;
                    comparison.series.push(PeerSeries::new(target.clone(), bars, false));
                }
                Err(e) => {
                    if e.is_quota_exhausted() || self.guard.check_error(&e) {
                        warn!(symbol = %target, "API 한도 소진 - 피어 시계열 조회 중단");
                        comparison.stopped_early = true;
                    } else {
                        warn!(symbol = %target, error = %e, "피어 시계열 조회 실패");
                    }
                    comparison.unavailable.push(target.clone());
                }
            }
        }

        info!(
            peers = comparison.peers.len(),
            loaded = comparison.series.len(),
            unavailable = comparison.unavailable.len(),
            stopped_early = comparison.stopped_early,
            "피어 비교 데이터 로드"
        );
        Ok(comparison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SharedClock, TokioClock};
    use crate::provider::{CallKind, ScriptedFailure, SimulatedProvider, StaticPeersProvider};
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use terminal_core::{CacheConfig, MarketClock};

    struct Fixture {
        service: PeerComparisonService,
        provider: SimulatedProvider,
        guard: Arc<RateLimitGuard>,
    }

    fn fixture() -> Fixture {
        // 토요일 (장 마감)
        let start = New_York
            .with_ymd_and_hms(2024, 3, 16, 10, 0, 0)
            .single()
            .unwrap()
            .with_timezone(&chrono::Utc);
        let clock: SharedClock = Arc::new(TokioClock::starting_at(start));
        let guard = Arc::new(RateLimitGuard::new(clock.clone(), New_York));
        let store = Arc::new(MemoryStore::new());
        let config = CacheConfig::default();
        let cache = CacheLayer::new(store.clone(), clock.clone(), MarketClock::default(), guard.clone(), &config);
        let peer_series = PeerSeriesCache::new(store, clock.clone(), MarketClock::default(), &config);
        let provider = SimulatedProvider::new(clock).with_guard(guard.clone());

        let service = PeerComparisonService::new(
            cache,
            peer_series,
            Arc::new(provider.clone()),
            Arc::new(StaticPeersProvider::default()),
            guard.clone(),
            &PeersConfig::default(),
        );
        Fixture {
            service,
            provider,
            guard,
        }
    }

    fn rcl() -> Symbol {
        Symbol::new("RCL").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_then_serve_from_cache() {
        let f = fixture();
        let first = f.service.load(&rcl(), Interval::D1, 30).await.unwrap();

        let peers: Vec<&str> = first.peers.iter().map(Symbol::as_str).collect();
        assert_eq!(peers, vec!["CCL", "NCLH", "CUK", "ONON"]);
        assert_eq!(first.series.len(), 5);
        assert_eq!(first.series[0].symbol, rcl());
        assert!(first.series.iter().all(|s| !s.from_cache && s.bars.len() == 30));
        assert!(first.series[0].return_pct.unwrap() > Decimal::ZERO);
        assert_eq!(f.provider.call_count(), 5);

        let second = f.service.load(&rcl(), Interval::D1, 30).await.unwrap();
        assert!(second.series.iter().all(|s| s.from_cache));
        assert_eq!(f.provider.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_staggered() {
        let f = fixture();
        let start = tokio::time::Instant::now();
        f.service.load(&rcl(), Interval::D1, 5).await.unwrap();

        let offsets: Vec<u64> = f
            .provider
            .calls()
            .iter()
            .map(|c| c.at.duration_since(start).as_millis() as u64)
            .collect();
        assert_eq!(offsets, vec![0, 1000, 2000, 3000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_stops_remaining_fetches() {
        let f = fixture();
        f.provider.fail(
            Some(CallKind::TimeSeries),
            Some(Symbol::new("CCL").unwrap()),
            ScriptedFailure::QuotaExhausted,
        );

        let comparison = f.service.load(&rcl(), Interval::D1, 10).await.unwrap();
        assert!(comparison.stopped_early);
        assert!(f.guard.is_exhausted());
        assert_eq!(comparison.series.len(), 1);
        let missing: Vec<&str> = comparison.unavailable.iter().map(Symbol::as_str).collect();
        assert_eq!(missing, vec!["CCL", "NCLH", "CUK", "ONON"]);
        assert_eq!(f.provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_mismatch_refetches() {
        let f = fixture();
        f.service.load(&rcl(), Interval::D1, 5).await.unwrap();
        let weekly = f.service.load(&rcl(), Interval::W1, 5).await.unwrap();
        assert!(weekly.series.iter().all(|s| !s.from_cache));
        assert_eq!(f.provider.call_count(), 10);
    }
}
