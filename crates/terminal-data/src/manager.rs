//! 데이터 매니저 구현.
//!
//! 설정 하나로 저장소, 한도 가드, 캐시, 예열기, 피어 비교, 폴러를 조립합니다.
//! 모든 구성 요소는 같은 시계와 같은 가드를 공유합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use terminal_core::{AppConfig, MarketClock, MarketStatus};

use crate::cache::{CacheLayer, CacheStats, CacheWarmer, PeerSeriesCache};
use crate::clock::{SharedClock, SystemClock};
use crate::error::{DataError, Result};
use crate::peers::PeerComparisonService;
use crate::poller::Poller;
use crate::provider::{
    FinnhubPeersClient, MarketDataProvider, PeersProvider, SimulatedProvider, StaticPeersProvider,
    TwelveDataClient,
};
use crate::rate_limit::{RateLimitGuard, RateLimitSnapshot};
use crate::storage::{open_store, SharedStore};

/// 한도 상태 저장 키.
pub const RATE_LIMIT_KEY: &str = "terminal_rate_limit";

/// 시세 제공자 선택.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderMode {
    /// Twelve Data + Finnhub
    #[default]
    Live,
    /// 네트워크 없는 시뮬레이션
    Simulated,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRateLimit {
    exhausted_until: Option<DateTime<Utc>>,
}

/// 상태 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub provider: String,
    pub is_real_data: bool,
    pub market_status: MarketStatus,
    pub rate_limit: RateLimitSnapshot,
    pub cache: CacheStats,
}

/// 구성 요소를 조립하는 중앙 데이터 매니저.
pub struct DataManager {
    config: AppConfig,
    clock: SharedClock,
    market: MarketClock,
    store: SharedStore,
    guard: Arc<RateLimitGuard>,
    cache: CacheLayer,
    peer_series: PeerSeriesCache,
    provider: Arc<dyn MarketDataProvider>,
    warmer: Arc<CacheWarmer>,
    peers: PeerComparisonService,
}

impl DataManager {
    /// 설정의 저장소와 시스템 시계로 매니저를 생성합니다.
    pub async fn new(config: AppConfig, mode: ProviderMode) -> Result<Self> {
        let store = open_store(&config.storage).await?;
        Self::with_parts(config, mode, store, SystemClock::shared())
    }

    /// 저장소와 시계를 직접 지정하여 생성합니다.
    pub fn with_parts(
        config: AppConfig,
        mode: ProviderMode,
        store: SharedStore,
        clock: SharedClock,
    ) -> Result<Self> {
        info!(?mode, "DataManager 초기화");

        let market = MarketClock::from_config(&config.market)?;
        let guard = Arc::new(RateLimitGuard::from_config(clock.clone(), &config.provider)?);
        let cache = CacheLayer::new(
            store.clone(),
            clock.clone(),
            market.clone(),
            guard.clone(),
            &config.cache,
        );
        let peer_series = PeerSeriesCache::new(store.clone(), clock.clone(), market.clone(), &config.cache);

        let (provider, peers_provider): (Arc<dyn MarketDataProvider>, Arc<dyn PeersProvider>) = match mode {
            ProviderMode::Live => {
                if config.provider.api_key.is_none() {
                    warn!("시세 API 키 없음 - 프록시 URL이 아니면 요청이 거부될 수 있습니다");
                }
                (
                    Arc::new(TwelveDataClient::from_config(&config.provider, guard.clone(), clock.clone())?),
                    Arc::new(FinnhubPeersClient::from_config(&config.peers)?),
                )
            }
            ProviderMode::Simulated => (
                Arc::new(SimulatedProvider::new(clock.clone()).with_guard(guard.clone())),
                Arc::new(StaticPeersProvider::new(config.peers.max_peers)),
            ),
        };

        let warmer = Arc::new(CacheWarmer::new(
            cache.clone(),
            provider.clone(),
            guard.clone(),
            clock.clone(),
            market.clone(),
            &config.warmer,
        ));
        let peers = PeerComparisonService::new(
            cache.clone(),
            peer_series.clone(),
            provider.clone(),
            peers_provider,
            guard.clone(),
            &config.peers,
        );

        Ok(Self {
            config,
            clock,
            market,
            store,
            guard,
            cache,
            peer_series,
            provider,
            warmer,
            peers,
        })
    }

    /// 설정.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 시계.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// 시장 시계.
    pub fn market(&self) -> &MarketClock {
        &self.market
    }

    /// 한도 가드.
    pub fn guard(&self) -> &Arc<RateLimitGuard> {
        &self.guard
    }

    /// 캐시 계층.
    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// 피어 시계열 캐시.
    pub fn peer_series(&self) -> &PeerSeriesCache {
        &self.peer_series
    }

    /// 시세 제공자.
    pub fn provider(&self) -> &Arc<dyn MarketDataProvider> {
        &self.provider
    }

    /// 캐시 예열기.
    pub fn warmer(&self) -> &Arc<CacheWarmer> {
        &self.warmer
    }

    /// 피어 비교 서비스.
    pub fn peers(&self) -> &PeerComparisonService {
        &self.peers
    }

    /// 폴러를 시작합니다.
    pub fn start_poller(&self) -> Poller {
        Poller::start(
            self.cache.clone(),
            self.provider.clone(),
            self.guard.clone(),
            self.clock.clone(),
            self.market.clone(),
            self.config.poller.clone(),
        )
    }

    /// 저장된 한도 상태를 가드에 복원합니다.
    pub async fn restore_rate_limit(&self) -> Result<()> {
        let Some(raw) = self.store.get(RATE_LIMIT_KEY).await? else {
            return Ok(());
        };
        match serde_json::from_str::<PersistedRateLimit>(&raw) {
            Ok(persisted) => {
                self.guard.restore(persisted.exhausted_until);
                debug!(exhausted = self.guard.is_exhausted(), "한도 상태 복원");
            }
            Err(e) => {
                warn!(error = %e, "손상된 한도 상태 삭제");
                self.store.remove(RATE_LIMIT_KEY).await?;
            }
        }
        Ok(())
    }

    /// 가드의 한도 상태를 저장합니다.
    pub async fn persist_rate_limit(&self) -> Result<()> {
        let persisted = PersistedRateLimit {
            exhausted_until: self.guard.exhausted_until(),
        };
        let raw = serde_json::to_string(&persisted)
            .map_err(|e| DataError::Serialization(e.to_string()))?;
        self.store.set(RATE_LIMIT_KEY, raw).await?;
        Ok(())
    }

    /// 상태 요약.
    pub async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            provider: self.provider.name().to_string(),
            is_real_data: self.provider.is_real_data(),
            market_status: self.market.status(self.clock.now()),
            rate_limit: self.guard.snapshot(),
            cache: self.cache.stats().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn manager(store: SharedStore) -> (DataManager, ManualClock) {
        // 화요일 12:00 ET
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 12, 16, 0, 0).unwrap());
        let manager =
            DataManager::with_parts(AppConfig::default(), ProviderMode::Simulated, store, Arc::new(clock.clone()))
                .unwrap();
        (manager, clock)
    }

    #[tokio::test]
    async fn test_rate_limit_persists_across_instances() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (first, _) = manager(store.clone());
        first.guard().mark_exhausted();
        first.persist_rate_limit().await.unwrap();

        let (second, _) = manager(store);
        assert!(!second.guard().is_exhausted());
        second.restore_rate_limit().await.unwrap();
        assert!(second.guard().is_exhausted());
    }

    #[tokio::test]
    async fn test_corrupt_rate_limit_is_discarded() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        store.set(RATE_LIMIT_KEY, "not json".to_string()).await.unwrap();
        let (manager, _) = manager(store.clone());

        manager.restore_rate_limit().await.unwrap();
        assert!(!manager.guard().is_exhausted());
        assert!(store.get(RATE_LIMIT_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_check() {
        let (manager, _) = manager(Arc::new(MemoryStore::new()));
        let health = manager.health_check().await;
        assert_eq!(health.provider, "simulated");
        assert!(!health.is_real_data);
        assert_eq!(health.market_status, MarketStatus::Open);
        assert!(!health.rate_limit.exhausted);
        assert_eq!(health.cache.entries, 0);
    }
}
