//! 시세 데이터 신선도 계층.
//!
//! 이 crate는 다음을 제공합니다:
//! - 시장 시간에 맞춘 관심 종목 폴러
//! - stale-while-revalidate 캐시와 피어 시계열 캐시
//! - 제공자 일일 한도 소진 가드
//! - 캐시 예열과 피어 비교 데이터 로더
//! - 시세/피어 제공자 클라이언트

pub mod cache;
pub mod clock;
pub mod error;
pub mod manager;
pub mod peers;
pub mod poller;
pub mod provider;
pub mod rate_limit;
pub mod storage;

pub use error::{DataError, Result};
pub use manager::*;

pub use cache::{
    CacheEntry, CacheLayer, CacheMeta, CacheStats, CacheWarmer, Cached, DataKind, Freshness,
    PeerSeriesCache, PeerSeriesEntry, TtlPolicy, WarmEvent, WarmOptions, WarmOutcome, WarmSummary,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use peers::{PeerComparison, PeerComparisonService, PeerSeries};
pub use poller::{Poller, PollerPhase, PollerSnapshot, StockRecord};
pub use provider::{MarketDataProvider, PeersProvider};
pub use rate_limit::{format_remaining, RateLimitGuard, RateLimitSnapshot};
pub use storage::{open_store, FileStore, KeyValueStore, MemoryStore, SharedStore, StorageError};
