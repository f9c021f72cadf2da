//! 캐싱 레이어.
//!
//! - `policy`: 데이터 종류별 TTL과 신선도 판정
//! - `layer`: (심볼 × 종류) 캐시, stale-while-revalidate
//! - `peer_series`: 피어 비교용 시계열 캐시 (별도 접두사)
//! - `warmer`: 관심 종목 예열

pub mod layer;
pub mod peer_series;
pub mod policy;
pub mod warmer;

pub use layer::{CacheEntry, CacheLayer, CacheMeta, CacheStats, Cached};
pub use peer_series::{PeerSeriesCache, PeerSeriesEntry};
pub use policy::{DataKind, Freshness, TtlPolicy};
pub use warmer::{
    CacheWarmer, ProgressCallback, WarmEvent, WarmOptions, WarmOutcome, WarmStep, WarmSummary,
};
