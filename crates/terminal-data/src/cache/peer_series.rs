//! 피어 비교용 시계열 캐시.
//!
//! 메인 캐시와 다른 접두사를 사용합니다.
//! - 정규장 중: 1시간 동안 유효
//! - 장 마감 중: 나이와 관계없이 유효 (일봉은 장중에만 바뀜)
//! - 쓰기마다 24시간 넘은 항목 정리
//! - 저장 공간 부족 시 네임스페이스 전체 삭제 후 한 번 재시도

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use terminal_core::{Bar, CacheConfig, Interval, MarketClock, Symbol};

use crate::clock::SharedClock;
use crate::storage::SharedStore;

/// 피어 시계열 캐시 항목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSeriesEntry {
    /// 심볼
    pub symbol: Symbol,
    /// 캔들 간격
    pub interval: Interval,
    /// 캔들 (오래된 순)
    pub bars: Vec<Bar>,
    /// 저장 시각
    pub stored_at: DateTime<Utc>,
}

impl PeerSeriesEntry {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// 피어 시계열 캐시.
#[derive(Clone)]
pub struct PeerSeriesCache {
    store: SharedStore,
    clock: SharedClock,
    market: MarketClock,
    prefix: String,
    ttl_open: Duration,
    max_age: Duration,
}

impl PeerSeriesCache {
    /// 새 캐시를 생성합니다.
    pub fn new(store: SharedStore, clock: SharedClock, market: MarketClock, config: &CacheConfig) -> Self {
        Self {
            store,
            clock,
            market,
            prefix: config.peer_series_prefix.clone(),
            ttl_open: config.peer_series_ttl_open(),
            max_age: config.peer_series_max_age(),
        }
    }

    fn key(&self, symbol: &Symbol) -> String {
        format!("{}{}", self.prefix, symbol)
    }

    /// 유효한 항목 조회.
    pub async fn get(&self, symbol: &Symbol) -> Option<PeerSeriesEntry> {
        let key = self.key(symbol);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "피어 시계열 캐시 읽기 실패");
                return None;
            }
        };

        let entry: PeerSeriesEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "손상된 피어 시계열 캐시 삭제");
                if let Err(e) = self.store.remove(&key).await {
                    warn!(key = %key, error = %e, "피어 시계열 캐시 삭제 실패");
                }
                return None;
            }
        };

        let now = self.clock.now();
        if self.market.is_open(now) && entry.age(now) >= self.ttl_open {
            debug!(symbol = %symbol, age_secs = entry.age(now).as_secs(), "피어 시계열 캐시 만료 (장중)");
            return None;
        }
        Some(entry)
    }

    /// 캔들 저장. 실패는 로그만 남깁니다.
    pub async fn set(&self, symbol: &Symbol, interval: Interval, bars: Vec<Bar>) {
        self.evict_expired().await;

        let entry = PeerSeriesEntry {
            symbol: symbol.clone(),
            interval,
            bars,
            stored_at: self.clock.now(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "피어 시계열 직렬화 실패");
                return;
            }
        };

        let key = self.key(symbol);
        match self.store.set(&key, raw.clone()).await {
            Ok(()) => debug!(symbol = %symbol, bars = entry.bars.len(), "피어 시계열 저장"),
            Err(e) if e.is_quota_exceeded() => {
                warn!(symbol = %symbol, "저장 공간 부족 - 피어 시계열 캐시 전체 삭제 후 재시도");
                self.clear(None).await;
                if let Err(e) = self.store.set(&key, raw).await {
                    warn!(symbol = %symbol, error = %e, "피어 시계열 저장 포기");
                }
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "피어 시계열 저장 실패"),
        }
    }

    /// 한 심볼 또는 전체 삭제. 삭제한 항목 수를 반환합니다.
    pub async fn clear(&self, symbol: Option<&Symbol>) -> usize {
        let keys = match symbol {
            Some(symbol) => vec![self.key(symbol)],
            None => self.store.keys(&self.prefix).await.unwrap_or_default(),
        };

        let mut removed = 0;
        for key in keys {
            if matches!(self.store.get(&key).await, Ok(Some(_))) && self.store.remove(&key).await.is_ok() {
                removed += 1;
            }
        }
        info!(symbol = ?symbol.map(Symbol::as_str), removed, "피어 시계열 캐시 삭제");
        removed
    }

    /// 24시간(설정값) 넘은 항목 정리.
    async fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let keys = self.store.keys(&self.prefix).await.unwrap_or_default();
        let mut evicted = 0;

        for key in keys {
            let expired = match self.store.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<PeerSeriesEntry>(&raw) {
                    Ok(entry) => entry.age(now) >= self.max_age,
                    Err(_) => true,
                },
                _ => false,
            };
            if expired && self.store.remove(&key).await.is_ok() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, "오래된 피어 시계열 정리");
        }
        evicted
    }
}
