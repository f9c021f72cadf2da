//! 캐시 계층 (stale-while-revalidate).
//!
//! (심볼 × 종류) 하나당 항목 하나를 저장소에 보관하고, 시장 상태에 따라 TTL을 골라 기록합니다.
//!
//! # 조회 흐름 (`cache_first`)
//!
//! ```text
//! 요청 (symbol, kind, fetch)
//!         │
//!   ┌─────▼─────┐
//!   │ 캐시 조회  │
//!   └─────┬─────┘
//!    fresh│ stale │ 없음/만료
//!         │       │      │
//!         ▼       ▼      ▼
//!      즉시 반환  즉시 반환 + 백그라운드 갱신   fetch 대기
//!                                               성공 → 저장 후 반환
//!                                               실패 → 만료 캐시라도 있으면 offline 반환
//! ```
//!
//! 나이는 기록 당시의 TTL로 판정합니다. 장 마감 중 1시간 TTL로 저장된 시세는
//! 개장 후에도 그 1시간 동안 fresh로 취급됩니다.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use terminal_core::{CacheConfig, MarketClock, Symbol};

use super::policy::{DataKind, Freshness, TtlPolicy};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::rate_limit::RateLimitGuard;
use crate::storage::SharedStore;

/// 저장된 캐시 항목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 심볼
    pub symbol: Symbol,
    /// 데이터 종류
    pub kind: DataKind,
    /// 데이터 (JSON)
    pub payload: Value,
    /// 저장 시각
    pub stored_at: DateTime<Utc>,
    /// 저장 당시 TTL (밀리초)
    pub ttl_ms: u64,
}

impl CacheEntry {
    /// 기록된 TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// 현재 나이. 저장 시각이 미래이면 0.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// 데이터를 원하는 타입으로 역직렬화합니다.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// 응답 출처 메타데이터.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// 캐시에서 제공됨
    pub cached: bool,
    /// TTL을 넘긴 데이터
    pub stale: bool,
    /// 조회 실패 또는 한도 소진으로 갱신할 수 없는 데이터
    pub offline: bool,
    /// 데이터 저장 시각
    pub stored_at: Option<DateTime<Utc>>,
}

/// 메타데이터가 붙은 데이터.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    /// 데이터
    pub data: T,
    /// 출처
    pub meta: CacheMeta,
}

/// 캐시 통계 (진단용).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// 전체 항목 수
    pub entries: usize,
    /// fresh 항목 수
    pub fresh: usize,
    /// stale 항목 수
    pub stale: usize,
    /// 만료(또는 손상) 항목 수
    pub expired: usize,
    /// 추정 사용량 (키 + 값 바이트)
    pub bytes: u64,
}

/// 캐시 계층. 복제본은 같은 저장소와 갱신 상태를 공유합니다.
#[derive(Clone)]
pub struct CacheLayer {
    inner: Arc<Inner>,
}

struct Inner {
    store: SharedStore,
    clock: SharedClock,
    market: MarketClock,
    guard: Arc<RateLimitGuard>,
    policy: TtlPolicy,
    prefix: String,
    eviction_age: Duration,
    /// 백그라운드 갱신 중인 키
    in_flight: Mutex<HashSet<String>>,
}

impl CacheLayer {
    /// 새 캐시 계층을 생성합니다.
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        market: MarketClock,
        guard: Arc<RateLimitGuard>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                market,
                guard,
                policy: TtlPolicy::from_config(config),
                prefix: config.key_prefix.clone(),
                eviction_age: config.eviction_age(),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// TTL 정책.
    pub fn policy(&self) -> &TtlPolicy {
        &self.inner.policy
    }

    /// 저장소 키: `{prefix}{kind}_{SYMBOL}`.
    pub fn key(&self, symbol: &Symbol, kind: DataKind) -> String {
        format!("{}{}_{}", self.inner.prefix, kind.as_str(), symbol)
    }

    /// 항목의 현재 신선도.
    pub fn freshness(&self, entry: &CacheEntry) -> Freshness {
        self.inner
            .policy
            .classify(entry.age(self.inner.clock.now()), entry.ttl())
    }

    /// 캐시 항목 조회. 만료된 항목은 삭제하고 `None`을 반환합니다.
    pub async fn get(&self, symbol: &Symbol, kind: DataKind) -> Option<CacheEntry> {
        let key = self.key(symbol, kind);
        let entry = self.read_entry(&key).await?;

        if self.freshness(&entry) == Freshness::Expired {
            debug!(
                symbol = %symbol,
                kind = %kind,
                age_ms = entry.age(self.inner.clock.now()).as_millis() as u64,
                "만료된 캐시 삭제"
            );
            self.remove_key(&key).await;
            return None;
        }
        Some(entry)
    }

    /// fresh 항목이 있는지 확인합니다.
    pub async fn is_fresh(&self, symbol: &Symbol, kind: DataKind) -> bool {
        match self.get(symbol, kind).await {
            Some(entry) => self.freshness(&entry) == Freshness::Fresh,
            None => false,
        }
    }

    /// 데이터를 저장합니다. 실패해도 호출자에게 오류를 돌려주지 않습니다.
    ///
    /// 저장 공간이 부족하면 오래된 항목을 정리한 뒤 한 번 재시도합니다.
    pub async fn set<T: Serialize + ?Sized>(&self, symbol: &Symbol, kind: DataKind, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(symbol = %symbol, kind = %kind, error = %e, "캐시 직렬화 실패");
                return;
            }
        };

        let now = self.inner.clock.now();
        let ttl = self.inner.policy.ttl(kind, self.inner.market.is_open(now));
        let entry = CacheEntry {
            symbol: symbol.clone(),
            kind,
            payload,
            stored_at: now,
            ttl_ms: ttl.as_millis() as u64,
        };
        self.write_entry(&entry).await;
    }

    /// 캐시 우선 조회.
    #[instrument(skip(self, fetch), fields(symbol = %symbol, kind = %kind))]
    pub async fn cache_first<T, F, Fut>(
        &self,
        symbol: &Symbol,
        kind: DataKind,
        fetch: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.resolve(symbol, kind, None, false, fetch).await
    }

    /// 구독 토큰이 붙은 캐시 우선 조회.
    ///
    /// 백그라운드 갱신이 끝났을 때 `liveness`가 취소되어 있으면 결과를 저장하지 않습니다.
    #[instrument(skip(self, liveness, fetch), fields(symbol = %symbol, kind = %kind))]
    pub async fn cache_first_guarded<T, F, Fut>(
        &self,
        symbol: &Symbol,
        kind: DataKind,
        liveness: &CancellationToken,
        fetch: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.resolve(symbol, kind, Some(liveness.clone()), false, fetch).await
    }

    /// 캐시를 건너뛰고 바로 조회합니다 (강제 새로고침).
    ///
    /// 조회에 실패하면 기존 항목을 offline으로 돌려줍니다.
    #[instrument(skip(self, fetch), fields(symbol = %symbol, kind = %kind))]
    pub async fn refresh<T, F, Fut>(&self, symbol: &Symbol, kind: DataKind, fetch: F) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.resolve(symbol, kind, None, true, fetch).await
    }

    async fn resolve<T, F, Fut>(
        &self,
        symbol: &Symbol,
        kind: DataKind,
        liveness: Option<CancellationToken>,
        force: bool,
        fetch: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = self.key(symbol, kind);
        let now = self.inner.clock.now();
        let mut fallback: Option<CacheEntry> = None;

        if force {
            fallback = self.read_entry(&key).await;
        } else if let Some(entry) = self.read_entry(&key).await {
            let age = entry.age(now);
            match self.inner.policy.classify(age, entry.ttl()) {
                Freshness::Fresh => match entry.decode::<T>() {
                    Ok(data) => {
                        debug!(age_ms = age.as_millis() as u64, "캐시 히트 (fresh)");
                        return Ok(Cached {
                            data,
                            meta: CacheMeta {
                                cached: true,
                                stale: false,
                                offline: false,
                                stored_at: Some(entry.stored_at),
                            },
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "캐시 항목 형식 불일치 - 삭제");
                        self.remove_key(&key).await;
                    }
                },
                Freshness::Stale => match entry.decode::<T>() {
                    Ok(data) => {
                        let revalidating =
                            self.spawn_revalidation(key, symbol.clone(), kind, liveness, fetch);
                        debug!(
                            age_ms = age.as_millis() as u64,
                            revalidating, "캐시 히트 (stale)"
                        );
                        let blocked = kind.uses_quota() && self.inner.guard.is_exhausted();
                        return Ok(Cached {
                            data,
                            meta: CacheMeta {
                                cached: true,
                                stale: true,
                                offline: blocked,
                                stored_at: Some(entry.stored_at),
                            },
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "캐시 항목 형식 불일치 - 삭제");
                        self.remove_key(&key).await;
                    }
                },
                Freshness::Expired => {
                    debug!(age_ms = age.as_millis() as u64, "만료된 캐시 삭제");
                    self.remove_key(&key).await;
                    fallback = Some(entry);
                }
            }
        }

        if kind.uses_quota() && self.inner.guard.is_exhausted() {
            if let Some(cached) = fallback.as_ref().and_then(offline_copy::<T>) {
                info!("API 한도 소진 - 만료된 캐시로 대체");
                return Ok(cached);
            }
            return Err(self.inner.guard.quota_error());
        }

        match fetch().await {
            Ok(data) => {
                self.set(symbol, kind, &data).await;
                Ok(Cached {
                    data,
                    meta: CacheMeta {
                        stored_at: Some(self.inner.clock.now()),
                        ..CacheMeta::default()
                    },
                })
            }
            Err(e) => {
                // 한도 문구가 담긴 실패는 한도 소진으로 취급
                let e = if kind.uses_quota() && self.inner.guard.check_error(&e) {
                    debug!(error = %e, "조회 실패가 한도 소진 신호로 판정됨");
                    self.inner.guard.quota_error()
                } else {
                    e
                };
                if let Some(cached) = fallback.as_ref().and_then(offline_copy::<T>) {
                    warn!(error = %e, "조회 실패 - 오프라인 캐시 반환");
                    return Ok(cached);
                }
                Err(e)
            }
        }
    }

    /// 백그라운드 갱신 시작. 한도 소진 중이거나 같은 키가 이미 갱신 중이면 `false`.
    fn spawn_revalidation<T, F, Fut>(
        &self,
        key: String,
        symbol: Symbol,
        kind: DataKind,
        liveness: Option<CancellationToken>,
        fetch: F,
    ) -> bool
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if kind.uses_quota() && self.inner.guard.is_exhausted() {
            debug!(symbol = %symbol, kind = %kind, "API 한도 소진 - 백그라운드 갱신 생략");
            return false;
        }
        if !self.in_flight().insert(key.clone()) {
            debug!(symbol = %symbol, kind = %kind, "이미 갱신 중");
            return false;
        }

        let layer = self.clone();
        tokio::spawn(async move {
            // fetch가 패닉해도 키는 풀림
            let _in_flight = InFlightGuard {
                layer: layer.clone(),
                key,
            };
            match fetch().await {
                Ok(data) => {
                    if liveness.as_ref().is_some_and(|t| t.is_cancelled()) {
                        debug!(symbol = %symbol, kind = %kind, "구독 해제됨 - 갱신 결과 폐기");
                    } else {
                        layer.set(&symbol, kind, &data).await;
                        debug!(symbol = %symbol, kind = %kind, "백그라운드 갱신 완료");
                    }
                }
                Err(e) => {
                    if kind.uses_quota() {
                        layer.inner.guard.check_error(&e);
                    }
                    warn!(symbol = %symbol, kind = %kind, error = %e, "백그라운드 갱신 실패");
                }
            }
        });
        true
    }

    /// 진행 중인 백그라운드 갱신 수.
    pub fn revalidations_in_flight(&self) -> usize {
        self.in_flight().len()
    }

    /// 캐시 통계.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let keys = match self.inner.store.keys(&self.inner.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "캐시 키 목록 조회 실패");
                return stats;
            }
        };

        for key in keys {
            let Ok(Some(raw)) = self.inner.store.get(&key).await else {
                continue;
            };
            stats.entries += 1;
            stats.bytes += (key.len() + raw.len()) as u64;
            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => match self.freshness(&entry) {
                    Freshness::Fresh => stats.fresh += 1,
                    Freshness::Stale => stats.stale += 1,
                    Freshness::Expired => stats.expired += 1,
                },
                Err(_) => stats.expired += 1,
            }
        }
        stats
    }

    /// 모든 캐시 항목 삭제. 삭제한 항목 수를 반환합니다.
    pub async fn clear(&self) -> usize {
        use futures::future::join_all;

        let keys = self.inner.store.keys(&self.inner.prefix).await.unwrap_or_default();
        let results = join_all(keys.iter().map(|key| self.inner.store.remove(key))).await;
        let removed = results.iter().filter(|r| r.is_ok()).count();
        info!(removed, "캐시 전체 삭제");
        removed
    }

    /// 한 심볼의 모든 종류 삭제.
    pub async fn clear_symbol(&self, symbol: &Symbol) -> usize {
        let mut removed = 0;
        for kind in DataKind::ALL {
            let key = self.key(symbol, kind);
            if matches!(self.inner.store.get(&key).await, Ok(Some(_))) {
                self.remove_key(&key).await;
                removed += 1;
            }
        }
        info!(symbol = %symbol, removed, "심볼 캐시 삭제");
        removed
    }

    /// 저장된 지 `max_age` 이상 지난 항목(또는 손상된 항목)을 삭제합니다.
    pub async fn evict_older_than(&self, max_age: Duration) -> usize {
        let now = self.inner.clock.now();
        let keys = self.inner.store.keys(&self.inner.prefix).await.unwrap_or_default();
        let mut evicted = 0;

        for key in keys {
            let stale = match self.inner.store.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                    Ok(entry) => entry.age(now) >= max_age,
                    Err(_) => true,
                },
                _ => false,
            };
            if stale {
                self.remove_key(&key).await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, max_age_secs = max_age.as_secs(), "오래된 캐시 정리");
        }
        evicted
    }

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        match self.inner.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(key, error = %e, "손상된 캐시 항목 삭제");
                    self.remove_key(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "캐시 읽기 실패");
                None
            }
        }
    }

    async fn write_entry(&self, entry: &CacheEntry) {
        let key = self.key(&entry.symbol, entry.kind);
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "캐시 직렬화 실패");
                return;
            }
        };

        match self.inner.store.set(&key, raw.clone()).await {
            Ok(()) => {
                debug!(symbol = %entry.symbol, kind = %entry.kind, ttl_ms = entry.ttl_ms, "캐시 저장");
            }
            Err(e) if e.is_quota_exceeded() => {
                warn!(key = %key, "저장 공간 부족 - 오래된 캐시 정리 후 재시도");
                let evicted = self.evict_older_than(self.inner.eviction_age).await;
                if let Err(e) = self.inner.store.set(&key, raw).await {
                    warn!(key = %key, evicted, error = %e, "캐시 저장 포기");
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "캐시 저장 실패");
            }
        }
    }

    async fn remove_key(&self, key: &str) {
        if let Err(e) = self.inner.store.remove(key).await {
            warn!(key, error = %e, "캐시 삭제 실패");
        }
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// drop 시 `in_flight`에서 키를 제거합니다.
struct InFlightGuard {
    layer: CacheLayer,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.layer.in_flight().remove(&self.key);
    }
}

fn offline_copy<T: DeserializeOwned>(entry: &CacheEntry) -> Option<Cached<T>> {
    let data = entry.decode::<T>().ok()?;
    Some(Cached {
        data,
        meta: CacheMeta {
            cached: true,
            stale: true,
            offline: true,
            stored_at: Some(entry.stored_at),
        },
    })
}
