//! 관심 종목 폴러.
//!
//! 심볼마다 하나의 조회 루프를 띄우고, 결과를 심볼별 레코드로 합쳐 구독자에게 발행합니다.
//!
//! # 스케줄
//!
//! ```text
//! set_symbols([A, B, C])
//!   A: 0s ──fetch──┬── 4분 ──fetch── 4분 ── ...   (정규장)
//!   B: 2s ──fetch──┤
//!   C: 4s ──fetch──┘                              (장 마감: 한 번만)
//!
//! 시장 상태 확인: 장중 60초 / 마감 중 30분
//!   개장 → 마감: 모든 루프 취소 후 마감 모드로 재구성 (심볼별 1회)
//!   마감 → 개장: 모든 루프를 다시 순차 시작
//! ```
//!
//! - 심볼 목록이 바뀔 때만 `Loading`으로 돌아갑니다 (시장 전환은 제외)
//! - 통계는 세션에서 처음 조회할 때와 강제 새로고침 때만 요청
//! - 한 심볼의 실패는 그 심볼 레코드에만 기록되고 다른 심볼에 영향 없음
//! - `Poller`를 drop하면 모든 작업이 취소됩니다

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use terminal_core::{MarketClock, PollerConfig, Quote, Statistics, Symbol};

use crate::cache::{CacheLayer, Cached, DataKind};
use crate::clock::SharedClock;
use crate::error::{DataError, Result};
use crate::provider::MarketDataProvider;
use crate::rate_limit::RateLimitGuard;

/// 심볼별로 합쳐진 레코드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub symbol: Symbol,
    /// 최근 시세
    pub quote: Option<Quote>,
    /// 마지막으로 받은 통계 (다시 조회하지 않으면 유지)
    pub statistics: Option<Statistics>,
    /// 실제 시장 데이터 여부
    pub is_real_data: bool,
    /// 제공자 이름
    pub data_source: String,
    /// 캐시에서 제공됨
    pub cached: bool,
    /// TTL이 지난 데이터
    pub stale: bool,
    /// 갱신 불가 상태의 데이터
    pub offline: bool,
    pub has_error: bool,
    pub error_message: Option<String>,
    /// 한도 소진으로 이전 데이터를 유지 중
    pub using_cached_data: bool,
    pub rate_limit_message: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StockRecord {
    fn empty(symbol: Symbol, provider: &dyn MarketDataProvider) -> Self {
        Self {
            symbol,
            quote: None,
            statistics: None,
            is_real_data: provider.is_real_data(),
            data_source: provider.name().to_string(),
            cached: false,
            stale: false,
            offline: false,
            has_error: false,
            error_message: None,
            using_cached_data: false,
            rate_limit_message: None,
            last_updated: None,
        }
    }

    /// 표시할 데이터가 있는지 확인합니다.
    pub fn has_data(&self) -> bool {
        self.quote.is_some()
    }

    fn keep_with_rate_limit(&mut self, message: String) {
        self.using_cached_data = true;
        self.offline = true;
        self.has_error = false;
        self.error_message = None;
        self.rate_limit_message = Some(message);
    }
}

/// 폴러 단계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    /// 구독 심볼 없음
    #[default]
    Idle,
    /// 새 심볼 목록의 첫 조회 진행 중
    Loading,
    /// 모든 심볼이 한 번 이상 조회됨
    Settled,
}

/// 구독자에게 발행하는 상태.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollerSnapshot {
    /// 심볼 목록 순서의 레코드
    pub stock_data: Vec<StockRecord>,
    pub is_loading: bool,
    pub phase: PollerPhase,
    pub last_updated: Option<DateTime<Utc>>,
    /// 모든 심볼이 실패했을 때만 설정
    pub error: Option<String>,
    pub is_market_open: bool,
}

impl PollerSnapshot {
    /// 심볼 레코드 조회.
    pub fn record(&self, symbol: &Symbol) -> Option<&StockRecord> {
        self.stock_data.iter().find(|r| &r.symbol == symbol)
    }
}

struct Subscription {
    token: CancellationToken,
    handle: JoinHandle<()>,
    recurring: bool,
}

#[derive(Default)]
struct PollerState {
    symbols: Vec<Symbol>,
    subscriptions: HashMap<Symbol, Subscription>,
    records: HashMap<Symbol, StockRecord>,
    fundamentals_seen: HashSet<Symbol>,
    pending_initial: HashSet<Symbol>,
    phase: PollerPhase,
    market_open: bool,
    last_updated: Option<DateTime<Utc>>,
    market_task: Option<JoinHandle<()>>,
}

struct PollerInner {
    cache: CacheLayer,
    provider: Arc<dyn MarketDataProvider>,
    guard: Arc<RateLimitGuard>,
    clock: SharedClock,
    market: MarketClock,
    config: PollerConfig,
    state: Mutex<PollerState>,
    snapshot_tx: watch::Sender<PollerSnapshot>,
    shutdown: CancellationToken,
}

/// 관심 종목 폴러 핸들.
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl Poller {
    /// 폴러를 시작합니다. 시장 상태 확인 타이머가 바로 동작합니다.
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn start(
        cache: CacheLayer,
        provider: Arc<dyn MarketDataProvider>,
        guard: Arc<RateLimitGuard>,
        clock: SharedClock,
        market: MarketClock,
        config: PollerConfig,
    ) -> Self {
        let market_open = market.is_open(clock.now());
        let (snapshot_tx, _) = watch::channel(PollerSnapshot {
            is_market_open: market_open,
            ..PollerSnapshot::default()
        });

        let inner = Arc::new(PollerInner {
            cache,
            provider,
            guard,
            clock,
            market,
            config,
            state: Mutex::new(PollerState {
                market_open,
                ..PollerState::default()
            }),
            snapshot_tx,
            shutdown: CancellationToken::new(),
        });

        let handle = tokio::spawn(PollerInner::run_market_check(inner.clone()));
        inner.state().market_task = Some(handle);

        info!(market_open, "폴러 시작");
        Self { inner }
    }

    /// 구독 심볼 목록 설정. 같은 목록이면 아무것도 하지 않습니다.
    pub fn set_symbols(&self, symbols: Vec<Symbol>) {
        self.inner.set_symbols(symbols);
    }

    /// 현재 구독 심볼.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.inner.state().symbols.clone()
    }

    /// 현재 상태.
    pub fn snapshot(&self) -> PollerSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// 상태 변경 구독.
    pub fn subscribe(&self) -> watch::Receiver<PollerSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// 반복 조회 중인 심볼 (목록 순서).
    pub fn recurring_symbols(&self) -> Vec<Symbol> {
        let state = self.inner.state();
        state
            .symbols
            .iter()
            .filter(|s| {
                state
                    .subscriptions
                    .get(*s)
                    .is_some_and(|sub| sub.recurring && !sub.handle.is_finished())
            })
            .cloned()
            .collect()
    }

    /// 한 심볼 즉시 조회 (캐시 우선). 구독 중이 아니면 `false`.
    pub async fn refresh_symbol(&self, symbol: &Symbol) -> bool {
        self.inner.refresh(symbol, false).await
    }

    /// 한 심볼 강제 조회 (캐시 무시, 통계 포함).
    pub async fn force_refresh_symbol(&self, symbol: &Symbol) -> bool {
        self.inner.refresh(symbol, true).await
    }

    /// 모든 심볼 순차 조회 (심볼 간격 적용).
    pub async fn refresh_all(&self) {
        self.inner.refresh_all(false).await;
    }

    /// 모든 심볼 순차 강제 조회.
    pub async fn force_refresh_all(&self) {
        self.inner.refresh_all(true).await;
    }

    /// 모든 작업 중지.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl PollerInner {
    fn state(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_symbols(self: &Arc<Self>, symbols: Vec<Symbol>) {
        let mut unique = HashSet::new();
        let symbols: Vec<Symbol> = symbols.into_iter().filter(|s| unique.insert(s.clone())).collect();

        {
            let mut state = self.state();
            if state.symbols == symbols {
                debug!("같은 심볼 목록 - 유지");
                return;
            }

            state.records.retain(|symbol, _| unique.contains(symbol));
            state.pending_initial = unique;
            state.phase = if symbols.is_empty() {
                PollerPhase::Idle
            } else {
                PollerPhase::Loading
            };
            state.symbols = symbols;
            info!(symbols = state.symbols.len(), "구독 심볼 변경");
            self.rebuild(&mut state);
        }
        self.publish();
    }

    /// 모든 루프를 취소하고 현재 시장 모드로 다시 띄웁니다.
    fn rebuild(self: &Arc<Self>, state: &mut PollerState) {
        for (_, sub) in state.subscriptions.drain() {
            sub.token.cancel();
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        let recurring = state.market_open;
        let stagger = self.config.stagger();
        for (index, symbol) in state.symbols.iter().enumerate() {
            let token = self.shutdown.child_token();
            let delay = stagger * index as u32;
            let handle = tokio::spawn(Self::run_symbol(
                self.clone(),
                symbol.clone(),
                delay,
                recurring,
                token.clone(),
            ));
            state.subscriptions.insert(
                symbol.clone(),
                Subscription {
                    token,
                    handle,
                    recurring,
                },
            );
        }
        debug!(
            subscriptions = state.subscriptions.len(),
            recurring, "조회 루프 구성"
        );
    }

    async fn run_symbol(
        self: Arc<Self>,
        symbol: Symbol,
        delay: std::time::Duration,
        recurring: bool,
        token: CancellationToken,
    ) {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        self.fetch_symbol(&symbol, &token, false).await;

        if !recurring {
            return;
        }

        let period = self.config.interval_open();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(symbol = %symbol, "조회 루프 종료");
                    return;
                }
                _ = ticker.tick() => {
                    self.fetch_symbol(&symbol, &token, false).await;
                }
            }
        }
    }

    async fn run_market_check(self: Arc<Self>) {
        loop {
            let open = self.state().market_open;
            let wait = self.config.market_check_interval(open);

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let now_open = self.market.is_open(self.clock.now());
            let changed = {
                let mut state = self.state();
                if state.market_open == now_open {
                    false
                } else {
                    state.market_open = now_open;
                    info!(
                        market_open = now_open,
                        symbols = state.symbols.len(),
                        "시장 상태 변경 - 조회 루프 재구성"
                    );
                    self.rebuild(&mut state);
                    true
                }
            };
            if changed {
                self.publish();
            }
        }
    }

    async fn refresh(self: &Arc<Self>, symbol: &Symbol, force: bool) -> bool {
        let token = match self.state().subscriptions.get(symbol) {
            Some(sub) => sub.token.clone(),
            None => return false,
        };
        self.fetch_symbol(symbol, &token, force).await;
        true
    }

    async fn refresh_all(self: &Arc<Self>, force: bool) {
        let symbols = self.state().symbols.clone();
        let stagger = self.config.stagger();

        for (index, symbol) in symbols.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(stagger) => {}
                }
            }
            self.refresh(symbol, force).await;
        }
    }

    /// 한 심볼 조회 후 레코드 병합/발행.
    #[instrument(skip(self, token), fields(symbol = %symbol))]
    async fn fetch_symbol(&self, symbol: &Symbol, token: &CancellationToken, force: bool) {
        if token.is_cancelled() {
            return;
        }

        let has_prior = self
            .state()
            .records
            .get(symbol)
            .is_some_and(StockRecord::has_data);
        if has_prior && self.guard.is_exhausted() {
            let message = self.guard.reset_message();
            debug!("API 한도 소진 - 이전 데이터 유지");
            self.update(symbol, token, |record| record.keep_with_rate_limit(message));
            return;
        }

        let quote = self.load_quote(symbol, token, force).await;
        if token.is_cancelled() {
            debug!("구독 해제됨 - 결과 폐기");
            return;
        }

        let stats_due = force || !self.state().fundamentals_seen.contains(symbol);
        let statistics = if stats_due {
            let result = self.load_statistics(symbol, token, force).await;
            if token.is_cancelled() {
                return;
            }
            Some(result)
        } else {
            None
        };

        let now = self.clock.now();
        let reset_message = self.guard.reset_message();
        let exhausted = self.guard.is_exhausted();

        self.update(symbol, token, |record| {
            match quote {
                Ok(cached) => {
                    record.quote = Some(cached.data);
                    record.cached = cached.meta.cached;
                    record.stale = cached.meta.stale;
                    record.offline = cached.meta.offline;
                    record.has_error = false;
                    record.error_message = None;
                    record.using_cached_data = cached.meta.offline && exhausted;
                    record.rate_limit_message = record.using_cached_data.then(|| reset_message.clone());
                    record.last_updated = Some(now);
                }
                Err(e) if e.is_quota_exhausted() => {
                    if record.has_data() {
                        record.keep_with_rate_limit(reset_message.clone());
                    } else {
                        record.has_error = true;
                        record.error_message = Some(e.reset_message().unwrap_or(reset_message.as_str()).to_string());
                        record.rate_limit_message = Some(reset_message.clone());
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "시세 조회 실패");
                    record.has_error = true;
                    record.error_message = Some(e.to_string());
                }
            }

            match statistics {
                Some(Ok(cached)) => record.statistics = Some(cached.data),
                Some(Err(e)) => debug!(symbol = %symbol, error = %e, "통계 조회 실패 - 이전 통계 유지"),
                None => {}
            }
        });
    }

    async fn load_quote(&self, symbol: &Symbol, token: &CancellationToken, force: bool) -> Result<Cached<Quote>> {
        let provider = self.provider.clone();
        let target = symbol.clone();
        let fetch = move || async move { provider.get_quote(&target).await };
        if force {
            self.cache.refresh(symbol, DataKind::Quote, fetch).await
        } else {
            self.cache.cache_first_guarded(symbol, DataKind::Quote, token, fetch).await
        }
    }

    async fn load_statistics(
        &self,
        symbol: &Symbol,
        token: &CancellationToken,
        force: bool,
    ) -> Result<Cached<Statistics>> {
        let provider = self.provider.clone();
        let target = symbol.clone();
        let fetch = move || async move { provider.get_statistics(&target).await };
        let result = if force {
            self.cache.refresh(symbol, DataKind::Statistics, fetch).await
        } else {
            self.cache
                .cache_first_guarded(symbol, DataKind::Statistics, token, fetch)
                .await
        };

        // 한도 소진으로 시도조차 못 했으면 다음 조회에서 다시 요청
        if !matches!(&result, Err(DataError::QuotaExhausted { .. })) && !token.is_cancelled() {
            self.state().fundamentals_seen.insert(symbol.clone());
        }
        result
    }

    /// 구독이 살아 있으면 레코드를 갱신하고 발행합니다.
    fn update(&self, symbol: &Symbol, token: &CancellationToken, apply: impl FnOnce(&mut StockRecord)) {
        {
            let mut state = self.state();
            if token.is_cancelled() || !state.subscriptions.contains_key(symbol) {
                return;
            }

            let provider = self.provider.as_ref();
            let record = state
                .records
                .entry(symbol.clone())
                .or_insert_with(|| StockRecord::empty(symbol.clone(), provider));
            apply(record);

            state.last_updated = Some(self.clock.now());
            if state.pending_initial.remove(symbol)
                && state.pending_initial.is_empty()
                && state.phase == PollerPhase::Loading
            {
                state.phase = PollerPhase::Settled;
                info!(symbols = state.symbols.len(), "첫 조회 완료");
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = {
            let state = self.state();
            let stock_data: Vec<StockRecord> = state
                .symbols
                .iter()
                .filter_map(|s| state.records.get(s).cloned())
                .collect();

            let all_failed = !stock_data.is_empty()
                && stock_data.len() == state.symbols.len()
                && stock_data.iter().all(|r| r.has_error);
            let error = if all_failed {
                stock_data.iter().find_map(|r| r.error_message.clone())
            } else {
                None
            };

            PollerSnapshot {
                stock_data,
                is_loading: state.phase == PollerPhase::Loading,
                phase: state.phase,
                last_updated: state.last_updated,
                error,
                is_market_open: state.market_open,
            }
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let mut state = self.state();
        for (_, sub) in state.subscriptions.drain() {
            sub.token.cancel();
            sub.handle.abort();
        }
        if let Some(handle) = state.market_task.take() {
            handle.abort();
        }
        info!("폴러 중지");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::provider::{CallKind, ScriptedFailure, SimulatedProvider};
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use std::time::Duration;
    use terminal_core::CacheConfig;

    fn et(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(y, m, d, hh, mm, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Fixture {
        poller: Poller,
        provider: SimulatedProvider,
        guard: Arc<RateLimitGuard>,
        cache: CacheLayer,
    }

    fn fixture(start: DateTime<Utc>) -> Fixture {
        let clock: SharedClock = Arc::new(TokioClock::starting_at(start));
        let guard = Arc::new(RateLimitGuard::new(clock.clone(), New_York));
        let cache = CacheLayer::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            MarketClock::default(),
            guard.clone(),
            &CacheConfig::default(),
        );
        let provider = SimulatedProvider::new(clock.clone()).with_guard(guard.clone());
        let poller = Poller::start(
            cache.clone(),
            Arc::new(provider.clone()),
            guard.clone(),
            clock,
            MarketClock::default(),
            PollerConfig::default(),
        );
        Fixture {
            poller,
            provider,
            guard,
            cache,
        }
    }

    fn symbols(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|s| Symbol::new(s).unwrap()).collect()
    }

    // 토요일 (장 마감)
    fn saturday() -> DateTime<Utc> {
        et(2024, 3, 16, 10, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_transitions() {
        let f = fixture(saturday());
        assert_eq!(f.poller.snapshot().phase, PollerPhase::Idle);

        f.poller.set_symbols(symbols(&["AAPL", "MSFT"]));
        assert!(f.poller.snapshot().is_loading);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = f.poller.snapshot();
        assert_eq!(snapshot.phase, PollerPhase::Settled);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.stock_data.len(), 2);
        assert!(snapshot.stock_data.iter().all(|r| r.has_data() && r.statistics.is_some()));
        assert!(!snapshot.is_market_open);

        // 같은 목록 재설정은 무시
        let calls = f.provider.call_count();
        f.poller.set_symbols(symbols(&["AAPL", "MSFT"]));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.poller.snapshot().phase, PollerPhase::Settled);
        assert_eq!(f.provider.call_count(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_market_fetches_once() {
        let f = fixture(saturday());
        f.poller.set_symbols(symbols(&["AAPL"]));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(f.poller.recurring_symbols().is_empty());

        let calls = f.provider.call_count();
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        assert_eq!(f.provider.call_count(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_market_polls_every_interval() {
        let f = fixture(et(2024, 3, 12, 11, 0));
        let aapl = Symbol::new("AAPL").unwrap();
        f.poller.set_symbols(vec![aapl.clone()]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.poller.recurring_symbols(), vec![aapl.clone()]);
        assert_eq!(f.provider.calls_for(CallKind::Quote, &aapl).len(), 1);

        // 4분 뒤: 시세가 stale → 백그라운드 갱신
        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(f.provider.calls_for(CallKind::Quote, &aapl).len(), 2);
        // 통계는 첫 조회 때만
        assert_eq!(f.provider.calls_for(CallKind::Statistics, &aapl).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_isolated_to_symbol() {
        let f = fixture(saturday());
        f.provider.fail(
            Some(CallKind::Quote),
            Some(Symbol::new("MSFT").unwrap()),
            ScriptedFailure::Fetch("upstream 502".into()),
        );
        f.poller.set_symbols(symbols(&["AAPL", "MSFT", "NVDA"]));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snapshot = f.poller.snapshot();
        let msft = snapshot.record(&Symbol::new("MSFT").unwrap()).unwrap();
        assert!(msft.has_error);
        assert!(msft.error_message.as_deref().unwrap().contains("upstream 502"));
        assert!(!snapshot.record(&Symbol::new("AAPL").unwrap()).unwrap().has_error);
        assert!(!snapshot.record(&Symbol::new("NVDA").unwrap()).unwrap().has_error);
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.phase, PollerPhase::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failed_sets_snapshot_error() {
        let f = fixture(saturday());
        f.provider.fail(Some(CallKind::Quote), None, ScriptedFailure::Fetch("down".into()));
        f.poller.set_symbols(symbols(&["AAPL", "MSFT"]));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.poller.snapshot().error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_statistics_failure_keeps_quote() {
        let f = fixture(saturday());
        let aapl = Symbol::new("AAPL").unwrap();
        f.provider.fail(Some(CallKind::Statistics), None, ScriptedFailure::Fetch("timeout".into()));
        f.poller.set_symbols(vec![aapl.clone()]);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = f.poller.snapshot();
        let record = snapshot.record(&aapl).unwrap();
        assert!(record.has_data());
        assert!(record.statistics.is_none());
        assert!(!record.has_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_keeps_prior_data() {
        let f = fixture(saturday());
        let aapl = Symbol::new("AAPL").unwrap();
        f.poller.set_symbols(vec![aapl.clone()]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let calls = f.provider.call_count();

        f.guard.mark_exhausted();
        assert!(f.poller.force_refresh_symbol(&aapl).await);

        let snapshot = f.poller.snapshot();
        let record = snapshot.record(&aapl).unwrap();
        assert!(record.has_data());
        assert!(record.using_cached_data);
        assert!(record.rate_limit_message.is_some());
        assert!(!record.has_error);
        assert_eq!(f.provider.call_count(), calls);

        // 데이터가 없는 새 심볼은 오류 + 안내 문구
        f.poller.set_symbols(symbols(&["AAPL", "MSFT"]));
        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = f.poller.snapshot();
        let msft = snapshot.record(&Symbol::new("MSFT").unwrap()).unwrap();
        assert!(msft.has_error);
        assert!(msft.rate_limit_message.is_some());
        assert!(snapshot.record(&aapl).unwrap().using_cached_data);
        assert_eq!(f.provider.call_count(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_phrase_in_fetch_error_degrades_to_cached_data() {
        let f = fixture(saturday());
        let aapl = Symbol::new("AAPL").unwrap();
        f.poller.set_symbols(vec![aapl.clone()]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.poller.snapshot().record(&aapl).unwrap().has_data());

        // 캐시 없이 한도 문구가 담긴 일반 실패
        f.cache.clear().await;
        f.provider.fail(
            Some(CallKind::Quote),
            None,
            ScriptedFailure::Fetch("Too many requests".into()),
        );
        assert!(f.poller.force_refresh_symbol(&aapl).await);

        assert!(f.guard.is_exhausted());
        let snapshot = f.poller.snapshot();
        let record = snapshot.record(&aapl).unwrap();
        assert!(record.has_data());
        assert!(!record.has_error);
        assert!(record.using_cached_data);
        assert!(record.rate_limit_message.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_refetches_statistics() {
        let f = fixture(saturday());
        let aapl = Symbol::new("AAPL").unwrap();
        f.poller.set_symbols(vec![aapl.clone()]);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(f.poller.refresh_symbol(&aapl).await);
        assert_eq!(f.provider.calls_for(CallKind::Statistics, &aapl).len(), 1);
        assert_eq!(f.provider.calls_for(CallKind::Quote, &aapl).len(), 1);

        assert!(f.poller.force_refresh_symbol(&aapl).await);
        assert_eq!(f.provider.calls_for(CallKind::Statistics, &aapl).len(), 2);
        assert_eq!(f.provider.calls_for(CallKind::Quote, &aapl).len(), 2);

        assert!(!f.poller.refresh_symbol(&Symbol::new("ZZZ").unwrap()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_tasks() {
        let f = fixture(et(2024, 3, 12, 11, 0));
        f.poller.set_symbols(symbols(&["AAPL", "MSFT"]));
        tokio::time::sleep(Duration::from_secs(5)).await;
        let calls = f.provider.call_count();

        drop(f.poller);
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(f.provider.call_count(), calls);
    }
}
