//! 캐시 예열기.
//!
//! 관심 종목의 시세와 통계를 미리 캐시에 채워 둡니다.
//! - 한 번에 하나의 예열만 실행 (`AlreadyRunning`)
//! - fresh 항목은 건너뜀 (`force` 제외)
//! - 네트워크 요청 사이 간격 (기본 8초)
//! - 한도 소진 시 즉시 중단
//! - 개장 시각 예약 예열 (`schedule_market_open_warm`)

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use terminal_core::{MarketClock, Symbol, WarmerConfig};

use super::layer::CacheLayer;
use super::policy::DataKind;
use crate::clock::SharedClock;
use crate::error::DataError;
use crate::provider::MarketDataProvider;
use crate::rate_limit::RateLimitGuard;

/// 예열 대상 종류 (순서대로).
const WARM_KINDS: [DataKind; 2] = [DataKind::Quote, DataKind::Statistics];

/// 단계 처리 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmStep {
    /// 조회 후 저장
    Fetched,
    /// fresh 캐시가 있어 건너뜀
    Skipped,
    /// 조회 실패
    Failed,
    /// 한도 소진으로 중단
    Stopped,
}

/// 진행 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum WarmEvent {
    /// 한 (심볼, 종류) 처리 완료
    Progress {
        symbol: Symbol,
        kind: DataKind,
        step: WarmStep,
        completed: usize,
        total: usize,
    },
    /// 실행 종료
    Finished(WarmSummary),
}

/// 진행 콜백.
pub type ProgressCallback = Arc<dyn Fn(&WarmEvent) + Send + Sync>;

/// 예열 옵션.
#[derive(Clone, Default)]
pub struct WarmOptions {
    /// fresh 항목도 다시 조회
    pub force: bool,
    /// 진행 콜백
    pub on_progress: Option<ProgressCallback>,
}

impl WarmOptions {
    /// 강제 예열.
    pub fn forced() -> Self {
        Self {
            force: true,
            on_progress: None,
        }
    }

    /// 진행 콜백 지정.
    pub fn with_progress(mut self, callback: impl Fn(&WarmEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    fn emit(&self, event: WarmEvent) {
        if let Some(callback) = &self.on_progress {
            callback(&event);
        }
    }
}

impl fmt::Debug for WarmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmOptions")
            .field("force", &self.force)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// 예열 결과 요약.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmSummary {
    /// 대상 심볼 수
    pub symbols: usize,
    /// 조회 후 저장한 항목 수
    pub fetched: usize,
    /// 건너뛴 항목 수
    pub skipped: usize,
    /// 실패한 항목 수
    pub failed: usize,
    /// 한도 소진으로 중단했는지
    pub stopped_early: bool,
    /// 소요 시간
    pub elapsed: Duration,
}

/// 예열 실행 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum WarmOutcome {
    /// 다른 예열이 진행 중
    AlreadyRunning,
    /// 완료 (중단 포함)
    Completed(WarmSummary),
}

impl WarmOutcome {
    /// 완료 요약.
    pub fn summary(&self) -> Option<&WarmSummary> {
        match self {
            WarmOutcome::Completed(summary) => Some(summary),
            WarmOutcome::AlreadyRunning => None,
        }
    }
}

/// 실행 플래그. drop 시 해제됩니다.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 캐시 예열기.
pub struct CacheWarmer {
    cache: CacheLayer,
    provider: Arc<dyn MarketDataProvider>,
    guard: Arc<RateLimitGuard>,
    clock: SharedClock,
    market: MarketClock,
    request_stagger: Duration,
    running: AtomicBool,
    scheduled: Mutex<Option<JoinHandle<()>>>,
}

impl CacheWarmer {
    /// 새 예열기를 생성합니다.
    pub fn new(
        cache: CacheLayer,
        provider: Arc<dyn MarketDataProvider>,
        guard: Arc<RateLimitGuard>,
        clock: SharedClock,
        market: MarketClock,
        config: &WarmerConfig,
    ) -> Self {
        Self {
            cache,
            provider,
            guard,
            clock,
            market,
            request_stagger: config.request_stagger(),
            running: AtomicBool::new(false),
            scheduled: Mutex::new(None),
        }
    }

    /// 예열 진행 중 여부.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 예약된 예열이 대기 중인지 확인합니다.
    pub fn has_scheduled_warm(&self) -> bool {
        self.scheduled_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// 심볼 목록 예열.
    #[instrument(skip(self, symbols, options), fields(symbols = symbols.len(), force = options.force))]
    pub async fn warm(&self, symbols: &[Symbol], options: WarmOptions) -> WarmOutcome {
        let Some(_flag) = RunningFlag::acquire(&self.running) else {
            debug!("예열이 이미 진행 중");
            return WarmOutcome::AlreadyRunning;
        };

        let started = tokio::time::Instant::now();
        let total = symbols.len() * WARM_KINDS.len();
        let mut summary = WarmSummary {
            symbols: symbols.len(),
            ..WarmSummary::default()
        };
        let mut completed = 0;
        let mut made_request = false;

        info!(total, "캐시 예열 시작");

        'symbols: for symbol in symbols {
            for kind in WARM_KINDS {
                let step = self
                    .warm_one(symbol, kind, options.force, &mut made_request)
                    .await;
                completed += 1;

                match step {
                    WarmStep::Fetched => summary.fetched += 1,
                    WarmStep::Skipped => summary.skipped += 1,
                    WarmStep::Failed => summary.failed += 1,
                    WarmStep::Stopped => summary.stopped_early = true,
                }
                options.emit(WarmEvent::Progress {
                    symbol: symbol.clone(),
                    kind,
                    step,
                    completed,
                    total,
                });

                if summary.stopped_early {
                    warn!(symbol = %symbol, completed, total, "API 한도 소진 - 예열 중단");
                    break 'symbols;
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            fetched = summary.fetched,
            skipped = summary.skipped,
            failed = summary.failed,
            stopped_early = summary.stopped_early,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "캐시 예열 완료"
        );
        options.emit(WarmEvent::Finished(summary.clone()));
        WarmOutcome::Completed(summary)
    }

    async fn warm_one(
        &self,
        symbol: &Symbol,
        kind: DataKind,
        force: bool,
        made_request: &mut bool,
    ) -> WarmStep {
        if !force && self.cache.is_fresh(symbol, kind).await {
            debug!(symbol = %symbol, kind = %kind, "fresh 캐시 - 건너뜀");
            return WarmStep::Skipped;
        }
        if self.guard.is_exhausted() {
            return WarmStep::Stopped;
        }

        if *made_request && !self.request_stagger.is_zero() {
            tokio::time::sleep(self.request_stagger).await;
            // 대기 중 다른 작업이 한도를 소진했을 수 있음
            if self.guard.is_exhausted() {
                return WarmStep::Stopped;
            }
        }
        *made_request = true;

        let result = match kind {
            DataKind::Quote => match self.provider.get_quote(symbol).await {
                Ok(quote) => {
                    self.cache.set(symbol, kind, &quote).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            DataKind::Statistics => match self.provider.get_statistics(symbol).await {
                Ok(stats) => {
                    self.cache.set(symbol, kind, &stats).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            DataKind::Peers | DataKind::TimeSeries => return WarmStep::Skipped,
        };

        match result {
            Ok(()) => WarmStep::Fetched,
            Err(e) => self.classify_failure(symbol, kind, &e),
        }
    }

    fn classify_failure(&self, symbol: &Symbol, kind: DataKind, error: &DataError) -> WarmStep {
        if error.is_quota_exhausted() || self.guard.check_error(error) {
            return WarmStep::Stopped;
        }
        warn!(symbol = %symbol, kind = %kind, error = %error, "예열 조회 실패");
        WarmStep::Failed
    }

    /// 개장 시각 예열 예약.
    ///
    /// 장중이면 바로 예열을 시작하고, 아니면 개장까지 기다렸다가 그 시점의 심볼 목록으로 예열합니다.
    /// 이전 예약은 취소됩니다. 예열까지 남은 시간을 반환합니다.
    pub fn schedule_market_open_warm<F>(self: &Arc<Self>, symbols_fn: F, options: WarmOptions) -> Duration
    where
        F: Fn() -> Vec<Symbol> + Send + Sync + 'static,
    {
        let delay = self.market.time_until_open(self.clock.now());
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Some(warmer) = weak.upgrade() else {
                return;
            };
            let symbols = symbols_fn();
            if symbols.is_empty() {
                debug!("예약 예열 대상 없음");
                return;
            }
            warmer.warm(&symbols, options).await;
        });

        if let Some(previous) = self.scheduled_slot().replace(handle) {
            previous.abort();
        }
        info!(delay_secs = delay.as_secs(), "개장 예열 예약");
        delay
    }

    /// 예약된 예열 취소.
    pub fn cancel_scheduled_warm(&self) {
        if let Some(handle) = self.scheduled_slot().take() {
            handle.abort();
            debug!("예약 예열 취소");
        }
    }

    fn scheduled_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scheduled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CacheWarmer {
    fn drop(&mut self) {
        self.cancel_scheduled_warm();
    }
}
