//! 현재 시각 공급자.
//!
//! 캐시 나이, 한도 초기화, 시장 상태 판단이 모두 이 trait 하나에서 "지금"을 얻습니다.
//! - `SystemClock` - 실제 시스템 시각
//! - `ManualClock` - 테스트에서 직접 설정/전진
//! - `TokioClock` - tokio 시간(일시정지 포함)에 맞춰 흐르는 시각

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 현재 시각 공급자.
pub trait Clock: Send + Sync + fmt::Debug {
    /// 현재 UTC 시각.
    fn now(&self) -> DateTime<Utc>;
}

/// 공유 시계 핸들.
pub type SharedClock = Arc<dyn Clock>;

/// 시스템 시계.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl SystemClock {
    /// 공유 핸들로 생성.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

/// 수동 시계. 복제본끼리 같은 시각을 공유합니다.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// 주어진 시각에서 시작하는 시계.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// 시각을 설정합니다.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// 시각을 전진시킵니다.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// tokio 시간에 고정된 시계.
///
/// `base + (tokio::time::Instant::now() - anchor)`를 반환하므로 `tokio::time::pause()` 상태에서
/// 타이머와 벽시계가 함께 전진합니다.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    /// 현재 tokio 시각을 `base`로 간주하는 시계.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.anchor);
        self.base + ChronoDuration::from_std(elapsed).unwrap_or(ChronoDuration::zero())
    }
}
