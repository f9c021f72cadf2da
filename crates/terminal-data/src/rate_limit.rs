//! 제공자 일일 한도(quota) 소진 가드.
//!
//! 무료 플랜 제공자는 한도를 모두 쓰면 다음 자정(제공자 기준 시간대)까지 모든 요청을 거부합니다.
//! 이 가드는 한도 소진 여부를 하나의 공유 상태로 관리하며,
//! 캐시 계층/워머/제공자 클라이언트/폴러가 네트워크 요청 전에 반드시 확인합니다.
//!
//! # 상태 전이
//!
//! ```text
//! 정상 ──[429 / 한도 문구 감지]──> 소진 (exhausted_until = 다음 자정)
//!   ↑                                   │
//!   └────────[자정 경과 후 첫 조회]──────┘
//! ```
//!
//! 가드는 실패하거나 패닉하지 않습니다.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{info, warn};

use terminal_core::ProviderConfig;

use crate::clock::SharedClock;
use crate::error::{DataError, Result};

/// 한도 소진으로 판단하는 메시지 문구 (소문자 비교).
const EXHAUSTION_PHRASES: [&str; 4] = [
    "run out of api credits",
    "rate limit",
    "too many requests",
    "api credits",
];

/// 가드 상태 스냅샷 (진단/CLI 출력용).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    /// 소진 여부
    pub exhausted: bool,
    /// 초기화 시각
    pub exhausted_until: Option<DateTime<Utc>>,
    /// 남은 시간 문자열 (예: "3h 12m")
    pub time_until_reset: Option<String>,
    /// 초기화 기준 시간대
    pub reset_timezone: String,
}

/// 한도 소진 가드.
#[derive(Debug)]
pub struct RateLimitGuard {
    clock: SharedClock,
    reset_tz: Tz,
    exhausted_until: RwLock<Option<DateTime<Utc>>>,
}

impl RateLimitGuard {
    /// 새 가드를 생성합니다.
    pub fn new(clock: SharedClock, reset_tz: Tz) -> Self {
        Self {
            clock,
            reset_tz,
            exhausted_until: RwLock::new(None),
        }
    }

    /// 제공자 설정에서 생성합니다.
    pub fn from_config(clock: SharedClock, config: &ProviderConfig) -> Result<Self> {
        let tz: Tz = config.reset_timezone.parse().map_err(|_| {
            DataError::Config(format!("알 수 없는 시간대: {}", config.reset_timezone))
        })?;
        Ok(Self::new(clock, tz))
    }

    /// 한도가 소진된 상태인지 확인합니다.
    ///
    /// 초기화 시각이 지났으면 상태를 지우고 `false`를 반환합니다.
    pub fn is_exhausted(&self) -> bool {
        let now = self.clock.now();
        let current = *self.read();
        match current {
            None => return false,
            Some(until) if until > now => return true,
            Some(_) => {}
        }

        let mut state = self.write();
        match *state {
            Some(until) if until <= now => {
                *state = None;
                info!(reset_at = %until, "API 한도 초기화됨");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// 한도 소진을 기록합니다. 초기화 시각은 기준 시간대의 다음 자정입니다.
    pub fn mark_exhausted(&self) {
        let now = self.clock.now();
        let until = self.next_midnight(now);
        let mut state = self.write();
        let newly = !matches!(*state, Some(prev) if prev > now);
        *state = Some(until);
        drop(state);

        if newly {
            warn!(
                reset_at = %until,
                remaining = %format_remaining(until - now),
                "API 한도 소진 - 초기화 전까지 캐시 데이터만 사용"
            );
        }
    }

    /// 초기화까지 남은 시간 (예: "3h 12m", "12m", "45s"). 소진 상태가 아니면 `None`.
    pub fn time_until_reset(&self) -> Option<String> {
        if !self.is_exhausted() {
            return None;
        }
        let until = (*self.read())?;
        Some(format_remaining(until - self.clock.now()))
    }

    /// 사용자에게 보여줄 한도 안내 문구.
    pub fn reset_message(&self) -> String {
        match self.time_until_reset() {
            Some(remaining) => format!(
                "API 일일 한도를 모두 사용했습니다. {} 후 초기화됩니다",
                remaining
            ),
            None => "API 일일 한도를 모두 사용했습니다".to_string(),
        }
    }

    /// 현재 안내 문구를 담은 `QuotaExhausted` 오류.
    pub fn quota_error(&self) -> DataError {
        DataError::QuotaExhausted {
            reset_message: self.reset_message(),
        }
    }

    /// 상태 코드 또는 메시지가 한도 소진 신호인지 판별합니다.
    pub fn is_rate_limit_signal(status: Option<u16>, message: &str) -> bool {
        if status == Some(429) {
            return true;
        }
        let lower = message.to_lowercase();
        EXHAUSTION_PHRASES.iter().any(|phrase| lower.contains(phrase))
    }

    /// 응답을 검사하여 한도 소진이면 기록합니다.
    ///
    /// 200 응답 본문에 `{"code":429, "status":"error"}`가 담겨 오는 경우도 감지합니다.
    /// 이번 응답으로 새로 감지했거나 이미 소진 상태이면 `true`.
    pub fn handle_response(&self, status: u16, body: &Value) -> bool {
        let code = body.get("code").and_then(Value::as_u64);
        let message = body.get("message").and_then(Value::as_str).unwrap_or("");
        let is_error_body = body.get("status").and_then(Value::as_str) == Some("error");

        let detected = status == 429
            || code == Some(429)
            || ((is_error_body || status >= 400) && Self::is_rate_limit_signal(None, message));

        if detected {
            self.mark_exhausted();
            return true;
        }
        self.is_exhausted()
    }

    /// 오류 값에 한도 소진 감지를 적용합니다.
    pub fn check_error(&self, error: &DataError) -> bool {
        let detected = match error {
            DataError::QuotaExhausted { .. } => true,
            DataError::Fetch(msg) | DataError::Http(msg) | DataError::Parse(msg) => {
                Self::is_rate_limit_signal(None, msg)
            }
            _ => false,
        };
        if detected {
            self.mark_exhausted();
        }
        detected
    }

    /// 테스트용: 지금부터 `minutes`분 동안 소진 상태로 만듭니다.
    pub fn test_exhaustion(&self, minutes: u32) {
        let until = self.clock.now() + ChronoDuration::minutes(i64::from(minutes));
        *self.write() = Some(until);
        warn!(minutes, reset_at = %until, "테스트용 한도 소진 설정");
    }

    /// 소진 상태를 즉시 해제합니다.
    pub fn reset_exhaustion(&self) {
        *self.write() = None;
        info!("API 한도 상태 수동 초기화");
    }

    /// 초기화 시각 (소진 상태일 때만).
    pub fn exhausted_until(&self) -> Option<DateTime<Utc>> {
        if self.is_exhausted() {
            *self.read()
        } else {
            None
        }
    }

    /// 저장해 둔 초기화 시각을 복원합니다. 이미 지난 시각은 무시합니다.
    pub fn restore(&self, until: Option<DateTime<Utc>>) {
        let now = self.clock.now();
        *self.write() = until.filter(|u| *u > now);
    }

    /// 현재 상태 스냅샷.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let exhausted_until = self.exhausted_until();
        RateLimitSnapshot {
            exhausted: exhausted_until.is_some(),
            exhausted_until,
            time_until_reset: exhausted_until.map(|u| format_remaining(u - self.clock.now())),
            reset_timezone: self.reset_tz.name().to_string(),
        }
    }

    /// 기준 시간대의 다음 자정 (UTC).
    fn next_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.reset_tz);
        local
            .date_naive()
            .succ_opt()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .and_then(|midnight| {
                // 자정이 DST로 존재하지 않는 시간대는 한 시간 뒤로
                self.reset_tz
                    .from_local_datetime(&midnight)
                    .earliest()
                    .or_else(|| {
                        self.reset_tz
                            .from_local_datetime(&(midnight + ChronoDuration::hours(1)))
                            .earliest()
                    })
            })
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now + ChronoDuration::hours(24))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<DateTime<Utc>>> {
        self.exhausted_until.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<DateTime<Utc>>> {
        self.exhausted_until.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// 남은 시간을 "3h 12m" / "12m" / "45s" 형식으로 표시합니다.
pub fn format_remaining(remaining: ChronoDuration) -> String {
    let secs = remaining
        .to_std()
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", secs)
    }
}
