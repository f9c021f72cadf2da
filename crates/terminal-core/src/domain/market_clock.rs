//! 거래소 시장 시간 계산.
//!
//! 고정된 주간 스케줄과 거래소 시간대만으로 시장 상태를 판단하는 순수 함수 모음입니다.
//! 폴링 주기와 캐시 TTL 선택이 모두 이 모듈 하나의 판단을 따릅니다.
//!
//! 미국 시장 기본값 (America/New_York):
//! - 프리마켓: 04:00-09:30
//! - 정규장: 09:30-16:00 (월-금)
//! - 애프터아워: 16:00-20:00
//!
//! 공휴일은 고려하지 않습니다.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::MarketConfig;
use crate::error::CoreError;

/// 시장 세션 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    /// 정규장
    Open,
    /// 프리마켓
    PreMarket,
    /// 애프터아워
    AfterHours,
    /// 장 마감 (주말 포함)
    Closed,
}

impl MarketStatus {
    /// 정규장 여부.
    pub fn is_open(&self) -> bool {
        matches!(self, MarketStatus::Open)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "OPEN"),
            MarketStatus::PreMarket => write!(f, "PRE_MARKET"),
            MarketStatus::AfterHours => write!(f, "AFTER_HOURS"),
            MarketStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// 거래소 세션 경계 (현지 시각).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHours {
    /// 프리마켓 시작
    pub pre_market_open: NaiveTime,
    /// 정규장 시작
    pub regular_open: NaiveTime,
    /// 정규장 종료
    pub regular_close: NaiveTime,
    /// 애프터아워 종료
    pub after_hours_close: NaiveTime,
}

impl MarketHours {
    /// 미국 주식시장(NYSE/NASDAQ) 세션.
    pub fn us_equities() -> Self {
        Self {
            pre_market_open: hm(4, 0),
            regular_open: hm(9, 30),
            regular_close: hm(16, 0),
            after_hours_close: hm(20, 0),
        }
    }
}

impl Default for MarketHours {
    fn default() -> Self {
        Self::us_equities()
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// 거래소 시계.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketClock {
    tz: Tz,
    hours: MarketHours,
}

impl Default for MarketClock {
    fn default() -> Self {
        Self::new(chrono_tz::America::New_York, MarketHours::us_equities())
    }
}

impl MarketClock {
    /// 새 시장 시계를 생성합니다.
    pub fn new(tz: Tz, hours: MarketHours) -> Self {
        Self { tz, hours }
    }

    /// 설정에서 시장 시계를 생성합니다.
    pub fn from_config(config: &MarketConfig) -> Result<Self, CoreError> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| CoreError::Config(format!("알 수 없는 시간대: {}", config.timezone)))?;

        let hours = MarketHours {
            pre_market_open: parse_hm(&config.pre_market_open)?,
            regular_open: parse_hm(&config.regular_open)?,
            regular_close: parse_hm(&config.regular_close)?,
            after_hours_close: parse_hm(&config.after_hours_close)?,
        };

        if !(hours.pre_market_open <= hours.regular_open
            && hours.regular_open < hours.regular_close
            && hours.regular_close <= hours.after_hours_close)
        {
            return Err(CoreError::Config("시장 세션 시각 순서가 잘못되었습니다".to_string()));
        }

        Ok(Self::new(tz, hours))
    }

    /// 거래소 시간대.
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// 세션 경계.
    pub fn hours(&self) -> &MarketHours {
        &self.hours
    }

    /// 정규장 여부.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status(now).is_open()
    }

    /// 현재 시장 상태.
    pub fn status(&self, now: DateTime<Utc>) -> MarketStatus {
        let local = now.with_timezone(&self.tz);
        if is_weekend(local.weekday()) {
            return MarketStatus::Closed;
        }

        let t = local.time();
        let h = &self.hours;
        if t >= h.regular_open && t < h.regular_close {
            MarketStatus::Open
        } else if t >= h.pre_market_open && t < h.regular_open {
            MarketStatus::PreMarket
        } else if t >= h.regular_close && t < h.after_hours_close {
            MarketStatus::AfterHours
        } else {
            MarketStatus::Closed
        }
    }

    /// 다음 정규장 개장 시각. 장중이면 `now`를 그대로 반환합니다.
    pub fn next_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_open(now) {
            return now;
        }

        let local = now.with_timezone(&self.tz);
        let mut date = local.date_naive();

        // 오늘 개장 전이 아니면 다음 날부터 탐색 (토 → +2일, 일 → +1일, 금 마감 후 → +3일)
        if is_weekend(date.weekday()) || local.time() >= self.hours.regular_open {
            date = next_day(date);
        }
        while is_weekend(date.weekday()) {
            date = next_day(date);
        }

        self.localize(date.and_time(self.hours.regular_open))
    }

    /// 다음 개장까지 남은 시간. 장중이면 0.
    pub fn time_until_open(&self, now: DateTime<Utc>) -> Duration {
        (self.next_open(now) - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// 장중일 때 마감까지 남은 시간.
    pub fn time_until_close(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_open(now) {
            return None;
        }
        let local = now.with_timezone(&self.tz);
        let close = self.localize(local.date_naive().and_time(self.hours.regular_close));
        (close - now).to_std().ok()
    }

    /// 현지 시각을 UTC로 변환. DST로 모호하면 이른 시각, 존재하지 않으면 한 시간 뒤를 사용합니다.
    fn localize(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(naive + ChronoDuration::hours(1)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

fn parse_hm(value: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| CoreError::Config(format!("잘못된 시각 형식 (HH:MM): {}", value)))
}
