//! 시계열 조회 간격 정의.
//!
//! 시세 제공자의 `time_series` 엔드포인트가 받는 간격 문자열과 매핑됩니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 시계열 캔들 간격.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// 1분봉
    M1,
    /// 5분봉
    M5,
    /// 15분봉
    M15,
    /// 30분봉
    M30,
    /// 1시간봉
    H1,
    /// 4시간봉
    H4,
    /// 일봉
    D1,
    /// 주봉
    W1,
    /// 월봉
    MN1,
}

impl Interval {
    /// 이 간격의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        match self {
            Interval::M1 => Duration::from_secs(60),
            Interval::M5 => Duration::from_secs(5 * 60),
            Interval::M15 => Duration::from_secs(15 * 60),
            Interval::M30 => Duration::from_secs(30 * 60),
            Interval::H1 => Duration::from_secs(60 * 60),
            Interval::H4 => Duration::from_secs(4 * 60 * 60),
            Interval::D1 => Duration::from_secs(24 * 60 * 60),
            Interval::W1 => Duration::from_secs(7 * 24 * 60 * 60),
            Interval::MN1 => Duration::from_secs(30 * 24 * 60 * 60), // 근사값
        }
    }

    /// 분봉/시간봉인지 확인합니다.
    pub fn is_intraday(&self) -> bool {
        !matches!(self, Interval::D1 | Interval::W1 | Interval::MN1)
    }

    /// 제공자 API 간격 문자열로 변환합니다.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1min",
            Interval::M5 => "5min",
            Interval::M15 => "15min",
            Interval::M30 => "30min",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1day",
            Interval::W1 => "1week",
            Interval::MN1 => "1month",
        }
    }

    /// 제공자 API 간격 문자열에서 파싱합니다.
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "1min" => Some(Interval::M1),
            "5min" => Some(Interval::M5),
            "15min" => Some(Interval::M15),
            "30min" => Some(Interval::M30),
            "1h" => Some(Interval::H1),
            "4h" => Some(Interval::H4),
            "1day" => Some(Interval::D1),
            "1week" => Some(Interval::W1),
            "1month" => Some(Interval::MN1),
            _ => None,
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::D1
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_api_str(s).ok_or_else(|| format!("Invalid interval: {}", s))
    }
}
