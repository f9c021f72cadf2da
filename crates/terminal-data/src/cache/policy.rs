//! 데이터 종류별 TTL 정책과 신선도 판정.
//!
//! | 종류 | 정규장 | 장 마감 |
//! |---|---|---|
//! | quote | 1분 | 1시간 |
//! | statistics | 1시간 | 24시간 |
//! | peers | 24시간 | 24시간 |
//! | time_series | 1분 | 1시간 |
//!
//! TTL을 넘긴 항목은 TTL × stale 배수까지 "stale"로 제공되고, 그 이후에는 삭제됩니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use terminal_core::{CacheConfig, TtlPair};

/// 캐시 데이터 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// 시세
    Quote,
    /// 펀더멘털 통계
    Statistics,
    /// 피어 목록
    Peers,
    /// 시계열 캔들
    TimeSeries,
}

impl DataKind {
    /// 모든 종류.
    pub const ALL: [DataKind; 4] = [
        DataKind::Quote,
        DataKind::Statistics,
        DataKind::Peers,
        DataKind::TimeSeries,
    ];

    /// 저장소 키에 쓰는 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Quote => "quote",
            DataKind::Statistics => "statistics",
            DataKind::Peers => "peers",
            DataKind::TimeSeries => "time_series",
        }
    }

    /// 한도가 있는 시세 제공자를 거치는 종류인지 여부.
    ///
    /// 피어 목록은 별도 제공자에서 오므로 한도 소진의 영향을 받지 않습니다.
    pub fn uses_quota(&self) -> bool {
        !matches!(self, DataKind::Peers)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quote" => Ok(DataKind::Quote),
            "statistics" => Ok(DataKind::Statistics),
            "peers" => Ok(DataKind::Peers),
            "time_series" | "timeSeries" => Ok(DataKind::TimeSeries),
            _ => Err(format!("Unknown data kind: {}", s)),
        }
    }
}

/// 캐시 항목 신선도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// age < ttl
    Fresh,
    /// ttl ≤ age < ttl × 배수
    Stale,
    /// age ≥ ttl × 배수 (삭제 대상)
    Expired,
}

/// TTL 정책.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    quote: TtlPair,
    statistics: TtlPair,
    peers: TtlPair,
    time_series: TtlPair,
    stale_multiplier: u32,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl TtlPolicy {
    /// 캐시 설정에서 생성합니다.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            quote: config.quote_ttl,
            statistics: config.statistics_ttl,
            peers: config.peers_ttl,
            time_series: config.time_series_ttl,
            stale_multiplier: config.stale_multiplier.max(1),
        }
    }

    /// stale 배수.
    pub fn stale_multiplier(&self) -> u32 {
        self.stale_multiplier
    }

    /// 종류와 시장 상태에 맞는 TTL.
    pub fn ttl(&self, kind: DataKind, market_open: bool) -> Duration {
        let pair = match kind {
            DataKind::Quote => self.quote,
            DataKind::Statistics => self.statistics,
            DataKind::Peers => self.peers,
            DataKind::TimeSeries => self.time_series,
        };
        pair.select(market_open)
    }

    /// 나이와 기록된 TTL로 신선도를 판정합니다.
    pub fn classify(&self, age: Duration, ttl: Duration) -> Freshness {
        if age < ttl {
            Freshness::Fresh
        } else if age < ttl * self.stale_multiplier {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}
