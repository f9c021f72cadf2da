//! 설정 관리.
//!
//! TOML 파일(선택)과 `TERMINAL__` 접두사의 환경 변수에서 설정을 로드합니다.
//! 캐시 TTL, 요청 간격 등 특정 제공자 무료 플랜에 맞춰진 값들은 모두 여기서 조정합니다.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 시장 시간 설정
    pub market: MarketConfig,
    /// 시세 제공자 설정
    pub provider: ProviderConfig,
    /// 피어 제공자 설정
    pub peers: PeersConfig,
    /// 캐시 설정
    pub cache: CacheConfig,
    /// 폴러 설정
    pub poller: PollerConfig,
    /// 캐시 워머 설정
    pub warmer: WarmerConfig,
    /// 저장소 설정
    pub storage: StorageConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// 시장 시간 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MarketConfig {
    /// 거래소 시간대 (IANA 이름)
    pub timezone: String,
    /// 프리마켓 시작 (HH:MM)
    pub pre_market_open: String,
    /// 정규장 시작 (HH:MM)
    pub regular_open: String,
    /// 정규장 종료 (HH:MM)
    pub regular_close: String,
    /// 애프터아워 종료 (HH:MM)
    pub after_hours_close: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            pre_market_open: "04:00".to_string(),
            regular_open: "09:30".to_string(),
            regular_close: "16:00".to_string(),
            after_hours_close: "20:00".to_string(),
        }
    }
}

/// 로그와 Debug 출력에서 가려지는 API 키.
#[derive(Clone)]
pub struct ApiKey(Arc<SecretString>);

impl ApiKey {
    /// 새 API 키를 생성합니다.
    pub fn new(key: impl Into<String>) -> Self {
        let key: String = key.into();
        Self(Arc::new(SecretString::new(key.into())))
    }

    /// 키 원문을 노출합니다. 요청 파라미터를 만들 때만 사용하세요.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // 환경 변수 값이 숫자로 파싱되는 경우도 허용
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Signed(n) => n.to_string(),
            Raw::Unsigned(n) => n.to_string(),
        };
        Ok(ApiKey::new(raw.trim()))
    }
}

/// 시세/통계/시계열 제공자 설정 (Twelve Data 호환).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// REST API 기본 URL (프록시 주소 가능)
    pub base_url: String,
    /// API 키 (프록시가 키를 붙이는 경우 생략)
    pub api_key: Option<ApiKey>,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 일일 한도 초기화 기준 시간대 (이 시간대 자정에 초기화)
    pub reset_timezone: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twelvedata.com".to_string(),
            api_key: None,
            timeout_secs: 15,
            reset_timezone: "America/New_York".to_string(),
        }
    }
}

impl ProviderConfig {
    /// 요청 타임아웃을 Duration으로 반환
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 피어(경쟁사) 목록 제공자 설정 (Finnhub 호환).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// REST API 기본 URL
    pub base_url: String,
    /// API 토큰. 없으면 내장 피어 목록만 사용
    pub api_key: Option<ApiKey>,
    /// 최대 피어 수
    pub max_peers: usize,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 피어 시계열 요청 간격 (밀리초)
    pub series_stagger_ms: u64,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            base_url: "https://finnhub.io/api/v1".to_string(),
            api_key: None,
            max_peers: 5,
            timeout_secs: 10,
            series_stagger_ms: 1000,
        }
    }
}

impl PeersConfig {
    /// 피어 시계열 요청 간격.
    pub fn series_stagger(&self) -> Duration {
        Duration::from_millis(self.series_stagger_ms)
    }
}

/// 데이터 종류별 TTL (시장 개장/마감).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TtlPair {
    /// 정규장 중 TTL (밀리초)
    pub open_ms: u64,
    /// 장 마감 중 TTL (밀리초)
    pub closed_ms: u64,
}

impl TtlPair {
    /// 새 TTL 쌍 생성.
    pub const fn new(open_ms: u64, closed_ms: u64) -> Self {
        Self { open_ms, closed_ms }
    }

    /// 시장 상태에 맞는 TTL 선택.
    pub fn select(&self, market_open: bool) -> Duration {
        if market_open {
            Duration::from_millis(self.open_ms)
        } else {
            Duration::from_millis(self.closed_ms)
        }
    }
}

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// 캐시 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 메인 캐시 키 접두사
    pub key_prefix: String,
    /// 피어 시계열 캐시 키 접두사
    pub peer_series_prefix: String,
    /// TTL 대비 stale 허용 배수 (이 배수를 넘으면 삭제)
    pub stale_multiplier: u32,
    /// 시세 TTL
    pub quote_ttl: TtlPair,
    /// 펀더멘털 통계 TTL
    pub statistics_ttl: TtlPair,
    /// 피어 목록 TTL
    pub peers_ttl: TtlPair,
    /// 시계열 TTL
    pub time_series_ttl: TtlPair,
    /// 저장 공간 부족 시 제거할 항목의 최소 나이 (초)
    pub eviction_age_secs: u64,
    /// 피어 시계열: 정규장 중 유효 기간 (초)
    pub peer_series_ttl_open_secs: u64,
    /// 피어 시계열: 강제 삭제 나이 (초)
    pub peer_series_max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "terminal_cache_".to_string(),
            peer_series_prefix: "terminal_peer_series_".to_string(),
            stale_multiplier: 5,
            quote_ttl: TtlPair::new(MINUTE_MS, HOUR_MS),
            statistics_ttl: TtlPair::new(HOUR_MS, DAY_MS),
            peers_ttl: TtlPair::new(DAY_MS, DAY_MS),
            time_series_ttl: TtlPair::new(MINUTE_MS, HOUR_MS),
            eviction_age_secs: 24 * 60 * 60,
            peer_series_ttl_open_secs: 60 * 60,
            peer_series_max_age_secs: 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    /// 저장 공간 부족 시 제거 기준 나이
    pub fn eviction_age(&self) -> Duration {
        Duration::from_secs(self.eviction_age_secs)
    }

    /// 피어 시계열 정규장 유효 기간
    pub fn peer_series_ttl_open(&self) -> Duration {
        Duration::from_secs(self.peer_series_ttl_open_secs)
    }

    /// 피어 시계열 강제 삭제 나이
    pub fn peer_series_max_age(&self) -> Duration {
        Duration::from_secs(self.peer_series_max_age_secs)
    }
}

/// 폴러 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    /// 정규장 중 심볼별 반복 조회 간격 (초)
    pub interval_open_secs: u64,
    /// 심볼별 첫 조회 지연 단위 (밀리초, index × 값)
    pub stagger_ms: u64,
    /// 정규장 중 시장 상태 재확인 간격 (초)
    pub market_check_open_secs: u64,
    /// 장 마감 중 시장 상태 재확인 간격 (초)
    pub market_check_closed_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            // 6종목 기준 하루 약 600회 (일일 한도 800회)
            interval_open_secs: 4 * 60,
            stagger_ms: 2_000,
            market_check_open_secs: 60,
            market_check_closed_secs: 30 * 60,
        }
    }
}

impl PollerConfig {
    /// 정규장 반복 조회 간격
    pub fn interval_open(&self) -> Duration {
        Duration::from_secs(self.interval_open_secs)
    }

    /// 첫 조회 지연 단위
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    /// 시장 상태 재확인 간격
    pub fn market_check_interval(&self, market_open: bool) -> Duration {
        if market_open {
            Duration::from_secs(self.market_check_open_secs)
        } else {
            Duration::from_secs(self.market_check_closed_secs)
        }
    }
}

/// 캐시 워머 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmerConfig {
    /// 네트워크 요청 간 간격 (밀리초). 분당 8회 한도 기준
    pub request_stagger_ms: u64,
    /// watch 시작 시 캐시 워밍 실행 여부
    pub warm_on_start: bool,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            request_stagger_ms: 8_000,
            warm_on_start: true,
        }
    }
}

impl WarmerConfig {
    /// 요청 간 간격을 Duration으로 반환
    pub fn request_stagger(&self) -> Duration {
        Duration::from_millis(self.request_stagger_ms)
    }
}

/// 저장소 백엔드 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// 프로세스 메모리 (재시작 시 사라짐)
    Memory,
    /// 디렉토리 기반 JSON 파일
    File,
}

/// 저장소 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 백엔드
    pub backend: StorageBackend,
    /// 파일 저장소 디렉토리
    pub path: String,
    /// 최대 저장 용량 (바이트). 없으면 무제한
    pub max_bytes: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: "./data/cache".to_string(),
            max_bytes: Some(5 * 1024 * 1024),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드합니다.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("config/default").required(false));
        }

        let config = builder
            // 환경 변수로 오버라이드 (예: TERMINAL__PROVIDER__API_KEY)
            .add_source(
                config::Environment::with_prefix("TERMINAL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// TOML 문자열에서 설정을 로드합니다 (환경 변수 미적용).
    pub fn from_toml_str(toml: &str) -> Result<Self, CoreError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// 값 범위를 검증합니다.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cache.stale_multiplier == 0 {
            return Err(CoreError::Config("cache.stale_multiplier는 1 이상이어야 합니다".to_string()));
        }
        if self.poller.interval_open_secs == 0 {
            return Err(CoreError::Config("poller.interval_open_secs는 1 이상이어야 합니다".to_string()));
        }
        if self.poller.market_check_open_secs == 0 || self.poller.market_check_closed_secs == 0 {
            return Err(CoreError::Config("poller 시장 확인 간격은 1 이상이어야 합니다".to_string()));
        }
        if self.peers.max_peers == 0 {
            return Err(CoreError::Config("peers.max_peers는 1 이상이어야 합니다".to_string()));
        }
        self.provider
            .reset_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| {
                CoreError::Config(format!(
                    "알 수 없는 시간대: {}",
                    self.provider.reset_timezone
                ))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_free_tier() {
        let config = AppConfig::default();
        assert_eq!(config.cache.stale_multiplier, 5);
        assert_eq!(config.cache.quote_ttl.select(true), Duration::from_secs(60));
        assert_eq!(config.cache.quote_ttl.select(false), Duration::from_secs(3600));
        assert_eq!(config.cache.statistics_ttl.select(false), Duration::from_secs(86_400));
        assert_eq!(config.cache.peers_ttl.select(true), Duration::from_secs(86_400));
        assert_eq!(config.poller.interval_open(), Duration::from_secs(240));
        assert_eq!(config.poller.stagger(), Duration::from_secs(2));
        assert_eq!(config.poller.market_check_interval(false), Duration::from_secs(1800));
        assert_eq!(config.warmer.request_stagger(), Duration::from_secs(8));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_overrides() {
        let config = AppConfig::from_toml_str(
            r#"
            [provider]
            base_url = "http://localhost:8080/td"
            api_key = "demo-key"

            [cache]
            stale_multiplier = 3
            quote_ttl = { open_ms = 30000, closed_ms = 600000 }

            [poller]
            interval_open_secs = 120

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider.base_url, "http://localhost:8080/td");
        assert_eq!(config.provider.api_key.as_ref().map(|k| k.expose()), Some("demo-key"));
        assert_eq!(config.cache.stale_multiplier, 3);
        assert_eq!(config.cache.quote_ttl.open_ms, 30_000);
        // 지정하지 않은 값은 기본값 유지
        assert_eq!(config.cache.statistics_ttl, CacheConfig::default().statistics_ttl);
        assert_eq!(config.poller.interval_open_secs, 120);
        assert_eq!(config.poller.stagger_ms, 2_000);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_shipped_default_file_matches_defaults() {
        let config = AppConfig::from_toml_str(include_str!("../../../config/default.toml")).unwrap();
        let defaults = AppConfig::default();

        assert_eq!(config.cache.quote_ttl, defaults.cache.quote_ttl);
        assert_eq!(config.cache.statistics_ttl, defaults.cache.statistics_ttl);
        assert_eq!(config.cache.peers_ttl, defaults.cache.peers_ttl);
        assert_eq!(config.cache.time_series_ttl, defaults.cache.time_series_ttl);
        assert_eq!(config.cache.stale_multiplier, defaults.cache.stale_multiplier);
        assert_eq!(config.poller.interval_open_secs, defaults.poller.interval_open_secs);
        assert_eq!(config.warmer.request_stagger_ms, defaults.warmer.request_stagger_ms);
        assert_eq!(config.peers.series_stagger_ms, defaults.peers.series_stagger_ms);
        assert_eq!(config.storage.max_bytes, defaults.storage.max_bytes);
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_api_key_is_redacted() {
        let key = ApiKey::new("super-secret");
        assert_eq!(format!("{:?}", key), "ApiKey([REDACTED])");
        assert_eq!(key.expose(), "super-secret");
    }

    #[test]
    fn test_validate_rejects_zero_multiplier() {
        let result = AppConfig::from_toml_str("[cache]\nstale_multiplier = 0\n");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_reset_timezone() {
        let result = AppConfig::from_toml_str("[provider]\nreset_timezone = \"Nowhere/City\"\n");
        assert!(result.is_err());
    }
}
