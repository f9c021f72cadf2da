//! 데이터 모듈 오류 타입.

use terminal_core::CoreError;
use thiserror::Error;

use crate::storage::StorageError;

/// 데이터 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 제공자 일일 한도 소진. 캐시가 있으면 하드 실패로 취급하지 않습니다.
    #[error("API 한도 소진: {reset_message}")]
    QuotaExhausted {
        /// 사용자에게 보여줄 초기화 안내 문구
        reset_message: String,
    },

    /// 데이터 가져오기 오류 (외부 소스)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// HTTP 전송 오류
    #[error("HTTP error: {0}")]
    Http(String),

    /// 응답 파싱 오류
    #[error("Parse error: {0}")]
    Parse(String),

    /// 제공자가 정상 응답으로 "데이터 없음"을 돌려줌
    #[error("No data: {0}")]
    NoData(String),

    /// 저장소 오류
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// 잘못된 심볼
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// 직렬화/역직렬화 오류
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// 한도 소진 오류인지 확인합니다.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, DataError::QuotaExhausted { .. })
    }

    /// 한도 소진 오류의 안내 문구.
    pub fn reset_message(&self) -> Option<&str> {
        match self {
            DataError::QuotaExhausted { reset_message } => Some(reset_message),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DataError::Parse(err.to_string())
        } else {
            DataError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Serialization(err.to_string())
    }
}

impl From<CoreError> for DataError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidSymbol(msg) => DataError::InvalidSymbol(msg),
            other => DataError::Config(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
