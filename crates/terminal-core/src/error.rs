//! 핵심 에러 타입.
//!
//! 심볼 파싱과 설정 로드에서 발생하는 에러를 정의합니다.

use thiserror::Error;

/// 핵심 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 잘못된 심볼
    #[error("잘못된 심볼: {0}")]
    InvalidSymbol(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 로깅 초기화 에러
    #[error("로깅 초기화 에러: {0}")]
    Logging(String),
}

/// 핵심 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// 사용자 입력 문제로 생긴 에러인지 확인합니다.
    pub fn is_user_error(&self) -> bool {
        matches!(self, CoreError::InvalidSymbol(_))
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}
