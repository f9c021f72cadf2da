//! # Terminal Core
//!
//! 주식 터미널의 핵심 타입과 시장 시간 계산을 제공합니다.
//!
//! 데이터 계층과 CLI가 공통으로 사용하는 기본 요소입니다:
//! - 심볼 및 시계열 간격 타입
//! - 시세/펀더멘털/캔들 데이터 구조체
//! - 거래소 시장 시계 (개장 여부, 다음 개장까지 남은 시간)
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
