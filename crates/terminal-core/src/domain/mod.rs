//! 도메인 모델.
//!
//! - `market_clock` - 거래소 시장 시간 (정규장/프리마켓/애프터아워)
//! - `market_data` - 시세, 펀더멘털, OHLCV 캔들

pub mod market_clock;
pub mod market_data;

pub use market_clock::*;
pub use market_data::*;
