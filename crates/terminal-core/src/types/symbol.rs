//! 티커 심볼 정의.
//!
//! 이 모듈은 관심종목(watchlist)에서 사용하는 심볼 타입을 정의합니다:
//! - `Symbol` - 정규화된(대문자) 티커 문자열
//! - `parse_symbol_list` - 쉼표로 구분된 심볼 목록 파싱

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 정규화된 티커 심볼.
///
/// 앞뒤 공백을 제거하고 대문자로 변환한 값만 보관합니다.
/// 예: `" aapl "` → `AAPL`, `brk.b` → `BRK.B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// 심볼 최대 길이
    pub const MAX_LEN: usize = 16;

    /// 문자열을 정규화하여 심볼을 생성합니다.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let normalized = raw.as_ref().trim().to_uppercase();

        if normalized.is_empty() {
            return Err(CoreError::InvalidSymbol("빈 심볼".to_string()));
        }
        if normalized.len() > Self::MAX_LEN {
            return Err(CoreError::InvalidSymbol(format!(
                "심볼이 너무 깁니다: {}",
                normalized
            )));
        }
        if let Some(c) = normalized.chars().find(|c| !is_symbol_char(*c)) {
            return Err(CoreError::InvalidSymbol(format!(
                "허용되지 않는 문자 '{}': {}",
                c, normalized
            )));
        }

        Ok(Self(normalized))
    }

    /// 심볼 문자열을 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '^' | '=' | '/')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 쉼표로 구분된 심볼 목록을 파싱합니다 (예: `"aapl, msft,GOOGL"`).
///
/// 빈 항목은 건너뛰고, 중복은 처음 등장한 순서만 유지합니다.
pub fn parse_symbol_list(input: &str) -> Result<Vec<Symbol>, CoreError> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for part in input.split(',').filter(|p| !p.trim().is_empty()) {
        let symbol = Symbol::new(part)?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalization() {
        let symbol = Symbol::new("  aapl ").unwrap();
        assert_eq!(symbol.as_str(), "AAPL");
        assert_eq!(Symbol::new("brk.b").unwrap().to_string(), "BRK.B");
    }

    #[test]
    fn test_symbol_rejects_invalid() {
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("   ").is_err());
        assert!(Symbol::new("AA PL").is_err());
        assert!(Symbol::new("A".repeat(17)).is_err());
    }

    #[test]
    fn test_symbol_serde_roundtrip_normalizes() {
        let symbol: Symbol = serde_json::from_str("\"msft\"").unwrap();
        assert_eq!(symbol.as_str(), "MSFT");
        assert_eq!(serde_json::to_string(&symbol).unwrap(), "\"MSFT\"");
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }

    #[test]
    fn test_parse_symbol_list() {
        let symbols = parse_symbol_list("aapl, msft,,AAPL, googl").unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["AAPL", "MSFT", "GOOGL"]);
    }
}
