//! CLI 명령 구현.

pub mod cache;
pub mod peers;
pub mod rate_limit;
pub mod status;
pub mod warm;
pub mod watch;

use anyhow::{bail, Result};
use terminal_core::{parse_symbol_list, Symbol};

/// 쉼표 구분 심볼 목록 파싱 (비어 있으면 오류).
pub fn parse_symbols(input: &str) -> Result<Vec<Symbol>> {
    let symbols = parse_symbol_list(input)?;
    if symbols.is_empty() {
        bail!("심볼을 하나 이상 지정해야 합니다");
    }
    Ok(symbols)
}
