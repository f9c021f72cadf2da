//! 출력 형식과 표 렌더링.

use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;

use terminal_data::{PeerComparison, PollerSnapshot, StockRecord};

/// 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(anyhow::anyhow!("Invalid format: {}. Use: table, json", s)),
        }
    }
}

/// JSON 한 덩어리 출력.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn signed(value: Decimal) -> String {
    if value > Decimal::ZERO {
        format!("+{}", value.round_dp(2))
    } else {
        value.round_dp(2).to_string()
    }
}

/// 레코드 상태 표시 (LIVE / CACHED / STALE / OFFLINE / ERROR).
pub fn record_badge(record: &StockRecord) -> &'static str {
    if record.has_error && !record.has_data() {
        "ERROR"
    } else if record.offline || record.using_cached_data {
        "OFFLINE"
    } else if record.stale {
        "STALE"
    } else if record.cached {
        "CACHED"
    } else {
        "LIVE"
    }
}

/// 레코드 한 줄.
pub fn record_line(record: &StockRecord) -> String {
    let badge = record_badge(record);
    match &record.quote {
        Some(quote) => format!(
            "{:<8} {:>12} {:>10} {:>9}% {:>14}  {}",
            record.symbol,
            quote.price.round_dp(2).to_string(),
            signed(quote.change),
            signed(quote.change_percent),
            quote.volume,
            badge
        ),
        None => format!(
            "{:<8} {:>12} {:>10} {:>10} {:>14}  {} {}",
            record.symbol,
            "-",
            "-",
            "-",
            "-",
            badge,
            record.error_message.as_deref().unwrap_or("")
        ),
    }
}

/// 폴러 스냅샷 표.
pub fn render_snapshot(snapshot: &PollerSnapshot) -> String {
    let mut lines = Vec::with_capacity(snapshot.stock_data.len() + 4);
    let market = if snapshot.is_market_open { "OPEN" } else { "CLOSED" };
    let updated = snapshot
        .last_updated
        .map(|t| t.format("%H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    lines.push(format!("market: {}  updated: {}", market, updated));
    lines.push(format!(
        "{:<8} {:>12} {:>10} {:>10} {:>14}  {}",
        "SYMBOL", "PRICE", "CHANGE", "CHANGE%", "VOLUME", "STATUS"
    ));
    lines.extend(snapshot.stock_data.iter().map(record_line));

    // 한도 안내는 한 번만
    if let Some(message) = snapshot
        .stock_data
        .iter()
        .find_map(|r| r.rate_limit_message.as_deref())
    {
        lines.push(message.to_string());
    }
    if let Some(error) = &snapshot.error {
        lines.push(format!("error: {}", error));
    }
    lines.join("\n")
}

/// 피어 비교 표.
pub fn render_comparison(comparison: &PeerComparison) -> String {
    let mut lines = Vec::with_capacity(comparison.series.len() + 3);
    lines.push(format!(
        "{} peers: {}",
        comparison.symbol,
        comparison
            .peers
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    lines.push(format!("{:<8} {:>6} {:>10} {:>8}", "SYMBOL", "BARS", "RETURN%", "SOURCE"));
    for series in &comparison.series {
        lines.push(format!(
            "{:<8} {:>6} {:>10} {:>8}",
            series.symbol,
            series.bars.len(),
            series.return_pct.map(signed).unwrap_or_else(|| "-".to_string()),
            if series.from_cache { "cache" } else { "api" }
        ));
    }
    if !comparison.unavailable.is_empty() {
        let missing: Vec<&str> = comparison.unavailable.iter().map(|s| s.as_str()).collect();
        let reason = if comparison.stopped_early { " (API 한도 소진)" } else { "" };
        lines.push(format!("unavailable: {}{}", missing.join(", "), reason));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use terminal_core::{Quote, Symbol};

    fn record(symbol: &str) -> StockRecord {
        let symbol = Symbol::new(symbol).unwrap();
        StockRecord {
            quote: Some(Quote {
                symbol: symbol.clone(),
                name: None,
                price: dec!(182.456),
                change: dec!(1.5),
                change_percent: dec!(0.83),
                open: dec!(181),
                high: dec!(183),
                low: dec!(180),
                previous_close: dec!(180.956),
                volume: 1_200_000,
                average_volume: None,
                timestamp: Utc.with_ymd_and_hms(2024, 3, 12, 16, 0, 0).unwrap(),
            }),
            symbol,
            statistics: None,
            is_real_data: false,
            data_source: "simulated".to_string(),
            cached: false,
            stale: false,
            offline: false,
            has_error: false,
            error_message: None,
            using_cached_data: false,
            rate_limit_message: None,
            last_updated: None,
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("table").unwrap(), OutputFormat::Table);
        assert!(OutputFormat::parse("csv").is_err());
    }

    #[test]
    fn test_record_badges() {
        let mut r = record("AAPL");
        assert_eq!(record_badge(&r), "LIVE");
        r.cached = true;
        assert_eq!(record_badge(&r), "CACHED");
        r.stale = true;
        assert_eq!(record_badge(&r), "STALE");
        r.using_cached_data = true;
        assert_eq!(record_badge(&r), "OFFLINE");

        let mut failed = record("MSFT");
        failed.quote = None;
        failed.has_error = true;
        failed.error_message = Some("upstream 502".to_string());
        assert_eq!(record_badge(&failed), "ERROR");
        assert!(record_line(&failed).contains("upstream 502"));
    }

    #[test]
    fn test_record_line_rounds_and_signs() {
        let line = record_line(&record("AAPL"));
        assert!(line.starts_with("AAPL"));
        assert!(line.contains("182.46"));
        assert!(line.contains("+1.5"));
        assert!(line.contains("+0.83%"));
    }

    #[test]
    fn test_snapshot_shows_rate_limit_once() {
        let mut a = record("AAPL");
        a.rate_limit_message = Some("API limit reached".to_string());
        let mut b = record("MSFT");
        b.rate_limit_message = Some("API limit reached".to_string());
        let snapshot = PollerSnapshot {
            stock_data: vec![a, b],
            ..PollerSnapshot::default()
        };
        let rendered = render_snapshot(&snapshot);
        assert_eq!(rendered.matches("API limit reached").count(), 1);
        assert!(rendered.starts_with("market: CLOSED"));
    }
}
