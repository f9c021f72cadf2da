//! 상태 요약.

use anyhow::Result;
use chrono::{DateTime, Utc};

use terminal_core::MarketClock;
use terminal_data::{Clock, DataManager};

use crate::output::{print_json, OutputFormat};

pub async fn run(manager: &DataManager, format: OutputFormat) -> Result<()> {
    let health = manager.health_check().await;
    if format == OutputFormat::Json {
        return print_json(&health);
    }

    let now = manager.clock().now();
    println!(
        "provider:     {} ({})",
        health.provider,
        if health.is_real_data { "real data" } else { "simulated" }
    );
    println!("market:       {}", health.market_status);
    println!("{}", session_line(manager.market(), now));
    println!(
        "rate limit:   {}",
        if health.rate_limit.exhausted {
            manager.guard().reset_message()
        } else {
            "ok".to_string()
        }
    );
    println!(
        "cache:        {} entries ({} fresh, {} stale, {} expired, {} bytes)",
        health.cache.entries, health.cache.fresh, health.cache.stale, health.cache.expired, health.cache.bytes
    );
    Ok(())
}

/// 장중이면 마감까지, 아니면 다음 개장까지 남은 시간.
fn session_line(market: &MarketClock, now: DateTime<Utc>) -> String {
    match market.time_until_close(now) {
        Some(until) => format!("closes in:    {}m", until.as_secs() / 60),
        None => format!(
            "next open:    {} (in {}m)",
            market.next_open(now).format("%Y-%m-%d %H:%M UTC"),
            market.time_until_open(now).as_secs() / 60
        ),
    }
}
