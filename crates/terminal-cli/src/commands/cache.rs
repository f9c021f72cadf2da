//! 캐시 통계와 삭제.

use anyhow::Result;

use terminal_core::Symbol;
use terminal_data::DataManager;

use crate::output::{print_json, OutputFormat};

pub async fn stats(manager: &DataManager, format: OutputFormat) -> Result<()> {
    let stats = manager.cache().stats().await;
    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("entries: {}", stats.entries);
    println!("  fresh:   {}", stats.fresh);
    println!("  stale:   {}", stats.stale);
    println!("  expired: {}", stats.expired);
    println!("bytes:   {}", stats.bytes);
    Ok(())
}

pub async fn clear(manager: &DataManager, symbol: Option<&str>) -> Result<()> {
    let (entries, series) = match symbol {
        Some(raw) => {
            let symbol = Symbol::new(raw)?;
            (
                manager.cache().clear_symbol(&symbol).await,
                manager.peer_series().clear(Some(&symbol)).await,
            )
        }
        None => (manager.cache().clear().await, manager.peer_series().clear(None).await),
    };
    println!("removed {} cache entries, {} peer series", entries, series);
    Ok(())
}
