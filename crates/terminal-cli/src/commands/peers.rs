//! 피어 비교.

use anyhow::Result;

use terminal_core::{Interval, Symbol};
use terminal_data::DataManager;

use crate::output::{print_json, render_comparison, OutputFormat};

pub async fn run(
    manager: &DataManager,
    symbol: &str,
    interval: Interval,
    size: usize,
    format: OutputFormat,
) -> Result<()> {
    let symbol = Symbol::new(symbol)?;
    let comparison = manager.peers().load(&symbol, interval, size.max(1)).await?;

    match format {
        OutputFormat::Json => print_json(&comparison)?,
        OutputFormat::Table => println!("{}", render_comparison(&comparison)),
    }
    Ok(())
}
