//! 캐시 예열.

use anyhow::Result;
use tracing::{info, warn};

use terminal_core::Symbol;
use terminal_data::{DataManager, WarmEvent, WarmOptions, WarmOutcome};

use crate::output::OutputFormat;

pub async fn run(manager: &DataManager, symbols: &[Symbol], force: bool, format: OutputFormat) -> Result<()> {
    let options = WarmOptions {
        force,
        ..WarmOptions::default()
    }
    .with_progress(move |event| {
        if let (OutputFormat::Table, WarmEvent::Progress { symbol, kind, step, completed, total }) =
            (format, event)
        {
            println!("[{}/{}] {} {} {:?}", completed, total, symbol, kind, step);
        }
    });

    match manager.warmer().warm(symbols, options).await {
        WarmOutcome::AlreadyRunning => warn!("다른 예열이 진행 중입니다"),
        WarmOutcome::Completed(summary) => {
            info!(
                symbols = summary.symbols,
                fetched = summary.fetched,
                skipped = summary.skipped,
                failed = summary.failed,
                stopped_early = summary.stopped_early,
                elapsed = format!("{:.1}s", summary.elapsed.as_secs_f64()),
                "예열 완료"
            );
            if format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({
                        "symbols": summary.symbols,
                        "fetched": summary.fetched,
                        "skipped": summary.skipped,
                        "failed": summary.failed,
                        "stopped_early": summary.stopped_early,
                        "elapsed_ms": summary.elapsed.as_millis() as u64,
                    })
                );
            } else if summary.stopped_early {
                println!("{}", manager.guard().reset_message());
            }
        }
    }
    Ok(())
}
