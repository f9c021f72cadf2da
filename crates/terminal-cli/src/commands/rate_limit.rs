//! 제공자 한도 상태 조회/테스트/해제.

use anyhow::{bail, Result};
use tracing::info;

use terminal_data::DataManager;

use crate::output::{print_json, OutputFormat};

pub fn status(manager: &DataManager, format: OutputFormat) -> Result<()> {
    let snapshot = manager.guard().snapshot();
    if format == OutputFormat::Json {
        return print_json(&snapshot);
    }

    if snapshot.exhausted {
        println!("exhausted: {}", manager.guard().reset_message());
        if let Some(until) = snapshot.exhausted_until {
            println!("resets at: {} ({})", until.format("%Y-%m-%d %H:%M UTC"), snapshot.reset_timezone);
        }
    } else {
        println!("not exhausted");
    }
    Ok(())
}

pub fn test(manager: &DataManager, minutes: u32, format: OutputFormat) -> Result<()> {
    if minutes == 0 {
        bail!("--minutes는 1 이상이어야 합니다");
    }
    manager.guard().test_exhaustion(minutes);
    info!(minutes, "한도 소진 테스트 설정");
    status(manager, format)
}

pub fn reset(manager: &DataManager, format: OutputFormat) -> Result<()> {
    manager.guard().reset_exhaustion();
    status(manager, format)
}
