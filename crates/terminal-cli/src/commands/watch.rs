//! 관심 종목 폴링 (Ctrl+C로 종료).
//!
//! - 시작 시 오래된 캐시 정리
//! - 폴러 스냅샷이 바뀔 때마다 표 출력 (첫 조회 중에는 생략)
//! - 설정 시 시작 직후 백그라운드 예열, 다음 개장 시각 예열 예약
//! - 한도 상태가 바뀌면 바로 저장

use anyhow::Result;
use tracing::{error, info};

use terminal_core::Symbol;
use terminal_data::{DataManager, PollerPhase, WarmOptions};

use crate::output::{print_json, render_snapshot, OutputFormat};

pub async fn run(manager: &DataManager, symbols: Vec<Symbol>, format: OutputFormat) -> Result<()> {
    let evicted = manager
        .cache()
        .evict_older_than(manager.config().cache.eviction_age())
        .await;
    info!(symbols = symbols.len(), evicted, "폴링 시작");

    let poller = manager.start_poller();
    let mut rx = poller.subscribe();
    poller.set_symbols(symbols.clone());

    let startup_warm = manager.config().warmer.warm_on_start.then(|| {
        let warmer = manager.warmer().clone();
        let symbols = symbols.clone();
        tokio::spawn(async move { warmer.warm(&symbols, WarmOptions::default()).await })
    });

    let warm_symbols = symbols.clone();
    let delay = manager
        .warmer()
        .schedule_market_open_warm(move || warm_symbols.clone(), WarmOptions::default());
    info!(delay_mins = delay.as_secs() / 60, "개장 예열 예약");

    let mut exhausted = manager.guard().is_exhausted();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("종료 신호 수신, 폴링 종료 중...");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.phase == PollerPhase::Loading {
                    continue;
                }

                match format {
                    OutputFormat::Json => print_json(&snapshot)?,
                    OutputFormat::Table => println!("{}\n", render_snapshot(&snapshot)),
                }

                let now_exhausted = manager.guard().is_exhausted();
                if now_exhausted != exhausted {
                    exhausted = now_exhausted;
                    if let Err(e) = manager.persist_rate_limit().await {
                        error!(error = %e, "한도 상태 저장 실패");
                    }
                }
            }
        }
    }

    if let Some(handle) = startup_warm {
        handle.abort();
    }
    manager.warmer().cancel_scheduled_warm();
    poller.shutdown();
    Ok(())
}
