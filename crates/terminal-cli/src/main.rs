//! 주식 터미널 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 시장/한도/캐시 상태
//! terminal status
//!
//! # 관심 종목 폴링 (Ctrl+C로 종료)
//! terminal watch --symbols AAPL,MSFT,NVDA
//!
//! # 캐시 예열 (fresh 항목 포함 강제)
//! terminal warm --symbols AAPL,MSFT --force
//!
//! # 피어 비교 (주봉 12개)
//! terminal peers RCL --interval 1week --size 12
//!
//! # 네트워크 없이 시뮬레이션 데이터로 실행
//! terminal --simulated watch --symbols AAPL
//!
//! # 한도 소진 테스트 (5분) / 해제
//! terminal rate-limit test --minutes 5
//! terminal rate-limit reset
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use terminal_core::{init_logging, AppConfig, Interval, LogConfig};
use terminal_data::{DataManager, ProviderMode};

mod commands;
mod output;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "terminal")]
#[command(about = "Stock terminal CLI - 시장 시간 기반 시세 폴링과 캐시 관리", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (기본: config/default.toml, 없으면 기본값)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (설정 파일보다 우선, RUST_LOG가 최우선)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 네트워크 없이 시뮬레이션 제공자 사용
    #[arg(long, global = true, default_value = "false")]
    simulated: bool,

    /// 출력 형식 (table, json)
    #[arg(long, global = true, default_value = "table")]
    format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 제공자, 시장 상태, 한도, 캐시 요약
    Status,

    /// 관심 종목 폴링
    Watch {
        /// 심볼 목록 (쉼표로 구분, 예: "AAPL,MSFT")
        #[arg(short, long)]
        symbols: String,
    },

    /// 캐시 예열 (시세 → 통계)
    Warm {
        /// 심볼 목록 (쉼표로 구분)
        #[arg(short, long)]
        symbols: String,

        /// fresh 항목도 다시 조회
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// 피어 비교 데이터
    Peers {
        /// 기준 종목
        symbol: String,

        /// 봉 간격 (1min, 5min, 15min, 30min, 1h, 1day, 1week, 1month)
        #[arg(short, long, default_value = "1day")]
        interval: String,

        /// 봉 개수
        #[arg(long, default_value = "30")]
        size: usize,
    },

    /// 캐시 관리
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// 제공자 한도 상태
    RateLimit {
        #[command(subcommand)]
        action: RateLimitAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// 캐시 통계
    Stats,
    /// 캐시 삭제 (심볼 미지정 시 전체)
    Clear {
        /// 삭제할 심볼
        #[arg(short, long)]
        symbol: Option<String>,
    },
}

#[derive(Subcommand)]
enum RateLimitAction {
    /// 현재 한도 상태
    Status,
    /// N분 동안 소진 상태로 설정
    Test {
        /// 소진 지속 시간 (분)
        #[arg(short, long, default_value = "5")]
        minutes: u32,
    },
    /// 소진 상태 해제
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;

    // 로깅 초기화 (LOG_FORMAT 환경변수 > 설정 파일)
    let mut log_config = LogConfig::from_settings(&config.logging);
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|f| f.parse().ok()) {
        log_config.format = format;
    }
    init_logging(log_config)?;

    let format = OutputFormat::parse(&cli.format)?;
    let mode = if cli.simulated {
        ProviderMode::Simulated
    } else {
        ProviderMode::Live
    };

    let manager = DataManager::new(config, mode)
        .await
        .context("데이터 매니저 초기화 실패")?;
    manager.restore_rate_limit().await?;
    info!(provider = manager.provider().name(), "터미널 시작");

    let result = run(&manager, cli.command, format).await;

    // 명령 결과와 무관하게 한도 상태는 다음 실행을 위해 저장
    if let Err(e) = manager.persist_rate_limit().await {
        error!(error = %e, "한도 상태 저장 실패");
    }
    result
}

async fn run(manager: &DataManager, command: Commands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Status => commands::status::run(manager, format).await,
        Commands::Watch { symbols } => {
            let symbols = commands::parse_symbols(&symbols)?;
            commands::watch::run(manager, symbols, format).await
        }
        Commands::Warm { symbols, force } => {
            let symbols = commands::parse_symbols(&symbols)?;
            commands::warm::run(manager, &symbols, force, format).await
        }
        Commands::Peers {
            symbol,
            interval,
            size,
        } => {
            let interval: Interval = interval.parse().map_err(anyhow::Error::msg)?;
            commands::peers::run(manager, &symbol, interval, size, format).await
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cache::stats(manager, format).await,
            CacheAction::Clear { symbol } => commands::cache::clear(manager, symbol.as_deref()).await,
        },
        Commands::RateLimit { action } => match action {
            RateLimitAction::Status => commands::rate_limit::status(manager, format),
            RateLimitAction::Test { minutes } => commands::rate_limit::test(manager, minutes, format),
            RateLimitAction::Reset => commands::rate_limit::reset(manager, format),
        },
    }
}
