//! # dualagent
//!
//! 모니터링 에이전트 레코드 스트림을 SQLite로 복제하는 운영 CLI.
//! 설정 로드, 어댑터 와이어링, 스케줄러와 stdin 수집 루프 오케스트레이션.

mod ingest_loop;
mod install;
mod passthrough;
mod scheduler;
mod self_test;
mod status;
mod wiring;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dualagent_core::config::AppConfig;
use dualagent_core::config_manager::ConfigManager;
use dualagent_core::models::aggregate::Granularity;
use dualagent_core::ports::ingest::Ingest;
use dualagent_core::ports::storage::MetricStore;
use dualagent_pipeline::aggregator::Aggregator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::passthrough::PassthroughIngest;
use crate::scheduler::Scheduler;
use crate::self_test::SelfTestOptions;
use crate::wiring::Pipeline;

/// dualagent 운영 CLI
///
/// 모니터링 에이전트 레코드를 DB에 이중 기록하고 집계한다
#[derive(Parser, Debug)]
#[command(name = "dualagent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리의 config.json)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,

    /// 레코드에 기록할 실행 환경 이름
    #[arg(long, default_value = "production", global = true)]
    environment: String,

    /// 레코드에 기록할 앱 버전 (기본: 이 바이너리 버전)
    #[arg(long, global = true)]
    app_version: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 설정 파일과 데이터베이스 준비
    Install {
        /// 기존 설정을 기본값으로 덮어씀
        #[arg(long)]
        force: bool,
    },
    /// 설정, DB 연결, 버퍼, 메트릭 현황 출력
    Status {
        /// 상세 설정과 필터 출력
        #[arg(long)]
        detailed: bool,
    },
    /// 합성 레코드로 파이프라인 점검
    Test {
        /// composite 없이 DB 싱크만 점검
        #[arg(long)]
        direct: bool,
        /// 점검 후 테스트 레코드 삭제
        #[arg(long)]
        cleanup: bool,
        /// 필터/샘플링 해제
        #[arg(long)]
        no_filters: bool,
    },
    /// 지정 시각을 포함하는 구간 집계
    Aggregate {
        /// hourly, daily, weekly
        #[arg(long, short = 'g', default_value = "hourly")]
        granularity: Granularity,
        /// 기준 시각 (RFC3339, 기본: 직전 구간)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// 보존 기간이 지난 메트릭 삭제
    Cleanup,
    /// stdin NDJSON 레코드를 stdout과 DB에 이중 기록
    Run,
}

/// 설정 관리자 생성 (경로 지정 또는 플랫폼 기본)
fn config_manager(path: Option<PathBuf>) -> Result<ConfigManager> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    Ok(manager)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout은 `run`의 NDJSON 출력 전용이므로 로그는 stderr로
    let log_filter = format!(
        "dualagent={0},dualagent_core={0},dualagent_pipeline={0},dualagent_storage={0}",
        args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let manager = config_manager(args.config.clone()).context("설정 로드 실패")?;
    let app_version = args
        .app_version
        .clone()
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    match args.command {
        Command::Install { force } => install::run(&manager, force),
        Command::Status { detailed } => status::run(&manager, detailed).await,
        Command::Test {
            direct,
            cleanup,
            no_filters,
        } => {
            let config = manager.effective()?;
            let context = wiring::host_context(&args.environment, &app_version);
            let options = SelfTestOptions {
                direct,
                cleanup,
                no_filters,
            };
            self_test::run(config, context, options).await.map(|_| ())
        }
        Command::Aggregate { granularity, at } => {
            run_aggregate(&manager.effective()?, granularity, at).await
        }
        Command::Cleanup => run_cleanup(&manager.effective()?).await,
        Command::Run => {
            let config = manager.effective()?;
            run_pipeline(&config, &args.environment, &app_version).await
        }
    }
}

/// 단일 구간 집계
async fn run_aggregate(
    config: &AppConfig,
    granularity: Granularity,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let storage = wiring::open_storage(config)?;
    let aggregator = Aggregator::new(storage, config.aggregation.batch_size);
    let at = at.unwrap_or_else(|| granularity.previous_window_point(Utc::now()));

    let report = aggregator.aggregate(granularity, at).await?;
    println!(
        "📈 {} 집계: {} ~ {} ({}행 스캔)",
        report.granularity,
        report.window_start.format("%Y-%m-%d %H:%M:%S"),
        report.window_end.format("%Y-%m-%d %H:%M:%S"),
        report.rows_scanned
    );
    for row in &report.aggregates {
        println!(
            "   • {}: {}건, 평균 {:.2}ms, 오류율 {}%",
            row.key.event_type,
            row.total_events,
            row.average_response_time(),
            row.error_rate()
        );
    }
    if report.aggregates.is_empty() {
        println!("   (구간에 메트릭 없음)");
    }
    Ok(())
}

/// 보존 정책 1회 실행
async fn run_cleanup(config: &AppConfig) -> Result<()> {
    let storage = wiring::open_storage(config)?;
    let deleted = scheduler::enforce_retention(storage.as_ref(), &config.database.cleanup).await?;
    println!(
        "🧹 {}일 이전 메트릭 {deleted}건 삭제",
        config.database.cleanup.retention_days
    );
    Ok(())
}

/// stdin 수집 루프 + 스케줄러
async fn run_pipeline(config: &AppConfig, environment: &str, app_version: &str) -> Result<()> {
    let storage = wiring::open_storage(config)?;
    let context = wiring::host_context(environment, app_version);
    info!(
        "수집 시작: 환경={environment}, 버전={app_version}, 세션={}",
        context.session_id.as_deref().unwrap_or("-")
    );

    let pipeline = Pipeline::assemble(
        config,
        storage.clone(),
        context,
        Arc::new(PassthroughIngest::stdout()),
    );

    let store: Arc<dyn MetricStore> = storage;
    let scheduler = Scheduler::new(config, store)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let reader = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = ingest_loop::run(reader, pipeline.ingest.as_ref()) => {
            if let Err(e) = result {
                warn!("수집 루프 실패: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C 수신, 남은 버퍼 digest");
            match pipeline.ingest.digest().await {
                Ok(n) => info!("종료 digest: {n}건"),
                Err(e) => warn!("종료 digest 실패: {e}"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        warn!("스케줄러 종료 실패: {e}");
    }
    info!("dualagent 종료");
    Ok(())
}
