//! `status` 명령.

use anyhow::Result;
use chrono::Utc;
use dualagent_core::config::AppConfig;
use dualagent_core::config_manager::ConfigManager;
use dualagent_core::models::metric::StoredMetric;
use dualagent_core::ports::storage::MetricStore;
use dualagent_storage::sqlite::SqliteStorage;

use crate::wiring;

/// 상위 이벤트 타입 표시 개수
const TOP_EVENT_TYPES: usize = 5;

/// 최근 활동 표시 개수
const RECENT_LIMIT: usize = 5;

/// 상태 출력
pub async fn run(manager: &ConfigManager, detailed: bool) -> Result<()> {
    println!("🔍 dualagent 상태 점검");

    let config = manager.effective()?;
    print_package_status(manager, &config);

    if detailed {
        print_detailed_config(&config);
    }

    section("🗄️  데이터베이스 상태");
    let storage = match wiring::open_storage(&config) {
        Ok(storage) => storage,
        Err(e) => {
            println!("❌ 데이터베이스: 연결 실패 - {e}");
            return Ok(());
        }
    };

    match storage.ping().await {
        Ok(()) => println!("✅ 데이터베이스: 연결됨"),
        Err(e) => println!("❌ 데이터베이스: 연결 실패 - {e}"),
    }
    for table in ["dual_agent_metrics", "dual_agent_aggregated_metrics"] {
        let exists = storage.table_exists(table).unwrap_or(false);
        println!("   {table}: {}", if exists { "✅" } else { "❌ 없음" });
    }

    print_metrics_status(&storage, &config)?;

    println!();
    println!("✅ 상태 점검 완료");
    Ok(())
}

fn print_package_status(manager: &ConfigManager, config: &AppConfig) {
    section("📦 구성");
    println!("   설정 파일      {}", manager.config_path().display());
    println!("   수집           {}", yes_no(config.enabled));
    println!("   자동 구성      {}", yes_no(config.auto_configure));
    println!("   집계           {}", yes_no(config.aggregation.enabled));
    println!("   정리           {}", yes_no(config.database.cleanup.enabled));
    match ConfigManager::database_path(config) {
        Ok(path) => println!("   DB 경로        {}", path.display()),
        Err(e) => println!("   DB 경로        ❌ {e}"),
    }
}

fn print_detailed_config(config: &AppConfig) {
    section("🔧 상세 설정");
    println!("   버퍼 크기         {}", config.buffer_size);
    println!("   버퍼 만료         {}초", config.buffer_ttl_secs);
    println!("   보존 기간         {}일", config.database.cleanup.retention_days);
    println!("   정리 배치         {}", config.database.cleanup.batch_size);
    println!("   집계 스케줄       {}", config.aggregation.schedule);
    println!("   집계 배치         {}", config.aggregation.batch_size);
    println!(
        "   느린 요청/쿼리    {}ms / {}ms",
        config.performance.slow_request_threshold, config.performance.slow_query_threshold
    );
    println!("   설정 버전         {}", config.version);

    section("🎯 이벤트 필터");
    let filters = &config.filters;
    if filters.event_types.is_empty() {
        println!("   수집 타입: 전체");
    } else {
        println!("   수집 타입: {}", filters.event_types.join(", "));
    }
    if !filters.disabled_types.is_empty() {
        println!("   제외 타입: {}", filters.disabled_types.join(", "));
    }
    if !filters.sampling_rates.is_empty() {
        println!("   샘플링 비율:");
        for (event_type, rate) in &filters.sampling_rates {
            println!("     • {event_type}: {}%", rate * 100.0);
        }
    }
}

fn print_metrics_status(storage: &SqliteStorage, config: &AppConfig) -> Result<()> {
    section("📊 메트릭 현황");
    let summary = storage.summary()?;

    if config.enabled {
        println!(
            "✅ DB 수집: 활성 (버퍼 {}/{})",
            summary.buffered, config.buffer_size
        );
    } else {
        println!("⚠️  DB 수집: 비활성");
    }

    println!("   스키마 버전    v{}", summary.schema_version);
    println!("   전체 레코드    {}", summary.total_metrics);
    println!("   최근 1시간     {}", summary.last_hour);
    println!("   최근 24시간    {}", summary.last_day);
    println!(
        "   오늘 집계 행   {}",
        storage.count_aggregates_on(Utc::now().date_naive())?
    );
    if let Some(latest) = summary.latest_event_at {
        println!("   마지막 이벤트  {}", latest.format("%Y-%m-%d %H:%M:%S"));
    }

    let counts = storage.event_type_counts(TOP_EVENT_TYPES)?;
    if !counts.is_empty() {
        println!();
        println!("   상위 이벤트 타입:");
        for (event_type, count) in counts {
            println!("     • {event_type}: {count}");
        }
    }

    let recent = storage.recent_metrics(RECENT_LIMIT)?;
    if !recent.is_empty() {
        println!();
        println!("   최근 활동:");
        for metric in &recent {
            println!("     • {}", recent_line(metric));
        }
    }
    Ok(())
}

/// `타입 | 시각 | 소요 시간` 한 줄
pub(crate) fn recent_line(metric: &StoredMetric) -> String {
    let duration = metric
        .row
        .duration()
        .map(|d| format!("{d:.2}ms"))
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "{} | {} | {duration}",
        metric.row.event_type,
        metric.row.event_timestamp.format("%Y-%m-%d %H:%M:%S")
    )
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "✅ 예"
    } else {
        "❌ 아니오"
    }
}

pub(crate) fn section(title: &str) {
    println!();
    println!("{title}");
    println!("{}", "─".repeat(title.chars().count() + 2));
}
