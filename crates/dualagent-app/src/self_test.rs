//! `test` 명령.
//!
//! 합성 레코드를 파이프라인에 흘려 보내고 저장 결과를 확인한다.
//! 테스트 레코드의 trace ID는 모두 [`TRACE_PREFIX`]로 시작한다.

use anyhow::{Context, Result};
use chrono::Utc;
use dualagent_core::config::AppConfig;
use dualagent_core::models::context::IngestContext;
use dualagent_core::models::record::Record;
use dualagent_core::ports::ingest::{BufferedIngest, Ingest};
use dualagent_core::ports::storage::MetricStore;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::passthrough::PassthroughIngest;
use crate::status::{recent_line, section};
use crate::wiring::{self, Pipeline};

/// 테스트 레코드 trace ID 접두사
pub const TRACE_PREFIX: &str = "dualagent-test-";

/// `test` 옵션
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfTestOptions {
    /// composite 없이 DB 싱크만 점검
    pub direct: bool,
    /// 끝난 뒤 테스트 레코드 삭제
    pub cleanup: bool,
    /// 필터/샘플링 해제
    pub no_filters: bool,
}

/// 점검 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfTestReport {
    /// 저장이 확인된 테스트 레코드 수
    pub stored: usize,
    /// 삭제한 테스트 레코드 수
    pub deleted: usize,
    /// composite 경로 점검 여부
    pub composite_checked: bool,
}

/// 자체 점검 실행
pub async fn run(
    mut config: AppConfig,
    context: IngestContext,
    options: SelfTestOptions,
) -> Result<SelfTestReport> {
    println!("🧪 dualagent 파이프라인 점검...");

    if options.no_filters {
        disable_filters(&mut config);
        println!("🔧 필터 해제: 모든 이벤트 타입 100% 샘플링");
    }

    section("📋 설정");
    println!("   수집 활성화    {}", if config.enabled { "✅" } else { "❌" });
    println!("   버퍼 크기      {}", config.buffer_size);
    println!("   샘플링 비율:");
    for event_type in ["request", "query", "exception", "log", "test"] {
        println!(
            "     • {event_type}: {}%",
            config.filters.sampling_rate(event_type) * 100.0
        );
    }

    section("🗄️  데이터베이스 연결");
    let storage = wiring::open_storage(&config).context("데이터베이스 연결 실패")?;
    storage.ping().await.context("데이터베이스 ping 실패")?;
    println!("✅ 데이터베이스 연결 성공");
    for table in ["dual_agent_metrics", "dual_agent_aggregated_metrics"] {
        let exists = storage.table_exists(table)?;
        println!("   {table}: {}", if exists { "✅" } else { "❌" });
    }

    let pipeline = Pipeline::assemble(
        &config,
        storage.clone(),
        context,
        Arc::new(PassthroughIngest::discard()),
    );

    section("💾 DB 싱크");
    println!("   활성화         {}", if pipeline.database.is_enabled() { "✅" } else { "❌" });
    println!("   버퍼 크기      {}", pipeline.database.buffer_size());
    println!("   버퍼 건수      {}", pipeline.database.buffer_count().await?);
    pipeline.database.ping().await.context("DB 싱크 ping 실패")?;
    println!("✅ DB 싱크 ping 성공");

    let composite_checked = !options.direct;
    if composite_checked {
        section("🔄 Composite 싱크");
        let record = test_record(json!({
            "t": "test",
            "message": "composite ingest test",
            "trace": trace_id("composite"),
        }));
        pipeline.ingest.write(&record).await?;
        let digested = pipeline.ingest.digest().await?;
        println!("✅ composite write + digest 완료 ({digested}건)");
    }

    section("📊 테스트 메트릭 생성");
    let records = sample_records();
    for record in &records {
        println!("📝 {} 레코드 기록...", record.type_tag());
    }
    pipeline.database.write_now(&records).await?;
    println!("✅ 테스트 메트릭 기록 완료");

    section("✅ 저장 확인");
    let stored = storage.metrics_by_trace_prefix(TRACE_PREFIX)?;
    println!("📊 테스트 레코드: {}건 / 전체 {}건", stored.len(), storage.count_metrics()?);
    for metric in stored.iter().take(5) {
        println!("   • {}", recent_line(metric));
    }
    if stored.is_empty() {
        println!("⚠️  저장된 테스트 레코드 없음 (샘플링 확인: --no-filters)");
    }

    let mut deleted = 0;
    if options.cleanup {
        section("🧹 테스트 데이터 정리");
        deleted = storage.delete_metrics_by_trace_prefix(TRACE_PREFIX)?;
        println!("🗑️  테스트 레코드 {deleted}건 삭제");
    }

    section("📋 요약");
    println!(
        "   DB 저장        {}",
        if stored.is_empty() { "❌ 데이터 없음" } else { "✅ 정상" }
    );
    println!(
        "   이중 기록      {}",
        if composite_checked { "✅ 점검됨" } else { "⚠️  DB 단독 (--direct)" }
    );

    Ok(SelfTestReport {
        stored: stored.len(),
        deleted,
        composite_checked,
    })
}

/// 샘플링 1.0, 허용/거부 목록 비움
fn disable_filters(config: &mut AppConfig) {
    config.filters.event_types.clear();
    config.filters.disabled_types.clear();
    for rate in config.filters.sampling_rates.values_mut() {
        *rate = 1.0;
    }
}

fn trace_id(kind: &str) -> String {
    format!("{TRACE_PREFIX}{kind}-{}", Uuid::new_v4().simple())
}

fn test_record(mut value: Value) -> Record {
    if let Value::Object(fields) = &mut value {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        fields.insert("timestamp".to_string(), json!(now));
    }
    Record::from_value(value).unwrap_or_default()
}

/// 카테고리별 합성 레코드
fn sample_records() -> Vec<Record> {
    vec![
        test_record(json!({
            "t": "request",
            "method": "GET",
            "url": "/dualagent-test-request",
            "status_code": 200,
            "duration": 125.5,
            "trace": trace_id("request"),
        })),
        test_record(json!({
            "t": "query",
            "sql": "SELECT * FROM users LIMIT 10",
            "connection": "sqlite",
            "duration": 15.2,
            "trace": trace_id("query"),
        })),
        test_record(json!({
            "t": "exception",
            "class": "TestException",
            "message": "synthetic exception",
            "file": "/test/file.rs",
            "line": 123,
            "trace": trace_id("exception"),
        })),
        test_record(json!({
            "t": "log",
            "level": "info",
            "message": "synthetic log message",
            "context": {"test": true},
            "trace": trace_id("log"),
        })),
        test_record(json!({
            "t": "test",
            "message": "direct write from dualagent test",
            "test_data": {"batch": "test-metrics", "version": "1.0.0"},
            "trace": trace_id("custom"),
        })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default_config();
        config.database.path = Some(dir.path().join("selftest.db"));
        config
    }

    #[tokio::test]
    async fn no_filters_stores_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let options = SelfTestOptions {
            direct: false,
            cleanup: false,
            no_filters: true,
        };

        let report = run(config_in(&dir), IngestContext::default(), options)
            .await
            .unwrap();
        // 샘플 5건 + composite 1건
        assert_eq!(report.stored, 6);
        assert!(report.composite_checked);
    }

    #[tokio::test]
    async fn cleanup_removes_test_rows() {
        let dir = tempfile::tempdir().unwrap();
        let options = SelfTestOptions {
            direct: true,
            cleanup: true,
            no_filters: true,
        };

        let report = run(config_in(&dir), IngestContext::default(), options)
            .await
            .unwrap();
        assert_eq!(report.stored, 5);
        assert_eq!(report.deleted, 5);
        assert!(!report.composite_checked);
    }

    #[test]
    fn disable_filters_opens_every_type() {
        let mut config = AppConfig::default_config();
        config.filters.disabled_types = vec!["log".to_string()];
        disable_filters(&mut config);
        assert!(config.filters.disabled_types.is_empty());
        assert!(config
            .filters
            .sampling_rates
            .values()
            .all(|rate| (*rate - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn sample_traces_share_prefix() {
        for record in sample_records() {
            let trace = record.get("trace").and_then(Value::as_str).unwrap();
            assert!(trace.starts_with(TRACE_PREFIX));
        }
    }
}
