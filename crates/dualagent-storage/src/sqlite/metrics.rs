//! 메트릭 스토리지 (MetricStore 포트 구현).
//!
//! 메트릭 행은 카테고리별 컬럼으로 펼쳐 저장한다. 카테고리에 해당하지 않는
//! 컬럼은 NULL로 남는다.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dualagent_core::error::CoreError;
use dualagent_core::models::aggregate::{AggregateKey, AggregatedMetricRow};
use dualagent_core::models::metric::{
    CacheMetrics, ExceptionMetrics, JobMetrics, LogMetrics, MailMetrics, MetricDetail, MetricRow,
    QueryMetrics, RequestMetrics, StageDurations, StoredMetric,
};
use dualagent_core::models::record::EventType;
use dualagent_core::ports::storage::MetricStore;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    format_timestamp, query_error, sql_int_opt, timestamp_column, uint_column, SqliteStorage,
};

/// `id` + 저장 컬럼 (INSERT 순서와 동일)
pub(super) const SELECT_COLUMNS: &str = "id, event_type, event_timestamp, trace_id, session_id, user_id, environment, server_name, app_version,
    method, url, route_name, route_path, status_code, duration, memory_usage, request_size, response_size,
    bootstrap_time, before_middleware_time, action_time, render_time, after_middleware_time, terminating_time,
    sql_query, connection_name, query_time, bindings,
    exception_class, exception_message, file, line, stack_trace,
    job_class, queue, job_status, attempts, job_duration,
    cache_key, cache_operation, cache_store,
    mail_class, mail_to, mail_subject,
    log_level, log_message, log_context,
    custom_metadata, raw_payload";

const INSERT_SQL: &str = "INSERT INTO dual_agent_metrics (
    event_type, event_timestamp, trace_id, session_id, user_id, environment, server_name, app_version,
    method, url, route_name, route_path, status_code, duration, memory_usage, request_size, response_size,
    bootstrap_time, before_middleware_time, action_time, render_time, after_middleware_time, terminating_time,
    sql_query, connection_name, query_time, bindings,
    exception_class, exception_message, file, line, stack_trace,
    job_class, queue, job_status, attempts, job_duration,
    cache_key, cache_operation, cache_store,
    mail_class, mail_to, mail_subject,
    log_level, log_message, log_context,
    custom_metadata, raw_payload
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
    ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
    ?18, ?19, ?20, ?21, ?22, ?23,
    ?24, ?25, ?26, ?27,
    ?28, ?29, ?30, ?31, ?32,
    ?33, ?34, ?35, ?36, ?37,
    ?38, ?39, ?40,
    ?41, ?42, ?43,
    ?44, ?45, ?46,
    ?47, ?48
)";

/// 카테고리 상세 필드를 컬럼 값으로 펼친 것
#[derive(Default)]
struct DetailColumns {
    method: Option<String>,
    url: Option<String>,
    route_name: Option<String>,
    route_path: Option<String>,
    status_code: Option<i64>,
    duration: Option<f64>,
    memory_usage: Option<i64>,
    request_size: Option<i64>,
    response_size: Option<i64>,
    stages: StageDurations,
    sql_query: Option<String>,
    connection_name: Option<String>,
    query_time: Option<f64>,
    bindings: Option<String>,
    exception_class: Option<String>,
    exception_message: Option<String>,
    file: Option<String>,
    line: Option<i64>,
    stack_trace: Option<String>,
    job_class: Option<String>,
    queue: Option<String>,
    job_status: Option<String>,
    attempts: Option<i64>,
    job_duration: Option<f64>,
    cache_key: Option<String>,
    cache_operation: Option<String>,
    cache_store: Option<String>,
    mail_class: Option<String>,
    mail_to: Option<String>,
    mail_subject: Option<String>,
    log_level: Option<String>,
    log_message: Option<String>,
    log_context: Option<String>,
    custom_metadata: Option<String>,
}

fn json_text(value: &Option<Value>) -> Result<Option<String>, CoreError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(CoreError::from)
}

impl DetailColumns {
    fn from_detail(detail: &MetricDetail) -> Result<Self, CoreError> {
        let mut cols = Self::default();
        match detail {
            MetricDetail::Request(r) => {
                cols.method = r.method.clone();
                cols.url = r.url.clone();
                cols.route_name = r.route_name.clone();
                cols.route_path = r.route_path.clone();
                cols.status_code = r.status_code.map(i64::from);
                cols.duration = r.duration;
                cols.memory_usage = sql_int_opt("memory_usage", r.memory_usage)?;
                cols.request_size = sql_int_opt("request_size", r.request_size)?;
                cols.response_size = sql_int_opt("response_size", r.response_size)?;
                cols.stages = r.stages.clone();
            }
            MetricDetail::Query(q) => {
                cols.sql_query = q.sql.clone();
                cols.connection_name = q.connection.clone();
                cols.query_time = q.duration;
                cols.bindings = json_text(&q.bindings)?;
            }
            MetricDetail::Exception(e) => {
                cols.exception_class = e.class.clone();
                cols.exception_message = e.message.clone();
                cols.file = e.file.clone();
                cols.line = e.line.map(i64::from);
                cols.stack_trace = json_text(&e.trace)?;
            }
            MetricDetail::Job(j) => {
                cols.job_class = j.job_class.clone();
                cols.queue = j.queue.clone();
                cols.job_status = Some(j.status.clone());
                cols.attempts = j.attempts.map(i64::from);
                cols.job_duration = j.duration;
            }
            MetricDetail::Cache(c) => {
                cols.cache_key = c.key.clone();
                cols.cache_operation = c.operation.clone();
                cols.cache_store = c.store.clone();
            }
            MetricDetail::Mail(m) => {
                cols.mail_class = m.mail_class.clone();
                cols.mail_to = json_text(&m.to)?;
                cols.mail_subject = m.subject.clone();
            }
            MetricDetail::Log(l) => {
                cols.log_level = l.level.clone();
                cols.log_message = l.message.clone();
                cols.log_context = json_text(&l.context)?;
            }
            MetricDetail::Custom { metadata } => {
                cols.custom_metadata = Some(serde_json::to_string(metadata)?);
            }
        }
        Ok(cols)
    }
}

fn parse_json(raw: Option<String>) -> Option<Value> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}

/// DB 행 → 저장된 메트릭 (`SELECT_COLUMNS` 순서)
pub(super) fn row_to_metric(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMetric> {
    let event_type = EventType::from_tag(&row.get::<_, String>(1)?);
    let event_timestamp = timestamp_column(row, 2)?;

    let detail = match &event_type {
        EventType::Request => MetricDetail::Request(RequestMetrics {
            method: row.get(9)?,
            url: row.get(10)?,
            route_name: row.get(11)?,
            route_path: row.get(12)?,
            status_code: uint_column(row, 13)?,
            duration: row.get(14)?,
            memory_usage: uint_column(row, 15)?,
            request_size: uint_column(row, 16)?,
            response_size: uint_column(row, 17)?,
            stages: StageDurations {
                bootstrap: row.get(18)?,
                before_middleware: row.get(19)?,
                action: row.get(20)?,
                render: row.get(21)?,
                after_middleware: row.get(22)?,
                terminating: row.get(23)?,
            },
        }),
        EventType::Query => MetricDetail::Query(QueryMetrics {
            sql: row.get(24)?,
            connection: row.get(25)?,
            duration: row.get(26)?,
            bindings: parse_json(row.get(27)?),
        }),
        EventType::Exception => MetricDetail::Exception(ExceptionMetrics {
            class: row.get(28)?,
            message: row.get(29)?,
            file: row.get(30)?,
            line: uint_column(row, 31)?,
            trace: parse_json(row.get(32)?),
        }),
        EventType::Job | EventType::QueuedJob => MetricDetail::Job(JobMetrics {
            job_class: row.get(33)?,
            queue: row.get(34)?,
            status: row
                .get::<_, Option<String>>(35)?
                .unwrap_or_else(|| "queued".to_string()),
            attempts: uint_column(row, 36)?,
            duration: row.get(37)?,
        }),
        EventType::Cache => MetricDetail::Cache(CacheMetrics {
            key: row.get(38)?,
            operation: row.get(39)?,
            store: row.get(40)?,
        }),
        EventType::Mail => MetricDetail::Mail(MailMetrics {
            mail_class: row.get(41)?,
            to: parse_json(row.get(42)?),
            subject: row.get(43)?,
        }),
        EventType::Log => MetricDetail::Log(LogMetrics {
            level: row.get(44)?,
            message: row.get(45)?,
            context: parse_json(row.get(46)?),
        }),
        _ => MetricDetail::Custom {
            metadata: match parse_json(row.get(47)?) {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            },
        },
    };

    Ok(StoredMetric {
        id: row.get(0)?,
        row: MetricRow {
            event_type,
            event_timestamp,
            trace_id: row.get(3)?,
            session_id: row.get(4)?,
            user_id: row.get(5)?,
            environment: row.get(6)?,
            server_name: row.get(7)?,
            app_version: row.get(8)?,
            detail,
            raw_payload: parse_json(row.get(48)?).unwrap_or(Value::Null),
        },
    })
}

impl SqliteStorage {
    /// 메트릭 행 한 건 INSERT (동기)
    pub(crate) fn insert_metric(
        conn: &rusqlite::Connection,
        row: &MetricRow,
    ) -> Result<i64, CoreError> {
        let cols = DetailColumns::from_detail(&row.detail)?;
        let raw_payload = serde_json::to_string(&row.raw_payload)?;

        conn.execute(
            INSERT_SQL,
            rusqlite::params![
                row.event_type.as_str(),
                format_timestamp(row.event_timestamp),
                row.trace_id,
                row.session_id,
                row.user_id,
                row.environment,
                row.server_name,
                row.app_version,
                cols.method,
                cols.url,
                cols.route_name,
                cols.route_path,
                cols.status_code,
                cols.duration,
                cols.memory_usage,
                cols.request_size,
                cols.response_size,
                cols.stages.bootstrap,
                cols.stages.before_middleware,
                cols.stages.action,
                cols.stages.render,
                cols.stages.after_middleware,
                cols.stages.terminating,
                cols.sql_query,
                cols.connection_name,
                cols.query_time,
                cols.bindings,
                cols.exception_class,
                cols.exception_message,
                cols.file,
                cols.line,
                cols.stack_trace,
                cols.job_class,
                cols.queue,
                cols.job_status,
                cols.attempts,
                cols.job_duration,
                cols.cache_key,
                cols.cache_operation,
                cols.cache_store,
                cols.mail_class,
                cols.mail_to,
                cols.mail_subject,
                cols.log_level,
                cols.log_message,
                cols.log_context,
                cols.custom_metadata,
                raw_payload,
            ],
        )
        .map_err(|e| CoreError::Storage(format!("메트릭 저장 실패: {e}")))?;

        Ok(conn.last_insert_rowid())
    }

    /// 보존 기간 삭제 한 배치
    fn delete_batch(&self, cutoff: &str, batch_size: usize) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM dual_agent_metrics WHERE id IN (
                SELECT id FROM dual_agent_metrics
                WHERE event_timestamp < ?1
                ORDER BY id
                LIMIT ?2
            )",
            rusqlite::params![cutoff, batch_size as i64],
        )
        .map_err(|e| CoreError::Storage(format!("보존 기간 삭제 실패: {e}")))
    }
}

#[async_trait]
impl MetricStore for SqliteStorage {
    async fn ping(&self) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| CoreError::Connectivity(format!("SQLite 응답 없음: {e}")))
    }

    async fn store(&self, row: &MetricRow) -> Result<i64, CoreError> {
        let conn = self.lock()?;
        let id = Self::insert_metric(&conn, row)?;
        debug!("메트릭 저장: id={id}, type={}", row.event_type);
        Ok(id)
    }

    async fn rows_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMetric>, CoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM dual_agent_metrics
             WHERE event_timestamp >= ?1 AND event_timestamp < ?2 AND id > ?3
             ORDER BY id
             LIMIT ?4"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::Storage(format!("쿼리 준비 실패: {e}")))?;

        let rows = stmt
            .query_map(
                rusqlite::params![
                    format_timestamp(from),
                    format_timestamp(to),
                    after_id,
                    limit as i64
                ],
                row_to_metric,
            )
            .map_err(query_error)?;

        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row.map_err(|e| CoreError::Storage(format!("행 읽기 실패: {e}")))?);
        }
        Ok(metrics)
    }

    async fn upsert_aggregate(&self, row: &AggregatedMetricRow) -> Result<(), CoreError> {
        let mut conn = self.lock()?;
        Self::replace_aggregate(&mut conn, row)
    }

    async fn get_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Option<AggregatedMetricRow>, CoreError> {
        let conn = self.lock()?;
        Self::load_aggregate(&conn, key)
    }

    async fn delete_older_than(
        &self,
        retention_days: u32,
        batch_size: usize,
    ) -> Result<usize, CoreError> {
        let cutoff = format_timestamp(Utc::now() - Duration::days(i64::from(retention_days)));
        let batch_size = batch_size.max(1);
        let mut total = 0usize;

        loop {
            // 배치마다 잠금을 풀어 수집 경로가 끼어들 수 있게 한다
            let deleted = self.delete_batch(&cutoff, batch_size)?;
            total += deleted;
            if deleted < batch_size {
                break;
            }
            tokio::task::yield_now().await;
        }

        if total > 0 {
            info!("보존 기간({retention_days}일) 초과 메트릭 {total}건 삭제");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn base_row(event_type: EventType, detail: MetricDetail) -> MetricRow {
        MetricRow {
            event_type,
            event_timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 10, 15, 0).unwrap(),
            trace_id: Some("trace-1".to_string()),
            session_id: Some("sess".to_string()),
            user_id: Some("7".to_string()),
            environment: Some("testing".to_string()),
            server_name: Some("web-1".to_string()),
            app_version: Some("1.0.0".to_string()),
            detail,
            raw_payload: json!({"t": "request"}),
        }
    }

    fn request_row(at: DateTime<Utc>) -> MetricRow {
        let mut row = base_row(
            EventType::Request,
            MetricDetail::Request(RequestMetrics {
                method: Some("GET".to_string()),
                url: Some("/x".to_string()),
                status_code: Some(200),
                duration: Some(125.5),
                ..Default::default()
            }),
        );
        row.event_timestamp = at;
        row
    }

    #[tokio::test]
    async fn store_and_read_back_request() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 10, 15, 0).unwrap();
        let id = storage.store(&request_row(at)).await.unwrap();
        assert!(id > 0);

        let rows = storage
            .rows_in_window(at, at + Duration::hours(1), 0, 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row, request_row(at));

        // 요청 외 카테고리 컬럼은 NULL
        let conn = storage.lock().unwrap();
        let (job, mail, cache): (Option<String>, Option<String>, Option<String>) = conn
            .query_row(
                "SELECT job_class, mail_class, cache_key FROM dual_agent_metrics WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((job, mail, cache), (None, None, None));
    }

    #[tokio::test]
    async fn custom_metadata_roundtrip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut metadata = Map::new();
        metadata.insert("foo".to_string(), json!("bar"));
        let row = base_row(
            EventType::Custom("custom_widget".to_string()),
            MetricDetail::Custom { metadata },
        );
        storage.store(&row).await.unwrap();

        let from = row.event_timestamp;
        let rows = storage
            .rows_in_window(from, from + Duration::seconds(1), 0, 10)
            .await
            .unwrap();
        assert_eq!(rows[0].row.detail, row.detail);
        assert_eq!(rows[0].row.event_type.as_str(), "custom_widget");
    }

    #[tokio::test]
    async fn window_is_half_open_and_paginated() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        for minute in 0..5 {
            storage
                .store(&request_row(start + Duration::minutes(minute)))
                .await
                .unwrap();
        }
        // 구간 끝 시각은 제외
        storage
            .store(&request_row(start + Duration::hours(1)))
            .await
            .unwrap();

        let end = start + Duration::hours(1);
        let first = storage.rows_in_window(start, end, 0, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        let last_id = first.last().unwrap().id;
        let second = storage.rows_in_window(start, end, last_id, 3).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|m| m.id > last_id));
    }

    #[tokio::test]
    async fn delete_older_than_runs_in_batches() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let old = Utc::now() - Duration::days(40);
        for _ in 0..7 {
            storage.store(&request_row(old)).await.unwrap();
        }
        storage.store(&request_row(Utc::now())).await.unwrap();

        let deleted = storage.delete_older_than(30, 3).await.unwrap();
        assert_eq!(deleted, 7);
        assert_eq!(storage.count_metrics().unwrap(), 1);

        assert_eq!(storage.delete_older_than(30, 3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_unsigned_values_are_rejected_not_wrapped() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 10, 15, 0).unwrap();

        let mut row = request_row(at);
        if let MetricDetail::Request(request) = &mut row.detail {
            request.memory_usage = Some(10_000_000_000_000_000_000);
        }
        assert!(matches!(storage.store(&row).await, Err(CoreError::Storage(_))));
        assert_eq!(storage.count_metrics().unwrap(), 0);

        // i64 상한까지는 그대로 왕복
        let mut row = request_row(at);
        if let MetricDetail::Request(request) = &mut row.detail {
            request.memory_usage = Some(i64::MAX as u64);
            request.response_size = Some(4096);
        }
        storage.store(&row).await.unwrap();
        let rows = storage
            .rows_in_window(at, at + Duration::seconds(1), 0, 10)
            .await
            .unwrap();
        assert_eq!(rows[0].row, row);
    }

    #[tokio::test]
    async fn corrupt_columns_fail_the_read() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 10, 15, 0).unwrap();
        let id = storage.store(&request_row(at)).await.unwrap();

        storage
            .lock()
            .unwrap()
            .execute(
                "UPDATE dual_agent_metrics SET memory_usage = -5 WHERE id = ?1",
                [id],
            )
            .unwrap();
        assert!(storage
            .rows_in_window(at, at + Duration::seconds(1), 0, 10)
            .await
            .is_err());

        storage
            .lock()
            .unwrap()
            .execute(
                "UPDATE dual_agent_metrics
                 SET memory_usage = NULL, event_timestamp = '2026-02-01 10:15:00x'
                 WHERE id = ?1",
                [id],
            )
            .unwrap();
        assert!(storage
            .rows_in_window(at, at + Duration::seconds(1), 0, 10)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert!(storage.ping().await.is_ok());
    }
}
