//! 집계 행 저장.
//!
//! `metric_hour`가 NULL인 일/주 단위 행은 UNIQUE 제약으로 충돌이 잡히지 않으므로
//! 같은 키의 기존 행을 지우고 새로 넣는 방식으로 교체한다.

use chrono::NaiveDate;
use dualagent_core::error::CoreError;
use dualagent_core::models::aggregate::{AggregateKey, AggregatedMetricRow, ExceptionCount};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{query_error, sql_int, sql_int_opt, uint_column, SqliteStorage};

const DATE_FORMAT: &str = "%Y-%m-%d";

impl SqliteStorage {
    /// 같은 키의 집계 행을 교체 (한 트랜잭션)
    pub(super) fn replace_aggregate(
        conn: &mut Connection,
        row: &AggregatedMetricRow,
    ) -> Result<(), CoreError> {
        let key = &row.key;
        let date = key.date.format(DATE_FORMAT).to_string();
        let hour = key.hour.map(i64::from);
        let top_exceptions = serde_json::to_string(
            &row.top_exceptions
                .iter()
                .map(|e| (e.class.as_str(), e.count))
                .collect::<Vec<_>>(),
        )?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| CoreError::Storage(format!("트랜잭션 시작 실패: {e}")))?;

        tx.execute(
            "DELETE FROM dual_agent_aggregated_metrics
             WHERE granularity = ?1 AND event_type = ?2 AND metric_date = ?3 AND metric_hour IS ?4",
            rusqlite::params![key.granularity.as_str(), key.event_type, date, hour],
        )
        .map_err(query_error)?;

        tx.execute(
            "INSERT INTO dual_agent_aggregated_metrics (
                granularity, event_type, metric_date, metric_hour,
                total_events, unique_users, unique_sessions,
                avg_duration, min_duration, max_duration, p95_duration, p99_duration,
                status_2xx, status_3xx, status_4xx, status_5xx,
                total_queries, avg_query_duration,
                total_exceptions, top_exceptions,
                jobs_queued, jobs_completed, jobs_failed,
                avg_memory_usage, peak_memory_usage
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16,
                ?17, ?18,
                ?19, ?20,
                ?21, ?22, ?23,
                ?24, ?25
            )",
            rusqlite::params![
                key.granularity.as_str(),
                key.event_type,
                date,
                hour,
                sql_int("total_events", row.total_events)?,
                sql_int("unique_users", row.unique_users)?,
                sql_int("unique_sessions", row.unique_sessions)?,
                row.avg_duration,
                row.min_duration,
                row.max_duration,
                row.p95_duration,
                row.p99_duration,
                sql_int("status_2xx", row.status_2xx)?,
                sql_int("status_3xx", row.status_3xx)?,
                sql_int("status_4xx", row.status_4xx)?,
                sql_int("status_5xx", row.status_5xx)?,
                sql_int("total_queries", row.total_queries)?,
                row.avg_query_duration,
                sql_int("total_exceptions", row.total_exceptions)?,
                top_exceptions,
                sql_int("jobs_queued", row.jobs_queued)?,
                sql_int("jobs_completed", row.jobs_completed)?,
                sql_int("jobs_failed", row.jobs_failed)?,
                sql_int_opt("avg_memory_usage", row.avg_memory_usage)?,
                sql_int_opt("peak_memory_usage", row.peak_memory_usage)?,
            ],
        )
        .map_err(|e| CoreError::Storage(format!("집계 행 저장 실패: {e}")))?;

        tx.commit()
            .map_err(|e| CoreError::Storage(format!("트랜잭션 커밋 실패: {e}")))?;

        debug!(
            "집계 행 저장: {} {} {} {:?}",
            key.granularity, key.event_type, key.date, key.hour
        );
        Ok(())
    }

    pub(super) fn load_aggregate(
        conn: &Connection,
        key: &AggregateKey,
    ) -> Result<Option<AggregatedMetricRow>, CoreError> {
        let date = key.date.format(DATE_FORMAT).to_string();
        let hour = key.hour.map(i64::from);

        conn.query_row(
            "SELECT total_events, unique_users, unique_sessions,
                    avg_duration, min_duration, max_duration, p95_duration, p99_duration,
                    status_2xx, status_3xx, status_4xx, status_5xx,
                    total_queries, avg_query_duration,
                    total_exceptions, top_exceptions,
                    jobs_queued, jobs_completed, jobs_failed,
                    avg_memory_usage, peak_memory_usage
             FROM dual_agent_aggregated_metrics
             WHERE granularity = ?1 AND event_type = ?2 AND metric_date = ?3 AND metric_hour IS ?4",
            rusqlite::params![key.granularity.as_str(), key.event_type, date, hour],
            |row| {
                let count = |idx: usize| -> rusqlite::Result<u64> {
                    Ok(uint_column(row, idx)?.unwrap_or(0))
                };
                let top_raw: String = row.get(15)?;
                let top_exceptions = serde_json::from_str::<Vec<(String, u64)>>(&top_raw)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(class, count)| ExceptionCount { class, count })
                    .collect();

                Ok(AggregatedMetricRow {
                    key: key.clone(),
                    total_events: count(0)?,
                    unique_users: count(1)?,
                    unique_sessions: count(2)?,
                    avg_duration: row.get(3)?,
                    min_duration: row.get(4)?,
                    max_duration: row.get(5)?,
                    p95_duration: row.get(6)?,
                    p99_duration: row.get(7)?,
                    status_2xx: count(8)?,
                    status_3xx: count(9)?,
                    status_4xx: count(10)?,
                    status_5xx: count(11)?,
                    total_queries: count(12)?,
                    avg_query_duration: row.get(13)?,
                    total_exceptions: count(14)?,
                    top_exceptions,
                    jobs_queued: count(16)?,
                    jobs_completed: count(17)?,
                    jobs_failed: count(18)?,
                    avg_memory_usage: uint_column(row, 19)?,
                    peak_memory_usage: uint_column(row, 20)?,
                })
            },
        )
        .optional()
        .map_err(query_error)
    }

    /// 특정 날짜의 집계 행 수 (상태 출력용)
    pub fn count_aggregates_on(&self, date: NaiveDate) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM dual_agent_aggregated_metrics WHERE metric_date = ?1",
            [date.format(DATE_FORMAT).to_string()],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(query_error)
    }
}
