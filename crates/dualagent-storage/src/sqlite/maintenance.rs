use chrono::{DateTime, Duration, Utc};
use dualagent_core::error::CoreError;
use dualagent_core::models::metric::StoredMetric;

use super::metrics::{row_to_metric, SELECT_COLUMNS};
use super::{format_timestamp, parse_timestamp, query_error, SqliteStorage};
use crate::migration;

/// 상태 출력용 저장소 요약
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSummary {
    pub schema_version: u32,
    pub total_metrics: u64,
    pub last_hour: u64,
    pub last_day: u64,
    pub buffered: u64,
    pub latest_event_at: Option<DateTime<Utc>>,
}

impl SqliteStorage {
    pub fn table_exists(&self, name: &str) -> Result<bool, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .map_err(query_error)
    }

    pub fn schema_version(&self) -> Result<u32, CoreError> {
        let conn = self.lock()?;
        migration::get_version(&conn).map_err(query_error)
    }

    pub fn count_metrics(&self) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM dual_agent_metrics", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(query_error)
    }

    /// `since` 이후 이벤트 수
    pub fn count_metrics_since(&self, since: DateTime<Utc>) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM dual_agent_metrics WHERE event_timestamp >= ?1",
            [format_timestamp(since)],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(query_error)
    }

    /// 이벤트 타입별 건수 (많은 순)
    pub fn event_type_counts(&self, limit: usize) -> Result<Vec<(String, u64)>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT event_type, COUNT(*) AS cnt FROM dual_agent_metrics
                 GROUP BY event_type
                 ORDER BY cnt DESC, event_type ASC
                 LIMIT ?1",
            )
            .map_err(|e| CoreError::Storage(format!("쿼리 준비 실패: {e}")))?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .map_err(query_error)?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row.map_err(|e| CoreError::Storage(format!("행 읽기 실패: {e}")))?);
        }
        Ok(counts)
    }

    /// 최근 메트릭 (최신순)
    pub fn recent_metrics(&self, limit: usize) -> Result<Vec<StoredMetric>, CoreError> {
        let conn = self.lock()?;
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM dual_agent_metrics ORDER BY id DESC LIMIT ?1");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::Storage(format!("쿼리 준비 실패: {e}")))?;

        let rows = stmt
            .query_map([limit as i64], row_to_metric)
            .map_err(query_error)?;

        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row.map_err(|e| CoreError::Storage(format!("행 읽기 실패: {e}")))?);
        }
        Ok(metrics)
    }

    /// trace id 접두사로 메트릭 조회 (자체 테스트 검증용)
    pub fn metrics_by_trace_prefix(&self, prefix: &str) -> Result<Vec<StoredMetric>, CoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM dual_agent_metrics WHERE trace_id LIKE ?1 || '%' ORDER BY id"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CoreError::Storage(format!("쿼리 준비 실패: {e}")))?;

        let rows = stmt.query_map([prefix], row_to_metric).map_err(query_error)?;

        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row.map_err(|e| CoreError::Storage(format!("행 읽기 실패: {e}")))?);
        }
        Ok(metrics)
    }

    /// trace id 접두사로 메트릭 삭제 (자체 테스트 정리)
    pub fn delete_metrics_by_trace_prefix(&self, prefix: &str) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM dual_agent_metrics WHERE trace_id LIKE ?1 || '%'",
            [prefix],
        )
        .map_err(query_error)
    }

    /// 상태 요약
    pub fn summary(&self) -> Result<StorageSummary, CoreError> {
        let now = Utc::now();
        let last_hour = self.count_metrics_since(now - Duration::hours(1))?;
        let last_day = self.count_metrics_since(now - Duration::days(1))?;
        let total_metrics = self.count_metrics()?;
        let schema_version = self.schema_version()?;

        let conn = self.lock()?;
        let buffered = conn
            .query_row("SELECT COUNT(*) FROM ingest_buffer", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(query_error)? as u64;
        let latest: Option<String> = conn
            .query_row(
                "SELECT MAX(event_timestamp) FROM dual_agent_metrics",
                [],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        let latest_event_at = latest
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e| CoreError::Storage(format!("타임스탬프 해석 실패: {e}")))?;

        Ok(StorageSummary {
            schema_version,
            total_metrics,
            last_hour,
            last_day,
            buffered,
            latest_event_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualagent_core::models::metric::{MetricDetail, MetricRow};
    use dualagent_core::models::record::EventType;
    use dualagent_core::ports::storage::MetricStore;
    use serde_json::{Map, Value};

    fn row(event_type: &str, trace_id: Option<&str>) -> MetricRow {
        MetricRow {
            event_type: EventType::from_tag(event_type),
            event_timestamp: Utc::now(),
            trace_id: trace_id.map(str::to_string),
            session_id: None,
            user_id: None,
            environment: None,
            server_name: None,
            app_version: None,
            detail: MetricDetail::Custom {
                metadata: Map::new(),
            },
            raw_payload: Value::Null,
        }
    }

    #[tokio::test]
    async fn counts_and_summary() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.store(&row("notification", None)).await.unwrap();
        storage.store(&row("notification", None)).await.unwrap();
        storage.store(&row("test", None)).await.unwrap();

        assert_eq!(
            storage.event_type_counts(5).unwrap(),
            vec![("notification".to_string(), 2), ("test".to_string(), 1)]
        );

        let summary = storage.summary().unwrap();
        assert_eq!(summary.total_metrics, 3);
        assert_eq!(summary.last_hour, 3);
        assert_eq!(summary.buffered, 0);
        assert_eq!(summary.schema_version, migration::CURRENT_VERSION);
        assert!(summary.latest_event_at.is_some());

        assert_eq!(storage.recent_metrics(2).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn trace_prefix_cleanup() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .store(&row("test", Some("dualagent-test-abc")))
            .await
            .unwrap();
        storage.store(&row("test", Some("other"))).await.unwrap();

        assert_eq!(
            storage
                .metrics_by_trace_prefix("dualagent-test-")
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            storage
                .delete_metrics_by_trace_prefix("dualagent-test-")
                .unwrap(),
            1
        );
        assert_eq!(storage.count_metrics().unwrap(), 1);
    }
}
