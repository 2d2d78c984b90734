//! 메트릭 저장소 포트.
//!
//! 구현: `dualagent-storage` crate (rusqlite)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::models::aggregate::{AggregateKey, AggregatedMetricRow};
use crate::models::metric::{MetricRow, StoredMetric};

/// 메트릭 저장소
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// 연결 확인 (자명한 쿼리 실행)
    async fn ping(&self) -> Result<(), CoreError>;

    /// 메트릭 행 저장. 생성된 id 반환
    async fn store(&self, row: &MetricRow) -> Result<i64, CoreError>;

    /// [from, to) 구간의 메트릭 행을 id 순으로 조회 (keyset 페이지네이션)
    ///
    /// `after_id`보다 큰 id만 반환하며 최대 `limit`건.
    async fn rows_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMetric>, CoreError>;

    /// 집계 행 저장 (같은 키가 있으면 교체)
    async fn upsert_aggregate(&self, row: &AggregatedMetricRow) -> Result<(), CoreError>;

    /// 집계 행 조회
    async fn get_aggregate(
        &self,
        key: &AggregateKey,
    ) -> Result<Option<AggregatedMetricRow>, CoreError>;

    /// 보존 기간이 지난 메트릭 행 삭제 (배치 단위). 삭제 건수 반환
    async fn delete_older_than(
        &self,
        retention_days: u32,
        batch_size: usize,
    ) -> Result<usize, CoreError>;
}
