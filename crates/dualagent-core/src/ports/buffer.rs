//! 레코드 버퍼 포트.
//!
//! 구현:
//! - `dualagent-pipeline::database_ingest::MemoryBuffer` (프로세스 로컬)
//! - `dualagent-storage::sqlite::SqliteBuffer` (프로세스 간 공유, TTL 적용)
//!
//! 추가와 "가득 차면 비우기"는 한 번의 원자적 연산이다. 동시에 여러 작업자가
//! 추가해도 레코드가 유실되거나 두 번 배출되지 않는다.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::record::Record;

/// `append` 결과
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// 버퍼에 추가됨 (추가 후 길이)
    Buffered { len: usize },
    /// 용량에 도달해 버퍼 전체를 꺼냄 (추가한 레코드 포함, 삽입 순서)
    Drained(Vec<Record>),
}

/// 레코드 버퍼
#[async_trait]
pub trait RecordBuffer: Send + Sync {
    /// 레코드 추가.
    ///
    /// `drain_when_full`이고 추가 후 길이가 `capacity` 이상이면
    /// 같은 원자 구간 안에서 버퍼를 비우고 꺼낸 레코드를 반환한다.
    async fn append(
        &self,
        record: &Record,
        capacity: usize,
        drain_when_full: bool,
    ) -> Result<AppendOutcome, CoreError>;

    /// 모든 레코드를 꺼내고 버퍼를 비움 (삽입 순서)
    async fn take_all(&self) -> Result<Vec<Record>, CoreError>;

    /// 버퍼 비우기
    async fn clear(&self) -> Result<(), CoreError>;

    /// 현재 길이
    async fn len(&self) -> Result<usize, CoreError>;

    async fn is_empty(&self) -> Result<bool, CoreError> {
        Ok(self.len().await? == 0)
    }
}
