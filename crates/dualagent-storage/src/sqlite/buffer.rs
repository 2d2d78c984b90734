//! 프로세스 간 공유 레코드 버퍼 (RecordBuffer 포트 구현).
//!
//! 같은 DB 파일을 여는 모든 작업자가 `ingest_buffer` 테이블을 공유한다.
//! 모든 변경은 `BEGIN IMMEDIATE` 트랜잭션 안에서 실행되므로 "추가 후 가득 차면
//! 비우기"가 프로세스 경계를 넘어 원자적이다. 만료된 항목은 매 접근 시 먼저 지운다.

use async_trait::async_trait;
use chrono::Utc;
use dualagent_core::error::CoreError;
use dualagent_core::models::record::Record;
use dualagent_core::ports::buffer::{AppendOutcome, RecordBuffer};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{query_error, SqliteStorage};

/// SQLite 기반 레코드 버퍼
pub struct SqliteBuffer {
    storage: Arc<SqliteStorage>,
    ttl: Duration,
}

impl SqliteBuffer {
    pub fn new(storage: Arc<SqliteStorage>, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    fn begin(conn: &mut Connection) -> Result<Transaction<'_>, CoreError> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| CoreError::Storage(format!("버퍼 트랜잭션 시작 실패: {e}")))
    }

    fn commit(tx: Transaction<'_>) -> Result<(), CoreError> {
        tx.commit()
            .map_err(|e| CoreError::Storage(format!("버퍼 트랜잭션 커밋 실패: {e}")))
    }

    /// 만료 항목 삭제
    fn purge_expired(&self, tx: &Transaction<'_>) -> Result<usize, CoreError> {
        let cutoff = Utc::now().timestamp() - self.ttl.as_secs() as i64;
        let purged = tx
            .execute(
                "DELETE FROM ingest_buffer WHERE buffered_at < ?1",
                [cutoff],
            )
            .map_err(query_error)?;
        if purged > 0 {
            debug!("만료된 버퍼 항목 {purged}건 폐기");
        }
        Ok(purged)
    }

    fn count(tx: &Transaction<'_>) -> Result<usize, CoreError> {
        tx.query_row("SELECT COUNT(*) FROM ingest_buffer", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .map_err(query_error)
    }

    /// 모든 항목을 삽입 순서로 꺼내고 테이블을 비움
    fn drain(tx: &Transaction<'_>) -> Result<Vec<Record>, CoreError> {
        let payloads: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT payload FROM ingest_buffer ORDER BY id")
                .map_err(query_error)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(query_error)?;
            let mut payloads = Vec::new();
            for row in rows {
                payloads.push(row.map_err(query_error)?);
            }
            payloads
        };

        tx.execute("DELETE FROM ingest_buffer", [])
            .map_err(query_error)?;

        let records = payloads
            .into_iter()
            .filter_map(|payload| match serde_json::from_str::<Record>(&payload) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("손상된 버퍼 항목 폐기: {e}");
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

#[async_trait]
impl RecordBuffer for SqliteBuffer {
    async fn append(
        &self,
        record: &Record,
        capacity: usize,
        drain_when_full: bool,
    ) -> Result<AppendOutcome, CoreError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.storage.lock()?;
        let tx = Self::begin(&mut conn)?;

        self.purge_expired(&tx)?;
        tx.execute(
            "INSERT INTO ingest_buffer (payload, buffered_at) VALUES (?1, ?2)",
            rusqlite::params![payload, Utc::now().timestamp()],
        )
        .map_err(|e| CoreError::Storage(format!("버퍼 추가 실패: {e}")))?;

        let len = Self::count(&tx)?;
        let outcome = if drain_when_full && len >= capacity {
            AppendOutcome::Drained(Self::drain(&tx)?)
        } else {
            AppendOutcome::Buffered { len }
        };

        Self::commit(tx)?;
        Ok(outcome)
    }

    async fn take_all(&self) -> Result<Vec<Record>, CoreError> {
        let mut conn = self.storage.lock()?;
        let tx = Self::begin(&mut conn)?;
        self.purge_expired(&tx)?;
        let records = Self::drain(&tx)?;
        Self::commit(tx)?;
        Ok(records)
    }

    async fn clear(&self) -> Result<(), CoreError> {
        let conn = self.storage.lock()?;
        conn.execute("DELETE FROM ingest_buffer", [])
            .map_err(query_error)?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, CoreError> {
        let mut conn = self.storage.lock()?;
        let tx = Self::begin(&mut conn)?;
        self.purge_expired(&tx)?;
        let len = Self::count(&tx)?;
        Self::commit(tx)?;
        Ok(len)
    }
}
