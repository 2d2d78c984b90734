//! SQLite 저장소 어댑터.
//!
//! `MetricStore` + `RecordBuffer` 포트 구현.
//!
//! # 모듈 구조
//! - `metrics`: 메트릭 행 저장/조회, 보존 삭제 (MetricStore 포트)
//! - `aggregates`: 집계 행 upsert/조회
//! - `buffer`: 프로세스 간 공유 레코드 버퍼 (RecordBuffer 포트)
//! - `maintenance`: 상태 조회, 자체 테스트 정리

mod aggregates;
mod buffer;
mod maintenance;
mod metrics;

pub use buffer::SqliteBuffer;
pub use maintenance::StorageSummary;

use chrono::{DateTime, NaiveDateTime, Utc};
use dualagent_core::error::CoreError;
use rusqlite::types::Type;
use rusqlite::Connection;
use std::num::TryFromIntError;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

use crate::migration;

/// DB 타임스탬프 포맷 (초 단위, UTC)
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 다른 프로세스가 쓰기 잠금을 잡고 있을 때 대기 시간
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite 저장소 — `MetricStore` 포트 구현
pub struct SqliteStorage {
    pub(super) conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// 파일 기반 SQLite 저장소 생성
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| CoreError::Storage(format!("SQLite 열기 실패: {e}")))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=8000;
            PRAGMA temp_store=MEMORY;
            ",
        )
        .map_err(|e| CoreError::Storage(format!("PRAGMA 설정 실패: {e}")))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| CoreError::Storage(format!("busy_timeout 설정 실패: {e}")))?;

        migration::run_migrations(&conn)
            .map_err(|e| CoreError::Storage(format!("마이그레이션 실패: {e}")))?;

        info!("SQLite 저장소 초기화: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 인메모리 SQLite 저장소 생성 (테스트용)
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Storage(format!("인메모리 SQLite 생성 실패: {e}")))?;

        migration::run_migrations(&conn)
            .map_err(|e| CoreError::Storage(format!("마이그레이션 실패: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|e| CoreError::Internal(format!("잠금 획득 실패: {e}")))
    }
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map(|naive| naive.and_utc())
}

/// TEXT 타임스탬프 컬럼 읽기. 형식이 다르면 행 변환 실패
pub(crate) fn timestamp_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 부호 없는 값 → INTEGER 컬럼. i64 범위를 넘으면 저장하지 않는다
pub(crate) fn sql_int(column: &str, value: u64) -> Result<i64, CoreError> {
    i64::try_from(value).map_err(|_| {
        CoreError::Storage(format!("{column} 값이 INTEGER 범위를 넘음: {value}"))
    })
}

pub(crate) fn sql_int_opt(column: &str, value: Option<u64>) -> Result<Option<i64>, CoreError> {
    value.map(|v| sql_int(column, v)).transpose()
}

/// INTEGER 컬럼 → 부호 없는 정수. 음수나 범위 밖 값은 행 변환 실패
pub(crate) fn uint_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: TryFrom<i64, Error = TryFromIntError>,
{
    row.get::<_, Option<i64>>(idx)?
        .map(|v| {
            T::try_from(v).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e))
            })
        })
        .transpose()
}

pub(crate) fn query_error(e: rusqlite::Error) -> CoreError {
    CoreError::Storage(format!("쿼리 실행 실패: {e}"))
}
