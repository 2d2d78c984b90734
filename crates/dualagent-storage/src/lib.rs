//! # dualagent-storage
//!
//! 저장소 어댑터.
//! SQLite 기반 메트릭 행 저장, 프로세스 간 공유 버퍼, 집계 행 upsert,
//! 보존 기간 배치 삭제와 스키마 마이그레이션을 관리한다.
//!
//! ## 모듈
//! - `sqlite`: 메트릭 저장소 (MetricStore 구현), 버퍼 (RecordBuffer 구현)
//! - `migration`: 스키마 마이그레이션

pub mod migration;
pub mod sqlite;
