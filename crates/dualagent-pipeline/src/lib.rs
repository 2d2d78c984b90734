//! # dualagent-pipeline
//!
//! 모니터링 에이전트 레코드를 DB로 복제하는 수집 파이프라인.
//!
//! ## 모듈
//! - `filter`: 피드백 루프 방지, 허용/거부 목록, 타입별 샘플링
//! - `transformer`: 레코드 → 메트릭 행 변환 (타입별 필드 매핑)
//! - `database_ingest`: 버퍼링 DB 싱크 (Ingest 포트 구현)
//! - `composite`: 1차 에이전트 + DB 싱크 이중 기록
//! - `aggregator`: 시간/일/주 단위 집계

pub mod aggregator;
pub mod composite;
pub mod database_ingest;
pub mod filter;
pub mod transformer;
