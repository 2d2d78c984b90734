//! # dualagent-core
//!
//! DualAgent 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`] — 레코드, 메트릭 행, 집계 행, 수집 컨텍스트
//! - [`ports`] — 수집(Ingest), 버퍼, 메트릭 저장소 포트 (async_trait)
//! - [`error`] — 핵심 에러 타입 (thiserror)
//! - [`config`] — 파이프라인 설정 구조체
//! - [`config_manager`] — 설정 파일 관리 (로드/저장)
//! - [`schedule`] — 집계 스케줄 표현식

pub mod config;
pub mod config_manager;
pub mod error;
pub mod models;
pub mod ports;
pub mod schedule;

/// 파이프라인 자체 로그에 붙는 마커.
///
/// 필터는 이 마커가 포함된 log 레코드를 거부한다 (자기 로그의 재수집 방지).
pub const LOG_MARKER: &str = "[DualAgent]";
