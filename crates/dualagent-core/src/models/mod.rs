//! 도메인 모델.
//!
//! - `record`: 모니터링 에이전트가 생성하는 원시 레코드
//! - `metric`: 정규화된 메트릭 행
//! - `aggregate`: 시간/일/주 단위 집계 행
//! - `context`: 수집 시점의 애플리케이션 컨텍스트

pub mod aggregate;
pub mod context;
pub mod metric;
pub mod record;
