//! 수집(Ingest) 포트.
//!
//! 모니터링 에이전트의 레코드 싱크 계약. 1차 에이전트 싱크, DB 싱크,
//! 둘을 묶는 composite 모두 이 trait을 구현한다.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::record::Record;

/// 레코드 싱크
#[async_trait]
pub trait Ingest: Send + Sync {
    /// 레코드 한 건 수집 (버퍼링 가능)
    async fn write(&self, record: &Record) -> Result<(), CoreError>;

    /// 버퍼를 거치지 않고 즉시 기록
    ///
    /// `write`와 달리 여러 건을 한 번에 받는다. 단건 즉시 기록은
    /// `std::slice::from_ref(&record)`로 넘긴다. 데이터베이스 싱크는 각 레코드를
    /// 개별로 필터/변환/저장하므로 한 건의 실패가 나머지를 막지 않는다.
    async fn write_now(&self, records: &[Record]) -> Result<(), CoreError>;

    /// 싱크 연결 확인
    async fn ping(&self) -> Result<(), CoreError>;

    /// 요청 종료 시 digest 여부 설정
    async fn should_digest(&self, enabled: bool);

    /// 버퍼가 가득 찼을 때 digest 여부 설정
    async fn should_digest_when_buffer_is_full(&self, enabled: bool);

    /// 버퍼에 쌓인 레코드를 모두 내보냄. 처리된 건수 반환
    async fn digest(&self) -> Result<usize, CoreError>;

    /// 버퍼를 내보내지 않고 비움
    async fn flush(&self) -> Result<(), CoreError>;
}

/// 버퍼를 가진 보조 싱크
///
/// composite는 `is_enabled()`가 false인 보조 싱크를 건너뛴다.
#[async_trait]
pub trait BufferedIngest: Ingest {
    /// 수집 활성화 여부
    fn is_enabled(&self) -> bool;

    /// 버퍼 용량
    fn buffer_size(&self) -> usize;

    /// 현재 버퍼에 쌓인 레코드 수
    async fn buffer_count(&self) -> Result<usize, CoreError>;
}
