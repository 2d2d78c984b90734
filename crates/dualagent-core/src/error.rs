//! DualAgent 핵심 에러 타입.
//!
//! 어댑터 crate는 자체 에러를 `CoreError`로 매핑하여 반환한다.
//! 파이프라인 경계(CompositeIngest)에서 모든 에러는 로그로 흡수된다.

use thiserror::Error;

/// 코어 레이어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패: {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 저장소 쿼리/트랜잭션 실패
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// 저장소 연결 불가 (ping 실패)
    #[error("저장소 연결 실패: {0}")]
    Connectivity(String),

    /// 레코드 → 메트릭 행 변환 실패
    #[error("레코드 변환 실패: {0}")]
    Transform(#[from] TransformError),

    /// 수집 싱크 실패 (primary 에이전트 등)
    #[error("싱크 에러: {0}")]
    Sink(String),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),
}

/// 단일 레코드 변환 실패.
///
/// 변환 실패한 레코드는 버려지고 배치의 나머지는 계속 처리된다.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// 레코드가 JSON 객체가 아님
    #[error("레코드가 JSON 객체가 아님")]
    NotAnObject,

    /// 필드 값의 형태가 컬럼 타입과 맞지 않음
    #[error("필드 `{field}` 타입 불일치: {expected} 필요")]
    FieldType {
        /// 필드 키
        field: String,
        /// 기대한 타입
        expected: &'static str,
    },

    /// 타임스탬프 해석 실패
    #[error("타임스탬프 해석 실패: {0}")]
    Timestamp(String),
}
