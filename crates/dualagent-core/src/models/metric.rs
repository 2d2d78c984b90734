//! 정규화된 메트릭 행.
//!
//! 공통 필드 + 이벤트 카테고리별 상세 필드. 카테고리에 해당하지 않는 컬럼은
//! 0이 아닌 "없음"(NULL)으로 남아 집계 시 "데이터 없음"과 "0ms"가 구분된다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::EventType;

/// 저장된 메트릭 행 (DB id 포함)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMetric {
    pub id: i64,
    pub row: MetricRow,
}

/// 메트릭 행
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub event_type: EventType,
    /// 이벤트 시각 (초 단위 정밀도)
    pub event_timestamp: DateTime<Utc>,
    pub trace_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub environment: Option<String>,
    pub server_name: Option<String>,
    pub app_version: Option<String>,
    /// 카테고리별 상세 필드
    pub detail: MetricDetail,
    /// 원본 레코드
    pub raw_payload: Value,
}

/// 카테고리별 상세 필드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum MetricDetail {
    Request(RequestMetrics),
    Query(QueryMetrics),
    Exception(ExceptionMetrics),
    Job(JobMetrics),
    Cache(CacheMetrics),
    Mail(MailMetrics),
    Log(LogMetrics),
    /// 전용 컬럼이 없는 타입: 공통 키를 뺀 레코드 전체
    Custom { metadata: Map<String, Value> },
}

/// HTTP 요청 메트릭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub method: Option<String>,
    pub url: Option<String>,
    pub route_name: Option<String>,
    pub route_path: Option<String>,
    pub status_code: Option<u16>,
    /// 밀리초
    pub duration: Option<f64>,
    /// 바이트
    pub memory_usage: Option<u64>,
    pub request_size: Option<u64>,
    pub response_size: Option<u64>,
    pub stages: StageDurations,
}

/// 요청 처리 단계별 소요 시간 (밀리초)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDurations {
    pub bootstrap: Option<f64>,
    pub before_middleware: Option<f64>,
    pub action: Option<f64>,
    pub render: Option<f64>,
    pub after_middleware: Option<f64>,
    pub terminating: Option<f64>,
}

/// DB 쿼리 메트릭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub sql: Option<String>,
    pub connection: Option<String>,
    pub duration: Option<f64>,
    pub bindings: Option<Value>,
}

/// 예외 메트릭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionMetrics {
    pub class: Option<String>,
    pub message: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub trace: Option<Value>,
}

/// 큐 작업 메트릭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub job_class: Option<String>,
    pub queue: Option<String>,
    /// queued, processing, completed, failed
    pub status: String,
    pub attempts: Option<u32>,
    pub duration: Option<f64>,
}

/// 캐시 메트릭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub key: Option<String>,
    /// hit, miss, write, delete
    pub operation: Option<String>,
    pub store: Option<String>,
}

/// 메일 메트릭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailMetrics {
    pub mail_class: Option<String>,
    pub to: Option<Value>,
    pub subject: Option<String>,
}

/// 로그 메트릭
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetrics {
    pub level: Option<String>,
    pub message: Option<String>,
    pub context: Option<Value>,
}

impl MetricDetail {
    /// 카테고리 이름
    pub fn category(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Query(_) => "query",
            Self::Exception(_) => "exception",
            Self::Job(_) => "job",
            Self::Cache(_) => "cache",
            Self::Mail(_) => "mail",
            Self::Log(_) => "log",
            Self::Custom { .. } => "custom",
        }
    }
}

impl MetricRow {
    pub fn is_request(&self) -> bool {
        matches!(self.detail, MetricDetail::Request(_))
    }

    /// 요청 응답 코드가 400 이상인지
    pub fn is_error(&self) -> bool {
        match &self.detail {
            MetricDetail::Request(request) => request.status_code.is_some_and(|code| code >= 400),
            _ => false,
        }
    }

    /// 카테고리 소요 시간 (요청/쿼리/작업만)
    pub fn duration(&self) -> Option<f64> {
        match &self.detail {
            MetricDetail::Request(request) => request.duration,
            MetricDetail::Query(query) => query.duration,
            MetricDetail::Job(job) => job.duration,
            _ => None,
        }
    }

    /// 소요 시간, 없으면 0
    pub fn total_duration(&self) -> f64 {
        self.duration().unwrap_or(0.0)
    }

    /// 임계값(밀리초) 초과 여부
    pub fn is_slow(&self, threshold_ms: f64) -> bool {
        self.duration().is_some_and(|d| d > threshold_ms)
    }

    /// 요청 메모리 사용량
    pub fn memory_usage(&self) -> Option<u64> {
        match &self.detail {
            MetricDetail::Request(request) => request.memory_usage,
            _ => None,
        }
    }
}
