//! 원시 레코드 모델.
//!
//! 모니터링 에이전트가 내보내는 이벤트 단위. 필드 구성은 이벤트 타입마다 다르고
//! 에이전트 버전에 따라 키 이름도 바뀌므로 열린 JSON 맵으로 보관한다.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::TransformError;

/// 이벤트 타입 태그 키
pub const TYPE_KEY: &str = "t";

/// 구버전 에이전트의 이벤트 타입 키
pub const LEGACY_TYPE_KEY: &str = "event_type";

/// 이벤트 타입
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Request,
    Query,
    Exception,
    Job,
    QueuedJob,
    Cache,
    Mail,
    Log,
    Notification,
    ScheduledTask,
    Test,
    /// 전용 컬럼이 없는 사용자 정의 타입
    Custom(String),
    /// 태그 없음
    Unknown,
}

impl EventType {
    /// 태그 문자열에서 이벤트 타입 결정
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "request" => Self::Request,
            "query" => Self::Query,
            "exception" => Self::Exception,
            "job" => Self::Job,
            "queued_job" => Self::QueuedJob,
            "cache" => Self::Cache,
            "mail" => Self::Mail,
            "log" => Self::Log,
            "notification" => Self::Notification,
            "scheduled_task" => Self::ScheduledTask,
            "test" => Self::Test,
            "unknown" => Self::Unknown,
            other => Self::Custom(other.to_string()),
        }
    }

    /// 저장용 태그 문자열
    pub fn as_str(&self) -> &str {
        match self {
            Self::Request => "request",
            Self::Query => "query",
            Self::Exception => "exception",
            Self::Job => "job",
            Self::QueuedJob => "queued_job",
            Self::Cache => "cache",
            Self::Mail => "mail",
            Self::Log => "log",
            Self::Notification => "notification",
            Self::ScheduledTask => "scheduled_task",
            Self::Test => "test",
            Self::Custom(tag) => tag,
            Self::Unknown => "unknown",
        }
    }

    /// job / queued_job 여부
    pub fn is_job(&self) -> bool {
        matches!(self, Self::Job | Self::QueuedJob)
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 모니터링 에이전트 레코드 (불변)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// 필드 맵으로 레코드 생성
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// JSON 값에서 레코드 생성 (객체만 허용)
    pub fn from_value(value: Value) -> Result<Self, TransformError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(TransformError::NotAnObject),
        }
    }

    /// 이벤트 타입 태그 (`t` → `event_type` → "unknown")
    pub fn type_tag(&self) -> &str {
        self.0
            .get(TYPE_KEY)
            .or_else(|| self.0.get(LEGACY_TYPE_KEY))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// 이벤트 타입
    pub fn event_type(&self) -> EventType {
        EventType::from_tag(self.type_tag())
    }

    /// 필드 조회
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// 전체 필드
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// JSON 값으로 변환
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
