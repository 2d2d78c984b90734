//! 레코드 → 메트릭 행 변환.
//!
//! 에이전트 버전마다 키 이름이 다르므로 필드마다 후보 키를 순서대로 본다.
//! 처음으로 null이 아닌 값을 가진 키가 쓰인다. 값의 형태가 컬럼 타입과 맞지 않으면
//! `TransformError`로 레코드 전체를 버린다.

use chrono::{DateTime, SubsecRound, Utc};
use dualagent_core::error::TransformError;
use dualagent_core::models::context::IngestContext;
use dualagent_core::models::metric::{
    CacheMetrics, ExceptionMetrics, JobMetrics, LogMetrics, MailMetrics, MetricDetail, MetricRow,
    QueryMetrics, RequestMetrics, StageDurations,
};
use dualagent_core::models::record::{EventType, Record, LEGACY_TYPE_KEY, TYPE_KEY};
use serde_json::{Map, Value};

/// 사용자 정의 메타데이터에서 제외하는 공통 키
const COMMON_KEYS: [&str; 5] = [TYPE_KEY, LEGACY_TYPE_KEY, "timestamp", "trace", "trace_id"];

/// 부호 없는 정수 컬럼의 상한 (SQLite INTEGER)
const MAX_UNSIGNED: u64 = i64::MAX as u64;

/// 레코드 변환기
#[derive(Debug, Default, Clone, Copy)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    /// 레코드를 메트릭 행으로 변환
    pub fn transform(
        &self,
        record: &Record,
        context: &IngestContext,
    ) -> Result<MetricRow, TransformError> {
        let fields = Fields(record);
        let event_type = record.event_type();

        let detail = match &event_type {
            EventType::Request => MetricDetail::Request(fields.request()?),
            EventType::Query => MetricDetail::Query(fields.query()?),
            EventType::Exception => MetricDetail::Exception(fields.exception()?),
            EventType::Job | EventType::QueuedJob => MetricDetail::Job(fields.job()?),
            EventType::Cache => MetricDetail::Cache(fields.cache()?),
            EventType::Mail => MetricDetail::Mail(fields.mail()?),
            EventType::Log => MetricDetail::Log(fields.log()?),
            _ => MetricDetail::Custom {
                metadata: fields.custom_metadata(),
            },
        };

        Ok(MetricRow {
            event_type,
            event_timestamp: fields.timestamp()?,
            trace_id: fields.trace_id()?,
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            environment: context.environment.clone(),
            server_name: context.server_name.clone(),
            app_version: context.app_version.clone(),
            detail,
            raw_payload: record.to_value(),
        })
    }
}

/// 레코드 필드 접근자
struct Fields<'a>(&'a Record);

impl Fields<'_> {
    /// 후보 키 중 처음으로 null이 아닌 값
    fn first(&self, keys: &[&'static str]) -> Option<(&'static str, &Value)> {
        keys.iter().find_map(|key| match self.0.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some((*key, value)),
        })
    }

    fn string(&self, keys: &[&'static str]) -> Result<Option<String>, TransformError> {
        match self.first(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.clone())),
            Some((_, Value::Number(n))) => Ok(Some(n.to_string())),
            Some((_, Value::Bool(b))) => Ok(Some(b.to_string())),
            Some((key, _)) => Err(type_error(key, "string")),
        }
    }

    fn float(&self, keys: &[&'static str]) -> Result<Option<f64>, TransformError> {
        match self.first(keys) {
            None => Ok(None),
            Some((key, Value::Number(n))) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| type_error(key, "number")),
            Some((key, Value::String(s))) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| type_error(key, "number")),
            Some((key, _)) => Err(type_error(key, "number")),
        }
    }

    fn unsigned(&self, keys: &[&'static str]) -> Result<Option<u64>, TransformError> {
        let Some((key, value)) = self.first(keys) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(integral)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<u64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
            }
            _ => None,
        };
        parsed
            .filter(|v| *v <= MAX_UNSIGNED)
            .map(Some)
            .ok_or_else(|| type_error(key, "unsigned integer"))
    }

    fn narrow<T: TryFrom<u64>>(
        &self,
        keys: &[&'static str],
        expected: &'static str,
    ) -> Result<Option<T>, TransformError> {
        match self.unsigned(keys)? {
            None => Ok(None),
            Some(v) => T::try_from(v)
                .map(Some)
                .map_err(|_| type_error(keys[0], expected)),
        }
    }

    fn json(&self, keys: &[&'static str]) -> Option<Value> {
        self.first(keys).map(|(_, value)| value.clone())
    }

    /// `timestamp` (유닉스 초 또는 RFC3339), 없으면 현재 시각. 초 단위로 자른다
    fn timestamp(&self) -> Result<DateTime<Utc>, TransformError> {
        let from_secs = |secs: f64| {
            DateTime::from_timestamp(secs.floor() as i64, 0)
                .ok_or_else(|| TransformError::Timestamp(format!("범위 밖: {secs}")))
        };

        match self.first(&["timestamp"]) {
            None => Ok(Utc::now().trunc_subsecs(0)),
            Some((_, Value::Number(n))) => match n.as_f64() {
                Some(secs) => from_secs(secs),
                None => Err(TransformError::Timestamp(n.to_string())),
            },
            Some((_, Value::String(s))) => {
                if let Ok(secs) = s.trim().parse::<f64>() {
                    return from_secs(secs);
                }
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(0))
                    .map_err(|e| TransformError::Timestamp(format!("{s}: {e}")))
            }
            Some((_, other)) => Err(TransformError::Timestamp(other.to_string())),
        }
    }

    /// `trace_id`, 없으면 문자열인 `trace`
    fn trace_id(&self) -> Result<Option<String>, TransformError> {
        if let Some(id) = self.string(&["trace_id"])? {
            return Ok(Some(id));
        }
        Ok(self
            .0
            .get("trace")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn request(&self) -> Result<RequestMetrics, TransformError> {
        Ok(RequestMetrics {
            method: self.string(&["method"])?,
            url: self.string(&["url"])?,
            route_name: self.string(&["route_name"])?,
            route_path: self.string(&["route_path"])?,
            status_code: self.narrow(&["status_code"], "status code")?,
            duration: self.float(&["duration"])?,
            memory_usage: self.unsigned(&["memory_usage"])?,
            request_size: self.unsigned(&["request_size"])?,
            response_size: self.unsigned(&["response_size"])?,
            stages: StageDurations {
                bootstrap: self.float(&["bootstrap"])?,
                before_middleware: self.float(&["before_middleware"])?,
                action: self.float(&["action"])?,
                render: self.float(&["render"])?,
                after_middleware: self.float(&["after_middleware"])?,
                terminating: self.float(&["terminating"])?,
            },
        })
    }

    fn query(&self) -> Result<QueryMetrics, TransformError> {
        Ok(QueryMetrics {
            sql: self.string(&["sql"])?,
            connection: self.string(&["connection"])?,
            duration: self.float(&["duration", "time"])?,
            bindings: self.json(&["bindings"]),
        })
    }

    fn exception(&self) -> Result<ExceptionMetrics, TransformError> {
        Ok(ExceptionMetrics {
            class: self.string(&["class", "exception_class"])?,
            message: self.string(&["message", "exception_message"])?,
            file: self.string(&["file"])?,
            line: self.narrow(&["line"], "line number")?,
            trace: self.json(&["trace", "stack_trace"]),
        })
    }

    fn job(&self) -> Result<JobMetrics, TransformError> {
        Ok(JobMetrics {
            job_class: self.string(&["job_class", "job"])?,
            queue: self.string(&["queue"])?,
            status: self
                .string(&["status"])?
                .unwrap_or_else(|| "queued".to_string()),
            attempts: self.narrow(&["attempts"], "attempt count")?,
            duration: self.float(&["duration"])?,
        })
    }

    fn cache(&self) -> Result<CacheMetrics, TransformError> {
        Ok(CacheMetrics {
            key: self.string(&["key"])?,
            operation: self.string(&["operation", "type"])?,
            store: self.string(&["store"])?,
        })
    }

    fn mail(&self) -> Result<MailMetrics, TransformError> {
        Ok(MailMetrics {
            mail_class: self.string(&["mailable", "mail_class"])?,
            to: self.json(&["to"]),
            subject: self.string(&["subject"])?,
        })
    }

    fn log(&self) -> Result<LogMetrics, TransformError> {
        Ok(LogMetrics {
            level: self.string(&["level"])?,
            message: self.string(&["message"])?,
            context: self.json(&["context"]),
        })
    }

    fn custom_metadata(&self) -> Map<String, Value> {
        self.0
            .fields()
            .iter()
            .filter(|(key, _)| !COMMON_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// 소수부 없는 0 이상 실수만 정수로 본다 (`1024.0` 허용, `12.9` 거부)
fn integral(v: f64) -> Option<u64> {
    // 2^63 미만의 정수 f64는 u64로 정확히 변환된다
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v < MAX_UNSIGNED as f64 {
        Some(v as u64)
    } else {
        None
    }
}

fn type_error(field: &str, expected: &'static str) -> TransformError {
    TransformError::FieldType {
        field: field.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn transform(value: Value) -> Result<MetricRow, TransformError> {
        let record = Record::from_value(value).unwrap();
        let context = IngestContext {
            session_id: Some("sess_1".to_string()),
            user_id: Some("42".to_string()),
            environment: Some("testing".to_string()),
            server_name: Some("web-1".to_string()),
            app_version: Some("2.1.0".to_string()),
        };
        Transformer::new().transform(&record, &context)
    }

    #[test]
    fn request_populates_only_request_fields() {
        let row = transform(json!({
            "t": "request",
            "method": "GET",
            "url": "/x",
            "status_code": 200,
            "duration": 125.5,
        }))
        .unwrap();

        assert_eq!(row.event_type, EventType::Request);
        assert_eq!(row.user_id.as_deref(), Some("42"));
        assert_eq!(row.environment.as_deref(), Some("testing"));
        let MetricDetail::Request(request) = &row.detail else {
            panic!("request detail expected, got {:?}", row.detail);
        };
        assert_eq!(request.method.as_deref(), Some("GET"));
        assert_eq!(request.url.as_deref(), Some("/x"));
        assert_eq!(request.status_code, Some(200));
        assert_eq!(request.duration, Some(125.5));
        assert_eq!(request.memory_usage, None);
        assert_eq!(request.stages, StageDurations::default());
    }

    #[test]
    fn custom_type_keeps_metadata_only() {
        let row = transform(json!({"t": "custom_widget", "foo": "bar", "trace_id": "abc"})).unwrap();
        assert_eq!(row.event_type.as_str(), "custom_widget");
        assert_eq!(row.trace_id.as_deref(), Some("abc"));

        let mut expected = Map::new();
        expected.insert("foo".to_string(), json!("bar"));
        assert_eq!(row.detail, MetricDetail::Custom { metadata: expected });
    }

    #[test]
    fn legacy_type_key_stays_out_of_metadata() {
        let row = transform(json!({"event_type": "custom_widget", "foo": "bar"})).unwrap();
        assert_eq!(row.event_type.as_str(), "custom_widget");

        let mut expected = Map::new();
        expected.insert("foo".to_string(), json!("bar"));
        assert_eq!(row.detail, MetricDetail::Custom { metadata: expected });
    }

    #[test]
    fn notification_goes_to_custom() {
        let row = transform(json!({"t": "notification", "channel": "mail"})).unwrap();
        assert!(matches!(row.detail, MetricDetail::Custom { .. }));
    }

    #[test]
    fn fallback_keys_are_used() {
        let query = transform(json!({"t": "query", "sql": "select 1", "time": 3.5})).unwrap();
        let MetricDetail::Query(q) = query.detail else { panic!() };
        assert_eq!(q.duration, Some(3.5));

        let exception = transform(json!({
            "t": "exception",
            "exception_class": "RuntimeException",
            "exception_message": "boom",
            "stack_trace": ["a", "b"],
            "line": "42",
        }))
        .unwrap();
        let MetricDetail::Exception(e) = exception.detail else { panic!() };
        assert_eq!(e.class.as_deref(), Some("RuntimeException"));
        assert_eq!(e.message.as_deref(), Some("boom"));
        assert_eq!(e.line, Some(42));
        assert_eq!(e.trace, Some(json!(["a", "b"])));

        let job = transform(json!({"t": "queued_job", "job": "SendInvoice"})).unwrap();
        let MetricDetail::Job(j) = job.detail else { panic!() };
        assert_eq!(j.job_class.as_deref(), Some("SendInvoice"));
        assert_eq!(j.status, "queued");

        let cache = transform(json!({"t": "cache", "key": "k", "type": "hit"})).unwrap();
        let MetricDetail::Cache(c) = cache.detail else { panic!() };
        assert_eq!(c.operation.as_deref(), Some("hit"));

        let mail = transform(json!({"t": "mail", "mail_class": "Welcome", "to": ["a@b.c"]})).unwrap();
        let MetricDetail::Mail(m) = mail.detail else { panic!() };
        assert_eq!(m.mail_class.as_deref(), Some("Welcome"));
        assert_eq!(m.to, Some(json!(["a@b.c"])));
    }

    #[test]
    fn null_primary_key_falls_through() {
        let row = transform(json!({"t": "exception", "class": null, "exception_class": "E"})).unwrap();
        let MetricDetail::Exception(e) = row.detail else { panic!() };
        assert_eq!(e.class.as_deref(), Some("E"));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let row = transform(json!({"t": "request", "status_code": "503", "duration": "12.25"})).unwrap();
        let MetricDetail::Request(r) = row.detail else { panic!() };
        assert_eq!(r.status_code, Some(503));
        assert_eq!(r.duration, Some(12.25));
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let err = transform(json!({"t": "request", "duration": {"ms": 5}})).unwrap_err();
        assert_eq!(
            err,
            TransformError::FieldType {
                field: "duration".to_string(),
                expected: "number"
            }
        );

        assert!(transform(json!({"t": "request", "status_code": 70000})).is_err());
        assert!(transform(json!({"t": "request", "duration": "fast"})).is_err());
    }

    #[test]
    fn unsigned_fields_reject_lossy_numbers() {
        let unsigned_error = |field: &str| TransformError::FieldType {
            field: field.to_string(),
            expected: "unsigned integer",
        };

        // i64 범위를 넘는 정수
        let err = transform(json!({"t": "request", "memory_usage": 10_000_000_000_000_000_000u64}))
            .unwrap_err();
        assert_eq!(err, unsigned_error("memory_usage"));
        let err = transform(json!({"t": "request", "response_size": "9223372036854775808"}))
            .unwrap_err();
        assert_eq!(err, unsigned_error("response_size"));

        // 거대한 실수는 포화시키지 않는다
        let err = transform(json!({"t": "request", "memory_usage": 1e30})).unwrap_err();
        assert_eq!(err, unsigned_error("memory_usage"));

        // 소수부가 있으면 자르지 않는다
        let err = transform(json!({"t": "request", "request_size": 12.9})).unwrap_err();
        assert_eq!(err, unsigned_error("request_size"));
        assert!(transform(json!({"t": "job", "attempts": "2.5"})).is_err());
        assert!(transform(json!({"t": "request", "memory_usage": -1})).is_err());
    }

    #[test]
    fn integral_numbers_fill_unsigned_fields() {
        let row = transform(json!({
            "t": "request",
            "memory_usage": 9_223_372_036_854_775_807u64,
            "request_size": 1024.0,
            "response_size": "2048",
        }))
        .unwrap();
        let MetricDetail::Request(r) = row.detail else { panic!() };
        assert_eq!(r.memory_usage, Some(i64::MAX as u64));
        assert_eq!(r.request_size, Some(1024));
        assert_eq!(r.response_size, Some(2048));
    }

    #[test]
    fn timestamp_variants_truncate_to_seconds() {
        let expected = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();

        let numeric = transform(json!({"t": "log", "timestamp": 1_775_044_800.75})).unwrap();
        assert_eq!(numeric.event_timestamp, expected);

        let rfc = transform(json!({"t": "log", "timestamp": "2026-04-01T12:00:00.900Z"})).unwrap();
        assert_eq!(rfc.event_timestamp, expected);

        let missing = transform(json!({"t": "log"})).unwrap();
        assert_eq!(missing.event_timestamp.timestamp_subsec_nanos(), 0);

        assert!(matches!(
            transform(json!({"t": "log", "timestamp": "yesterday"})),
            Err(TransformError::Timestamp(_))
        ));
    }

    #[test]
    fn trace_used_as_id_only_when_string() {
        let row = transform(json!({"t": "custom", "trace": "tr-1"})).unwrap();
        assert_eq!(row.trace_id.as_deref(), Some("tr-1"));

        let row = transform(json!({"t": "exception", "trace": ["frame"]})).unwrap();
        assert_eq!(row.trace_id, None);
    }

    #[test]
    fn raw_payload_is_the_whole_record() {
        let value = json!({"t": "cache", "key": "users:1", "store": "redis"});
        let row = transform(value.clone()).unwrap();
        assert_eq!(row.raw_payload, value);
    }
}
