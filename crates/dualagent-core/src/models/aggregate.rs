//! 집계 메트릭 모델.
//!
//! (집계 단위, 이벤트 타입, 날짜, 시간) 키당 한 행. 집계기가 실행될 때마다
//! 덮어쓰며 수집 경로에서는 수정하지 않는다.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 집계 단위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    /// `at`을 포함하는 집계 구간 [start, end)
    ///
    /// 주 단위는 월요일 00:00 UTC부터 시작한다.
    pub fn window(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let day_start = at
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(at);

        match self {
            Self::Hourly => {
                let start = day_start + Duration::hours(i64::from(at.hour()));
                (start, start + Duration::hours(1))
            }
            Self::Daily => (day_start, day_start + Duration::days(1)),
            Self::Weekly => {
                let offset = i64::from(at.weekday().num_days_from_monday());
                let start = day_start - Duration::days(offset);
                (start, start + Duration::days(7))
            }
        }
    }

    /// `at`이 속한 구간의 집계 키
    pub fn key_for(&self, event_type: &str, at: DateTime<Utc>) -> AggregateKey {
        let (start, _) = self.window(at);
        AggregateKey {
            granularity: *self,
            event_type: event_type.to_string(),
            date: start.date_naive(),
            hour: match self {
                Self::Hourly => Some(start.hour() as u8),
                _ => None,
            },
        }
    }

    /// 직전 구간에 속하는 시각 (스케줄 실행 시 "지난 구간" 집계용)
    pub fn previous_window_point(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let (start, _) = self.window(now);
        start - Duration::seconds(1)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(CoreError::Validation {
                field: "granularity".to_string(),
                message: format!("알 수 없는 집계 단위: {other}"),
            }),
        }
    }
}

/// 집계 행 고유 키
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    pub granularity: Granularity,
    pub event_type: String,
    pub date: NaiveDate,
    /// 0-23, 시간 단위 집계에만 존재
    pub hour: Option<u8>,
}

/// 예외 클래스별 발생 수
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionCount {
    pub class: String,
    pub count: u64,
}

/// 집계 메트릭 행
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetricRow {
    pub key: AggregateKey,

    pub total_events: u64,
    pub unique_users: u64,
    pub unique_sessions: u64,

    pub avg_duration: Option<f64>,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub p95_duration: Option<f64>,
    pub p99_duration: Option<f64>,

    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,

    pub total_queries: u64,
    pub avg_query_duration: Option<f64>,

    pub total_exceptions: u64,
    pub top_exceptions: Vec<ExceptionCount>,

    pub jobs_queued: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,

    pub avg_memory_usage: Option<u64>,
    pub peak_memory_usage: Option<u64>,
}

impl AggregatedMetricRow {
    /// 빈 집계 행
    pub fn empty(key: AggregateKey) -> Self {
        Self {
            key,
            total_events: 0,
            unique_users: 0,
            unique_sessions: 0,
            avg_duration: None,
            min_duration: None,
            max_duration: None,
            p95_duration: None,
            p99_duration: None,
            status_2xx: 0,
            status_3xx: 0,
            status_4xx: 0,
            status_5xx: 0,
            total_queries: 0,
            avg_query_duration: None,
            total_exceptions: 0,
            top_exceptions: Vec::new(),
            jobs_queued: 0,
            jobs_completed: 0,
            jobs_failed: 0,
            avg_memory_usage: None,
            peak_memory_usage: None,
        }
    }

    fn is_request(&self) -> bool {
        self.key.event_type == "request"
    }

    fn is_job(&self) -> bool {
        matches!(self.key.event_type.as_str(), "job" | "queued_job")
    }

    /// 요청 에러율 (4xx + 5xx, %, 소수 둘째 자리)
    pub fn error_rate(&self) -> f64 {
        if !self.is_request() || self.total_events == 0 {
            return 0.0;
        }
        let errors = (self.status_4xx + self.status_5xx) as f64;
        round2(errors / self.total_events as f64 * 100.0)
    }

    /// 작업 성공률 (%). 종료된 작업이 없으면 100
    pub fn job_success_rate(&self) -> f64 {
        if !self.is_job() {
            return 0.0;
        }
        let finished = self.jobs_completed + self.jobs_failed;
        if finished == 0 {
            return 100.0;
        }
        round2(self.jobs_completed as f64 / finished as f64 * 100.0)
    }

    pub fn average_response_time(&self) -> f64 {
        self.avg_duration.unwrap_or(0.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
