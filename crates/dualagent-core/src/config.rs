//! 파이프라인 설정 구조체.
//!
//! 버퍼 용량, 필터/샘플링, DB 경로와 보존 정책, 집계 스케줄, 성능 임계값을
//! 정의한다. `ConfigManager`가 JSON 파일로 로드/저장하고 `DUAL_AGENT_*`
//! 환경 변수가 파일 값을 덮어쓴다.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;
use crate::schedule::Schedule;

/// 환경 변수 접두사
pub const ENV_PREFIX: &str = "DUAL_AGENT_";

/// 최상위 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 보조(DB) 수집 활성화
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// install 시 자동 구성 여부
    #[serde(default = "default_true")]
    pub auto_configure: bool,
    /// 버퍼 용량 (레코드 수)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 버퍼 항목 만료 시간 (초)
    #[serde(default = "default_buffer_ttl_secs")]
    pub buffer_ttl_secs: u64,
    /// 필터/샘플링
    #[serde(default)]
    pub filters: FilterConfig,
    /// 데이터베이스
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 집계
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// 성능 임계값
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// 설정 포맷 버전
    #[serde(default = "default_version")]
    pub version: String,
}

// ============================================================
// 필터 설정
// ============================================================

/// 필터/샘플링 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// 허용 목록. 비어 있으면 모든 타입 허용
    #[serde(default)]
    pub event_types: Vec<String>,
    /// 타입별 샘플링 비율 (0.0 ~ 1.0). 없는 타입은 1.0
    #[serde(default = "default_sampling_rates")]
    pub sampling_rates: BTreeMap<String, f64>,
    /// 거부 목록
    #[serde(default)]
    pub disabled_types: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            event_types: Vec::new(),
            sampling_rates: default_sampling_rates(),
            disabled_types: Vec::new(),
        }
    }
}

impl FilterConfig {
    /// 타입의 샘플링 비율 (미설정 시 1.0)
    pub fn sampling_rate(&self, event_type: &str) -> f64 {
        self.sampling_rates.get(event_type).copied().unwrap_or(1.0)
    }
}

fn default_sampling_rates() -> BTreeMap<String, f64> {
    [
        ("request", 1.0),
        ("query", 0.1),
        ("exception", 1.0),
        ("job", 0.5),
        ("log", 0.01),
        ("cache", 0.05),
        ("mail", 0.1),
        ("notification", 0.1),
        ("scheduled_task", 0.2),
        ("test", 1.0),
    ]
    .into_iter()
    .map(|(event_type, rate)| (event_type.to_string(), rate))
    .collect()
}

// ============================================================
// 데이터베이스 설정
// ============================================================

/// 데이터베이스 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite 파일 경로. 없으면 데이터 디렉토리의 기본 파일
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// 보존 정책
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// 보존 정책
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// 한 번에 삭제할 행 수
    #[serde(default = "default_cleanup_batch_size")]
    pub batch_size: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
            batch_size: default_cleanup_batch_size(),
        }
    }
}

// ============================================================
// 집계 설정
// ============================================================

/// 집계 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 실행 스케줄 (`분 시 * * *`)
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// 한 페이지에 읽을 메트릭 행 수
    #[serde(default = "default_aggregation_batch_size")]
    pub batch_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_schedule(),
            batch_size: default_aggregation_batch_size(),
        }
    }
}

// ============================================================
// 성능 임계값
// ============================================================

/// 느린 요청/쿼리, 메모리 경고 임계값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// 밀리초
    #[serde(default = "default_slow_request_threshold")]
    pub slow_request_threshold: u64,
    /// 밀리초
    #[serde(default = "default_slow_query_threshold")]
    pub slow_query_threshold: u64,
    /// 바이트
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            slow_request_threshold: default_slow_request_threshold(),
            slow_query_threshold: default_slow_query_threshold(),
            memory_threshold: default_memory_threshold(),
        }
    }
}

// ============================================================
// AppConfig impl
// ============================================================

impl AppConfig {
    /// 기본 설정 생성
    pub fn default_config() -> Self {
        Self {
            enabled: true,
            auto_configure: true,
            buffer_size: default_buffer_size(),
            buffer_ttl_secs: default_buffer_ttl_secs(),
            filters: FilterConfig::default(),
            database: DatabaseConfig::default(),
            aggregation: AggregationConfig::default(),
            performance: PerformanceConfig::default(),
            version: default_version(),
        }
    }

    pub fn buffer_ttl(&self) -> Duration {
        Duration::from_secs(self.buffer_ttl_secs)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.buffer_size == 0 {
            return Err(CoreError::Validation {
                field: "buffer_size".to_string(),
                message: "1 이상이어야 합니다".to_string(),
            });
        }

        for (event_type, rate) in &self.filters.sampling_rates {
            if !(0.0..=1.0).contains(rate) {
                return Err(CoreError::Validation {
                    field: format!("filters.sampling_rates.{event_type}"),
                    message: format!("0.0 ~ 1.0 범위가 아님: {rate}"),
                });
            }
        }

        if self.database.cleanup.batch_size == 0 {
            return Err(CoreError::Validation {
                field: "database.cleanup.batch_size".to_string(),
                message: "1 이상이어야 합니다".to_string(),
            });
        }

        if self.aggregation.batch_size == 0 {
            return Err(CoreError::Validation {
                field: "aggregation.batch_size".to_string(),
                message: "1 이상이어야 합니다".to_string(),
            });
        }

        self.aggregation.schedule.parse::<Schedule>()?;
        Ok(())
    }

    /// 프로세스 환경 변수로 덮어쓰기
    pub fn apply_env_overrides(&mut self) -> Result<(), CoreError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// `DUAL_AGENT_*` 값으로 덮어쓰기
    ///
    /// `lookup`은 전체 변수 이름을 받아 값을 돌려준다. 테스트에서 프로세스
    /// 환경을 건드리지 않도록 분리했다.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = get("ENABLED") {
            self.enabled = parse_bool("ENABLED", &value)?;
        }
        if let Some(value) = get("AUTO_CONFIGURE") {
            self.auto_configure = parse_bool("AUTO_CONFIGURE", &value)?;
        }
        if let Some(value) = get("BUFFER_SIZE") {
            self.buffer_size = parse_number("BUFFER_SIZE", &value)?;
        }
        if let Some(value) = get("BUFFER_TTL") {
            self.buffer_ttl_secs = parse_number("BUFFER_TTL", &value)?;
        }
        if let Some(value) = get("EVENT_TYPES") {
            self.filters.event_types = parse_list(&value);
        }
        if let Some(value) = get("DISABLED_TYPES") {
            self.filters.disabled_types = parse_list(&value);
        }
        if let Some(value) = get("DB_PATH") {
            self.database.path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("CLEANUP_ENABLED") {
            self.database.cleanup.enabled = parse_bool("CLEANUP_ENABLED", &value)?;
        }
        if let Some(value) = get("RETENTION_DAYS") {
            self.database.cleanup.retention_days = parse_number("RETENTION_DAYS", &value)?;
        }
        if let Some(value) = get("CLEANUP_BATCH_SIZE") {
            self.database.cleanup.batch_size = parse_number("CLEANUP_BATCH_SIZE", &value)?;
        }
        if let Some(value) = get("AGGREGATION_ENABLED") {
            self.aggregation.enabled = parse_bool("AGGREGATION_ENABLED", &value)?;
        }
        if let Some(value) = get("AGGREGATION_SCHEDULE") {
            self.aggregation.schedule = value;
        }
        if let Some(value) = get("SLOW_REQUEST_THRESHOLD") {
            self.performance.slow_request_threshold =
                parse_number("SLOW_REQUEST_THRESHOLD", &value)?;
        }
        if let Some(value) = get("SLOW_QUERY_THRESHOLD") {
            self.performance.slow_query_threshold = parse_number("SLOW_QUERY_THRESHOLD", &value)?;
        }
        if let Some(value) = get("MEMORY_THRESHOLD") {
            self.performance.memory_threshold = parse_number("MEMORY_THRESHOLD", &value)?;
        }

        // 타입별 샘플링: DUAL_AGENT_SAMPLE_<TYPE>
        let known: Vec<String> = self.filters.sampling_rates.keys().cloned().collect();
        for event_type in known {
            let name = format!("SAMPLE_{}", event_type.to_ascii_uppercase());
            if let Some(value) = get(&name) {
                let rate: f64 = parse_number(&name, &value)?;
                self.filters.sampling_rates.insert(event_type, rate);
            }
        }

        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, CoreError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(CoreError::Config(format!(
            "{ENV_PREFIX}{name}: 불리언 값이 아님: {other}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{ENV_PREFIX}{name}: 숫자가 아님: {value}")))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_true() -> bool {
    true
}
fn default_buffer_size() -> usize {
    100
}
fn default_buffer_ttl_secs() -> u64 {
    3_600
}
fn default_retention_days() -> u32 {
    30
}
fn default_cleanup_batch_size() -> usize {
    1_000
}
fn default_schedule() -> String {
    "0 * * * *".to_string()
}
fn default_aggregation_batch_size() -> usize {
    10_000
}
fn default_slow_request_threshold() -> u64 {
    1_000
}
fn default_slow_query_threshold() -> u64 {
    100
}
fn default_memory_threshold() -> u64 {
    128 * 1024 * 1024
}
fn default_version() -> String {
    "1.0.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_sampling_rates_match_agent_defaults() {
        let config = AppConfig::default_config();
        assert_eq!(config.filters.sampling_rate("request"), 1.0);
        assert_eq!(config.filters.sampling_rate("query"), 0.1);
        assert_eq!(config.filters.sampling_rate("log"), 0.01);
        assert_eq!(config.filters.sampling_rate("scheduled_task"), 0.2);
        // 미설정 타입은 항상 허용
        assert_eq!(config.filters.sampling_rate("custom_widget"), 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"buffer_size": 5}"#).unwrap();
        assert_eq!(config.buffer_size, 5);
        assert!(config.enabled);
        assert_eq!(config.aggregation.batch_size, 10_000);
        assert_eq!(config.filters.sampling_rate("job"), 0.5);
    }

    #[test]
    fn validate_rejects_out_of_range_rate() {
        let mut config = AppConfig::default_config();
        config.filters.sampling_rates.insert("query".to_string(), 1.5);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref field, .. } if field.contains("query")));
    }

    #[test]
    fn validate_rejects_zero_buffer_and_bad_schedule() {
        let mut config = AppConfig::default_config();
        config.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default_config();
        config.aggregation.schedule = "every hour".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<String, String> = [
            ("DUAL_AGENT_ENABLED", "false"),
            ("DUAL_AGENT_BUFFER_SIZE", "25"),
            ("DUAL_AGENT_DISABLED_TYPES", "cache, log"),
            ("DUAL_AGENT_SAMPLE_QUERY", "1.0"),
            ("DUAL_AGENT_DB_PATH", "/tmp/dualagent.db"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut config = AppConfig::default_config();
        config
            .apply_overrides_from(|key| env.get(key).cloned())
            .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.buffer_size, 25);
        assert_eq!(config.filters.disabled_types, vec!["cache", "log"]);
        assert_eq!(config.filters.sampling_rate("query"), 1.0);
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/tmp/dualagent.db"))
        );
    }

    #[test]
    fn env_override_rejects_garbage() {
        let mut config = AppConfig::default_config();
        let result = config.apply_overrides_from(|key| {
            (key == "DUAL_AGENT_BUFFER_SIZE").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
