//! 레코드 필터.
//!
//! 판정 순서: 자기 로그 재수집 방지 → 거부 목록 → 허용 목록 → 샘플링.
//! 에러 없이 수락/거부만 돌려준다.

use dualagent_core::config::FilterConfig;
use dualagent_core::models::record::{EventType, Record};
use dualagent_core::LOG_MARKER;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// [0, 1) 균등 난수 공급원
pub trait Sampler: Send + Sync {
    fn draw(&self) -> f64;
}

/// OS 난수 기반 샘플러
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSampler;

impl Sampler for OsSampler {
    fn draw(&self) -> f64 {
        let mut bytes = [0u8; 8];
        match getrandom::getrandom(&mut bytes) {
            // 상위 53비트 → [0, 1)
            Ok(()) => (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64,
            Err(e) => {
                // 난수 실패 시 0.0: 비율이 0보다 큰 타입은 수락된다
                warn!("{LOG_MARKER} 난수 생성 실패: {e}");
                0.0
            }
        }
    }
}

/// 레코드 필터
#[derive(Clone)]
pub struct RecordFilter {
    config: FilterConfig,
    sampler: Arc<dyn Sampler>,
}

impl RecordFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self::with_sampler(config, Arc::new(OsSampler))
    }

    /// 난수 공급원 지정 (테스트용)
    pub fn with_sampler(config: FilterConfig, sampler: Arc<dyn Sampler>) -> Self {
        Self { config, sampler }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// 레코드 수락 여부
    pub fn should_accept(&self, record: &Record) -> bool {
        let tag = record.type_tag();

        if record.event_type() == EventType::Log && is_own_log(record) {
            return false;
        }

        if self.config.disabled_types.iter().any(|t| t == tag) {
            debug!("{LOG_MARKER} 거부 목록 타입: {tag}");
            return false;
        }

        if !self.config.event_types.is_empty() && !self.config.event_types.iter().any(|t| t == tag)
        {
            debug!("{LOG_MARKER} 허용 목록에 없는 타입: {tag}");
            return false;
        }

        let rate = self.config.sampling_rate(tag);
        if rate >= 1.0 {
            return true;
        }
        self.sampler.draw() < rate
    }
}

/// 파이프라인 자체 로그인지 (`message` 또는 첫 `context` 항목에 마커 포함)
fn is_own_log(record: &Record) -> bool {
    let contains_marker = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .is_some_and(|text| text.contains(LOG_MARKER))
    };

    if contains_marker(record.get("message")) {
        return true;
    }

    let first_context = match record.get("context") {
        Some(Value::Array(items)) => items.first(),
        Some(Value::Object(map)) => map.values().next(),
        _ => None,
    };
    contains_marker(first_context)
}
