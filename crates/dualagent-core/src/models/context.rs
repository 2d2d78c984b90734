//! 수집 컨텍스트.
//!
//! 세션/사용자/환경/호스트/앱 버전은 레코드가 아니라 호출자가 제공한다.

use serde::{Deserialize, Serialize};

/// 변환 시점의 애플리케이션 컨텍스트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestContext {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub environment: Option<String>,
    pub server_name: Option<String>,
    pub app_version: Option<String>,
}

impl IngestContext {
    /// 현재 호스트 기준 컨텍스트 (세션/사용자 없음)
    pub fn for_host(environment: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            session_id: None,
            user_id: None,
            environment: Some(environment.into()),
            server_name: Some(detect_server_name()),
            app_version: Some(app_version.into()),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// 호스트 이름 (`HOSTNAME` → /etc/hostname → "unknown")
pub fn detect_server_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
