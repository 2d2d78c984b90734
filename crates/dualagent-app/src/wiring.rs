//! 어댑터 와이어링.
//!
//! SQLite 저장소 → 내구 버퍼 → DB 싱크 → composite 순서로 조립한다.

use chrono::Utc;
use dualagent_core::config::AppConfig;
use dualagent_core::config_manager::ConfigManager;
use dualagent_core::error::CoreError;
use dualagent_core::models::context::IngestContext;
use dualagent_core::ports::ingest::Ingest;
use dualagent_pipeline::composite::CompositeIngest;
use dualagent_pipeline::database_ingest::DatabaseIngest;
use dualagent_storage::sqlite::{SqliteBuffer, SqliteStorage};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// 조립된 수집 파이프라인
pub struct Pipeline {
    pub storage: Arc<SqliteStorage>,
    pub database: Arc<DatabaseIngest>,
    pub ingest: Arc<CompositeIngest>,
}

impl Pipeline {
    /// 저장소 위에 DB 싱크와 composite 조립
    pub fn assemble(
        config: &AppConfig,
        storage: Arc<SqliteStorage>,
        context: IngestContext,
        primary: Arc<dyn Ingest>,
    ) -> Self {
        let buffer = Arc::new(SqliteBuffer::new(storage.clone(), config.buffer_ttl()));
        let database = Arc::new(DatabaseIngest::new(
            config,
            context,
            buffer,
            storage.clone(),
        ));
        let ingest = Arc::new(CompositeIngest::new(primary, database.clone()));

        Self {
            storage,
            database,
            ingest,
        }
    }
}

/// 설정의 DB 경로로 저장소 열기 (마이그레이션 포함)
pub fn open_storage(config: &AppConfig) -> Result<Arc<SqliteStorage>, CoreError> {
    let path = ConfigManager::database_path(config)?;
    let storage = SqliteStorage::open(&path)?;
    info!("DB 경로: {}", path.display());
    Ok(Arc::new(storage))
}

/// 세션 ID 생성 -- 타임스탬프 + UUID 앞 8자리
pub fn generate_session_id() -> String {
    let ts = Utc::now().format("%Y%m%d%H%M%S");
    let id = Uuid::new_v4().simple().to_string();
    format!("sess_{ts}_{}", &id[..8])
}

/// 현재 프로세스의 수집 컨텍스트
pub fn host_context(environment: &str, app_version: &str) -> IngestContext {
    IngestContext::for_host(environment, app_version).with_session(generate_session_id())
}
