//! 설정 파일 관리.
//!
//! 플랫폼별 설정 디렉토리에 JSON 파일로 설정을 저장/로드한다.
//! 런타임에는 파일 값 위에 `DUAL_AGENT_*` 환경 변수를 덮어쓴 설정을 사용한다.

use directories::ProjectDirs;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::CoreError;

/// 설정 파일 이름
const CONFIG_FILE_NAME: &str = "config.json";

/// 기본 DB 파일 이름
const DATABASE_FILE_NAME: &str = "dualagent.db";

/// 설정 관리자
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
    config_path: PathBuf,
}

impl ConfigManager {
    /// 플랫폼 기본 경로로 설정 관리자 생성
    pub fn new() -> Result<Self, CoreError> {
        Self::with_path(Self::default_config_path()?)
    }

    /// 지정된 경로로 설정 관리자 생성
    ///
    /// 설정 파일이 없으면 기본 설정을 생성하고 저장한다.
    pub fn with_path(config_path: PathBuf) -> Result<Self, CoreError> {
        ensure_parent_dir(&config_path)?;

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = AppConfig::default_config();
            Self::save_to_file(&config_path, &default_config)?;
            info!("기본 설정 파일 생성: {}", config_path.display());
            default_config
        };

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// 기본 설정으로 파일을 새로 씀 (`install --force`)
    pub fn reset(&self) -> Result<AppConfig, CoreError> {
        let config = AppConfig::default_config();
        self.update(config.clone())?;
        info!("설정 파일 초기화: {}", self.config_path.display());
        Ok(config)
    }

    /// 파일에 저장된 설정 (복제본)
    pub fn get(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// 환경 변수를 덮어쓴 실행 설정
    pub fn effective(&self) -> Result<AppConfig, CoreError> {
        let mut config = self.get();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 업데이트 및 파일 저장
    pub fn update(&self, new_config: AppConfig) -> Result<(), CoreError> {
        new_config.validate()?;
        *self.config.write() = new_config.clone();
        Self::save_to_file(&self.config_path, &new_config)?;
        debug!("설정 저장 완료: {}", self.config_path.display());
        Ok(())
    }

    /// 특정 필드만 업데이트
    pub fn update_with<F>(&self, updater: F) -> Result<AppConfig, CoreError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = self.get();
        updater(&mut config);
        self.update(config.clone())?;
        Ok(config)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 설정 다시 로드
    pub fn reload(&self) -> Result<(), CoreError> {
        let config = Self::load_from_file(&self.config_path)?;
        *self.config.write() = config;
        info!("설정 다시 로드 완료");
        Ok(())
    }

    /// DB 파일 경로 (설정값 → 데이터 디렉토리 기본 파일)
    pub fn database_path(config: &AppConfig) -> Result<PathBuf, CoreError> {
        match &config.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join(DATABASE_FILE_NAME)),
        }
    }

    fn default_config_path() -> Result<PathBuf, CoreError> {
        Ok(Self::project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
    }

    /// 플랫폼별 설정 디렉토리
    pub fn config_dir() -> Result<PathBuf, CoreError> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// 플랫폼별 데이터 디렉토리 (DB)
    pub fn data_dir() -> Result<PathBuf, CoreError> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    fn project_dirs() -> Result<ProjectDirs, CoreError> {
        ProjectDirs::from("com", "dualagent", "dualagent").ok_or_else(|| {
            CoreError::Config("홈 디렉토리를 찾을 수 없습니다".to_string())
        })
    }

    fn load_from_file(path: &Path) -> Result<AppConfig, CoreError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("설정 파일 읽기 실패: {}: {}", path.display(), e))
        })?;

        let config: AppConfig = serde_json::from_str(&content).map_err(|e| {
            CoreError::Config(format!("설정 파일 파싱 실패: {}: {}", path.display(), e))
        })?;

        debug!("설정 파일 로드 완료: {}", path.display());
        Ok(config)
    }

    fn save_to_file(path: &Path, config: &AppConfig) -> Result<(), CoreError> {
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| CoreError::Config(format!("설정 직렬화 실패: {e}")))?;

        fs::write(path, content).map_err(|e| {
            CoreError::Config(format!("설정 파일 저장 실패: {}: {}", path.display(), e))
        })
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::Config(format!(
                    "설정 디렉토리 생성 실패: {}: {}",
                    parent.display(),
                    e
                ))
            })?;
            info!("설정 디렉토리 생성: {}", parent.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let manager = ConfigManager::with_path(config_path.clone()).unwrap();
        assert!(config_path.exists());
        assert_eq!(manager.get().buffer_size, 100);
    }

    #[test]
    fn update_and_persist_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let manager = ConfigManager::with_path(config_path.clone()).unwrap();
        manager
            .update_with(|c| {
                c.buffer_size = 10;
                c.database.cleanup.retention_days = 60;
            })
            .unwrap();

        let config = ConfigManager::with_path(config_path).unwrap().get();
        assert_eq!(config.buffer_size, 10);
        assert_eq!(config.database.cleanup.retention_days, 60);
    }

    #[test]
    fn invalid_update_is_rejected_and_not_saved() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let manager = ConfigManager::with_path(config_path.clone()).unwrap();

        assert!(manager.update_with(|c| c.buffer_size = 0).is_err());
        assert_eq!(manager.get().buffer_size, 100);
        let reloaded = ConfigManager::with_path(config_path).unwrap().get();
        assert_eq!(reloaded.buffer_size, 100);
    }

    #[test]
    fn reload_and_reset() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let manager = ConfigManager::with_path(config_path.clone()).unwrap();

        let mut config = manager.get();
        config.buffer_size = 7;
        fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        manager.reload().unwrap();
        assert_eq!(manager.get().buffer_size, 7);

        manager.reset().unwrap();
        assert_eq!(manager.get().buffer_size, 100);
    }

    #[test]
    fn database_path_prefers_config() {
        let mut config = AppConfig::default_config();
        config.database.path = Some(PathBuf::from("/tmp/custom.db"));
        assert_eq!(
            ConfigManager::database_path(&config).unwrap(),
            PathBuf::from("/tmp/custom.db")
        );
    }
}
