//! `install` 명령.
//!
//! 설정 파일 준비 → 데이터 디렉토리와 DB 생성 → 마이그레이션 확인.

use anyhow::{Context, Result};
use dualagent_core::config_manager::ConfigManager;
use dualagent_storage::migration::CURRENT_VERSION;

use crate::wiring;

/// 설치 실행
pub fn run(manager: &ConfigManager, force: bool) -> Result<()> {
    println!("🚀 dualagent 설치 중...");
    println!();

    println!("📋 설정 파일 준비...");
    if force {
        manager.reset().context("설정 초기화 실패")?;
        println!("✅ 기본 설정으로 덮어씀: {}", manager.config_path().display());
    } else {
        println!("✅ 설정 파일: {}", manager.config_path().display());
    }

    let config = manager.effective().context("설정 검증 실패")?;
    let db_path = ConfigManager::database_path(&config)?;

    println!("🗄️  데이터베이스 마이그레이션...");
    let storage = wiring::open_storage(&config).context("데이터베이스 초기화 실패")?;
    let version = storage.schema_version()?;
    let tables_ok = ["dual_agent_metrics", "dual_agent_aggregated_metrics", "ingest_buffer"]
        .iter()
        .map(|table| storage.table_exists(table))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .all(|exists| exists);

    if version == CURRENT_VERSION && tables_ok {
        println!("✅ 마이그레이션 완료 (스키마 v{version})");
    } else {
        println!("⚠️  스키마 상태 확인 필요: v{version} (기대값 v{CURRENT_VERSION})");
    }

    println!();
    println!("🎉 dualagent 설치 완료!");
    println!();
    println!("┌─────────────────────────────────────────────────────────────────┐");
    println!("│ 구성 요소      상태                                             │");
    println!("├─────────────────────────────────────────────────────────────────┤");
    println!("│ 설정           ✅ {}", manager.config_path().display());
    println!("│ 데이터베이스   ✅ {}", db_path.display());
    println!(
        "│ 수집           {}",
        if config.enabled {
            "✅ 활성"
        } else {
            "❌ 비활성"
        }
    );
    println!("└─────────────────────────────────────────────────────────────────┘");
    println!();
    println!("💡 다음 단계:");
    println!("   dualagent status        현재 상태 확인");
    println!("   dualagent test          테스트 레코드로 파이프라인 점검");
    println!("   <agent> | dualagent run stdin 레코드를 DB로 복제");
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &tempfile::TempDir) -> ConfigManager {
        let manager = ConfigManager::with_path(dir.path().join("config.json")).unwrap();
        let db = dir.path().join("data").join("dualagent.db");
        manager
            .update_with(|config| config.database.path = Some(db))
            .unwrap();
        manager
    }

    #[test]
    fn install_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);

        run(&manager, false).unwrap();
        assert!(dir.path().join("data").join("dualagent.db").exists());
    }
}
