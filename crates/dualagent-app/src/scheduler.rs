//! 2-루프 스케줄러.
//!
//! 집계(스케줄 식, 기본 매시 정각)와 보존 정책 정리(하루 1회) 오케스트레이션.

use chrono::{DateTime, Utc};
use dualagent_core::config::{AppConfig, CleanupConfig};
use dualagent_core::error::CoreError;
use dualagent_core::ports::storage::MetricStore;
use dualagent_core::schedule::Schedule;
use dualagent_core::LOG_MARKER;
use dualagent_pipeline::aggregator::Aggregator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 정리 루프 간격
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// 스케줄러
pub struct Scheduler {
    store: Arc<dyn MetricStore>,
    aggregator: Arc<Aggregator>,
    schedule: Option<Schedule>,
    cleanup: CleanupConfig,
}

impl Scheduler {
    /// 설정으로 스케줄러 생성. 스케줄 식이 잘못되면 에러
    pub fn new(config: &AppConfig, store: Arc<dyn MetricStore>) -> Result<Self, CoreError> {
        let schedule = if config.aggregation.enabled {
            Some(config.aggregation.schedule.parse::<Schedule>()?)
        } else {
            None
        };

        Ok(Self {
            aggregator: Arc::new(Aggregator::new(
                store.clone(),
                config.aggregation.batch_size,
            )),
            store,
            schedule,
            cleanup: config.database.cleanup.clone(),
        })
    }

    /// 모든 루프 시작. 종료 신호를 받으면 반환
    pub async fn run(&self, shutdown_rx: watch::Receiver<bool>) {
        info!(
            "스케줄러 시작: 집계={}, 정리={}",
            self.schedule
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "비활성".to_string()),
            if self.cleanup.enabled {
                "매일"
            } else {
                "비활성"
            },
        );

        // ============================================================
        // 1. 집계 루프
        // ============================================================
        let aggregation_task = self.schedule.map(|schedule| {
            let aggregator = self.aggregator.clone();
            let mut shutdown1 = shutdown_rx.clone();

            tokio::spawn(async move {
                loop {
                    let next = schedule.next_after(Utc::now());
                    debug!("{LOG_MARKER} 다음 집계: {next}");

                    tokio::select! {
                        _ = tokio::time::sleep(until(next)) => {
                            if let Err(e) = aggregator.run_scheduled(next).await {
                                warn!("{LOG_MARKER} 스케줄 집계 실패: {e}");
                            }
                        }
                        _ = shutdown1.changed() => {
                            info!("집계 루프 종료");
                            break;
                        }
                    }
                }
            })
        });

        // ============================================================
        // 2. 정리 루프 (하루)
        // ============================================================
        let cleanup_task = self.cleanup.enabled.then(|| {
            let store = self.store.clone();
            let cleanup = self.cleanup.clone();
            let mut shutdown2 = shutdown_rx.clone();

            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + CLEANUP_INTERVAL;
                let mut interval = tokio::time::interval_at(start, CLEANUP_INTERVAL);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = enforce_retention(store.as_ref(), &cleanup).await {
                                warn!("{LOG_MARKER} 보존 정책 적용 실패: {e}");
                            }
                        }
                        _ = shutdown2.changed() => {
                            info!("정리 루프 종료");
                            break;
                        }
                    }
                }
            })
        });

        for task in [aggregation_task, cleanup_task].into_iter().flatten() {
            if let Err(e) = task.await {
                warn!("스케줄러 태스크 비정상 종료: {e}");
            }
        }
        info!("스케줄러 종료");
    }
}

/// 보존 기간이 지난 메트릭 삭제. 삭제 건수 반환
pub async fn enforce_retention(
    store: &dyn MetricStore,
    cleanup: &CleanupConfig,
) -> Result<usize, CoreError> {
    let deleted = store
        .delete_older_than(cleanup.retention_days, cleanup.batch_size)
        .await?;
    info!(
        "{LOG_MARKER} 보존 정책 적용: {}일 이전 {deleted}건 삭제",
        cleanup.retention_days
    );
    Ok(deleted)
}

/// 지금부터 `at`까지 남은 시간 (지났으면 0)
fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
