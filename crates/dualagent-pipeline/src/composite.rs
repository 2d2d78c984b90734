//! 이중 기록 싱크.
//!
//! 모든 호출을 1차 싱크(모니터링 에이전트)에 먼저, 이어서 활성화된 보조 싱크(DB)에
//! 전달한다. 각 호출의 실패는 그 자리에서 로그로 흡수되어 다른 싱크나 호출자에게
//! 전파되지 않는다.

use async_trait::async_trait;
use dualagent_core::error::CoreError;
use dualagent_core::models::record::Record;
use dualagent_core::ports::ingest::{BufferedIngest, Ingest};
use dualagent_core::LOG_MARKER;
use std::sync::Arc;
use tracing::{error, warn};

/// 1차 + 보조 싱크 묶음
pub struct CompositeIngest {
    primary: Arc<dyn Ingest>,
    secondary: Arc<dyn BufferedIngest>,
}

impl CompositeIngest {
    pub fn new(primary: Arc<dyn Ingest>, secondary: Arc<dyn BufferedIngest>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &Arc<dyn Ingest> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn BufferedIngest> {
        &self.secondary
    }

    fn secondary_enabled(&self) -> bool {
        self.secondary.is_enabled()
    }
}

fn log_primary(op: &str, e: CoreError) {
    error!("{LOG_MARKER} 1차 싱크 {op} 실패: {e}");
}

fn log_secondary(op: &str, e: CoreError) {
    warn!("{LOG_MARKER} DB 싱크 {op} 실패: {e}");
}

#[async_trait]
impl Ingest for CompositeIngest {
    async fn write(&self, record: &Record) -> Result<(), CoreError> {
        if let Err(e) = self.primary.write(record).await {
            log_primary("write", e);
        }
        if self.secondary_enabled() {
            if let Err(e) = self.secondary.write(record).await {
                log_secondary("write", e);
            }
        }
        Ok(())
    }

    async fn write_now(&self, records: &[Record]) -> Result<(), CoreError> {
        if let Err(e) = self.primary.write_now(records).await {
            log_primary("write_now", e);
        }
        if self.secondary_enabled() {
            if let Err(e) = self.secondary.write_now(records).await {
                log_secondary("write_now", e);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        if let Err(e) = self.primary.ping().await {
            log_primary("ping", e);
        }
        if self.secondary_enabled() {
            if let Err(e) = self.secondary.ping().await {
                log_secondary("ping", e);
            }
        }
        Ok(())
    }

    async fn should_digest(&self, enabled: bool) {
        self.primary.should_digest(enabled).await;
        if self.secondary_enabled() {
            self.secondary.should_digest(enabled).await;
        }
    }

    async fn should_digest_when_buffer_is_full(&self, enabled: bool) {
        self.primary.should_digest_when_buffer_is_full(enabled).await;
        if self.secondary_enabled() {
            self.secondary
                .should_digest_when_buffer_is_full(enabled)
                .await;
        }
    }

    /// 두 싱크가 내보낸 건수의 합
    async fn digest(&self) -> Result<usize, CoreError> {
        let mut total = match self.primary.digest().await {
            Ok(n) => n,
            Err(e) => {
                log_primary("digest", e);
                0
            }
        };
        if self.secondary_enabled() {
            match self.secondary.digest().await {
                Ok(n) => total += n,
                Err(e) => log_secondary("digest", e),
            }
        }
        Ok(total)
    }

    async fn flush(&self) -> Result<(), CoreError> {
        if let Err(e) = self.primary.flush().await {
            log_primary("flush", e);
        }
        if self.secondary_enabled() {
            if let Err(e) = self.secondary.flush().await {
                log_secondary("flush", e);
            }
        }
        Ok(())
    }
}
