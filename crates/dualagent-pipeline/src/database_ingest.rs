//! 버퍼링 DB 싱크.
//!
//! 필터를 통과한 레코드를 버퍼에 쌓고, 용량에 도달하면 같은 원자 구간에서
//! 버퍼 전체를 꺼내 변환 후 저장한다. 변환/저장 실패는 해당 레코드만 건너뛴다.

use async_trait::async_trait;
use dualagent_core::config::AppConfig;
use dualagent_core::error::CoreError;
use dualagent_core::models::context::IngestContext;
use dualagent_core::models::record::Record;
use dualagent_core::ports::buffer::{AppendOutcome, RecordBuffer};
use dualagent_core::ports::ingest::{BufferedIngest, Ingest};
use dualagent_core::ports::storage::MetricStore;
use dualagent_core::LOG_MARKER;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::filter::RecordFilter;
use crate::transformer::Transformer;

/// 프로세스 로컬 메모리 버퍼
#[derive(Default)]
pub struct MemoryBuffer {
    records: Mutex<Vec<Record>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordBuffer for MemoryBuffer {
    async fn append(
        &self,
        record: &Record,
        capacity: usize,
        drain_when_full: bool,
    ) -> Result<AppendOutcome, CoreError> {
        let mut records = self.records.lock();
        records.push(record.clone());
        if drain_when_full && records.len() >= capacity {
            Ok(AppendOutcome::Drained(std::mem::take(&mut *records)))
        } else {
            Ok(AppendOutcome::Buffered { len: records.len() })
        }
    }

    async fn take_all(&self) -> Result<Vec<Record>, CoreError> {
        Ok(std::mem::take(&mut *self.records.lock()))
    }

    async fn clear(&self) -> Result<(), CoreError> {
        self.records.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, CoreError> {
        Ok(self.records.lock().len())
    }
}

/// 버퍼링 DB 싱크 — `Ingest` + `BufferedIngest` 포트 구현
pub struct DatabaseIngest {
    enabled: bool,
    buffer_size: usize,
    /// digest 허용 여부 (false면 버퍼링만 하고 자동 배출하지 않음)
    digest_enabled: AtomicBool,
    filter: RecordFilter,
    transformer: Transformer,
    context: IngestContext,
    buffer: Arc<dyn RecordBuffer>,
    store: Arc<dyn MetricStore>,
}

impl DatabaseIngest {
    pub fn new(
        config: &AppConfig,
        context: IngestContext,
        buffer: Arc<dyn RecordBuffer>,
        store: Arc<dyn MetricStore>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            buffer_size: config.buffer_size.max(1),
            digest_enabled: AtomicBool::new(true),
            filter: RecordFilter::new(config.filters.clone()),
            transformer: Transformer::new(),
            context,
            buffer,
            store,
        }
    }

    /// 필터 교체 (샘플러 주입, 필터 비활성화 등)
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn context(&self) -> &IngestContext {
        &self.context
    }

    pub fn filter(&self) -> &RecordFilter {
        &self.filter
    }

    fn digest_enabled(&self) -> bool {
        self.digest_enabled.load(Ordering::Relaxed)
    }

    /// 레코드 변환 후 저장. 실패한 레코드는 건너뛰고 저장 건수를 반환
    async fn persist(&self, records: Vec<Record>) -> usize {
        let total = records.len();
        let mut stored = 0usize;

        for record in records {
            let row = match self.transformer.transform(&record, &self.context) {
                Ok(row) => row,
                Err(e) => {
                    warn!("{LOG_MARKER} 레코드 변환 실패 ({}): {e}", record.type_tag());
                    continue;
                }
            };

            match self.store.store(&row).await {
                Ok(id) => {
                    debug!("{LOG_MARKER} 메트릭 저장: id={id}, type={}", row.event_type);
                    stored += 1;
                }
                Err(e) => warn!("{LOG_MARKER} 메트릭 저장 실패 ({}): {e}", row.event_type),
            }
        }

        if total > 0 {
            info!("{LOG_MARKER} 배치 저장: {stored}/{total}건");
        }
        stored
    }
}

#[async_trait]
impl Ingest for DatabaseIngest {
    async fn write(&self, record: &Record) -> Result<(), CoreError> {
        if !self.enabled || !self.filter.should_accept(record) {
            return Ok(());
        }

        match self
            .buffer
            .append(record, self.buffer_size, self.digest_enabled())
            .await?
        {
            AppendOutcome::Buffered { len } => {
                debug!("{LOG_MARKER} 버퍼 추가: {len}/{}", self.buffer_size);
            }
            AppendOutcome::Drained(batch) => {
                debug!("{LOG_MARKER} 버퍼 가득 참, {}건 배출", batch.len());
                self.persist(batch).await;
            }
        }
        Ok(())
    }

    async fn write_now(&self, records: &[Record]) -> Result<(), CoreError> {
        if !self.enabled {
            return Ok(());
        }
        let accepted: Vec<Record> = records
            .iter()
            .filter(|record| self.filter.should_accept(record))
            .cloned()
            .collect();
        self.persist(accepted).await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.store.ping().await
    }

    async fn should_digest(&self, enabled: bool) {
        self.digest_enabled.store(enabled, Ordering::Relaxed);
    }

    async fn should_digest_when_buffer_is_full(&self, enabled: bool) {
        self.digest_enabled.store(enabled, Ordering::Relaxed);
    }

    async fn digest(&self) -> Result<usize, CoreError> {
        if !self.enabled || !self.digest_enabled() {
            return Ok(0);
        }
        let records = self.buffer.take_all().await?;
        if records.is_empty() {
            return Ok(0);
        }
        Ok(self.persist(records).await)
    }

    async fn flush(&self) -> Result<(), CoreError> {
        self.buffer.clear().await?;
        debug!("{LOG_MARKER} 버퍼 폐기");
        Ok(())
    }
}

#[async_trait]
impl BufferedIngest for DatabaseIngest {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    async fn buffer_count(&self) -> Result<usize, CoreError> {
        self.buffer.len().await
    }
}
