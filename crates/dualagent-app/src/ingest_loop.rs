//! `run` 명령의 수집 루프.
//!
//! 한 줄에 JSON 레코드 하나(NDJSON)를 읽어 싱크에 기록하고,
//! 입력이 끝나면 digest 한다.

use dualagent_core::error::CoreError;
use dualagent_core::models::record::Record;
use dualagent_core::ports::ingest::Ingest;
use dualagent_core::LOG_MARKER;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// 수집 루프 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// 싱크에 전달한 레코드 수
    pub written: usize,
    /// 파싱 실패로 건너뛴 줄 수
    pub skipped: usize,
    /// 종료 digest에서 내보낸 건수
    pub digested: usize,
}

/// 입력이 끝날 때까지 레코드를 읽어 기록
pub async fn run<R>(reader: R, ingest: &dyn Ingest) -> Result<IngestStats, CoreError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = match serde_json::from_str(line)
            .map_err(CoreError::from)
            .and_then(|value| Record::from_value(value).map_err(CoreError::from))
        {
            Ok(record) => record,
            Err(e) => {
                warn!("{LOG_MARKER} 입력 줄 무시: {e}");
                stats.skipped += 1;
                continue;
            }
        };

        if let Err(e) = ingest.write(&record).await {
            warn!("{LOG_MARKER} 레코드 기록 실패: {e}");
            continue;
        }
        stats.written += 1;
        debug!("{LOG_MARKER} 레코드 수신: {}", record.type_tag());
    }

    stats.digested = ingest.digest().await?;
    info!(
        "{LOG_MARKER} 입력 종료: 기록 {}건, 무시 {}건, digest {}건",
        stats.written, stats.skipped, stats.digested
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<Record>>,
        digests: Mutex<usize>,
    }

    #[async_trait]
    impl Ingest for CollectingSink {
        async fn write(&self, record: &Record) -> Result<(), CoreError> {
            self.records.lock().push(record.clone());
            Ok(())
        }
        async fn write_now(&self, records: &[Record]) -> Result<(), CoreError> {
            self.records.lock().extend_from_slice(records);
            Ok(())
        }
        async fn ping(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn should_digest(&self, _enabled: bool) {}
        async fn should_digest_when_buffer_is_full(&self, _enabled: bool) {}
        async fn digest(&self) -> Result<usize, CoreError> {
            *self.digests.lock() += 1;
            Ok(self.records.lock().len())
        }
        async fn flush(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reads_ndjson_and_digests_at_eof() {
        let input = b"{\"t\":\"request\",\"url\":\"/a\"}\n\n{\"t\":\"query\"}\n" as &[u8];
        let sink = CollectingSink::default();

        let stats = run(input, &sink).await.unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.digested, 2);
        assert_eq!(*sink.digests.lock(), 1);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let input = b"not json\n[1,2]\n{\"t\":\"log\",\"message\":\"ok\"}\n" as &[u8];
        let sink = CollectingSink::default();

        let stats = run(input, &sink).await.unwrap();
        assert_eq!(stats.written, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(sink.records.lock()[0].type_tag(), "log");
    }
}
