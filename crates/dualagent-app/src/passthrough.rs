//! 1차 싱크: NDJSON 패스스루.
//!
//! 받은 레코드를 한 줄에 하나씩 그대로 내보낸다. `run`에서는 stdout으로,
//! `test`에서는 버리는 writer로 연결된다.

use async_trait::async_trait;
use dualagent_core::error::CoreError;
use dualagent_core::models::record::Record;
use dualagent_core::ports::ingest::Ingest;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

/// NDJSON 패스스루 싱크
pub struct PassthroughIngest {
    out: Mutex<Box<dyn Write + Send>>,
    /// 마지막 digest 이후 내보낸 줄 수
    pending: AtomicUsize,
}

impl PassthroughIngest {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// 출력을 버리는 싱크 (self-test용)
    pub fn discard() -> Self {
        Self::new(Box::new(io::sink()))
    }

    fn emit(&self, records: &[Record]) -> Result<(), CoreError> {
        let mut out = self.out.lock();
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(out, "{line}")?;
        }
        self.pending.fetch_add(records.len(), Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl Ingest for PassthroughIngest {
    async fn write(&self, record: &Record) -> Result<(), CoreError> {
        self.emit(std::slice::from_ref(record))
    }

    async fn write_now(&self, records: &[Record]) -> Result<(), CoreError> {
        self.emit(records)?;
        self.out.lock().flush()?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn should_digest(&self, _enabled: bool) {}

    async fn should_digest_when_buffer_is_full(&self, _enabled: bool) {}

    async fn digest(&self) -> Result<usize, CoreError> {
        self.out.lock().flush()?;
        Ok(self.pending.swap(0, Ordering::Relaxed))
    }

    async fn flush(&self) -> Result<(), CoreError> {
        self.pending.store(0, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    /// 공유 버퍼 writer
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn writes_one_line_per_record() {
        let buf = SharedBuf::default();
        let sink = PassthroughIngest::new(Box::new(buf.clone()));

        sink.write(&record(json!({"t": "request", "url": "/a"})))
            .await
            .unwrap();
        sink.write_now(&[
            record(json!({"t": "query", "sql": "select 1"})),
            record(json!({"t": "log", "message": "hi"})),
        ])
        .await
        .unwrap();

        let text = String::from_utf8(buf.0.lock().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["url"], "/a");
    }

    #[tokio::test]
    async fn digest_reports_lines_since_last_digest() {
        let sink = PassthroughIngest::discard();
        let r = record(json!({"t": "test"}));

        sink.write(&r).await.unwrap();
        sink.write(&r).await.unwrap();
        assert_eq!(sink.digest().await.unwrap(), 2);
        assert_eq!(sink.digest().await.unwrap(), 0);

        sink.write(&r).await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.digest().await.unwrap(), 0);
    }
}
