use crate::record::TimestampedRecord;
use std::fmt::Display;
use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Appends records as `<timestamp>,<value>` lines, in arrival order.
pub struct RecordSink<W> {
    label: &'static str,
    out: W,
    written: u64,
}

impl RecordSink<BufWriter<File>> {
    /// Opens `path` empty, truncating whatever was there.
    pub async fn create(label: &'static str, path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        tracing::info!(sink = label, path = %path.display(), "opened output file");
        Ok(Self::new(label, BufWriter::new(file)))
    }
}

impl<W: AsyncWrite + Unpin> RecordSink<W> {
    pub fn new(label: &'static str, out: W) -> Self {
        Self {
            label,
            out,
            written: 0,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Writes one whole line and flushes it, so a record the sink has
    /// accepted is never left half-written.
    pub async fn write<V: Display>(&mut self, record: &TimestampedRecord<V>) -> io::Result<()> {
        let line = record.to_line();
        self.out.write_all(line.as_bytes()).await?;
        self.out.flush().await?;
        self.written += 1;
        tracing::trace!(sink = self.label, line = line.trim_end(), "wrote record");
        Ok(())
    }

    pub async fn close(mut self) -> io::Result<u64> {
        self.out.flush().await?;
        self.out.shutdown().await?;
        tracing::debug!(sink = self.label, written = self.written, "closed output");
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn record(ts: &str, value: i64) -> TimestampedRecord<Decimal> {
        TimestampedRecord::new(DateTime::parse_from_rfc3339(ts).unwrap(), Decimal::from(value))
    }

    #[tokio::test]
    async fn writes_lines_in_order_and_truncates_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temperatures.csv");
        std::fs::write(&path, "stale contents\n").unwrap();

        let mut sink = RecordSink::create("temperature", &path).await.unwrap();
        sink.write(&record("2021-10-01T12:00:00Z", 70)).await.unwrap();
        sink.write(&record("2021-10-01T12:00:01Z", 71)).await.unwrap();
        assert_eq!(sink.close().await.unwrap(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "2021-10-01T12:00:00Z,70\n2021-10-01T12:00:01Z,71\n"
        );
    }

    #[tokio::test]
    async fn accepted_records_are_on_disk_before_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("averages.csv");
        let mut sink = RecordSink::create("average", &path).await.unwrap();
        sink.write(&record("2021-10-01T12:00:00Z", 5)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "2021-10-01T12:00:00Z,5\n");
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn writes_into_any_async_writer() {
        let mut sink = RecordSink::new("memory", Vec::new());
        sink.write(&record("2021-10-01T12:00:00+01:00", 1)).await.unwrap();
        assert_eq!(sink.written(), 1);
        assert_eq!(sink.out, b"2021-10-01T12:00:00+01:00,1\n".to_vec());
    }
}
