//! Result sinks. The scheduler serializes writes, so sinks only need to be
//! Send, not Sync.

use std::io::Write;

use async_trait::async_trait;

use placescout_common::Entry;

#[async_trait]
pub trait ResultSink: Send {
    async fn write(&mut self, job_id: &str, entries: &[Entry]) -> anyhow::Result<()>;

    async fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Emits the header once per stream, then one row per entry in the §6 column
/// order.
pub struct CsvSink<W: Write + Send> {
    writer: csv::Writer<W>,
    wrote_header: bool,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self { writer: csv::Writer::from_writer(inner), wrote_header: false }
    }
}

#[async_trait]
impl<W: Write + Send> ResultSink for CsvSink<W> {
    async fn write(&mut self, _job_id: &str, entries: &[Entry]) -> anyhow::Result<()> {
        if !self.wrote_header {
            self.writer.write_record(Entry::csv_headers())?;
            self.wrote_header = true;
        }
        for entry in entries {
            self.writer.write_record(entry.csv_row())?;
        }
        self.writer.flush()?;
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

pub struct JsonlSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: Write + Send> ResultSink for JsonlSink<W> {
    async fn write(&mut self, _job_id: &str, entries: &[Entry]) -> anyhow::Result<()> {
        for entry in entries {
            serde_json::to_writer(&mut self.writer, entry)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str) -> Entry {
        Entry { title: title.to_string(), category: "Cafe".to_string(), ..Default::default() }
    }

    #[tokio::test]
    async fn csv_header_written_once() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write("j1", &[entry("A")]).await.unwrap();
        sink.write("j2", &[entry("B")]).await.unwrap();
        let out = String::from_utf8(sink.writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("input_id,link,title,category"));
        assert!(lines[1].contains("A"));
        assert!(lines[2].contains("B"));
    }

    #[tokio::test]
    async fn jsonl_one_record_per_line() {
        let mut sink = JsonlSink::new(Vec::new());
        sink.write("j1", &[entry("A"), entry("B")]).await.unwrap();
        let out = String::from_utf8(sink.writer).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["title"], "A");
    }
}
