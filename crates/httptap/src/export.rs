//! JSONL export of the outbound record stream

use httptap_core::config::JsonlSettings;
use httptap_core::events::TraceRecord;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use tracing::info;

/// Writes one JSON object per line
pub struct JsonlWriter {
    writer: Box<dyn Write + Send>,
    flush_each: bool,
    written: u64,
}

impl JsonlWriter {
    pub fn new(writer: impl Write + Send + 'static, flush_each: bool) -> Self {
        Self {
            writer: Box::new(writer),
            flush_each,
            written: 0,
        }
    }

    /// Open the configured file, or stdout when no path is set
    pub fn open(settings: &JsonlSettings) -> io::Result<Self> {
        let Some(path) = &settings.path else {
            return Ok(Self::new(io::stdout(), true));
        };

        let file = if settings.append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        info!("JSONL exporter writing to: {}", path);

        Ok(Self::new(BufWriter::new(file), settings.flush_each))
    }

    pub fn write(&mut self, record: &TraceRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        if self.flush_each {
            self.writer.flush()?;
        }
        self.written += 1;
        Ok(())
    }

    /// Flush and return the number of records written
    pub fn finish(mut self) -> io::Result<u64> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptap_core::events::{HttpEvent, RawHttpEvent};
    use tempfile::TempDir;

    fn record(pid: u32, url: &str) -> TraceRecord {
        let mut raw = RawHttpEvent::zeroed();
        raw.pid = pid;
        TraceRecord::Http(HttpEvent {
            raw,
            method: "GET".to_string(),
            url: url.to_string(),
            host: "10.0.0.1".to_string(),
            peer: "10.0.0.2".to_string(),
            process_name: String::new(),
        })
    }

    fn settings(dir: &TempDir, append: bool) -> JsonlSettings {
        JsonlSettings {
            path: Some(dir.path().join("events.jsonl").display().to_string()),
            append,
            flush_each: false,
        }
    }

    #[test]
    fn test_writes_one_object_per_line() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonlWriter::open(&settings(&dir, false)).unwrap();
        writer.write(&record(1, "/a")).unwrap();
        writer.write(&record(2, "/b")).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let contents = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["data"]["url"], "/a");
        assert_eq!(lines[1]["data"]["pid"], 2);
    }

    #[test]
    fn test_append_keeps_previous_records() {
        let dir = TempDir::new().unwrap();

        let mut first = JsonlWriter::open(&settings(&dir, true)).unwrap();
        first.write(&record(1, "/a")).unwrap();
        first.finish().unwrap();

        let mut second = JsonlWriter::open(&settings(&dir, true)).unwrap();
        second.write(&record(2, "/b")).unwrap();
        second.finish().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);

        let mut truncating = JsonlWriter::open(&settings(&dir, false)).unwrap();
        truncating.write(&record(3, "/c")).unwrap();
        truncating.finish().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
