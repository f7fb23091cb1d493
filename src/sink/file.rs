//! File sink: one pretty-printed JSON array per section.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{BatchOutcome, Sink, SinkError};
use crate::envelope::Envelope;
use crate::section::Section;

/// Buffers a section's envelopes and writes `{output_dir}/{section}.json` on finish.
#[derive(Debug)]
pub struct FileSink {
    output_dir: PathBuf,
    buffer: Vec<Envelope>,
}

impl FileSink {
    /// Creates a sink writing into `output_dir` (created on first flush).
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            buffer: Vec::new(),
        }
    }

    /// Path of the file a section is written to.
    #[must_use]
    pub fn section_path(&self, section: Section) -> PathBuf {
        self.output_dir.join(format!("{section}.json"))
    }

    /// Envelopes waiting for the next flush.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn write_batch(
        &mut self,
        section: Section,
        page: u32,
        batch: Vec<Envelope>,
    ) -> Result<BatchOutcome, SinkError> {
        let count = batch.len();
        if let Some(stray) = batch.iter().find(|e| e.section != section) {
            warn!(%section, page, other = %stray.section, "buffering envelope tagged with another section");
        }
        self.buffer.extend(batch);
        debug!(%section, page, count, total = self.buffer.len(), "buffered batch");
        Ok(BatchOutcome::Buffered { count })
    }

    #[instrument(skip(self, section), fields(section = %section, count = self.buffer.len()))]
    async fn finish_section(&mut self, section: Section) -> Result<Option<PathBuf>, SinkError> {
        if self.buffer.is_empty() {
            info!("no data collected, nothing saved");
            return Ok(None);
        }

        let entries = std::mem::take(&mut self.buffer);
        let json = serde_json::to_vec_pretty(&entries)
            .map_err(|source| SinkError::Serialize { section, source })?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| SinkError::io(&self.output_dir, source))?;

        let path = self.section_path(section);
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| SinkError::io(&path, source))?;

        info!(entries = entries.len(), path = %path.display(), "saved section file");
        Ok(Some(path))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;

    fn envelope(section: Section, guid: &str, name: &str) -> Envelope {
        let record = json!({ "guid": guid, "name": name });
        Envelope::wrap(section, record.as_object().unwrap().clone())
    }

    #[tokio::test]
    async fn test_write_batch_buffers_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let mut sink = FileSink::new(dir.path().join("out"));

        let outcome = sink
            .write_batch(Section::Items, 1, vec![envelope(Section::Items, "a", "Axe")])
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome::Buffered { count: 1 });
        assert_eq!(sink.buffered(), 1);
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_finish_section_writes_pretty_array_and_clears_buffer() {
        let dir = TempDir::new().unwrap();
        let mut sink = FileSink::new(dir.path().join("data"));

        sink.write_batch(Section::Npcs, 1, vec![envelope(Section::Npcs, "n1", "Ölaf")])
            .await
            .unwrap();
        sink.write_batch(Section::Npcs, 2, vec![envelope(Section::Npcs, "n2", "Bram")])
            .await
            .unwrap();

        let path = sink.finish_section(Section::Npcs).await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("data").join("npcs.json"));
        assert_eq!(sink.buffered(), 0);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Ölaf"), "non-ASCII should be kept verbatim");
        assert!(raw.contains("\n  {\n    \""), "expected 2-space indentation: {raw}");

        let parsed: Value = serde_json::from_str(&raw).unwrap();
        let entries = parsed.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["guid"], "n1");
        assert_eq!(entries[0]["section"], "npcs");
        assert_eq!(entries[1]["data"]["guid"], "n2");
    }

    #[tokio::test]
    async fn test_finish_section_empty_buffer_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut sink = FileSink::new(dir.path());

        assert!(sink.finish_section(Section::Pois).await.unwrap().is_none());
        assert!(!dir.path().join("pois.json").exists());
    }

    #[tokio::test]
    async fn test_sections_do_not_leak_into_each_other() {
        let dir = TempDir::new().unwrap();
        let mut sink = FileSink::new(dir.path());

        sink.write_batch(Section::Items, 1, vec![envelope(Section::Items, "a", "Axe")])
            .await
            .unwrap();
        sink.finish_section(Section::Items).await.unwrap();
        sink.write_batch(Section::Pois, 1, vec![envelope(Section::Pois, "p", "Tower")])
            .await
            .unwrap();
        let path = sink.finish_section(Section::Pois).await.unwrap().unwrap();

        let parsed: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finish_section_unwritable_dir_is_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let mut sink = FileSink::new(&blocker);

        sink.write_batch(Section::Items, 1, vec![envelope(Section::Items, "a", "Axe")])
            .await
            .unwrap();
        let err = sink.finish_section(Section::Items).await.unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
        assert!(!err.is_fatal());
    }
}
